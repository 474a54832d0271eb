//! Walking the standard USB descriptors that lead to a HID report descriptor.
//!
//! The report descriptor itself is not part of the configuration descriptor.
//! Its length is announced by the HID class descriptor that follows each
//! HID interface descriptor, and it is then fetched with a separate
//! `GET_DESCRIPTOR` request.

use std::{collections::BTreeMap, fmt::Debug, iter, ops::Deref};

use log::warn;

pub(crate) const DESCRIPTOR_TYPE_DEVICE: u8 = 0x01;
pub(crate) const DESCRIPTOR_LEN_DEVICE: u8 = 18;

pub(crate) const DESCRIPTOR_TYPE_CONFIGURATION: u8 = 0x02;
pub(crate) const DESCRIPTOR_LEN_CONFIGURATION: u8 = 9;

pub(crate) const DESCRIPTOR_TYPE_INTERFACE: u8 = 0x04;
pub(crate) const DESCRIPTOR_LEN_INTERFACE: u8 = 9;

/// `bDescriptorType` of the HID class descriptor.
pub const DESCRIPTOR_TYPE_HID: u8 = 0x21;
pub(crate) const DESCRIPTOR_LEN_HID_MIN: u8 = 6;

/// `bDescriptorType` of a HID report descriptor.
pub const DESCRIPTOR_TYPE_REPORT: u8 = 0x22;

/// `bInterfaceClass` / `bDeviceClass` of HID devices.
pub const CLASS_HID: u8 = 0x03;

/// A single raw USB descriptor.
///
/// Derefs to the descriptor bytes, starting with `bLength`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Descriptor<'a>(&'a [u8]);

impl<'a> Descriptor<'a> {
    /// Wrap `buf` if it is at least 2 bytes and holds the whole `bLength`.
    pub fn new(buf: &'a [u8]) -> Option<Descriptor<'a>> {
        if buf.len() >= 2 && buf.len() >= buf[0] as usize {
            Some(Descriptor(buf))
        } else {
            None
        }
    }

    #[doc(alias = "bLength")]
    pub fn descriptor_len(&self) -> usize {
        self.0[0] as usize
    }

    #[doc(alias = "bDescriptorType")]
    pub fn descriptor_type(&self) -> u8 {
        self.0[1]
    }

    pub fn as_bytes(&self) -> &'a [u8] {
        self.0
    }
}

impl Deref for Descriptor<'_> {
    type Target = [u8];

    fn deref(&self) -> &[u8] {
        self.0
    }
}

/// Iterator over concatenated descriptors, stopping at the first one whose
/// `bLength` is inconsistent with the remaining buffer.
#[derive(Clone)]
pub struct Descriptors<'a>(&'a [u8]);

impl<'a> Descriptors<'a> {
    pub fn as_bytes(&self) -> &'a [u8] {
        self.0
    }

    fn split_first(&self) -> Option<(&'a [u8], &'a [u8])> {
        let len = *self.0.first()? as usize;
        if self.0.len() < 2 {
            return None;
        }

        if len < 2 {
            warn!("descriptor with bLength {len} can't point to next descriptor");
            return None;
        }

        if len > self.0.len() {
            warn!(
                "descriptor with bLength {len} exceeds remaining buffer length {}",
                self.0.len()
            );
            return None;
        }

        Some(self.0.split_at(len))
    }

    /// Split into groups, each starting with a descriptor of `descriptor_type`
    /// and running until the next one. Leading descriptors of other types are
    /// skipped, as are group heads shorter than `min_len`.
    fn split_by_type(mut self, descriptor_type: u8, min_len: u8) -> impl Iterator<Item = &'a [u8]> {
        iter::from_fn(move || {
            loop {
                let (_, next) = self.split_first()?;

                if self.0[1] == descriptor_type {
                    if self.0[0] >= min_len {
                        break;
                    }
                    warn!(
                        "ignoring descriptor of type {descriptor_type} and length {} (minimum {min_len})",
                        self.0[0]
                    );
                }

                self.0 = next;
            }

            let mut rest = Descriptors(&self.0[self.0[0] as usize..]);
            while let Some((d, next)) = rest.split_first() {
                if d[1] == descriptor_type {
                    break;
                }
                rest = Descriptors(next);
            }

            let (group, next) = self.0.split_at(self.0.len() - rest.0.len());
            self.0 = next;
            Some(group)
        })
    }
}

impl<'a> Iterator for Descriptors<'a> {
    type Item = Descriptor<'a>;

    fn next(&mut self) -> Option<Self::Item> {
        let (cur, next) = self.split_first()?;
        self.0 = next;
        Some(Descriptor(cur))
    }
}

macro_rules! descriptor_fields {
    (impl $(<$( $i_lt:lifetime ),+>)? $tname:ident $(<$( $t_lt:lifetime ),+>)? {
        $(
            $(#[$attr:meta])*
            $vis:vis fn $name:ident at $pos:literal -> $ty:ty;
        )*
    }) => {
        impl $(<$( $i_lt ),+>)? $tname $(<$( $t_lt ),+>)? {
            $(
                $(#[$attr])*
                #[inline]
                $vis fn $name(&self) -> $ty {
                    let mut bytes = [0; std::mem::size_of::<$ty>()];
                    bytes.copy_from_slice(&self.0[$pos..$pos + std::mem::size_of::<$ty>()]);
                    <$ty>::from_le_bytes(bytes)
                }
            )*
        }
    }
}

/// Returns the length of the device descriptor at the start of `buf`.
pub(crate) fn validate_device_descriptor(buf: &[u8]) -> Option<usize> {
    if buf.len() < DESCRIPTOR_LEN_DEVICE as usize {
        if !buf.is_empty() {
            warn!(
                "device descriptor buffer is {} bytes, need {DESCRIPTOR_LEN_DEVICE}",
                buf.len()
            );
        }
        return None;
    }

    if buf[0] < DESCRIPTOR_LEN_DEVICE || buf[0] as usize > buf.len() {
        warn!("invalid device descriptor bLength {}", buf[0]);
        return None;
    }

    if buf[1] != DESCRIPTOR_TYPE_DEVICE {
        warn!("device bDescriptorType is {}, not a device descriptor", buf[1]);
        return None;
    }

    Some(buf[0] as usize)
}

/// Returns `wTotalLength` of the configuration descriptor at the start of `buf`.
pub(crate) fn validate_config_descriptor(buf: &[u8]) -> Option<usize> {
    if buf.len() < DESCRIPTOR_LEN_CONFIGURATION as usize {
        if !buf.is_empty() {
            warn!(
                "config descriptor buffer is {} bytes, need {DESCRIPTOR_LEN_CONFIGURATION}",
                buf.len()
            );
        }
        return None;
    }

    if buf[0] < DESCRIPTOR_LEN_CONFIGURATION {
        warn!("invalid config descriptor bLength {}", buf[0]);
        return None;
    }

    if buf[1] != DESCRIPTOR_TYPE_CONFIGURATION {
        warn!(
            "config bDescriptorType is {}, not a configuration descriptor",
            buf[1]
        );
        return None;
    }

    let total_len = u16::from_le_bytes([buf[2], buf[3]]) as usize;
    if total_len < buf[0] as usize || total_len > buf.len() {
        warn!(
            "invalid config descriptor wTotalLength of {total_len} (buffer size is {})",
            buf.len()
        );
        return None;
    }

    Some(total_len)
}

/// Split a chain of concatenated configuration descriptors by `wTotalLength`.
pub(crate) fn parse_concatenated_config_descriptors(mut buf: &[u8]) -> impl Iterator<Item = &[u8]> {
    iter::from_fn(move || {
        let total_len = validate_config_descriptor(buf)?;
        let (config, rest) = buf.split_at(total_len);
        buf = rest;
        Some(config)
    })
}

/// Split the descriptors read from a usbfs device node (a device descriptor
/// followed by every configuration) into configurations.
pub(crate) fn parse_device_node_descriptors(buf: &[u8]) -> impl Iterator<Item = &[u8]> {
    let configs = validate_device_descriptor(buf).map_or(&[][..], |len| &buf[len..]);
    parse_concatenated_config_descriptors(configs)
}

/// A configuration descriptor with all of its interface and class descriptors.
#[derive(Clone)]
pub struct Configuration<'a>(&'a [u8]);

impl<'a> Configuration<'a> {
    /// Create a `Configuration` from a buffer holding exactly one
    /// configuration descriptor set.
    ///
    /// ### Panics
    ///  * when the buffer is not a valid configuration descriptor
    ///  * when `wTotalLength` does not match the buffer length
    pub fn new(buf: &'a [u8]) -> Configuration<'a> {
        assert_eq!(validate_config_descriptor(buf), Some(buf.len()));
        Configuration(buf)
    }

    pub fn descriptors(&self) -> Descriptors<'a> {
        Descriptors(self.0)
    }

    /// Iterate every interface descriptor (one per alternate setting).
    pub fn interface_alt_settings(&self) -> impl Iterator<Item = InterfaceAltSetting<'a>> {
        self.descriptors()
            .split_by_type(DESCRIPTOR_TYPE_INTERFACE, DESCRIPTOR_LEN_INTERFACE)
            .map(InterfaceAltSetting)
    }

    /// Iterate interfaces in interface number order, grouping alternate settings.
    pub fn interfaces(&self) -> impl Iterator<Item = InterfaceGroup<'a>> {
        let mut interfaces = BTreeMap::new();

        for alt in self.interface_alt_settings() {
            interfaces
                .entry(alt.interface_number())
                .or_insert_with(Vec::new)
                .push(alt);
        }

        interfaces
            .into_iter()
            .map(|(intf_number, alt_settings)| InterfaceGroup {
                intf_number,
                alt_settings,
            })
    }

    /// Find interface `number`.
    pub fn interface(&self, number: u8) -> Option<InterfaceGroup<'a>> {
        self.interfaces().find(|i| i.interface_number() == number)
    }

    /// Numbers of the interfaces whose first alternate setting is HID class.
    pub fn hid_interface_numbers(&self) -> Vec<u8> {
        self.interfaces()
            .filter(|i| i.first_alt_setting().class() == CLASS_HID)
            .map(|i| i.interface_number())
            .collect()
    }
}

descriptor_fields! {
    impl<'a> Configuration<'a> {
        #[doc(alias = "wTotalLength")]
        pub fn total_len at 2 -> u16;

        #[doc(alias = "bNumInterfaces")]
        pub fn num_interfaces at 4 -> u8;

        /// `bConfigurationValue`: the value the OS reports as active.
        #[doc(alias = "bConfigurationValue")]
        pub fn configuration_value at 5 -> u8;
    }
}

impl Debug for Configuration<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Configuration")
            .field("configuration_value", &self.configuration_value())
            .field("num_interfaces", &self.num_interfaces())
            .field(
                "interface_alt_settings",
                &self.interface_alt_settings().collect::<Vec<_>>(),
            )
            .finish()
    }
}

/// Alternate settings of one interface.
#[derive(Clone, Debug)]
pub struct InterfaceGroup<'a> {
    intf_number: u8,
    alt_settings: Vec<InterfaceAltSetting<'a>>,
}

impl<'a> InterfaceGroup<'a> {
    #[doc(alias = "bInterfaceNumber")]
    pub fn interface_number(&self) -> u8 {
        self.intf_number
    }

    pub fn alt_settings(&self) -> impl Iterator<Item = InterfaceAltSetting<'a>> + '_ {
        self.alt_settings.iter().cloned()
    }

    /// There is always at least one alternate setting, or the group would not exist.
    pub fn first_alt_setting(&self) -> InterfaceAltSetting<'a> {
        self.alt_settings[0].clone()
    }
}

/// An interface descriptor followed by its endpoint and class descriptors.
#[derive(Clone)]
pub struct InterfaceAltSetting<'a>(&'a [u8]);

impl<'a> InterfaceAltSetting<'a> {
    pub fn descriptors(&self) -> Descriptors<'a> {
        Descriptors(self.0)
    }

    /// The HID class descriptor of this interface, if it has one.
    pub fn hid_descriptor(&self) -> Option<HidDescriptor<'a>> {
        self.descriptors()
            .skip(1)
            .find(|d| d.descriptor_type() == DESCRIPTOR_TYPE_HID)
            .and_then(|d| HidDescriptor::new(d.as_bytes()))
    }
}

descriptor_fields! {
    impl<'a> InterfaceAltSetting<'a> {
        #[doc(alias = "bInterfaceNumber")]
        pub fn interface_number at 2 -> u8;

        #[doc(alias = "bAlternateSetting")]
        pub fn alternate_setting at 3 -> u8;

        #[doc(alias = "bInterfaceClass")]
        pub fn class at 5 -> u8;

        #[doc(alias = "bInterfaceSubClass")]
        pub fn subclass at 6 -> u8;

        #[doc(alias = "bInterfaceProtocol")]
        pub fn protocol at 7 -> u8;
    }
}

impl Debug for InterfaceAltSetting<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InterfaceAltSetting")
            .field("interface_number", &self.interface_number())
            .field("alternate_setting", &self.alternate_setting())
            .field("class", &self.class())
            .field("subclass", &self.subclass())
            .field("protocol", &self.protocol())
            .field("hid_descriptor", &self.hid_descriptor())
            .finish()
    }
}

/// HID class descriptor (HID 1.11, section 6.2.1).
///
/// After the fixed 6-byte header it lists `bNumDescriptors` class descriptors
/// as 3-byte (`bDescriptorType`, `wDescriptorLength`) entries.
#[derive(Clone)]
pub struct HidDescriptor<'a>(&'a [u8]);

impl<'a> HidDescriptor<'a> {
    /// Returns `None` unless `buf` starts with a HID descriptor whose
    /// `bLength` fits in the buffer.
    pub fn new(buf: &'a [u8]) -> Option<HidDescriptor<'a>> {
        let d = Descriptor::new(buf)?;
        if d.descriptor_type() != DESCRIPTOR_TYPE_HID {
            return None;
        }
        if d.descriptor_len() < DESCRIPTOR_LEN_HID_MIN as usize {
            warn!("HID descriptor bLength {} is too short", d.descriptor_len());
            return None;
        }
        Some(HidDescriptor(&buf[..d.descriptor_len()]))
    }

    /// `(bDescriptorType, wDescriptorLength)` of each listed class descriptor.
    ///
    /// Entries that would extend past `bLength` are dropped.
    pub fn class_descriptors(&self) -> impl Iterator<Item = (u8, u16)> + 'a {
        let declared = self.num_descriptors() as usize;
        let entries = &self.0[DESCRIPTOR_LEN_HID_MIN as usize..];
        if entries.len() / 3 < declared {
            warn!(
                "HID descriptor declares {declared} class descriptors but has room for {}",
                entries.len() / 3
            );
        }
        entries
            .chunks_exact(3)
            .take(declared)
            .map(|e| (e[0], u16::from_le_bytes([e[1], e[2]])))
    }

    /// `wDescriptorLength` of the first report descriptor entry.
    pub fn report_descriptor_len(&self) -> Option<u16> {
        self.class_descriptors()
            .find(|&(ty, _)| ty == DESCRIPTOR_TYPE_REPORT)
            .map(|(_, len)| len)
    }
}

descriptor_fields! {
    impl<'a> HidDescriptor<'a> {
        #[doc(alias = "bcdHID")]
        pub fn hid_version at 2 -> u16;

        #[doc(alias = "bCountryCode")]
        pub fn country_code at 4 -> u8;

        #[doc(alias = "bNumDescriptors")]
        pub fn num_descriptors at 5 -> u8;
    }
}

impl Debug for HidDescriptor<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HidDescriptor")
            .field("hid_version", &format_args!("0x{:04X}", self.hid_version()))
            .field("country_code", &self.country_code())
            .field("report_descriptor_len", &self.report_descriptor_len())
            .finish()
    }
}

/// Make public when fuzzing
#[cfg(fuzzing)]
pub fn fuzz_parse_concatenated_config_descriptors(buf: &[u8]) -> impl Iterator<Item = &[u8]> {
    parse_concatenated_config_descriptors(buf)
}

#[cfg(test)]
mod test_concatenated {
    use super::{parse_concatenated_config_descriptors, parse_device_node_descriptors};

    #[test]
    fn test_empty() {
        assert_eq!(parse_concatenated_config_descriptors(&[]).count(), 0);
    }

    #[test]
    fn test_invalid_total_len() {
        assert_eq!(
            parse_concatenated_config_descriptors(&[9, 2, 0, 0, 0, 0, 0, 0, 0]).count(),
            0
        );
        assert_eq!(
            parse_concatenated_config_descriptors(&[9, 2, 20, 0, 0, 0, 0, 0, 0]).count(),
            0
        );
    }

    #[test]
    fn test_two_configs() {
        assert_eq!(
            parse_concatenated_config_descriptors(&[
                9, 2, 13, 0, 0, 0, 0, 0, 0, 4, 0, 0, 0, 9, 2, 9, 0, 0, 0, 0, 0, 0
            ])
            .collect::<Vec<&[u8]>>(),
            vec![
                [9, 2, 13, 0, 0, 0, 0, 0, 0, 4, 0, 0, 0].as_slice(),
                [9, 2, 9, 0, 0, 0, 0, 0, 0].as_slice()
            ]
        );
    }

    #[test]
    #[rustfmt::skip]
    fn test_device_node() {
        let node = [
            0x12, 0x01, 0x00, 0x02, 0x00, 0x00, 0x00, 0x40, 0x6d,
            0x04, 0x2b, 0xc5, 0x00, 0x12, 0x01, 0x02, 0x00, 0x01,
            0x09, 0x02, 0x09, 0x00, 0x00, 0x01, 0x00, 0xa0, 0x32,
        ];
        assert_eq!(
            parse_device_node_descriptors(&node).collect::<Vec<_>>(),
            vec![&node[18..]]
        );

        // not a device descriptor
        assert_eq!(parse_device_node_descriptors(&node[18..]).count(), 0);
    }
}

#[test]
fn test_empty_config() {
    let c = Configuration::new(&[9, 2, 9, 0, 0, 1, 0, 0, 250]);
    assert_eq!(c.num_interfaces(), 0);
    assert_eq!(c.configuration_value(), 1);
    assert_eq!(c.interfaces().count(), 0);
    assert!(c.hid_interface_numbers().is_empty());
}

#[test]
fn test_malformed() {
    let c = Configuration(&[9, 2, 0, 0, 0, 1, 0, 0, 2, 5, 250, 0, 0, 0]);
    assert!(c.interfaces().next().is_none());
}

#[test]
#[should_panic]
fn test_config_length_mismatch() {
    Configuration::new(&[9, 2, 12, 0, 0, 1, 0, 0, 250]);
}

#[test]
fn test_hid_descriptor() {
    let hid = HidDescriptor::new(&[0x09, 0x21, 0x11, 0x01, 0x00, 0x01, 0x22, 0x3f, 0x01]).unwrap();
    assert_eq!(hid.hid_version(), 0x0111);
    assert_eq!(hid.country_code(), 0);
    assert_eq!(hid.num_descriptors(), 1);
    // 0x013f: both bytes of wDescriptorLength are significant
    assert_eq!(hid.report_descriptor_len(), Some(0x013f));
}

#[test]
fn test_hid_descriptor_multiple_entries() {
    let hid = HidDescriptor::new(&[
        0x0c, 0x21, 0x11, 0x01, 0x00, 0x02, 0x23, 0x10, 0x00, 0x22, 0x41, 0x00,
    ])
    .unwrap();
    assert_eq!(
        hid.class_descriptors().collect::<Vec<_>>(),
        [(0x23, 0x10), (0x22, 0x41)]
    );
    assert_eq!(hid.report_descriptor_len(), Some(0x41));
}

#[test]
fn test_hid_descriptor_truncated() {
    // declares two entries but bLength only covers one
    let hid = HidDescriptor::new(&[
        0x09, 0x21, 0x11, 0x01, 0x00, 0x02, 0x23, 0x10, 0x00, 0x22, 0x41, 0x00,
    ])
    .unwrap();
    assert_eq!(hid.class_descriptors().count(), 1);
    assert_eq!(hid.report_descriptor_len(), None);

    assert!(HidDescriptor::new(&[0x05, 0x21, 0x11, 0x01, 0x00]).is_none());
    assert!(HidDescriptor::new(&[0x09, 0x21, 0x11, 0x01, 0x00, 0x01]).is_none());
    assert!(HidDescriptor::new(&[0x09, 0x04, 0x00, 0x00, 0x01, 0x03, 0x01, 0x01, 0x00]).is_none());
}

#[test]
#[rustfmt::skip]
fn test_keyboard_and_vendor_interfaces() {
    let c = Configuration::new(&[
        0x09, 0x02, 0x42, 0x00, 0x02, 0x01, 0x00, 0xa0, 0x32,

        // interface 0: HID boot keyboard
        0x09, 0x04, 0x00, 0x00, 0x01, 0x03, 0x01, 0x01, 0x00,
        // HID
        0x09, 0x21, 0x11, 0x01, 0x00, 0x01, 0x22, 0x41, 0x00,
        // endpoint
        0x07, 0x05, 0x81, 0x03, 0x08, 0x00, 0x0a,

        // interface 1: vendor specific
        0x09, 0x04, 0x01, 0x00, 0x02, 0xff, 0x00, 0x00, 0x00,
        // endpoints
        0x07, 0x05, 0x82, 0x02, 0x40, 0x00, 0x00,
        0x07, 0x05, 0x02, 0x02, 0x40, 0x00, 0x00,

        // interface 1, alt setting 1
        0x09, 0x04, 0x01, 0x01, 0x00, 0xff, 0x00, 0x00, 0x00,
    ]);

    assert_eq!(c.num_interfaces(), 2);
    assert_eq!(c.interface_alt_settings().count(), 3);
    assert_eq!(c.interfaces().count(), 2);
    assert_eq!(c.hid_interface_numbers(), [0]);

    let keyboard = c.interface(0).unwrap().first_alt_setting();
    assert_eq!(keyboard.class(), CLASS_HID);
    assert_eq!(keyboard.subclass(), 1);
    assert_eq!(keyboard.protocol(), 1);
    assert_eq!(keyboard.descriptors().count(), 3);
    let hid = keyboard.hid_descriptor().unwrap();
    assert_eq!(hid.report_descriptor_len(), Some(0x41));

    let vendor = c.interface(1).unwrap();
    assert_eq!(vendor.alt_settings().count(), 2);
    assert!(vendor.first_alt_setting().hid_descriptor().is_none());
    assert_eq!(vendor.alt_settings().nth(1).unwrap().alternate_setting(), 1);

    assert!(c.interface(2).is_none());
}

#[test]
#[rustfmt::skip]
fn test_leading_class_descriptors_skipped() {
    let c = Configuration::new(&[
        0x09, 0x02, 0x1a, 0x00, 0x01, 0x01, 0x00, 0xa0, 0x32,
        // interface association, before any interface
        0x08, 0x0b, 0x00, 0x01, 0x03, 0x00, 0x00, 0x00,
        0x09, 0x04, 0x00, 0x00, 0x00, 0x03, 0x00, 0x00, 0x00,
    ]);
    let alts: Vec<_> = c.interface_alt_settings().collect();
    assert_eq!(alts.len(), 1);
    assert_eq!(alts[0].descriptors().count(), 1);
    assert!(alts[0].hid_descriptor().is_none());
    assert_eq!(c.hid_interface_numbers(), [0]);
}
