use std::{fmt::Display, num::ParseIntError, str::FromStr};

#[cfg(any(target_os = "linux", target_os = "android"))]
use crate::platform::SysfsPath;

use crate::{descriptors::CLASS_HID, Device, Error};

/// Information about a device that can be obtained without opening it.
///
/// Found in the results of [`crate::list_devices`].
#[derive(Clone)]
pub struct DeviceInfo {
    #[cfg(any(target_os = "linux", target_os = "android"))]
    pub(crate) path: SysfsPath,

    pub(crate) busnum: u8,
    pub(crate) device_address: u8,

    pub(crate) vendor_id: u16,
    pub(crate) product_id: u16,

    pub(crate) class: u8,
    pub(crate) subclass: u8,
    pub(crate) protocol: u8,

    pub(crate) manufacturer_string: Option<String>,
    pub(crate) product_string: Option<String>,
    pub(crate) serial_number: Option<String>,

    pub(crate) interfaces: Vec<InterfaceInfo>,
}

impl DeviceInfo {
    /// *(Linux-only)* Sysfs path for the device.
    #[cfg(target_os = "linux")]
    pub fn sysfs_path(&self) -> &std::path::Path {
        &self.path.0
    }

    pub fn bus_number(&self) -> u8 {
        self.busnum
    }

    /// Number identifying the device within the bus.
    pub fn device_address(&self) -> u8 {
        self.device_address
    }

    #[doc(alias = "idVendor")]
    pub fn vendor_id(&self) -> u16 {
        self.vendor_id
    }

    #[doc(alias = "idProduct")]
    pub fn product_id(&self) -> u16 {
        self.product_id
    }

    /// `0x00`: specified at the interface level.
    #[doc(alias = "bDeviceClass")]
    pub fn class(&self) -> u8 {
        self.class
    }

    #[doc(alias = "bDeviceSubClass")]
    pub fn subclass(&self) -> u8 {
        self.subclass
    }

    #[doc(alias = "bDeviceProtocol")]
    pub fn protocol(&self) -> u8 {
        self.protocol
    }

    #[doc(alias = "iManufacturer")]
    pub fn manufacturer_string(&self) -> Option<&str> {
        self.manufacturer_string.as_deref()
    }

    #[doc(alias = "iProduct")]
    pub fn product_string(&self) -> Option<&str> {
        self.product_string.as_deref()
    }

    #[doc(alias = "iSerial")]
    pub fn serial_number(&self) -> Option<&str> {
        self.serial_number.as_deref()
    }

    /// Interfaces of the active configuration, by interface number.
    pub fn interfaces(&self) -> impl Iterator<Item = &InterfaceInfo> {
        self.interfaces.iter()
    }

    /// Whether the device, or any of its interfaces, is HID class.
    pub fn is_hid(&self) -> bool {
        self.class == CLASS_HID || self.interfaces.iter().any(|i| i.class == CLASS_HID)
    }

    pub fn open(&self) -> Result<Device, Error> {
        Device::open(self)
    }
}

// Not derived so that we can format some fields in hex
impl std::fmt::Debug for DeviceInfo {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DeviceInfo")
            .field("busnum", &self.busnum)
            .field("device_address", &self.device_address)
            .field("vendor_id", &format_args!("0x{:04X}", self.vendor_id))
            .field("product_id", &format_args!("0x{:04X}", self.product_id))
            .field("class", &format_args!("0x{:02X}", self.class))
            .field("subclass", &format_args!("0x{:02X}", self.subclass))
            .field("protocol", &format_args!("0x{:02X}", self.protocol))
            .field("manufacturer_string", &self.manufacturer_string)
            .field("product_string", &self.product_string)
            .field("serial_number", &self.serial_number)
            .field("interfaces", &self.interfaces)
            .finish()
    }
}

/// Summary of an interface, as reported by the OS without opening the device.
#[derive(Clone)]
pub struct InterfaceInfo {
    pub(crate) interface_number: u8,
    pub(crate) class: u8,
    pub(crate) subclass: u8,
    pub(crate) protocol: u8,
    pub(crate) interface_string: Option<String>,
}

impl InterfaceInfo {
    #[doc(alias = "bInterfaceNumber")]
    pub fn interface_number(&self) -> u8 {
        self.interface_number
    }

    #[doc(alias = "bInterfaceClass")]
    pub fn class(&self) -> u8 {
        self.class
    }

    #[doc(alias = "bInterfaceSubClass")]
    pub fn subclass(&self) -> u8 {
        self.subclass
    }

    #[doc(alias = "bInterfaceProtocol")]
    pub fn protocol(&self) -> u8 {
        self.protocol
    }

    #[doc(alias = "iInterface")]
    pub fn interface_string(&self) -> Option<&str> {
        self.interface_string.as_deref()
    }
}

impl std::fmt::Debug for InterfaceInfo {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InterfaceInfo")
            .field("interface_number", &self.interface_number)
            .field("class", &format_args!("0x{:02X}", self.class))
            .field("subclass", &format_args!("0x{:02X}", self.subclass))
            .field("protocol", &format_args!("0x{:02X}", self.protocol))
            .field("interface_string", &self.interface_string)
            .finish()
    }
}

/// A `VID:PID` pair selecting a device.
#[derive(Clone, Copy, PartialEq, Eq, Debug, Hash)]
pub struct DeviceFilter {
    pub vendor_id: u16,
    pub product_id: u16,
}

impl DeviceFilter {
    pub fn matches(&self, device: &DeviceInfo) -> bool {
        device.vendor_id == self.vendor_id && device.product_id == self.product_id
    }
}

impl Display for DeviceFilter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:04x}:{:04x}", self.vendor_id, self.product_id)
    }
}

/// Error parsing a [`DeviceFilter`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ParseDeviceFilterError(String);

impl Display for ParseDeviceFilterError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Invalid device {}", self.0)
    }
}

impl std::error::Error for ParseDeviceFilterError {}

fn parse_hex_u16(s: &str) -> Result<u16, ParseIntError> {
    let s = s.trim();
    let digits = s
        .strip_prefix("0x")
        .or_else(|| s.strip_prefix("0X"))
        .unwrap_or(s);
    u16::from_str_radix(digits, 16)
}

impl FromStr for DeviceFilter {
    type Err = ParseDeviceFilterError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || ParseDeviceFilterError(s.to_owned());
        let (vid, pid) = s.trim().split_once(':').ok_or_else(invalid)?;
        Ok(DeviceFilter {
            vendor_id: parse_hex_u16(vid).map_err(|_| invalid())?,
            product_id: parse_hex_u16(pid).map_err(|_| invalid())?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn device(class: u8, interface_classes: &[u8]) -> DeviceInfo {
        DeviceInfo {
            #[cfg(any(target_os = "linux", target_os = "android"))]
            path: SysfsPath("/sys/bus/usb/devices/1-2".into()),
            busnum: 1,
            device_address: 5,
            vendor_id: 0x046d,
            product_id: 0xc52b,
            class,
            subclass: 0,
            protocol: 0,
            manufacturer_string: Some("Logitech".into()),
            product_string: Some("USB Receiver".into()),
            serial_number: None,
            interfaces: interface_classes
                .iter()
                .enumerate()
                .map(|(n, &class)| InterfaceInfo {
                    interface_number: n as u8,
                    class,
                    subclass: 0,
                    protocol: 0,
                    interface_string: None,
                })
                .collect(),
        }
    }

    #[test]
    fn test_is_hid() {
        assert!(device(0, &[0x03, 0x03]).is_hid());
        assert!(device(0, &[0xff, 0x03]).is_hid());
        assert!(device(0x03, &[]).is_hid());
        assert!(!device(0, &[0xff, 0x08]).is_hid());
        assert!(!device(0x09, &[0x09]).is_hid());
    }

    #[test]
    fn test_parse_filter() {
        assert_eq!(
            "046d:c52b".parse::<DeviceFilter>(),
            Ok(DeviceFilter {
                vendor_id: 0x046d,
                product_id: 0xc52b
            })
        );
        assert_eq!(
            " 0x046D:0XC52B\n".parse::<DeviceFilter>(),
            Ok(DeviceFilter {
                vendor_id: 0x046d,
                product_id: 0xc52b
            })
        );
        assert_eq!(
            "1:2".parse::<DeviceFilter>().unwrap().to_string(),
            "0001:0002"
        );
    }

    #[test]
    fn test_parse_filter_invalid() {
        for s in ["", "046d", "046d:", ":c52b", "046d:c52b:1", "xyz:c52b", "10000:1"] {
            let err = s.parse::<DeviceFilter>().unwrap_err();
            assert_eq!(err.to_string(), format!("Invalid device {s}"));
        }
    }

    #[test]
    fn test_filter_matches() {
        let filter: DeviceFilter = "046d:c52b".parse().unwrap();
        assert!(filter.matches(&device(0, &[3])));
        assert!(!"046d:c52c"
            .parse::<DeviceFilter>()
            .unwrap()
            .matches(&device(0, &[3])));
    }
}
