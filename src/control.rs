//! Control request setup.

/// Transfer direction, bit 7 of `bmRequestType`.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
#[repr(u8)]
pub enum Direction {
    /// Host to device
    Out = 0,

    /// Device to host
    In = 1,
}

/// Request type, bits 5-6 of `bmRequestType`.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
#[repr(u8)]
pub enum ControlType {
    Standard = 0,
    Class = 1,
    Vendor = 2,
}

/// Request recipient, bits 0-4 of `bmRequestType`.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
#[repr(u8)]
pub enum Recipient {
    Device = 0,
    Interface = 1,
    Endpoint = 2,
    Other = 3,
}

/// `bRequest` of a standard `GET_DESCRIPTOR` request.
pub const STANDARD_REQUEST_GET_DESCRIPTOR: u8 = 0x06;

/// `bRequest` of a standard `GET_CONFIGURATION` request.
pub const STANDARD_REQUEST_GET_CONFIGURATION: u8 = 0x08;

/// A device-to-host control request.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub struct ControlIn {
    #[doc(alias = "bmRequestType")]
    pub control_type: ControlType,

    #[doc(alias = "bmRequestType")]
    pub recipient: Recipient,

    #[doc(alias = "bRequest")]
    pub request: u8,

    #[doc(alias = "wValue")]
    pub value: u16,

    #[doc(alias = "wIndex")]
    pub index: u16,

    #[doc(alias = "wLength")]
    pub length: u16,
}

impl ControlIn {
    /// Standard `GET_DESCRIPTOR` request for the HID report descriptor of `interface`.
    pub fn get_report_descriptor(interface: u8, length: u16) -> ControlIn {
        ControlIn {
            control_type: ControlType::Standard,
            recipient: Recipient::Interface,
            request: STANDARD_REQUEST_GET_DESCRIPTOR,
            value: (crate::descriptors::DESCRIPTOR_TYPE_REPORT as u16) << 8,
            index: interface.into(),
            length,
        }
    }

    /// Standard `GET_CONFIGURATION` request.
    pub fn get_configuration() -> ControlIn {
        ControlIn {
            control_type: ControlType::Standard,
            recipient: Recipient::Device,
            request: STANDARD_REQUEST_GET_CONFIGURATION,
            value: 0,
            index: 0,
            length: 1,
        }
    }

    pub fn request_type(&self) -> u8 {
        request_type(Direction::In, self.control_type, self.recipient)
    }

    pub fn setup_packet(&self) -> [u8; SETUP_PACKET_SIZE] {
        let [value_lo, value_hi] = self.value.to_le_bytes();
        let [index_lo, index_hi] = self.index.to_le_bytes();
        let [length_lo, length_hi] = self.length.to_le_bytes();
        [
            self.request_type(),
            self.request,
            value_lo,
            value_hi,
            index_lo,
            index_hi,
            length_lo,
            length_hi,
        ]
    }
}

pub const SETUP_PACKET_SIZE: usize = 8;

fn request_type(direction: Direction, control_type: ControlType, recipient: Recipient) -> u8 {
    ((direction as u8) << 7) | ((control_type as u8) << 5) | (recipient as u8)
}
