//! Read and decode USB HID report descriptors.
//!
//! The core of this crate is [`report`], a decoder for the short-item
//! encoding of HID report descriptors that renders an indented, human-readable
//! trace:
//!
//! ```
//! let trace = hid_rd_viewer::report::render(&[0xA1, 0x01, 0x81, 0x01, 0xC0]).unwrap();
//! assert_eq!(trace, "Collection(0x1)\n  Input(0x1)\nEnd Collection\n");
//! ```
//!
//! The rest of the crate fetches the raw descriptor bytes from a device:
//! [`list_devices`] enumerates attached devices, [`DeviceInfo::open`] opens
//! one, and [`fetch_report_descriptor`] reads the report descriptor of a HID
//! interface with a control transfer.
//!
//! ### Platform support
//!
//! Device access is implemented for Linux through usbfs and sysfs. On other
//! platforms [`list_devices`] fails with [`ErrorKind::Unsupported`]; the
//! decoder works everywhere.

mod platform;

pub mod control;
pub mod descriptors;
pub mod report;

mod enumeration;
pub use enumeration::{DeviceFilter, DeviceInfo, InterfaceInfo, ParseDeviceFilterError};

mod device;
pub use device::{Device, KernelDriverGuard};

mod error;
pub use error::{ActiveConfigurationError, DumpError, Error, ErrorKind};

mod transport;
pub use transport::{
    dump_report_descriptors, fetch_report_descriptor, ReportDescriptorSource,
    REPORT_DESCRIPTOR_TIMEOUT,
};

/// Get an iterator listing the connected devices, ordered by bus and address.
///
/// ### Example
///
/// ```no_run
/// for device in hid_rd_viewer::list_devices().unwrap().filter(|d| d.is_hid()) {
///     println!("{:04x}:{:04x}", device.vendor_id(), device.product_id());
/// }
/// ```
pub fn list_devices() -> Result<impl Iterator<Item = DeviceInfo>, Error> {
    platform::list_devices()
}
