//! Fallback for platforms without a USB backend. Enumeration fails with
//! [`ErrorKind::Unsupported`], so no device can ever be opened.

use std::time::Duration;

use crate::{control::ControlIn, DeviceInfo, Error, ErrorKind};

const UNSUPPORTED: &str = "USB device access is only implemented on Linux";

pub fn format_os_error_code(f: &mut std::fmt::Formatter<'_>, code: u32) -> std::fmt::Result {
    write!(f, "error {code}")
}

pub fn list_devices() -> Result<std::iter::Empty<DeviceInfo>, Error> {
    Err(Error::new(ErrorKind::Unsupported, UNSUPPORTED).log_error())
}

pub(crate) enum Device {}

impl Device {
    pub(crate) fn from_device_info(_: &DeviceInfo) -> Result<Device, Error> {
        Err(Error::new(ErrorKind::Unsupported, UNSUPPORTED))
    }

    pub(crate) fn configuration_descriptors(&self) -> std::iter::Empty<&[u8]> {
        match *self {}
    }

    pub(crate) fn active_configuration_value(&self) -> u8 {
        match *self {}
    }

    pub(crate) fn control_in(&self, _: ControlIn, _: Duration) -> Result<Vec<u8>, Error> {
        match *self {}
    }

    pub(crate) fn detach_kernel_driver(&self, _: u8) -> Result<(), Error> {
        match *self {}
    }

    pub(crate) fn attach_kernel_driver(&self, _: u8) -> Result<(), Error> {
        match *self {}
    }

    pub(crate) fn release_interface(&self, _: u8) {
        match *self {}
    }
}
