//! Fetching report descriptors from devices.

use std::{io::Write, time::Duration};

use log::debug;

use crate::{control::ControlIn, report, Device, DumpError, Error, ErrorKind};

/// Timeout for the `GET_DESCRIPTOR` request.
pub const REPORT_DESCRIPTOR_TIMEOUT: Duration = Duration::from_millis(1000);

/// Something that can produce raw HID report descriptors.
pub trait ReportDescriptorSource {
    /// Numbers of the HID-class interfaces of the active configuration, ascending.
    fn hid_interfaces(&self) -> Result<Vec<u8>, Error>;

    /// Raw report descriptor bytes of `interface`.
    fn report_descriptor(&self, interface: u8) -> Result<Vec<u8>, Error>;
}

impl ReportDescriptorSource for Device {
    fn hid_interfaces(&self) -> Result<Vec<u8>, Error> {
        Ok(self.active_configuration()?.hid_interface_numbers())
    }

    fn report_descriptor(&self, interface: u8) -> Result<Vec<u8>, Error> {
        fetch_report_descriptor(self, interface)
    }
}

/// Read the report descriptor of `interface` in the active configuration.
///
/// The length comes from the interface's HID class descriptor. Any kernel
/// driver bound to the interface is detached for the transfer and re-attached
/// afterwards, whether or not the transfer succeeds.
pub fn fetch_report_descriptor(device: &Device, interface: u8) -> Result<Vec<u8>, Error> {
    let len = {
        let config = device.active_configuration()?;
        let alt = config
            .interface(interface)
            .ok_or(Error::new(ErrorKind::NotFound, "interface not found"))?
            .first_alt_setting();
        let hid = alt.hid_descriptor().ok_or(Error::new(
            ErrorKind::NotFound,
            "interface has no HID descriptor",
        ))?;
        hid.report_descriptor_len().ok_or(Error::new(
            ErrorKind::NotFound,
            "interface has no HID report descriptor",
        ))?
    };

    debug!("Reading {len} byte report descriptor from interface {interface}");

    let _guard = device.detach_kernel_driver_scoped(interface)?;
    let buf = device.control_in(
        ControlIn::get_report_descriptor(interface, len),
        REPORT_DESCRIPTOR_TIMEOUT,
    )?;

    if buf.len() < len as usize {
        debug!(
            "Interface {interface} returned {} of {len} report descriptor bytes",
            buf.len()
        );
    }

    Ok(buf)
}

/// Write the decoded report descriptor of every HID interface of `source` to `out`.
///
/// Each interface is written as a header followed by the trace and a blank
/// line. A descriptor that fails to decode aborts the dump before anything
/// is written for that interface.
pub fn dump_report_descriptors<S, W>(source: &S, out: &mut W) -> Result<(), DumpError>
where
    S: ReportDescriptorSource + ?Sized,
    W: Write + ?Sized,
{
    for interface in source.hid_interfaces()? {
        let raw = source.report_descriptor(interface)?;
        let rd = report::parse(&raw).map_err(|source| DumpError::Parse { interface, source })?;

        writeln!(out, "Interface Number: {interface}")?;
        writeln!(out, "Report Descriptor:")?;
        writeln!(out, "{rd}")?;
        writeln!(out)?;
    }
    Ok(())
}
