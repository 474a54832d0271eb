use std::{
    ffi::c_void,
    fs::File,
    io::Read,
    mem::ManuallyDrop,
    path::PathBuf,
    time::Duration,
};

use log::{debug, warn};
use rustix::{
    fd::{AsRawFd, FromRawFd, OwnedFd},
    fs::{Mode, OFlags},
};

use super::{errno_to_error, io_to_error, usbfs, SysfsPath};
use crate::{control::ControlIn, descriptors::parse_device_node_descriptors, DeviceInfo, Error};

const GET_CONFIGURATION_TIMEOUT: Duration = Duration::from_millis(100);

pub(crate) struct LinuxDevice {
    fd: OwnedFd,
    busnum: u8,
    devnum: u8,
    sysfs: Option<SysfsPath>,

    /// Read from the fd, consists of device descriptor followed by configuration descriptors
    descriptors: Vec<u8>,
}

impl LinuxDevice {
    pub(crate) fn from_device_info(d: &DeviceInfo) -> Result<LinuxDevice, Error> {
        let mut dev = Self::open(d.bus_number(), d.device_address())?;
        dev.sysfs = Some(d.path.clone());
        Ok(dev)
    }

    pub(crate) fn open(busnum: u8, devnum: u8) -> Result<LinuxDevice, Error> {
        let path = PathBuf::from(format!("/dev/bus/usb/{busnum:03}/{devnum:03}"));
        debug!("Opening usbfs device {}", path.display());
        let fd = rustix::fs::open(&path, OFlags::RDWR | OFlags::CLOEXEC, Mode::empty())
            .map_err(|e| errno_to_error(e, "failed to open device").log_error())?;

        let descriptors = {
            // Borrow the fd as a `File` without taking ownership of it
            let mut file = unsafe { ManuallyDrop::new(File::from_raw_fd(fd.as_raw_fd())) };
            let mut buf = Vec::new();
            file.read_to_end(&mut buf)
                .map_err(|e| io_to_error(e, "failed to read device descriptors").log_error())?;
            buf
        };

        debug!(
            "Opened device bus={busnum} addr={devnum}, {} descriptor bytes",
            descriptors.len()
        );

        Ok(LinuxDevice {
            fd,
            busnum,
            devnum,
            sysfs: None,
            descriptors,
        })
    }

    pub(crate) fn configuration_descriptors(&self) -> impl Iterator<Item = &[u8]> {
        parse_device_node_descriptors(&self.descriptors)
    }

    /// `bConfigurationValue` of the active configuration, or 0 if unconfigured.
    ///
    /// Read from sysfs when available, since that needs no device IO.
    pub(crate) fn active_configuration_value(&self) -> u8 {
        if let Some(sysfs) = &self.sysfs {
            match sysfs.read_attr::<u8>("bConfigurationValue") {
                Ok(v) => return v,
                Err(e) => debug!("{e}; asking the device instead"),
            }
        }

        match self.control_in(ControlIn::get_configuration(), GET_CONFIGURATION_TIMEOUT) {
            Ok(buf) if buf.len() == 1 => buf[0],
            Ok(buf) => {
                warn!("GET_CONFIGURATION returned {} bytes", buf.len());
                0
            }
            Err(e) => {
                warn!("Failed to read active configuration: {e}");
                0
            }
        }
    }

    pub(crate) fn control_in(&self, data: ControlIn, timeout: Duration) -> Result<Vec<u8>, Error> {
        let mut buf = vec![0u8; data.length as usize];
        let transfer = usbfs::CtrlTransfer {
            bRequestType: data.request_type(),
            bRequest: data.request,
            wValue: data.value,
            wIndex: data.index,
            wLength: data.length,
            timeout: timeout.as_millis().try_into().unwrap_or(u32::MAX),
            data: buf.as_mut_ptr() as *mut c_void,
        };

        // SAFETY: `buf` holds `wLength` bytes and outlives the synchronous ioctl
        let res = unsafe { usbfs::control(&self.fd, transfer) };
        match res {
            Ok(len) => {
                debug!(
                    "Control IN {:02x} {:02x} value={:04x} index={:04x} on {}.{}: {len} of {} bytes",
                    data.request_type(),
                    data.request,
                    data.value,
                    data.index,
                    self.busnum,
                    self.devnum,
                    data.length
                );
                buf.truncate(len);
                Ok(buf)
            }
            Err(e) => Err(errno_to_error(e, "control transfer failed").log_debug()),
        }
    }

    pub(crate) fn detach_kernel_driver(&self, interface: u8) -> Result<(), Error> {
        usbfs::detach_kernel_driver(&self.fd, interface)
            .map_err(|e| errno_to_error(e, "failed to detach kernel driver").log_debug())
    }

    pub(crate) fn attach_kernel_driver(&self, interface: u8) -> Result<(), Error> {
        usbfs::attach_kernel_driver(&self.fd, interface)
            .map_err(|e| errno_to_error(e, "failed to attach kernel driver").log_debug())
    }

    pub(crate) fn release_interface(&self, interface: u8) {
        let res = usbfs::release_interface(&self.fd, interface);
        debug!(
            "Released interface {interface} on device {}.{}: {res:?}",
            self.busnum, self.devnum
        );
    }
}

impl Drop for LinuxDevice {
    fn drop(&mut self) {
        debug!("Closing device {}.{}", self.busnum, self.devnum);
    }
}
