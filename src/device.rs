use std::time::Duration;

use log::{debug, warn};

use crate::{
    control::ControlIn, descriptors::Configuration, platform, ActiveConfigurationError, DeviceInfo,
    Error, ErrorKind,
};

/// An opened USB device.
///
/// Obtain a `Device` by calling [`DeviceInfo::open`]:
///
/// ```no_run
/// let device_info = hid_rd_viewer::list_devices().unwrap()
///     .find(|dev| dev.vendor_id() == 0xAAAA && dev.product_id() == 0xBBBB)
///     .expect("device not connected");
///
/// let device = device_info.open().expect("failed to open device");
/// ```
///
/// The device is closed when dropped.
pub struct Device {
    backend: platform::Device,
}

impl Device {
    pub(crate) fn open(d: &DeviceInfo) -> Result<Device, Error> {
        platform::Device::from_device_info(d).map(|backend| Device { backend })
    }

    /// Get an iterator over each configuration of the device.
    ///
    /// This returns cached data and does not perform IO.
    pub fn configurations(&self) -> impl Iterator<Item = Configuration<'_>> {
        self.backend
            .configuration_descriptors()
            .map(Configuration::new)
    }

    /// Get the configuration the OS reports as active.
    ///
    /// Fails if the device is unconfigured, or if no configuration descriptor
    /// matches the active configuration value.
    pub fn active_configuration(&self) -> Result<Configuration<'_>, ActiveConfigurationError> {
        let active = self.backend.active_configuration_value();

        self.configurations()
            .find(|c| c.configuration_value() == active)
            .ok_or(ActiveConfigurationError {
                configuration_value: active,
            })
    }

    /// Submit a control IN transfer and wait for it to complete.
    ///
    /// Returns the data received, which may be shorter than requested.
    pub fn control_in(&self, data: ControlIn, timeout: Duration) -> Result<Vec<u8>, Error> {
        self.backend.control_in(data, timeout)
    }

    /// Detach the kernel driver bound to `interface`.
    ///
    /// Fails with [`ErrorKind::NotFound`] if no driver is bound.
    pub fn detach_kernel_driver(&self, interface: u8) -> Result<(), Error> {
        self.backend.detach_kernel_driver(interface)
    }

    /// Re-bind the kernel driver for `interface`.
    pub fn attach_kernel_driver(&self, interface: u8) -> Result<(), Error> {
        self.backend.attach_kernel_driver(interface)
    }

    /// Detach any kernel driver from `interface` for the lifetime of the
    /// returned guard.
    ///
    /// When the guard is dropped, the interface is released and the driver
    /// is re-attached, if one was detached.
    pub fn detach_kernel_driver_scoped(&self, interface: u8) -> Result<KernelDriverGuard<'_>, Error> {
        KernelDriverGuard::detach(&self.backend, interface)
    }
}

/// Kernel driver binding operations on an open device.
pub(crate) trait DriverBinding {
    /// Fails with [`ErrorKind::NotFound`] if no driver is bound.
    fn detach_kernel_driver(&self, interface: u8) -> Result<(), Error>;
    fn attach_kernel_driver(&self, interface: u8) -> Result<(), Error>;
    fn release_interface(&self, interface: u8);
}

impl DriverBinding for platform::Device {
    fn detach_kernel_driver(&self, interface: u8) -> Result<(), Error> {
        platform::Device::detach_kernel_driver(self, interface)
    }

    fn attach_kernel_driver(&self, interface: u8) -> Result<(), Error> {
        platform::Device::attach_kernel_driver(self, interface)
    }

    fn release_interface(&self, interface: u8) {
        platform::Device::release_interface(self, interface)
    }
}

/// Returned by [`Device::detach_kernel_driver_scoped`].
pub struct KernelDriverGuard<'a> {
    backend: &'a dyn DriverBinding,
    interface: u8,
    reattach: bool,
}

impl<'a> KernelDriverGuard<'a> {
    pub(crate) fn detach(
        backend: &'a dyn DriverBinding,
        interface: u8,
    ) -> Result<KernelDriverGuard<'a>, Error> {
        let reattach = match backend.detach_kernel_driver(interface) {
            Ok(()) => {
                debug!("Detached kernel driver from interface {interface}");
                true
            }
            Err(e) if e.kind() == ErrorKind::NotFound => {
                debug!("No kernel driver bound to interface {interface}");
                false
            }
            Err(e) => return Err(e),
        };

        Ok(KernelDriverGuard {
            backend,
            interface,
            reattach,
        })
    }

    pub fn interface_number(&self) -> u8 {
        self.interface
    }

    /// Whether a kernel driver was detached and will be re-attached on drop.
    pub fn will_reattach(&self) -> bool {
        self.reattach
    }
}

impl Drop for KernelDriverGuard<'_> {
    fn drop(&mut self) {
        // usbfs may have implicitly claimed the interface for a control
        // transfer; the driver can't bind again until it's released.
        self.backend.release_interface(self.interface);

        if self.reattach {
            match self.backend.attach_kernel_driver(self.interface) {
                Ok(()) => debug!("Re-attached kernel driver to interface {}", self.interface),
                Err(e) => warn!(
                    "Failed to re-attach kernel driver to interface {}: {e}",
                    self.interface
                ),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::cell::RefCell;

    use super::*;

    #[derive(Debug, PartialEq, Eq)]
    enum Call {
        Detach(u8),
        Attach(u8),
        Release(u8),
    }

    struct FakeBinding {
        detach_result: Result<(), Error>,
        calls: RefCell<Vec<Call>>,
    }

    impl FakeBinding {
        fn new(detach_result: Result<(), Error>) -> Self {
            FakeBinding {
                detach_result,
                calls: RefCell::new(Vec::new()),
            }
        }
    }

    impl DriverBinding for FakeBinding {
        fn detach_kernel_driver(&self, interface: u8) -> Result<(), Error> {
            self.calls.borrow_mut().push(Call::Detach(interface));
            self.detach_result.clone()
        }

        fn attach_kernel_driver(&self, interface: u8) -> Result<(), Error> {
            self.calls.borrow_mut().push(Call::Attach(interface));
            Ok(())
        }

        fn release_interface(&self, interface: u8) {
            self.calls.borrow_mut().push(Call::Release(interface));
        }
    }

    fn failing_transfer(backend: &FakeBinding, interface: u8) -> Result<Vec<u8>, Error> {
        let guard = KernelDriverGuard::detach(backend, interface)?;
        assert_eq!(guard.interface_number(), interface);
        assert!(guard.will_reattach());
        Err(Error::new(ErrorKind::Other, "transfer failed"))
    }

    #[test]
    fn test_reattach_after_failed_transfer() {
        let backend = FakeBinding::new(Ok(()));
        let err = failing_transfer(&backend, 2).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Other);
        assert_eq!(
            *backend.calls.borrow(),
            [Call::Detach(2), Call::Release(2), Call::Attach(2)]
        );
    }

    #[test]
    fn test_no_driver_bound() {
        let backend = FakeBinding::new(Err(Error::new(ErrorKind::NotFound, "no driver")));
        {
            let guard = KernelDriverGuard::detach(&backend, 1).unwrap();
            assert_eq!(guard.interface_number(), 1);
            assert!(!guard.will_reattach());
        }
        assert_eq!(*backend.calls.borrow(), [Call::Detach(1), Call::Release(1)]);
    }

    #[test]
    fn test_detach_error_propagates() {
        let backend = FakeBinding::new(Err(Error::new(ErrorKind::PermissionDenied, "denied")));
        let err = KernelDriverGuard::detach(&backend, 0).err().unwrap();
        assert_eq!(err.kind(), ErrorKind::PermissionDenied);
        assert_eq!(*backend.calls.borrow(), [Call::Detach(0)]);
    }
}
