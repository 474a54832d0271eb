mod usbfs;

mod enumeration;
pub use enumeration::{list_devices, SysfsPath};

mod device;
pub(crate) use device::LinuxDevice as Device;

use rustix::io::Errno;

use crate::{Error, ErrorKind};

pub fn format_os_error_code(f: &mut std::fmt::Formatter<'_>, code: u32) -> std::fmt::Result {
    write!(f, "errno {code}")
}

pub(crate) fn errno_to_error(e: Errno, message: &'static str) -> Error {
    let kind = match e {
        Errno::NODEV | Errno::SHUTDOWN => ErrorKind::Disconnected,
        Errno::BUSY => ErrorKind::Busy,
        Errno::ACCESS | Errno::PERM => ErrorKind::PermissionDenied,
        Errno::NOENT | Errno::NODATA => ErrorKind::NotFound,
        Errno::NOSYS | Errno::NOTSUP => ErrorKind::Unsupported,
        _ => ErrorKind::Other,
    };
    Error::new_os(kind, message, e.raw_os_error())
}

pub(crate) fn io_to_error(e: std::io::Error, message: &'static str) -> Error {
    match e.raw_os_error() {
        Some(code) => errno_to_error(Errno::from_raw_os_error(code), message),
        None => Error::new(ErrorKind::Other, message),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_errno_kinds() {
        assert_eq!(errno_to_error(Errno::NODATA, "x").kind(), ErrorKind::NotFound);
        assert_eq!(errno_to_error(Errno::ACCESS, "x").kind(), ErrorKind::PermissionDenied);
        assert_eq!(errno_to_error(Errno::NODEV, "x").kind(), ErrorKind::Disconnected);
        assert_eq!(errno_to_error(Errno::PIPE, "x").kind(), ErrorKind::Other);

        let e = io_to_error(std::io::Error::from_raw_os_error(13), "failed to open device");
        assert_eq!(e.kind(), ErrorKind::PermissionDenied);
        assert_eq!(e.to_string(), "failed to open device (errno 13)");
    }
}
