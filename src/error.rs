use std::{fmt::Display, io, num::NonZeroU32};

use crate::{platform::format_os_error_code, report::ParseError};

/// Error returned when talking to a device.
#[derive(Debug, Clone)]
pub struct Error {
    pub(crate) kind: ErrorKind,
    pub(crate) code: Option<NonZeroU32>,
    pub(crate) message: &'static str,
}

impl Error {
    pub(crate) fn new(kind: ErrorKind, message: &'static str) -> Self {
        Self {
            kind,
            code: None,
            message,
        }
    }

    pub(crate) fn new_os(kind: ErrorKind, message: &'static str, code: i32) -> Self {
        Self {
            kind,
            code: u32::try_from(code).ok().and_then(NonZeroU32::new),
            message,
        }
    }

    #[track_caller]
    pub(crate) fn log_error(self) -> Self {
        log::error!("{}", self);
        self
    }

    #[track_caller]
    pub(crate) fn log_debug(self) -> Self {
        log::debug!("{}", self);
        self
    }

    pub fn kind(&self) -> ErrorKind {
        self.kind
    }

    /// Get the error code from the OS, if applicable.
    ///
    /// On Linux this is the `errno` value.
    pub fn os_error(&self) -> Option<u32> {
        self.code.map(|c| c.get())
    }
}

impl Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.message)?;
        if let Some(code) = self.code {
            write!(f, " (")?;
            format_os_error_code(f, code.get())?;
            write!(f, ")")?;
        }
        Ok(())
    }
}

impl std::error::Error for Error {}

impl From<Error> for io::Error {
    fn from(err: Error) -> Self {
        let kind = match err.kind {
            ErrorKind::Disconnected => io::ErrorKind::NotConnected,
            ErrorKind::Busy => io::ErrorKind::Other,
            ErrorKind::PermissionDenied => io::ErrorKind::PermissionDenied,
            ErrorKind::NotFound => io::ErrorKind::NotFound,
            ErrorKind::Unsupported => io::ErrorKind::Unsupported,
            ErrorKind::Other => io::ErrorKind::Other,
        };
        io::Error::new(kind, err)
    }
}

/// General category of error as part of an [`Error`].
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum ErrorKind {
    /// Device is disconnected.
    Disconnected,

    /// Device or interface is in use by another application or kernel driver.
    Busy,

    /// This user does not have permission to perform the requested operation.
    PermissionDenied,

    /// Requested device, configuration, interface, or descriptor not found.
    NotFound,

    /// The requested operation is not supported on this platform.
    Unsupported,

    /// Uncategorized error.
    Other,
}

/// Error from [`crate::Device::active_configuration`]
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct ActiveConfigurationError {
    pub(crate) configuration_value: u8,
}

impl Display for ActiveConfigurationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.configuration_value == 0 {
            write!(f, "device is not configured")
        } else {
            write!(
                f,
                "no descriptor found for active configuration {}",
                self.configuration_value
            )
        }
    }
}

impl std::error::Error for ActiveConfigurationError {}

impl From<ActiveConfigurationError> for Error {
    fn from(value: ActiveConfigurationError) -> Self {
        let message = if value.configuration_value == 0 {
            "device is not configured"
        } else {
            "no descriptor found for active configuration"
        };
        Error::new(ErrorKind::NotFound, message)
    }
}

/// Error from [`crate::dump_report_descriptors`].
#[derive(Debug)]
pub enum DumpError {
    /// Reading the descriptor from the device failed.
    Transport(Error),

    /// The report descriptor could not be decoded.
    Parse { interface: u8, source: ParseError },

    /// Writing the trace failed.
    Io(io::Error),
}

impl Display for DumpError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DumpError::Transport(e) => write!(f, "{e}"),
            DumpError::Parse { interface, source } => write!(f, "interface {interface}: {source}"),
            DumpError::Io(e) => write!(f, "failed to write report descriptor: {e}"),
        }
    }
}

impl std::error::Error for DumpError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            DumpError::Transport(e) => Some(e),
            DumpError::Parse { source, .. } => Some(source),
            DumpError::Io(e) => Some(e),
        }
    }
}

impl From<Error> for DumpError {
    fn from(value: Error) -> Self {
        DumpError::Transport(value)
    }
}

impl From<io::Error> for DumpError {
    fn from(value: io::Error) -> Self {
        DumpError::Io(value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display() {
        let e = Error::new(ErrorKind::NotFound, "interface has no HID report descriptor");
        assert_eq!(e.to_string(), "interface has no HID report descriptor");
        assert_eq!(e.os_error(), None);

        let e = Error::new_os(ErrorKind::PermissionDenied, "failed to open device", 13);
        assert_eq!(e.kind(), ErrorKind::PermissionDenied);
        assert_eq!(e.os_error(), Some(13));
        assert!(e.to_string().starts_with("failed to open device ("));

        assert_eq!(Error::new_os(ErrorKind::Other, "x", 0).os_error(), None);
    }

    #[test]
    fn test_active_configuration() {
        let unconfigured = ActiveConfigurationError {
            configuration_value: 0,
        };
        assert_eq!(unconfigured.to_string(), "device is not configured");
        assert_eq!(Error::from(unconfigured).kind(), ErrorKind::NotFound);

        let missing = ActiveConfigurationError {
            configuration_value: 2,
        };
        assert_eq!(
            missing.to_string(),
            "no descriptor found for active configuration 2"
        );
    }

    #[test]
    fn test_dump_error() {
        let e = DumpError::Parse {
            interface: 1,
            source: ParseError::LongItemUnsupported { offset: 4 },
        };
        assert!(e.to_string().starts_with("interface 1: "));
        assert!(std::error::Error::source(&e).is_some());

        let io_err: io::Error = Error::new(ErrorKind::Unsupported, "nope").into();
        assert_eq!(io_err.kind(), io::ErrorKind::Unsupported);
    }
}
