#[cfg(any(target_os = "linux", target_os = "android"))]
mod linux_usbfs;

#[cfg(any(target_os = "linux", target_os = "android"))]
pub use linux_usbfs::*;

#[cfg(not(any(target_os = "linux", target_os = "android")))]
mod unsupported;

#[cfg(not(any(target_os = "linux", target_os = "android")))]
pub use unsupported::*;
