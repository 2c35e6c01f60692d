//! The one place this crate would call into a real device driver library.
//!
//! No concrete backend talking the monome wire protocol ships here — spec
//! §1 names "the USB/serial device driver library" as referenced only by
//! interface. A deployment links a backend crate that implements
//! [`super::MonomeDevice`] and wires it in here; absent one, this mirrors
//! the teacher's own pattern for an unimplemented integration seam (see
//! `cli::ServerSocket::Fd` in the original `usbvfiod` `main.rs`, which
//! likewise `unimplemented!()`s a path it doesn't yet back).

use super::{DeviceError, MonomeDevice};

/// Opens `devnode` through whatever hardware backend this build was linked
/// with.
///
/// # Errors
///
/// Returns [`DeviceError::NoBackend`] when no backend is compiled in, which
/// is always the case for this crate on its own.
pub fn open(devnode: &str) -> Result<Box<dyn MonomeDevice>, DeviceError> {
    let _ = devnode;
    Err(DeviceError::NoBackend)
}
