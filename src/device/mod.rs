//! Interface boundary for the USB/serial device driver library.
//!
//! Spec §1 names this an out-of-scope external collaborator: "the USB/serial
//! device driver library (exposes event callbacks and control operations on
//! an opaque device handle)". This module defines that interface — a trait
//! the rest of the crate programs against — without implementing the wire
//! protocol to an actual monome device. A real backend is a separate crate
//! that implements [`MonomeDevice`] against the hardware.

use std::os::fd::RawFd;

pub mod event;
pub mod open;

pub use event::DeviceEvent;
pub use open::open as open_device;

/// One of the four physical rotations a grid/encoder device can be mounted
/// in, per spec §4.2's `dev.rotation` option.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Rotation {
    #[default]
    Degrees0,
    Degrees90,
    Degrees180,
    Degrees270,
}

impl Rotation {
    #[must_use]
    pub const fn from_degrees(degrees: u16) -> Option<Self> {
        match degrees {
            0 => Some(Self::Degrees0),
            90 => Some(Self::Degrees90),
            180 => Some(Self::Degrees180),
            270 => Some(Self::Degrees270),
            _ => None,
        }
    }
}

/// LED clear mode, passed through verbatim from the inbound `clear` OSC
/// method (spec §4.2).
pub type ClearMode = i32;

/// The opaque handle and operations a device server drives one physical
/// device through.
///
/// Implementors own the serial connection. `events_fd` must return a file
/// descriptor that becomes readable exactly when a call to `poll_events`
/// would yield at least one [`DeviceEvent`]; the device server's event loop
/// multiplexes this fd against its OSC socket (spec §4.2 step 9).
pub trait MonomeDevice {
    /// Hardware-assigned stable identifier, available once the device is
    /// open.
    fn serial(&self) -> &str;

    /// Human-readable name, available once the device is open.
    fn friendly(&self) -> &str;

    /// Readiness file descriptor for the driver's event stream.
    fn events_fd(&self) -> RawFd;

    /// Drains and returns currently pending device events. Called only after
    /// `events_fd` has indicated readiness; may return an empty vector on a
    /// spurious wakeup.
    fn poll_events(&mut self) -> Result<Vec<DeviceEvent>, DeviceError>;

    /// Sets the physical rotation.
    fn set_rotation(&mut self, rotation: Rotation) -> Result<(), DeviceError>;

    /// Clears all LEDs using the given mode (0 is the device's reset mode).
    fn clear(&mut self, mode: ClearMode) -> Result<(), DeviceError>;

    /// Sets global LED intensity, 0x0 (off) through 0xF (maximum).
    fn set_intensity(&mut self, intensity: u8) -> Result<(), DeviceError>;

    /// Turns a single LED on or off.
    fn set_led(&mut self, x: i32, y: i32, on: bool) -> Result<(), DeviceError>;
}

#[derive(thiserror::Error, Debug)]
pub enum DeviceError {
    #[error("device I/O error")]
    Io(#[from] std::io::Error),
    #[error("device disconnected")]
    Disconnected,
    #[error("no hardware backend is linked into this build")]
    NoBackend,
}
