//! Events a [`super::MonomeDevice`] emits, mirroring spec §4.2's outbound
//! event table.

/// A single device-originated event, translated by the device server into an
/// outbound OSC message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeviceEvent {
    /// A grid button changed state.
    GridKey { x: i32, y: i32, pressed: bool },
    /// A pressure-sensitive grid cell reported a new value.
    GridPressure { x: i32, y: i32, value: i32 },
    /// An encoder was turned.
    EncoderDelta { number: i32, delta: i32 },
    /// An encoder's push-button changed state.
    EncoderKey { number: i32, pressed: bool },
    /// A tilt sensor reported a new reading.
    Tilt { sensor: i32, x: i32, y: i32, z: i32 },
}
