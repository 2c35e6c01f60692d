//! Translation between device events/control OSC and the device, per the
//! fixed mapping tables in spec §4.2 steps 4 and 5.

use std::net::{SocketAddr, UdpSocket};

use rosc::{OscMessage, OscPacket, OscType};
use tracing::warn;

use crate::device::{DeviceEvent, MonomeDevice};

/// Joins a configured prefix (e.g. `/monome`) with a relative path
/// (e.g. `grid/key`) into `/monome/grid/key`.
#[must_use]
pub fn prefixed(prefix: &str, relative: &str) -> String {
    format!("{}/{relative}", prefix.trim_end_matches('/'))
}

/// Sends one outbound OSC message for `event`, per spec §4.2 step 4's fixed
/// mapping table. All outbound messages carry an immediate timestamp
/// (handled implicitly: `rosc` messages carry no timestamp of their own,
/// matching `lo_send_from(..., LO_TT_IMMEDIATE, ...)` in the original) and
/// are sent from the device server's own bound port.
pub fn send_event(
    socket: &UdpSocket,
    dest: SocketAddr,
    prefix: &str,
    event: DeviceEvent,
) -> Result<(), OscDispatchError> {
    let (relative_path, args) = match event {
        DeviceEvent::GridKey { x, y, pressed } => {
            ("grid/key", vec![OscType::Int(x), OscType::Int(y), OscType::Int(i32::from(pressed))])
        }
        DeviceEvent::GridPressure { x, y, value } => (
            "grid/pressure",
            vec![OscType::Int(x), OscType::Int(y), OscType::Int(value)],
        ),
        DeviceEvent::EncoderDelta { number, delta } => {
            ("enc/delta", vec![OscType::Int(number), OscType::Int(delta)])
        }
        DeviceEvent::EncoderKey { number, pressed } => (
            "enc/key",
            vec![OscType::Int(number), OscType::Int(i32::from(pressed))],
        ),
        DeviceEvent::Tilt { sensor, x, y, z } => (
            "tilt",
            vec![
                OscType::Int(sensor),
                OscType::Int(x),
                OscType::Int(y),
                OscType::Int(z),
            ],
        ),
    };

    send_message(socket, dest, prefixed(prefix, relative_path), args)
}

/// Sends the zero-argument `/sys/connect` or `/sys/disconnect` notice to the
/// device's own configured application address. Not part of spec §4.2's
/// table (that table is the supervisor-facing mapping); this supplements it
/// from the original implementation's `send_connection_status` (see
/// SPEC_FULL.md).
pub fn send_connection_status(
    socket: &UdpSocket,
    dest: SocketAddr,
    connected: bool,
) -> Result<(), OscDispatchError> {
    let path = if connected {
        "/sys/connect"
    } else {
        "/sys/disconnect"
    };
    send_message(socket, dest, path.to_string(), Vec::new())
}

fn send_message(
    socket: &UdpSocket,
    dest: SocketAddr,
    addr: String,
    args: Vec<OscType>,
) -> Result<(), OscDispatchError> {
    let packet = OscPacket::Message(OscMessage { addr, args });
    let bytes = rosc::encoder::encode(&packet)?;
    socket.send_to(&bytes, dest)?;
    Ok(())
}

/// Dispatches one received OSC packet against the inbound control methods
/// from spec §4.2 step 5: `clear`, `intensity`, `led` (relative to `prefix`).
/// Unrecognized paths/typetags are logged and ignored, matching `liblo`'s
/// behavior of silently not matching a method.
pub fn dispatch_inbound(prefix: &str, packet: &OscPacket, device: &mut dyn MonomeDevice) {
    let OscPacket::Message(msg) = packet else {
        warn!("ignoring OSC bundle on device control port");
        return;
    };

    let Some(relative) = msg.addr.strip_prefix(prefix).and_then(|s| s.strip_prefix('/')) else {
        return;
    };

    let result = match (relative, msg.args.as_slice()) {
        ("clear", []) => device.clear(0),
        ("clear", [OscType::Int(mode)]) => device.clear(*mode),
        ("intensity", []) => device.set_intensity(0xF),
        ("intensity", [OscType::Int(i)]) => {
            u8::try_from(*i).map_or(Ok(()), |intensity| device.set_intensity(intensity))
        }
        ("led", [OscType::Int(x), OscType::Int(y), OscType::Int(on)]) => {
            device.set_led(*x, *y, *on != 0)
        }
        _ => {
            warn!(path = %msg.addr, "no matching OSC method for inbound message");
            return;
        }
    };

    if let Err(e) = result {
        warn!("device control operation failed: {e}");
    }
}

#[derive(thiserror::Error, Debug)]
pub enum OscDispatchError {
    #[error("failed to encode OSC message")]
    Encode(#[from] rosc::OscError),
    #[error("I/O error sending OSC message")]
    Io(#[from] std::io::Error),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn prefixed_joins_paths() {
        assert_eq!(prefixed("/monome", "grid/key"), "/monome/grid/key");
    }

    #[test]
    fn prefixed_strips_trailing_slash_on_prefix() {
        assert_eq!(prefixed("/monome/", "grid/key"), "/monome/grid/key");
    }
}
