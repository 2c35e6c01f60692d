//! The supervisor's own OSC control interface: `/serialosc/list`,
//! `/serialosc/notify`, and the `/serialosc/add`/`/serialosc/remove`
//! fan-out (spec §4.3, §6).

use std::net::{SocketAddr, UdpSocket};

use rosc::{OscMessage, OscPacket, OscType};
use tracing::warn;

use super::device_table::DeviceTable;
use super::subscriptions::SubscriptionList;

/// Fixed UDP port the supervisor's control OSC server binds, the same for
/// every instance (spec §6).
pub const SUPERVISOR_OSC_PORT: u16 = 12002;

#[derive(Debug, Clone, Copy)]
pub enum ControlKind {
    Connect,
    Disconnect,
}

/// Handles one incoming datagram on the supervisor's control port.
/// Unrecognized paths/typetags are ignored, matching `liblo`'s behavior of
/// silently not matching a method.
pub fn handle_datagram(
    socket: &UdpSocket,
    packet: &OscPacket,
    devices: &DeviceTable,
    subscriptions: &mut SubscriptionList,
) {
    let OscPacket::Message(msg) = packet else {
        warn!("ignoring OSC bundle on supervisor control port");
        return;
    };

    match (msg.addr.as_str(), msg.args.as_slice()) {
        ("/serialosc/list", [OscType::String(host), OscType::Int(port)]) => {
            reply_list(socket, host, *port, devices);
        }
        ("/serialosc/notify", [OscType::String(host), OscType::Int(port)]) => {
            register_notify(host, *port, subscriptions);
        }
        (path, _) => warn!(path, "no matching OSC method on supervisor control port"),
    }
}

fn reply_list(socket: &UdpSocket, host: &str, port: i32, devices: &DeviceTable) {
    let Ok(port) = u16::try_from(port) else {
        warn!(port, "invalid reply port in /serialosc/list");
        return;
    };
    let Ok(dest) = format!("{host}:{port}").parse::<SocketAddr>() else {
        warn!(host, port, "invalid reply address in /serialosc/list");
        return;
    };

    for device in devices.ready_iter() {
        let (Some(serial), Some(friendly)) = (&device.serial, &device.friendly) else {
            continue;
        };
        send(
            socket,
            dest,
            "/serialosc/device",
            vec![
                OscType::String(serial.clone()),
                OscType::String(friendly.clone()),
                OscType::Int(i32::from(device.osc_port)),
            ],
        );
    }
}

fn register_notify(host: &str, port: i32, subscriptions: &mut SubscriptionList) {
    let Ok(port) = u16::try_from(port) else {
        warn!(port, "invalid port in /serialosc/notify");
        return;
    };
    if let Err(e) = subscriptions.subscribe(host.to_string(), port) {
        warn!("/serialosc/notify rejected: {e}");
    }
}

/// Fans `kind` out to every current subscriber as `/serialosc/add` or
/// `/serialosc/remove`. Does not clear the subscription list itself — the
/// caller clears once per multiplexer iteration, after all fan-outs in that
/// iteration have run (spec §4.3).
pub fn fan_out(
    socket: &UdpSocket,
    subscriptions: &SubscriptionList,
    kind: ControlKind,
    serial: &str,
    friendly: &str,
    port: u16,
) {
    let path = match kind {
        ControlKind::Connect => "/serialosc/add",
        ControlKind::Disconnect => "/serialosc/remove",
    };

    for subscriber in subscriptions.iter() {
        let Ok(dest) = format!("{}:{}", subscriber.host, subscriber.port).parse::<SocketAddr>()
        else {
            warn!(host = %subscriber.host, port = subscriber.port, "invalid subscriber address");
            continue;
        };
        send(
            socket,
            dest,
            path,
            vec![
                OscType::String(serial.to_string()),
                OscType::String(friendly.to_string()),
                OscType::Int(i32::from(port)),
            ],
        );
    }
}

fn send(socket: &UdpSocket, dest: SocketAddr, addr: &str, args: Vec<OscType>) {
    let packet = OscPacket::Message(OscMessage {
        addr: addr.to_string(),
        args,
    });
    match rosc::encoder::encode(&packet) {
        Ok(bytes) => {
            if let Err(e) = socket.send_to(&bytes, dest) {
                warn!("failed to send {addr} to {dest}: {e}");
            }
        }
        Err(e) => warn!("failed to encode {addr}: {e}"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::supervisor::device_table::DeviceRecord;

    fn spawn_dummy() -> DeviceRecord {
        let mut child = std::process::Command::new("cat")
            .stdout(std::process::Stdio::piped())
            .spawn()
            .unwrap();
        let stdout = child.stdout.take().unwrap();
        DeviceRecord::new(child, stdout)
    }

    #[test]
    fn not_ready_devices_are_never_in_the_list_reply() {
        let mut devices = DeviceTable::new();
        let mut record = spawn_dummy();
        record.serial = Some("m1000001".to_string());
        record.friendly = Some("monome 128".to_string());
        record.osc_port = 17500;
        // ready is deliberately left false.
        devices.insert(record).unwrap();

        assert_eq!(devices.ready_iter().count(), 0);
    }

    #[test]
    fn subscription_capacity_error_does_not_drop_existing_subscribers() {
        let mut subscriptions = SubscriptionList::new();
        subscriptions
            .subscribe("127.0.0.1".to_string(), 9000)
            .unwrap();
        for i in 0..31 {
            subscriptions
                .subscribe("127.0.0.1".to_string(), 9001 + i)
                .ok();
        }
        let before = subscriptions.iter().count();
        register_notify("127.0.0.1", 9999, &mut subscriptions);
        assert_eq!(subscriptions.iter().count(), before);
    }
}
