//! The device server: operates one device, hosts its OSC endpoint, and
//! reports lifecycle to the supervisor over a pipe (spec §4.2).

pub mod config;
pub mod osc_handlers;
pub mod zeroconf;

use std::io::{self, IsTerminal};
use std::net::{SocketAddr, UdpSocket};
use std::os::fd::{AsRawFd, BorrowedFd};
use std::path::Path;

use anyhow::Context;
use nix::errno::Errno;
use nix::poll::{poll, PollFd, PollFlags, PollTimeout};
use tracing::{info, warn};

use crate::device::{DeviceError, MonomeDevice, Rotation};
use crate::ipc::IpcMessage;
use config::DeviceConfig;
use zeroconf::ZeroconfHandle;

/// Runs the device server for one already-opened device. Returns once the
/// device disconnects or the event loop otherwise terminates; per spec
/// §4.2 step 10, the caller should treat any `Ok(())` return the same way
/// regardless of cause — cleanup has already happened inside `run`.
///
/// State machine (device server's view of the parent, spec §4.2): `Booting →
/// PortAnnounced → InfoAnnounced → Ready → Disconnected`. `PortAnnounced` and
/// `InfoAnnounced` commute; this implementation happens to announce info
/// before port, which is equally valid.
///
/// # Errors
///
/// Returns an error for the conditions spec §4.2/§7 call fatal for this
/// process: failure to bind the OSC server or construct the outbound
/// address. A bind/address failure here is observed by the supervisor as a
/// pipe hangup on a not-ready record — a silent drop, per spec §7.
pub fn run(device: &mut dyn MonomeDevice, config_dir: &Path) -> anyhow::Result<()> {
    let serial = device.serial().to_string();
    let friendly = device.friendly().to_string();

    let config = DeviceConfig::load(config_dir, &serial);

    let bind_port = config.server.port.unwrap_or(0);
    let socket = UdpSocket::bind(("0.0.0.0", bind_port))
        .with_context(|| format!("serialoscd [{serial}]: couldn't bind OSC server"))?;
    socket.set_nonblocking(true)?;
    let actual_port = socket
        .local_addr()
        .context("failed to read bound OSC server port")?
        .port();

    let outbound_addr: SocketAddr = format!("{}:{}", config.app.host, config.app.port)
        .parse()
        .with_context(|| {
            format!(
                "serialoscd [{serial}]: couldn't construct outbound address {}:{}",
                config.app.host, config.app.port
            )
        })?;

    let rotation = Rotation::from_degrees(config.dev.rotation).unwrap_or_default();
    device
        .set_rotation(rotation)
        .context("failed to apply configured rotation")?;
    device.clear(0).context("failed to clear LEDs on startup")?;

    let reporting_to_supervisor = !io::stdout().is_terminal();
    if reporting_to_supervisor {
        report_startup(&serial, &friendly, actual_port)?;
    } else {
        info!(serial, port = actual_port, "connected, server running standalone");
    }

    let zeroconf = match ZeroconfHandle::publish(&serial, &friendly, actual_port) {
        Ok(handle) => Some(handle),
        Err(e) => {
            warn!(serial, "failed to publish zeroconf record: {e}");
            None
        }
    };

    if let Err(e) = osc_handlers::send_connection_status(&socket, outbound_addr, true) {
        warn!(serial, "failed to send /sys/connect: {e}");
    }

    event_loop(device, &socket, outbound_addr, &config.app.osc_prefix);

    if let Err(e) = osc_handlers::send_connection_status(&socket, outbound_addr, false) {
        warn!(serial, "failed to send /sys/disconnect: {e}");
    }

    if let Some(handle) = zeroconf {
        handle.unpublish();
    }

    if reporting_to_supervisor {
        IpcMessage::DeviceDisconnection
            .send(&mut io::stdout())
            .context("failed to report DEVICE_DISCONNECTION to supervisor")?;
    } else {
        info!(serial, "disconnected, exiting");
    }

    if let Err(e) = config.save(config_dir, &serial) {
        warn!(serial, "couldn't write config: {e}");
    }

    Ok(())
}

fn report_startup(serial: &str, friendly: &str, port: u16) -> anyhow::Result<()> {
    let mut out = io::stdout();
    IpcMessage::DeviceInfo {
        serial: serial.to_string(),
        friendly: friendly.to_string(),
    }
    .send(&mut out)
    .context("failed to report DEVICE_INFO to supervisor")?;
    IpcMessage::OscPortChange { port }
        .send(&mut out)
        .context("failed to report OSC_PORT_CHANGE to supervisor")?;
    IpcMessage::DeviceReady
        .send(&mut out)
        .context("failed to report DEVICE_READY to supervisor")?;
    Ok(())
}

/// Concurrently dispatches device events and inbound OSC (spec §4.2 step 9).
/// Blocks on readiness of either fd; each side's callback runs to completion
/// before the other is serviced again, matching the single-threaded
/// cooperative model of spec §5.
fn event_loop(device: &mut dyn MonomeDevice, socket: &UdpSocket, outbound: SocketAddr, prefix: &str) {
    let device_fd = device.events_fd();
    let socket_fd = socket.as_raw_fd();

    loop {
        // SAFETY: both fds are owned by `device`/`socket`, which outlive
        // this loop iteration; neither is closed while borrowed here.
        let mut fds = [
            PollFd::new(unsafe { BorrowedFd::borrow_raw(device_fd) }, PollFlags::POLLIN),
            PollFd::new(unsafe { BorrowedFd::borrow_raw(socket_fd) }, PollFlags::POLLIN),
        ];

        match poll(&mut fds, PollTimeout::NONE) {
            Ok(_) => {}
            Err(Errno::EINTR | Errno::EAGAIN) => continue,
            Err(Errno::EINVAL) => {
                warn!("device server: invalid argument in poll(), bailing out");
                return;
            }
            Err(e) => {
                warn!("device server: error in poll(): {e}");
                return;
            }
        }

        let device_revents = fds[0].revents().unwrap_or_else(PollFlags::empty);
        if device_revents.intersects(PollFlags::POLLHUP | PollFlags::POLLERR) {
            return;
        }
        if device_revents.contains(PollFlags::POLLIN) {
            match device.poll_events() {
                Ok(events) => {
                    for event in events {
                        if let Err(e) = osc_handlers::send_event(socket, outbound, prefix, event) {
                            warn!("failed to send outbound OSC message: {e}");
                        }
                    }
                }
                Err(DeviceError::Disconnected) => return,
                Err(e) => {
                    warn!("device read error: {e}");
                    return;
                }
            }
        }

        let socket_revents = fds[1].revents().unwrap_or_else(PollFlags::empty);
        if socket_revents.contains(PollFlags::POLLIN) {
            service_osc_socket(socket, prefix, device);
        }
    }
}

fn service_osc_socket(socket: &UdpSocket, prefix: &str, device: &mut dyn MonomeDevice) {
    let mut buf = [0u8; 4096];
    match socket.recv(&mut buf) {
        Ok(n) => match rosc::decoder::decode_udp(&buf[..n]) {
            Ok((_, packet)) => osc_handlers::dispatch_inbound(prefix, &packet, device),
            Err(e) => warn!("serialoscd: lo server error in OSC dispatch: {e}"),
        },
        Err(e) if e.kind() == io::ErrorKind::WouldBlock => {}
        Err(e) => warn!("error reading OSC control socket: {e}"),
    }
}
