//! The supervisor: owns the device pool, answers enumeration/subscription
//! queries, and fans out connect/disconnect notifications (spec §4.3).

pub mod device_table;
pub mod osc_control;
pub mod subscriptions;

use std::net::UdpSocket;
use std::os::fd::{AsRawFd, BorrowedFd, RawFd};
use std::path::{Path, PathBuf};
use std::process::{Child, ChildStdout, Command, Stdio};

use anyhow::Context;
use nix::errno::Errno;
use nix::poll::{poll, PollFd, PollFlags, PollTimeout};
use nix::sys::signal::{self, SaFlags, SigAction, SigHandler, SigSet, Signal};
use tracing::{debug, info, warn};

use crate::ipc::IpcMessage;
use device_table::DeviceTable;
use osc_control::{ControlKind, SUPERVISOR_OSC_PORT};
use subscriptions::SubscriptionList;

/// Fixed slot indices in the poll array (spec §4.3).
const SLOT_CONTROL: usize = 0;
const SLOT_DETECTOR: usize = 1;
const FIRST_DEVICE_SLOT: usize = 2;

/// Runs the supervisor. Creates the config directory, forks the detector,
/// and enters the multiplexing loop; returns only when that loop ends
/// (detector pipe hangup, or a fatal error from the readiness wait).
///
/// # Errors
///
/// Propagates setup failures (binding the control socket, spawning the
/// detector) and the one condition spec §7 calls fatal for the supervisor
/// as a whole: the detector pipe disappearing.
pub fn run(config_dir: &Path) -> anyhow::Result<()> {
    std::fs::create_dir_all(config_dir).context("failed to create config directory")?;

    disable_subprocess_waiting().context("failed to configure automatic child reaping")?;

    let current_exe = std::env::current_exe().context("failed to resolve own executable path")?;

    let control_socket = UdpSocket::bind(("0.0.0.0", SUPERVISOR_OSC_PORT))
        .context("failed to bind supervisor OSC control socket")?;
    control_socket
        .set_nonblocking(true)
        .context("failed to set supervisor control socket non-blocking")?;

    let (_detector_child, detector_pipe) =
        spawn_detector(&current_exe, config_dir).context("failed to spawn detector process")?;

    multiplex(&current_exe, config_dir, &control_socket, detector_pipe)
}

/// Ignores `SIGCHLD` so exited children are reaped by the kernel without an
/// explicit `wait()` (spec §4.3 "Zombies").
fn disable_subprocess_waiting() -> Result<(), Errno> {
    let action = SigAction::new(SigHandler::SigIgn, SaFlags::SA_NOCLDWAIT, SigSet::empty());
    // SAFETY: installs a standard ignore-and-reap disposition for SIGCHLD;
    // no signal-unsafe state is touched from a handler since there is none.
    unsafe { signal::sigaction(Signal::SIGCHLD, &action) }?;
    Ok(())
}

fn spawn_detector(current_exe: &Path, config_dir: &Path) -> std::io::Result<(Child, ChildStdout)> {
    let mut child = Command::new(current_exe)
        .args(["--mode", "detector", "--config-dir"])
        .arg(config_dir)
        .stdout(Stdio::piped())
        .spawn()?;
    let stdout = child.stdout.take().expect("spawned with piped stdout");
    Ok((child, stdout))
}

fn spawn_device_server(
    current_exe: &Path,
    config_dir: &Path,
    devnode: &str,
) -> std::io::Result<(Child, ChildStdout)> {
    let mut child = Command::new(current_exe)
        .args(["--mode", "device", "--config-dir"])
        .arg(config_dir)
        .arg(devnode)
        .stdout(Stdio::piped())
        .spawn()?;
    let stdout = child.stdout.take().expect("spawned with piped stdout");
    Ok((child, stdout))
}

/// The blocking multiplexer loop (spec §4.3). Maintains a readiness set of
/// the control socket, the detector pipe, and one slot per live device
/// server, rebuilt fresh every iteration so its length always tracks
/// `2 + device count` (spec §8 invariant 1).
fn multiplex(
    current_exe: &Path,
    config_dir: &Path,
    control_socket: &UdpSocket,
    mut detector_pipe: ChildStdout,
) -> anyhow::Result<()> {
    let mut devices = DeviceTable::new();
    let mut subscriptions = SubscriptionList::new();

    loop {
        let control_fd = control_socket.as_raw_fd();
        let detector_fd = detector_pipe.as_raw_fd();

        // SAFETY: each fd is owned by an object (`control_socket`,
        // `detector_pipe`, or a `DeviceRecord` in `devices`) that outlives
        // this poll call; none are closed while borrowed here.
        let mut fds: Vec<PollFd> = std::iter::once(PollFd::new(
            unsafe { BorrowedFd::borrow_raw(control_fd) },
            PollFlags::POLLIN,
        ))
        .chain(std::iter::once(PollFd::new(
            unsafe { BorrowedFd::borrow_raw(detector_fd) },
            PollFlags::POLLIN,
        )))
        .chain((0..devices.len()).map(|i| {
            let fd: RawFd = devices.get(i).expect("index in range").as_raw_fd();
            PollFd::new(unsafe { BorrowedFd::borrow_raw(fd) }, PollFlags::POLLIN)
        }))
        .collect();

        match poll(&mut fds, PollTimeout::NONE) {
            Ok(_) => {}
            Err(Errno::EINTR | Errno::EAGAIN) => continue,
            Err(Errno::EINVAL) => anyhow::bail!("supervisor: invalid argument in poll()"),
            Err(e) => anyhow::bail!("supervisor: error in poll(): {e}"),
        }

        let mut notified = false;

        if revents_of(&fds, SLOT_CONTROL).contains(PollFlags::POLLIN) {
            service_control_socket(control_socket, &devices, &mut subscriptions);
        }

        let detector_revents = revents_of(&fds, SLOT_DETECTOR);
        if detector_revents.intersects(PollFlags::POLLHUP | PollFlags::POLLERR) {
            anyhow::bail!("monitor process disappeared, bailing out");
        }
        if detector_revents.contains(PollFlags::POLLIN) {
            handle_detector_message(current_exe, config_dir, &mut detector_pipe, &mut devices);
        }

        let mut slot = FIRST_DEVICE_SLOT;
        while slot < fds.len() {
            let device_index = slot - FIRST_DEVICE_SLOT;
            let revents = revents_of(&fds, slot);

            if revents.intersects(PollFlags::POLLHUP | PollFlags::POLLERR) {
                if disconnect_device(control_socket, &subscriptions, &mut devices, device_index) {
                    notified = true;
                }
                fds.remove(slot);
                continue;
            }

            if revents.contains(PollFlags::POLLIN) {
                let became_disconnected = handle_device_message(
                    control_socket,
                    &subscriptions,
                    &mut devices,
                    device_index,
                    &mut notified,
                );
                if became_disconnected {
                    fds.remove(slot);
                    continue;
                }
            }

            slot += 1;
        }

        if notified {
            subscriptions.clear();
        }
    }
}

fn revents_of(fds: &[PollFd], slot: usize) -> PollFlags {
    fds[slot].revents().unwrap_or_else(PollFlags::empty)
}

fn service_control_socket(
    socket: &UdpSocket,
    devices: &DeviceTable,
    subscriptions: &mut SubscriptionList,
) {
    let mut buf = [0u8; 4096];
    match socket.recv(&mut buf) {
        Ok(n) => match rosc::decoder::decode_udp(&buf[..n]) {
            Ok((_, packet)) => {
                osc_control::handle_datagram(socket, &packet, devices, subscriptions);
            }
            Err(e) => warn!("malformed OSC packet on supervisor control port: {e}"),
        },
        Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => {}
        Err(e) => warn!("error reading supervisor control socket: {e}"),
    }
}

/// Reads one `DEVICE_CONNECTION` off the detector pipe and spawns a device
/// server for it, applying the capacity limit before spawning anything
/// (spec §4.3, §7). A malformed/short read is logged and skipped, never
/// fatal on its own.
fn handle_detector_message(
    current_exe: &Path,
    config_dir: &Path,
    detector_pipe: &mut ChildStdout,
    devices: &mut DeviceTable,
) {
    let message = match IpcMessage::decode(detector_pipe) {
        Ok(message) => message,
        Err(e) => {
            warn!("malformed IPC message from detector: {e}");
            return;
        }
    };

    let IpcMessage::DeviceConnection { devnode } = message else {
        warn!("unexpected IPC message from detector: {message:?}");
        return;
    };

    if devices.is_at_capacity() {
        warn!(devnode, "too many devices, dropping connection");
        return;
    }

    match spawn_device_server(current_exe, config_dir, &devnode) {
        Ok((child, pipe)) => {
            let record = device_table::DeviceRecord::new(child, pipe);
            if devices.insert(record).is_err() {
                warn!(devnode, "device table filled up during spawn, dropping");
            }
        }
        Err(e) => warn!(devnode, "failed to spawn device server: {e}"),
    }
}

/// Reads one IPC message from the device at `index` and applies it to the
/// device table, fanning out a connect notification on `DEVICE_READY`. A
/// malformed/short read is logged and skipped. Returns `true` if the
/// device was torn down as a result (on `DEVICE_DISCONNECTION`), so the
/// caller knows to compact its poll-fd array too.
fn handle_device_message(
    control_socket: &UdpSocket,
    subscriptions: &SubscriptionList,
    devices: &mut DeviceTable,
    index: usize,
    notified: &mut bool,
) -> bool {
    let message = {
        let record = devices.get_mut(index).expect("index in range");
        IpcMessage::decode(record)
    };

    let message = match message {
        Ok(message) => message,
        Err(e) => {
            warn!("malformed IPC message from device server: {e}");
            return false;
        }
    };

    match message {
        IpcMessage::OscPortChange { port } => {
            devices.get_mut(index).expect("index in range").osc_port = port;
            false
        }
        IpcMessage::DeviceInfo { serial, friendly } => {
            let record = devices.get_mut(index).expect("index in range");
            record.serial = Some(serial);
            record.friendly = Some(friendly);
            false
        }
        IpcMessage::DeviceReady => {
            let record = devices.get_mut(index).expect("index in range");
            record.ready = true;
            let (serial, friendly, port) = identity_or_unknown(record);
            info!(serial, port, "connected, server running");
            osc_control::fan_out(
                control_socket,
                subscriptions,
                ControlKind::Connect,
                &serial,
                &friendly,
                port,
            );
            *notified = true;
            false
        }
        IpcMessage::DeviceDisconnection => {
            let record = devices.get_mut(index).expect("index in range");
            if record.ready {
                let (serial, friendly, port) = identity_or_unknown(record);
                info!(serial, "disconnected, exiting");
                osc_control::fan_out(
                    control_socket,
                    subscriptions,
                    ControlKind::Disconnect,
                    &serial,
                    &friendly,
                    port,
                );
                *notified = true;
            }
            devices.remove(index);
            true
        }
        IpcMessage::DeviceConnection { devnode } => {
            warn!(devnode, "unexpected DEVICE_CONNECTION on a device pipe");
            false
        }
    }
}

/// Handles a `POLLHUP`/`POLLERR` on a device pipe: the server has exited
/// without sending `DEVICE_DISCONNECTION` first (e.g. a crash). If the
/// record was ready, this is still reported as a disconnection, using its
/// cached identity; otherwise it is a silent failure (spec §4.3, §8
/// invariant 2). Returns whether a notification was fanned out.
fn disconnect_device(
    control_socket: &UdpSocket,
    subscriptions: &SubscriptionList,
    devices: &mut DeviceTable,
    index: usize,
) -> bool {
    let record = devices.get(index).expect("index in range");
    let notified = if record.ready {
        let (serial, friendly, port) = identity_or_unknown(record);
        info!(serial, "disconnected, exiting");
        osc_control::fan_out(
            control_socket,
            subscriptions,
            ControlKind::Disconnect,
            &serial,
            &friendly,
            port,
        );
        true
    } else {
        debug!("not-ready device vanished silently");
        false
    };

    devices.remove(index);
    notified
}

fn identity_or_unknown(record: &device_table::DeviceRecord) -> (String, String, u16) {
    (
        record.serial.clone().unwrap_or_default(),
        record.friendly.clone().unwrap_or_default(),
        record.osc_port,
    )
}

#[must_use]
pub fn default_config_dir() -> PathBuf {
    dirs_config_dir().join("serialosc")
}

fn dirs_config_dir() -> PathBuf {
    std::env::var_os("XDG_CONFIG_HOME")
        .map(PathBuf::from)
        .or_else(|| std::env::var_os("HOME").map(|home| PathBuf::from(home).join(".config")))
        .unwrap_or_else(|| PathBuf::from("."))
}
