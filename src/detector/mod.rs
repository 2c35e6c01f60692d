//! The detector: watches the OS device namespace for serial-over-USB
//! arrivals and reports them to the supervisor (spec §4.1).

use std::io::Write;
use std::os::fd::AsRawFd;

use nix::errno::Errno;
use nix::poll::{poll, PollFd, PollFlags, PollTimeout};
use tracing::{debug, info, warn};
use udev::{Enumerator, MonitorBuilder};

use crate::ipc::IpcMessage;

const SERIAL_SUBSYSTEM: &str = "tty";
const SERIAL_BUS_PROPERTY: &str = "ID_BUS";
const SERIAL_BUS_VALUE: &str = "usb";

/// Runs the detector. Never returns under normal operation: it emits the
/// initial snapshot of already-attached devices, then tails hotplug "add"
/// events forever. Output is framed [`IpcMessage`]s written to `out`.
///
/// # Errors
///
/// Returns an error only for conditions spec §4.1 calls fatal: failure to
/// set up udev enumeration/monitoring, or an "invalid argument" class error
/// from the readiness wait.
pub fn run(out: &mut impl Write) -> anyhow::Result<()> {
    scan_connected_devices(out)?;

    let monitor = MonitorBuilder::new()?
        .match_subsystem(SERIAL_SUBSYSTEM)?
        .listen()?;

    watch_hotplug(monitor, out)
}

/// Emits one [`IpcMessage::DeviceConnection`] per currently attached serial
/// device matching the USB filter.
fn scan_connected_devices(out: &mut impl Write) -> anyhow::Result<()> {
    let mut enumerator = Enumerator::new()?;
    enumerator.match_subsystem(SERIAL_SUBSYSTEM)?;
    enumerator.match_property(SERIAL_BUS_PROPERTY, SERIAL_BUS_VALUE)?;

    for device in enumerator.scan_devices()? {
        if let Some(devnode) = device.devnode() {
            send_connect(out, &devnode.to_string_lossy());
        }
    }

    Ok(())
}

/// Blocks on the monitor's readiness fd and emits a `DeviceConnection` for
/// every "add" event. "remove" events are ignored entirely: per spec §4.1,
/// disconnection is detected by the supervisor via pipe hangup, not here.
fn watch_hotplug(monitor: udev::MonitorSocket, out: &mut impl Write) -> anyhow::Result<()> {
    let fd = monitor.as_raw_fd();
    let mut monitor = monitor;

    loop {
        let mut fds = [PollFd::new(
            // SAFETY: `fd` stays valid for this call; `monitor` outlives it.
            unsafe { std::os::fd::BorrowedFd::borrow_raw(fd) },
            PollFlags::POLLIN,
        )];

        match poll(&mut fds, PollTimeout::NONE) {
            Ok(_) => {}
            Err(Errno::EINTR | Errno::EAGAIN) => continue,
            Err(Errno::EINVAL) => anyhow::bail!("detector: invalid argument in poll()"),
            Err(e) => anyhow::bail!("detector: error in poll(): {e}"),
        }

        for event in &mut monitor {
            if event.event_type() == udev::EventType::Add {
                if let Some(devnode) = event.devnode() {
                    send_connect(out, &devnode.to_string_lossy());
                } else {
                    debug!("ignoring add event with no devnode");
                }
            }
        }
    }
}

fn send_connect(out: &mut impl Write, devnode: &str) {
    info!(devnode, "device connected");
    let msg = IpcMessage::DeviceConnection {
        devnode: devnode.to_string(),
    };
    if let Err(e) = msg.send(out) {
        warn!("failed to write DEVICE_CONNECTION to supervisor: {e}");
    }
}
