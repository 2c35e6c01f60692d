//! The supervisor's authoritative device table (spec §3 "Device record",
//! §8 invariant 1).

use std::io::Read;
use std::os::fd::{AsRawFd, RawFd};
use std::process::{Child, ChildStdout};

/// Upper bound on simultaneously tracked devices (spec §4.3).
pub const MAX_DEVICES: usize = 32;

/// One live device server's state, as seen by the supervisor.
///
/// Created not-ready the moment a server child is forked, before any
/// identity is known (spec §3). `osc_port`, `serial`, `friendly` are filled
/// in by subsequent IPC messages; `ready` becomes `true` only once all three
/// have arrived.
#[derive(Debug)]
pub struct DeviceRecord {
    pub ready: bool,
    pub osc_port: u16,
    pub serial: Option<String>,
    pub friendly: Option<String>,
    pipe: ChildStdout,
    /// Kept alive so the OS can reap the process; never waited on explicitly
    /// (spec §4.3 "Zombies": `SIGCHLD` is ignored so exited children are
    /// auto-reaped).
    _child: Child,
}

impl DeviceRecord {
    #[must_use]
    pub fn new(child: Child, pipe: ChildStdout) -> Self {
        Self {
            ready: false,
            osc_port: 0,
            serial: None,
            friendly: None,
            pipe,
            _child: child,
        }
    }

    /// True once `serial`, `friendly`, and `osc_port` have all arrived
    /// (`osc_port` alone can't distinguish "unset" from "port 0", so this is
    /// tracked by `ready` directly rather than derived).
    #[must_use]
    pub fn is_fully_identified(&self) -> bool {
        self.serial.is_some() && self.friendly.is_some()
    }
}

impl AsRawFd for DeviceRecord {
    fn as_raw_fd(&self) -> RawFd {
        self.pipe.as_raw_fd()
    }
}

impl Read for DeviceRecord {
    fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        self.pipe.read(buf)
    }
}

/// The supervisor's device table: zero or one record per live device-server
/// child, capacity-bounded per spec §4.3.
#[derive(Debug, Default)]
pub struct DeviceTable {
    records: Vec<DeviceRecord>,
}

impl DeviceTable {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.records.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    #[must_use]
    pub fn is_at_capacity(&self) -> bool {
        self.records.len() >= MAX_DEVICES
    }

    /// Adds a newly forked, not-ready record. Returns `Err(record)` if the
    /// table is already at capacity, handing the record back so the caller
    /// can drop it (and, with it, the freshly spawned child) without leaking.
    pub fn insert(&mut self, record: DeviceRecord) -> Result<(), DeviceRecord> {
        if self.is_at_capacity() {
            return Err(record);
        }
        self.records.push(record);
        Ok(())
    }

    #[must_use]
    pub fn get(&self, index: usize) -> Option<&DeviceRecord> {
        self.records.get(index)
    }

    #[must_use]
    pub fn get_mut(&mut self, index: usize) -> Option<&mut DeviceRecord> {
        self.records.get_mut(index)
    }

    /// Removes the record at `index`, shifting all later records down by
    /// one. This is the in-place-compaction behavior spec §9 describes —
    /// `Vec::remove` performs exactly that shift, so the supervisor's
    /// parallel poll-fd array is kept in lockstep by removing the same
    /// index from it in the same step (see `supervisor::run`).
    pub fn remove(&mut self, index: usize) -> DeviceRecord {
        self.records.remove(index)
    }

    #[must_use]
    pub fn ready_iter(&self) -> impl Iterator<Item = &DeviceRecord> {
        self.records.iter().filter(|r| r.ready)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn spawn_dummy() -> (Child, ChildStdout) {
        let mut child = std::process::Command::new("cat")
            .stdout(std::process::Stdio::piped())
            .spawn()
            .expect("spawning `cat` should succeed in test environment");
        let stdout = child.stdout.take().expect("piped stdout");
        (child, stdout)
    }

    #[test]
    fn new_table_is_empty() {
        let table = DeviceTable::new();
        assert!(table.is_empty());
        assert_eq!(table.len(), 0);
    }

    #[test]
    fn insert_respects_capacity() {
        let mut table = DeviceTable::new();
        for _ in 0..MAX_DEVICES {
            let (child, stdout) = spawn_dummy();
            table.insert(DeviceRecord::new(child, stdout)).unwrap();
        }
        assert!(table.is_at_capacity());

        let (child, stdout) = spawn_dummy();
        let rejected = table.insert(DeviceRecord::new(child, stdout));
        assert!(rejected.is_err());
        assert_eq!(table.len(), MAX_DEVICES);
    }

    #[test]
    fn remove_compacts_down() {
        let mut table = DeviceTable::new();
        let mut pids = Vec::new();
        for _ in 0..3 {
            let (child, stdout) = spawn_dummy();
            pids.push(child.id());
            table.insert(DeviceRecord::new(child, stdout)).unwrap();
        }

        table.remove(0);
        assert_eq!(table.len(), 2);
        assert!(!table.is_empty());
    }

    #[test]
    fn new_record_is_not_ready() {
        let (child, stdout) = spawn_dummy();
        let record = DeviceRecord::new(child, stdout);
        assert!(!record.ready);
        assert!(!record.is_fully_identified());
    }
}
