//! Zeroconf/DNS-SD publication for a device server's OSC port.
//!
//! Spec §1 lists "the zeroconf/DNS-SD publisher" as an out-of-scope external
//! collaborator; `mdns-sd` is that publisher. This module only wraps it to
//! the shape spec §4.2 step 8 / §6 need: one record per device server,
//! service name `"<friendly> (<serial>)"`, unpublished on clean shutdown.

use mdns_sd::{ServiceDaemon, ServiceInfo};
use tracing::{debug, warn};

const SERVICE_TYPE: &str = "_monome-osc._udp.local.";

pub struct ZeroconfHandle {
    daemon: ServiceDaemon,
    fullname: String,
}

impl std::fmt::Debug for ZeroconfHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ZeroconfHandle")
            .field("fullname", &self.fullname)
            .finish_non_exhaustive()
    }
}

impl ZeroconfHandle {
    /// Publishes a service record named `"<friendly> (<serial>)"` advertising
    /// `port`.
    pub fn publish(serial: &str, friendly: &str, port: u16) -> Result<Self, ZeroconfError> {
        let daemon = ServiceDaemon::new()?;
        let instance_name = format!("{friendly} ({serial})");
        let host_name = format!("{serial}.local.");

        let service_info = ServiceInfo::new(
            SERVICE_TYPE,
            &instance_name,
            &host_name,
            "",
            port,
            None,
        )?
        .enable_addr_auto();

        let fullname = service_info.get_fullname().to_string();
        daemon.register(service_info)?;
        debug!(fullname, "published zeroconf record");

        Ok(Self { daemon, fullname })
    }

    /// Unpublishes the record. Called on clean shutdown (spec §4.2 step 10).
    pub fn unpublish(self) {
        if let Err(e) = self.daemon.unregister(&self.fullname) {
            warn!("failed to unregister zeroconf record: {e:?}");
        }
    }
}

#[derive(thiserror::Error, Debug)]
#[error("zeroconf error")]
pub struct ZeroconfError(#[from] mdns_sd::Error);
