//! Courier synchronization
//!
//! Exchanges cargo with a courier on the local network in two phases:
//! collect (ingest inbound cargoes) then deliver (ship queued parcels and
//! collection acks). The driver runs as a child process and reports its
//! stage over the parent's IPC stream; the manager on the parent side
//! surfaces a status stream to the UI.
//!
//! - `cogrpc`: courier transport seam and WebSocket binding
//! - `driver`: the two-phase sync driver (subprocess side)
//! - `notifier`: stage events over the parent IPC stream
//! - `manager`: parent side - subprocess lifecycle, status stream, probe

pub mod cogrpc;
pub mod driver;
pub mod manager;
pub mod notifier;

pub use cogrpc::{CargoDelivery, CourierClient, CourierClientError, CourierClientFactory};
pub use driver::{
    CourierSyncDriver, EXIT_FAILED_SYNC, EXIT_OK, EXIT_UNREGISTERED_GATEWAY,
};
pub use manager::{
    is_courier_reachable, CourierSyncError, CourierSyncManager, CourierSyncStatus,
    SubprocessLauncher, SyncProcessHandle, SyncProcessLauncher,
};
pub use notifier::{CourierSyncStage, StageNotifier};

use std::net::Ipv4Addr;

use async_trait::async_trait;

/// Default-gateway discovery failures
#[derive(Debug)]
pub struct GatewayDiscoveryError(pub String);

impl std::fmt::Display for GatewayDiscoveryError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "default gateway discovery failed: {}", self.0)
    }
}

impl std::error::Error for GatewayDiscoveryError {}

/// Finds the LAN's default gateway, which is where the courier listens.
#[async_trait]
pub trait DefaultGatewayResolver: Send + Sync {
    /// The default gateway's IPv4 address.
    async fn resolve(&self) -> Result<Ipv4Addr, GatewayDiscoveryError>;
}

/// Resolver reading the kernel routing table (`/proc/net/route`).
#[derive(Default)]
pub struct ProcNetRouteResolver;

#[async_trait]
impl DefaultGatewayResolver for ProcNetRouteResolver {
    async fn resolve(&self) -> Result<Ipv4Addr, GatewayDiscoveryError> {
        let table = tokio::fs::read_to_string("/proc/net/route")
            .await
            .map_err(|e| GatewayDiscoveryError(e.to_string()))?;
        parse_default_gateway(&table)
            .ok_or_else(|| GatewayDiscoveryError("no default route".to_string()))
    }
}

/// Extract the default route's gateway from `/proc/net/route` contents.
/// Fields are little-endian hex; the default route has destination 0.
fn parse_default_gateway(table: &str) -> Option<Ipv4Addr> {
    for line in table.lines().skip(1) {
        let fields: Vec<&str> = line.split_whitespace().collect();
        if fields.len() < 3 || fields[1] != "00000000" {
            continue;
        }
        let gateway = u32::from_str_radix(fields[2], 16).ok()?;
        if gateway == 0 {
            continue;
        }
        return Some(Ipv4Addr::from(gateway.to_le_bytes()));
    }
    None
}
