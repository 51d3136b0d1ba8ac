//! Protocol constants shared across the gateway.

/// Public gateway used when the node has never been registered explicitly.
pub const DEFAULT_PUBLIC_GATEWAY: &str = "frankfurt.relaycorp.cloud";

/// TCP port couriers listen on.
pub const COURIER_PORT: u16 = 21473;

/// Pause between the collection and delivery phases of a courier sync.
pub const DELAY_BETWEEN_COLLECTION_AND_DELIVERY_SECONDS: u64 = 5;

/// Tolerated clock drift when stamping outbound message validity windows.
pub const CLOCK_DRIFT_TOLERANCE_MINUTES: i64 = 90;

/// TTL of cargoes and cargo delivery authorizations we issue.
pub const OUTBOUND_CARGO_TTL_DAYS: i64 = 14;

/// Total budget for the courier reachability probe.
pub const COURIER_CHECK_TIMEOUT_MS: u64 = 3000;

/// Retry interval within the courier reachability probe.
pub const COURIER_CHECK_RETRY_MS: u64 = 500;

/// Request header selecting the parcel collection streaming mode.
pub const STREAMING_MODE_HEADER: &str = "x-relaynet-streaming-mode";

/// The only header value that selects close-on-drain. Anything else
/// (including absence) keeps the session alive.
pub const STREAMING_MODE_CLOSE_ON_COMPLETION: &str = "close-upon-completion";

/// WebSocket close code for a successfully drained session.
pub const CLOSE_CODE_NORMAL: u16 = 1000;

/// WebSocket close code for malformed, unauthorized or unknown-id input.
pub const CLOSE_CODE_CANNOT_ACCEPT: u16 = 1008;

/// Config key holding the registered public gateway address.
pub const CONFIG_PUBLIC_GATEWAY_ADDRESS: &str = "public_gateway_address";

/// Config key holding the serial number of the current node key.
pub const CONFIG_NODE_KEY_SERIAL: &str = "node_key_serial_number";

/// Config key holding the serial number of the CCA issuer key.
pub const CONFIG_CCA_ISSUER_KEY_SERIAL: &str = "cca_issuer_key_serial_number";
