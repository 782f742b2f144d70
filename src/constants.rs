//! Protocol constants and tuning parameters.
//!
//! Wire sizes, ports, timeouts and the lookup bounds used throughout the
//! crate. [`DhtConfig`](crate::config::DhtConfig) takes its defaults from here.

use std::net::Ipv4Addr;
use std::time::Duration;

// ============================================================================
// Wire format
// ============================================================================

/// Length of the packet type header that prefixes every datagram
pub const HEADER_LEN: usize = 2;

/// Length of a node identifier in bytes (160 bits)
pub const ID_LEN: usize = 20;

/// Length of the random nonce carried by ping/pong
pub const NONCE_LEN: usize = 20;

/// Largest datagram we are prepared to receive
pub const MAX_DATAGRAM_SIZE: usize = 65535;

// ============================================================================
// Ports and addresses
// ============================================================================

/// Well-known port shared by every node for local discovery broadcasts
pub const DISCOVERY_PORT: u16 = 1338;

/// Subnet broadcast address for local discovery announces
pub const BROADCAST_ADDR: Ipv4Addr = Ipv4Addr::BROADCAST;

// ============================================================================
// Timeouts
// ============================================================================

/// Default wait for a pong or find-node response
pub const RPC_TIMEOUT: Duration = Duration::from_millis(500);

/// Default wait for a local discovery response
pub const DISCOVERY_TIMEOUT: Duration = Duration::from_millis(500);

/// Pause between empty local discovery attempts during bootstrap
pub const BOOTSTRAP_RETRY_DELAY: Duration = Duration::from_secs(1);

/// Period of the background ping sweep over the address book
pub const PING_INTERVAL: Duration = Duration::from_secs(5);

// ============================================================================
// Lookup
// ============================================================================

/// Maximum simultaneous find-node requests per lookup
pub const ALPHA: usize = 3;

/// Size of the candidate frontier and of every closest-peers answer
pub const K: usize = 20;

/// A lookup stops issuing requests once it has queried more peers than this
pub const MAX_QUERIED: usize = 20;

/// Local discovery attempts made by bootstrap before giving up
pub const BOOTSTRAP_ATTEMPTS: usize = 3;

/// Number of single-bit probe targets walked by bootstrap
pub const ID_BITS: usize = ID_LEN * 8;

// ============================================================================
// Channels
// ============================================================================

/// Capacity of the inbound packet broadcast channel
pub const INBOUND_CHANNEL_CAPACITY: usize = 256;

/// Capacity of the discovered-peer broadcast channel
pub const DISCOVERY_CHANNEL_CAPACITY: usize = 64;
