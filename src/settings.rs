//! peerlock application settings
use std::collections::HashMap;
use std::net::SocketAddr;
use std::time::Duration;

use crate::config_error;
use crate::error::Result;
use crate::node::PeerId;

pub const APP_NAME: &str = env!("CARGO_PKG_NAME");
pub const APP_VERSION: &str = env!("CARGO_PKG_VERSION");

pub const STANDARD_PORT_HTTP: u16 = 8420;
pub const DEFAULT_PORT_HTTP: &str = "8420";
pub const STANDARD_PORT_PEER: u16 = 8421;
pub const DEFAULT_PORT_PEER: &str = "8421";

pub const DEFAULT_HEARTBEAT_INTERVAL_MS: &str = "1000";
pub const DEFAULT_CLEANUP_INTERVAL_MS: &str = "3000";
pub const DEFAULT_EVICTION_TIMEOUT_MS: &str = "5000";
pub const DEFAULT_RPC_TIMEOUT_MS: &str = "10000";
pub const DEFAULT_HOLD_TICKS: &str = "30";
pub const DEFAULT_TICK_MS: &str = "1000";
pub const DEFAULT_RETRY_TIMEOUT_MS: &str = "150000";

/// Protocol timing knobs
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TimingSettings {
    /// How often heartbeats go out
    pub heartbeat_interval: Duration,
    /// How often stale peers are evicted
    pub cleanup_interval: Duration,
    /// Heartbeat age after which a peer is evicted
    pub eviction_timeout: Duration,
    /// Bound on every remote call
    pub rpc_timeout: Duration,
    /// Maximum number of ticks a session may hold the resource
    pub max_hold_ticks: u32,
    /// Length of one session tick
    pub tick: Duration,
    /// Longest wait between grant rounds when nobody wakes us
    pub retry_timeout: Duration,
}

impl Default for TimingSettings {
    fn default() -> Self {
        Self {
            heartbeat_interval: Duration::from_millis(1000),
            cleanup_interval: Duration::from_millis(3000),
            eviction_timeout: Duration::from_millis(5000),
            rpc_timeout: Duration::from_millis(10_000),
            max_hold_ticks: 30,
            tick: Duration::from_millis(1000),
            retry_timeout: Duration::from_millis(150_000),
        }
    }
}

impl TimingSettings {
    /// Upper bound of a single session
    pub fn max_hold_duration(&self) -> Duration {
        self.tick * self.max_hold_ticks
    }

    pub fn validate(&self) -> Result<()> {
        if self.heartbeat_interval.is_zero() || self.cleanup_interval.is_zero() {
            return Err(config_error!("heartbeat and cleanup intervals must be non-zero"));
        }
        if self.tick.is_zero() || self.rpc_timeout.is_zero() || self.retry_timeout.is_zero() {
            return Err(config_error!("tick, rpc and retry timeouts must be non-zero"));
        }
        if self.eviction_timeout <= self.heartbeat_interval * 2 {
            return Err(config_error!(
                "eviction timeout ({}ms) must exceed two heartbeat intervals ({}ms)",
                self.eviction_timeout.as_millis(),
                self.heartbeat_interval.as_millis()
            ));
        }
        Ok(())
    }
}

#[derive(Clone, Debug)]
pub struct Settings {
    // This peer's name in the directory
    pub peer_id: PeerId,

    // Listen address for both the control API and the peer listener
    pub listen_address: String,

    // HTTP control API listen port
    pub listen_port_http: u16,

    // TCP listen port for peer control messages
    pub listen_port_peer: u16,

    // Address other peers use to reach us (sent in heartbeats)
    pub advertise_address: SocketAddr,

    // Statically known peers: name -> peer listener address
    pub topology: HashMap<PeerId, SocketAddr>,

    pub timing: TimingSettings,
}

impl Settings {
    pub fn peer_listen_addr(&self) -> Result<SocketAddr> {
        format!("{}:{}", self.listen_address, self.listen_port_peer)
            .parse()
            .map_err(|e| config_error!("Invalid peer listen address: {}", e))
    }

    pub fn http_listen_addr(&self) -> Result<SocketAddr> {
        format!("{}:{}", self.listen_address, self.listen_port_http)
            .parse()
            .map_err(|e| config_error!("Invalid http listen address: {}", e))
    }

    /// The whole group may share one topology list, so an entry naming this
    /// peer is allowed and simply skipped when targeting.
    pub fn validate(&self) -> Result<()> {
        self.timing.validate()
    }
}

/// Parse a `name=host:port` topology entry
pub fn parse_topology_entry(entry: &str) -> std::result::Result<(PeerId, SocketAddr), String> {
    let (name, addr) = entry
        .split_once('=')
        .ok_or_else(|| format!("expected name=host:port, got '{}'", entry))?;
    let peer_id: PeerId = name.parse()?;
    let addr: SocketAddr = addr
        .trim()
        .parse()
        .map_err(|e| format!("invalid address in '{}': {}", entry, e))?;
    Ok((peer_id, addr))
}
