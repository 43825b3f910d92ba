//! CLI for this application
//!
use std::net::SocketAddr;
use std::time::Duration;

use crate::config_error;
use crate::error::Result;
use crate::node::PeerId;
use crate::settings::{self, Settings, TimingSettings};

#[derive(Clone, Debug, clap::Parser)]
#[command(name = "peerlock", version, about = "Decentralized mutual exclusion peer")]
pub struct Cli {
    // Name of this peer in the directory
    #[clap(long, env("PEERLOCK_NAME"), help = "Unique name of this peer")]
    pub name: PeerId,

    // Server listen address
    #[clap(
        long,
        default_value = "0.0.0.0",
        env("PEERLOCK_LISTEN_ADDRESS"),
        help = "IP Address to listen on"
    )]
    pub listen_address: String,

    // HTTP API listen port
    #[clap(
        long,
        default_value = settings::DEFAULT_PORT_HTTP,
        env("PEERLOCK_HTTP_LISTEN_PORT"),
        help = "Port to bind the HTTP control API to"
    )]
    pub listen_port_http: u16,

    // TCP listen port for peer messages
    #[clap(
        long,
        default_value = settings::DEFAULT_PORT_PEER,
        env("PEERLOCK_PEER_LISTEN_PORT"),
        help = "Port to bind the peer listener to"
    )]
    pub listen_port_peer: u16,

    #[clap(
        long,
        env("PEERLOCK_ADVERTISE_ADDRESS"),
        help = "Address other peers reach us at (default: 127.0.0.1:<peer port>)"
    )]
    pub advertise_address: Option<SocketAddr>,

    // Cluster configuration information: topology
    #[clap(
        long = "peer",
        env("PEERLOCK_PEERS"),
        value_delimiter = ',',
        value_parser = settings::parse_topology_entry,
        help = "Known peers as name=host:port (repeatable or comma separated)"
    )]
    pub peers: Vec<(PeerId, SocketAddr)>,

    #[clap(
        long,
        default_value = settings::DEFAULT_HEARTBEAT_INTERVAL_MS,
        env("PEERLOCK_HEARTBEAT_INTERVAL_MS"),
        help = "Interval between heartbeats"
    )]
    pub heartbeat_interval_ms: u64,

    #[clap(
        long,
        default_value = settings::DEFAULT_CLEANUP_INTERVAL_MS,
        env("PEERLOCK_CLEANUP_INTERVAL_MS"),
        help = "Interval between stale-peer sweeps"
    )]
    pub cleanup_interval_ms: u64,

    #[clap(
        long,
        default_value = settings::DEFAULT_EVICTION_TIMEOUT_MS,
        env("PEERLOCK_EVICTION_TIMEOUT_MS"),
        help = "Heartbeat age after which a peer is evicted"
    )]
    pub eviction_timeout_ms: u64,

    #[clap(
        long,
        default_value = settings::DEFAULT_RPC_TIMEOUT_MS,
        env("PEERLOCK_RPC_TIMEOUT_MS"),
        help = "Timeout for every remote call"
    )]
    pub rpc_timeout_ms: u64,

    #[clap(
        long,
        default_value = settings::DEFAULT_HOLD_TICKS,
        env("PEERLOCK_MAX_HOLD_TICKS"),
        help = "Maximum ticks the resource is held per session"
    )]
    pub max_hold_ticks: u32,

    #[clap(
        long,
        default_value = settings::DEFAULT_TICK_MS,
        env("PEERLOCK_TICK_MS"),
        help = "Length of one resource session tick"
    )]
    pub tick_ms: u64,

    #[clap(
        long,
        default_value = settings::DEFAULT_RETRY_TIMEOUT_MS,
        env("PEERLOCK_RETRY_TIMEOUT_MS"),
        help = "Longest wait between grant rounds"
    )]
    pub retry_timeout_ms: u64,
}

impl Cli {
    pub fn into_settings(self) -> Result<Settings> {
        let advertise_address = match self.advertise_address {
            Some(addr) => addr,
            None => format!("127.0.0.1:{}", self.listen_port_peer)
                .parse()
                .map_err(|e| config_error!("Invalid advertise address: {}", e))?,
        };
        let settings = Settings {
            peer_id: self.name,
            listen_address: self.listen_address,
            listen_port_http: self.listen_port_http,
            listen_port_peer: self.listen_port_peer,
            advertise_address,
            topology: self.peers.into_iter().collect(),
            timing: TimingSettings {
                heartbeat_interval: Duration::from_millis(self.heartbeat_interval_ms),
                cleanup_interval: Duration::from_millis(self.cleanup_interval_ms),
                eviction_timeout: Duration::from_millis(self.eviction_timeout_ms),
                rpc_timeout: Duration::from_millis(self.rpc_timeout_ms),
                max_hold_ticks: self.max_hold_ticks,
                tick: Duration::from_millis(self.tick_ms),
                retry_timeout: Duration::from_millis(self.retry_timeout_ms),
            },
        };
        settings.validate()?;
        Ok(settings)
    }
}

#[cfg(test)]
mod tests {
    use clap::Parser;

    use super::*;

    #[test]
    fn test_defaults_match_protocol_constants() {
        let cli = Cli::try_parse_from(["peerlock", "--name", "peer1"]).unwrap();
        let settings = cli.into_settings().unwrap();

        assert_eq!(settings.peer_id, PeerId::from("peer1"));
        assert_eq!(settings.timing, TimingSettings::default());
        assert_eq!(
            settings.advertise_address,
            "127.0.0.1:8421".parse::<SocketAddr>().unwrap()
        );
        assert!(settings.topology.is_empty());
    }

    #[test]
    fn test_peers_parse() {
        let cli = Cli::try_parse_from([
            "peerlock",
            "--name",
            "peer1",
            "--peer",
            "peer2=127.0.0.1:9002",
            "--peer",
            "peer3=127.0.0.1:9003,peer4=127.0.0.1:9004",
        ])
        .unwrap();
        let settings = cli.into_settings().unwrap();
        assert_eq!(settings.topology.len(), 3);
        assert!(settings.topology.contains_key(&PeerId::from("peer4")));
    }

    #[test]
    fn test_invalid_timing_rejected() {
        let cli = Cli::try_parse_from([
            "peerlock",
            "--name",
            "peer1",
            "--eviction-timeout-ms",
            "1500",
        ])
        .unwrap();
        assert!(cli.into_settings().is_err());
    }
}
