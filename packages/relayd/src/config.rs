use std::{
    net::{IpAddr, Ipv4Addr},
    time::Duration,
};

use serde::{Deserialize, Serialize};
use serde_with::{serde_as, DurationMilliSeconds};

/// Relay daemon configuration, shared by every node of a cluster.
#[serde_as]
#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct Relay {
    /// Host on which every node listens.
    #[serde(default = "default_host")]
    pub host: IpAddr,

    /// Port of node 0's peer listener.
    #[serde(default = "default_peer_base_port")]
    pub peer_base_port: u16,

    /// Maximum time to wait for a single connection attempt to a peer.
    /// Waits indefinitely when unset.
    #[serde_as(as = "Option<DurationMilliSeconds<u64>>")]
    pub connect_timeout_ms: Option<Duration>,
}

impl Default for Relay {
    fn default() -> Self {
        Self {
            host: default_host(),
            peer_base_port: default_peer_base_port(),
            connect_timeout_ms: None,
        }
    }
}

fn default_host() -> IpAddr {
    Ipv4Addr::LOCALHOST.into()
}

fn default_peer_base_port() -> u16 {
    relay_proto::DEFAULT_PEER_BASE_PORT
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_file_is_default() {
        let config: Relay = toml::from_str("").unwrap();

        assert_eq!(config.host, IpAddr::from([127, 0, 0, 1]));
        assert_eq!(config.peer_base_port, 20000);
        assert_eq!(config.connect_timeout_ms, None);
    }

    #[test]
    fn full_file() {
        let config: Relay = toml::from_str(
            r#"
            host = "0.0.0.0"
            peer_base_port = 25000
            connect_timeout_ms = 1500
            "#,
        )
        .unwrap();

        assert_eq!(config.host, IpAddr::from([0, 0, 0, 0]));
        assert_eq!(config.peer_base_port, 25000);
        assert_eq!(config.connect_timeout_ms, Some(Duration::from_millis(1500)));
    }
}
