//! Node configuration.

use std::path::PathBuf;

use cobre_core::constants::BOOTSTRAP_NODE;

/// Runtime configuration for one node.
///
/// The node id doubles as the TCP port and the file-name suffix for the
/// chain database and wallet file, per the `NODE_ID` convention.
#[derive(Clone, Debug)]
pub struct NodeConfig {
    pub node_id: String,
    /// Chain database directory.
    pub data_dir: PathBuf,
    /// Address mined coinbases pay to; mining is enabled when set.
    pub mining_addr: Option<String>,
    /// Seed peer contacted on startup by non-bootstrap nodes.
    pub bootstrap_addr: String,
}

impl NodeConfig {
    /// Default configuration for a node id: `blockchain_<id>` data dir and
    /// the well-known bootstrap peer.
    pub fn new(node_id: &str) -> Self {
        Self {
            node_id: node_id.to_string(),
            data_dir: PathBuf::from(format!("blockchain_{node_id}")),
            mining_addr: None,
            bootstrap_addr: BOOTSTRAP_NODE.to_string(),
        }
    }

    /// The endpoint this node listens on.
    pub fn node_address(&self) -> String {
        format!("localhost:{}", self.node_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn derives_paths_and_address_from_node_id() {
        let config = NodeConfig::new("3000");
        assert_eq!(config.node_address(), "localhost:3000");
        assert_eq!(config.data_dir, PathBuf::from("blockchain_3000"));
        assert_eq!(config.bootstrap_addr, BOOTSTRAP_NODE);
        assert!(config.mining_addr.is_none());
    }
}
