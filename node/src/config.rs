// Node Configuration
// CLI args and runtime configuration

use clap::Parser;
use std::path::PathBuf;
use tessera_consensus::NodeParams;
use tessera_core::{KeyPair, PublicKey, PORT};

#[derive(Parser, Debug, Clone)]
#[command(author, version, about = "Tessera - quorum-based computor network node", long_about = None)]
pub struct NodeConfig {
    /// Data directory for state snapshots
    #[arg(long, default_value = "./data")]
    pub data_dir: PathBuf,

    /// TCP listen port
    #[arg(long, default_value_t = PORT)]
    pub port: u16,

    /// Run as the main instance (emit votes, tick data, and solutions)
    #[arg(long)]
    pub main: bool,

    /// Operator public key (hex, 64 chars)
    #[arg(long)]
    pub operator_key: String,

    /// Arbitrator public key (hex, 64 chars)
    #[arg(long)]
    pub arbitrator_key: String,

    /// Computor identity seeds (hex, 64 chars each)
    #[arg(long)]
    pub computor_seeds: Vec<String>,

    /// Epoch to start from
    #[arg(long, default_value = "1")]
    pub epoch: u16,

    /// Tick to start from
    #[arg(long, default_value = "1")]
    pub initial_tick: u32,

    /// Known peers to dial at startup (a.b.c.d)
    #[arg(long)]
    pub peers: Vec<String>,

    /// Never drop peers from the address book
    #[arg(long)]
    pub static_peers: bool,

    /// Number of request worker threads
    #[arg(long, default_value = "4")]
    pub workers: usize,

    /// log2 of the spectrum capacity
    #[arg(long, default_value = "24")]
    pub spectrum_capacity_log2: u32,

    /// log2 of the universe capacity
    #[arg(long, default_value = "24")]
    pub assets_capacity_log2: u32,

    /// log2 of the dejavu filter size in bits
    #[arg(long, default_value = "32")]
    pub dejavu_bits_log2: u32,

    /// Enable verbose logging
    #[arg(short, long)]
    pub verbose: bool,
}

fn parse_hex32(value: &str) -> Result<[u8; 32], String> {
    if value.len() != 64 {
        return Err("expected 64 hex characters (32 bytes)".to_string());
    }
    let bytes = hex::decode(value).map_err(|e| format!("invalid hex: {e}"))?;
    let mut out = [0u8; 32];
    out.copy_from_slice(&bytes);
    Ok(out)
}

impl NodeConfig {
    pub fn parse_args() -> Self {
        NodeConfig::parse()
    }

    pub fn validate(&self) -> Result<(), String> {
        parse_hex32(&self.operator_key).map_err(|e| format!("operator key: {e}"))?;
        parse_hex32(&self.arbitrator_key).map_err(|e| format!("arbitrator key: {e}"))?;
        for seed in &self.computor_seeds {
            parse_hex32(seed).map_err(|e| format!("computor seed: {e}"))?;
        }
        if self.workers == 0 {
            return Err("at least one request worker is required".to_string());
        }
        if !(10..=24).contains(&self.spectrum_capacity_log2) {
            return Err("spectrum capacity log2 must be between 10 and 24".to_string());
        }
        if !(10..=24).contains(&self.assets_capacity_log2) {
            return Err("assets capacity log2 must be between 10 and 24".to_string());
        }
        if !(16..=32).contains(&self.dejavu_bits_log2) {
            return Err("dejavu bits log2 must be between 16 and 32".to_string());
        }
        Ok(())
    }

    pub fn operator_public_key(&self) -> Result<PublicKey, String> {
        parse_hex32(&self.operator_key).map(PublicKey::from_bytes)
    }

    pub fn arbitrator_public_key(&self) -> Result<PublicKey, String> {
        parse_hex32(&self.arbitrator_key).map(PublicKey::from_bytes)
    }

    pub fn identities(&self) -> Result<Vec<KeyPair>, String> {
        self.computor_seeds
            .iter()
            .map(|seed| parse_hex32(seed).map(KeyPair::from_seed))
            .collect()
    }

    pub fn bootstrap_peers(&self) -> Vec<[u8; 4]> {
        self.peers
            .iter()
            .filter_map(|address| {
                let mut octets = [0u8; 4];
                let mut parts = address.split('.');
                for octet in octets.iter_mut() {
                    *octet = parts.next()?.parse().ok()?;
                }
                parts.next().is_none().then_some(octets)
            })
            .collect()
    }

    pub fn node_params(&self) -> NodeParams {
        let max_ticks = NodeParams::default().max_ticks_per_epoch;
        NodeParams {
            spectrum_capacity: 1 << self.spectrum_capacity_log2,
            assets_capacity: 1 << self.assets_capacity_log2,
            max_ticks_per_epoch: max_ticks,
            ..NodeParams::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base_config() -> NodeConfig {
        NodeConfig {
            data_dir: PathBuf::from("./data"),
            port: PORT,
            main: false,
            operator_key: "11".repeat(32),
            arbitrator_key: "22".repeat(32),
            computor_seeds: vec!["33".repeat(32)],
            epoch: 1,
            initial_tick: 1,
            peers: vec!["203.0.113.7".to_string()],
            static_peers: false,
            workers: 4,
            spectrum_capacity_log2: 16,
            assets_capacity_log2: 16,
            dejavu_bits_log2: 20,
            verbose: false,
        }
    }

    #[test]
    fn valid_config_passes() {
        let config = base_config();
        assert!(config.validate().is_ok());
        assert_eq!(config.identities().unwrap().len(), 1);
        assert_eq!(config.bootstrap_peers(), vec![[203, 0, 113, 7]]);
        assert_eq!(config.node_params().spectrum_capacity, 1 << 16);
    }

    #[test]
    fn malformed_keys_are_rejected() {
        let mut config = base_config();
        config.operator_key = "xyz".to_string();
        assert!(config.validate().is_err());

        let mut config = base_config();
        config.computor_seeds = vec!["33".repeat(31)];
        assert!(config.validate().is_err());
    }

    #[test]
    fn bad_peer_strings_are_skipped() {
        let mut config = base_config();
        config.peers = vec!["not-an-ip".to_string(), "1.2.3.4.5".to_string(), "9.9.9.9".to_string()];
        assert_eq!(config.bootstrap_peers(), vec![[9, 9, 9, 9]]);
    }
}
