//! Resolution of challenge network identifiers to chains.

use crate::config::NetworkConfig;

/// Networks a challenge may name, by name or as `eip155:<chain id>`.
#[derive(Debug, Clone)]
pub struct NetworkRegistry {
    networks: Vec<NetworkConfig>,
}

impl NetworkRegistry {
    pub fn new(networks: Vec<NetworkConfig>) -> Self {
        Self { networks }
    }

    pub fn resolve(&self, identifier: &str) -> Option<NetworkConfig> {
        let identifier = identifier.trim();
        if let Some(id) = identifier.strip_prefix("eip155:") {
            let chain_id: u64 = id.parse().ok()?;
            let known = self.networks.iter().find(|n| n.chain_id == chain_id).cloned();
            return Some(known.unwrap_or_else(|| NetworkConfig {
                name: identifier.to_string(),
                chain_id,
                rpc_url: String::new(),
                explorer_url: String::new(),
                currency_symbol: "ETH".to_string(),
            }));
        }
        self.networks
            .iter()
            .find(|n| n.name.eq_ignore_ascii_case(identifier))
            .cloned()
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.networks.iter().map(|n| n.name.as_str())
    }
}

impl Default for NetworkRegistry {
    fn default() -> Self {
        Self::new(NetworkConfig::defaults())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resolution() {
        let registry = NetworkRegistry::default();
        assert_eq!(registry.resolve("cronos-testnet").unwrap().chain_id, 338);
        assert_eq!(registry.resolve("Cronos").unwrap().chain_id, 25);
        assert_eq!(registry.resolve("eip155:338").unwrap().name, "cronos-testnet");
        assert_eq!(registry.resolve("eip155:31337").unwrap().chain_id, 31337);
        assert!(registry.resolve("eip155:abc").is_none());
        assert!(registry.resolve("solana").is_none());
        assert_eq!(registry.names().count(), 2);
    }
}
