//! Backend environments and their connection parameters.

use serde::{Deserialize, Serialize};
use std::str::FromStr;

/// Which backend environment a session talks to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NetworkTarget {
    Testnet,
    Localtest,
}

impl NetworkTarget {
    pub fn as_str(self) -> &'static str {
        match self {
            NetworkTarget::Testnet => "testnet",
            NetworkTarget::Localtest => "localtest",
        }
    }

    pub fn parameters(self) -> NetworkParameters {
        match self {
            NetworkTarget::Testnet => NetworkParameters {
                target: self,
                wamp_url: "wss://testwss.greenaddress.it/v2/ws".to_string(),
                wamp_cert_pins: vec![
                    "25847d668eb4f04fdd40b12b6b0740c567da7d024308eb6c2c96fe41d9de218d".to_string(),
                    "a74b0c32b65b95fe2c4f8f098947a68b695033bed0b51dd8b984ecae89571bb6".to_string(),
                ],
                block_explorer_address: "https://sandbox.smartbit.com.au/address/".to_string(),
                block_explorer_tx: "https://sandbox.smartbit.com.au/tx/".to_string(),
                onion_url: Some("ws://gu5ke7a2aguwfqhz.onion/v2/ws".to_string()),
                bech32_prefix: "tb".to_string(),
                main_net: false,
            },
            NetworkTarget::Localtest => NetworkParameters {
                target: self,
                wamp_url: "ws://localhost:8080/v2/ws".to_string(),
                wamp_cert_pins: Vec::new(),
                block_explorer_address: String::new(),
                block_explorer_tx: String::new(),
                onion_url: None,
                bech32_prefix: "bcrt".to_string(),
                main_net: false,
            },
        }
    }
}

impl std::fmt::Display for NetworkTarget {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for NetworkTarget {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "testnet" => Ok(NetworkTarget::Testnet),
            "localtest" => Ok(NetworkTarget::Localtest),
            other => Err(format!("Unknown network: {other}")),
        }
    }
}

/// Connection details for one environment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NetworkParameters {
    pub target: NetworkTarget,
    pub wamp_url: String,
    /// Hex SHA-256 digests of acceptable leaf certificates. Empty means no pinning.
    pub wamp_cert_pins: Vec<String>,
    pub block_explorer_address: String,
    pub block_explorer_tx: String,
    pub onion_url: Option<String>,
    pub bech32_prefix: String,
    pub main_net: bool,
}

impl NetworkParameters {
    pub fn uses_tls(&self) -> bool {
        self.wamp_url.starts_with("wss://")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_known_names() {
        assert_eq!("testnet".parse::<NetworkTarget>(), Ok(NetworkTarget::Testnet));
        assert_eq!(" LocalTest ".parse::<NetworkTarget>(), Ok(NetworkTarget::Localtest));
    }

    #[test]
    fn rejects_unknown_name() {
        let err = "mainnet".parse::<NetworkTarget>().unwrap_err();
        assert!(err.contains("mainnet"));
    }

    #[test]
    fn display_matches_parse() {
        for target in [NetworkTarget::Testnet, NetworkTarget::Localtest] {
            assert_eq!(target.to_string().parse::<NetworkTarget>(), Ok(target));
        }
    }

    #[test]
    fn testnet_uses_tls_with_pins() {
        let params = NetworkTarget::Testnet.parameters();
        assert!(params.uses_tls());
        assert!(!params.wamp_cert_pins.is_empty());
        assert!(!params.main_net);
    }

    #[test]
    fn localtest_is_plain_websocket_without_explorer() {
        let params = NetworkTarget::Localtest.parameters();
        assert!(!params.uses_tls());
        assert_eq!(params.wamp_url, "ws://localhost:8080/v2/ws");
        assert!(params.wamp_cert_pins.is_empty());
        assert!(params.block_explorer_tx.is_empty());
        assert_eq!(params.onion_url, None);
        assert_eq!(params.bech32_prefix, "bcrt");
    }

    #[test]
    fn serializes_lowercase() {
        let json = serde_json::to_string(&NetworkTarget::Localtest).unwrap();
        assert_eq!(json, "\"localtest\"");
    }
}
