//! Network identification

/// Which Cardano network a stream of events belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
pub enum NetworkId {
    Mainnet,
    Testnet,
}

impl Default for NetworkId {
    fn default() -> Self {
        Self::Mainnet
    }
}

impl NetworkId {
    /// The network magic conventionally used for this network
    pub fn magic(&self) -> u32 {
        match self {
            Self::Mainnet => 764824073,
            Self::Testnet => 1,
        }
    }
}

impl From<pallas_addresses::Network> for NetworkId {
    fn from(network: pallas_addresses::Network) -> Self {
        match network {
            pallas_addresses::Network::Testnet => Self::Testnet,
            _ => Self::Mainnet,
        }
    }
}
