//! Per-network parameter definitions.

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Network {
    Mainnet,
    Testnet,
    Simnet,
}

impl Network {
    pub fn as_str(self) -> &'static str {
        match self {
            Network::Mainnet => "mainnet",
            Network::Testnet => "testnet",
            Network::Simnet => "simnet",
        }
    }
}

/// The subset of consensus parameters the wallet transaction store consults:
/// maturity delays for the various output kinds and the block cadence used to
/// age out stale mempool tickets.
#[derive(Clone, Copy, Debug)]
pub struct ChainParams {
    pub network: Network,
    pub coinbase_maturity: i32,
    pub ticket_maturity: i32,
    pub sstx_change_maturity: i32,
    pub time_per_block_secs: i64,
    pub work_diff_window_size: i64,
}

impl ChainParams {
    /// Age past which an unmined ticket purchase is considered stale.
    pub fn ticket_cutoff_secs(&self) -> i64 {
        self.time_per_block_secs * self.work_diff_window_size
    }
}

pub fn chain_params(network: Network) -> ChainParams {
    match network {
        Network::Mainnet => ChainParams {
            network,
            coinbase_maturity: 256,
            ticket_maturity: 256,
            sstx_change_maturity: 1,
            time_per_block_secs: 300,
            work_diff_window_size: 144,
        },
        Network::Testnet => ChainParams {
            network,
            coinbase_maturity: 16,
            ticket_maturity: 16,
            sstx_change_maturity: 1,
            time_per_block_secs: 120,
            work_diff_window_size: 144,
        },
        Network::Simnet => ChainParams {
            network,
            coinbase_maturity: 16,
            ticket_maturity: 16,
            sstx_change_maturity: 1,
            time_per_block_secs: 1,
            work_diff_window_size: 8,
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ticket_cutoff() {
        let params = chain_params(Network::Testnet);
        assert_eq!(params.ticket_cutoff_secs(), 120 * 144);
    }
}
