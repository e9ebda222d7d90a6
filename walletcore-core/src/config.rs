//! Externally supplied wallet configuration.

use ethers_core::types::Address;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Multiplier applied to raw gas estimates when the fee is paid in a
/// non-native currency.
///
/// Token-denominated payments carry embedded transfer overhead that the
/// naive estimator under-counts, so the estimate is inflated by a fixed
/// safety margin. This is a deliberate heuristic, not a precise computation;
/// treat the resulting limit as an upper bound.
pub const DEFAULT_GAS_INFLATION_FACTOR: u64 = 10;

/// Time allowed to establish the peer transport before any session proposal
/// can arrive.
pub const SESSION_INIT_TIMEOUT: Duration = Duration::from_secs(15);

/// Time a proposed session may wait for user approval before it is closed.
pub const SESSION_PROPOSAL_TIMEOUT: Duration = Duration::from_secs(180);

/// Time a signing request may take, measured from its creation.
pub const SESSION_REQUEST_TIMEOUT: Duration = Duration::from_secs(300);

/// Pause between recording a request's terminal state and surfacing it to
/// the peer, to avoid UI flicker on the remote side.
pub const DELAY_BEFORE_DISMISS: Duration = Duration::from_secs(2);

/// Wallet-level configuration.
///
/// All values are supplied by the embedding application; the defaults match
/// Celo mainnet and the standard session timeouts.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct WalletConfig {
    /// The chain the wallet is configured for.
    pub chain_id: u64,
    /// Allow-listed fee tokens, i.e. the native-equivalent stable token
    /// addresses gas may be paid in.
    pub fee_currencies: Vec<Address>,
    /// Gas estimate multiplier for non-native fee currencies.
    pub gas_inflation_factor: u64,
    /// Transport handshake bound.
    pub session_init_timeout: Duration,
    /// Proposal approval bound.
    pub session_proposal_timeout: Duration,
    /// Per-request resolution bound.
    pub session_request_timeout: Duration,
    /// Cosmetic delay before a terminal request state is reported back.
    pub dismiss_delay: Duration,
}

impl WalletConfig {
    /// Configuration for the given chain with default timeouts, an empty
    /// fee-currency allow-list and the default gas inflation factor.
    pub fn new(chain_id: u64) -> Self {
        Self {
            chain_id,
            fee_currencies: Vec::new(),
            gas_inflation_factor: DEFAULT_GAS_INFLATION_FACTOR,
            session_init_timeout: SESSION_INIT_TIMEOUT,
            session_proposal_timeout: SESSION_PROPOSAL_TIMEOUT,
            session_request_timeout: SESSION_REQUEST_TIMEOUT,
            dismiss_delay: DELAY_BEFORE_DISMISS,
        }
    }

    /// Adds a token address to the fee-currency allow-list.
    #[must_use]
    pub fn with_fee_currency(mut self, token: Address) -> Self {
        self.fee_currencies.push(token);
        self
    }

    /// Whether gas may be paid in the given token.
    pub fn is_fee_currency(&self, token: Address) -> bool {
        self.fee_currencies.contains(&token)
    }

    /// The wallet's chain in CAIP-2 notation, e.g. `eip155:42220`.
    pub fn caip2(&self) -> String {
        format!("eip155:{}", self.chain_id)
    }
}

impl Default for WalletConfig {
    fn default() -> Self {
        // Celo mainnet
        Self::new(42220)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn caip2_notation() {
        assert_eq!(WalletConfig::new(44787).caip2(), "eip155:44787");
        assert_eq!(WalletConfig::default().caip2(), "eip155:42220");
    }

    #[test]
    fn fee_currency_allowlist() {
        let token = Address::random();
        let config = WalletConfig::new(42220).with_fee_currency(token);
        assert!(config.is_fee_currency(token));
        assert!(!config.is_fee_currency(Address::random()));
    }

    #[test]
    fn default_timeouts() {
        let config = WalletConfig::default();
        assert_eq!(config.session_init_timeout, Duration::from_secs(15));
        assert_eq!(config.session_proposal_timeout, Duration::from_secs(180));
        assert_eq!(config.session_request_timeout, Duration::from_secs(300));
        assert_eq!(config.dismiss_delay, Duration::from_secs(2));
        assert_eq!(config.gas_inflation_factor, 10);
    }

    #[test]
    fn deserializes_from_json() {
        let token = Address::random();
        let config = WalletConfig::new(44787).with_fee_currency(token);
        let json = serde_json::to_string(&config).unwrap();
        let back: WalletConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(back, config);
    }
}
