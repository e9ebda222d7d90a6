//! Gas price/limit computation per fee currency.

use ethers_core::types::{Address, TransactionRequest};
use std::sync::Arc;
use thiserror::Error;
use tracing::debug;
use walletcore_core::{FeeCurrency, FeeQuote, ProviderError};
use walletcore_signers::{RegistryError, SignerRegistry};

/// Error thrown when quoting a transaction's fee.
#[derive(Debug, Error)]
pub enum PolicyError {
    /// The requested fee token is not on the allow-list of
    /// native-equivalent tokens.
    #[error("unsupported fee currency {0:?}")]
    UnsupportedFeeCurrency(Address),
    /// No provider is connected yet.
    #[error(transparent)]
    Registry(#[from] RegistryError),
    /// The provider failed to answer.
    #[error(transparent)]
    Provider(#[from] ProviderError),
}

/// Decides gas price and gas limit for a transaction, per fee currency.
///
/// A pure function over provider state: quoting has no side effects and a
/// [`FeeQuote`] is never persisted.
#[derive(Debug, Clone)]
pub struct GasCurrencyPolicy {
    registry: Arc<SignerRegistry>,
}

impl GasCurrencyPolicy {
    pub fn new(registry: Arc<SignerRegistry>) -> Self {
        Self { registry }
    }

    /// Quotes the fee for `tx`.
    ///
    /// Native fee currency uses the provider's gas price and the raw
    /// estimate. A token fee currency uses the token-denominated gas price,
    /// and the raw estimate is multiplied by the configured inflation
    /// factor: token-paid transactions carry embedded transfer overhead the
    /// naive estimator under-counts, so the limit is a deliberate safety
    /// margin (an upper bound, not a precise number).
    pub async fn quote(&self, tx: &TransactionRequest) -> Result<FeeQuote, PolicyError> {
        let provider = self.registry.provider()?;
        let config = self.registry.config();

        let quote = match tx.fee_currency {
            None => {
                let gas_price = provider.get_gas_price(None).await?;
                let gas_limit = provider.estimate_gas(tx).await?;
                FeeQuote { gas_price, gas_limit, fee_currency: FeeCurrency::Native }
            }
            Some(token) => {
                if !config.is_fee_currency(token) {
                    return Err(PolicyError::UnsupportedFeeCurrency(token));
                }
                let gas_price = provider.get_gas_price(Some(token)).await?;
                let raw_estimate = provider.estimate_gas(tx).await?;
                let gas_limit = raw_estimate.saturating_mul(config.gas_inflation_factor.into());
                FeeQuote { gas_price, gas_limit, fee_currency: FeeCurrency::Token(token) }
            }
        };

        debug!(
            fee_currency = %quote.fee_currency,
            gas_price = %quote.gas_price,
            gas_limit = %quote.gas_limit,
            "fee quoted"
        );
        Ok(quote)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ethers_core::types::U256;
    use walletcore_core::{MockProvider, WalletConfig};

    fn setup(config: WalletConfig) -> (GasCurrencyPolicy, MockProvider) {
        let registry = Arc::new(SignerRegistry::new(Arc::new(config)));
        let provider = MockProvider::new();
        registry.set_provider(Arc::new(provider.clone()));
        (GasCurrencyPolicy::new(registry), provider)
    }

    #[tokio::test]
    async fn native_uses_raw_estimate() {
        let (policy, provider) = setup(WalletConfig::new(42220));
        provider.set_gas_price(1_000_000_000u64);
        provider.set_gas_estimate(21_000u64);

        let quote = policy.quote(&TransactionRequest::new()).await.unwrap();
        assert_eq!(quote.gas_limit, U256::from(21_000u64));
        assert_eq!(quote.gas_price, U256::from(1_000_000_000u64));
        assert_eq!(quote.fee_currency, FeeCurrency::Native);
    }

    #[tokio::test]
    async fn token_inflates_estimate_tenfold() {
        let token = Address::random();
        let (policy, provider) = setup(WalletConfig::new(42220).with_fee_currency(token));
        provider.set_token_gas_price(token, 5_000_000_000u64);
        provider.set_gas_estimate(50_000u64);

        let mut tx = TransactionRequest::new();
        tx.fee_currency = Some(token);
        let quote = policy.quote(&tx).await.unwrap();
        assert_eq!(quote.gas_limit, U256::from(500_000u64));
        assert_eq!(quote.gas_price, U256::from(5_000_000_000u64));
        assert_eq!(quote.fee_currency, FeeCurrency::Token(token));
    }

    #[tokio::test]
    async fn inflation_factor_is_configurable() {
        let token = Address::random();
        let mut config = WalletConfig::new(42220).with_fee_currency(token);
        config.gas_inflation_factor = 3;
        let (policy, provider) = setup(config);
        provider.set_token_gas_price(token, 1u64);
        provider.set_gas_estimate(100u64);

        let mut tx = TransactionRequest::new();
        tx.fee_currency = Some(token);
        let quote = policy.quote(&tx).await.unwrap();
        assert_eq!(quote.gas_limit, U256::from(300u64));
    }

    #[tokio::test]
    async fn unknown_token_is_rejected() {
        let (policy, provider) = setup(WalletConfig::new(42220));
        provider.set_gas_estimate(50_000u64);

        let token = Address::random();
        let mut tx = TransactionRequest::new();
        tx.fee_currency = Some(token);
        let err = policy.quote(&tx).await.unwrap_err();
        assert!(matches!(err, PolicyError::UnsupportedFeeCurrency(t) if t == token));
    }

    #[tokio::test]
    async fn quoting_requires_a_provider() {
        let registry = Arc::new(SignerRegistry::new(Arc::new(WalletConfig::new(42220))));
        let policy = GasCurrencyPolicy::new(registry);
        let err = policy.quote(&TransactionRequest::new()).await.unwrap_err();
        assert!(matches!(err, PolicyError::Registry(RegistryError::ProviderNotReady)));
    }
}
