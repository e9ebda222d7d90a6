//! The network-provider seam.
//!
//! The wallet core never speaks JSON-RPC itself; the embedding application
//! hands it something implementing [`NetworkProvider`]. The submitter and
//! gas policy only rely on this capability surface, which keeps the actual
//! RPC client (and its transport) out of scope here.

use async_trait::async_trait;
use ethers_core::types::{
    Address, Bytes, TransactionReceipt, TransactionRequest, TxHash, U256, U64,
};
use ethers_core::utils::keccak256;
use std::{
    collections::{HashMap, VecDeque},
    fmt::Debug,
    sync::{Arc, Mutex},
};
use thiserror::Error;

/// Error returned by a [`NetworkProvider`] implementation.
#[derive(Debug, Error)]
pub enum ProviderError {
    /// The node answered with a JSON-RPC error.
    #[error("rpc error: {0}")]
    JsonRpcError(String),
    /// The transport to the node failed.
    #[error("connection error: {0}")]
    ConnectionError(String),
    /// The transaction was broadcast but dropped before confirmation.
    #[error("transaction {0:?} was dropped before confirmation")]
    TransactionDropped(TxHash),
}

/// Capability surface of the RPC client collaborator.
///
/// A Celo node quotes `eth_gasPrice` in a token when the optional fee
/// currency parameter is supplied, which is what `get_gas_price` models.
#[async_trait]
pub trait NetworkProvider: Debug + Send + Sync {
    /// Current gas price, denominated in the given fee currency (or the
    /// native currency when `None`).
    async fn get_gas_price(&self, fee_currency: Option<Address>) -> Result<U256, ProviderError>;

    /// Raw gas estimate for the transaction, with no safety margin applied.
    async fn estimate_gas(&self, tx: &TransactionRequest) -> Result<U256, ProviderError>;

    /// Next available nonce for the account.
    async fn get_transaction_count(&self, from: Address) -> Result<U256, ProviderError>;

    /// Broadcasts a signed, RLP-encoded transaction.
    async fn send_raw_transaction(&self, raw: Bytes) -> Result<TxHash, ProviderError>;

    /// Awaits on-chain confirmation of a broadcast transaction.
    async fn wait_for_confirmation(
        &self,
        tx_hash: TxHash,
    ) -> Result<TransactionReceipt, ProviderError>;

    /// Latest block number.
    async fn get_block_number(&self) -> Result<U64, ProviderError>;
}

#[derive(Debug, Default)]
struct MockState {
    gas_price: U256,
    token_gas_prices: HashMap<Address, U256>,
    gas_estimate: U256,
    nonce: U256,
    block_number: U64,
    broadcasts: Vec<Bytes>,
    broadcast_errors: VecDeque<ProviderError>,
    hang_confirmations: bool,
}

/// Scripted provider used in test environments.
///
/// Responses are configured up front; requests made through the
/// [`NetworkProvider`] trait are recorded and can be inspected afterwards.
#[derive(Clone, Debug, Default)]
pub struct MockProvider {
    state: Arc<Mutex<MockState>>,
}

impl MockProvider {
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the native gas price returned by `get_gas_price(None)`.
    pub fn set_gas_price<T: Into<U256>>(&self, price: T) {
        self.state.lock().unwrap().gas_price = price.into();
    }

    /// Sets the token-denominated gas price for a fee currency.
    pub fn set_token_gas_price<T: Into<U256>>(&self, token: Address, price: T) {
        self.state.lock().unwrap().token_gas_prices.insert(token, price.into());
    }

    /// Sets the raw gas estimate returned for every transaction.
    pub fn set_gas_estimate<T: Into<U256>>(&self, estimate: T) {
        self.state.lock().unwrap().gas_estimate = estimate.into();
    }

    /// Sets the account nonce returned by `get_transaction_count`.
    pub fn set_nonce<T: Into<U256>>(&self, nonce: T) {
        self.state.lock().unwrap().nonce = nonce.into();
    }

    pub fn set_block_number<T: Into<U64>>(&self, number: T) {
        self.state.lock().unwrap().block_number = number.into();
    }

    /// Queues an error for the next `send_raw_transaction` call.
    pub fn fail_next_broadcast(&self, error: ProviderError) {
        self.state.lock().unwrap().broadcast_errors.push_back(error);
    }

    /// Makes `wait_for_confirmation` suspend forever, simulating a
    /// transaction that never lands.
    pub fn hang_confirmations(&self) {
        self.state.lock().unwrap().hang_confirmations = true;
    }

    /// The raw transactions broadcast so far, in order.
    pub fn broadcasts(&self) -> Vec<Bytes> {
        self.state.lock().unwrap().broadcasts.clone()
    }
}

#[async_trait]
impl NetworkProvider for MockProvider {
    async fn get_gas_price(&self, fee_currency: Option<Address>) -> Result<U256, ProviderError> {
        let state = self.state.lock().unwrap();
        match fee_currency {
            None => Ok(state.gas_price),
            Some(token) => state.token_gas_prices.get(&token).copied().ok_or_else(|| {
                ProviderError::JsonRpcError(format!("unknown fee currency {token:?}"))
            }),
        }
    }

    async fn estimate_gas(&self, _tx: &TransactionRequest) -> Result<U256, ProviderError> {
        Ok(self.state.lock().unwrap().gas_estimate)
    }

    async fn get_transaction_count(&self, _from: Address) -> Result<U256, ProviderError> {
        Ok(self.state.lock().unwrap().nonce)
    }

    async fn send_raw_transaction(&self, raw: Bytes) -> Result<TxHash, ProviderError> {
        let mut state = self.state.lock().unwrap();
        if let Some(error) = state.broadcast_errors.pop_front() {
            return Err(error);
        }
        let hash = TxHash::from(keccak256(&raw));
        state.broadcasts.push(raw);
        Ok(hash)
    }

    async fn wait_for_confirmation(
        &self,
        tx_hash: TxHash,
    ) -> Result<TransactionReceipt, ProviderError> {
        let hang = self.state.lock().unwrap().hang_confirmations;
        if hang {
            // Suspend forever; callers bound this with their own timeout.
            std::future::pending::<()>().await;
        }
        Ok(TransactionReceipt {
            transaction_hash: tx_hash,
            status: Some(1u64.into()),
            ..Default::default()
        })
    }

    async fn get_block_number(&self) -> Result<U64, ProviderError> {
        Ok(self.state.lock().unwrap().block_number)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn scripted_gas_prices() {
        let provider = MockProvider::new();
        provider.set_gas_price(5u64);
        let token = Address::random();
        provider.set_token_gas_price(token, 50u64);

        assert_eq!(provider.get_gas_price(None).await.unwrap(), U256::from(5u64));
        assert_eq!(provider.get_gas_price(Some(token)).await.unwrap(), U256::from(50u64));
        assert!(provider.get_gas_price(Some(Address::random())).await.is_err());
    }

    #[tokio::test]
    async fn records_broadcasts() {
        let provider = MockProvider::new();
        let raw = Bytes::from(vec![1u8, 2, 3]);
        let hash = provider.send_raw_transaction(raw.clone()).await.unwrap();
        assert_eq!(provider.broadcasts(), vec![raw]);

        let receipt = provider.wait_for_confirmation(hash).await.unwrap();
        assert_eq!(receipt.transaction_hash, hash);
    }

    #[tokio::test]
    async fn queued_broadcast_failure() {
        let provider = MockProvider::new();
        provider.fail_next_broadcast(ProviderError::JsonRpcError("nonce too low".into()));
        let err = provider.send_raw_transaction(Bytes::new()).await.unwrap_err();
        assert!(matches!(err, ProviderError::JsonRpcError(_)));
        // the queue is drained, the next broadcast goes through
        provider.send_raw_transaction(Bytes::new()).await.unwrap();
    }
}
