//! Preparing, signing and broadcasting transactions.

use crate::{GasCurrencyPolicy, PolicyError};
use ethers_core::types::{Bytes, TransactionReceipt, TransactionRequest};
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, info, warn};
use walletcore_core::ProviderError;
use walletcore_signers::{RegistryError, Signer, SignerError, SignerRegistry};

/// Error thrown while submitting a transaction.
#[derive(Debug, Error)]
pub enum SubmitError {
    /// The wallet is missing a provider or a signer.
    #[error(transparent)]
    Registry(#[from] RegistryError),
    /// The fee quote could not be produced.
    #[error(transparent)]
    Policy(#[from] PolicyError),
    /// A pre-broadcast RPC call failed.
    #[error(transparent)]
    Provider(#[from] ProviderError),
    /// The user rejected the transaction on the hardware device.
    #[error("transaction declined on the hardware device")]
    HardwareDeclined,
    /// The signer failed for a reason other than a user decline.
    #[error("signing failed: {0}")]
    Signer(SignerError),
    /// The transaction was broadcast-stage rejected or dropped.
    #[error("submission failed: {cause}")]
    SubmissionFailed { cause: ProviderError },
}

/// Routes every outgoing transaction through the active signer.
///
/// `prepare` fills the sender, chain id, fee fields and nonce;
/// `submit` signs under the registry's signing lock, broadcasts and waits
/// for confirmation. The lock covers signing only: a hardware device cannot
/// interleave two signing conversations, but broadcasting is plain RPC and
/// does not need to serialize.
#[derive(Debug, Clone)]
pub struct TransactionSubmitter {
    registry: Arc<SignerRegistry>,
    policy: GasCurrencyPolicy,
}

impl TransactionSubmitter {
    pub fn new(registry: Arc<SignerRegistry>) -> Self {
        let policy = GasCurrencyPolicy::new(registry.clone());
        Self { registry, policy }
    }

    /// The gas policy this submitter applies.
    pub fn policy(&self) -> &GasCurrencyPolicy {
        &self.policy
    }

    /// Fills in everything a dapp-supplied transaction usually omits.
    ///
    /// Caller-supplied fields always win; only missing ones are filled. The
    /// sender defaults to the active signer's address, the chain id to the
    /// wallet's, gas price and limit come from the fee-currency policy and
    /// the nonce from the provider.
    pub async fn prepare(
        &self,
        tx: TransactionRequest,
    ) -> Result<TransactionRequest, SubmitError> {
        let mut tx = tx;
        let provider = self.registry.provider()?;
        let signer = self.registry.signer()?;

        if tx.from.is_none() {
            tx.from = Some(signer.address());
        }
        if tx.chain_id.is_none() {
            tx.chain_id = Some(self.registry.config().chain_id.into());
        }

        if tx.gas_price.is_none() || tx.gas.is_none() {
            let quote = self.policy.quote(&tx).await?;
            tx.gas_price.get_or_insert(quote.gas_price);
            tx.gas.get_or_insert(quote.gas_limit);
        }
        if tx.nonce.is_none() {
            let from = tx.from.unwrap_or_else(|| signer.address());
            tx.nonce = Some(provider.get_transaction_count(from).await?);
        }
        Ok(tx)
    }

    /// Signs the prepared transaction and returns its raw RLP encoding
    /// without broadcasting it.
    pub async fn sign_only(&self, tx: TransactionRequest) -> Result<Bytes, SubmitError> {
        let tx = self.prepare(tx).await?;
        self.sign_locked(&tx).await
    }

    /// Prepares, signs, broadcasts and waits for on-chain confirmation.
    pub async fn submit(
        &self,
        tx: TransactionRequest,
    ) -> Result<TransactionReceipt, SubmitError> {
        let tx = self.prepare(tx).await?;
        let provider = self.registry.provider()?;
        let raw = self.sign_locked(&tx).await?;

        let tx_hash = provider
            .send_raw_transaction(raw)
            .await
            .map_err(|cause| SubmitError::SubmissionFailed { cause })?;
        info!(?tx_hash, "transaction broadcast");

        let receipt = provider
            .wait_for_confirmation(tx_hash)
            .await
            .map_err(|cause| SubmitError::SubmissionFailed { cause })?;
        info!(?tx_hash, block = ?receipt.block_number, "transaction confirmed");
        Ok(receipt)
    }

    // Signs under the process-wide signing lock and drops the guard before
    // returning; the broadcast never runs under the lock.
    async fn sign_locked(&self, tx: &TransactionRequest) -> Result<Bytes, SubmitError> {
        let signer = self.registry.signer()?;
        let guard = self.registry.lock_signing().await;
        debug!(from = ?tx.from, nonce = ?tx.nonce, "signing transaction");
        let signature = signer.sign_transaction(tx).await.map_err(map_signer_error)?;
        drop(guard);

        Ok(tx.rlp_signed(&signature))
    }
}

fn map_signer_error(err: SignerError) -> SubmitError {
    if err.is_declined() {
        // a decline is the user's answer, not a fault
        warn!("user declined the transaction on the device");
        SubmitError::HardwareDeclined
    } else {
        SubmitError::Signer(err)
    }
}
