//! Signer implementations and the single-active-signer registry.
//!
//! A wallet holds exactly one active key-holder at a time. The two supported
//! kinds are a [`LocalWallet`] backed by in-process key material and a
//! [`HardwareWallet`] that drives an APDU-style device through a
//! [`DeviceTransport`]. Both are carried by the flat [`AnySigner`] enum so
//! that the at-most-one-active invariant can be enforced centrally in
//! [`SignerRegistry`], which also owns the ordering rule that a network
//! provider must be connected before any signer is installed.
//!
//! ```no_run
//! use std::sync::Arc;
//! use walletcore_core::{MockProvider, WalletConfig};
//! use walletcore_signers::{AnySigner, LocalWallet, SignerRegistry};
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let config = Arc::new(WalletConfig::new(42220));
//! let registry = SignerRegistry::new(config);
//!
//! // provider first, then the signer
//! registry.set_provider(Arc::new(MockProvider::new()));
//! let wallet = "dcf2cbdd171a21c480aa7f53d77f31bb102282b3ff099c78e3118b37348c72f7"
//!     .parse::<LocalWallet>()?
//!     .with_chain_id(42220u64);
//! registry.set_signer(AnySigner::Local(wallet))?;
//! # Ok(())
//! # }
//! ```

pub mod hardware;
mod registry;
mod wallet;

pub use hardware::{DeviceTransport, HardwareError, HardwareWallet};
pub use registry::{RegistryError, SignerRegistry};
pub use wallet::{LocalWallet, WalletError};

use async_trait::async_trait;
use ethers_core::types::{Address, Signature, TransactionRequest};
use std::fmt::Debug;
use thiserror::Error;

/// Applies [EIP155](https://github.com/ethereum/EIPs/blob/master/EIPS/eip-155.md)
pub fn to_eip155_v<T: Into<u8>>(recovery_id: T, chain_id: u64) -> u64 {
    (recovery_id.into() as u64) + 35 + chain_id * 2
}

/// Error produced by either signer variant.
#[derive(Debug, Error)]
pub enum SignerError {
    /// Local key-material signer failure.
    #[error(transparent)]
    Wallet(#[from] WalletError),
    /// Hardware device failure (or the user declining).
    #[error(transparent)]
    Hardware(#[from] HardwareError),
}

impl SignerError {
    /// Whether the user explicitly rejected the operation on the device.
    ///
    /// A decline is a normal outcome, not a device fault, and callers are
    /// expected to report it as such.
    pub fn is_declined(&self) -> bool {
        matches!(self, SignerError::Hardware(HardwareError::Declined))
    }
}

/// Trait for the wallet's active key-holder.
///
/// Signing is asynchronous because a hardware variant suspends on device
/// round-trips; the local variant resolves immediately.
#[async_trait]
pub trait Signer: Debug + Send + Sync {
    /// Signs the transaction, applying EIP-155 replay protection.
    async fn sign_transaction(&self, tx: &TransactionRequest) -> Result<Signature, SignerError>;

    /// Signs the message after prefixing it with the
    /// `Ethereum Signed Message` domain separator.
    async fn sign_message(&self, message: &[u8]) -> Result<Signature, SignerError>;

    /// The signer's address.
    fn address(&self) -> Address;

    /// The chain the signer produces signatures for.
    fn chain_id(&self) -> u64;
}

/// The two supported signer kinds, as a flat variant enum.
///
/// Deliberately not a trait object: the registry wants to answer capability
/// queries (`is_hardware`) and route best-effort aborts without downcasting.
#[derive(Debug)]
pub enum AnySigner {
    /// In-process key material.
    Local(LocalWallet),
    /// Hardware-backed device signer.
    Hardware(HardwareWallet),
}

impl AnySigner {
    pub fn is_hardware(&self) -> bool {
        matches!(self, AnySigner::Hardware(_))
    }

    /// Asks an in-flight hardware interaction to stop, best-effort.
    ///
    /// The current device round-trip is allowed to finish; a local signer
    /// has nothing to interrupt.
    pub async fn abort(&self) {
        if let AnySigner::Hardware(device) = self {
            device.abort().await;
        }
    }
}

impl From<LocalWallet> for AnySigner {
    fn from(wallet: LocalWallet) -> Self {
        AnySigner::Local(wallet)
    }
}

impl From<HardwareWallet> for AnySigner {
    fn from(device: HardwareWallet) -> Self {
        AnySigner::Hardware(device)
    }
}

#[async_trait]
impl Signer for AnySigner {
    async fn sign_transaction(&self, tx: &TransactionRequest) -> Result<Signature, SignerError> {
        match self {
            AnySigner::Local(wallet) => wallet.sign_transaction(tx).await,
            AnySigner::Hardware(device) => device.sign_transaction(tx).await,
        }
    }

    async fn sign_message(&self, message: &[u8]) -> Result<Signature, SignerError> {
        match self {
            AnySigner::Local(wallet) => wallet.sign_message(message).await,
            AnySigner::Hardware(device) => Signer::sign_message(device, message).await,
        }
    }

    fn address(&self) -> Address {
        match self {
            AnySigner::Local(wallet) => wallet.address(),
            AnySigner::Hardware(device) => device.address(),
        }
    }

    fn chain_id(&self) -> u64 {
        match self {
            AnySigner::Local(wallet) => wallet.chain_id(),
            AnySigner::Hardware(device) => device.chain_id(),
        }
    }
}
