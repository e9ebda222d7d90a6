//! The single-active-signer registry.

use crate::{AnySigner, Signer};
use ethers_core::types::Address;
use std::sync::{Arc, RwLock};
use thiserror::Error;
use tokio::sync::{Mutex, OwnedMutexGuard};
use tracing::{debug, info};
use walletcore_core::{NetworkProvider, WalletConfig};

/// Error thrown by [`SignerRegistry`].
#[derive(Debug, Error)]
pub enum RegistryError {
    /// A signer may only be installed after a network provider is connected.
    #[error("no network provider has been connected")]
    ProviderNotReady,
    /// No signer has been installed (or it has been cleared).
    #[error("no signer has been initialized")]
    SignerNotInitialized,
    /// The signer handle is malformed for this wallet.
    #[error("invalid signer: {0}")]
    InvalidSigner(String),
}

/// Holds the wallet's single active signer and its network provider.
///
/// This is an explicit owning context rather than ambient global state, so
/// multiple wallet instances can coexist (one per registry). Two invariants
/// live here: a provider must be connected before any signer is installed,
/// and at most one signer is active at a time. Installing a new one
/// replaces the old, which is a supported account-switch operation, not an
/// error.
#[derive(Debug)]
pub struct SignerRegistry {
    config: Arc<WalletConfig>,
    provider: RwLock<Option<Arc<dyn NetworkProvider>>>,
    signer: RwLock<Option<Arc<AnySigner>>>,
    // hardware devices cannot multiplex; sign/broadcast sections take this
    signing_lock: Arc<Mutex<()>>,
}

impl SignerRegistry {
    pub fn new(config: Arc<WalletConfig>) -> Self {
        Self {
            config,
            provider: RwLock::new(None),
            signer: RwLock::new(None),
            signing_lock: Arc::new(Mutex::new(())),
        }
    }

    /// The wallet configuration this registry was created with.
    pub fn config(&self) -> &Arc<WalletConfig> {
        &self.config
    }

    /// Connects the network provider. Must happen before any signer is
    /// installed.
    pub fn set_provider(&self, provider: Arc<dyn NetworkProvider>) {
        info!("network provider connected");
        *self.provider.write().unwrap() = Some(provider);
    }

    /// The connected provider, or [`RegistryError::ProviderNotReady`].
    pub fn provider(&self) -> Result<Arc<dyn NetworkProvider>, RegistryError> {
        self.provider.read().unwrap().clone().ok_or(RegistryError::ProviderNotReady)
    }

    /// Installs the active signer.
    ///
    /// Fails with [`RegistryError::ProviderNotReady`] before the provider is
    /// connected and with [`RegistryError::InvalidSigner`] when the handle
    /// is malformed (zero address, wrong chain). Replacing an existing
    /// signer is allowed and merely logged.
    pub fn set_signer(&self, signer: AnySigner) -> Result<(), RegistryError> {
        if self.provider.read().unwrap().is_none() {
            return Err(RegistryError::ProviderNotReady);
        }
        if signer.address() == Address::zero() {
            return Err(RegistryError::InvalidSigner("signer has no address".to_string()));
        }
        if signer.chain_id() != self.config.chain_id {
            return Err(RegistryError::InvalidSigner(format!(
                "signer is for chain {}, wallet is configured for chain {}",
                signer.chain_id(),
                self.config.chain_id
            )));
        }

        let signer = Arc::new(signer);
        let mut slot = self.signer.write().unwrap();
        match slot.replace(signer.clone()) {
            Some(old) => {
                // account switch
                debug!(old = ?old.address(), new = ?signer.address(), "replacing active signer");
            }
            None => {
                info!(
                    address = ?signer.address(),
                    hardware = signer.is_hardware(),
                    "signer installed"
                );
            }
        }
        Ok(())
    }

    /// The active signer, or [`RegistryError::SignerNotInitialized`].
    pub fn signer(&self) -> Result<Arc<AnySigner>, RegistryError> {
        self.signer.read().unwrap().clone().ok_or(RegistryError::SignerNotInitialized)
    }

    /// Whether the active signer is hardware-backed. `false` when no signer
    /// is installed.
    pub fn is_hardware(&self) -> bool {
        self.signer.read().unwrap().as_deref().map(AnySigner::is_hardware).unwrap_or(false)
    }

    /// Drops the active signer. Idempotent.
    ///
    /// Only the reference is dropped; tearing down a hardware-device
    /// session is the transport collaborator's responsibility.
    pub fn clear(&self) {
        if self.signer.write().unwrap().take().is_some() {
            debug!("active signer cleared");
        }
    }

    /// Takes the process-wide signing lock.
    ///
    /// Only one transaction may be mid-sign through the active signer at a
    /// time; a hardware device cannot interleave two signing conversations.
    pub async fn lock_signing(&self) -> OwnedMutexGuard<()> {
        self.signing_lock.clone().lock_owned().await
    }
}
