//! A hardware-backed signer speaking an APDU-style protocol.
//!
//! The wallet core never owns the device connection; it consumes a
//! capability-shaped [`DeviceTransport`] supplied by the embedding
//! application (USB, WebUSB, Bluetooth...). [`HardwareWallet`] drives the
//! signing conversation over that transport, including payload chunking and
//! the user-decline status word.

pub mod app;
pub mod transports;
pub mod types;

pub use app::HardwareWallet;
pub use transports::MockTransport;
pub use types::{ApduCommand, ApduResponse, DerivationType, HardwareError, Ins};

use crate::{Signer, SignerError};
use async_trait::async_trait;
use ethers_core::types::{Address, Signature, TransactionRequest};
use std::fmt::Debug;

/// Transport to a hardware signing device.
///
/// Implementations exchange raw APDUs; everything protocol-level (chunking,
/// status words, response layouts) lives in [`HardwareWallet`]. Exchanges
/// are serialized by the caller, devices cannot multiplex.
#[async_trait]
pub trait DeviceTransport: Debug + Send + Sync {
    /// Whether a compatible device transport exists on this platform.
    async fn is_supported(&self) -> bool;

    /// Establishes the device connection.
    async fn open(&self) -> Result<(), HardwareError>;

    /// Sends one command and awaits the device's answer.
    async fn exchange(&self, command: &ApduCommand) -> Result<ApduResponse, HardwareError>;

    /// Best-effort interrupt of an in-flight exchange. The device is allowed
    /// to finish its current round-trip; implementations that cannot
    /// interrupt at all may leave this as the default no-op.
    async fn abort(&self) {}
}

#[async_trait]
impl Signer for HardwareWallet {
    async fn sign_transaction(&self, tx: &TransactionRequest) -> Result<Signature, SignerError> {
        Ok(self.sign_tx(tx).await?)
    }

    async fn sign_message(&self, message: &[u8]) -> Result<Signature, SignerError> {
        Ok(HardwareWallet::sign_message(self, message).await?)
    }

    fn address(&self) -> Address {
        self.address()
    }

    fn chain_id(&self) -> u64 {
        self.chain_id()
    }
}
