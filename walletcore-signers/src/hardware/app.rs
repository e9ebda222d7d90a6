//! The signing conversation with the device.

use super::{
    types::{
        ApduCommand, ApduResponse, DerivationType, HardwareError, Ins, P1_FIRST, P1_MORE,
        P1_NON_CONFIRM, P2_NO_CHAINCODE, SW_DECLINED, SW_OK,
    },
    DeviceTransport,
};
use crate::to_eip155_v;
use ethers_core::types::{Address, Signature, TransactionRequest, U256};
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, info};

/// A hardware device account.
///
/// Opens the transport once, resolves the account address for the
/// derivation path, and then serves signing requests. All APDU
/// conversations are serialized through an internal lock; the device cannot
/// interleave them.
#[derive(Debug)]
pub struct HardwareWallet {
    transport: Arc<dyn DeviceTransport>,
    // one APDU conversation at a time; abort() intentionally bypasses this
    io_lock: Mutex<()>,
    derivation: DerivationType,
    chain_id: u64,
    address: Address,
}

impl HardwareWallet {
    /// Connects to the device and resolves the account for `derivation`.
    ///
    /// Fails with [`HardwareError::NotSupported`] when no compatible
    /// transport exists on this platform.
    pub async fn new(
        transport: Arc<dyn DeviceTransport>,
        derivation: DerivationType,
        chain_id: u64,
    ) -> Result<Self, HardwareError> {
        if !transport.is_supported().await {
            return Err(HardwareError::NotSupported);
        }
        transport.open().await?;
        let address = Self::address_with_path(transport.as_ref(), &derivation).await?;
        info!(?address, path = %derivation, "hardware signer connected");
        Ok(Self { transport, io_lock: Mutex::new(()), derivation, chain_id, address })
    }

    /// The device account's address.
    pub fn address(&self) -> Address {
        self.address
    }

    /// The chain this signer produces signatures for.
    pub fn chain_id(&self) -> u64 {
        self.chain_id
    }

    /// The derivation path of the device account.
    pub fn derivation(&self) -> &DerivationType {
        &self.derivation
    }

    /// Asks the transport to interrupt an in-flight exchange, best-effort.
    pub async fn abort(&self) {
        debug!("asking device transport to abort");
        self.transport.abort().await;
    }

    /// Returns the semver of the device's signing app.
    pub async fn app_version(&self) -> Result<String, HardwareError> {
        let _io = self.io_lock.lock().await;
        let command = ApduCommand {
            ins: Ins::GetAppConfiguration,
            p1: P1_NON_CONFIRM,
            p2: P2_NO_CHAINCODE,
            data: Vec::new(),
        };
        let result = ok_data(self.transport.exchange(&command).await?)?;
        if result.len() < 4 {
            return Err(HardwareError::ShortResponse { got: result.len(), at_least: 4 });
        }
        Ok(format!("{}.{}.{}", result[1], result[2], result[3]))
    }

    /// Signs a transaction; requires confirmation on the device.
    ///
    /// The transaction's chain id wins over the signer's when both are set.
    pub async fn sign_tx(&self, tx: &TransactionRequest) -> Result<Signature, HardwareError> {
        let mut tx = tx.clone();
        let chain_id = tx.chain_id.map(|id| id.as_u64()).unwrap_or(self.chain_id);
        tx.chain_id = Some(chain_id.into());

        let mut payload = path_to_bytes(&self.derivation);
        payload.extend_from_slice(tx.rlp().as_ref());

        let mut sig = self.sign_payload(Ins::SignTransaction, payload).await?;
        // the device reports the raw recovery id
        sig.v = to_eip155_v(sig.v as u8, chain_id);
        Ok(sig)
    }

    /// Signs a personal message; requires confirmation on the device.
    pub async fn sign_message(&self, message: &[u8]) -> Result<Signature, HardwareError> {
        let mut payload = path_to_bytes(&self.derivation);
        payload.extend_from_slice(&(message.len() as u32).to_be_bytes());
        payload.extend_from_slice(message);

        let mut sig = self.sign_payload(Ins::SignPersonalMessage, payload).await?;
        sig.v += 27;
        Ok(sig)
    }

    async fn address_with_path(
        transport: &dyn DeviceTransport,
        derivation: &DerivationType,
    ) -> Result<Address, HardwareError> {
        let command = ApduCommand {
            ins: Ins::GetAddress,
            p1: P1_NON_CONFIRM,
            p2: P2_NO_CHAINCODE,
            data: path_to_bytes(derivation),
        };
        let result = ok_data(transport.exchange(&command).await?)?;

        // response layout: [pubkey_len, pubkey..., address_len, ascii-hex address]
        let offset = 1 + result[0] as usize;
        if result.len() < offset + 1 {
            return Err(HardwareError::ShortResponse { got: result.len(), at_least: offset + 1 });
        }
        let addr_len = result[offset] as usize;
        if result.len() < offset + 1 + addr_len {
            return Err(HardwareError::ShortResponse {
                got: result.len(),
                at_least: offset + 1 + addr_len,
            });
        }
        let decoded = hex::decode(&result[offset + 1..offset + 1 + addr_len])?;
        if decoded.len() != Address::len_bytes() {
            return Err(HardwareError::ShortResponse {
                got: decoded.len(),
                at_least: Address::len_bytes(),
            });
        }
        Ok(Address::from_slice(&decoded))
    }

    // Sends the payload in 255-byte chunks; the last answer carries the
    // signature as [recovery_id, r(32), s(32)].
    async fn sign_payload(
        &self,
        ins: Ins,
        mut payload: Vec<u8>,
    ) -> Result<Signature, HardwareError> {
        let _io = self.io_lock.lock().await;
        let mut command = ApduCommand { ins, p1: P1_FIRST, p2: P2_NO_CHAINCODE, data: Vec::new() };
        debug!(%ins, bytes = payload.len(), "requesting device signature");

        let mut result = Vec::new();
        while !payload.is_empty() {
            let chunk_size = payload.len().min(255);
            command.data = payload.drain(..chunk_size).collect();
            result = ok_data(self.transport.exchange(&command).await?)?;
            command.p1 = P1_MORE;
        }

        if result.len() < 65 {
            return Err(HardwareError::ShortResponse { got: result.len(), at_least: 65 });
        }
        let v = result[0] as u64;
        let r = U256::from_big_endian(&result[1..33]);
        let s = U256::from_big_endian(&result[33..65]);
        Ok(Signature { r, s, v })
    }
}

fn ok_data(answer: ApduResponse) -> Result<Vec<u8>, HardwareError> {
    match answer.status {
        SW_OK if answer.data.is_empty() => Err(HardwareError::EmptyResponse),
        SW_OK => Ok(answer.data),
        SW_DECLINED => Err(HardwareError::Declined),
        status => Err(HardwareError::DeviceStatus(status)),
    }
}

// converts a derivation path to the device's binary form
fn path_to_bytes(derivation: &DerivationType) -> Vec<u8> {
    let derivation = derivation.to_string();
    let elements = derivation.split('/').skip(1).collect::<Vec<_>>();

    let mut bytes = vec![elements.len() as u8];
    for derivation_index in elements {
        let hardened = derivation_index.contains('\'');
        let mut index = derivation_index.replace('\'', "").parse::<u32>().unwrap_or(0);
        if hardened {
            index |= 0x8000_0000;
        }
        bytes.extend(&index.to_be_bytes());
    }
    bytes
}
