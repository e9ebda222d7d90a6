//! Scripted device transport used in test environments.

use super::{
    types::{ApduCommand, ApduResponse, Ins, SW_DECLINED},
    DeviceTransport, HardwareError,
};
use async_trait::async_trait;
use ethers_core::types::{Address, U256};
use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc, Mutex,
};

#[derive(Clone, Debug)]
enum SignBehavior {
    /// Answer with `[recovery_id, r, s]`.
    Signature { recovery_id: u8, r: U256, s: U256 },
    /// Answer with the user-declined status word.
    Decline,
    /// Answer with an arbitrary status word.
    Status(u16),
    /// Never answer; simulates a device waiting for a user that never comes.
    Hang,
}

#[derive(Debug)]
struct MockTransportState {
    address: Address,
    app_version: [u8; 3],
    sign: SignBehavior,
    commands: Vec<ApduCommand>,
}

/// In-memory [`DeviceTransport`] with scripted responses.
///
/// Commands sent through the transport are recorded and can be inspected
/// afterwards, mirroring the scripted provider in `walletcore-core`.
#[derive(Clone, Debug)]
pub struct MockTransport {
    state: Arc<Mutex<MockTransportState>>,
    supported: bool,
    aborted: Arc<AtomicBool>,
}

impl MockTransport {
    /// A supported device whose account resolves to `address`.
    pub fn new(address: Address) -> Self {
        Self {
            state: Arc::new(Mutex::new(MockTransportState {
                address,
                app_version: [1, 8, 2],
                sign: SignBehavior::Signature {
                    recovery_id: 0,
                    r: U256::one(),
                    s: U256::one(),
                },
                commands: Vec::new(),
            })),
            supported: true,
            aborted: Arc::new(AtomicBool::new(false)),
        }
    }

    /// A transport whose platform has no device support.
    pub fn unsupported() -> Self {
        let mut this = Self::new(Address::zero());
        this.supported = false;
        this
    }

    /// Makes every signing request come back as user-declined.
    pub fn decline_signatures(&self) {
        self.state.lock().unwrap().sign = SignBehavior::Decline;
    }

    /// Makes every signing request answer with the given status word.
    pub fn respond_status(&self, status: u16) {
        self.state.lock().unwrap().sign = SignBehavior::Status(status);
    }

    /// Makes every signing request hang forever.
    pub fn hang_signatures(&self) {
        self.state.lock().unwrap().sign = SignBehavior::Hang;
    }

    /// Scripts the signature returned for signing requests.
    pub fn set_signature(&self, recovery_id: u8, r: U256, s: U256) {
        self.state.lock().unwrap().sign = SignBehavior::Signature { recovery_id, r, s };
    }

    /// The commands exchanged so far, in order.
    pub fn commands(&self) -> Vec<ApduCommand> {
        self.state.lock().unwrap().commands.clone()
    }

    /// Whether `abort` has been called.
    pub fn was_aborted(&self) -> bool {
        self.aborted.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl DeviceTransport for MockTransport {
    async fn is_supported(&self) -> bool {
        self.supported
    }

    async fn open(&self) -> Result<(), HardwareError> {
        Ok(())
    }

    async fn exchange(&self, command: &ApduCommand) -> Result<ApduResponse, HardwareError> {
        let answer = {
            let mut state = self.state.lock().unwrap();
            state.commands.push(command.clone());
            match command.ins {
                Ins::GetAddress => {
                    // [pubkey_len, pubkey, address_len, ascii-hex address]
                    let mut data = vec![65u8];
                    data.extend(std::iter::repeat(0u8).take(65));
                    let ascii = hex::encode(state.address.as_bytes());
                    data.push(ascii.len() as u8);
                    data.extend_from_slice(ascii.as_bytes());
                    Some(ApduResponse::ok(data))
                }
                Ins::GetAppConfiguration => {
                    let [major, minor, patch] = state.app_version;
                    Some(ApduResponse::ok(vec![0, major, minor, patch]))
                }
                Ins::SignTransaction | Ins::SignPersonalMessage => match state.sign.clone() {
                    SignBehavior::Signature { recovery_id, r, s } => {
                        let mut data = vec![recovery_id];
                        let mut word = [0u8; 32];
                        r.to_big_endian(&mut word);
                        data.extend_from_slice(&word);
                        s.to_big_endian(&mut word);
                        data.extend_from_slice(&word);
                        Some(ApduResponse::ok(data))
                    }
                    SignBehavior::Decline => Some(ApduResponse::status(SW_DECLINED)),
                    SignBehavior::Status(status) => Some(ApduResponse::status(status)),
                    SignBehavior::Hang => None,
                },
            }
        };
        match answer {
            Some(answer) => Ok(answer),
            // the scripted user never shows up
            None => std::future::pending().await,
        }
    }

    async fn abort(&self) {
        self.aborted.store(true, Ordering::SeqCst);
    }
}
