//! Wire-level helpers for the APDU conversation with a hardware device.

use std::fmt;
use thiserror::Error;

/// HD derivation path for the device account.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum DerivationType {
    /// Celo-native HD path (coin type 52752)
    CeloLive(usize),
    /// Legacy Ethereum-style path
    Legacy(usize),
    /// Any other path
    Other(String),
}

impl fmt::Display for DerivationType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> Result<(), fmt::Error> {
        write!(
            f,
            "{}",
            match self {
                DerivationType::CeloLive(index) => format!("m/44'/52752'/0'/0/{index}"),
                DerivationType::Legacy(index) => format!("m/44'/60'/0'/{index}"),
                DerivationType::Other(inner) => inner.to_owned(),
            }
        )
    }
}

/// Error when talking to the hardware device.
#[derive(Debug, Error)]
pub enum HardwareError {
    /// Underlying device transport error
    #[error("device transport error: {0}")]
    Transport(String),
    /// No compatible device transport exists on this platform
    #[error("hardware devices are not supported on this platform")]
    NotSupported,
    /// The user explicitly rejected the operation on the device.
    ///
    /// This is an expected outcome, distinct from a device fault.
    #[error("the user declined the operation on the device")]
    Declined,
    /// The device answered with an unexpected status word
    #[error("device returned status {0:#06x}")]
    DeviceStatus(u16),
    /// Device response was unexpectedly empty
    #[error("received unexpected response from device, expected data, found none")]
    EmptyResponse,
    /// Got a response, but it didn't contain as much data as expected
    #[error("cannot parse device response, got {got} bytes, expected at least {at_least}")]
    ShortResponse { got: usize, at_least: usize },
    /// Error when converting from a hex string
    #[error(transparent)]
    HexError(#[from] hex::FromHexError),
}

/// Success status word.
pub const SW_OK: u16 = 0x9000;
/// The user rejected the request on the device.
pub const SW_DECLINED: u16 = 0x6985;

/// First chunk of a multi-part payload.
pub const P1_FIRST: u8 = 0x00;
/// Continuation chunk.
pub const P1_MORE: u8 = 0x80;
/// Do not ask for on-device confirmation.
pub const P1_NON_CONFIRM: u8 = 0x00;
/// Do not return the BIP-32 chain code.
pub const P2_NO_CHAINCODE: u8 = 0x00;

/// Device instruction.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
#[repr(u8)]
pub enum Ins {
    GetAddress = 0x02,
    SignTransaction = 0x04,
    GetAppConfiguration = 0x06,
    SignPersonalMessage = 0x08,
}

impl fmt::Display for Ins {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Ins::GetAddress => write!(f, "GET_ADDRESS"),
            Ins::SignTransaction => write!(f, "SIGN_TRANSACTION"),
            Ins::GetAppConfiguration => write!(f, "GET_APP_CONFIGURATION"),
            Ins::SignPersonalMessage => write!(f, "SIGN_PERSONAL_MESSAGE"),
        }
    }
}

/// One command sent to the device.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ApduCommand {
    pub ins: Ins,
    pub p1: u8,
    pub p2: u8,
    pub data: Vec<u8>,
}

/// The device's answer: payload plus a trailing status word.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ApduResponse {
    pub data: Vec<u8>,
    pub status: u16,
}

impl ApduResponse {
    /// Successful response carrying `data`.
    pub fn ok(data: Vec<u8>) -> Self {
        Self { data, status: SW_OK }
    }

    /// Empty response with the given status word.
    pub fn status(status: u16) -> Self {
        Self { data: Vec::new(), status }
    }
}
