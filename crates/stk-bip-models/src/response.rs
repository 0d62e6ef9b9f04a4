//! # Terminal responses and event downloads
//!
//! Builders for the two kinds of object the terminal sends to the card.
//!
//! ```rust
//! use stk_bip_models::{CommandDetails, CommandType, ResponseBuilder, ResponseData, ResultCode};
//!
//! let details = CommandDetails::new(1, CommandType::SendData, 0x01);
//! let bytes = ResponseBuilder::new(details)
//!     .result(ResultCode::Ok)
//!     .data(ResponseData::SendData { free_space: 200 })
//!     .build()
//!     .encode()
//!     .unwrap();
//! assert_eq!(bytes[..5], [0x81, 0x03, 0x01, 0x43, 0x01]);
//! ```

use serde::{Deserialize, Serialize};

use crate::bearer::{buffer_size_tlv, BearerDescription};
use crate::channel::{channel_status_tlv, BipEvent, ChannelStatus};
use crate::command::{CommandDetails, DeviceIdentities};
use crate::error::TlvError;
use crate::result::{BipCause, ResultCode};
use crate::tlv::{wrap_envelope, ComprehensionTlv, TlvTag, EVENT_DOWNLOAD_TAG};

/// Largest count a one-byte CHANNEL DATA LENGTH can report.
pub const MAX_REPORTED_LENGTH: usize = 0xFF;

fn channel_data_length_tlv(length: usize) -> ComprehensionTlv {
    #[allow(clippy::cast_possible_truncation)]
    let byte = length.min(MAX_REPORTED_LENGTH) as u8;
    ComprehensionTlv::required(TlvTag::ChannelDataLength, vec![byte])
}

// ─── Terminal response ───────────────────────────────────────────────

/// Command-specific payload appended after the RESULT object.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub enum ResponseData {
    /// OPEN CHANNEL: status (absent on failure), bearer and negotiated buffer.
    OpenChannel {
        /// Status word of the opened channel.
        status: Option<ChannelStatus>,
        /// Bearer description echoed back to the card.
        bearer: Option<BearerDescription>,
        /// Negotiated buffer size.
        buffer_size: u16,
    },
    /// SEND DATA: free space left in the transmit buffer.
    SendData {
        /// Free bytes, reported capped at 0xFF.
        free_space: usize,
    },
    /// RECEIVE DATA: payload plus the count still buffered.
    ReceiveData {
        /// Bytes handed to the card.
        data: Vec<u8>,
        /// Bytes still waiting, reported capped at 0xFF.
        remaining: usize,
    },
    /// GET CHANNEL STATUS: one status word per channel slot.
    ChannelStatus {
        /// Raw status words, `0` for an empty slot.
        words: Vec<u16>,
    },
}

impl ResponseData {
    fn append_tlvs(&self, out: &mut Vec<u8>) -> Result<(), TlvError> {
        match self {
            Self::OpenChannel {
                status,
                bearer,
                buffer_size,
            } => {
                if let Some(status) = status {
                    channel_status_tlv(status.to_word()).encode(out)?;
                }
                if let Some(bearer) = bearer {
                    bearer.to_tlv().encode(out)?;
                }
                buffer_size_tlv(*buffer_size).encode(out)?;
            }
            Self::SendData { free_space } => channel_data_length_tlv(*free_space).encode(out)?,
            Self::ReceiveData { data, remaining } => {
                ComprehensionTlv::required(TlvTag::ChannelData, data.clone()).encode(out)?;
                channel_data_length_tlv(*remaining).encode(out)?;
            }
            Self::ChannelStatus { words } => {
                for word in words {
                    channel_status_tlv(*word).encode(out)?;
                }
            }
        }
        Ok(())
    }
}

/// A terminal response ready to be sent to the card.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct TerminalResponse {
    /// Command details echoed from the proactive command.
    pub details: CommandDetails,
    /// General result.
    pub result: ResultCode,
    /// Additional information byte, if any.
    pub additional_info: Option<u8>,
    /// Command-specific payload.
    pub data: Option<ResponseData>,
}

impl TerminalResponse {
    /// Encode as the simple-TLV sequence carried by TERMINAL RESPONSE.
    ///
    /// # Errors
    ///
    /// [`TlvError::LengthTooLarge`] when the payload cannot be length-encoded.
    pub fn encode(&self) -> Result<Vec<u8>, TlvError> {
        let mut out = Vec::with_capacity(32);
        self.details.to_tlv().encode(&mut out)?;
        DeviceIdentities::TERMINAL_TO_UICC.to_tlv().encode(&mut out)?;

        let mut result = vec![self.result.code()];
        result.extend(self.additional_info);
        ComprehensionTlv::required(TlvTag::Result, result).encode(&mut out)?;

        if let Some(data) = &self.data {
            data.append_tlvs(&mut out)?;
        }
        Ok(out)
    }
}

/// Builder for [`TerminalResponse`].
#[derive(Debug, Clone)]
pub struct ResponseBuilder {
    details: CommandDetails,
    result: ResultCode,
    additional_info: Option<u8>,
    data: Option<ResponseData>,
}

impl ResponseBuilder {
    /// Start a response to the command identified by `details`.
    pub fn new(details: CommandDetails) -> Self {
        Self {
            details,
            result: ResultCode::Ok,
            additional_info: None,
            data: None,
        }
    }

    /// Set the general result.
    pub fn result(mut self, result: ResultCode) -> Self {
        self.result = result;
        self
    }

    /// Set a raw additional-information byte.
    pub fn additional_info(mut self, info: u8) -> Self {
        self.additional_info = Some(info);
        self
    }

    /// Mark as a BIP error with the given cause.
    pub fn bip_error(self, cause: BipCause) -> Self {
        self.result(ResultCode::BipError).additional_info(cause.code())
    }

    /// Attach a command-specific payload.
    pub fn data(mut self, data: ResponseData) -> Self {
        self.data = Some(data);
        self
    }

    /// Finish the response.
    pub fn build(self) -> TerminalResponse {
        TerminalResponse {
            details: self.details,
            result: self.result,
            additional_info: self.additional_info,
            data: self.data,
        }
    }
}

// ─── Event download ──────────────────────────────────────────────────

/// An event download envelope raised by the terminal.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventDownload {
    /// Data arrived on a channel whose receive buffer was empty.
    DataAvailable {
        /// Status of the channel.
        status: ChannelStatus,
        /// Bytes now available, reported capped at 0xFF.
        available: usize,
    },
    /// A channel changed state without a command from the card.
    ChannelStatus {
        /// New status of the channel.
        status: ChannelStatus,
    },
}

impl EventDownload {
    /// The event this download reports.
    pub fn event(&self) -> BipEvent {
        match self {
            Self::DataAvailable { .. } => BipEvent::DataAvailable,
            Self::ChannelStatus { .. } => BipEvent::ChannelStatus,
        }
    }

    /// Encode as a `D6` envelope.
    ///
    /// # Errors
    ///
    /// [`TlvError::LengthTooLarge`] when the contents cannot be length-encoded.
    pub fn encode(&self) -> Result<Vec<u8>, TlvError> {
        let mut contents = Vec::with_capacity(16);
        ComprehensionTlv::required(TlvTag::EventList, vec![self.event().code()]).encode(&mut contents)?;
        DeviceIdentities::TERMINAL_TO_UICC.to_tlv().encode(&mut contents)?;
        match self {
            Self::DataAvailable { status, available } => {
                channel_status_tlv(status.to_word()).encode(&mut contents)?;
                channel_data_length_tlv(*available).encode(&mut contents)?;
            }
            Self::ChannelStatus { status } => {
                channel_status_tlv(status.to_word()).encode(&mut contents)?;
            }
        }
        wrap_envelope(EVENT_DOWNLOAD_TAG, &contents)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
