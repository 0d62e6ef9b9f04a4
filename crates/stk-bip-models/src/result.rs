//! General result codes and additional-information bytes (TS 102 223 §8.12).

use serde::{Deserialize, Serialize};

/// General result reported in a terminal response.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Hash, strum::Display, strum::EnumIter)]
pub enum ResultCode {
    /// Command performed successfully.
    Ok,
    /// Performed with partial comprehension.
    PartialComprehension,
    /// Performed, but some requested information was missing.
    MissingInformation,
    /// Performed, but the requested icon could not be displayed.
    IconNotDisplayed,
    /// Performed with modification of the requested parameters.
    Modified,
    /// Terminal currently unable to process the command.
    TerminalUnableToProcess,
    /// Network currently unable to process the command.
    NetworkUnableToProcess,
    /// Command beyond the terminal's capabilities.
    BeyondTerminalCapability,
    /// Command type not understood.
    CommandTypeNotUnderstood,
    /// Command data not understood.
    CommandDataNotUnderstood,
    /// Error, required values are missing.
    RequiredValuesMissing,
    /// Bearer Independent Protocol error.
    BipError,
}

impl ResultCode {
    /// Wire value of the general result.
    pub const fn code(self) -> u8 {
        match self {
            Self::Ok => 0x00,
            Self::PartialComprehension => 0x01,
            Self::MissingInformation => 0x02,
            Self::IconNotDisplayed => 0x04,
            Self::Modified => 0x07,
            Self::TerminalUnableToProcess => 0x20,
            Self::NetworkUnableToProcess => 0x21,
            Self::BeyondTerminalCapability => 0x30,
            Self::CommandTypeNotUnderstood => 0x31,
            Self::CommandDataNotUnderstood => 0x32,
            Self::RequiredValuesMissing => 0x36,
            Self::BipError => 0x3A,
        }
    }

    /// Map a wire value back to a result code.
    pub const fn from_code(code: u8) -> Option<Self> {
        Some(match code {
            0x00 => Self::Ok,
            0x01 => Self::PartialComprehension,
            0x02 => Self::MissingInformation,
            0x04 => Self::IconNotDisplayed,
            0x07 => Self::Modified,
            0x20 => Self::TerminalUnableToProcess,
            0x21 => Self::NetworkUnableToProcess,
            0x30 => Self::BeyondTerminalCapability,
            0x31 => Self::CommandTypeNotUnderstood,
            0x32 => Self::CommandDataNotUnderstood,
            0x36 => Self::RequiredValuesMissing,
            0x3A => Self::BipError,
            _ => return None,
        })
    }

    /// `0x0X` results: the command was carried out, possibly with a caveat.
    pub const fn is_success(self) -> bool {
        self.code() < 0x10
    }
}

/// Additional information accompanying [`ResultCode::BipError`].
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Hash, strum::Display, strum::EnumIter)]
pub enum BipCause {
    /// No specific cause can be given.
    NoSpecificCause,
    /// Every channel slot is in use.
    NoChannelAvailable,
    /// The channel is closed.
    ChannelClosed,
    /// The channel identifier does not name an open channel.
    ChannelIdNotValid,
    /// The requested buffer size is not available.
    BufferSizeNotAvailable,
    /// Security error (unsuccessful authentication).
    SecurityError,
    /// The requested transport level is not available.
    TransportLevelNotAvailable,
    /// The remote device could not be reached.
    RemoteDeviceNotReachable,
}

impl BipCause {
    /// Wire value of the additional information byte.
    pub const fn code(self) -> u8 {
        match self {
            Self::NoSpecificCause => 0x00,
            Self::NoChannelAvailable => 0x01,
            Self::ChannelClosed => 0x02,
            Self::ChannelIdNotValid => 0x03,
            Self::BufferSizeNotAvailable => 0x04,
            Self::SecurityError => 0x05,
            Self::TransportLevelNotAvailable => 0x06,
            Self::RemoteDeviceNotReachable => 0x07,
        }
    }
}

/// Additional information for [`ResultCode::TerminalUnableToProcess`].
pub mod terminal_cause {
    /// No specific cause can be given.
    pub const NO_SPECIFIC_CAUSE: u8 = 0x00;
    /// The terminal is busy on a call.
    pub const BUSY_ON_CALL: u8 = 0x02;
}
