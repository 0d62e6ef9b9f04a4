//! Proactive command header types.
//!
//! Every proactive command starts with a COMMAND DETAILS object
//! (`number | type | qualifier`) followed by DEVICE IDENTITIES
//! (`source | destination`). For the channel commands the destination
//! identity names the channel (`0x21`..`0x27`).

use serde::{Deserialize, Serialize};

use crate::error::ModelError;
use crate::tlv::{ComprehensionTlv, TlvTag};

// ---------------------------------------------------------------------------
// CommandType
// ---------------------------------------------------------------------------

/// Proactive command types handled by the BIP subsystem.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Hash, strum::Display, strum::EnumIter)]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE")]
pub enum CommandType {
    /// Arm the set of events the card wants to be told about.
    SetUpEventList,
    /// Open a BIP channel.
    OpenChannel,
    /// Close a BIP channel.
    CloseChannel,
    /// Read buffered data from a channel.
    ReceiveData,
    /// Write data into a channel.
    SendData,
    /// Report the status of every channel.
    GetChannelStatus,
}

impl CommandType {
    /// Wire value of this command type.
    pub const fn code(self) -> u8 {
        match self {
            Self::SetUpEventList => 0x05,
            Self::OpenChannel => 0x40,
            Self::CloseChannel => 0x41,
            Self::ReceiveData => 0x42,
            Self::SendData => 0x43,
            Self::GetChannelStatus => 0x44,
        }
    }

    /// Map a wire value back to a command type.
    pub const fn from_code(code: u8) -> Option<Self> {
        Some(match code {
            0x05 => Self::SetUpEventList,
            0x40 => Self::OpenChannel,
            0x41 => Self::CloseChannel,
            0x42 => Self::ReceiveData,
            0x43 => Self::SendData,
            0x44 => Self::GetChannelStatus,
            _ => return None,
        })
    }
}

// ---------------------------------------------------------------------------
// CommandDetails
// ---------------------------------------------------------------------------

/// Contents of the COMMAND DETAILS object.
///
/// The type is kept as the raw byte so that a terminal response can echo
/// an unrecognised command back to the card.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
pub struct CommandDetails {
    /// Command number chosen by the card.
    pub number: u8,
    /// Raw command type byte.
    pub type_code: u8,
    /// Command qualifier byte.
    pub qualifier: u8,
    /// Comprehension-required flag of the original object.
    pub comprehension_required: bool,
}

impl CommandDetails {
    /// Command details for a known command type.
    pub fn new(number: u8, command: CommandType, qualifier: u8) -> Self {
        Self {
            number,
            type_code: command.code(),
            qualifier,
            comprehension_required: true,
        }
    }

    /// Parse the value of a COMMAND DETAILS object.
    ///
    /// # Errors
    ///
    /// [`ModelError::TooShort`] when fewer than 3 bytes are present.
    pub fn from_tlv(tlv: &ComprehensionTlv) -> Result<Self, ModelError> {
        match tlv.value() {
            [number, type_code, qualifier, ..] => Ok(Self {
                number: *number,
                type_code: *type_code,
                qualifier: *qualifier,
                comprehension_required: tlv.comprehension_required(),
            }),
            other => Err(ModelError::TooShort {
                field: "command details",
                expected: 3,
                actual: other.len(),
            }),
        }
    }

    /// The command type, if it is one this subsystem handles.
    pub fn command_type(&self) -> Option<CommandType> {
        CommandType::from_code(self.type_code)
    }

    /// Returns `true` if qualifier bit `mask` is set.
    pub fn qualifier_bit(&self, mask: u8) -> bool {
        self.qualifier & mask != 0
    }

    /// Re-encode as a COMMAND DETAILS object for a terminal response.
    pub fn to_tlv(&self) -> ComprehensionTlv {
        ComprehensionTlv::new(
            TlvTag::CommandDetails.code(),
            self.comprehension_required,
            vec![self.number, self.type_code, self.qualifier],
        )
    }
}

/// Qualifier bits of OPEN CHANNEL.
pub mod open_qualifier {
    /// Establish the link immediately rather than on demand.
    pub const IMMEDIATE_LINK: u8 = 0x01;
    /// Reconnect automatically when the link drops.
    pub const AUTOMATIC_RECONNECT: u8 = 0x02;
    /// Open in background mode.
    pub const BACKGROUND_MODE: u8 = 0x04;
}

/// Qualifier bit of SEND DATA: transmit now instead of buffering.
pub const SEND_IMMEDIATELY: u8 = 0x01;

/// Qualifier bit of CLOSE CHANNEL (server mode): go back to listening.
pub const CLOSE_KEEP_LISTENING: u8 = 0x01;

// ---------------------------------------------------------------------------
// DeviceIdentities
// ---------------------------------------------------------------------------

/// Well-known device identity codes.
pub mod device {
    /// The UICC itself.
    pub const UICC: u8 = 0x81;
    /// The terminal (ME).
    pub const TERMINAL: u8 = 0x82;
    /// The network.
    pub const NETWORK: u8 = 0x83;
    /// Channel 1; channels 1..7 are `0x21..0x27`.
    pub const CHANNEL_BASE: u8 = 0x20;
}

/// Contents of the DEVICE IDENTITIES object.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeviceIdentities {
    /// Source device.
    pub source: u8,
    /// Destination device.
    pub destination: u8,
}

impl DeviceIdentities {
    /// Identities carried by every terminal-originated object.
    pub const TERMINAL_TO_UICC: Self = Self {
        source: device::TERMINAL,
        destination: device::UICC,
    };

    /// Parse the value of a DEVICE IDENTITIES object.
    ///
    /// # Errors
    ///
    /// [`ModelError::TooShort`] when fewer than 2 bytes are present.
    pub fn from_tlv(tlv: &ComprehensionTlv) -> Result<Self, ModelError> {
        match tlv.value() {
            [source, destination, ..] => Ok(Self {
                source: *source,
                destination: *destination,
            }),
            other => Err(ModelError::TooShort {
                field: "device identities",
                expected: 2,
                actual: other.len(),
            }),
        }
    }

    /// Channel number named by the destination identity, if it names one.
    pub fn destination_channel(&self) -> Option<u8> {
        match self.destination {
            0x21..=0x27 => Some(self.destination - device::CHANNEL_BASE),
            _ => None,
        }
    }

    /// Encode as a DEVICE IDENTITIES object.
    pub fn to_tlv(&self) -> ComprehensionTlv {
        ComprehensionTlv::required(TlvTag::DeviceIdentities, vec![self.source, self.destination])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use strum::IntoEnumIterator;

    #[test]
    fn command_type_codes_roundtrip() {
        for kind in CommandType::iter() {
            assert_eq!(CommandType::from_code(kind.code()), Some(kind));
        }
        assert_eq!(CommandType::from_code(0x21), None);
    }

    #[test]
    fn command_type_display() {
        assert_eq!(CommandType::OpenChannel.to_string(), "OPEN_CHANNEL");
        assert_eq!(CommandType::GetChannelStatus.to_string(), "GET_CHANNEL_STATUS");
    }

    #[test]
    fn command_details_parse_and_encode() {
        let tlv = ComprehensionTlv::new(0x01, true, vec![0x07, 0x43, 0x01]);
        let details = CommandDetails::from_tlv(&tlv).unwrap();
        assert_eq!(details.number, 7);
        assert_eq!(details.command_type(), Some(CommandType::SendData));
        assert!(details.qualifier_bit(SEND_IMMEDIATELY));
        assert_eq!(details.to_tlv().to_bytes().unwrap(), vec![0x81, 0x03, 0x07, 0x43, 0x01]);
    }

    #[test]
    fn command_details_too_short() {
        let tlv = ComprehensionTlv::new(0x01, true, vec![0x07, 0x43]);
        assert!(CommandDetails::from_tlv(&tlv).is_err());
    }

    #[test]
    fn device_identities_channel() {
        let tlv = ComprehensionTlv::new(0x02, true, vec![0x81, 0x23]);
        let ids = DeviceIdentities::from_tlv(&tlv).unwrap();
        assert_eq!(ids.destination_channel(), Some(3));

        let to_terminal = DeviceIdentities {
            source: device::UICC,
            destination: device::TERMINAL,
        };
        assert_eq!(to_terminal.destination_channel(), None);
        assert_eq!(DeviceIdentities::TERMINAL_TO_UICC.to_tlv().to_bytes().unwrap(), vec![0x82, 0x02, 0x82, 0x81]);
    }
}
