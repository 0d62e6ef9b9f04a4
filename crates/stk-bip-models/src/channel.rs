//! Channel status word and BIP event codes.

use serde::{Deserialize, Serialize};

use crate::tlv::{ComprehensionTlv, TlvTag};

/// Maximum number of concurrently open channels.
pub const MAX_CHANNELS: usize = 7;

/// Link state encoded in the first status byte.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Hash, strum::Display)]
#[strum(serialize_all = "lowercase")]
pub enum LinkState {
    /// No link / TCP closed.
    Closed,
    /// TCP server waiting for a client.
    Listening,
    /// Link (or TCP connection) established.
    Established,
}

/// Further information encoded in the second status byte.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StatusInfo {
    /// Nothing to add.
    None,
    /// The link was dropped by the network or the peer.
    LinkDropped,
}

/// A channel status word (`CHANNEL STATUS` object value).
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChannelStatus {
    /// Channel number, 1..=[`MAX_CHANNELS`].
    pub channel_id: u8,
    /// Current link state.
    pub state: LinkState,
    /// Further information.
    pub info: StatusInfo,
}

impl ChannelStatus {
    /// Status of a channel with no further information.
    pub fn new(channel_id: u8, state: LinkState) -> Self {
        Self {
            channel_id,
            state,
            info: StatusInfo::None,
        }
    }

    /// Same channel, marked as dropped.
    #[must_use]
    pub fn dropped(mut self) -> Self {
        self.state = LinkState::Closed;
        self.info = StatusInfo::LinkDropped;
        self
    }

    /// The two status bytes.
    pub fn to_bytes(self) -> [u8; 2] {
        let state_bits = match self.state {
            LinkState::Closed => 0x00,
            LinkState::Listening => 0x40,
            LinkState::Established => 0x80,
        };
        let info = match self.info {
            StatusInfo::None => 0x00,
            StatusInfo::LinkDropped => 0x05,
        };
        [state_bits | (self.channel_id & 0x07), info]
    }

    /// The status word as a big-endian integer.
    pub fn to_word(self) -> u16 {
        u16::from_be_bytes(self.to_bytes())
    }
}

/// Encode a raw status word as a CHANNEL STATUS object.
pub fn channel_status_tlv(word: u16) -> ComprehensionTlv {
    ComprehensionTlv::required(TlvTag::ChannelStatus, word.to_be_bytes().to_vec())
}

/// Events the terminal raises toward the card.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Hash, strum::Display)]
pub enum BipEvent {
    /// Data arrived in an empty receive buffer.
    DataAvailable,
    /// A channel changed state on its own.
    ChannelStatus,
}

impl BipEvent {
    /// Event code used in EVENT LIST objects.
    pub const fn code(self) -> u8 {
        match self {
            Self::DataAvailable => 0x09,
            Self::ChannelStatus => 0x0A,
        }
    }

    /// Map an event code back to a BIP event.
    pub const fn from_code(code: u8) -> Option<Self> {
        match code {
            0x09 => Some(Self::DataAvailable),
            0x0A => Some(Self::ChannelStatus),
            _ => None,
        }
    }
}
