//! Bearer and transport descriptors carried by OPEN CHANNEL.

use std::net::Ipv4Addr;

use serde::{Deserialize, Serialize};

use crate::error::ModelError;
use crate::tlv::{ComprehensionTlv, TlvTag};

// ---------------------------------------------------------------------------
// BearerType / BearerDescription
// ---------------------------------------------------------------------------

/// Bearer types the terminal can honour.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Hash, strum::Display)]
pub enum BearerType {
    /// GPRS / UTRAN packet service.
    Gprs,
    /// Whatever default bearer the terminal uses for the transport layer.
    Default,
    /// UTRAN packet service with extended parameters / HSDPA.
    UtranExtended,
    /// E-UTRAN / mapped UTRAN packet service.
    Eutran,
}

impl BearerType {
    /// Wire value of the bearer type.
    pub const fn code(self) -> u8 {
        match self {
            Self::Gprs => 0x02,
            Self::Default => 0x03,
            Self::UtranExtended => 0x09,
            Self::Eutran => 0x0B,
        }
    }

    /// Map a wire value back to a supported bearer type.
    pub const fn from_code(code: u8) -> Option<Self> {
        Some(match code {
            0x02 => Self::Gprs,
            0x03 => Self::Default,
            0x09 => Self::UtranExtended,
            0x0B => Self::Eutran,
            _ => return None,
        })
    }

    /// Returns `true` for the specific packet-switched bearers.
    pub const fn is_packet_switched(self) -> bool {
        matches!(self, Self::Gprs | Self::UtranExtended | Self::Eutran)
    }
}

/// Contents of a BEARER DESCRIPTION object.
///
/// The type byte is kept raw so an unsupported bearer can still be echoed
/// back in the terminal response.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct BearerDescription {
    /// Raw bearer type byte.
    pub type_code: u8,
    /// Bearer-specific parameters (QoS, PDP type, ...).
    pub parameters: Vec<u8>,
}

impl BearerDescription {
    /// A default-bearer description with no parameters.
    pub fn default_bearer() -> Self {
        Self {
            type_code: BearerType::Default.code(),
            parameters: Vec::new(),
        }
    }

    /// Parse the value of a BEARER DESCRIPTION object.
    ///
    /// # Errors
    ///
    /// [`ModelError::TooShort`] when the value is empty.
    pub fn from_tlv(tlv: &ComprehensionTlv) -> Result<Self, ModelError> {
        let (type_code, parameters) = tlv.value().split_first().ok_or(ModelError::TooShort {
            field: "bearer description",
            expected: 1,
            actual: 0,
        })?;
        Ok(Self {
            type_code: *type_code,
            parameters: parameters.to_vec(),
        })
    }

    /// The bearer type, if supported.
    pub fn bearer_type(&self) -> Option<BearerType> {
        BearerType::from_code(self.type_code)
    }

    /// Encode as a BEARER DESCRIPTION object.
    pub fn to_tlv(&self) -> ComprehensionTlv {
        let mut value = Vec::with_capacity(1 + self.parameters.len());
        value.push(self.type_code);
        value.extend_from_slice(&self.parameters);
        ComprehensionTlv::required(TlvTag::BearerDescription, value)
    }
}

// ---------------------------------------------------------------------------
// TransportProtocol / TransportLevel
// ---------------------------------------------------------------------------

/// UICC/terminal interface transport protocols.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Hash, strum::Display, strum::EnumIter)]
pub enum TransportProtocol {
    /// UDP, UICC in client mode, remote connection.
    UdpClientRemote,
    /// TCP, UICC in client mode, remote connection.
    TcpClientRemote,
    /// TCP, UICC in server mode.
    TcpServer,
    /// UDP, UICC in client mode, terminal-local connection.
    UdpClientLocal,
    /// TCP, UICC in client mode, terminal-local connection.
    TcpClientLocal,
}

impl TransportProtocol {
    /// Wire value of the protocol type.
    pub const fn code(self) -> u8 {
        match self {
            Self::UdpClientRemote => 0x01,
            Self::TcpClientRemote => 0x02,
            Self::TcpServer => 0x03,
            Self::UdpClientLocal => 0x04,
            Self::TcpClientLocal => 0x05,
        }
    }

    /// Map a wire value back to a protocol.
    pub const fn from_code(code: u8) -> Option<Self> {
        Some(match code {
            0x01 => Self::UdpClientRemote,
            0x02 => Self::TcpClientRemote,
            0x03 => Self::TcpServer,
            0x04 => Self::UdpClientLocal,
            0x05 => Self::TcpClientLocal,
            _ => return None,
        })
    }

    /// Remote client protocols, which need a bearer and a destination.
    pub const fn is_remote(self) -> bool {
        matches!(self, Self::UdpClientRemote | Self::TcpClientRemote)
    }

    /// Protocols usable without a bearer description.
    pub const fn is_terminal_local(self) -> bool {
        matches!(self, Self::TcpServer | Self::UdpClientLocal | Self::TcpClientLocal)
    }

    /// Returns `true` for the UDP variants.
    pub const fn is_udp(self) -> bool {
        matches!(self, Self::UdpClientRemote | Self::UdpClientLocal)
    }
}

/// Contents of a UICC/TERMINAL INTERFACE TRANSPORT LEVEL object.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
pub struct TransportLevel {
    /// Transport protocol.
    pub protocol: TransportProtocol,
    /// Port number.
    pub port: u16,
}

impl TransportLevel {
    /// Parse the value of a TRANSPORT LEVEL object.
    ///
    /// # Errors
    ///
    /// [`ModelError::TooShort`] for fewer than 3 bytes,
    /// [`ModelError::Unsupported`] for an unknown protocol type.
    pub fn from_tlv(tlv: &ComprehensionTlv) -> Result<Self, ModelError> {
        match tlv.value() {
            [protocol, hi, lo, ..] => {
                let protocol = TransportProtocol::from_code(*protocol).ok_or(ModelError::Unsupported {
                    field: "transport protocol",
                    value: u32::from(*protocol),
                })?;
                Ok(Self {
                    protocol,
                    port: u16::from_be_bytes([*hi, *lo]),
                })
            }
            other => Err(ModelError::TooShort {
                field: "transport level",
                expected: 3,
                actual: other.len(),
            }),
        }
    }
}

// ---------------------------------------------------------------------------
// Other address / buffer size
// ---------------------------------------------------------------------------

/// Address type byte for IPv4 in an OTHER ADDRESS object.
pub const ADDRESS_TYPE_IPV4: u8 = 0x21;

/// Parse an OTHER ADDRESS object as an IPv4 address.
///
/// An empty value (dynamic address requested) yields `Ok(None)`.
///
/// # Errors
///
/// [`ModelError::Unsupported`] for a non-IPv4 address type or an address
/// that is not exactly 4 bytes long.
pub fn ipv4_address(tlv: &ComprehensionTlv) -> Result<Option<Ipv4Addr>, ModelError> {
    match tlv.value() {
        [] => Ok(None),
        [ADDRESS_TYPE_IPV4, a, b, c, d] => Ok(Some(Ipv4Addr::new(*a, *b, *c, *d))),
        [ADDRESS_TYPE_IPV4, rest @ ..] => Err(ModelError::Unsupported {
            field: "IPv4 address length",
            value: u32::try_from(rest.len()).unwrap_or(u32::MAX),
        }),
        [kind, ..] => Err(ModelError::Unsupported {
            field: "address type",
            value: u32::from(*kind),
        }),
    }
}

/// Encode an IPv4 address as an OTHER ADDRESS object.
pub fn ipv4_address_tlv(address: Ipv4Addr) -> ComprehensionTlv {
    let mut value = vec![ADDRESS_TYPE_IPV4];
    value.extend_from_slice(&address.octets());
    ComprehensionTlv::required(TlvTag::OtherAddress, value)
}

/// Parse a BUFFER SIZE object.
///
/// # Errors
///
/// [`ModelError::TooShort`] for fewer than 2 bytes.
pub fn buffer_size(tlv: &ComprehensionTlv) -> Result<u16, ModelError> {
    match tlv.value() {
        [hi, lo, ..] => Ok(u16::from_be_bytes([*hi, *lo])),
        other => Err(ModelError::TooShort {
            field: "buffer size",
            expected: 2,
            actual: other.len(),
        }),
    }
}

/// Encode a BUFFER SIZE object.
pub fn buffer_size_tlv(size: u16) -> ComprehensionTlv {
    ComprehensionTlv::required(TlvTag::BufferSize, size.to_be_bytes().to_vec())
}

#[cfg(test)]
mod tests {
    use super::*;
    use strum::IntoEnumIterator;

    #[test]
    fn bearer_classification() {
        assert!(BearerType::Gprs.is_packet_switched());
        assert!(BearerType::Eutran.is_packet_switched());
        assert!(!BearerType::Default.is_packet_switched());
        assert_eq!(BearerType::from_code(0x01), None);
    }

    #[test]
    fn bearer_description_keeps_parameters() {
        let tlv = ComprehensionTlv::new(0x35, true, vec![0x02, 0x03, 0x04, 0x03, 0x04, 0x1F, 0x02]);
        let desc = BearerDescription::from_tlv(&tlv).unwrap();
        assert_eq!(desc.bearer_type(), Some(BearerType::Gprs));
        assert_eq!(desc.parameters.len(), 6);
        assert_eq!(desc.to_tlv(), tlv);
        assert!(BearerDescription::from_tlv(&ComprehensionTlv::new(0x35, true, vec![])).is_err());
    }

    #[test]
    fn transport_level_parse() {
        let tlv = ComprehensionTlv::new(0x3C, true, vec![0x02, 0x1F, 0x90]);
        let level = TransportLevel::from_tlv(&tlv).unwrap();
        assert_eq!(level.protocol, TransportProtocol::TcpClientRemote);
        assert_eq!(level.port, 8080);

        let unknown = ComprehensionTlv::new(0x3C, true, vec![0x06, 0x00, 0x01]);
        assert!(matches!(TransportLevel::from_tlv(&unknown), Err(ModelError::Unsupported { .. })));
    }

    #[test]
    fn transport_protocol_groups_are_disjoint() {
        for protocol in TransportProtocol::iter() {
            assert_ne!(protocol.is_remote(), protocol.is_terminal_local(), "{protocol}");
        }
    }

    #[test]
    fn ipv4_address_parse() {
        let tlv = ComprehensionTlv::new(0x3E, true, vec![0x21, 10, 0, 0, 1]);
        assert_eq!(ipv4_address(&tlv).unwrap(), Some(Ipv4Addr::new(10, 0, 0, 1)));
        assert_eq!(ipv4_address_tlv(Ipv4Addr::new(10, 0, 0, 1)), tlv);

        let empty = ComprehensionTlv::new(0x3E, true, vec![]);
        assert_eq!(ipv4_address(&empty).unwrap(), None);

        let short = ComprehensionTlv::new(0x3E, true, vec![0x21, 10, 0, 0]);
        assert!(ipv4_address(&short).is_err());

        let v6 = ComprehensionTlv::new(0x3E, true, vec![0x57, 0, 0, 0, 0]);
        assert!(ipv4_address(&v6).is_err());
    }

    #[test]
    fn buffer_size_parse() {
        let tlv = buffer_size_tlv(1400);
        assert_eq!(buffer_size(&tlv).unwrap(), 1400);
        assert!(buffer_size(&ComprehensionTlv::new(0x39, true, vec![0x05])).is_err());
    }
}
