//! Typed parameters extracted from proactive commands.

use std::net::{Ipv4Addr, SocketAddr, SocketAddrV4};

use serde::{Deserialize, Serialize};
use stk_bip_models::{open_qualifier, BearerDescription, BipEvent, CommandDetails, TransportProtocol};

use crate::telephony::IconImage;

/// Reference to an icon in `EF(IMG)`.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
pub struct IconRef {
    /// Record number.
    pub record: u8,
}

/// Everything needed to open one channel.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct ChannelSettings {
    /// Slot number, assigned when the channel is allocated.
    pub channel_id: Option<u8>,
    /// Transport protocol.
    pub protocol: TransportProtocol,
    /// Listening port (server) or destination port (clients).
    pub port: u16,
    /// Requested, then negotiated, buffer size.
    pub buffer_size: u16,
    /// Remote address for remote client channels.
    pub destination: Option<Ipv4Addr>,
    /// Local address to bind, if the card named one.
    pub local_address: Option<Ipv4Addr>,
    /// Bearer description; `None` for terminal-local channels.
    pub bearer: Option<BearerDescription>,
    /// Access point name in dotted form.
    pub network_access_name: Option<String>,
    /// User login.
    pub user_login: Option<String>,
    /// User password.
    pub user_password: Option<String>,
}

impl ChannelSettings {
    /// Address the socket should connect to.
    ///
    /// Terminal-local clients fall back to loopback. Remote clients have
    /// no target without a destination address.
    pub fn remote_target(&self) -> Option<SocketAddr> {
        let ip = match (self.destination, self.protocol.is_remote()) {
            (Some(ip), _) => ip,
            (None, false) => Ipv4Addr::LOCALHOST,
            (None, true) => return None,
        };
        Some(SocketAddr::V4(SocketAddrV4::new(ip, self.port)))
    }

    /// Address the socket should bind to.
    pub fn bind_address(&self, port: u16) -> SocketAddr {
        let ip = self.local_address.unwrap_or(Ipv4Addr::UNSPECIFIED);
        SocketAddr::V4(SocketAddrV4::new(ip, port))
    }
}

/// Parameters of one SEND DATA or RECEIVE DATA command.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct DataSettings {
    /// Target channel; `0` when the device identities named no channel.
    pub channel_id: u8,
    /// Requested length (RECEIVE DATA) or payload length (SEND DATA).
    pub length: usize,
    /// Payload (SEND DATA only).
    pub data: Vec<u8>,
}

/// Command-specific parameters.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub enum CommandParams {
    /// SET UP EVENT LIST: the events the card wants to hear about.
    SetUpEventList {
        /// Raw event codes; unknown codes are kept so the list can be echoed.
        events: Vec<u8>,
    },
    /// OPEN CHANNEL.
    OpenChannel(ChannelSettings),
    /// CLOSE CHANNEL.
    CloseChannel {
        /// Target channel; `0` when the device identities named no channel.
        channel_id: u8,
    },
    /// RECEIVE DATA.
    ReceiveData(DataSettings),
    /// SEND DATA.
    SendData(DataSettings),
    /// GET CHANNEL STATUS.
    GetChannelStatus,
}

impl CommandParams {
    /// Event codes from a SET UP EVENT LIST that this subsystem raises.
    pub fn bip_events(events: &[u8]) -> Vec<BipEvent> {
        events.iter().filter_map(|code| BipEvent::from_code(*code)).collect()
    }
}

/// A fully decoded proactive command.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct DecodedCommand {
    /// Command details, echoed in the terminal response.
    pub details: CommandDetails,
    /// Alpha identifier shown to the user, if any.
    pub alpha_id: Option<String>,
    /// Icon shown to the user, if any.
    pub icon: Option<IconRef>,
    /// Icon images, once loaded.
    pub icons: Vec<IconImage>,
    /// The icon load failed; an OK result becomes "icon not displayed".
    pub icon_load_failed: bool,
    /// Command-specific parameters.
    pub params: CommandParams,
}

impl DecodedCommand {
    /// OPEN CHANNEL qualifier: establish the link immediately.
    pub fn immediate_link(&self) -> bool {
        self.details.qualifier_bit(open_qualifier::IMMEDIATE_LINK)
    }

    /// OPEN CHANNEL qualifier: reconnect automatically.
    pub fn automatic_reconnect(&self) -> bool {
        self.details.qualifier_bit(open_qualifier::AUTOMATIC_RECONNECT)
    }

    /// OPEN CHANNEL qualifier: background mode.
    pub fn background_mode(&self) -> bool {
        self.details.qualifier_bit(open_qualifier::BACKGROUND_MODE)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn settings(protocol: TransportProtocol, destination: Option<Ipv4Addr>) -> ChannelSettings {
        ChannelSettings {
            channel_id: None,
            protocol,
            port: 4000,
            buffer_size: 256,
            destination,
            local_address: None,
            bearer: None,
            network_access_name: None,
            user_login: None,
            user_password: None,
        }
    }

    #[test]
    fn local_clients_fall_back_to_loopback() {
        let local = settings(TransportProtocol::TcpClientLocal, None);
        assert_eq!(local.remote_target(), Some("127.0.0.1:4000".parse().unwrap()));

        let remote = settings(TransportProtocol::TcpClientRemote, None);
        assert_eq!(remote.remote_target(), None);

        let remote = settings(TransportProtocol::UdpClientRemote, Some(Ipv4Addr::new(10, 0, 0, 1)));
        assert_eq!(remote.remote_target(), Some("10.0.0.1:4000".parse().unwrap()));
    }

    #[test]
    fn bind_uses_local_address() {
        let mut s = settings(TransportProtocol::TcpServer, None);
        assert_eq!(s.bind_address(4000), "0.0.0.0:4000".parse().unwrap());
        s.local_address = Some(Ipv4Addr::LOCALHOST);
        assert_eq!(s.bind_address(0), "127.0.0.1:0".parse().unwrap());
    }

    #[test]
    fn unknown_event_codes_are_skipped() {
        assert_eq!(
            CommandParams::bip_events(&[0x00, 0x09, 0x0A, 0x05]),
            vec![BipEvent::DataAvailable, BipEvent::ChannelStatus]
        );
    }
}
