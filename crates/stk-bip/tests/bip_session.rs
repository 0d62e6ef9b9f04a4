//! End-to-end runs of the BIP actor against loopback sockets.

use std::net::{Ipv4Addr, SocketAddr};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use stk_bip::{
    ApnRecord, ApnType, BipConfig, BipHandle, BipService, CardMessage, CardReceiver, ConnectivityEvent,
    DataConnectivity, DataState, EnableResult, NoIcons,
};
use stk_bip_models::tlv::{decode_list, search, unwrap_envelope, wrap_envelope, EVENT_DOWNLOAD_TAG, PROACTIVE_COMMAND_TAG};
use stk_bip_models::{device, open_qualifier, CommandDetails, CommandType, ComprehensionTlv, TlvTag, MAX_CHANNELS};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream, UdpSocket};

const WAIT: Duration = Duration::from_secs(5);

// ─── Fakes ───────────────────────────────────────────────────────────

struct FakeConnectivity {
    state: Mutex<DataState>,
}

impl FakeConnectivity {
    fn new(state: DataState) -> Arc<Self> {
        Arc::new(Self {
            state: Mutex::new(state),
        })
    }
}

impl DataConnectivity for FakeConnectivity {
    fn enable_apn_type(&self, _apn_type: &ApnType) -> EnableResult {
        match *self.state.lock().unwrap() {
            DataState::Connected => EnableResult::AlreadyActive,
            _ => EnableResult::RequestStarted,
        }
    }
    fn disable_apn_type(&self, _apn_type: &ApnType) {}
    fn apn_state(&self, _apn_type: &ApnType) -> DataState {
        *self.state.lock().unwrap()
    }
    fn is_data_allowed(&self) -> bool {
        true
    }
    fn is_voice_call_active(&self) -> bool {
        false
    }
    fn apn_records(&self) -> Vec<ApnRecord> {
        Vec::new()
    }
    fn insert_apn(&self, _record: ApnRecord) {}
}

// ─── Harness ─────────────────────────────────────────────────────────

struct Session {
    handle: BipHandle,
    card: CardReceiver,
}

impl Session {
    fn start(state: DataState) -> Self {
        let (service, handle, card) =
            BipService::new(BipConfig::default(), FakeConnectivity::new(state), Arc::new(NoIcons));
        tokio::spawn(service.run());
        Self { handle, card }
    }

    fn send(&self, raw: Vec<u8>) {
        self.handle.proactive_command(raw).expect("service running");
    }

    async fn next(&mut self) -> CardMessage {
        tokio::time::timeout(WAIT, self.card.recv())
            .await
            .expect("card message in time")
            .expect("service running")
    }

    async fn response(&mut self) -> Vec<ComprehensionTlv> {
        match self.next().await {
            CardMessage::TerminalResponse(bytes) => decode_list(&bytes).expect("well-formed response"),
            CardMessage::EventDownload(bytes) => panic!("expected terminal response, got event {}", hex::encode(bytes)),
        }
    }

    async fn event(&mut self) -> Vec<ComprehensionTlv> {
        match self.next().await {
            CardMessage::EventDownload(bytes) => {
                let body = unwrap_envelope(&bytes, EVENT_DOWNLOAD_TAG).expect("D6 envelope");
                decode_list(body).expect("well-formed event")
            }
            CardMessage::TerminalResponse(bytes) => panic!("expected event, got response {}", hex::encode(bytes)),
        }
    }

    async fn nothing_pending(&mut self) {
        assert!(
            tokio::time::timeout(Duration::from_millis(200), self.card.recv()).await.is_err(),
            "unexpected card message"
        );
    }
}

fn tlv(tag: TlvTag, value: &[u8]) -> ComprehensionTlv {
    ComprehensionTlv::required(tag, value.to_vec())
}

fn command(number: u8, kind: CommandType, qualifier: u8, destination: u8, objects: &[ComprehensionTlv]) -> Vec<u8> {
    let mut body = Vec::new();
    CommandDetails::new(number, kind, qualifier).to_tlv().encode(&mut body).unwrap();
    tlv(TlvTag::DeviceIdentities, &[device::UICC, destination]).encode(&mut body).unwrap();
    for object in objects {
        object.encode(&mut body).unwrap();
    }
    wrap_envelope(PROACTIVE_COMMAND_TAG, &body).unwrap()
}

fn channel(id: u8) -> u8 {
    device::CHANNEL_BASE + id
}

fn value(tlvs: &[ComprehensionTlv], tag: TlvTag) -> Vec<u8> {
    search(tlvs, tag)
        .unwrap_or_else(|| panic!("missing {tag:?}"))
        .value()
        .to_vec()
}

fn result(tlvs: &[ComprehensionTlv]) -> Vec<u8> {
    value(tlvs, TlvTag::Result)
}

fn arm_events() -> Vec<u8> {
    command(1, CommandType::SetUpEventList, 0, device::TERMINAL, &[tlv(TlvTag::EventList, &[0x09, 0x0A])])
}

fn open_udp(number: u8, peer: SocketAddr, buffer: u16) -> Vec<u8> {
    let [hi, lo] = peer.port().to_be_bytes();
    let [b0, b1, b2, b3] = Ipv4Addr::LOCALHOST.octets();
    command(
        number,
        CommandType::OpenChannel,
        open_qualifier::IMMEDIATE_LINK,
        device::TERMINAL,
        &[
            tlv(TlvTag::BearerDescription, &[0x03]),
            tlv(TlvTag::BufferSize, &buffer.to_be_bytes()),
            tlv(TlvTag::TransportLevel, &[0x01, hi, lo]),
            tlv(TlvTag::OtherAddress, &[0x21, b0, b1, b2, b3]),
        ],
    )
}

fn open_tcp(number: u8, peer: SocketAddr, buffer: u16) -> Vec<u8> {
    let [hi, lo] = peer.port().to_be_bytes();
    let [b0, b1, b2, b3] = Ipv4Addr::LOCALHOST.octets();
    command(
        number,
        CommandType::OpenChannel,
        open_qualifier::IMMEDIATE_LINK,
        device::TERMINAL,
        &[
            tlv(TlvTag::BearerDescription, &[0x03]),
            tlv(TlvTag::BufferSize, &buffer.to_be_bytes()),
            tlv(TlvTag::TransportLevel, &[0x02, hi, lo]),
            tlv(TlvTag::OtherAddress, &[0x21, b0, b1, b2, b3]),
        ],
    )
}

fn open_server(number: u8, port: u16, buffer: u16) -> Vec<u8> {
    let [hi, lo] = port.to_be_bytes();
    command(
        number,
        CommandType::OpenChannel,
        open_qualifier::IMMEDIATE_LINK,
        device::TERMINAL,
        &[
            tlv(TlvTag::BufferSize, &buffer.to_be_bytes()),
            tlv(TlvTag::TransportLevel, &[0x03, hi, lo]),
        ],
    )
}

fn send_data(number: u8, id: u8, immediate: bool, data: &[u8]) -> Vec<u8> {
    command(
        number,
        CommandType::SendData,
        u8::from(immediate),
        channel(id),
        &[tlv(TlvTag::ChannelData, data)],
    )
}

fn receive_data(number: u8, id: u8, length: u8) -> Vec<u8> {
    command(
        number,
        CommandType::ReceiveData,
        0,
        channel(id),
        &[tlv(TlvTag::ChannelDataLength, &[length])],
    )
}

fn close(number: u8, id: u8) -> Vec<u8> {
    command(number, CommandType::CloseChannel, 0, channel(id), &[])
}

fn channel_status(number: u8) -> Vec<u8> {
    command(number, CommandType::GetChannelStatus, 0, device::TERMINAL, &[])
}

fn status_words(tlvs: &[ComprehensionTlv]) -> Vec<Vec<u8>> {
    tlvs.iter()
        .filter(|tlv| tlv.is(TlvTag::ChannelStatus))
        .map(|tlv| tlv.value().to_vec())
        .collect()
}

async fn udp_peer() -> (UdpSocket, SocketAddr) {
    let peer = UdpSocket::bind((Ipv4Addr::LOCALHOST, 0)).await.expect("bind peer");
    let addr = peer.local_addr().expect("peer address");
    (peer, addr)
}

fn free_port() -> u16 {
    let listener = std::net::TcpListener::bind((Ipv4Addr::LOCALHOST, 0)).expect("bind scratch listener");
    listener.local_addr().expect("scratch address").port()
}

async fn eventually(mut check: impl FnMut() -> bool) {
    let deadline = tokio::time::Instant::now() + WAIT;
    while !check() {
        assert!(tokio::time::Instant::now() < deadline, "condition never held");
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}

// ─── Tests ───────────────────────────────────────────────────────────

#[tokio::test]
async fn fresh_session_reports_seven_empty_channels() {
    let mut session = Session::start(DataState::Connected);
    session.send(channel_status(4));

    let response = session.response().await;
    assert_eq!(value(&response, TlvTag::CommandDetails), [4, 0x44, 0]);
    assert_eq!(result(&response), [0x00]);
    assert_eq!(status_words(&response), vec![vec![0, 0]; MAX_CHANNELS]);
    assert!(session.handle.channel_available());
}

#[tokio::test]
async fn udp_channel_round_trip() {
    let mut session = Session::start(DataState::Connected);
    let (peer, peer_addr) = udp_peer().await;

    session.send(arm_events());
    assert_eq!(result(&session.response().await), [0x00]);

    session.send(open_udp(2, peer_addr, 256));
    let response = session.response().await;
    assert_eq!(result(&response), [0x00]);
    assert_eq!(status_words(&response), [[0x81, 0x00]]);
    assert_eq!(value(&response, TlvTag::BearerDescription), [0x03]);
    assert_eq!(value(&response, TlvTag::BufferSize), [0x01, 0x00]);

    // 300 bytes into a 256-byte buffer: the excess is dropped silently.
    session.send(send_data(3, 1, true, &[0x5A; 300]));
    let response = session.response().await;
    assert_eq!(result(&response), [0x00]);
    assert_eq!(value(&response, TlvTag::ChannelDataLength), [0x00]);

    let mut buf = [0u8; 512];
    let (n, channel_addr) = tokio::time::timeout(WAIT, peer.recv_from(&mut buf))
        .await
        .expect("datagram in time")
        .expect("recv");
    assert_eq!(n, 256);

    peer.send_to(b"hello", channel_addr).await.expect("send");
    let event = session.event().await;
    assert_eq!(value(&event, TlvTag::EventList), [0x09]);
    assert_eq!(value(&event, TlvTag::ChannelStatus), [0x81, 0x00]);
    assert_eq!(value(&event, TlvTag::ChannelDataLength), [5]);

    session.send(receive_data(4, 1, 10));
    let response = session.response().await;
    assert_eq!(result(&response), [0x02]);
    assert_eq!(value(&response, TlvTag::ChannelData), b"hello");
    assert_eq!(value(&response, TlvTag::ChannelDataLength), [0]);

    session.send(close(5, 1));
    assert_eq!(result(&session.response().await), [0x00]);
    session.send(channel_status(6));
    assert_eq!(status_words(&session.response().await), vec![vec![0, 0]; MAX_CHANNELS]);
}

#[tokio::test]
async fn buffered_send_reports_free_space() {
    let mut session = Session::start(DataState::Connected);
    let (_peer, peer_addr) = udp_peer().await;

    session.send(open_udp(1, peer_addr, 100));
    assert_eq!(result(&session.response().await), [0x00]);

    session.send(send_data(2, 1, false, &[1; 40]));
    let response = session.response().await;
    assert_eq!(result(&response), [0x00]);
    assert_eq!(value(&response, TlvTag::ChannelDataLength), [60]);
}

#[tokio::test]
async fn events_are_suppressed_until_armed() {
    let mut session = Session::start(DataState::Connected);
    let (peer, peer_addr) = udp_peer().await;

    session.send(open_udp(1, peer_addr, 256));
    assert_eq!(result(&session.response().await), [0x00]);
    session.send(send_data(2, 1, true, b"hi"));
    assert_eq!(result(&session.response().await), [0x00]);

    let mut buf = [0u8; 16];
    let (_, channel_addr) = peer.recv_from(&mut buf).await.expect("recv");
    peer.send_to(b"hello", channel_addr).await.expect("send");
    tokio::time::sleep(Duration::from_millis(200)).await;

    session.send(receive_data(3, 1, 5));
    let response = session.response().await;
    assert_eq!(result(&response), [0x00]);
    assert_eq!(value(&response, TlvTag::ChannelData), b"hello");
}

#[tokio::test]
async fn large_receive_is_clamped_to_one_apdu() {
    let mut session = Session::start(DataState::Connected);
    let (peer, peer_addr) = udp_peer().await;

    session.send(open_udp(1, peer_addr, 1000));
    assert_eq!(result(&session.response().await), [0x00]);
    session.send(send_data(2, 1, true, b"hi"));
    assert_eq!(result(&session.response().await), [0x00]);

    let mut buf = [0u8; 16];
    let (_, channel_addr) = peer.recv_from(&mut buf).await.expect("recv");
    peer.send_to(&[0xA5; 300], channel_addr).await.expect("send");
    tokio::time::sleep(Duration::from_millis(200)).await;

    session.send(receive_data(3, 1, 0xFF));
    let response = session.response().await;
    assert_eq!(result(&response), [0x07]);
    assert_eq!(value(&response, TlvTag::ChannelData).len(), 0xEC);
    assert_eq!(value(&response, TlvTag::ChannelDataLength), [64]);

    session.send(receive_data(4, 1, 64));
    let response = session.response().await;
    assert_eq!(result(&response), [0x00]);
    assert_eq!(value(&response, TlvTag::ChannelData).len(), 64);
    assert_eq!(value(&response, TlvTag::ChannelDataLength), [0]);
}

#[tokio::test]
async fn eighth_channel_is_refused() {
    let mut session = Session::start(DataState::Connected);
    let (_peer, peer_addr) = udp_peer().await;

    for number in 1..=7 {
        session.send(open_udp(number, peer_addr, 64));
        assert_eq!(result(&session.response().await), [0x00]);
    }
    eventually(|| !session.handle.channel_available()).await;

    session.send(open_udp(8, peer_addr, 64));
    let response = session.response().await;
    assert_eq!(result(&response), [0x3A, 0x01]);
    assert_eq!(value(&response, TlvTag::BufferSize), [0x00, 0x40]);

    session.send(close(9, 4));
    assert_eq!(result(&session.response().await), [0x00]);
    eventually(|| session.handle.channel_available()).await;
}

#[tokio::test]
async fn commands_on_unknown_channels_fail() {
    let mut session = Session::start(DataState::Connected);

    session.send(close(1, 3));
    assert_eq!(result(&session.response().await), [0x3A, 0x03]);

    session.send(receive_data(2, 5, 10));
    assert_eq!(result(&session.response().await), [0x3A, 0x03]);

    session.send(send_data(3, 7, true, b"x"));
    assert_eq!(result(&session.response().await), [0x3A, 0x03]);
}

#[tokio::test]
async fn malformed_open_channel_commands() {
    let mut session = Session::start(DataState::Connected);

    // Packet-switched bearer with no transport level.
    session.send(command(
        1,
        CommandType::OpenChannel,
        open_qualifier::IMMEDIATE_LINK,
        device::TERMINAL,
        &[tlv(TlvTag::BearerDescription, &[0x02]), tlv(TlvTag::BufferSize, &[0x01, 0x00])],
    ));
    assert_eq!(result(&session.response().await), [0x32]);

    // Neither bearer nor transport level.
    session.send(command(
        2,
        CommandType::OpenChannel,
        0,
        device::TERMINAL,
        &[tlv(TlvTag::BufferSize, &[0x01, 0x00])],
    ));
    assert_eq!(result(&session.response().await), [0x36]);

    // Unknown command type is echoed back.
    let mut body = Vec::new();
    tlv(TlvTag::CommandDetails, &[3, 0x7F, 0]).encode(&mut body).unwrap();
    tlv(TlvTag::DeviceIdentities, &[device::UICC, device::TERMINAL]).encode(&mut body).unwrap();
    session.send(wrap_envelope(PROACTIVE_COMMAND_TAG, &body).unwrap());
    let response = session.response().await;
    assert_eq!(value(&response, TlvTag::CommandDetails), [3, 0x7F, 0]);
    assert_eq!(result(&response), [0x31]);
}

#[tokio::test]
async fn icon_failure_is_reported() {
    let mut session = Session::start(DataState::Connected);
    session.send(command(
        1,
        CommandType::SetUpEventList,
        0,
        device::TERMINAL,
        &[tlv(TlvTag::EventList, &[0x09]), tlv(TlvTag::IconId, &[0x01, 0x02])],
    ));
    assert_eq!(result(&session.response().await), [0x04]);
}

#[tokio::test]
async fn open_waits_for_default_bearer() {
    let mut session = Session::start(DataState::Connecting);
    let (_peer, peer_addr) = udp_peer().await;

    session.send(open_udp(1, peer_addr, 256));
    session.nothing_pending().await;

    session
        .handle
        .connectivity_changed(ConnectivityEvent {
            apn_type: ApnType::default_type(),
            state: DataState::Connected,
            is_failover: false,
        })
        .expect("service running");
    let response = session.response().await;
    assert_eq!(value(&response, TlvTag::CommandDetails), [1, 0x40, 0x01]);
    assert_eq!(result(&response), [0x00]);
}

#[tokio::test]
async fn default_bearer_that_never_comes_up() {
    let mut session = Session::start(DataState::Connecting);
    let (_peer, peer_addr) = udp_peer().await;

    session.send(open_udp(1, peer_addr, 256));
    session
        .handle
        .connectivity_changed(ConnectivityEvent {
            apn_type: ApnType::default_type(),
            state: DataState::Disconnected,
            is_failover: false,
        })
        .expect("service running");
    assert_eq!(result(&session.response().await), [0x21, 0x00]);
    eventually(|| session.handle.channel_available()).await;
}

#[tokio::test]
async fn session_end_abandons_pending_open() {
    let mut session = Session::start(DataState::Connecting);
    let (_peer, peer_addr) = udp_peer().await;

    session.send(open_udp(1, peer_addr, 256));
    session.handle.session_end().expect("service running");
    session.send(channel_status(2));

    let response = session.response().await;
    assert_eq!(value(&response, TlvTag::CommandDetails), [2, 0x44, 0]);
    assert_eq!(status_words(&response), vec![vec![0, 0]; MAX_CHANNELS]);
}

#[tokio::test]
async fn client_channels_survive_session_end() {
    let mut session = Session::start(DataState::Connected);
    let (_peer, peer_addr) = udp_peer().await;

    session.send(open_udp(1, peer_addr, 256));
    assert_eq!(result(&session.response().await), [0x00]);

    session.handle.session_end().expect("service running");
    session.send(channel_status(2));
    assert_eq!(status_words(&session.response().await)[0], [0x81, 0x00]);

    session.handle.card_removed().expect("service running");
    session.send(channel_status(3));
    assert_eq!(status_words(&session.response().await), vec![vec![0, 0]; MAX_CHANNELS]);
}

#[tokio::test]
async fn tcp_client_exchanges_data_until_peer_closes() {
    let mut session = Session::start(DataState::Connected);
    let listener = TcpListener::bind((Ipv4Addr::LOCALHOST, 0)).await.expect("bind peer");
    let peer_addr = listener.local_addr().expect("peer address");

    session.send(arm_events());
    assert_eq!(result(&session.response().await), [0x00]);

    session.send(open_tcp(2, peer_addr, 512));
    let response = session.response().await;
    assert_eq!(value(&response, TlvTag::CommandDetails), [2, 0x40, 0x01]);
    assert_eq!(result(&response), [0x00]);
    assert_eq!(status_words(&response), [[0x81, 0x00]]);
    assert_eq!(value(&response, TlvTag::BufferSize), [0x02, 0x00]);
    let (mut peer, _) = tokio::time::timeout(WAIT, listener.accept())
        .await
        .expect("connection in time")
        .expect("accept");

    session.send(send_data(3, 1, true, b"hello"));
    let response = session.response().await;
    assert_eq!(result(&response), [0x00]);
    let mut buf = [0u8; 5];
    tokio::time::timeout(WAIT, peer.read_exact(&mut buf))
        .await
        .expect("data in time")
        .expect("read");
    assert_eq!(&buf, b"hello");

    peer.write_all(b"bye").await.expect("write");
    drop(peer);
    let event = session.event().await;
    assert_eq!(value(&event, TlvTag::EventList), [0x09]);
    assert_eq!(value(&event, TlvTag::ChannelDataLength), [3]);

    // Buffered bytes are still delivered after the peer has gone.
    session.send(receive_data(4, 1, 3));
    let response = session.response().await;
    assert_eq!(result(&response), [0x00]);
    assert_eq!(value(&response, TlvTag::ChannelData), b"bye");

    let event = session.event().await;
    assert_eq!(value(&event, TlvTag::EventList), [0x0A]);
    assert_eq!(value(&event, TlvTag::ChannelStatus), [0x01, 0x05]);

    session.send(receive_data(5, 1, 3));
    assert_eq!(result(&session.response().await), [0x3A, 0x02]);
    session.send(send_data(6, 1, true, b"late"));
    assert_eq!(result(&session.response().await), [0x3A, 0x02]);

    session.send(close(7, 1));
    assert_eq!(result(&session.response().await), [0x00]);
    session.send(channel_status(8));
    assert_eq!(status_words(&session.response().await), vec![vec![0, 0]; MAX_CHANNELS]);
}

#[tokio::test]
async fn tcp_client_connect_refused() {
    let mut session = Session::start(DataState::Connected);
    let peer_addr = SocketAddr::from((Ipv4Addr::LOCALHOST, free_port()));

    session.send(open_tcp(1, peer_addr, 256));
    let response = session.response().await;
    assert_eq!(result(&response), [0x3A, 0x07]);
    assert!(status_words(&response).is_empty());
    assert_eq!(value(&response, TlvTag::BearerDescription), [0x03]);
    assert_eq!(value(&response, TlvTag::BufferSize), [0x01, 0x00]);

    session.send(channel_status(2));
    assert_eq!(status_words(&session.response().await), vec![vec![0, 0]; MAX_CHANNELS]);
}

#[tokio::test]
async fn zero_buffer_size_open_is_refused() {
    let mut session = Session::start(DataState::Connected);
    let (_peer, peer_addr) = udp_peer().await;

    session.send(open_udp(1, peer_addr, 0));
    let response = session.response().await;
    assert_eq!(result(&response), [0x3A, 0x04]);
    assert_eq!(value(&response, TlvTag::BufferSize), [0x00, 0x00]);
    assert!(session.handle.channel_available());

    session.send(channel_status(2));
    assert_eq!(status_words(&session.response().await), vec![vec![0, 0]; MAX_CHANNELS]);
}

#[tokio::test]
async fn tcp_server_serves_one_client_at_a_time() {
    let mut session = Session::start(DataState::Connected);
    let port = free_port();

    session.send(arm_events());
    assert_eq!(result(&session.response().await), [0x00]);

    session.send(open_server(2, port, 1000));
    let response = session.response().await;
    assert_eq!(result(&response), [0x00]);
    assert_eq!(status_words(&response), [[0x41, 0x00]]);

    let mut client = TcpStream::connect((Ipv4Addr::LOCALHOST, port)).await.expect("connect");
    let event = session.event().await;
    assert_eq!(value(&event, TlvTag::EventList), [0x0A]);
    assert_eq!(value(&event, TlvTag::ChannelStatus), [0x81, 0x00]);

    client.write_all(b"ping").await.expect("write");
    let event = session.event().await;
    assert_eq!(value(&event, TlvTag::EventList), [0x09]);
    assert_eq!(value(&event, TlvTag::ChannelDataLength), [4]);

    session.send(receive_data(3, 1, 4));
    let response = session.response().await;
    assert_eq!(result(&response), [0x00]);
    assert_eq!(value(&response, TlvTag::ChannelData), b"ping");

    session.send(send_data(4, 1, true, b"pong"));
    let response = session.response().await;
    assert_eq!(result(&response), [0x00]);
    assert_eq!(value(&response, TlvTag::ChannelDataLength), [0xFF]);

    let mut buf = [0u8; 4];
    tokio::time::timeout(WAIT, client.read_exact(&mut buf))
        .await
        .expect("reply in time")
        .expect("read");
    assert_eq!(&buf, b"pong");

    drop(client);
    let event = session.event().await;
    assert_eq!(value(&event, TlvTag::EventList), [0x0A]);
    assert_eq!(value(&event, TlvTag::ChannelStatus), [0x41, 0x00]);

    // Server channels do not outlive the session.
    session.handle.session_end().expect("service running");
    session.send(channel_status(5));
    assert_eq!(status_words(&session.response().await), vec![vec![0, 0]; MAX_CHANNELS]);
}

#[tokio::test]
async fn close_keep_listening_drops_only_the_client() {
    let mut session = Session::start(DataState::Connected);
    let port = free_port();

    session.send(open_server(1, port, 256));
    assert_eq!(result(&session.response().await), [0x00]);

    let mut client = TcpStream::connect((Ipv4Addr::LOCALHOST, port)).await.expect("connect");
    eventually_status(&mut session, [0x81, 0x00]).await;

    session.send(command(2, CommandType::CloseChannel, 0x01, channel(1), &[]));
    assert_eq!(result(&session.response().await), [0x00]);
    session.send(channel_status(3));
    assert_eq!(status_words(&session.response().await)[0], [0x41, 0x00]);

    let mut buf = [0u8; 1];
    let read = tokio::time::timeout(WAIT, client.read(&mut buf)).await.expect("eof in time");
    assert!(matches!(read, Ok(0) | Err(_)));
}

/// Poll GET CHANNEL STATUS until channel 1 reports `expected`.
async fn eventually_status(session: &mut Session, expected: [u8; 2]) {
    let deadline = tokio::time::Instant::now() + WAIT;
    let mut number = 100;
    loop {
        session.send(channel_status(number));
        if status_words(&session.response().await)[0] == expected {
            return;
        }
        assert!(tokio::time::Instant::now() < deadline, "channel never reached {expected:?}");
        number = number.wrapping_add(1);
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}
