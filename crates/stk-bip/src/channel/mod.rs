//! Data channels.
//!
//! A channel is one of three variants sharing the [`BipChannel`]
//! capability set. [`Channel`] is the tagged union the channel manager
//! stores; it forwards every call to the variant by `match`.
//!
//! Socket I/O never runs on the actor. Opening a channel spawns one task
//! that owns the socket. The task reports back through [`IoEnvelope`]s and
//! takes orders through an unbounded command queue. After delivering a
//! chunk of received data the task stops reading until the actor has
//! drained the receive buffer and sends [`IoCommand::Resume`].

pub mod buffer;
mod tcp_client;
mod tcp_server;
mod udp_client;

use std::future::Future;
use std::net::SocketAddr;
use std::time::Duration;

use bytes::Bytes;
use stk_bip_models::{BipCause, ChannelStatus, LinkState, ResultCode, TransportProtocol};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

pub use tcp_client::TcpClientChannel;
pub use tcp_server::TcpServerChannel;
pub use udp_client::UdpClientChannel;

use crate::params::ChannelSettings;
use buffer::{RxBuffer, TxBuffer};

/// Most bytes one RECEIVE DATA response can carry.
pub const MAX_RECEIVE_CHUNK: usize = 0xEC;

/// How many bytes RECEIVE DATA returns and with which result.
///
/// The request is first capped at [`MAX_RECEIVE_CHUNK`] ("modified"),
/// then at what is buffered ("missing information", which wins).
pub fn plan_receive(requested: usize, available: usize) -> (usize, ResultCode) {
    let mut length = requested;
    let mut result = ResultCode::Ok;
    if length > MAX_RECEIVE_CHUNK {
        length = MAX_RECEIVE_CHUNK;
        result = ResultCode::Modified;
    }
    if length > available {
        length = available;
        result = ResultCode::MissingInformation;
    }
    (length, result)
}

/// Clamp a requested buffer size. Returns the size and whether it changed.
pub fn negotiate_buffer_size(requested: u16, max: u16) -> (u16, bool) {
    if requested > max {
        (max, true)
    } else {
        (requested, false)
    }
}

// ---------------------------------------------------------------------------
// I/O task plumbing
// ---------------------------------------------------------------------------

/// Order from the actor to a channel's socket task.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IoCommand {
    /// Write these bytes and report [`IoEvent::Sent`].
    Write(Bytes),
    /// The receive buffer was drained; read again.
    Resume,
    /// TCP server: drop the accepted client and listen again.
    DropClient,
}

/// Report from a channel's socket task.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IoEvent {
    /// Client connected, or server listening.
    Ready,
    /// Connect or bind failed. The task has ended.
    OpenFailed(String),
    /// TCP server accepted a client.
    Accepted(SocketAddr),
    /// TCP server lost its client and is listening again.
    ClientLost(String),
    /// Bytes read from the socket. Reading pauses until [`IoCommand::Resume`].
    Data(Vec<u8>),
    /// Outcome of an [`IoCommand::Write`].
    Sent(Result<usize, String>),
    /// Client read failed or the peer closed. The task has ended.
    ReadFailed(String),
}

/// An [`IoEvent`] tagged with the channel it came from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IoEnvelope {
    /// Channel slot.
    pub channel_id: u8,
    /// Generation of the channel object; stale events are dropped.
    pub generation: u64,
    /// The event.
    pub event: IoEvent,
}

/// What a channel needs from the runtime to start its socket task.
#[derive(Debug, Clone)]
pub struct IoContext {
    /// Where socket tasks report.
    pub events: mpsc::UnboundedSender<IoEnvelope>,
    /// Bound on TCP connects.
    pub connect_timeout: Duration,
}

/// Sending half handed to a socket task.
#[derive(Debug, Clone)]
pub(crate) struct IoSender {
    channel_id: u8,
    generation: u64,
    events: mpsc::UnboundedSender<IoEnvelope>,
}

impl IoSender {
    pub(crate) fn channel_id(&self) -> u8 {
        self.channel_id
    }

    /// Returns `false` once the actor has gone away.
    pub(crate) fn send(&self, event: IoEvent) -> bool {
        self.events
            .send(IoEnvelope {
                channel_id: self.channel_id,
                generation: self.generation,
                event,
            })
            .is_ok()
    }
}

#[derive(Debug)]
struct IoHandle {
    commands: mpsc::UnboundedSender<IoCommand>,
    task: JoinHandle<()>,
}

impl Drop for IoHandle {
    fn drop(&mut self) {
        self.task.abort();
    }
}

// ---------------------------------------------------------------------------
// Outcomes
// ---------------------------------------------------------------------------

/// Result of [`BipChannel::send`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SendOutcome {
    /// Data buffered; respond now.
    Buffered {
        /// Free transmit space after the append.
        free_space: usize,
    },
    /// Data handed to the socket task; respond on [`IoEvent::Sent`].
    Flushing {
        /// Free transmit space after the append, before the flush.
        free_space: usize,
    },
    /// No link to send on.
    Closed,
}

/// Result of [`BipChannel::receive`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReceiveOutcome {
    /// Data for the card.
    Data {
        /// Ok, modified or missing information.
        result: ResultCode,
        /// Bytes handed over.
        data: Vec<u8>,
        /// Bytes still buffered.
        remaining: usize,
    },
    /// Nothing buffered and no link.
    Closed,
}

/// Result of [`BipChannel::close`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CloseOutcome {
    /// The channel is gone; free its slot.
    Released,
    /// TCP server still listening; keep the slot.
    Listening,
}

/// Result of [`BipChannel::on_session_end`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionEndOutcome {
    /// The channel survives the session.
    Keep,
    /// Free the slot.
    Release,
}

/// What the manager should do after [`BipChannel::on_io_event`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelNotice {
    /// Open finished; answer the pending OPEN CHANNEL.
    Opened(ChannelStatus),
    /// Open failed; free the slot and answer with this cause.
    OpenFailed(BipCause),
    /// Flush finished; answer the pending SEND DATA.
    Sent,
    /// Flush failed; free the slot and answer with a BIP error.
    SendFailed,
    /// Data landed in an empty receive buffer.
    DataAvailable {
        /// Current status.
        status: ChannelStatus,
        /// Bytes buffered.
        available: usize,
    },
    /// The link changed state on its own.
    StatusChanged(ChannelStatus),
    /// Nothing to report.
    Ignored,
}

/// Operations every channel variant supports.
pub trait BipChannel {
    /// Start the socket task. Completion arrives as [`IoEvent::Ready`] or
    /// [`IoEvent::OpenFailed`].
    ///
    /// # Errors
    ///
    /// The BIP cause to report when the channel cannot even start.
    fn open(&mut self, io: &IoContext) -> Result<(), BipCause>;

    /// Close the link (or, for a server with `keep_listening`, just the client).
    fn close(&mut self, keep_listening: bool) -> CloseOutcome;

    /// Queue `data`, flushing when `immediate` is set.
    fn send(&mut self, data: &[u8], immediate: bool) -> SendOutcome;

    /// Hand up to `requested` buffered bytes to the card.
    fn receive(&mut self, requested: usize) -> ReceiveOutcome;

    /// Current status word.
    fn status(&self) -> ChannelStatus;

    /// The proactive session ended.
    fn on_session_end(&mut self) -> SessionEndOutcome;

    /// Apply a report from the socket task.
    fn on_io_event(&mut self, event: IoEvent) -> ChannelNotice;
}

// ---------------------------------------------------------------------------
// Shared channel state
// ---------------------------------------------------------------------------

/// State shared by all variants: buffers, link state and the socket task.
#[derive(Debug)]
pub struct ChannelCore {
    id: u8,
    generation: u64,
    settings: ChannelSettings,
    state: LinkState,
    dropped: bool,
    rx: RxBuffer,
    tx: TxBuffer,
    io: Option<IoHandle>,
    reader_paused: bool,
}

impl ChannelCore {
    /// A closed channel with buffers of the (already negotiated) size.
    pub fn new(id: u8, generation: u64, settings: ChannelSettings) -> Self {
        let capacity = usize::from(settings.buffer_size);
        Self {
            id,
            generation,
            settings,
            state: LinkState::Closed,
            dropped: false,
            rx: RxBuffer::new(capacity),
            tx: TxBuffer::new(capacity),
            io: None,
            reader_paused: false,
        }
    }

    /// Negotiated buffer size in bytes.
    pub fn capacity(&self) -> usize {
        usize::from(self.settings.buffer_size)
    }

    fn status(&self) -> ChannelStatus {
        let status = ChannelStatus::new(self.id, self.state);
        if self.dropped {
            status.dropped()
        } else {
            status
        }
    }

    fn spawn<F, Fut>(&mut self, io: &IoContext, task: F)
    where
        F: FnOnce(IoSender, mpsc::UnboundedReceiver<IoCommand>) -> Fut,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let (commands, receiver) = mpsc::unbounded_channel();
        let sender = IoSender {
            channel_id: self.id,
            generation: self.generation,
            events: io.events.clone(),
        };
        let task = tokio::spawn(task(sender, receiver));
        self.io = Some(IoHandle { commands, task });
    }

    fn command(&self, command: IoCommand) -> bool {
        self.io
            .as_ref()
            .is_some_and(|io| io.commands.send(command).is_ok())
    }

    fn shutdown(&mut self) {
        self.io = None;
        self.rx.reset();
        self.tx.reset();
        self.state = LinkState::Closed;
        self.reader_paused = false;
    }

    fn drop_link(&mut self) {
        self.shutdown();
        self.dropped = true;
    }

    fn send(&mut self, data: &[u8], immediate: bool) -> SendOutcome {
        if self.state != LinkState::Established || self.io.is_none() {
            return SendOutcome::Closed;
        }
        let accepted = self.tx.append(data);
        if accepted < data.len() {
            debug!(channel_id = self.id, dropped = data.len() - accepted, "transmit buffer full; truncating");
        }
        let free_space = self.tx.free_space();
        if !immediate {
            return SendOutcome::Buffered { free_space };
        }
        let bytes = self.tx.take();
        if self.command(IoCommand::Write(bytes)) {
            SendOutcome::Flushing { free_space }
        } else {
            SendOutcome::Closed
        }
    }

    fn receive(&mut self, requested: usize) -> ReceiveOutcome {
        if self.rx.is_empty() && self.state != LinkState::Established {
            return ReceiveOutcome::Closed;
        }
        let (length, result) = plan_receive(requested, self.rx.available());
        let data = self.rx.read(length).to_vec();
        self.resume_reader();
        ReceiveOutcome::Data {
            result,
            data,
            remaining: self.rx.available(),
        }
    }

    fn resume_reader(&mut self) {
        if self.reader_paused && self.rx.is_empty() && self.command(IoCommand::Resume) {
            self.reader_paused = false;
        }
    }

    fn store(&mut self, data: &[u8]) -> ChannelNotice {
        let was_empty = self.rx.is_empty();
        let stored = self.rx.store(data);
        if stored < data.len() {
            warn!(channel_id = self.id, lost = data.len() - stored, "receive buffer overflow");
        }
        self.reader_paused = true;
        if was_empty && stored > 0 {
            ChannelNotice::DataAvailable {
                status: self.status(),
                available: self.rx.available(),
            }
        } else {
            if stored == 0 {
                self.resume_reader();
            }
            ChannelNotice::Ignored
        }
    }

    /// Socket-task events handled the same way by both client variants.
    fn client_io_event(&mut self, event: IoEvent) -> ChannelNotice {
        match event {
            IoEvent::Ready => {
                self.state = LinkState::Established;
                self.dropped = false;
                ChannelNotice::Opened(self.status())
            }
            IoEvent::OpenFailed(reason) => {
                warn!(channel_id = self.id, %reason, "channel open failed");
                self.shutdown();
                ChannelNotice::OpenFailed(BipCause::RemoteDeviceNotReachable)
            }
            IoEvent::Data(data) => self.store(&data),
            IoEvent::Sent(Ok(written)) => {
                debug!(channel_id = self.id, written, "flushed");
                ChannelNotice::Sent
            }
            IoEvent::Sent(Err(reason)) => {
                warn!(channel_id = self.id, %reason, "send failed");
                self.shutdown();
                ChannelNotice::SendFailed
            }
            IoEvent::ReadFailed(reason) => {
                warn!(channel_id = self.id, %reason, "link dropped");
                self.drop_link();
                ChannelNotice::StatusChanged(self.status())
            }
            IoEvent::Accepted(_) | IoEvent::ClientLost(_) => ChannelNotice::Ignored,
        }
    }

    /// Client channels outlive the session; restart a paused reader.
    fn client_session_end(&mut self) -> SessionEndOutcome {
        self.resume_reader();
        SessionEndOutcome::Keep
    }
}

// ---------------------------------------------------------------------------
// Channel
// ---------------------------------------------------------------------------

/// A channel of any variant.
#[derive(Debug)]
pub enum Channel {
    /// TCP server in UICC server mode.
    TcpServer(TcpServerChannel),
    /// TCP client, remote or terminal-local.
    TcpClient(TcpClientChannel),
    /// UDP client, remote or terminal-local.
    UdpClient(UdpClientChannel),
}

impl Channel {
    /// Instantiate the variant matching `settings.protocol`.
    pub fn new(id: u8, generation: u64, settings: ChannelSettings) -> Self {
        let protocol = settings.protocol;
        let core = ChannelCore::new(id, generation, settings);
        match protocol {
            TransportProtocol::TcpServer => Self::TcpServer(TcpServerChannel::new(core)),
            TransportProtocol::TcpClientRemote | TransportProtocol::TcpClientLocal => {
                Self::TcpClient(TcpClientChannel::new(core))
            }
            TransportProtocol::UdpClientRemote | TransportProtocol::UdpClientLocal => {
                Self::UdpClient(UdpClientChannel::new(core))
            }
        }
    }

    fn core(&self) -> &ChannelCore {
        match self {
            Self::TcpServer(channel) => &channel.core,
            Self::TcpClient(channel) => &channel.core,
            Self::UdpClient(channel) => &channel.core,
        }
    }

    /// Generation number, unique per channel object.
    pub fn generation(&self) -> u64 {
        self.core().generation
    }

    /// Settings the channel was opened with.
    pub fn settings(&self) -> &ChannelSettings {
        &self.core().settings
    }
}

impl BipChannel for Channel {
    fn open(&mut self, io: &IoContext) -> Result<(), BipCause> {
        match self {
            Self::TcpServer(channel) => channel.open(io),
            Self::TcpClient(channel) => channel.open(io),
            Self::UdpClient(channel) => channel.open(io),
        }
    }

    fn close(&mut self, keep_listening: bool) -> CloseOutcome {
        match self {
            Self::TcpServer(channel) => channel.close(keep_listening),
            Self::TcpClient(channel) => channel.close(keep_listening),
            Self::UdpClient(channel) => channel.close(keep_listening),
        }
    }

    fn send(&mut self, data: &[u8], immediate: bool) -> SendOutcome {
        match self {
            Self::TcpServer(channel) => channel.send(data, immediate),
            Self::TcpClient(channel) => channel.send(data, immediate),
            Self::UdpClient(channel) => channel.send(data, immediate),
        }
    }

    fn receive(&mut self, requested: usize) -> ReceiveOutcome {
        match self {
            Self::TcpServer(channel) => channel.receive(requested),
            Self::TcpClient(channel) => channel.receive(requested),
            Self::UdpClient(channel) => channel.receive(requested),
        }
    }

    fn status(&self) -> ChannelStatus {
        match self {
            Self::TcpServer(channel) => channel.status(),
            Self::TcpClient(channel) => channel.status(),
            Self::UdpClient(channel) => channel.status(),
        }
    }

    fn on_session_end(&mut self) -> SessionEndOutcome {
        match self {
            Self::TcpServer(channel) => channel.on_session_end(),
            Self::TcpClient(channel) => channel.on_session_end(),
            Self::UdpClient(channel) => channel.on_session_end(),
        }
    }

    fn on_io_event(&mut self, event: IoEvent) -> ChannelNotice {
        match self {
            Self::TcpServer(channel) => channel.on_io_event(event),
            Self::TcpClient(channel) => channel.on_io_event(event),
            Self::UdpClient(channel) => channel.on_io_event(event),
        }
    }
}
