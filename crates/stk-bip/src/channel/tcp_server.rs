//! TCP server channel (UICC server mode).
//!
//! Listens on the port the card named and serves one client at a time.
//! When the client goes away the channel returns to listening.

use std::io;
use std::net::SocketAddr;

use stk_bip_models::{BipCause, ChannelStatus, LinkState};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use super::{
    BipChannel, ChannelCore, ChannelNotice, CloseOutcome, IoCommand, IoContext, IoEvent, IoSender, ReceiveOutcome,
    SendOutcome, SessionEndOutcome,
};

/// A listening socket plus at most one accepted client.
#[derive(Debug)]
pub struct TcpServerChannel {
    pub(super) core: ChannelCore,
}

impl TcpServerChannel {
    pub(super) fn new(core: ChannelCore) -> Self {
        Self { core }
    }

    fn back_to_listening(&mut self) {
        self.core.rx.reset();
        self.core.tx.reset();
        self.core.reader_paused = false;
        self.core.state = LinkState::Listening;
    }
}

impl BipChannel for TcpServerChannel {
    fn open(&mut self, io: &IoContext) -> Result<(), BipCause> {
        let bind = self.core.settings.bind_address(self.core.settings.port);
        let chunk = self.core.capacity();
        self.core
            .spawn(io, move |events, commands| run(bind, chunk, events, commands));
        Ok(())
    }

    fn close(&mut self, keep_listening: bool) -> CloseOutcome {
        if keep_listening && self.core.io.is_some() {
            self.core.command(IoCommand::DropClient);
            self.back_to_listening();
            return CloseOutcome::Listening;
        }
        self.core.shutdown();
        CloseOutcome::Released
    }

    fn send(&mut self, data: &[u8], immediate: bool) -> SendOutcome {
        self.core.send(data, immediate)
    }

    fn receive(&mut self, requested: usize) -> ReceiveOutcome {
        self.core.receive(requested)
    }

    fn status(&self) -> ChannelStatus {
        self.core.status()
    }

    fn on_session_end(&mut self) -> SessionEndOutcome {
        self.core.shutdown();
        SessionEndOutcome::Release
    }

    fn on_io_event(&mut self, event: IoEvent) -> ChannelNotice {
        match event {
            IoEvent::Ready => {
                self.core.state = LinkState::Listening;
                ChannelNotice::Opened(self.core.status())
            }
            IoEvent::OpenFailed(reason) => {
                warn!(channel_id = self.core.id, %reason, "listen failed");
                self.core.shutdown();
                ChannelNotice::OpenFailed(BipCause::TransportLevelNotAvailable)
            }
            IoEvent::Accepted(peer) => {
                info!(channel_id = self.core.id, %peer, "client accepted");
                self.core.state = LinkState::Established;
                self.core.dropped = false;
                ChannelNotice::StatusChanged(self.core.status())
            }
            IoEvent::ClientLost(reason) | IoEvent::ReadFailed(reason) => {
                info!(channel_id = self.core.id, %reason, "client gone; listening again");
                self.back_to_listening();
                ChannelNotice::StatusChanged(self.core.status())
            }
            IoEvent::Data(data) => self.core.store(&data),
            IoEvent::Sent(Ok(written)) => {
                debug!(channel_id = self.core.id, written, "flushed");
                ChannelNotice::Sent
            }
            IoEvent::Sent(Err(reason)) => {
                warn!(channel_id = self.core.id, %reason, "send failed");
                self.core.shutdown();
                ChannelNotice::SendFailed
            }
        }
    }
}

type Client = (OwnedReadHalf, OwnedWriteHalf);

async fn read_client(client: &mut Option<Client>, buf: &mut [u8]) -> io::Result<usize> {
    match client {
        Some((reader, _)) => reader.read(buf).await,
        None => std::future::pending().await,
    }
}

async fn run(bind: SocketAddr, chunk: usize, events: IoSender, mut commands: mpsc::UnboundedReceiver<IoCommand>) {
    let listener = match TcpListener::bind(bind).await {
        Ok(listener) => listener,
        Err(e) => {
            events.send(IoEvent::OpenFailed(e.to_string()));
            return;
        }
    };
    debug!(channel_id = events.channel_id(), %bind, "tcp server listening");
    if !events.send(IoEvent::Ready) {
        return;
    }

    let mut client: Option<Client> = None;
    let mut buf = vec![0u8; chunk.max(1)];
    let mut paused = false;

    loop {
        tokio::select! {
            accepted = listener.accept(), if client.is_none() => match accepted {
                Ok((stream, peer)) => {
                    client = Some(stream.into_split());
                    paused = false;
                    if !events.send(IoEvent::Accepted(peer)) {
                        return;
                    }
                }
                Err(e) => warn!(channel_id = events.channel_id(), error = %e, "accept failed"),
            },
            read = read_client(&mut client, &mut buf), if !paused => match read {
                Ok(0) => {
                    client = None;
                    events.send(IoEvent::ClientLost("connection closed by peer".into()));
                }
                Ok(n) => {
                    paused = true;
                    if !events.send(IoEvent::Data(buf[..n].to_vec())) {
                        return;
                    }
                }
                Err(e) => {
                    client = None;
                    events.send(IoEvent::ClientLost(e.to_string()));
                }
            },
            command = commands.recv() => match command {
                Some(IoCommand::Write(bytes)) => {
                    let result = match client.as_mut() {
                        Some((_, writer)) => writer
                            .write_all(&bytes)
                            .await
                            .map(|()| bytes.len())
                            .map_err(|e| e.to_string()),
                        None => Err("no client connected".to_string()),
                    };
                    events.send(IoEvent::Sent(result));
                }
                Some(IoCommand::Resume) => paused = false,
                Some(IoCommand::DropClient) => {
                    client = None;
                    paused = false;
                }
                None => return,
            },
        }
    }
}
