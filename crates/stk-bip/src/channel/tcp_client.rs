//! TCP client channel (remote server or terminal-local service).

use std::net::SocketAddr;
use std::time::Duration;

use stk_bip_models::{BipCause, ChannelStatus};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tracing::debug;

use super::{
    BipChannel, ChannelCore, ChannelNotice, CloseOutcome, IoCommand, IoContext, IoEvent, IoSender, ReceiveOutcome,
    SendOutcome, SessionEndOutcome,
};

/// A TCP connection opened by the terminal on behalf of the card.
#[derive(Debug)]
pub struct TcpClientChannel {
    pub(super) core: ChannelCore,
}

impl TcpClientChannel {
    pub(super) fn new(core: ChannelCore) -> Self {
        Self { core }
    }
}

impl BipChannel for TcpClientChannel {
    fn open(&mut self, io: &IoContext) -> Result<(), BipCause> {
        let target = self
            .core
            .settings
            .remote_target()
            .ok_or(BipCause::RemoteDeviceNotReachable)?;
        let chunk = self.core.capacity();
        let timeout = io.connect_timeout;
        self.core
            .spawn(io, move |events, commands| run(target, chunk, timeout, events, commands));
        Ok(())
    }

    fn close(&mut self, _keep_listening: bool) -> CloseOutcome {
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
        self.core.client_session_end()
    }

    fn on_io_event(&mut self, event: IoEvent) -> ChannelNotice {
        self.core.client_io_event(event)
    }
}

async fn run(
    target: SocketAddr,
    chunk: usize,
    timeout: Duration,
    events: IoSender,
    mut commands: mpsc::UnboundedReceiver<IoCommand>,
) {
    let stream = match tokio::time::timeout(timeout, TcpStream::connect(target)).await {
        Ok(Ok(stream)) => stream,
        Ok(Err(e)) => {
            events.send(IoEvent::OpenFailed(e.to_string()));
            return;
        }
        Err(_) => {
            events.send(IoEvent::OpenFailed(format!("connect timed out after {timeout:?}")));
            return;
        }
    };
    debug!(channel_id = events.channel_id(), %target, "tcp client connected");
    if !events.send(IoEvent::Ready) {
        return;
    }

    let (mut reader, mut writer) = stream.into_split();
    let mut buf = vec![0u8; chunk.max(1)];
    let mut paused = false;

    loop {
        tokio::select! {
            read = reader.read(&mut buf), if !paused => match read {
                Ok(0) => {
                    events.send(IoEvent::ReadFailed("connection closed by peer".into()));
                    return;
                }
                Ok(n) => {
                    paused = true;
                    if !events.send(IoEvent::Data(buf[..n].to_vec())) {
                        return;
                    }
                }
                Err(e) => {
                    events.send(IoEvent::ReadFailed(e.to_string()));
                    return;
                }
            },
            command = commands.recv() => match command {
                Some(IoCommand::Write(bytes)) => {
                    let result = writer
                        .write_all(&bytes)
                        .await
                        .map(|()| bytes.len())
                        .map_err(|e| e.to_string());
                    events.send(IoEvent::Sent(result));
                }
                Some(IoCommand::Resume) => paused = false,
                Some(IoCommand::DropClient) => {}
                None => return,
            },
        }
    }
}
