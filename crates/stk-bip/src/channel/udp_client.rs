//! UDP client channel.

use std::net::SocketAddr;

use stk_bip_models::{BipCause, ChannelStatus};
use tokio::net::UdpSocket;
use tokio::sync::mpsc;
use tracing::debug;

use super::{
    BipChannel, ChannelCore, ChannelNotice, CloseOutcome, IoCommand, IoContext, IoEvent, IoSender, ReceiveOutcome,
    SendOutcome, SessionEndOutcome,
};

/// A connected UDP socket. Each datagram received becomes one chunk.
#[derive(Debug)]
pub struct UdpClientChannel {
    pub(super) core: ChannelCore,
}

impl UdpClientChannel {
    pub(super) fn new(core: ChannelCore) -> Self {
        Self { core }
    }
}

impl BipChannel for UdpClientChannel {
    fn open(&mut self, io: &IoContext) -> Result<(), BipCause> {
        let target = self
            .core
            .settings
            .remote_target()
            .ok_or(BipCause::RemoteDeviceNotReachable)?;
        let bind = self.core.settings.bind_address(0);
        let chunk = self.core.capacity();
        self.core
            .spawn(io, move |events, commands| run(bind, target, chunk, events, commands));
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
    bind: SocketAddr,
    target: SocketAddr,
    chunk: usize,
    events: IoSender,
    mut commands: mpsc::UnboundedReceiver<IoCommand>,
) {
    let socket = match UdpSocket::bind(bind).await {
        Ok(socket) => socket,
        Err(e) => {
            events.send(IoEvent::OpenFailed(e.to_string()));
            return;
        }
    };
    if let Err(e) = socket.connect(target).await {
        events.send(IoEvent::OpenFailed(e.to_string()));
        return;
    }
    debug!(channel_id = events.channel_id(), %target, "udp client ready");
    if !events.send(IoEvent::Ready) {
        return;
    }

    let mut buf = vec![0u8; chunk.max(1)];
    let mut paused = false;

    loop {
        tokio::select! {
            received = socket.recv(&mut buf), if !paused => match received {
                // Empty datagram: nothing to deliver.
                Ok(0) => {}
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
                    let result = socket.send(&bytes).await.map_err(|e| e.to_string());
                    events.send(IoEvent::Sent(result));
                }
                Some(IoCommand::Resume) => paused = false,
                Some(IoCommand::DropClient) => {}
                None => return,
            },
        }
    }
}
