//! The BIP actor.
//!
//! [`BipService::run`] is the only place channel-table state changes. It
//! multiplexes three inputs with `tokio::select!`:
//!
//! - commands from [`BipHandle`] (proactive commands, session end, card
//!   removal, connectivity changes);
//! - internal completions it scheduled itself (icon loads, bearer retry
//!   timers);
//! - reports from channel socket tasks.
//!
//! Everything meant for the card leaves through the [`CardReceiver`].

use std::collections::HashSet;
use std::sync::Arc;

use stk_bip_models::{
    BipEvent, CommandDetails, EventDownload, ResultCode, TerminalResponse, CLOSE_KEEP_LISTENING, SEND_IMMEDIATELY,
};
use tokio::sync::{mpsc, watch};
use tracing::{debug, info, warn};

use crate::bearer::BearerCoordinator;
use crate::channel::{IoContext, IoEnvelope};
use crate::config::BipConfig;
use crate::error::BipError;
use crate::factory::{CommandParamsFactory, FactoryOutcome};
use crate::manager::{ChannelManager, Effect, Reply};
use crate::params::{CommandParams, DecodedCommand};
use crate::telephony::{ConnectivityEvent, DataConnectivity, IconImage, IconLoader};

/// Message for the card.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CardMessage {
    /// Encoded TERMINAL RESPONSE body.
    TerminalResponse(Vec<u8>),
    /// Encoded `D6` event download envelope.
    EventDownload(Vec<u8>),
}

/// Receiving end for [`CardMessage`]s.
pub type CardReceiver = mpsc::UnboundedReceiver<CardMessage>;

#[derive(Debug)]
enum Command {
    Proactive(Vec<u8>),
    SessionEnd,
    CardRemoved,
    Connectivity(ConnectivityEvent),
}

#[derive(Debug)]
enum Internal {
    IconsLoaded {
        request: u64,
        loaded: Result<Vec<IconImage>, BipError>,
    },
    BearerRetry {
        channel_id: u8,
        generation: u64,
    },
}

// ---------------------------------------------------------------------------
// Handle
// ---------------------------------------------------------------------------

/// Cloneable front door to a running [`BipService`].
#[derive(Debug, Clone)]
pub struct BipHandle {
    commands: mpsc::UnboundedSender<Command>,
    free_slots: watch::Receiver<usize>,
}

impl BipHandle {
    fn submit(&self, command: Command) -> Result<(), BipError> {
        self.commands.send(command).map_err(|_| BipError::ServiceStopped)
    }

    /// Hand over a proactive command (a `D0` envelope or bare TLVs).
    ///
    /// # Errors
    ///
    /// [`BipError::ServiceStopped`] if the actor has exited.
    pub fn proactive_command(&self, raw: impl Into<Vec<u8>>) -> Result<(), BipError> {
        self.submit(Command::Proactive(raw.into()))
    }

    /// The proactive session ended.
    ///
    /// # Errors
    ///
    /// [`BipError::ServiceStopped`] if the actor has exited.
    pub fn session_end(&self) -> Result<(), BipError> {
        self.submit(Command::SessionEnd)
    }

    /// The card was removed.
    ///
    /// # Errors
    ///
    /// [`BipError::ServiceStopped`] if the actor has exited.
    pub fn card_removed(&self) -> Result<(), BipError> {
        self.submit(Command::CardRemoved)
    }

    /// Forward a connectivity change from the host.
    ///
    /// # Errors
    ///
    /// [`BipError::ServiceStopped`] if the actor has exited.
    pub fn connectivity_changed(&self, event: ConnectivityEvent) -> Result<(), BipError> {
        self.submit(Command::Connectivity(event))
    }

    /// Returns `true` if at least one channel slot is free.
    pub fn channel_available(&self) -> bool {
        *self.free_slots.borrow() > 0
    }
}

// ---------------------------------------------------------------------------
// Service
// ---------------------------------------------------------------------------

/// The actor owning the factory, the channel table and the bearers.
pub struct BipService {
    config: BipConfig,
    factory: CommandParamsFactory,
    manager: ChannelManager,
    icons: Arc<dyn IconLoader>,
    armed: HashSet<BipEvent>,
    icon_request: u64,
    commands: mpsc::UnboundedReceiver<Command>,
    internal_tx: mpsc::UnboundedSender<Internal>,
    internal_rx: mpsc::UnboundedReceiver<Internal>,
    io_rx: mpsc::UnboundedReceiver<IoEnvelope>,
    card: mpsc::UnboundedSender<CardMessage>,
    free_slots: watch::Sender<usize>,
}

impl BipService {
    /// Build a service for one card session.
    pub fn new(
        config: BipConfig,
        connectivity: Arc<dyn DataConnectivity>,
        icons: Arc<dyn IconLoader>,
    ) -> (Self, BipHandle, CardReceiver) {
        let (commands_tx, commands) = mpsc::unbounded_channel();
        let (internal_tx, internal_rx) = mpsc::unbounded_channel();
        let (io_tx, io_rx) = mpsc::unbounded_channel();
        let (card, card_rx) = mpsc::unbounded_channel();

        let io = IoContext {
            events: io_tx,
            connect_timeout: config.connect_timeout,
        };
        let bearers = BearerCoordinator::new(connectivity, &config);
        let manager = ChannelManager::new(&config, io, bearers);
        let (free_slots, free_slots_rx) = watch::channel(manager.free_slots());

        let service = Self {
            config,
            factory: CommandParamsFactory::new(),
            manager,
            icons,
            armed: HashSet::new(),
            icon_request: 0,
            commands,
            internal_tx,
            internal_rx,
            io_rx,
            card,
            free_slots,
        };
        let handle = BipHandle {
            commands: commands_tx,
            free_slots: free_slots_rx,
        };
        (service, handle, card_rx)
    }

    /// Process inputs until every [`BipHandle`] is dropped.
    pub async fn run(mut self) {
        info!(
            max_buffer_size = self.config.max_buffer_size,
            connect_timeout_ms = u64::try_from(self.config.connect_timeout.as_millis()).unwrap_or(u64::MAX),
            require_event_list = self.config.require_event_list,
            "BIP service started"
        );

        loop {
            tokio::select! {
                command = self.commands.recv() => {
                    let Some(command) = command else {
                        break;
                    };
                    self.handle_command(command);
                }
                Some(internal) = self.internal_rx.recv() => self.handle_internal(internal),
                Some(envelope) = self.io_rx.recv() => {
                    let effects = self.manager.on_io(envelope);
                    self.apply(effects);
                }
            }
            self.free_slots.send_replace(self.manager.free_slots());
        }

        self.manager.card_removed();
        info!("BIP service stopped");
    }

    fn handle_command(&mut self, command: Command) {
        match command {
            Command::Proactive(raw) => {
                debug!(bytes = raw.len(), "proactive command");
                self.handle_proactive(&raw);
            }
            Command::SessionEnd => {
                info!("session end");
                if self.factory.cancel() {
                    debug!("icon load abandoned");
                }
                self.manager.session_end();
            }
            Command::CardRemoved => {
                info!("card removed");
                self.factory.cancel();
                self.armed.clear();
                self.manager.card_removed();
            }
            Command::Connectivity(event) => {
                debug!(apn_type = %event.apn_type, state = %event.state, is_failover = event.is_failover, "connectivity change");
                let effects = self.manager.on_connectivity(&event);
                self.apply(effects);
            }
        }
    }

    fn handle_internal(&mut self, internal: Internal) {
        match internal {
            Internal::IconsLoaded { request, loaded } => {
                if request != self.icon_request {
                    debug!(request, "stale icon load ignored");
                    return;
                }
                if let Some(command) = self.factory.on_icons_loaded(loaded) {
                    self.execute(command);
                }
            }
            Internal::BearerRetry { channel_id, generation } => {
                let effects = self.manager.on_bearer_retry(channel_id, generation);
                self.apply(effects);
            }
        }
    }

    fn handle_proactive(&mut self, raw: &[u8]) {
        match self.factory.make(raw) {
            FactoryOutcome::Ready(command) => self.execute(command),
            FactoryOutcome::LoadIcons(records) => {
                self.icon_request += 1;
                let request = self.icon_request;
                let load = self.icons.load_icons(records);
                let internal = self.internal_tx.clone();
                tokio::spawn(async move {
                    let loaded = load.await;
                    let _ = internal.send(Internal::IconsLoaded { request, loaded });
                });
            }
            FactoryOutcome::Failed { details, error } => {
                // The card discards a response whose details do not match.
                let details = details.unwrap_or(CommandDetails {
                    number: 0,
                    type_code: 0,
                    qualifier: 0,
                    comprehension_required: true,
                });
                warn!(number = details.number, type_code = details.type_code, %error, "proactive command failed");
                self.respond(&Reply::new(details).error(error).build());
            }
        }
    }

    fn execute(&mut self, command: DecodedCommand) {
        let details = command.details;
        let reply = Reply {
            details,
            icon_not_displayed: command.icon_load_failed,
        };
        debug!(number = details.number, type_code = details.type_code, alpha_id = ?command.alpha_id, "executing");

        let effects = match command.params {
            CommandParams::SetUpEventList { events } => {
                self.armed = CommandParams::bip_events(&events).into_iter().collect();
                info!(armed = ?self.armed, "event list set up");
                vec![Effect::Respond(reply.ok(ResultCode::Ok).build())]
            }
            CommandParams::OpenChannel(settings) => self.manager.open(reply, settings),
            CommandParams::CloseChannel { channel_id } => {
                self.manager
                    .close(reply, channel_id, details.qualifier_bit(CLOSE_KEEP_LISTENING))
            }
            CommandParams::ReceiveData(data) => self.manager.receive(reply, &data),
            CommandParams::SendData(data) => self
                .manager
                .send(reply, &data, details.qualifier_bit(SEND_IMMEDIATELY)),
            CommandParams::GetChannelStatus => self.manager.channel_status(reply),
        };
        self.apply(effects);
    }

    fn apply(&mut self, effects: Vec<Effect>) {
        for effect in effects {
            match effect {
                Effect::Respond(response) => self.respond(&response),
                Effect::Event(event) => self.raise(&event),
                Effect::RetryBearer {
                    channel_id,
                    generation,
                    after,
                } => {
                    let internal = self.internal_tx.clone();
                    tokio::spawn(async move {
                        tokio::time::sleep(after).await;
                        let _ = internal.send(Internal::BearerRetry { channel_id, generation });
                    });
                }
            }
        }
    }

    fn respond(&self, response: &TerminalResponse) {
        debug!(
            number = response.details.number,
            result = %response.result,
            additional_info = ?response.additional_info,
            "terminal response"
        );
        match response.encode() {
            Ok(bytes) => self.send_to_card(CardMessage::TerminalResponse(bytes)),
            Err(error) => warn!(number = response.details.number, %error, "terminal response not encodable; dropped"),
        }
    }

    fn raise(&self, event: &EventDownload) {
        let kind = event.event();
        if self.config.require_event_list && !self.armed.contains(&kind) {
            debug!(event = %kind, "event not armed; suppressed");
            return;
        }
        debug!(event = %kind, "event download");
        match event.encode() {
            Ok(bytes) => self.send_to_card(CardMessage::EventDownload(bytes)),
            Err(error) => warn!(event = %kind, %error, "event download not encodable; dropped"),
        }
    }

    fn send_to_card(&self, message: CardMessage) {
        if self.card.send(message).is_err() {
            warn!("card receiver dropped; message lost");
        }
    }
}
