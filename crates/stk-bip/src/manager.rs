//! Channel table.
//!
//! [`ChannelManager`] owns the `MAX_CHANNELS` slots and the bearer
//! coordinator. Every operation returns the [`Effect`]s the actor must
//! carry out: terminal responses, event downloads, and bearer retry
//! timers. The manager itself never waits.
//!
//! ```text
//! OPEN CHANNEL ─▶ AwaitingBearer ─(bearer up)─▶ Opening ─(Ready)─▶ Open
//!                      │                           │
//!                      └──(bearer failed)──────────┴──(open failed)──▶ slot freed
//! ```

use std::time::Duration;

use stk_bip_models::{
    BipCause, ChannelStatus, CommandDetails, EventDownload, LinkState, ResponseBuilder, ResponseData, ResultCode,
    TerminalResponse, MAX_CHANNELS,
};
use tracing::{debug, info, warn};

use crate::bearer::{BearerCoordinator, BearerNotice, BearerOutcome};
use crate::channel::{
    negotiate_buffer_size, BipChannel, Channel, ChannelNotice, CloseOutcome, IoContext, IoEnvelope, ReceiveOutcome,
    SendOutcome, SessionEndOutcome,
};
use crate::config::BipConfig;
use crate::error::CommandError;
use crate::params::{ChannelSettings, DataSettings};
use crate::telephony::ConnectivityEvent;

/// Something the actor must do on the manager's behalf.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Effect {
    /// Send a terminal response.
    Respond(TerminalResponse),
    /// Raise an event download (subject to the armed event list).
    Event(EventDownload),
    /// Call [`ChannelManager::on_bearer_retry`] after `after`.
    RetryBearer {
        /// Channel waiting for its bearer.
        channel_id: u8,
        /// Generation of that channel.
        generation: u64,
        /// Delay.
        after: Duration,
    },
}

/// How to answer one proactive command.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Reply {
    /// Command details to echo.
    pub details: CommandDetails,
    /// The command's icon could not be loaded.
    pub icon_not_displayed: bool,
}

impl Reply {
    /// Reply to `details` with no icon caveat.
    pub fn new(details: CommandDetails) -> Self {
        Self {
            details,
            icon_not_displayed: false,
        }
    }

    /// A successful response. A plain OK becomes "icon not displayed" when
    /// the icon failed to load.
    pub fn ok(&self, result: ResultCode) -> ResponseBuilder {
        let result = if result == ResultCode::Ok && self.icon_not_displayed {
            ResultCode::IconNotDisplayed
        } else {
            result
        };
        ResponseBuilder::new(self.details).result(result)
    }

    /// A failed response.
    pub fn error(&self, error: CommandError) -> ResponseBuilder {
        let builder = ResponseBuilder::new(self.details).result(error.result);
        match error.additional_info {
            Some(info) => builder.additional_info(info),
            None => builder,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    AwaitingBearer,
    Opening,
    Open,
}

#[derive(Debug)]
enum Pending {
    Open { reply: Reply, modified: bool },
    Send { reply: Reply, free_space: usize },
}

#[derive(Debug)]
struct Slot {
    channel: Channel,
    phase: Phase,
    pending: Option<Pending>,
}

impl Slot {
    fn open_failure_data(&self) -> ResponseData {
        let settings = self.channel.settings();
        ResponseData::OpenChannel {
            status: None,
            bearer: settings.bearer.clone(),
            buffer_size: settings.buffer_size,
        }
    }
}

fn slot_index(channel_id: u8) -> Option<usize> {
    usize::from(channel_id)
        .checked_sub(1)
        .filter(|index| *index < MAX_CHANNELS)
}

fn slot_mut(slots: &mut [Option<Slot>], channel_id: u8) -> Option<&mut Slot> {
    slots.get_mut(slot_index(channel_id)?)?.as_mut()
}

fn respond(builder: ResponseBuilder) -> Vec<Effect> {
    vec![Effect::Respond(builder.build())]
}

/// The fixed-size channel table.
pub struct ChannelManager {
    slots: [Option<Slot>; MAX_CHANNELS],
    next_generation: u64,
    max_buffer_size: u16,
    io: IoContext,
    bearers: BearerCoordinator,
}

impl ChannelManager {
    /// An empty table.
    pub fn new(config: &BipConfig, io: IoContext, bearers: BearerCoordinator) -> Self {
        Self {
            slots: Default::default(),
            next_generation: 0,
            max_buffer_size: config.max_buffer_size,
            io,
            bearers,
        }
    }

    /// Number of free slots.
    pub fn free_slots(&self) -> usize {
        self.slots.iter().filter(|slot| slot.is_none()).count()
    }

    /// Returns `true` if another channel could be opened.
    pub fn channel_available(&self) -> bool {
        self.free_slots() > 0
    }

    // ─── Proactive commands ─────────────────────────────────────────

    /// OPEN CHANNEL.
    pub fn open(&mut self, reply: Reply, mut settings: ChannelSettings) -> Vec<Effect> {
        if settings.buffer_size == 0 {
            warn!("zero buffer size requested");
            return respond(
                reply
                    .error(CommandError::bip(BipCause::BufferSizeNotAvailable))
                    .data(ResponseData::OpenChannel {
                        status: None,
                        bearer: settings.bearer,
                        buffer_size: 0,
                    }),
            );
        }
        let Some(index) = self.slots.iter().position(Option::is_none) else {
            warn!("all channels in use");
            return respond(
                reply
                    .error(CommandError::bip(BipCause::NoChannelAvailable))
                    .data(ResponseData::OpenChannel {
                        status: None,
                        bearer: settings.bearer,
                        buffer_size: settings.buffer_size,
                    }),
            );
        };
        #[allow(clippy::cast_possible_truncation)]
        let channel_id = (index + 1) as u8;

        let (buffer_size, modified) = negotiate_buffer_size(settings.buffer_size, self.max_buffer_size);
        if modified {
            debug!(channel_id, requested = settings.buffer_size, buffer_size, "buffer size clamped");
        }
        settings.buffer_size = buffer_size;
        settings.channel_id = Some(channel_id);
        let bearer = settings.bearer.clone();
        let access_point = settings.network_access_name.clone();

        self.next_generation += 1;
        info!(
            channel_id,
            protocol = %settings.protocol,
            port = settings.port,
            buffer_size,
            "opening channel"
        );
        self.slots[index] = Some(Slot {
            channel: Channel::new(channel_id, self.next_generation, settings),
            phase: Phase::AwaitingBearer,
            pending: Some(Pending::Open { reply, modified }),
        });

        match bearer {
            Some(description) => {
                let outcome = self.bearers.request(channel_id, &description, access_point.as_deref());
                self.apply_bearer_outcome(channel_id, outcome)
            }
            None => self.start_open(channel_id),
        }
    }

    /// CLOSE CHANNEL.
    pub fn close(&mut self, reply: Reply, channel_id: u8, keep_listening: bool) -> Vec<Effect> {
        let Some(slot) = slot_mut(&mut self.slots, channel_id) else {
            return respond(reply.error(CommandError::bip(BipCause::ChannelIdNotValid)));
        };
        match slot.channel.close(keep_listening) {
            CloseOutcome::Released => {
                info!(channel_id, "channel closed");
                self.take_slot(channel_id);
            }
            CloseOutcome::Listening => info!(channel_id, "client closed; still listening"),
        }
        respond(reply.ok(ResultCode::Ok))
    }

    /// SEND DATA.
    pub fn send(&mut self, reply: Reply, data: &DataSettings, immediate: bool) -> Vec<Effect> {
        let Some(slot) = slot_mut(&mut self.slots, data.channel_id) else {
            return respond(reply.error(CommandError::bip(BipCause::ChannelIdNotValid)));
        };
        if slot.phase != Phase::Open || slot.pending.is_some() {
            return respond(reply.error(CommandError::bip(BipCause::ChannelClosed)));
        }
        match slot.channel.send(&data.data, immediate) {
            SendOutcome::Buffered { free_space } => {
                respond(reply.ok(ResultCode::Ok).data(ResponseData::SendData { free_space }))
            }
            SendOutcome::Flushing { free_space } => {
                slot.pending = Some(Pending::Send { reply, free_space });
                Vec::new()
            }
            SendOutcome::Closed => respond(reply.error(CommandError::bip(BipCause::ChannelClosed))),
        }
    }

    /// RECEIVE DATA.
    pub fn receive(&mut self, reply: Reply, data: &DataSettings) -> Vec<Effect> {
        let Some(slot) = slot_mut(&mut self.slots, data.channel_id) else {
            return respond(reply.error(CommandError::bip(BipCause::ChannelIdNotValid)));
        };
        match slot.channel.receive(data.length) {
            ReceiveOutcome::Data {
                result,
                data,
                remaining,
            } => respond(reply.ok(result).data(ResponseData::ReceiveData { data, remaining })),
            ReceiveOutcome::Closed => respond(reply.error(CommandError::bip(BipCause::ChannelClosed))),
        }
    }

    /// GET CHANNEL STATUS: one word per slot, `0` for an empty slot.
    pub fn channel_status(&self, reply: Reply) -> Vec<Effect> {
        let words = self
            .slots
            .iter()
            .map(|slot| slot.as_ref().map_or(0, |slot| slot.channel.status().to_word()))
            .collect();
        respond(reply.ok(ResultCode::Ok).data(ResponseData::ChannelStatus { words }))
    }

    // ─── Asynchronous completions ───────────────────────────────────

    /// Apply a report from a socket task.
    pub fn on_io(&mut self, envelope: IoEnvelope) -> Vec<Effect> {
        let channel_id = envelope.channel_id;
        let Some(slot) = slot_mut(&mut self.slots, channel_id)
            .filter(|slot| slot.channel.generation() == envelope.generation)
        else {
            debug!(channel_id, generation = envelope.generation, "dropping event from closed channel");
            return Vec::new();
        };

        match slot.channel.on_io_event(envelope.event) {
            ChannelNotice::Opened(status) => {
                slot.phase = Phase::Open;
                info!(channel_id, state = %status.state, "channel open");
                match slot.pending.take() {
                    Some(Pending::Open { reply, modified }) => {
                        let settings = slot.channel.settings();
                        let result = if modified { ResultCode::Modified } else { ResultCode::Ok };
                        respond(reply.ok(result).data(ResponseData::OpenChannel {
                            status: Some(status),
                            bearer: settings.bearer.clone(),
                            buffer_size: settings.buffer_size,
                        }))
                    }
                    _ => Vec::new(),
                }
            }
            ChannelNotice::OpenFailed(cause) => self.fail_open(channel_id, CommandError::bip(cause)),
            ChannelNotice::Sent => match slot.pending.take() {
                Some(Pending::Send { reply, free_space }) => {
                    respond(reply.ok(ResultCode::Ok).data(ResponseData::SendData { free_space }))
                }
                _ => Vec::new(),
            },
            ChannelNotice::SendFailed => {
                let Some(slot) = self.take_slot(channel_id) else {
                    return Vec::new();
                };
                match slot.pending {
                    Some(Pending::Send { reply, .. }) => {
                        respond(reply.error(CommandError::bip(BipCause::ChannelClosed)))
                    }
                    _ => Vec::new(),
                }
            }
            ChannelNotice::DataAvailable { status, available } => {
                debug!(channel_id, available, "data available");
                vec![Effect::Event(EventDownload::DataAvailable { status, available })]
            }
            ChannelNotice::StatusChanged(status) => {
                let mut effects = Vec::new();
                if status.state != LinkState::Established {
                    if let Some(Pending::Send { reply, .. }) = slot.pending.take() {
                        effects.extend(respond(reply.error(CommandError::bip(BipCause::ChannelClosed))));
                    }
                }
                effects.push(Effect::Event(EventDownload::ChannelStatus { status }));
                effects
            }
            ChannelNotice::Ignored => Vec::new(),
        }
    }

    /// A bearer retry timer fired.
    pub fn on_bearer_retry(&mut self, channel_id: u8, generation: u64) -> Vec<Effect> {
        let waiting = slot_mut(&mut self.slots, channel_id)
            .is_some_and(|slot| slot.channel.generation() == generation && slot.phase == Phase::AwaitingBearer);
        if !waiting {
            return Vec::new();
        }
        match self.bearers.retry(channel_id) {
            Some(outcome) => self.apply_bearer_outcome(channel_id, outcome),
            None => Vec::new(),
        }
    }

    /// Apply a connectivity change from the host.
    pub fn on_connectivity(&mut self, event: &ConnectivityEvent) -> Vec<Effect> {
        let mut effects = Vec::new();
        for notice in self.bearers.on_connectivity(event) {
            match notice {
                BearerNotice::Ready(channel_id) => {
                    if self.phase(channel_id) == Some(Phase::AwaitingBearer) {
                        effects.extend(self.start_open(channel_id));
                    }
                }
                BearerNotice::Failed(channel_id, error) => {
                    if self.phase(channel_id) == Some(Phase::AwaitingBearer) {
                        effects.extend(self.fail_open(channel_id, error));
                    }
                }
                BearerNotice::Lost(channel_id) => effects.extend(self.drop_channel(channel_id)),
            }
        }
        effects
    }

    // ─── Session lifecycle ──────────────────────────────────────────

    /// The proactive session ended.
    ///
    /// Opens still in progress are abandoned without a response, pending
    /// flushes lose their response, and each channel decides whether it
    /// survives. Calling this twice is harmless.
    pub fn session_end(&mut self) {
        let cancelled = self.bearers.cancel_pending();
        if !cancelled.is_empty() {
            debug!(?cancelled, "bearer requests cancelled by session end");
        }

        for index in 0..MAX_CHANNELS {
            #[allow(clippy::cast_possible_truncation)]
            let channel_id = (index + 1) as u8;
            let Some(slot) = self.slots[index].as_mut() else {
                continue;
            };
            if slot.phase != Phase::Open {
                info!(channel_id, "open abandoned at session end");
                self.take_slot(channel_id);
                continue;
            }
            slot.pending = None;
            if slot.channel.on_session_end() == SessionEndOutcome::Release {
                info!(channel_id, "channel released at session end");
                self.take_slot(channel_id);
            }
        }
    }

    /// The card went away: close everything.
    pub fn card_removed(&mut self) {
        for index in 0..MAX_CHANNELS {
            if let Some(mut slot) = self.slots[index].take() {
                slot.channel.close(false);
            }
        }
        self.bearers.release_all();
        info!("all channels closed");
    }

    // ─── Internals ──────────────────────────────────────────────────

    fn phase(&self, channel_id: u8) -> Option<Phase> {
        self.slots.get(slot_index(channel_id)?)?.as_ref().map(|slot| slot.phase)
    }

    fn take_slot(&mut self, channel_id: u8) -> Option<Slot> {
        let slot = self.slots.get_mut(slot_index(channel_id)?)?.take();
        self.bearers.release(channel_id);
        slot
    }

    fn apply_bearer_outcome(&mut self, channel_id: u8, outcome: BearerOutcome) -> Vec<Effect> {
        match outcome {
            BearerOutcome::Ready => self.start_open(channel_id),
            BearerOutcome::Pending => {
                debug!(channel_id, "waiting for bearer");
                Vec::new()
            }
            BearerOutcome::RetryAfter(after) => match slot_mut(&mut self.slots, channel_id) {
                Some(slot) => vec![Effect::RetryBearer {
                    channel_id,
                    generation: slot.channel.generation(),
                    after,
                }],
                None => Vec::new(),
            },
            BearerOutcome::Failed(error) => self.fail_open(channel_id, error),
        }
    }

    fn start_open(&mut self, channel_id: u8) -> Vec<Effect> {
        let Some(slot) = slot_mut(&mut self.slots, channel_id) else {
            return Vec::new();
        };
        slot.phase = Phase::Opening;
        match slot.channel.open(&self.io) {
            Ok(()) => Vec::new(),
            Err(cause) => self.fail_open(channel_id, CommandError::bip(cause)),
        }
    }

    fn fail_open(&mut self, channel_id: u8, error: CommandError) -> Vec<Effect> {
        let Some(slot) = self.take_slot(channel_id) else {
            return Vec::new();
        };
        warn!(channel_id, %error, "open channel failed");
        let data = slot.open_failure_data();
        match slot.pending {
            Some(Pending::Open { reply, .. }) => respond(reply.error(error).data(data)),
            _ => Vec::new(),
        }
    }

    /// Bearer lost under an existing channel.
    fn drop_channel(&mut self, channel_id: u8) -> Vec<Effect> {
        let Some(mut slot) = self.take_slot(channel_id) else {
            return Vec::new();
        };
        slot.channel.close(false);
        warn!(channel_id, "bearer lost; channel dropped");
        let data = slot.open_failure_data();
        match slot.pending {
            Some(Pending::Open { reply, .. }) => respond(reply.error(CommandError::network_unable()).data(data)),
            Some(Pending::Send { reply, .. }) => {
                let mut effects = respond(reply.error(CommandError::bip(BipCause::ChannelClosed)));
                effects.push(Effect::Event(EventDownload::ChannelStatus {
                    status: ChannelStatus::new(channel_id, LinkState::Closed).dropped(),
                }));
                effects
            }
            None => vec![Effect::Event(EventDownload::ChannelStatus {
                status: ChannelStatus::new(channel_id, LinkState::Closed).dropped(),
            })],
        }
    }
}
