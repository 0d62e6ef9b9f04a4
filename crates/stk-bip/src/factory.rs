//! Proactive command decoding.
//!
//! [`CommandParamsFactory::make`] turns the raw bytes of a proactive
//! command into a [`DecodedCommand`]. Commands carrying an ICON
//! IDENTIFIER are not ready straight away: the factory keeps them pending
//! and the caller resumes it with [`CommandParamsFactory::on_icons_loaded`]
//! once card storage has answered.

use stk_bip_models::text::{decode_alpha_id, decode_network_access_name, decode_text_string};
use stk_bip_models::tlv::{decode_many, search, search_from, unwrap_envelope, PROACTIVE_COMMAND_TAG};
use stk_bip_models::{
    buffer_size, ipv4_address, BearerDescription, BearerType, CommandDetails, CommandType, ComprehensionTlv,
    DeviceIdentities, ResultCode, TlvTag, TransportLevel,
};
use tracing::{debug, warn};

use crate::error::{BipError, CommandError};
use crate::params::{ChannelSettings, CommandParams, DataSettings, DecodedCommand, IconRef};
use crate::telephony::IconImage;

/// Result of [`CommandParamsFactory::make`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FactoryOutcome {
    /// The command is decoded and ready to execute.
    Ready(DecodedCommand),
    /// Load these icon records, then call
    /// [`on_icons_loaded`](CommandParamsFactory::on_icons_loaded).
    LoadIcons(Vec<u8>),
    /// The command cannot be executed.
    Failed {
        /// Command details, when they could be read.
        details: Option<CommandDetails>,
        /// Result for the terminal response.
        error: CommandError,
    },
}

/// Decodes proactive commands, holding at most one command while its
/// icons load.
#[derive(Debug, Default)]
pub struct CommandParamsFactory {
    pending: Option<DecodedCommand>,
}

impl CommandParamsFactory {
    /// Create a factory with nothing pending.
    pub fn new() -> Self {
        Self::default()
    }

    /// Decode a proactive command, either a `D0` envelope or bare TLVs.
    ///
    /// Any command still waiting for icons is discarded.
    pub fn make(&mut self, raw: &[u8]) -> FactoryOutcome {
        if self.pending.take().is_some() {
            warn!("new proactive command while icons were loading; dropping the old one");
        }

        let body = match unwrap_envelope(raw, PROACTIVE_COMMAND_TAG) {
            Ok(body) => body,
            Err(e) => {
                warn!(error = %e, "malformed proactive command envelope");
                return FactoryOutcome::Failed {
                    details: None,
                    error: e.into(),
                };
            }
        };

        let mut tlvs = Vec::new();
        let mut decode_error = None;
        for item in decode_many(body, 0) {
            match item {
                Ok(tlv) => tlvs.push(tlv),
                Err(e) => decode_error = Some(e),
            }
        }

        let details = match search(&tlvs, TlvTag::CommandDetails).map(CommandDetails::from_tlv) {
            Some(Ok(details)) => details,
            Some(Err(e)) => {
                warn!(error = %e, "unreadable command details");
                return FactoryOutcome::Failed {
                    details: None,
                    error: CommandError::new(ResultCode::CommandTypeNotUnderstood),
                };
            }
            None => {
                warn!("proactive command without command details");
                return FactoryOutcome::Failed {
                    details: None,
                    error: CommandError::new(ResultCode::CommandTypeNotUnderstood),
                };
            }
        };

        if let Some(e) = decode_error {
            warn!(error = %e, number = details.number, "malformed object in proactive command");
            return FactoryOutcome::Failed {
                details: Some(details),
                error: e.into(),
            };
        }

        match extract(details, &tlvs) {
            Ok(command) => match command.icon {
                Some(icon) => {
                    debug!(record = icon.record, "deferring command until icon loads");
                    self.pending = Some(command);
                    FactoryOutcome::LoadIcons(vec![icon.record])
                }
                None => FactoryOutcome::Ready(command),
            },
            Err(error) => {
                debug!(number = details.number, type_code = details.type_code, %error, "command rejected");
                FactoryOutcome::Failed {
                    details: Some(details),
                    error,
                }
            }
        }
    }

    /// Resume the pending command after its icons loaded (or failed to).
    ///
    /// Returns `None` when nothing is pending, e.g. after [`cancel`](Self::cancel).
    pub fn on_icons_loaded(&mut self, loaded: Result<Vec<IconImage>, BipError>) -> Option<DecodedCommand> {
        let mut command = self.pending.take()?;
        match loaded {
            Ok(images) => command.icons = images,
            Err(e) => {
                debug!(error = %e, "icon load failed; continuing without icon");
                command.icon_load_failed = true;
            }
        }
        Some(command)
    }

    /// Drop the pending command, if any. Returns `true` if one was dropped.
    pub fn cancel(&mut self) -> bool {
        self.pending.take().is_some()
    }

    /// Returns `true` while a command waits for its icons.
    pub fn is_pending(&self) -> bool {
        self.pending.is_some()
    }
}

// ─── Extractors ──────────────────────────────────────────────────────

fn extract(details: CommandDetails, tlvs: &[ComprehensionTlv]) -> Result<DecodedCommand, CommandError> {
    let Some(kind) = details.command_type() else {
        return Err(CommandError::new(ResultCode::CommandTypeNotUnderstood));
    };

    let params = match kind {
        CommandType::SetUpEventList => {
            let list = search(tlvs, TlvTag::EventList).ok_or_else(CommandError::values_missing)?;
            CommandParams::SetUpEventList {
                events: list.value().to_vec(),
            }
        }
        CommandType::OpenChannel => CommandParams::OpenChannel(open_channel(tlvs)?),
        CommandType::CloseChannel => CommandParams::CloseChannel {
            channel_id: target_channel(tlvs)?,
        },
        CommandType::ReceiveData => {
            let channel_id = target_channel(tlvs)?;
            let length = search(tlvs, TlvTag::ChannelDataLength).ok_or_else(CommandError::values_missing)?;
            let length = *length.value().first().ok_or_else(CommandError::data_not_understood)?;
            CommandParams::ReceiveData(DataSettings {
                channel_id,
                length: usize::from(length),
                data: Vec::new(),
            })
        }
        CommandType::SendData => {
            let channel_id = target_channel(tlvs)?;
            let data = search(tlvs, TlvTag::ChannelData).ok_or_else(CommandError::values_missing)?;
            CommandParams::SendData(DataSettings {
                channel_id,
                length: data.length(),
                data: data.value().to_vec(),
            })
        }
        CommandType::GetChannelStatus => CommandParams::GetChannelStatus,
    };

    let alpha_id = search(tlvs, TlvTag::AlphaId)
        .map(|tlv| decode_alpha_id(tlv.value()))
        .transpose()?;
    let icon = search(tlvs, TlvTag::IconId).map(icon_ref).transpose()?;

    Ok(DecodedCommand {
        details,
        alpha_id,
        icon,
        icons: Vec::new(),
        icon_load_failed: false,
        params,
    })
}

/// Channel named by DEVICE IDENTITIES, or `0` if it names none.
fn target_channel(tlvs: &[ComprehensionTlv]) -> Result<u8, CommandError> {
    let tlv = search(tlvs, TlvTag::DeviceIdentities).ok_or_else(CommandError::values_missing)?;
    let identities = DeviceIdentities::from_tlv(tlv)?;
    Ok(identities.destination_channel().unwrap_or(0))
}

fn icon_ref(tlv: &ComprehensionTlv) -> Result<IconRef, CommandError> {
    match tlv.value() {
        [_qualifier, record, ..] => Ok(IconRef { record: *record }),
        _ => Err(CommandError::data_not_understood()),
    }
}

fn open_channel(tlvs: &[ComprehensionTlv]) -> Result<ChannelSettings, CommandError> {
    let transport = search_from(tlvs, TlvTag::TransportLevel, 0)
        .map(|(index, tlv)| TransportLevel::from_tlv(tlv).map(|level| (index, level)))
        .transpose()?;
    let bearer = search(tlvs, TlvTag::BearerDescription)
        .map(BearerDescription::from_tlv)
        .transpose()?;

    let (level, destination) = match (&bearer, transport) {
        // Terminal-local link: no bearer involved.
        (None, Some((_, level))) => {
            if !level.protocol.is_terminal_local() {
                return Err(CommandError::data_not_understood());
            }
            (level, None)
        }
        (Some(description), transport) => {
            let kind = description
                .bearer_type()
                .filter(|kind| *kind == BearerType::Default || kind.is_packet_switched())
                .ok_or_else(CommandError::beyond_capability)?;
            let Some((index, level)) = transport else {
                return Err(CommandError::data_not_understood());
            };
            if !level.protocol.is_remote() {
                return Err(CommandError::data_not_understood());
            }
            let destination = match search_from(tlvs, TlvTag::OtherAddress, index + 1) {
                Some((_, address)) => {
                    Some(ipv4_address(address)?.ok_or_else(CommandError::data_not_understood)?)
                }
                None if kind.is_packet_switched() => return Err(CommandError::values_missing()),
                None => None,
            };
            (level, destination)
        }
        (None, None) => return Err(CommandError::values_missing()),
    };

    let requested = search(tlvs, TlvTag::BufferSize).ok_or_else(CommandError::values_missing)?;
    let requested = buffer_size(requested)?;

    let local_address = match transport {
        Some((index, _)) => match search(&tlvs[..index], TlvTag::OtherAddress) {
            Some(address) => ipv4_address(address)?,
            None => None,
        },
        None => None,
    };

    let network_access_name = search(tlvs, TlvTag::NetworkAccessName)
        .map(|tlv| decode_network_access_name(tlv.value()))
        .transpose()?
        .filter(|name| !name.is_empty());

    let (user_login, user_password) = match search_from(tlvs, TlvTag::TextString, 0) {
        Some((index, login)) => {
            let password = search_from(tlvs, TlvTag::TextString, index + 1)
                .map(|(_, tlv)| decode_text_string(tlv.value()))
                .transpose()?
                .flatten();
            (decode_text_string(login.value())?, password)
        }
        None => (None, None),
    };

    Ok(ChannelSettings {
        channel_id: None,
        protocol: level.protocol,
        port: level.port,
        buffer_size: requested,
        destination,
        local_address,
        bearer,
        network_access_name,
        user_login,
        user_password,
    })
}
