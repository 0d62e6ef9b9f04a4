//! Runtime error types.
//!
//! Two kinds of failure exist in this crate:
//!
//! - [`CommandError`] is a failed proactive command. It is never
//!   propagated past the actor: it always becomes a terminal response.
//! - [`BipError`] covers everything around the card protocol (the actor
//!   has stopped, a socket failed, a collaborator gave up).

use stk_bip_models::{terminal_cause, BipCause, ModelError, ResultCode, TlvError};

/// A proactive command that could not be carried out.
///
/// Carries the general result and optional additional information that go
/// into the terminal response.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("{result} (additional info {additional_info:?})")]
pub struct CommandError {
    /// General result for the terminal response.
    pub result: ResultCode,
    /// Additional information byte.
    pub additional_info: Option<u8>,
}

impl CommandError {
    /// A failure with no additional information.
    pub fn new(result: ResultCode) -> Self {
        Self {
            result,
            additional_info: None,
        }
    }

    /// A BIP error with a specific cause.
    pub fn bip(cause: BipCause) -> Self {
        Self {
            result: ResultCode::BipError,
            additional_info: Some(cause.code()),
        }
    }

    /// The terminal is busy on a call.
    pub fn busy_on_call() -> Self {
        Self {
            result: ResultCode::TerminalUnableToProcess,
            additional_info: Some(terminal_cause::BUSY_ON_CALL),
        }
    }

    /// The network could not provide the bearer.
    pub fn network_unable() -> Self {
        Self {
            result: ResultCode::NetworkUnableToProcess,
            additional_info: Some(0x00),
        }
    }

    /// Shorthand for "command data not understood".
    pub fn data_not_understood() -> Self {
        Self::new(ResultCode::CommandDataNotUnderstood)
    }

    /// Shorthand for "required values missing".
    pub fn values_missing() -> Self {
        Self::new(ResultCode::RequiredValuesMissing)
    }

    /// Shorthand for "beyond terminal capability".
    pub fn beyond_capability() -> Self {
        Self::new(ResultCode::BeyondTerminalCapability)
    }
}

impl From<TlvError> for CommandError {
    fn from(_: TlvError) -> Self {
        Self::data_not_understood()
    }
}

impl From<ModelError> for CommandError {
    fn from(_: ModelError) -> Self {
        Self::data_not_understood()
    }
}

/// Errors surfaced by the runtime outside the card protocol.
#[derive(Debug, thiserror::Error)]
pub enum BipError {
    /// The service actor is no longer running.
    #[error("BIP service stopped")]
    ServiceStopped,

    /// An icon could not be loaded from card storage.
    #[error("icon load failed: {0}")]
    IconLoad(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bip_error_carries_cause() {
        let err = CommandError::bip(BipCause::NoChannelAvailable);
        assert_eq!(err.result, ResultCode::BipError);
        assert_eq!(err.additional_info, Some(0x01));
    }

    #[test]
    fn decode_failures_map_to_data_not_understood() {
        let err: CommandError = TlvError::UnexpectedEnd {
            offset: 0,
            field: "tag",
        }
        .into();
        assert_eq!(err, CommandError::data_not_understood());
    }

    #[test]
    fn error_display() {
        assert_eq!(BipError::ServiceStopped.to_string(), "BIP service stopped");
        assert_eq!(
            CommandError::busy_on_call().to_string(),
            "TerminalUnableToProcess (additional info Some(2))"
        );
    }
}
