//! # STK BIP runtime
//!
//! Runs the Bearer Independent Protocol side of a SIM Toolkit terminal:
//! decodes proactive commands, opens and drives up to seven data channels
//! over the host's mobile data connection, and answers the card with
//! terminal responses and event downloads.
//!
//! ```text
//! card bytes ─▶ CommandParamsFactory ─▶ ChannelManager ─▶ channel socket tasks
//!                     │ (icons)              │ (bearer)
//!                  IconLoader        BearerCoordinator ─▶ DataConnectivity
//! ```
//!
//! # Quick start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//!
//! use stk_bip::{BipConfig, BipService, CardMessage, DataConnectivity, NoIcons};
//!
//! # async fn run(connectivity: Arc<dyn DataConnectivity>, command: Vec<u8>) -> Result<(), stk_bip::BipError> {
//! let (service, handle, mut card) = BipService::new(BipConfig::from_env(), connectivity, Arc::new(NoIcons));
//! tokio::spawn(service.run());
//!
//! handle.proactive_command(command)?;
//! if let Some(CardMessage::TerminalResponse(bytes)) = card.recv().await {
//!     println!("terminal response: {}", hex::encode(bytes));
//! }
//! # Ok(())
//! # }
//! ```

pub mod bearer;
pub mod channel;
pub mod config;
pub mod error;
pub mod factory;
pub mod manager;
pub mod params;
pub mod service;
pub mod telephony;

pub use bearer::{BearerCoordinator, BearerNotice, BearerOutcome};
pub use channel::{BipChannel, Channel};
pub use config::BipConfig;
pub use error::{BipError, CommandError};
pub use factory::{CommandParamsFactory, FactoryOutcome};
pub use manager::{ChannelManager, Effect, Reply};
pub use params::{ChannelSettings, CommandParams, DataSettings, DecodedCommand, IconRef};
pub use service::{BipHandle, BipService, CardMessage, CardReceiver};
pub use telephony::{
    ApnRecord, ApnType, ConnectivityEvent, DataConnectivity, DataState, EnableResult, IconImage, IconLoader, NoIcons,
};
