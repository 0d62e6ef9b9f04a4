//! Host telephony collaborators.
//!
//! The runtime does not own the data connection, the carrier's access
//! point list or card storage. It talks to them through the traits here;
//! connectivity changes come back in through
//! [`BipHandle::connectivity_changed`](crate::BipHandle::connectivity_changed).

use std::convert::Infallible;
use std::fmt;
use std::str::FromStr;

use futures::future::BoxFuture;
use serde::{Deserialize, Serialize};

use crate::error::BipError;

// ---------------------------------------------------------------------------
// ApnType
// ---------------------------------------------------------------------------

/// Access point type tag (`"default"`, `"bip"`, ...).
///
/// ```
/// use stk_bip::ApnType;
///
/// let bip: ApnType = "bip".into();
/// assert_eq!(bip.to_string(), "bip");
/// assert!(ApnType::default_type().is_default());
/// ```
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq, Hash)]
pub struct ApnType(String);

impl ApnType {
    /// Create an `ApnType` from a string slice.
    pub fn new(kind: &str) -> Self {
        Self(kind.to_string())
    }

    /// The type of the default data connection.
    pub fn default_type() -> Self {
        Self::new("default")
    }

    /// Returns `true` for the default data connection.
    pub fn is_default(&self) -> bool {
        self.0 == "default"
    }

    /// Return the inner string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ApnType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ApnType {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl From<String> for ApnType {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl FromStr for ApnType {
    type Err = Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self(s.to_string()))
    }
}

// ---------------------------------------------------------------------------
// Connectivity
// ---------------------------------------------------------------------------

/// Connection state of one access point type.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, strum::Display)]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE")]
pub enum DataState {
    /// No connection.
    Disconnected,
    /// Connection being brought up.
    Connecting,
    /// Connection up.
    Connected,
    /// Connection up but unusable (voice call on a non-DTM network).
    Suspended,
}

/// Outcome of asking the host to enable an access point type.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, strum::Display)]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE")]
pub enum EnableResult {
    /// The type is already connected.
    AlreadyActive,
    /// A connection request was started; a connectivity event will follow.
    RequestStarted,
    /// No access point currently carries this type.
    TypeNotAvailable,
    /// The request was refused.
    RequestFailed,
}

/// One access point record from the carrier configuration.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct ApnRecord {
    /// Access point name (`internet.example.com`).
    pub name: String,
    /// Types this record serves.
    pub types: Vec<ApnType>,
}

impl ApnRecord {
    /// Returns `true` if the record serves `apn_type`.
    pub fn serves(&self, apn_type: &ApnType) -> bool {
        self.types.iter().any(|t| t == apn_type)
    }
}

/// A connectivity change reported by the host.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct ConnectivityEvent {
    /// Access point type the change applies to.
    pub apn_type: ApnType,
    /// New state.
    pub state: DataState,
    /// Another bearer is being tried instead (the loss is not final).
    pub is_failover: bool,
}

/// The host's data connection and access point store.
pub trait DataConnectivity: Send + Sync {
    /// Ask for `apn_type` to be brought up.
    fn enable_apn_type(&self, apn_type: &ApnType) -> EnableResult;

    /// Release a previous [`enable_apn_type`](Self::enable_apn_type).
    fn disable_apn_type(&self, apn_type: &ApnType);

    /// Current state of `apn_type`.
    fn apn_state(&self, apn_type: &ApnType) -> DataState;

    /// Whether mobile data is allowed at all.
    fn is_data_allowed(&self) -> bool;

    /// Whether a voice call is in progress.
    fn is_voice_call_active(&self) -> bool;

    /// Access point records for the current carrier.
    fn apn_records(&self) -> Vec<ApnRecord>;

    /// Insert or replace (by name) an access point record.
    fn insert_apn(&self, record: ApnRecord);
}

// ---------------------------------------------------------------------------
// Icons
// ---------------------------------------------------------------------------

/// Raw image loaded from an `EF(IMG)` record.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct IconImage {
    /// Record number the image came from.
    pub record: u8,
    /// Image body as stored on the card.
    pub data: Vec<u8>,
}

/// Loads icons from card storage.
pub trait IconLoader: Send + Sync {
    /// Load the images for the given record numbers.
    fn load_icons(&self, records: Vec<u8>) -> BoxFuture<'static, Result<Vec<IconImage>, BipError>>;
}

/// An [`IconLoader`] for terminals without icon support.
///
/// Every load fails, so commands with icons complete as "icon not displayed".
#[derive(Debug, Clone, Copy, Default)]
pub struct NoIcons;

impl IconLoader for NoIcons {
    fn load_icons(&self, _records: Vec<u8>) -> BoxFuture<'static, Result<Vec<IconImage>, BipError>> {
        Box::pin(async { Err(BipError::IconLoad("icons not supported".into())) })
    }
}
