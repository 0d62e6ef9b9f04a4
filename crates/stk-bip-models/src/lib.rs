#![deny(missing_docs)]

//! # STK BIP Models
//!
//! Wire-level types for the SIM Toolkit Bearer Independent Protocol.
//!
//! ## Object layout
//!
//! ```text
//! Proactive command (D0 envelope, card → terminal)
//! ├── COMMAND DETAILS       number | type | qualifier
//! ├── DEVICE IDENTITIES     source | destination (channel 0x21..0x27)
//! └── command objects       bearer, buffer size, channel data, ...
//!
//! Terminal response (terminal → card)
//! ├── COMMAND DETAILS       echoed
//! ├── DEVICE IDENTITIES     terminal → UICC
//! ├── RESULT                general result [+ additional info]
//! └── command payload       channel status, data, lengths
//!
//! Event download (D6 envelope, terminal → card)
//! ├── EVENT LIST            data available | channel status
//! ├── DEVICE IDENTITIES
//! └── CHANNEL STATUS [+ CHANNEL DATA LENGTH]
//! ```
//!
//! ## Module layout
//!
//! | Module | Contents |
//! |--------|----------|
//! | [`tlv`] | Comprehension-TLV decode/encode, BER envelopes, tag search |
//! | [`command`] | Command types, command details, device identities |
//! | [`result`] | General results and additional-information codes |
//! | [`bearer`] | Bearer description, transport level, addresses, buffer size |
//! | [`channel`] | Channel status word and BIP events |
//! | [`text`] | SIM alphabet, text strings, access point names |
//! | [`response`] | Terminal response and event download builders |

pub mod bearer;
pub mod channel;
pub mod command;
pub mod error;
pub mod response;
pub mod result;
pub mod text;
pub mod tlv;

pub use bearer::*;
pub use channel::*;
pub use command::*;
pub use error::*;
pub use response::*;
pub use result::*;
pub use tlv::{ComprehensionTlv, TlvTag};
