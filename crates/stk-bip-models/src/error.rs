//! Error types for the `stk-bip-models` crate.
//!
//! Decoding raw card bytes, or encoding an oversized object, fails with
//! [`TlvError`]; building typed values out of well-formed TLVs fails with
//! [`ModelError`].

/// Errors produced while decoding or encoding comprehension-TLV objects.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TlvError {
    /// The buffer ended in the middle of a tag, length or value field.
    #[error("unexpected end of data at offset {offset} while reading {field}")]
    UnexpectedEnd {
        /// Offset at which more bytes were needed.
        offset: usize,
        /// Which part of the object was being read.
        field: &'static str,
    },

    /// A multi-byte length field did not use its minimal encoding.
    #[error("non-canonical length encoding at offset {offset}: prefix {prefix:#04x} carries {value:#x}")]
    NonCanonicalLength {
        /// Offset of the length-of-length prefix.
        offset: usize,
        /// The `0x81`/`0x82`/`0x83` prefix byte.
        prefix: u8,
        /// The decoded length value.
        value: usize,
    },

    /// The length-of-length prefix was not one of `0x81`, `0x82`, `0x83`.
    #[error("invalid length prefix {prefix:#04x} at offset {offset}")]
    InvalidLengthPrefix {
        /// Offset of the prefix byte.
        offset: usize,
        /// The offending byte.
        prefix: u8,
    },

    /// A length did not fit the three-byte length form.
    #[error("length {length:#x} exceeds the largest encodable length")]
    LengthTooLarge {
        /// The rejected length.
        length: usize,
    },
}

/// Errors produced when interpreting the value of a well-formed TLV.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ModelError {
    /// A value field was shorter than its type requires.
    #[error("{field}: expected at least {expected} bytes, got {actual}")]
    TooShort {
        /// The name of the field.
        field: &'static str,
        /// Minimum number of bytes.
        expected: usize,
        /// Number of bytes present.
        actual: usize,
    },

    /// A value was outside the range its type allows.
    #[error("{field}: unsupported value {value:#04x}")]
    Unsupported {
        /// The name of the field.
        field: &'static str,
        /// The raw value.
        value: u32,
    },

    /// A text field used an encoding that could not be decoded.
    #[error("{field}: undecodable text ({reason})")]
    BadText {
        /// The name of the field.
        field: &'static str,
        /// Human-readable explanation.
        reason: String,
    },
}
