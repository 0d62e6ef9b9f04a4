//! Comprehension-TLV codec (ETSI TS 102 223 §8, annex C).
//!
//! A comprehension-TLV object is a `tag | length | value` triple:
//!
//! ```text
//! tag     1 byte, or 0x7F followed by a 2-byte big-endian tag.
//!         Bit 0x80 (one-byte form) / 0x8000 (two-byte form) is the
//!         comprehension-required flag and is not part of the tag value.
//! length  < 0x80          one byte
//!         0x81 LL         LL   >= 0x80
//!         0x82 LL LL      LLLL >= 0x100
//!         0x83 LL LL LL   >= 0x10000
//! value   `length` raw bytes
//! ```
//!
//! Decoding refuses non-minimal length encodings. A leading tag byte of
//! `0x00`, `0x80` or `0xFF` is padding some cards emit after the last
//! object, so it ends the sequence instead of failing it.

use serde::{Deserialize, Serialize};

use crate::error::TlvError;

/// Largest length the three-byte length form can carry.
pub const MAX_TLV_LENGTH: usize = 0x00FF_FFFF;

const TWO_BYTE_TAG_MARKER: u8 = 0x7F;
const CR_FLAG_ONE_BYTE: u8 = 0x80;
const CR_FLAG_TWO_BYTE: u16 = 0x8000;

// ---------------------------------------------------------------------------
// TlvTag
// ---------------------------------------------------------------------------

/// Simple-TLV tags used by the BIP command set (comprehension bit cleared).
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Hash, strum::Display, strum::EnumIter)]
#[repr(u16)]
pub enum TlvTag {
    /// Command number, type and qualifier.
    CommandDetails = 0x01,
    /// Source and destination device identities.
    DeviceIdentities = 0x02,
    /// General result plus additional information.
    Result = 0x03,
    /// Text shown to the user while the command runs.
    AlphaId = 0x05,
    /// Coded text string (login, password).
    TextString = 0x0D,
    /// List of events armed by SET UP EVENT LIST.
    EventList = 0x19,
    /// Icon qualifier and record number.
    IconId = 0x1E,
    /// Icon list for menu items.
    ItemIconIdList = 0x1F,
    /// Bearer type and parameters.
    BearerDescription = 0x35,
    /// Payload carried by SEND DATA / RECEIVE DATA.
    ChannelData = 0x36,
    /// Requested or available data length.
    ChannelDataLength = 0x37,
    /// Channel status word.
    ChannelStatus = 0x38,
    /// Requested buffer size.
    BufferSize = 0x39,
    /// UICC/terminal interface transport level.
    TransportLevel = 0x3C,
    /// Local or destination IP address.
    OtherAddress = 0x3E,
    /// Access point name.
    NetworkAccessName = 0x47,
    /// Text formatting attributes.
    TextAttribute = 0x50,
}

impl TlvTag {
    /// Numeric tag value without the comprehension-required bit.
    pub const fn code(self) -> u16 {
        self as u16
    }
}

/// BER tag of the proactive command envelope.
pub const PROACTIVE_COMMAND_TAG: u8 = 0xD0;
/// BER tag of the event download envelope.
pub const EVENT_DOWNLOAD_TAG: u8 = 0xD6;

// ---------------------------------------------------------------------------
// ComprehensionTlv
// ---------------------------------------------------------------------------

/// One decoded (or synthesized) comprehension-TLV object.
///
/// A leaf carries its raw value. A constructed object carries children and
/// serializes them, in order, as its value.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct ComprehensionTlv {
    tag: u16,
    comprehension_required: bool,
    value: Vec<u8>,
    children: Vec<ComprehensionTlv>,
}

impl ComprehensionTlv {
    /// Build a leaf object.
    pub fn new(tag: u16, comprehension_required: bool, value: impl Into<Vec<u8>>) -> Self {
        Self {
            tag,
            comprehension_required,
            value: value.into(),
            children: Vec::new(),
        }
    }

    /// Build a leaf object for a known tag with the comprehension bit set.
    pub fn required(tag: TlvTag, value: impl Into<Vec<u8>>) -> Self {
        Self::new(tag.code(), true, value)
    }

    /// Build a constructed object whose value is the encoding of `children`.
    pub fn constructed(tag: u16, comprehension_required: bool, children: Vec<ComprehensionTlv>) -> Self {
        Self {
            tag,
            comprehension_required,
            value: Vec::new(),
            children,
        }
    }

    /// Tag value, comprehension bit masked off.
    pub fn tag(&self) -> u16 {
        self.tag
    }

    /// Returns `true` if this object carries the given known tag.
    pub fn is(&self, tag: TlvTag) -> bool {
        self.tag == tag.code()
    }

    /// Comprehension-required flag.
    pub fn comprehension_required(&self) -> bool {
        self.comprehension_required
    }

    /// Length of the value field as it appears (or would appear) on the wire.
    pub fn length(&self) -> usize {
        if self.children.is_empty() {
            self.value.len()
        } else {
            self.children.iter().map(ComprehensionTlv::encoded_len).sum()
        }
    }

    /// Raw value bytes of a leaf object.
    pub fn value(&self) -> &[u8] {
        &self.value
    }

    /// Child objects of a constructed object.
    pub fn children(&self) -> &[ComprehensionTlv] {
        &self.children
    }

    /// Whether the tag fits the one-byte form.
    ///
    /// `0x00` and `0x7F` collide with padding and the two-byte marker, and
    /// anything above `0x7E` overlaps the comprehension bit.
    fn one_byte_tag(&self) -> bool {
        matches!(self.tag, 0x01..=0x7E)
    }

    /// Total number of bytes [`encode`](Self::encode) will append.
    pub fn encoded_len(&self) -> usize {
        let length = self.length();
        let tag_len = if self.one_byte_tag() { 1 } else { 3 };
        tag_len + length_field_len(length) + length
    }

    /// Append `tag | length | value` to `out`.
    ///
    /// # Errors
    ///
    /// [`TlvError::LengthTooLarge`] when this object or one of its children
    /// holds more than [`MAX_TLV_LENGTH`] bytes. Nothing is appended then.
    pub fn encode(&self, out: &mut Vec<u8>) -> Result<(), TlvError> {
        self.check_lengths()?;
        self.write(out);
        Ok(())
    }

    /// Encode into a fresh buffer.
    ///
    /// # Errors
    ///
    /// See [`encode`](Self::encode).
    pub fn to_bytes(&self) -> Result<Vec<u8>, TlvError> {
        let mut out = Vec::with_capacity(self.encoded_len());
        self.encode(&mut out)?;
        Ok(out)
    }

    fn check_lengths(&self) -> Result<(), TlvError> {
        let length = self.length();
        if length > MAX_TLV_LENGTH {
            return Err(TlvError::LengthTooLarge { length });
        }
        self.children.iter().try_for_each(ComprehensionTlv::check_lengths)
    }

    fn write(&self, out: &mut Vec<u8>) {
        if !self.one_byte_tag() {
            let mut tag = self.tag & !CR_FLAG_TWO_BYTE;
            if self.comprehension_required {
                tag |= CR_FLAG_TWO_BYTE;
            }
            out.push(TWO_BYTE_TAG_MARKER);
            out.extend_from_slice(&tag.to_be_bytes());
        } else {
            #[allow(clippy::cast_possible_truncation)]
            let mut tag = (self.tag as u8) & !CR_FLAG_ONE_BYTE;
            if self.comprehension_required {
                tag |= CR_FLAG_ONE_BYTE;
            }
            out.push(tag);
        }
        write_length(self.length(), out);
        if self.children.is_empty() {
            out.extend_from_slice(&self.value);
        } else {
            for child in &self.children {
                child.write(out);
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Decoding
// ---------------------------------------------------------------------------

/// Decode one object starting at `index`.
///
/// Returns `Ok(None)` when `index` is at the end of `data` or points at a
/// padding tag byte (`0x00`, `0x80`, `0xFF`). On success the second tuple
/// element is the index just past the decoded object.
///
/// # Errors
///
/// [`TlvError`] when the tag, length or value runs past the buffer, or the
/// length uses a non-minimal encoding.
pub fn decode(data: &[u8], index: usize) -> Result<Option<(ComprehensionTlv, usize)>, TlvError> {
    let Some(&first) = data.get(index) else {
        return Ok(None);
    };
    let mut cursor = index + 1;

    let (tag, comprehension_required) = match first {
        0x00 | 0x80 | 0xFF => return Ok(None),
        TWO_BYTE_TAG_MARKER => {
            let bytes = data.get(cursor..cursor + 2).ok_or(TlvError::UnexpectedEnd {
                offset: cursor,
                field: "tag",
            })?;
            cursor += 2;
            let raw = u16::from_be_bytes([bytes[0], bytes[1]]);
            (raw & !CR_FLAG_TWO_BYTE, raw & CR_FLAG_TWO_BYTE != 0)
        }
        byte => (u16::from(byte & !CR_FLAG_ONE_BYTE), byte & CR_FLAG_ONE_BYTE != 0),
    };

    let (length, after_length) = decode_length(data, cursor)?;
    cursor = after_length;

    let end = cursor.checked_add(length).filter(|end| *end <= data.len()).ok_or(
        TlvError::UnexpectedEnd {
            offset: data.len(),
            field: "value",
        },
    )?;

    let tlv = ComprehensionTlv::new(tag, comprehension_required, &data[cursor..end]);
    Ok(Some((tlv, end)))
}

/// Lazily decode consecutive objects starting at `index`.
///
/// The iterator yields at most one error and then stops.
pub fn decode_many(data: &[u8], index: usize) -> TlvIter<'_> {
    TlvIter {
        data,
        index,
        done: false,
    }
}

/// Decode every object in `data`, failing on the first malformed one.
///
/// # Errors
///
/// The first [`TlvError`] encountered.
pub fn decode_list(data: &[u8]) -> Result<Vec<ComprehensionTlv>, TlvError> {
    decode_many(data, 0).collect()
}

/// Iterator returned by [`decode_many`].
#[derive(Debug, Clone)]
pub struct TlvIter<'a> {
    data: &'a [u8],
    index: usize,
    done: bool,
}

impl Iterator for TlvIter<'_> {
    type Item = Result<ComprehensionTlv, TlvError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        match decode(self.data, self.index) {
            Ok(Some((tlv, next))) => {
                self.index = next;
                Some(Ok(tlv))
            }
            Ok(None) => {
                self.done = true;
                None
            }
            Err(e) => {
                self.done = true;
                Some(Err(e))
            }
        }
    }
}

impl std::iter::FusedIterator for TlvIter<'_> {}

/// Decode a BER length field at `index`, returning `(length, next_index)`.
///
/// # Errors
///
/// [`TlvError`] on overrun, an unknown prefix, or a non-minimal encoding.
pub fn decode_length(data: &[u8], index: usize) -> Result<(usize, usize), TlvError> {
    let prefix = *data.get(index).ok_or(TlvError::UnexpectedEnd {
        offset: index,
        field: "length",
    })?;
    if prefix < 0x80 {
        return Ok((usize::from(prefix), index + 1));
    }

    let (width, minimum) = match prefix {
        0x81 => (1, 0x80),
        0x82 => (2, 0x100),
        0x83 => (3, 0x1_0000),
        _ => return Err(TlvError::InvalidLengthPrefix { offset: index, prefix }),
    };
    let bytes = data
        .get(index + 1..index + 1 + width)
        .ok_or(TlvError::UnexpectedEnd {
            offset: index + 1,
            field: "length",
        })?;
    let value = bytes.iter().fold(0usize, |acc, b| (acc << 8) | usize::from(*b));
    if value < minimum {
        return Err(TlvError::NonCanonicalLength {
            offset: index,
            prefix,
            value,
        });
    }
    Ok((value, index + 1 + width))
}

/// Append the minimal BER encoding of `length` to `out`.
///
/// # Errors
///
/// [`TlvError::LengthTooLarge`] when `length` exceeds [`MAX_TLV_LENGTH`];
/// `out` is left untouched.
pub fn encode_length(length: usize, out: &mut Vec<u8>) -> Result<(), TlvError> {
    if length > MAX_TLV_LENGTH {
        return Err(TlvError::LengthTooLarge { length });
    }
    write_length(length, out);
    Ok(())
}

#[allow(clippy::cast_possible_truncation)]
fn write_length(length: usize, out: &mut Vec<u8>) {
    if length < 0x80 {
        out.push(length as u8);
    } else if length < 0x100 {
        out.extend_from_slice(&[0x81, length as u8]);
    } else if length < 0x1_0000 {
        out.extend_from_slice(&[0x82, (length >> 8) as u8, length as u8]);
    } else {
        out.extend_from_slice(&[0x83, (length >> 16) as u8, (length >> 8) as u8, length as u8]);
    }
}

fn length_field_len(length: usize) -> usize {
    match length {
        0..0x80 => 1,
        0x80..0x100 => 2,
        0x100..0x1_0000 => 3,
        _ => 4,
    }
}

/// Strip a BER envelope (`D0 len ...`) and return its contents.
///
/// # Errors
///
/// [`TlvError`] when the envelope length is malformed or overruns `data`.
pub fn unwrap_envelope(data: &[u8], envelope_tag: u8) -> Result<&[u8], TlvError> {
    match data.first() {
        Some(&tag) if tag == envelope_tag => {
            let (length, start) = decode_length(data, 1)?;
            data.get(start..start + length).ok_or(TlvError::UnexpectedEnd {
                offset: data.len(),
                field: "envelope",
            })
        }
        _ => Ok(data),
    }
}

/// Wrap already-encoded simple TLVs in a BER envelope.
///
/// # Errors
///
/// [`TlvError::LengthTooLarge`] when `contents` exceeds [`MAX_TLV_LENGTH`].
pub fn wrap_envelope(envelope_tag: u8, contents: &[u8]) -> Result<Vec<u8>, TlvError> {
    let mut out = Vec::with_capacity(contents.len() + 4);
    out.push(envelope_tag);
    encode_length(contents.len(), &mut out)?;
    out.extend_from_slice(contents);
    Ok(out)
}

// ---------------------------------------------------------------------------
// Searching
// ---------------------------------------------------------------------------

/// First object in `list` carrying `tag`.
pub fn search(list: &[ComprehensionTlv], tag: TlvTag) -> Option<&ComprehensionTlv> {
    list.iter().find(|tlv| tlv.is(tag))
}

/// First object carrying `tag` at or after position `from`, with its position.
///
/// Used for tags that may repeat within one command (two text strings,
/// local and destination addresses).
pub fn search_from(list: &[ComprehensionTlv], tag: TlvTag, from: usize) -> Option<(usize, &ComprehensionTlv)> {
    list.iter()
        .enumerate()
        .skip(from)
        .find(|(_, tlv)| tlv.is(tag))
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
