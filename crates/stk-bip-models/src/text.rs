//! Text carried by proactive commands.
//!
//! Three encodings show up in the BIP command set:
//!
//! - ALPHA IDENTIFIER uses the SIM alphabet: GSM default alphabet in 8-bit
//!   form, or one of the UCS2 forms introduced by `0x80`, `0x81`, `0x82`
//!   (TS 102 221 annex A).
//! - TEXT STRING starts with a data coding scheme byte selecting GSM 7-bit
//!   packed, GSM 8-bit, or UCS2.
//! - NETWORK ACCESS NAME is a sequence of length-prefixed labels.

use crate::error::ModelError;

const GSM_BASIC: [char; 128] = [
    '@', '£', '$', '¥', 'è', 'é', 'ù', 'ì', 'ò', 'Ç', '\n', 'Ø', 'ø', '\r', 'Å', 'å',
    'Δ', '_', 'Φ', 'Γ', 'Λ', 'Ω', 'Π', 'Ψ', 'Σ', 'Θ', 'Ξ', '\u{1b}', 'Æ', 'æ', 'ß', 'É',
    ' ', '!', '"', '#', '¤', '%', '&', '\'', '(', ')', '*', '+', ',', '-', '.', '/',
    '0', '1', '2', '3', '4', '5', '6', '7', '8', '9', ':', ';', '<', '=', '>', '?',
    '¡', 'A', 'B', 'C', 'D', 'E', 'F', 'G', 'H', 'I', 'J', 'K', 'L', 'M', 'N', 'O',
    'P', 'Q', 'R', 'S', 'T', 'U', 'V', 'W', 'X', 'Y', 'Z', 'Ä', 'Ö', 'Ñ', 'Ü', '§',
    '¿', 'a', 'b', 'c', 'd', 'e', 'f', 'g', 'h', 'i', 'j', 'k', 'l', 'm', 'n', 'o',
    'p', 'q', 'r', 's', 't', 'u', 'v', 'w', 'x', 'y', 'z', 'ä', 'ö', 'ñ', 'ü', 'à',
];

const GSM_ESCAPE: u8 = 0x1B;

fn gsm_extension(septet: u8) -> Option<char> {
    Some(match septet {
        0x0A => '\u{c}',
        0x14 => '^',
        0x28 => '{',
        0x29 => '}',
        0x2F => '\\',
        0x3C => '[',
        0x3D => '~',
        0x3E => ']',
        0x40 => '|',
        0x65 => '€',
        _ => return None,
    })
}

/// Decode GSM default-alphabet characters stored one per byte.
///
/// `0xFF` marks unused trailing bytes and ends the text.
pub fn decode_gsm_unpacked(bytes: &[u8]) -> String {
    let mut out = String::with_capacity(bytes.len());
    let mut iter = bytes.iter().take_while(|b| **b != 0xFF);
    while let Some(&byte) = iter.next() {
        let septet = byte & 0x7F;
        if septet == GSM_ESCAPE {
            if let Some(&next) = iter.next() {
                out.push(gsm_extension(next & 0x7F).unwrap_or(' '));
            }
            continue;
        }
        out.push(GSM_BASIC[usize::from(septet)]);
    }
    out
}

/// Unpack GSM 7-bit packed septets.
pub fn unpack_septets(bytes: &[u8]) -> Vec<u8> {
    let count = bytes.len() * 8 / 7;
    let mut septets = Vec::with_capacity(count);
    for i in 0..count {
        let bit = i * 7;
        let byte = bit / 8;
        let shift = bit % 8;
        let mut value = u16::from(bytes[byte]) >> shift;
        if shift > 1 {
            if let Some(next) = bytes.get(byte + 1) {
                value |= u16::from(*next) << (8 - shift);
            }
        }
        #[allow(clippy::cast_possible_truncation)]
        septets.push((value & 0x7F) as u8);
    }
    // Seven spare bits in the last octet are filled with CR, not a character.
    if bytes.len() % 7 == 0 && septets.last() == Some(&0x0D) {
        septets.pop();
    }
    septets
}

fn decode_ucs2(bytes: &[u8], field: &'static str) -> Result<String, ModelError> {
    let units: Vec<u16> = bytes
        .chunks_exact(2)
        .map(|pair| u16::from_be_bytes([pair[0], pair[1]]))
        .take_while(|unit| *unit != 0xFFFF)
        .collect();
    String::from_utf16(&units).map_err(|e| ModelError::BadText {
        field,
        reason: e.to_string(),
    })
}

fn decode_ucs2_with_base(count: usize, base: u16, chars: &[u8]) -> Result<String, ModelError> {
    let mut out = String::with_capacity(count);
    for &byte in chars.iter().take(count) {
        if byte & 0x80 == 0 {
            out.push(GSM_BASIC[usize::from(byte)]);
        } else {
            let unit = u32::from(base) + u32::from(byte & 0x7F);
            let ch = char::from_u32(unit).ok_or(ModelError::BadText {
                field: "alpha identifier",
                reason: format!("invalid code point {unit:#06x}"),
            })?;
            out.push(ch);
        }
    }
    Ok(out)
}

/// Decode an ALPHA IDENTIFIER value.
///
/// # Errors
///
/// [`ModelError::TooShort`] when a UCS2 header is truncated,
/// [`ModelError::BadText`] when the UCS2 data is not valid UTF-16.
pub fn decode_alpha_id(bytes: &[u8]) -> Result<String, ModelError> {
    match bytes {
        [] => Ok(String::new()),
        [0x80, rest @ ..] => decode_ucs2(rest, "alpha identifier"),
        [0x81, count, base, chars @ ..] => {
            decode_ucs2_with_base(usize::from(*count), u16::from(*base) << 7, chars)
        }
        [0x82, count, hi, lo, chars @ ..] => {
            decode_ucs2_with_base(usize::from(*count), u16::from_be_bytes([*hi, *lo]), chars)
        }
        [0x81 | 0x82, ..] => Err(ModelError::TooShort {
            field: "alpha identifier",
            expected: 3,
            actual: bytes.len(),
        }),
        _ => Ok(decode_gsm_unpacked(bytes)),
    }
}

/// Decode a TEXT STRING value (data coding scheme byte + text).
///
/// An empty value means "no text" and yields `Ok(None)`.
///
/// # Errors
///
/// [`ModelError::Unsupported`] for an unknown coding scheme,
/// [`ModelError::BadText`] for invalid UCS2 data.
pub fn decode_text_string(bytes: &[u8]) -> Result<Option<String>, ModelError> {
    let Some((dcs, text)) = bytes.split_first() else {
        return Ok(None);
    };
    let text = match dcs & 0x0C {
        0x00 => decode_gsm_unpacked(&unpack_septets(text)),
        0x04 => decode_gsm_unpacked(text),
        0x08 => decode_ucs2(text, "text string")?,
        _ => {
            return Err(ModelError::Unsupported {
                field: "data coding scheme",
                value: u32::from(*dcs),
            })
        }
    };
    Ok(Some(text))
}

/// Decode a NETWORK ACCESS NAME value into dotted form.
///
/// # Errors
///
/// [`ModelError::BadText`] when a label length runs past the value.
pub fn decode_network_access_name(bytes: &[u8]) -> Result<String, ModelError> {
    let mut labels = Vec::new();
    let mut rest = bytes;
    while let Some((&len, tail)) = rest.split_first() {
        let len = usize::from(len);
        let label = tail.get(..len).ok_or_else(|| ModelError::BadText {
            field: "network access name",
            reason: format!("label of {len} bytes overruns value"),
        })?;
        labels.push(String::from_utf8_lossy(label).into_owned());
        rest = &tail[len..];
    }
    Ok(labels.join("."))
}

/// Encode a dotted access point name as NETWORK ACCESS NAME labels.
pub fn encode_network_access_name(name: &str) -> Vec<u8> {
    let mut out = Vec::with_capacity(name.len() + 1);
    for label in name.split('.').filter(|l| !l.is_empty()) {
        let bytes = &label.as_bytes()[..label.len().min(63)];
        #[allow(clippy::cast_possible_truncation)]
        out.push(bytes.len() as u8);
        out.extend_from_slice(bytes);
    }
    out
}
