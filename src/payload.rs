//! Tag memory decoding.
//!
//! Cart tags carry a single NDEF URI record of the form
//! `https://www.pura.com/ss?d=CARTID.xxx.CHECKSUM`; the cart id is the
//! `?d=` field.  Tags without the ST cart signature are read as a fixed
//! layout: the first [`FIXED_ID_LEN`] bytes are the cart id, the rest the
//! fragrance name, both NUL-terminated.

use deku::ctx::Endian;
use deku::prelude::*;
use log::{debug, warn};

use crate::config::{CartId, CartName};
use crate::error::PayloadError;

/// Blocks read from tag memory.
pub const BLOCK_COUNT: u8 = 16;
/// Bytes read from tag memory.
pub const MEMORY_LEN: usize = 64;
/// Cart id field width in the fixed layout.
pub const FIXED_ID_LEN: usize = 16;
/// Cart URL buffer size.
pub const CART_URL_LEN: usize = 128;

pub type CartUrl = heapless::String<CART_URL_LEN>;

const TLV_NULL: u8 = 0x00;
const TLV_LONG_LENGTH: u8 = 0xFF;
const TNF_WELL_KNOWN: u8 = 0x01;
const RECORD_TYPE_URI: u8 = b'U';
/// Message TLV starts right after the 4-byte capability container.
const TLV_OFFSET: usize = 4;
/// Longest cart id taken from a URL.
const URL_ID_MAX: usize = 31;

/// Tag memory layout, chosen from the UID.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Layout {
    Ndef,
    Fixed,
}

/// Decoded cart identity.  Empty strings mean "not present on the tag".
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CartPayload {
    pub cart_id: CartId,
    pub cart_url: CartUrl,
    /// Name embedded in the tag (fixed layout only).
    pub fragrance: CartName,
}

impl CartPayload {
    pub fn is_empty(&self) -> bool {
        self.cart_id.is_empty() && self.cart_url.is_empty() && self.fragrance.is_empty()
    }
}

/// Decode tag memory.
pub fn decode(memory: &[u8], layout: Layout) -> Result<CartPayload, PayloadError> {
    if memory.iter().all(|b| *b == 0) {
        return Err(PayloadError::Empty);
    }
    match layout {
        Layout::Ndef => decode_ndef(memory),
        Layout::Fixed => decode_fixed(memory),
    }
}

/// [`decode`], logging and swallowing failures.  A bad payload still
/// leaves the tag present; only its identity fields are blank.
pub fn decode_or_empty(memory: &[u8], layout: Layout) -> CartPayload {
    match decode(memory, layout) {
        Ok(p) => p,
        Err(PayloadError::Empty) => {
            debug!("tag memory blank");
            CartPayload::default()
        }
        Err(e) => {
            warn!("{e} ({layout:?}, {} bytes)", memory.len());
            CartPayload::default()
        }
    }
}

fn decode_ndef(mem: &[u8]) -> Result<CartPayload, PayloadError> {
    let area = mem.get(TLV_OFFSET..).ok_or(PayloadError::Malformed)?;
    let start = area
        .iter()
        .position(|b| *b != TLV_NULL)
        .ok_or(PayloadError::Malformed)?;
    let (_, tlv) = MessageTlv::from_bytes((&area[start..], 0)).map_err(|e| {
        debug!("NDEF: {e}");
        PayloadError::Malformed
    })?;
    debug!(
        "NDEF: message {} bytes, record payload {} bytes",
        tlv.length,
        tlv.record.payload_data.len()
    );
    if !tlv.record.is_uri() {
        return Err(PayloadError::Malformed);
    }

    let mut out = CartPayload::default();
    tlv.record.uri(&mut out.cart_url)?;
    if let Some(id) = cart_id_from_url(&out.cart_url) {
        push_truncated(&mut out.cart_id, id);
    }
    Ok(out)
}

// ---------------------------------------------------------------------------
// NDEF structures
// ---------------------------------------------------------------------------

/// TLV length: one byte, or `0xFF` followed by a big-endian `u16`.
fn tlv_length_reader<R: no_std_io::io::Read>(
    reader: &mut deku::reader::Reader<R>,
) -> Result<usize, DekuError> {
    let short = u8::from_reader_with_ctx(reader, Endian::Big)?;
    Ok(if short == TLV_LONG_LENGTH {
        u16::from_reader_with_ctx(reader, Endian::Big)?.into()
    } else {
        short.into()
    })
}

/// Payload length: one byte for short records, four otherwise.
fn payload_length_reader<R: no_std_io::io::Read>(
    reader: &mut deku::reader::Reader<R>,
    short_record: bool,
) -> Result<u32, DekuError> {
    Ok(if short_record {
        u8::from_reader_with_ctx(reader, Endian::Big)?.into()
    } else {
        u32::from_reader_with_ctx(reader, Endian::Big)?
    })
}

/// NDEF message TLV; only its first record is used.
#[derive(Debug, PartialEq, DekuRead)]
#[deku(magic = b"\x03")]
struct MessageTlv {
    #[deku(reader = "tlv_length_reader(deku::reader)")]
    length: usize,
    record: Record,
}

#[allow(dead_code)]
#[derive(Debug, PartialEq, DekuRead)]
struct Record {
    #[deku(bits = 1)]
    message_begin: bool,
    #[deku(bits = 1)]
    message_end: bool,
    #[deku(bits = 1)]
    chunked: bool,
    #[deku(bits = 1)]
    short_record: bool,
    #[deku(bits = 1)]
    id_present: bool,
    #[deku(bits = 3)]
    tnf: u8,
    type_length: u8,
    // Checked before the payload is read; tag memory is never larger.
    #[deku(reader = "payload_length_reader(deku::reader, *short_record)")]
    #[deku(assert = "*payload_length as usize <= MEMORY_LEN")]
    payload_length: u32,
    #[deku(cond = "*id_present", default = "0")]
    id_length: u8,
    #[deku(count = "type_length")]
    type_data: Vec<u8>,
    #[deku(count = "id_length")]
    id_data: Vec<u8>,
    #[deku(count = "payload_length")]
    payload_data: Vec<u8>,
}

impl Record {
    fn is_uri(&self) -> bool {
        self.message_begin
            && !self.chunked
            && self.tnf == TNF_WELL_KNOWN
            && self.type_data == [RECORD_TYPE_URI]
    }

    /// Expand the URI identifier code and append the rest of the URI.
    fn uri(&self, out: &mut CartUrl) -> Result<(), PayloadError> {
        let (&code, rest) = self
            .payload_data
            .split_first()
            .ok_or(PayloadError::Malformed)?;
        let body = core::str::from_utf8(rest).map_err(|_| PayloadError::Malformed)?;
        if body.is_empty() {
            return Err(PayloadError::Malformed);
        }
        push_truncated(out, uri_prefix(code));
        push_truncated(out, body);
        Ok(())
    }
}

fn uri_prefix(code: u8) -> &'static str {
    match code {
        0x01 => "http://www.",
        0x02 => "https://www.",
        0x03 => "http://",
        0x04 => "https://",
        _ => "",
    }
}

fn decode_fixed(mem: &[u8]) -> Result<CartPayload, PayloadError> {
    let split = FIXED_ID_LEN.min(mem.len());
    let id = nul_trimmed(&mem[..split])?;
    let name = nul_trimmed(&mem[split..])?;
    if id.is_empty() && name.is_empty() {
        return Err(PayloadError::Empty);
    }

    let mut out = CartPayload::default();
    push_truncated(&mut out.cart_id, id);
    push_truncated(&mut out.fragrance, name);
    Ok(out)
}

/// Text between `?d=` and the next `.`; `None` without a terminating dot.
pub fn cart_id_from_url(url: &str) -> Option<&str> {
    let start = url.find("?d=")? + 3;
    let rest = &url[start..];
    let end = rest.find('.')?;
    let id = &rest[..end];
    Some(truncate_at_char_boundary(id, URL_ID_MAX))
}

fn nul_trimmed(bytes: &[u8]) -> Result<&str, PayloadError> {
    let end = bytes.iter().position(|b| *b == 0).unwrap_or(bytes.len());
    let s = core::str::from_utf8(&bytes[..end]).map_err(|_| PayloadError::Malformed)?;
    if s.chars().any(char::is_control) {
        return Err(PayloadError::Malformed);
    }
    Ok(s)
}

fn truncate_at_char_boundary(s: &str, max: usize) -> &str {
    if s.len() <= max {
        return s;
    }
    let mut end = max;
    while !s.is_char_boundary(end) {
        end -= 1;
    }
    &s[..end]
}

/// Append as much of `s` as fits.
fn push_truncated<const N: usize>(dst: &mut heapless::String<N>, s: &str) {
    let room = N - dst.len();
    let _ = dst.push_str(truncate_at_char_boundary(s, room));
}
