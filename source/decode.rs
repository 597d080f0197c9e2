// Hand-rolled fixed-width decoders rather than a general-purpose encoding crate: the required
// behaviour at truncation/invalid boundaries (emit U+FFFD and resynchronise, rather than the
// WHATWG error-recovery algorithm) is specific enough to this detector that a purpose-built walk
// is both simpler and more obviously correct than bending a library decoder to match it. There is
// also no widely used crate that decodes UTF-32 at all.

use std::fmt;

#[derive(Copy, Clone, Debug, PartialEq, Eq, clap::ValueEnum)]
pub enum Encoding {
  Utf8,
  Utf16Le,
  Utf16Be,
  Utf32Le,
  Utf32Be,
  Unknown,
}

impl fmt::Display for Encoding {
  fn fmt(&self, formatter: &mut fmt::Formatter) -> fmt::Result {
    write!(formatter, "{self:?}")
  }
}

const TAG_UTF8: &str = "UTF8";
const TAG_UTF16LE: &str = "UTF16LE";
const TAG_UTF16BE: &str = "UTF16BE";
const TAG_UTF32LE: &str = "UTF32LE";
const TAG_UTF32BE: &str = "UTF32BE";

pub fn decode(bytes: &[u8], encoding: Encoding) -> Vec<char> {
  match encoding {
    Encoding::Utf8 => decode_utf8(bytes),
    Encoding::Utf16Le => decode_utf16(bytes, true),
    Encoding::Utf16Be => decode_utf16(bytes, false),
    Encoding::Utf32Le => decode_utf32(bytes, true),
    Encoding::Utf32Be => decode_utf32(bytes, false),
    Encoding::Unknown => decode_unknown(bytes),
  }
}

fn decode_unknown(bytes: &[u8]) -> Vec<char> {
  let mut out = Vec::new();
  for (tag, decoded) in [
    (TAG_UTF8, decode_utf8(bytes)),
    (TAG_UTF16LE, decode_utf16(bytes, true)),
    (TAG_UTF16BE, decode_utf16(bytes, false)),
    (TAG_UTF32LE, decode_utf32(bytes, true)),
    (TAG_UTF32BE, decode_utf32(bytes, false)),
  ] {
    out.extend(tag.chars());
    out.extend(decoded);
  }
  out
}

/// Lead-byte patterns: 0xxxxxxx / 110xxxxx / 1110xxxx / 11110xxx consume 1/2/3/4 bytes. A
/// continuation byte that doesn't match `10xxxxxx` resets at the offending byte (doesn't swallow
/// the rest of the buffer); a sequence cut off by end-of-buffer emits U+FFFD and stops, since
/// there's nothing left to resynchronise against.
fn decode_utf8(bytes: &[u8]) -> Vec<char> {
  let mut out = Vec::with_capacity(bytes.len());
  let mut i = 0;
  while i < bytes.len() {
    let lead = bytes[i];
    let len = if lead & 0x80 == 0 {
      1
    } else if lead & 0xe0 == 0xc0 {
      2
    } else if lead & 0xf0 == 0xe0 {
      3
    } else if lead & 0xf8 == 0xf0 {
      4
    } else {
      // Stray continuation byte or otherwise invalid lead byte.
      out.push(char::REPLACEMENT_CHARACTER);
      i += 1;
      continue;
    };
    if i + len > bytes.len() {
      out.push(char::REPLACEMENT_CHARACTER);
      break;
    }
    let mut valid = true;
    let mut value: u32 = match len {
      1 => lead as u32,
      2 => (lead & 0x1f) as u32,
      3 => (lead & 0x0f) as u32,
      _ => (lead & 0x07) as u32,
    };
    for byte in &bytes[i + 1..i + len] {
      if byte & 0xc0 != 0x80 {
        valid = false;
        break;
      }
      value = (value << 6) | (byte & 0x3f) as u32;
    }
    if !valid {
      out.push(char::REPLACEMENT_CHARACTER);
      i += 1;
      continue;
    }
    out.push(char::from_u32(value).unwrap_or(char::REPLACEMENT_CHARACTER));
    i += len;
  }
  out
}

fn read_u16(bytes: &[u8], little_endian: bool) -> u16 {
  if little_endian {
    u16::from_le_bytes([bytes[0], bytes[1]])
  } else {
    u16::from_be_bytes([bytes[0], bytes[1]])
  }
}

fn decode_utf16(bytes: &[u8], little_endian: bool) -> Vec<char> {
  let mut out = Vec::with_capacity(bytes.len() / 2);
  let mut i = 0;
  while i + 2 <= bytes.len() {
    let unit = read_u16(&bytes[i..i + 2], little_endian);
    if (0xd800..=0xdbff).contains(&unit) {
      if i + 4 <= bytes.len() {
        let low = read_u16(&bytes[i + 2..i + 4], little_endian);
        if (0xdc00..=0xdfff).contains(&low) {
          let high = (unit - 0xd800) as u32;
          let low = (low - 0xdc00) as u32;
          let codepoint = 0x10000 + (high << 10) + low;
          out.push(char::from_u32(codepoint).unwrap_or(char::REPLACEMENT_CHARACTER));
          i += 4;
          continue;
        }
      }
      out.push(char::REPLACEMENT_CHARACTER);
      i += 2;
      continue;
    }
    if (0xdc00..=0xdfff).contains(&unit) {
      out.push(char::REPLACEMENT_CHARACTER);
      i += 2;
      continue;
    }
    out.push(char::from_u32(unit as u32).unwrap_or(char::REPLACEMENT_CHARACTER));
    i += 2;
  }
  out
}

fn decode_utf32(bytes: &[u8], little_endian: bool) -> Vec<char> {
  let mut out = Vec::with_capacity(bytes.len() / 4);
  let mut i = 0;
  while i + 4 <= bytes.len() {
    let word = &bytes[i..i + 4];
    let value = if little_endian {
      u32::from_le_bytes([word[0], word[1], word[2], word[3]])
    } else {
      u32::from_be_bytes([word[0], word[1], word[2], word[3]])
    };
    i += 4;
    if value == 0 {
      continue;
    }
    out.push(char::from_u32(value).unwrap_or(char::REPLACEMENT_CHARACTER));
  }
  out
}
