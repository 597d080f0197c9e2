use crate::{
  decode::Encoding,
  driver::{FilterGroup, Protocol},
  score::{self, Scorer, SLOT_COUNT},
  substitute::{DeobTable, UtfTable},
};
use std::{collections, error, fmt, net, str};

#[derive(Debug)]
pub enum ConfigError {
  UnknownKey(String),
  MalformedHexEscape(String),
  OutOfRange { key: String, value: String },
  MalformedIp { key: String, value: String },
  UnknownEncoding(String),
  UnmatchedPair(String),
  Regex { key: String, source: regex::Error },
}

impl fmt::Display for ConfigError {
  fn fmt(&self, formatter: &mut fmt::Formatter) -> fmt::Result {
    match self {
      ConfigError::UnknownKey(key) => write!(formatter, "unknown configuration key {key:?}"),
      ConfigError::MalformedHexEscape(value) => {
        write!(formatter, "malformed hex escape in {value:?}")
      }
      ConfigError::OutOfRange { key, value } => {
        write!(formatter, "{key}={value:?} is out of range")
      }
      ConfigError::MalformedIp { key, value } => {
        write!(formatter, "{key}={value:?} is not a valid IP address")
      }
      ConfigError::UnknownEncoding(value) => write!(formatter, "unknown encoding {value:?}"),
      ConfigError::UnmatchedPair(key) => {
        write!(formatter, "{key} is missing its matching from/to entry")
      }
      ConfigError::Regex { key, source } => write!(formatter, "{key}: {source}"),
    }
  }
}

impl error::Error for ConfigError {}

peg::parser! {
  grammar file() for str {
    // Matched length is constrained to exactly 4 or 8 by trying the longer alternative first;
    // anything else (malformed escape) falls through and is caught by the `![_]` end-anchor on
    // `line()`, which rejects any line that doesn't parse to completion. `\x00` on its own (two
    // hex digits, matching neither alternative above) is the documented delete escape and expands
    // to nothing rather than to a NUL character.
    rule hex_escape() -> Option<char>
      = "\\x" digits:$(['0'..='9' | 'a'..='f' | 'A'..='F']*<8>) {?
          u32::from_str_radix(digits, 16)
            .ok()
            .and_then(char::from_u32)
            .map(Some)
            .ok_or("hex escape is not a valid codepoint")
        }
      / "\\x" digits:$(['0'..='9' | 'a'..='f' | 'A'..='F']*<4>) {?
          u32::from_str_radix(digits, 16)
            .ok()
            .and_then(char::from_u32)
            .map(Some)
            .ok_or("hex escape is not a valid codepoint")
        }
      / "\\x00" { None }

    rule plain_char() -> Option<char>
      = !"\\x" c:[^ '\n' | '\r'] { Some(c) }

    rule value_char() -> Option<char>
      = hex_escape() / plain_char()

    rule value() -> String
      = chars:value_char()* { chars.into_iter().flatten().collect() }

    rule key() -> &'input str
      = $(['a'..='z' | 'A'..='Z' | '0'..='9' | '_']+)

    rule ws()
      = [' ' | '\t']*

    rule comment()
      = "#" [^ '\n' | '\r']*

    rule blank_line()
      = ws() comment()?

    rule keyvalue() -> (String, String)
      = ws() k:key() ws() "=" ws() v:value() ws() { (k.to_string(), v) }

    pub rule line() -> Option<(String, String)>
      = result:(kv:keyvalue() { Some(kv) } / blank_line() { None }) ![_] { result }
  }
}

fn parse_pairs(text: &str) -> Result<Vec<(String, String)>, ConfigError> {
  let mut pairs = Vec::new();
  for raw_line in text.lines() {
    match file::line(raw_line) {
      Ok(Some((key, value))) => pairs.push((key, value.trim_end().to_string())),
      Ok(None) => (),
      Err(_) => return Err(ConfigError::MalformedHexEscape(raw_line.to_string())),
    }
  }
  Ok(pairs)
}

#[derive(Clone, Debug)]
pub struct Config {
  pub threads: usize,
  pub ignore_start: usize,
  pub encoding: Encoding,
  pub strip_punctuation: collections::HashSet<char>,
  pub strip_whitespace: collections::HashSet<char>,
  pub skeletonize: bool,
  pub utf_table: UtfTable,
  pub deob_table: DeobTable,
  pub groups: Vec<FilterGroup>,
  pub log_directory: String,
}

#[derive(Clone)]
pub struct Loaded {
  pub config: Config,
  pub scorer: Scorer,
}

struct Raw {
  pairs: collections::HashMap<String, String>,
}

impl Raw {
  fn get(&self, key: &str) -> Option<&str> {
    self.pairs.get(key).map(String::as_str)
  }

  fn parse_numeric<T>(&self, key: &str) -> Result<Option<T>, ConfigError>
  where
    T: str::FromStr,
  {
    match self.get(key) {
      Some(value) => value
        .parse()
        .map(Some)
        .map_err(|_| ConfigError::OutOfRange {
          key: key.to_string(),
          value: value.to_string(),
        }),
      None => Ok(None),
    }
  }
}

pub fn load(text: &str) -> Result<Loaded, ConfigError> {
  let pairs = parse_pairs(text)?;
  let mut known = known_keys();
  let mut map = collections::HashMap::new();
  for (key, value) in pairs {
    if !known.remove(&key) && !is_indexed_key(&key) {
      return Err(ConfigError::UnknownKey(key));
    }
    map.insert(key, value);
  }
  let raw = Raw { pairs: map };

  let threads = raw
    .parse_numeric::<usize>("threads")?
    .unwrap_or(8)
    .clamp(1, 64);

  let ignore_start = raw.parse_numeric::<usize>("ignore_start")?.unwrap_or(0);

  let encoding = match raw.get("encoding") {
    Some(value) => parse_encoding(value)?,
    None => Encoding::Utf8,
  };

  let skeletonize = matches!(raw.get("skeletonize"), Some("true") | Some("1"));

  let strip_punctuation = raw
    .get("strip_punctuation")
    .map(|value| value.chars().collect())
    .unwrap_or_default();
  let strip_whitespace = raw
    .get("strip_whitespace")
    .map(|value| value.chars().collect())
    .unwrap_or_default();

  let log_directory = raw
    .get("log_directory")
    .unwrap_or("$ENV{XDG_RUNTIME_DIR}")
    .to_string();

  let mut utf_table = UtfTable::new();
  for i in 1..=SLOT_COUNT {
    let from_key = format!("utf_from{i}");
    let to_key = format!("utf_to{i}");
    match (raw.get(&from_key), raw.get(&to_key)) {
      (Some(from), Some(to)) => utf_table.push(
        &from.chars().collect::<Vec<char>>(),
        &to.chars().collect::<Vec<char>>(),
      ),
      (None, None) => (),
      (Some(_), None) => return Err(ConfigError::UnmatchedPair(to_key)),
      (None, Some(_)) => return Err(ConfigError::UnmatchedPair(from_key)),
    }
  }

  let mut deob_table = DeobTable::new();
  for i in 1..=SLOT_COUNT {
    let from_key = format!("deob_from{i}");
    let to_key = format!("deob_to{i}");
    match (raw.get(&from_key), raw.get(&to_key)) {
      (Some(from), Some(to)) => {
        deob_table.push(from.chars().collect(), to.chars().collect())
      }
      (None, None) => (),
      (Some(_), None) => return Err(ConfigError::UnmatchedPair(to_key)),
      (None, Some(_)) => return Err(ConfigError::UnmatchedPair(from_key)),
    }
  }

  let mut scorer = Scorer::new();
  for i in 1..=SLOT_COUNT {
    let regex_key = format!("regex{i}");
    let weight_key = format!("weight{i}");
    match (raw.get(&regex_key), raw.get(&weight_key)) {
      (Some(pattern), Some(weight)) => {
        let weight: u32 = weight.parse().map_err(|_| ConfigError::OutOfRange {
          key: weight_key.clone(),
          value: weight.to_string(),
        })?;
        if weight > 100 {
          return Err(ConfigError::OutOfRange {
            key: weight_key,
            value: weight.to_string(),
          });
        }
        let compiled = score::compile(pattern).map_err(|source| ConfigError::Regex {
          key: regex_key,
          source,
        })?;
        scorer.set(i - 1, compiled, weight);
      }
      (None, None) => (),
      (Some(_), None) => return Err(ConfigError::UnmatchedPair(weight_key)),
      (None, Some(_)) => return Err(ConfigError::UnmatchedPair(regex_key)),
    }
  }

  let mut groups = Vec::new();
  for i in 1..=8 {
    let protocol_key = format!("protocol{i}");
    let ip_key = format!("ip{i}");
    let port_key = format!("port{i}");
    if let Some(ip) = raw.get(&ip_key) {
      let ip: net::IpAddr = ip.parse().map_err(|_| ConfigError::MalformedIp {
        key: ip_key.clone(),
        value: ip.to_string(),
      })?;
      let protocol = match raw.get(&protocol_key) {
        Some("udp") | Some("UDP") => Protocol::Udp,
        _ => Protocol::Tcp,
      };
      let port = match raw.parse_numeric::<u16>(&port_key)? {
        Some(0) | None => None,
        Some(port) => Some(port),
      };
      groups.push(FilterGroup { protocol, ip, port });
    }
  }

  Ok(Loaded {
    config: Config {
      threads,
      ignore_start,
      encoding,
      strip_punctuation,
      strip_whitespace,
      skeletonize,
      utf_table,
      deob_table,
      groups,
      log_directory,
    },
    scorer,
  })
}

fn parse_encoding(value: &str) -> Result<Encoding, ConfigError> {
  match value.to_ascii_lowercase().as_str() {
    "utf8" => Ok(Encoding::Utf8),
    "utf16le" => Ok(Encoding::Utf16Le),
    "utf16be" => Ok(Encoding::Utf16Be),
    "utf32le" => Ok(Encoding::Utf32Le),
    "utf32be" => Ok(Encoding::Utf32Be),
    "unknown" => Ok(Encoding::Unknown),
    _ => Err(ConfigError::UnknownEncoding(value.to_string())),
  }
}

fn is_indexed_key(key: &str) -> bool {
  const PREFIXES: &[&str] = &[
    "utf_from", "utf_to", "deob_from", "deob_to", "regex", "weight", "protocol", "ip", "port",
  ];
  PREFIXES.iter().any(|prefix| {
    key
      .strip_prefix(prefix)
      .is_some_and(|suffix| !suffix.is_empty() && suffix.chars().all(|c| c.is_ascii_digit()))
  })
}

fn known_keys() -> collections::HashSet<String> {
  [
    "threads",
    "ignore_start",
    "encoding",
    "strip_punctuation",
    "strip_whitespace",
    "skeletonize",
    "log_directory",
  ]
  .into_iter()
  .map(String::from)
  .collect()
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn parses_scalar_keys() {
    let loaded = load("threads=4\nignore_start=2\nencoding=utf16le\nskeletonize=true\n").unwrap();
    assert_eq!(loaded.config.threads, 4);
    assert_eq!(loaded.config.ignore_start, 2);
    assert_eq!(loaded.config.encoding, Encoding::Utf16Le);
    assert!(loaded.config.skeletonize);
  }

  #[test]
  fn clamps_threads_into_range() {
    let loaded = load("threads=0\n").unwrap();
    assert_eq!(loaded.config.threads, 1);
    let loaded = load("threads=1000\n").unwrap();
    assert_eq!(loaded.config.threads, 64);
  }

  #[test]
  fn expands_hex_escapes() {
    let loaded = load("strip_punctuation=\\x0021\\x002e\n").unwrap();
    assert!(loaded.config.strip_punctuation.contains(&'!'));
    assert!(loaded.config.strip_punctuation.contains(&'.'));
  }

  #[test]
  fn delete_escape_expands_to_an_empty_string() {
    let loaded = load("deob_from1=x\ndeob_to1=\\x00\n").unwrap();
    let out = loaded.config.deob_table.apply(&['g', 'o', 'x', 'l', 'd']);
    assert_eq!(out, "gold".chars().collect::<Vec<char>>());
  }

  #[test]
  fn eight_digit_hex_escape_reaches_supplementary_plane() {
    let loaded = load("strip_punctuation=\\x0001f600\n").unwrap();
    assert!(loaded.config.strip_punctuation.contains(&'\u{1F600}'));
  }

  #[test]
  fn malformed_hex_escape_is_fatal() {
    assert!(load("strip_punctuation=\\xzz\n").is_err());
  }

  #[test]
  fn unknown_key_is_fatal() {
    assert!(matches!(
      load("bogus=1\n"),
      Err(ConfigError::UnknownKey(_))
    ));
  }

  #[test]
  fn out_of_range_weight_is_fatal() {
    assert!(matches!(
      load("regex1=gold\nweight1=250\n"),
      Err(ConfigError::OutOfRange { .. })
    ));
  }

  #[test]
  fn unmatched_regex_pair_is_fatal() {
    assert!(matches!(
      load("regex1=gold\n"),
      Err(ConfigError::UnmatchedPair(_))
    ));
  }

  #[test]
  fn malformed_ip_is_fatal() {
    assert!(matches!(
      load("ip1=not-an-ip\n"),
      Err(ConfigError::MalformedIp { .. })
    ));
  }

  #[test]
  fn malformed_regex_is_fatal() {
    assert!(matches!(
      load("regex1=[\nweight1=10\n"),
      Err(ConfigError::Regex { .. })
    ));
  }

  #[test]
  fn populates_substitution_tables_in_order() {
    let loaded = load("deob_from1=&amp;\ndeob_to1=&\nutf_from1=\u{00d6}\u{00dc}\nutf_to1=o\n").unwrap();
    assert!(!loaded.config.deob_table.is_empty());
    assert!(!loaded.config.utf_table.is_empty());
  }

  #[test]
  fn zero_port_omits_port_clause() {
    let loaded = load("ip1=127.0.0.1\nport1=0\n").unwrap();
    assert_eq!(loaded.config.groups[0].port, None);
  }

  #[test]
  fn comments_and_blank_lines_are_ignored() {
    let loaded = load("# comment\n\nthreads=2\n  # another\n").unwrap();
    assert_eq!(loaded.config.threads, 2);
  }
}
