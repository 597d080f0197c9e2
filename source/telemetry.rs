use std::{fmt, sync, time};

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TelemetryRecord {
  pub dropped: bool,
  pub score: u32,
  pub match_bitmap: u16,
  pub elapsed: time::Duration,
  pub dump: String,
}

/// Hex+printable pane of `sequence`, 16 code points per row: each row is the hex code points
/// followed by a printable rendering (control and non-printable code points shown as `.`).
pub fn dump(sequence: &[char]) -> String {
  let mut out = String::new();
  for row in sequence.chunks(16) {
    for c in row {
      out.push_str(&format!("{:04x} ", *c as u32));
    }
    for _ in row.len()..16 {
      out.push_str("     ");
    }
    out.push_str(" |");
    for c in row {
      out.push(if c.is_control() { '.' } else { *c });
    }
    out.push('|');
    out.push('\n');
  }
  out
}

pub fn record(verdict: &crate::score::Verdict, elapsed: time::Duration, sequence: &[char]) -> TelemetryRecord {
  TelemetryRecord {
    dropped: verdict.drop(),
    score: verdict.score,
    match_bitmap: verdict.bitmap,
    elapsed,
    dump: dump(sequence),
  }
}

/// Mutex-serialised sink writing through the `log` facade at `info`, so concurrent workers never
/// interleave a single record's fields across log lines.
#[derive(Default)]
pub struct Sink {
  lock: sync::Mutex<()>,
}

impl Sink {
  pub fn new() -> Self {
    Self::default()
  }

  pub fn emit(&self, record: &TelemetryRecord) {
    let _guard = self.lock.lock().unwrap();
    log::info!("{record}");
  }
}

impl fmt::Display for TelemetryRecord {
  fn fmt(&self, formatter: &mut fmt::Formatter) -> fmt::Result {
    write!(
      formatter,
      "verdict={} score={} bitmap={:016b} elapsed={:?}\n{}",
      if self.dropped { "drop" } else { "forward" },
      self.score,
      self.match_bitmap,
      self.elapsed,
      self.dump,
    )
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::score::Verdict;
  use pretty_assertions::assert_eq;

  #[test]
  fn dump_wraps_at_sixteen_code_points_per_row() {
    let sequence: Vec<char> = "0123456789abcdefg".chars().collect();
    let rendered = dump(&sequence);
    assert_eq!(rendered.lines().count(), 2);
  }

  #[test]
  fn dump_renders_control_characters_as_dot() {
    let sequence = vec!['a', '\u{0007}', 'b'];
    let rendered = dump(&sequence);
    assert!(rendered.contains("a.b"));
  }

  #[test]
  fn record_reflects_verdict_fields() {
    let verdict = Verdict { score: 150, bitmap: 0b101 };
    let sequence: Vec<char> = "gold".chars().collect();
    let rec = record(&verdict, time::Duration::from_millis(3), &sequence);
    assert_eq!(
      rec,
      TelemetryRecord {
        dropped: true,
        score: 150,
        match_bitmap: 0b101,
        elapsed: time::Duration::from_millis(3),
        dump: dump(&sequence),
      }
    );
  }

  #[test]
  fn sink_emit_does_not_panic() {
    let sink = Sink::new();
    let verdict = Verdict { score: 0, bitmap: 0 };
    let sequence: Vec<char> = "hi".chars().collect();
    sink.emit(&record(&verdict, time::Duration::from_micros(1), &sequence));
  }
}
