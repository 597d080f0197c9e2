use std::{error, fmt, sync};

pub const SLOT_COUNT: usize = 16;
pub const DROP_THRESHOLD: u32 = 100;

#[derive(Debug)]
pub struct ScoreError {
  pub slot: usize,
}

impl fmt::Display for ScoreError {
  fn fmt(&self, formatter: &mut fmt::Formatter) -> fmt::Result {
    write!(formatter, "regex slot {} failed to evaluate", self.slot)
  }
}

impl error::Error for ScoreError {}

#[derive(Clone)]
pub struct Slot {
  pub pattern: sync::Arc<regex::Regex>,
  pub weight: u32,
}

/// Up to [`SLOT_COUNT`] slots, empty ones left as `None`. `regex::Regex` is `Send + Sync` and
/// matches without interior mutation, so an `Arc` is shared across workers directly rather than
/// cloned per-thread matcher state.
#[derive(Clone, Default)]
pub struct Scorer {
  slots: Vec<Option<Slot>>,
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct Verdict {
  pub score: u32,
  pub bitmap: u16,
}

impl Verdict {
  pub fn drop(&self) -> bool {
    self.score >= DROP_THRESHOLD
  }
}

/// Test/fault-injection hook: when set, `evaluate_slot` for the named index fails instead of
/// matching, exercising the per-slot failure-isolation path without needing an actually-malformed
/// pattern (which the config loader already rejects before a `Scorer` is ever built).
pub type FailureHook = sync::Arc<dyn Fn(usize) -> bool + Send + Sync>;

impl Scorer {
  pub fn new() -> Self {
    Self {
      slots: (0..SLOT_COUNT).map(|_| None).collect(),
    }
  }

  pub fn set(&mut self, index: usize, pattern: regex::Regex, weight: u32) {
    self.slots[index] = Some(Slot {
      pattern: sync::Arc::new(pattern),
      weight,
    });
  }

  pub fn max_score(&self) -> u32 {
    self.slots.iter().flatten().map(|slot| slot.weight).sum()
  }

  pub fn score(&self, sequence: &[char]) -> Verdict {
    self.score_with_hook(sequence, None)
  }

  pub fn score_with_hook(&self, sequence: &[char], fail: Option<&FailureHook>) -> Verdict {
    let text: String = sequence.iter().collect();
    let mut score = 0u32;
    let mut bitmap = 0u16;
    for (index, slot) in self.slots.iter().enumerate() {
      let Some(slot) = slot else { continue };
      match evaluate_slot(slot, &text, index, fail) {
        Ok(true) => {
          score += slot.weight;
          bitmap |= 1 << index;
        }
        Ok(false) => (),
        Err(error) => log::warn!("{error}"),
      }
    }
    Verdict { score, bitmap }
  }
}

fn evaluate_slot(
  slot: &Slot,
  text: &str,
  index: usize,
  fail: Option<&FailureHook>,
) -> Result<bool, ScoreError> {
  if let Some(fail) = fail {
    if fail(index) {
      return Err(ScoreError { slot: index });
    }
  }
  Ok(slot.pattern.is_match(text))
}

/// Compile a slot pattern with case-insensitive matching, as every slot must be; callers invoke
/// this eagerly at config-load time so a malformed pattern is a fatal startup error, not a
/// runtime one.
pub fn compile(pattern: &str) -> Result<regex::Regex, regex::Error> {
  regex::RegexBuilder::new(pattern).case_insensitive(true).build()
}
