/// An ordered `(from, to)` table. `UtfTable` is Phase A: every individual code point appearing in
/// any `from` maps to that pair's whole `to`. `DeobTable` is Phase B: every occurrence of the
/// whole `from` sequence maps to `to`, scanned left-to-right, greedy, non-overlapping.
#[derive(Clone, Debug, Default)]
pub struct UtfTable {
  // Flattened at construction time into individual (codepoint, replacement) entries so lookups at
  // substitution time are a single pass rather than a table scan per codepoint.
  entries: Vec<(char, Vec<char>)>,
}

impl UtfTable {
  pub fn new() -> Self {
    Self::default()
  }

  pub fn push(&mut self, from: &[char], to: &[char]) {
    for &codepoint in from {
      self.entries.push((codepoint, to.to_vec()));
    }
  }

  pub fn is_empty(&self) -> bool {
    self.entries.is_empty()
  }

  /// Phase A: replace every occurrence of a mapped codepoint with its whole replacement sequence.
  /// Earlier-pushed entries for the same codepoint win (first match in `entries`), matching
  /// config declaration order.
  pub fn apply(&self, sequence: &[char]) -> Vec<char> {
    if self.entries.is_empty() {
      return sequence.to_vec();
    }
    let mut out = Vec::with_capacity(sequence.len());
    for &codepoint in sequence {
      match self.entries.iter().find(|(from, _)| *from == codepoint) {
        Some((_, to)) => out.extend(to.iter().copied()),
        None => out.push(codepoint),
      }
    }
    out
  }
}

#[derive(Clone, Debug, Default)]
pub struct DeobTable {
  pairs: Vec<(Vec<char>, Vec<char>)>,
}

impl DeobTable {
  pub fn new() -> Self {
    Self::default()
  }

  pub fn push(&mut self, from: Vec<char>, to: Vec<char>) {
    self.pairs.push((from, to));
  }

  pub fn is_empty(&self) -> bool {
    self.pairs.is_empty()
  }

  /// Phase B: for each pair in declaration order, replace every non-overlapping occurrence of
  /// `from` with `to` over the *current* sequence, so later pairs see earlier pairs' output.
  pub fn apply(&self, sequence: &[char]) -> Vec<char> {
    let mut current = sequence.to_vec();
    for (from, to) in &self.pairs {
      if from.is_empty() {
        continue;
      }
      current = replace_non_overlapping(&current, from, to);
    }
    current
  }
}

fn replace_non_overlapping(haystack: &[char], from: &[char], to: &[char]) -> Vec<char> {
  let mut out = Vec::with_capacity(haystack.len());
  let mut i = 0;
  while i < haystack.len() {
    if i + from.len() <= haystack.len() && haystack[i..i + from.len()] == *from {
      out.extend(to.iter().copied());
      i += from.len();
    } else {
      out.push(haystack[i]);
      i += 1;
    }
  }
  out
}

/// Run Phase A (per-codepoint) then Phase B (whole-sequence) substitution over `sequence`.
pub fn substitute(sequence: &[char], utf: &UtfTable, deob: &DeobTable) -> Vec<char> {
  let after_utf = utf.apply(sequence);
  deob.apply(&after_utf)
}
