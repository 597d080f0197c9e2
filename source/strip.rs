use std::collections;

/// Emit only code points that are in neither set; order-preserving for survivors.
pub fn strip(
  sequence: &[char],
  punctuation: &collections::HashSet<char>,
  whitespace: &collections::HashSet<char>,
) -> Vec<char> {
  sequence
    .iter()
    .copied()
    .filter(|c| !punctuation.contains(c) && !whitespace.contains(c))
    .collect()
}
