// A curated subset of the Unicode TR-39 "recommended confusable mapping" data, covering the
// lookalikes most commonly seen in evasive spam. Entries are sorted by descending `from` length so
// `replace_all` can do longest-match-first without a separate sort step at call time; ties keep
// the declaration order below.
//
// https://www.unicode.org/reports/tr39/#Confusable_Detection

pub struct ConfusableMap {
  entries: Vec<(&'static str, &'static str)>,
}

// (from, to) pairs, grouped loosely by source script. `to` is always plain ASCII so that after
// skeletonisation a regex authored in ASCII can match regardless of which confusable was used.
const TABLE: &[(&str, &str)] = &[
  // Cyrillic lookalikes.
  ("а", "a"),
  ("А", "a"),
  ("в", "b"),
  ("В", "b"),
  ("с", "c"),
  ("С", "c"),
  ("е", "e"),
  ("Е", "e"),
  ("н", "h"),
  ("Н", "h"),
  ("і", "i"),
  ("І", "i"),
  ("ј", "j"),
  ("К", "k"),
  ("м", "m"),
  ("М", "m"),
  ("о", "o"),
  ("О", "o"),
  ("р", "p"),
  ("Р", "p"),
  ("т", "t"),
  ("Т", "t"),
  ("у", "y"),
  ("У", "y"),
  ("х", "x"),
  ("Х", "x"),
  ("ѕ", "s"),
  ("ԁ", "d"),
  ("ѡ", "w"),
  // Greek lookalikes.
  ("α", "a"),
  ("Α", "a"),
  ("β", "b"),
  ("Β", "b"),
  ("ε", "e"),
  ("Ε", "e"),
  ("ι", "i"),
  ("Ι", "i"),
  ("κ", "k"),
  ("Κ", "k"),
  ("ν", "v"),
  ("Ν", "n"),
  ("ο", "o"),
  ("Ο", "o"),
  ("ρ", "p"),
  ("Ρ", "p"),
  ("τ", "t"),
  ("Τ", "t"),
  ("υ", "u"),
  ("Υ", "y"),
  ("χ", "x"),
  ("Χ", "x"),
  ("ℓ", "l"),
  // Latin-1 / Latin Extended diacritics that survive NFD+confusable but benefit from an explicit
  // entry anyway (multi-codepoint confusables the bare Unicode decomposition wouldn't unify).
  ("æ", "ae"),
  ("Æ", "ae"),
  ("œ", "oe"),
  ("Œ", "oe"),
  ("ø", "o"),
  ("Ø", "o"),
  ("ð", "d"),
  ("Ð", "d"),
  ("þ", "th"),
  ("Þ", "th"),
  ("ß", "ss"),
  ("ſ", "s"),
  // Fullwidth Latin (U+FF00 block), a common RMT-spam evasion.
  ("ａ", "a"),
  ("ｂ", "b"),
  ("ｃ", "c"),
  ("ｄ", "d"),
  ("ｅ", "e"),
  ("ｆ", "f"),
  ("ｇ", "g"),
  ("ｈ", "h"),
  ("ｉ", "i"),
  ("ｊ", "j"),
  ("ｋ", "k"),
  ("ｌ", "l"),
  ("ｍ", "m"),
  ("ｎ", "n"),
  ("ｏ", "o"),
  ("ｐ", "p"),
  ("ｑ", "q"),
  ("ｒ", "r"),
  ("ｓ", "s"),
  ("ｔ", "t"),
  ("ｕ", "u"),
  ("ｖ", "v"),
  ("ｗ", "w"),
  ("ｘ", "x"),
  ("ｙ", "y"),
  ("ｚ", "z"),
  // Mathematical alphanumeric lookalikes (a small, commonly abused sample).
  ("𝐚", "a"),
  ("𝐛", "b"),
  ("𝐜", "c"),
  ("𝗀", "g"),
  ("𝗈", "o"),
  ("𝗅", "l"),
  ("ℊ", "g"),
  ("０", "0"),
  ("１", "1"),
  ("２", "2"),
  ("３", "3"),
  ("４", "4"),
  ("５", "5"),
  ("６", "6"),
  ("７", "7"),
  ("８", "8"),
  ("９", "9"),
  // Digit/letter lookalikes frequently used in leet-speak, folded here rather than left to C3 so
  // skeletonisation alone already defeats the simplest obfuscation.
  ("Ⅰ", "i"),
  ("Ⅴ", "v"),
  ("Ⅹ", "x"),
];

impl ConfusableMap {
  pub fn new() -> Self {
    let mut entries: Vec<(&'static str, &'static str)> = TABLE.to_vec();
    entries.sort_by(|(a, _), (b, _)| b.chars().count().cmp(&a.chars().count()));
    Self { entries }
  }

  /// Full ordered replacement, longest `from` first among entries of the same length. Runs in a
  /// single left-to-right, greedy, non-overlapping scan, same discipline as the deob table
  /// (source/substitute.rs).
  pub fn replace_all(&self, sequence: &mut Vec<char>) {
    if self.entries.is_empty() || sequence.is_empty() {
      return;
    }
    let mut output = Vec::with_capacity(sequence.len());
    let mut i = 0;
    'outer: while i < sequence.len() {
      for (from, to) in &self.entries {
        let from: Vec<char> = from.chars().collect();
        if from.is_empty() || i + from.len() > sequence.len() {
          continue;
        }
        if sequence[i..i + from.len()] == from[..] {
          output.extend(to.chars());
          i += from.len();
          continue 'outer;
        }
      }
      output.push(sequence[i]);
      i += 1;
    }
    *sequence = output;
  }
}

impl Default for ConfusableMap {
  fn default() -> Self {
    Self::new()
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn reduces_cyrillic_lookalikes() {
    let map = ConfusableMap::new();
    // Cyrillic "а" (U+0430), not NFD-decomposable, so only the confusable table unifies it.
    let mut sequence: Vec<char> = "а".chars().collect();
    map.replace_all(&mut sequence);
    assert_eq!(sequence, vec!['a']);
  }

  #[test]
  fn longest_match_wins() {
    let map = ConfusableMap::new();
    let mut sequence: Vec<char> = "Æ".chars().collect();
    map.replace_all(&mut sequence);
    assert_eq!(sequence, vec!['a', 'e']);
  }

  #[test]
  fn leaves_unmapped_codepoints_alone() {
    let map = ConfusableMap::new();
    let mut sequence: Vec<char> = "gold!".chars().collect();
    let before = sequence.clone();
    map.replace_all(&mut sequence);
    assert_eq!(sequence, before);
  }
}
