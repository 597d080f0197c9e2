use crate::confusables::ConfusableMap;
use unicode_normalization::{char::is_combining_mark, UnicodeNormalization as _};

/// Full case fold, then NFKC; optionally sandwich a confusable-skeleton reduction between two NFD
/// passes, dropping combining marks after the first decomposition so accented Latin (e.g. "ü")
/// reduces to its base letter instead of base-letter-plus-diacritic; finally a `to_lowercase` pass
/// that is redundant after case folding for almost every script but is kept because a handful of
/// codepoints fold differently under the two algorithms.
pub fn normalize(sequence: &[char], skeletonize: bool, confusables: &ConfusableMap) -> Vec<char> {
  let text: String = sequence.iter().collect();
  let folded = caseless::default_case_fold_str(&text);
  let mut text: String = folded.nfkc().collect();

  if skeletonize {
    let mut decomposed: Vec<char> = text.nfd().filter(|c| !is_combining_mark(*c)).collect();
    confusables.replace_all(&mut decomposed);
    text = decomposed.into_iter().nfd().collect();
  }

  text.chars().flat_map(char::to_lowercase).collect()
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn nfkc_casefold_of_plain_ascii_is_itself() {
    let confusables = ConfusableMap::new();
    let sequence: Vec<char> = "Buy Gold".chars().collect();
    let cleaned = normalize(&sequence, false, &confusables);
    assert_eq!(cleaned.into_iter().collect::<String>(), "buy gold");
  }

  #[test]
  fn skeletonize_unifies_diaeresis_confusables() {
    let confusables = ConfusableMap::new();
    let sequence: Vec<char> = "bÜy gÖld".chars().collect();
    let cleaned = normalize(&sequence, true, &confusables);
    assert_eq!(cleaned.into_iter().collect::<String>(), "buy gold");
  }

  #[test]
  fn skeletonize_unifies_cyrillic_confusables() {
    let confusables = ConfusableMap::new();
    // "раrk" with Cyrillic а/р mixed into Latin letters.
    let sequence: Vec<char> = "\u{440}\u{430}rk".chars().collect();
    let cleaned = normalize(&sequence, true, &confusables);
    assert_eq!(cleaned.into_iter().collect::<String>(), "park");
  }

  #[test]
  fn disabled_skeletonize_leaves_confusables_untouched() {
    let confusables = ConfusableMap::new();
    let sequence: Vec<char> = "\u{430}".chars().collect(); // Cyrillic а
    let cleaned = normalize(&sequence, false, &confusables);
    assert_eq!(cleaned, vec!['\u{430}']);
  }

  #[test]
  fn tolerates_replacement_character() {
    let confusables = ConfusableMap::new();
    let sequence = vec![char::REPLACEMENT_CHARACTER, 'x'];
    let cleaned = normalize(&sequence, true, &confusables);
    assert_eq!(cleaned, vec![char::REPLACEMENT_CHARACTER, 'x']);
  }
}
