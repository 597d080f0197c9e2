use crate::{config::Config, confusables::ConfusableMap, decode, normalize, score, strip, substitute};

/// Run the decode -> normalise -> substitute -> strip -> score chain over one packet's payload,
/// returning both the verdict and the cleaned sequence the telemetry dump is rendered from.
pub fn clean_and_score(
  payload: &[u8],
  config: &Config,
  confusables: &ConfusableMap,
  scorer: &score::Scorer,
) -> (score::Verdict, Vec<char>) {
  clean_and_score_with_hook(payload, config, confusables, scorer, None)
}

/// Same as [`clean_and_score`], but scoring runs through [`score::Scorer::score_with_hook`] so a
/// test can force a chosen slot to fail without an actually-malformed pattern.
pub fn clean_and_score_with_hook(
  payload: &[u8],
  config: &Config,
  confusables: &ConfusableMap,
  scorer: &score::Scorer,
  fail: Option<&score::FailureHook>,
) -> (score::Verdict, Vec<char>) {
  let decoded = decode::decode(payload, config.encoding);
  let normalized = normalize::normalize(&decoded, config.skeletonize, confusables);
  let substituted = substitute::substitute(&normalized, &config.utf_table, &config.deob_table);
  let cleaned = strip::strip(&substituted, &config.strip_punctuation, &config.strip_whitespace);
  let verdict = scorer.score_with_hook(&cleaned, fail);
  (verdict, cleaned)
}

/// The payload is everything past the configured `ignore_start` prefix; a packet shorter than
/// that prefix yields an empty payload rather than panicking.
pub fn payload(packet: &[u8], ignore_start: usize) -> &[u8] {
  packet.get(ignore_start..).unwrap_or(&[])
}
