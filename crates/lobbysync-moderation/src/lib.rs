//! Chat moderation pipeline for lobbysync.
//!
//! A pure, per-player text pipeline: no I/O, no clock, no store access.
//! Callers pass the current time explicitly, which keeps the only state
//! — each player's last accepted text and send time — fully
//! deterministic under test.
//!
//! Checks run in a fixed order and short-circuit on the first failure:
//! whitespace normalization, length, duplicate, excessive caps, slow
//! mode, URL scrub, block-list masking. Cheap shape checks come first
//! so a malformed message never touches the duplicate/cooldown
//! bookkeeping.

use std::collections::{HashMap, HashSet};

use serde::Serialize;

/// Window within which a repeated identical message is rejected.
const DUPLICATE_WINDOW_MS: u64 = 15_000;

/// Minimum letters before the caps filter applies.
const CAPS_MIN_LETTERS: usize = 12;

/// Uppercase ratio (of letters) above which a message is shouting.
const CAPS_MAX_RATIO: f64 = 0.7;

/// Glyph used to mask interior characters of blocked words.
const MASK_GLYPH: char = '\u{2022}';

const DEFAULT_BAD_WORDS: [&str; 3] = ["bad", "worse", "awful"];

// ---------------------------------------------------------------------------
// Results
// ---------------------------------------------------------------------------

/// Why a message was rejected — or `Ok`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ModerationReason {
    Ok,
    Empty,
    TooLong,
    Duplicate,
    Caps,
    Cooldown,
}

/// Outcome of one moderation pass.
///
/// Rejections are ordinary values, not errors: the lobby layer forwards
/// them to a feedback channel so the UI can explain what happened.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ModerateResult {
    pub ok: bool,
    pub reason: ModerationReason,
    /// Cleaned text, present on success.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    /// Remaining slow-mode wait, present on `Cooldown`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cooldown_ms_left: Option<u64>,
    /// Whether scrubbing or masking altered the text.
    pub replaced: bool,
    /// The pre-alteration text, present when `replaced`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub original: Option<String>,
}

impl ModerateResult {
    fn rejected(reason: ModerationReason) -> Self {
        Self {
            ok: false,
            reason,
            text: None,
            cooldown_ms_left: None,
            replaced: false,
            original: None,
        }
    }

    fn cooldown(ms_left: u64) -> Self {
        Self {
            cooldown_ms_left: Some(ms_left),
            ..Self::rejected(ModerationReason::Cooldown)
        }
    }

    /// An accepted result carrying already-clean text. Used by the
    /// lobby layer when it needs to emit `Ok` feedback outside the
    /// pipeline (local echoes).
    pub fn accepted(text: String) -> Self {
        Self {
            ok: true,
            reason: ModerationReason::Ok,
            text: Some(text),
            cooldown_ms_left: None,
            replaced: false,
            original: None,
        }
    }
}

/// Per-call knobs resolved from the room's options.
#[derive(Debug, Clone, Copy, Default)]
pub struct ModerateOptions {
    /// Keep URL-like substrings instead of scrubbing them.
    pub allow_links: bool,
    /// Slow-mode interval in milliseconds; 0 disables it.
    pub slow_mode_ms: u64,
}

/// Engine construction parameters.
#[derive(Debug, Clone)]
pub struct ModerationConfig {
    /// Maximum accepted message length, in characters.
    pub max_len: usize,
    /// Block-list words, matched case-insensitively on word boundaries.
    pub bad_words: Vec<String>,
}

impl Default for ModerationConfig {
    fn default() -> Self {
        Self {
            max_len: 160,
            bad_words: DEFAULT_BAD_WORDS.iter().map(|w| (*w).to_owned()).collect(),
        }
    }
}

// ---------------------------------------------------------------------------
// Engine
// ---------------------------------------------------------------------------

/// The moderation pipeline plus its per-player bookkeeping.
///
/// State is only written on *accepted* messages, so a message rejected
/// for shape never affects later duplicate or cooldown decisions.
pub struct ModerationEngine {
    max_len: usize,
    bad_words: HashSet<String>,
    /// Last accepted send time per player; only tracked under slow mode.
    last_sent_at: HashMap<String, u64>,
    /// Last accepted normalized text and when it was sent, per player.
    last_text: HashMap<String, (String, u64)>,
}

impl ModerationEngine {
    pub fn new(config: ModerationConfig) -> Self {
        Self {
            max_len: config.max_len,
            bad_words: config
                .bad_words
                .into_iter()
                .map(|w| w.to_lowercase())
                .collect(),
            last_sent_at: HashMap::new(),
            last_text: HashMap::new(),
        }
    }

    /// Adds words to the block-list at runtime.
    pub fn extend_bad_words<I, S>(&mut self, words: I)
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        for w in words {
            self.bad_words.insert(w.as_ref().to_lowercase());
        }
    }

    /// Runs the pipeline for one message from `player_id` at `now_ms`.
    pub fn moderate(
        &mut self,
        player_id: &str,
        text: &str,
        options: &ModerateOptions,
        now_ms: u64,
    ) -> ModerateResult {
        let mut text = collapse_whitespace(text);
        if text.is_empty() {
            return ModerateResult::rejected(ModerationReason::Empty);
        }
        if text.chars().count() > self.max_len {
            return ModerateResult::rejected(ModerationReason::TooLong);
        }

        // Duplicate: same normalized text from the same player within
        // the window.
        let norm = text.to_lowercase();
        if let Some((last_norm, at)) = self.last_text.get(player_id) {
            if *last_norm == norm && now_ms.saturating_sub(*at) < DUPLICATE_WINDOW_MS {
                return ModerateResult::rejected(ModerationReason::Duplicate);
            }
        }

        // Excessive caps, measured over letters only.
        let letters: Vec<char> = text.chars().filter(char::is_ascii_alphabetic).collect();
        if letters.len() >= CAPS_MIN_LETTERS {
            let upper = letters.iter().filter(|c| c.is_ascii_uppercase()).count();
            if upper as f64 / letters.len() as f64 > CAPS_MAX_RATIO {
                return ModerateResult::rejected(ModerationReason::Caps);
            }
        }

        // Slow mode: only meaningful once the player has an accepted
        // send on record.
        if options.slow_mode_ms > 0 {
            if let Some(last_at) = self.last_sent_at.get(player_id) {
                let elapsed = now_ms.saturating_sub(*last_at);
                if elapsed < options.slow_mode_ms {
                    return ModerateResult::cooldown(options.slow_mode_ms - elapsed);
                }
            }
        }

        let original = text.clone();
        let mut replaced = false;

        if !options.allow_links {
            let scrubbed = strip_links(&text);
            if scrubbed != text {
                text = scrubbed;
                replaced = true;
            }
            if text.is_empty() {
                return ModerateResult::rejected(ModerationReason::Empty);
            }
        }

        let masked = mask_bad_words(&text, &self.bad_words);
        if masked != text {
            text = masked;
            replaced = true;
        }

        // Bookkeeping happens only here, on acceptance.
        self.last_text.insert(player_id.to_owned(), (norm, now_ms));
        if options.slow_mode_ms > 0 {
            self.last_sent_at.insert(player_id.to_owned(), now_ms);
        }

        ModerateResult {
            ok: true,
            reason: ModerationReason::Ok,
            text: Some(text),
            cooldown_ms_left: None,
            replaced,
            original: replaced.then_some(original),
        }
    }
}

impl Default for ModerationEngine {
    fn default() -> Self {
        Self::new(ModerationConfig::default())
    }
}

// ---------------------------------------------------------------------------
// Text transforms
// ---------------------------------------------------------------------------

fn collapse_whitespace(s: &str) -> String {
    s.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Removes `http://` / `https://` plus the rest of the run it starts,
/// then re-collapses the whitespace the removal left behind.
fn strip_links(s: &str) -> String {
    let kept: Vec<&str> = s
        .split_whitespace()
        .filter_map(|token| match find_scheme(token) {
            Some(0) => None,
            Some(idx) => Some(&token[..idx]),
            None => Some(token),
        })
        .collect();
    kept.join(" ")
}

/// Byte offset of the first `http://` / `https://`, matched
/// ASCII-case-insensitively. The match starts on an ASCII byte, so the
/// offset is always a char boundary.
fn find_scheme(token: &str) -> Option<usize> {
    let bytes = token.as_bytes();
    (0..bytes.len()).find(|&i| {
        [&b"http://"[..], &b"https://"[..]].iter().any(|needle| {
            bytes.len() - i >= needle.len()
                && bytes[i..i + needle.len()].eq_ignore_ascii_case(needle)
        })
    })
}

/// Masks block-listed words: interior characters become the mask glyph,
/// first and last survive; one- and two-character words are fully
/// masked. Boundaries are alphanumeric runs, so "class" never trips a
/// block-list entry "as".
fn mask_bad_words(s: &str, bad_words: &HashSet<String>) -> String {
    if bad_words.is_empty() {
        return s.to_owned();
    }

    let mut out = String::with_capacity(s.len());
    let mut word = String::new();

    let flush = |word: &mut String, out: &mut String| {
        if !word.is_empty() {
            if bad_words.contains(&word.to_lowercase()) {
                out.push_str(&mask_word(word));
            } else {
                out.push_str(word);
            }
            word.clear();
        }
    };

    for c in s.chars() {
        if c.is_alphanumeric() || c == '_' {
            word.push(c);
        } else {
            flush(&mut word, &mut out);
            out.push(c);
        }
    }
    flush(&mut word, &mut out);
    out
}

fn mask_word(word: &str) -> String {
    let chars: Vec<char> = word.chars().collect();
    if chars.len() <= 2 {
        return MASK_GLYPH.to_string().repeat(chars.len());
    }
    let mut masked = String::new();
    masked.push(chars[0]);
    for _ in 1..chars.len() - 1 {
        masked.push(MASK_GLYPH);
    }
    masked.push(chars[chars.len() - 1]);
    masked
}

// =========================================================================
// Tests
// =========================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn engine() -> ModerationEngine {
        ModerationEngine::default()
    }

    fn opts() -> ModerateOptions {
        ModerateOptions::default()
    }

    fn slow(ms: u64) -> ModerateOptions {
        ModerateOptions {
            slow_mode_ms: ms,
            ..ModerateOptions::default()
        }
    }

    // -- Normalization and shape ------------------------------------------

    #[test]
    fn test_whitespace_is_collapsed_and_trimmed() {
        let mut eng = engine();
        let res = eng.moderate("u1", "  hi   there \n", &opts(), 0);
        assert!(res.ok);
        assert_eq!(res.text.as_deref(), Some("hi there"));
        assert!(!res.replaced);
    }

    #[test]
    fn test_blank_input_rejected_empty() {
        let mut eng = engine();
        let res = eng.moderate("u1", "   \t  ", &opts(), 0);
        assert_eq!(res.reason, ModerationReason::Empty);
        assert!(!res.ok);
    }

    #[test]
    fn test_over_length_rejected_too_long() {
        let mut eng = engine();
        let long = "x".repeat(161);
        let res = eng.moderate("u1", &long, &opts(), 0);
        assert_eq!(res.reason, ModerationReason::TooLong);

        let max = "x".repeat(160);
        assert!(eng.moderate("u1", &max, &opts(), 0).ok);
    }

    // -- Duplicate filter --------------------------------------------------

    #[test]
    fn test_duplicate_within_window_rejected() {
        let mut eng = engine();
        assert!(eng.moderate("u1", "hello", &opts(), 1_000).ok);
        let res = eng.moderate("u1", "hello", &opts(), 5_000);
        assert_eq!(res.reason, ModerationReason::Duplicate);
    }

    #[test]
    fn test_duplicate_is_case_folded() {
        let mut eng = engine();
        assert!(eng.moderate("u1", "Hello", &opts(), 0).ok);
        let res = eng.moderate("u1", "hELLO", &opts(), 3_000);
        assert_eq!(res.reason, ModerationReason::Duplicate);
    }

    #[test]
    fn test_duplicate_allowed_after_window() {
        let mut eng = engine();
        assert!(eng.moderate("u1", "hello", &opts(), 0).ok);
        assert!(eng.moderate("u1", "hello", &opts(), 15_000).ok);
    }

    #[test]
    fn test_duplicate_tracked_per_player() {
        let mut eng = engine();
        assert!(eng.moderate("u1", "hello", &opts(), 0).ok);
        assert!(eng.moderate("u2", "hello", &opts(), 1_000).ok);
    }

    // -- Caps filter -------------------------------------------------------

    #[test]
    fn test_all_caps_long_message_rejected() {
        let mut eng = engine();
        let res = eng.moderate("u1", "HELLO WORLD TODAY", &opts(), 0);
        assert_eq!(res.reason, ModerationReason::Caps);
    }

    #[test]
    fn test_corrected_case_accepted_immediately_after_caps_reject() {
        // The caps rejection must not have recorded duplicate state.
        let mut eng = engine();
        let res = eng.moderate("u1", "HELLO WORLD TODAY", &opts(), 0);
        assert_eq!(res.reason, ModerationReason::Caps);

        let res = eng.moderate("u1", "Hello world today", &opts(), 1);
        assert!(res.ok);
        assert!(!res.replaced);
    }

    #[test]
    fn test_short_shouting_is_tolerated() {
        // Under 12 letters the caps filter does not apply.
        let mut eng = engine();
        assert!(eng.moderate("u1", "YES!!", &opts(), 0).ok);
    }

    #[test]
    fn test_mostly_lowercase_long_message_accepted() {
        let mut eng = engine();
        assert!(eng.moderate("u1", "WELL hello there my friends", &opts(), 0).ok);
    }

    // -- Slow mode ---------------------------------------------------------

    #[test]
    fn test_slow_mode_cooldown_reports_time_left() {
        let mut eng = engine();
        let o = slow(5_000);

        assert!(eng.moderate("u1", "hi", &o, 0).ok);

        let res = eng.moderate("u1", "there", &o, 2_000);
        assert_eq!(res.reason, ModerationReason::Cooldown);
        assert_eq!(res.cooldown_ms_left, Some(3_000));

        assert!(eng.moderate("u1", "there", &o, 5_001).ok);
    }

    #[test]
    fn test_slow_mode_first_send_not_throttled() {
        let mut eng = engine();
        assert!(eng.moderate("u1", "hi", &slow(5_000), 0).ok);
    }

    #[test]
    fn test_rejected_send_does_not_restart_cooldown() {
        let mut eng = engine();
        let o = slow(5_000);
        assert!(eng.moderate("u1", "hi", &o, 0).ok);
        // Rejected at 2000 — must not push the window forward.
        assert_eq!(
            eng.moderate("u1", "there", &o, 2_000).reason,
            ModerationReason::Cooldown
        );
        assert!(eng.moderate("u1", "again", &o, 5_000).ok);
    }

    #[test]
    fn test_slow_mode_zero_disables_throttle() {
        let mut eng = engine();
        assert!(eng.moderate("u1", "one", &opts(), 0).ok);
        assert!(eng.moderate("u1", "two", &opts(), 1).ok);
    }

    // -- URL scrub ---------------------------------------------------------

    #[test]
    fn test_links_are_stripped() {
        let mut eng = engine();
        let res = eng.moderate("u1", "check https://spam.example/x now", &opts(), 0);
        assert!(res.ok);
        assert_eq!(res.text.as_deref(), Some("check now"));
        assert!(res.replaced);
        assert_eq!(
            res.original.as_deref(),
            Some("check https://spam.example/x now")
        );
    }

    #[test]
    fn test_link_only_message_rejected_empty() {
        let mut eng = engine();
        let res = eng.moderate("u1", "http://spam.example", &opts(), 0);
        assert_eq!(res.reason, ModerationReason::Empty);
    }

    #[test]
    fn test_links_kept_when_allowed() {
        let mut eng = engine();
        let o = ModerateOptions {
            allow_links: true,
            ..ModerateOptions::default()
        };
        let res = eng.moderate("u1", "see https://ok.example", &o, 0);
        assert!(res.ok);
        assert_eq!(res.text.as_deref(), Some("see https://ok.example"));
        assert!(!res.replaced);
    }

    #[test]
    fn test_embedded_scheme_is_cut_from_token() {
        let mut eng = engine();
        let res = eng.moderate("u1", "gohttps://x.example now", &opts(), 0);
        assert!(res.ok);
        assert_eq!(res.text.as_deref(), Some("go now"));
    }

    // -- Block-list masking ------------------------------------------------

    #[test]
    fn test_bad_words_masked_keeping_edges() {
        let mut eng = engine();
        let res = eng.moderate("u1", "that was bad, truly awful", &opts(), 0);
        assert!(res.ok);
        assert_eq!(res.text.as_deref(), Some("that was b\u{2022}d, truly a\u{2022}\u{2022}\u{2022}l"));
        assert!(res.replaced);
    }

    #[test]
    fn test_masking_is_case_insensitive() {
        let mut eng = engine();
        let res = eng.moderate("u1", "BaD call", &opts(), 0);
        assert_eq!(res.text.as_deref(), Some("B\u{2022}D call"));
    }

    #[test]
    fn test_block_list_respects_word_boundaries() {
        // "badge" contains "bad" but is not a block-list word.
        let mut eng = engine();
        let res = eng.moderate("u1", "nice badge", &opts(), 0);
        assert!(res.ok);
        assert_eq!(res.text.as_deref(), Some("nice badge"));
        assert!(!res.replaced);
    }

    #[test]
    fn test_short_words_fully_masked() {
        let mut eng = engine();
        eng.extend_bad_words(["no"]);
        let res = eng.moderate("u1", "just no", &opts(), 0);
        assert_eq!(res.text.as_deref(), Some("just \u{2022}\u{2022}"));
    }

    #[test]
    fn test_extend_bad_words_applies_to_later_messages() {
        let mut eng = engine();
        assert!(!eng.moderate("u1", "very rude", &opts(), 0).replaced);
        eng.extend_bad_words(["rude"]);
        let res = eng.moderate("u1", "so rude", &opts(), 1_000);
        assert_eq!(res.text.as_deref(), Some("so r\u{2022}\u{2022}e"));
    }

    // -- Purity ------------------------------------------------------------

    #[test]
    fn test_identical_calls_differ_only_through_documented_state() {
        // Two engines fed the same history produce the same results.
        let mut a = engine();
        let mut b = engine();
        for (t, msg) in [(0, "one"), (400, "two"), (900, "one")] {
            let ra = a.moderate("u1", msg, &opts(), t);
            let rb = b.moderate("u1", msg, &opts(), t);
            assert_eq!(ra, rb);
        }
    }
}
