//! Deterministic value normalisation and tokenisation.
//!
//! `tokenise` turns a single free-text value into an ordered sequence of
//! tokens drawn from the alphabet `[A-Z0-9]`, at most 8 characters long.
//! The rules are applied in the fixed order laid out below; re-ordering
//! them changes output for real inputs, so don't.

use std::num::NonZeroUsize;
use std::sync::{LazyLock, Mutex};

use lru::LruCache;

use crate::phonetic;

/// Cap on the tokenisation/phonetic memoisation caches (spec 4.A, 9).
const CACHE_CAPACITY: usize = 1_000_000;

/// A single normalised token: `[A-Z0-9]{1,8}`.
pub type Token = String;

/// The value a record column holds, before tokenisation.
///
/// Records arrive as `serde_json::Value`; this enum captures the two shapes
/// the tokeniser treats specially (floats get 4-significant-digit
/// formatting, step 2) and collapses everything else to its string form.
#[derive(Debug, Clone, PartialEq)]
pub enum TokenValue {
    Missing,
    Float(f64),
    Text(String),
}

impl From<&serde_json::Value> for TokenValue {
    fn from(value: &serde_json::Value) -> Self {
        match value {
            serde_json::Value::Null => TokenValue::Missing,
            serde_json::Value::Number(n) => {
                if let Some(f) = n.as_f64() {
                    if n.is_i64() || n.is_u64() {
                        // Integral JSON numbers still go through the string
                        // path — the float-formatting rule only applies to
                        // genuinely fractional values.
                        TokenValue::Text(n.to_string())
                    } else {
                        TokenValue::Float(f)
                    }
                } else {
                    TokenValue::Text(n.to_string())
                }
            }
            serde_json::Value::String(s) => TokenValue::Text(s.clone()),
            other => TokenValue::Text(other.to_string()),
        }
    }
}

static WHITESPACE_RUN_RE: LazyLock<regex::Regex> =
    LazyLock::new(|| regex::Regex::new(r"\s{2,}").expect("valid regex"));
static NON_WORD_RE: LazyLock<regex::Regex> =
    LazyLock::new(|| regex::Regex::new(r"[^\w\s]").expect("valid regex"));
static ALPHA_DIGIT_RE: LazyLock<regex::Regex> =
    LazyLock::new(|| regex::Regex::new(r"([A-Z])(\d)").expect("valid regex"));
static DIGIT_ALPHA_RE: LazyLock<regex::Regex> =
    LazyLock::new(|| regex::Regex::new(r"(\d)([A-Z])").expect("valid regex"));
static LONG_RUN_RE: LazyLock<regex::Regex> =
    LazyLock::new(|| regex::Regex::new(r"(\w{8})").expect("valid regex"));
static SCI_SUFFIX_RE: LazyLock<regex::Regex> =
    LazyLock::new(|| regex::Regex::new(r"e\+\d{1,4}").expect("valid regex"));

static TOKENISE_CACHE: LazyLock<Mutex<LruCache<String, Vec<Token>>>> = LazyLock::new(|| {
    Mutex::new(LruCache::new(
        NonZeroUsize::new(CACHE_CAPACITY).expect("nonzero"),
    ))
});

/// Strip insignificant trailing zeros (and a bare trailing decimal point)
/// from a formatted decimal, the way Python's `%g` does. A no-op on strings
/// with no decimal point (an integer's trailing zeros are significant).
fn strip_insignificant_zeros(s: &str) -> String {
    if !s.contains('.') {
        return s.to_string();
    }
    s.trim_end_matches('0').trim_end_matches('.').to_string()
}

/// Format `value` with `sig_digits` significant digits, Python `%.4g` style
/// (spec 4.A step 2: "format as 4 significant digits, strip the decimal
/// point, remove any `e+NNN` scientific suffix") — including `%g`'s trailing-
/// zero stripping, e.g. `2.0` -> `"2"`, `1.5` -> `"1.5"` (not `"2.000"` /
/// `"1.500"`).
fn format_significant(value: f64, sig_digits: usize) -> String {
    if value == 0.0 {
        return "0".to_string();
    }
    let magnitude = value.abs().log10().floor() as i32;
    if magnitude >= sig_digits as i32 || magnitude < -4 {
        // Scientific notation range, e.g. Python's %g threshold. Rust's
        // `LowerExp` writes exponents unsigned and unpadded (`1.235e5`);
        // reassemble as Python's `e+NN`/`e-NN` (signed, zero-padded to at
        // least 2 digits) so `SCI_SUFFIX_RE` recognises it below.
        let mantissa_decimals = sig_digits.saturating_sub(1);
        let raw = format!("{:.*e}", mantissa_decimals, value);
        let e_pos = raw.find('e').expect("LowerExp output always contains 'e'");
        let mantissa = strip_insignificant_zeros(&raw[..e_pos]);
        let exponent: i32 = raw[e_pos + 1..].parse().expect("valid exponent digits");
        let sign = if exponent < 0 { '-' } else { '+' };
        format!("{mantissa}e{sign}{:02}", exponent.abs())
    } else {
        let decimals = (sig_digits as i32 - 1 - magnitude).max(0) as usize;
        strip_insignificant_zeros(&format!("{:.*}", decimals, value))
    }
}

/// Rules 1-9 of the tokeniser, applied in order.
fn normalise(value: &TokenValue) -> String {
    let s = match value {
        TokenValue::Missing => return String::new(),
        TokenValue::Float(f) => {
            if f.is_nan() {
                String::new()
            } else {
                let formatted = format_significant(*f, 4).replace('.', "");
                SCI_SUFFIX_RE.replace_all(&formatted, "").into_owned()
            }
        }
        TokenValue::Text(s) => s.clone(),
    };

    if s.trim().is_empty() {
        return String::new();
    }

    let mut s = s.to_uppercase();
    s = WHITESPACE_RUN_RE.replace_all(&s, " ").into_owned();
    s = NON_WORD_RE.replace_all(&s, " ").into_owned();

    if s.len() > 5 {
        s = ALPHA_DIGIT_RE.replace_all(&s, "$1 $2").into_owned();
        s = DIGIT_ALPHA_RE.replace_all(&s, "$1 $2").into_owned();
    }

    s = LONG_RUN_RE.replace_all(&s, "$1 ").into_owned();
    s = WHITESPACE_RUN_RE.replace_all(&s, " ").into_owned();
    s.trim().to_string()
}

/// Tokenise a single column value. Deterministic, cacheable, memoised.
pub fn tokenise(value: &TokenValue) -> Vec<Token> {
    let cache_key = match value {
        TokenValue::Missing => return Vec::new(),
        TokenValue::Float(f) => format!("f:{}", f),
        TokenValue::Text(s) => format!("t:{}", s),
    };

    if let Some(hit) = TOKENISE_CACHE.lock().expect("lock poisoned").get(&cache_key) {
        return hit.clone();
    }

    let normalised = normalise(value);
    let tokens: Vec<Token> = if normalised.is_empty() {
        Vec::new()
    } else {
        normalised
            .split(' ')
            .filter(|t| !t.is_empty())
            .map(|t| t.to_string())
            .collect()
    };

    TOKENISE_CACHE
        .lock()
        .expect("lock poisoned")
        .put(cache_key, tokens.clone());
    tokens
}

/// Double-metaphone primary/secondary codes for a token, gated on length > 2
/// and the absence of digits (spec 4.A).
pub fn dmetaphone_variants(token: &str) -> Vec<Token> {
    if token.len() <= 2 || token.chars().any(|c| c.is_ascii_digit()) {
        return Vec::new();
    }
    phonetic::double_metaphone(token)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn t(s: &str) -> Vec<Token> {
        tokenise(&TokenValue::Text(s.to_string()))
    }

    #[test]
    fn missing_value_is_empty() {
        assert_eq!(t(""), Vec::<Token>::new());
        assert_eq!(tokenise(&TokenValue::Missing), Vec::<Token>::new());
    }

    #[test]
    fn simple_word_uppercased() {
        assert_eq!(t("robin"), vec!["ROBIN".to_string()]);
    }

    #[test]
    fn punctuation_becomes_space() {
        assert_eq!(t("o'brien"), vec!["O".to_string(), "BRIEN".to_string()]);
    }

    #[test]
    fn multiple_spaces_collapse() {
        assert_eq!(t("a    b"), vec!["A".to_string(), "B".to_string()]);
    }

    #[test]
    fn alpha_digit_boundary_split_only_when_long() {
        // len <= 5: no split
        assert_eq!(t("a1b2c"), vec!["A1B2C".to_string()]);
        // len > 5: split at alpha->digit and digit->alpha boundaries
        assert_eq!(
            t("abc123def"),
            vec!["ABC".to_string(), "123".to_string(), "DEF".to_string()]
        );
    }

    #[test]
    fn long_runs_capped_at_eight() {
        let tokens = t("ABCDEFGHIJKL");
        assert_eq!(tokens, vec!["ABCDEFGH".to_string(), "IJKL".to_string()]);
    }

    #[test]
    fn float_formatting_strips_trailing_zeros() {
        assert_eq!(t_num(2.0), vec!["2".to_string()]);
        assert_eq!(t_num(1.5), vec!["15".to_string()]);
    }

    #[test]
    fn float_scientific_suffix_is_stripped() {
        // magnitude 5 >= sig_digits 4: scientific notation branch.
        assert_eq!(t_num(123456.7), vec!["1235".to_string()]);
    }

    fn t_num(f: f64) -> Vec<Token> {
        tokenise(&TokenValue::Float(f))
    }

    #[test]
    fn deterministic_and_idempotent() {
        let once = t("Dr. Robin O'Brien 123");
        let joined = once.join(" ");
        let twice = tokenise(&TokenValue::Text(joined));
        assert_eq!(once, twice);
    }

    #[test]
    fn dmetaphone_gated_on_length_and_digits() {
        assert!(dmetaphone_variants("AB").is_empty()); // len <= 2
        assert!(dmetaphone_variants("A1C").is_empty()); // contains digit
        assert!(!dmetaphone_variants("ROBIN").is_empty());
    }
}
