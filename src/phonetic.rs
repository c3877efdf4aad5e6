//! Double-metaphone phonetic expansion, memoised the same way as
//! tokenisation (spec 4.A, 9): same bounded LRU cache shape, separate
//! instance since the key space (already-uppercased tokens) differs from
//! raw column values.

use std::num::NonZeroUsize;
use std::sync::{LazyLock, Mutex};

use lru::LruCache;
use rphonetic::{DoubleMetaphone, Encoder};

use crate::token::Token;

const CACHE_CAPACITY: usize = 1_000_000;

static ENCODER: LazyLock<DoubleMetaphone> = LazyLock::new(DoubleMetaphone::default);

static PHONETIC_CACHE: LazyLock<Mutex<LruCache<String, Vec<Token>>>> = LazyLock::new(|| {
    Mutex::new(LruCache::new(
        NonZeroUsize::new(CACHE_CAPACITY).expect("nonzero"),
    ))
});

/// Compute the double-metaphone primary and secondary codes for `token`,
/// dropping empties. Caller is responsible for the length/digit gate
/// (spec 4.A) — this function just encodes.
pub(crate) fn double_metaphone(token: &str) -> Vec<Token> {
    if let Some(hit) = PHONETIC_CACHE.lock().expect("lock poisoned").get(token) {
        return hit.clone();
    }

    let result = ENCODER.double_metaphone(token);
    let mut variants = Vec::with_capacity(2);
    let primary = result.primary();
    if !primary.is_empty() {
        variants.push(primary);
    }
    let alternate = result.alternate();
    if !alternate.is_empty() && alternate != variants.first().map(String::as_str).unwrap_or("") {
        variants.push(alternate);
    }

    PHONETIC_CACHE
        .lock()
        .expect("lock poisoned")
        .put(token.to_string(), variants.clone());
    variants
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn robin_and_robyn_share_a_code() {
        let a = double_metaphone("ROBIN");
        let b = double_metaphone("ROBYN");
        assert!(a.iter().any(|c| b.contains(c)), "{a:?} vs {b:?}");
    }

    #[test]
    fn empty_codes_filtered() {
        // Short/odd strings shouldn't panic and should return plain vecs.
        let _ = double_metaphone("X");
    }
}
