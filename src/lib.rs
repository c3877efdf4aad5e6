//! Fuzzy record matching over dirty, real-world data.
//!
//! Index records into a [`Store`] (BM25 full-text over space-joined,
//! phonetically-expanded tokens, plus per-column token-frequency tables),
//! then call [`find_matches`] with a query mapping to get back plausible
//! matches, ranked by a misspelling-aware probabilistic score.
//!
//! ```no_run
//! use serde_json::json;
//! use fuzzylink::{FinderConfig, Store};
//!
//! # fn main() -> fuzzylink::Result<()> {
//! let store = Store::open_or_create(None, vec![], None)?;
//! store.write_records(
//!     vec![json!({"uid": "1", "first_name": "robin", "surname": "linacre"})
//!         .as_object()
//!         .unwrap()
//!         .clone()],
//!     "uid",
//!     10_000,
//!     true,
//! )?;
//! store.build_or_replace_stats_tables()?;
//!
//! let query = json!({"first_name": "robin"}).as_object().unwrap().clone();
//! let result = fuzzylink::find_matches(&store, query, &FinderConfig::default())?;
//! for candidate in &result.ranked {
//!     println!("{}: {}", candidate.id, candidate.score);
//! }
//! # Ok(())
//! # }
//! ```

mod config;
mod error;
mod finder;
mod phonetic;
mod record;
mod scorer;
mod store;
mod token;

pub use config::{FinderConfig, IngestConfig};
pub use error::{Error, Result};
pub use finder::{find_matches, FindResult, MatchedRecord};
pub use record::{Record, TokenProbability};
pub use store::{IngestReport, Store};
pub use token::{Token, TokenValue};
