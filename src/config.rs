//! Plain configuration structs, kept separate from the logic that
//! consumes them (spec 6 "Configuration options").

/// Tunables for [`crate::find_matches`] (spec 4.D).
#[derive(Debug, Clone, Copy)]
pub struct FinderConfig {
    pub return_records_limit: i64,
    pub search_intensity: u32,
    pub individual_search_limit: i64,
    pub best_score_threshold: f64,
}

impl Default for FinderConfig {
    fn default() -> Self {
        FinderConfig {
            return_records_limit: 50,
            search_intensity: 500,
            individual_search_limit: 50,
            best_score_threshold: f64::INFINITY,
        }
    }
}

/// Tunables for [`crate::Store::write_records`] (spec 6).
#[derive(Debug, Clone)]
pub struct IngestConfig {
    pub batch_size: usize,
    pub write_counters_now: bool,
}

impl Default for IngestConfig {
    fn default() -> Self {
        IngestConfig {
            batch_size: 10_000,
            write_counters_now: true,
        }
    }
}
