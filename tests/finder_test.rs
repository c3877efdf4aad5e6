//! End-to-end matching and rarity-ordering scenarios (spec 8, scenarios
//! 4 and 5).

mod common;

use common::{in_memory_store, person};
use fuzzylink::{find_matches, FinderConfig, Record};
use serde_json::json;

fn seed_store() -> fuzzylink::Store {
    let store = in_memory_store();
    let records = vec![
        person("1", Some("robin"), Some("linacre")),
        person("2", Some("robyn"), Some("linaker")),
        person("4", Some("david"), Some("smith")),
    ];
    store.write_records(records, "uid", 10_000, true).unwrap();
    store.build_or_replace_stats_tables().unwrap();
    store
}

#[test]
fn finds_robin_by_first_name() {
    let store = seed_store();
    let query = json!({"first_name": "robin", "surname": null})
        .as_object()
        .unwrap()
        .clone();
    let result = find_matches(&store, query, &FinderConfig::default()).unwrap();
    assert!(
        result.ranked.iter().any(|m| m.id == "1"),
        "expected id 1 among {:?}",
        result.ranked.iter().map(|m| &m.id).collect::<Vec<_>>()
    );
}

#[test]
fn finds_david_by_first_name() {
    let store = seed_store();
    let query = json!({"first_name": "david", "surname": null})
        .as_object()
        .unwrap()
        .clone();
    let result = find_matches(&store, query, &FinderConfig::default()).unwrap();
    assert!(result.ranked.iter().any(|m| m.id == "4"));
}

#[test]
fn result_count_respects_return_records_limit() {
    let store = seed_store();
    let query = json!({"first_name": "robin"}).as_object().unwrap().clone();
    let mut config = FinderConfig::default();
    config.best_score_threshold = f64::INFINITY;
    let result = find_matches(&store, query, &config).unwrap();
    assert!(result.ranked.len() as i64 <= config.return_records_limit);
}

#[test]
fn rarity_order_drops_tokens_unknown_to_store() {
    // A small store that never observed "smith" at all.
    let store = in_memory_store();
    let records = vec![
        person("1", Some("robin"), Some("linacre")),
        person("2", Some("robyn"), Some("linaker")),
    ];
    store.write_records(records, "uid", 10_000, true).unwrap();
    store.build_or_replace_stats_tables().unwrap();

    let fields = json!({"uid": "999", "first_name": "robin", "surname": "smith"})
        .as_object()
        .unwrap()
        .clone();
    let query_record = Record::new(fields, "uid", &[], None).unwrap();
    let rarity = query_record.tokens_in_order_of_rarity(&store).unwrap();

    assert!(rarity.contains(&"ROBIN".to_string()));
    assert!(!rarity.contains(&"SMITH".to_string()));
}
