/// End-to-end mapping through a built engine
///
/// Builds the engine from an order file with a deterministic provider, so no
/// model download is needed.
mod common;

use common::{config_in, ConceptProvider, DIMENSION};
use icd_mapper::engine::MappingEngine;
use icd_mapper::resolver::{Confidence, MatchMethod, Score};
use std::sync::Arc;
use tempfile::TempDir;

fn heart_attack_provider() -> ConceptProvider {
    let mut provider = ConceptProvider::new();
    let mut query = ConceptProvider::concept_vector("acute myocardial");
    query[DIMENSION - 1] = 0.234;
    provider.table.insert("heart attack".to_string(), query);
    provider.failing.push("renal colic".to_string());
    provider
}

fn build(provider: ConceptProvider) -> (TempDir, MappingEngine) {
    let temp = TempDir::new().unwrap();
    let config = config_in(temp.path());
    let engine =
        MappingEngine::initialize(&config, Arc::new(provider), false, |_, _| {}).unwrap();
    (temp, engine)
}

#[test]
fn test_reordered_description_is_high_keyword_match() {
    let (_temp, engine) = build(ConceptProvider::new());

    let result = engine
        .resolve("without complications type 2 diabetes mellitus")
        .unwrap();

    assert_eq!(result.matched_code.as_deref(), Some("E119"));
    assert_eq!(result.confidence_level, Confidence::High);
    assert_eq!(result.method, MatchMethod::Keyword);
    assert_eq!(result.score, Some(Score::Lexical(100.0)));
    assert!(result.alternatives.is_empty());
    assert!(result.justification.contains("100.0/100"));
}

#[test]
fn test_heart_attack_resolves_semantically() {
    let (_temp, engine) = build(heart_attack_provider());

    let result = engine.resolve("heart attack").unwrap();

    assert_eq!(result.matched_code.as_deref(), Some("I219"));
    assert_eq!(
        result.matched_description.as_deref(),
        Some("Acute myocardial infarction, unspecified")
    );
    assert_eq!(result.confidence_level, Confidence::Medium);
    assert_eq!(result.method, MatchMethod::Semantic);
    assert!(result.justification.contains("Distance: 0.234"));
    assert!(result
        .justification
        .contains("No direct keyword match found above threshold."));

    assert_eq!(result.alternatives.len(), 2);
    assert_eq!(result.alternatives[0].code, "I21");
    assert!(result.alternatives[0].distance <= result.alternatives[1].distance);
}

#[test]
fn test_colloquial_phrase_finds_concept() {
    let (_temp, engine) = build(ConceptProvider::new());

    let result = engine.resolve("  high blood pressure ").unwrap();

    assert_eq!(result.original_diagnosis, "  high blood pressure ");
    assert_eq!(result.matched_code.as_deref(), Some("I10"));
    assert_eq!(result.confidence_level, Confidence::Medium);
}

#[test]
fn test_unrelated_phrase_is_low_with_alternatives() {
    let (_temp, engine) = build(ConceptProvider::new());

    let result = engine.resolve("persistent fatigue").unwrap();

    assert_eq!(result.confidence_level, Confidence::Low);
    assert!(result.matched_code.is_some());
    assert_eq!(result.alternatives.len(), 2);
}

#[test]
fn test_three_item_batch_with_failing_second_item() {
    let (_temp, engine) = build(heart_attack_provider());
    let diagnoses = vec![
        "Type 2 diabetes mellitus without complications".to_string(),
        "renal colic".to_string(),
        "heart attack".to_string(),
    ];

    let report = engine.resolve_batch(&diagnoses, 100).unwrap();

    assert_eq!(report.total, 3);
    assert_eq!(report.results.len(), 3);
    assert_eq!(report.high_count, 1);
    assert_eq!(report.medium_count, 1);
    assert_eq!(report.error_count, 1);
    assert_eq!(report.low_count + report.no_match_count, 0);

    let failed = &report.results[1];
    assert_eq!(failed.original_diagnosis, "renal colic");
    assert_eq!(failed.confidence_level, Confidence::Error);
    assert!(failed.matched_code.is_none());
    assert!(failed
        .justification
        .starts_with("Error processing diagnosis:"));

    assert_eq!(report.results[2].matched_code.as_deref(), Some("I219"));
}

#[tokio::test]
async fn test_concurrent_batch_matches_sequential() {
    let (_temp, engine) = build(heart_attack_provider());
    let diagnoses: Vec<String> = [
        "heart attack",
        "renal colic",
        "Essential (primary) hypertension",
        "pneumonia",
        "persistent fatigue",
    ]
    .iter()
    .map(|s| s.to_string())
    .collect();

    let sequential = engine.resolve_batch(&diagnoses, 10).unwrap();
    let concurrent = engine
        .resolve_batch_concurrent(diagnoses, 10)
        .await
        .unwrap();

    assert_eq!(concurrent.results, sequential.results);
    assert_eq!(concurrent.error_count, 1);
}

#[test]
fn test_batch_over_limit_is_rejected() {
    let (_temp, engine) = build(ConceptProvider::new());
    let diagnoses = vec!["pneumonia".to_string(); 3];
    assert!(engine.resolve_batch(&diagnoses, 2).is_err());
}

#[test]
fn test_empty_query_is_rejected_without_embedding() {
    let provider = Arc::new(ConceptProvider::new());
    let temp = TempDir::new().unwrap();
    let config = config_in(temp.path());
    let engine = MappingEngine::initialize(&config, provider.clone(), false, |_, _| {}).unwrap();
    let calls = provider.calls();

    assert!(engine.resolve("   ").is_err());
    assert_eq!(provider.calls(), calls);
}

#[test]
fn test_billable_only_skips_header_codes() {
    let temp = TempDir::new().unwrap();
    let mut config = config_in(temp.path());
    config.catalog.billable_only = true;

    let engine =
        MappingEngine::initialize(&config, Arc::new(ConceptProvider::new()), false, |_, _| {})
            .unwrap();

    let codes: Vec<&str> = engine.catalog().codes();
    assert_eq!(codes, vec!["E119", "I10", "I219", "J189"]);
}

#[test]
fn test_result_json_shape() {
    let (_temp, engine) = build(heart_attack_provider());
    let result = engine.resolve("heart attack").unwrap();

    let json = serde_json::to_value(&result).unwrap();
    assert_eq!(json["original_diagnosis"], "heart attack");
    assert_eq!(json["matched_icd_code"], "I219");
    assert_eq!(json["confidence_level"], "Medium");
    assert_eq!(json["method"], "semantic");
    assert_eq!(json["alternative_codes"].as_array().unwrap().len(), 2);
}

#[test]
fn test_search_by_text_and_code_listing() {
    let (_temp, engine) = build(heart_attack_provider());

    let hits = engine.search_by_text("heart attack", 2).unwrap();
    assert_eq!(hits.len(), 2);
    assert_eq!(hits[0].code, "I219");
    assert_eq!(hits[1].code, "I21");

    let page = engine.lookup_codes(4, 10).unwrap();
    let codes: Vec<&str> = page.iter().map(|e| e.code.as_str()).collect();
    assert_eq!(codes, vec!["I219", "J189"]);
}
