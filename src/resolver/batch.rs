/// Batch resolution with per-item failure isolation
use super::{Confidence, HybridResolver, MappingResult, ResolveError};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::Semaphore;
use tracing::{info, warn};

/// Aggregate outcome of a batch
///
/// The five counters always sum to `total`, and `total == results.len()`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchReport {
    #[serde(rename = "total_processed")]
    pub total: usize,
    pub high_count: usize,
    pub medium_count: usize,
    pub low_count: usize,
    pub no_match_count: usize,
    pub error_count: usize,
    pub duration_ms: u64,
    pub generated_at: DateTime<Utc>,
    pub results: Vec<MappingResult>,
}

impl BatchReport {
    pub fn from_results(results: Vec<MappingResult>, duration_ms: u64) -> Self {
        let count = |level: Confidence| {
            results
                .iter()
                .filter(|r| r.confidence_level == level)
                .count()
        };

        Self {
            total: results.len(),
            high_count: count(Confidence::High),
            medium_count: count(Confidence::Medium),
            low_count: count(Confidence::Low),
            no_match_count: count(Confidence::NoMatch),
            error_count: count(Confidence::Error),
            duration_ms,
            generated_at: Utc::now(),
            results,
        }
    }
}

/// Applies the resolver over many diagnoses
///
/// A failing diagnosis becomes an `Error` result; the batch always continues.
#[derive(Clone)]
pub struct BatchRunner {
    resolver: Arc<HybridResolver>,
    max_concurrent: usize,
}

impl BatchRunner {
    pub fn new(resolver: Arc<HybridResolver>, max_concurrent: usize) -> Self {
        Self {
            resolver,
            max_concurrent: max_concurrent.max(1),
        }
    }

    /// Resolve sequentially, in input order
    pub fn run(&self, diagnoses: &[String], max_batch_size: usize) -> Result<BatchReport, ResolveError> {
        check_size(diagnoses.len(), max_batch_size)?;
        let start = std::time::Instant::now();

        let results = diagnoses
            .iter()
            .map(|d| resolve_isolated(&self.resolver, d))
            .collect();

        Ok(finish(results, start))
    }

    /// Resolve on blocking worker tasks, at most `max_concurrent` at a time
    ///
    /// Output order mirrors input order.
    pub async fn run_concurrent(
        &self,
        diagnoses: Vec<String>,
        max_batch_size: usize,
    ) -> Result<BatchReport, ResolveError> {
        check_size(diagnoses.len(), max_batch_size)?;
        let start = std::time::Instant::now();
        let semaphore = Arc::new(Semaphore::new(self.max_concurrent));

        let mut handles = Vec::with_capacity(diagnoses.len());
        for diagnosis in diagnoses {
            let resolver = Arc::clone(&self.resolver);
            let semaphore = Arc::clone(&semaphore);
            handles.push(tokio::spawn(async move {
                let _permit = semaphore.acquire_owned().await.ok();
                let task_diagnosis = diagnosis.clone();
                match tokio::task::spawn_blocking(move || {
                    resolve_isolated(&resolver, &task_diagnosis)
                })
                .await
                {
                    Ok(result) => result,
                    Err(e) => {
                        warn!("Resolver task for '{}' failed: {}", diagnosis, e);
                        panicked(&diagnosis, &e.to_string())
                    }
                }
            }));
        }

        let mut results = Vec::with_capacity(handles.len());
        for handle in handles {
            match handle.await {
                Ok(result) => results.push(result),
                Err(e) => {
                    warn!("Batch task failed: {}", e);
                    results.push(panicked("", &e.to_string()));
                }
            }
        }

        Ok(finish(results, start))
    }
}

fn check_size(size: usize, max: usize) -> Result<(), ResolveError> {
    if size > max {
        return Err(ResolveError::BatchTooLarge { size, max });
    }
    Ok(())
}

fn resolve_isolated(resolver: &HybridResolver, diagnosis: &str) -> MappingResult {
    match resolver.resolve(diagnosis) {
        Ok(result) => result,
        Err(e) => {
            warn!("Failed to resolve '{}': {}", diagnosis, e);
            MappingResult::error(diagnosis, &e)
        }
    }
}

fn panicked(diagnosis: &str, message: &str) -> MappingResult {
    MappingResult {
        original_diagnosis: diagnosis.to_string(),
        matched_code: None,
        matched_description: None,
        confidence_level: Confidence::Error,
        method: super::MatchMethod::None,
        score: None,
        justification: format!("Error processing diagnosis: {}", message),
        alternatives: Vec::new(),
    }
}

fn finish(results: Vec<MappingResult>, start: std::time::Instant) -> BatchReport {
    let report = BatchReport::from_results(results, start.elapsed().as_millis() as u64);
    info!(
        "Batch complete: {} total, {} high, {} medium, {} low, {} no match, {} errors, {}ms",
        report.total,
        report.high_count,
        report.medium_count,
        report.low_count,
        report.no_match_count,
        report.error_count,
        report.duration_ms
    );
    report
}
