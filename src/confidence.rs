// src/confidence.rs
//! Memoized confidence resolution for stored chats.
//!
//! A chat row's confidence is a percentage string derived from the
//! classifier's top probability. Reads prefer the stored value; recomputes
//! happen only when the stored value is missing or invalid (or the caller
//! forces one), and a single page listing performs at most
//! `RECOMPUTE_BUDGET_PER_PAGE` model calls so one request cannot stall on
//! the model.

use crate::classifier::{top_prediction, DiseaseModel, ModelError};
use crate::symptoms::SymptomVocabulary;

/// Sentinel returned when a recompute is skipped or fails. Never persisted,
/// so the next read retries the computation.
pub const PLACEHOLDER_CONFIDENCE: &str = "0.10%";

/// Cap on model calls during a single page-listing request.
pub const RECOMPUTE_BUDGET_PER_PAGE: usize = 5;

/// Probabilities below this would display as "0.00%", which the validity
/// predicate treats as absent; clamp instead of letting the two collide.
pub const MIN_PROBABILITY: f32 = 0.001;

/// A stored confidence counts only if present, non-empty, and not one of the
/// "0%" forms. A genuinely near-zero prediction is indistinguishable from
/// never-computed under this predicate; the formatting floor keeps such
/// values from being written in the first place.
pub fn is_valid_confidence(stored: Option<&str>) -> bool {
    match stored {
        Some(value) => !matches!(value, "" | "0%" | "0.00%"),
        None => false,
    }
}

/// Percentage string for a class probability, floored at `MIN_PROBABILITY`.
pub fn format_confidence(probability: f32) -> String {
    let probability = probability.max(MIN_PROBABILITY);
    format!("{:.2}%", probability * 100.0)
}

/// Model-call allowance local to one listing call. Deliberately a plain
/// value threaded through the row loop: it must never outlive the request or
/// be shared across concurrent requests.
#[derive(Debug)]
pub struct RecomputeBudget {
    remaining: usize,
}

impl RecomputeBudget {
    pub fn new(limit: usize) -> Self {
        Self { remaining: limit }
    }

    pub fn per_page() -> Self {
        Self::new(RECOMPUTE_BUDGET_PER_PAGE)
    }

    fn try_acquire(&mut self) -> bool {
        if self.remaining == 0 {
            return false;
        }
        self.remaining -= 1;
        true
    }
}

/// Outcome of resolving one chat row. `write_back` is set only for freshly
/// computed values; the caller persists those best-effort.
#[derive(Debug, PartialEq)]
pub struct ConfidenceOutcome {
    pub value: Option<String>,
    pub write_back: bool,
}

impl ConfidenceOutcome {
    fn cached(value: Option<String>) -> Self {
        Self {
            value,
            write_back: false,
        }
    }

    fn placeholder() -> Self {
        Self {
            value: Some(PLACEHOLDER_CONFIDENCE.to_string()),
            write_back: false,
        }
    }

    fn computed(value: String) -> Self {
        Self {
            value: Some(value),
            write_back: true,
        }
    }
}

/// The memoizer state machine, evaluated per row in order: a valid cached
/// value wins unless `force` is set; rows without symptoms stay uncomputed;
/// unforced recomputes draw from `budget` and fall back to the placeholder
/// once it is spent; a failed computation yields the placeholder for this
/// response only and is logged, never propagated.
pub fn resolve_confidence(
    stored: Option<&str>,
    symptoms: &[String],
    force: bool,
    budget: &mut RecomputeBudget,
    vocabulary: &SymptomVocabulary,
    model: &dyn DiseaseModel,
) -> ConfidenceOutcome {
    let cached_valid = is_valid_confidence(stored);
    if cached_valid && !force {
        return ConfidenceOutcome::cached(stored.map(str::to_string));
    }

    if symptoms.is_empty() {
        let value = if cached_valid {
            stored.map(str::to_string)
        } else {
            None
        };
        return ConfidenceOutcome::cached(value);
    }

    if !force && !budget.try_acquire() {
        return ConfidenceOutcome::placeholder();
    }

    match compute_confidence(symptoms, vocabulary, model) {
        Ok(value) => ConfidenceOutcome::computed(value),
        Err(e) => {
            tracing::warn!("confidence recompute failed: {}", e);
            ConfidenceOutcome::placeholder()
        }
    }
}

/// One full computation: vectorize, classify, format the top probability.
pub fn compute_confidence(
    symptoms: &[String],
    vocabulary: &SymptomVocabulary,
    model: &dyn DiseaseModel,
) -> Result<String, ModelError> {
    let features = vocabulary.vectorize(symptoms);
    let distribution = model.predict(&features)?;
    let probability = top_prediction(&distribution)
        .map(|(_, p)| p)
        .unwrap_or(0.0);
    Ok(format_confidence(probability))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct StaticModel {
        distribution: Vec<f32>,
        calls: AtomicUsize,
        fail: bool,
    }

    impl StaticModel {
        fn returning(distribution: Vec<f32>) -> Self {
            Self {
                distribution,
                calls: AtomicUsize::new(0),
                fail: false,
            }
        }

        fn failing() -> Self {
            Self {
                distribution: Vec::new(),
                calls: AtomicUsize::new(0),
                fail: true,
            }
        }

        fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    impl DiseaseModel for StaticModel {
        fn predict(&self, _features: &[f32]) -> Result<Vec<f32>, ModelError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.fail {
                return Err(ModelError::Inference("boom".to_string()));
            }
            Ok(self.distribution.clone())
        }
    }

    fn vocab() -> SymptomVocabulary {
        SymptomVocabulary::new(vec![
            "fever".to_string(),
            "cough".to_string(),
            "fatigue".to_string(),
        ])
    }

    fn symptoms() -> Vec<String> {
        vec!["fever".to_string(), "cough".to_string()]
    }

    #[test]
    fn validity_predicate_rejects_sentinel_forms() {
        assert!(!is_valid_confidence(None));
        assert!(!is_valid_confidence(Some("")));
        assert!(!is_valid_confidence(Some("0%")));
        assert!(!is_valid_confidence(Some("0.00%")));
        assert!(is_valid_confidence(Some("0.10%")));
        assert!(is_valid_confidence(Some("73.42%")));
        assert!(is_valid_confidence(Some("100.00%")));
    }

    #[test]
    fn formatting_floors_zero_probability() {
        assert_eq!(format_confidence(0.0), "0.10%");
        assert_eq!(format_confidence(-1.0), "0.10%");
        assert_eq!(format_confidence(0.0005), "0.10%");
    }

    #[test]
    fn formatting_is_two_decimal_percent() {
        assert_eq!(format_confidence(0.7342), "73.42%");
        assert_eq!(format_confidence(1.0), "100.00%");
        assert_eq!(format_confidence(0.001), "0.10%");
    }

    #[test]
    fn computed_confidence_matches_percent_shape() {
        let re = regex::Regex::new(r"^\d+\.\d{2}%$").unwrap();
        let model = StaticModel::returning(vec![0.2, 0.7342, 0.0658]);
        let value = compute_confidence(&symptoms(), &vocab(), &model).unwrap();
        assert!(re.is_match(&value), "unexpected shape: {value}");
        assert_eq!(value, "73.42%");
    }

    #[test]
    fn valid_cache_short_circuits_the_model() {
        let model = StaticModel::returning(vec![0.9, 0.1]);
        let mut budget = RecomputeBudget::per_page();

        let outcome = resolve_confidence(
            Some("73.42%"),
            &symptoms(),
            false,
            &mut budget,
            &vocab(),
            &model,
        );
        assert_eq!(outcome.value.as_deref(), Some("73.42%"));
        assert!(!outcome.write_back);
        assert_eq!(model.calls(), 0);

        // Second read with the cached value still performs no model call.
        let outcome = resolve_confidence(
            Some("73.42%"),
            &symptoms(),
            false,
            &mut budget,
            &vocab(),
            &model,
        );
        assert_eq!(outcome.value.as_deref(), Some("73.42%"));
        assert_eq!(model.calls(), 0);
    }

    #[test]
    fn two_reads_with_write_back_between_compute_once() {
        let model = StaticModel::returning(vec![0.25, 0.75]);
        let mut budget = RecomputeBudget::per_page();

        // First read: nothing cached, so the model runs and the value is
        // marked for write-back.
        let first = resolve_confidence(None, &symptoms(), false, &mut budget, &vocab(), &model);
        assert!(first.write_back);
        let stored = first.value.unwrap();

        // Second read sees the persisted value and performs no model call.
        let mut budget = RecomputeBudget::per_page();
        let second = resolve_confidence(
            Some(&stored),
            &symptoms(),
            false,
            &mut budget,
            &vocab(),
            &model,
        );
        assert_eq!(second.value.as_deref(), Some(stored.as_str()));
        assert!(!second.write_back);
        assert_eq!(model.calls(), 1);
    }

    #[test]
    fn invalid_cache_forms_trigger_recompute() {
        for stored in [None, Some(""), Some("0%"), Some("0.00%")] {
            let model = StaticModel::returning(vec![0.25, 0.75]);
            let mut budget = RecomputeBudget::per_page();
            let outcome =
                resolve_confidence(stored, &symptoms(), false, &mut budget, &vocab(), &model);
            assert_eq!(outcome.value.as_deref(), Some("75.00%"));
            assert!(outcome.write_back);
            assert_eq!(model.calls(), 1);
        }
    }

    #[test]
    fn force_recomputes_past_a_valid_cache() {
        let model = StaticModel::returning(vec![0.25, 0.75]);
        let mut budget = RecomputeBudget::per_page();
        let outcome = resolve_confidence(
            Some("73.42%"),
            &symptoms(),
            true,
            &mut budget,
            &vocab(),
            &model,
        );
        assert_eq!(outcome.value.as_deref(), Some("75.00%"));
        assert!(outcome.write_back);
        assert_eq!(model.calls(), 1);
    }

    #[test]
    fn force_ignores_an_exhausted_budget() {
        let model = StaticModel::returning(vec![0.25, 0.75]);
        let mut budget = RecomputeBudget::new(0);
        let outcome = resolve_confidence(None, &symptoms(), true, &mut budget, &vocab(), &model);
        assert_eq!(outcome.value.as_deref(), Some("75.00%"));
        assert!(outcome.write_back);
    }

    #[test]
    fn missing_symptoms_leave_confidence_absent() {
        let model = StaticModel::returning(vec![0.9]);
        let mut budget = RecomputeBudget::per_page();
        let outcome = resolve_confidence(None, &[], false, &mut budget, &vocab(), &model);
        assert_eq!(outcome.value, None);
        assert!(!outcome.write_back);
        assert_eq!(model.calls(), 0);
    }

    #[test]
    fn budget_caps_page_recomputes_at_five() {
        let model = StaticModel::returning(vec![0.25, 0.75]);
        let mut budget = RecomputeBudget::per_page();
        let rows = 7;

        let mut computed = 0;
        let mut placeholders = 0;
        for _ in 0..rows {
            let outcome =
                resolve_confidence(None, &symptoms(), false, &mut budget, &vocab(), &model);
            if outcome.write_back {
                computed += 1;
                assert_eq!(outcome.value.as_deref(), Some("75.00%"));
            } else {
                placeholders += 1;
                assert_eq!(outcome.value.as_deref(), Some(PLACEHOLDER_CONFIDENCE));
            }
        }

        assert_eq!(computed, 5);
        assert_eq!(placeholders, 2);
        assert_eq!(model.calls(), 5);
    }

    #[test]
    fn budget_is_not_consumed_by_cached_rows() {
        let model = StaticModel::returning(vec![0.25, 0.75]);
        let mut budget = RecomputeBudget::per_page();

        for _ in 0..10 {
            resolve_confidence(
                Some("50.00%"),
                &symptoms(),
                false,
                &mut budget,
                &vocab(),
                &model,
            );
        }
        let outcome = resolve_confidence(None, &symptoms(), false, &mut budget, &vocab(), &model);
        assert!(outcome.write_back);
        assert_eq!(model.calls(), 1);
    }

    #[test]
    fn failed_computation_yields_placeholder_without_write_back() {
        let model = StaticModel::failing();
        let mut budget = RecomputeBudget::per_page();
        let outcome = resolve_confidence(None, &symptoms(), false, &mut budget, &vocab(), &model);
        assert_eq!(outcome.value.as_deref(), Some(PLACEHOLDER_CONFIDENCE));
        assert!(!outcome.write_back);
        assert_eq!(model.calls(), 1);
    }

    #[test]
    fn zero_probability_model_yields_floor_not_zero() {
        let model = StaticModel::returning(vec![0.0, 0.0]);
        let mut budget = RecomputeBudget::per_page();
        let outcome = resolve_confidence(None, &symptoms(), false, &mut budget, &vocab(), &model);
        assert_eq!(outcome.value.as_deref(), Some("0.10%"));
        // The floored value is a real computation and is persisted.
        assert!(outcome.write_back);
    }
}
