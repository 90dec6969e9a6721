//! Violation response normalization

use std::collections::HashSet;

use jdp_common::types::{
    ViolatedConditionEntry, Violation, ViolationResponse, ViolationType, ViolationTypeEntry,
};
use tracing::debug;

/// State-specific decisions involved in normalizing violation responses.
/// Defaults are the no-op behavior; a state overrides only what it needs.
pub trait ViolationResponseNormalizationDelegate {
    /// Whether responses sharing a response date should be collapsed into a
    /// single representative.
    fn should_de_duplicate_responses_by_date(&self) -> bool {
        false
    }

    /// Violation types to append to a response's violation beyond what the
    /// source data carries.
    fn additional_violation_types_for_response(
        &self,
        _response: &ViolationResponse,
    ) -> Vec<ViolationTypeEntry> {
        Vec::new()
    }

    /// Rewrites one violated condition entry in the context of its response.
    fn update_condition(
        &self,
        _response: &ViolationResponse,
        condition: ViolatedConditionEntry,
    ) -> ViolatedConditionEntry {
        condition
    }
}

/// Normalizes a person's violation responses for the calculation pipelines:
/// drops drafts and responses with no date, sorts ascending by date, applies
/// delegate updates to each violation, and optionally collapses responses
/// sharing a date.
///
/// Consumes the input and returns newly built values; nothing in the output
/// aliases caller state.
pub fn normalized_violation_responses_for_calculations(
    responses: Vec<ViolationResponse>,
    delegate: &dyn ViolationResponseNormalizationDelegate,
) -> Vec<ViolationResponse> {
    let input_len = responses.len();

    let mut filtered: Vec<ViolationResponse> = responses
        .into_iter()
        .filter(|response| response.response_date.is_some() && !response.is_draft)
        .collect();
    // Stable sort keeps same-date responses in input order, which fixes
    // which response becomes the representative under de-duplication.
    filtered.sort_by_key(|response| response.response_date);

    let updated = update_violations_on_responses(filtered, delegate);

    let normalized = if delegate.should_de_duplicate_responses_by_date() {
        de_duplicate_responses_by_date(updated)
    } else {
        updated
    };

    debug!(
        input = input_len,
        output = normalized.len(),
        "Normalized violation responses"
    );
    normalized
}

fn update_violations_on_responses(
    responses: Vec<ViolationResponse>,
    delegate: &dyn ViolationResponseNormalizationDelegate,
) -> Vec<ViolationResponse> {
    responses
        .into_iter()
        .map(|response| {
            let violation = match &response.violation {
                None => return response,
                Some(violation) => violation.clone(),
            };

            let mut violation_types = violation.violation_types.clone();
            violation_types.extend(delegate.additional_violation_types_for_response(&response));

            let violated_conditions = violation
                .violated_conditions
                .iter()
                .cloned()
                .map(|condition| delegate.update_condition(&response, condition))
                .collect();

            let updated = violation
                .with_violation_types(violation_types)
                .with_violated_conditions(violated_conditions);
            response.with_violation(Some(updated))
        })
        .collect()
}

/// Collapses responses that share a response date into one representative
/// (the earliest in sort order) whose violation carries the union of all
/// violation types seen that date, in first-occurrence order.
fn de_duplicate_responses_by_date(responses: Vec<ViolationResponse>) -> Vec<ViolationResponse> {
    let mut deduped: Vec<ViolationResponse> = Vec::new();
    let mut group: Vec<ViolationResponse> = Vec::new();

    for response in responses {
        let starts_new_group = group
            .first()
            .is_some_and(|first| first.response_date != response.response_date);
        if starts_new_group {
            if let Some(merged) = merge_same_date_group(std::mem::take(&mut group)) {
                deduped.push(merged);
            }
        }
        group.push(response);
    }
    if let Some(merged) = merge_same_date_group(group) {
        deduped.push(merged);
    }
    deduped
}

fn merge_same_date_group(group: Vec<ViolationResponse>) -> Option<ViolationResponse> {
    let representative = group.first()?.clone();

    let mut seen: HashSet<ViolationType> = HashSet::new();
    let mut merged_types: Vec<ViolationTypeEntry> = Vec::new();
    for response in &group {
        let violation = match &response.violation {
            None => continue,
            Some(violation) => violation,
        };
        for entry in &violation.violation_types {
            let violation_type = match entry.violation_type {
                None => continue,
                Some(violation_type) => violation_type,
            };
            if seen.insert(violation_type) {
                merged_types.push(entry.clone());
            }
        }
    }

    let merged_violation = match &representative.violation {
        Some(violation) => violation.clone().with_violation_types(merged_types),
        // The representative may have no violation while later responses on
        // the same date do; their types still need somewhere to live.
        None if !merged_types.is_empty() => {
            Violation::default().with_violation_types(merged_types)
        },
        None => return Some(representative),
    };
    Some(representative.with_violation(Some(merged_violation)))
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    struct NoOpDelegate;
    impl ViolationResponseNormalizationDelegate for NoOpDelegate {}

    struct DedupingDelegate;
    impl ViolationResponseNormalizationDelegate for DedupingDelegate {
        fn should_de_duplicate_responses_by_date(&self) -> bool {
            true
        }
    }

    struct AugmentingDelegate;
    impl ViolationResponseNormalizationDelegate for AugmentingDelegate {
        fn additional_violation_types_for_response(
            &self,
            _response: &ViolationResponse,
        ) -> Vec<ViolationTypeEntry> {
            vec![ViolationTypeEntry::new(ViolationType::Technical)]
        }

        fn update_condition(
            &self,
            _response: &ViolationResponse,
            condition: ViolatedConditionEntry,
        ) -> ViolatedConditionEntry {
            condition.with_condition("SPECIAL_CONDITIONS")
        }
    }

    fn date(day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2021, 6, day).unwrap()
    }

    fn response(day: Option<u32>, types: &[ViolationType]) -> ViolationResponse {
        let violation = Violation::default().with_violation_types(
            types.iter().copied().map(ViolationTypeEntry::new).collect(),
        );
        ViolationResponse {
            external_id: None,
            response_date: day.map(date),
            is_draft: false,
            violation: Some(violation),
        }
    }

    fn response_without_violation(day: u32) -> ViolationResponse {
        ViolationResponse {
            external_id: None,
            response_date: Some(date(day)),
            is_draft: false,
            violation: None,
        }
    }

    fn violation_types_of(response: &ViolationResponse) -> Vec<ViolationType> {
        response
            .violation
            .as_ref()
            .map(|v| {
                v.violation_types
                    .iter()
                    .filter_map(|e| e.violation_type)
                    .collect()
            })
            .unwrap_or_default()
    }

    #[test]
    fn test_empty_input_produces_empty_output() {
        let normalized = normalized_violation_responses_for_calculations(Vec::new(), &NoOpDelegate);
        assert!(normalized.is_empty());
    }

    #[test]
    fn test_drops_drafts_and_null_dates_and_sorts() {
        let mut draft = response(Some(3), &[]);
        draft.is_draft = true;
        let responses = vec![
            response(Some(5), &[]),
            draft,
            response(None, &[]),
            response(Some(1), &[]),
        ];

        let normalized = normalized_violation_responses_for_calculations(responses, &NoOpDelegate);
        assert_eq!(
            normalized
                .iter()
                .map(|r| r.response_date.unwrap())
                .collect::<Vec<_>>(),
            vec![date(1), date(5)]
        );
    }

    #[test]
    fn test_without_dedup_length_is_preserved() {
        let responses = vec![
            response(Some(2), &[ViolationType::Felony]),
            response(Some(2), &[ViolationType::Technical]),
            response(Some(1), &[]),
        ];

        let normalized = normalized_violation_responses_for_calculations(responses, &NoOpDelegate);
        assert_eq!(normalized.len(), 3);
    }

    #[test]
    fn test_dedup_merges_types_in_first_occurrence_order() {
        let responses = vec![
            response(Some(2), &[ViolationType::Felony]),
            response_without_violation(2),
            response(Some(2), &[ViolationType::Technical, ViolationType::Felony]),
        ];

        let normalized =
            normalized_violation_responses_for_calculations(responses, &DedupingDelegate);
        assert_eq!(normalized.len(), 1);
        assert_eq!(
            violation_types_of(&normalized[0]),
            vec![ViolationType::Felony, ViolationType::Technical]
        );
    }

    #[test]
    fn test_dedup_keeps_distinct_dates_separate() {
        let responses = vec![
            response(Some(1), &[ViolationType::Felony]),
            response(Some(2), &[ViolationType::Technical]),
        ];

        let normalized =
            normalized_violation_responses_for_calculations(responses, &DedupingDelegate);
        assert_eq!(normalized.len(), 2);
        assert_eq!(violation_types_of(&normalized[0]), vec![ViolationType::Felony]);
        assert_eq!(
            violation_types_of(&normalized[1]),
            vec![ViolationType::Technical]
        );
    }

    #[test]
    fn test_dedup_representative_without_violation_still_collects_types() {
        let responses = vec![
            response_without_violation(2),
            response(Some(2), &[ViolationType::Misdemeanor]),
        ];

        let normalized =
            normalized_violation_responses_for_calculations(responses, &DedupingDelegate);
        assert_eq!(normalized.len(), 1);
        assert_eq!(
            violation_types_of(&normalized[0]),
            vec![ViolationType::Misdemeanor]
        );
    }

    #[test]
    fn test_delegate_augments_types_and_rewrites_conditions() {
        let violation = Violation::default()
            .with_violation_types(vec![ViolationTypeEntry::new(ViolationType::Felony)])
            .with_violated_conditions(vec![ViolatedConditionEntry::new("EMPLOYMENT")]);
        let responses = vec![ViolationResponse {
            external_id: None,
            response_date: Some(date(1)),
            is_draft: false,
            violation: Some(violation),
        }];

        let normalized =
            normalized_violation_responses_for_calculations(responses, &AugmentingDelegate);
        assert_eq!(
            violation_types_of(&normalized[0]),
            vec![ViolationType::Felony, ViolationType::Technical]
        );
        let conditions = &normalized[0].violation.as_ref().unwrap().violated_conditions;
        assert_eq!(conditions[0].condition, "SPECIAL_CONDITIONS");
    }
}
