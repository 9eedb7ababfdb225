use std::collections::HashMap;

use crate::silver::types::{ExtractionStatus, FieldConfidence, PAYLOAD_FIELD_COUNT};

const SCHOOL_NAME_FIELDS: &[&str] = &["school_name"];

const RANKINGS_FIELDS: &[&str] = &["national_rank", "state_rank"];

const ACADEMICS_FIELDS: &[&str] = &[
    "ap_participation_rate",
    "ap_pass_rate",
    "math_proficiency",
    "reading_proficiency",
    "science_proficiency",
    "graduation_rate",
    "college_readiness_index",
];

const DEMOGRAPHICS_FIELDS: &[&str] = &[
    "white_pct",
    "black_pct",
    "hispanic_pct",
    "asian_pct",
    "american_indian_pct",
    "pacific_islander_pct",
    "two_or_more_pct",
    "minority_enrollment_pct",
    "female_pct",
    "male_pct",
];

const LOCATION_FIELDS: &[&str] = &[
    "address_street",
    "address_city",
    "address_state",
    "address_zip",
    "phone",
    "website",
    "setting",
];

const ENROLLMENT_DATA_FIELDS: &[&str] = &[
    "enrollment",
    "student_teacher_ratio",
    "full_time_teachers",
];

/// Thresholds for status classification, as fractions of the payload census.
const EXTRACTED_FRACTION: f64 = 0.8;
const PARTIAL_FRACTION: f64 = 0.3;

/// Turns per-field extraction confidences into category scores, an overall
/// score, and a status classification.
pub struct ConfidenceScorer;

impl ConfidenceScorer {
    fn category_max(field_confidences: &HashMap<&'static str, f64>, fields: &[&str]) -> f64 {
        fields
            .iter()
            .filter_map(|field| field_confidences.get(field))
            .fold(0.0, |best, confidence| confidence.max(best))
    }

    /// Each category takes the maximum confidence among its fields; a field
    /// no tier supplied contributes nothing.
    pub fn category_scores(field_confidences: &HashMap<&'static str, f64>) -> FieldConfidence {
        FieldConfidence {
            school_name: Self::category_max(field_confidences, SCHOOL_NAME_FIELDS),
            rankings: Self::category_max(field_confidences, RANKINGS_FIELDS),
            academics: Self::category_max(field_confidences, ACADEMICS_FIELDS),
            demographics: Self::category_max(field_confidences, DEMOGRAPHICS_FIELDS),
            location: Self::category_max(field_confidences, LOCATION_FIELDS),
            enrollment_data: Self::category_max(field_confidences, ENROLLMENT_DATA_FIELDS),
        }
    }

    /// Arithmetic mean of the positive category scores; zero when no
    /// category scored.
    pub fn overall(confidence: &FieldConfidence) -> f64 {
        let positive = confidence.positive_scores();
        if positive.is_empty() {
            return 0.0;
        }
        positive.iter().sum::<f64>() / positive.len() as f64
    }

    /// Classify by the fraction of populated payload fields.
    pub fn classify(non_null_count: usize) -> ExtractionStatus {
        let fraction = non_null_count as f64 / PAYLOAD_FIELD_COUNT as f64;
        if fraction >= EXTRACTED_FRACTION {
            ExtractionStatus::Extracted
        } else if fraction >= PARTIAL_FRACTION {
            ExtractionStatus::Partial
        } else {
            ExtractionStatus::Failed
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_structured_data_scenario_scores() {
        let mut confidences: HashMap<&'static str, f64> = HashMap::new();
        confidences.insert("school_name", 95.0);
        confidences.insert("address_street", 90.0);
        confidences.insert("address_city", 90.0);
        confidences.insert("address_state", 90.0);
        confidences.insert("address_zip", 90.0);
        confidences.insert("phone", 90.0);
        confidences.insert("state_rank", 85.0);
        confidences.insert("ap_participation_rate", 80.0);
        confidences.insert("white_pct", 80.0);
        confidences.insert("minority_enrollment_pct", 80.0);
        confidences.insert("economically_disadvantaged_pct", 80.0);

        let categories = ConfidenceScorer::category_scores(&confidences);
        assert_eq!(categories.school_name, 95.0);
        assert_eq!(categories.location, 90.0);
        assert_eq!(categories.rankings, 85.0);
        assert_eq!(categories.academics, 80.0);
        assert_eq!(categories.demographics, 80.0);
        assert_eq!(categories.enrollment_data, 0.0);

        let overall = ConfidenceScorer::overall(&categories);
        assert!((overall - 86.0).abs() < 1e-9);
    }

    #[test]
    fn test_category_takes_max_not_mean() {
        let mut confidences: HashMap<&'static str, f64> = HashMap::new();
        confidences.insert("national_rank", 85.0);
        confidences.insert("state_rank", 65.0);

        let categories = ConfidenceScorer::category_scores(&confidences);
        assert_eq!(categories.rankings, 85.0);
    }

    #[test]
    fn test_overall_is_zero_when_nothing_scored() {
        let categories = ConfidenceScorer::category_scores(&HashMap::new());
        assert_eq!(ConfidenceScorer::overall(&categories), 0.0);
    }

    #[test]
    fn test_classification_thresholds() {
        assert_eq!(ConfidenceScorer::classify(74), ExtractionStatus::Extracted);
        assert_eq!(ConfidenceScorer::classify(60), ExtractionStatus::Extracted);
        assert_eq!(ConfidenceScorer::classify(59), ExtractionStatus::Partial);
        assert_eq!(ConfidenceScorer::classify(23), ExtractionStatus::Partial);
        assert_eq!(ConfidenceScorer::classify(22), ExtractionStatus::Failed);
        assert_eq!(ConfidenceScorer::classify(0), ExtractionStatus::Failed);
    }
}
