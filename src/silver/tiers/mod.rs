pub mod patterns;
pub mod selectors;
pub mod structured;

use regex::Regex;
use std::sync::OnceLock;

use crate::silver::types::{ExtractionError, SilverRecord};

/// A typed value produced by an extraction tier.
#[derive(Debug, Clone, PartialEq)]
pub enum FieldDatum {
    Text(String),
    Int(u32),
    Float(f64),
    Flag(bool),
}

/// One extracted field with the confidence its tier assigned.
#[derive(Debug, Clone)]
pub struct FieldValue {
    pub field: &'static str,
    pub datum: FieldDatum,
    pub confidence: f64,
}

impl FieldValue {
    pub fn text(field: &'static str, value: impl Into<String>, confidence: f64) -> Self {
        Self {
            field,
            datum: FieldDatum::Text(value.into()),
            confidence,
        }
    }

    pub fn int(field: &'static str, value: u32, confidence: f64) -> Self {
        Self {
            field,
            datum: FieldDatum::Int(value),
            confidence,
        }
    }

    pub fn float(field: &'static str, value: f64, confidence: f64) -> Self {
        Self {
            field,
            datum: FieldDatum::Float(value),
            confidence,
        }
    }
}

/// What one tier produced across all the fields it attempted.
#[derive(Debug, Default)]
pub struct TierOutcome {
    pub values: Vec<FieldValue>,
    pub errors: Vec<ExtractionError>,
}

impl TierOutcome {
    pub fn push_error(&mut self, field: &str, message: impl Into<String>) {
        self.errors.push(ExtractionError {
            field: field.to_string(),
            message: message.into(),
        });
    }
}

/// Write a typed value into its record slot. Returns false for an unknown
/// field name or a datum of the wrong shape.
pub fn apply_field(record: &mut SilverRecord, value: &FieldValue) -> bool {
    use FieldDatum::*;
    match (value.field, &value.datum) {
        ("school_name", Text(v)) => record.school_name = Some(v.clone()),
        ("nces_id", Text(v)) => record.nces_id = Some(v.clone()),
        ("district_name", Text(v)) => record.district_name = Some(v.clone()),
        ("county_name", Text(v)) => record.county_name = Some(v.clone()),
        ("address_street", Text(v)) => record.address_street = Some(v.clone()),
        ("address_city", Text(v)) => record.address_city = Some(v.clone()),
        ("address_state", Text(v)) => record.address_state = Some(v.clone()),
        ("address_zip", Text(v)) => record.address_zip = Some(v.clone()),
        ("phone", Text(v)) => record.phone = Some(v.clone()),
        ("website", Text(v)) => record.website = Some(v.clone()),
        ("setting", Text(v)) => record.setting = Some(v.clone()),
        ("grades_served", Text(v)) => record.grades_served = Some(v.clone()),
        ("enrollment", Int(v)) => record.enrollment = Some(*v),
        ("student_teacher_ratio", Text(v)) => record.student_teacher_ratio = Some(v.clone()),
        ("full_time_teachers", Int(v)) => record.full_time_teachers = Some(*v),
        ("counselors", Int(v)) => record.counselors = Some(*v),
        ("enrollment_grade_9", Int(v)) => record.enrollment_grade_9 = Some(*v),
        ("enrollment_grade_10", Int(v)) => record.enrollment_grade_10 = Some(*v),
        ("enrollment_grade_11", Int(v)) => record.enrollment_grade_11 = Some(*v),
        ("enrollment_grade_12", Int(v)) => record.enrollment_grade_12 = Some(*v),
        ("enrollment_male", Int(v)) => record.enrollment_male = Some(*v),
        ("enrollment_female", Int(v)) => record.enrollment_female = Some(*v),
        ("national_rank", Int(v)) => record.national_rank = Some(*v),
        ("national_rank_total", Int(v)) => record.national_rank_total = Some(*v),
        ("state_rank", Int(v)) => record.state_rank = Some(*v),
        ("state_rank_total", Int(v)) => record.state_rank_total = Some(*v),
        ("district_rank", Int(v)) => record.district_rank = Some(*v),
        ("district_rank_total", Int(v)) => record.district_rank_total = Some(*v),
        ("stem_rank", Int(v)) => record.stem_rank = Some(*v),
        ("charter_rank", Int(v)) => record.charter_rank = Some(*v),
        ("ap_participation_rate", Float(v)) => record.ap_participation_rate = Some(*v),
        ("ap_pass_rate", Float(v)) => record.ap_pass_rate = Some(*v),
        ("ap_course_count", Int(v)) => record.ap_course_count = Some(*v),
        ("ib_participation_rate", Float(v)) => record.ib_participation_rate = Some(*v),
        ("math_proficiency", Float(v)) => record.math_proficiency = Some(*v),
        ("reading_proficiency", Float(v)) => record.reading_proficiency = Some(*v),
        ("science_proficiency", Float(v)) => record.science_proficiency = Some(*v),
        ("math_proficiency_state_avg", Float(v)) => record.math_proficiency_state_avg = Some(*v),
        ("reading_proficiency_state_avg", Float(v)) => {
            record.reading_proficiency_state_avg = Some(*v)
        }
        ("science_proficiency_state_avg", Float(v)) => {
            record.science_proficiency_state_avg = Some(*v)
        }
        ("graduation_rate", Float(v)) => record.graduation_rate = Some(*v),
        ("graduation_rate_state_avg", Float(v)) => record.graduation_rate_state_avg = Some(*v),
        ("college_readiness_index", Float(v)) => record.college_readiness_index = Some(*v),
        ("college_curriculum_breadth_index", Float(v)) => {
            record.college_curriculum_breadth_index = Some(*v)
        }
        ("act_avg", Float(v)) => record.act_avg = Some(*v),
        ("sat_avg", Float(v)) => record.sat_avg = Some(*v),
        ("college_enrollment_rate", Float(v)) => record.college_enrollment_rate = Some(*v),
        ("college_persistence_rate", Float(v)) => record.college_persistence_rate = Some(*v),
        ("white_pct", Float(v)) => record.white_pct = Some(*v),
        ("black_pct", Float(v)) => record.black_pct = Some(*v),
        ("hispanic_pct", Float(v)) => record.hispanic_pct = Some(*v),
        ("asian_pct", Float(v)) => record.asian_pct = Some(*v),
        ("american_indian_pct", Float(v)) => record.american_indian_pct = Some(*v),
        ("pacific_islander_pct", Float(v)) => record.pacific_islander_pct = Some(*v),
        ("two_or_more_pct", Float(v)) => record.two_or_more_pct = Some(*v),
        ("minority_enrollment_pct", Float(v)) => record.minority_enrollment_pct = Some(*v),
        ("female_pct", Float(v)) => record.female_pct = Some(*v),
        ("male_pct", Float(v)) => record.male_pct = Some(*v),
        ("economically_disadvantaged_pct", Float(v)) => {
            record.economically_disadvantaged_pct = Some(*v)
        }
        ("free_lunch_pct", Float(v)) => record.free_lunch_pct = Some(*v),
        ("reduced_lunch_pct", Float(v)) => record.reduced_lunch_pct = Some(*v),
        ("free_reduced_lunch_pct", Float(v)) => record.free_reduced_lunch_pct = Some(*v),
        ("ell_pct", Float(v)) => record.ell_pct = Some(*v),
        ("special_ed_pct", Float(v)) => record.special_ed_pct = Some(*v),
        ("school_type", Text(v)) => record.school_type = Some(v.clone()),
        ("is_charter", Flag(v)) => record.is_charter = Some(*v),
        ("is_magnet", Flag(v)) => record.is_magnet = Some(*v),
        ("is_title_i", Flag(v)) => record.is_title_i = Some(*v),
        ("math_test_takers", Int(v)) => record.math_test_takers = Some(*v),
        ("reading_test_takers", Int(v)) => record.reading_test_takers = Some(*v),
        ("science_test_takers", Int(v)) => record.science_test_takers = Some(*v),
        ("teachers_certified_pct", Float(v)) => record.teachers_certified_pct = Some(*v),
        ("avg_class_size", Float(v)) => record.avg_class_size = Some(*v),
        ("expenditure_per_student", Float(v)) => record.expenditure_per_student = Some(*v),
        _ => return false,
    }
    true
}

pub const NATIONAL_RANK_MAX: u32 = 50_000;
pub const STATE_RANK_MAX: u32 = 5_000;
pub const ENROLLMENT_MIN: u32 = 10;
pub const ENROLLMENT_MAX: u32 = 10_000;

fn rank_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"(?i)^\s*(?:#\s*|rank\s+)?(\d+)\s*$").expect("rank pattern"))
}

fn ratio_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"^\d{1,2}:\d$").expect("ratio pattern"))
}

fn grades_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"^(?:K-|PK-)?\d{1,2}-\d{1,2}$").expect("grades pattern"))
}

fn zip_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"^\d{5}(-\d{4})?$").expect("zip pattern"))
}

/// Parse a number with thousands separators stripped.
pub fn parse_number(raw: &str) -> Option<f64> {
    let cleaned = raw.trim().replace(',', "");
    cleaned.parse::<f64>().ok()
}

/// Parse a rank in the forms `#1234`, `rank 1234`, or bare `1234`.
/// Negative values and values above `max` are rejected.
pub fn parse_rank(raw: &str, max: u32) -> Option<u32> {
    let cleaned = raw.trim().replace(',', "");
    if cleaned.contains('-') {
        return None;
    }
    let captures = rank_pattern().captures(&cleaned)?;
    let rank: u32 = captures.get(1)?.as_str().parse().ok()?;
    if rank == 0 || rank > max {
        return None;
    }
    Some(rank)
}

/// Accept `NN%`, `NN.N%`, or a bare decimal in (0, 1] scaled ×100. The
/// resulting value must land in [0, 100].
pub fn parse_percentage(raw: &str) -> Option<f64> {
    let trimmed = raw.trim();
    let value = if let Some(stripped) = trimmed.strip_suffix('%') {
        parse_number(stripped)?
    } else {
        let decimal = parse_number(trimmed)?;
        if decimal <= 0.0 || decimal > 1.0 {
            return None;
        }
        decimal * 100.0
    };
    if (0.0..=100.0).contains(&value) {
        Some(value)
    } else {
        None
    }
}

/// Normalize a phone number to `(NNN) NNN-NNNN`.
pub fn normalize_phone(raw: &str) -> Option<String> {
    let mut digits: Vec<char> = raw.chars().filter(|c| c.is_ascii_digit()).collect();
    if digits.len() == 11 && digits[0] == '1' {
        digits.remove(0);
    }
    if digits.len() != 10 {
        return None;
    }
    let s: String = digits.into_iter().collect();
    Some(format!("({}) {}-{}", &s[0..3], &s[3..6], &s[6..10]))
}

pub fn validate_school_name(raw: &str) -> Option<String> {
    let trimmed = raw.trim();
    if trimmed.len() < 5 || trimmed.len() > 100 {
        return None;
    }
    let lowered = trimmed.to_lowercase();
    if ["error", "not found", "page not found"].contains(&lowered.as_str()) {
        return None;
    }
    Some(trimmed.to_string())
}

pub fn validate_nces_id(raw: &str) -> Option<String> {
    let trimmed = raw.trim();
    if trimmed.len() == 12 && trimmed.chars().all(|c| c.is_ascii_digit()) {
        Some(trimmed.to_string())
    } else {
        None
    }
}

pub fn validate_zip(raw: &str) -> Option<String> {
    let trimmed = raw.trim();
    zip_pattern().is_match(trimmed).then(|| trimmed.to_string())
}

pub fn validate_ratio(raw: &str) -> Option<String> {
    let trimmed = raw.trim();
    ratio_pattern().is_match(trimmed).then(|| trimmed.to_string())
}

pub fn validate_grades(raw: &str) -> Option<String> {
    let trimmed = raw.trim();
    grades_pattern().is_match(trimmed).then(|| trimmed.to_string())
}

/// Confidence a tier-2 value earns, keyed off the selector that matched.
pub fn confidence_for_selector(selector: &str) -> f64 {
    if selector.contains("data-test") {
        85.0
    } else if selector.starts_with("h1") {
        90.0
    } else if selector == "title" {
        70.0
    } else {
        85.0
    }
}
