use anyhow::bail;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Silver record lifecycle states.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ExtractionStatus {
    #[serde(rename = "pending")]
    Pending,
    #[serde(rename = "extracting")]
    Extracting,
    #[serde(rename = "extracted")]
    Extracted,
    #[serde(rename = "partial")]
    Partial,
    #[serde(rename = "failed")]
    Failed,
}

impl ExtractionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ExtractionStatus::Pending => "pending",
            ExtractionStatus::Extracting => "extracting",
            ExtractionStatus::Extracted => "extracted",
            ExtractionStatus::Partial => "partial",
            ExtractionStatus::Failed => "failed",
        }
    }

    pub fn from_str(s: &str) -> anyhow::Result<Self> {
        match s {
            "pending" => Ok(ExtractionStatus::Pending),
            "extracting" => Ok(ExtractionStatus::Extracting),
            "extracted" => Ok(ExtractionStatus::Extracted),
            "partial" => Ok(ExtractionStatus::Partial),
            "failed" => Ok(ExtractionStatus::Failed),
            _ => bail!("Invalid extraction status: {}", s),
        }
    }

    pub const ALL: [ExtractionStatus; 5] = [
        ExtractionStatus::Pending,
        ExtractionStatus::Extracting,
        ExtractionStatus::Extracted,
        ExtractionStatus::Partial,
        ExtractionStatus::Failed,
    ];
}

/// Per-category confidence scores, each in [0, 100].
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FieldConfidence {
    pub school_name: f64,
    pub rankings: f64,
    pub academics: f64,
    pub demographics: f64,
    pub location: f64,
    pub enrollment_data: f64,
}

impl FieldConfidence {
    pub fn positive_scores(&self) -> Vec<f64> {
        [
            self.school_name,
            self.rankings,
            self.academics,
            self.demographics,
            self.location,
            self.enrollment_data,
        ]
        .into_iter()
        .filter(|score| *score > 0.0)
        .collect()
    }
}

/// Failure of one tier on one field; extraction continues past it.
#[derive(Debug, Clone, Serialize)]
pub struct ExtractionError {
    pub field: String,
    pub message: String,
}

/// The complete silver payload field census. Status classification counts
/// non-null values against this list, so its length is normative.
pub const PAYLOAD_FIELDS: [&str; 74] = [
    // identity and location
    "school_name",
    "nces_id",
    "district_name",
    "county_name",
    "address_street",
    "address_city",
    "address_state",
    "address_zip",
    "phone",
    "website",
    "setting",
    "grades_served",
    // enrollment and staffing
    "enrollment",
    "student_teacher_ratio",
    "full_time_teachers",
    "counselors",
    "enrollment_grade_9",
    "enrollment_grade_10",
    "enrollment_grade_11",
    "enrollment_grade_12",
    "enrollment_male",
    "enrollment_female",
    // rankings
    "national_rank",
    "national_rank_total",
    "state_rank",
    "state_rank_total",
    "district_rank",
    "district_rank_total",
    "stem_rank",
    "charter_rank",
    // academics
    "ap_participation_rate",
    "ap_pass_rate",
    "ap_course_count",
    "ib_participation_rate",
    "math_proficiency",
    "reading_proficiency",
    "science_proficiency",
    "math_proficiency_state_avg",
    "reading_proficiency_state_avg",
    "science_proficiency_state_avg",
    "graduation_rate",
    "graduation_rate_state_avg",
    "college_readiness_index",
    "college_curriculum_breadth_index",
    "act_avg",
    "sat_avg",
    "college_enrollment_rate",
    "college_persistence_rate",
    // demographics
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
    "economically_disadvantaged_pct",
    "free_lunch_pct",
    "reduced_lunch_pct",
    "free_reduced_lunch_pct",
    "ell_pct",
    "special_ed_pct",
    // school characteristics and test volume
    "school_type",
    "is_charter",
    "is_magnet",
    "is_title_i",
    "math_test_takers",
    "reading_test_takers",
    "science_test_takers",
    "teachers_certified_pct",
    "avg_class_size",
    "expenditure_per_student",
];

pub const PAYLOAD_FIELD_COUNT: usize = PAYLOAD_FIELDS.len();

/// One structured school profile, refined from a bronze capture.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SilverRecord {
    pub id: Option<i64>,
    pub bronze_record_id: i64,
    pub school_slug: String,
    pub source_year: i32,

    // identity and location
    pub school_name: Option<String>,
    pub nces_id: Option<String>,
    pub district_name: Option<String>,
    pub county_name: Option<String>,
    pub address_street: Option<String>,
    pub address_city: Option<String>,
    pub address_state: Option<String>,
    pub address_zip: Option<String>,
    pub phone: Option<String>,
    pub website: Option<String>,
    pub setting: Option<String>,
    pub grades_served: Option<String>,

    // enrollment and staffing
    pub enrollment: Option<u32>,
    pub student_teacher_ratio: Option<String>,
    pub full_time_teachers: Option<u32>,
    pub counselors: Option<u32>,
    pub enrollment_grade_9: Option<u32>,
    pub enrollment_grade_10: Option<u32>,
    pub enrollment_grade_11: Option<u32>,
    pub enrollment_grade_12: Option<u32>,
    pub enrollment_male: Option<u32>,
    pub enrollment_female: Option<u32>,

    // rankings
    pub national_rank: Option<u32>,
    pub national_rank_total: Option<u32>,
    pub state_rank: Option<u32>,
    pub state_rank_total: Option<u32>,
    pub district_rank: Option<u32>,
    pub district_rank_total: Option<u32>,
    pub stem_rank: Option<u32>,
    pub charter_rank: Option<u32>,

    // academics
    pub ap_participation_rate: Option<f64>,
    pub ap_pass_rate: Option<f64>,
    pub ap_course_count: Option<u32>,
    pub ib_participation_rate: Option<f64>,
    pub math_proficiency: Option<f64>,
    pub reading_proficiency: Option<f64>,
    pub science_proficiency: Option<f64>,
    pub math_proficiency_state_avg: Option<f64>,
    pub reading_proficiency_state_avg: Option<f64>,
    pub science_proficiency_state_avg: Option<f64>,
    pub graduation_rate: Option<f64>,
    pub graduation_rate_state_avg: Option<f64>,
    pub college_readiness_index: Option<f64>,
    pub college_curriculum_breadth_index: Option<f64>,
    pub act_avg: Option<f64>,
    pub sat_avg: Option<f64>,
    pub college_enrollment_rate: Option<f64>,
    pub college_persistence_rate: Option<f64>,

    // demographics
    pub white_pct: Option<f64>,
    pub black_pct: Option<f64>,
    pub hispanic_pct: Option<f64>,
    pub asian_pct: Option<f64>,
    pub american_indian_pct: Option<f64>,
    pub pacific_islander_pct: Option<f64>,
    pub two_or_more_pct: Option<f64>,
    pub minority_enrollment_pct: Option<f64>,
    pub female_pct: Option<f64>,
    pub male_pct: Option<f64>,
    pub economically_disadvantaged_pct: Option<f64>,
    pub free_lunch_pct: Option<f64>,
    pub reduced_lunch_pct: Option<f64>,
    pub free_reduced_lunch_pct: Option<f64>,
    pub ell_pct: Option<f64>,
    pub special_ed_pct: Option<f64>,

    // school characteristics and test volume
    pub school_type: Option<String>,
    pub is_charter: Option<bool>,
    pub is_magnet: Option<bool>,
    pub is_title_i: Option<bool>,
    pub math_test_takers: Option<u32>,
    pub reading_test_takers: Option<u32>,
    pub science_test_takers: Option<u32>,
    pub teachers_certified_pct: Option<f64>,
    pub avg_class_size: Option<f64>,
    pub expenditure_per_student: Option<f64>,

    // quality
    pub extraction_status: ExtractionStatus,
    pub extraction_confidence: f64,
    pub field_confidence: FieldConfidence,
    pub processing_errors: Vec<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Default for ExtractionStatus {
    fn default() -> Self {
        ExtractionStatus::Pending
    }
}

impl Default for SilverRecord {
    fn default() -> Self {
        let now = Utc::now();
        Self {
            id: None,
            bronze_record_id: 0,
            school_slug: String::new(),
            source_year: 0,
            school_name: None,
            nces_id: None,
            district_name: None,
            county_name: None,
            address_street: None,
            address_city: None,
            address_state: None,
            address_zip: None,
            phone: None,
            website: None,
            setting: None,
            grades_served: None,
            enrollment: None,
            student_teacher_ratio: None,
            full_time_teachers: None,
            counselors: None,
            enrollment_grade_9: None,
            enrollment_grade_10: None,
            enrollment_grade_11: None,
            enrollment_grade_12: None,
            enrollment_male: None,
            enrollment_female: None,
            national_rank: None,
            national_rank_total: None,
            state_rank: None,
            state_rank_total: None,
            district_rank: None,
            district_rank_total: None,
            stem_rank: None,
            charter_rank: None,
            ap_participation_rate: None,
            ap_pass_rate: None,
            ap_course_count: None,
            ib_participation_rate: None,
            math_proficiency: None,
            reading_proficiency: None,
            science_proficiency: None,
            math_proficiency_state_avg: None,
            reading_proficiency_state_avg: None,
            science_proficiency_state_avg: None,
            graduation_rate: None,
            graduation_rate_state_avg: None,
            college_readiness_index: None,
            college_curriculum_breadth_index: None,
            act_avg: None,
            sat_avg: None,
            college_enrollment_rate: None,
            college_persistence_rate: None,
            white_pct: None,
            black_pct: None,
            hispanic_pct: None,
            asian_pct: None,
            american_indian_pct: None,
            pacific_islander_pct: None,
            two_or_more_pct: None,
            minority_enrollment_pct: None,
            female_pct: None,
            male_pct: None,
            economically_disadvantaged_pct: None,
            free_lunch_pct: None,
            reduced_lunch_pct: None,
            free_reduced_lunch_pct: None,
            ell_pct: None,
            special_ed_pct: None,
            school_type: None,
            is_charter: None,
            is_magnet: None,
            is_title_i: None,
            math_test_takers: None,
            reading_test_takers: None,
            science_test_takers: None,
            teachers_certified_pct: None,
            avg_class_size: None,
            expenditure_per_student: None,
            extraction_status: ExtractionStatus::Pending,
            extraction_confidence: 0.0,
            field_confidence: FieldConfidence::default(),
            processing_errors: Vec::new(),
            created_at: now,
            updated_at: now,
        }
    }
}

impl SilverRecord {
    pub fn empty(bronze_record_id: i64, school_slug: &str, source_year: i32) -> Self {
        Self {
            bronze_record_id,
            school_slug: school_slug.to_string(),
            source_year,
            ..Self::default()
        }
    }

    /// How many of the 74 payload fields hold a value.
    pub fn non_null_payload_count(&self) -> usize {
        let mut count = 0;
        macro_rules! tally {
            ($($field:ident),* $(,)?) => {
                $( if self.$field.is_some() { count += 1; } )*
            };
        }
        tally!(
            school_name,
            nces_id,
            district_name,
            county_name,
            address_street,
            address_city,
            address_state,
            address_zip,
            phone,
            website,
            setting,
            grades_served,
            enrollment,
            student_teacher_ratio,
            full_time_teachers,
            counselors,
            enrollment_grade_9,
            enrollment_grade_10,
            enrollment_grade_11,
            enrollment_grade_12,
            enrollment_male,
            enrollment_female,
            national_rank,
            national_rank_total,
            state_rank,
            state_rank_total,
            district_rank,
            district_rank_total,
            stem_rank,
            charter_rank,
            ap_participation_rate,
            ap_pass_rate,
            ap_course_count,
            ib_participation_rate,
            math_proficiency,
            reading_proficiency,
            science_proficiency,
            math_proficiency_state_avg,
            reading_proficiency_state_avg,
            science_proficiency_state_avg,
            graduation_rate,
            graduation_rate_state_avg,
            college_readiness_index,
            college_curriculum_breadth_index,
            act_avg,
            sat_avg,
            college_enrollment_rate,
            college_persistence_rate,
            white_pct,
            black_pct,
            hispanic_pct,
            asian_pct,
            american_indian_pct,
            pacific_islander_pct,
            two_or_more_pct,
            minority_enrollment_pct,
            female_pct,
            male_pct,
            economically_disadvantaged_pct,
            free_lunch_pct,
            reduced_lunch_pct,
            free_reduced_lunch_pct,
            ell_pct,
            special_ed_pct,
            school_type,
            is_charter,
            is_magnet,
            is_title_i,
            math_test_takers,
            reading_test_takers,
            science_test_takers,
            teachers_certified_pct,
            avg_class_size,
            expenditure_per_student,
        );
        count
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_payload_census_is_stable() {
        assert_eq!(PAYLOAD_FIELD_COUNT, 74);
    }

    #[test]
    fn test_status_round_trips() {
        for status in ExtractionStatus::ALL {
            assert_eq!(ExtractionStatus::from_str(status.as_str()).unwrap(), status);
        }
        assert!(ExtractionStatus::from_str("done").is_err());
    }

    #[test]
    fn test_non_null_count_tracks_population() {
        let mut record = SilverRecord::empty(1, "acme-high", 2025);
        assert_eq!(record.non_null_payload_count(), 0);

        record.school_name = Some("Acme High".to_string());
        record.enrollment = Some(1200);
        record.is_magnet = Some(false);
        assert_eq!(record.non_null_payload_count(), 3);
    }

    #[test]
    fn test_positive_scores_excludes_zero_categories() {
        let confidence = FieldConfidence {
            school_name: 95.0,
            location: 90.0,
            ..FieldConfidence::default()
        };
        let positive = confidence.positive_scores();
        assert_eq!(positive.len(), 2);
        assert!(positive.contains(&95.0));
    }
}
