use std::collections::HashSet;

use tracing::debug;

use crate::silver::context::ExtractionContext;
use crate::silver::tiers::{
    confidence_for_selector, normalize_phone, parse_number, parse_percentage, parse_rank,
    validate_grades, validate_nces_id, validate_ratio, validate_school_name, validate_zip,
    FieldDatum, FieldValue, TierOutcome, ENROLLMENT_MAX, ENROLLMENT_MIN, NATIONAL_RANK_MAX,
    STATE_RANK_MAX,
};

pub const TIER_NAME: &str = "css_selectors";

/// Per-field prioritized selector list; the first match whose value passes
/// the field's validator wins.
struct SelectorSpec {
    field: &'static str,
    selectors: &'static [&'static str],
    parse: fn(&str) -> Option<FieldDatum>,
}

fn parse_school_name(raw: &str) -> Option<FieldDatum> {
    validate_school_name(raw).map(FieldDatum::Text)
}

fn parse_nces(raw: &str) -> Option<FieldDatum> {
    validate_nces_id(raw).map(FieldDatum::Text)
}

fn parse_grades(raw: &str) -> Option<FieldDatum> {
    validate_grades(raw).map(FieldDatum::Text)
}

fn parse_zip_field(raw: &str) -> Option<FieldDatum> {
    validate_zip(raw).map(FieldDatum::Text)
}

fn parse_phone_field(raw: &str) -> Option<FieldDatum> {
    normalize_phone(raw).map(FieldDatum::Text)
}

fn parse_short_text(raw: &str) -> Option<FieldDatum> {
    let trimmed = raw.trim();
    (2..=200).contains(&trimmed.len()).then(|| FieldDatum::Text(trimmed.to_string()))
}

fn parse_ratio_field(raw: &str) -> Option<FieldDatum> {
    validate_ratio(raw).map(FieldDatum::Text)
}

fn parse_enrollment(raw: &str) -> Option<FieldDatum> {
    let value = parse_number(raw)?;
    if value.fract() != 0.0 {
        return None;
    }
    let value = value as u32;
    (ENROLLMENT_MIN..=ENROLLMENT_MAX)
        .contains(&value)
        .then_some(FieldDatum::Int(value))
}

fn parse_teacher_count(raw: &str) -> Option<FieldDatum> {
    let value = parse_number(raw)?;
    if value < 1.0 || value > 5_000.0 {
        return None;
    }
    Some(FieldDatum::Int(value.round() as u32))
}

fn parse_national_rank(raw: &str) -> Option<FieldDatum> {
    parse_rank(raw, NATIONAL_RANK_MAX).map(FieldDatum::Int)
}

fn parse_state_rank(raw: &str) -> Option<FieldDatum> {
    parse_rank(raw, STATE_RANK_MAX).map(FieldDatum::Int)
}

fn parse_pct(raw: &str) -> Option<FieldDatum> {
    parse_percentage(raw).map(FieldDatum::Float)
}

/// Index-style scores printed without a percent sign.
fn parse_index(raw: &str) -> Option<FieldDatum> {
    let value = parse_number(raw)?;
    (0.0..=100.0).contains(&value).then_some(FieldDatum::Float(value))
}

fn parse_count_range(raw: &str, min: u32, max: u32) -> Option<u32> {
    let value = parse_number(raw)?;
    if value.fract() != 0.0 {
        return None;
    }
    let value = value as u32;
    (min..=max).contains(&value).then_some(value)
}

fn parse_grade_enrollment(raw: &str) -> Option<FieldDatum> {
    parse_count_range(raw, 1, ENROLLMENT_MAX).map(FieldDatum::Int)
}

fn parse_staff_count(raw: &str) -> Option<FieldDatum> {
    parse_count_range(raw, 1, 500).map(FieldDatum::Int)
}

fn parse_course_count(raw: &str) -> Option<FieldDatum> {
    parse_count_range(raw, 1, 60).map(FieldDatum::Int)
}

/// "of N schools" denominators, e.g. a national pool of 17,660.
fn parse_rank_total(raw: &str) -> Option<FieldDatum> {
    parse_count_range(raw, 1, 100_000).map(FieldDatum::Int)
}

fn parse_district_rank(raw: &str) -> Option<FieldDatum> {
    parse_rank(raw, STATE_RANK_MAX).map(FieldDatum::Int)
}

fn parse_secondary_rank(raw: &str) -> Option<FieldDatum> {
    parse_rank(raw, NATIONAL_RANK_MAX).map(FieldDatum::Int)
}

fn parse_flag_text(raw: &str) -> Option<FieldDatum> {
    match raw.trim().to_lowercase().as_str() {
        "yes" | "true" => Some(FieldDatum::Flag(true)),
        "no" | "false" => Some(FieldDatum::Flag(false)),
        _ => None,
    }
}

fn parse_act_score(raw: &str) -> Option<FieldDatum> {
    let value = parse_number(raw)?;
    (1.0..=36.0).contains(&value).then_some(FieldDatum::Float(value))
}

fn parse_sat_score(raw: &str) -> Option<FieldDatum> {
    let value = parse_number(raw)?;
    (400.0..=1600.0).contains(&value).then_some(FieldDatum::Float(value))
}

fn parse_class_size(raw: &str) -> Option<FieldDatum> {
    let value = parse_number(raw)?;
    (value > 0.0 && value <= 60.0).then_some(FieldDatum::Float(value))
}

fn parse_dollars(raw: &str) -> Option<FieldDatum> {
    let value = parse_number(&raw.replace('$', ""))?;
    (1_000.0..=100_000.0).contains(&value).then_some(FieldDatum::Float(value))
}

fn parse_test_taker_count(raw: &str) -> Option<FieldDatum> {
    parse_count_range(raw, 1, ENROLLMENT_MAX).map(FieldDatum::Int)
}

const SPECS: &[SelectorSpec] = &[
    SelectorSpec {
        field: "school_name",
        selectors: &[
            "[data-test-id='school-name']",
            "h1.school-profile-name",
            "h1",
            "title",
        ],
        parse: parse_school_name,
    },
    SelectorSpec {
        field: "nces_id",
        selectors: &["[data-test-id='nces-id']", "span.nces-id"],
        parse: parse_nces,
    },
    SelectorSpec {
        field: "grades_served",
        selectors: &["[data-test-id='grades-served']", "div.grades span.value"],
        parse: parse_grades,
    },
    SelectorSpec {
        field: "address_street",
        selectors: &[
            "[data-test-id='school-street-address']",
            "div.school-address span.street",
        ],
        parse: parse_short_text,
    },
    SelectorSpec {
        field: "address_city",
        selectors: &[
            "[data-test-id='school-city']",
            "div.school-address span.city",
        ],
        parse: parse_short_text,
    },
    SelectorSpec {
        field: "address_state",
        selectors: &[
            "[data-test-id='school-state']",
            "div.school-address span.state",
        ],
        parse: parse_short_text,
    },
    SelectorSpec {
        field: "address_zip",
        selectors: &[
            "[data-test-id='school-zip']",
            "div.school-address span.zip",
        ],
        parse: parse_zip_field,
    },
    SelectorSpec {
        field: "phone",
        selectors: &["[data-test-id='school-phone']", "div.school-contact span.phone"],
        parse: parse_phone_field,
    },
    SelectorSpec {
        field: "setting",
        selectors: &["[data-test-id='school-setting']", "div.setting span.value"],
        parse: parse_short_text,
    },
    SelectorSpec {
        field: "enrollment",
        selectors: &["[data-test-id='enrollment']", "div.enrollment span.value"],
        parse: parse_enrollment,
    },
    SelectorSpec {
        field: "student_teacher_ratio",
        selectors: &[
            "[data-test-id='student-teacher-ratio']",
            "div.student-teacher-ratio span.value",
        ],
        parse: parse_ratio_field,
    },
    SelectorSpec {
        field: "full_time_teachers",
        selectors: &[
            "[data-test-id='full-time-teachers']",
            "div.teachers span.value",
        ],
        parse: parse_teacher_count,
    },
    SelectorSpec {
        field: "national_rank",
        selectors: &[
            "[data-test-id='national-rank']",
            "div.rankings span.national-rank",
        ],
        parse: parse_national_rank,
    },
    SelectorSpec {
        field: "state_rank",
        selectors: &["[data-test-id='state-rank']", "div.rankings span.state-rank"],
        parse: parse_state_rank,
    },
    SelectorSpec {
        field: "ap_participation_rate",
        selectors: &[
            "[data-test-id='ap-participation-rate']",
            "div.ap-participation span.value",
        ],
        parse: parse_pct,
    },
    SelectorSpec {
        field: "ap_pass_rate",
        selectors: &["[data-test-id='ap-pass-rate']", "div.ap-pass span.value"],
        parse: parse_pct,
    },
    SelectorSpec {
        field: "math_proficiency",
        selectors: &[
            "[data-test-id='math-proficiency']",
            "div.proficiency-math span.value",
        ],
        parse: parse_pct,
    },
    SelectorSpec {
        field: "reading_proficiency",
        selectors: &[
            "[data-test-id='reading-proficiency']",
            "div.proficiency-reading span.value",
        ],
        parse: parse_pct,
    },
    SelectorSpec {
        field: "science_proficiency",
        selectors: &[
            "[data-test-id='science-proficiency']",
            "div.proficiency-science span.value",
        ],
        parse: parse_pct,
    },
    SelectorSpec {
        field: "graduation_rate",
        selectors: &[
            "[data-test-id='graduation-rate']",
            "div.graduation-rate span.value",
        ],
        parse: parse_pct,
    },
    SelectorSpec {
        field: "college_readiness_index",
        selectors: &[
            "[data-test-id='college-readiness-index']",
            "div.college-readiness span.value",
        ],
        parse: parse_index,
    },
    SelectorSpec {
        field: "white_pct",
        selectors: &["[data-test-id='demographics-white']"],
        parse: parse_pct,
    },
    SelectorSpec {
        field: "black_pct",
        selectors: &["[data-test-id='demographics-black']"],
        parse: parse_pct,
    },
    SelectorSpec {
        field: "hispanic_pct",
        selectors: &["[data-test-id='demographics-hispanic']"],
        parse: parse_pct,
    },
    SelectorSpec {
        field: "asian_pct",
        selectors: &["[data-test-id='demographics-asian']"],
        parse: parse_pct,
    },
    SelectorSpec {
        field: "american_indian_pct",
        selectors: &["[data-test-id='demographics-american-indian']"],
        parse: parse_pct,
    },
    SelectorSpec {
        field: "pacific_islander_pct",
        selectors: &["[data-test-id='demographics-pacific-islander']"],
        parse: parse_pct,
    },
    SelectorSpec {
        field: "two_or_more_pct",
        selectors: &["[data-test-id='demographics-two-or-more']"],
        parse: parse_pct,
    },
    SelectorSpec {
        field: "female_pct",
        selectors: &["[data-test-id='demographics-female']"],
        parse: parse_pct,
    },
    SelectorSpec {
        field: "male_pct",
        selectors: &["[data-test-id='demographics-male']"],
        parse: parse_pct,
    },
    SelectorSpec {
        field: "economically_disadvantaged_pct",
        selectors: &["[data-test-id='economically-disadvantaged']"],
        parse: parse_pct,
    },
    SelectorSpec {
        field: "district_name",
        selectors: &["[data-test-id='district-name']", "div.district span.value"],
        parse: parse_short_text,
    },
    SelectorSpec {
        field: "county_name",
        selectors: &["[data-test-id='county-name']"],
        parse: parse_short_text,
    },
    SelectorSpec {
        field: "counselors",
        selectors: &["[data-test-id='counselors']"],
        parse: parse_staff_count,
    },
    SelectorSpec {
        field: "enrollment_grade_9",
        selectors: &["[data-test-id='enrollment-grade-9']"],
        parse: parse_grade_enrollment,
    },
    SelectorSpec {
        field: "enrollment_grade_10",
        selectors: &["[data-test-id='enrollment-grade-10']"],
        parse: parse_grade_enrollment,
    },
    SelectorSpec {
        field: "enrollment_grade_11",
        selectors: &["[data-test-id='enrollment-grade-11']"],
        parse: parse_grade_enrollment,
    },
    SelectorSpec {
        field: "enrollment_grade_12",
        selectors: &["[data-test-id='enrollment-grade-12']"],
        parse: parse_grade_enrollment,
    },
    SelectorSpec {
        field: "enrollment_male",
        selectors: &["[data-test-id='enrollment-male']"],
        parse: parse_grade_enrollment,
    },
    SelectorSpec {
        field: "enrollment_female",
        selectors: &["[data-test-id='enrollment-female']"],
        parse: parse_grade_enrollment,
    },
    SelectorSpec {
        field: "national_rank_total",
        selectors: &["[data-test-id='national-rank-total']"],
        parse: parse_rank_total,
    },
    SelectorSpec {
        field: "state_rank_total",
        selectors: &["[data-test-id='state-rank-total']"],
        parse: parse_rank_total,
    },
    SelectorSpec {
        field: "district_rank",
        selectors: &["[data-test-id='district-rank']"],
        parse: parse_district_rank,
    },
    SelectorSpec {
        field: "district_rank_total",
        selectors: &["[data-test-id='district-rank-total']"],
        parse: parse_rank_total,
    },
    SelectorSpec {
        field: "stem_rank",
        selectors: &["[data-test-id='stem-rank']"],
        parse: parse_secondary_rank,
    },
    SelectorSpec {
        field: "charter_rank",
        selectors: &["[data-test-id='charter-rank']"],
        parse: parse_secondary_rank,
    },
    SelectorSpec {
        field: "ap_course_count",
        selectors: &["[data-test-id='ap-course-count']"],
        parse: parse_course_count,
    },
    SelectorSpec {
        field: "ib_participation_rate",
        selectors: &["[data-test-id='ib-participation-rate']"],
        parse: parse_pct,
    },
    SelectorSpec {
        field: "math_proficiency_state_avg",
        selectors: &["[data-test-id='math-proficiency-state-avg']"],
        parse: parse_pct,
    },
    SelectorSpec {
        field: "reading_proficiency_state_avg",
        selectors: &["[data-test-id='reading-proficiency-state-avg']"],
        parse: parse_pct,
    },
    SelectorSpec {
        field: "science_proficiency_state_avg",
        selectors: &["[data-test-id='science-proficiency-state-avg']"],
        parse: parse_pct,
    },
    SelectorSpec {
        field: "graduation_rate_state_avg",
        selectors: &["[data-test-id='graduation-rate-state-avg']"],
        parse: parse_pct,
    },
    SelectorSpec {
        field: "college_curriculum_breadth_index",
        selectors: &["[data-test-id='college-curriculum-breadth-index']"],
        parse: parse_index,
    },
    SelectorSpec {
        field: "act_avg",
        selectors: &["[data-test-id='act-avg']"],
        parse: parse_act_score,
    },
    SelectorSpec {
        field: "sat_avg",
        selectors: &["[data-test-id='sat-avg']"],
        parse: parse_sat_score,
    },
    SelectorSpec {
        field: "college_enrollment_rate",
        selectors: &["[data-test-id='college-enrollment-rate']"],
        parse: parse_pct,
    },
    SelectorSpec {
        field: "college_persistence_rate",
        selectors: &["[data-test-id='college-persistence-rate']"],
        parse: parse_pct,
    },
    SelectorSpec {
        field: "minority_enrollment_pct",
        selectors: &["[data-test-id='demographics-minority']"],
        parse: parse_pct,
    },
    SelectorSpec {
        field: "free_lunch_pct",
        selectors: &["[data-test-id='free-lunch']"],
        parse: parse_pct,
    },
    SelectorSpec {
        field: "reduced_lunch_pct",
        selectors: &["[data-test-id='reduced-lunch']"],
        parse: parse_pct,
    },
    SelectorSpec {
        field: "free_reduced_lunch_pct",
        selectors: &["[data-test-id='free-reduced-lunch']"],
        parse: parse_pct,
    },
    SelectorSpec {
        field: "ell_pct",
        selectors: &["[data-test-id='english-language-learners']"],
        parse: parse_pct,
    },
    SelectorSpec {
        field: "special_ed_pct",
        selectors: &["[data-test-id='special-education']"],
        parse: parse_pct,
    },
    SelectorSpec {
        field: "school_type",
        selectors: &["[data-test-id='school-type']"],
        parse: parse_short_text,
    },
    SelectorSpec {
        field: "is_charter",
        selectors: &["[data-test-id='is-charter']"],
        parse: parse_flag_text,
    },
    SelectorSpec {
        field: "is_magnet",
        selectors: &["[data-test-id='is-magnet']"],
        parse: parse_flag_text,
    },
    SelectorSpec {
        field: "is_title_i",
        selectors: &["[data-test-id='is-title-i']"],
        parse: parse_flag_text,
    },
    SelectorSpec {
        field: "math_test_takers",
        selectors: &["[data-test-id='math-test-takers']"],
        parse: parse_test_taker_count,
    },
    SelectorSpec {
        field: "reading_test_takers",
        selectors: &["[data-test-id='reading-test-takers']"],
        parse: parse_test_taker_count,
    },
    SelectorSpec {
        field: "science_test_takers",
        selectors: &["[data-test-id='science-test-takers']"],
        parse: parse_test_taker_count,
    },
    SelectorSpec {
        field: "teachers_certified_pct",
        selectors: &["[data-test-id='teachers-certified']"],
        parse: parse_pct,
    },
    SelectorSpec {
        field: "avg_class_size",
        selectors: &["[data-test-id='avg-class-size']"],
        parse: parse_class_size,
    },
    SelectorSpec {
        field: "expenditure_per_student",
        selectors: &["[data-test-id='expenditure-per-student']"],
        parse: parse_dollars,
    },
];

/// Website links live in `href`, not text.
const WEBSITE_SELECTORS: &[&str] = &["a[data-test-id='school-website']", "a.school-website"];

/// Tier 2: walk the selector catalog, skipping fields a higher tier already
/// populated.
pub fn extract(ctx: &mut ExtractionContext, already_set: &HashSet<&'static str>) -> TierOutcome {
    let mut outcome = TierOutcome::default();

    for spec in SPECS {
        if already_set.contains(spec.field) {
            continue;
        }
        for selector in spec.selectors {
            let Some(text) = ctx.text_at(selector) else {
                continue;
            };
            match (spec.parse)(&text) {
                Some(datum) => {
                    outcome.values.push(FieldValue {
                        field: spec.field,
                        datum,
                        confidence: confidence_for_selector(selector),
                    });
                    break;
                }
                None => {
                    debug!(
                        "🔎 [TIER-2] {} rejected by validator at {}: {}",
                        spec.field, selector, text
                    );
                }
            }
        }
    }

    if !already_set.contains("website") {
        for selector in WEBSITE_SELECTORS {
            if let Some(href) = ctx.attr_at(selector, "href") {
                if href.starts_with("http") {
                    outcome.values.push(FieldValue::text(
                        "website",
                        href,
                        confidence_for_selector(selector),
                    ));
                    break;
                }
            }
        }
    }

    outcome
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"<html><head><title>Lakeside High School | Profiles</title></head>
      <body>
        <h1>Lakeside High School</h1>
        <span data-test-id="nces-id">510126000123</span>
        <span data-test-id="grades-served">9-12</span>
        <span data-test-id="enrollment">1,185</span>
        <span data-test-id="student-teacher-ratio">16:1</span>
        <span data-test-id="national-rank">#1,234</span>
        <span data-test-id="state-rank">rank 44</span>
        <span data-test-id="graduation-rate">94%</span>
        <span data-test-id="demographics-white">0.61</span>
        <a data-test-id="school-website" href="https://lakeside.example.org">site</a>
        <div class="teachers"><span class="value">68</span></div>
      </body></html>"#;

    fn extract_sample() -> TierOutcome {
        let mut ctx = ExtractionContext::new(
            "/captures/lakeside-high-77/docker_curl_20250101_000000.html",
            "lakeside-high-77",
            SAMPLE.to_string(),
        );
        extract(&mut ctx, &HashSet::new())
    }

    fn find<'a>(outcome: &'a TierOutcome, field: &str) -> &'a FieldValue {
        outcome
            .values
            .iter()
            .find(|v| v.field == field)
            .unwrap_or_else(|| panic!("field {field} missing"))
    }

    #[test]
    fn test_h1_fallback_carries_higher_confidence_than_data_test() {
        let outcome = extract_sample();
        // No data-test-id school name in the sample; the h1 matches at 90.
        let name = find(&outcome, "school_name");
        assert_eq!(name.datum, FieldDatum::Text("Lakeside High School".to_string()));
        assert_eq!(name.confidence, 90.0);
    }

    #[test]
    fn test_data_test_id_values_score_85() {
        let outcome = extract_sample();
        assert_eq!(find(&outcome, "nces_id").confidence, 85.0);
        assert_eq!(find(&outcome, "enrollment").datum, FieldDatum::Int(1185));
        assert_eq!(find(&outcome, "national_rank").datum, FieldDatum::Int(1234));
        assert_eq!(find(&outcome, "state_rank").datum, FieldDatum::Int(44));
        assert_eq!(find(&outcome, "graduation_rate").datum, FieldDatum::Float(94.0));
        assert_eq!(find(&outcome, "white_pct").datum, FieldDatum::Float(61.0));
    }

    #[test]
    fn test_generic_selector_scores_85() {
        let outcome = extract_sample();
        let teachers = find(&outcome, "full_time_teachers");
        assert_eq!(teachers.datum, FieldDatum::Int(68));
        assert_eq!(teachers.confidence, 85.0);
    }

    #[test]
    fn test_website_comes_from_href() {
        let outcome = extract_sample();
        assert_eq!(
            find(&outcome, "website").datum,
            FieldDatum::Text("https://lakeside.example.org".to_string())
        );
    }

    #[test]
    fn test_title_fallback_scores_70() {
        let html = r#"<html><head><title>Riverbend High School</title></head><body></body></html>"#;
        let mut ctx = ExtractionContext::new("/c/riverbend-1/f.html", "riverbend-1", html.to_string());
        let outcome = extract(&mut ctx, &HashSet::new());
        let name = find(&outcome, "school_name");
        assert_eq!(name.confidence, 70.0);
    }

    #[test]
    fn test_already_set_fields_are_skipped() {
        let mut ctx = ExtractionContext::new("/c/l-1/f.html", "l-1", SAMPLE.to_string());
        let mut set = HashSet::new();
        set.insert("school_name");
        set.insert("enrollment");
        let outcome = extract(&mut ctx, &set);
        assert!(outcome.values.iter().all(|v| v.field != "school_name"));
        assert!(outcome.values.iter().all(|v| v.field != "enrollment"));
    }

    // Every payload field must have a producer, or the extracted-status
    // threshold could never be crossed.
    #[test]
    fn test_catalog_covers_every_payload_field() {
        use crate::silver::types::PAYLOAD_FIELDS;
        let mut covered: HashSet<&str> = SPECS.iter().map(|spec| spec.field).collect();
        covered.insert("website");
        for field in PAYLOAD_FIELDS {
            assert!(covered.contains(field), "no selector produces {field}");
        }
        assert_eq!(covered.len(), PAYLOAD_FIELDS.len());
    }

    #[test]
    fn test_flag_rank_and_dollar_fields() {
        let html = r#"<html><body>
            <span data-test-id="is-charter">No</span>
            <span data-test-id="is-magnet">Yes</span>
            <span data-test-id="district-rank">3</span>
            <span data-test-id="national-rank-total">17,660</span>
            <span data-test-id="act-avg">27.1</span>
            <span data-test-id="sat-avg">1210</span>
            <span data-test-id="avg-class-size">24.6</span>
            <span data-test-id="expenditure-per-student">$14,815</span>
            <span data-test-id="enrollment-grade-9">540</span>
        </body></html>"#;
        let mut ctx = ExtractionContext::new("/c/z-1/f.html", "z-1", html.to_string());
        let outcome = extract(&mut ctx, &HashSet::new());

        assert_eq!(find(&outcome, "is_charter").datum, FieldDatum::Flag(false));
        assert_eq!(find(&outcome, "is_magnet").datum, FieldDatum::Flag(true));
        assert_eq!(find(&outcome, "district_rank").datum, FieldDatum::Int(3));
        assert_eq!(find(&outcome, "national_rank_total").datum, FieldDatum::Int(17_660));
        assert_eq!(find(&outcome, "act_avg").datum, FieldDatum::Float(27.1));
        assert_eq!(find(&outcome, "sat_avg").datum, FieldDatum::Float(1210.0));
        assert_eq!(find(&outcome, "avg_class_size").datum, FieldDatum::Float(24.6));
        assert_eq!(
            find(&outcome, "expenditure_per_student").datum,
            FieldDatum::Float(14_815.0)
        );
        assert_eq!(find(&outcome, "enrollment_grade_9").datum, FieldDatum::Int(540));
    }

    #[test]
    fn test_out_of_domain_scores_rejected() {
        let html = r#"<html><body>
            <span data-test-id="act-avg">41</span>
            <span data-test-id="sat-avg">210</span>
            <span data-test-id="is-title-i">maybe</span>
            <span data-test-id="expenditure-per-student">$250</span>
        </body></html>"#;
        let mut ctx = ExtractionContext::new("/c/w-1/f.html", "w-1", html.to_string());
        let outcome = extract(&mut ctx, &HashSet::new());
        assert!(outcome.values.iter().all(|v| v.field != "act_avg"));
        assert!(outcome.values.iter().all(|v| v.field != "sat_avg"));
        assert!(outcome.values.iter().all(|v| v.field != "is_title_i"));
        assert!(outcome.values.iter().all(|v| v.field != "expenditure_per_student"));
    }

    #[test]
    fn test_invalid_values_fall_through() {
        let html = r#"<html><body>
            <span data-test-id="nces-id">12345</span>
            <span data-test-id="enrollment">25000</span>
        </body></html>"#;
        let mut ctx = ExtractionContext::new("/c/x-1/f.html", "x-1", html.to_string());
        let outcome = extract(&mut ctx, &HashSet::new());
        assert!(outcome.values.iter().all(|v| v.field != "nces_id"));
        assert!(outcome.values.iter().all(|v| v.field != "enrollment"));
    }
}
