use std::collections::HashSet;
use std::sync::OnceLock;

use regex::Regex;

use crate::silver::context::ExtractionContext;
use crate::silver::tiers::{
    normalize_phone, parse_number, validate_grades, validate_ratio, FieldDatum, FieldValue,
    TierOutcome, ENROLLMENT_MAX, ENROLLMENT_MIN, NATIONAL_RANK_MAX, STATE_RANK_MAX,
};

pub const TIER_NAME: &str = "regex_fallback";

/// Regex-derived values never score above this.
pub const MAX_FALLBACK_CONFIDENCE: f64 = 70.0;

struct PatternSpec {
    field: &'static str,
    patterns: &'static [&'static str],
    parse: fn(&str) -> Option<FieldDatum>,
    confidence: f64,
}

fn parse_count_bounded(raw: &str, min: u32, max: u32) -> Option<u32> {
    let value = parse_number(raw)?;
    if value.fract() != 0.0 {
        return None;
    }
    let value = value as u32;
    (min..=max).contains(&value).then_some(value)
}

fn parse_enrollment_digits(raw: &str) -> Option<FieldDatum> {
    parse_count_bounded(raw, ENROLLMENT_MIN, ENROLLMENT_MAX).map(FieldDatum::Int)
}

fn parse_teacher_digits(raw: &str) -> Option<FieldDatum> {
    parse_count_bounded(raw, 1, 5_000).map(FieldDatum::Int)
}

fn parse_national_rank_digits(raw: &str) -> Option<FieldDatum> {
    parse_count_bounded(raw, 1, NATIONAL_RANK_MAX).map(FieldDatum::Int)
}

fn parse_state_rank_digits(raw: &str) -> Option<FieldDatum> {
    parse_count_bounded(raw, 1, STATE_RANK_MAX).map(FieldDatum::Int)
}

/// The captured group is bare digits; the % was consumed by the pattern.
fn parse_pct_digits(raw: &str) -> Option<FieldDatum> {
    let value = parse_number(raw)?;
    (0.0..=100.0).contains(&value).then_some(FieldDatum::Float(value))
}

fn parse_ratio_match(raw: &str) -> Option<FieldDatum> {
    validate_ratio(raw).map(FieldDatum::Text)
}

fn parse_grades_match(raw: &str) -> Option<FieldDatum> {
    validate_grades(raw).map(FieldDatum::Text)
}

fn parse_phone_match(raw: &str) -> Option<FieldDatum> {
    normalize_phone(raw).map(FieldDatum::Text)
}

const SPECS: &[PatternSpec] = &[
    PatternSpec {
        field: "enrollment",
        patterns: &[
            r"(?i)enrollment of ([\d,]{2,6})",
            r"(?i)([\d,]{2,6}) students enrolled",
            r"(?i)total enrollment[^0-9]{0,30}([\d,]{2,6})",
        ],
        parse: parse_enrollment_digits,
        confidence: 65.0,
    },
    PatternSpec {
        field: "full_time_teachers",
        patterns: &[r"(?i)([\d,]{1,5}) full[- ]time teachers"],
        parse: parse_teacher_digits,
        confidence: 65.0,
    },
    PatternSpec {
        field: "student_teacher_ratio",
        patterns: &[r"(?i)student[- ]teacher ratio[^0-9]{0,30}(\d{1,2}:\d)"],
        parse: parse_ratio_match,
        confidence: 70.0,
    },
    PatternSpec {
        field: "national_rank",
        patterns: &[r"(?i)#([\d,]+) in national rankings"],
        parse: parse_national_rank_digits,
        confidence: 70.0,
    },
    PatternSpec {
        field: "state_rank",
        patterns: &[
            r"(?i)#([\d,]+) in [A-Za-z ]+ high schools",
            r"(?i)ranked #?([\d,]+) in (?:the )?state",
        ],
        parse: parse_state_rank_digits,
        confidence: 65.0,
    },
    PatternSpec {
        field: "grades_served",
        patterns: &[r"(?i)serves grades ((?:K-|PK-)?\d{1,2}-\d{1,2})"],
        parse: parse_grades_match,
        confidence: 65.0,
    },
    PatternSpec {
        field: "phone",
        patterns: &[r"\(\d{3}\) \d{3}-\d{4}", r"\d{3}-\d{3}-\d{4}"],
        parse: parse_phone_match,
        confidence: 65.0,
    },
    PatternSpec {
        field: "graduation_rate",
        patterns: &[r"(?i)graduation rate[^0-9]{0,30}(\d{1,3})%"],
        parse: parse_pct_digits,
        confidence: 65.0,
    },
    PatternSpec {
        field: "ap_participation_rate",
        patterns: &[r"(?i)AP®? participation rate[^0-9]{0,30}(\d{1,3})%"],
        parse: parse_pct_digits,
        confidence: 65.0,
    },
    PatternSpec {
        field: "ap_pass_rate",
        patterns: &[r"(?i)AP®? (?:exam )?pass rate[^0-9]{0,30}(\d{1,3})%"],
        parse: parse_pct_digits,
        confidence: 65.0,
    },
    PatternSpec {
        field: "math_proficiency",
        patterns: &[r"(?i)math proficiency[^0-9]{0,30}(\d{1,3})%"],
        parse: parse_pct_digits,
        confidence: 65.0,
    },
    PatternSpec {
        field: "reading_proficiency",
        patterns: &[r"(?i)reading proficiency[^0-9]{0,30}(\d{1,3})%"],
        parse: parse_pct_digits,
        confidence: 65.0,
    },
    PatternSpec {
        field: "science_proficiency",
        patterns: &[r"(?i)science proficiency[^0-9]{0,30}(\d{1,3})%"],
        parse: parse_pct_digits,
        confidence: 65.0,
    },
    PatternSpec {
        field: "white_pct",
        patterns: &[r"(?i)white[^0-9]{0,20}(\d{1,3}(?:\.\d)?)%"],
        parse: parse_pct_digits,
        confidence: 60.0,
    },
    PatternSpec {
        field: "black_pct",
        patterns: &[r"(?i)black[^0-9]{0,20}(\d{1,3}(?:\.\d)?)%"],
        parse: parse_pct_digits,
        confidence: 60.0,
    },
    PatternSpec {
        field: "hispanic_pct",
        patterns: &[r"(?i)hispanic[^0-9]{0,20}(\d{1,3}(?:\.\d)?)%"],
        parse: parse_pct_digits,
        confidence: 60.0,
    },
    PatternSpec {
        field: "asian_pct",
        patterns: &[r"(?i)asian[^0-9]{0,20}(\d{1,3}(?:\.\d)?)%"],
        parse: parse_pct_digits,
        confidence: 60.0,
    },
    PatternSpec {
        field: "female_pct",
        patterns: &[r"(?i)female[^0-9]{0,20}(\d{1,3}(?:\.\d)?)%"],
        parse: parse_pct_digits,
        confidence: 60.0,
    },
    PatternSpec {
        field: "male_pct",
        patterns: &[r"(?i)\bmale\b[^0-9]{0,20}(\d{1,3}(?:\.\d)?)%"],
        parse: parse_pct_digits,
        confidence: 60.0,
    },
    PatternSpec {
        field: "economically_disadvantaged_pct",
        patterns: &[
            r"(?i)(\d{1,3})% of students are economically disadvantaged",
            r"(?i)economically disadvantaged[^0-9]{0,30}(\d{1,3})%",
        ],
        parse: parse_pct_digits,
        confidence: 65.0,
    },
];

fn compiled_specs() -> &'static Vec<(usize, Vec<Regex>)> {
    static COMPILED: OnceLock<Vec<(usize, Vec<Regex>)>> = OnceLock::new();
    COMPILED.get_or_init(|| {
        SPECS
            .iter()
            .enumerate()
            .map(|(index, spec)| {
                let regexes = spec
                    .patterns
                    .iter()
                    .map(|p| Regex::new(p).expect("fallback pattern"))
                    .collect();
                (index, regexes)
            })
            .collect()
    })
}

/// Tier 3: regex sweep over the raw content for fields the DOM tiers
/// missed. Only runs for missing fields; confidence stays at or below 70.
pub fn extract(ctx: &ExtractionContext, already_set: &HashSet<&'static str>) -> TierOutcome {
    let mut outcome = TierOutcome::default();

    for (index, regexes) in compiled_specs() {
        let spec = &SPECS[*index];
        if already_set.contains(spec.field) {
            continue;
        }
        for regex in regexes {
            let Some(matched) = ctx.regex_first(regex) else {
                continue;
            };
            if let Some(datum) = (spec.parse)(&matched) {
                outcome.values.push(FieldValue {
                    field: spec.field,
                    datum,
                    confidence: spec.confidence.min(MAX_FALLBACK_CONFIDENCE),
                });
                break;
            }
        }
    }

    outcome
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"<html><body>
        <p>Lakeside High School has a total enrollment of 1,185 and 68 full-time teachers.
        The student-teacher ratio is 16:1. It placed #1,234 in National Rankings and
        ranked #44 in the state. The graduation rate is 94%. Contact: (703) 555-1212.
        The school serves grades 9-12.</p>
    </body></html>"#;

    fn extract_sample() -> TierOutcome {
        let ctx = ExtractionContext::new(
            "/captures/lakeside-high-77/docker_curl_20250101_000000.html",
            "lakeside-high-77",
            SAMPLE.to_string(),
        );
        extract(&ctx, &HashSet::new())
    }

    fn find<'a>(outcome: &'a TierOutcome, field: &str) -> &'a FieldValue {
        outcome
            .values
            .iter()
            .find(|v| v.field == field)
            .unwrap_or_else(|| panic!("field {field} missing"))
    }

    #[test]
    fn test_fallback_patterns_extract_core_figures() {
        let outcome = extract_sample();
        assert_eq!(find(&outcome, "enrollment").datum, FieldDatum::Int(1185));
        assert_eq!(find(&outcome, "full_time_teachers").datum, FieldDatum::Int(68));
        assert_eq!(
            find(&outcome, "student_teacher_ratio").datum,
            FieldDatum::Text("16:1".to_string())
        );
        assert_eq!(find(&outcome, "national_rank").datum, FieldDatum::Int(1234));
        assert_eq!(find(&outcome, "state_rank").datum, FieldDatum::Int(44));
        assert_eq!(find(&outcome, "graduation_rate").datum, FieldDatum::Float(94.0));
        assert_eq!(
            find(&outcome, "phone").datum,
            FieldDatum::Text("(703) 555-1212".to_string())
        );
        assert_eq!(
            find(&outcome, "grades_served").datum,
            FieldDatum::Text("9-12".to_string())
        );
    }

    #[test]
    fn test_confidence_never_exceeds_cap() {
        let outcome = extract_sample();
        assert!(!outcome.values.is_empty());
        for value in &outcome.values {
            assert!(value.confidence <= MAX_FALLBACK_CONFIDENCE);
        }
    }

    #[test]
    fn test_already_set_fields_skipped() {
        let ctx = ExtractionContext::new("/c/x/f.html", "x", SAMPLE.to_string());
        let mut set = HashSet::new();
        set.insert("enrollment");
        set.insert("phone");
        let outcome = extract(&ctx, &set);
        assert!(outcome.values.iter().all(|v| v.field != "enrollment"));
        assert!(outcome.values.iter().all(|v| v.field != "phone"));
    }

    #[test]
    fn test_out_of_range_values_rejected() {
        let ctx = ExtractionContext::new(
            "/c/y/f.html",
            "y",
            "<p>total enrollment 25,000. graduation rate 140%.</p>".to_string(),
        );
        let outcome = extract(&ctx, &HashSet::new());
        assert!(outcome.values.iter().all(|v| v.field != "enrollment"));
        assert!(outcome.values.iter().all(|v| v.field != "graduation_rate"));
    }
}
