use regex::Regex;
use serde_json::Value;
use std::sync::OnceLock;
use tracing::debug;

use crate::silver::context::ExtractionContext;
use crate::silver::tiers::{normalize_phone, FieldValue, TierOutcome, STATE_RANK_MAX};

pub const TIER_NAME: &str = "structured_data";

const NAME_CONFIDENCE: f64 = 95.0;
const LOCATION_CONFIDENCE: f64 = 90.0;
const RANK_CONFIDENCE: f64 = 85.0;
const DESCRIPTION_CONFIDENCE: f64 = 80.0;

/// JSON-LD payload recognized in capture pages. Anything without the
/// `HighSchool` type tag is `Unknown` and ignored.
#[derive(Debug)]
pub enum StructuredProfile {
    HighSchool(HighSchoolData),
    Unknown,
}

#[derive(Debug, Default)]
pub struct HighSchoolData {
    pub name: Option<String>,
    pub telephone: Option<String>,
    pub street_address: Option<String>,
    pub address_locality: Option<String>,
    pub address_region: Option<String>,
    pub postal_code: Option<String>,
    pub description: Option<String>,
}

fn string_at(value: &Value, key: &str) -> Option<String> {
    value.get(key).and_then(Value::as_str).map(|s| s.trim().to_string())
}

/// Decode one script block. Returns `Unknown` unless it parses and carries
/// the `HighSchool` type tag.
pub fn parse_block(raw: &str) -> StructuredProfile {
    let Ok(value) = serde_json::from_str::<Value>(raw) else {
        return StructuredProfile::Unknown;
    };
    if value.get("@type").and_then(Value::as_str) != Some("HighSchool") {
        return StructuredProfile::Unknown;
    }

    let address = value
        .get("location")
        .and_then(|location| location.get("address"))
        .or_else(|| value.get("address"));

    StructuredProfile::HighSchool(HighSchoolData {
        name: string_at(&value, "name").filter(|s| !s.is_empty()),
        telephone: string_at(&value, "telephone"),
        street_address: address.and_then(|a| string_at(a, "streetAddress")),
        address_locality: address.and_then(|a| string_at(a, "addressLocality")),
        address_region: address.and_then(|a| string_at(a, "addressRegion")),
        postal_code: address.and_then(|a| string_at(a, "postalCode")),
        description: string_at(&value, "description"),
    })
}

fn state_rank_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"ranked (\d+)(?:st|nd|rd|th) within").expect("state rank pattern")
    })
}

fn ap_participation_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"AP® participation rate[^0-9]*(\d+)%").expect("ap participation pattern")
    })
}

fn minority_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"total minority enrollment is (\d+)%").expect("minority pattern")
    })
}

fn disadvantaged_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"(\d+)% of students are economically disadvantaged")
            .expect("disadvantaged pattern")
    })
}

/// Mine the free-text description for the figures US News embeds there.
fn mine_description(description: &str, outcome: &mut TierOutcome) {
    if let Some(captures) = state_rank_pattern().captures(description) {
        match captures[1].parse::<u32>() {
            Ok(rank) if rank > 0 && rank <= STATE_RANK_MAX => {
                outcome
                    .values
                    .push(FieldValue::int("state_rank", rank, RANK_CONFIDENCE));
            }
            _ => outcome.push_error("state_rank", "rank in description out of range"),
        }
    }

    if let Some(captures) = ap_participation_pattern().captures(description) {
        match captures[1].parse::<f64>() {
            Ok(rate) if (0.0..=100.0).contains(&rate) => outcome.values.push(FieldValue::float(
                "ap_participation_rate",
                rate,
                DESCRIPTION_CONFIDENCE,
            )),
            _ => outcome.push_error("ap_participation_rate", "rate in description out of range"),
        }
    }

    if let Some(captures) = minority_pattern().captures(description) {
        match captures[1].parse::<f64>() {
            Ok(minority) if (0.0..=100.0).contains(&minority) => {
                outcome.values.push(FieldValue::float(
                    "minority_enrollment_pct",
                    minority,
                    DESCRIPTION_CONFIDENCE,
                ));
                outcome.values.push(FieldValue::float(
                    "white_pct",
                    100.0 - minority,
                    DESCRIPTION_CONFIDENCE,
                ));
            }
            _ => outcome.push_error("minority_enrollment_pct", "value in description out of range"),
        }
    }

    if let Some(captures) = disadvantaged_pattern().captures(description) {
        match captures[1].parse::<f64>() {
            Ok(pct) if (0.0..=100.0).contains(&pct) => outcome.values.push(FieldValue::float(
                "economically_disadvantaged_pct",
                pct,
                DESCRIPTION_CONFIDENCE,
            )),
            _ => outcome.push_error(
                "economically_disadvantaged_pct",
                "value in description out of range",
            ),
        }
    }
}

/// Tier 1: scan `application/ld+json` script blocks for a `HighSchool`
/// profile and map its fields with the highest base confidences.
pub fn extract(ctx: &mut ExtractionContext) -> TierOutcome {
    let mut outcome = TierOutcome::default();

    for block in ctx.inner_html_all(r#"script[type="application/ld+json"]"#) {
        let StructuredProfile::HighSchool(profile) = parse_block(&block) else {
            continue;
        };
        debug!("🏷️ [TIER-1] structured HighSchool block found for {}", ctx.school_slug());

        if let Some(name) = profile.name {
            outcome
                .values
                .push(FieldValue::text("school_name", name, NAME_CONFIDENCE));
        }
        if let Some(street) = profile.street_address {
            outcome
                .values
                .push(FieldValue::text("address_street", street, LOCATION_CONFIDENCE));
        }
        if let Some(city) = profile.address_locality {
            outcome
                .values
                .push(FieldValue::text("address_city", city, LOCATION_CONFIDENCE));
        }
        if let Some(region) = profile.address_region {
            outcome
                .values
                .push(FieldValue::text("address_state", region, LOCATION_CONFIDENCE));
        }
        if let Some(zip) = profile.postal_code {
            outcome
                .values
                .push(FieldValue::text("address_zip", zip, LOCATION_CONFIDENCE));
        }
        if let Some(telephone) = profile.telephone {
            match normalize_phone(&telephone) {
                Some(phone) => outcome
                    .values
                    .push(FieldValue::text("phone", phone, LOCATION_CONFIDENCE)),
                None => outcome.push_error("phone", "unparseable telephone in structured data"),
            }
        }
        if let Some(description) = profile.description {
            mine_description(&description, &mut outcome);
        }

        // One HighSchool block is authoritative; ignore the rest.
        break;
    }

    outcome
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::silver::tiers::FieldDatum;

    const SCENARIO_HTML: &str = r#"<html><head>
        <script type="application/ld+json">
        {"@type":"HighSchool","name":"Westfield HS",
         "location":{"address":{"streetAddress":"123 Maple","addressLocality":"Centreville",
                                "addressRegion":"VA","postalCode":"20121"}},
         "telephone":"(703) 555-1212",
         "description":"Westfield HS is ranked 14th within Virginia. The AP® participation rate is 57%. The total minority enrollment is 42%. 12% of students are economically disadvantaged."}
        </script></head><body></body></html>"#;

    fn value_of<'a>(outcome: &'a TierOutcome, field: &str) -> &'a FieldValue {
        outcome
            .values
            .iter()
            .find(|v| v.field == field)
            .unwrap_or_else(|| panic!("field {field} not extracted"))
    }

    #[test]
    fn test_parse_block_requires_type_tag() {
        assert!(matches!(
            parse_block(r#"{"@type":"HighSchool","name":"A"}"#),
            StructuredProfile::HighSchool(_)
        ));
        assert!(matches!(
            parse_block(r#"{"@type":"Organization","name":"A"}"#),
            StructuredProfile::Unknown
        ));
        assert!(matches!(parse_block("not json"), StructuredProfile::Unknown));
    }

    #[test]
    fn test_scenario_extraction() {
        let mut ctx = ExtractionContext::new(
            "/root/westfield-high-school-6921/docker_curl_20250821_061341.html",
            "westfield-high-school-6921",
            SCENARIO_HTML.to_string(),
        );
        let outcome = extract(&mut ctx);

        let name = value_of(&outcome, "school_name");
        assert_eq!(name.datum, FieldDatum::Text("Westfield HS".to_string()));
        assert_eq!(name.confidence, 95.0);

        assert_eq!(
            value_of(&outcome, "address_street").datum,
            FieldDatum::Text("123 Maple".to_string())
        );
        assert_eq!(
            value_of(&outcome, "address_city").datum,
            FieldDatum::Text("Centreville".to_string())
        );
        assert_eq!(
            value_of(&outcome, "address_state").datum,
            FieldDatum::Text("VA".to_string())
        );
        assert_eq!(
            value_of(&outcome, "address_zip").datum,
            FieldDatum::Text("20121".to_string())
        );
        assert_eq!(value_of(&outcome, "address_zip").confidence, 90.0);

        let phone = value_of(&outcome, "phone");
        assert_eq!(phone.datum, FieldDatum::Text("(703) 555-1212".to_string()));
        assert_eq!(phone.confidence, 90.0);

        let rank = value_of(&outcome, "state_rank");
        assert_eq!(rank.datum, FieldDatum::Int(14));
        assert_eq!(rank.confidence, 85.0);

        let ap = value_of(&outcome, "ap_participation_rate");
        assert_eq!(ap.datum, FieldDatum::Float(57.0));
        assert_eq!(ap.confidence, 80.0);

        assert_eq!(value_of(&outcome, "white_pct").datum, FieldDatum::Float(58.0));
        assert_eq!(
            value_of(&outcome, "minority_enrollment_pct").datum,
            FieldDatum::Float(42.0)
        );
        assert_eq!(
            value_of(&outcome, "economically_disadvantaged_pct").datum,
            FieldDatum::Float(12.0)
        );
    }

    #[test]
    fn test_pages_without_structured_data_yield_nothing() {
        let mut ctx = ExtractionContext::new(
            "/root/plain/docker_curl_20250821_061341.html",
            "plain",
            "<html><body><h1>Plain page</h1></body></html>".to_string(),
        );
        let outcome = extract(&mut ctx);
        assert!(outcome.values.is_empty());
        assert!(outcome.errors.is_empty());
    }
}
