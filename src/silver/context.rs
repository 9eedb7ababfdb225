use std::collections::BTreeMap;

use chrono::{Datelike, Utc};
use regex::Regex;
use scraper::{Html, Selector};
use tracing::debug;

/// Table extraction knobs.
#[derive(Debug, Clone)]
pub struct TableOptions {
    /// Which `<tr>` holds the column headers.
    pub header_row: usize,
    /// Data rows to skip after the header row.
    pub skip_rows: usize,
    pub max_rows: Option<usize>,
}

impl Default for TableOptions {
    fn default() -> Self {
        Self {
            header_row: 0,
            skip_rows: 0,
            max_rows: None,
        }
    }
}

/// Per-record extraction workspace. The DOM is parsed lazily on first
/// selector access and never parsed twice; `cleanup` releases it.
pub struct ExtractionContext {
    file_path: String,
    school_slug: String,
    raw: String,
    dom: Option<Html>,
    parses: u32,
}

impl ExtractionContext {
    pub fn new(file_path: &str, school_slug: &str, raw: String) -> Self {
        Self {
            file_path: file_path.to_string(),
            school_slug: school_slug.to_string(),
            raw,
            dom: None,
            parses: 0,
        }
    }

    pub fn file_path(&self) -> &str {
        &self.file_path
    }

    pub fn school_slug(&self) -> &str {
        &self.school_slug
    }

    pub fn raw(&self) -> &str {
        &self.raw
    }

    /// Times the document has been through the parser; stays at most 1.
    pub fn parse_count(&self) -> u32 {
        self.parses
    }

    fn dom(&mut self) -> &Html {
        let raw = &self.raw;
        let parses = &mut self.parses;
        let file_path = &self.file_path;
        self.dom.get_or_insert_with(|| {
            debug!("🧩 [CONTEXT] parsing document for {}", file_path);
            *parses += 1;
            Html::parse_document(raw)
        })
    }

    /// Release the parsed document; the raw content stays available.
    pub fn cleanup(&mut self) {
        self.dom = None;
    }

    fn normalize(text: impl IntoIterator<Item = impl AsRef<str>>) -> String {
        let mut joined = String::new();
        for part in text {
            joined.push_str(part.as_ref());
            joined.push(' ');
        }
        joined.split_whitespace().collect::<Vec<_>>().join(" ")
    }

    /// Normalized text of the first element matching `selector`.
    pub fn text_at(&mut self, selector: &str) -> Option<String> {
        let parsed = Selector::parse(selector).ok()?;
        let element = self.dom().select(&parsed).next()?;
        let text = Self::normalize(element.text());
        (!text.is_empty()).then_some(text)
    }

    /// Normalized text of every element matching `selector`.
    pub fn text_all(&mut self, selector: &str) -> Vec<String> {
        let Ok(parsed) = Selector::parse(selector) else {
            return Vec::new();
        };
        self.dom()
            .select(&parsed)
            .map(|element| Self::normalize(element.text()))
            .filter(|text| !text.is_empty())
            .collect()
    }

    /// Attribute value on the first element matching `selector`.
    pub fn attr_at(&mut self, selector: &str, attr: &str) -> Option<String> {
        let parsed = Selector::parse(selector).ok()?;
        let element = self.dom().select(&parsed).next()?;
        element.value().attr(attr).map(|v| v.to_string())
    }

    pub fn exists(&mut self, selector: &str) -> bool {
        match Selector::parse(selector) {
            Ok(parsed) => self.dom().select(&parsed).next().is_some(),
            Err(_) => false,
        }
    }

    pub fn count(&mut self, selector: &str) -> usize {
        match Selector::parse(selector) {
            Ok(parsed) => self.dom().select(&parsed).count(),
            Err(_) => 0,
        }
    }

    pub fn inner_html_at(&mut self, selector: &str) -> Option<String> {
        let parsed = Selector::parse(selector).ok()?;
        let element = self.dom().select(&parsed).next()?;
        Some(element.inner_html())
    }

    /// Verbatim inner HTML of every element matching `selector`; used where
    /// whitespace must survive, e.g. embedded JSON blocks.
    pub fn inner_html_all(&mut self, selector: &str) -> Vec<String> {
        let Ok(parsed) = Selector::parse(selector) else {
            return Vec::new();
        };
        self.dom()
            .select(&parsed)
            .map(|element| element.inner_html())
            .collect()
    }

    /// First regex match against the raw content; the first capture group
    /// when the pattern has one, the full match otherwise.
    pub fn regex_first(&self, pattern: &Regex) -> Option<String> {
        let captures = pattern.captures(&self.raw)?;
        match captures.get(1) {
            Some(group) => Some(group.as_str().to_string()),
            None => captures.get(0).map(|m| m.as_str().to_string()),
        }
    }

    /// Every regex match against the raw content, first group preferred.
    pub fn regex_all(&self, pattern: &Regex) -> Vec<String> {
        pattern
            .captures_iter(&self.raw)
            .filter_map(|captures| match captures.get(1) {
                Some(group) => Some(group.as_str().to_string()),
                None => captures.get(0).map(|m| m.as_str().to_string()),
            })
            .collect()
    }

    /// Read the first table matching `selector` into header-keyed row maps.
    pub fn table_rows(
        &mut self,
        selector: &str,
        options: &TableOptions,
    ) -> Vec<BTreeMap<String, String>> {
        let Ok(table_selector) = Selector::parse(selector) else {
            return Vec::new();
        };
        let Ok(row_selector) = Selector::parse("tr") else {
            return Vec::new();
        };
        let Ok(cell_selector) = Selector::parse("th, td") else {
            return Vec::new();
        };

        let dom = self.dom();
        let Some(table) = dom.select(&table_selector).next() else {
            return Vec::new();
        };

        let rows: Vec<_> = table.select(&row_selector).collect();
        let Some(header_row) = rows.get(options.header_row) else {
            return Vec::new();
        };
        let headers: Vec<String> = header_row
            .select(&cell_selector)
            .map(|cell| Self::normalize(cell.text()))
            .collect();
        if headers.is_empty() {
            return Vec::new();
        }

        let mut out = Vec::new();
        for row in rows
            .iter()
            .skip(options.header_row + 1 + options.skip_rows)
        {
            if let Some(max) = options.max_rows {
                if out.len() >= max {
                    break;
                }
            }
            let cells: Vec<String> = row
                .select(&cell_selector)
                .map(|cell| Self::normalize(cell.text()))
                .collect();
            if cells.is_empty() {
                continue;
            }
            let mut mapped = BTreeMap::new();
            for (header, cell) in headers.iter().zip(cells) {
                mapped.insert(header.clone(), cell);
            }
            out.push(mapped);
        }
        out
    }

    /// Infer the capture's source year from its path: `USNEWS_(\d{4})`
    /// first, then any four-digit year in 2020-2030, then the current year.
    pub fn source_year(&self) -> i32 {
        static USNEWS: std::sync::OnceLock<Regex> = std::sync::OnceLock::new();
        static ANY_YEAR: std::sync::OnceLock<Regex> = std::sync::OnceLock::new();
        let usnews =
            USNEWS.get_or_init(|| Regex::new(r"USNEWS_(\d{4})").expect("usnews year pattern"));
        let any_year =
            ANY_YEAR.get_or_init(|| Regex::new(r"\b(\d{4})\b").expect("any year pattern"));

        if let Some(captures) = usnews.captures(&self.file_path) {
            if let Ok(year) = captures[1].parse::<i32>() {
                return year;
            }
        }
        for captures in any_year.captures_iter(&self.file_path) {
            if let Ok(year) = captures[1].parse::<i32>() {
                if (2020..=2030).contains(&year) {
                    return year;
                }
            }
        }
        Utc::now().year()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"<html><head><title>Acme High | Profile</title></head>
        <body>
          <h1 data-test-id="school-name">Acme  High   School</h1>
          <a class="website" href="https://acme.example.org">Website</a>
          <table class="enrollment">
            <tr><th>Grade</th><th>Students</th></tr>
            <tr><td>9</td><td>310</td></tr>
            <tr><td>10</td><td>295</td></tr>
            <tr><td>11</td><td>280</td></tr>
          </table>
          <p>Enrollment: 1,185 students</p>
        </body></html>"#;

    fn context() -> ExtractionContext {
        ExtractionContext::new(
            "/mnt/USNEWS_2025/acme-high-1/docker_curl_20250821_061341.html",
            "acme-high-1",
            SAMPLE.to_string(),
        )
    }

    #[test]
    fn test_lazy_parse_happens_once() {
        let mut ctx = context();
        assert_eq!(ctx.parse_count(), 0);
        ctx.text_at("h1");
        ctx.text_at("title");
        ctx.exists("table");
        assert_eq!(ctx.parse_count(), 1);
    }

    #[test]
    fn test_text_at_normalizes_whitespace() {
        let mut ctx = context();
        assert_eq!(ctx.text_at("h1").as_deref(), Some("Acme High School"));
        assert_eq!(ctx.text_at("title").as_deref(), Some("Acme High | Profile"));
        assert!(ctx.text_at("h2").is_none());
    }

    #[test]
    fn test_attr_count_exists() {
        let mut ctx = context();
        assert_eq!(
            ctx.attr_at("a.website", "href").as_deref(),
            Some("https://acme.example.org")
        );
        assert!(ctx.exists("[data-test-id='school-name']"));
        assert_eq!(ctx.count("table.enrollment tr"), 4);
    }

    #[test]
    fn test_regex_first_returns_group() {
        let ctx = context();
        let pattern = Regex::new(r"Enrollment: ([\d,]+) students").unwrap();
        assert_eq!(ctx.regex_first(&pattern).as_deref(), Some("1,185"));
    }

    #[test]
    fn test_table_rows_maps_headers() {
        let mut ctx = context();
        let rows = ctx.table_rows("table.enrollment", &TableOptions::default());
        assert_eq!(rows.len(), 3);
        assert_eq!(rows[0]["Grade"], "9");
        assert_eq!(rows[0]["Students"], "310");

        let capped = ctx.table_rows(
            "table.enrollment",
            &TableOptions {
                header_row: 0,
                skip_rows: 1,
                max_rows: Some(1),
            },
        );
        assert_eq!(capped.len(), 1);
        assert_eq!(capped[0]["Grade"], "10");
    }

    #[test]
    fn test_source_year_prefers_usnews_marker() {
        let ctx = context();
        assert_eq!(ctx.source_year(), 2025);

        let fallback = ExtractionContext::new(
            "/captures/2024-run/acme/docker_curl_20240101_000000.html",
            "acme",
            String::new(),
        );
        assert_eq!(fallback.source_year(), 2024);

        let current = ExtractionContext::new("/captures/acme/page.html", "acme", String::new());
        assert_eq!(current.source_year(), Utc::now().year());
    }

    #[test]
    fn test_cleanup_releases_dom() {
        let mut ctx = context();
        ctx.text_at("h1");
        ctx.cleanup();
        assert!(ctx.dom.is_none());
        // Re-access reparses; the context is still usable.
        assert!(ctx.exists("h1"));
        assert_eq!(ctx.parse_count(), 2);
    }
}
