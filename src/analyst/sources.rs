//! Finds the data sources a question refers to.

use once_cell::sync::Lazy;
use regex::Regex;
use serde::Serialize;

const DATABASE_EXTENSIONS: &[&str] = &["parquet", "duckdb", "db", "sqlite", "sqlite3"];
const TRAILING_PUNCTUATION: &[char] = &['.', ',', ';', ':', '!', '?', ')', ']', '}', '>', '`'];

static URL_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"(?i)\b(?:https?|s3|gs)://[^\s<>"'`]+"#).expect("valid regex")
});
static FILE_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"(?i)(?:^|[\s"'`(\[=])((?:[\w.\-]+/)*[\w.\-*=]+\.(?:parquet|duckdb|db|sqlite3?))\b"#)
        .expect("valid regex")
});

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ExtractedSources {
    pub scrape_urls: Vec<String>,
    pub database_files: Vec<String>,
}

impl ExtractedSources {
    pub fn is_empty(&self) -> bool {
        self.scrape_urls.is_empty() && self.database_files.is_empty()
    }
}

/// Split the URLs and database file references out of free-form text.
///
/// URLs whose path ends in a database extension (including `s3://` and
/// `gs://` object paths) are database files; other `http(s)` URLs are
/// scrape targets. Bare file names with a database extension are picked up
/// as well. Both lists keep first-occurrence order without duplicates.
pub fn extract_sources(text: &str) -> ExtractedSources {
    let mut found = ExtractedSources::default();
    let mut url_spans = Vec::new();

    for m in URL_RE.find_iter(text) {
        url_spans.push(m.range());
        let url = m.as_str().trim_end_matches(TRAILING_PUNCTUATION);
        if url.len() <= "https://".len() {
            continue;
        }
        if is_database_reference(url) {
            push_unique(&mut found.database_files, url);
        } else if url.to_ascii_lowercase().starts_with("http") {
            push_unique(&mut found.scrape_urls, url);
        }
    }

    for caps in FILE_RE.captures_iter(text) {
        let Some(m) = caps.get(1) else { continue };
        if url_spans.iter().any(|span| span.contains(&m.start())) {
            continue;
        }
        push_unique(&mut found.database_files, m.as_str());
    }

    found
}

pub fn is_database_reference(reference: &str) -> bool {
    let path = reference.split(['?', '#']).next().unwrap_or(reference);
    let lower = path.to_ascii_lowercase();
    if lower.starts_with("s3://") || lower.starts_with("gs://") {
        return true;
    }
    lower
        .rsplit_once('.')
        .map(|(_, ext)| DATABASE_EXTENSIONS.contains(&ext))
        .unwrap_or(false)
}

fn push_unique(list: &mut Vec<String>, value: &str) {
    if !list.iter().any(|existing| existing == value) {
        list.push(value.to_string());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn separates_scrape_urls_from_database_paths() {
        let text = "Scrape https://en.wikipedia.org/wiki/List_of_highest-grossing_films. \
                    Then query s3://indian-high-court-judgments/metadata/parquet/year=*/court=*/bench=*/metadata.parquet?s3_region=ap-south-1 \
                    and local sales.duckdb.";
        let found = extract_sources(text);
        assert_eq!(
            found.scrape_urls,
            vec!["https://en.wikipedia.org/wiki/List_of_highest-grossing_films"]
        );
        assert_eq!(
            found.database_files,
            vec![
                "s3://indian-high-court-judgments/metadata/parquet/year=*/court=*/bench=*/metadata.parquet?s3_region=ap-south-1",
                "sales.duckdb"
            ]
        );
    }

    #[test]
    fn http_parquet_url_is_a_database_file() {
        let found = extract_sources("Read https://example.com/data/trips.parquet please");
        assert!(found.scrape_urls.is_empty());
        assert_eq!(found.database_files, vec!["https://example.com/data/trips.parquet"]);
    }

    #[test]
    fn duplicates_are_dropped_and_order_kept() {
        let found = extract_sources(
            "see https://b.example/x and https://a.example/y and https://b.example/x again",
        );
        assert_eq!(found.scrape_urls, vec!["https://b.example/x", "https://a.example/y"]);
    }

    #[test]
    fn quoted_relative_paths_are_found() {
        let found = extract_sources("Use 'data/flights.sqlite' and (events.db) for this.");
        assert_eq!(found.database_files, vec!["data/flights.sqlite", "events.db"]);
    }

    #[test]
    fn plain_text_yields_nothing() {
        assert!(extract_sources("How tall is Everest? Roughly 8.8 km.").is_empty());
    }

    #[test]
    fn extension_must_end_the_name() {
        let found = extract_sources("legacy.dbf and notes.db_backup are not databases");
        assert!(found.database_files.is_empty());
    }
}
