use super::error::{AnalystError, Result};
use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::{Map, Number, Value};

static TABLE_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?is)<table\b[^>]*>(.*?)</table>").expect("valid regex"));
static ROW_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?is)<tr\b[^>]*>(.*?)</tr>").expect("valid regex"));
static CELL_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?is)<(t[hd])\b[^>]*>(.*?)</t[hd]>").expect("valid regex"));
static TAG_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?s)<[^>]*>").expect("valid regex"));
static FOOTNOTE_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\[\w{1,3}\]").expect("valid regex"));
static NUMERIC_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^[+-]?(?:\d{1,3}(?:,\d{3})+|\d+)(?:\.\d+)?$").expect("valid regex")
});

/// An in-memory table with string headers and JSON cell values.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DataTable {
    pub columns: Vec<String>,
    pub rows: Vec<Vec<Value>>,
}

impl DataTable {
    pub fn shape(&self) -> (usize, usize) {
        (self.rows.len(), self.columns.len())
    }

    pub fn is_empty(&self) -> bool {
        self.columns.is_empty()
    }

    /// Parse CSV text with a header row. Cells stay strings.
    pub fn from_csv_str(text: &str) -> Result<Self> {
        let mut reader = csv::ReaderBuilder::new()
            .has_headers(true)
            .flexible(true)
            .trim(csv::Trim::All)
            .from_reader(text.as_bytes());

        let columns = dedupe_columns(reader.headers()?.iter().map(|h| h.to_string()).collect());
        if columns.is_empty() {
            return Err(AnalystError::Acquisition("CSV has no header row".to_string()));
        }

        let mut rows = Vec::new();
        for record in reader.records() {
            let record = record?;
            let mut row: Vec<Value> = record
                .iter()
                .take(columns.len())
                .map(|cell| Value::String(cell.to_string()))
                .collect();
            row.resize(columns.len(), Value::Null);
            rows.push(row);
        }
        Ok(Self { columns, rows })
    }

    /// Build from a JSON array of objects; keys of the first object decide
    /// the column order, later keys are appended.
    pub fn from_json_records(value: &Value) -> Result<Self> {
        let records = value
            .as_array()
            .ok_or_else(|| AnalystError::Acquisition("JSON payload is not an array".to_string()))?;

        let mut columns: Vec<String> = Vec::new();
        for record in records {
            if let Some(obj) = record.as_object() {
                for key in obj.keys() {
                    if !columns.contains(key) {
                        columns.push(key.clone());
                    }
                }
            }
        }
        if columns.is_empty() {
            return Err(AnalystError::Acquisition(
                "JSON payload has no object records".to_string(),
            ));
        }

        let rows = records
            .iter()
            .filter_map(Value::as_object)
            .map(|obj| {
                columns
                    .iter()
                    .map(|c| obj.get(c).cloned().unwrap_or(Value::Null))
                    .collect()
            })
            .collect();
        Ok(Self { columns, rows })
    }

    /// Extract the largest `<table>` of an HTML page. Header cells of the
    /// first row become columns; when the first row has no `<th>` cells,
    /// positional names are used.
    pub fn from_html(html: &str) -> Result<Self> {
        let best = TABLE_RE
            .captures_iter(html)
            .filter_map(|caps| caps.get(1))
            .map(|m| parse_html_rows(m.as_str()))
            .filter(|rows| !rows.is_empty())
            .max_by_key(|rows| rows.len())
            .ok_or_else(|| AnalystError::Acquisition("no HTML table found".to_string()))?;

        let mut rows = best.into_iter();
        let (first, first_is_header) = rows
            .next()
            .ok_or_else(|| AnalystError::Acquisition("empty HTML table".to_string()))?;

        let (columns, mut body) = if first_is_header {
            (dedupe_columns(first), Vec::new())
        } else {
            let names = (0..first.len()).map(|i| format!("column_{}", i + 1)).collect();
            (names, vec![first])
        };
        body.extend(rows.map(|(cells, _)| cells));

        let width = columns.len();
        let rows = body
            .into_iter()
            .filter(|cells| cells.iter().any(|c| !c.is_empty()))
            .map(|cells| {
                let mut row: Vec<Value> = cells.into_iter().take(width).map(Value::String).collect();
                row.resize(width, Value::Null);
                row
            })
            .collect();
        Ok(Self { columns, rows })
    }

    /// Convert numeric-looking string cells into JSON numbers, stripping
    /// thousands separators, currency symbols and percent signs. Returns
    /// how many cells changed.
    pub fn normalize_numeric_cells(&mut self) -> usize {
        let mut changed = 0;
        for row in &mut self.rows {
            for cell in row.iter_mut() {
                if let Value::String(text) = cell {
                    if let Some(number) = parse_numeric(text) {
                        *cell = Value::Number(number);
                        changed += 1;
                    }
                }
            }
        }
        changed
    }

    pub fn sample_rows(&self, count: usize) -> Vec<Map<String, Value>> {
        self.rows
            .iter()
            .take(count)
            .map(|row| {
                self.columns
                    .iter()
                    .cloned()
                    .zip(row.iter().cloned())
                    .collect::<Map<String, Value>>()
            })
            .collect()
    }

    /// Serialize as CSV with a header row; callers persist the bytes.
    pub fn to_csv_bytes(&self) -> Result<Vec<u8>> {
        let mut writer = csv::Writer::from_writer(Vec::new());
        writer.write_record(&self.columns)?;
        for row in &self.rows {
            writer.write_record(row.iter().map(cell_to_string))?;
        }
        writer.into_inner().map_err(|e| e.into_error().into())
    }
}

fn parse_html_rows(table_html: &str) -> Vec<(Vec<String>, bool)> {
    ROW_RE
        .captures_iter(table_html)
        .filter_map(|row| row.get(1))
        .map(|row| {
            let mut is_header = true;
            let cells: Vec<String> = CELL_RE
                .captures_iter(row.as_str())
                .map(|cell| {
                    if cell[1].eq_ignore_ascii_case("td") {
                        is_header = false;
                    }
                    clean_cell_text(&cell[2])
                })
                .collect();
            (cells, is_header)
        })
        .filter(|(cells, _)| !cells.is_empty())
        .collect()
}

fn clean_cell_text(raw: &str) -> String {
    let text = TAG_RE.replace_all(raw, " ");
    let text = decode_entities(&text);
    let text = FOOTNOTE_RE.replace_all(&text, "");
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

fn decode_entities(text: &str) -> String {
    text.replace("&nbsp;", " ")
        .replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&#39;", "'")
        .replace("&amp;", "&")
}

fn parse_numeric(text: &str) -> Option<Number> {
    let trimmed = text
        .trim()
        .trim_start_matches(['$', '€', '£', '¥', '₹'])
        .trim_end_matches('%')
        .trim();
    if trimmed.is_empty() || !NUMERIC_RE.is_match(trimmed) {
        return None;
    }
    let plain = trimmed.replace(',', "");
    if !plain.contains('.') {
        if let Ok(int) = plain.parse::<i64>() {
            return Some(Number::from(int));
        }
    }
    plain.parse::<f64>().ok().and_then(Number::from_f64)
}

fn cell_to_string(value: &Value) -> String {
    match value {
        Value::Null => String::new(),
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

fn dedupe_columns(raw: Vec<String>) -> Vec<String> {
    let mut seen: Vec<String> = Vec::with_capacity(raw.len());
    for (index, name) in raw.into_iter().enumerate() {
        let base = if name.trim().is_empty() {
            format!("column_{}", index + 1)
        } else {
            name.trim().to_string()
        };
        let mut candidate = base.clone();
        let mut suffix = 1;
        while seen.contains(&candidate) {
            candidate = format!("{}_{}", base, suffix);
            suffix += 1;
        }
        seen.push(candidate);
    }
    seen
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn csv_parsing_pads_short_rows_and_names_blank_headers() {
        let table = DataTable::from_csv_str("name,,name\nalpha,1\nbeta,2,x\n").unwrap();
        assert_eq!(table.columns, vec!["name", "column_2", "name_1"]);
        assert_eq!(table.shape(), (2, 3));
        assert_eq!(table.rows[0][2], Value::Null);
    }

    #[test]
    fn numeric_normalization_handles_separators_and_symbols() {
        let mut table =
            DataTable::from_csv_str("film,gross,share,note\nA,\"$2,923,706,026\",12.5%,n/a\n")
                .unwrap();
        let changed = table.normalize_numeric_cells();
        assert_eq!(changed, 2);
        assert_eq!(table.rows[0][1], json!(2923706026i64));
        assert_eq!(table.rows[0][2], json!(12.5));
        assert_eq!(table.rows[0][3], json!("n/a"));
    }

    #[test]
    fn html_extraction_prefers_largest_table() {
        let html = r#"
            <table><tr><td>nav</td></tr></table>
            <table class="wikitable">
              <tr><th>Rank</th><th>Title<sup>[a]</sup></th></tr>
              <tr><td>1</td><td><a href="/x">Avatar</a></td></tr>
              <tr><td>2</td><td>Avengers &amp; Co</td></tr>
            </table>"#;
        let table = DataTable::from_html(html).unwrap();
        assert_eq!(table.columns, vec!["Rank", "Title"]);
        assert_eq!(table.rows.len(), 2);
        assert_eq!(table.rows[1][1], json!("Avengers & Co"));
    }

    #[test]
    fn html_without_header_row_gets_positional_columns() {
        let table = DataTable::from_html("<table><tr><td>a</td><td>b</td></tr></table>").unwrap();
        assert_eq!(table.columns, vec!["column_1", "column_2"]);
        assert_eq!(table.rows, vec![vec![json!("a"), json!("b")]]);
    }

    #[test]
    fn json_records_union_keys_in_order() {
        let table =
            DataTable::from_json_records(&json!([{"a": 1}, {"b": 2, "a": 3}])).unwrap();
        assert_eq!(table.columns, vec!["a", "b"]);
        assert_eq!(table.rows[0], vec![json!(1), Value::Null]);
    }

    #[test]
    fn samples_and_csv_round_out_descriptor_inputs() {
        let table = DataTable::from_csv_str("x,y\n1,2\n3,4\n5,6\n7,8\n").unwrap();
        let samples = table.sample_rows(3);
        assert_eq!(samples.len(), 3);
        assert_eq!(samples[0]["x"], json!("1"));

        let written = String::from_utf8(table.to_csv_bytes().unwrap()).unwrap();
        assert!(written.starts_with("x,y\n1,2\n"));
    }
}
