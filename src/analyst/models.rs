use serde::Serialize;
use serde_json::{Map, Value};

pub const EXHAUSTED_MESSAGE: &str = "Code execution failed after all attempts";

/// Text attached to the question from an uploaded image.
#[derive(Debug, Clone, PartialEq)]
pub enum ImageNote {
    Extracted(String),
    Skipped(String),
}

/// The caller's question. Built once per request and only read afterwards.
#[derive(Debug, Clone, Default)]
pub struct Question {
    text: String,
    image: Option<ImageNote>,
    provided_csv: Option<String>,
}

impl Question {
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            image: None,
            provided_csv: None,
        }
    }

    pub fn with_image_note(mut self, note: Option<ImageNote>) -> Self {
        self.image = note;
        self
    }

    pub fn with_provided_csv(mut self, csv: Option<String>) -> Self {
        self.provided_csv = csv.filter(|c| !c.trim().is_empty());
        self
    }

    pub fn image_note(&self) -> Option<&ImageNote> {
        self.image.as_ref()
    }

    pub fn provided_csv(&self) -> Option<&str> {
        self.provided_csv.as_deref()
    }

    /// Question text as shown to the models, including any image text.
    pub fn prompt_text(&self) -> String {
        match &self.image {
            Some(ImageNote::Extracted(text)) => {
                format!("{}\n\nExtracted from image:\n{}", self.text, text)
            }
            Some(ImageNote::Skipped(reason)) => format!("{}\n\n{}", self.text, reason),
            None => self.text.clone(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceOrigin {
    Scraped,
    Provided,
    Database,
}

/// Normalized metadata for one acquired data source.
#[derive(Debug, Clone, Serialize)]
pub struct SourceDescriptor {
    /// File name inside the request workspace, or the original path/URL for
    /// database sources. This is what ends up on the allow-list.
    pub filename: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub shape: Option<(usize, usize)>,
    pub columns: Vec<String>,
    #[serde(rename = "sample_data")]
    pub sample_rows: Vec<Map<String, Value>>,
    pub origin: SourceOrigin,
    pub description: String,
    #[serde(flatten)]
    pub extra_metadata: Map<String, Value>,
}

/// One version of the analysis program. Attempt 0 is the initial
/// generation; every repair produces a new value with the next attempt.
#[derive(Debug, Clone, PartialEq)]
pub struct GeneratedProgram {
    pub text: String,
    pub attempt: u32,
}

impl GeneratedProgram {
    pub fn initial(text: String) -> Self {
        Self { text, attempt: 0 }
    }

    pub fn supersede(&self, text: String) -> Self {
        Self {
            text,
            attempt: self.attempt + 1,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ExecutionOutcome {
    pub exit_code: i32,
    pub stdout: String,
    pub stderr: String,
    pub timed_out: bool,
}

impl ExecutionOutcome {
    pub fn exited_cleanly(&self) -> bool {
        self.exit_code == 0 && !self.timed_out
    }
}

/// What the caller receives at the end of a request.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum ResultPayload {
    Success(Value),
    Exhausted { error: String, time: f64 },
}

impl ResultPayload {
    pub fn exhausted(elapsed_secs: f64) -> Self {
        ResultPayload::Exhausted {
            error: EXHAUSTED_MESSAGE.to_string(),
            time: elapsed_secs.max(0.0),
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, ResultPayload::Success(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn prompt_text_appends_image_sections() {
        let q = Question::new("How many rows?")
            .with_image_note(Some(ImageNote::Extracted("Table 1".to_string())));
        assert_eq!(
            q.prompt_text(),
            "How many rows?\n\nExtracted from image:\nTable 1"
        );

        let q = Question::new("Q").with_image_note(Some(ImageNote::Skipped(
            "OCR API key not configured - image text extraction skipped".to_string(),
        )));
        assert!(q.prompt_text().ends_with("extraction skipped"));
    }

    #[test]
    fn blank_provided_csv_is_ignored() {
        let q = Question::new("Q").with_provided_csv(Some("  \n".to_string()));
        assert!(q.provided_csv().is_none());
    }

    #[test]
    fn exhausted_payload_serializes_error_and_time() {
        let value = serde_json::to_value(ResultPayload::exhausted(1.5)).unwrap();
        assert_eq!(
            value,
            json!({"error": "Code execution failed after all attempts", "time": 1.5})
        );

        let value = serde_json::to_value(ResultPayload::Success(json!([1, 2]))).unwrap();
        assert_eq!(value, json!([1, 2]));
    }

    #[test]
    fn descriptor_flattens_metadata_and_skips_missing_shape() {
        let mut extra = Map::new();
        extra.insert("source_url".to_string(), json!("data.parquet"));
        let descriptor = SourceDescriptor {
            filename: "data.parquet".to_string(),
            shape: None,
            columns: vec!["a".to_string()],
            sample_rows: vec![],
            origin: SourceOrigin::Database,
            description: "Parquet source".to_string(),
            extra_metadata: extra,
        };

        let value = serde_json::to_value(&descriptor).unwrap();
        assert_eq!(value["origin"], "database");
        assert_eq!(value["source_url"], "data.parquet");
        assert!(value.get("shape").is_none());
    }

    #[test]
    fn superseding_program_bumps_attempt() {
        let first = GeneratedProgram::initial("print(1)".to_string());
        let second = first.supersede("print(2)".to_string());
        assert_eq!(second.attempt, 1);
        assert_eq!(first.attempt, 0);
    }
}
