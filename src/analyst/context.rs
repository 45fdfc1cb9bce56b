use super::models::SourceDescriptor;
use serde::Serialize;
use std::path::Path;

pub const ALLOW_LIST_NONE: &str = "NONE";

/// Closed set of paths/URLs a generated program may open. Derived once per
/// request and never modified afterwards.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AllowList {
    entries: Vec<String>,
}

impl AllowList {
    /// Deduplicated, order-preserving; blank entries are skipped.
    pub fn from_entries<I, S>(entries: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut list = Vec::new();
        for entry in entries {
            let entry = entry.as_ref().trim();
            if !entry.is_empty() && !list.iter().any(|e: &String| e == entry) {
                list.push(entry.to_string());
            }
        }
        Self { entries: list }
    }

    pub fn from_descriptors(descriptors: &[SourceDescriptor]) -> Self {
        Self::from_entries(descriptors.iter().map(|d| d.filename.as_str()))
    }

    pub fn entries(&self) -> &[String] {
        &self.entries
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// A path is permitted when it, or its base name, is listed verbatim.
    /// An empty list permits nothing.
    pub fn permits(&self, path: &str) -> bool {
        if self.entries.is_empty() {
            return false;
        }
        if self.entries.iter().any(|e| e == path) {
            return true;
        }
        base_name(path)
            .map(|name| self.entries.iter().any(|e| e == name))
            .unwrap_or(false)
    }

    /// Prompt block enumerating the permitted sources.
    pub fn render(&self) -> String {
        if self.entries.is_empty() {
            format!("ALLOWED_DATA_SOURCES: {}", ALLOW_LIST_NONE)
        } else {
            format!("ALLOWED_DATA_SOURCES:\n{}", self.entries.join("\n"))
        }
    }
}

fn base_name(path: &str) -> Option<&str> {
    Path::new(path).file_name().and_then(|name| name.to_str())
}

/// JSON document describing every acquired source.
#[derive(Debug, Clone, Serialize)]
pub struct DataSummary {
    pub total_sources: usize,
    pub sources: Vec<SourceDescriptor>,
}

impl DataSummary {
    pub fn new(sources: Vec<SourceDescriptor>) -> Self {
        Self {
            total_sources: sources.len(),
            sources,
        }
    }

    pub fn to_pretty_json(&self) -> String {
        serde_json::to_string_pretty(self).unwrap_or_else(|_| "{}".to_string())
    }
}

/// Everything the generator and the repair loop need about the request.
/// Assembled once; repairs reuse it unchanged.
#[derive(Debug, Clone)]
pub struct AnalysisContext {
    pub question: String,
    pub task_breakdown: String,
    pub summary: DataSummary,
    pub summary_json: String,
    pub allow_list: AllowList,
}

impl AnalysisContext {
    pub fn new(question: String, task_breakdown: String, summary: DataSummary) -> Self {
        let allow_list = AllowList::from_descriptors(&summary.sources);
        let summary_json = summary.to_pretty_json();
        Self {
            question,
            task_breakdown,
            summary,
            summary_json,
            allow_list,
        }
    }

    /// Generation prompt: question, breakdown, authoring instructions, data
    /// summary, then the allow-list and no-comment directives.
    pub fn generation_prompt(&self, code_instructions: &str) -> String {
        let mut prompt = String::new();
        prompt.push_str("ORIGINAL QUESTION: ");
        prompt.push_str(&self.question);
        prompt.push_str("\n\nTASK BREAKDOWN: ");
        prompt.push_str(&self.task_breakdown);
        prompt.push_str("\n\nINSTRUCTIONS: ");
        prompt.push_str(code_instructions);
        prompt.push_str("\n\nDATA SUMMARY: ");
        prompt.push_str(&self.summary_json);
        prompt.push_str(
            "\n\nIMPORTANT: You may only read from the following data sources. \
             Do NOT read or write any other file paths.\n",
        );
        prompt.push_str(&self.allow_list.render());
        prompt.push_str(
            "\n\nIMPORTANT: Do NOT include any comments in the code output. \
             Provide only pure Python code without any inline or block comments.",
        );
        prompt
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analyst::models::SourceOrigin;
    use serde_json::Map;

    fn descriptor(filename: &str, origin: SourceOrigin) -> SourceDescriptor {
        SourceDescriptor {
            filename: filename.to_string(),
            shape: Some((10, 2)),
            columns: vec!["a".to_string(), "b".to_string()],
            sample_rows: vec![],
            origin,
            description: "test".to_string(),
            extra_metadata: Map::new(),
        }
    }

    #[test]
    fn allow_list_dedupes_in_order() {
        let list = AllowList::from_entries(["b.csv", "a.csv", "b.csv", " ", "c.parquet"]);
        assert_eq!(list.entries(), &["b.csv", "a.csv", "c.parquet"]);
    }

    #[test]
    fn allow_list_matches_verbatim_or_base_name() {
        let list = AllowList::from_entries(["ProvidedCSV.csv", "s3://bucket/data.parquet"]);
        assert!(list.permits("ProvidedCSV.csv"));
        assert!(list.permits("/tmp/somewhere/ProvidedCSV.csv"));
        assert!(list.permits("s3://bucket/data.parquet"));
        assert!(!list.permits("data.parquet"));
        assert!(!list.permits("/etc/passwd"));
    }

    #[test]
    fn empty_allow_list_renders_none_and_permits_nothing() {
        let list = AllowList::default();
        assert_eq!(list.render(), "ALLOWED_DATA_SOURCES: NONE");
        assert!(!list.permits("NONE"));
        assert!(!list.permits("anything.csv"));
    }

    #[test]
    fn generation_prompt_ends_with_binding_directives() {
        let summary = DataSummary::new(vec![
            descriptor("ProvidedCSV.csv", SourceOrigin::Provided),
            descriptor("scraped_data_1_example.com.csv", SourceOrigin::Scraped),
        ]);
        let ctx = AnalysisContext::new("Q?".to_string(), "1. do it".to_string(), summary);
        let prompt = ctx.generation_prompt("write python");

        assert!(prompt.starts_with("ORIGINAL QUESTION: Q?\n\nTASK BREAKDOWN: 1. do it"));
        assert!(prompt.contains("\"total_sources\": 2"));
        assert!(prompt.contains(
            "ALLOWED_DATA_SOURCES:\nProvidedCSV.csv\nscraped_data_1_example.com.csv"
        ));
        assert!(prompt.ends_with("without any inline or block comments."));
        assert!(
            prompt.find("INSTRUCTIONS: write python").unwrap()
                < prompt.find("DATA SUMMARY").unwrap()
        );
    }
}
