use super::error::{AnalystError, Result};
use super::executor::{ProgramRunner, SandboxedExecutor};
use super::models::{SourceDescriptor, SourceOrigin};
use super::result::extract_json;
use super::sources::ExtractedSources;
use super::tables::DataTable;
use super::workspace::{Workspace, SCHEMA_SCRIPT_FILE, PROVIDED_CSV_FILE};
use crate::shared::config::ScraperConfig;
use async_trait::async_trait;
use futures::future::join_all;
use reqwest::Client;
use serde_json::{json, Map, Value};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

/// Fetches a web page or file and returns its main table.
#[async_trait]
pub trait TableScraper: Send + Sync {
    async fn scrape(&self, url: &str) -> Result<DataTable>;
}

/// Schema and a few sample rows of a database-backed source.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DatabaseSchema {
    pub format: String,
    pub table: Option<String>,
    pub columns: Vec<String>,
    pub column_types: Vec<String>,
    pub sample_rows: Vec<Map<String, Value>>,
}

/// Reads schema metadata without materializing the whole table.
#[async_trait]
pub trait SchemaInspector: Send + Sync {
    async fn inspect(&self, source: &str, workspace: &Workspace, slot: usize)
        -> Result<DatabaseSchema>;
}

pub struct HttpTableScraper {
    client: Client,
}

impl HttpTableScraper {
    pub fn new(config: &ScraperConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .user_agent(config.user_agent.clone())
            .build()
            .map_err(|e| AnalystError::Acquisition(format!("Failed to create scraper: {}", e)))?;
        Ok(Self { client })
    }
}

#[async_trait]
impl TableScraper for HttpTableScraper {
    async fn scrape(&self, url: &str) -> Result<DataTable> {
        let resp = self.client.get(url).send().await?;
        let status = resp.status();
        if !status.is_success() {
            return Err(AnalystError::Acquisition(format!(
                "GET {} returned {}",
                url, status
            )));
        }
        let content_type = resp
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .unwrap_or("")
            .to_ascii_lowercase();
        let body = resp.text().await?;
        let path = url.split(['?', '#']).next().unwrap_or(url).to_ascii_lowercase();

        if content_type.contains("csv") || path.ends_with(".csv") {
            return DataTable::from_csv_str(&body);
        }
        if content_type.contains("json") || path.ends_with(".json") {
            let value: Value = serde_json::from_str(&body)?;
            let records = value.get("data").filter(|d| d.is_array()).unwrap_or(&value);
            return DataTable::from_json_records(records);
        }
        DataTable::from_html(&body)
    }
}

const SCHEMA_SCRIPT_TEMPLATE: &str = r#"import json
import sys

SOURCE = __SOURCE__
FORMAT = __FORMAT__
SAMPLE = __SAMPLE__


def plain(value):
    if value is None or isinstance(value, (bool, int, float, str)):
        return value
    return str(value)


def emit(table, tables, columns, rows):
    names = [c[0] for c in columns]
    print(json.dumps({
        "format": FORMAT,
        "table": table,
        "tables": tables,
        "columns": [{"name": c[0], "type": str(c[1])} for c in columns],
        "sample_data": [dict(zip(names, [plain(v) for v in row])) for row in rows],
    }, default=str))


if FORMAT == "sqlite":
    import sqlite3
    con = sqlite3.connect(SOURCE)
    tables = [r[0] for r in con.execute("SELECT name FROM sqlite_master WHERE type='table' ORDER BY name")]
    if not tables:
        emit(None, [], [], [])
        sys.exit(0)
    table = tables[0]
    columns = [(r[1], r[2]) for r in con.execute(f'PRAGMA table_info("{table}")')]
    rows = con.execute(f'SELECT * FROM "{table}" LIMIT {SAMPLE}').fetchall()
    emit(table, tables, columns, rows)
    sys.exit(0)

import duckdb
if FORMAT == "duckdb":
    con = duckdb.connect(SOURCE, read_only=True)
    tables = [r[0] for r in con.execute("SHOW TABLES").fetchall()]
    if not tables:
        emit(None, [], [], [])
        sys.exit(0)
    table = tables[0]
    relation = f'"{table}"'
else:
    con = duckdb.connect()
    if "://" in SOURCE:
        con.execute("INSTALL httpfs; LOAD httpfs;")
    escaped = SOURCE.replace("'", "''")
    table = None
    tables = []
    relation = f"read_parquet('{escaped}', hive_partitioning=true)"
columns = [(r[0], r[1]) for r in con.execute(f"DESCRIBE SELECT * FROM {relation}").fetchall()]
rows = con.execute(f"SELECT * FROM {relation} LIMIT {SAMPLE}").fetchall()
emit(table, tables, columns, rows)
"#;

/// Introspects parquet, DuckDB and SQLite sources by running a small helper
/// program through the same runner used for generated programs.
pub struct DuckDbInspector<R: ProgramRunner> {
    executor: Arc<SandboxedExecutor<R>>,
    sample_rows: usize,
}

impl<R: ProgramRunner> DuckDbInspector<R> {
    pub fn new(executor: Arc<SandboxedExecutor<R>>, sample_rows: usize) -> Self {
        Self {
            executor,
            sample_rows,
        }
    }
}

pub fn database_format(source: &str) -> &'static str {
    let path = source.split(['?', '#']).next().unwrap_or(source).to_ascii_lowercase();
    if path.ends_with(".duckdb") {
        "duckdb"
    } else if path.ends_with(".db") || path.ends_with(".sqlite") || path.ends_with(".sqlite3") {
        "sqlite"
    } else {
        "parquet"
    }
}

pub fn render_schema_script(source: &str, format: &str, sample_rows: usize) -> String {
    let literal = |s: &str| serde_json::to_string(s).unwrap_or_else(|_| "\"\"".to_string());
    SCHEMA_SCRIPT_TEMPLATE
        .replace("__SOURCE__", &literal(source))
        .replace("__FORMAT__", &literal(format))
        .replace("__SAMPLE__", &sample_rows.to_string())
}

#[async_trait]
impl<R: ProgramRunner + 'static> SchemaInspector for DuckDbInspector<R> {
    async fn inspect(
        &self,
        source: &str,
        workspace: &Workspace,
        slot: usize,
    ) -> Result<DatabaseSchema> {
        let format = database_format(source);
        let script_name = format!("{}_{}", slot, SCHEMA_SCRIPT_FILE);
        let script = workspace
            .write_artifact(&script_name, &render_schema_script(source, format, self.sample_rows))
            .await?;

        let outcome = self.executor.execute(&script, workspace.path()).await?;
        if !outcome.exited_cleanly() {
            return Err(AnalystError::Acquisition(format!(
                "schema introspection for {} failed (exit {}): {}",
                source,
                outcome.exit_code,
                outcome.stderr.trim()
            )));
        }
        let payload = extract_json(&outcome.stdout).ok_or_else(|| {
            AnalystError::Acquisition(format!("schema introspection for {} printed no JSON", source))
        })?;
        parse_schema_output(&payload)
    }
}

fn parse_schema_output(payload: &Value) -> Result<DatabaseSchema> {
    let columns = payload
        .get("columns")
        .and_then(Value::as_array)
        .ok_or_else(|| AnalystError::Acquisition("schema output lacks columns".to_string()))?;

    let mut names = Vec::with_capacity(columns.len());
    let mut types = Vec::with_capacity(columns.len());
    for column in columns {
        names.push(column["name"].as_str().unwrap_or_default().to_string());
        types.push(column["type"].as_str().unwrap_or_default().to_string());
    }

    let sample_rows = payload
        .get("sample_data")
        .and_then(Value::as_array)
        .map(|rows| rows.iter().filter_map(|r| r.as_object().cloned()).collect())
        .unwrap_or_default();

    Ok(DatabaseSchema {
        format: payload["format"].as_str().unwrap_or("parquet").to_string(),
        table: payload["table"].as_str().map(str::to_string),
        columns: names,
        column_types: types,
        sample_rows,
    })
}

/// Fans out acquisition of every discovered source.
pub struct SourceAcquirer {
    scraper: Arc<dyn TableScraper>,
    inspector: Arc<dyn SchemaInspector>,
    sample_rows: usize,
}

impl SourceAcquirer {
    pub fn new(
        scraper: Arc<dyn TableScraper>,
        inspector: Arc<dyn SchemaInspector>,
        sample_rows: usize,
    ) -> Self {
        Self {
            scraper,
            inspector,
            sample_rows,
        }
    }

    /// Acquire all sources concurrently. Failed sources are logged and left
    /// out; the rest keep the order of the input lists, scraped first.
    pub async fn acquire_all(
        &self,
        sources: &ExtractedSources,
        workspace: &Workspace,
    ) -> Vec<SourceDescriptor> {
        let scrapes = join_all(
            sources
                .scrape_urls
                .iter()
                .enumerate()
                .map(|(i, url)| self.scrape_source(url, i + 1, workspace)),
        );
        let databases = join_all(
            sources
                .database_files
                .iter()
                .enumerate()
                .map(|(i, path)| self.inspect_source(path, i + 1, workspace)),
        );
        let (scraped, inspected) = futures::join!(scrapes, databases);

        let labels = sources.scrape_urls.iter().chain(sources.database_files.iter());
        scraped
            .into_iter()
            .chain(inspected)
            .zip(labels)
            .filter_map(|(result, label)| match result {
                Ok(descriptor) => Some(descriptor),
                Err(e) => {
                    warn!(source = %label, "Source acquisition failed, omitting: {}", e);
                    None
                }
            })
            .collect()
    }

    async fn scrape_source(
        &self,
        url: &str,
        position: usize,
        workspace: &Workspace,
    ) -> Result<SourceDescriptor> {
        let mut table = self.scraper.scrape(url).await?;
        if table.is_empty() {
            return Err(AnalystError::Acquisition(format!("no table found at {}", url)));
        }
        let formatted = table.normalize_numeric_cells();

        let filename = format!("scraped_data_{}_{}.csv", position, host_slug(url));
        workspace.write_artifact(&filename, table.to_csv_bytes()?).await?;
        info!(url, file = %filename, rows = table.rows.len(), "Scraped source saved");

        let mut extra = Map::new();
        extra.insert("source_url".to_string(), json!(url));
        extra.insert("formatting_applied".to_string(), json!(formatted));
        Ok(SourceDescriptor {
            filename,
            shape: Some(table.shape()),
            columns: table.columns.clone(),
            sample_rows: table.sample_rows(self.sample_rows),
            origin: SourceOrigin::Scraped,
            description: format!("Data scraped from {}", url),
            extra_metadata: extra,
        })
    }

    async fn inspect_source(
        &self,
        reference: &str,
        position: usize,
        workspace: &Workspace,
    ) -> Result<SourceDescriptor> {
        let location = resolve_local_reference(reference);
        let schema = self.inspector.inspect(&location, workspace, position).await?;
        info!(
            source = %location,
            format = %schema.format,
            columns = schema.columns.len(),
            "Database schema inspected"
        );

        let mut extra = Map::new();
        extra.insert("source_url".to_string(), json!(location));
        extra.insert("format".to_string(), json!(schema.format));
        if let Some(table) = &schema.table {
            extra.insert("table".to_string(), json!(table));
        }
        let types: Map<String, Value> = schema
            .columns
            .iter()
            .cloned()
            .zip(schema.column_types.iter().map(|t| json!(t)))
            .collect();
        extra.insert("column_types".to_string(), Value::Object(types));

        Ok(SourceDescriptor {
            filename: location.clone(),
            shape: None,
            columns: schema.columns,
            sample_rows: schema.sample_rows,
            origin: SourceOrigin::Database,
            description: format!("{} source {}", schema.format, location),
            extra_metadata: extra,
        })
    }

    /// Clean and persist the caller's table as `ProvidedCSV.csv`.
    pub async fn describe_provided(
        &self,
        csv_text: &str,
        workspace: &Workspace,
    ) -> Result<SourceDescriptor> {
        let mut table = DataTable::from_csv_str(csv_text)?;
        let formatted = table.normalize_numeric_cells();
        workspace
            .write_artifact(PROVIDED_CSV_FILE, table.to_csv_bytes()?)
            .await?;
        info!(rows = table.rows.len(), cols = table.columns.len(), "Provided CSV processed");

        let mut extra = Map::new();
        extra.insert("formatting_applied".to_string(), json!(formatted));
        Ok(SourceDescriptor {
            filename: PROVIDED_CSV_FILE.to_string(),
            shape: Some(table.shape()),
            columns: table.columns.clone(),
            sample_rows: table.sample_rows(self.sample_rows),
            origin: SourceOrigin::Provided,
            description: "User-provided CSV file (cleaned and formatted)".to_string(),
            extra_metadata: extra,
        })
    }
}

/// Relative local paths are anchored at the service's working directory,
/// since generated programs run inside the request workspace.
fn resolve_local_reference(reference: &str) -> String {
    if reference.contains("://") || Path::new(reference).is_absolute() {
        return reference.to_string();
    }
    std::env::current_dir()
        .map(|cwd| cwd.join(reference))
        .unwrap_or_else(|_| PathBuf::from(reference))
        .to_string_lossy()
        .to_string()
}

fn host_slug(url: &str) -> String {
    url::Url::parse(url)
        .ok()
        .and_then(|u| u.host_str().map(str::to_string))
        .unwrap_or_else(|| "source".to_string())
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '.' { c } else { '_' })
        .collect()
}
