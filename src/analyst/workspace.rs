use super::error::Result;
use std::path::{Path, PathBuf};
use tempfile::TempDir;
use tracing::{debug, info};
use uuid::Uuid;

pub const PROGRAM_FILE: &str = "program.py";
pub const DATA_SUMMARY_FILE: &str = "data_summary.json";
pub const TASK_BREAKDOWN_FILE: &str = "broken_down_tasks.txt";
pub const PROVIDED_CSV_FILE: &str = "ProvidedCSV.csv";
pub const SCHEMA_SCRIPT_FILE: &str = "schema_introspect.py";

/// Per-request scratch directory. Every intermediate artifact of a request
/// lives here, so concurrent requests never share file names.
pub struct Workspace {
    request_id: String,
    _dir: Option<TempDir>,
    path: PathBuf,
}

impl Workspace {
    pub fn create(root: Option<&Path>, keep_artifacts: bool) -> Result<Self> {
        let request_id = Uuid::new_v4().to_string();
        let prefix = format!("aianalyst-{}-", &request_id[..8]);

        let mut builder = tempfile::Builder::new();
        builder.prefix(&prefix);
        let dir = match root {
            Some(root) => {
                std::fs::create_dir_all(root)?;
                builder.tempdir_in(root)?
            }
            None => builder.tempdir()?,
        };
        let path = dir.path().to_path_buf();
        debug!(request_id = %request_id, path = %path.display(), "Created request workspace");

        let dir = if keep_artifacts {
            info!(request_id = %request_id, path = %path.display(), "Keeping request artifacts");
            // Dropping the handle without deleting leaves the directory behind.
            let _ = dir.keep();
            None
        } else {
            Some(dir)
        };

        Ok(Self {
            request_id,
            _dir: dir,
            path,
        })
    }

    pub fn request_id(&self) -> &str {
        &self.request_id
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn artifact(&self, name: &str) -> PathBuf {
        self.path.join(name)
    }

    pub async fn write_artifact(&self, name: &str, contents: impl AsRef<[u8]>) -> Result<PathBuf> {
        let path = self.artifact(name);
        tokio::fs::write(&path, contents).await?;
        Ok(path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn workspaces_are_isolated_and_removed_on_drop() {
        let root = tempfile::tempdir().unwrap();
        let a = Workspace::create(Some(root.path()), false).unwrap();
        let b = Workspace::create(Some(root.path()), false).unwrap();
        assert_ne!(a.path(), b.path());
        assert_ne!(a.request_id(), b.request_id());

        let written = a.write_artifact(PROGRAM_FILE, "print(1)").await.unwrap();
        assert_eq!(written, a.artifact(PROGRAM_FILE));
        assert!(!b.artifact(PROGRAM_FILE).exists());

        let path = a.path().to_path_buf();
        drop(a);
        assert!(!path.exists());
    }

    #[test]
    fn kept_workspace_survives_drop() {
        let root = tempfile::tempdir().unwrap();
        let ws = Workspace::create(Some(root.path()), true).unwrap();
        let path = ws.path().to_path_buf();
        drop(ws);
        assert!(path.exists());
    }
}
