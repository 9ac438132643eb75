//! Plot generation in a sandboxed subprocess.
//!
//! Each invocation gets its own working directory. The snippet runs under a
//! small harness that reports the value bound to `FILENAME`; the named file is
//! uploaded to the object store and always deleted locally afterwards.

use crate::config::Settings;
use crate::error::{DavinciError, Result};
use crate::storage::{object_key, ObjectStore};
use chrono::{DateTime, Utc};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;
use tokio::process::Command;
use tracing::{debug, error, info, instrument, warn};

/// Returned to the agent whenever no URL can be produced.
pub const PLOT_ERROR: &str = "ERROR";

const HARNESS: &str = include_str!("../../resources/plot_harness.py");
const HARNESS_FILE: &str = "harness.py";
const SNIPPET_FILE: &str = "snippet.py";
const REPORT_FILE: &str = "result.json";
const STDERR_TAIL: usize = 2000;

#[derive(Debug, Default, Deserialize)]
struct HarnessReport {
    filename: Option<String>,
    error: Option<String>,
}

/// Runs plotting snippets and publishes their artifacts.
pub struct PlotRunner {
    interpreter: String,
    sandbox_command: Vec<String>,
    timeout: Duration,
    work_root: PathBuf,
    store: Arc<dyn ObjectStore>,
}

impl PlotRunner {
    pub fn new(settings: &Settings, store: Arc<dyn ObjectStore>) -> Self {
        Self {
            interpreter: settings.plot.interpreter.clone(),
            sandbox_command: settings.plot.sandbox_command.clone(),
            timeout: Duration::from_secs(settings.plot.timeout_secs),
            work_root: settings.temp_dir(),
            store,
        }
    }

    /// Execute `code` and return the public URL of the file it names in
    /// `FILENAME`, or `"ERROR"`.
    #[instrument(skip(self, code), fields(code_len = code.len()))]
    pub async fn generate_plot(&self, code: &str) -> Result<String> {
        tokio::fs::create_dir_all(&self.work_root).await?;
        let sandbox = tempfile::Builder::new()
            .prefix("plot-")
            .tempdir_in(&self.work_root)?;
        let dir = sandbox.path().canonicalize()?;

        tokio::fs::write(dir.join(SNIPPET_FILE), code).await?;
        tokio::fs::write(dir.join(HARNESS_FILE), HARNESS).await?;

        let run = self.run_harness(&dir).await;
        let report = read_report(&dir).await;
        let artifact = report
            .filename
            .as_deref()
            .and_then(|name| resolve_artifact(&dir, name));

        if let Err(e) = run {
            if let Some(path) = &artifact {
                remove_artifact(path).await;
            }
            return Err(e);
        }

        match (report.filename, artifact) {
            (None, _) => {
                info!("Snippet did not bind FILENAME");
                Ok(PLOT_ERROR.to_string())
            }
            (Some(name), None) => {
                warn!("FILENAME {:?} does not name a file inside the sandbox", name);
                Ok(PLOT_ERROR.to_string())
            }
            (Some(_), Some(path)) => Ok(publish_artifact(self.store.as_ref(), &path, Utc::now()).await),
        }
    }

    fn command(&self, dir: &Path) -> Command {
        let mut command = match self.sandbox_command.split_first() {
            Some((program, args)) => {
                let mut c = Command::new(program);
                c.args(args).arg(&self.interpreter);
                c
            }
            None => Command::new(&self.interpreter),
        };

        let path = std::env::var_os("PATH").unwrap_or_else(|| "/usr/local/bin:/usr/bin:/bin".into());

        command
            .arg(HARNESS_FILE)
            .current_dir(dir)
            .env_clear()
            .env("PATH", path)
            .env("HOME", dir)
            .env("TMPDIR", dir)
            .env("MPLBACKEND", "Agg")
            .env("MPLCONFIGDIR", dir.join(".matplotlib"))
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        command
    }

    async fn run_harness(&self, dir: &Path) -> Result<()> {
        debug!("Running plot snippet in {:?}", dir);

        let output = match tokio::time::timeout(self.timeout, self.command(dir).output()).await {
            Ok(output) => output.map_err(|e| {
                DavinciError::Plot(format!("Failed to start {}: {}", self.interpreter, e))
            })?,
            Err(_) => {
                return Err(DavinciError::Plot(format!(
                    "Plot snippet timed out after {}s",
                    self.timeout.as_secs()
                )))
            }
        };

        if output.status.success() {
            return Ok(());
        }

        let stderr = String::from_utf8_lossy(&output.stderr);
        let tail: String = {
            let chars: Vec<char> = stderr.trim().chars().collect();
            chars[chars.len().saturating_sub(STDERR_TAIL)..].iter().collect()
        };
        Err(DavinciError::Plot(format!(
            "Plot snippet failed ({}): {}",
            output.status, tail
        )))
    }
}

async fn read_report(dir: &Path) -> HarnessReport {
    let raw = match tokio::fs::read_to_string(dir.join(REPORT_FILE)).await {
        Ok(raw) => raw,
        Err(_) => return HarnessReport::default(),
    };
    match serde_json::from_str::<HarnessReport>(&raw) {
        Ok(report) => {
            if let Some(err) = &report.error {
                debug!("Snippet raised: {}", err);
            }
            report
        }
        Err(e) => {
            warn!("Unreadable harness report: {}", e);
            HarnessReport::default()
        }
    }
}

/// Resolve a bound file name to an existing file inside `dir`.
///
/// `dir` must already be canonical. Returns `None` for missing files and for
/// paths that escape the directory.
pub fn resolve_artifact(dir: &Path, name: &str) -> Option<PathBuf> {
    let path = dir.join(name).canonicalize().ok()?;
    if path.starts_with(dir) && path.is_file() {
        Some(path)
    } else {
        None
    }
}

/// Upload `path` under its timestamp key and delete it, whatever the upload
/// outcome. Returns the public URL or `"ERROR"`.
pub async fn publish_artifact(store: &dyn ObjectStore, path: &Path, now: DateTime<Utc>) -> String {
    let result = match object_key(path, now) {
        Ok(key) => match store.upload(&key, path).await {
            Ok(()) => {
                let url = store.public_url(&key);
                info!("Uploaded plot to {}", url);
                url
            }
            Err(e) => {
                error!("Plot upload failed: {}", e);
                PLOT_ERROR.to_string()
            }
        },
        Err(e) => {
            error!("Plot upload failed: {}", e);
            PLOT_ERROR.to_string()
        }
    };

    remove_artifact(path).await;
    result
}

async fn remove_artifact(path: &Path) {
    if let Err(e) = tokio::fs::remove_file(path).await {
        warn!("Could not delete {:?}: {}", path, e);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::LocalObjectStore;
    use async_trait::async_trait;
    use chrono::TimeZone;

    struct FailingStore;

    #[async_trait]
    impl ObjectStore for FailingStore {
        async fn upload(&self, _key: &str, _path: &Path) -> Result<()> {
            Err(DavinciError::Storage("bucket unreachable".to_string()))
        }

        fn public_url(&self, key: &str) -> String {
            format!("https://example.invalid/{}", key)
        }

        fn describe(&self) -> String {
            "failing".to_string()
        }
    }

    fn python_available() -> bool {
        std::process::Command::new("python3")
            .arg("--version")
            .output()
            .map(|o| o.status.success())
            .unwrap_or(false)
    }

    fn runner(work_root: &Path, store: Arc<dyn ObjectStore>) -> PlotRunner {
        let mut settings = Settings::default();
        settings.general.temp_dir = work_root.to_string_lossy().to_string();
        settings.plot.timeout_secs = 20;
        PlotRunner::new(&settings, store)
    }

    #[tokio::test]
    async fn test_failed_upload_still_deletes_file() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("chart.png");
        std::fs::write(&file, b"png").unwrap();

        let now = Utc.with_ymd_and_hms(2024, 3, 7, 9, 0, 0).unwrap();
        let result = publish_artifact(&FailingStore, &file, now).await;

        assert_eq!(result, "ERROR");
        assert!(!file.exists());
    }

    #[tokio::test]
    async fn test_successful_upload_returns_url_and_deletes_file() {
        let dir = tempfile::tempdir().unwrap();
        let root = tempfile::tempdir().unwrap();
        let file = dir.path().join("chart.png");
        std::fs::write(&file, b"png").unwrap();

        let store = LocalObjectStore::new(root.path(), Some("https://plots.example.org".to_string())).unwrap();
        let now = Utc.with_ymd_and_hms(2024, 3, 7, 9, 0, 0).unwrap();
        let result = publish_artifact(&store, &file, now).await;

        assert_eq!(result, "https://plots.example.org/2024/3/7/9/chart.png");
        assert!(!file.exists());
        assert!(store.object_path("2024/3/7/9/chart.png").exists());
    }

    #[test]
    fn test_resolve_rejects_paths_outside_sandbox() {
        let sandbox = tempfile::tempdir().unwrap();
        let outside = tempfile::tempdir().unwrap();
        let victim = outside.path().join("keep.txt");
        std::fs::write(&victim, b"keep").unwrap();

        let dir = sandbox.path().canonicalize().unwrap();
        assert!(resolve_artifact(&dir, victim.to_str().unwrap()).is_none());
        assert!(resolve_artifact(&dir, "../keep.txt").is_none());
        assert!(resolve_artifact(&dir, "missing.png").is_none());
        assert!(victim.exists());

        std::fs::write(dir.join("inside.png"), b"png").unwrap();
        assert_eq!(resolve_artifact(&dir, "inside.png"), Some(dir.join("inside.png")));
    }

    #[tokio::test]
    async fn test_snippet_without_filename_returns_error() {
        if !python_available() {
            return;
        }
        let work = tempfile::tempdir().unwrap();
        let runner = runner(work.path(), Arc::new(FailingStore));

        let result = runner.generate_plot("x = 1 + 1\n").await.unwrap();
        assert_eq!(result, "ERROR");
        assert_eq!(std::fs::read_dir(work.path()).unwrap().count(), 0);
    }

    #[tokio::test]
    async fn test_bound_file_is_uploaded_and_removed() {
        if !python_available() {
            return;
        }
        let work = tempfile::tempdir().unwrap();
        let root = tempfile::tempdir().unwrap();
        let store = Arc::new(LocalObjectStore::new(root.path(), Some("https://plots.example.org".to_string())).unwrap());
        let runner = runner(work.path(), store);

        let code = "with open('chart.png', 'wb') as f:\n    f.write(b'png')\nFILENAME = 'chart.png'\n";
        let url = runner.generate_plot(code).await.unwrap();

        assert!(url.starts_with("https://plots.example.org/"));
        assert!(url.ends_with("/chart.png"));
        assert_eq!(std::fs::read_dir(work.path()).unwrap().count(), 0);
    }

    #[tokio::test]
    async fn test_bound_file_removed_when_upload_fails() {
        if !python_available() {
            return;
        }
        let work = tempfile::tempdir().unwrap();
        let runner = runner(work.path(), Arc::new(FailingStore));

        let code = "open('chart.png', 'wb').write(b'png')\nFILENAME = 'chart.png'\n";
        let result = runner.generate_plot(code).await.unwrap();

        assert_eq!(result, "ERROR");
        assert_eq!(std::fs::read_dir(work.path()).unwrap().count(), 0);
    }

    #[tokio::test]
    async fn test_raising_snippet_is_plot_error() {
        if !python_available() {
            return;
        }
        let work = tempfile::tempdir().unwrap();
        let runner = runner(work.path(), Arc::new(FailingStore));

        let code = "open('chart.png', 'wb').write(b'png')\nFILENAME = 'chart.png'\nraise ValueError('bad data')\n";
        let result = runner.generate_plot(code).await;

        match result {
            Err(DavinciError::Plot(msg)) => assert!(msg.contains("bad data")),
            other => panic!("expected plot error, got {:?}", other),
        }
        assert_eq!(std::fs::read_dir(work.path()).unwrap().count(), 0);
    }

    #[tokio::test]
    async fn test_filename_outside_sandbox_is_untouched() {
        if !python_available() {
            return;
        }
        let work = tempfile::tempdir().unwrap();
        let outside = tempfile::tempdir().unwrap();
        let victim = outside.path().join("keep.txt");
        std::fs::write(&victim, b"keep").unwrap();
        let runner = runner(work.path(), Arc::new(FailingStore));

        let code = format!("FILENAME = {:?}\n", victim.to_str().unwrap());
        let result = runner.generate_plot(&code).await.unwrap();

        assert_eq!(result, "ERROR");
        assert!(victim.exists());
    }
}
