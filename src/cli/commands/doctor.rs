//! Doctor command - verify connectivity and configuration.

use crate::cli::Output;
use crate::config::{CrewConfig, DatabaseBackend, Settings, StorageBackend};
use crate::database;
use crate::tools::PirlsHistory;
use console::style;
use std::path::Path;
use std::process::Command;
use std::time::Duration;

const DATABASE_TIMEOUT: Duration = Duration::from_secs(10);

/// Check result for a single item.
#[derive(Debug)]
pub struct CheckResult {
    pub name: String,
    pub status: CheckStatus,
    pub message: String,
    pub hint: Option<String>,
}

#[derive(Debug, PartialEq)]
pub enum CheckStatus {
    Ok,
    Warning,
    Error,
}

impl CheckResult {
    fn ok(name: &str, message: &str) -> Self {
        Self {
            name: name.to_string(),
            status: CheckStatus::Ok,
            message: message.to_string(),
            hint: None,
        }
    }

    fn warning(name: &str, message: &str, hint: &str) -> Self {
        Self {
            name: name.to_string(),
            status: CheckStatus::Warning,
            message: message.to_string(),
            hint: Some(hint.to_string()),
        }
    }

    fn error(name: &str, message: &str, hint: &str) -> Self {
        Self {
            name: name.to_string(),
            status: CheckStatus::Error,
            message: message.to_string(),
            hint: Some(hint.to_string()),
        }
    }

    fn print(&self) {
        let icon = match self.status {
            CheckStatus::Ok => style("✓").green(),
            CheckStatus::Warning => style("!").yellow(),
            CheckStatus::Error => style("✗").red(),
        };

        println!("  {} {} - {}", icon, style(&self.name).bold(), self.message);

        if let Some(hint) = &self.hint {
            println!("    {} {}", style("→").dim(), style(hint).dim());
        }
    }
}

/// Run all diagnostic checks.
pub async fn run_doctor(settings: &Settings, config_path: Option<&Path>) -> anyhow::Result<()> {
    Output::header("DaVinci Doctor");
    println!();
    println!("Checking connectivity and configuration...\n");

    let mut checks = Vec::new();

    let mut section = |title: &str, results: Vec<CheckResult>| {
        println!("{}", style(title).bold());
        for check in &results {
            check.print();
        }
        println!();
        checks.extend(results);
    };

    section("LLM", vec![check_llm(settings)]);
    section("Database", vec![check_database(settings).await]);
    section("Object Storage", vec![check_storage(settings)]);
    section("Plotting", check_plotting(settings));
    section("Resources", vec![check_history(settings), check_crew(settings)]);
    section("Configuration", vec![check_config_file(config_path)]);

    let errors = checks.iter().filter(|c| c.status == CheckStatus::Error).count();
    let warnings = checks.iter().filter(|c| c.status == CheckStatus::Warning).count();

    if errors > 0 {
        Output::error(&format!(
            "{} error(s) found. Please fix them before using DaVinci.",
            errors
        ));
        std::process::exit(1);
    } else if warnings > 0 {
        Output::warning(&format!("All checks passed with {} warning(s).", warnings));
    } else {
        Output::success("All checks passed! DaVinci is ready to use.");
    }

    Ok(())
}

/// Check the chat endpoint configuration.
fn check_llm(settings: &Settings) -> CheckResult {
    let name = format!("Model {}", settings.llm.model);
    let key = std::env::var("OPENAI_API_KEY").unwrap_or_default();

    match (&settings.llm.base_url, key.is_empty()) {
        (Some(url), true) => CheckResult::warning(
            &name,
            &format!("{} (no API key)", url),
            "Set OPENAI_API_KEY if the gateway requires one",
        ),
        (Some(url), false) => CheckResult::ok(&name, &format!("{} ({})", url, mask_key(&key))),
        (None, true) => CheckResult::error(
            &name,
            "OPENAI_API_KEY not set",
            "Set with: export OPENAI_API_KEY='sk-...' or configure llm.base_url",
        ),
        (None, false) => CheckResult::ok(&name, &format!("api.openai.com ({})", mask_key(&key))),
    }
}

/// Connect to the configured database and run a trivial query.
async fn check_database(settings: &Settings) -> CheckResult {
    let (name, target, hint) = match settings.database.backend {
        DatabaseBackend::Postgres => (
            "PostgreSQL",
            format!(
                "{}@{}:{}/{}",
                settings.database.user,
                settings.database.host,
                settings.database.port,
                settings.database.name
            ),
            "Check DB_ENDPOINT, DB_PORT, DB_USER and DB_PASSWORD",
        ),
        DatabaseBackend::Sqlite => {
            let path = settings.sqlite_path();
            let size = std::fs::metadata(&path)
                .map(|m| format_size(m.len()))
                .unwrap_or_else(|_| "missing".to_string());
            (
                "SQLite",
                format!("{} ({})", path.display(), size),
                "Point database.sqlite_path at a PIRLS snapshot",
            )
        }
    };

    let db = match database::connect(settings) {
        Ok(db) => db,
        Err(e) => return CheckResult::error(name, &format!("{}: {}", target, e), hint),
    };

    match tokio::time::timeout(DATABASE_TIMEOUT, db.ping()).await {
        Ok(Ok(())) => CheckResult::ok(name, &target),
        Ok(Err(e)) => CheckResult::error(name, &format!("{}: {}", target, e), hint),
        Err(_) => CheckResult::error(name, &format!("{}: connection timed out", target), hint),
    }
}

/// Check object storage configuration.
fn check_storage(settings: &Settings) -> CheckResult {
    match settings.storage.backend {
        StorageBackend::S3 => {
            let bucket = &settings.storage.bucket;
            let has_credentials = std::env::var("AWS_ACCESS_KEY_ID").is_ok()
                || std::env::var("AWS_PROFILE").is_ok()
                || std::env::var("AWS_WEB_IDENTITY_TOKEN_FILE").is_ok();
            if bucket == "bucket" {
                CheckResult::warning(
                    "S3",
                    "using the default bucket name 'bucket'",
                    "Set S3_BUCKET_NAME",
                )
            } else if !has_credentials {
                CheckResult::warning(
                    "S3",
                    &format!("s3://{} (no AWS credentials in environment)", bucket),
                    "Credentials may still come from ~/.aws or an instance profile",
                )
            } else {
                CheckResult::ok("S3", &format!("s3://{}", bucket))
            }
        }
        StorageBackend::Local => {
            let dir = settings.local_storage_dir();
            if dir.exists() {
                CheckResult::ok("Local", &format!("{}", dir.display()))
            } else {
                CheckResult::warning(
                    "Local",
                    &format!("{} (will be created)", dir.display()),
                    "Directory will be created on first use",
                )
            }
        }
    }
}

/// Check the plot interpreter, matplotlib and the sandbox wrapper.
fn check_plotting(settings: &Settings) -> Vec<CheckResult> {
    let mut results = Vec::new();
    let interpreter = &settings.plot.interpreter;

    results.push(check_command(
        interpreter,
        &[interpreter.as_str(), "--version"],
        "Install Python 3 or set plot.interpreter",
    ));

    results.push(
        match Command::new(interpreter)
            .args(["-c", "import matplotlib; print(matplotlib.__version__)"])
            .output()
        {
            Ok(output) if output.status.success() => CheckResult::ok(
                "matplotlib",
                String::from_utf8_lossy(&output.stdout).trim(),
            ),
            _ => CheckResult::warning(
                "matplotlib",
                "not importable",
                "Install with: pip install matplotlib",
            ),
        },
    );

    match settings.plot.sandbox_command.first() {
        Some(wrapper) => results.push(check_command(
            wrapper,
            &[wrapper.as_str(), "--version"],
            "Install the sandbox wrapper or clear plot.sandbox_command",
        )),
        None => results.push(CheckResult::warning(
            "Sandbox",
            "no wrapper configured",
            "Snippets run with a cleared environment only; set plot.sandbox_command (e.g. bwrap)",
        )),
    }

    results
}

/// Check that the historical scores table loads.
fn check_history(settings: &Settings) -> CheckResult {
    let path = settings.history.csv_path.as_deref().map(Settings::expand_path);
    match PirlsHistory::load(path.as_deref()) {
        Ok(history) => CheckResult::ok(
            "Previous PIRLS scores",
            &format!("{} countries", history.countries().count()),
        ),
        Err(e) => CheckResult::error(
            "Previous PIRLS scores",
            &e.to_string(),
            "Check history.csv_path",
        ),
    }
}

/// Check that agent and task definitions load.
fn check_crew(settings: &Settings) -> CheckResult {
    match CrewConfig::load(settings.crew.config_dir.as_deref()) {
        Ok(config) => CheckResult::ok(
            "Crew definitions",
            &format!("{} agents, {} tasks", config.agents.len(), config.tasks.len()),
        ),
        Err(e) => CheckResult::error("Crew definitions", &e.to_string(), "Check crew.config_dir"),
    }
}

/// Check if config file exists.
fn check_config_file(config_path: Option<&Path>) -> CheckResult {
    let config_path = config_path
        .map(Path::to_path_buf)
        .unwrap_or_else(Settings::default_config_path);
    if config_path.exists() {
        CheckResult::ok("Config file", &format!("{}", config_path.display()))
    } else {
        CheckResult::warning(
            "Config file",
            "using defaults",
            "Create with: davinci config edit",
        )
    }
}

/// Run a version command.
fn check_command(name: &str, command: &[&str], hint: &str) -> CheckResult {
    let Some((cmd, args)) = command.split_first() else {
        return CheckResult::error(name, "empty command", hint);
    };

    match Command::new(cmd).args(args).output() {
        Ok(output) if output.status.success() => {
            let stdout = String::from_utf8_lossy(&output.stdout);
            let stderr = String::from_utf8_lossy(&output.stderr);
            let version = stdout
                .lines()
                .chain(stderr.lines())
                .next()
                .unwrap_or("installed")
                .trim()
                .to_string();

            let version_display: String = if version.chars().count() > 50 {
                format!("{}...", version.chars().take(50).collect::<String>())
            } else {
                version
            };

            CheckResult::ok(name, &version_display)
        }
        Ok(_) => CheckResult::error(name, "installed but not working", hint),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            CheckResult::error(name, "not found", hint)
        }
        Err(e) => CheckResult::error(name, &format!("error: {}", e), hint),
    }
}

fn mask_key(key: &str) -> String {
    let chars: Vec<char> = key.chars().collect();
    if chars.len() <= 12 {
        return "****".to_string();
    }
    let head: String = chars[..7].iter().collect();
    let tail: String = chars[chars.len() - 4..].iter().collect();
    format!("{}...{}", head, tail)
}

/// Format file size in human-readable format.
fn format_size(bytes: u64) -> String {
    const KB: u64 = 1024;
    const MB: u64 = KB * 1024;
    const GB: u64 = MB * 1024;

    if bytes >= GB {
        format!("{:.1} GB", bytes as f64 / GB as f64)
    } else if bytes >= MB {
        format!("{:.1} MB", bytes as f64 / MB as f64)
    } else if bytes >= KB {
        format!("{:.1} KB", bytes as f64 / KB as f64)
    } else {
        format!("{} B", bytes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_check_result_error() {
        let result = CheckResult::error("test", "failed", "fix it");
        assert_eq!(result.status, CheckStatus::Error);
        assert_eq!(result.hint, Some("fix it".to_string()));
    }

    #[test]
    fn test_format_size() {
        assert_eq!(format_size(500), "500 B");
        assert_eq!(format_size(1024 * 1024), "1.0 MB");
    }

    #[test]
    fn test_mask_key() {
        assert_eq!(mask_key("short"), "****");
        assert_eq!(mask_key("sk-abcdefghijklmnop1234"), "sk-abcd...1234");
    }

    #[test]
    fn test_bundled_resources_pass() {
        let settings = Settings::default();
        assert_eq!(check_history(&settings).status, CheckStatus::Ok);
        assert_eq!(check_crew(&settings).status, CheckStatus::Ok);
    }

    #[tokio::test]
    async fn test_missing_sqlite_snapshot_is_error() {
        let dir = tempfile::tempdir().unwrap();
        let mut settings = Settings::default();
        settings.database.backend = DatabaseBackend::Sqlite;
        settings.database.sqlite_path = dir.path().join("missing.db").to_string_lossy().to_string();

        let result = check_database(&settings).await;
        assert_eq!(result.status, CheckStatus::Error);
        assert!(result.message.contains("missing"));
    }
}
