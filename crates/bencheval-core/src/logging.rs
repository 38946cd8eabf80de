use std::collections::HashSet;
use std::fs::{create_dir_all, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use once_cell::sync::Lazy;
use regex::{Captures, Regex};
use serde::Serialize;

const LOG_DIR_ENV: &str = "BENCHEVAL_LOG_DIR";
const DEFAULT_LOG_DIR: &str = "data/logs";

static REDACTION_PATTERNS: Lazy<Vec<(String, Regex)>> = Lazy::new(|| {
    vec![
        (
            "api_key".to_string(),
            Regex::new(r"(?i)(api[_-]?key\s*[:=]\s*)([A-Za-z0-9\-_.+/]+)")
                .expect("invalid api_key regex"),
        ),
        (
            "bearer".to_string(),
            Regex::new(r"(?i)(bearer\s+)([A-Za-z0-9\-_.+=/]+)").expect("invalid bearer regex"),
        ),
        (
            "sk_token".to_string(),
            Regex::new(r"(sk-[A-Za-z0-9]{16,})").expect("invalid sk_token regex"),
        ),
    ]
});

fn log_base_dir() -> PathBuf {
    std::env::var(LOG_DIR_ENV)
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from(DEFAULT_LOG_DIR))
}

/// Path of the JSONL record file for one eval run.
pub fn eval_log_path(run_id: &str) -> PathBuf {
    log_base_dir().join(format!("browsecomp-{run_id}.jsonl"))
}

/// Append one serialized record as a JSON line, creating parent directories.
pub fn append_json_line<T: Serialize>(path: &Path, value: &T) -> Result<()> {
    if let Some(parent) = path.parent() {
        create_dir_all(parent)
            .with_context(|| format!("failed to create log directory {}", parent.display()))?;
    }

    let file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .with_context(|| format!("failed to open log file {}", path.display()))?;
    let mut writer = BufWriter::new(file);
    let line = serde_json::to_string(value)?;
    writeln!(writer, "{}", line)
        .with_context(|| format!("failed to append log entry to {}", path.display()))?;
    writer.flush()?;
    Ok(())
}

/// Replace secret-looking spans with a redaction marker, recording which
/// pattern fired.
pub fn sanitize_text(input: &str, redactions: &mut HashSet<String>) -> String {
    let mut output = input.to_string();
    for (name, regex) in REDACTION_PATTERNS.iter() {
        let mut matched = false;
        output = regex
            .replace_all(&output, |caps: &Captures| {
                matched = true;
                if caps.len() > 2 {
                    format!("{}[REDACTED]", &caps[1])
                } else {
                    "[REDACTED]".to_string()
                }
            })
            .to_string();
        if matched {
            redactions.insert(name.clone());
        }
    }
    output
}
