//! Utility functions for the CLI

use crate::error::{CliError, CliResult};
use colored::{ColoredString, Colorize};
use serde_json::Value as JsonValue;
use std::path::Path;
use tracing_subscriber::{EnvFilter, FmtSubscriber};

/// Initialize tracing; `RUST_LOG` overrides the default `info` level
pub fn init_tracing() -> CliResult<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    let subscriber = FmtSubscriber::builder()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .finish();

    tracing::subscriber::set_global_default(subscriber)
        .map_err(|e| CliError::General(format!("Failed to set tracing subscriber: {}", e)))?;

    Ok(())
}

/// Utility for colored console output
pub struct ColoredOutput;

impl ColoredOutput {
    pub fn success(msg: &str) -> ColoredString {
        msg.green().bold()
    }

    pub fn error(msg: &str) -> ColoredString {
        msg.red().bold()
    }

    pub fn highlight(msg: &str) -> ColoredString {
        msg.cyan().bold()
    }

    pub fn dim(msg: &str) -> ColoredString {
        msg.dimmed()
    }
}

pub fn validate_file_exists(path: &str) -> CliResult<()> {
    if !Path::new(path).exists() {
        return Err(CliError::FileNotFound(path.to_string()));
    }
    Ok(())
}

/// Read a JSON value from an inline string or a JSON/YAML file; `{}` when neither is given
pub fn read_json_input(inline: Option<String>, file: Option<String>) -> CliResult<JsonValue> {
    match (inline, file) {
        (Some(text), _) => serde_json::from_str(&text)
            .map_err(|e| CliError::InvalidArgument(format!("Invalid JSON input: {}", e))),
        (None, Some(path)) => {
            validate_file_exists(&path)?;
            let content = std::fs::read_to_string(&path)?;
            match serde_json::from_str::<JsonValue>(&content) {
                Ok(value) => Ok(value),
                Err(_) => serde_yaml::from_str(&content).map_err(|e| {
                    CliError::InvalidArgument(format!(
                        "Invalid JSON/YAML input file '{}': {}",
                        path, e
                    ))
                }),
            }
        }
        (None, None) => Ok(serde_json::json!({})),
    }
}

pub fn write_output_data(file_path: &str, content: &str) -> CliResult<()> {
    let path = Path::new(file_path);
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    std::fs::write(path, content)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn reads_inline_and_file_input() {
        assert_eq!(read_json_input(None, None).unwrap(), serde_json::json!({}));
        assert_eq!(
            read_json_input(Some(r#"{"id": 1}"#.to_string()), None).unwrap(),
            serde_json::json!({"id": 1})
        );
        assert!(read_json_input(Some("{".to_string()), None).is_err());

        let mut file = NamedTempFile::new().unwrap();
        write!(file, "name: x\nlines:\n  - $action: add\n").unwrap();
        let path = file.path().to_str().unwrap().to_string();
        assert_eq!(
            read_json_input(None, Some(path)).unwrap(),
            serde_json::json!({"name": "x", "lines": [{"$action": "add"}]})
        );

        assert!(matches!(
            read_json_input(None, Some("missing.json".to_string())),
            Err(CliError::FileNotFound(_))
        ));
    }
}
