//! Configuration loading from disk.

use std::fs;
use std::path::Path;

use thiserror::Error;

use crate::config::schema::DeployDoc;
use crate::config::validation::Violation;

/// Error type for configuration loading and resolution.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("parse error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("parse error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("empty configuration file")]
    Empty,

    #[error("validation failed: {}", format_violations(.0))]
    Validation(Vec<Violation>),
}

fn format_violations(violations: &[Violation]) -> String {
    violations
        .iter()
        .map(|v| v.to_string())
        .collect::<Vec<_>>()
        .join(", ")
}

/// Load a declarative document from a YAML or JSON file.
pub fn load_document(path: &Path) -> Result<DeployDoc, ConfigError> {
    let content = fs::read_to_string(path)?;
    if content.trim().is_empty() {
        return Err(ConfigError::Empty);
    }

    let doc: DeployDoc = match path.extension().and_then(|e| e.to_str()) {
        Some("json") => serde_json::from_str(&content)?,
        _ => serde_yaml::from_str(&content)?,
    };

    tracing::debug!(
        path = %path.display(),
        checks = doc.healthchecks.len(),
        templates = doc.templates.len(),
        "Configuration loaded"
    );

    Ok(doc)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn loads_yaml_document() {
        let mut file = tempfile::NamedTempFile::with_suffix(".yaml").unwrap();
        write!(
            file,
            "version: \"1.0\"\nhealthchecks:\n  - name: api\n    type: http\n    url: https://example.com\n"
        )
        .unwrap();

        let doc = load_document(file.path()).unwrap();
        assert_eq!(doc.version, "1.0");
        assert_eq!(doc.healthchecks.len(), 1);
    }

    #[test]
    fn rejects_empty_document() {
        let file = tempfile::NamedTempFile::with_suffix(".yaml").unwrap();
        assert!(matches!(
            load_document(file.path()),
            Err(ConfigError::Empty)
        ));
    }

    #[test]
    fn rejects_unknown_top_level_key() {
        let mut file = tempfile::NamedTempFile::with_suffix(".yaml").unwrap();
        write!(file, "version: \"1.0\"\nhealth_checks: []\n").unwrap();
        assert!(matches!(
            load_document(file.path()),
            Err(ConfigError::Yaml(_))
        ));
    }
}
