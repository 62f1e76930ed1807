//! JSONL export of generated datasets.
//!
//! Each export format is a JSON template; every string inside it may carry
//! `{question}` and `{answer}` placeholders, substituted recursively for each
//! pair. One rendered object per line.

use crate::generation::QAPair;
use crate::project::{ProjectStore, StoreError};
use serde_json::{Value, json};
use std::fs;
use std::path::PathBuf;
use thiserror::Error;

/// Errors raised while exporting a dataset.
#[derive(Debug, Error)]
pub enum ExportError {
    /// The requested format has no template.
    #[error("format '{0}' not supported")]
    UnknownFormat(String),
    /// The project has no generated result list yet.
    #[error("no QA pairs found for project '{0}'; run generation first")]
    NoData(String),
    /// Storage access failed.
    #[error(transparent)]
    Store(#[from] StoreError),
    /// Writing the export file failed.
    #[error("failed to write export file: {0}")]
    Io(#[from] std::io::Error),
}

/// Names of the built-in export formats.
pub fn available_formats() -> Vec<&'static str> {
    vec!["alpaca", "sharegpt", "qa"]
}

fn format_template(format: &str) -> Option<Value> {
    match format {
        "alpaca" => Some(json!({
            "instruction": "{question}",
            "input": "",
            "output": "{answer}",
        })),
        "sharegpt" => Some(json!({
            "conversations": [
                { "from": "human", "value": "{question}" },
                { "from": "gpt", "value": "{answer}" },
            ],
        })),
        "qa" => Some(json!({
            "question": "{question}",
            "answer": "{answer}",
        })),
        _ => None,
    }
}

/// Render the project's result list through the named template and write
/// `export_<format>.jsonl` into the project directory.
pub fn export_dataset(
    store: &ProjectStore,
    project: &str,
    format: &str,
) -> Result<PathBuf, ExportError> {
    let template =
        format_template(format).ok_or_else(|| ExportError::UnknownFormat(format.to_string()))?;
    let pairs = store
        .load_qa_pairs(project)
        .map_err(|_| ExportError::NoData(project.to_string()))?;

    let mut lines = String::new();
    for pair in &pairs {
        let rendered = render(&template, pair);
        lines.push_str(&rendered.to_string());
        lines.push('\n');
    }

    let path = store
        .project_dir(project)
        .join(format!("export_{format}.jsonl"));
    fs::write(&path, lines)?;
    tracing::info!(project, format, pairs = pairs.len(), "Dataset exported");
    Ok(path)
}

/// Recursively substitute `{question}`/`{answer}` into every template string.
fn render(template: &Value, pair: &QAPair) -> Value {
    match template {
        Value::String(text) => Value::String(
            text.replace("{question}", &pair.question)
                .replace("{answer}", &pair.answer),
        ),
        Value::Object(map) => Value::Object(
            map.iter()
                .map(|(key, value)| (key.clone(), render(value, pair)))
                .collect(),
        ),
        Value::Array(items) => Value::Array(items.iter().map(|item| render(item, pair)).collect()),
        other => other.clone(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pair() -> QAPair {
        QAPair {
            question: "What divides?".into(),
            answer: "Cells do.".into(),
            chunk_id: 0,
        }
    }

    #[test]
    fn alpaca_template_substitutes_fields() {
        let rendered = render(&format_template("alpaca").unwrap(), &pair());
        assert_eq!(rendered["instruction"], "What divides?");
        assert_eq!(rendered["output"], "Cells do.");
        assert_eq!(rendered["input"], "");
    }

    #[test]
    fn sharegpt_template_nests_conversations() {
        let rendered = render(&format_template("sharegpt").unwrap(), &pair());
        assert_eq!(rendered["conversations"][0]["value"], "What divides?");
        assert_eq!(rendered["conversations"][1]["value"], "Cells do.");
    }

    #[test]
    fn unknown_format_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let store = ProjectStore::new(dir.path()).unwrap();
        store.create_project("p").unwrap();
        assert!(matches!(
            export_dataset(&store, "p", "nope"),
            Err(ExportError::UnknownFormat(_))
        ));
    }

    #[test]
    fn export_writes_one_line_per_pair() {
        let dir = tempfile::tempdir().unwrap();
        let store = ProjectStore::new(dir.path()).unwrap();
        store.create_project("p").unwrap();
        store
            .save_qa_pairs("p", &[pair(), pair()])
            .unwrap();

        let path = export_dataset(&store, "p", "qa").unwrap();
        let content = std::fs::read_to_string(path).unwrap();
        assert_eq!(content.lines().count(), 2);
        for line in content.lines() {
            let value: Value = serde_json::from_str(line).unwrap();
            assert_eq!(value["question"], "What divides?");
        }
    }

    #[test]
    fn missing_results_are_a_caller_error() {
        let dir = tempfile::tempdir().unwrap();
        let store = ProjectStore::new(dir.path()).unwrap();
        store.create_project("p").unwrap();
        assert!(matches!(
            export_dataset(&store, "p", "alpaca"),
            Err(ExportError::NoData(_))
        ));
    }
}
