//! ToFile: appends every data message to a file as one JSON line.

use crate::block::{Block, Capabilities};
use crate::error::{BlockError, Result};
use crate::message::Payload;
use crate::rule::{merge_rule, require_str, Rule};
use serde_json::json;
use std::fs::File;
use std::io::{BufWriter, Write};

/// Sink block writing JSON lines to the file named by its `Filename` rule.
///
/// No file is open until the first successful set-rule; data arriving before
/// that is a recoverable per-message error.
pub struct ToFile {
    rule: Rule,
    writer: Option<BufWriter<File>>,
}

impl ToFile {
    pub fn new() -> Self {
        Self {
            rule: Rule::new(),
            writer: None,
        }
    }
}

impl Default for ToFile {
    fn default() -> Self {
        Self::new()
    }
}

impl Block for ToFile {
    fn kind(&self) -> &'static str {
        "to-file"
    }

    fn capabilities(&self) -> Capabilities {
        Capabilities {
            sink: true,
            rule_bound: true,
            ..Capabilities::default()
        }
    }

    fn setup(&mut self) -> Result<()> {
        self.rule.insert("Filename".to_string(), json!(""));
        Ok(())
    }

    fn set_rule(&mut self, update: &Payload) -> Result<()> {
        // Open the new file before touching the rule, so a bad path leaves
        // both the rule and the current writer in effect.
        if update.contains_key("Filename") {
            let path = require_str(update, "Filename")?;
            let file = File::create(path)
                .map_err(|e| BlockError::Rule(format!("cannot open '{}': {}", path, e)))?;
            if let Some(mut old) = self.writer.replace(BufWriter::new(file)) {
                let _ = old.flush();
            }
            tracing::info!(path = %path, "file sink opened");
        }
        merge_rule(&mut self.rule, update);
        Ok(())
    }

    fn rule(&self) -> Rule {
        self.rule.clone()
    }

    fn write_external(&mut self, payload: &Payload) -> Result<()> {
        let writer = self
            .writer
            .as_mut()
            .ok_or_else(|| BlockError::Message("no file open; set Filename first".to_string()))?;
        serde_json::to_writer(&mut *writer, payload)?;
        writer.write_all(b"\n")?;
        Ok(())
    }

    fn tidy_up(&mut self) -> Result<()> {
        if let Some(mut writer) = self.writer.take() {
            writer.flush()?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn map(v: serde_json::Value) -> Payload {
        v.as_object().unwrap().clone()
    }

    #[test]
    fn test_writes_json_lines() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out.jsonl");

        let mut sink = ToFile::new();
        sink.setup().unwrap();
        sink.set_rule(&map(json!({"Filename": path.to_str().unwrap()})))
            .unwrap();
        sink.write_external(&map(json!({"n": 1}))).unwrap();
        sink.write_external(&map(json!({"n": 2}))).unwrap();
        sink.tidy_up().unwrap();

        let text = std::fs::read_to_string(&path).unwrap();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines.len(), 2);
        assert_eq!(
            serde_json::from_str::<serde_json::Value>(lines[0]).unwrap(),
            json!({"n": 1})
        );
    }

    #[test]
    fn test_write_before_rule_is_recoverable() {
        let mut sink = ToFile::new();
        sink.setup().unwrap();
        let err = sink.write_external(&map(json!({"n": 1}))).unwrap_err();
        assert!(err.to_string().contains("no file open"));
    }

    #[test]
    fn test_bad_path_keeps_old_writer() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out.jsonl");

        let mut sink = ToFile::new();
        sink.setup().unwrap();
        sink.set_rule(&map(json!({"Filename": path.to_str().unwrap()})))
            .unwrap();
        let bad = dir.path().join("no/such/dir/out.jsonl");
        assert!(sink
            .set_rule(&map(json!({"Filename": bad.to_str().unwrap()})))
            .is_err());

        // The old rule and file are still in effect.
        assert_eq!(sink.rule()["Filename"], json!(path.to_str().unwrap()));
        sink.write_external(&map(json!({"n": 3}))).unwrap();
        sink.tidy_up().unwrap();
        assert!(std::fs::read_to_string(&path).unwrap().contains("\"n\":3"));
    }
}
