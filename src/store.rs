use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use camino::Utf8Path;
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value;
use tempfile::Builder;

use crate::error::CometxError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum WriteOutcome {
    Written,
    Skipped,
}

#[derive(Debug, Clone, Copy)]
pub struct Store {
    overwrite: bool,
}

impl Store {
    pub fn new(overwrite: bool) -> Self {
        Self { overwrite }
    }

    pub fn skips(&self, path: &Utf8Path) -> bool {
        !self.overwrite && path.as_std_path().exists()
    }

    pub fn persist_with<F>(&self, path: &Utf8Path, fill: F) -> Result<WriteOutcome, CometxError>
    where
        F: FnOnce(&Path) -> Result<(), CometxError>,
    {
        if self.skips(path) {
            tracing::debug!(path = %path, "keeping existing file");
            return Ok(WriteOutcome::Skipped);
        }
        let parent = path
            .parent()
            .ok_or_else(|| CometxError::Filesystem(format!("invalid destination {path}")))?;
        fs::create_dir_all(parent.as_std_path())
            .map_err(|err| CometxError::Filesystem(err.to_string()))?;
        let temp = Builder::new()
            .prefix(".cometx-")
            .tempfile_in(parent.as_std_path())
            .map_err(|err| CometxError::Filesystem(err.to_string()))?;
        fill(temp.path())?;
        temp.persist(path.as_std_path())
            .map_err(|err| CometxError::Filesystem(err.to_string()))?;
        Ok(WriteOutcome::Written)
    }

    pub fn write_bytes(
        &self,
        path: &Utf8Path,
        content: &[u8],
    ) -> Result<WriteOutcome, CometxError> {
        self.persist_with(path, |temp| {
            fs::write(temp, content).map_err(|err| CometxError::Filesystem(err.to_string()))
        })
    }

    pub fn write_text(&self, path: &Utf8Path, content: &str) -> Result<WriteOutcome, CometxError> {
        self.write_bytes(path, content.as_bytes())
    }

    pub fn write_json<T: Serialize + ?Sized>(
        &self,
        path: &Utf8Path,
        value: &T,
    ) -> Result<WriteOutcome, CometxError> {
        let content = serde_json::to_vec_pretty(value)
            .map_err(|err| CometxError::Filesystem(err.to_string()))?;
        self.write_bytes(path, &content)
    }

    pub fn write_jsonl<T: Serialize>(
        &self,
        path: &Utf8Path,
        records: &[T],
    ) -> Result<WriteOutcome, CometxError> {
        let mut content = Vec::new();
        for record in records {
            serde_json::to_writer(&mut content, record)
                .map_err(|err| CometxError::Filesystem(err.to_string()))?;
            content
                .write_all(b"\n")
                .map_err(|err| CometxError::Filesystem(err.to_string()))?;
        }
        self.write_bytes(path, &content)
    }
}

pub fn read_json(path: &Path) -> Result<Value, CometxError> {
    let content =
        fs::read_to_string(path).map_err(|err| CometxError::Filesystem(err.to_string()))?;
    serde_json::from_str(&content).map_err(|err| CometxError::MalformedRecord {
        file: path.display().to_string(),
        message: err.to_string(),
    })
}

pub fn read_jsonl<T: DeserializeOwned>(path: &Path) -> Result<Vec<T>, CometxError> {
    let content =
        fs::read_to_string(path).map_err(|err| CometxError::Filesystem(err.to_string()))?;
    content
        .lines()
        .enumerate()
        .filter(|(_, line)| !line.trim().is_empty())
        .map(|(index, line)| {
            serde_json::from_str(line).map_err(|err| CometxError::MalformedRecord {
                file: path.display().to_string(),
                message: format!("line {}: {err}", index + 1),
            })
        })
        .collect()
}

pub fn walk_files(root: &Path) -> Result<Vec<PathBuf>, CometxError> {
    let mut files = Vec::new();
    let mut stack = vec![root.to_path_buf()];
    while let Some(path) = stack.pop() {
        let entries = fs::read_dir(&path).map_err(|err| CometxError::Filesystem(err.to_string()))?;
        for entry in entries {
            let entry = entry.map_err(|err| CometxError::Filesystem(err.to_string()))?;
            let path = entry.path();
            if path.is_dir() {
                stack.push(path);
            } else {
                files.push(path);
            }
        }
    }
    files.sort();
    Ok(files)
}
