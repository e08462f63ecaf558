use std::collections::BTreeSet;
use std::fs;
use std::path::PathBuf;

use camino::{Utf8Path, Utf8PathBuf};
use serde::Serialize;
use serde_json::Value;

use crate::app::ResourceFailure;
use crate::comet::{AssetInfo, AssetUpload, CometClient, MetricRecord, TextDocument};
use crate::domain::ResourceKind;
use crate::error::CometxError;
use crate::fs_util::zip_single;
use crate::layout::{FLAT_CODE_PREFIX, LayoutMode, MirrorFile};
use crate::store::{read_json, read_jsonl, walk_files};

const CODE_ASSET_TYPE: &str = "source_code";

#[derive(Debug, Clone, Serialize)]
pub struct ReplayReport {
    pub experiment_key: String,
    pub folder: String,
    pub logged: Vec<ResourceKind>,
    pub failures: Vec<ResourceFailure>,
}

fn locate(folder: &Utf8Path, file: &MirrorFile) -> Option<Utf8PathBuf> {
    [LayoutMode::Hierarchical, LayoutMode::Flat]
        .into_iter()
        .map(|mode| folder.join(file.relative(mode)))
        .find(|path| path.as_std_path().is_file())
}

fn read_text(path: &Utf8Path) -> Result<String, CometxError> {
    fs::read_to_string(path.as_std_path())
        .map_err(|err| CometxError::Filesystem(format!("read {path}: {err}")))
}

fn metric_files(folder: &Utf8Path) -> Result<Vec<PathBuf>, CometxError> {
    let is_series = |path: &PathBuf| {
        path.file_name()
            .and_then(|name| name.to_str())
            .is_some_and(|name| name.starts_with("metric_") && name.ends_with(".jsonl"))
    };
    let mut files = Vec::new();
    let split_dir = folder.join("metrics");
    if split_dir.as_std_path().is_dir() {
        files.extend(walk_files(split_dir.as_std_path())?.into_iter().filter(is_series));
    }
    if let Ok(entries) = fs::read_dir(folder.as_std_path()) {
        let mut flat: Vec<PathBuf> = entries
            .filter_map(Result::ok)
            .map(|entry| entry.path())
            .filter(|path| path.is_file() && is_series(path))
            .collect();
        flat.sort();
        files.extend(flat);
    }
    let single = folder.join("metrics.jsonl");
    if single.as_std_path().is_file() {
        files.push(single.into_std_path_buf());
    }
    Ok(files)
}

fn code_files(folder: &Utf8Path) -> Result<Vec<(PathBuf, String)>, CometxError> {
    let code_dir = folder.join("run").join("code");
    if code_dir.as_std_path().is_dir() {
        return walk_files(code_dir.as_std_path())?
            .into_iter()
            .map(|path| {
                let name = path
                    .strip_prefix(code_dir.as_std_path())
                    .map_err(|err| CometxError::Filesystem(err.to_string()))?
                    .to_string_lossy()
                    .replace('\\', "/");
                Ok((path, name))
            })
            .collect();
    }
    let Ok(entries) = fs::read_dir(folder.as_std_path()) else {
        return Ok(Vec::new());
    };
    let mut files: Vec<(PathBuf, String)> = entries
        .filter_map(Result::ok)
        .map(|entry| entry.path())
        .filter(|path| path.is_file())
        .filter_map(|path| {
            let name = path
                .file_name()?
                .to_str()?
                .strip_prefix(FLAT_CODE_PREFIX)?
                .to_string();
            Some((path, name))
        })
        .collect();
    files.sort();
    Ok(files)
}

pub fn name_and_value(record: &Value) -> Option<(&str, Value)> {
    let name = record.get("name").and_then(Value::as_str)?;
    let value = record
        .get("valueCurrent")
        .or_else(|| record.get("value"))
        .cloned()
        .unwrap_or(Value::Null);
    Some((name, value))
}

pub struct Replayer<'a, C: CometClient + ?Sized> {
    client: &'a C,
    experiment_key: &'a str,
    folder: &'a Utf8Path,
    skip_system_metrics: bool,
}

impl<'a, C: CometClient + ?Sized> Replayer<'a, C> {
    pub fn new(client: &'a C, experiment_key: &'a str, folder: &'a Utf8Path) -> Self {
        Self {
            client,
            experiment_key,
            folder,
            skip_system_metrics: false,
        }
    }

    pub fn replay(mut self, kinds: &BTreeSet<ResourceKind>) -> Result<ReplayReport, CometxError> {
        self.skip_system_metrics = !kinds.contains(&ResourceKind::System);
        let mut report = ReplayReport {
            experiment_key: self.experiment_key.to_string(),
            folder: self.folder.to_string(),
            logged: Vec::new(),
            failures: Vec::new(),
        };
        for kind in kinds.iter().copied().filter(|kind| ResourceKind::EXPERIMENT.contains(kind)) {
            match self.replay_kind(kind) {
                Ok(true) => report.logged.push(kind),
                Ok(false) => {}
                Err(err) if err.is_fatal() => return Err(err),
                Err(err) => {
                    tracing::warn!(
                        experiment = self.experiment_key,
                        resource = %kind,
                        error = %err,
                        "replay failed"
                    );
                    report
                        .failures
                        .push(ResourceFailure::new(self.experiment_key, kind, &err));
                }
            }
        }
        Ok(report)
    }

    fn replay_kind(&self, kind: ResourceKind) -> Result<bool, CometxError> {
        match kind {
            ResourceKind::Metadata => self.metadata(),
            ResourceKind::Parameters => self.named_values(MirrorFile::Parameters, false),
            ResourceKind::Others => self.named_values(MirrorFile::Others, true),
            ResourceKind::Metrics => self.metrics(),
            ResourceKind::Html => self.text(MirrorFile::Html, TextDocument::Html),
            ResourceKind::Output => self.text(MirrorFile::Output, TextDocument::Output),
            ResourceKind::Requirements => {
                self.text(MirrorFile::Requirements, TextDocument::Requirements)
            }
            ResourceKind::Graph => self.text(MirrorFile::Graph, TextDocument::Graph),
            ResourceKind::System => self.system(),
            ResourceKind::Assets => self.assets(),
            ResourceKind::Code => self.code(),
            ResourceKind::Git => self.git(),
            ResourceKind::ProjectMetadata
            | ResourceKind::Artifacts
            | ResourceKind::ModelRegistry => Ok(false),
        }
    }

    fn metadata(&self) -> Result<bool, CometxError> {
        let Some(path) = locate(self.folder, &MirrorFile::Metadata) else {
            return Ok(false);
        };
        let metadata = read_json(path.as_std_path())?;
        let tags: Vec<String> = metadata
            .get("tags")
            .and_then(Value::as_array)
            .map(|tags| {
                tags.iter()
                    .filter_map(Value::as_str)
                    .map(str::to_string)
                    .collect()
            })
            .unwrap_or_default();
        if !tags.is_empty() {
            self.client.add_tags(self.experiment_key, &tags)?;
        }
        if let Some(file_name) = metadata.get("fileName").and_then(Value::as_str) {
            self.client.set_file_name(self.experiment_key, file_name)?;
        }
        Ok(true)
    }

    fn named_values(&self, file: MirrorFile, jsonl: bool) -> Result<bool, CometxError> {
        let Some(path) = locate(self.folder, &file) else {
            return Ok(false);
        };
        let records: Vec<Value> = if jsonl {
            read_jsonl(path.as_std_path())?
        } else {
            match read_json(path.as_std_path())? {
                Value::Array(items) => items,
                other => vec![other],
            }
        };
        for record in &records {
            let Some((name, value)) = name_and_value(record) else {
                continue;
            };
            if jsonl {
                self.client.log_other(self.experiment_key, name, &value)?;
            } else {
                self.client.log_parameter(self.experiment_key, name, &value)?;
            }
        }
        Ok(true)
    }

    fn metrics(&self) -> Result<bool, CometxError> {
        let files = metric_files(self.folder)?;
        if files.is_empty() {
            return Ok(false);
        }
        let mut logged = 0usize;
        for file in files {
            for metric in read_jsonl::<MetricRecord>(&file)? {
                if self.skip_system_metrics && metric.metric_name.starts_with("sys.") {
                    continue;
                }
                self.client.log_metric(self.experiment_key, &metric)?;
                logged += 1;
            }
        }
        tracing::debug!(experiment = self.experiment_key, logged, "replayed metrics");
        Ok(true)
    }

    fn text(&self, file: MirrorFile, document: TextDocument) -> Result<bool, CometxError> {
        let Some(path) = locate(self.folder, &file) else {
            return Ok(false);
        };
        let text = read_text(&path)?;
        self.client.log_text(self.experiment_key, document, &text)?;
        Ok(true)
    }

    fn system(&self) -> Result<bool, CometxError> {
        let Some(path) = locate(self.folder, &MirrorFile::SystemDetails) else {
            return Ok(false);
        };
        let details = read_json(path.as_std_path())?;
        self.client.log_system_details(self.experiment_key, &details)?;
        Ok(true)
    }

    fn assets(&self) -> Result<bool, CometxError> {
        let Some(index) = locate(self.folder, &MirrorFile::AssetsIndex) else {
            return Ok(false);
        };
        for asset in read_jsonl::<AssetInfo>(index.as_std_path())? {
            if asset.asset_type() == CODE_ASSET_TYPE {
                continue;
            }
            let file = MirrorFile::Asset {
                asset_type: asset.asset_type().to_string(),
                file_name: asset.file_name.clone(),
            };
            let Some(path) = locate(self.folder, &file) else {
                tracing::warn!(
                    experiment = self.experiment_key,
                    file = %asset.file_name,
                    "asset listed in index but missing on disk"
                );
                continue;
            };
            let metadata = asset
                .metadata
                .as_deref()
                .and_then(|raw| serde_json::from_str::<Value>(raw).ok());
            self.client.upload_asset(
                self.experiment_key,
                &AssetUpload {
                    path: path.as_std_path(),
                    file_name: asset.log_as_file_name.as_deref().unwrap_or(&asset.file_name),
                    asset_type: asset.asset_type(),
                    step: asset.step,
                    epoch: asset.epoch,
                    metadata: metadata.as_ref(),
                },
            )?;
        }
        Ok(true)
    }

    fn code(&self) -> Result<bool, CometxError> {
        let files = code_files(self.folder)?;
        if files.is_empty() {
            return Ok(false);
        }
        for (path, name) in files {
            let code = fs::read_to_string(&path).map_err(|err| {
                CometxError::Filesystem(format!("read {}: {err}", path.display()))
            })?;
            self.client.log_code(self.experiment_key, &name, &code)?;
        }
        Ok(true)
    }

    fn git(&self) -> Result<bool, CometxError> {
        let mut found = false;
        if let Some(path) = locate(self.folder, &MirrorFile::GitMetadata) {
            let metadata = read_json(path.as_std_path())?;
            self.client.log_git_metadata(self.experiment_key, &metadata)?;
            found = true;
        }
        if let Some(path) = locate(self.folder, &MirrorFile::GitPatch) {
            let patch = fs::read(path.as_std_path())
                .map_err(|err| CometxError::Filesystem(format!("read {path}: {err}")))?;
            let zipped = zip_single("git_diff.patch", &patch)?;
            self.client.upload_git_patch(self.experiment_key, &zipped)?;
            found = true;
        }
        Ok(found)
    }
}
