use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::process::Command;
use std::time::{Duration, Instant};

use camino::{Utf8Path, Utf8PathBuf};
use clap::ValueEnum;
use serde::Serialize;
use serde_json::Value;

use crate::comet::{
    AssetUpload, CometClient, ExperimentInfo, JsonDocument, MetricRecord, TextDocument,
};
use crate::copy::{CopyPlan, plan_local, plan_remote, validate_scopes};
use crate::domain::{
    CometPath, Granularity, Identifier, KeyValue, LogType, RegistryKind, RegistryPath,
    ResourceKind, ResourceName, asset_type_for_file, select_resources,
};
use crate::error::CometxError;
use crate::fs_util::{extract_zip, unzip_first_entry};
use crate::layout::{
    LayoutMode, MirrorFile, MirrorLayout, NamingMode, PROJECT_METADATA_FILE, assign_folders,
};
use crate::replay::{Replayer, name_and_value};
use crate::store::{Store, WriteOutcome, read_json, read_jsonl, walk_files};

const CODE_ASSET_TYPE: &str = "source_code";
const DEFAULT_SCRIPT: &str = "script.py";
const REPRODUCE_SCRIPT: &str = "script.sh";

#[derive(Debug, Clone)]
pub struct ProgressEvent {
    pub message: String,
    pub elapsed: Option<Duration>,
}

pub trait ProgressSink {
    fn event(&self, event: ProgressEvent);
}

pub trait Confirmer {
    fn confirm(&self, prompt: &str) -> Result<bool, CometxError>;
}

fn phase(sink: &dyn ProgressSink, message: impl Into<String>) {
    sink.event(ProgressEvent {
        message: message.into(),
        elapsed: None,
    });
}

fn confirm(
    force: bool,
    prompt: &str,
    confirmer: Option<&dyn Confirmer>,
) -> Result<(), CometxError> {
    if force {
        return Ok(());
    }
    match confirmer {
        None => Err(CometxError::ConfirmationRequired),
        Some(confirmer) if confirmer.confirm(prompt)? => Ok(()),
        Some(_) => Err(CometxError::Cancelled),
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ResourceFailure {
    pub experiment: String,
    pub resource: String,
    pub message: String,
}

impl ResourceFailure {
    pub fn new(experiment: &str, kind: ResourceKind, err: &CometxError) -> Self {
        Self {
            experiment: experiment.to_string(),
            resource: kind.to_string(),
            message: err.to_string(),
        }
    }
}

fn record_failure(
    failures: &mut Vec<ResourceFailure>,
    experiment: &str,
    resource: &str,
    err: CometxError,
) -> Result<(), CometxError> {
    if err.is_fatal() {
        return Err(err);
    }
    let err = CometxError::ResourceFetch {
        experiment: experiment.to_string(),
        resource: resource.to_string(),
        message: err.to_string(),
    };
    tracing::warn!(error = %err, "continuing after failure");
    failures.push(ResourceFailure {
        experiment: experiment.to_string(),
        resource: resource.to_string(),
        message: err.to_string(),
    });
    Ok(())
}

#[derive(Debug, Clone, Serialize)]
pub struct ListResult {
    pub path: String,
    pub kind: String,
    pub items: Vec<ListEntry>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ListEntry {
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub key: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub project: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub versions: Vec<String>,
}

impl ListEntry {
    fn named(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            key: None,
            project: None,
            description: None,
            versions: Vec::new(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct DownloadOptions {
    pub output: Utf8PathBuf,
    pub resources: Vec<ResourceName>,
    pub ignore: Vec<ResourceName>,
    pub flat: bool,
    pub use_name: bool,
    pub overwrite: bool,
    pub force: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct DownloadResult {
    pub root: String,
    pub resources: Vec<ResourceKind>,
    pub experiments: Vec<DownloadedExperiment>,
    pub registries: Vec<RegistryDownload>,
    pub written: usize,
    pub skipped: usize,
    pub failures: Vec<ResourceFailure>,
    pub finished_at: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct DownloadedExperiment {
    pub workspace: String,
    pub project: String,
    pub experiment_key: String,
    pub folder: String,
    pub written: usize,
    pub skipped: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct RegistryDownload {
    pub kind: String,
    pub name: String,
    pub version: String,
    pub path: String,
    pub files: usize,
    pub skipped: bool,
}

#[derive(Debug, Clone)]
pub struct CopyOptions {
    pub symlink: bool,
    pub ignore: Vec<ResourceName>,
    pub root: Utf8PathBuf,
}

#[derive(Debug, Clone, Serialize)]
pub struct CopyResult {
    pub source: String,
    pub destination: String,
    pub symlink: bool,
    pub created_projects: Vec<String>,
    pub experiments: Vec<CopiedExperiment>,
    pub failures: Vec<ResourceFailure>,
}

#[derive(Debug, Clone, Serialize)]
pub struct CopiedExperiment {
    pub source: String,
    pub destination_project: String,
    pub destination_key: String,
    pub logged: Vec<ResourceKind>,
}

#[derive(Debug, Clone, Default)]
pub struct LogOptions {
    pub file: Option<Utf8PathBuf>,
    pub log_type: Option<LogType>,
    pub set: Vec<KeyValue>,
}

#[derive(Debug, Clone, Serialize)]
pub struct LogResult {
    pub log_type: String,
    pub experiments: Vec<String>,
    pub logged: usize,
    pub failures: Vec<ResourceFailure>,
}

#[derive(Debug, Clone, Serialize)]
pub struct DeleteAssetsResult {
    pub asset_type: String,
    pub experiments: usize,
    pub deleted: usize,
    pub failures: Vec<ResourceFailure>,
}

#[derive(Debug, Clone)]
pub struct ReproduceOptions {
    pub output: Utf8PathBuf,
    pub run: bool,
    pub executable: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct ReproduceResult {
    pub experiment_key: String,
    pub output_dir: String,
    pub script: String,
    pub ran: bool,
    pub failures: Vec<ResourceFailure>,
}

#[derive(Debug, Default, Clone, Copy)]
struct Tally {
    written: usize,
    skipped: usize,
}

impl Tally {
    fn add(&mut self, outcome: WriteOutcome) {
        match outcome {
            WriteOutcome::Written => self.written += 1,
            WriteOutcome::Skipped => self.skipped += 1,
        }
    }
}

struct Target<'a> {
    workspace: &'a str,
    project: &'a str,
    key: &'a str,
    folder: &'a str,
}

impl Target<'_> {
    fn path(&self, layout: &MirrorLayout, file: &MirrorFile) -> Utf8PathBuf {
        layout.file_path(self.workspace, self.project, self.folder, file)
    }
}

fn script_file_name(metadata: Option<&Value>) -> String {
    metadata
        .and_then(|value| value.get("fileName"))
        .and_then(Value::as_str)
        .and_then(|name| Utf8Path::new(&name.replace('\\', "/")).file_name().map(str::to_string))
        .filter(|name| !name.is_empty())
        .unwrap_or_else(|| DEFAULT_SCRIPT.to_string())
}

fn shell_quote(value: &str) -> String {
    format!("'{}'", value.replace('\'', r"'\''"))
}

fn files_under(path: &Utf8Path) -> Result<Vec<(Utf8PathBuf, String)>, CometxError> {
    if path.as_std_path().is_dir() {
        walk_files(path.as_std_path())?
            .into_iter()
            .map(|file| {
                let file = Utf8PathBuf::from_path_buf(file).map_err(|file| {
                    CometxError::Filesystem(format!("non-UTF-8 path {}", file.display()))
                })?;
                let name = file
                    .strip_prefix(path)
                    .map_err(|err| CometxError::Filesystem(err.to_string()))?
                    .to_string();
                Ok((file, name))
            })
            .collect()
    } else if path.as_std_path().is_file() {
        let name = path.file_name().unwrap_or(path.as_str()).to_string();
        Ok(vec![(path.to_path_buf(), name)])
    } else {
        Err(CometxError::NotFound(path.to_string()))
    }
}

fn log_type_name(log_type: LogType) -> String {
    log_type
        .to_possible_value()
        .map(|value| value.get_name().to_string())
        .unwrap_or_default()
}

#[derive(Clone)]
pub struct App<C: CometClient> {
    client: C,
    default_workspace: Option<String>,
}

impl<C: CometClient> App<C> {
    pub fn new(client: C, default_workspace: Option<String>) -> Self {
        Self {
            client,
            default_workspace,
        }
    }

    pub fn client(&self) -> &C {
        &self.client
    }

    fn scope_or_default(&self, path: Option<&Identifier>) -> Result<Identifier, CometxError> {
        match path {
            Some(identifier) => Ok(identifier.clone()),
            None => self
                .default_workspace
                .as_deref()
                .map(Identifier::workspace)
                .ok_or(CometxError::MissingWorkspace),
        }
    }

    fn resolve_experiments(
        &self,
        scope: &Identifier,
    ) -> Result<Vec<(String, ExperimentInfo)>, CometxError> {
        let projects = match scope.project_name() {
            Some(project) => vec![project.to_string()],
            None => {
                let mut names: Vec<String> = self
                    .client
                    .projects(&scope.workspace)?
                    .into_iter()
                    .map(|project| project.project_name)
                    .filter(|name| scope.matches_project(name))
                    .collect();
                names.sort();
                names
            }
        };

        let mut matched = Vec::new();
        for project in projects {
            let mut experiments = self.client.experiments(&scope.workspace, &project)?;
            experiments.sort_by(|a, b| a.experiment_key.cmp(&b.experiment_key));
            matched.extend(
                experiments
                    .into_iter()
                    .filter(|experiment| {
                        scope.matches_experiment(
                            &experiment.experiment_key,
                            experiment.experiment_name.as_deref(),
                        )
                    })
                    .map(|experiment| (project.clone(), experiment)),
            );
        }
        Ok(matched)
    }

    pub fn list(
        &self,
        path: Option<&CometPath>,
        sink: &dyn ProgressSink,
    ) -> Result<ListResult, CometxError> {
        phase(sink, "phase=Resolve; listing");
        let Some(path) = path else {
            let items = self
                .client
                .workspaces()?
                .into_iter()
                .map(ListEntry::named)
                .collect();
            return Ok(ListResult {
                path: String::new(),
                kind: "workspaces".to_string(),
                items,
            });
        };

        match path {
            CometPath::Registry(registry) => {
                let entries = match registry.kind {
                    RegistryKind::Artifacts => self.client.artifacts(&registry.workspace)?,
                    RegistryKind::Models => self.client.models(&registry.workspace)?,
                };
                let items = entries
                    .into_iter()
                    .filter(|entry| registry.matches_name(&entry.name))
                    .map(|entry| ListEntry {
                        versions: entry.versions,
                        ..ListEntry::named(entry.name)
                    })
                    .collect();
                Ok(ListResult {
                    path: format!("{}/{}", registry.workspace, registry.kind.segment()),
                    kind: registry.kind.segment().to_string(),
                    items,
                })
            }
            CometPath::Scope(scope)
                if scope.project_name().is_none() && scope.experiment.is_none() =>
            {
                let items = self
                    .client
                    .projects(&scope.workspace)?
                    .into_iter()
                    .filter(|project| scope.matches_project(&project.project_name))
                    .map(|project| ListEntry {
                        description: project.project_description.filter(|text| !text.is_empty()),
                        ..ListEntry::named(project.project_name)
                    })
                    .collect();
                Ok(ListResult {
                    path: scope.to_string(),
                    kind: "projects".to_string(),
                    items,
                })
            }
            CometPath::Scope(scope) => {
                let items = self
                    .resolve_experiments(scope)?
                    .into_iter()
                    .map(|(project, experiment)| ListEntry {
                        key: Some(experiment.experiment_key.clone()),
                        project: Some(project),
                        ..ListEntry::named(
                            experiment
                                .experiment_name
                                .unwrap_or(experiment.experiment_key),
                        )
                    })
                    .collect();
                Ok(ListResult {
                    path: scope.to_string(),
                    kind: "experiments".to_string(),
                    items,
                })
            }
        }
    }

    pub fn download(
        &self,
        path: &CometPath,
        options: &DownloadOptions,
        sink: &dyn ProgressSink,
        confirmer: Option<&dyn Confirmer>,
    ) -> Result<DownloadResult, CometxError> {
        let started = Instant::now();
        let mode = if options.flat {
            LayoutMode::Flat
        } else {
            LayoutMode::Hierarchical
        };
        let layout = MirrorLayout::new(options.output.clone(), mode);
        let store = Store::new(options.overwrite);
        let mut result = DownloadResult {
            root: layout.root().to_string(),
            resources: Vec::new(),
            experiments: Vec::new(),
            registries: Vec::new(),
            written: 0,
            skipped: 0,
            failures: Vec::new(),
            finished_at: String::new(),
        };

        match path {
            CometPath::Registry(registry) => {
                let kind = match registry.kind {
                    RegistryKind::Artifacts => ResourceKind::Artifacts,
                    RegistryKind::Models => ResourceKind::ModelRegistry,
                };
                result.resources.push(kind);
                confirm(
                    options.force,
                    &format!("Download {} into {}?", registry.kind.segment(), layout.root()),
                    confirmer,
                )?;
                self.download_registries(registry, &layout, &store, sink, &mut result)?;
            }
            CometPath::Scope(scope) => {
                let kinds = select_resources(&options.resources, &options.ignore);
                result.resources = kinds.iter().copied().collect();
                phase(sink, format!("phase=Resolve; matching {scope}"));
                let experiments = self.resolve_experiments(scope)?;
                let registry_kinds: Vec<RegistryKind> = [
                    (ResourceKind::Artifacts, RegistryKind::Artifacts),
                    (ResourceKind::ModelRegistry, RegistryKind::Models),
                ]
                .into_iter()
                .filter(|(kind, _)| kinds.contains(kind))
                .map(|(_, registry)| registry)
                .collect();
                if !registry_kinds.is_empty() && scope.granularity() != Granularity::Workspace {
                    tracing::warn!(
                        scope = %scope,
                        "artifacts and model-registry are only downloaded for a whole workspace"
                    );
                }
                if experiments.is_empty() {
                    tracing::warn!(scope = %scope, "no experiments matched");
                }

                confirm(
                    options.force,
                    &format!(
                        "Download {} experiment(s) from {scope} into {}?",
                        experiments.len(),
                        layout.root()
                    ),
                    confirmer,
                )?;

                if kinds.contains(&ResourceKind::ProjectMetadata) {
                    let projects: BTreeSet<&str> =
                        experiments.iter().map(|(project, _)| project.as_str()).collect();
                    let projects = match scope.project_name() {
                        Some(project) => BTreeSet::from([project]),
                        None => projects,
                    };
                    for project in projects {
                        let outcome = self
                            .client
                            .project_details(&scope.workspace, project)
                            .and_then(|details| {
                                store.write_json(
                                    &layout.project_metadata_path(&scope.workspace, project),
                                    &details,
                                )
                            });
                        match outcome {
                            Ok(outcome) => match outcome {
                                WriteOutcome::Written => result.written += 1,
                                WriteOutcome::Skipped => result.skipped += 1,
                            },
                            Err(err) => record_failure(
                                &mut result.failures,
                                &format!("{}/{project}", scope.workspace),
                                ResourceKind::ProjectMetadata.as_str(),
                                err,
                            )?,
                        }
                    }
                }

                let naming = if options.use_name {
                    NamingMode::ByName
                } else {
                    NamingMode::ByKey
                };
                let folders = folder_names(&experiments, naming, mode);
                let total = experiments.len();
                for (index, (project, experiment)) in experiments.iter().enumerate() {
                    let key = experiment.experiment_key.as_str();
                    let folder = folders
                        .get(&(project.clone(), key.to_string()))
                        .map(String::as_str)
                        .unwrap_or(key);
                    phase(
                        sink,
                        format!(
                            "phase=Download; {}/{project}/{key} ({}/{total})",
                            scope.workspace,
                            index + 1
                        ),
                    );
                    let target = Target {
                        workspace: &scope.workspace,
                        project,
                        key,
                        folder,
                    };
                    let mut tally = Tally::default();
                    for kind in kinds
                        .iter()
                        .copied()
                        .filter(|kind| ResourceKind::EXPERIMENT.contains(kind))
                    {
                        if let Err(err) =
                            self.download_kind(&target, kind, &layout, &store, &mut tally)
                        {
                            record_failure(&mut result.failures, key, kind.as_str(), err)?;
                        }
                    }
                    result.written += tally.written;
                    result.skipped += tally.skipped;
                    result.experiments.push(DownloadedExperiment {
                        workspace: scope.workspace.clone(),
                        project: project.clone(),
                        experiment_key: key.to_string(),
                        folder: layout
                            .experiment_dir(&scope.workspace, project, folder)
                            .to_string(),
                        written: tally.written,
                        skipped: tally.skipped,
                    });
                }

                if scope.granularity() == Granularity::Workspace {
                    for kind in registry_kinds {
                        let registry = RegistryPath {
                            kind,
                            workspace: scope.workspace.clone(),
                            name: None,
                            version: None,
                        };
                        self.download_registries(&registry, &layout, &store, sink, &mut result)?;
                    }
                }
            }
        }

        result.finished_at = chrono::Utc::now().to_rfc3339();
        sink.event(ProgressEvent {
            message: format!(
                "phase=Store; {} written, {} skipped, {} failed",
                result.written,
                result.skipped,
                result.failures.len()
            ),
            elapsed: Some(started.elapsed()),
        });
        Ok(result)
    }

    fn download_kind(
        &self,
        target: &Target<'_>,
        kind: ResourceKind,
        layout: &MirrorLayout,
        store: &Store,
        tally: &mut Tally,
    ) -> Result<(), CometxError> {
        let key = target.key;
        match kind {
            ResourceKind::Metadata => self.write_json_document(
                target,
                JsonDocument::Metadata,
                MirrorFile::Metadata,
                layout,
                store,
                tally,
            ),
            ResourceKind::Parameters => self.write_json_document(
                target,
                JsonDocument::Parameters,
                MirrorFile::Parameters,
                layout,
                store,
                tally,
            ),
            ResourceKind::System => self.write_json_document(
                target,
                JsonDocument::SystemDetails,
                MirrorFile::SystemDetails,
                layout,
                store,
                tally,
            ),
            ResourceKind::Others => {
                if let Some(others) = self.client.experiment_json(key, JsonDocument::Others)? {
                    let records = match others {
                        Value::Array(items) => items,
                        other => vec![other],
                    };
                    let path = target.path(layout, &MirrorFile::Others);
                    tally.add(store.write_jsonl(&path, &records)?);
                }
                Ok(())
            }
            ResourceKind::Metrics => {
                let summary = self
                    .client
                    .experiment_json(key, JsonDocument::MetricsSummary)?;
                let summary = match summary {
                    Some(Value::Array(items)) => items,
                    Some(other) => vec![other],
                    None => Vec::new(),
                };
                if summary.is_empty() {
                    return Ok(());
                }
                let path = target.path(layout, &MirrorFile::MetricsSummary);
                tally.add(store.write_jsonl(&path, &summary)?);
                let names: BTreeSet<&str> = summary
                    .iter()
                    .filter_map(|entry| entry.get("name").and_then(Value::as_str))
                    .collect();
                for (index, name) in names.into_iter().enumerate() {
                    let path = target.path(layout, &MirrorFile::MetricSeries(index));
                    if store.skips(&path) {
                        tally.add(WriteOutcome::Skipped);
                        continue;
                    }
                    let series = self.client.metric_series(key, name)?;
                    tally.add(store.write_jsonl(&path, &series)?);
                }
                Ok(())
            }
            ResourceKind::Html => self.write_text_document(
                target,
                TextDocument::Html,
                MirrorFile::Html,
                layout,
                store,
                tally,
            ),
            ResourceKind::Output => self.write_text_document(
                target,
                TextDocument::Output,
                MirrorFile::Output,
                layout,
                store,
                tally,
            ),
            ResourceKind::Requirements => self.write_text_document(
                target,
                TextDocument::Requirements,
                MirrorFile::Requirements,
                layout,
                store,
                tally,
            ),
            ResourceKind::Graph => self.write_text_document(
                target,
                TextDocument::Graph,
                MirrorFile::Graph,
                layout,
                store,
                tally,
            ),
            ResourceKind::Assets => {
                let assets: Vec<_> = self
                    .client
                    .assets(key, None)?
                    .into_iter()
                    .filter(|asset| asset.asset_type() != CODE_ASSET_TYPE)
                    .collect();
                if assets.is_empty() {
                    return Ok(());
                }
                let path = target.path(layout, &MirrorFile::AssetsIndex);
                tally.add(store.write_jsonl(&path, &assets)?);
                for asset in &assets {
                    let path = target.path(
                        layout,
                        &MirrorFile::Asset {
                            asset_type: asset.asset_type().to_string(),
                            file_name: asset.file_name.clone(),
                        },
                    );
                    tally.add(store.persist_with(&path, |temp| {
                        self.client.download_asset(key, &asset.asset_id, temp)
                    })?);
                }
                Ok(())
            }
            ResourceKind::Code => {
                if let Some(code) = self.client.experiment_text(key, TextDocument::Code)? {
                    let metadata = self.client.experiment_json(key, JsonDocument::Metadata)?;
                    let file = MirrorFile::Code(script_file_name(metadata.as_ref()));
                    tally.add(store.write_text(&target.path(layout, &file), &code)?);
                }
                for asset in self.client.assets(key, Some(CODE_ASSET_TYPE))? {
                    if asset.asset_type() != CODE_ASSET_TYPE {
                        continue;
                    }
                    let path = target.path(layout, &MirrorFile::Code(asset.file_name.clone()));
                    tally.add(store.persist_with(&path, |temp| {
                        self.client.download_asset(key, &asset.asset_id, temp)
                    })?);
                }
                Ok(())
            }
            ResourceKind::Git => {
                self.write_json_document(
                    target,
                    JsonDocument::GitMetadata,
                    MirrorFile::GitMetadata,
                    layout,
                    store,
                    tally,
                )?;
                let path = target.path(layout, &MirrorFile::GitPatch);
                if store.skips(&path) {
                    tally.add(WriteOutcome::Skipped);
                } else if let Some(zipped) = self.client.git_patch(key)? {
                    tally.add(store.write_bytes(&path, &unzip_first_entry(&zipped)?)?);
                }
                Ok(())
            }
            ResourceKind::ProjectMetadata
            | ResourceKind::Artifacts
            | ResourceKind::ModelRegistry => Ok(()),
        }
    }

    fn write_json_document(
        &self,
        target: &Target<'_>,
        document: JsonDocument,
        file: MirrorFile,
        layout: &MirrorLayout,
        store: &Store,
        tally: &mut Tally,
    ) -> Result<(), CometxError> {
        if let Some(value) = self.client.experiment_json(target.key, document)? {
            tally.add(store.write_json(&target.path(layout, &file), &value)?);
        }
        Ok(())
    }

    fn write_text_document(
        &self,
        target: &Target<'_>,
        document: TextDocument,
        file: MirrorFile,
        layout: &MirrorLayout,
        store: &Store,
        tally: &mut Tally,
    ) -> Result<(), CometxError> {
        if let Some(text) = self.client.experiment_text(target.key, document)? {
            tally.add(store.write_text(&target.path(layout, &file), &text)?);
        }
        Ok(())
    }

    fn download_registries(
        &self,
        registry: &RegistryPath,
        layout: &MirrorLayout,
        store: &Store,
        sink: &dyn ProgressSink,
        result: &mut DownloadResult,
    ) -> Result<(), CometxError> {
        let entries = match registry.kind {
            RegistryKind::Artifacts => self.client.artifacts(&registry.workspace)?,
            RegistryKind::Models => self.client.models(&registry.workspace)?,
        };
        let resource = registry.kind.segment();
        for entry in entries.into_iter().filter(|entry| registry.matches_name(&entry.name)) {
            let version = registry.version.as_deref();
            let dir = layout.registry_dir(&registry.workspace, registry.kind, &entry.name, version);
            let mut download = RegistryDownload {
                kind: resource.to_string(),
                name: entry.name.clone(),
                version: version.unwrap_or(crate::layout::LATEST_VERSION).to_string(),
                path: dir.to_string(),
                files: 0,
                skipped: false,
            };
            if store.skips(&dir) {
                download.skipped = true;
                result.skipped += 1;
                result.registries.push(download);
                continue;
            }
            phase(sink, format!("phase=Download; {resource} {}", entry.name));
            let outcome = self.fetch_registry_archive(registry, &entry.name, version, &dir);
            match outcome {
                Ok(files) => {
                    download.files = files;
                    result.written += files;
                    result.registries.push(download);
                }
                Err(err) => record_failure(&mut result.failures, &entry.name, resource, err)?,
            }
        }
        Ok(())
    }

    fn fetch_registry_archive(
        &self,
        registry: &RegistryPath,
        name: &str,
        version: Option<&str>,
        dir: &Utf8Path,
    ) -> Result<usize, CometxError> {
        let archive = tempfile::Builder::new()
            .prefix("cometx-registry")
            .suffix(".zip")
            .tempfile()
            .map_err(|err| CometxError::Filesystem(err.to_string()))?;
        match registry.kind {
            RegistryKind::Artifacts => {
                self.client
                    .download_artifact(&registry.workspace, name, version, archive.path())?
            }
            RegistryKind::Models => {
                self.client
                    .download_model(&registry.workspace, name, version, archive.path())?
            }
        }
        let parent = dir
            .parent()
            .ok_or_else(|| CometxError::Filesystem(format!("invalid destination {dir}")))?;
        fs::create_dir_all(parent.as_std_path())
            .map_err(|err| CometxError::Filesystem(err.to_string()))?;
        // only complete extractions reach `dir`
        let staging = tempfile::Builder::new()
            .prefix(".cometx-")
            .tempdir_in(parent.as_std_path())
            .map_err(|err| CometxError::Filesystem(err.to_string()))?;
        let files = extract_zip(archive.path(), staging.path())?;
        if dir.as_std_path().exists() {
            fs::remove_dir_all(dir.as_std_path())
                .map_err(|err| CometxError::Filesystem(format!("remove {dir}: {err}")))?;
        }
        fs::rename(staging.path(), dir.as_std_path())
            .map_err(|err| CometxError::Filesystem(format!("move into {dir}: {err}")))?;
        Ok(files)
    }

    pub fn copy(
        &self,
        source: &Identifier,
        destination: &Identifier,
        options: &CopyOptions,
        sink: &dyn ProgressSink,
    ) -> Result<CopyResult, CometxError> {
        validate_scopes(source, destination)?;
        let mut result = CopyResult {
            source: source.to_string(),
            destination: destination.to_string(),
            symlink: options.symlink,
            created_projects: Vec::new(),
            experiments: Vec::new(),
            failures: Vec::new(),
        };

        let workspaces = self.client.workspaces()?;
        if !workspaces.contains(&destination.workspace) {
            return Err(CometxError::NotFound(format!(
                "workspace {}",
                destination.workspace
            )));
        }
        let plan = if options.symlink {
            phase(sink, format!("phase=Resolve; matching {source}"));
            plan_remote(&self.client, source, destination)?
        } else {
            phase(sink, format!("phase=Resolve; scanning {}", options.root));
            plan_local(&options.root, source, destination)?
        };
        if plan.is_empty() {
            tracing::warn!(source = %source, "nothing to copy");
        }
        result.created_projects =
            self.create_missing_projects(&plan, source, destination, options)?;

        if options.symlink {
            for entry in &plan.entries {
                phase(
                    sink,
                    format!("phase=Link; {} -> {}", entry.experiment, entry.destination_project),
                );
                match self
                    .client
                    .create_symlink(&entry.experiment, &entry.destination_project)
                {
                    Ok(()) => result.experiments.push(CopiedExperiment {
                        source: format!(
                            "{}/{}/{}",
                            entry.source_workspace, entry.source_project, entry.experiment
                        ),
                        destination_project: entry.destination_project.clone(),
                        destination_key: entry.experiment.clone(),
                        logged: Vec::new(),
                    }),
                    Err(err) => {
                        record_failure(&mut result.failures, &entry.experiment, "symlink", err)?
                    }
                }
            }
            return Ok(result);
        }

        let kinds = select_resources(&[], &options.ignore);
        for entry in &plan.entries {
            let folder = options
                .root
                .join(&entry.source_workspace)
                .join(&entry.source_project)
                .join(&entry.experiment);
            phase(
                sink,
                format!(
                    "phase=Copy; {}/{} -> {}/{}",
                    entry.source_project,
                    entry.experiment,
                    entry.destination_workspace,
                    entry.destination_project
                ),
            );
            let key = match self
                .client
                .create_experiment(&entry.destination_workspace, &entry.destination_project)
            {
                Ok(key) => key,
                Err(err) => {
                    record_failure(&mut result.failures, &entry.experiment, "experiment", err)?;
                    continue;
                }
            };
            let report = Replayer::new(&self.client, &key, &folder).replay(&kinds)?;
            result.failures.extend(report.failures);
            result.experiments.push(CopiedExperiment {
                source: folder.to_string(),
                destination_project: entry.destination_project.clone(),
                destination_key: key,
                logged: report.logged,
            });
        }
        Ok(result)
    }

    fn create_missing_projects(
        &self,
        plan: &CopyPlan,
        source: &Identifier,
        destination: &Identifier,
        options: &CopyOptions,
    ) -> Result<Vec<String>, CometxError> {
        let existing: BTreeSet<String> = self
            .client
            .projects(&destination.workspace)?
            .into_iter()
            .map(|project| project.project_name)
            .collect();
        let mut created = BTreeSet::new();
        for (source_project, destination_project) in plan.destination_projects() {
            if existing.contains(destination_project) || created.contains(destination_project) {
                continue;
            }
            let metadata_path = options
                .root
                .join(&source.workspace)
                .join(source_project)
                .join(PROJECT_METADATA_FILE);
            let metadata = if metadata_path.as_std_path().is_file() {
                Some(read_json(metadata_path.as_std_path())?)
            } else {
                None
            };
            let description = metadata
                .as_ref()
                .and_then(|value| value.get("projectDescription"))
                .and_then(Value::as_str);
            let public = metadata
                .as_ref()
                .and_then(|value| value.get("public"))
                .and_then(Value::as_bool)
                .unwrap_or(false);
            self.client.create_project(
                &destination.workspace,
                destination_project,
                description,
                public,
            )?;
            tracing::info!(
                workspace = %destination.workspace,
                project = destination_project,
                "created project"
            );
            created.insert(destination_project.to_string());
        }
        Ok(created.into_iter().collect())
    }

    pub fn log(
        &self,
        path: Option<&Identifier>,
        options: &LogOptions,
        sink: &dyn ProgressSink,
    ) -> Result<LogResult, CometxError> {
        let scope = self.scope_or_default(path)?;
        let detect_types = options.log_type.is_none();
        let log_type = match (options.log_type, &options.file) {
            (Some(log_type), _) => log_type,
            (None, Some(_)) => LogType::Asset,
            (None, None) if !options.set.is_empty() => LogType::Other,
            (None, None) => {
                return Err(CometxError::InvalidLogRequest(
                    "nothing to log: give a FILENAME, --type or --set".to_string(),
                ));
            }
        };
        let mut result = LogResult {
            log_type: log_type_name(log_type),
            experiments: Vec::new(),
            logged: 0,
            failures: Vec::new(),
        };

        if log_type == LogType::Other
            && scope.experiment_key().is_none()
            && options.file.is_none()
        {
            return self.log_other_in_scope(&scope, options, sink, result);
        }

        let key = self.log_target(&scope)?;
        result.experiments.push(key.clone());
        phase(sink, format!("phase=Log; {} into {key}", result.log_type));

        match log_type {
            LogType::All => {
                let folder = self.require_file(options)?;
                if !folder.as_std_path().is_dir() {
                    return Err(CometxError::InvalidLogRequest(format!(
                        "--type all needs a mirrored experiment folder, got {folder}"
                    )));
                }
                let report = Replayer::new(&self.client, &key, folder)
                    .replay(&ResourceKind::default_set())?;
                result.logged = report.logged.len();
                result.failures = report.failures;
            }
            LogType::Code => {
                for (file, name) in files_under(self.require_file(options)?)? {
                    let code = fs::read_to_string(file.as_std_path())
                        .map_err(|err| CometxError::Filesystem(format!("read {file}: {err}")))?;
                    self.client.log_code(&key, &name, &code)?;
                    result.logged += 1;
                }
            }
            LogType::Metrics => {
                for (file, _) in files_under(self.require_file(options)?)? {
                    for metric in read_jsonl::<MetricRecord>(file.as_std_path())? {
                        self.client.log_metric(&key, &metric)?;
                        result.logged += 1;
                    }
                }
            }
            LogType::Parameters | LogType::Other => {
                let mut values: Vec<(String, Value)> = Vec::new();
                if let Some(file) = &options.file {
                    match read_json(file.as_std_path())? {
                        Value::Object(map) => values.extend(map),
                        Value::Array(items) => values.extend(items.iter().filter_map(|item| {
                            name_and_value(item).map(|(name, value)| (name.to_string(), value))
                        })),
                        _ => {
                            return Err(CometxError::InvalidLogRequest(format!(
                                "{file} must hold a JSON object or array"
                            )));
                        }
                    }
                }
                values.extend(
                    options
                        .set
                        .iter()
                        .map(|kv| (kv.key.clone(), Value::String(kv.value_for(0)))),
                );
                for (name, value) in &values {
                    if log_type == LogType::Parameters {
                        self.client.log_parameter(&key, name, value)?;
                    } else {
                        self.client.log_other(&key, name, value)?;
                    }
                    result.logged += 1;
                }
            }
            LogType::Asset
            | LogType::Audio
            | LogType::Image
            | LogType::Notebook
            | LogType::TextSample
            | LogType::Video
            | LogType::Datagrid => {
                for (file, name) in files_under(self.require_file(options)?)? {
                    let asset_type = if detect_types {
                        asset_type_for_file(&name)
                    } else {
                        log_type.asset_type().unwrap_or("asset")
                    };
                    let upload = AssetUpload {
                        path: file.as_std_path(),
                        file_name: &name,
                        asset_type,
                        step: None,
                        epoch: None,
                        metadata: None,
                    };
                    match self.client.upload_asset(&key, &upload) {
                        Ok(()) => result.logged += 1,
                        Err(err) => record_failure(&mut result.failures, &key, &name, err)?,
                    }
                }
            }
        }
        Ok(result)
    }

    fn log_other_in_scope(
        &self,
        scope: &Identifier,
        options: &LogOptions,
        sink: &dyn ProgressSink,
        mut result: LogResult,
    ) -> Result<LogResult, CometxError> {
        phase(sink, format!("phase=Resolve; matching {scope}"));
        let experiments = self.resolve_experiments(scope)?;
        for (index, (_, experiment)) in experiments.iter().enumerate() {
            let key = experiment.experiment_key.as_str();
            for kv in &options.set {
                let value = Value::String(kv.value_for(index));
                match self.client.log_other(key, &kv.key, &value) {
                    Ok(()) => result.logged += 1,
                    Err(err) => record_failure(&mut result.failures, key, &kv.key, err)?,
                }
            }
            result.experiments.push(key.to_string());
        }
        Ok(result)
    }

    fn require_file<'o>(&self, options: &'o LogOptions) -> Result<&'o Utf8Path, CometxError> {
        options
            .file
            .as_deref()
            .ok_or_else(|| {
                CometxError::InvalidLogRequest("this log type needs a FILENAME".to_string())
            })
    }

    fn log_target(&self, scope: &Identifier) -> Result<String, CometxError> {
        if let Some(key) = scope.experiment_key() {
            return Ok(key.to_string());
        }
        if scope.experiment.is_some() {
            return Err(CometxError::InvalidLogRequest(
                "log needs an experiment key, not a pattern".to_string(),
            ));
        }
        let project = scope.project_name().ok_or_else(|| {
            CometxError::InvalidLogRequest(
                "log needs WORKSPACE/PROJECT or WORKSPACE/PROJECT/EXPERIMENT".to_string(),
            )
        })?;
        let key = self.client.create_experiment(&scope.workspace, project)?;
        tracing::info!(workspace = %scope.workspace, project, key = %key, "created experiment");
        Ok(key)
    }

    pub fn delete_assets(
        &self,
        scope: &Identifier,
        asset_type: &str,
        force: bool,
        sink: &dyn ProgressSink,
        confirmer: Option<&dyn Confirmer>,
    ) -> Result<DeleteAssetsResult, CometxError> {
        let filter = (asset_type != "all").then_some(asset_type);
        phase(sink, format!("phase=Resolve; matching {scope}"));
        let experiments = self.resolve_experiments(scope)?;

        let mut targets = Vec::new();
        for (_, experiment) in &experiments {
            let assets: Vec<_> = self
                .client
                .assets(&experiment.experiment_key, filter)?
                .into_iter()
                .filter(|asset| filter.is_none_or(|wanted| asset.asset_type() == wanted))
                .collect();
            targets.push((experiment.experiment_key.as_str(), assets));
        }
        let total: usize = targets.iter().map(|(_, assets)| assets.len()).sum();
        let mut result = DeleteAssetsResult {
            asset_type: asset_type.to_string(),
            experiments: experiments.len(),
            deleted: 0,
            failures: Vec::new(),
        };
        if total == 0 {
            return Ok(result);
        }

        confirm(
            force,
            &format!(
                "Delete {total} {asset_type} asset(s) from {} experiment(s) in {scope}?",
                experiments.len()
            ),
            confirmer,
        )?;
        for (key, assets) in targets {
            phase(sink, format!("phase=Delete; {} asset(s) from {key}", assets.len()));
            for asset in assets {
                match self.client.delete_asset(key, &asset.asset_id) {
                    Ok(()) => result.deleted += 1,
                    Err(err) => record_failure(&mut result.failures, key, &asset.file_name, err)?,
                }
            }
        }
        Ok(result)
    }

    pub fn reproduce(
        &self,
        scope: &Identifier,
        options: &ReproduceOptions,
        sink: &dyn ProgressSink,
    ) -> Result<ReproduceResult, CometxError> {
        if scope.granularity() != Granularity::Experiment {
            return Err(CometxError::InvalidPath {
                path: scope.to_string(),
                reason: "reproduce needs WORKSPACE/PROJECT/EXPERIMENT".to_string(),
            });
        }
        let experiments = self.resolve_experiments(scope)?;
        let (project, experiment) = experiments
            .into_iter()
            .next()
            .ok_or_else(|| CometxError::NotFound(scope.to_string()))?;
        let key = experiment.experiment_key.as_str();

        let layout = MirrorLayout::single_run(options.output.clone());
        let store = Store::new(true);
        let target = Target {
            workspace: &scope.workspace,
            project: &project,
            key,
            folder: key,
        };
        let mut failures = Vec::new();
        let mut tally = Tally::default();
        for kind in [
            ResourceKind::Metadata,
            ResourceKind::Code,
            ResourceKind::Git,
            ResourceKind::Requirements,
        ] {
            phase(sink, format!("phase=Download; {kind} for {key}"));
            if let Err(err) = self.download_kind(&target, kind, &layout, &store, &mut tally) {
                record_failure(&mut failures, key, kind.as_str(), err)?;
            }
        }

        let read_local = |file: MirrorFile| {
            let path = target.path(&layout, &file);
            path.as_std_path()
                .is_file()
                .then(|| read_json(path.as_std_path()).ok())
                .flatten()
        };
        let metadata = read_local(MirrorFile::Metadata);
        let git = read_local(MirrorFile::GitMetadata);
        let has_patch = target
            .path(&layout, &MirrorFile::GitPatch)
            .as_std_path()
            .is_file();
        let script = reproduce_script(
            &script_file_name(metadata.as_ref()),
            git.as_ref(),
            has_patch,
            &options.executable,
        );
        let script_path = layout.root().join(REPRODUCE_SCRIPT);
        store.write_text(&script_path, &script)?;
        mark_executable(&script_path)?;

        if options.run {
            phase(sink, format!("phase=Run; {script_path}"));
            let status = Command::new("sh")
                .arg(REPRODUCE_SCRIPT)
                .current_dir(layout.root().as_std_path())
                .status()
                .map_err(|err| CometxError::ScriptFailed(err.to_string()))?;
            if !status.success() {
                return Err(CometxError::ScriptFailed(status.to_string()));
            }
        }

        Ok(ReproduceResult {
            experiment_key: key.to_string(),
            output_dir: layout.root().to_string(),
            script: script_path.to_string(),
            ran: options.run,
            failures,
        })
    }
}

fn folder_names(
    experiments: &[(String, ExperimentInfo)],
    naming: NamingMode,
    mode: LayoutMode,
) -> BTreeMap<(String, String), String> {
    let group_of = |project: &str| {
        if mode == LayoutMode::Hierarchical {
            project.to_string()
        } else {
            String::new()
        }
    };
    let mut groups: BTreeMap<String, Vec<ExperimentInfo>> = BTreeMap::new();
    for (project, experiment) in experiments {
        let members = groups.entry(group_of(project)).or_default();
        // a linked experiment shows up once per project
        if !members
            .iter()
            .any(|member| member.experiment_key == experiment.experiment_key)
        {
            members.push(experiment.clone());
        }
    }
    let assigned: BTreeMap<String, BTreeMap<String, String>> = groups
        .into_iter()
        .map(|(group, members)| (group, assign_folders(naming, &members)))
        .collect();

    experiments
        .iter()
        .filter_map(|(project, experiment)| {
            let key = &experiment.experiment_key;
            let folder = assigned.get(&group_of(project))?.get(key)?;
            Some(((project.clone(), key.clone()), folder.clone()))
        })
        .collect()
}

fn reproduce_script(
    script_name: &str,
    git: Option<&Value>,
    has_patch: bool,
    executable: &str,
) -> String {
    let field = |name: &str| {
        git.and_then(|value| value.get(name))
            .and_then(Value::as_str)
            .filter(|value| !value.is_empty())
    };
    let mut lines = vec![
        "#!/bin/sh".to_string(),
        "set -e".to_string(),
        "cd \"$(dirname \"$0\")\"".to_string(),
    ];
    let cloned = match field("origin") {
        Some(origin) => {
            lines.push(format!("git clone {} repo", shell_quote(origin)));
            lines.push("cd repo".to_string());
            if let Some(parent) = field("parent") {
                lines.push(format!("git checkout {}", shell_quote(parent)));
            }
            if has_patch {
                lines.push("git apply ../git_diff.patch".to_string());
            }
            true
        }
        None => false,
    };
    let script = if cloned {
        format!("../{script_name}")
    } else {
        script_name.to_string()
    };
    lines.push(format!("{executable} {}", shell_quote(&script)));
    lines.push(String::new());
    lines.join("\n")
}

#[cfg(unix)]
fn mark_executable(path: &Utf8Path) -> Result<(), CometxError> {
    use std::os::unix::fs::PermissionsExt;
    fs::set_permissions(path.as_std_path(), fs::Permissions::from_mode(0o755))
        .map_err(|err| CometxError::Filesystem(err.to_string()))
}

#[cfg(not(unix))]
fn mark_executable(_path: &Utf8Path) -> Result<(), CometxError> {
    Ok(())
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn script_name_from_metadata() {
        let metadata = json!({ "fileName": "/home/user/project/train.py" });
        assert_eq!(script_file_name(Some(&metadata)), "train.py");
        assert_eq!(script_file_name(None), DEFAULT_SCRIPT);
    }

    #[test]
    fn script_clones_and_patches() {
        let git = json!({ "origin": "git@example.com:team/repo.git", "parent": "abc123" });
        let script = reproduce_script("train.py", Some(&git), true, "python3");
        assert!(script.starts_with("#!/bin/sh\n"));
        assert!(script.contains("git clone 'git@example.com:team/repo.git' repo\n"));
        assert!(script.contains("git checkout 'abc123'\n"));
        assert!(script.contains("git apply ../git_diff.patch\n"));
        assert!(script.contains("python3 '../train.py'\n"));
    }

    #[test]
    fn script_without_git_runs_in_place() {
        let script = reproduce_script("train.py", None, false, "python");
        assert!(!script.contains("git "));
        assert!(script.contains("python 'train.py'\n"));
    }

    #[test]
    fn quoting_escapes_single_quotes() {
        assert_eq!(shell_quote("it's"), r"'it'\''s'");
    }
}
