#![allow(dead_code)]

use std::collections::{BTreeMap, HashMap, HashSet};
use std::fs;
use std::path::Path;
use std::sync::Mutex;

use serde_json::Value;

use cometx::app::{Confirmer, ProgressEvent, ProgressSink};
use cometx::comet::{
    AssetInfo, AssetUpload, CometClient, ExperimentInfo, JsonDocument, MetricRecord, ProjectInfo,
    RegistryEntry, TextDocument,
};
use cometx::error::CometxError;

#[derive(Default)]
struct State {
    workspaces: Vec<String>,
    projects: BTreeMap<String, Vec<ProjectInfo>>,
    experiments: BTreeMap<(String, String), Vec<ExperimentInfo>>,
    json: HashMap<(String, JsonDocument), Value>,
    text: HashMap<(String, TextDocument), String>,
    metrics: HashMap<(String, String), Vec<MetricRecord>>,
    patches: HashMap<String, Vec<u8>>,
    assets: HashMap<String, Vec<AssetInfo>>,
    asset_bytes: HashMap<String, Vec<u8>>,
    artifacts: HashMap<String, Vec<RegistryEntry>>,
    models: HashMap<String, Vec<RegistryEntry>>,
    registry_archives: HashMap<String, Vec<u8>>,
    failing_json: HashSet<(String, JsonDocument)>,
    unauthorized: bool,
    created: usize,
    calls: Vec<String>,
}

/// In-memory service that records every write.
#[derive(Default)]
pub struct FakeComet {
    state: Mutex<State>,
}

impl FakeComet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_project(self, workspace: &str, project: &str) -> Self {
        {
            let mut state = self.state.lock().unwrap();
            if !state.workspaces.iter().any(|name| name == workspace) {
                state.workspaces.push(workspace.to_string());
            }
            state
                .projects
                .entry(workspace.to_string())
                .or_default()
                .push(ProjectInfo {
                    project_id: format!("{workspace}-{project}"),
                    project_name: project.to_string(),
                    workspace_name: Some(workspace.to_string()),
                    project_description: Some(format!("{project} description")),
                    public: false,
                });
            state
                .experiments
                .entry((workspace.to_string(), project.to_string()))
                .or_default();
        }
        self
    }

    pub fn with_experiment(
        self,
        workspace: &str,
        project: &str,
        key: &str,
        name: Option<&str>,
    ) -> Self {
        {
            let mut state = self.state.lock().unwrap();
            state
                .experiments
                .entry((workspace.to_string(), project.to_string()))
                .or_default()
                .push(ExperimentInfo {
                    experiment_key: key.to_string(),
                    experiment_name: name.map(str::to_string),
                    project_name: Some(project.to_string()),
                    workspace_name: Some(workspace.to_string()),
                });
        }
        self
    }

    pub fn set_json(&self, key: &str, document: JsonDocument, value: Value) {
        self.state
            .lock()
            .unwrap()
            .json
            .insert((key.to_string(), document), value);
    }

    pub fn set_text(&self, key: &str, document: TextDocument, text: &str) {
        self.state
            .lock()
            .unwrap()
            .text
            .insert((key.to_string(), document), text.to_string());
    }

    pub fn add_metric(&self, key: &str, name: &str, step: i64, value: f64) {
        let mut state = self.state.lock().unwrap();
        state
            .metrics
            .entry((key.to_string(), name.to_string()))
            .or_default()
            .push(MetricRecord {
                metric_name: name.to_string(),
                metric_value: Value::from(value),
                step: Some(step),
                epoch: None,
                timestamp: Some(1_700_000_000_000 + step),
                run_context: None,
            });
    }

    pub fn set_patch(&self, key: &str, zipped: Vec<u8>) {
        self.state
            .lock()
            .unwrap()
            .patches
            .insert(key.to_string(), zipped);
    }

    pub fn add_asset(
        &self,
        key: &str,
        asset_id: &str,
        file_name: &str,
        asset_type: &str,
        bytes: &[u8],
    ) {
        let mut state = self.state.lock().unwrap();
        state.assets.entry(key.to_string()).or_default().push(AssetInfo {
            asset_id: asset_id.to_string(),
            file_name: file_name.to_string(),
            asset_type: Some(asset_type.to_string()),
            step: None,
            epoch: None,
            metadata: None,
            log_as_file_name: None,
            file_size: Some(bytes.len() as u64),
        });
        state
            .asset_bytes
            .insert(asset_id.to_string(), bytes.to_vec());
    }

    pub fn add_artifact(&self, workspace: &str, name: &str, archive: Vec<u8>) {
        let mut state = self.state.lock().unwrap();
        state
            .artifacts
            .entry(workspace.to_string())
            .or_default()
            .push(RegistryEntry {
                name: name.to_string(),
                versions: vec!["1.0.0".to_string()],
            });
        state.registry_archives.insert(name.to_string(), archive);
    }

    pub fn add_model(&self, workspace: &str, name: &str, archive: Vec<u8>) {
        let mut state = self.state.lock().unwrap();
        state
            .models
            .entry(workspace.to_string())
            .or_default()
            .push(RegistryEntry {
                name: name.to_string(),
                versions: vec!["1.0.0".to_string()],
            });
        state.registry_archives.insert(name.to_string(), archive);
    }

    pub fn set_registry_archive(&self, name: &str, archive: Vec<u8>) {
        self.state
            .lock()
            .unwrap()
            .registry_archives
            .insert(name.to_string(), archive);
    }

    pub fn fail_json(&self, key: &str, document: JsonDocument) {
        self.state
            .lock()
            .unwrap()
            .failing_json
            .insert((key.to_string(), document));
    }

    pub fn reject_api_key(&self) {
        self.state.lock().unwrap().unauthorized = true;
    }

    pub fn calls(&self) -> Vec<String> {
        self.state.lock().unwrap().calls.clone()
    }

    pub fn calls_starting_with(&self, prefix: &str) -> Vec<String> {
        self.calls()
            .into_iter()
            .filter(|call| call.starts_with(prefix))
            .collect()
    }

    fn record(&self, call: String) {
        self.state.lock().unwrap().calls.push(call);
    }

    fn write_archive(&self, name: &str, destination: &Path) -> Result<(), CometxError> {
        let archive = self
            .state
            .lock()
            .unwrap()
            .registry_archives
            .get(name)
            .cloned()
            .ok_or_else(|| CometxError::NotFound(name.to_string()))?;
        fs::write(destination, archive).map_err(|err| CometxError::Filesystem(err.to_string()))
    }

    fn check_auth(&self) -> Result<(), CometxError> {
        if self.state.lock().unwrap().unauthorized {
            return Err(CometxError::Authentication {
                url: "https://comet.test".to_string(),
            });
        }
        Ok(())
    }
}

impl CometClient for FakeComet {
    fn workspaces(&self) -> Result<Vec<String>, CometxError> {
        self.check_auth()?;
        Ok(self.state.lock().unwrap().workspaces.clone())
    }

    fn projects(&self, workspace: &str) -> Result<Vec<ProjectInfo>, CometxError> {
        self.check_auth()?;
        Ok(self
            .state
            .lock()
            .unwrap()
            .projects
            .get(workspace)
            .cloned()
            .unwrap_or_default())
    }

    fn experiments(
        &self,
        workspace: &str,
        project: &str,
    ) -> Result<Vec<ExperimentInfo>, CometxError> {
        self.check_auth()?;
        self.state
            .lock()
            .unwrap()
            .experiments
            .get(&(workspace.to_string(), project.to_string()))
            .cloned()
            .ok_or_else(|| CometxError::NotFound(format!("{workspace}/{project}")))
    }

    fn project_details(&self, workspace: &str, project: &str) -> Result<Value, CometxError> {
        self.check_auth()?;
        let state = self.state.lock().unwrap();
        let info = state
            .projects
            .get(workspace)
            .and_then(|projects| projects.iter().find(|info| info.project_name == project))
            .ok_or_else(|| CometxError::NotFound(format!("{workspace}/{project}")))?;
        serde_json::to_value(info).map_err(|err| CometxError::Http(err.to_string()))
    }

    fn experiment_json(
        &self,
        experiment_key: &str,
        document: JsonDocument,
    ) -> Result<Option<Value>, CometxError> {
        self.check_auth()?;
        let state = self.state.lock().unwrap();
        let entry = (experiment_key.to_string(), document);
        if state.failing_json.contains(&entry) {
            return Err(CometxError::Status {
                status: 500,
                message: "internal error".to_string(),
            });
        }
        Ok(state.json.get(&entry).cloned())
    }

    fn experiment_text(
        &self,
        experiment_key: &str,
        document: TextDocument,
    ) -> Result<Option<String>, CometxError> {
        self.check_auth()?;
        Ok(self
            .state
            .lock()
            .unwrap()
            .text
            .get(&(experiment_key.to_string(), document))
            .cloned())
    }

    fn metric_series(
        &self,
        experiment_key: &str,
        metric_name: &str,
    ) -> Result<Vec<MetricRecord>, CometxError> {
        self.check_auth()?;
        Ok(self
            .state
            .lock()
            .unwrap()
            .metrics
            .get(&(experiment_key.to_string(), metric_name.to_string()))
            .cloned()
            .unwrap_or_default())
    }

    fn git_patch(&self, experiment_key: &str) -> Result<Option<Vec<u8>>, CometxError> {
        self.check_auth()?;
        Ok(self.state.lock().unwrap().patches.get(experiment_key).cloned())
    }

    fn assets(
        &self,
        experiment_key: &str,
        asset_type: Option<&str>,
    ) -> Result<Vec<AssetInfo>, CometxError> {
        self.check_auth()?;
        Ok(self
            .state
            .lock()
            .unwrap()
            .assets
            .get(experiment_key)
            .cloned()
            .unwrap_or_default()
            .into_iter()
            .filter(|asset| asset_type.is_none_or(|wanted| asset.asset_type() == wanted))
            .collect())
    }

    fn download_asset(
        &self,
        _experiment_key: &str,
        asset_id: &str,
        destination: &Path,
    ) -> Result<(), CometxError> {
        self.check_auth()?;
        let bytes = self
            .state
            .lock()
            .unwrap()
            .asset_bytes
            .get(asset_id)
            .cloned()
            .ok_or_else(|| CometxError::NotFound(asset_id.to_string()))?;
        fs::write(destination, bytes).map_err(|err| CometxError::Filesystem(err.to_string()))
    }

    fn artifacts(&self, workspace: &str) -> Result<Vec<RegistryEntry>, CometxError> {
        self.check_auth()?;
        Ok(self
            .state
            .lock()
            .unwrap()
            .artifacts
            .get(workspace)
            .cloned()
            .unwrap_or_default())
    }

    fn models(&self, workspace: &str) -> Result<Vec<RegistryEntry>, CometxError> {
        self.check_auth()?;
        Ok(self
            .state
            .lock()
            .unwrap()
            .models
            .get(workspace)
            .cloned()
            .unwrap_or_default())
    }

    fn download_artifact(
        &self,
        _workspace: &str,
        name: &str,
        version: Option<&str>,
        destination: &Path,
    ) -> Result<(), CometxError> {
        self.record(format!(
            "download_artifact:{name}:{}",
            version.unwrap_or("latest")
        ));
        self.write_archive(name, destination)
    }

    fn download_model(
        &self,
        _workspace: &str,
        name: &str,
        version: Option<&str>,
        destination: &Path,
    ) -> Result<(), CometxError> {
        self.record(format!("download_model:{name}:{}", version.unwrap_or("latest")));
        self.write_archive(name, destination)
    }

    fn create_project(
        &self,
        workspace: &str,
        project: &str,
        description: Option<&str>,
        public: bool,
    ) -> Result<(), CometxError> {
        self.check_auth()?;
        self.record(format!(
            "create_project:{workspace}/{project}:{}:{public}",
            description.unwrap_or_default()
        ));
        let mut state = self.state.lock().unwrap();
        state
            .projects
            .entry(workspace.to_string())
            .or_default()
            .push(ProjectInfo {
                project_id: format!("{workspace}-{project}"),
                project_name: project.to_string(),
                workspace_name: Some(workspace.to_string()),
                project_description: description.map(str::to_string),
                public,
            });
        Ok(())
    }

    fn create_experiment(&self, workspace: &str, project: &str) -> Result<String, CometxError> {
        self.check_auth()?;
        let key = {
            let mut state = self.state.lock().unwrap();
            state.created += 1;
            format!("new{:04}", state.created)
        };
        self.record(format!("create_experiment:{workspace}/{project}:{key}"));
        Ok(key)
    }

    fn create_symlink(&self, experiment_key: &str, project: &str) -> Result<(), CometxError> {
        self.record(format!("symlink:{experiment_key}:{project}"));
        Ok(())
    }

    fn log_metric(&self, experiment_key: &str, metric: &MetricRecord) -> Result<(), CometxError> {
        self.record(format!(
            "log_metric:{experiment_key}:{}:{}",
            metric.metric_name,
            metric.step.unwrap_or_default()
        ));
        Ok(())
    }

    fn log_parameter(
        &self,
        experiment_key: &str,
        name: &str,
        value: &Value,
    ) -> Result<(), CometxError> {
        self.record(format!("log_parameter:{experiment_key}:{name}={value}"));
        Ok(())
    }

    fn log_other(
        &self,
        experiment_key: &str,
        name: &str,
        value: &Value,
    ) -> Result<(), CometxError> {
        self.record(format!("log_other:{experiment_key}:{name}={value}"));
        Ok(())
    }

    fn add_tags(&self, experiment_key: &str, tags: &[String]) -> Result<(), CometxError> {
        self.record(format!("add_tags:{experiment_key}:{}", tags.join(",")));
        Ok(())
    }

    fn set_file_name(&self, experiment_key: &str, file_name: &str) -> Result<(), CometxError> {
        self.record(format!("set_file_name:{experiment_key}:{file_name}"));
        Ok(())
    }

    fn log_text(
        &self,
        experiment_key: &str,
        document: TextDocument,
        _text: &str,
    ) -> Result<(), CometxError> {
        self.record(format!("log_text:{experiment_key}:{document:?}"));
        Ok(())
    }

    fn log_code(
        &self,
        experiment_key: &str,
        file_name: &str,
        _code: &str,
    ) -> Result<(), CometxError> {
        self.record(format!("log_code:{experiment_key}:{file_name}"));
        Ok(())
    }

    fn log_system_details(
        &self,
        experiment_key: &str,
        _details: &Value,
    ) -> Result<(), CometxError> {
        self.record(format!("log_system_details:{experiment_key}"));
        Ok(())
    }

    fn log_git_metadata(&self, experiment_key: &str, _metadata: &Value) -> Result<(), CometxError> {
        self.record(format!("log_git_metadata:{experiment_key}"));
        Ok(())
    }

    fn upload_git_patch(&self, experiment_key: &str, _zipped: &[u8]) -> Result<(), CometxError> {
        self.record(format!("upload_git_patch:{experiment_key}"));
        Ok(())
    }

    fn upload_asset(
        &self,
        experiment_key: &str,
        upload: &AssetUpload<'_>,
    ) -> Result<(), CometxError> {
        self.record(format!(
            "upload_asset:{experiment_key}:{}:{}",
            upload.asset_type, upload.file_name
        ));
        Ok(())
    }

    fn delete_asset(&self, experiment_key: &str, asset_id: &str) -> Result<(), CometxError> {
        self.record(format!("delete_asset:{experiment_key}:{asset_id}"));
        Ok(())
    }
}

pub struct NullSink;

impl ProgressSink for NullSink {
    fn event(&self, _event: ProgressEvent) {}
}

/// Answers every prompt the same way.
pub struct FixedAnswer(pub bool);

impl Confirmer for FixedAnswer {
    fn confirm(&self, _prompt: &str) -> Result<bool, CometxError> {
        Ok(self.0)
    }
}
