use std::fs::File;
use std::path::Path;
use std::thread;
use std::time::Duration;

use reqwest::StatusCode;
use reqwest::blocking::{Client, RequestBuilder, Response, multipart};
use reqwest::header::{AUTHORIZATION, HeaderMap, HeaderValue, USER_AGENT};
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};

use crate::config::ResolvedConfig;
use crate::error::CometxError;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProjectInfo {
    #[serde(default)]
    pub project_id: String,
    pub project_name: String,
    #[serde(default)]
    pub workspace_name: Option<String>,
    #[serde(default)]
    pub project_description: Option<String>,
    #[serde(default)]
    pub public: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExperimentInfo {
    pub experiment_key: String,
    #[serde(default)]
    pub experiment_name: Option<String>,
    #[serde(default)]
    pub project_name: Option<String>,
    #[serde(default)]
    pub workspace_name: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AssetInfo {
    pub asset_id: String,
    pub file_name: String,
    #[serde(rename = "type", default)]
    pub asset_type: Option<String>,
    #[serde(default)]
    pub step: Option<i64>,
    #[serde(default)]
    pub epoch: Option<i64>,
    #[serde(default)]
    pub metadata: Option<String>,
    #[serde(default)]
    pub log_as_file_name: Option<String>,
    #[serde(default)]
    pub file_size: Option<u64>,
}

impl AssetInfo {
    pub fn asset_type(&self) -> &str {
        self.asset_type
            .as_deref()
            .filter(|value| !value.is_empty())
            .unwrap_or("asset")
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MetricRecord {
    pub metric_name: String,
    pub metric_value: Value,
    #[serde(default)]
    pub step: Option<i64>,
    #[serde(default)]
    pub epoch: Option<i64>,
    #[serde(default)]
    pub timestamp: Option<i64>,
    #[serde(default)]
    pub run_context: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RegistryEntry {
    pub name: String,
    #[serde(default)]
    pub versions: Vec<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum JsonDocument {
    Metadata,
    Parameters,
    Others,
    SystemDetails,
    GitMetadata,
    MetricsSummary,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TextDocument {
    Html,
    Output,
    Requirements,
    Graph,
    Code,
}

#[derive(Debug, Clone)]
pub struct AssetUpload<'a> {
    pub path: &'a Path,
    pub file_name: &'a str,
    pub asset_type: &'a str,
    pub step: Option<i64>,
    pub epoch: Option<i64>,
    pub metadata: Option<&'a Value>,
}

pub trait CometClient: Send + Sync {
    fn workspaces(&self) -> Result<Vec<String>, CometxError>;
    fn projects(&self, workspace: &str) -> Result<Vec<ProjectInfo>, CometxError>;
    fn experiments(
        &self,
        workspace: &str,
        project: &str,
    ) -> Result<Vec<ExperimentInfo>, CometxError>;
    fn project_details(&self, workspace: &str, project: &str) -> Result<Value, CometxError>;

    fn experiment_json(
        &self,
        experiment_key: &str,
        document: JsonDocument,
    ) -> Result<Option<Value>, CometxError>;
    fn experiment_text(
        &self,
        experiment_key: &str,
        document: TextDocument,
    ) -> Result<Option<String>, CometxError>;
    fn metric_series(
        &self,
        experiment_key: &str,
        metric_name: &str,
    ) -> Result<Vec<MetricRecord>, CometxError>;
    fn git_patch(&self, experiment_key: &str) -> Result<Option<Vec<u8>>, CometxError>;
    fn assets(
        &self,
        experiment_key: &str,
        asset_type: Option<&str>,
    ) -> Result<Vec<AssetInfo>, CometxError>;
    fn download_asset(
        &self,
        experiment_key: &str,
        asset_id: &str,
        destination: &Path,
    ) -> Result<(), CometxError>;

    fn artifacts(&self, workspace: &str) -> Result<Vec<RegistryEntry>, CometxError>;
    fn models(&self, workspace: &str) -> Result<Vec<RegistryEntry>, CometxError>;
    fn download_artifact(
        &self,
        workspace: &str,
        name: &str,
        version: Option<&str>,
        destination: &Path,
    ) -> Result<(), CometxError>;
    fn download_model(
        &self,
        workspace: &str,
        name: &str,
        version: Option<&str>,
        destination: &Path,
    ) -> Result<(), CometxError>;

    fn create_project(
        &self,
        workspace: &str,
        project: &str,
        description: Option<&str>,
        public: bool,
    ) -> Result<(), CometxError>;
    fn create_experiment(&self, workspace: &str, project: &str) -> Result<String, CometxError>;
    fn create_symlink(&self, experiment_key: &str, project: &str) -> Result<(), CometxError>;

    fn log_metric(&self, experiment_key: &str, metric: &MetricRecord) -> Result<(), CometxError>;
    fn log_parameter(
        &self,
        experiment_key: &str,
        name: &str,
        value: &Value,
    ) -> Result<(), CometxError>;
    fn log_other(&self, experiment_key: &str, name: &str, value: &Value)
    -> Result<(), CometxError>;
    fn add_tags(&self, experiment_key: &str, tags: &[String]) -> Result<(), CometxError>;
    fn set_file_name(&self, experiment_key: &str, file_name: &str) -> Result<(), CometxError>;
    fn log_text(
        &self,
        experiment_key: &str,
        document: TextDocument,
        text: &str,
    ) -> Result<(), CometxError>;
    fn log_code(&self, experiment_key: &str, file_name: &str, code: &str)
    -> Result<(), CometxError>;
    fn log_system_details(&self, experiment_key: &str, details: &Value)
    -> Result<(), CometxError>;
    fn log_git_metadata(&self, experiment_key: &str, metadata: &Value)
    -> Result<(), CometxError>;
    fn upload_git_patch(&self, experiment_key: &str, zipped: &[u8]) -> Result<(), CometxError>;
    fn upload_asset(&self, experiment_key: &str, upload: &AssetUpload<'_>)
    -> Result<(), CometxError>;
    fn delete_asset(&self, experiment_key: &str, asset_id: &str) -> Result<(), CometxError>;
}

#[derive(Clone)]
pub struct CometHttpClient {
    client: Client,
    server_url: String,
    base_url: String,
}

impl CometHttpClient {
    pub fn new(config: &ResolvedConfig) -> Result<Self, CometxError> {
        let api_key = config.require_api_key()?;
        let mut headers = HeaderMap::new();
        headers.insert(
            USER_AGENT,
            HeaderValue::from_str(&format!("cometx/{}", env!("CARGO_PKG_VERSION")))
                .map_err(|err| CometxError::Http(err.to_string()))?,
        );
        headers.insert(
            AUTHORIZATION,
            HeaderValue::from_str(api_key).map_err(|_| CometxError::Authentication {
                url: config.server_url.clone(),
            })?,
        );
        let client = Client::builder()
            .default_headers(headers)
            .timeout(Duration::from_secs(60))
            .build()
            .map_err(|err| CometxError::Http(err.to_string()))?;

        Ok(Self {
            client,
            server_url: config.server_url.clone(),
            base_url: format!("{}/api/rest/v2", config.server_url),
        })
    }

    fn url(&self, endpoint: &str) -> String {
        format!("{}/{endpoint}", self.base_url)
    }

    fn handle_status(&self, response: Response) -> Result<Response, CometxError> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        if matches!(status, StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN) {
            return Err(CometxError::Authentication {
                url: self.server_url.clone(),
            });
        }
        if status == StatusCode::NOT_FOUND {
            return Err(CometxError::NotFound(response.url().path().to_string()));
        }
        let message = response
            .text()
            .unwrap_or_else(|_| "Comet request failed".to_string());
        Err(CometxError::Status {
            status: status.as_u16(),
            message,
        })
    }

    fn send_with_retries<F>(&self, mut make_req: F) -> Result<Response, CometxError>
    where
        F: FnMut() -> RequestBuilder,
    {
        const MAX_RETRIES: usize = 3;
        const BASE_DELAY_MS: u64 = 200;
        let mut attempt = 0usize;
        loop {
            match make_req().send() {
                Ok(resp) => {
                    let status = resp.status().as_u16();
                    if attempt < MAX_RETRIES && is_retryable_status(status) {
                        tracing::debug!(status, attempt, "retrying Comet request");
                        thread::sleep(Duration::from_millis(BASE_DELAY_MS * (attempt as u64 + 1)));
                        attempt += 1;
                        continue;
                    }
                    return self.handle_status(resp);
                }
                Err(err) => {
                    if attempt < MAX_RETRIES && is_retryable_error(&err) {
                        tracing::debug!(error = %err, attempt, "retrying Comet request");
                        thread::sleep(Duration::from_millis(BASE_DELAY_MS * (attempt as u64 + 1)));
                        attempt += 1;
                        continue;
                    }
                    return Err(CometxError::Http(err.to_string()));
                }
            }
        }
    }

    fn get(&self, endpoint: &str, query: &[(&str, &str)]) -> Result<Response, CometxError> {
        let url = self.url(endpoint);
        self.send_with_retries(|| self.client.get(&url).query(query))
    }

    fn get_json(&self, endpoint: &str, query: &[(&str, &str)]) -> Result<Value, CometxError> {
        self.get(endpoint, query)?
            .json()
            .map_err(|err| CometxError::Http(err.to_string()))
    }

    fn get_optional_json(
        &self,
        endpoint: &str,
        query: &[(&str, &str)],
    ) -> Result<Option<Value>, CometxError> {
        match self.get_json(endpoint, query) {
            Ok(Value::Null) => Ok(None),
            Ok(value) => Ok(Some(value)),
            Err(CometxError::NotFound(_)) => Ok(None),
            Err(err) => Err(err),
        }
    }

    fn get_to_file(
        &self,
        endpoint: &str,
        query: &[(&str, &str)],
        destination: &Path,
    ) -> Result<(), CometxError> {
        let mut response = self.get(endpoint, query)?;
        let mut file =
            File::create(destination).map_err(|err| CometxError::Filesystem(err.to_string()))?;
        std::io::copy(&mut response, &mut file)
            .map_err(|err| CometxError::Filesystem(err.to_string()))?;
        Ok(())
    }

    fn post_json(&self, endpoint: &str, body: &Value) -> Result<Value, CometxError> {
        let url = self.url(endpoint);
        let response = self.send_with_retries(|| self.client.post(&url).json(body))?;
        let text = response
            .text()
            .map_err(|err| CometxError::Http(err.to_string()))?;
        if text.trim().is_empty() {
            return Ok(Value::Null);
        }
        serde_json::from_str(&text).map_err(|err| CometxError::Http(err.to_string()))
    }

    fn post_file(
        &self,
        endpoint: &str,
        query: &[(&str, String)],
        file_name: &str,
        bytes: Vec<u8>,
    ) -> Result<(), CometxError> {
        let url = self.url(endpoint);
        let file_name = file_name.to_string();
        // forms are consumed on send
        self.send_with_retries(|| {
            let part = multipart::Part::bytes(bytes.clone()).file_name(file_name.clone());
            let form = multipart::Form::new().part("file", part);
            self.client.post(&url).query(query).multipart(form)
        })?;
        Ok(())
    }

    fn project_id(&self, workspace: &str, project: &str) -> Result<String, CometxError> {
        let value = self.get_json(
            "project",
            &[("workspaceName", workspace), ("projectName", project)],
        )?;
        value
            .get("projectId")
            .and_then(Value::as_str)
            .map(str::to_string)
            .ok_or_else(|| CometxError::NotFound(format!("{workspace}/{project}")))
    }

    fn registry_entries(
        value: &Value,
        list_field: &str,
        name_field: &str,
    ) -> Vec<RegistryEntry> {
        value
            .get(list_field)
            .and_then(Value::as_array)
            .map(|items| {
                items
                    .iter()
                    .filter_map(|item| {
                        let name = item.get(name_field).and_then(Value::as_str)?;
                        let versions = item
                            .get("versions")
                            .and_then(Value::as_array)
                            .map(|versions| {
                                versions
                                    .iter()
                                    .filter_map(|version| {
                                        version
                                            .get("version")
                                            .and_then(Value::as_str)
                                            .or_else(|| version.as_str())
                                            .map(str::to_string)
                                    })
                                    .collect()
                            })
                            .unwrap_or_default();
                        Some(RegistryEntry {
                            name: name.to_string(),
                            versions,
                        })
                    })
                    .collect()
            })
            .unwrap_or_default()
    }
}

fn field<T: for<'de> Deserialize<'de>>(value: Value, name: &str) -> Result<T, CometxError> {
    let inner = match value {
        Value::Object(mut map) => map.remove(name).unwrap_or(Value::Array(Vec::new())),
        other => other,
    };
    serde_json::from_value(inner).map_err(|err| CometxError::Http(err.to_string()))
}

fn text_field(value: Option<Value>, name: &str) -> Option<String> {
    value
        .and_then(|value| value.get(name).and_then(Value::as_str).map(str::to_string))
        .filter(|text| !text.is_empty())
}

fn version_query(version: Option<&str>) -> Vec<(&'static str, &str)> {
    match version {
        Some(version) if version.chars().next().is_some_and(|ch| ch.is_ascii_digit()) => {
            vec![("version", version)]
        }
        Some(alias) => vec![("alias", alias)],
        None => Vec::new(),
    }
}

fn model_version_query(version: Option<&str>) -> Vec<(&'static str, &str)> {
    version_query(version)
        .into_iter()
        .map(|(key, value)| (if key == "alias" { "stage" } else { key }, value))
        .collect()
}

impl CometClient for CometHttpClient {
    fn workspaces(&self) -> Result<Vec<String>, CometxError> {
        field(self.get_json("workspaces", &[])?, "workspaceNames")
    }

    fn projects(&self, workspace: &str) -> Result<Vec<ProjectInfo>, CometxError> {
        field(
            self.get_json("projects", &[("workspaceName", workspace)])?,
            "projects",
        )
    }

    fn experiments(
        &self,
        workspace: &str,
        project: &str,
    ) -> Result<Vec<ExperimentInfo>, CometxError> {
        let project_id = self.project_id(workspace, project)?;
        let mut experiments: Vec<ExperimentInfo> = field(
            self.get_json("experiments", &[("projectId", &project_id)])?,
            "experiments",
        )?;
        for experiment in &mut experiments {
            experiment
                .project_name
                .get_or_insert_with(|| project.to_string());
            experiment
                .workspace_name
                .get_or_insert_with(|| workspace.to_string());
        }
        Ok(experiments)
    }

    fn project_details(&self, workspace: &str, project: &str) -> Result<Value, CometxError> {
        self.get_json(
            "project",
            &[("workspaceName", workspace), ("projectName", project)],
        )
    }

    fn experiment_json(
        &self,
        experiment_key: &str,
        document: JsonDocument,
    ) -> Result<Option<Value>, CometxError> {
        let query = [("experimentKey", experiment_key)];
        let (endpoint, list_field) = match document {
            JsonDocument::Metadata => ("experiment/metadata", None),
            JsonDocument::Parameters => ("experiment/parameters", Some("values")),
            JsonDocument::Others => ("experiment/log-other", Some("logOtherList")),
            JsonDocument::SystemDetails => ("experiment/system-details", None),
            JsonDocument::GitMetadata => ("experiment/git/metadata", None),
            JsonDocument::MetricsSummary => ("experiment/metrics/summary", Some("values")),
        };
        let value = self.get_optional_json(endpoint, &query)?;
        Ok(match (value, list_field) {
            (Some(Value::Object(mut map)), Some(name)) => map.remove(name),
            (value, _) => value,
        })
    }

    fn experiment_text(
        &self,
        experiment_key: &str,
        document: TextDocument,
    ) -> Result<Option<String>, CometxError> {
        let query = [("experimentKey", experiment_key)];
        match document {
            TextDocument::Html => Ok(text_field(
                self.get_optional_json("experiment/html", &query)?,
                "html",
            )),
            TextDocument::Output => Ok(text_field(
                self.get_optional_json("experiment/output", &query)?,
                "output",
            )),
            TextDocument::Graph => Ok(text_field(
                self.get_optional_json("experiment/graph", &query)?,
                "graph",
            )),
            TextDocument::Code => Ok(text_field(
                self.get_optional_json("experiment/code", &query)?,
                "code",
            )),
            TextDocument::Requirements => {
                let packages = self.get_optional_json("experiment/installed-packages", &query)?;
                Ok(packages
                    .and_then(|value| {
                        value.as_array().map(|items| {
                            items
                                .iter()
                                .filter_map(Value::as_str)
                                .collect::<Vec<_>>()
                                .join("\n")
                        })
                    })
                    .filter(|text| !text.is_empty()))
            }
        }
    }

    fn metric_series(
        &self,
        experiment_key: &str,
        metric_name: &str,
    ) -> Result<Vec<MetricRecord>, CometxError> {
        field(
            self.get_json(
                "experiment/metrics/get-metric",
                &[("experimentKey", experiment_key), ("metricName", metric_name)],
            )?,
            "metrics",
        )
    }

    fn git_patch(&self, experiment_key: &str) -> Result<Option<Vec<u8>>, CometxError> {
        match self.get("experiment/git/patch", &[("experimentKey", experiment_key)]) {
            Ok(response) => {
                let bytes = response
                    .bytes()
                    .map_err(|err| CometxError::Http(err.to_string()))?;
                Ok((!bytes.is_empty()).then(|| bytes.to_vec()))
            }
            Err(CometxError::NotFound(_)) => Ok(None),
            Err(err) => Err(err),
        }
    }

    fn assets(
        &self,
        experiment_key: &str,
        asset_type: Option<&str>,
    ) -> Result<Vec<AssetInfo>, CometxError> {
        let mut query = vec![("experimentKey", experiment_key)];
        query.push(("type", asset_type.unwrap_or("all")));
        field(self.get_json("experiment/asset/list", &query)?, "assets")
    }

    fn download_asset(
        &self,
        experiment_key: &str,
        asset_id: &str,
        destination: &Path,
    ) -> Result<(), CometxError> {
        self.get_to_file(
            "experiment/asset/get-asset",
            &[("experimentKey", experiment_key), ("assetId", asset_id)],
            destination,
        )
    }

    fn artifacts(&self, workspace: &str) -> Result<Vec<RegistryEntry>, CometxError> {
        let value = self.get_json("artifacts/get-all", &[("workspace", workspace)])?;
        Ok(Self::registry_entries(&value, "artifacts", "name"))
    }

    fn models(&self, workspace: &str) -> Result<Vec<RegistryEntry>, CometxError> {
        let value = self.get_json("registry-model/get-all", &[("workspaceName", workspace)])?;
        Ok(Self::registry_entries(&value, "registryModels", "modelName"))
    }

    fn download_artifact(
        &self,
        workspace: &str,
        name: &str,
        version: Option<&str>,
        destination: &Path,
    ) -> Result<(), CometxError> {
        let mut query = vec![("workspace", workspace), ("artifactName", name)];
        query.extend(version_query(version));
        self.get_to_file("artifacts/version/download", &query, destination)
    }

    fn download_model(
        &self,
        workspace: &str,
        name: &str,
        version: Option<&str>,
        destination: &Path,
    ) -> Result<(), CometxError> {
        let mut query = vec![("workspaceName", workspace), ("modelName", name)];
        query.extend(model_version_query(version));
        self.get_to_file("registry-model/item/download", &query, destination)
    }

    fn create_project(
        &self,
        workspace: &str,
        project: &str,
        description: Option<&str>,
        public: bool,
    ) -> Result<(), CometxError> {
        self.post_json(
            "write/project",
            &json!({
                "workspaceName": workspace,
                "projectName": project,
                "projectDescription": description.unwrap_or_default(),
                "isPublic": public,
            }),
        )?;
        Ok(())
    }

    fn create_experiment(&self, workspace: &str, project: &str) -> Result<String, CometxError> {
        let value = self.post_json(
            "write/experiment/create",
            &json!({ "workspaceName": workspace, "projectName": project }),
        )?;
        value
            .get("experimentKey")
            .and_then(Value::as_str)
            .map(str::to_string)
            .ok_or_else(|| CometxError::Http("missing experimentKey in response".to_string()))
    }

    fn create_symlink(&self, experiment_key: &str, project: &str) -> Result<(), CometxError> {
        self.post_json(
            "write/project/symlink",
            &json!({ "experimentKey": experiment_key, "projectName": project }),
        )?;
        Ok(())
    }

    fn log_metric(&self, experiment_key: &str, metric: &MetricRecord) -> Result<(), CometxError> {
        self.post_json(
            "write/experiment/metric",
            &json!({
                "experimentKey": experiment_key,
                "metricName": metric.metric_name,
                "metricValue": metric.metric_value,
                "step": metric.step,
                "epoch": metric.epoch,
                "timestamp": metric.timestamp,
                "context": metric.run_context,
            }),
        )?;
        Ok(())
    }

    fn log_parameter(
        &self,
        experiment_key: &str,
        name: &str,
        value: &Value,
    ) -> Result<(), CometxError> {
        self.post_json(
            "write/experiment/parameter",
            &json!({
                "experimentKey": experiment_key,
                "parameterName": name,
                "parameterValue": value,
            }),
        )?;
        Ok(())
    }

    fn log_other(
        &self,
        experiment_key: &str,
        name: &str,
        value: &Value,
    ) -> Result<(), CometxError> {
        self.post_json(
            "write/experiment/log-other",
            &json!({ "experimentKey": experiment_key, "key": name, "value": value }),
        )?;
        Ok(())
    }

    fn add_tags(&self, experiment_key: &str, tags: &[String]) -> Result<(), CometxError> {
        self.post_json(
            "write/experiment/tags",
            &json!({ "experimentKey": experiment_key, "addedTags": tags }),
        )?;
        Ok(())
    }

    fn set_file_name(&self, experiment_key: &str, file_name: &str) -> Result<(), CometxError> {
        self.post_json(
            "write/experiment/file-path",
            &json!({ "experimentKey": experiment_key, "filePath": file_name }),
        )?;
        Ok(())
    }

    fn log_text(
        &self,
        experiment_key: &str,
        document: TextDocument,
        text: &str,
    ) -> Result<(), CometxError> {
        let (endpoint, body) = match document {
            TextDocument::Html => (
                "write/experiment/html",
                json!({ "experimentKey": experiment_key, "html": text, "override": false }),
            ),
            TextDocument::Output => (
                "write/experiment/output",
                json!({
                    "experimentKey": experiment_key,
                    "outputLines": text
                        .lines()
                        .map(|line| json!({ "output": format!("{line}\n"), "stderr": false }))
                        .collect::<Vec<_>>(),
                }),
            ),
            TextDocument::Requirements => (
                "write/experiment/installed-packages",
                json!({
                    "experimentKey": experiment_key,
                    "installedPackages": text
                        .lines()
                        .map(str::trim)
                        .filter(|line| !line.is_empty())
                        .collect::<Vec<_>>(),
                }),
            ),
            TextDocument::Graph => (
                "write/experiment/graph",
                json!({ "experimentKey": experiment_key, "graph": text }),
            ),
            TextDocument::Code => (
                "write/experiment/code",
                json!({ "experimentKey": experiment_key, "code": text }),
            ),
        };
        self.post_json(endpoint, &body)?;
        Ok(())
    }

    fn log_code(
        &self,
        experiment_key: &str,
        file_name: &str,
        code: &str,
    ) -> Result<(), CometxError> {
        self.post_file(
            "write/experiment/upload-asset",
            &[
                ("experimentKey", experiment_key.to_string()),
                ("fileName", file_name.to_string()),
                ("type", "source_code".to_string()),
            ],
            file_name,
            code.as_bytes().to_vec(),
        )
    }

    fn log_system_details(
        &self,
        experiment_key: &str,
        details: &Value,
    ) -> Result<(), CometxError> {
        let mut body = details.clone();
        if let Value::Object(map) = &mut body {
            map.insert("experimentKey".to_string(), json!(experiment_key));
        }
        self.post_json("write/experiment/system-details", &body)?;
        Ok(())
    }

    fn log_git_metadata(
        &self,
        experiment_key: &str,
        metadata: &Value,
    ) -> Result<(), CometxError> {
        let pick = |name: &str| metadata.get(name).cloned().unwrap_or(Value::Null);
        self.post_json(
            "write/experiment/git/metadata",
            &json!({
                "experimentKey": experiment_key,
                "user": pick("user"),
                "root": pick("root"),
                "branch": pick("branch"),
                "parent": pick("parent"),
                "origin": pick("origin"),
            }),
        )?;
        Ok(())
    }

    fn upload_git_patch(&self, experiment_key: &str, zipped: &[u8]) -> Result<(), CometxError> {
        self.post_file(
            "write/experiment/git/patch",
            &[("experimentKey", experiment_key.to_string())],
            "git_diff.zip",
            zipped.to_vec(),
        )
    }

    fn upload_asset(
        &self,
        experiment_key: &str,
        upload: &AssetUpload<'_>,
    ) -> Result<(), CometxError> {
        let bytes =
            std::fs::read(upload.path).map_err(|err| CometxError::Filesystem(err.to_string()))?;
        let mut query = vec![
            ("experimentKey", experiment_key.to_string()),
            ("fileName", upload.file_name.to_string()),
            ("type", upload.asset_type.to_string()),
        ];
        if let Some(step) = upload.step {
            query.push(("step", step.to_string()));
        }
        if let Some(epoch) = upload.epoch {
            query.push(("epoch", epoch.to_string()));
        }
        if let Some(metadata) = upload.metadata {
            query.push(("metadata", metadata.to_string()));
        }
        self.post_file(
            "write/experiment/upload-asset",
            &query,
            upload.file_name,
            bytes,
        )
    }

    fn delete_asset(&self, experiment_key: &str, asset_id: &str) -> Result<(), CometxError> {
        self.get(
            "experiment/asset/delete",
            &[("experimentKey", experiment_key), ("assetId", asset_id)],
        )?;
        Ok(())
    }
}

fn is_retryable_status(status: u16) -> bool {
    matches!(status, 429 | 500 | 502 | 503 | 504)
}

fn is_retryable_error(err: &reqwest::Error) -> bool {
    err.is_timeout() || err.is_connect() || err.is_request()
}
