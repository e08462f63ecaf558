use std::collections::{BTreeMap, BTreeSet};

use camino::{Utf8Component, Utf8Path, Utf8PathBuf};

use crate::comet::ExperimentInfo;
use crate::domain::RegistryKind;

pub const PROJECT_METADATA_FILE: &str = "project_metadata.json";
pub const LATEST_VERSION: &str = "latest";
pub const FLAT_CODE_PREFIX: &str = "code-";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LayoutMode {
    Hierarchical,
    Flat,
    SingleRun,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NamingMode {
    ByKey,
    ByName,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MirrorFile {
    Metadata,
    Parameters,
    Others,
    Html,
    SystemDetails,
    MetricsSummary,
    MetricSeries(usize),
    AssetsIndex,
    Asset { asset_type: String, file_name: String },
    Output,
    Requirements,
    Graph,
    GitMetadata,
    GitPatch,
    Code(String),
}

impl MirrorFile {
    pub fn relative(&self, mode: LayoutMode) -> Utf8PathBuf {
        let hierarchical = mode == LayoutMode::Hierarchical;
        match self {
            MirrorFile::Metadata => "metadata.json".into(),
            MirrorFile::Parameters => "parameters.json".into(),
            MirrorFile::Others => "others.jsonl".into(),
            MirrorFile::Html => "experiment.html".into(),
            MirrorFile::SystemDetails => "system_details.json".into(),
            MirrorFile::MetricsSummary => "metrics_summary.jsonl".into(),
            MirrorFile::MetricSeries(index) => {
                let name = format!("metric_{index:05}.jsonl");
                if hierarchical {
                    Utf8PathBuf::from("metrics").join(name)
                } else {
                    name.into()
                }
            }
            MirrorFile::AssetsIndex => {
                if hierarchical {
                    "assets/assets_metadata.jsonl".into()
                } else {
                    "assets_metadata.jsonl".into()
                }
            }
            MirrorFile::Asset {
                asset_type,
                file_name,
            } => {
                if hierarchical {
                    Utf8PathBuf::from("assets")
                        .join(flatten_name(asset_type))
                        .join(safe_relative(file_name))
                } else {
                    format!("{}-{}", flatten_name(asset_type), flatten_name(file_name)).into()
                }
            }
            MirrorFile::Output => run_file("output.txt", hierarchical),
            MirrorFile::Requirements => run_file("requirements.txt", hierarchical),
            MirrorFile::Graph => run_file("graph_definition.txt", hierarchical),
            MirrorFile::GitMetadata => run_file("git_metadata.json", hierarchical),
            MirrorFile::GitPatch => run_file("git_diff.patch", hierarchical),
            MirrorFile::Code(file_name) => match mode {
                LayoutMode::Hierarchical => {
                    Utf8PathBuf::from("run/code").join(safe_relative(file_name))
                }
                LayoutMode::Flat => {
                    format!("{FLAT_CODE_PREFIX}{}", flatten_name(file_name)).into()
                }
                LayoutMode::SingleRun => flatten_name(file_name).into(),
            },
        }
    }
}

fn run_file(name: &str, hierarchical: bool) -> Utf8PathBuf {
    if hierarchical {
        Utf8PathBuf::from("run").join(name)
    } else {
        name.into()
    }
}

// Drops root, `.` and `..` components so remote names stay inside the mirror.
pub fn safe_relative(name: &str) -> Utf8PathBuf {
    let normalized = name.replace('\\', "/");
    let cleaned: Utf8PathBuf = Utf8Path::new(&normalized)
        .components()
        .filter_map(|component| match component {
            Utf8Component::Normal(part) => Some(part),
            _ => None,
        })
        .collect();
    if cleaned.as_str().is_empty() {
        "unnamed".into()
    } else {
        cleaned
    }
}

fn flatten_name(name: &str) -> String {
    safe_relative(name).as_str().replace('/', "_")
}

pub fn sanitize_folder_name(name: &str) -> Option<String> {
    let cleaned: String = name
        .trim()
        .chars()
        .map(|ch| {
            if ch.is_alphanumeric() || matches!(ch, '-' | '_' | '.' | ' ') {
                ch
            } else {
                '_'
            }
        })
        .collect();
    let cleaned = cleaned.trim_matches(|ch| ch == '.' || ch == ' ').to_string();
    (!cleaned.is_empty()).then_some(cleaned)
}

#[derive(Debug, Clone)]
pub struct MirrorLayout {
    root: Utf8PathBuf,
    mode: LayoutMode,
}

impl MirrorLayout {
    pub fn new(root: Utf8PathBuf, mode: LayoutMode) -> Self {
        Self { root, mode }
    }

    pub fn single_run(root: Utf8PathBuf) -> Self {
        Self::new(root, LayoutMode::SingleRun)
    }

    pub fn root(&self) -> &Utf8Path {
        &self.root
    }

    pub fn experiment_dir(&self, workspace: &str, project: &str, folder: &str) -> Utf8PathBuf {
        match self.mode {
            LayoutMode::Hierarchical => self.project_dir(workspace, project).join(folder),
            LayoutMode::Flat => self.root.join(folder),
            LayoutMode::SingleRun => self.root.clone(),
        }
    }

    pub fn project_dir(&self, workspace: &str, project: &str) -> Utf8PathBuf {
        self.root
            .join(safe_relative(workspace))
            .join(safe_relative(project))
    }

    pub fn file_path(
        &self,
        workspace: &str,
        project: &str,
        folder: &str,
        file: &MirrorFile,
    ) -> Utf8PathBuf {
        self.experiment_dir(workspace, project, folder)
            .join(file.relative(self.mode))
    }

    pub fn project_metadata_path(&self, workspace: &str, project: &str) -> Utf8PathBuf {
        match self.mode {
            LayoutMode::Hierarchical => self
                .project_dir(workspace, project)
                .join(PROJECT_METADATA_FILE),
            LayoutMode::Flat | LayoutMode::SingleRun => self.root.join(format!(
                "{}-{PROJECT_METADATA_FILE}",
                flatten_name(project)
            )),
        }
    }

    pub fn registry_dir(
        &self,
        workspace: &str,
        kind: RegistryKind,
        name: &str,
        version: Option<&str>,
    ) -> Utf8PathBuf {
        self.root
            .join(safe_relative(workspace))
            .join(kind.segment())
            .join(safe_relative(name))
            .join(safe_relative(version.unwrap_or(LATEST_VERSION)))
    }
}

// Keys are processed in sorted order, so the first experiment with a given
// display name keeps it and later ones get `-2`, `-3`, ... suffixes.
pub fn assign_folders(
    naming: NamingMode,
    experiments: &[ExperimentInfo],
) -> BTreeMap<String, String> {
    let mut ordered: Vec<&ExperimentInfo> = experiments.iter().collect();
    ordered.sort_by(|a, b| a.experiment_key.cmp(&b.experiment_key));

    let mut taken = BTreeSet::new();
    let mut folders = BTreeMap::new();
    for experiment in ordered {
        let key = experiment.experiment_key.as_str();
        let base = match naming {
            NamingMode::ByKey => safe_relative(key).as_str().replace('/', "_"),
            NamingMode::ByName => experiment
                .experiment_name
                .as_deref()
                .and_then(sanitize_folder_name)
                .unwrap_or_else(|| key.to_string()),
        };
        let mut candidate = base.clone();
        let mut suffix = 2;
        while taken.contains(&candidate) {
            candidate = format!("{base}-{suffix}");
            suffix += 1;
        }
        taken.insert(candidate.clone());
        folders.insert(key.to_string(), candidate);
    }
    folders
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hierarchical_and_flat_names() {
        let asset = MirrorFile::Asset {
            asset_type: "image".to_string(),
            file_name: "plots/loss.png".to_string(),
        };
        assert_eq!(
            asset.relative(LayoutMode::Hierarchical),
            Utf8PathBuf::from("assets/image/plots/loss.png")
        );
        assert_eq!(
            asset.relative(LayoutMode::Flat),
            Utf8PathBuf::from("image-plots_loss.png")
        );
        assert_eq!(
            MirrorFile::MetricSeries(3).relative(LayoutMode::Hierarchical),
            Utf8PathBuf::from("metrics/metric_00003.jsonl")
        );
        assert_eq!(
            MirrorFile::GitPatch.relative(LayoutMode::SingleRun),
            Utf8PathBuf::from("git_diff.patch")
        );
    }

    #[test]
    fn flat_code_does_not_shadow_run_files() {
        let code = MirrorFile::Code("requirements.txt".to_string());
        assert_eq!(
            code.relative(LayoutMode::Flat),
            Utf8PathBuf::from("code-requirements.txt")
        );
        assert_ne!(
            code.relative(LayoutMode::Flat),
            MirrorFile::Requirements.relative(LayoutMode::Flat)
        );
        assert_eq!(
            code.relative(LayoutMode::Hierarchical),
            Utf8PathBuf::from("run/code/requirements.txt")
        );
        assert_eq!(
            MirrorFile::Code("src/train.py".to_string()).relative(LayoutMode::SingleRun),
            Utf8PathBuf::from("src_train.py")
        );
    }

    #[test]
    fn remote_names_cannot_escape() {
        assert_eq!(safe_relative("../../etc/passwd"), Utf8PathBuf::from("etc/passwd"));
        assert_eq!(safe_relative("/abs/file.txt"), Utf8PathBuf::from("abs/file.txt"));
        assert_eq!(safe_relative(".."), Utf8PathBuf::from("unnamed"));
    }

    #[test]
    fn sanitize_rejects_empty_names() {
        assert_eq!(sanitize_folder_name("run/1"), Some("run_1".to_string()));
        assert_eq!(sanitize_folder_name(" .. "), None);
    }
}
