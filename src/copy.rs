use std::fs;

use camino::{Utf8Path, Utf8PathBuf};
use serde::Serialize;

use crate::comet::CometClient;
use crate::domain::{Granularity, Identifier, Segment};
use crate::error::CometxError;

// Folders in a mirror workspace that never hold projects or experiments.
const SKIPPED_FOLDERS: [&str; 3] = ["reports", "artifacts", "model-registry"];

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CopyEntry {
    pub source_workspace: String,
    pub source_project: String,
    pub experiment: String,
    pub destination_workspace: String,
    pub destination_project: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct CopyPlan {
    pub entries: Vec<CopyEntry>,
}

impl CopyPlan {
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn destination_projects(&self) -> Vec<(&str, &str)> {
        let mut projects: Vec<(&str, &str)> = Vec::new();
        for entry in &self.entries {
            let pair = (entry.source_project.as_str(), entry.destination_project.as_str());
            if !projects.contains(&pair) {
                projects.push(pair);
            }
        }
        projects
    }
}

pub fn validate_scopes(source: &Identifier, destination: &Identifier) -> Result<(), CometxError> {
    let incompatible = || CometxError::IncompatibleScope {
        source_scope: source.to_string(),
        destination_scope: destination.to_string(),
    };

    let destination_is_workspace = destination.project.is_none();
    let destination_is_project = matches!(destination.project, Some(Segment::Literal(_)))
        && destination.experiment.is_none();

    let allowed = match source.granularity() {
        Granularity::Workspace => destination_is_workspace,
        Granularity::Project | Granularity::Experiment => destination_is_project,
        Granularity::Partial => false,
    };
    if allowed { Ok(()) } else { Err(incompatible()) }
}

fn destination_project(destination: &Identifier, source_project: &str) -> String {
    destination
        .project_name()
        .unwrap_or(source_project)
        .to_string()
}

fn is_skipped(name: &str) -> bool {
    name.starts_with('.') || name.ends_with('~') || SKIPPED_FOLDERS.contains(&name)
}

fn sub_folders(dir: &Utf8Path) -> Result<Vec<String>, CometxError> {
    let entries = fs::read_dir(dir.as_std_path())
        .map_err(|err| CometxError::Filesystem(format!("read {dir}: {err}")))?;
    let mut names = Vec::new();
    for entry in entries {
        let entry = entry.map_err(|err| CometxError::Filesystem(err.to_string()))?;
        if !entry.path().is_dir() {
            continue;
        }
        let Ok(name) = entry.file_name().into_string() else {
            tracing::warn!(path = %entry.path().display(), "skipping non UTF-8 folder");
            continue;
        };
        if !is_skipped(&name) {
            names.push(name);
        }
    }
    names.sort();
    Ok(names)
}

pub fn plan_local(
    root: &Utf8Path,
    source: &Identifier,
    destination: &Identifier,
) -> Result<CopyPlan, CometxError> {
    validate_scopes(source, destination)?;
    let workspace_dir: Utf8PathBuf = root.join(&source.workspace);
    if !workspace_dir.as_std_path().is_dir() {
        return Err(CometxError::NotFound(workspace_dir.to_string()));
    }

    let mut entries = Vec::new();
    for project in sub_folders(&workspace_dir)? {
        if !source.matches_project(&project) {
            continue;
        }
        for experiment in sub_folders(&workspace_dir.join(&project))? {
            if !source.matches_experiment(&experiment, None) {
                continue;
            }
            entries.push(CopyEntry {
                source_workspace: source.workspace.clone(),
                destination_project: destination_project(destination, &project),
                source_project: project.clone(),
                experiment,
                destination_workspace: destination.workspace.clone(),
            });
        }
    }
    Ok(CopyPlan { entries })
}

pub fn plan_remote<C>(
    client: &C,
    source: &Identifier,
    destination: &Identifier,
) -> Result<CopyPlan, CometxError>
where
    C: CometClient + ?Sized,
{
    validate_scopes(source, destination)?;
    let mut projects: Vec<String> = client
        .projects(&source.workspace)?
        .into_iter()
        .map(|project| project.project_name)
        .filter(|name| source.matches_project(name))
        .collect();
    projects.sort();

    let mut entries = Vec::new();
    for project in projects {
        let mut experiments = client.experiments(&source.workspace, &project)?;
        experiments.sort_by(|a, b| a.experiment_key.cmp(&b.experiment_key));
        for experiment in experiments {
            if !source.matches_experiment(
                &experiment.experiment_key,
                experiment.experiment_name.as_deref(),
            ) {
                continue;
            }
            entries.push(CopyEntry {
                source_workspace: source.workspace.clone(),
                source_project: project.clone(),
                experiment: experiment.experiment_key,
                destination_workspace: destination.workspace.clone(),
                destination_project: destination_project(destination, &project),
            });
        }
    }
    Ok(CopyPlan { entries })
}
