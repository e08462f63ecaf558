use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;

use clap::ValueEnum;
use regex::Regex;
use serde::Serialize;

use crate::error::CometxError;

pub const ARTIFACTS_SEGMENT: &str = "artifacts";
pub const MODEL_REGISTRY_SEGMENT: &str = "model-registry";

#[derive(Debug, Clone)]
pub struct NamePattern {
    raw: String,
    regex: Regex,
}

impl NamePattern {
    pub fn new(raw: &str) -> Result<Self, CometxError> {
        let body = raw
            .split('*')
            .map(regex::escape)
            .collect::<Vec<_>>()
            .join(".*");
        let regex = Regex::new(&format!("^{body}$")).map_err(|err| CometxError::InvalidPath {
            path: raw.to_string(),
            reason: err.to_string(),
        })?;
        Ok(Self {
            raw: raw.to_string(),
            regex,
        })
    }

    pub fn as_str(&self) -> &str {
        &self.raw
    }

    pub fn is_any(&self) -> bool {
        self.raw == "*"
    }

    pub fn matches(&self, value: &str) -> bool {
        self.regex.is_match(value)
    }
}

impl PartialEq for NamePattern {
    fn eq(&self, other: &Self) -> bool {
        self.raw == other.raw
    }
}

impl Eq for NamePattern {}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Segment {
    Literal(String),
    Pattern(NamePattern),
}

impl Segment {
    fn parse(raw: &str) -> Result<Self, CometxError> {
        if raw.contains('*') {
            Ok(Segment::Pattern(NamePattern::new(raw)?))
        } else {
            Ok(Segment::Literal(raw.to_string()))
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            Segment::Literal(value) => value,
            Segment::Pattern(pattern) => pattern.as_str(),
        }
    }

    pub fn literal(&self) -> Option<&str> {
        match self {
            Segment::Literal(value) => Some(value),
            Segment::Pattern(_) => None,
        }
    }

    pub fn is_pattern(&self) -> bool {
        matches!(self, Segment::Pattern(_))
    }

    pub fn is_any(&self) -> bool {
        matches!(self, Segment::Pattern(pattern) if pattern.is_any())
    }

    pub fn matches(&self, value: &str) -> bool {
        match self {
            Segment::Literal(literal) => literal == value,
            Segment::Pattern(pattern) => pattern.matches(value),
        }
    }
}

impl fmt::Display for Segment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Identifier {
    pub workspace: String,
    pub project: Option<Segment>,
    pub experiment: Option<Segment>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Granularity {
    Workspace,
    Project,
    Experiment,
    Partial,
}

impl fmt::Display for Granularity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Granularity::Workspace => write!(f, "workspace"),
            Granularity::Project => write!(f, "project"),
            Granularity::Experiment => write!(f, "experiment"),
            Granularity::Partial => write!(f, "pattern"),
        }
    }
}

impl Identifier {
    pub fn workspace(workspace: &str) -> Self {
        Self {
            workspace: workspace.to_string(),
            project: None,
            experiment: None,
        }
    }

    pub fn segments(&self) -> Vec<&str> {
        let mut segments = vec![self.workspace.as_str()];
        if let Some(project) = &self.project {
            segments.push(project.as_str());
        }
        if let Some(experiment) = &self.experiment {
            segments.push(experiment.as_str());
        }
        segments
    }

    pub fn granularity(&self) -> Granularity {
        let any = |segment: &Option<Segment>| segment.as_ref().is_none_or(Segment::is_any);
        match (&self.project, &self.experiment) {
            (project, experiment) if any(project) && any(experiment) => Granularity::Workspace,
            (Some(Segment::Literal(_)), experiment) if any(experiment) => Granularity::Project,
            (Some(Segment::Literal(_)), Some(Segment::Literal(_))) => Granularity::Experiment,
            _ => Granularity::Partial,
        }
    }

    pub fn project_name(&self) -> Option<&str> {
        self.project.as_ref().and_then(Segment::literal)
    }

    pub fn experiment_key(&self) -> Option<&str> {
        self.experiment.as_ref().and_then(Segment::literal)
    }

    pub fn matches_project(&self, name: &str) -> bool {
        self.project.as_ref().is_none_or(|segment| segment.matches(name))
    }

    pub fn matches_experiment(&self, key: &str, name: Option<&str>) -> bool {
        match &self.experiment {
            None => true,
            Some(segment) => segment.matches(key) || name.is_some_and(|name| segment.matches(name)),
        }
    }
}

impl fmt::Display for Identifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.segments().join("/"))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RegistryKind {
    Artifacts,
    Models,
}

impl RegistryKind {
    pub fn segment(self) -> &'static str {
        match self {
            RegistryKind::Artifacts => ARTIFACTS_SEGMENT,
            RegistryKind::Models => MODEL_REGISTRY_SEGMENT,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RegistryPath {
    pub kind: RegistryKind,
    pub workspace: String,
    pub name: Option<Segment>,
    pub version: Option<String>,
}

impl RegistryPath {
    pub fn matches_name(&self, name: &str) -> bool {
        self.name.as_ref().is_none_or(|segment| segment.matches(name))
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CometPath {
    Scope(Identifier),
    Registry(RegistryPath),
}

impl CometPath {
    pub fn workspace(&self) -> &str {
        match self {
            CometPath::Scope(identifier) => &identifier.workspace,
            CometPath::Registry(registry) => &registry.workspace,
        }
    }

    pub fn into_scope(self, original: &str) -> Result<Identifier, CometxError> {
        match self {
            CometPath::Scope(identifier) => Ok(identifier),
            CometPath::Registry(_) => Err(CometxError::InvalidPath {
                path: original.to_string(),
                reason: "registry paths are not valid here".to_string(),
            }),
        }
    }
}

pub fn clean_path(value: &str) -> String {
    value
        .trim()
        .split('/')
        .filter(|segment| !segment.is_empty())
        .collect::<Vec<_>>()
        .join("/")
}

impl FromStr for CometPath {
    type Err = CometxError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let invalid = |reason: &str| CometxError::InvalidPath {
            path: value.to_string(),
            reason: reason.to_string(),
        };
        let cleaned = clean_path(value);
        if cleaned.is_empty() {
            return Err(invalid("path is empty"));
        }
        let parts = cleaned.split('/').collect::<Vec<_>>();
        let workspace = parts[0];
        if workspace.contains('*') {
            return Err(invalid("workspace cannot be a wildcard"));
        }

        let registry = match parts.get(1) {
            Some(&ARTIFACTS_SEGMENT) => Some(RegistryKind::Artifacts),
            Some(&MODEL_REGISTRY_SEGMENT) => Some(RegistryKind::Models),
            _ => None,
        };
        if let Some(kind) = registry {
            if parts.len() > 4 {
                return Err(invalid("too many segments"));
            }
            let name = parts.get(2).map(|raw| Segment::parse(raw)).transpose()?;
            let version = parts.get(3).map(|raw| raw.to_string());
            if version.is_some() && name.as_ref().is_some_and(Segment::is_pattern) {
                return Err(invalid("a version requires a literal name"));
            }
            return Ok(CometPath::Registry(RegistryPath {
                kind,
                workspace: workspace.to_string(),
                name,
                version,
            }));
        }

        if parts.len() > 3 {
            return Err(invalid("too many segments"));
        }
        let project = parts.get(1).map(|raw| Segment::parse(raw)).transpose()?;
        let experiment = parts.get(2).map(|raw| Segment::parse(raw)).transpose()?;
        if project.as_ref().is_some_and(Segment::is_pattern)
            && experiment.as_ref().is_some_and(|segment| !segment.is_pattern())
        {
            return Err(invalid("only trailing segments may be wildcards"));
        }
        Ok(CometPath::Scope(Identifier {
            workspace: workspace.to_string(),
            project,
            experiment,
        }))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum ResourceKind {
    ProjectMetadata,
    Metadata,
    Parameters,
    Others,
    Metrics,
    Html,
    System,
    Assets,
    Code,
    Git,
    Output,
    Requirements,
    Graph,
    Artifacts,
    ModelRegistry,
}

impl ResourceKind {
    pub const EXPERIMENT: [ResourceKind; 12] = [
        ResourceKind::Metadata,
        ResourceKind::Parameters,
        ResourceKind::Others,
        ResourceKind::Metrics,
        ResourceKind::Html,
        ResourceKind::System,
        ResourceKind::Assets,
        ResourceKind::Code,
        ResourceKind::Git,
        ResourceKind::Output,
        ResourceKind::Requirements,
        ResourceKind::Graph,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            ResourceKind::ProjectMetadata => "project",
            ResourceKind::Metadata => "metadata",
            ResourceKind::Parameters => "parameters",
            ResourceKind::Others => "others",
            ResourceKind::Metrics => "metrics",
            ResourceKind::Html => "html",
            ResourceKind::System => "system",
            ResourceKind::Assets => "assets",
            ResourceKind::Code => "code",
            ResourceKind::Git => "git",
            ResourceKind::Output => "output",
            ResourceKind::Requirements => "requirements",
            ResourceKind::Graph => "graph",
            ResourceKind::Artifacts => "artifacts",
            ResourceKind::ModelRegistry => "model-registry",
        }
    }

    pub fn default_set() -> BTreeSet<ResourceKind> {
        let mut kinds = BTreeSet::from(Self::EXPERIMENT);
        kinds.insert(ResourceKind::ProjectMetadata);
        kinds
    }
}

impl fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum ResourceName {
    Assets,
    Html,
    Metadata,
    Metrics,
    Others,
    Parameters,
    Project,
    Run,
    System,
    Artifacts,
    ModelRegistry,
    Code,
    Git,
    Output,
    Requirements,
    Graph,
}

impl ResourceName {
    pub fn expand(self) -> Vec<ResourceKind> {
        match self {
            ResourceName::Assets => vec![ResourceKind::Assets],
            ResourceName::Html => vec![ResourceKind::Html],
            ResourceName::Metadata => vec![ResourceKind::Metadata],
            ResourceName::Metrics => vec![ResourceKind::Metrics],
            ResourceName::Others => vec![ResourceKind::Others],
            ResourceName::Parameters => vec![ResourceKind::Parameters],
            ResourceName::Project => vec![ResourceKind::ProjectMetadata],
            ResourceName::Run => vec![
                ResourceKind::Code,
                ResourceKind::Git,
                ResourceKind::Output,
                ResourceKind::Requirements,
                ResourceKind::Graph,
            ],
            ResourceName::System => vec![ResourceKind::System],
            ResourceName::Artifacts => vec![ResourceKind::Artifacts],
            ResourceName::ModelRegistry => vec![ResourceKind::ModelRegistry],
            ResourceName::Code => vec![ResourceKind::Code],
            ResourceName::Git => vec![ResourceKind::Git],
            ResourceName::Output => vec![ResourceKind::Output],
            ResourceName::Requirements => vec![ResourceKind::Requirements],
            ResourceName::Graph => vec![ResourceKind::Graph],
        }
    }
}

impl FromStr for ResourceName {
    type Err = CometxError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        <ResourceName as ValueEnum>::from_str(value.trim(), true)
            .map_err(|_| CometxError::InvalidResource(value.to_string()))
    }
}

pub fn select_resources(
    requested: &[ResourceName],
    ignored: &[ResourceName],
) -> BTreeSet<ResourceKind> {
    let mut kinds = if requested.is_empty() {
        ResourceKind::default_set()
    } else {
        requested.iter().flat_map(|name| name.expand()).collect()
    };
    for name in ignored {
        for kind in name.expand() {
            kinds.remove(&kind);
        }
    }
    kinds
}

pub fn asset_type_for_file(file_name: &str) -> &'static str {
    let extension = file_name
        .rsplit_once('.')
        .map(|(_, ext)| ext.to_ascii_lowercase())
        .unwrap_or_default();
    match extension.as_str() {
        "png" | "jpg" | "gif" => "image",
        "txt" => "text-sample",
        "webm" | "mp4" | "ogg" => "video",
        "ipynb" => "notebook",
        "wav" | "mp3" => "audio",
        "datagrid" => "datagrid",
        _ => "asset",
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum LogType {
    All,
    Asset,
    Audio,
    Code,
    Image,
    Metrics,
    Notebook,
    #[value(alias = "text")]
    TextSample,
    Video,
    Other,
    Parameters,
    Datagrid,
}

impl LogType {
    pub fn asset_type(self) -> Option<&'static str> {
        match self {
            LogType::Asset => Some("asset"),
            LogType::Audio => Some("audio"),
            LogType::Image => Some("image"),
            LogType::Notebook => Some("notebook"),
            LogType::TextSample => Some("text-sample"),
            LogType::Video => Some("video"),
            LogType::Datagrid => Some("datagrid"),
            LogType::All
            | LogType::Code
            | LogType::Metrics
            | LogType::Other
            | LogType::Parameters => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyValue {
    pub key: String,
    pub value: String,
}

impl KeyValue {
    pub fn value_for(&self, index: usize) -> String {
        self.value.replace("{count}", &(index + 1).to_string())
    }
}

impl FromStr for KeyValue {
    type Err = CometxError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let (key, rest) = value
            .split_once(':')
            .ok_or_else(|| CometxError::InvalidSet(value.to_string()))?;
        if key.trim().is_empty() {
            return Err(CometxError::InvalidSet(value.to_string()));
        }
        Ok(Self {
            key: key.trim().to_string(),
            value: rest.to_string(),
        })
    }
}
