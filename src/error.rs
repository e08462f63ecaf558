use std::path::PathBuf;

use miette::Diagnostic;
use thiserror::Error;

#[derive(Debug, Error, Diagnostic)]
pub enum CometxError {
    #[error("invalid Comet path {path:?}: {reason}")]
    #[diagnostic(help("use WORKSPACE, WORKSPACE/PROJECT or WORKSPACE/PROJECT/EXPERIMENT"))]
    InvalidPath { path: String, reason: String },

    #[error("cannot copy {source_scope} into {destination_scope}")]
    #[diagnostic(help(
        "allowed: WORKSPACE -> WORKSPACE, WORKSPACE/PROJECT -> WORKSPACE/PROJECT, \
         WORKSPACE/PROJECT/EXPERIMENT -> WORKSPACE/PROJECT"
    ))]
    IncompatibleScope {
        source_scope: String,
        destination_scope: String,
    },

    #[error("failed to fetch {resource} for experiment {experiment}: {message}")]
    ResourceFetch {
        experiment: String,
        resource: String,
        message: String,
    },

    #[error("invalid Comet API key for {url}")]
    #[diagnostic(help("set COMET_API_KEY or add api_key to the config file"))]
    Authentication { url: String },

    #[error("missing Comet API key")]
    #[diagnostic(help("set COMET_API_KEY or add api_key to the config file"))]
    MissingApiKey,

    #[error("missing workspace: give one in the path or set COMET_WORKSPACE")]
    MissingWorkspace,

    #[error("failed to read config file at {0}")]
    ConfigRead(PathBuf),

    #[error("failed to parse JSON config: {0}")]
    ConfigParse(String),

    #[error("Comet request failed: {0}")]
    Http(String),

    #[error("Comet returned status {status}: {message}")]
    Status { status: u16, message: String },

    #[error("not found: {0}")]
    NotFound(String),

    #[error("filesystem error: {0}")]
    Filesystem(String),

    #[error("invalid resource name: {0}")]
    InvalidResource(String),

    #[error("invalid value for --set, expected KEY:VALUE: {0}")]
    InvalidSet(String),

    #[error("{0}")]
    InvalidLogRequest(String),

    #[error("malformed record in {file}: {message}")]
    MalformedRecord { file: String, message: String },

    #[error("confirmation required; pass --force to proceed without a prompt")]
    ConfirmationRequired,

    #[error("cancelled")]
    Cancelled,

    #[error("reproduce script failed with {0}")]
    ScriptFailed(String),
}

impl CometxError {
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            CometxError::Authentication { .. } | CometxError::MissingApiKey
        )
    }
}
