use std::io;
use thiserror::Error;

/// Startup/config failures: always stderr + process exit 1 (spec §7).
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("{0} not defined in the environment")]
    MissingEnv(&'static str),

    #[error("{name}={value} is not a valid value")]
    InvalidEnv { name: &'static str, value: String },

    #[error("{path} does not exist")]
    PipeMissing { path: String },

    #[error("reading config {path}: {source}")]
    Read { path: String, source: io::Error },

    #[error("parsing config {path}: {source}")]
    Parse {
        path: String,
        source: toml::de::Error,
    },
}

/// Errors raised by the Journal Engine. These never panic and never abort
/// the daemon; the dispatcher turns them into a non-zero pipe-reply status.
#[derive(Error, Debug)]
pub enum EngineError {
    #[error("no phase is open")]
    NoOpenPhase,

    #[error("metric name not unique: {0}")]
    DuplicateMetric(String),

    #[error("failed to read PURPOSE: {0}")]
    PurposeUnreadable(#[source] io::Error),

    #[error("{0}")]
    Io(#[from] io::Error),

    #[error("bad dump mode: {0}")]
    BadDumpMode(String),

    #[error("journal document invariant violated: {0}")]
    Corrupt(String),
}

/// Errors raised while tokenising or routing one command line.
#[derive(Error, Debug)]
pub enum ProtocolError {
    #[error("unknown verb: {0}")]
    UnknownVerb(String),

    #[error("missing required option: {0}")]
    MissingOption(&'static str),

    #[error("failed to parse numeric value: {0}")]
    BadNumber(String),

    #[error("failed to tokenise command line: {0}")]
    Tokenize(String),

    #[error(transparent)]
    Engine(#[from] EngineError),
}
