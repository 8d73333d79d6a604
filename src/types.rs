use std::fmt;
use std::str::FromStr;

/// Message severity, totally ordered by increasing severity (§3 of the
/// journal data model).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Severity {
    Debug,
    Info,
    Warning,
    Error,
    Fatal,
    Log,
}

impl Severity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Severity::Debug => "DEBUG",
            Severity::Info => "INFO",
            Severity::Warning => "WARNING",
            Severity::Error => "ERROR",
            Severity::Fatal => "FATAL",
            Severity::Log => "LOG",
        }
    }

    /// All severities at or above `threshold`, the set the renderer lets
    /// through.
    pub fn upward_closure(threshold: Severity) -> Vec<Severity> {
        [
            Severity::Debug,
            Severity::Info,
            Severity::Warning,
            Severity::Error,
            Severity::Fatal,
            Severity::Log,
        ]
        .into_iter()
        .filter(|s| *s >= threshold)
        .collect()
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for Severity {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_uppercase().as_str() {
            "DEBUG" => Ok(Severity::Debug),
            "INFO" => Ok(Severity::Info),
            "WARNING" => Ok(Severity::Warning),
            "ERROR" => Ok(Severity::Error),
            "FATAL" => Ok(Severity::Fatal),
            "LOG" => Ok(Severity::Log),
            other => Err(format!("unknown severity: {other}")),
        }
    }
}

/// The two dump modes accepted by the `dump` verb.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DumpMode {
    Raw,
    Pretty,
}

impl FromStr for DumpMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "raw" => Ok(DumpMode::Raw),
            "pretty" => Ok(DumpMode::Pretty),
            other => Err(format!("unknown dump mode: {other}")),
        }
    }
}

/// One `PackageInfo` lookup result.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PackageDetails {
    pub name: String,
    pub version: String,
    pub release: String,
    pub arch: String,
    pub sourcerpm: String,
    pub buildtime: Option<i64>,
}

/// Outcome of a `PackageInfo::lookup` call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PackageLookup {
    Installed(PackageDetails),
    NotInstalled,
}

/// Host facts collected at `init` time.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HostFactsSnapshot {
    pub hostname: String,
    pub arch: String,
    pub cpu: String,
    pub ram: String,
    pub hdd: String,
    pub release: String,
}

/// Result of `finPhase`, mirrored back through the pipe reply.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FinPhaseOutcome {
    pub result: String,
    pub score: u32,
    pub phase_type: String,
    pub name: String,
}
