use std::path::PathBuf;

use crate::rebase::{RebaseState, SYNTHETIC_VERSION};

/// Firmware version inputs, fixed before the first build runs.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct VersionState {
    pub override_version: Option<String>,
    pub release_date: Option<String>,
}

/// `RPM_PACKAGE_{NAME,VERSION,RELEASE}` as exported by rpmbuild.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PackagingIdentity {
    pub name: String,
    pub version: String,
    pub release: String,
}

impl PackagingIdentity {
    pub fn from_env() -> Option<Self> {
        Self::from_lookup(|k| std::env::var(k).ok())
    }

    /// All three values must be present and non-empty.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Option<Self> {
        let get = |k: &str| lookup(k).filter(|v| !v.trim().is_empty());
        Some(Self {
            name: get("RPM_PACKAGE_NAME")?,
            version: get("RPM_PACKAGE_VERSION")?,
            release: get("RPM_PACKAGE_RELEASE")?,
        })
    }

    pub fn version_string(&self) -> String {
        format!("{}-{}-{}", self.name, self.version, self.release)
    }
}

/// Everything a build invocation reads but never changes.
#[derive(Debug, Clone, Default)]
pub struct RunContext {
    pub workspace: PathBuf,
    pub version: VersionState,
    pub rebase: RebaseState,
    pub packaging: Option<PackagingIdentity>,
    pub jobs: Option<usize>,
    pub silent: bool,
}

impl RunContext {
    pub fn new(workspace: PathBuf, rebase: RebaseState, cli_version: Option<String>) -> Self {
        let override_version = cli_version.or_else(|| {
            rebase
                .pin_version
                .then(|| SYNTHETIC_VERSION.to_string())
        });
        Self {
            workspace,
            version: VersionState {
                override_version,
                release_date: None,
            },
            rebase,
            packaging: None,
            jobs: None,
            silent: false,
        }
    }

    /// Status line with the rebase label in front.
    pub fn title(&self, line: &str) -> String {
        format!("{}{line}", self.rebase.prefix())
    }
}
