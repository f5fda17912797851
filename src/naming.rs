//! Branch and storage-path derivation.
//!
//! Each environment lives on its own branch (`jenkins-store-<env>`).  The
//! write and read paths do not agree on where a tenant's file lives: writes
//! land on `<file>` at the repository root (with an empty `<tenant>` folder
//! created alongside), reads look under `tenants/<tenant>/<file>`.  Both are
//! part of the observable contract and are kept as-is.

use std::fmt;
use std::str::FromStr;

pub const BRANCH_PREFIX: &str = "jenkins-store-";
pub const DEFAULT_FILE_NAME: &str = "Whitelist.csv";
pub const READ_ROOT: &str = "tenants";

/// Deployment environments that have a whitelist branch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Environment {
    Ort,
    Int,
    Prod,
    Dev,
    Staging,
    Test,
}

impl Environment {
    pub const ALL: [Environment; 6] = [
        Environment::Ort,
        Environment::Int,
        Environment::Prod,
        Environment::Dev,
        Environment::Staging,
        Environment::Test,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Ort => "ort",
            Self::Int => "int",
            Self::Prod => "prod",
            Self::Dev => "dev",
            Self::Staging => "staging",
            Self::Test => "test",
        }
    }

    pub fn branch_name(&self) -> String {
        format!("{BRANCH_PREFIX}{}", self.as_str())
    }
}

impl fmt::Display for Environment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown environment: {0}")]
pub struct UnknownEnvironment(pub String);

impl FromStr for Environment {
    type Err = UnknownEnvironment;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let lowered = s.to_lowercase();
        Environment::ALL
            .into_iter()
            .find(|env| env.as_str() == lowered)
            .ok_or_else(|| UnknownEnvironment(s.to_string()))
    }
}

/// Branch for an environment string as supplied by the caller.
///
/// Unknown environments still map to `jenkins-store-<lowercased>`; callers
/// validate first.
pub fn branch_name(environment: &str) -> String {
    match environment.parse::<Environment>() {
        Ok(env) => env.branch_name(),
        Err(_) => format!("{BRANCH_PREFIX}{}", environment.to_lowercase()),
    }
}

/// Folder and file location of a tenant's whitelist inside the repository.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WhitelistTarget {
    pub folder: String,
    pub file: String,
    pub file_path: String,
}

impl WhitelistTarget {
    /// Location used by `add`: the file sits at the repository root.
    pub fn for_write(tenant: &str, file: &str) -> Self {
        Self {
            folder: tenant.to_string(),
            file: file.to_string(),
            file_path: file.to_string(),
        }
    }

    /// Location used by `view`: `tenants/<tenant>/<file>`.
    pub fn for_read(tenant: &str, file: &str) -> Self {
        let folder = format!("{READ_ROOT}/{tenant}");
        let file_path = format!("{folder}/{file}");
        Self {
            folder,
            file: file.to_string(),
            file_path,
        }
    }
}
