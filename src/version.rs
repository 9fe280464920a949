//! Build metadata embedded by `build.rs`.

use serde::Serialize;

/// Package version from Cargo.toml.
pub const PKG_VERSION: &str = env!("CARGO_PKG_VERSION");

const GIT_BRANCH: Option<&str> = option_env!("VERGEN_GIT_BRANCH");
const GIT_SHA: Option<&str> = option_env!("VERGEN_GIT_SHA");
const GIT_DIRTY: Option<&str> = option_env!("VERGEN_GIT_DIRTY");

/// What this binary was built from.
///
/// Git fields are `None` when building outside a checkout (e.g. from a
/// crates.io tarball).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct BuildInfo {
    pub version: &'static str,
    pub branch: Option<&'static str>,
    pub sha: Option<&'static str>,
    pub dirty: bool,
}

impl BuildInfo {
    /// Metadata of the running build.
    pub fn current() -> Self {
        Self {
            version: PKG_VERSION,
            branch: GIT_BRANCH,
            sha: GIT_SHA,
            dirty: matches!(GIT_DIRTY, Some(d) if d.eq_ignore_ascii_case("true")),
        }
    }

    /// First seven characters of the commit SHA.
    pub fn short_sha(&self) -> Option<&'static str> {
        self.sha.map(|sha| sha.get(..7).unwrap_or(sha))
    }

    /// `{version}+{branch}.{sha}[.dirty]`, or just `{version}` without git.
    pub fn version_string(&self) -> String {
        match (self.branch, self.short_sha()) {
            (Some(branch), Some(sha)) => {
                let dirty = if self.dirty { ".dirty" } else { "" };
                format!("{}+{branch}.{sha}{dirty}", self.version)
            }
            _ => self.version.to_string(),
        }
    }
}

/// Version string of the running build.
pub fn version_string() -> String {
    BuildInfo::current().version_string()
}
