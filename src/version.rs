//! Version and build information
//!
//! Provides access to build-time embedded information.

use std::fmt;

/// Build information embedded at compile time
#[derive(Debug, Clone)]
pub struct BuildInfo {
    /// Package version from Cargo.toml
    pub version: &'static str,
    /// Package name
    pub name: &'static str,
    /// Git commit hash (short)
    pub git_hash: &'static str,
    /// Git branch name
    pub git_branch: &'static str,
    /// Raw git dirty string ("true" or "false")
    git_dirty_str: &'static str,
    /// Build timestamp
    pub build_timestamp: &'static str,
    /// Target triple (e.g., x86_64-unknown-linux-gnu)
    pub target: &'static str,
    /// Build profile (debug/release)
    pub profile: &'static str,
    /// Rustc version used to build
    pub rustc_version: &'static str,
    /// Host triple (build machine)
    pub host: &'static str,
}

impl BuildInfo {
    /// Get the current build information
    pub const fn current() -> Self {
        Self {
            version: env!("CARGO_PKG_VERSION"),
            name: env!("CARGO_PKG_NAME"),
            git_hash: env!("ALWAYS_ACTIVE_GIT_HASH"),
            git_branch: env!("ALWAYS_ACTIVE_GIT_BRANCH"),
            git_dirty_str: env!("ALWAYS_ACTIVE_GIT_DIRTY"),
            build_timestamp: env!("ALWAYS_ACTIVE_BUILD_TIMESTAMP"),
            target: env!("ALWAYS_ACTIVE_TARGET"),
            profile: env!("ALWAYS_ACTIVE_PROFILE"),
            rustc_version: env!("ALWAYS_ACTIVE_RUSTC_VERSION"),
            host: env!("ALWAYS_ACTIVE_HOST"),
        }
    }

    /// Whether the working directory was dirty at build time
    pub fn git_dirty(&self) -> bool {
        self.git_dirty_str == "true"
    }

    /// Get the full version string (e.g., "0.1.0-abc1234")
    pub fn full_version(&self) -> String {
        if self.git_dirty() {
            format!("{}-{}-dirty", self.version, self.git_hash)
        } else {
            format!("{}-{}", self.version, self.git_hash)
        }
    }
}

impl fmt::Display for BuildInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "{} {}", self.name, self.full_version())?;
        writeln!(f, "  commit  {} ({})", self.git_hash, self.git_branch)?;
        writeln!(f, "  built   {} [{}]", self.build_timestamp, self.profile)?;
        writeln!(f, "  target  {} (host {})", self.target, self.host)?;
        writeln!(f, "  rustc   {}", self.rustc_version)
    }
}

/// Get the current build info
pub fn build_info() -> BuildInfo {
    BuildInfo::current()
}

/// Print version information to stdout
pub fn print_version() {
    let info = build_info();
    print!("{}", info);
}
