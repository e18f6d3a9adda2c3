//! Version information.

/// Package version from Cargo.toml.
pub const PKG_VERSION: &str = env!("CARGO_PKG_VERSION");

/// Full version string reported by the daemon.
pub fn version_string() -> String {
    format!("heimdall {PKG_VERSION}")
}
