//! Shared filesystem paths with env overrides.

use std::path::PathBuf;

fn env_path(var: &str) -> Option<PathBuf> {
    std::env::var_os(var).map(PathBuf::from)
}

fn fallback_home_dir() -> PathBuf {
    dirs::home_dir().unwrap_or_else(|| PathBuf::from("."))
}

/// Cache root (default: XDG cache dir/pkgtrust or ~/.cache/pkgtrust).
///
/// The layout below this directory is a durable format shared by unrelated
/// invocations on the same host; see [`crate::cache`].
#[must_use]
pub fn cache_dir() -> PathBuf {
    env_path("PKGTRUST_CACHE_DIR").unwrap_or_else(|| {
        dirs::cache_dir().map_or_else(
            || fallback_home_dir().join(".cache/pkgtrust"),
            |d| d.join("pkgtrust"),
        )
    })
}
