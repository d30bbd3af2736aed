//! Application paths for config, cache, and data.

use directories::ProjectDirs;
use std::path::{Path, PathBuf};

/// Relocates every directory under a single root when set.
pub const HOME_ENV: &str = "USAGEWATCH_HOME";

/// Application paths.
#[derive(Debug, Clone)]
pub struct AppPaths {
    /// Configuration directory.
    pub config: PathBuf,
    /// Cache directory.
    pub cache: PathBuf,
    /// Data directory.
    pub data: PathBuf,
}

impl AppPaths {
    /// Create paths for the usagewatch application.
    #[must_use]
    pub fn new() -> Self {
        if let Some(root) = std::env::var_os(HOME_ENV).filter(|v| !v.is_empty()) {
            return Self::under(Path::new(&root));
        }
        if let Some(proj_dirs) = ProjectDirs::from("dev", "usagewatch", "usagewatch") {
            Self {
                config: proj_dirs.config_dir().to_path_buf(),
                cache: proj_dirs.cache_dir().to_path_buf(),
                data: proj_dirs.data_dir().to_path_buf(),
            }
        } else {
            let home = directories::BaseDirs::new()
                .map_or_else(|| PathBuf::from("."), |d| d.home_dir().to_path_buf());
            Self {
                config: home.join(".config/usagewatch"),
                cache: home.join(".cache/usagewatch"),
                data: home.join(".local/share/usagewatch"),
            }
        }
    }

    /// All directories under one root (tests, portable installs).
    #[must_use]
    pub fn under(root: &Path) -> Self {
        Self {
            config: root.join("config"),
            cache: root.join("cache"),
            data: root.join("data"),
        }
    }

    #[must_use]
    pub fn config_file(&self) -> PathBuf {
        self.config.join("config.toml")
    }

    /// Saved browser session (cookies).
    #[must_use]
    pub fn session_file(&self) -> PathBuf {
        self.data.join("session.json")
    }

    /// Last-known-good cycle payload.
    #[must_use]
    pub fn last_good_file(&self) -> PathBuf {
        self.cache.join("last-good.json")
    }

    #[must_use]
    pub fn history_db_file(&self) -> PathBuf {
        self.data.join("cycle-history.sqlite")
    }

    /// Default persistent browser profile.
    #[must_use]
    pub fn browser_profile_dir(&self) -> PathBuf {
        self.data.join("browser-profile")
    }

    /// Ensure all directories exist.
    pub fn ensure_dirs(&self) -> std::io::Result<()> {
        std::fs::create_dir_all(&self.config)?;
        std::fs::create_dir_all(&self.cache)?;
        std::fs::create_dir_all(&self.data)?;
        Ok(())
    }
}

impl Default for AppPaths {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn under_root_places_files_in_subdirs() {
        let paths = AppPaths::under(Path::new("/tmp/uw"));
        assert_eq!(paths.session_file(), PathBuf::from("/tmp/uw/data/session.json"));
        assert_eq!(paths.last_good_file(), PathBuf::from("/tmp/uw/cache/last-good.json"));
        assert_eq!(paths.config_file(), PathBuf::from("/tmp/uw/config/config.toml"));
    }

    #[test]
    fn ensure_dirs_creates_tree() {
        let dir = tempfile::TempDir::new().unwrap();
        let paths = AppPaths::under(dir.path());
        paths.ensure_dirs().unwrap();
        assert!(paths.config.is_dir());
        assert!(paths.cache.is_dir());
        assert!(paths.data.is_dir());
    }
}
