/// Canonical file paths for sitespy data files.
///
/// Everything lives under one application-support directory:
///   - config.json  Persisted configuration, owned by the config synchronizer.
///   - daemon.toml  Optional daemon settings (API endpoint, timeouts, logging).
///   - img/         Captured images referenced by monitor targets.
///
/// Only macOS is resolved natively. Setting `SITESPY_HOME` bypasses platform
/// resolution entirely and is honoured everywhere.
use std::path::{Path, PathBuf};

use crate::error::PathError;

const APP_DIR_NAME: &str = "sitespy";
pub const CONFIG_FILE_NAME: &str = "config.json";
pub const SETTINGS_FILE_NAME: &str = "daemon.toml";
pub const IMG_DIR_NAME: &str = "img";
pub const HOME_OVERRIDE_VAR: &str = "SITESPY_HOME";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Platform {
    Windows,
    Mac,
    Linux,
}

impl Platform {
    /// Parses an OS identifier. Accepts both `std::env::consts::OS` names
    /// ("macos") and the legacy `sys.platform`-style names ("darwin").
    pub fn from_os_str(os: &str) -> Result<Self, PathError> {
        match os {
            "windows" | "win32" => Ok(Self::Windows),
            "macos" | "darwin" => Ok(Self::Mac),
            "linux" => Ok(Self::Linux),
            other => Err(PathError::UnknownPlatform(other.to_string())),
        }
    }

    pub fn current() -> Result<Self, PathError> {
        Self::from_os_str(std::env::consts::OS)
    }
}

/// Resolved locations of every file the daemon touches.
#[derive(Debug, Clone, PartialEq)]
pub struct AppPaths {
    pub app_dir: PathBuf,
    pub config_file: PathBuf,
    pub img_dir: PathBuf,
    pub settings_file: PathBuf,
}

impl AppPaths {
    /// Lays out the standard files under `app_dir`.
    pub fn under(app_dir: impl Into<PathBuf>) -> Self {
        let app_dir = app_dir.into();
        Self {
            config_file: app_dir.join(CONFIG_FILE_NAME),
            img_dir: app_dir.join(IMG_DIR_NAME),
            settings_file: app_dir.join(SETTINGS_FILE_NAME),
            app_dir,
        }
    }

    /// Returns the paths for `platform` given the user's home directory.
    /// macOS: ~/Library/Application Support/sitespy
    pub fn for_platform(platform: Platform, home: &Path) -> Result<Self, PathError> {
        match platform {
            Platform::Mac => Ok(Self::under(
                home.join("Library")
                    .join("Application Support")
                    .join(APP_DIR_NAME),
            )),
            other => Err(PathError::UnsupportedPlatform(other)),
        }
    }

    /// Resolves paths from the process environment: `SITESPY_HOME` if set,
    /// otherwise the platform default under `HOME`.
    pub fn from_env() -> Result<Self, PathError> {
        if let Some(dir) = std::env::var_os(HOME_OVERRIDE_VAR) {
            return Ok(Self::under(PathBuf::from(dir)));
        }
        let platform = Platform::current()?;
        let home = std::env::var_os("HOME").ok_or(PathError::MissingHome)?;
        Self::for_platform(platform, Path::new(&home))
    }

    /// Creates the application and image directories if they are missing.
    pub fn create_dirs(&self) -> std::io::Result<()> {
        std::fs::create_dir_all(&self.app_dir)?;
        std::fs::create_dir_all(&self.img_dir)
    }
}
