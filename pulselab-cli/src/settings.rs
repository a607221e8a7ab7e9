//! Settings persistence.
//!
//! The core only defines [`Settings`]; this front-end reads them at startup
//! and writes them back at shutdown as pretty-printed JSON in
//! `~/.pulselab_tuner/settings.json`.

use anyhow::{Context, Result, anyhow};
use pulselab_core::Settings;
use std::fs::{self, File};
use std::io::{Read, Write};
use std::path::{Path, PathBuf};
use tracing::warn;

const APP_DIR: &str = ".pulselab_tuner";
const SETTINGS_FILE: &str = "settings.json";

/// Default location of the settings file.
pub fn default_path() -> Result<PathBuf> {
    let home = dirs::home_dir().ok_or_else(|| anyhow!("could not determine home directory"))?;
    Ok(home.join(APP_DIR).join(SETTINGS_FILE))
}

/// Loads settings from a JSON file.
///
/// A missing file yields the defaults; a file that exists but cannot be
/// parsed is an error.
pub fn load(path: &Path) -> Result<Settings> {
    let mut file = match File::open(path) {
        Ok(file) => file,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Settings::default()),
        Err(e) => return Err(e).with_context(|| format!("failed to open {}", path.display())),
    };
    let mut data = String::new();
    file.read_to_string(&mut data)
        .with_context(|| format!("failed to read {}", path.display()))?;
    serde_json::from_str(&data).with_context(|| format!("malformed settings in {}", path.display()))
}

/// Saves settings as JSON, creating the parent directory if needed.
pub fn save(settings: &Settings, path: &Path) -> Result<()> {
    if let Some(dir) = path.parent() {
        fs::create_dir_all(dir)
            .with_context(|| format!("failed to create {}", dir.display()))?;
    }
    let json_string = serde_json::to_string_pretty(settings)?;
    let mut file =
        File::create(path).with_context(|| format!("failed to create {}", path.display()))?;
    file.write_all(json_string.as_bytes())?;
    Ok(())
}

/// Settings bound to the file they are persisted in.
///
/// If the file exists but cannot be loaded, the session runs on defaults and
/// the file is never written back, so a hand-edited file with a typo is not
/// replaced.
#[derive(Debug)]
pub struct SettingsFile {
    path: PathBuf,
    pub settings: Settings,
    writable: bool,
}

impl SettingsFile {
    pub fn open(path: PathBuf) -> Self {
        match load(&path) {
            Ok(settings) => Self {
                path,
                settings,
                writable: true,
            },
            Err(e) => {
                warn!("{e:#}; using defaults, the file will not be overwritten");
                Self {
                    path,
                    settings: Settings::default(),
                    writable: false,
                }
            }
        }
    }

    pub fn is_writable(&self) -> bool {
        self.writable
    }

    /// Writes the settings back unless the file failed to load.
    pub fn persist(&self) -> Result<()> {
        if !self.writable {
            return Ok(());
        }
        save(&self.settings, &self.path)
    }
}
