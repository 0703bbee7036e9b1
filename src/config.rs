//! Application configuration
//!
//! A single `maskcam.json` next to the working directory. A missing file
//! is replaced with defaults (and written out so the knobs are
//! discoverable); a malformed file is an error the caller surfaces at
//! startup.

use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use crate::overlay::PlacementParams;

pub const CONFIG_FILE: &str = "maskcam.json";

#[derive(Clone, Debug, serde::Serialize, serde::Deserialize)]
#[serde(default)]
pub struct AppConfig {
    /// Camera to open at startup
    pub camera_index: u32,
    /// Requested capture size; the camera picks the closest it supports
    pub capture_width: u32,
    pub capture_height: u32,
    /// Redraw target
    pub target_fps: u32,
    /// Directory holding the mask PNGs
    pub masks_dir: PathBuf,
    /// Placement tuning constants
    pub placement: PlacementParams,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            camera_index: 0,
            capture_width: 720,
            capture_height: 560,
            target_fps: 60,
            masks_dir: PathBuf::from("masks"),
            placement: PlacementParams::default(),
        }
    }
}

impl AppConfig {
    /// Load the config from `dir`, writing defaults when absent
    pub fn load_or_default(dir: &Path) -> Result<Self, String> {
        let path = dir.join(CONFIG_FILE);
        let text = match fs::read_to_string(&path) {
            Ok(text) => text,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                let config = Self::default();
                config.write(&path)?;
                log::info!("Wrote default config to {:?}", path);
                return Ok(config);
            }
            Err(e) => return Err(format!("Could not read {:?}: {}", path, e)),
        };

        serde_json::from_str(&text).map_err(|e| format!("Malformed {:?}: {}", path, e))
    }

    fn write(&self, path: &Path) -> Result<(), String> {
        let text = serde_json::to_string_pretty(self)
            .map_err(|e| format!("Could not serialize config: {}", e))?;
        fs::write(path, text).map_err(|e| format!("Could not write {:?}: {}", path, e))
    }
}
