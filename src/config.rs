use anyhow::{Context, Result};
use directories::BaseDirs;
use serde::{Deserialize, Serialize};
use std::{
    fs,
    path::{Path, PathBuf},
};

pub const APP_DIR_NAME: &str = "gameface-resmap";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResMapConfig {
    #[serde(default)]
    pub game_root: PathBuf,
    /// Skips `paths.xml` detection when set.
    #[serde(default)]
    pub res_mods_dir: Option<PathBuf>,
    #[serde(default = "default_fragment_dir")]
    pub fragment_dir: String,
    #[serde(default = "default_res_map_path")]
    pub res_map_path: String,
    #[serde(default = "default_restart_flag")]
    pub restart_flag: String,
    #[serde(default = "default_package_dir")]
    pub package_dir: PathBuf,
    #[serde(default = "default_package_prefix")]
    pub package_prefix: String,
    #[serde(default = "default_vfs_dirs")]
    pub vfs_dirs: Vec<PathBuf>,
    /// Reads the original res_map from this file instead of the GUI packages.
    #[serde(default)]
    pub original_override: Option<PathBuf>,
    #[serde(default)]
    pub log_to_file: bool,
}

impl Default for ResMapConfig {
    fn default() -> Self {
        Self {
            game_root: PathBuf::new(),
            res_mods_dir: None,
            fragment_dir: default_fragment_dir(),
            res_map_path: default_res_map_path(),
            restart_flag: default_restart_flag(),
            package_dir: default_package_dir(),
            package_prefix: default_package_prefix(),
            vfs_dirs: default_vfs_dirs(),
            original_override: None,
            log_to_file: false,
        }
    }
}

impl ResMapConfig {
    pub fn load_or_create() -> Result<Self> {
        let base_dir = base_data_dir()?;
        Self::load_or_create_at(&base_dir.join("config.json"))
    }

    pub fn load_or_create_at(path: &Path) -> Result<Self> {
        if path.exists() {
            let raw = fs::read_to_string(path).context("read config")?;
            let config: ResMapConfig = serde_json::from_str(&raw).context("parse config")?;
            return Ok(config);
        }

        let config = ResMapConfig::default();
        config.save_to(path)?;
        Ok(config)
    }

    pub fn save_to(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).context("create config dir")?;
        }
        let raw = serde_json::to_string_pretty(self).context("serialize config")?;
        fs::write(path, raw).context("write config")?;
        Ok(())
    }

    /// Resolves a game-relative setting against `game_root`.
    pub fn game_path(&self, relative: &Path) -> PathBuf {
        if relative.is_absolute() {
            relative.to_path_buf()
        } else {
            self.game_root.join(relative)
        }
    }
}

fn default_fragment_dir() -> String {
    "mods/configs/res_map".to_string()
}

fn default_res_map_path() -> String {
    "gui/unbound/res_map.json".to_string()
}

fn default_restart_flag() -> String {
    "res_map_restart".to_string()
}

fn default_package_dir() -> PathBuf {
    PathBuf::from("res/packages")
}

fn default_package_prefix() -> String {
    "gui-part".to_string()
}

fn default_vfs_dirs() -> Vec<PathBuf> {
    vec![PathBuf::from("res/packages"), PathBuf::from("mods")]
}

pub fn base_data_dir() -> Result<PathBuf> {
    let base = BaseDirs::new().context("resolve home dir")?;
    Ok(base.data_local_dir().join(APP_DIR_NAME))
}
