//! Locating the game's `res_mods` overlay and the files derived from it.

use crate::{
    config::ResMapConfig,
    store::{CatalogStore, OriginalSource},
};
use anyhow::{bail, Context, Result};
use quick_xml::{events::Event, Reader};
use std::{
    fs,
    path::{Path, PathBuf},
};

#[derive(Debug, Clone)]
pub struct GamePaths {
    pub game_root: PathBuf,
    pub res_mods_dir: PathBuf,
    pub combined_path: PathBuf,
    pub restart_flag: PathBuf,
    pub package_dir: PathBuf,
    pub vfs_dirs: Vec<PathBuf>,
}

impl GamePaths {
    pub fn resolve(config: &ResMapConfig) -> Result<Self> {
        let game_root = config.game_root.clone();
        if !looks_like_game_root(&game_root) {
            bail!(
                "invalid game root: expected paths.xml and res/ in {}",
                game_root.display()
            );
        }

        let res_mods_dir = match &config.res_mods_dir {
            Some(path) => config.game_path(path),
            None => detect_res_mods(&game_root).context("locate res_mods directory")?,
        };

        Ok(GamePaths {
            combined_path: res_mods_dir.join(&config.res_map_path),
            restart_flag: config.game_path(Path::new(&config.restart_flag)),
            package_dir: config.game_path(&config.package_dir),
            vfs_dirs: config
                .vfs_dirs
                .iter()
                .map(|dir| config.game_path(dir))
                .collect(),
            game_root,
            res_mods_dir,
        })
    }

    pub fn store(&self, config: &ResMapConfig) -> CatalogStore {
        let original = match &config.original_override {
            Some(path) => OriginalSource::File(config.game_path(path)),
            None => OriginalSource::Packages {
                dir: self.package_dir.clone(),
                prefix: config.package_prefix.clone(),
                entry: config.res_map_path.clone(),
            },
        };
        CatalogStore::new(
            original,
            self.combined_path.clone(),
            self.restart_flag.clone(),
        )
    }
}

pub fn looks_like_game_root(path: &Path) -> bool {
    path.join("paths.xml").is_file() && path.join("res").is_dir()
}

/// First `<Paths>/<Path>` entry of `paths.xml` naming an existing directory.
pub fn detect_res_mods(game_root: &Path) -> Result<PathBuf> {
    let raw = fs::read(game_root.join("paths.xml")).context("read paths.xml")?;
    for entry in parse_paths_xml(&raw)? {
        let relative = entry.trim().trim_start_matches("./");
        if relative.is_empty() {
            continue;
        }
        let candidate = game_root.join(relative);
        if candidate.is_dir() {
            return Ok(candidate);
        }
    }
    bail!(
        "no existing directory listed in {}",
        game_root.join("paths.xml").display()
    )
}

fn parse_paths_xml(bytes: &[u8]) -> Result<Vec<String>> {
    let mut reader = Reader::from_reader(bytes);
    reader.trim_text(true);
    let mut buf = Vec::new();
    let mut entries = Vec::new();
    let mut in_paths = false;
    let mut in_path = false;

    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(e)) => match e.name().as_ref() {
                b"Paths" => in_paths = true,
                b"Path" if in_paths => in_path = true,
                _ => {}
            },
            Ok(Event::End(e)) => match e.name().as_ref() {
                b"Paths" => in_paths = false,
                b"Path" => in_path = false,
                _ => {}
            },
            Ok(Event::Text(text)) if in_path => {
                let value = text.unescape().context("decode paths.xml entry")?;
                entries.push(value.to_string());
            }
            Ok(Event::Eof) => break,
            Err(err) => return Err(err).context("parse paths.xml"),
            _ => {}
        }
        buf.clear();
    }

    Ok(entries)
}
