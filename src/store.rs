//! On-disk state: the shipped res_map, the combined res_map in `res_mods`,
//! and the restart flag.

use crate::{
    catalog::Catalog,
    error::{ResMapError, Result},
    relaxed::parse_relaxed,
    vfs::read_from_package,
};
use std::{
    ffi::OsString,
    fs, io,
    path::{Path, PathBuf},
    time::{SystemTime, UNIX_EPOCH},
};
use tracing::{debug, info, warn};

#[derive(Debug, Clone)]
pub enum OriginalSource {
    /// First package in `dir` whose name starts with `prefix` and contains `entry`.
    Packages {
        dir: PathBuf,
        prefix: String,
        entry: String,
    },
    File(PathBuf),
}

#[derive(Debug, Clone)]
pub struct CatalogStore {
    original: OriginalSource,
    combined_path: PathBuf,
    restart_flag: PathBuf,
}

impl CatalogStore {
    pub fn new(original: OriginalSource, combined_path: PathBuf, restart_flag: PathBuf) -> Self {
        Self {
            original,
            combined_path,
            restart_flag,
        }
    }

    pub fn combined_path(&self) -> &Path {
        &self.combined_path
    }

    pub fn restart_flag_path(&self) -> &Path {
        &self.restart_flag
    }

    pub fn original_source(&self) -> &OriginalSource {
        &self.original
    }

    pub fn load_original(&self) -> Result<Catalog> {
        let (label, bytes) = match &self.original {
            OriginalSource::File(path) => {
                let bytes = fs::read(path).map_err(|err| {
                    ResMapError::CatalogRead(format!("{}: {err}", path.display()))
                })?;
                (path.display().to_string(), bytes)
            }
            OriginalSource::Packages { dir, prefix, entry } => {
                read_original_from_packages(dir, prefix, entry)?
            }
        };
        let value = parse_relaxed(&bytes)
            .map_err(|err| ResMapError::CatalogRead(format!("{label}: {err}")))?;
        let catalog = Catalog::from_value(value)
            .map_err(|err| ResMapError::CatalogRead(format!("{label}: {err}")))?;
        debug!("loaded original res_map from {label} ({} entries)", catalog.len());
        Ok(catalog)
    }

    /// `None` when missing; a malformed file is treated as missing and will be
    /// overwritten.
    pub fn load_existing_combined(&self) -> Option<Catalog> {
        let bytes = match fs::read(&self.combined_path) {
            Ok(bytes) => bytes,
            Err(err) if err.kind() == io::ErrorKind::NotFound => return None,
            Err(err) => {
                warn!(
                    "cannot read {}: {err}; treating as absent",
                    self.combined_path.display()
                );
                return None;
            }
        };
        match parse_relaxed(&bytes)
            .map_err(|err| err.to_string())
            .and_then(Catalog::from_value)
        {
            Ok(catalog) => Some(catalog),
            Err(err) => {
                warn!(
                    "malformed {}: {err}; treating as absent",
                    self.combined_path.display()
                );
                None
            }
        }
    }

    pub fn combined_exists(&self) -> bool {
        self.combined_path.is_file()
    }

    pub fn equals(candidate: &Catalog, existing: &Catalog) -> bool {
        candidate == existing
    }

    /// Writes to a temp sibling, then renames over the combined res_map.
    pub fn persist(&self, candidate: &Catalog) -> Result<()> {
        let raw = candidate
            .to_canonical_string()
            .map_err(|err| ResMapError::persistence(&self.combined_path, err))?;
        write_atomic(&self.combined_path, raw.as_bytes())
            .map_err(|err| ResMapError::persistence(&self.combined_path, err))?;
        info!(
            "stored combined res_map at {} ({} entries)",
            self.combined_path.display(),
            candidate.len()
        );
        Ok(())
    }

    pub fn delete_combined(&self) -> Result<bool> {
        match fs::remove_file(&self.combined_path) {
            Ok(()) => {
                info!("removed stale {}", self.combined_path.display());
                Ok(true)
            }
            Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(false),
            Err(err) => Err(ResMapError::persistence(&self.combined_path, err)),
        }
    }

    pub fn restart_flag_exists(&self) -> bool {
        self.restart_flag.is_file()
    }

    /// Returns false when the flag was already present.
    pub fn create_restart_flag(&self) -> io::Result<bool> {
        if self.restart_flag_exists() {
            return Ok(false);
        }
        if let Some(parent) = self.restart_flag.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(&self.restart_flag, b"")?;
        Ok(true)
    }

    pub fn clear_restart_flag(&self) {
        match fs::remove_file(&self.restart_flag) {
            Ok(()) => debug!("cleared restart flag {}", self.restart_flag.display()),
            Err(err) if err.kind() == io::ErrorKind::NotFound => {}
            Err(err) => warn!(
                "cannot remove restart flag {}: {err}",
                self.restart_flag.display()
            ),
        }
    }
}

fn read_original_from_packages(
    dir: &Path,
    prefix: &str,
    entry: &str,
) -> Result<(String, Vec<u8>)> {
    let mut packages: Vec<PathBuf> = fs::read_dir(dir)
        .map_err(|err| ResMapError::CatalogRead(format!("{}: {err}", dir.display())))?
        .flatten()
        .map(|item| item.path())
        .filter(|path| path.is_file())
        .filter(|path| {
            path.file_name()
                .and_then(|name| name.to_str())
                .map(|name| name.to_ascii_lowercase().starts_with(&prefix.to_ascii_lowercase()))
                .unwrap_or(false)
        })
        .collect();
    packages.sort();

    for package in &packages {
        match read_from_package(package, entry) {
            Ok(bytes) => return Ok((format!("{}:{entry}", package.display()), bytes)),
            Err(err) if err.kind() == io::ErrorKind::NotFound => continue,
            Err(err) => warn!("cannot read {}: {err}", package.display()),
        }
    }

    Err(ResMapError::CatalogRead(format!(
        "{entry} not found in {} package(s) matching {prefix}* under {}",
        packages.len(),
        dir.display()
    )))
}

fn write_atomic(path: &Path, contents: &[u8]) -> io::Result<()> {
    let parent = path
        .parent()
        .ok_or_else(|| io::Error::new(io::ErrorKind::InvalidInput, "res_map path has no parent"))?;
    fs::create_dir_all(parent)?;
    let file_name = path
        .file_name()
        .ok_or_else(|| io::Error::new(io::ErrorKind::InvalidInput, "res_map path has no name"))?;
    let mut temp_name = OsString::from(file_name);
    temp_name.push(".tmp");
    let mut temp_path = parent.join(temp_name);
    if temp_path.exists() {
        let stamp = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_nanos();
        let mut temp_name = OsString::from(file_name);
        temp_name.push(format!(".{stamp}.tmp"));
        temp_path = parent.join(temp_name);
    }
    fs::write(&temp_path, contents)?;
    if let Err(err) = fs::rename(&temp_path, path) {
        let _ = fs::remove_file(&temp_path);
        return Err(err);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::vfs::test_support::write_package;
    use serde_json::json;
    use tempfile::TempDir;

    fn store_in(root: &Path) -> CatalogStore {
        CatalogStore::new(
            OriginalSource::Packages {
                dir: root.join("res/packages"),
                prefix: "gui-part".to_string(),
                entry: "gui/unbound/res_map.json".to_string(),
            },
            root.join("res_mods/1.0/gui/unbound/res_map.json"),
            root.join("res_map_restart"),
        )
    }

    #[test]
    fn original_is_read_from_first_matching_package() {
        let temp = TempDir::new().unwrap();
        let packages = temp.path().join("res/packages");
        write_package(&packages.join("audio.pkg"), &[("gui/unbound/res_map.json", "{}")]);
        write_package(&packages.join("gui-part1.pkg"), &[("gui/flash/x.swf", "")]);
        write_package(
            &packages.join("gui-part2.pkg"),
            &[("gui/unbound/res_map.json", r#"{"0":{"p":"a"},"1":{"p":"b"},}"#)],
        );

        let original = store_in(temp.path()).load_original().unwrap();
        assert_eq!(original.len(), 2);
    }

    #[test]
    fn missing_original_is_a_catalog_read_error() {
        let temp = TempDir::new().unwrap();
        fs::create_dir_all(temp.path().join("res/packages")).unwrap();
        let err = store_in(temp.path()).load_original().unwrap_err();
        assert!(matches!(err, ResMapError::CatalogRead(_)));
        assert!(err.is_fatal());
    }

    #[test]
    fn malformed_original_file_is_a_catalog_read_error() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("res_map.json");
        fs::write(&path, "[1, 2]").unwrap();
        let store = CatalogStore::new(
            OriginalSource::File(path),
            temp.path().join("combined.json"),
            temp.path().join("flag"),
        );
        assert!(matches!(
            store.load_original(),
            Err(ResMapError::CatalogRead(_))
        ));
    }

    #[test]
    fn persist_then_load_round_trips_without_temp_leftovers() {
        let temp = TempDir::new().unwrap();
        let store = store_in(temp.path());
        let catalog = Catalog::from_value(json!({"a": {"v": 1}, "2": {"v": 2}})).unwrap();

        store.persist(&catalog).unwrap();
        assert_eq!(
            fs::read_to_string(store.combined_path()).unwrap(),
            r#"{"2":{"v":2},"a":{"v":1}}"#
        );
        assert_eq!(store.load_existing_combined(), Some(catalog));

        let leftovers: Vec<_> = fs::read_dir(store.combined_path().parent().unwrap())
            .unwrap()
            .flatten()
            .filter(|entry| entry.file_name().to_string_lossy().ends_with(".tmp"))
            .collect();
        assert!(leftovers.is_empty());
    }

    #[test]
    fn malformed_combined_is_treated_as_absent() {
        let temp = TempDir::new().unwrap();
        let store = store_in(temp.path());
        assert_eq!(store.load_existing_combined(), None);

        fs::create_dir_all(store.combined_path().parent().unwrap()).unwrap();
        fs::write(store.combined_path(), "{ broken").unwrap();
        assert_eq!(store.load_existing_combined(), None);
        assert!(store.combined_exists());
    }

    #[test]
    fn equality_ignores_serialized_key_order() {
        let a = Catalog::from_value(json!({"1": {"x": 1, "y": 2}, "2": {}})).unwrap();
        let b = Catalog::from_value(
            serde_json::from_str(r#"{"2": {}, "1": {"y": 2, "x": 1}}"#).unwrap(),
        )
        .unwrap();
        let c = Catalog::from_value(json!({"1": {"x": 1, "y": 3}, "2": {}})).unwrap();
        assert!(CatalogStore::equals(&a, &b));
        assert!(!CatalogStore::equals(&a, &c));
    }

    #[test]
    fn delete_combined_reports_whether_it_existed() {
        let temp = TempDir::new().unwrap();
        let store = store_in(temp.path());
        assert!(!store.delete_combined().unwrap());
        store.persist(&Catalog::new()).unwrap();
        assert!(store.delete_combined().unwrap());
        assert!(!store.combined_exists());
    }

    #[test]
    fn restart_flag_is_created_once() {
        let temp = TempDir::new().unwrap();
        let store = store_in(temp.path());
        assert!(store.create_restart_flag().unwrap());
        assert!(!store.create_restart_flag().unwrap());
        assert!(store.restart_flag_exists());
        store.clear_restart_flag();
        assert!(!store.restart_flag_exists());
        store.clear_restart_flag();
    }
}
