//! Read-only view of the game's virtual filesystem.
//!
//! The game mounts zip packages (`.pkg` from `res/packages`, `.wotmod` from the
//! mods folder) into one case-insensitive namespace. `PackageVfs` reproduces
//! that lookup for the files this crate needs; the host may supply any other
//! `Vfs` implementation.

use std::{
    collections::{BTreeMap, BTreeSet},
    fs, io,
    io::Read,
    path::{Path, PathBuf},
};
use tracing::{debug, warn};
use walkdir::WalkDir;

pub trait Vfs {
    /// Entry names directly below `dir`, or `None` when `dir` is not a directory.
    fn list_dir(&self, dir: &str) -> Option<Vec<String>>;
    fn is_file(&self, path: &str) -> bool;
    fn read(&self, path: &str) -> io::Result<Vec<u8>>;
}

/// VFS paths are compared lower-cased with forward slashes.
pub fn normalize_path(path: &str) -> String {
    path.replace('\\', "/")
        .trim_start_matches("./")
        .trim_start_matches('/')
        .trim_end_matches('/')
        .to_ascii_lowercase()
}

const PACKAGE_EXTENSIONS: [&str; 2] = ["pkg", "wotmod"];

#[derive(Debug, Clone)]
struct PackedFile {
    package: usize,
    name: String,
}

#[derive(Debug, Default)]
pub struct PackageVfs {
    packages: Vec<PathBuf>,
    files: BTreeMap<String, PackedFile>,
}

impl PackageVfs {
    /// Mounts every package found below `dirs`, in path order. Earlier
    /// packages shadow later ones for the same file.
    pub fn mount_dirs(dirs: &[PathBuf]) -> Self {
        let mut packages = Vec::new();
        for dir in dirs {
            if !dir.is_dir() {
                continue;
            }
            let mut found: Vec<PathBuf> = WalkDir::new(dir)
                .follow_links(true)
                .into_iter()
                .filter_map(|entry| entry.ok())
                .filter(|entry| entry.file_type().is_file())
                .map(|entry| entry.into_path())
                .filter(|path| is_package(path))
                .collect();
            found.sort();
            packages.extend(found);
        }
        Self::mount(packages)
    }

    pub fn mount(packages: Vec<PathBuf>) -> Self {
        let mut vfs = PackageVfs {
            packages: Vec::new(),
            files: BTreeMap::new(),
        };
        for path in packages {
            match list_package(&path) {
                Ok(names) => {
                    let package = vfs.packages.len();
                    vfs.packages.push(path);
                    for name in names {
                        vfs.files
                            .entry(normalize_path(&name))
                            .or_insert(PackedFile { package, name });
                    }
                }
                Err(err) => warn!("skipping unreadable package {}: {err}", path.display()),
            }
        }
        debug!(
            "mounted {} package(s), {} file(s)",
            vfs.packages.len(),
            vfs.files.len()
        );
        vfs
    }

    pub fn packages(&self) -> &[PathBuf] {
        &self.packages
    }
}

impl Vfs for PackageVfs {
    fn list_dir(&self, dir: &str) -> Option<Vec<String>> {
        list_children(self.files.keys().map(String::as_str), dir)
    }

    fn is_file(&self, path: &str) -> bool {
        self.files.contains_key(&normalize_path(path))
    }

    fn read(&self, path: &str) -> io::Result<Vec<u8>> {
        let Some(file) = self.files.get(&normalize_path(path)) else {
            return Err(io::Error::new(io::ErrorKind::NotFound, path.to_string()));
        };
        read_from_package(&self.packages[file.package], &file.name)
    }
}

/// In-memory VFS, mostly useful to hosts that already hold package contents.
#[derive(Debug, Default, Clone)]
pub struct MemoryVfs {
    files: BTreeMap<String, Vec<u8>>,
}

impl MemoryVfs {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, path: &str, contents: impl Into<Vec<u8>>) {
        self.files.insert(normalize_path(path), contents.into());
    }
}

impl Vfs for MemoryVfs {
    fn list_dir(&self, dir: &str) -> Option<Vec<String>> {
        list_children(self.files.keys().map(String::as_str), dir)
    }

    fn is_file(&self, path: &str) -> bool {
        self.files.contains_key(&normalize_path(path))
    }

    fn read(&self, path: &str) -> io::Result<Vec<u8>> {
        self.files
            .get(&normalize_path(path))
            .cloned()
            .ok_or_else(|| io::Error::new(io::ErrorKind::NotFound, path.to_string()))
    }
}

fn list_children<'a>(paths: impl Iterator<Item = &'a str>, dir: &str) -> Option<Vec<String>> {
    let dir = normalize_path(dir);
    let prefix = format!("{dir}/");
    let children: BTreeSet<String> = paths
        .filter_map(|path| path.strip_prefix(prefix.as_str()))
        .filter_map(|rest| rest.split('/').next())
        .filter(|name| !name.is_empty())
        .map(|name| name.to_string())
        .collect();
    if children.is_empty() {
        None
    } else {
        Some(children.into_iter().collect())
    }
}

fn is_package(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| {
            PACKAGE_EXTENSIONS
                .iter()
                .any(|known| ext.eq_ignore_ascii_case(known))
        })
        .unwrap_or(false)
}

fn list_package(path: &Path) -> io::Result<Vec<String>> {
    let file = fs::File::open(path)?;
    let archive = zip::ZipArchive::new(file).map_err(io::Error::other)?;
    Ok(archive
        .file_names()
        .filter(|name| !name.ends_with('/'))
        .map(|name| name.to_string())
        .collect())
}

/// Reads `name` from a zip package, matching the entry name case-insensitively.
pub fn read_from_package(package: &Path, name: &str) -> io::Result<Vec<u8>> {
    let file = fs::File::open(package)?;
    let mut archive = zip::ZipArchive::new(file).map_err(io::Error::other)?;
    let wanted = normalize_path(name);
    let Some(actual) = archive
        .file_names()
        .find(|candidate| normalize_path(candidate) == wanted)
        .map(|candidate| candidate.to_string())
    else {
        return Err(io::Error::new(io::ErrorKind::NotFound, name.to_string()));
    };
    let mut entry = archive.by_name(&actual).map_err(io::Error::other)?;
    let mut bytes = Vec::new();
    entry.read_to_end(&mut bytes)?;
    Ok(bytes)
}

#[cfg(test)]
pub(crate) mod test_support {
    use std::{fs, io::Write, path::Path};
    use zip::write::SimpleFileOptions;

    pub fn write_package(path: &Path, files: &[(&str, &str)]) {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).unwrap();
        }
        let file = fs::File::create(path).unwrap();
        let mut writer = zip::ZipWriter::new(file);
        for (name, contents) in files {
            writer
                .start_file(name.to_string(), SimpleFileOptions::default())
                .unwrap();
            writer.write_all(contents.as_bytes()).unwrap();
        }
        writer.finish().unwrap();
    }
}
