//! Discovery and parsing of mod res_map fragments.

use crate::{
    catalog::kind_of,
    error::{Diagnostics, ResMapError, Result},
    relaxed::parse_relaxed,
    vfs::{normalize_path, Vfs},
};
use serde_json::Value;
use std::{
    collections::HashSet,
    fmt, fs,
    path::{Path, PathBuf},
};
use tracing::debug;
use walkdir::WalkDir;

pub const ITEM_ID_FIELD: &str = "itemID";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FragmentOrigin {
    File(PathBuf),
    Vfs(String),
}

impl fmt::Display for FragmentOrigin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FragmentOrigin::File(path) => write!(f, "{}", path.display()),
            FragmentOrigin::Vfs(path) => write!(f, "vfs:{path}"),
        }
    }
}

#[derive(Debug, Clone)]
pub struct Fragment {
    pub origin: FragmentOrigin,
    pub items: Vec<Value>,
}

/// An accepted fragment item: its `itemID` and the entry that goes into the
/// catalog (the item minus `itemID`).
#[derive(Debug, Clone, PartialEq)]
pub struct FragmentItem {
    pub item_id: String,
    pub entry: Value,
    pub origin: String,
}

pub struct FragmentLoader<'a> {
    fs_root: PathBuf,
    config_dir: String,
    vfs: Option<&'a dyn Vfs>,
}

impl<'a> FragmentLoader<'a> {
    /// `config_dir` is relative both to `fs_root` and to the VFS root.
    pub fn new(fs_root: impl Into<PathBuf>, config_dir: &str, vfs: Option<&'a dyn Vfs>) -> Self {
        Self {
            fs_root: fs_root.into(),
            config_dir: normalize_path(config_dir),
            vfs,
        }
    }

    /// Lists fragment files: the real filesystem first, then VFS files whose
    /// path was not already seen on disk.
    pub fn sources(&self) -> Vec<FragmentOrigin> {
        let mut sources = Vec::new();
        let mut seen = HashSet::new();

        let dir = self.fs_root.join(&self.config_dir);
        if dir.is_dir() {
            for entry in WalkDir::new(&dir)
                .min_depth(1)
                .max_depth(1)
                .sort_by_file_name()
                .into_iter()
                .filter_map(|entry| entry.ok())
            {
                if !entry.path().is_file() || !is_json(entry.path()) {
                    continue;
                }
                let name = entry.file_name().to_string_lossy();
                seen.insert(normalize_path(&format!("{}/{name}", self.config_dir)));
                sources.push(FragmentOrigin::File(entry.into_path()));
            }
        }

        if let Some(vfs) = self.vfs {
            for name in vfs.list_dir(&self.config_dir).unwrap_or_default() {
                let path = normalize_path(&format!("{}/{name}", self.config_dir));
                if !is_json(Path::new(&path)) || !vfs.is_file(&path) {
                    continue;
                }
                if seen.insert(path.clone()) {
                    sources.push(FragmentOrigin::Vfs(path));
                }
            }
        }

        debug!("found {} res_map fragment(s)", sources.len());
        sources
    }

    /// Lazily reads and parses every fragment. Each call starts a fresh pass.
    pub fn fragments(&self) -> impl Iterator<Item = Result<Fragment>> + '_ {
        self.load_sources(self.sources())
    }

    /// Lazily reads an already discovered listing.
    pub fn load_sources(
        &self,
        sources: Vec<FragmentOrigin>,
    ) -> impl Iterator<Item = Result<Fragment>> + '_ {
        sources.into_iter().map(move |origin| self.load(origin))
    }

    fn load(&self, origin: FragmentOrigin) -> Result<Fragment> {
        let bytes = match &origin {
            FragmentOrigin::File(path) => fs::read(path),
            FragmentOrigin::Vfs(path) => match self.vfs {
                Some(vfs) => vfs.read(path),
                None => Err(std::io::Error::from(std::io::ErrorKind::NotFound)),
            },
        }
        .map_err(|err| parse_error(&origin, err))?;
        parse_fragment(origin, &bytes)
    }
}

pub fn parse_fragment(origin: FragmentOrigin, bytes: &[u8]) -> Result<Fragment> {
    let value = parse_relaxed(bytes).map_err(|err| parse_error(&origin, err))?;
    match value {
        Value::Array(items) => Ok(Fragment { origin, items }),
        other => Err(parse_error(
            &origin,
            format!("expected a list of items, found {}", kind_of(&other)),
        )),
    }
}

/// Validates items across all fragments. Parse failures, items without a
/// usable `itemID` and duplicate ids are reported and skipped; the first
/// occurrence of an id wins.
pub fn accept_items(
    fragments: impl IntoIterator<Item = Result<Fragment>>,
    diagnostics: &mut Diagnostics,
) -> Vec<FragmentItem> {
    let mut accepted = Vec::new();
    let mut seen: HashSet<String> = HashSet::new();

    for fragment in fragments {
        let fragment = match fragment {
            Ok(fragment) => fragment,
            Err(err) => {
                diagnostics.report(err);
                continue;
            }
        };
        let origin = fragment.origin.to_string();

        for (index, item) in fragment.items.into_iter().enumerate() {
            let mut fields = match item {
                Value::Object(fields) => fields,
                other => {
                    diagnostics.report(ResMapError::InvalidItem {
                        source_path: origin.clone(),
                        index,
                        reason: format!("expected an object, found {}", kind_of(&other)),
                    });
                    continue;
                }
            };

            let item_id = match fields.remove(ITEM_ID_FIELD) {
                Some(Value::String(id)) if !id.is_empty() => id,
                Some(Value::String(_)) => {
                    diagnostics.report(invalid_id(&origin, index, "is empty"));
                    continue;
                }
                Some(other) => {
                    diagnostics.report(invalid_id(
                        &origin,
                        index,
                        &format!("is {}, not a string", kind_of(&other)),
                    ));
                    continue;
                }
                None => {
                    diagnostics.report(invalid_id(&origin, index, "is missing"));
                    continue;
                }
            };

            if !seen.insert(item_id.clone()) {
                diagnostics.report(ResMapError::DuplicateIdentifier {
                    item_id,
                    source_path: origin.clone(),
                });
                continue;
            }

            accepted.push(FragmentItem {
                item_id,
                entry: Value::Object(fields),
                origin: origin.clone(),
            });
        }
    }

    accepted
}

fn invalid_id(origin: &str, index: usize, what: &str) -> ResMapError {
    ResMapError::InvalidItem {
        source_path: origin.to_string(),
        index,
        reason: format!("mandatory key [{ITEM_ID_FIELD}] {what}"),
    }
}

fn parse_error(origin: &FragmentOrigin, err: impl fmt::Display) -> ResMapError {
    ResMapError::FragmentParse {
        source_path: origin.to_string(),
        reason: err.to_string(),
    }
}

fn is_json(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| ext.eq_ignore_ascii_case("json"))
        .unwrap_or(false)
}
