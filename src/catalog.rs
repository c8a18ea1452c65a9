use serde::{Serialize, Serializer};
use serde_json::{Map, Value};
use std::{cmp::Ordering, collections::BTreeMap, fmt};

/// Numeric resource id the game's resource manager assigns to a res_map key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct ResId(pub i64);

impl ResId {
    pub const INVALID: ResId = ResId(-1);

    pub fn is_valid(self) -> bool {
        self != ResId::INVALID
    }
}

impl Default for ResId {
    fn default() -> Self {
        ResId::INVALID
    }
}

impl fmt::Display for ResId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Hexadecimal res_map key. Keys order by numeric value so the serialized map
/// is canonical; keys that are not valid hex sort after all numeric ones.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CatalogKey(String);

impl CatalogKey {
    pub fn new(key: impl Into<String>) -> Self {
        CatalogKey(key.into())
    }

    pub fn from_value(value: u64) -> Self {
        CatalogKey(format!("{value:x}"))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn numeric(&self) -> Option<u64> {
        u64::from_str_radix(&self.0, 16).ok()
    }

    /// The id the resource manager resolves this key to.
    pub fn res_id(&self) -> ResId {
        self.numeric()
            .and_then(|value| i64::try_from(value).ok())
            .map(ResId)
            .unwrap_or(ResId::INVALID)
    }
}

impl Ord for CatalogKey {
    fn cmp(&self, other: &Self) -> Ordering {
        match (self.numeric(), other.numeric()) {
            (Some(a), Some(b)) => a.cmp(&b).then_with(|| self.0.cmp(&other.0)),
            (Some(_), None) => Ordering::Less,
            (None, Some(_)) => Ordering::Greater,
            (None, None) => self.0.cmp(&other.0),
        }
    }
}

impl PartialOrd for CatalogKey {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl fmt::Display for CatalogKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl Serialize for CatalogKey {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.0)
    }
}

/// A res_map: key → entry content.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(transparent)]
pub struct Catalog {
    entries: BTreeMap<CatalogKey, Value>,
}

impl Catalog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_value(value: Value) -> Result<Self, String> {
        let Value::Object(map) = value else {
            return Err(format!("expected a JSON object, found {}", kind_of(&value)));
        };
        let entries = map
            .into_iter()
            .map(|(key, entry)| (CatalogKey(key), entry))
            .collect();
        Ok(Catalog { entries })
    }

    pub fn contains_key(&self, key: &CatalogKey) -> bool {
        self.entries.contains_key(key)
    }

    pub fn get(&self, key: &CatalogKey) -> Option<&Value> {
        self.entries.get(key)
    }

    /// Inserts only when the key is free; returns false on a clash.
    pub fn insert_new(&mut self, key: CatalogKey, entry: Value) -> bool {
        if self.entries.contains_key(&key) {
            return false;
        }
        self.entries.insert(key, entry);
        true
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn keys(&self) -> impl Iterator<Item = &CatalogKey> {
        self.entries.keys()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&CatalogKey, &Value)> {
        self.entries.iter()
    }

    /// Compact canonical form: numeric key order, `,`/`:` separators,
    /// non-ASCII written as UTF-8.
    pub fn to_canonical_string(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }

    pub fn to_value(&self) -> Value {
        let map: Map<String, Value> = self
            .entries
            .iter()
            .map(|(key, entry)| (key.0.clone(), entry.clone()))
            .collect();
        Value::Object(map)
    }
}

pub(crate) fn kind_of(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "a list",
        Value::Object(_) => "an object",
    }
}
