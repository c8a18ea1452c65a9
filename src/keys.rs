//! Deterministic res_map key allocation for fragment items.
//!
//! A key depends only on the item's own `itemID`: blake3 of the id, folded
//! into `GENERATED_KEY_BASE..=GENERATED_KEY_BASE | GENERATED_KEY_MASK`. Adding,
//! removing or editing other items never moves it. On a clash with the
//! original res_map or an earlier item the id is rehashed as `"{id}#{n}"`.

use crate::{
    catalog::{Catalog, CatalogKey},
    error::{Diagnostics, ResMapError, Result},
    fragment::FragmentItem,
};
use blake3::Hasher;
use indexmap::IndexMap;
use std::collections::HashSet;
use tracing::debug;

pub const GENERATED_KEY_BASE: u64 = 0x1000_0000;
pub const GENERATED_KEY_MASK: u64 = 0x0FFF_FFFF;
pub const MAX_PROBES: u32 = 64;

#[derive(Debug, Clone, PartialEq)]
pub struct AllocatedItem {
    pub item: FragmentItem,
    pub key: CatalogKey,
}

pub fn derive_key(item_id: &str, probe: u32) -> CatalogKey {
    let mut hasher = Hasher::new();
    hasher.update(item_id.as_bytes());
    if probe > 0 {
        hasher.update(format!("#{probe}").as_bytes());
    }
    let hash = hasher.finalize();
    let mut prefix = [0u8; 8];
    prefix.copy_from_slice(&hash.as_bytes()[..8]);
    let folded = u64::from_le_bytes(prefix) & GENERATED_KEY_MASK;
    CatalogKey::from_value(GENERATED_KEY_BASE | folded)
}

pub struct KeyAllocator {
    reserved: HashSet<u64>,
    allocated: IndexMap<String, CatalogKey>,
    max_probes: u32,
}

impl KeyAllocator {
    pub fn new(original: &Catalog) -> Self {
        Self::with_max_probes(original, MAX_PROBES)
    }

    pub fn with_max_probes(original: &Catalog, max_probes: u32) -> Self {
        Self {
            reserved: original.keys().filter_map(CatalogKey::numeric).collect(),
            allocated: IndexMap::new(),
            max_probes,
        }
    }

    pub fn allocate(&mut self, item_id: &str) -> Result<CatalogKey> {
        if let Some(key) = self.allocated.get(item_id) {
            return Ok(key.clone());
        }
        for probe in 0..=self.max_probes {
            let key = derive_key(item_id, probe);
            let Some(value) = key.numeric() else {
                continue;
            };
            if self.reserved.insert(value) {
                if probe > 0 {
                    debug!("{item_id} moved to key {key} after {probe} collision(s)");
                }
                self.allocated.insert(item_id.to_string(), key.clone());
                return Ok(key);
            }
        }
        Err(ResMapError::KeyAllocationExhausted {
            item_id: item_id.to_string(),
            attempts: self.max_probes + 1,
        })
    }

    /// `itemID → key` in allocation order.
    pub fn allocated(&self) -> &IndexMap<String, CatalogKey> {
        &self.allocated
    }
}

pub fn allocate_all(
    allocator: &mut KeyAllocator,
    items: Vec<FragmentItem>,
    diagnostics: &mut Diagnostics,
) -> Vec<AllocatedItem> {
    let mut out = Vec::with_capacity(items.len());
    for item in items {
        match allocator.allocate(&item.item_id) {
            Ok(key) => out.push(AllocatedItem { item, key }),
            Err(err) => diagnostics.report(err),
        }
    }
    out
}
