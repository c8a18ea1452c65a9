use crate::{
    catalog::{Catalog, CatalogKey},
    error::{Diagnostics, ResMapError},
    keys::{AllocatedItem, MAX_PROBES},
};
use indexmap::IndexMap;
use tracing::debug;

/// Candidate combined res_map plus the ids that actually made it in.
#[derive(Debug, Clone, Default)]
pub struct MergeOutput {
    pub catalog: Catalog,
    pub keys: IndexMap<String, CatalogKey>,
}

/// Original entries are copied untouched; each allocated item lands at its key.
/// A key that is already taken counts as one attempt past the allocator's
/// limit, since the allocator should never hand it out.
pub fn merge(
    original: &Catalog,
    allocated: Vec<AllocatedItem>,
    diagnostics: &mut Diagnostics,
) -> MergeOutput {
    let mut catalog = original.clone();
    let mut keys = IndexMap::with_capacity(allocated.len());

    for AllocatedItem { item, key } in allocated {
        if !catalog.insert_new(key.clone(), item.entry) {
            diagnostics.report(ResMapError::KeyAllocationExhausted {
                item_id: item.item_id,
                attempts: MAX_PROBES + 1,
            });
            continue;
        }
        keys.insert(item.item_id, key);
    }

    debug!(
        "merged {} mod item(s) into {} original entries",
        keys.len(),
        original.len()
    );
    MergeOutput { catalog, keys }
}
