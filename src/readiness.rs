//! Validation state, on-ready callbacks and `itemID` lookups.
//!
//! One `ReadinessBroker` exists per process. It starts `Pending`, becomes
//! `Validated` once the combined res_map is known to match what the game
//! loaded, and from then on answers id lookups from an immutable snapshot.

use crate::catalog::{CatalogKey, ResId};
use indexmap::IndexMap;
use std::sync::{Arc, Mutex, MutexGuard, OnceLock};
use tracing::{debug, info};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadinessState {
    Pending,
    Validated,
}

/// `itemID → ResId` in allocation order.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct IdentifierIndex {
    ids: IndexMap<String, ResId>,
}

impl IdentifierIndex {
    pub fn from_keys<'a>(keys: impl IntoIterator<Item = (&'a String, &'a CatalogKey)>) -> Self {
        Self {
            ids: keys
                .into_iter()
                .map(|(item_id, key)| (item_id.clone(), key.res_id()))
                .collect(),
        }
    }

    pub fn get(&self, item_id: &str) -> Option<ResId> {
        self.ids.get(item_id).copied()
    }

    pub fn len(&self) -> usize {
        self.ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, ResId)> {
        self.ids.iter().map(|(item_id, id)| (item_id.as_str(), *id))
    }
}

type ReadyCallback = Box<dyn FnOnce(&IdentifierIndex) + Send>;

struct BrokerState {
    state: ReadinessState,
    index: Arc<IdentifierIndex>,
    pending: Vec<ReadyCallback>,
}

pub struct ReadinessBroker {
    inner: Mutex<BrokerState>,
}

impl Default for ReadinessBroker {
    fn default() -> Self {
        Self::new()
    }
}

impl ReadinessBroker {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(BrokerState {
                state: ReadinessState::Pending,
                index: Arc::new(IdentifierIndex::default()),
                pending: Vec::new(),
            }),
        }
    }

    fn lock(&self) -> MutexGuard<'_, BrokerState> {
        self.inner
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn state(&self) -> ReadinessState {
        self.lock().state
    }

    pub fn is_validated(&self) -> bool {
        self.state() == ReadinessState::Validated
    }

    /// Runs `callback` now if validated, otherwise queues it for validation.
    /// Queued callbacks never run if the pass ends in a restart request.
    pub fn on_ready(&self, callback: impl FnOnce(&IdentifierIndex) + Send + 'static) {
        let mut inner = self.lock();
        if inner.state == ReadinessState::Validated {
            let index = Arc::clone(&inner.index);
            drop(inner);
            callback(&index);
            return;
        }
        inner.pending.push(Box::new(callback));
    }

    /// Publishes `index` and fires queued callbacks in registration order.
    /// Returns false if the broker was already validated.
    pub fn validate(&self, index: IdentifierIndex) -> bool {
        let (index, pending) = {
            let mut inner = self.lock();
            if inner.state == ReadinessState::Validated {
                return false;
            }
            inner.state = ReadinessState::Validated;
            inner.index = Arc::new(index);
            (Arc::clone(&inner.index), std::mem::take(&mut inner.pending))
        };
        info!(
            "res_map validated with {} mod item(s), notifying {} subscriber(s)",
            index.len(),
            pending.len()
        );
        for callback in pending {
            callback(&index);
        }
        true
    }

    /// Number of callbacks waiting for validation.
    pub fn pending_callbacks(&self) -> usize {
        self.lock().pending.len()
    }

    /// `ResId::INVALID` when unknown or not yet validated.
    pub fn resolve_by_key(&self, item_id: &str) -> ResId {
        let inner = self.lock();
        if inner.state != ReadinessState::Validated {
            debug!("{item_id} looked up before validation");
            return ResId::INVALID;
        }
        inner.index.get(item_id).unwrap_or(ResId::INVALID)
    }

    /// Every `(itemID, ResId)` whose id contains `mask`, in allocation order.
    pub fn resolve_by_mask(&self, mask: &str) -> MaskMatches {
        let index = {
            let inner = self.lock();
            Arc::clone(&inner.index)
        };
        MaskMatches {
            index,
            mask: mask.to_string(),
            position: 0,
        }
    }
}

/// One-pass iterator over an index snapshot.
pub struct MaskMatches {
    index: Arc<IdentifierIndex>,
    mask: String,
    position: usize,
}

impl Iterator for MaskMatches {
    type Item = (String, ResId);

    fn next(&mut self) -> Option<Self::Item> {
        while let Some((item_id, id)) = self.index.ids.get_index(self.position) {
            self.position += 1;
            if item_id.contains(self.mask.as_str()) {
                return Some((item_id.clone(), *id));
            }
        }
        None
    }
}

/// Handle to a mod resource whose id is only known after validation.
///
/// Binds once, when the broker validates; stays `ResId::INVALID` if the id
/// was never allocated.
#[derive(Debug, Clone)]
pub struct ModResource {
    item_id: String,
    resolved: Arc<OnceLock<ResId>>,
}

impl ModResource {
    pub fn new(broker: &ReadinessBroker, item_id: impl Into<String>) -> Self {
        let resource = ModResource {
            item_id: item_id.into(),
            resolved: Arc::new(OnceLock::new()),
        };
        let slot = Arc::clone(&resource.resolved);
        let item_id = resource.item_id.clone();
        broker.on_ready(move |index| {
            let _ = slot.set(index.get(&item_id).unwrap_or(ResId::INVALID));
        });
        resource
    }

    pub fn item_id(&self) -> &str {
        &self.item_id
    }

    pub fn is_bound(&self) -> bool {
        self.resolved.get().is_some()
    }

    pub fn res_id(&self) -> ResId {
        self.resolved.get().copied().unwrap_or(ResId::INVALID)
    }
}
