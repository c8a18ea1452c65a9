//! Builds the combined UI res_map from mod fragments and tells dependent code
//! when mod resource ids can be resolved.
//!
//! A pass runs once per game start: fragments from `mods/configs/res_map`
//! (real filesystem and mounted packages) are merged with the shipped
//! `gui/unbound/res_map.json`, written to `res_mods` when changed, and the game
//! is asked to restart so it loads the new map. When nothing changed the
//! [`ReadinessBroker`] validates and mod code can look up its ids.

pub mod catalog;
pub mod config;
pub mod error;
pub mod fragment;
pub mod inject;
pub mod keys;
pub mod merge;
pub mod paths;
pub mod pipeline;
pub mod readiness;
pub mod relaxed;
pub mod restart;
pub mod store;
pub mod vfs;

pub use catalog::{Catalog, CatalogKey, ResId};
pub use error::{Diagnostics, ResMapError};
pub use inject::InjectModel;
pub use pipeline::{PassOutcome, PassStatus, ResMapPipeline};
pub use readiness::{IdentifierIndex, ModResource, ReadinessBroker, ReadinessState};
pub use restart::{RecordingRestart, RestartCoordinator};
