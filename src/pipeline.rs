//! One reconciliation pass: discover fragments, merge, diff against the
//! persisted combined res_map, then either validate or ask for a restart.

use crate::{
    catalog::Catalog,
    error::{Diagnostics, Result},
    fragment::{accept_items, FragmentLoader, FragmentOrigin},
    keys::{allocate_all, KeyAllocator},
    merge::{merge, MergeOutput},
    readiness::{IdentifierIndex, ReadinessBroker},
    restart::{request_restart, RestartCoordinator},
    store::CatalogStore,
};
use serde::Serialize;
use tracing::info;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PassStatus {
    /// No fragments and nothing persisted.
    NoMods,
    /// No fragments; a stale combined res_map was removed.
    StaleRemoved,
    /// The persisted res_map already matches.
    Unchanged,
    /// A new res_map was written and a restart requested.
    RestartRequested,
    /// A new res_map was written but the restart flag was already set, so the
    /// pass validates instead of restarting again.
    RestartSuppressed,
}

impl PassStatus {
    pub fn validated(self) -> bool {
        matches!(
            self,
            PassStatus::NoMods
                | PassStatus::StaleRemoved
                | PassStatus::Unchanged
                | PassStatus::RestartSuppressed
        )
    }

    pub fn label(self) -> &'static str {
        match self {
            PassStatus::NoMods => "no mods",
            PassStatus::StaleRemoved => "stale res_map removed",
            PassStatus::Unchanged => "up to date",
            PassStatus::RestartRequested => "restart requested",
            PassStatus::RestartSuppressed => "restart suppressed",
        }
    }
}

#[derive(Debug)]
pub struct PassOutcome {
    pub status: PassStatus,
    pub fragment_count: usize,
    pub item_count: usize,
    pub diagnostics: Diagnostics,
}

/// Result of a dry run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CheckStatus {
    NoMods,
    NeedsRemoval,
    UpToDate,
    NeedsWrite,
}

pub struct ResMapPipeline<'a> {
    loader: FragmentLoader<'a>,
    store: CatalogStore,
}

impl<'a> ResMapPipeline<'a> {
    pub fn new(loader: FragmentLoader<'a>, store: CatalogStore) -> Self {
        Self { loader, store }
    }

    pub fn store(&self) -> &CatalogStore {
        &self.store
    }

    /// `CatalogRead` and `Persistence` abort the pass before anything is
    /// validated or restarted; everything else lands in the diagnostics.
    /// Fragments are listed once and that listing drives the whole pass.
    pub fn run(
        &self,
        broker: &ReadinessBroker,
        restart: &dyn RestartCoordinator,
    ) -> Result<PassOutcome> {
        let mut diagnostics = Diagnostics::new();
        let sources = self.loader.sources();
        let fragment_count = sources.len();

        if fragment_count == 0 {
            let status = if self.store.delete_combined()? {
                PassStatus::StaleRemoved
            } else {
                PassStatus::NoMods
            };
            self.finish_validated(broker, IdentifierIndex::default());
            return Ok(PassOutcome {
                status,
                fragment_count,
                item_count: 0,
                diagnostics,
            });
        }

        let merged = self.build_candidate(sources, &mut diagnostics)?;
        let item_count = merged.keys.len();
        let index = IdentifierIndex::from_keys(&merged.keys);

        let status = match self.store.load_existing_combined() {
            Some(existing) if CatalogStore::equals(&merged.catalog, &existing) => {
                self.finish_validated(broker, index);
                PassStatus::Unchanged
            }
            _ => {
                self.store.persist(&merged.catalog)?;
                if request_restart(&self.store, restart) {
                    PassStatus::RestartRequested
                } else {
                    self.finish_validated(broker, index);
                    PassStatus::RestartSuppressed
                }
            }
        };

        info!(
            "res_map pass finished: {} ({fragment_count} fragment(s), {item_count} item(s), {} problem(s))",
            status.label(),
            diagnostics.len()
        );
        Ok(PassOutcome {
            status,
            fragment_count,
            item_count,
            diagnostics,
        })
    }

    /// Computes what `run` would do without writing anything.
    pub fn check(&self) -> Result<(CheckStatus, Diagnostics)> {
        let mut diagnostics = Diagnostics::new();
        let sources = self.loader.sources();
        if sources.is_empty() {
            let status = if self.store.combined_exists() {
                CheckStatus::NeedsRemoval
            } else {
                CheckStatus::NoMods
            };
            return Ok((status, diagnostics));
        }

        let merged = self.build_candidate(sources, &mut diagnostics)?;
        let status = match self.store.load_existing_combined() {
            Some(existing) if CatalogStore::equals(&merged.catalog, &existing) => {
                CheckStatus::UpToDate
            }
            _ => CheckStatus::NeedsWrite,
        };
        Ok((status, diagnostics))
    }

    pub fn build_candidate(
        &self,
        sources: Vec<FragmentOrigin>,
        diagnostics: &mut Diagnostics,
    ) -> Result<MergeOutput> {
        let original: Catalog = self.store.load_original()?;
        let items = accept_items(self.loader.load_sources(sources), diagnostics);
        let mut allocator = KeyAllocator::new(&original);
        let allocated = allocate_all(&mut allocator, items, diagnostics);
        Ok(merge(&original, allocated, diagnostics))
    }

    fn finish_validated(&self, broker: &ReadinessBroker, index: IdentifierIndex) {
        broker.validate(index);
        self.store.clear_restart_flag();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        catalog::ResId,
        error::ResMapError,
        keys::derive_key,
        readiness::ModResource,
        restart::RecordingRestart,
        store::OriginalSource,
        vfs::MemoryVfs,
    };
    use pretty_assertions::assert_eq;
    use std::{
        fs,
        path::Path,
        sync::{Arc, Mutex},
    };
    use tempfile::TempDir;

    const CONFIG_DIR: &str = "mods/configs/res_map";

    struct Fixture {
        temp: TempDir,
    }

    impl Fixture {
        fn new() -> Self {
            let temp = TempDir::new().unwrap();
            fs::write(
                temp.path().join("res_map.json"),
                r#"{"0":{"path":"gui/a.png"},"1":{"path":"gui/b.png"},}"#,
            )
            .unwrap();
            Fixture { temp }
        }

        fn root(&self) -> &Path {
            self.temp.path()
        }

        fn store(&self) -> CatalogStore {
            CatalogStore::new(
                OriginalSource::File(self.root().join("res_map.json")),
                self.root().join("res_mods/gui/unbound/res_map.json"),
                self.root().join("res_map_restart"),
            )
        }

        fn pipeline<'a>(&self, vfs: Option<&'a MemoryVfs>) -> ResMapPipeline<'a> {
            let vfs = vfs.map(|vfs| vfs as &dyn crate::vfs::Vfs);
            ResMapPipeline::new(FragmentLoader::new(self.root(), CONFIG_DIR, vfs), self.store())
        }

        fn write_fragment(&self, name: &str, contents: &str) {
            let dir = self.root().join(CONFIG_DIR);
            fs::create_dir_all(&dir).unwrap();
            fs::write(dir.join(name), contents).unwrap();
        }

        fn combined(&self) -> Option<String> {
            fs::read_to_string(self.store().combined_path()).ok()
        }

        /// Fresh process: new broker and coordinator.
        fn run(&self) -> (PassOutcome, ReadinessBroker, RecordingRestart) {
            let broker = ReadinessBroker::new();
            let restart = RecordingRestart::new();
            let outcome = self.pipeline(None).run(&broker, &restart).unwrap();
            (outcome, broker, restart)
        }
    }

    #[test]
    fn first_run_persists_and_restarts_then_second_run_validates() {
        let fixture = Fixture::new();
        fixture.write_fragment("a.json", r#"[{"itemID": "a/x", "v": 1}]"#);

        let (first, broker, restart) = fixture.run();
        assert_eq!(first.status, PassStatus::RestartRequested);
        assert_eq!(restart.count(), 1);
        assert!(!broker.is_validated());
        assert!(fixture.store().restart_flag_exists());
        let written = fixture.combined().unwrap();

        let (second, broker, restart) = fixture.run();
        assert_eq!(second.status, PassStatus::Unchanged);
        assert!(!restart.requested());
        assert!(broker.is_validated());
        assert!(!fixture.store().restart_flag_exists());
        assert_eq!(fixture.combined().unwrap(), written);
        assert_eq!(
            broker.resolve_by_key("a/x"),
            derive_key("a/x", 0).res_id()
        );
    }

    #[test]
    fn fresh_runs_derive_the_same_key() {
        let first = Fixture::new();
        let second = Fixture::new();
        for fixture in [&first, &second] {
            fixture.write_fragment("a.json", r#"[{"itemID":"a/x","v":1}]"#);
            fixture.run();
        }
        assert_eq!(first.combined(), second.combined());
        let (_, broker, _) = first.run();
        let (_, other, _) = second.run();
        assert_eq!(broker.resolve_by_key("a/x"), other.resolve_by_key("a/x"));
        assert!(broker.resolve_by_key("a/x").is_valid());
    }

    #[test]
    fn changed_entry_rewrites_and_restarts_once() {
        let fixture = Fixture::new();
        fixture.write_fragment("a.json", r#"[{"itemID": "a/x", "v": 1}]"#);
        fixture.run();
        fixture.run();

        fixture.write_fragment("a.json", r#"[{"itemID": "a/x", "v": 2}]"#);
        let (outcome, broker, restart) = fixture.run();
        assert_eq!(outcome.status, PassStatus::RestartRequested);
        assert_eq!(restart.count(), 1);
        assert!(!broker.is_validated());
        assert!(fixture.combined().unwrap().contains(r#""v":2"#));
    }

    #[test]
    fn suppressed_restart_validates_and_clears_flag() {
        let fixture = Fixture::new();
        fixture.write_fragment("a.json", r#"[{"itemID": "a/x", "v": 1}]"#);
        fixture.run();
        assert!(fixture.store().restart_flag_exists());

        fixture.write_fragment("a.json", r#"[{"itemID": "a/x", "v": 3}]"#);
        let broker = ReadinessBroker::new();
        let restart = RecordingRestart::new();
        let fired = Arc::new(Mutex::new(0));
        let counter = Arc::clone(&fired);
        broker.on_ready(move |_| *counter.lock().unwrap() += 1);
        let title = ModResource::new(&broker, "a/x");

        let outcome = fixture.pipeline(None).run(&broker, &restart).unwrap();
        assert_eq!(outcome.status, PassStatus::RestartSuppressed);
        assert!(outcome.status.validated());
        assert!(!restart.requested());
        assert!(broker.is_validated());
        assert_eq!(*fired.lock().unwrap(), 1);
        assert_eq!(title.res_id(), derive_key("a/x", 0).res_id());
        assert!(!fixture.store().restart_flag_exists());
        assert!(fixture.combined().unwrap().contains(r#""v":3"#));
    }

    #[test]
    fn pass_merges_the_listing_it_counted() {
        let fixture = Fixture::new();
        fixture.write_fragment("a.json", r#"[{"itemID": "a/x"}]"#);
        let pipeline = fixture.pipeline(None);
        let sources = pipeline.loader.sources();

        fixture.write_fragment("b.json", r#"[{"itemID": "b/late"}]"#);
        let mut diagnostics = Diagnostics::new();
        let merged = pipeline.build_candidate(sources, &mut diagnostics).unwrap();
        let ids: Vec<&str> = merged.keys.keys().map(String::as_str).collect();
        assert_eq!(ids, vec!["a/x"]);
    }

    #[test]
    fn no_fragments_and_nothing_persisted_is_a_no_op() {
        let fixture = Fixture::new();
        let (outcome, broker, restart) = fixture.run();
        assert_eq!(outcome.status, PassStatus::NoMods);
        assert!(broker.is_validated());
        assert!(!restart.requested());
        assert_eq!(fixture.combined(), None);
    }

    #[test]
    fn removing_all_fragments_deletes_combined_without_restart() {
        let fixture = Fixture::new();
        fixture.write_fragment("a.json", r#"[{"itemID": "a/x"}]"#);
        fixture.run();
        assert!(fixture.combined().is_some());

        fs::remove_file(fixture.root().join(CONFIG_DIR).join("a.json")).unwrap();
        let (outcome, broker, restart) = fixture.run();
        assert_eq!(outcome.status, PassStatus::StaleRemoved);
        assert_eq!(fixture.combined(), None);
        assert!(!restart.requested());
        assert!(broker.is_validated());
        assert_eq!(broker.resolve_by_key("a/x"), ResId::INVALID);
    }

    #[test]
    fn missing_original_aborts_before_persisting() {
        let fixture = Fixture::new();
        fixture.write_fragment("a.json", r#"[{"itemID": "a/x"}]"#);
        fs::remove_file(fixture.root().join("res_map.json")).unwrap();

        let broker = ReadinessBroker::new();
        let restart = RecordingRestart::new();
        let err = fixture.pipeline(None).run(&broker, &restart).unwrap_err();
        assert!(matches!(err, ResMapError::CatalogRead(_)));
        assert_eq!(fixture.combined(), None);
        assert!(!restart.requested());
        assert!(!broker.is_validated());
    }

    #[test]
    fn persistence_failure_keeps_previous_state() {
        let fixture = Fixture::new();
        fixture.write_fragment("a.json", r#"[{"itemID": "a/x"}]"#);
        fs::write(fixture.root().join("res_mods"), "blocks the directory").unwrap();

        let broker = ReadinessBroker::new();
        let restart = RecordingRestart::new();
        let err = fixture.pipeline(None).run(&broker, &restart).unwrap_err();
        assert!(matches!(err, ResMapError::Persistence { .. }));
        assert!(!restart.requested());
        assert!(!fixture.store().restart_flag_exists());
    }

    #[test]
    fn callbacks_fire_only_on_validation() {
        let fixture = Fixture::new();
        fixture.write_fragment("a.json", r#"[{"itemID": "mods/testDialog/title"}]"#);

        let calls = Arc::new(Mutex::new(0));
        let broker = ReadinessBroker::new();
        let counter = Arc::clone(&calls);
        broker.on_ready(move |_| *counter.lock().unwrap() += 1);
        fixture
            .pipeline(None)
            .run(&broker, &RecordingRestart::new())
            .unwrap();
        assert_eq!(*calls.lock().unwrap(), 0);

        let broker = ReadinessBroker::new();
        let counter = Arc::clone(&calls);
        broker.on_ready(move |index| {
            assert!(index.get("mods/testDialog/title").is_some());
            *counter.lock().unwrap() += 1;
        });
        fixture
            .pipeline(None)
            .run(&broker, &RecordingRestart::new())
            .unwrap();
        assert_eq!(*calls.lock().unwrap(), 1);
    }

    #[test]
    fn duplicates_across_fs_and_vfs_keep_the_first() {
        let fixture = Fixture::new();
        fixture.write_fragment("a.json", r#"[{"itemID": "dup/key", "from": "fs"}]"#);
        let mut vfs = MemoryVfs::new();
        vfs.insert(
            "mods/configs/res_map/b.json",
            r#"[{"itemID": "dup/key", "from": "vfs"}, {"itemID": "vfs/only"},]"#,
        );

        let broker = ReadinessBroker::new();
        let outcome = fixture
            .pipeline(Some(&vfs))
            .run(&broker, &RecordingRestart::new())
            .unwrap();
        assert_eq!(outcome.fragment_count, 2);
        assert_eq!(outcome.item_count, 2);
        assert_eq!(
            outcome
                .diagnostics
                .count_where(|err| matches!(err, ResMapError::DuplicateIdentifier { .. })),
            1
        );
        let combined = fixture.combined().unwrap();
        assert!(combined.contains(r#""from":"fs""#));
        assert!(!combined.contains(r#""from":"vfs""#));
    }

    #[test]
    fn check_reports_without_writing() {
        let fixture = Fixture::new();
        fixture.write_fragment("a.json", r#"[{"itemID": "a/x"}]"#);
        let (status, _) = fixture.pipeline(None).check().unwrap();
        assert_eq!(status, CheckStatus::NeedsWrite);
        assert_eq!(fixture.combined(), None);

        fixture.run();
        let (status, _) = fixture.pipeline(None).check().unwrap();
        assert_eq!(status, CheckStatus::UpToDate);

        fs::remove_file(fixture.root().join(CONFIG_DIR).join("a.json")).unwrap();
        let (status, _) = fixture.pipeline(None).check().unwrap();
        assert_eq!(status, CheckStatus::NeedsRemoval);
    }
}
