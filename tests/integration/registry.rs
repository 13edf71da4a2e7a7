//! Registry behaviour against a recording cache builder

use dircache::cache::{
    CacheAction, CacheBuilder, CacheSpec, CacheUsage, IndexedCache, IndexedCacheParameters,
    LockMode, PersistentCache, ReferencableCache, StoreSpec,
};
use dircache::{CacheRegistry, CacheRequest, DirCacheError, DirCacheResult, StoreRequest};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Barrier, Mutex};
use std::thread;
use tempfile::TempDir;

#[derive(Default)]
struct Recorder {
    builds: AtomicUsize,
    opens: AtomicUsize,
    closes: AtomicUsize,
    modes: Mutex<Vec<LockMode>>,
    fail_open: AtomicBool,
    fail_close: AtomicBool,
}

impl Recorder {
    fn builds(&self) -> usize {
        self.builds.load(Ordering::SeqCst)
    }

    fn opens(&self) -> usize {
        self.opens.load(Ordering::SeqCst)
    }

    fn closes(&self) -> usize {
        self.closes.load(Ordering::SeqCst)
    }
}

struct RecordingCache {
    dir: PathBuf,
    name: String,
    recorder: Arc<Recorder>,
}

impl PersistentCache for RecordingCache {
    fn base_dir(&self) -> &Path {
        &self.dir
    }

    fn display_name(&self) -> &str {
        &self.name
    }

    fn create_cache(&self, parameters: IndexedCacheParameters) -> DirCacheResult<IndexedCache> {
        IndexedCache::open(&self.dir, parameters)
    }

    fn use_cache(&self, _operation: &str, action: &mut CacheAction<'_>) -> DirCacheResult<()> {
        action()
    }

    fn long_running_operation(
        &self,
        _operation: &str,
        action: &mut CacheAction<'_>,
    ) -> DirCacheResult<()> {
        action()
    }
}

impl ReferencableCache for RecordingCache {
    fn open(&self) -> DirCacheResult<()> {
        if self.recorder.fail_open.load(Ordering::SeqCst) {
            return Err(DirCacheError::Internal("open failed".into()));
        }
        self.recorder.opens.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn close(&self) -> DirCacheResult<()> {
        self.recorder.closes.fetch_add(1, Ordering::SeqCst);
        if self.recorder.fail_close.load(Ordering::SeqCst) {
            return Err(DirCacheError::Internal(format!("{} close failed", self.name)));
        }
        Ok(())
    }
}

struct RecordingBuilder(Arc<Recorder>);

impl RecordingBuilder {
    fn build(&self, dir: PathBuf, name: String, mode: LockMode) -> Arc<dyn ReferencableCache> {
        self.0.builds.fetch_add(1, Ordering::SeqCst);
        self.0.modes.lock().unwrap().push(mode);
        Arc::new(RecordingCache {
            dir,
            name,
            recorder: Arc::clone(&self.0),
        })
    }
}

impl CacheBuilder for RecordingBuilder {
    fn build_cache(&self, spec: CacheSpec) -> Arc<dyn ReferencableCache> {
        self.build(spec.dir, spec.display_name, spec.lock_options.mode)
    }

    fn build_store(&self, spec: StoreSpec) -> Arc<dyn ReferencableCache> {
        self.build(spec.dir, spec.display_name, spec.lock_options.mode)
    }
}

fn recording_registry() -> (CacheRegistry, Arc<Recorder>) {
    let recorder = Arc::new(Recorder::default());
    let registry = CacheRegistry::new(Arc::new(RecordingBuilder(Arc::clone(&recorder))));
    (registry, recorder)
}

#[test]
fn repeat_open_shares_one_cache() {
    let temp = TempDir::new().unwrap();
    let (registry, recorder) = recording_registry();
    let factory = registry.create();

    let first = factory.open(CacheRequest::new(temp.path())).unwrap();
    let second = factory.open(CacheRequest::new(temp.path())).unwrap();

    assert_eq!(recorder.builds(), 1);
    assert_eq!(recorder.opens(), 1);
    assert_eq!(registry.lease_count(temp.path()), Some(2));

    first.close().unwrap();
    assert_eq!(recorder.closes(), 0);
    assert_eq!(registry.lease_count(temp.path()), Some(1));

    second.close().unwrap();
    assert_eq!(recorder.closes(), 1);
    assert!(registry.is_empty());
}

#[test]
fn equivalent_paths_share_one_entry() {
    let temp = TempDir::new().unwrap();
    let nested = temp.path().join("nested");
    let (registry, recorder) = recording_registry();
    let factory = registry.create();

    let _direct = factory.open(CacheRequest::new(temp.path())).unwrap();
    let _dotted = factory
        .open(CacheRequest::new(nested.join("..").join(".")))
        .unwrap();

    assert_eq!(recorder.builds(), 1);
    assert_eq!(registry.len(), 1);
    assert_eq!(registry.lease_count(temp.path()), Some(2));
}

#[cfg(unix)]
#[test]
fn symlinked_path_shares_one_entry() {
    let temp = TempDir::new().unwrap();
    let target = temp.path().join("target");
    std::fs::create_dir(&target).unwrap();
    let link = temp.path().join("link");
    std::os::unix::fs::symlink(&target, &link).unwrap();

    let (registry, recorder) = recording_registry();
    let factory = registry.create();
    let via_target = factory.open(CacheRequest::new(&target)).unwrap();
    let via_link = factory.open(CacheRequest::new(&link)).unwrap();

    assert_eq!(recorder.builds(), 1);
    assert_eq!(via_target.base_dir(), via_link.base_dir());
}

#[cfg(unix)]
#[test]
fn parent_of_symlink_shares_the_target_entry() {
    let temp = TempDir::new().unwrap();
    let real = temp.path().join("real");
    std::fs::create_dir_all(real.join("sub")).unwrap();
    let link = temp.path().join("link");
    std::os::unix::fs::symlink(real.join("sub"), &link).unwrap();
    let through_link = link.join("..").join("cache");

    let (registry, recorder) = recording_registry();
    let factory = registry.create();
    let direct = factory
        .open(CacheRequest::new(real.join("cache")).property("v", 1))
        .unwrap();

    let err = factory
        .open(CacheRequest::new(&through_link).property("v", 2))
        .unwrap_err();
    assert!(matches!(err, DirCacheError::StateConflict { .. }));

    let shared = factory
        .open(CacheRequest::new(&through_link).property("v", 1))
        .unwrap();
    assert_eq!(recorder.builds(), 1);
    assert_eq!(registry.len(), 1);
    assert_eq!(direct.base_dir(), shared.base_dir());
}

#[test]
fn different_lock_options_conflict() {
    let temp = TempDir::new().unwrap();
    let (registry, _recorder) = recording_registry();
    let factory = registry.create();

    let first = factory
        .open(CacheRequest::new(temp.path()).lock_mode(LockMode::Shared))
        .unwrap();
    let err = factory
        .open(CacheRequest::new(temp.path()).lock_mode(LockMode::Exclusive))
        .unwrap_err();

    match err {
        DirCacheError::OptionsConflict { ref dir } => assert_eq!(dir, temp.path()),
        other => panic!("expected OptionsConflict, got {other:?}"),
    }
    assert_eq!(registry.lease_count(temp.path()), Some(1));
    assert_eq!(first.use_cache("after conflict", || Ok(7)).unwrap(), 7);
}

#[test]
fn different_properties_conflict() {
    let temp = TempDir::new().unwrap();
    let (registry, _recorder) = recording_registry();
    let factory = registry.create();

    let first = factory
        .open(CacheRequest::new(temp.path()).property("version", 1))
        .unwrap();
    let err = factory
        .open(CacheRequest::new(temp.path()).property("version", 2))
        .unwrap_err();

    assert!(matches!(err, DirCacheError::StateConflict { .. }));
    assert!(err.is_conflict());
    assert!(!first.is_closed());
    assert_eq!(registry.lease_count(temp.path()), Some(1));

    let same = factory
        .open(CacheRequest::new(temp.path()).property("version", 1))
        .unwrap();
    assert_eq!(same.base_dir(), first.base_dir());
}

#[test]
fn closing_a_lease_twice_releases_once() {
    let temp = TempDir::new().unwrap();
    let (registry, recorder) = recording_registry();
    let factory = registry.create();

    let first = factory.open(CacheRequest::new(temp.path())).unwrap();
    let _second = factory.open(CacheRequest::new(temp.path())).unwrap();

    first.close().unwrap();
    first.close().unwrap();

    assert_eq!(registry.lease_count(temp.path()), Some(1));
    assert_eq!(recorder.closes(), 0);
}

#[test]
fn dropping_a_lease_releases_it() {
    let temp = TempDir::new().unwrap();
    let (registry, recorder) = recording_registry();
    let factory = registry.create();

    {
        let _lease = factory.open(CacheRequest::new(temp.path())).unwrap();
        assert!(registry.is_open(temp.path()));
    }

    assert!(!registry.is_open(temp.path()));
    assert_eq!(recorder.closes(), 1);
}

#[test]
fn closed_lease_rejects_operations() {
    let temp = TempDir::new().unwrap();
    let (registry, _recorder) = recording_registry();
    let lease = registry
        .create()
        .open(CacheRequest::new(temp.path()))
        .unwrap();

    lease.close().unwrap();

    assert!(lease.is_closed());
    assert!(lease.base_dir().ends_with(temp.path().file_name().unwrap()));
    assert!(matches!(
        lease.use_cache("late", || Ok(())),
        Err(DirCacheError::LeaseClosed { .. })
    ));
    assert!(matches!(
        lease.create_cache(IndexedCacheParameters::new("files")),
        Err(DirCacheError::LeaseClosed { .. })
    ));
}

#[test]
fn rebuild_is_only_allowed_for_the_rebuilding_session() {
    let temp = TempDir::new().unwrap();
    let (registry, recorder) = recording_registry();
    let owner = registry.create();
    let other = registry.create();

    let _rebuilt = owner
        .open(CacheRequest::new(temp.path()).usage(CacheUsage::Rebuild))
        .unwrap();
    let _again = owner
        .open(CacheRequest::new(temp.path()).usage(CacheUsage::Rebuild))
        .unwrap();

    let err = other
        .open(CacheRequest::new(temp.path()).usage(CacheUsage::Rebuild))
        .unwrap_err();
    assert!(matches!(err, DirCacheError::RebuildConflict { .. }));

    let _normal = other.open(CacheRequest::new(temp.path())).unwrap();
    assert_eq!(recorder.builds(), 1);
    assert_eq!(registry.lease_count(temp.path()), Some(3));
}

#[test]
fn store_initializer_is_rejected_before_registration() {
    let temp = TempDir::new().unwrap();
    let (registry, recorder) = recording_registry();

    let err = registry
        .create()
        .open_store(StoreRequest::new(temp.path()).initializer(|_| Ok(())))
        .unwrap_err();

    assert!(matches!(err, DirCacheError::UnsupportedInitializer));
    assert!(registry.is_empty());
    assert_eq!(recorder.builds(), 0);
}

#[test]
fn stores_are_reused_whatever_their_options() {
    let temp = TempDir::new().unwrap();
    let (registry, recorder) = recording_registry();
    let factory = registry.create();

    let shared = factory
        .open_store(StoreRequest::new(temp.path()).lock_mode(LockMode::Shared))
        .unwrap();
    let exclusive = factory
        .open_store(StoreRequest::new(temp.path()).lock_mode(LockMode::Exclusive))
        .unwrap();

    assert_eq!(recorder.builds(), 1);
    assert_eq!(shared.display_name(), exclusive.display_name());
    assert_eq!(registry.lease_count(temp.path()), Some(2));
}

#[test]
fn lock_mode_none_opens_around_each_operation() {
    let temp = TempDir::new().unwrap();
    let (registry, recorder) = recording_registry();

    let lease = registry
        .create()
        .open(CacheRequest::new(temp.path()).lock_mode(LockMode::None))
        .unwrap();
    assert_eq!(recorder.opens(), 0);
    assert_eq!(*recorder.modes.lock().unwrap(), vec![LockMode::Exclusive]);

    for _ in 0..3 {
        lease.use_cache("scoped", || Ok(())).unwrap();
    }
    lease.long_running_operation("slow", || Ok(())).unwrap();
    assert_eq!(recorder.opens(), 4);
    assert_eq!(recorder.closes(), 4);

    lease.close().unwrap();
    assert_eq!(recorder.closes(), 4);
    assert!(registry.is_empty());
}

#[test]
fn concurrent_opens_create_one_cache() {
    const THREADS: usize = 16;

    let temp = TempDir::new().unwrap();
    let (registry, recorder) = recording_registry();
    let barrier = Barrier::new(THREADS);

    let leases: Vec<_> = thread::scope(|scope| {
        let handles: Vec<_> = (0..THREADS)
            .map(|_| {
                scope.spawn(|| {
                    let factory = registry.create();
                    barrier.wait();
                    factory.open(CacheRequest::new(temp.path())).unwrap()
                })
            })
            .collect();
        handles.into_iter().map(|h| h.join().unwrap()).collect()
    });

    assert_eq!(recorder.builds(), 1);
    assert_eq!(recorder.opens(), 1);
    assert_eq!(registry.lease_count(temp.path()), Some(THREADS));

    thread::scope(|scope| {
        for lease in leases {
            scope.spawn(move || lease.close().unwrap());
        }
    });

    assert_eq!(recorder.closes(), 1);
    assert!(registry.is_empty());
}

#[test]
fn session_close_releases_only_its_leases() {
    let shared_dir = TempDir::new().unwrap();
    let own_dir = TempDir::new().unwrap();
    let (registry, recorder) = recording_registry();
    let session = registry.create();
    let bystander = registry.create();

    let mine = session.open(CacheRequest::new(shared_dir.path())).unwrap();
    let _only_mine = session.open(CacheRequest::new(own_dir.path())).unwrap();
    let theirs = bystander.open(CacheRequest::new(shared_dir.path())).unwrap();

    session.close().unwrap();

    assert!(mine.is_closed());
    assert!(!theirs.is_closed());
    assert!(!registry.is_open(own_dir.path()));
    assert_eq!(registry.lease_count(shared_dir.path()), Some(1));
    assert_eq!(recorder.closes(), 1);

    // Leases released by the session stay released.
    mine.close().unwrap();
    assert_eq!(registry.lease_count(shared_dir.path()), Some(1));
}

#[test]
fn failed_open_registers_nothing() {
    let temp = TempDir::new().unwrap();
    let (registry, recorder) = recording_registry();
    let factory = registry.create();

    recorder.fail_open.store(true, Ordering::SeqCst);
    assert!(factory.open(CacheRequest::new(temp.path())).is_err());
    assert!(registry.is_empty());

    recorder.fail_open.store(false, Ordering::SeqCst);
    let lease = factory.open(CacheRequest::new(temp.path())).unwrap();
    assert!(!lease.is_closed());
    assert_eq!(recorder.builds(), 2);
    assert_eq!(registry.lease_count(temp.path()), Some(1));
}

#[test]
fn registry_close_reports_every_failure() {
    let first = TempDir::new().unwrap();
    let second = TempDir::new().unwrap();
    let (registry, recorder) = recording_registry();
    let factory = registry.create();

    let lease = factory.open(CacheRequest::new(first.path())).unwrap();
    let _other = factory.open(CacheRequest::new(second.path())).unwrap();
    recorder.fail_close.store(true, Ordering::SeqCst);

    match registry.close().unwrap_err() {
        DirCacheError::CloseFailures(failures) => assert_eq!(failures.len(), 2),
        other => panic!("expected CloseFailures, got {other:?}"),
    }
    assert_eq!(recorder.closes(), 2);
    assert!(registry.is_empty());

    // Outstanding leases no longer reach a cache.
    lease.close().unwrap();
    assert_eq!(recorder.closes(), 2);
}

#[test]
fn use_cache_returns_the_action_result() {
    let temp = TempDir::new().unwrap();
    let (registry, _recorder) = recording_registry();
    let lease = registry
        .create()
        .open(CacheRequest::new(temp.path()))
        .unwrap();

    let value = lease
        .use_cache("compute", || Ok(String::from("cached")))
        .unwrap();
    assert_eq!(value, "cached");

    let err = lease
        .long_running_operation("fail", || -> DirCacheResult<()> {
            Err(DirCacheError::User("boom".into()))
        })
        .unwrap_err();
    assert_eq!(err.to_string(), "boom");
}

#[test]
fn default_caches_initialize_once_per_properties() {
    let temp = TempDir::new().unwrap();
    let dir = temp.path().join("hashes");
    let runs = Arc::new(AtomicUsize::new(0));
    let registry = CacheRegistry::with_defaults();
    let factory = registry.create();

    let request = {
        let runs = Arc::clone(&runs);
        CacheRequest::new(&dir)
            .property("version", 1)
            .initializer(move |cache| {
                runs.fetch_add(1, Ordering::SeqCst);
                cache
                    .create_cache(IndexedCacheParameters::new("files"))?
                    .put("seed", &true)
            })
    };

    let first = factory.open(request.clone()).unwrap();
    let second = factory.open(request.clone()).unwrap();
    assert_eq!(runs.load(Ordering::SeqCst), 1);

    let seeded: Option<bool> = first
        .use_cache("read seed", || {
            first
                .create_cache(IndexedCacheParameters::new("files"))?
                .get("seed")
        })
        .unwrap();
    assert_eq!(seeded, Some(true));

    drop(first);
    drop(second);
    assert!(registry.is_empty());

    let _reopened = factory.open(request).unwrap();
    assert_eq!(runs.load(Ordering::SeqCst), 1);
}

#[test]
fn initializer_may_open_and_release_other_caches() {
    let temp = TempDir::new().unwrap();
    let outer = temp.path().join("outer");
    let inner = temp.path().join("inner");
    let registry = CacheRegistry::with_defaults();

    let request = {
        let registry = registry.clone();
        let inner = inner.clone();
        CacheRequest::new(&outer).initializer(move |_| {
            let lease = registry.create().open(CacheRequest::new(&inner))?;
            lease.use_cache("seed inner", || {
                lease
                    .create_cache(IndexedCacheParameters::new("files"))?
                    .put("seed", &true)
            })
        })
    };

    let lease = registry.create().open(request).unwrap();
    assert!(registry.is_open(&outer));
    assert!(!registry.is_open(&inner));
    assert!(inner.join("files.json").is_file());

    drop(lease);
    assert!(registry.is_empty());
}

#[test]
fn initializer_reopening_its_own_directory_fails() {
    let temp = TempDir::new().unwrap();
    let dir = temp.path().join("hashes");
    let registry = CacheRegistry::with_defaults();

    let request = {
        let registry = registry.clone();
        let own_dir = dir.clone();
        CacheRequest::new(&dir).initializer(move |_| {
            registry.create().open(CacheRequest::new(&own_dir)).map(drop)
        })
    };

    let err = registry.create().open(request).unwrap_err();
    assert!(matches!(err, DirCacheError::OpenInProgress { .. }));
    assert!(registry.is_empty());

    // The directory is idle again afterwards
    let _lease = registry.create().open(CacheRequest::new(&dir)).unwrap();
    assert!(registry.is_open(&dir));
}
