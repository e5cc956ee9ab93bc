//! Module Registry.
//!
//! Keyed store of module states with single-flight loading. The registry owns
//! every instance; consumers hold `ModuleRegistry` handles (cheap clones of
//! one shared inner state) and receive state snapshots.
//!
//! Per name, a load walks Unloaded -> Loading -> Ready | Failed. Concurrent
//! callers for a name that is Loading wait on the in-flight attempt instead
//! of starting another one. Only [`ModuleRegistry::invalidate`] returns an
//! entry to Unloaded.

use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use hashbrown::HashMap;
use serde::{Deserialize, Serialize};
use spin::Mutex;
use tokio::sync::watch;
use tokio::task::JoinHandle;

use crate::config::LoaderConfig;
use crate::diagnostics::{LoadDiagnostics, LoadOutcome, LoadRecord};
use crate::engine::build_engine;
use crate::error::LoadError;
use crate::instance::{Instantiated, Instantiator, ModuleInstance};
use crate::module::{content_hash, ModuleDescriptor};
use crate::resolver::ImportResolver;
use crate::source::ByteSource;
use crate::validator::Validator;

/// Lifecycle status of a module name.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ModuleStatus {
    Unloaded,
    Loading,
    Ready,
    Failed,
}

/// Snapshot of one registry entry.
#[derive(Debug, Clone)]
pub struct ModuleState {
    pub name: String,
    pub status: ModuleStatus,
    /// Location of the current or last attempt.
    pub source_location: Option<String>,
    /// Present only when Ready.
    pub instance: Option<Arc<ModuleInstance>>,
    pub descriptor: Option<Arc<ModuleDescriptor>>,
    /// Present only when Failed.
    pub last_error: Option<LoadError>,
    /// Ready, but `initialize` failed.
    pub warning: Option<String>,
    pub load_started_at: Option<DateTime<Utc>>,
    pub load_completed_at: Option<DateTime<Utc>>,
    /// Bumped on every load attempt and every invalidate.
    pub generation: u64,
}

impl ModuleState {
    fn unloaded(name: &str) -> Self {
        ModuleState {
            name: name.into(),
            status: ModuleStatus::Unloaded,
            source_location: None,
            instance: None,
            descriptor: None,
            last_error: None,
            warning: None,
            load_started_at: None,
            load_completed_at: None,
            generation: 0,
        }
    }

    pub fn is_ready(&self) -> bool {
        self.status == ModuleStatus::Ready
    }
}

/// Overall functionality the registry can offer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Availability {
    /// Every known module is Ready.
    Full,
    /// Some modules are Ready, others are not.
    Degraded,
    /// No module is Ready.
    Unavailable,
}

/// Flips to `true` once an attempt has written its outcome to the entry.
type Done = watch::Receiver<bool>;

struct Entry {
    state: ModuleState,
    /// The attempt for the current generation.
    inflight: Option<Done>,
    /// An invalidated attempt that is still running, with its generation.
    /// No new attempt starts until it finishes.
    retired: Option<(u64, Done)>,
    diagnostics: LoadDiagnostics,
}

impl Entry {
    fn new(name: &str) -> Self {
        Entry {
            state: ModuleState::unloaded(name),
            inflight: None,
            retired: None,
            diagnostics: LoadDiagnostics::new(name),
        }
    }
}

/// Next step for a caller of `load`.
enum Step {
    Settled(ModuleState),
    /// The attempt for `generation`, whose outcome is the answer.
    Attempt { generation: u64, done: Done },
    /// An invalidated attempt that must finish before the next one starts.
    Retired { generation: u64, done: Done },
}

pub(crate) struct RegistryInner {
    entries: Mutex<HashMap<String, Entry>>,
    source: Arc<dyn ByteSource>,
    validator: Validator,
    resolver: ImportResolver,
    instantiator: Instantiator,
    config: LoaderConfig,
    pub(crate) health: Mutex<Option<JoinHandle<()>>>,
}

impl Drop for RegistryInner {
    fn drop(&mut self) {
        if let Some(handle) = self.health.get_mut().take() {
            handle.abort();
        }
    }
}

/// Shared handle to a module registry.
#[derive(Clone)]
pub struct ModuleRegistry {
    pub(crate) inner: Arc<RegistryInner>,
}

impl core::fmt::Debug for ModuleRegistry {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("ModuleRegistry")
            .field("modules", &self.inner.entries.lock().len())
            .finish_non_exhaustive()
    }
}

impl ModuleRegistry {
    pub fn new(config: LoaderConfig, source: Arc<dyn ByteSource>) -> Self {
        let engine = build_engine(&config);
        ModuleRegistry {
            inner: Arc::new(RegistryInner {
                entries: Mutex::new(HashMap::new()),
                source,
                validator: Validator::new(engine.clone(), config.supported_versions.clone()),
                resolver: ImportResolver::new(config.effective_features()),
                instantiator: Instantiator::new(engine, &config),
                config,
                health: Mutex::new(None),
            }),
        }
    }

    pub fn config(&self) -> &LoaderConfig {
        &self.inner.config
    }

    /// Load `name` from `location` under the configured timeout.
    pub async fn load(&self, name: &str, location: &str) -> ModuleState {
        self.load_with_timeout(name, location, self.inner.config.load_timeout())
            .await
    }

    /// Load `name` from `location`.
    ///
    /// Ready and Failed entries are returned as they are; a different
    /// `location` does not trigger a reload. If a load is already in flight
    /// this waits for it and `timeout` is ignored. Dropping the returned
    /// future does not cancel the load.
    ///
    /// Loads of one name never overlap. If the attempt being waited on is
    /// invalidated, the caller waits for it to wind down and then joins or
    /// starts the next attempt, so the returned state is always Ready,
    /// Failed, or Unloaded if the load task itself died.
    pub async fn load_with_timeout(
        &self,
        name: &str,
        location: &str,
        timeout: Duration,
    ) -> ModuleState {
        loop {
            match self.begin(name, location, timeout) {
                Step::Settled(state) => return state,
                Step::Attempt { generation, mut done } => {
                    let finished = done.wait_for(|flag| *flag).await.is_ok();
                    let mut entries = self.inner.entries.lock();
                    let Some(entry) = entries.get_mut(name) else {
                        return ModuleState::unloaded(name);
                    };
                    if entry.state.generation != generation {
                        log::debug!("[registry] {} attempt {} went stale, retrying", name, generation);
                        continue;
                    }
                    if !finished {
                        // The load task died before writing an outcome.
                        log::error!("[registry] {} load task ended without an outcome", name);
                        entry.inflight = None;
                        entry.state.status = ModuleStatus::Unloaded;
                    }
                    return entry.state.clone();
                }
                Step::Retired { generation, mut done } => {
                    log::debug!("[registry] {} waiting for invalidated attempt {}", name, generation);
                    if done.wait_for(|flag| *flag).await.is_err() {
                        let mut entries = self.inner.entries.lock();
                        if let Some(entry) = entries.get_mut(name) {
                            if entry.retired.as_ref().is_some_and(|(g, _)| *g == generation) {
                                entry.retired = None;
                            }
                        }
                    }
                }
            }
        }
    }

    /// Return a settled state, or the attempt to wait on, starting one if
    /// the name is idle.
    fn begin(&self, name: &str, location: &str, timeout: Duration) -> Step {
        let mut entries = self.inner.entries.lock();
        let entry = entries
            .entry(String::from(name))
            .or_insert_with(|| Entry::new(name));

        match (entry.state.status, entry.inflight.clone(), entry.retired.clone()) {
            (ModuleStatus::Ready | ModuleStatus::Failed, _, _) => {
                log::trace!("[registry] {} cache hit ({:?})", name, entry.state.status);
                Step::Settled(entry.state.clone())
            }
            (ModuleStatus::Loading, Some(done), _) => {
                log::debug!("[registry] {} joining in-flight load", name);
                Step::Attempt {
                    generation: entry.state.generation,
                    done,
                }
            }
            (_, _, Some((generation, done))) => Step::Retired { generation, done },
            _ => {
                let generation = entry.state.generation + 1;
                let attempt = entry.diagnostics.begin_attempt();
                entry.state = ModuleState {
                    status: ModuleStatus::Loading,
                    source_location: Some(String::from(location)),
                    load_started_at: Some(Utc::now()),
                    generation,
                    ..ModuleState::unloaded(name)
                };

                let (tx, done) = watch::channel(false);
                entry.inflight = Some(done.clone());

                log::info!(
                    "[registry] {} loading from {} (attempt {})",
                    name,
                    location,
                    attempt
                );
                tokio::spawn(run_load(
                    self.inner.clone(),
                    LoadTicket {
                        name: String::from(name),
                        location: String::from(location),
                        generation,
                        attempt,
                        timeout,
                    },
                    tx,
                ));
                Step::Attempt { generation, done }
            }
        }
    }

    /// Current state of `name`, if it was ever loaded.
    pub fn get(&self, name: &str) -> Option<ModuleState> {
        self.inner
            .entries
            .lock()
            .get(name)
            .map(|entry| entry.state.clone())
    }

    /// Live instance of `name` when Ready.
    pub fn instance(&self, name: &str) -> Option<Arc<ModuleInstance>> {
        self.inner
            .entries
            .lock()
            .get(name)
            .filter(|entry| entry.state.is_ready())
            .and_then(|entry| entry.state.instance.clone())
    }

    /// Reset `name` to Unloaded and drop its instance. A load still in
    /// flight is discarded when it completes, and the next load of `name`
    /// starts only after that.
    ///
    /// Returns `false` if there was nothing to reset.
    pub fn invalidate(&self, name: &str) -> bool {
        let mut entries = self.inner.entries.lock();
        let Some(entry) = entries.get_mut(name) else {
            return false;
        };
        if entry.state.status == ModuleStatus::Unloaded {
            return false;
        }

        if let Some(done) = entry.inflight.take() {
            entry.retired = Some((entry.state.generation, done));
        }
        let generation = entry.state.generation + 1;
        let source_location = entry.state.source_location.take();
        entry.state = ModuleState {
            source_location,
            generation,
            ..ModuleState::unloaded(name)
        };
        log::info!("[registry] {} invalidated (generation {})", name, generation);
        true
    }

    /// Names of Ready modules, sorted.
    pub fn list_loaded(&self) -> Vec<String> {
        let mut names: Vec<String> = self
            .inner
            .entries
            .lock()
            .values()
            .filter(|entry| entry.state.is_ready())
            .map(|entry| entry.state.name.clone())
            .collect();
        names.sort();
        names
    }

    /// Snapshots of every known entry, sorted by name.
    pub fn states(&self) -> Vec<ModuleState> {
        let mut states: Vec<ModuleState> = self
            .inner
            .entries
            .lock()
            .values()
            .map(|entry| entry.state.clone())
            .collect();
        states.sort_by(|a, b| a.name.cmp(&b.name));
        states
    }

    pub fn diagnostics(&self, name: &str) -> Option<LoadDiagnostics> {
        self.inner
            .entries
            .lock()
            .get(name)
            .map(|entry| entry.diagnostics.clone())
    }

    pub fn availability(&self) -> Availability {
        let entries = self.inner.entries.lock();
        let known = entries
            .values()
            .filter(|e| e.state.status != ModuleStatus::Unloaded);
        let (mut ready, mut other) = (0usize, 0usize);
        for entry in known {
            if entry.state.is_ready() {
                ready += 1;
            } else {
                other += 1;
            }
        }
        match (ready, other) {
            (0, _) => Availability::Unavailable,
            (_, 0) => Availability::Full,
            _ => Availability::Degraded,
        }
    }
}

struct LoadTicket {
    name: String,
    location: String,
    generation: u64,
    attempt: u64,
    timeout: Duration,
}

async fn run_load(
    inner: Arc<RegistryInner>,
    ticket: LoadTicket,
    done: watch::Sender<bool>,
) {
    let started_at = Utc::now();
    let clock = Instant::now();
    let fetched = Mutex::new(None);

    let result = match tokio::time::timeout(
        ticket.timeout,
        inner.pipeline(&ticket.name, &ticket.location, &fetched),
    )
    .await
    {
        Ok(result) => result,
        Err(_) => Err(LoadError::LoadTimeout {
            after_ms: ticket.timeout.as_millis() as u64,
        }),
    };

    let meta = fetched.lock().clone();
    let record = LoadRecord {
        attempt: ticket.attempt,
        source_location: ticket.location.clone(),
        byte_size: meta.as_ref().map(|(size, _)| *size),
        content_hash: meta.map(|(_, hash)| hash),
        started_at,
        completed_at: Utc::now(),
        duration_ms: clock.elapsed().as_millis() as u64,
        outcome: match &result {
            Ok(Instantiated {
                warning: Some(warning),
                ..
            }) => LoadOutcome::ReadyWithWarning {
                warning: warning.clone(),
            },
            Ok(_) => LoadOutcome::Ready,
            Err(e) => LoadOutcome::failed(e),
        },
    };

    inner.complete(&ticket, record, result);
    // Nobody waiting is fine.
    let _ = done.send(true);
}

impl RegistryInner {
    async fn pipeline(
        &self,
        name: &str,
        location: &str,
        fetched_meta: &Mutex<Option<(usize, String)>>,
    ) -> Result<Instantiated, LoadError> {
        let fetched = self.source.fetch(location).await?;
        *fetched_meta.lock() = Some((fetched.bytes.len(), content_hash(&fetched.bytes)));

        let validated = self.validator.validate(
            name,
            location,
            &fetched.bytes,
            fetched.content_type.as_deref(),
        )?;
        let table = self.resolver.resolve(&validated.descriptor)?;
        Ok(self.instantiator.instantiate(validated, &table)?)
    }

    fn complete(
        &self,
        ticket: &LoadTicket,
        record: LoadRecord,
        result: Result<Instantiated, LoadError>,
    ) {
        let completed_at = record.completed_at;
        let duration_ms = record.duration_ms;

        let mut entries = self.entries.lock();
        let entry = entries
            .entry(ticket.name.clone())
            .or_insert_with(|| Entry::new(&ticket.name));
        entry
            .diagnostics
            .record(record, self.config.diagnostics_history);

        if entry.state.generation != ticket.generation {
            log::info!(
                "[registry] {} discarding stale load (generation {}, now {})",
                ticket.name,
                ticket.generation,
                entry.state.generation
            );
            if entry.retired.as_ref().is_some_and(|(g, _)| *g == ticket.generation) {
                entry.retired = None;
            }
            return;
        }

        entry.inflight = None;
        entry.state.load_completed_at = Some(completed_at);
        match result {
            Ok(Instantiated { instance, warning }) => {
                entry.state.status = ModuleStatus::Ready;
                entry.state.descriptor = Some(instance.descriptor().clone());
                entry.state.instance = Some(Arc::new(instance));
                if let Some(w) = &warning {
                    log::warn!("[registry] {} ready with warning: {}", ticket.name, w);
                } else {
                    log::info!("[registry] {} ready in {} ms", ticket.name, duration_ms);
                }
                entry.state.warning = warning;
            }
            Err(e) => {
                log::warn!(
                    "[registry] {} failed at {:?} ({}): {}",
                    ticket.name,
                    e.stage(),
                    e.tag(),
                    e
                );
                entry.state.status = ModuleStatus::Failed;
                entry.state.last_error = Some(e);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use async_trait::async_trait;

    use super::*;
    use crate::error::{FetchError, LoadStage, ValidationError};
    use crate::fixtures::{self, ModuleBuilder};
    use crate::module::ValueType::I32;
    use crate::source::{Fetched, MemorySource};

    const ENGINE: &str = "/wasm/reasoning_engine.wasm";

    fn setup() -> (ModuleRegistry, Arc<MemorySource>) {
        let source = Arc::new(MemorySource::new());
        source.insert(ENGINE, fixtures::reasoning_engine());
        let registry = ModuleRegistry::new(LoaderConfig::default(), source.clone());
        (registry, source)
    }

    #[tokio::test]
    async fn test_load_then_cache_hit() {
        let (registry, source) = setup();
        let state = registry.load("reasoning_engine", ENGINE).await;
        assert_eq!(state.status, ModuleStatus::Ready);
        assert!(state.instance.is_some());
        assert!(state.load_completed_at.is_some());

        let again = registry.load("reasoning_engine", ENGINE).await;
        assert_eq!(again.generation, state.generation);
        assert_eq!(source.fetch_count(ENGINE), 1);
        assert_eq!(registry.list_loaded(), vec!["reasoning_engine"]);
    }

    #[tokio::test]
    async fn test_concurrent_loads_fetch_once() {
        let (registry, source) = setup();
        source.set_delay(ENGINE, Duration::from_millis(30));

        let loads = (0..8).map(|_| registry.load("reasoning_engine", ENGINE));
        let states = futures_util::future::join_all(loads).await;

        assert_eq!(source.fetch_count(ENGINE), 1);
        assert!(states.iter().all(|s| s.status == ModuleStatus::Ready));
        let first = states[0].instance.as_ref().unwrap();
        assert!(states
            .iter()
            .all(|s| Arc::ptr_eq(s.instance.as_ref().unwrap(), first)));
    }

    #[tokio::test]
    async fn test_failed_is_cached_until_invalidate() {
        let (registry, source) = setup();
        source.insert("/wasm/broken.wasm", vec![0x00, 0x61]);

        let state = registry.load("broken", "/wasm/broken.wasm").await;
        assert_eq!(state.status, ModuleStatus::Failed);
        assert_eq!(
            state.last_error,
            Some(LoadError::Validation(ValidationError::TooSmall { len: 2 }))
        );

        registry.load("broken", "/wasm/broken.wasm").await;
        assert_eq!(source.fetch_count("/wasm/broken.wasm"), 1);

        assert!(registry.invalidate("broken"));
        assert_eq!(registry.get("broken").unwrap().status, ModuleStatus::Unloaded);
        source.insert("/wasm/broken.wasm", fixtures::string_module());
        let state = registry.load("broken", "/wasm/broken.wasm").await;
        assert_eq!(state.status, ModuleStatus::Ready);
        assert_eq!(source.fetch_count("/wasm/broken.wasm"), 2);

        let diag = registry.diagnostics("broken").unwrap();
        assert_eq!(diag.attempts, 2);
        match &diag.history[0].outcome {
            LoadOutcome::Failed { stage, tag, .. } => {
                assert_eq!(*stage, LoadStage::Validator);
                assert_eq!(tag, "TooSmall");
            }
            other => panic!("unexpected {other:?}"),
        }
        assert_eq!(diag.last().unwrap().outcome, LoadOutcome::Ready);
    }

    #[tokio::test]
    async fn test_hung_fetch_times_out() {
        let (registry, source) = setup();
        source.set_hang(ENGINE, true);

        let state = registry
            .load_with_timeout("reasoning_engine", ENGINE, Duration::from_millis(50))
            .await;
        assert_eq!(state.status, ModuleStatus::Failed);
        assert_eq!(state.last_error, Some(LoadError::LoadTimeout { after_ms: 50 }));
        assert_eq!(
            registry.get("reasoning_engine").unwrap().status,
            ModuleStatus::Failed
        );

        source.set_hang(ENGINE, false);
        assert!(registry.invalidate("reasoning_engine"));
        let state = registry.load("reasoning_engine", ENGINE).await;
        assert_eq!(state.status, ModuleStatus::Ready);
    }

    #[tokio::test]
    async fn test_load_settles_within_bound() {
        let (registry, _source) = setup();
        let bound = Duration::from_secs(2);

        let state = tokio::time::timeout(bound, registry.load("reasoning_engine", ENGINE))
            .await
            .expect("load hung");
        assert_eq!(state.status, ModuleStatus::Ready);
        let record = registry.diagnostics("reasoning_engine").unwrap().last().cloned().unwrap();
        assert_eq!(record.byte_size, Some(fixtures::reasoning_engine().len()));
        assert_eq!(record.content_hash, Some(content_hash(&fixtures::reasoning_engine())));

        let state = tokio::time::timeout(bound, registry.load("missing", "/wasm/missing.wasm"))
            .await
            .expect("failing load hung");
        assert_eq!(state.status, ModuleStatus::Failed);
        let record = registry.diagnostics("missing").unwrap().last().cloned().unwrap();
        assert_eq!(record.byte_size, None);
        assert_eq!(record.content_hash, None);
    }

    #[tokio::test]
    async fn test_invalidate_discards_in_flight_load() {
        let (registry, source) = setup();
        source.set_delay(ENGINE, Duration::from_millis(80));

        let pending = {
            let registry = registry.clone();
            tokio::spawn(async move { registry.load("reasoning_engine", ENGINE).await })
        };
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert_eq!(
            registry.get("reasoning_engine").unwrap().status,
            ModuleStatus::Loading
        );
        assert!(registry.invalidate("reasoning_engine"));
        let current = registry.get("reasoning_engine").unwrap();
        assert_eq!(current.status, ModuleStatus::Unloaded);
        assert!(current.instance.is_none());
        assert!(registry.list_loaded().is_empty());

        // The caller whose attempt was discarded gets the next attempt's outcome.
        let seen = pending.await.unwrap();
        assert_eq!(seen.status, ModuleStatus::Ready);
        assert_eq!(seen.generation, 3);
        assert_eq!(source.fetch_count(ENGINE), 2);

        let diag = registry.diagnostics("reasoning_engine").unwrap();
        assert_eq!(diag.attempts, 2);
        assert_eq!(diag.history.len(), 2);
    }

    /// Counts fetches that are running at the same time.
    struct OverlapSource {
        inner: MemorySource,
        running: AtomicUsize,
        peak: AtomicUsize,
    }

    #[async_trait]
    impl ByteSource for OverlapSource {
        async fn fetch(&self, location: &str) -> Result<Fetched, FetchError> {
            let now = self.running.fetch_add(1, Ordering::SeqCst) + 1;
            self.peak.fetch_max(now, Ordering::SeqCst);
            let result = self.inner.fetch(location).await;
            self.running.fetch_sub(1, Ordering::SeqCst);
            result
        }
    }

    #[tokio::test]
    async fn test_loads_never_overlap_across_invalidate() {
        let inner = MemorySource::new();
        inner.insert(ENGINE, fixtures::reasoning_engine());
        inner.set_delay(ENGINE, Duration::from_millis(80));
        let source = Arc::new(OverlapSource {
            inner,
            running: AtomicUsize::new(0),
            peak: AtomicUsize::new(0),
        });
        let registry = ModuleRegistry::new(LoaderConfig::default(), source.clone());

        let first = {
            let registry = registry.clone();
            tokio::spawn(async move { registry.load("reasoning_engine", ENGINE).await })
        };
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert!(registry.invalidate("reasoning_engine"));
        let second = registry.load("reasoning_engine", ENGINE).await;
        let first = first.await.unwrap();

        assert_eq!(source.peak.load(Ordering::SeqCst), 1);
        assert_eq!(first.status, ModuleStatus::Ready);
        assert_eq!(second.status, ModuleStatus::Ready);
        assert!(Arc::ptr_eq(
            first.instance.as_ref().unwrap(),
            second.instance.as_ref().unwrap()
        ));
        assert_eq!(source.inner.fetch_count(ENGINE), 2);
    }

    #[tokio::test]
    async fn test_dropped_caller_does_not_cancel_load() {
        let (registry, source) = setup();
        source.set_delay(ENGINE, Duration::from_millis(30));

        let caller = {
            let registry = registry.clone();
            tokio::spawn(async move { registry.load("reasoning_engine", ENGINE).await })
        };
        tokio::time::sleep(Duration::from_millis(5)).await;
        caller.abort();

        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(
            registry.get("reasoning_engine").unwrap().status,
            ModuleStatus::Ready
        );
    }

    #[tokio::test]
    async fn test_unknown_import_fails_at_resolver() {
        let (registry, source) = setup();
        let bytes = ModuleBuilder::new()
            .import_func("env", "gpu_submit", &[I32], &[])
            .build();
        source.insert("/wasm/gpu.wasm", bytes);

        let state = registry.load("gpu", "/wasm/gpu.wasm").await;
        let err = state.last_error.unwrap();
        assert_eq!(err.stage(), LoadStage::Resolver);
        assert!(err.to_string().contains("env::gpu_submit"), "{err}");
    }

    #[tokio::test]
    async fn test_availability() {
        let (registry, source) = setup();
        assert_eq!(registry.availability(), Availability::Unavailable);
        assert!(registry.get("reasoning_engine").is_none());
        assert!(!registry.invalidate("reasoning_engine"));

        registry.load("reasoning_engine", ENGINE).await;
        assert_eq!(registry.availability(), Availability::Full);

        source.insert("/wasm/html.wasm", b"<!DOCTYPE html><html></html>".to_vec());
        registry.load("neuromorphic_processor", "/wasm/html.wasm").await;
        assert_eq!(registry.availability(), Availability::Degraded);
        assert_eq!(
            registry.states().iter().map(|s| s.status).collect::<Vec<_>>(),
            vec![ModuleStatus::Failed, ModuleStatus::Ready]
        );
    }

    #[tokio::test]
    async fn test_initialize_warning_surfaces_in_state() {
        let (registry, source) = setup();
        let bytes = ModuleBuilder::new()
            .func("initialize", &[], &[], &[0x00])
            .build();
        source.insert("/wasm/warn.wasm", bytes);

        let state = registry.load("warn", "/wasm/warn.wasm").await;
        assert_eq!(state.status, ModuleStatus::Ready);
        assert!(state.warning.is_some());
        assert!(matches!(
            registry.diagnostics("warn").unwrap().last().unwrap().outcome,
            LoadOutcome::ReadyWithWarning { .. }
        ));
    }
}
