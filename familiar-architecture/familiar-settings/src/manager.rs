//! `SettingsManager`: the single entry point. Runs source sync, control
//! convergence, owner rediscovery, and schema refresh behind one re-entrant
//! lock, then serves typed reads through the query engine.
//!
//! Grounded on `original_source/.../manager.py`. The global-singleton
//! pattern is ported from the teacher's `familiar-config::GlobalConfig::get()`
//! (`OnceLock`), per SPEC_FULL.md §4.10 "Global access".

use std::any::TypeId;
use std::cell::RefCell;
use std::collections::hash_map::DefaultHasher;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::hash::{Hash, Hasher};
use std::path::PathBuf;
use std::sync::{Arc, OnceLock};

use parking_lot::ReentrantMutex;
use serde_json::Value;
use tracing::{debug, info, warn};

use crate::control::{read_control_model, ControlModel, ReloadMode, DEFAULT_ENV_PREFIX};
use crate::convergence::{converge, ConvergingSource};
use crate::error::{Miss, SettingsError};
use crate::path::CONTROL_ROOT;
use crate::projection::{materialize_control_snapshot, materialize_effective_snapshot};
use crate::query::{evaluate_request, ResolveApi, ResolveRequest, ResolveTarget};
use crate::registry::{OwnerDiscovery, SchemaRegistry, SectionKind, SectionModel};
use crate::schema::{build_schema, BuiltSchema};
use crate::source::{dotenv, env, file};
use crate::source_sync::{SourceSyncCoordinator, SyncMode};
use crate::store::{LwwStore, SourceName};

/// The mapping marker used by the query engine's type-target resolution: a
/// `resolve::<BTreeMap<String, Value>>()` stands for "any map section".
static MAPPING_MARKER: OnceLock<TypeId> = OnceLock::new();

fn mapping_marker() -> TypeId {
    *MAPPING_MARKER.get_or_init(TypeId::of::<BTreeMap<String, Value>>)
}

/// The resolved, frozen settings source: where the file lives, which env
/// prefix and case policy are active, and the reload policy.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SettingsSource {
    pub settings_path: PathBuf,
    pub env_prefix: String,
    pub case_sensitive: bool,
    pub reload_mode: ReloadMode,
}

impl ConvergingSource for SettingsSource {
    fn settings_path(&self) -> &PathBuf {
        &self.settings_path
    }
    fn with_settings_path(&self, path: PathBuf) -> Self {
        SettingsSource { settings_path: path, ..self.clone() }
    }
}

fn normalize_override_path(raw: Option<&str>) -> Option<PathBuf> {
    let text = raw?.trim();
    if text.is_empty() {
        None
    } else {
        Some(PathBuf::from(text))
    }
}

fn resolve_settings_path_from_control(
    explicit: Option<&PathBuf>,
    control_path: Option<&str>,
    control_base_dir: Option<&str>,
    fallback: Option<&PathBuf>,
) -> PathBuf {
    if let Some(path) = explicit {
        return path.clone();
    }
    if let Some(path) = normalize_override_path(control_path) {
        return path;
    }
    if let Some(base_dir) = normalize_override_path(control_base_dir) {
        return base_dir.join("settings.yaml");
    }
    if let Some(path) = fallback {
        return path.clone();
    }
    std::env::current_dir().unwrap_or_else(|_| PathBuf::from(".")).join("settings.yaml")
}

fn resolve_env_prefix(candidate: Option<&str>) -> Result<String, SettingsError> {
    let prefix = candidate.unwrap_or(DEFAULT_ENV_PREFIX).to_string();
    let reserved_upper = CONTROL_ROOT.to_uppercase();
    if prefix.to_uppercase().trim_end_matches('_') == reserved_upper {
        return Err(SettingsError::configuration(format!(
            "env_prefix '{prefix}' collides with the reserved control prefix"
        )));
    }
    Ok(prefix)
}

fn build_settings_source_from_control(
    control: &ControlModel,
    explicit_settings_path: Option<&PathBuf>,
    explicit_env_prefix: Option<&str>,
    fallback_settings_path: Option<&PathBuf>,
) -> Result<SettingsSource, SettingsError> {
    let resolved_path = resolve_settings_path_from_control(
        explicit_settings_path,
        control.settings_path.as_deref(),
        control.base_dir.as_deref(),
        fallback_settings_path,
    );
    let resolved_env_prefix = resolve_env_prefix(explicit_env_prefix.or(Some(control.env_prefix.as_str())))?;
    Ok(SettingsSource {
        settings_path: resolved_path,
        env_prefix: resolved_env_prefix,
        case_sensitive: control.case_sensitive,
        reload_mode: control.reload_mode,
    })
}

/// Control snapshot from the process environment alone, used before a
/// settings_path is known (there is nowhere yet to look for a `.env` or a
/// structured file).
fn bootstrap_control_snapshot() -> Value {
    let mut store = LwwStore::new();
    let (env_raw, _) = env::load_env_raw();
    let mut sources = BTreeMap::new();
    sources.insert(SourceName::Env, env_raw);
    store.reset(sources);
    materialize_control_snapshot(&store.entries())
}

struct OwnerRecord {
    owner: Arc<dyn OwnerDiscovery + Send + Sync>,
    generation: u64,
}

struct Inner {
    source: Option<SettingsSource>,
    store: LwwStore,
    source_sync: SourceSyncCoordinator,
    registry: SchemaRegistry,
    schema: Option<BuiltSchema>,
    schema_registry_version: u64,
    snapshot_store_version: Option<u64>,
    settings: Option<Arc<Value>>,
    owners: BTreeMap<String, OwnerRecord>,
    missing_cache: HashMap<String, (u64, u64)>,
    validation_fallback_warned: HashSet<String>,
}

impl Inner {
    fn new() -> Self {
        Self {
            source: None,
            store: LwwStore::new(),
            source_sync: SourceSyncCoordinator::new(),
            registry: SchemaRegistry::new(),
            schema: None,
            schema_registry_version: 0,
            snapshot_store_version: None,
            settings: None,
            owners: BTreeMap::new(),
            missing_cache: HashMap::new(),
            validation_fallback_warned: HashSet::new(),
        }
    }
}

/// The process-wide dynamic settings runtime.
pub struct SettingsManager {
    inner: ReentrantMutex<RefCell<Inner>>,
}

static GLOBAL: OnceLock<SettingsManager> = OnceLock::new();

impl SettingsManager {
    /// A fresh, unshared manager — used by tests that want isolation from
    /// the process-wide singleton.
    pub fn new() -> Self {
        Self { inner: ReentrantMutex::new(RefCell::new(Inner::new())) }
    }

    /// The process-wide singleton.
    pub fn global() -> &'static SettingsManager {
        GLOBAL.get_or_init(SettingsManager::new)
    }

    /// Explicit initialization. Fails if already initialized with a
    /// different resolved source (the source is a process-global
    /// singleton concept even on a per-manager instance).
    pub fn init(&self, settings_path: Option<String>, env_prefix: Option<String>) -> Result<Arc<Value>, SettingsError> {
        let explicit_path = settings_path.as_deref().and_then(normalize_override_path);
        let control = read_control_model(&bootstrap_control_snapshot());
        let source =
            build_settings_source_from_control(&control, explicit_path.as_ref(), env_prefix.as_deref(), None)?;

        let guard = self.inner.lock();
        let mut state = guard.borrow_mut();
        if let Some(existing) = &state.source {
            if *existing != source {
                return Err(SettingsError::configuration(format!(
                    "settings source is already initialized with a different source (current={existing:?}, requested={source:?})"
                )));
            }
        }
        self.install_source_readers(&mut state, &source);
        state.source = Some(source);
        self.prepare_runtime_locked(&mut state, "init", false, SyncMode::Full, true, false)?;
        self.active_settings(&state)
    }

    /// `get`: implicitly initializes from the environment if nothing has
    /// run yet.
    pub fn get(&self) -> Result<Arc<Value>, SettingsError> {
        let guard = self.inner.lock();
        let mut state = guard.borrow_mut();
        self.ensure_source_locked(&mut state, true)?;
        self.prepare_runtime_locked(&mut state, "get", true, SyncMode::Auto, false, true)?;
        self.active_settings(&state)
    }

    /// Force re-read of every source and rebuild the typed root.
    pub fn reload(&self, reason: &str) -> Result<Arc<Value>, SettingsError> {
        let guard = self.inner.lock();
        let mut state = guard.borrow_mut();
        self.ensure_source_locked(&mut state, true)?;
        self.prepare_runtime_locked(&mut state, "reload", false, SyncMode::Reload, true, false)?;
        let settings = self.active_settings(&state)?;
        info!(reason, "settings reloaded");
        Ok(settings)
    }

    /// Declare an owner's sections. Invoked once at start-up per owner, and
    /// again whenever the owner's generation advances (the caller is
    /// expected to call this again after a hot-reload of its own code).
    pub fn declare_section(&self, owner: Arc<dyn OwnerDiscovery + Send + Sync>) -> Result<(), SettingsError> {
        let guard = self.inner.lock();
        let mut state = guard.borrow_mut();
        let key = owner.owner_key().to_string();
        let generation = owner.generation();
        owner.declare(&mut state.registry)?;
        state.owners.insert(key, OwnerRecord { owner, generation });
        Ok(())
    }

    /// Register or override read/sync policy for one of the three sources.
    pub fn register_source_sync(&self, source: SourceName, sync_on_reload: Option<bool>, sync_on_path_switch: Option<bool>) {
        let guard = self.inner.lock();
        let mut state = guard.borrow_mut();
        state.source_sync.set_policy(source, sync_on_reload, sync_on_path_switch);
    }

    pub fn resolve_settings(&self, target: ResolveTarget, field: Option<String>, default: Option<Value>) -> Result<Value, SettingsError> {
        self.resolve_value(target, field, default, ResolveApi::Value)
    }

    pub fn resolve_settings_map(&self, target: ResolveTarget, default: Option<Value>) -> Result<Value, SettingsError> {
        if let Some(default_value) = &default {
            if !default_value.is_object() {
                return Err(SettingsError::resolve("map", "default value for a settings map must itself be a mapping"));
            }
        }
        self.resolve_value(target, None, default, ResolveApi::Map)
    }

    pub(crate) fn resolve_value(
        &self,
        target: ResolveTarget,
        field: Option<String>,
        default: Option<Value>,
        api: ResolveApi,
    ) -> Result<Value, SettingsError> {
        let request = ResolveRequest { api, target, field };
        let guard = self.inner.lock();
        let mut state = guard.borrow_mut();

        let first = self.attempt_resolve_locked(&mut state, &request, true);
        match first {
            Ok(value) => return Ok(value),
            Err(miss_or_validation) => {
                let cache_key = request.cache_key();
                if !self.should_skip_rediscovery_locked(&state, &cache_key) {
                    self.rediscover_delta_locked(&mut state);
                    if let Ok(value) = self.attempt_resolve_locked(&mut state, &request, false) {
                        state.missing_cache.remove(&cache_key);
                        return Ok(value);
                    }
                    self.mark_missing_cache_locked(&mut state, &cache_key);
                }
                self.finalize_resolve_failure(&mut state, &request, &cache_key, default, miss_or_validation)
            }
        }
    }

    fn finalize_resolve_failure(
        &self,
        state: &mut Inner,
        request: &ResolveRequest,
        cache_key: &str,
        default: Option<Value>,
        error: SettingsError,
    ) -> Result<Value, SettingsError> {
        if let Some(default_value) = default {
            if matches!(error, SettingsError::Validation { .. }) {
                self.warn_validation_fallback_once(state, request, cache_key, &error);
            }
            return Ok(default_value);
        }
        Err(error)
    }

    fn warn_validation_fallback_once(&self, state: &mut Inner, request: &ResolveRequest, cache_key: &str, error: &SettingsError) {
        let path_text = state.source.as_ref().map(|s| s.settings_path.display().to_string()).unwrap_or_default();
        let warning_key = format!("{path_text}|{cache_key}|{error}");
        if state.validation_fallback_warned.contains(&warning_key) {
            return;
        }
        state.validation_fallback_warned.insert(warning_key);
        warn!(resolve_target = %cache_key, field = ?request.field, %error, "settings validation failed; falling back to default");
    }

    fn attempt_resolve_locked(&self, state: &mut Inner, request: &ResolveRequest, rediscover_modules: bool) -> Result<Value, SettingsError> {
        self.ensure_source_locked(state, true)?;
        self.prepare_runtime_locked(state, "resolve", true, SyncMode::Auto, false, rediscover_modules)?;

        let settings = state.settings.clone().ok_or_else(|| SettingsError::resolve("settings", "settings are not initialized"))?;
        let source = state.source.clone().expect("source resolved by ensure_source_locked");
        let sections = state.registry.sections();

        evaluate_request(request, &settings, &sections, source.case_sensitive, mapping_marker())
            .map_err(|miss: Miss| SettingsError::resolve(request.cache_key(), miss.0))
    }

    fn should_skip_rediscovery_locked(&self, state: &Inner, cache_key: &str) -> bool {
        match state.missing_cache.get(cache_key) {
            None => false,
            Some(marker) => *marker == (state.registry.version(), self.owner_fingerprint(state)),
        }
    }

    fn mark_missing_cache_locked(&self, state: &mut Inner, cache_key: &str) {
        let fingerprint = (state.registry.version(), self.owner_fingerprint(state));
        state.missing_cache.insert(cache_key.to_string(), fingerprint);
    }

    fn owner_fingerprint(&self, state: &Inner) -> u64 {
        let mut hasher = DefaultHasher::new();
        for (key, record) in &state.owners {
            key.hash(&mut hasher);
            record.generation.hash(&mut hasher);
        }
        hasher.finish()
    }

    fn rediscover_delta_locked(&self, state: &mut Inner) -> bool {
        let mut changed = false;
        let owners: Vec<(String, Arc<dyn OwnerDiscovery + Send + Sync>, u64)> =
            state.owners.iter().map(|(k, r)| (k.clone(), r.owner.clone(), r.owner.generation())).collect();

        for (key, owner, current_generation) in owners {
            let stored_generation = state.owners.get(&key).map(|r| r.generation);
            if stored_generation == Some(current_generation) {
                continue;
            }
            debug!(owner_key = %key, generation = current_generation, "rediscovering settings owner");
            state.registry.unregister_owner(&key, stored_generation);
            if let Err(err) = owner.declare(&mut state.registry) {
                warn!(owner_key = %key, %err, "owner rediscovery failed to redeclare sections");
                continue;
            }
            state.owners.insert(key, OwnerRecord { owner, generation: current_generation });
            changed = true;
        }

        if changed {
            state.missing_cache.clear();
        }
        changed
    }

    fn ensure_source_locked(&self, state: &mut Inner, implicit: bool) -> Result<(), SettingsError> {
        if state.source.is_some() {
            return Ok(());
        }
        if !implicit {
            return Err(SettingsError::configuration("settings are not initialized"));
        }
        let control = read_control_model(&bootstrap_control_snapshot());
        let source = build_settings_source_from_control(&control, None, None, None)?;
        self.install_source_readers(state, &source);
        state.source = Some(source.clone());
        info!(path = %source.settings_path.display(), "settings initialized implicitly");
        Ok(())
    }

    fn install_source_readers(&self, state: &mut Inner, source: &SettingsSource) {
        let file_path = source.settings_path.clone();
        state.source_sync.register(
            SourceName::File,
            Box::new(move || file::load_structured_file(&file_path)),
            Some(true),
            Some(true),
        );

        let dotenv_dir = source.settings_path.parent().map(|p| p.to_path_buf()).unwrap_or_else(|| PathBuf::from("."));
        state.source_sync.register(
            SourceName::Dotenv,
            Box::new(move || dotenv::load_dotenv_raw(&dotenv_dir)),
            Some(false),
            Some(false),
        );

        state.source_sync.register(SourceName::Env, Box::new(|| Ok(env::load_env_raw())), Some(false), Some(false));
    }

    fn prepare_runtime_locked(
        &self,
        state: &mut Inner,
        reason: &str,
        _implicit_init: bool,
        sync_mode: SyncMode,
        force_refresh: bool,
        rediscover_modules: bool,
    ) -> Result<(), SettingsError> {
        let reload_mode = state.source.as_ref().map(|s| s.reload_mode).unwrap_or_default();
        let store_is_empty = state.snapshot_store_version.is_none();
        let source_force_refresh = state.source_sync.sync_for_mode(sync_mode, reload_mode, &mut state.store, store_is_empty)?;

        let needs_convergence = force_refresh || source_force_refresh || state.settings.is_none();
        let controls_changed = if needs_convergence { self.converge_controls_locked(state)? } else { false };

        let module_changed = if rediscover_modules { self.rediscover_delta_locked(state) } else { false };

        self.refresh_runtime_locked(state, reason, force_refresh || source_force_refresh || controls_changed || module_changed)
    }

    fn converge_controls_locked(&self, state: &mut Inner) -> Result<bool, SettingsError> {
        let source = state.source.clone().expect("source resolved before convergence");

        // Interior mutability lets the three convergence closures share
        // `store`/`source_sync` without overlapping `&mut` borrows, since
        // `converge` holds all three alive at once even though only one
        // runs at a time.
        let store_cell = RefCell::new(std::mem::take(&mut state.store));
        let sync_cell = RefCell::new(std::mem::take(&mut state.source_sync));
        let convergence_error: RefCell<Option<SettingsError>> = RefCell::new(None);

        let materialize = || materialize_control_snapshot(&store_cell.borrow().entries());
        let build_source = |snapshot: &Value, current: &SettingsSource| -> SettingsSource {
            let control = read_control_model(snapshot);
            match build_settings_source_from_control(&control, None, None, Some(&current.settings_path)) {
                Ok(next) => next,
                Err(err) => {
                    *convergence_error.borrow_mut() = Some(err);
                    current.clone()
                }
            }
        };
        let on_path_switch = |_next: &SettingsSource| {
            if let Err(err) = sync_cell.borrow_mut().sync_path_switch(&mut store_cell.borrow_mut()) {
                *convergence_error.borrow_mut() = Some(err);
            }
        };

        let (converged_source, changed) = converge(source, materialize, build_source, on_path_switch);

        state.store = store_cell.into_inner();
        state.source_sync = sync_cell.into_inner();

        if let Some(err) = convergence_error.into_inner() {
            return Err(err);
        }
        if changed {
            self.install_source_readers(state, &converged_source);
        }
        state.source = Some(converged_source);
        Ok(changed)
    }

    fn refresh_runtime_locked(&self, state: &mut Inner, reason: &str, force: bool) -> Result<(), SettingsError> {
        let registry_version = state.registry.version();
        let schema_outdated = state.schema.is_none() || registry_version != state.schema_registry_version;
        let store_version = state.store.version();
        let store_outdated = Some(store_version) != state.snapshot_store_version;
        let settings_missing = state.settings.is_none();
        let should_refresh = force || schema_outdated || store_outdated || settings_missing;

        if !should_refresh {
            return Ok(());
        }

        if schema_outdated {
            state.schema = Some(build_schema(&state.registry.sections())?);
            state.schema_registry_version = registry_version;
        }

        let source = state.source.clone().expect("source resolved before refresh");
        let raw = materialize_effective_snapshot(&state.store.entries(), &source.env_prefix, source.case_sensitive);
        let schema = state.schema.as_ref().expect("schema just rebuilt or already current");
        let validated = schema.validate(&raw)?;

        state.settings = Some(Arc::new(validated));
        state.snapshot_store_version = Some(store_version);
        debug!(reason, registry_version, store_version, "settings refreshed");
        Ok(())
    }

    fn active_settings(&self, state: &Inner) -> Result<Arc<Value>, SettingsError> {
        state.settings.clone().ok_or_else(|| SettingsError::configuration("settings snapshot is not initialized"))
    }
}

impl Default for SettingsManager {
    fn default() -> Self {
        Self::new()
    }
}

/// Convenience wrapper for registering a typed section directly, without a
/// full `OwnerDiscovery` object, for owners with a single static section.
pub struct StaticSection<T> {
    pub raw_path: String,
    pub kind: SectionKind,
    pub owner_key: String,
    pub owner_generation: u64,
    _marker: std::marker::PhantomData<T>,
}

impl<T: SectionModel> StaticSection<T> {
    pub fn new(raw_path: impl Into<String>, kind: SectionKind, owner_key: impl Into<String>, owner_generation: u64) -> Arc<Self> {
        Arc::new(Self {
            raw_path: raw_path.into(),
            kind,
            owner_key: owner_key.into(),
            owner_generation,
            _marker: std::marker::PhantomData,
        })
    }
}

impl<T: SectionModel> OwnerDiscovery for StaticSection<T> {
    fn owner_key(&self) -> &str {
        &self.owner_key
    }
    fn generation(&self) -> u64 {
        self.owner_generation
    }
    fn declare(&self, registry: &mut SchemaRegistry) -> Result<(), SettingsError> {
        registry.register_section::<T>(&self.raw_path, self.kind, &self.owner_key, self.owner_generation)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use schemars::JsonSchema;
    use serde::{Deserialize, Serialize};

    #[derive(Debug, Clone, Deserialize, Serialize, JsonSchema)]
    struct AppSection {
        name: String,
        #[serde(default)]
        port: i64,
    }

    fn write_settings(dir: &tempfile::TempDir, contents: &str) -> PathBuf {
        let path = dir.path().join("settings.yaml");
        std::fs::write(&path, contents).unwrap();
        path
    }

    #[test]
    fn non_mapping_settings_file_is_a_hard_error_not_a_warning() {
        let manager = SettingsManager::new();
        let dir = tempfile::tempdir().unwrap();
        let path = write_settings(&dir, "- one\n- two\n");

        let err = manager.init(Some(path.to_string_lossy().to_string()), None).unwrap_err();
        assert!(matches!(err, SettingsError::Configuration { .. }));
    }

    #[test]
    fn init_then_resolve_a_declared_section_field() {
        let manager = SettingsManager::new();
        let dir = tempfile::tempdir().unwrap();
        let path = write_settings(&dir, "app:\n  name: demo\n  port: 7000\n");

        manager.declare_section(StaticSection::<AppSection>::new("app", SectionKind::Object, "owner-a", 1)).unwrap();
        manager.init(Some(path.to_string_lossy().to_string()), None).unwrap();

        let name = manager.resolve_settings(ResolveTarget::Path("app.name".into()), None, None).unwrap();
        assert_eq!(name, "demo");
    }

    #[test]
    fn missing_target_falls_back_to_default() {
        let manager = SettingsManager::new();
        let dir = tempfile::tempdir().unwrap();
        let path = write_settings(&dir, "app: {}\n");
        manager.init(Some(path.to_string_lossy().to_string()), None).unwrap();

        let value = manager
            .resolve_settings(ResolveTarget::Path("app.missing".into()), None, Some(Value::String("fallback".into())))
            .unwrap();
        assert_eq!(value, "fallback");
    }

    #[test]
    fn reinit_with_a_different_source_is_an_error() {
        let manager = SettingsManager::new();
        let dir = tempfile::tempdir().unwrap();
        let path_a = write_settings(&dir, "app: {}\n");
        let path_b = dir.path().join("other.yaml");
        std::fs::write(&path_b, "app: {}\n").unwrap();

        manager.init(Some(path_a.to_string_lossy().to_string()), None).unwrap();
        let err = manager.init(Some(path_b.to_string_lossy().to_string()), None).unwrap_err();
        assert!(matches!(err, SettingsError::Configuration { .. }));
    }

    #[test]
    fn env_override_wins_over_file_value() {
        std::env::set_var("APP__NAME", "from-env");
        let manager = SettingsManager::new();
        let dir = tempfile::tempdir().unwrap();
        let path = write_settings(&dir, "app:\n  name: from-file\n");
        manager.init(Some(path.to_string_lossy().to_string()), Some("APP__".to_string())).unwrap();

        let value = manager.resolve_settings(ResolveTarget::Path("app.name".into()), None, None).unwrap();
        assert_eq!(value, "from-env");
        std::env::remove_var("APP__NAME");
    }

    #[test]
    fn control_redirect_switches_settings_path() {
        let manager = SettingsManager::new();
        let dir = tempfile::tempdir().unwrap();
        let path_b = dir.path().join("b.yaml");
        std::fs::write(
            &path_b,
            format!(
                "app:\n  name: b\nfastapiex:\n  settings:\n    path: \"{}\"\n",
                path_b.to_string_lossy()
            ),
        )
        .unwrap();

        let path_a = dir.path().join("a.yaml");
        std::fs::write(
            &path_a,
            format!("fastapiex:\n  settings:\n    path: \"{}\"\n", path_b.to_string_lossy()),
        )
        .unwrap();

        manager.init(Some(path_a.to_string_lossy().to_string()), None).unwrap();
        let value = manager.resolve_settings(ResolveTarget::Path("app.name".into()), None, None).unwrap();
        assert_eq!(value, "b");
    }

    #[test]
    fn control_path_cycle_freezes_instead_of_looping_forever() {
        let manager = SettingsManager::new();
        let dir = tempfile::tempdir().unwrap();
        let path_x = dir.path().join("x.yaml");
        let path_y = dir.path().join("y.yaml");
        std::fs::write(
            &path_x,
            format!("fastapiex:\n  settings:\n    path: \"{}\"\n", path_y.to_string_lossy()),
        )
        .unwrap();
        std::fs::write(
            &path_y,
            format!("fastapiex:\n  settings:\n    path: \"{}\"\n", path_x.to_string_lossy()),
        )
        .unwrap();

        let result = manager.init(Some(path_x.to_string_lossy().to_string()), None);
        assert!(result.is_ok());
    }

    #[derive(Debug, Clone, Deserialize, Serialize, JsonSchema)]
    struct SharedSection {
        value: i64,
    }

    #[test]
    fn type_target_ambiguity_is_a_resolve_error() {
        let manager = SettingsManager::new();
        let dir = tempfile::tempdir().unwrap();
        let path = write_settings(&dir, "app:\n  value: 1\nworker:\n  value: 2\n");

        manager.declare_section(StaticSection::<SharedSection>::new("app", SectionKind::Object, "owner-a", 1)).unwrap();
        manager.declare_section(StaticSection::<SharedSection>::new("worker", SectionKind::Object, "owner-b", 1)).unwrap();
        manager.init(Some(path.to_string_lossy().to_string()), None).unwrap();

        let target = ResolveTarget::Type(TypeId::of::<SharedSection>(), "SharedSection");
        let err = manager.resolve_settings(target, None, None).unwrap_err();
        assert!(matches!(err, SettingsError::Resolve { .. }));
    }

    #[derive(Debug, Clone, Deserialize, Serialize, JsonSchema)]
    struct RequiredNameSection {
        name: String,
    }

    #[test]
    fn validation_failure_falls_back_to_default_and_warns_once() {
        let manager = SettingsManager::new();
        let dir = tempfile::tempdir().unwrap();
        let path = write_settings(&dir, "app: {}\n");

        manager
            .declare_section(StaticSection::<RequiredNameSection>::new("app", SectionKind::Object, "owner-a", 1))
            .unwrap();
        manager.init(Some(path.to_string_lossy().to_string()), None).unwrap();

        let first = manager
            .resolve_settings(ResolveTarget::Path("app".into()), None, Some(Value::String("fallback".into())))
            .unwrap();
        assert_eq!(first, "fallback");

        let second = manager
            .resolve_settings(ResolveTarget::Path("app".into()), None, Some(Value::String("fallback".into())))
            .unwrap();
        assert_eq!(second, "fallback");
    }

    #[test]
    fn dotenv_changes_are_not_auto_reread_until_enabled() {
        let dir = tempfile::tempdir().unwrap();
        let settings_path = dir.path().join("settings.yaml");
        std::fs::write(
            &settings_path,
            "app:\n  name: file-v1\nfastapiex:\n  settings:\n    reload: on_change\n",
        )
        .unwrap();
        let dotenv_path = dir.path().join(".env");
        std::fs::write(&dotenv_path, "APP__EXTRA=dotenv-v1\n").unwrap();

        let manager = SettingsManager::new();
        manager.init(Some(settings_path.to_string_lossy().to_string()), Some("APP__".to_string())).unwrap();

        assert_eq!(
            manager.resolve_settings(ResolveTarget::Path("app.name".into()), None, None).unwrap(),
            "file-v1"
        );
        assert_eq!(
            manager.resolve_settings(ResolveTarget::Path("app.extra".into()), None, None).unwrap(),
            "dotenv-v1"
        );

        std::fs::write(
            &settings_path,
            "app:\n  name: file-v2-longer\nfastapiex:\n  settings:\n    reload: on_change\n",
        )
        .unwrap();
        assert_eq!(
            manager.get().and_then(|_| manager.resolve_settings(ResolveTarget::Path("app.name".into()), None, None)).unwrap(),
            "file-v2-longer"
        );

        std::fs::write(&dotenv_path, "APP__EXTRA=dotenv-v2-longer\n").unwrap();
        assert_eq!(
            manager.get().and_then(|_| manager.resolve_settings(ResolveTarget::Path("app.extra".into()), None, None)).unwrap(),
            "dotenv-v1"
        );

        manager.register_source_sync(SourceName::Dotenv, Some(true), None);
        manager.reload("enable-dotenv-sync").unwrap();
        assert_eq!(
            manager.resolve_settings(ResolveTarget::Path("app.extra".into()), None, None).unwrap(),
            "dotenv-v2-longer"
        );
    }
}
