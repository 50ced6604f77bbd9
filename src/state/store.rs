use super::{FileLock, State};
use crate::config::{DEFAULT_LOCK_MAX_RETRIES, DEFAULT_LOCK_RETRY_INTERVAL_MS};
use crate::error::{DrftError, Result};
use crate::serializer::{FieldMapper, TypeRegistry};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Load/save/lock the state blob on disk, with `.drft/`-prefix path
/// resolution against the nearest ancestor directory containing a
/// package-manifest file (§4.B).
pub struct FileStateStore {
    state_path: PathBuf,
    lock_max_retries: u32,
    lock_retry_interval: Duration,
}

impl FileStateStore {
    /// Construct with the spec's literal default lock policy (10 retries,
    /// 100ms). Use [`Self::with_lock_policy`] to take the policy from a
    /// `DrftConfig` instead.
    pub fn new(working_dir: &Path, path: &str) -> Self {
        Self {
            state_path: resolve_path(working_dir, path),
            lock_max_retries: DEFAULT_LOCK_MAX_RETRIES,
            lock_retry_interval: Duration::from_millis(DEFAULT_LOCK_RETRY_INTERVAL_MS),
        }
    }

    pub fn with_lock_policy(working_dir: &Path, path: &str, lock_max_retries: u32, lock_retry_interval: Duration) -> Self {
        Self {
            state_path: resolve_path(working_dir, path),
            lock_max_retries,
            lock_retry_interval,
        }
    }

    pub fn state_path(&self) -> &Path {
        &self.state_path
    }

    /// Returns the persisted State, or an empty `{name: "default",
    /// resources: {}}` State if the file does not exist. A malformed file
    /// is a hard `StateError`.
    pub fn load(&self, registry: &TypeRegistry, mapper: Option<&FieldMapper>) -> Result<State> {
        if !self.state_path.exists() {
            return Ok(State::empty("default"));
        }
        let raw = fs::read_to_string(&self.state_path)
            .map_err(|e| DrftError::state_with(format!("failed to read {}", self.state_path.display()), e.into()))?;
        let value: serde_json::Value = serde_json::from_str(&raw)
            .map_err(|e| DrftError::state_with(format!("malformed state file {}", self.state_path.display()), e.into()))?;
        State::decode(&value, registry, mapper)
    }

    /// Writes the State as canonical pretty-printed JSON, creating any
    /// missing parent directories. I/O errors after a successful lock
    /// propagate to the caller, who remains responsible for unlocking.
    pub fn save(&self, state: &State) -> Result<()> {
        if let Some(parent) = self.state_path.parent() {
            fs::create_dir_all(parent)
                .map_err(|e| DrftError::state_with("failed to create state directory", e.into()))?;
        }
        let value = state.encode()?;
        let pretty = serde_json::to_string_pretty(&value)
            .map_err(|e| DrftError::state_with("failed to serialize state", e.into()))?;
        fs::write(&self.state_path, pretty)
            .map_err(|e| DrftError::state_with(format!("failed to write {}", self.state_path.display()), e.into()))?;
        Ok(())
    }

    /// Acquire the advisory lock for the duration of an operation, under
    /// this store's configured retry policy. The lock is not crash-safe; a
    /// stale lock must be removed manually.
    pub fn lock(&self) -> Result<FileLock> {
        FileLock::acquire_with(&self.state_path, self.lock_max_retries, self.lock_retry_interval)
    }
}

/// Paths beginning with `.drft/` resolve relative to the nearest ancestor
/// directory containing a package-manifest file; otherwise relative to
/// `working_dir`. Absolute paths are used verbatim.
fn resolve_path(working_dir: &Path, path: &str) -> PathBuf {
    let candidate = Path::new(path);
    if candidate.is_absolute() {
        return candidate.to_path_buf();
    }
    if let Some(rest) = path.strip_prefix(".drft/") {
        if let Some(root) = find_package_root(working_dir) {
            return root.join(".drft").join(rest);
        }
    }
    working_dir.join(path)
}

fn find_package_root(start: &Path) -> Option<PathBuf> {
    let mut dir = start.to_path_buf();
    loop {
        if dir.join("Cargo.toml").is_file() {
            return Some(dir);
        }
        if !dir.pop() {
            return None;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resource::Resource;
    use crate::serializer::Record;
    use serde_json::{json, Map, Value};
    use std::any::Any;
    use tempfile::tempdir;

    #[derive(Debug, Clone)]
    struct Dummy {
        n: String,
    }

    impl Record for Dummy {
        fn type_tag(&self) -> &'static str {
            "test.Dummy"
        }
        fn encode_fields(&self) -> Result<Map<String, Value>> {
            let mut m = Map::new();
            m.insert("n".to_string(), json!(self.n));
            Ok(m)
        }
        fn as_any(&self) -> &dyn Any {
            self
        }
    }

    fn registry() -> TypeRegistry {
        let mut r = TypeRegistry::new();
        r.register::<Dummy, _>("test.Dummy", |fields, _reg, _mapper| {
            let n = crate::serializer::require_str(fields, "n")?.to_string();
            Ok(Dummy { n })
        });
        r
    }

    #[test]
    fn missing_file_loads_as_empty_default() {
        let dir = tempdir().unwrap();
        let store = FileStateStore::new(dir.path(), "state.json");
        let reg = registry();
        let state = store.load(&reg, None).unwrap();
        assert_eq!(state.stack, "default");
        assert!(state.resources.is_empty());
    }

    #[test]
    fn save_then_load_roundtrips() {
        let dir = tempdir().unwrap();
        let store = FileStateStore::new(dir.path(), "state.json");
        let reg = registry();

        let mut state = State::empty("demo");
        let resource = Resource::new("r", vec![], std::sync::Arc::new(Dummy { n: "hi".into() }));
        state
            .resources
            .insert("r".to_string(), crate::resource::ResourceState::new(resource));

        store.save(&state).unwrap();
        let loaded = store.load(&reg, None).unwrap();
        assert_eq!(loaded.stack, "demo");
        assert_eq!(loaded.resources.len(), 1);
    }

    #[test]
    fn malformed_file_is_a_hard_error() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("state.json");
        fs::write(&path, "not json").unwrap();
        let store = FileStateStore::new(dir.path(), "state.json");
        let reg = registry();
        assert!(store.load(&reg, None).is_err());
    }

    #[test]
    fn drft_prefixed_path_resolves_against_package_root() {
        let dir = tempdir().unwrap();
        fs::write(dir.path().join("Cargo.toml"), "[package]\nname=\"x\"").unwrap();
        let nested = dir.path().join("nested/deeper");
        fs::create_dir_all(&nested).unwrap();
        let store = FileStateStore::new(&nested, ".drft/state.json");
        assert_eq!(store.state_path(), dir.path().join(".drft/state.json"));
    }
}
