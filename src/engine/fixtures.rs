//! Shared setup for engine tests.

use std::sync::Arc;
use tempfile::TempDir;

use super::{Engine, EngineOptions};
use crate::auth::Subject;
use crate::model::{FeatureId, FeatureState, InstalledFeatureRecord};
use crate::module::InMemoryModuleRuntime;
use crate::runtime::RealRuntime;
use crate::source::MemorySource;
use crate::state::StateStore;

pub fn admin() -> Subject {
    Subject::new("ops", ["admin"])
}

pub fn guest() -> Subject {
    Subject::new("guest", ["viewer"])
}

pub fn id(s: &str) -> FeatureId {
    s.parse().unwrap()
}

pub struct TestEngine {
    pub engine: Engine<RealRuntime>,
    pub source: Arc<MemorySource>,
    pub modules: Arc<InMemoryModuleRuntime>,
    pub dir: TempDir,
}

impl TestEngine {
    pub fn new() -> Self {
        Self::with_options(|_| {})
    }

    /// An engine with in-memory descriptors and modules, persisting under a temp dir.
    pub fn with_options(configure: impl FnOnce(&mut EngineOptions)) -> Self {
        let dir = tempfile::tempdir().unwrap();
        let source = Arc::new(MemorySource::new());
        let modules = Arc::new(InMemoryModuleRuntime::new());
        let engine = Self::open(&dir, source.clone(), modules.clone(), configure);
        Self {
            engine,
            source,
            modules,
            dir,
        }
    }

    pub fn open(
        dir: &TempDir,
        source: Arc<MemorySource>,
        modules: Arc<InMemoryModuleRuntime>,
        configure: impl FnOnce(&mut EngineOptions),
    ) -> Engine<RealRuntime> {
        let runtime = Arc::new(RealRuntime);
        let mut options = EngineOptions::new(dir.path().join("etc"));
        configure(&mut options);
        let state = StateStore::persistent(runtime.clone(), dir.path().join("state.json"));
        Engine::new(runtime, source, modules, state, options).unwrap()
    }

    pub fn descriptor(&self, locator: &str, doc: &str) {
        self.source.insert(locator, doc);
    }

    pub async fn add(&self, locator: &str) {
        self.engine
            .add_repository(&admin(), locator, false)
            .await
            .unwrap();
    }

    pub fn record(&self, feature: &str) -> InstalledFeatureRecord {
        self.engine
            .state()
            .read(|s| s.record(&id(feature)).cloned())
            .unwrap()
            .unwrap()
    }

    pub fn state_of(&self, feature: &str) -> FeatureState {
        self.engine
            .state()
            .read(|s| s.record(&id(feature)).map(|r| r.state))
            .unwrap()
            .unwrap_or_default()
    }
}
