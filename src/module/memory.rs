use anyhow::{Result, bail};
use async_trait::async_trait;
use log::debug;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Mutex;

use super::{ModuleRuntime, ModuleState};
use crate::model::ModuleRef;

/// A call the runtime received, in order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ModuleEvent {
    Install(ModuleRef),
    Start(ModuleRef),
    Stop(ModuleRef),
    Uninstall(ModuleRef),
    Refresh(Vec<ModuleRef>),
}

#[derive(Default)]
struct Inner {
    modules: BTreeMap<ModuleRef, ModuleState>,
    events: Vec<ModuleEvent>,
    fail_install: BTreeSet<ModuleRef>,
    fail_start: BTreeSet<ModuleRef>,
    fail_uninstall: BTreeSet<ModuleRef>,
}

/// Bookkeeping-only module runtime.
///
/// Tracks module states without loading anything. Used by the command line
/// front end and by tests, which can make individual modules fail.
#[derive(Default)]
pub struct InMemoryModuleRuntime {
    inner: Mutex<Inner>,
}

impl InMemoryModuleRuntime {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start from modules a previous run left behind.
    pub fn with_modules(modules: impl IntoIterator<Item = (ModuleRef, ModuleState)>) -> Self {
        let runtime = Self::new();
        runtime.restore(modules);
        runtime
    }

    /// Record modules as already present, without emitting events.
    pub fn restore(&self, modules: impl IntoIterator<Item = (ModuleRef, ModuleState)>) {
        if let Ok(mut inner) = self.inner.lock() {
            inner.modules.extend(modules);
        }
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, Inner>> {
        self.inner
            .lock()
            .map_err(|_| anyhow::anyhow!("module runtime lock poisoned"))
    }

    pub fn fail_install(&self, module: &str) {
        if let Ok(mut inner) = self.inner.lock() {
            inner.fail_install.insert(ModuleRef::new(module));
        }
    }

    pub fn fail_start(&self, module: &str) {
        if let Ok(mut inner) = self.inner.lock() {
            inner.fail_start.insert(ModuleRef::new(module));
        }
    }

    pub fn fail_uninstall(&self, module: &str) {
        if let Ok(mut inner) = self.inner.lock() {
            inner.fail_uninstall.insert(ModuleRef::new(module));
        }
    }

    pub fn clear_failures(&self) {
        if let Ok(mut inner) = self.inner.lock() {
            inner.fail_install.clear();
            inner.fail_start.clear();
            inner.fail_uninstall.clear();
        }
    }

    pub fn state(&self, module: &str) -> Option<ModuleState> {
        self.inner
            .lock()
            .ok()
            .and_then(|inner| inner.modules.get(&ModuleRef::new(module)).copied())
    }

    pub fn modules(&self) -> BTreeMap<ModuleRef, ModuleState> {
        self.inner
            .lock()
            .map(|inner| inner.modules.clone())
            .unwrap_or_default()
    }

    pub fn events(&self) -> Vec<ModuleEvent> {
        self.inner
            .lock()
            .map(|inner| inner.events.clone())
            .unwrap_or_default()
    }

    /// Number of times `module` was installed.
    pub fn install_count(&self, module: &str) -> usize {
        let module = ModuleRef::new(module);
        self.events()
            .iter()
            .filter(|e| matches!(e, ModuleEvent::Install(m) if *m == module))
            .count()
    }
}

#[async_trait]
impl ModuleRuntime for InMemoryModuleRuntime {
    async fn install(&self, module: &ModuleRef) -> Result<()> {
        let mut inner = self.lock()?;
        inner.events.push(ModuleEvent::Install(module.clone()));
        if inner.fail_install.contains(module) {
            bail!("Unable to install {}", module);
        }
        debug!("Installed module {}", module);
        inner
            .modules
            .entry(module.clone())
            .or_insert(ModuleState::Installed);
        Ok(())
    }

    async fn start(&self, module: &ModuleRef) -> Result<()> {
        let mut inner = self.lock()?;
        inner.events.push(ModuleEvent::Start(module.clone()));
        if inner.fail_start.contains(module) {
            bail!("Unable to start {}", module);
        }
        match inner.modules.get_mut(module) {
            Some(state) => {
                *state = ModuleState::Started;
                debug!("Started module {}", module);
                Ok(())
            }
            None => bail!("Module {} is not installed", module),
        }
    }

    async fn stop(&self, module: &ModuleRef) -> Result<()> {
        let mut inner = self.lock()?;
        inner.events.push(ModuleEvent::Stop(module.clone()));
        if let Some(state) = inner.modules.get_mut(module) {
            *state = ModuleState::Installed;
        }
        Ok(())
    }

    async fn uninstall(&self, module: &ModuleRef) -> Result<()> {
        let mut inner = self.lock()?;
        inner.events.push(ModuleEvent::Uninstall(module.clone()));
        if inner.fail_uninstall.contains(module) {
            bail!("Unable to uninstall {}", module);
        }
        inner.modules.remove(module);
        Ok(())
    }

    async fn refresh(&self, modules: &[ModuleRef]) -> Result<()> {
        let mut inner = self.lock()?;
        inner.events.push(ModuleEvent::Refresh(modules.to_vec()));
        Ok(())
    }
}
