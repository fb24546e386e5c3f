//! Record of side effects performed while provisioning, for rollback.

use log::{debug, warn};

use crate::config::ConfigManager;
use crate::model::{Materialized, ModuleRef};
use crate::module::{ModuleRuntime, ModuleState};
use crate::runtime::Runtime;

#[derive(Debug, Clone, PartialEq, Eq)]
pub(super) enum Step {
    Installed(ModuleRef),
    Started(ModuleRef),
    Stopped(ModuleRef),
    Uninstalled(ModuleRef),
    Configured(Vec<Materialized>),
}

/// Where a module ended up after its undo failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(super) enum Residue {
    /// Present before the run, could not be reinstalled
    Missing,
    /// Present before the run, could not be restarted
    NotRestarted,
    /// Added by the run and still in the runtime
    Leftover(ModuleState),
}

/// A module that could not be put back the way it was.
#[derive(Debug)]
pub(super) struct UndoFailure {
    pub module: ModuleRef,
    pub residue: Residue,
    pub error: anyhow::Error,
}

#[derive(Debug, Default)]
pub(super) struct Journal {
    steps: Vec<Step>,
}

impl Journal {
    pub fn record(&mut self, step: Step) {
        debug!("Journal: {:?}", step);
        self.steps.push(step);
    }

    #[cfg(test)]
    pub fn steps(&self) -> &[Step] {
        &self.steps
    }

    /// Undo every recorded step, newest first.
    ///
    /// Undo failures do not stop the rollback; they are returned.
    pub async fn rollback<R: Runtime>(
        self,
        modules: &dyn ModuleRuntime,
        config: &ConfigManager<R>,
    ) -> Vec<UndoFailure> {
        let mut failures = Vec::new();
        for step in self.steps.into_iter().rev() {
            debug!("Rolling back {:?}", step);
            match step {
                Step::Started(m) => {
                    if let Err(error) = modules.stop(&m).await {
                        warn!("Unable to stop {} during rollback: {:#}", m, error);
                        failures.push(UndoFailure {
                            module: m,
                            residue: Residue::Leftover(ModuleState::Started),
                            error,
                        });
                    }
                }
                Step::Installed(m) => match modules.uninstall(&m).await {
                    // Uninstalling also clears a module that refused to stop
                    Ok(()) => failures.retain(|f| f.module != m),
                    Err(error) => {
                        warn!("Unable to uninstall {} during rollback: {:#}", m, error);
                        if !failures.iter().any(|f| f.module == m) {
                            failures.push(UndoFailure {
                                module: m,
                                residue: Residue::Leftover(ModuleState::Installed),
                                error,
                            });
                        }
                    }
                },
                Step::Configured(created) => config.discard(&created),
                Step::Uninstalled(m) => {
                    if let Err(error) = modules.install(&m).await {
                        warn!("Unable to reinstall {} during rollback: {:#}", m, error);
                        failures.push(UndoFailure {
                            module: m,
                            residue: Residue::Missing,
                            error,
                        });
                    }
                }
                Step::Stopped(m) => {
                    if failures.iter().any(|f| f.module == m) {
                        continue;
                    }
                    if let Err(error) = modules.start(&m).await {
                        warn!("Unable to restart {} during rollback: {:#}", m, error);
                        failures.push(UndoFailure {
                            module: m,
                            residue: Residue::NotRestarted,
                            error,
                        });
                    }
                }
            }
        }
        failures
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::module::{InMemoryModuleRuntime, MockModuleRuntime, ModuleEvent};
    use crate::runtime::RealRuntime;
    use std::sync::Arc;
    use tempfile::tempdir;

    #[tokio::test]
    async fn test_rollback_undoes_in_reverse() {
        let dir = tempdir().unwrap();
        let config = ConfigManager::new(Arc::new(RealRuntime), dir.path());
        std::fs::write(dir.path().join("p.cfg"), "k = v\n").unwrap();

        let old = ModuleRef::new("m:old");
        let new = ModuleRef::new("m:new");
        let runtime = InMemoryModuleRuntime::with_modules([(new.clone(), ModuleState::Started)]);

        let mut journal = Journal::default();
        journal.record(Step::Stopped(old.clone()));
        journal.record(Step::Uninstalled(old.clone()));
        journal.record(Step::Installed(new.clone()));
        journal.record(Step::Configured(vec![Materialized::Pid("p".into())]));
        journal.record(Step::Started(new.clone()));
        assert_eq!(journal.steps().len(), 5);

        let failures = journal.rollback(&runtime, &config).await;

        assert!(failures.is_empty());
        assert!(!dir.path().join("p.cfg").exists());
        assert_eq!(runtime.state("m:new"), None);
        assert_eq!(runtime.state("m:old"), Some(ModuleState::Started));
        assert_eq!(
            runtime.events(),
            vec![
                ModuleEvent::Stop(new.clone()),
                ModuleEvent::Uninstall(new),
                ModuleEvent::Install(old.clone()),
                ModuleEvent::Start(old),
            ]
        );
    }

    #[tokio::test]
    async fn test_failed_reinstall_is_reported_once() {
        let dir = tempdir().unwrap();
        let config = ConfigManager::new(Arc::new(RealRuntime), dir.path());
        let runtime = InMemoryModuleRuntime::new();
        runtime.fail_install("m:old");

        let mut journal = Journal::default();
        journal.record(Step::Stopped(ModuleRef::new("m:old")));
        journal.record(Step::Uninstalled(ModuleRef::new("m:old")));

        let failures = journal.rollback(&runtime, &config).await;
        assert_eq!(failures.len(), 1);
        assert_eq!(failures[0].residue, Residue::Missing);
    }

    #[tokio::test]
    async fn test_module_that_will_not_go_is_reported_as_leftover() {
        let dir = tempdir().unwrap();
        let config = ConfigManager::new(Arc::new(RealRuntime), dir.path());
        let mut runtime = MockModuleRuntime::new();
        runtime
            .expect_stop()
            .returning(|m| Err(anyhow::anyhow!("{} is busy", m)));
        runtime
            .expect_uninstall()
            .returning(|m| Err(anyhow::anyhow!("{} is locked", m)));

        let mut journal = Journal::default();
        journal.record(Step::Installed(ModuleRef::new("m:a")));
        journal.record(Step::Installed(ModuleRef::new("m:b")));
        journal.record(Step::Started(ModuleRef::new("m:b")));

        let failures = journal.rollback(&runtime, &config).await;

        assert_eq!(failures.len(), 2);
        assert_eq!(failures[0].module, ModuleRef::new("m:b"));
        assert_eq!(failures[0].residue, Residue::Leftover(ModuleState::Started));
        assert_eq!(failures[1].module, ModuleRef::new("m:a"));
        assert_eq!(failures[1].residue, Residue::Leftover(ModuleState::Installed));
    }
}
