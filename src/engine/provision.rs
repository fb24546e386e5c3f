//! Install, uninstall and upgrade.
//!
//! Every provisioning call follows the same shape: compute the new
//! requirement set, resolve its closure, diff it against the tracked state
//! and execute the diff. Resolution happens before any side effect; a failure
//! while executing rolls back everything the run did.

use log::{Level, debug, info, log, warn};
use std::collections::{BTreeMap, BTreeSet};

use super::Engine;
use super::journal::{Journal, Residue, Step};
use crate::auth::Subject;
use crate::catalog::FeatureCatalog;
use crate::error::{FeatureError, Result};
use crate::model::{Feature, FeatureId, FeatureRef, FeatureState, InstalledFeatureRecord, ModuleRef};
use crate::module::ModuleState;
use crate::resolver::{DependencyResolver, FeatureLookup, Resolution, ResolverOptions, teardown_order};
use crate::runtime::Runtime;
use crate::service::{InstallOptions, ProvisionReport, UninstallOptions};
use crate::state::{EngineState, ModuleRecord};

/// Catalog definitions, plus installed definitions the catalog no longer has.
struct Known<'a> {
    catalog: &'a FeatureCatalog,
    state: &'a EngineState,
}

impl FeatureLookup for Known<'_> {
    fn candidates(&self, name: &str) -> Vec<&Feature> {
        let mut found = self.catalog.candidates(name);
        for record in self.state.installed() {
            if record.feature.id.name == name && !found.iter().any(|f| f.id == record.feature.id) {
                found.push(&record.feature);
            }
        }
        found.sort_by(|a, b| b.id.version.cmp(&a.id.version));
        found
    }
}

/// The diff between the tracked state and a resolved closure.
pub(super) struct Plan {
    before: EngineState,
    resolution: Resolution,
    required: Vec<FeatureId>,
    repositories: BTreeMap<FeatureId, Option<String>>,
    /// New features, dependencies first
    added: Vec<FeatureId>,
    /// Features leaving the closure, dependents first
    removed: Vec<FeatureId>,
    install_modules: Vec<ModuleRef>,
    start_modules: Vec<ModuleRef>,
    remove_modules: Vec<ModuleRef>,
}

impl Plan {
    fn log(&self, verbose: bool) {
        let level = if verbose { Level::Info } else { Level::Debug };
        for id in &self.removed {
            log!(level, "Uninstalling feature {}", id);
        }
        for id in &self.added {
            log!(level, "Installing feature {}", id);
        }
        for m in &self.remove_modules {
            log!(level, "  Removing module {}", m);
        }
        for m in &self.install_modules {
            log!(level, "  Installing module {}", m);
        }
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub(super) struct ApplyOptions {
    pub no_auto_refresh: bool,
    pub delete_config: bool,
    pub verbose: bool,
}

impl From<InstallOptions> for ApplyOptions {
    fn from(o: InstallOptions) -> Self {
        Self {
            no_auto_refresh: o.no_auto_refresh,
            delete_config: false,
            verbose: o.verbose,
        }
    }
}

impl From<UninstallOptions> for ApplyOptions {
    fn from(o: UninstallOptions) -> Self {
        Self {
            no_auto_refresh: o.no_auto_refresh,
            delete_config: o.delete_config,
            verbose: false,
        }
    }
}

/// Installed features that depend, directly or not, on any of `targets`; `targets` included.
pub(super) fn dependents_closure(
    state: &EngineState,
    targets: &BTreeSet<FeatureId>,
) -> BTreeSet<FeatureId> {
    let mut closure = targets.clone();
    loop {
        let before = closure.len();
        for record in state.installed() {
            if closure.contains(&record.feature.id) {
                continue;
            }
            let depends = record
                .feature
                .dependencies
                .iter()
                .any(|dep| closure.iter().any(|id| dep.matches(id)));
            if depends {
                closure.insert(record.feature.id.clone());
            }
        }
        if closure.len() == before {
            return closure;
        }
    }
}

impl<R: Runtime + 'static> Engine<R> {
    /// Resolve `required` and diff the closure against `before`.
    ///
    /// `installed` is what the resolver may prefer when picking versions.
    pub(super) fn plan(
        &self,
        catalog: &FeatureCatalog,
        before: EngineState,
        required: Vec<FeatureId>,
        installed: BTreeSet<FeatureId>,
    ) -> Result<Plan> {
        let resolution = {
            let lookup = Known {
                catalog,
                state: &before,
            };
            let options = ResolverOptions {
                allow_side_by_side: self.options.allow_side_by_side,
            };
            DependencyResolver::new(&lookup, &installed, options).resolve(&required)?
        };

        let tracked = before.installed_ids();
        let repositories = resolution
            .order
            .iter()
            .map(|id| {
                let locator = catalog
                    .get(id)
                    .map(|e| e.repository.clone())
                    .or_else(|| before.record(id).and_then(|r| r.repository.clone()));
                (id.clone(), locator)
            })
            .collect();

        let added: Vec<FeatureId> = resolution
            .order
            .iter()
            .filter(|id| !tracked.contains(*id))
            .cloned()
            .collect();

        let removed = {
            let leaving: Vec<&Feature> = before
                .installed()
                .filter(|r| !resolution.contains(&r.feature.id))
                .map(|r| &r.feature)
                .collect();
            teardown_order(&leaving)
        };

        let install_modules = resolution
            .modules
            .iter()
            .filter(|m| !before.modules.contains_key(&m.module))
            .map(|m| m.module.clone())
            .collect();
        let start_modules = resolution
            .modules
            .iter()
            .filter(|m| {
                before
                    .modules
                    .get(&m.module)
                    .is_none_or(|r| r.state != ModuleState::Started)
            })
            .map(|m| m.module.clone())
            .collect();

        let mut remove_modules: Vec<ModuleRef> = Vec::new();
        let orphaned = |m: &ModuleRef| resolution.owners(m).is_none() && before.modules.contains_key(m);
        for id in &removed {
            if let Some(record) = before.record(id) {
                for m in record.feature.modules.iter().rev() {
                    if orphaned(m) && !remove_modules.contains(m) {
                        remove_modules.push(m.clone());
                    }
                }
            }
        }
        for m in before.modules.keys() {
            if orphaned(m) && !remove_modules.contains(m) {
                remove_modules.push(m.clone());
            }
        }

        Ok(Plan {
            before,
            resolution,
            required,
            repositories,
            added,
            removed,
            install_modules,
            start_modules,
            remove_modules,
        })
    }

    async fn install_module(&self, module: &ModuleRef, journal: &mut Journal) -> Result<()> {
        self.modules
            .install(module)
            .await
            .map_err(|source| FeatureError::Activation {
                module: module.to_string(),
                source,
            })?;
        journal.record(Step::Installed(module.clone()));
        Ok(())
    }

    fn set_states(&self, ids: &[FeatureId], state: FeatureState) -> Result<()> {
        self.state.update(|s| {
            for id in ids {
                if let Some(record) = s.features.get_mut(id) {
                    record.state = state;
                }
            }
        })
    }

    async fn execute(
        &self,
        plan: &Plan,
        options: ApplyOptions,
        journal: &mut Journal,
    ) -> Result<ProvisionReport> {
        let mut report = ProvisionReport::default();

        // Teardown: modules nothing references any more
        let mut stuck = BTreeMap::new();
        for m in &plan.remove_modules {
            let mut state = plan
                .before
                .modules
                .get(m)
                .map_or(ModuleState::Installed, |r| r.state);
            if state == ModuleState::Started {
                match self.modules.stop(m).await {
                    Ok(()) => {
                        journal.record(Step::Stopped(m.clone()));
                        state = ModuleState::Installed;
                    }
                    Err(e) => warn!("Unable to stop module {}: {:#}", m, e),
                }
            }
            match self.modules.uninstall(m).await {
                Ok(()) => journal.record(Step::Uninstalled(m.clone())),
                Err(e) => {
                    warn!("Unable to uninstall module {}: {:#}", m, e);
                    stuck.insert(m.clone(), state);
                }
            }
            report.stopped_modules.push(m.clone());
        }
        let retain = self.options.retain_uninstalled_records;
        self.state.update(|s| {
            for id in &plan.removed {
                if retain {
                    if let Some(record) = s.features.get_mut(id) {
                        record.state = FeatureState::Uninstalled;
                        record.required = false;
                    }
                } else {
                    s.features.remove(id);
                }
            }
            for m in &plan.remove_modules {
                match stuck.get(m) {
                    // Still in the runtime: keep it tracked, unowned
                    Some(&state) => {
                        s.modules.insert(
                            m.clone(),
                            ModuleRecord {
                                module: m.clone(),
                                state,
                                owners: BTreeSet::new(),
                            },
                        );
                    }
                    None => {
                        s.modules.remove(m);
                    }
                }
            }
        })?;
        report.uninstalled = plan.removed.clone();

        // Install new features and their modules
        let mut installed_now = BTreeSet::new();
        for id in &plan.added {
            let Some(feature) = plan.resolution.definition(id) else {
                continue;
            };
            let mut record = InstalledFeatureRecord::new(
                feature.clone(),
                plan.repositories.get(id).cloned().flatten(),
            );
            record.state = FeatureState::Installed;
            record.required = plan.required.contains(id);
            self.state.update(|s| {
                s.features.insert(id.clone(), record);
            })?;

            for m in &feature.modules {
                if plan.install_modules.contains(m) && installed_now.insert(m.clone()) {
                    self.install_module(m, journal).await?;
                }
            }
        }
        // Modules added to features that were already installed
        for m in &plan.install_modules {
            if installed_now.insert(m.clone()) {
                self.install_module(m, journal).await?;
            }
        }
        self.set_states(&plan.added, FeatureState::Resolved)?;

        for id in &plan.added {
            let Some(feature) = plan.resolution.definition(id) else {
                continue;
            };
            let created = self.config.materialize(feature)?;
            if !created.is_empty() {
                journal.record(Step::Configured(created.clone()));
                self.state.update(|s| {
                    if let Some(record) = s.features.get_mut(id) {
                        record.materialized = created;
                    }
                })?;
            }
        }

        for m in &plan.start_modules {
            self.modules
                .start(m)
                .await
                .map_err(|source| FeatureError::Activation {
                    module: m.to_string(),
                    source,
                })?;
            journal.record(Step::Started(m.clone()));
            report.started_modules.push(m.clone());
        }

        // Everything is running: mark the closure started and commit the bookkeeping
        self.state.update(|s| {
            for id in &plan.resolution.order {
                if let Some(record) = s.features.get_mut(id) {
                    record.required = plan.required.contains(id);
                    record.state = FeatureState::Started;
                    if let Some(feature) = plan.resolution.definition(id) {
                        record.feature = feature.clone();
                    }
                }
            }
            for planned in &plan.resolution.modules {
                s.modules.insert(
                    planned.module.clone(),
                    ModuleRecord {
                        module: planned.module.clone(),
                        state: ModuleState::Started,
                        owners: planned.owners.clone(),
                    },
                );
            }
        })?;
        report.installed = plan.added.clone();

        if !options.no_auto_refresh {
            let affected: Vec<ModuleRef> = plan
                .install_modules
                .iter()
                .chain(plan.remove_modules.iter())
                .cloned()
                .collect();
            if !affected.is_empty()
                && let Err(e) = self.modules.refresh(&affected).await
            {
                warn!("Module refresh failed: {:#}", e);
            }
        }

        if options.delete_config {
            for id in &plan.removed {
                if let Some(record) = plan.before.record(id) {
                    self.config.retain_or_delete(&record.feature, true);
                }
            }
        }

        Ok(report)
    }

    /// Execute a plan, rolling back on failure.
    ///
    /// For an upgrade, `upgrade_of` names the version being replaced; if it
    /// cannot be restored the error is [`FeatureError::UpgradeFailed`].
    pub(super) async fn apply(
        &self,
        plan: Plan,
        options: ApplyOptions,
        upgrade_of: Option<&FeatureId>,
    ) -> Result<ProvisionReport> {
        plan.log(options.verbose);

        let mut journal = Journal::default();
        let error = match self.execute(&plan, options, &mut journal).await {
            Ok(report) => {
                self.persist()?;
                return Ok(report);
            }
            Err(e) => e,
        };

        warn!("Provisioning failed, rolling back: {}", error);
        let failures = journal.rollback(self.modules.as_ref(), &self.config).await;
        let mut restored = plan.before;

        if failures.is_empty() {
            self.state.replace(restored)?;
            self.persist()?;
            return Err(error);
        }

        for failure in &failures {
            match failure.residue {
                Residue::Missing => {
                    restored.modules.remove(&failure.module);
                }
                Residue::NotRestarted => {
                    if let Some(record) = restored.modules.get_mut(&failure.module) {
                        record.state = ModuleState::Installed;
                    }
                }
                // Tracked without owners, so the next plan removes it
                Residue::Leftover(state) => {
                    restored
                        .modules
                        .entry(failure.module.clone())
                        .and_modify(|record| record.state = state)
                        .or_insert_with(|| ModuleRecord {
                            module: failure.module.clone(),
                            state,
                            owners: BTreeSet::new(),
                        });
                }
            }
        }
        let reasons = failures
            .iter()
            .map(|f| format!("{}: {:#}", f.module, f.error))
            .collect::<Vec<_>>()
            .join("; ");

        let old_damaged = failures
            .iter()
            .any(|f| !matches!(f.residue, Residue::Leftover(_)));
        match upgrade_of.filter(|_| old_damaged) {
            Some(old) => {
                if let Some(record) = restored.features.get_mut(old) {
                    record.state = FeatureState::Installed;
                }
                self.state.replace(restored)?;
                self.persist()?;
                Err(FeatureError::UpgradeFailed {
                    feature: old.to_string(),
                    reason: format!("{}; rollback: {}", error, reasons),
                })
            }
            None => {
                warn!("Rollback incomplete: {}", reasons);
                self.state.replace(restored)?;
                self.persist()?;
                Err(error)
            }
        }
    }

    /// Install with the provisioning lock already held.
    pub(super) async fn install_locked(
        &self,
        features: &[FeatureRef],
        options: InstallOptions,
    ) -> Result<ProvisionReport> {
        let catalog = self.catalog()?;
        let before = self.state.snapshot()?;

        let mut required = before.required_ids();
        for reference in features {
            // An installed version that satisfies the reference wins over a newer one
            let id = match before.installed_matching(reference).first() {
                Some(record) => record.feature.id.clone(),
                None => catalog.resolve(reference)?.feature.id.clone(),
            };
            if !required.contains(&id) {
                required.push(id);
            }
        }

        let installed = before.installed_ids();
        let plan = self.plan(&catalog, before, required, installed)?;
        self.apply(plan, options.into(), None).await
    }

    #[tracing::instrument(skip(self, subject, options))]
    pub async fn install(
        &self,
        subject: &Subject,
        features: &[FeatureRef],
        options: InstallOptions,
    ) -> Result<ProvisionReport> {
        self.authorize(subject, "install features")?;
        let _guard = self.provisioning.lock().await;
        let report = self.install_locked(features, options).await?;
        info!("Installed {} feature(s)", report.installed.len());
        Ok(report)
    }

    #[tracing::instrument(skip(self, subject, options))]
    pub async fn uninstall(
        &self,
        subject: &Subject,
        feature: &FeatureRef,
        options: UninstallOptions,
    ) -> Result<ProvisionReport> {
        self.authorize(subject, "uninstall features")?;
        let _guard = self.provisioning.lock().await;

        let catalog = self.catalog()?;
        let before = self.state.snapshot()?;

        let (id, required_flag) = match before.installed_matching(feature).as_slice() {
            [] => {
                return Err(FeatureError::not_found(format!(
                    "Feature {} is not installed",
                    feature
                )));
            }
            [record] => (record.feature.id.clone(), record.required),
            many => {
                return Err(FeatureError::AmbiguousFeature {
                    name: feature.name.clone(),
                    versions: many
                        .iter()
                        .map(|r| r.feature.id.version.to_string())
                        .collect(),
                });
            }
        };

        if !required_flag {
            let required = before.required_ids();
            let users: Vec<String> = dependents_closure(&before, &BTreeSet::from([id.clone()]))
                .into_iter()
                .filter(|d| d != &id && required.contains(d))
                .map(|d| d.to_string())
                .collect();
            if !users.is_empty() {
                return Err(FeatureError::InUse {
                    target: id.to_string(),
                    users,
                });
            }
        }

        let required: Vec<FeatureId> = before
            .required_ids()
            .into_iter()
            .filter(|r| r != &id)
            .collect();
        let installed = before.installed_ids();
        let plan = self.plan(&catalog, before, required, installed)?;
        if plan.resolution.contains(&id) {
            debug!("{} is still needed by other features and stays installed", id);
        }
        let report = self.apply(plan, options.into(), None).await?;
        info!("Uninstalled {} feature(s)", report.uninstalled.len());
        Ok(report)
    }

    /// Replace the installed version of a feature with the one `feature` resolves to.
    #[tracing::instrument(skip(self, subject, options))]
    pub async fn upgrade(
        &self,
        subject: &Subject,
        feature: &FeatureRef,
        options: InstallOptions,
    ) -> Result<ProvisionReport> {
        self.authorize(subject, "upgrade features")?;
        let _guard = self.provisioning.lock().await;

        let catalog = self.catalog()?;
        let before = self.state.snapshot()?;
        let target = catalog.resolve(feature)?.feature.id.clone();

        let current: Vec<FeatureId> = before
            .installed()
            .filter(|r| r.feature.id.name == target.name)
            .map(|r| r.feature.id.clone())
            .collect();
        if current.contains(&target) {
            info!("{} is already installed", target);
            return Ok(ProvisionReport::default());
        }
        let previous = match current.as_slice() {
            [] => {
                debug!("{} is not installed, installing {}", target.name, target);
                let reference = FeatureRef::exact(target.name.clone(), target.version.as_str());
                return self.install_locked(&[reference], options).await;
            }
            [one] => one.clone(),
            many => {
                return Err(FeatureError::AmbiguousFeature {
                    name: target.name.clone(),
                    versions: many.iter().map(|id| id.version.to_string()).collect(),
                });
            }
        };

        info!("Upgrading {} to {}", previous, target);
        let mut required: Vec<FeatureId> = before
            .required_ids()
            .into_iter()
            .filter(|id| id != &previous)
            .collect();
        required.push(target);
        let mut installed = before.installed_ids();
        installed.remove(&previous);

        let plan = self.plan(&catalog, before, required, installed)?;
        self.apply(plan, options.into(), Some(&previous)).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::fixtures::{TestEngine, admin, guest, id};
    use crate::module::ModuleEvent;

    const STANDARD: &str = r#"{
        "name": "standard",
        "features": [
            {"name": "shell", "version": "1.0", "modules": ["m:shell", "m:common"]},
            {"name": "ssh", "version": "1.0", "features": ["shell"], "modules": ["m:ssh", "m:common"],
             "configs": [{"pid": "org.example.ssh", "properties": {"port": "8101"}}]},
            {"name": "web", "version": "1.0", "modules": ["m:web-1", "m:http"]},
            {"name": "web", "version": "2.0", "modules": ["m:web-2", "m:http"]},
            {"name": "console", "version": "1.0", "features": ["web/[1.0,2.0)"], "modules": ["m:console"]},
            {"name": "loop-a", "version": "1.0", "features": ["loop-b"]},
            {"name": "loop-b", "version": "1.0", "features": ["loop-a"]},
            {"name": "broken", "version": "1.0", "features": ["missing"]}
        ]
    }"#;

    async fn engine() -> TestEngine {
        let engine = TestEngine::new();
        engine.descriptor("memory:standard", STANDARD);
        engine.add("memory:standard").await;
        engine
    }

    fn refs(items: &[&str]) -> Vec<FeatureRef> {
        items.iter().map(|s| s.parse().unwrap()).collect()
    }

    #[tokio::test]
    async fn test_install_pulls_in_dependencies_in_order() {
        let t = engine().await;

        let report = t
            .engine
            .install(&admin(), &refs(&["ssh"]), InstallOptions::default())
            .await
            .unwrap();

        assert_eq!(report.installed, vec![id("shell/1.0"), id("ssh/1.0")]);
        assert_eq!(t.state_of("ssh/1.0"), FeatureState::Started);
        assert_eq!(t.state_of("shell/1.0"), FeatureState::Started);
        assert!(t.record("ssh/1.0").required);
        assert!(!t.record("shell/1.0").required);

        // Shared module is installed exactly once, before anything starts
        assert_eq!(t.modules.install_count("m:common"), 1);
        let events = t.modules.events();
        let last_install = events
            .iter()
            .rposition(|e| matches!(e, ModuleEvent::Install(_)))
            .unwrap();
        let first_start = events
            .iter()
            .position(|e| matches!(e, ModuleEvent::Start(_)))
            .unwrap();
        assert!(last_install < first_start);
        assert!(matches!(events.last(), Some(ModuleEvent::Refresh(_))));

        assert!(t.engine.config_exists("org.example.ssh"));
    }

    #[tokio::test]
    async fn test_no_auto_refresh() {
        let t = engine().await;
        t.engine
            .install(
                &admin(),
                &refs(&["shell"]),
                InstallOptions {
                    no_auto_refresh: true,
                    verbose: true,
                },
            )
            .await
            .unwrap();
        assert!(
            !t.modules
                .events()
                .iter()
                .any(|e| matches!(e, ModuleEvent::Refresh(_)))
        );
    }

    #[tokio::test]
    async fn test_reinstall_marks_required_and_is_otherwise_a_no_op() {
        let t = engine().await;
        t.engine
            .install(&admin(), &refs(&["ssh"]), InstallOptions::default())
            .await
            .unwrap();
        let events = t.modules.events().len();

        let report = t
            .engine
            .install(&admin(), &refs(&["shell"]), InstallOptions::default())
            .await
            .unwrap();

        assert!(report.is_empty());
        assert!(t.record("shell/1.0").required);
        assert_eq!(t.modules.events().len(), events);
    }

    #[tokio::test]
    async fn test_resolution_errors_have_no_side_effects() {
        let t = engine().await;

        let cycle = t
            .engine
            .install(&admin(), &refs(&["loop-a"]), InstallOptions::default())
            .await
            .unwrap_err();
        assert!(matches!(cycle, FeatureError::CyclicDependency { .. }));

        let missing = t
            .engine
            .install(&admin(), &refs(&["broken"]), InstallOptions::default())
            .await
            .unwrap_err();
        assert!(matches!(missing, FeatureError::NotFound(_)));

        let unknown = t
            .engine
            .install(&admin(), &refs(&["nope"]), InstallOptions::default())
            .await
            .unwrap_err();
        assert!(matches!(unknown, FeatureError::NotFound(_)));

        assert!(t.modules.events().is_empty());
        assert!(t.engine.state().snapshot().unwrap().features.is_empty());
    }

    #[tokio::test]
    async fn test_conflicting_versions_are_rejected() {
        let t = engine().await;
        t.engine
            .install(&admin(), &refs(&["web/2.0"]), InstallOptions::default())
            .await
            .unwrap();

        let err = t
            .engine
            .install(&admin(), &refs(&["console"]), InstallOptions::default())
            .await
            .unwrap_err();
        assert!(matches!(err, FeatureError::VersionConflict { ref name, .. } if name == "web"));
        assert_eq!(t.state_of("console/1.0"), FeatureState::Uninstalled);
    }

    #[test_log::test(tokio::test)]
    async fn test_failed_start_rolls_back_everything() {
        let t = engine().await;
        t.modules.fail_start("m:ssh");

        let err = t
            .engine
            .install(&admin(), &refs(&["ssh"]), InstallOptions::default())
            .await
            .unwrap_err();

        match err {
            FeatureError::Activation { module, .. } => assert_eq!(module, "m:ssh"),
            other => panic!("Expected Activation, got {other:?}"),
        }
        assert!(t.modules.modules().is_empty());
        assert!(!t.engine.config_exists("org.example.ssh"));
        assert!(t.engine.state().snapshot().unwrap().features.is_empty());
    }

    #[tokio::test]
    async fn test_module_stuck_during_rollback_stays_tracked_until_reclaimed() {
        let t = engine().await;
        t.modules.fail_start("m:ssh");
        t.modules.fail_uninstall("m:shell");

        let err = t
            .engine
            .install(&admin(), &refs(&["ssh"]), InstallOptions::default())
            .await
            .unwrap_err();
        assert!(matches!(err, FeatureError::Activation { .. }));

        assert_eq!(
            t.modules.modules().into_iter().collect::<Vec<_>>(),
            vec![(ModuleRef::new("m:shell"), ModuleState::Installed)]
        );
        let tracked = t.engine.state().snapshot().unwrap();
        assert!(tracked.features.is_empty());
        let record = &tracked.modules[&ModuleRef::new("m:shell")];
        assert_eq!(record.state, ModuleState::Installed);
        assert!(record.owners.is_empty());

        // The next run removes the unowned module
        t.modules.clear_failures();
        t.engine
            .install(&admin(), &refs(&["web/1.0"]), InstallOptions::default())
            .await
            .unwrap();
        assert_eq!(t.modules.state("m:shell"), None);
        assert!(
            !t.engine
                .state()
                .snapshot()
                .unwrap()
                .modules
                .contains_key(&ModuleRef::new("m:shell"))
        );
    }

    #[tokio::test]
    async fn test_module_that_cannot_be_uninstalled_stays_tracked() {
        let t = engine().await;
        t.engine
            .install(&admin(), &refs(&["web/1.0"]), InstallOptions::default())
            .await
            .unwrap();
        t.modules.fail_uninstall("m:http");

        t.engine
            .uninstall(&admin(), &"web".parse().unwrap(), UninstallOptions::default())
            .await
            .unwrap();

        assert_eq!(t.modules.state("m:http"), Some(ModuleState::Installed));
        let tracked = t.engine.state().snapshot().unwrap();
        assert!(tracked.modules[&ModuleRef::new("m:http")].owners.is_empty());
        assert!(!tracked.modules.contains_key(&ModuleRef::new("m:web-1")));
    }

    #[tokio::test]
    async fn test_failed_install_leaves_existing_features_running() {
        let t = engine().await;
        t.engine
            .install(&admin(), &refs(&["shell"]), InstallOptions::default())
            .await
            .unwrap();
        t.modules.fail_install("m:ssh");

        assert!(
            t.engine
                .install(&admin(), &refs(&["ssh"]), InstallOptions::default())
                .await
                .is_err()
        );
        assert_eq!(t.state_of("shell/1.0"), FeatureState::Started);
        assert_eq!(t.modules.state("m:common"), Some(ModuleState::Started));
        assert_eq!(t.state_of("ssh/1.0"), FeatureState::Uninstalled);
    }

    #[tokio::test]
    async fn test_uninstall_tears_down_unreferenced_modules_only() {
        let t = engine().await;
        t.engine
            .install(&admin(), &refs(&["ssh", "shell"]), InstallOptions::default())
            .await
            .unwrap();

        let report = t
            .engine
            .uninstall(&admin(), &"ssh".parse().unwrap(), UninstallOptions::default())
            .await
            .unwrap();

        assert_eq!(report.uninstalled, vec![id("ssh/1.0")]);
        assert_eq!(report.stopped_modules, vec![ModuleRef::new("m:ssh")]);
        assert_eq!(t.modules.state("m:common"), Some(ModuleState::Started));
        assert_eq!(t.state_of("shell/1.0"), FeatureState::Started);
        assert_eq!(t.state_of("ssh/1.0"), FeatureState::Uninstalled);
        // Configuration is retained by default
        assert!(t.engine.config_exists("org.example.ssh"));
    }

    #[tokio::test]
    async fn test_uninstall_drops_unneeded_dependencies_and_config_on_request() {
        let t = engine().await;
        t.engine
            .install(&admin(), &refs(&["ssh"]), InstallOptions::default())
            .await
            .unwrap();

        let report = t
            .engine
            .uninstall(
                &admin(),
                &"ssh".parse().unwrap(),
                UninstallOptions {
                    no_auto_refresh: false,
                    delete_config: true,
                },
            )
            .await
            .unwrap();

        assert_eq!(report.uninstalled, vec![id("ssh/1.0"), id("shell/1.0")]);
        assert!(t.modules.modules().is_empty());
        assert!(!t.engine.config_exists("org.example.ssh"));
    }

    #[tokio::test]
    async fn test_uninstall_dependency_is_in_use() {
        let t = engine().await;
        t.engine
            .install(&admin(), &refs(&["ssh"]), InstallOptions::default())
            .await
            .unwrap();

        match t
            .engine
            .uninstall(&admin(), &"shell".parse().unwrap(), UninstallOptions::default())
            .await
        {
            Err(FeatureError::InUse { target, users }) => {
                assert_eq!(target, "shell/1.0");
                assert_eq!(users, vec!["ssh/1.0"]);
            }
            other => panic!("Expected InUse, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_uninstall_not_installed_is_not_found() {
        let t = engine().await;
        assert!(matches!(
            t.engine
                .uninstall(&admin(), &"ssh".parse().unwrap(), UninstallOptions::default())
                .await,
            Err(FeatureError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_ambiguous_uninstall_with_side_by_side() {
        let t = TestEngine::with_options(|o| o.allow_side_by_side = true);
        t.descriptor("memory:standard", STANDARD);
        t.add("memory:standard").await;
        t.engine
            .install(&admin(), &refs(&["web/1.0", "web/2.0"]), InstallOptions::default())
            .await
            .unwrap();

        assert!(matches!(
            t.engine
                .uninstall(&admin(), &"web".parse().unwrap(), UninstallOptions::default())
                .await,
            Err(FeatureError::AmbiguousFeature { .. })
        ));
        t.engine
            .uninstall(&admin(), &"web/1.0".parse().unwrap(), UninstallOptions::default())
            .await
            .unwrap();
        assert_eq!(t.state_of("web/2.0"), FeatureState::Started);
        assert_eq!(t.modules.state("m:http"), Some(ModuleState::Started));
        assert_eq!(t.modules.state("m:web-1"), None);
    }

    #[tokio::test]
    async fn test_dropped_records_when_not_retained() {
        let t = TestEngine::with_options(|o| o.retain_uninstalled_records = false);
        t.descriptor("memory:standard", STANDARD);
        t.add("memory:standard").await;
        t.engine
            .install(&admin(), &refs(&["shell"]), InstallOptions::default())
            .await
            .unwrap();
        t.engine
            .uninstall(&admin(), &"shell".parse().unwrap(), UninstallOptions::default())
            .await
            .unwrap();
        assert!(t.engine.state().snapshot().unwrap().features.is_empty());
    }

    #[tokio::test]
    async fn test_upgrade_swaps_modules_and_keeps_shared_ones() {
        let t = engine().await;
        t.engine
            .install(&admin(), &refs(&["web/1.0"]), InstallOptions::default())
            .await
            .unwrap();

        let report = t
            .engine
            .upgrade(&admin(), &"web".parse().unwrap(), InstallOptions::default())
            .await
            .unwrap();

        assert_eq!(report.installed, vec![id("web/2.0")]);
        assert_eq!(report.uninstalled, vec![id("web/1.0")]);
        assert_eq!(t.state_of("web/2.0"), FeatureState::Started);
        assert!(t.record("web/2.0").required);
        assert_eq!(t.modules.state("m:web-1"), None);
        assert_eq!(t.modules.state("m:web-2"), Some(ModuleState::Started));
        assert_eq!(t.modules.install_count("m:http"), 1);

        // Old modules go before new ones come
        let events = t.modules.events();
        let stop_old = events
            .iter()
            .position(|e| *e == ModuleEvent::Stop(ModuleRef::new("m:web-1")))
            .unwrap();
        let install_new = events
            .iter()
            .position(|e| *e == ModuleEvent::Install(ModuleRef::new("m:web-2")))
            .unwrap();
        assert!(stop_old < install_new);
    }

    #[tokio::test]
    async fn test_upgrade_same_version_is_a_no_op_and_missing_installs() {
        let t = engine().await;
        let report = t
            .engine
            .upgrade(&admin(), &"web/1.0".parse().unwrap(), InstallOptions::default())
            .await
            .unwrap();
        assert_eq!(report.installed, vec![id("web/1.0")]);

        let again = t
            .engine
            .upgrade(&admin(), &"web/1.0".parse().unwrap(), InstallOptions::default())
            .await
            .unwrap();
        assert!(again.is_empty());
    }

    #[tokio::test]
    async fn test_failed_upgrade_restores_old_version() {
        let t = engine().await;
        t.engine
            .install(&admin(), &refs(&["web/1.0"]), InstallOptions::default())
            .await
            .unwrap();
        t.modules.fail_start("m:web-2");

        let err = t
            .engine
            .upgrade(&admin(), &"web/2.0".parse().unwrap(), InstallOptions::default())
            .await
            .unwrap_err();

        assert!(matches!(err, FeatureError::Activation { .. }));
        assert_eq!(t.state_of("web/1.0"), FeatureState::Started);
        assert_eq!(t.state_of("web/2.0"), FeatureState::Uninstalled);
        assert_eq!(t.modules.state("m:web-1"), Some(ModuleState::Started));
        assert_eq!(t.modules.state("m:web-2"), None);
    }

    #[test_log::test(tokio::test)]
    async fn test_failed_upgrade_rollback_leaves_old_installed() {
        let t = engine().await;
        t.engine
            .install(&admin(), &refs(&["web/1.0"]), InstallOptions::default())
            .await
            .unwrap();
        t.modules.fail_start("m:web-2");
        t.modules.fail_start("m:web-1");

        let err = t
            .engine
            .upgrade(&admin(), &"web/2.0".parse().unwrap(), InstallOptions::default())
            .await
            .unwrap_err();

        match err {
            FeatureError::UpgradeFailed { feature, .. } => assert_eq!(feature, "web/1.0"),
            other => panic!("Expected UpgradeFailed, got {other:?}"),
        }
        assert_eq!(t.state_of("web/1.0"), FeatureState::Installed);
        let state = t.engine.state().snapshot().unwrap();
        assert_eq!(
            state.modules[&ModuleRef::new("m:web-1")].state,
            ModuleState::Installed
        );

        // Once the module behaves, installing again brings it back up
        t.modules.clear_failures();
        t.engine
            .install(&admin(), &refs(&["web/1.0"]), InstallOptions::default())
            .await
            .unwrap();
        assert_eq!(t.modules.state("m:web-1"), Some(ModuleState::Started));
    }

    #[tokio::test]
    async fn test_unauthorized_subject_changes_nothing() {
        let t = engine().await;
        let err = t
            .engine
            .install(&guest(), &refs(&["ssh"]), InstallOptions::default())
            .await
            .unwrap_err();
        assert!(matches!(err, FeatureError::Authorization { .. }));
        assert!(t.modules.events().is_empty());

        assert!(matches!(
            t.engine
                .upgrade(&guest(), &"web".parse().unwrap(), InstallOptions::default())
                .await,
            Err(FeatureError::Authorization { .. })
        ));
        assert!(matches!(
            t.engine
                .uninstall(&guest(), &"web".parse().unwrap(), UninstallOptions::default())
                .await,
            Err(FeatureError::Authorization { .. })
        ));
    }

    #[tokio::test]
    async fn test_concurrent_installs_do_not_duplicate_modules() {
        let t = engine().await;
        let admin = admin();
        let ssh = refs(&["ssh"]);
        let shell = refs(&["shell"]);

        let (a, b) = tokio::join!(
            t.engine.install(&admin, &ssh, InstallOptions::default()),
            t.engine.install(&admin, &shell, InstallOptions::default()),
        );
        a.unwrap();
        b.unwrap();

        assert_eq!(t.modules.install_count("m:common"), 1);
        assert_eq!(t.modules.install_count("m:shell"), 1);
        assert!(t.record("shell/1.0").required);
    }

    #[test]
    fn test_dependents_closure_is_transitive() {
        let mut state = EngineState::default();
        for (name, deps) in [("a/1.0", vec!["b"]), ("b/1.0", vec!["c"]), ("c/1.0", vec![]), ("d/1.0", vec![])] {
            let feature = Feature {
                id: id(name),
                description: None,
                modules: vec![],
                dependencies: deps.iter().map(|d| d.parse().unwrap()).collect(),
                configs: vec![],
                boot: false,
            };
            let mut record = InstalledFeatureRecord::new(feature, None);
            record.state = FeatureState::Started;
            state.features.insert(id(name), record);
        }

        let closure = dependents_closure(&state, &BTreeSet::from([id("c/1.0")]));
        assert_eq!(closure, BTreeSet::from([id("a/1.0"), id("b/1.0"), id("c/1.0")]));
    }
}
