//! Dependency resolution.
//!
//! Expands a set of root features into their transitive closure, ordered so
//! that every feature comes after everything it depends on, and computes the
//! deduplicated set of modules the closure needs.

use std::collections::{BTreeMap, BTreeSet};

use log::debug;

use crate::error::{FeatureError, Result};
use crate::model::{Feature, FeatureId, FeatureRef, ModuleRef, Version};

/// Source of feature definitions for the resolver.
pub trait FeatureLookup {
    /// Definitions named `name`, highest version first.
    fn candidates(&self, name: &str) -> Vec<&Feature>;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct ResolverOptions {
    /// Allow two versions of the same feature in one closure
    pub allow_side_by_side: bool,
}

/// A module required by the closure, with every feature that declares it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlannedModule {
    pub module: ModuleRef,
    pub owners: BTreeSet<FeatureId>,
}

/// Result of resolving a set of roots.
#[derive(Debug, Clone, Default)]
pub struct Resolution {
    /// Dependencies first
    pub order: Vec<FeatureId>,
    pub definitions: BTreeMap<FeatureId, Feature>,
    /// Modules in first-declaration order over `order`
    pub modules: Vec<PlannedModule>,
    /// Direct dependency edges of each feature in the closure
    pub edges: BTreeMap<FeatureId, Vec<FeatureId>>,
}

impl Resolution {
    pub fn contains(&self, id: &FeatureId) -> bool {
        self.definitions.contains_key(id)
    }

    pub fn definition(&self, id: &FeatureId) -> Option<&Feature> {
        self.definitions.get(id)
    }

    pub fn owners(&self, module: &ModuleRef) -> Option<&BTreeSet<FeatureId>> {
        self.modules
            .iter()
            .find(|m| &m.module == module)
            .map(|m| &m.owners)
    }

    /// Features in the closure that directly depend on `id`.
    pub fn dependents(&self, id: &FeatureId) -> Vec<FeatureId> {
        self.edges
            .iter()
            .filter(|(_, deps)| deps.contains(id))
            .map(|(from, _)| from.clone())
            .collect()
    }
}

#[derive(Default)]
struct Walk {
    /// Current DFS path, for cycle reporting
    path: Vec<FeatureId>,
    done: BTreeSet<FeatureId>,
    selected: BTreeMap<String, BTreeSet<Version>>,
    resolution: Resolution,
}

pub struct DependencyResolver<'a, L: FeatureLookup> {
    lookup: &'a L,
    installed: &'a BTreeSet<FeatureId>,
    options: ResolverOptions,
}

impl<'a, L: FeatureLookup> DependencyResolver<'a, L> {
    pub fn new(lookup: &'a L, installed: &'a BTreeSet<FeatureId>, options: ResolverOptions) -> Self {
        Self {
            lookup,
            installed,
            options,
        }
    }

    /// Resolve the closure of `roots`.
    ///
    /// Dependency references pick, in order of preference: a version already
    /// selected in this closure, an installed version, the highest version.
    #[tracing::instrument(skip(self))]
    pub fn resolve(&self, roots: &[FeatureId]) -> Result<Resolution> {
        let mut walk = Walk::default();
        for root in roots {
            self.visit(root, &mut walk)?;
        }

        if !self.options.allow_side_by_side {
            if let Some((name, versions)) = walk.selected.iter().find(|(_, v)| v.len() > 1) {
                return Err(FeatureError::VersionConflict {
                    name: name.clone(),
                    versions: versions.iter().map(|v| v.to_string()).collect(),
                });
            }
        }

        let mut resolution = walk.resolution;
        let mut modules: Vec<PlannedModule> = Vec::new();
        for id in &resolution.order {
            let Some(feature) = resolution.definitions.get(id) else {
                continue;
            };
            for module in &feature.modules {
                match modules.iter_mut().find(|m| &m.module == module) {
                    Some(planned) => {
                        planned.owners.insert(id.clone());
                    }
                    None => modules.push(PlannedModule {
                        module: module.clone(),
                        owners: BTreeSet::from([id.clone()]),
                    }),
                }
            }
        }
        resolution.modules = modules;

        debug!(
            "Resolved {} feature(s), {} module(s)",
            resolution.order.len(),
            resolution.modules.len()
        );
        Ok(resolution)
    }

    fn definition(&self, id: &FeatureId) -> Result<&'a Feature> {
        self.lookup
            .candidates(&id.name)
            .into_iter()
            .find(|f| &f.id == id)
            .ok_or_else(|| FeatureError::not_found(format!("No matching features for {}", id)))
    }

    fn select(&self, from: &FeatureId, dep: &FeatureRef, walk: &Walk) -> Result<FeatureId> {
        let candidates: Vec<&Feature> = self
            .lookup
            .candidates(&dep.name)
            .into_iter()
            .filter(|f| dep.matches(&f.id))
            .collect();

        let already = walk.selected.get(&dep.name);
        let chosen = candidates
            .iter()
            .find(|f| already.is_some_and(|v| v.contains(&f.id.version)))
            .or_else(|| candidates.iter().find(|f| self.installed.contains(&f.id)))
            .or_else(|| candidates.first());

        chosen.map(|f| f.id.clone()).ok_or_else(|| {
            FeatureError::not_found(format!(
                "No matching features for {} (required by {})",
                dep, from
            ))
        })
    }

    fn visit(&self, id: &FeatureId, walk: &mut Walk) -> Result<()> {
        if walk.done.contains(id) {
            return Ok(());
        }
        if let Some(pos) = walk.path.iter().position(|p| p == id) {
            let mut cycle: Vec<String> = walk.path[pos..].iter().map(|p| p.to_string()).collect();
            cycle.push(id.to_string());
            return Err(FeatureError::CyclicDependency { cycle });
        }

        let feature = self.definition(id)?;
        walk.path.push(id.clone());
        walk.selected
            .entry(id.name.clone())
            .or_default()
            .insert(id.version.clone());

        let mut deps = Vec::with_capacity(feature.dependencies.len());
        for dep in &feature.dependencies {
            let dep_id = self.select(id, dep, walk)?;
            self.visit(&dep_id, walk)?;
            if !deps.contains(&dep_id) {
                deps.push(dep_id);
            }
        }

        walk.path.pop();
        walk.done.insert(id.clone());
        walk.resolution.order.push(id.clone());
        walk.resolution.edges.insert(id.clone(), deps);
        walk.resolution
            .definitions
            .insert(id.clone(), feature.clone());
        Ok(())
    }
}

/// Order installed definitions so that dependents come before their dependencies.
///
/// Used for teardown, where only the recorded definitions are available.
pub fn teardown_order(features: &[&Feature]) -> Vec<FeatureId> {
    fn visit(
        feature: &Feature,
        features: &[&Feature],
        seen: &mut BTreeSet<FeatureId>,
        out: &mut Vec<FeatureId>,
    ) {
        if !seen.insert(feature.id.clone()) {
            return;
        }
        for dep in &feature.dependencies {
            for target in features.iter().filter(|f| dep.matches(&f.id)) {
                visit(target, features, seen, out);
            }
        }
        out.push(feature.id.clone());
    }

    let mut seen = BTreeSet::new();
    let mut out = Vec::with_capacity(features.len());
    for feature in features {
        visit(feature, features, &mut seen, &mut out);
    }
    out.reverse();
    out
}
