//! Module runtime abstraction.
//!
//! The engine never loads code itself. It drives an external runtime that
//! installs, starts, stops and uninstalls modules by reference.

mod memory;

use anyhow::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::model::ModuleRef;

pub use memory::{InMemoryModuleRuntime, ModuleEvent};

/// What the runtime knows about a module.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ModuleState {
    Installed,
    Started,
}

impl fmt::Display for ModuleState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ModuleState::Installed => f.write_str("Installed"),
            ModuleState::Started => f.write_str("Started"),
        }
    }
}

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ModuleRuntime: Send + Sync {
    async fn install(&self, module: &ModuleRef) -> Result<()>;
    async fn start(&self, module: &ModuleRef) -> Result<()>;
    async fn stop(&self, module: &ModuleRef) -> Result<()>;
    async fn uninstall(&self, module: &ModuleRef) -> Result<()>;

    /// Re-wire modules after their dependencies changed.
    async fn refresh(&self, modules: &[ModuleRef]) -> Result<()>;
}
