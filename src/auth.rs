//! Callers of mutating operations.

use std::collections::BTreeSet;

use crate::error::{FeatureError, Result};

pub const DEFAULT_ADMIN_ROLE: &str = "admin";

/// An authenticated caller and its roles.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Subject {
    name: String,
    roles: BTreeSet<String>,
}

impl Subject {
    pub fn new<I, S>(name: impl Into<String>, roles: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            name: name.into(),
            roles: roles.into_iter().map(Into::into).collect(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn has_role(&self, role: &str) -> bool {
        self.roles.contains(role)
    }

    /// Fail with [`FeatureError::Authorization`] unless the subject holds `role`.
    pub fn require(&self, role: &str, operation: &str) -> Result<()> {
        if self.has_role(role) {
            Ok(())
        } else {
            Err(FeatureError::Authorization {
                subject: self.name.clone(),
                operation: operation.to_string(),
            })
        }
    }
}
