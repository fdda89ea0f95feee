use crate::error::{Result, WardenError};
use crate::process::role::WorkerRole;
use std::sync::Arc;

/// Ordered, append-only set of worker roles.
///
/// Registration order is spawn order; shutdown walks it in reverse.
#[derive(Debug, Default, Clone)]
pub struct ProcessRegistry {
    roles: Vec<Arc<WorkerRole>>,
}

impl ProcessRegistry {
    pub fn new() -> Self {
        Self { roles: Vec::new() }
    }

    /// Append a role. Fails without modifying the registry if the name is taken.
    pub fn register(&mut self, role: WorkerRole) -> Result<()> {
        if self.get(role.name()).is_some() {
            return Err(WardenError::DuplicateRole(role.name().to_string()));
        }

        tracing::debug!(role = role.name(), kind = %role.kind(), "Registered worker role");
        self.roles.push(Arc::new(role));
        Ok(())
    }

    /// All roles in registration order
    pub fn all_roles(&self) -> &[Arc<WorkerRole>] {
        &self.roles
    }

    /// Iterate the roles in registration order
    pub fn roles(&self) -> impl Iterator<Item = &WorkerRole> {
        self.roles.iter().map(|r| r.as_ref())
    }

    pub fn get(&self, name: &str) -> Option<&Arc<WorkerRole>> {
        self.roles.iter().find(|r| r.name() == name)
    }

    pub fn len(&self) -> usize {
        self.roles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.roles.is_empty()
    }
}
