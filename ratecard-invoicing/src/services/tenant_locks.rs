//! Per-tenant mutual exclusion for invoice-number assignment.

use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::{Mutex, OwnedMutexGuard};
use uuid::Uuid;

/// One async mutex per tenant, created on first use.
#[derive(Clone, Default)]
pub struct TenantLocks {
    locks: Arc<DashMap<Uuid, Arc<Mutex<()>>>>,
}

impl TenantLocks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Wait for exclusive access to `tenant_id`'s numbering sequence.
    /// Released when the guard drops.
    pub async fn lock(&self, tenant_id: Uuid) -> OwnedMutexGuard<()> {
        let mutex = self
            .locks
            .entry(tenant_id)
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone();
        mutex.lock_owned().await
    }
}
