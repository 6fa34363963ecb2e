//! Capacity probe: per-tier usage of one pool.

#![allow(missing_docs)]

use std::sync::Arc;

use crate::cluster::pool::{CapacityReport, PoolHandle, PoolService, TierUsage};
use crate::core::errors::{PxhError, Result};
use crate::core::tier::Tier;

/// Read-only view of one pool's space accounting.
///
/// Every call goes to the pool service; nothing is cached, because the
/// protocol's decisions depend on the state right after teardown.
#[derive(Clone)]
pub struct CapacityProbe {
    service: Arc<dyn PoolService>,
    pool: PoolHandle,
}

impl CapacityProbe {
    #[must_use]
    pub fn new(service: Arc<dyn PoolService>, pool: PoolHandle) -> Self {
        Self { service, pool }
    }

    #[must_use]
    pub fn pool(&self) -> &PoolHandle {
        &self.pool
    }

    pub fn usage(&self) -> Result<CapacityReport> {
        self.service.query_space(&self.pool)
    }

    /// Usage of a single tier; a tier missing from the report is fatal.
    pub fn tier_usage(&self, tier: Tier) -> Result<TierUsage> {
        self.usage()?
            .usage(tier)
            .ok_or_else(|| PxhError::PoolUnreachable {
                details: format!("pool {} reported no {tier} tier", self.pool.uuid),
            })
    }

    pub fn free_pct(&self, tier: Tier) -> Result<f64> {
        self.tier_usage(tier).map(|usage| usage.free_pct())
    }
}
