//! Pool service trait and the space-accounting types it reports.

#![allow(missing_docs)]

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::core::errors::Result;
use crate::core::tier::Tier;

/// Identity of a created pool.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct PoolHandle {
    pub uuid: String,
    pub label: String,
    pub svc_ranks: Vec<u32>,
}

impl PoolHandle {
    /// Handle for a pool created outside the harness; only the UUID is known.
    #[must_use]
    pub fn existing(uuid: impl Into<String>) -> Self {
        let uuid = uuid.into();
        Self {
            label: uuid.clone(),
            uuid,
            svc_ranks: Vec::new(),
        }
    }
}

/// Opaque identifier of a writable allocation inside a pool.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[serde(transparent)]
pub struct ContainerHandle(String);

impl ContainerHandle {
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ContainerHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Requested pool size at creation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PoolSize {
    /// Everything the servers can give.
    Max,
    Bytes(u64),
}

impl PoolSize {
    /// `0` in config means "max".
    #[must_use]
    pub const fn from_config(size_bytes: u64) -> Self {
        if size_bytes == 0 {
            Self::Max
        } else {
            Self::Bytes(size_bytes)
        }
    }
}

/// Space accounting for one tier.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct TierUsage {
    pub total_bytes: u64,
    pub free_bytes: u64,
}

impl TierUsage {
    #[must_use]
    pub fn free_pct(&self) -> f64 {
        if self.total_bytes == 0 {
            return 0.0;
        }
        #[allow(clippy::cast_precision_loss)]
        {
            (self.free_bytes.min(self.total_bytes) as f64 * 100.0) / self.total_bytes as f64
        }
    }

    #[must_use]
    pub fn used_pct(&self) -> f64 {
        if self.total_bytes == 0 {
            return 0.0;
        }
        100.0 - self.free_pct()
    }

    #[must_use]
    pub const fn used_bytes(&self) -> u64 {
        self.total_bytes.saturating_sub(self.free_bytes)
    }
}

/// Per-tier capacity breakdown. Immutable once returned by a query.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct CapacityReport {
    tiers: BTreeMap<Tier, TierUsage>,
}

impl CapacityReport {
    #[must_use]
    pub fn from_tiers(tiers: impl IntoIterator<Item = (Tier, TierUsage)>) -> Self {
        Self {
            tiers: tiers.into_iter().collect(),
        }
    }

    #[must_use]
    pub fn usage(&self, tier: Tier) -> Option<TierUsage> {
        self.tiers.get(&tier).copied()
    }

    #[must_use]
    pub fn free_pct(&self, tier: Tier) -> Option<f64> {
        self.usage(tier).map(|u| u.free_pct())
    }

    #[must_use]
    pub fn used_pct(&self, tier: Tier) -> Option<f64> {
        self.usage(tier).map(|u| u.used_pct())
    }

    pub fn iter(&self) -> impl Iterator<Item = (Tier, TierUsage)> + '_ {
        self.tiers.iter().map(|(tier, usage)| (*tier, *usage))
    }
}

impl fmt::Display for CapacityReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut first = true;
        for (tier, usage) in self.iter() {
            if !first {
                f.write_str(", ")?;
            }
            first = false;
            write!(f, "{tier}: {:.1}% free", usage.free_pct())?;
        }
        Ok(())
    }
}

/// Pool and container management surface.
pub trait PoolService: Send + Sync {
    fn create_pool(&self, size: PoolSize) -> Result<PoolHandle>;
    fn set_property(&self, pool: &PoolHandle, name: &str, value: &str) -> Result<()>;
    fn query_space(&self, pool: &PoolHandle) -> Result<CapacityReport>;
    fn create_container(&self, pool: &PoolHandle) -> Result<ContainerHandle>;
    fn list_containers(&self, pool: &PoolHandle) -> Result<Vec<ContainerHandle>>;
    fn destroy_container(&self, pool: &PoolHandle, container: &ContainerHandle) -> Result<()>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn percentages_derive_from_bytes() {
        let usage = TierUsage {
            total_bytes: 1_000,
            free_bytes: 930,
        };
        assert!((usage.free_pct() - 93.0).abs() < 1e-9);
        assert!((usage.used_pct() - 7.0).abs() < 1e-9);
        assert_eq!(usage.used_bytes(), 70);
    }

    #[test]
    fn empty_tier_reports_zero() {
        let usage = TierUsage {
            total_bytes: 0,
            free_bytes: 0,
        };
        assert!(usage.free_pct().abs() < f64::EPSILON);
        assert!(usage.used_pct().abs() < f64::EPSILON);
    }

    #[test]
    fn report_lookup_and_display() {
        let report = CapacityReport::from_tiers([
            (
                Tier::Nvme,
                TierUsage {
                    total_bytes: 100,
                    free_bytes: 50,
                },
            ),
            (
                Tier::Scm,
                TierUsage {
                    total_bytes: 100,
                    free_bytes: 100,
                },
            ),
        ]);
        assert_eq!(report.free_pct(Tier::Scm), Some(100.0));
        assert_eq!(report.used_pct(Tier::Nvme), Some(50.0));
        assert_eq!(report.to_string(), "scm: 100.0% free, nvme: 50.0% free");
    }

    #[test]
    fn pool_size_zero_means_max() {
        assert_eq!(PoolSize::from_config(0), PoolSize::Max);
        assert_eq!(PoolSize::from_config(42), PoolSize::Bytes(42));
    }
}
