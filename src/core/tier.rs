//! Storage tiers within a pool.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::core::errors::PxhError;

/// A storage class within a pool.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Tier {
    /// Byte-addressable persistent memory.
    Scm,
    /// Block-based flash.
    Nvme,
}

impl Tier {
    /// Every tier, in reporting order.
    pub const ALL: [Self; 2] = [Self::Scm, Self::Nvme];

    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Scm => "scm",
            Self::Nvme => "nvme",
        }
    }
}

impl fmt::Display for Tier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Tier {
    type Err = PxhError;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "scm" | "pmem" => Ok(Self::Scm),
            "nvme" | "ssd" => Ok(Self::Nvme),
            other => Err(PxhError::InvalidArgument {
                details: format!("unknown tier {other:?} (expected scm or nvme)"),
            }),
        }
    }
}
