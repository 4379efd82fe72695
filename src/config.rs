//! Process-wide tunables, read once at startup.
//!
//! The original reads these from a system-property store; that store is an
//! external collaborator here (out of scope), so we read the same keys from
//! the environment and fall back to the documented defaults otherwise.

use std::time::Duration;

/// The platform-defined privileged identity. Only callers with this
/// effective UID may invoke privileged admin/supervisor operations.
pub const SYSTEM_UID: u32 = 1000;

/// One of three deadline classes with a fixed response window.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Tier {
    Critical,
    Moderate,
    Normal,
}

impl Tier {
    pub const ALL: [Tier; 3] = [Tier::Critical, Tier::Moderate, Tier::Normal];

    /// Response window for this tier, including slack.
    pub fn timeout(self) -> Duration {
        match self {
            Tier::Critical => Duration::from_secs(3),
            Tier::Moderate => Duration::from_secs(5 + 1),
            Tier::Normal => Duration::from_secs(10 + 2),
        }
    }
}

/// Tunables loaded once at daemon startup into an immutable value.
#[derive(Debug, Clone, PartialEq)]
pub struct Tunables {
    /// N in per-UID rankings.
    pub top_n_per_category: usize,
    /// N in per-process rankings within a UID.
    pub top_n_per_subcategory: usize,
    /// Period during boot phase.
    pub boottime_collection_interval: Duration,
    /// Period during steady state.
    pub periodic_collection_interval: Duration,
    /// Max records retained in periodic mode.
    pub periodic_collection_buffer_size: usize,
}

impl Default for Tunables {
    fn default() -> Self {
        Self {
            top_n_per_category: 10,
            top_n_per_subcategory: 5,
            boottime_collection_interval: Duration::from_secs(1),
            periodic_collection_interval: Duration::from_secs(10),
            periodic_collection_buffer_size: 180,
        }
    }
}

impl Tunables {
    /// Reads tunables from the environment, falling back to defaults for
    /// any key that is absent or unparseable.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            top_n_per_category: env_usize(
                "VHEALTHD_TOP_N_CATEGORY",
                defaults.top_n_per_category,
            ),
            top_n_per_subcategory: env_usize(
                "VHEALTHD_TOP_N_SUBCATEGORY",
                defaults.top_n_per_subcategory,
            ),
            boottime_collection_interval: env_secs(
                "VHEALTHD_BOOTTIME_INTERVAL_SEC",
                defaults.boottime_collection_interval,
            ),
            periodic_collection_interval: env_secs(
                "VHEALTHD_PERIODIC_INTERVAL_SEC",
                defaults.periodic_collection_interval,
            ),
            periodic_collection_buffer_size: env_usize(
                "VHEALTHD_PERIODIC_BUFFER_SIZE",
                defaults.periodic_collection_buffer_size,
            ),
        }
    }
}

fn env_usize(key: &str, default: usize) -> usize {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn env_secs(key: &str, default: Duration) -> Duration {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .map(Duration::from_secs)
        .unwrap_or(default)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_documented_values() {
        let t = Tunables::default();
        assert_eq!(t.top_n_per_category, 10);
        assert_eq!(t.top_n_per_subcategory, 5);
        assert_eq!(t.boottime_collection_interval, Duration::from_secs(1));
        assert_eq!(t.periodic_collection_interval, Duration::from_secs(10));
        assert_eq!(t.periodic_collection_buffer_size, 180);
    }

    #[test]
    fn tier_timeouts_include_slack() {
        assert_eq!(Tier::Critical.timeout(), Duration::from_secs(3));
        assert_eq!(Tier::Moderate.timeout(), Duration::from_secs(6));
        assert_eq!(Tier::Normal.timeout(), Duration::from_secs(12));
    }
}
