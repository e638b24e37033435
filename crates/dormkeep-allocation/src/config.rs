//! Engine configuration.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Tunables for an [`AllocationEngine`](crate::AllocationEngine).
///
/// Start from `EngineConfig::default()` and override what you need:
///
/// ```rust
/// use std::time::Duration;
/// use dormkeep_allocation::EngineConfig;
///
/// let config = EngineConfig {
///     lock_timeout: Duration::from_millis(500),
///     ..EngineConfig::default()
/// };
/// assert_eq!(config.notify_capacity, 256);
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Upper bound on how long one operation waits for its locks,
    /// including re-planning rounds. Expiry yields
    /// [`AllocationError::Busy`](crate::AllocationError::Busy).
    pub lock_timeout: Duration,

    /// Buffer size for a [`BroadcastNotifier`](crate::BroadcastNotifier)
    /// built from this config. Slow observers that fall further behind
    /// than this skip ahead.
    pub notify_capacity: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            lock_timeout: Duration::from_secs(3),
            notify_capacity: 256,
        }
    }
}

impl EngineConfig {
    /// Shortest accepted lock timeout.
    pub const MIN_LOCK_TIMEOUT: Duration = Duration::from_millis(1);

    /// Clamp out-of-range values so the config is safe to use.
    ///
    /// Called by the engine constructors. A zero lock timeout would make
    /// every contended operation fail instantly, and a zero-capacity
    /// broadcast channel panics on creation.
    pub fn validated(mut self) -> Self {
        if self.lock_timeout < Self::MIN_LOCK_TIMEOUT {
            tracing::warn!(
                lock_timeout_ms = self.lock_timeout.as_millis() as u64,
                "lock_timeout below minimum, clamping"
            );
            self.lock_timeout = Self::MIN_LOCK_TIMEOUT;
        }
        if self.notify_capacity == 0 {
            tracing::warn!("notify_capacity of 0, using 1");
            self.notify_capacity = 1;
        }
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_engine_config_default() {
        let config = EngineConfig::default();
        assert_eq!(config.lock_timeout, Duration::from_secs(3));
        assert_eq!(config.notify_capacity, 256);
    }

    #[test]
    fn test_validated_clamps_zero_values() {
        let config = EngineConfig {
            lock_timeout: Duration::ZERO,
            notify_capacity: 0,
        }
        .validated();
        assert_eq!(config.lock_timeout, EngineConfig::MIN_LOCK_TIMEOUT);
        assert_eq!(config.notify_capacity, 1);
    }

    #[test]
    fn test_validated_keeps_sane_values() {
        let config = EngineConfig {
            lock_timeout: Duration::from_millis(250),
            notify_capacity: 16,
        }
        .validated();
        assert_eq!(config.lock_timeout, Duration::from_millis(250));
        assert_eq!(config.notify_capacity, 16);
    }
}
