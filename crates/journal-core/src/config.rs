//! Sizing and policy configuration for a journal instance.
//!
//! Built with [`JournalConfigBuilder`], the same fluent-builder-with-validated-
//! `build()` shape as the rest of the array's configuration surface, rather
//! than a struct literal with public fields: the divisibility invariants
//! below must hold before any [`crate::log_buffer::LogBuffer`] is constructed.

use thiserror::Error;

/// Whether checkpoints are driven automatically as groups fill, or only on
/// explicit request (used by tests that want to control checkpoint timing
/// precisely).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CheckpointPolicy {
    Auto,
    Manual,
}

/// Validated sizing for a journal instance.
///
/// Construct via [`JournalConfigBuilder`]; there is no public constructor on
/// this type itself; doing so would make it possible to smuggle in an
/// un-validated combination of sizes.
#[derive(Debug, Clone, Copy)]
pub struct JournalConfig {
    journal_enabled:    bool,
    log_buffer_size:    u64,
    meta_page_size:     u32,
    num_log_groups:     u32,
    blocks_per_stripe:  u32,
    checkpoint_policy:  CheckpointPolicy,
}

impl JournalConfig {
    #[must_use]
    pub fn journal_enabled(&self) -> bool {
        self.journal_enabled
    }

    #[must_use]
    pub fn log_buffer_size(&self) -> u64 {
        self.log_buffer_size
    }

    #[must_use]
    pub fn meta_page_size(&self) -> u32 {
        self.meta_page_size
    }

    #[must_use]
    pub fn num_log_groups(&self) -> u32 {
        self.num_log_groups
    }

    /// `blocks_per_stripe`: the width of a write-buffer stripe, used by the
    /// replay engine to tell a saturated (fully-written) active-WB stripe
    /// apart from a partial one (spec §3, active WB stripe tail invariant).
    #[must_use]
    pub fn blocks_per_stripe(&self) -> u32 {
        self.blocks_per_stripe
    }

    #[must_use]
    pub fn checkpoint_policy(&self) -> CheckpointPolicy {
        self.checkpoint_policy
    }

    /// The size, in bytes, of a single log group: `log_buffer_size / num_log_groups`.
    #[must_use]
    pub fn log_group_size(&self) -> u64 {
        self.log_buffer_size / u64::from(self.num_log_groups)
    }
}

/// Builds and validates a [`JournalConfig`].
#[derive(Debug, Clone)]
pub struct JournalConfigBuilder {
    journal_enabled:   bool,
    log_buffer_size:   u64,
    meta_page_size:    u32,
    num_log_groups:    u32,
    blocks_per_stripe: u32,
    checkpoint_policy: CheckpointPolicy,
}

impl JournalConfigBuilder {
    #[must_use]
    pub fn new() -> Self {
        Self {
            journal_enabled:   true,
            log_buffer_size:   16 << 20,
            meta_page_size:    4096,
            num_log_groups:    8,
            blocks_per_stripe: 128,
            checkpoint_policy: CheckpointPolicy::Auto,
        }
    }

    #[must_use]
    pub fn journal_enabled(mut self, enabled: bool) -> Self {
        self.journal_enabled = enabled;
        self
    }

    #[must_use]
    pub fn log_buffer_size(mut self, bytes: u64) -> Self {
        self.log_buffer_size = bytes;
        self
    }

    #[must_use]
    pub fn meta_page_size(mut self, bytes: u32) -> Self {
        self.meta_page_size = bytes;
        self
    }

    #[must_use]
    pub fn num_log_groups(mut self, count: u32) -> Self {
        self.num_log_groups = count;
        self
    }

    #[must_use]
    pub fn blocks_per_stripe(mut self, blocks: u32) -> Self {
        self.blocks_per_stripe = blocks;
        self
    }

    #[must_use]
    pub fn checkpoint_policy(mut self, policy: CheckpointPolicy) -> Self {
        self.checkpoint_policy = policy;
        self
    }

    /// Validates the configured sizes and produces a [`JournalConfig`].
    ///
    /// # Errors
    /// Returns [`ConfigError::NotDivisible`] if `log_buffer_size` is not a
    /// multiple of `num_log_groups`, or if the resulting log-group size is not
    /// a multiple of `meta_page_size` (spec §6).
    pub fn build(self) -> Result<JournalConfig, ConfigError> {
        if self.num_log_groups == 0 {
            return Err(ConfigError::ZeroLogGroups);
        }
        if self.meta_page_size == 0 {
            return Err(ConfigError::ZeroMetaPageSize);
        }
        if self.blocks_per_stripe == 0 {
            return Err(ConfigError::ZeroBlocksPerStripe);
        }
        if self.log_buffer_size % u64::from(self.num_log_groups) != 0 {
            return Err(ConfigError::NotDivisible {
                log_buffer_size: self.log_buffer_size,
                num_log_groups:  self.num_log_groups,
            });
        }

        let log_group_size = self.log_buffer_size / u64::from(self.num_log_groups);
        if log_group_size % u64::from(self.meta_page_size) != 0 {
            return Err(ConfigError::GroupNotPageAligned {
                log_group_size,
                meta_page_size: self.meta_page_size,
            });
        }

        Ok(JournalConfig {
            journal_enabled:   self.journal_enabled,
            log_buffer_size:   self.log_buffer_size,
            meta_page_size:    self.meta_page_size,
            num_log_groups:    self.num_log_groups,
            blocks_per_stripe: self.blocks_per_stripe,
            checkpoint_policy: self.checkpoint_policy,
        })
    }
}

impl Default for JournalConfigBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// A [`JournalConfigBuilder`] produced a combination of sizes that violates
/// spec §6's alignment invariants.
#[derive(Debug, Clone, Copy, Error)]
pub enum ConfigError {
    #[error("num_log_groups must be nonzero")]
    ZeroLogGroups,
    #[error("meta_page_size must be nonzero")]
    ZeroMetaPageSize,
    #[error("blocks_per_stripe must be nonzero")]
    ZeroBlocksPerStripe,
    #[error("log_buffer_size ({log_buffer_size}) is not a multiple of num_log_groups ({num_log_groups})")]
    NotDivisible { log_buffer_size: u64, num_log_groups: u32 },
    #[error("log_group_size ({log_group_size}) is not a multiple of meta_page_size ({meta_page_size})")]
    GroupNotPageAligned { log_group_size: u64, meta_page_size: u32 },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_is_valid() {
        JournalConfigBuilder::new().build().expect("default config should validate");
    }

    #[test]
    fn rejects_buffer_not_divisible_by_groups() {
        let err = JournalConfigBuilder::new()
            .log_buffer_size(1000)
            .num_log_groups(3)
            .build()
            .unwrap_err();
        assert!(matches!(err, ConfigError::NotDivisible { .. }));
    }

    #[test]
    fn rejects_group_not_page_aligned() {
        let err = JournalConfigBuilder::new()
            .log_buffer_size(4096 * 3 + 100)
            .num_log_groups(1)
            .meta_page_size(4096)
            .build()
            .unwrap_err();
        assert!(matches!(err, ConfigError::GroupNotPageAligned { .. }));
    }

    #[test]
    fn log_group_size_is_derived() {
        let config = JournalConfigBuilder::new()
            .log_buffer_size(16 * 1024)
            .num_log_groups(4)
            .meta_page_size(1024)
            .build()
            .unwrap();
        assert_eq!(config.log_group_size(), 4 * 1024);
    }
}
