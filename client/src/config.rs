use std::time::Duration;

use crate::error::{Error, Result};

/// Bytes of READDIRX reply metadata preceding the first entry record,
/// plus the trailing NUL of the last name.
const BATCH_OVERHEAD: usize = 10;

/// Fixed bytes per directory entry record before the name.
const ENTRY_OVERHEAD: usize = 13;

/// Tunables of a client session.
///
/// The defaults match the reference deployment: 1 second receive timeout,
/// 5 send attempts, a 16 KiB session buffer, 256 byte paths and 58 entries
/// per READDIRX batch.
#[derive(Debug, Clone)]
pub struct Config {
    /// Receive deadline for a single send attempt. MOUNT may replace this
    /// with the minimum retry time announced by the server.
    pub timeout: Duration,
    /// Total number of send attempts before the engine gives up.
    pub max_retries: u32,
    /// Size of the shared send/receive buffer.
    pub buffer_size: usize,
    /// Maximum path length, including the NUL terminator.
    pub max_path_len: usize,
    /// Entries requested per READDIRX batch.
    pub max_results_per_batch: u8,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            timeout: Duration::from_millis(1000),
            max_retries: 5,
            buffer_size: 16384,
            max_path_len: 256,
            max_results_per_batch: 58,
        }
    }
}

impl Config {
    /// A full batch of maximum-length names must fit into the buffer,
    /// otherwise READDIRX replies could be truncated mid-entry.
    pub(crate) fn validate(&self) -> Result<()> {
        if self.timeout.is_zero() {
            return Err(Error::InvalidConfig("timeout must be non-zero"));
        }

        if self.max_retries == 0 {
            return Err(Error::InvalidConfig("max_retries must be at least 1"));
        }

        if self.max_results_per_batch == 0 {
            return Err(Error::InvalidConfig(
                "max_results_per_batch must be at least 1",
            ));
        }

        if self.max_path_len < 2 {
            return Err(Error::InvalidConfig("max_path_len must be at least 2"));
        }

        let worst_case_batch = BATCH_OVERHEAD
            + (ENTRY_OVERHEAD + self.max_path_len) * usize::from(self.max_results_per_batch);

        if worst_case_batch > self.buffer_size {
            return Err(Error::InvalidConfig(
                "a full READDIRX batch does not fit into the buffer; shrink \
                 max_results_per_batch or max_path_len, or grow buffer_size",
            ));
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        Config::default().validate().unwrap();
    }

    #[test]
    fn batch_must_fit_into_buffer() {
        let config = Config {
            buffer_size: 8192,
            ..Default::default()
        };

        assert!(matches!(config.validate(), Err(Error::InvalidConfig(_))));
    }

    #[test]
    fn zero_timeout_is_rejected() {
        let config = Config {
            timeout: Duration::ZERO,
            ..Default::default()
        };

        assert!(matches!(config.validate(), Err(Error::InvalidConfig(_))));
    }

    #[test]
    fn largest_valid_batch_is_accepted() {
        // 10 + (13 + 256) * 60 = 16150 <= 16384
        let config = Config {
            max_results_per_batch: 60,
            ..Default::default()
        };

        config.validate().unwrap();

        let config = Config {
            max_results_per_batch: 61,
            ..Default::default()
        };

        assert!(config.validate().is_err());
    }
}
