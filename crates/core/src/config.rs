//! Core runtime configuration.
//!
//! This module defines configuration that should be resolved once at process startup and then
//! passed into core services. The intent is to avoid reading process-wide environment variables
//! during request handling, which can lead to inconsistent behaviour in multi-threaded runtimes
//! and test harnesses.

use crate::constants::MAX_NAME_LENGTH;
use crate::{CoreError, CoreResult};

/// Core configuration resolved at startup.
#[derive(Clone, Debug)]
pub struct CoreConfig {
    auto_aggregate_on_ingest: bool,
    max_name_length: usize,
}

impl CoreConfig {
    /// Create a new `CoreConfig`.
    ///
    /// `auto_aggregate_on_ingest` controls whether the aggregation classifier is
    /// consulted when files arrive by upload or unzip. `max_name_length` bounds a
    /// single path segment and may only be tightened, never raised past the
    /// storage-zone limit.
    pub fn new(auto_aggregate_on_ingest: bool, max_name_length: usize) -> CoreResult<Self> {
        if max_name_length == 0 || max_name_length > MAX_NAME_LENGTH {
            return Err(CoreError::Validation(format!(
                "max_name_length must be between 1 and {}",
                MAX_NAME_LENGTH
            )));
        }

        Ok(Self {
            auto_aggregate_on_ingest,
            max_name_length,
        })
    }

    pub fn auto_aggregate_on_ingest(&self) -> bool {
        self.auto_aggregate_on_ingest
    }

    pub fn max_name_length(&self) -> usize {
        self.max_name_length
    }
}

impl Default for CoreConfig {
    fn default() -> Self {
        Self {
            auto_aggregate_on_ingest: true,
            max_name_length: MAX_NAME_LENGTH,
        }
    }
}
