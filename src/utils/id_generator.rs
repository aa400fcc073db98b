//! Id generation for run/session identifiers.

use std::sync::atomic::{AtomicU64, Ordering};

use uuid::Uuid;

/// Configuration for [`IdGenerator`]. The default generator produces random
/// UUIDs; setting `use_counter` switches to a monotonic, seed-prefixed
/// sequence useful for deterministic tests.
#[derive(Clone, Debug, Default)]
pub struct IdConfig {
    pub seed: Option<u64>,
    pub use_counter: bool,
}

pub struct IdGenerator {
    config: IdConfig,
    counter: AtomicU64,
}

impl Default for IdGenerator {
    fn default() -> Self {
        Self::new()
    }
}

impl IdGenerator {
    #[must_use]
    pub fn new() -> Self {
        Self {
            config: IdConfig::default(),
            counter: AtomicU64::new(0),
        }
    }

    #[must_use]
    pub fn with_config(config: IdConfig) -> Self {
        Self {
            config,
            counter: AtomicU64::new(0),
        }
    }

    /// Generate a general-purpose id, counter-based if configured, else a UUID.
    pub fn generate_id(&self) -> String {
        if self.config.use_counter {
            let n = self.counter.fetch_add(1, Ordering::SeqCst);
            match self.config.seed {
                Some(seed) => format!("id-{seed}-{n}"),
                None => format!("id-{n}"),
            }
        } else {
            Uuid::new_v4().to_string()
        }
    }

    /// Generate an id for a fresh `AppRunner` session/run, prefixed for readability.
    #[must_use]
    pub fn generate_run_id(&self) -> String {
        format!("run-{}", Uuid::new_v4())
    }
}
