use crate::{Policy, PolicyParseError};
use parking_lot::Mutex;
use std::time::{Duration, Instant};

const DEFAULT_TTL: Duration = Duration::from_secs(30);

struct Entry {
    source: String,
    policy: Policy,
    parsed_at: Instant,
}

/// Caches the last parsed policy so the coordinator does not re-parse the
/// configured expression on every anchor.
pub struct PolicyCache {
    ttl: Duration,
    entry: Mutex<Option<Entry>>,
}

impl Default for PolicyCache {
    fn default() -> Self {
        Self::new(DEFAULT_TTL)
    }
}

impl PolicyCache {
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            entry: Mutex::new(None),
        }
    }

    pub fn get(&self, source: &str) -> Result<Policy, PolicyParseError> {
        let mut entry = self.entry.lock();
        if let Some(e) = entry.as_ref() {
            if e.source == source && e.parsed_at.elapsed() < self.ttl {
                return Ok(e.policy.clone());
            }
        }
        let policy = Policy::parse(source)?;
        *entry = Some(Entry {
            source: source.to_string(),
            policy: policy.clone(),
            parsed_at: Instant::now(),
        });
        Ok(policy)
    }
}
