//! Compiled rule prefixes shared by every admission request.

use moka::sync::Cache;
use regex::Regex;

/// Patterns kept compiled; rarely used ones are evicted past this.
pub const DEFAULT_CAPACITY: u64 = 1024;

/// Pattern to compile result. Failures are cached too.
///
/// Patterns come from user-submitted resources, so the cache is bounded.
#[derive(Debug)]
pub struct RegexCache {
    compiled: Cache<String, Result<Regex, String>>,
}

impl Default for RegexCache {
    fn default() -> Self {
        Self::with_capacity(DEFAULT_CAPACITY)
    }
}

impl RegexCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_capacity(capacity: u64) -> Self {
        Self {
            compiled: Cache::builder().max_capacity(capacity).build(),
        }
    }

    /// Compiles `pattern` once while it stays cached.
    pub fn compile(&self, pattern: &str) -> Result<Regex, String> {
        if let Some(cached) = self.compiled.get(pattern) {
            return cached;
        }
        self.compiled
            .get_with(pattern.to_string(), || Regex::new(pattern).map_err(|e| e.to_string()))
    }

    /// Validity check in the shape the rule parser expects.
    pub fn check(&self, pattern: &str) -> Result<(), String> {
        self.compile(pattern).map(|_| ())
    }

    pub fn len(&self) -> usize {
        self.compiled.run_pending_tasks();
        usize::try_from(self.compiled.entry_count()).unwrap_or(usize::MAX)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_patterns_are_compiled_once() {
        let cache = RegexCache::new();
        assert!(cache.is_empty());
        assert!(cache.check("docker\\.io").is_ok());
        assert!(cache.check("docker\\.io").is_ok());
        assert_eq!(cache.len(), 1);
        assert!(cache.compile("docker\\.io").unwrap().is_match("docker.io/library"));
    }

    #[test]
    fn test_failures_are_cached() {
        let cache = RegexCache::new();
        let first = cache.check("quay.io/(").unwrap_err();
        assert_eq!(cache.check("quay.io/(").unwrap_err(), first);
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn test_distinct_patterns_stay_bounded() {
        let cache = RegexCache::with_capacity(16);
        for i in 0..500 {
            assert!(cache.check(&format!("registry-{i}\\.example\\.com")).is_ok());
        }
        assert!(cache.len() <= 16, "cache holds {} patterns", cache.len());
        // Evicted patterns still compile on demand.
        assert!(cache.compile("registry-0\\.example\\.com").unwrap().is_match("registry-0.example.com"));
    }
}
