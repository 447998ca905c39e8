use std::num::NonZeroUsize;
use std::sync::Mutex;

use lru::LruCache;

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct MatchCacheKey {
    language: String,
    text: String,
}

#[derive(Debug, Clone)]
struct CachedMatch {
    generation: u64,
    options: Vec<String>,
}

/// Bounded LRU of match results keyed by `(language, raw text)`.
///
/// Entries remember the pattern-set generation they were computed against and
/// are ignored once a newer generation is published, so a reader racing a
/// reload cannot resurrect a stale result after the cache was cleared.
#[derive(Debug)]
pub(crate) struct MatchCache {
    entries: Mutex<LruCache<MatchCacheKey, CachedMatch>>,
}

impl MatchCache {
    pub(crate) fn new(capacity: usize) -> Self {
        let capacity = NonZeroUsize::new(capacity).unwrap_or(NonZeroUsize::MIN);
        Self {
            entries: Mutex::new(LruCache::new(capacity)),
        }
    }

    pub(crate) fn get(&self, language: &str, text: &str, generation: u64) -> Option<Vec<String>> {
        let key = MatchCacheKey {
            language: language.to_string(),
            text: text.to_string(),
        };
        let mut entries = lock_or_recover(&self.entries);
        let (cached_generation, options) = entries
            .get(&key)
            .map(|cached| (cached.generation, cached.options.clone()))?;
        if cached_generation == generation {
            return Some(options);
        }
        entries.pop(&key);
        None
    }

    pub(crate) fn insert(&self, language: &str, text: &str, generation: u64, options: &[String]) {
        let key = MatchCacheKey {
            language: language.to_string(),
            text: text.to_string(),
        };
        lock_or_recover(&self.entries).put(
            key,
            CachedMatch {
                generation,
                options: options.to_vec(),
            },
        );
    }

    pub(crate) fn clear(&self) {
        lock_or_recover(&self.entries).clear();
    }

    pub(crate) fn len(&self) -> usize {
        lock_or_recover(&self.entries).len()
    }
}

pub(crate) fn lock_or_recover<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    match mutex.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}
