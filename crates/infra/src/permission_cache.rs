//! TTL cache in front of a [`GrantStore`].
//!
//! Grant changes made in this process invalidate the affected user
//! explicitly; the TTL bounds staleness for changes made elsewhere.
//! Failed lookups are never cached.

use std::collections::HashMap;
use std::sync::{PoisonError, RwLock};
use std::time::{Duration, Instant};

use bookwell_auth::{GrantStore, GrantStoreError};
use bookwell_core::UserId;

#[derive(Debug, Clone)]
struct CachedGrants {
    tags: Vec<String>,
    fetched_at: Instant,
}

#[derive(Debug, Default)]
struct CacheState {
    entries: HashMap<UserId, CachedGrants>,
    /// Bumped by every invalidation. A fetch that started under an older
    /// generation is served but not stored.
    generation: u64,
}

#[derive(Debug)]
pub struct CachingGrantStore<G> {
    inner: G,
    ttl: Duration,
    state: RwLock<CacheState>,
}

impl<G> CachingGrantStore<G> {
    pub fn new(inner: G, ttl: Duration) -> Self {
        Self {
            inner,
            ttl,
            state: RwLock::new(CacheState::default()),
        }
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    pub fn invalidate(&self, user_id: UserId) {
        let mut state = self.state.write().unwrap_or_else(PoisonError::into_inner);
        state.generation += 1;
        state.entries.remove(&user_id);
    }

    pub fn invalidate_all(&self) {
        let mut state = self.state.write().unwrap_or_else(PoisonError::into_inner);
        state.generation += 1;
        state.entries.clear();
    }

    /// Cached tags if still fresh, else the generation to store a fetch under.
    fn lookup(&self, user_id: UserId) -> Result<Vec<String>, u64> {
        let state = self.state.read().unwrap_or_else(PoisonError::into_inner);
        state
            .entries
            .get(&user_id)
            .filter(|c| c.fetched_at.elapsed() < self.ttl)
            .map(|c| c.tags.clone())
            .ok_or(state.generation)
    }
}

impl<G: GrantStore> GrantStore for CachingGrantStore<G> {
    fn grants_for(&self, user_id: UserId) -> Result<Vec<String>, GrantStoreError> {
        let generation = match self.lookup(user_id) {
            Ok(tags) => return Ok(tags),
            Err(generation) => generation,
        };

        let tags = self.inner.grants_for(user_id)?;

        let mut state = self.state.write().unwrap_or_else(PoisonError::into_inner);
        if state.generation == generation {
            state.entries.insert(
                user_id,
                CachedGrants {
                    tags: tags.clone(),
                    fetched_at: Instant::now(),
                },
            );
        } else {
            tracing::debug!(%user_id, "grants changed during fetch, not caching");
        }
        Ok(tags)
    }
}
