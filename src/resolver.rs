//! DNS query resolution logic.
//!
//! Handles the core query processing pipeline:
//! 1. Filter (block ads/trackers)
//! 2. Cache lookup
//! 3. Forward misses to the upstream race and cache the answer
//!
//! Transports handle the actual I/O, resolver handles decisions.

use rustc_hash::FxHashSet;
use std::sync::{Arc, Mutex};

use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::cache::DnsCache;
use crate::dns::{self, DnsQuery};
use crate::error::{Error, Result};
use crate::filter::{Blocklist, FilterMode, filter_query};
use crate::stats::Stats;
use crate::upstream::UpstreamResolver;

/// Action to take for a DNS query.
#[derive(Debug)]
pub enum QueryAction {
    /// Query is blocked, return this response immediately.
    Blocked { response: Vec<u8>, domain: String },
    /// Answered from cache with the requester's transaction ID.
    Cached {
        response: Vec<u8>,
        query: DnsQuery,
        /// Reply now, then refresh the entry in the background.
        needs_refresh: bool,
    },
    /// Query should be forwarded to upstream.
    Forward { query: DnsQuery },
}

/// Resolver handles DNS query processing decisions.
///
/// Contains all shared logic between transports: filtering, caching decisions
/// and the upstream race. Transports call this to decide what to do with
/// queries.
pub struct Resolver {
    blocklist: Blocklist,
    filter_mode: FilterMode,
    cache: DnsCache,
    upstreams: UpstreamResolver,
    stats: Stats,
    /// Cache keys with a background refresh in flight.
    refreshing: Mutex<FxHashSet<String>>,
}

impl Resolver {
    pub fn new(
        blocklist: Blocklist,
        filter_mode: FilterMode,
        cache: DnsCache,
        upstreams: UpstreamResolver,
    ) -> Self {
        Self {
            blocklist,
            filter_mode,
            cache,
            upstreams,
            stats: Stats::new(),
            refreshing: Mutex::new(FxHashSet::default()),
        }
    }

    /// Process a DNS query and decide what action to take.
    ///
    /// Fails only when the query cannot be parsed; such queries get no reply.
    pub fn process_query(&self, raw: &[u8]) -> Result<QueryAction> {
        let query = DnsQuery::parse(raw)?;

        if let Some(response) = filter_query(&self.blocklist, self.filter_mode, &query, raw) {
            return Ok(QueryAction::Blocked {
                response,
                domain: query.domain,
            });
        }

        if let Some(hit) = self.cache.get(&query.cache_key()) {
            if let Some(response) = query.response_from_cache(&hit.response) {
                return Ok(QueryAction::Cached {
                    response,
                    query,
                    needs_refresh: hit.needs_refresh,
                });
            }
        }

        Ok(QueryAction::Forward { query })
    }

    /// Race the upstreams for `raw`, cache the answer and return it with the
    /// query's transaction ID.
    pub async fn forward(
        &self,
        query: &DnsQuery,
        raw: &[u8],
        cancel: &CancellationToken,
    ) -> Result<Vec<u8>> {
        let mut response = self.upstreams.resolve(cancel, raw).await?;

        let ttl = dns::min_ttl(&response);
        self.cache.set(&query.cache_key(), response.clone(), ttl);
        debug!(domain = %query.domain, ttl, "cached");

        dns::set_transaction_id(&mut response, query.id);
        Ok(response)
    }

    /// Refresh a cache entry in the background, at most once per key at a time.
    pub fn spawn_refresh(
        self: &Arc<Self>,
        query: DnsQuery,
        raw: Vec<u8>,
        cancel: CancellationToken,
    ) {
        let key = query.cache_key();
        {
            let Ok(mut refreshing) = self.refreshing.lock() else {
                return;
            };
            if !refreshing.insert(key.clone()) {
                return;
            }
        }

        let resolver = Arc::clone(self);
        tokio::spawn(async move {
            match resolver.forward(&query, &raw, &cancel).await {
                Ok(_) => debug!(domain = %query.domain, "refreshed cache entry"),
                Err(Error::Cancelled) => {}
                Err(e) => debug!(domain = %query.domain, error = %e, "cache refresh failed"),
            }
            if let Ok(mut refreshing) = resolver.refreshing.lock() {
                refreshing.remove(&key);
            }
        });
    }

    /// Drop cache entries past their grace period.
    pub fn clean_cache(&self) -> usize {
        self.cache.clean()
    }

    pub fn cache(&self) -> &DnsCache {
        &self.cache
    }

    pub fn stats(&self) -> &Stats {
        &self.stats
    }

    pub fn cache_len(&self) -> usize {
        self.cache.len()
    }

    /// Returns the number of domains in the blocklist.
    pub fn blocked_count(&self) -> usize {
        self.blocklist.len()
    }

    pub fn upstreams(&self) -> &UpstreamResolver {
        &self.upstreams
    }
}
