//! DNS query filtering module.
//!
//! Provides ad-blocking functionality by filtering DNS queries against
//! a blocklist of known ad/tracking domains.

mod blocklist;

pub use blocklist::Blocklist;

use crate::dns::{self, DnsQuery};

/// How blocked queries are answered.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, clap::ValueEnum)]
pub enum FilterMode {
    /// Answer with NXDOMAIN.
    #[default]
    Nxdomain,
    /// Answer with a single `A 0.0.0.0` record.
    Null,
}

impl FilterMode {
    /// Build the synthetic reply for a blocked query.
    pub fn blocked_response(self, query: &[u8]) -> Vec<u8> {
        match self {
            FilterMode::Nxdomain => dns::nxdomain_response(query),
            FilterMode::Null => dns::null_response(query),
        }
    }
}

/// Check if a DNS query should be blocked and return an appropriate response.
///
/// Returns `Some(response)` if the query should be blocked, `None` if it should
/// be answered from cache or upstream.
pub fn filter_query(
    blocklist: &Blocklist,
    mode: FilterMode,
    query: &DnsQuery,
    raw: &[u8],
) -> Option<Vec<u8>> {
    blocklist
        .is_blocked(&query.domain)
        .then(|| mode.blocked_response(raw))
}
