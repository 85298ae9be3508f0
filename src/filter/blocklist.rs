//! Blocklist for ad/tracking domains.
//!
//! Domains are loaded from adblock-style rule files (`||domain^`) or added
//! one at a time. A listed domain also blocks all of its subdomains.

use rustc_hash::FxHashSet;
use std::fs::File;
use std::io::{self, BufRead, BufReader};
use std::path::Path;
use std::sync::RwLock;

use tracing::info;

/// A set of blocked domains for efficient lookup.
#[derive(Default)]
pub struct Blocklist {
    domains: RwLock<FxHashSet<String>>,
}

impl Blocklist {
    /// Create an empty blocklist.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a domain. It is stored lower-cased without surrounding whitespace.
    pub fn add(&self, domain: &str) {
        let domain = domain.trim().to_lowercase();
        if let Ok(mut domains) = self.domains.write() {
            domains.insert(domain);
        }
    }

    /// Check if a domain should be blocked.
    ///
    /// Performs exact match and subdomain matching (e.g., blocks
    /// "ads.example.com" if "example.com" is in the blocklist).
    pub fn is_blocked(&self, domain: &str) -> bool {
        let domain = domain.trim().to_lowercase();
        let domain = domain.strip_suffix('.').unwrap_or(&domain);
        let Ok(domains) = self.domains.read() else {
            return false;
        };

        let mut current = domain;
        loop {
            if domains.contains(current) {
                return true;
            }
            match current.find('.') {
                Some(pos) => current = &current[pos + 1..],
                None => return false,
            }
        }
    }

    /// Load `||domain^` rules from a file, one per line.
    ///
    /// Blank lines, comments (`!`), section headers (`[`) and exceptions
    /// (`@@`) are skipped, as is anything else that is not a plain domain
    /// rule. Returns the number of rules loaded.
    pub fn load_from_file(&self, path: impl AsRef<Path>) -> io::Result<usize> {
        let path = path.as_ref();
        let reader = BufReader::new(File::open(path)?);
        let mut count = 0;

        for line in reader.lines() {
            if let Some(domain) = parse_rule(&line?) {
                self.add(domain);
                count += 1;
            }
        }

        info!(count, path = %path.display(), "loaded filter list");
        Ok(count)
    }

    /// Returns the number of domains in the blocklist.
    pub fn len(&self) -> usize {
        self.domains.read().map(|d| d.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Extract the domain from a `||domain^` rule.
fn parse_rule(line: &str) -> Option<&str> {
    let line = line.trim();
    if line.is_empty() || line.starts_with('!') || line.starts_with('[') || line.starts_with("@@")
    {
        return None;
    }

    line.strip_prefix("||")?
        .strip_suffix('^')
        .filter(|domain| !domain.is_empty())
}
