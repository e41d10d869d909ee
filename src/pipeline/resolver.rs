//! Alias resolver: finds the vacation owner behind an envelope recipient.
//!
//! The directory is a graph that may contain cycles. Recursion depth is
//! bounded; going deeper than the limit is a fatal configuration error
//! rather than an endless walk. Addresses already explored without result
//! are not walked again, so wide alias lists stay linear.

use std::collections::HashSet;

use chrono::{DateTime, Utc};
use futures::future::{BoxFuture, FutureExt};
use tracing::debug;

use crate::error::{Error, ResolveError};
use crate::pipeline::address::autoreply_marker;
use crate::store::DirectoryStore;

/// Resolves addresses against the directory at a fixed point in time.
pub struct AliasResolver<'a> {
    store: &'a dyn DirectoryStore,
    vacation_domain: &'a str,
    max_hops: usize,
    now: DateTime<Utc>,
}

impl<'a> AliasResolver<'a> {
    pub fn new(
        store: &'a dyn DirectoryStore,
        vacation_domain: &'a str,
        max_hops: usize,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            store,
            vacation_domain,
            max_hops,
            now,
        }
    }

    /// Find the nearest address reachable from `address` with an eligible
    /// vacation. `Ok(None)` means no owner was found.
    pub async fn resolve(&self, address: &str) -> Result<Option<String>, Error> {
        let mut explored = HashSet::new();
        self.step(address.to_lowercase(), 1, &mut explored).await
    }

    fn step<'s>(
        &'s self,
        address: String,
        depth: usize,
        explored: &'s mut HashSet<String>,
    ) -> BoxFuture<'s, Result<Option<String>, Error>> {
        async move {
            if depth > self.max_hops {
                return Err(ResolveError::LoopDetected {
                    address,
                    limit: self.max_hops,
                }
                .into());
            }
            if explored.contains(&address) {
                return Ok(None);
            }

            let found = self.lookup(&address, depth, explored).await?;
            if found.is_none() {
                explored.insert(address);
            }
            Ok(found)
        }
        .boxed()
    }

    async fn lookup(
        &self,
        address: &str,
        depth: usize,
        explored: &mut HashSet<String>,
    ) -> Result<Option<String>, Error> {
        if self.store.is_vacation_active(address, self.now).await? {
            debug!(address, "Vacation active");
            return Ok(Some(address.to_string()));
        }

        // Direct alias row for the literal address.
        if let Some(goto) = self.store.alias_destinations(address).await? {
            let marker = autoreply_marker(address, self.vacation_domain);
            let destinations = split_destinations(&goto);
            let has_marker = destinations.iter().any(|d| *d == marker);

            for dest in destinations {
                if dest == address || self.is_autoreply_address(&dest) {
                    continue;
                }
                debug!(address, alias = %dest, "Following alias");
                if let Some(owner) = self.step(dest, depth + 1, explored).await? {
                    return Ok(Some(owner));
                }
            }
            if has_marker {
                return Ok(None);
            }
        }

        let Some((local, domain)) = address.split_once('@') else {
            return Ok(None);
        };

        if let Some(target) = self.store.alias_domain_target(domain).await? {
            let target = target.trim().to_lowercase();
            debug!(domain, target = %target, "Following alias domain");
            return self.step(format!("{local}@{target}"), depth + 1, explored).await;
        }

        if let Some(goto) = self.store.alias_destinations(&format!("@{domain}")).await? {
            for dest in split_destinations(&goto) {
                let next = if let Some(other_domain) = dest.strip_prefix('@') {
                    format!("{local}@{other_domain}")
                } else if dest.contains('@') {
                    dest.clone()
                } else {
                    continue;
                };
                if next == address {
                    continue;
                }
                debug!(domain, dest = %next, "Following domain wildcard alias");
                if let Some(owner) = self.step(next, depth + 1, explored).await? {
                    return Ok(Some(owner));
                }
            }
        }

        debug!(address, "No eligible vacation");
        Ok(None)
    }

    fn is_autoreply_address(&self, address: &str) -> bool {
        address
            .rsplit_once('@')
            .is_some_and(|(_, domain)| domain == self.vacation_domain)
    }
}

/// Destination list in stored order, trimmed and lower-cased.
fn split_destinations(goto: &str) -> Vec<String> {
    goto.split(',')
        .map(|d| d.trim().to_lowercase())
        .filter(|d| !d.is_empty())
        .collect()
}
