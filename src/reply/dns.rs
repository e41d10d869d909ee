//! MX discovery for direct delivery.

use async_trait::async_trait;
use hickory_resolver::TokioAsyncResolver;
use tracing::debug;

use crate::error::DeliveryError;

/// Resolves a domain's mail exchangers.
#[async_trait]
pub trait MxLookup: Send + Sync {
    /// `(preference, exchange)` pairs in any order.
    async fn mx_records(&self, domain: &str) -> Result<Vec<(u16, String)>, DeliveryError>;
}

/// Lookup through the system resolver configuration.
#[derive(Debug, Default, Clone, Copy)]
pub struct DnsMxLookup;

#[async_trait]
impl MxLookup for DnsMxLookup {
    async fn mx_records(&self, domain: &str) -> Result<Vec<(u16, String)>, DeliveryError> {
        let no_mx = |reason: String| DeliveryError::NoMxRecord {
            domain: domain.to_string(),
            reason,
        };

        let resolver = TokioAsyncResolver::tokio_from_system_conf()
            .map_err(|e| no_mx(format!("resolver setup: {e}")))?;

        let fqdn = if domain.ends_with('.') {
            domain.to_string()
        } else {
            format!("{domain}.")
        };
        let lookup = resolver
            .mx_lookup(fqdn)
            .await
            .map_err(|e| no_mx(e.to_string()))?;

        Ok(lookup
            .iter()
            .map(|mx| (mx.preference(), mx.exchange().to_string()))
            .collect())
    }
}

/// Most preferred exchange of `domain`, without the root dot.
pub async fn primary_exchange(lookup: &dyn MxLookup, domain: &str) -> Result<String, DeliveryError> {
    let mut records = lookup.mx_records(domain).await?;
    records.sort_by_key(|(preference, _)| *preference);

    let host = records
        .into_iter()
        .map(|(_, exchange)| exchange.trim_end_matches('.').to_string())
        .find(|exchange| !exchange.is_empty())
        .ok_or_else(|| DeliveryError::NoMxRecord {
            domain: domain.to_string(),
            reason: "no usable exchange".into(),
        })?;

    debug!(domain, host = %host, "Selected MX host");
    Ok(host)
}

#[cfg(test)]
mod tests {
    use super::*;

    struct StaticMx(Vec<(u16, &'static str)>);

    #[async_trait]
    impl MxLookup for StaticMx {
        async fn mx_records(&self, _domain: &str) -> Result<Vec<(u16, String)>, DeliveryError> {
            Ok(self.0.iter().map(|(p, h)| (*p, h.to_string())).collect())
        }
    }

    #[tokio::test]
    async fn lowest_preference_wins_and_root_dot_is_trimmed() {
        let mx = StaticMx(vec![
            (20, "backup.example.org."),
            (5, "mx1.example.org."),
            (10, "mx2.example.org."),
        ]);
        assert_eq!(
            primary_exchange(&mx, "example.org").await.unwrap(),
            "mx1.example.org"
        );
    }

    #[tokio::test]
    async fn empty_answer_is_an_error() {
        let mx = StaticMx(vec![]);
        assert!(matches!(
            primary_exchange(&mx, "example.org").await,
            Err(DeliveryError::NoMxRecord { .. })
        ));
    }

    #[tokio::test]
    async fn null_mx_is_skipped() {
        let mx = StaticMx(vec![(0, "."), (10, "mx.example.org.")]);
        assert_eq!(
            primary_exchange(&mx, "example.org").await.unwrap(),
            "mx.example.org"
        );
    }
}
