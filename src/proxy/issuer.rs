//! Proxy issuance
//!
//! The forwarder never talks to the rotation selector directly. It asks a
//! [`ProxyIssuer`] for a proxy, keyed by strategy, target and credential. The
//! issuer can live in-process ([`LocalProxyIssuer`]) or behind the management
//! backend (`backend::BackendClient`).

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, instrument, warn};

use crate::error::{GatewayError, Result};
use crate::models::ProxyDescriptor;
use crate::proxy::middleware::{bearer_token, mask_credential};
use crate::proxy::rotation::{RotationSelector, RotationStrategy};
use crate::repository::ProxyStore;

/// What the forwarder asks for on each attempt
#[derive(Debug, Clone)]
pub struct IssueRequest {
    pub strategy: RotationStrategy,
    pub target_url: String,
    /// Raw `Authorization` value, scheme included
    pub credential: Option<String>,
}

/// Hands out one proxy per call, or reports that none is available
#[async_trait]
pub trait ProxyIssuer: Send + Sync {
    async fn issue(&self, request: &IssueRequest) -> Result<ProxyDescriptor>;
}

/// Maps a presented credential to a user id
#[async_trait]
pub trait CredentialVerifier: Send + Sync {
    /// Returns the user id, or [`GatewayError::AuthenticationFailed`]
    async fn verify(&self, credential: &str) -> Result<i64>;
}

/// Fixed token table
#[derive(Debug, Clone, Default)]
pub struct StaticCredentialVerifier {
    tokens: HashMap<String, i64>,
}

impl StaticCredentialVerifier {
    pub fn new(tokens: HashMap<String, i64>) -> Self {
        Self { tokens }
    }
}

#[async_trait]
impl CredentialVerifier for StaticCredentialVerifier {
    async fn verify(&self, credential: &str) -> Result<i64> {
        self.tokens
            .get(bearer_token(credential))
            .copied()
            .ok_or(GatewayError::AuthenticationFailed)
    }
}

/// In-process issuer: verify, read the working set, select
pub struct LocalProxyIssuer {
    store: Arc<dyn ProxyStore>,
    selector: Arc<RotationSelector>,
    verifier: Option<Arc<dyn CredentialVerifier>>,
}

impl LocalProxyIssuer {
    pub fn new(store: Arc<dyn ProxyStore>, selector: Arc<RotationSelector>) -> Self {
        Self {
            store,
            selector,
            verifier: None,
        }
    }

    /// Require every request to carry a credential the verifier accepts
    pub fn with_verifier(mut self, verifier: Arc<dyn CredentialVerifier>) -> Self {
        self.verifier = Some(verifier);
        self
    }

    async fn user_id(&self, credential: Option<&str>) -> Result<Option<i64>> {
        let Some(verifier) = &self.verifier else {
            return Ok(None);
        };

        let credential = credential.ok_or(GatewayError::AuthenticationFailed)?;
        match verifier.verify(credential).await {
            Ok(user_id) => Ok(Some(user_id)),
            Err(e) => {
                warn!(credential = %mask_credential(credential), "Credential rejected");
                Err(e)
            }
        }
    }
}

#[async_trait]
impl ProxyIssuer for LocalProxyIssuer {
    #[instrument(skip(self, request), fields(strategy = %request.strategy))]
    async fn issue(&self, request: &IssueRequest) -> Result<ProxyDescriptor> {
        let user_id = self.user_id(request.credential.as_deref()).await?;

        let working = self.store.get_working_proxies().await?;
        let proxy = self.selector.select(request.strategy, &working).await?;

        debug!(
            proxy_id = proxy.id,
            target = %request.target_url,
            "Issued proxy {}",
            proxy.address()
        );
        Ok(ProxyDescriptor::from_proxy(&proxy, user_id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::proxy::rotation::test_support::create_test_proxy;
    use crate::repository::MemoryProxyStore;

    fn issuer_with(store: Arc<MemoryProxyStore>) -> LocalProxyIssuer {
        let selector = Arc::new(RotationSelector::new(store.clone()));
        LocalProxyIssuer::new(store, selector)
    }

    fn request(strategy: RotationStrategy, credential: Option<&str>) -> IssueRequest {
        IssueRequest {
            strategy,
            target_url: "http://example.com/".to_string(),
            credential: credential.map(str::to_string),
        }
    }

    #[tokio::test]
    async fn test_issue_selects_from_working_set_and_marks_used() {
        let mut broken = create_test_proxy(1);
        broken.is_working = false;
        let store = Arc::new(MemoryProxyStore::with_proxies(vec![
            broken,
            create_test_proxy(2),
        ]));
        let issuer = issuer_with(store.clone());

        let descriptor = issuer
            .issue(&request(RotationStrategy::RoundRobin, None))
            .await
            .unwrap();

        assert_eq!(descriptor.proxy_id, 2);
        assert_eq!(descriptor.url, "http://127.0.0.1:8002");
        assert_eq!(descriptor.user_id, None);
        assert!(store.get(2).unwrap().last_used.is_some());
    }

    #[tokio::test]
    async fn test_issue_reports_no_proxy_available() {
        let issuer = issuer_with(Arc::new(MemoryProxyStore::new()));
        let result = issuer.issue(&request(RotationStrategy::Best, None)).await;
        assert!(matches!(
            result,
            Err(GatewayError::NoProxyAvailable { strategy }) if strategy == "best"
        ));
    }

    #[tokio::test]
    async fn test_issue_with_verifier_attaches_user_id() {
        let store = Arc::new(MemoryProxyStore::with_proxies(vec![create_test_proxy(1)]));
        let verifier = StaticCredentialVerifier::new(HashMap::from([("tok-1".to_string(), 42)]));
        let issuer = issuer_with(store).with_verifier(Arc::new(verifier));

        let descriptor = issuer
            .issue(&request(RotationStrategy::Lru, Some("Bearer tok-1")))
            .await
            .unwrap();
        assert_eq!(descriptor.user_id, Some(42));

        let rejected = issuer
            .issue(&request(RotationStrategy::Lru, Some("Bearer nope")))
            .await;
        assert!(matches!(rejected, Err(GatewayError::AuthenticationFailed)));

        let missing = issuer.issue(&request(RotationStrategy::Lru, None)).await;
        assert!(matches!(missing, Err(GatewayError::AuthenticationFailed)));
    }
}
