//! Configuration store seam.
//!
//! Subscriptions and endpoints are owned by an external store. The relay only
//! needs the operations below; `InMemoryConfigStore` backs tests and the
//! file-seeded binary.

use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::StoreError;
use crate::model::{Endpoint, Subscription};

/// Persistent subscription/endpoint storage.
#[async_trait]
pub trait ConfigStore: Send + Sync {
    async fn load_subscriptions(&self) -> Result<Vec<Subscription>, StoreError>;

    async fn load_endpoint(&self, name: &str) -> Result<Endpoint, StoreError>;

    async fn save_subscription(&self, sub: &Subscription) -> Result<(), StoreError>;

    async fn delete_subscription(&self, job_id: &str) -> Result<(), StoreError>;

    async fn save_endpoint(&self, endpoint: &Endpoint) -> Result<(), StoreError>;

    /// Drop every endpoint whose name is not in `keep`.
    async fn delete_all_endpoints_except(&self, keep: &[String]) -> Result<(), StoreError>;
}

/// Serializable snapshot of a store, used to seed `InMemoryConfigStore`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StoreSnapshot {
    #[serde(default)]
    pub endpoints: Vec<Endpoint>,
    #[serde(default)]
    pub subscriptions: Vec<Subscription>,
}

/// In-memory configuration store.
///
/// All data is lost when the process exits.
#[derive(Default)]
pub struct InMemoryConfigStore {
    endpoints: Mutex<HashMap<String, Endpoint>>,
    // Kept in insertion order so bootstrap is deterministic.
    subscriptions: Mutex<Vec<Subscription>>,
}

impl InMemoryConfigStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_snapshot(snapshot: StoreSnapshot) -> Self {
        let store = Self::new();
        {
            let mut endpoints = store.endpoints.lock().unwrap();
            for ep in snapshot.endpoints {
                endpoints.insert(ep.name.clone(), ep);
            }
        }
        *store.subscriptions.lock().unwrap() = snapshot.subscriptions;
        store
    }

    pub fn endpoint_count(&self) -> usize {
        self.endpoints.lock().unwrap().len()
    }

    pub fn subscription_count(&self) -> usize {
        self.subscriptions.lock().unwrap().len()
    }
}

#[async_trait]
impl ConfigStore for InMemoryConfigStore {
    async fn load_subscriptions(&self) -> Result<Vec<Subscription>, StoreError> {
        Ok(self.subscriptions.lock().unwrap().clone())
    }

    async fn load_endpoint(&self, name: &str) -> Result<Endpoint, StoreError> {
        self.endpoints
            .lock()
            .unwrap()
            .get(name)
            .cloned()
            .ok_or_else(|| StoreError::EndpointNotFound(name.to_string()))
    }

    async fn save_subscription(&self, sub: &Subscription) -> Result<(), StoreError> {
        let mut subs = self.subscriptions.lock().unwrap();
        match subs.iter_mut().find(|s| s.job_id == sub.job_id) {
            Some(existing) => *existing = sub.clone(),
            None => subs.push(sub.clone()),
        }
        Ok(())
    }

    async fn delete_subscription(&self, job_id: &str) -> Result<(), StoreError> {
        let mut subs = self.subscriptions.lock().unwrap();
        let before = subs.len();
        subs.retain(|s| s.job_id != job_id);
        if subs.len() == before {
            return Err(StoreError::SubscriptionNotFound(job_id.to_string()));
        }
        Ok(())
    }

    async fn save_endpoint(&self, endpoint: &Endpoint) -> Result<(), StoreError> {
        self.endpoints
            .lock()
            .unwrap()
            .insert(endpoint.name.clone(), endpoint.clone());
        Ok(())
    }

    async fn delete_all_endpoints_except(&self, keep: &[String]) -> Result<(), StoreError> {
        self.endpoints
            .lock()
            .unwrap()
            .retain(|name, _| keep.iter().any(|k| k == name));
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::ChainType;

    #[tokio::test]
    async fn save_and_load_endpoint() {
        let store = InMemoryConfigStore::new();
        let ep = Endpoint::new("eth-main", "wss://node", ChainType::Ethereum);
        store.save_endpoint(&ep).await.unwrap();
        assert_eq!(store.load_endpoint("eth-main").await.unwrap(), ep);
        assert!(matches!(
            store.load_endpoint("nope").await,
            Err(StoreError::EndpointNotFound(_))
        ));
    }

    #[tokio::test]
    async fn save_subscription_upserts_by_job() {
        let store = InMemoryConfigStore::new();
        store
            .save_subscription(&Subscription::new("job", "a"))
            .await
            .unwrap();
        store
            .save_subscription(&Subscription::new("job", "b"))
            .await
            .unwrap();
        let subs = store.load_subscriptions().await.unwrap();
        assert_eq!(subs.len(), 1);
        assert_eq!(subs[0].endpoint_name, "b");
    }

    #[tokio::test]
    async fn delete_unknown_subscription_fails() {
        let store = InMemoryConfigStore::new();
        assert!(store.delete_subscription("ghost").await.is_err());
    }

    #[tokio::test]
    async fn prune_endpoints() {
        let store = InMemoryConfigStore::new();
        for name in ["a", "b", "c"] {
            store
                .save_endpoint(&Endpoint::new(name, "http://x", ChainType::Ethereum))
                .await
                .unwrap();
        }
        store
            .delete_all_endpoints_except(&["b".to_string()])
            .await
            .unwrap();
        assert_eq!(store.endpoint_count(), 1);
        assert!(store.load_endpoint("b").await.is_ok());
    }

    #[test]
    fn snapshot_from_json() {
        let snap: StoreSnapshot = serde_json::from_str(
            r#"{
                "endpoints": [{"name": "tz", "url": "http://tezos:8732", "type": "tezos"}],
                "subscriptions": [{"jobId": "j1", "endpoint": "tz", "addresses": ["KT1abc"]}]
            }"#,
        )
        .unwrap();
        let store = InMemoryConfigStore::from_snapshot(snap);
        assert_eq!(store.endpoint_count(), 1);
        assert_eq!(store.subscription_count(), 1);
    }
}
