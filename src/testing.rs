//! Helpers shared by the crate's integration tests.

use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;

use crate::{
    documents::{ObjectStore, StoredObject},
    session::TenantSession,
    Error, Result,
};

/// Seed charge rows inside an open session; returns their generated ids.
pub async fn seed_charges(
    session: &mut TenantSession,
    charges: &[(&str, &str, &str)],
) -> Result<Vec<i64>> {
    let mut ids = Vec::with_capacity(charges.len());
    for (code, description, charge_type) in charges {
        let id: i64 = sqlx::query_scalar(
            "insert into charges (charge_code, charge_description, charge_type, created_by)
             values ($1, $2, $3, 'seed')
             returning id",
        )
        .bind(code)
        .bind(description)
        .bind(charge_type)
        .fetch_one(session.conn())
        .await?;
        ids.push(id);
    }
    Ok(ids)
}

#[derive(Clone)]
struct StoredEntry {
    body: Vec<u8>,
    metadata: HashMap<String, String>,
}

/// In-memory [`ObjectStore`] with deterministic listing order.
#[derive(Clone, Default)]
pub struct MemoryObjectStore {
    inner: Arc<Mutex<BTreeMap<String, StoredEntry>>>,
}

impl MemoryObjectStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn object_count(&self) -> usize {
        self.inner.lock().expect("store poisoned").len()
    }
}

#[async_trait]
impl ObjectStore for MemoryObjectStore {
    async fn put(
        &self,
        key: &str,
        body: Vec<u8>,
        metadata: &HashMap<String, String>,
    ) -> Result<()> {
        self.inner.lock().expect("store poisoned").insert(
            key.to_string(),
            StoredEntry {
                body,
                metadata: metadata.clone(),
            },
        );
        Ok(())
    }

    async fn list(&self, prefix: &str) -> Result<Vec<StoredObject>> {
        Ok(self
            .inner
            .lock()
            .expect("store poisoned")
            .iter()
            .filter(|(key, _)| key.starts_with(prefix))
            .map(|(key, entry)| StoredObject {
                key: key.clone(),
                size: entry.body.len() as i64,
            })
            .collect())
    }

    async fn head(&self, key: &str) -> Result<HashMap<String, String>> {
        self.inner
            .lock()
            .expect("store poisoned")
            .get(key)
            .map(|entry| entry.metadata.clone())
            .ok_or_else(|| Error::Infra {
                service: "object-store".into(),
                detail: format!("no such key: {key}"),
            })
    }

    async fn signed_url(&self, key: &str, expires_secs: u64) -> Result<String> {
        Ok(format!("memory://{key}?expires={expires_secs}"))
    }

    async fn get(&self, key: &str) -> Result<Vec<u8>> {
        self.inner
            .lock()
            .expect("store poisoned")
            .get(key)
            .map(|entry| entry.body.clone())
            .ok_or_else(|| Error::Infra {
                service: "object-store".into(),
                detail: format!("no such key: {key}"),
            })
    }
}
