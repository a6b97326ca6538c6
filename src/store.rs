use std::collections::HashMap;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use sqlx::{
    postgres::{PgConnectOptions, PgPoolOptions},
    PgPool,
};
use tokio::time::sleep;

use crate::{
    cache::TtlCache,
    metrics,
    permissions::{PermissionGrant, Permissions},
    records::CaseRecords,
    schema::{AgencySchema, SchemaConfig, SchemaManager},
    session::TenantSession,
    Error, Result,
};

const DIRECTORY_CACHE_CAPACITY: usize = 100;
const DIRECTORY_CACHE_TTL: Duration = Duration::from_secs(600);
const PERMISSION_CACHE_CAPACITY: usize = 100;
const PERMISSION_CACHE_TTL: Duration = Duration::from_secs(600);

/// Metadata key carrying the tenant identifier on incoming requests.
pub const CLIENT_METADATA_KEY: &str = "x-client";

/// Extract the agency identifier from request metadata.
pub fn agency_from_metadata(metadata: &HashMap<String, String>) -> Result<&str> {
    metadata
        .get(CLIENT_METADATA_KEY)
        .map(String::as_str)
        .filter(|value| !value.is_empty())
        .ok_or(Error::TenantRequired)
}

/// Normalize an agency identifier into its schema name.
pub fn agency_schema_name(agency: &str) -> String {
    let mut normalized = String::with_capacity(agency.len());
    for ch in agency.chars() {
        if ch.is_ascii_alphanumeric() || ch == '_' {
            normalized.push(ch.to_ascii_lowercase());
        } else {
            normalized.push('_');
        }
    }
    if normalized.is_empty() {
        normalized.push('_');
    }
    format!("agency_{}", normalized)
}

fn agency_lock_key(schema: &str) -> i64 {
    const FNV_OFFSET_BASIS: u64 = 0xcbf29ce484222325;
    const FNV_PRIME: u64 = 0x100000001b3;

    let mut hash = FNV_OFFSET_BASIS;
    for byte in schema.as_bytes() {
        hash ^= u64::from(*byte);
        hash = hash.wrapping_mul(FNV_PRIME);
    }

    // Clamp to positive i64 so advisory locks stay within valid range.
    (hash & 0x7FFF_FFFF_FFFF_FFFF) as i64
}

#[derive(Clone)]
pub struct Store {
    pool: PgPool,
    directory_cache: Arc<TtlCache<String, String>>,
    permission_cache: Arc<TtlCache<(String, String), Vec<PermissionGrant>>>,
}

impl Store {
    pub async fn connect(url: &str) -> Result<Self> {
        let pool = PgPool::connect(url).await?;
        Ok(Self::with_pool(pool))
    }

    pub fn builder(url: impl Into<String>) -> StoreBuilder {
        StoreBuilder::new(url)
    }

    fn with_pool(pool: PgPool) -> Self {
        Self {
            pool,
            directory_cache: Arc::new(TtlCache::new(
                DIRECTORY_CACHE_CAPACITY,
                DIRECTORY_CACHE_TTL,
            )),
            permission_cache: Arc::new(TtlCache::new(
                PERMISSION_CACHE_CAPACITY,
                PERMISSION_CACHE_TTL,
            )),
        }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    pub fn schema(&self) -> SchemaManager {
        SchemaManager::new(self.pool.clone())
    }

    pub fn case_records(&self) -> CaseRecords {
        CaseRecords::new(self.clone())
    }

    pub fn permissions(&self) -> Permissions {
        Permissions::new(self.clone(), self.permission_cache.clone())
    }

    /// Open a tenant-scoped session: agency identifier in, scoped session out.
    ///
    /// The agency is resolved through the shared directory (cached); sessions
    /// are never produced by mutating shared connection state.
    pub async fn session(&self, agency: &str) -> Result<TenantSession> {
        let schema = self.resolve_schema(agency).await?;
        TenantSession::open(&self.pool, agency, &schema).await
    }

    async fn resolve_schema(&self, agency: &str) -> Result<String> {
        if let Some(schema) = self.directory_cache.get(&agency.to_string()) {
            metrics::record_cache_hit();
            return Ok(schema);
        }
        metrics::record_cache_miss();

        let row: Option<String> =
            sqlx::query_scalar("select schema_name from public.agencies where agency_id = $1")
                .bind(agency)
                .fetch_optional(&self.pool)
                .await?;
        match row {
            Some(schema) => {
                self.directory_cache.put(agency.to_string(), schema.clone());
                Ok(schema)
            }
            None => Err(Error::TenantNotFound(agency.to_string())),
        }
    }

    /// Provision an agency: create its schema and tables, register it in the
    /// shared directory, and drop any stale directory cache entry.
    pub async fn ensure_agency(&self, agency: &str) -> Result<()> {
        let schema = agency_schema_name(agency);
        let lock_key = agency_lock_key(&schema);
        let mut conn = self.pool.acquire().await?;
        let mut backoff = Duration::from_millis(50);

        loop {
            let acquired: bool = sqlx::query_scalar("select pg_try_advisory_lock($1)")
                .bind(lock_key)
                .fetch_one(&mut *conn)
                .await?;

            if acquired {
                break;
            }

            drop(conn);
            sleep(backoff).await;
            backoff = (backoff * 2).min(Duration::from_secs(2));
            conn = self.pool.acquire().await?;
        }

        let sync_result = async {
            let config = SchemaConfig {
                control_schema: "public".into(),
                agencies: vec![AgencySchema::new(&schema)],
            };
            self.schema().sync(&config).await?;
            sqlx::query(
                "insert into public.agencies (agency_id, schema_name, display_name)
                 values ($1, $2, $3)
                 on conflict (agency_id) do nothing",
            )
            .bind(agency)
            .bind(&schema)
            .bind(agency)
            .execute(&self.pool)
            .await?;
            Ok::<_, Error>(())
        }
        .await;

        let unlock_result = sqlx::query("select pg_advisory_unlock($1)")
            .bind(lock_key)
            .execute(&mut *conn)
            .await;

        drop(conn);

        sync_result?;
        unlock_result?;

        self.directory_cache.invalidate(&agency.to_string());
        Ok(())
    }

    pub async fn agency_exists(&self, agency: &str) -> Result<bool> {
        let exists: bool = sqlx::query_scalar(
            "select exists (select 1 from public.agencies where agency_id = $1)",
        )
        .bind(agency)
        .fetch_one(&self.pool)
        .await?;
        Ok(exists)
    }

    pub fn forget_agency(&self, agency: &str) {
        self.directory_cache.invalidate(&agency.to_string());
    }

    /// Lightweight liveness check for the connection pool.
    pub async fn pool_health(&self) -> Result<bool> {
        let one: i32 = sqlx::query_scalar("select 1").fetch_one(&self.pool).await?;
        Ok(one == 1)
    }
}

pub struct StoreBuilder {
    url: String,
    max_connections: Option<u32>,
    connect_timeout: Option<Duration>,
    prepared_statement_cache_size: Option<usize>,
}

impl StoreBuilder {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            max_connections: None,
            connect_timeout: None,
            prepared_statement_cache_size: None,
        }
    }

    pub fn max_connections(mut self, max: u32) -> Self {
        self.max_connections = Some(max.max(1));
        self
    }

    pub fn connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = Some(timeout);
        self
    }

    /// Hint for prepared statement cache size. Actual behavior depends on driver.
    pub fn prepared_statement_cache_size(mut self, size: usize) -> Self {
        self.prepared_statement_cache_size = Some(size.max(1));
        self
    }

    pub async fn build(self) -> Result<Store> {
        let mut opts = PgPoolOptions::new();
        if let Some(max) = self.max_connections {
            opts = opts.max_connections(max);
        }
        if let Some(t) = self.connect_timeout {
            opts = opts.acquire_timeout(t);
        }
        let pool = if let Some(cap) = self.prepared_statement_cache_size {
            let mut connect_opts = PgConnectOptions::from_str(&self.url)
                .map_err(|e| sqlx::Error::Configuration(Box::new(e)))?;
            connect_opts = connect_opts.statement_cache_capacity(cap);
            opts.connect_with(connect_opts).await?
        } else {
            opts.connect(&self.url).await?
        };
        Ok(Store::with_pool(pool))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn schema_names_are_normalized() {
        assert_eq!(agency_schema_name("Metro-PD"), "agency_metro_pd");
        assert_eq!(agency_schema_name("pd42"), "agency_pd42");
        assert_eq!(agency_schema_name(""), "agency__");
    }

    #[test]
    fn metadata_resolution_requires_client_key() {
        let mut metadata = HashMap::new();
        assert!(matches!(
            agency_from_metadata(&metadata),
            Err(Error::TenantRequired)
        ));

        metadata.insert(CLIENT_METADATA_KEY.to_string(), String::new());
        assert!(matches!(
            agency_from_metadata(&metadata),
            Err(Error::TenantRequired)
        ));

        metadata.insert(CLIENT_METADATA_KEY.to_string(), "metro".into());
        assert_eq!(agency_from_metadata(&metadata).unwrap(), "metro");
    }

    #[test]
    fn lock_keys_are_positive() {
        assert!(agency_lock_key("agency_metro_pd") >= 0);
        assert!(agency_lock_key("") >= 0);
    }
}
