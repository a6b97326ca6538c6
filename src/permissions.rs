use std::sync::Arc;

use serde::Serialize;

use crate::{auth::AccessRole, cache::TtlCache, metrics, session::TenantSession, Result, Store};

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct PermissionGrant {
    pub action: String,
    pub module: String,
}

/// Per-tenant permission lookups with a bounded, time-limited cache.
///
/// The cache is refreshed by explicit calls from the write path after commit
/// (`grant` calls `refresh` itself); nothing is invalidated implicitly.
pub struct Permissions {
    store: Store,
    cache: Arc<TtlCache<(String, String), Vec<PermissionGrant>>>,
}

impl Permissions {
    pub(crate) fn new(
        store: Store,
        cache: Arc<TtlCache<(String, String), Vec<PermissionGrant>>>,
    ) -> Self {
        Self { store, cache }
    }

    /// Accumulated grants for every role the user carries in this agency.
    pub async fn for_roles(&self, agency: &str, roles: &[AccessRole]) -> Result<Vec<PermissionGrant>> {
        let mut grants = Vec::new();
        for role in roles {
            grants.extend(self.for_role(agency, role.name()).await?);
        }
        Ok(grants)
    }

    pub async fn for_role(&self, agency: &str, role: &str) -> Result<Vec<PermissionGrant>> {
        let key = (agency.to_string(), role.to_string());
        if let Some(grants) = self.cache.get(&key) {
            metrics::record_cache_hit();
            return Ok(grants);
        }
        metrics::record_cache_miss();

        let grants = self.load(agency, role).await?;
        self.cache.put(key, grants.clone());
        Ok(grants)
    }

    /// Drop the cached entry and reload from the tenant schema.
    pub async fn refresh(&self, agency: &str, role: &str) -> Result<Vec<PermissionGrant>> {
        self.invalidate(agency, role);
        self.for_role(agency, role).await
    }

    pub fn invalidate(&self, agency: &str, role: &str) {
        self.cache
            .invalidate(&(agency.to_string(), role.to_string()));
    }

    /// Record a grant for a role and refresh the cache once the row is
    /// committed.
    pub async fn grant(
        &self,
        agency: &str,
        role: &str,
        action: &str,
        module: &str,
    ) -> Result<()> {
        let mut session = self.store.session(agency).await?;
        let outcome = insert_grant(&mut session, role, action, module).await;
        session.finish(outcome).await?;
        self.refresh(agency, role).await?;
        Ok(())
    }

    async fn load(&self, agency: &str, role: &str) -> Result<Vec<PermissionGrant>> {
        let mut session = self.store.session(agency).await?;
        let outcome = load_grants(&mut session, role).await;
        session.finish(outcome).await
    }
}

async fn insert_grant(
    session: &mut TenantSession,
    role: &str,
    action: &str,
    module: &str,
) -> Result<()> {
    sqlx::query("insert into permissions (user_role, permission_action, module) values ($1, $2, $3)")
        .bind(role)
        .bind(action)
        .bind(module)
        .execute(session.conn())
        .await?;
    Ok(())
}

async fn load_grants(session: &mut TenantSession, role: &str) -> Result<Vec<PermissionGrant>> {
    let rows: Vec<(Option<String>, Option<String>)> = sqlx::query_as(
        "select permission_action, module from permissions where user_role = $1",
    )
    .bind(role)
    .fetch_all(session.conn())
    .await?;

    Ok(rows
        .into_iter()
        .map(|(action, module)| PermissionGrant {
            action: action.unwrap_or_default().trim().to_string(),
            module: module.unwrap_or_default().trim().to_string(),
        })
        .collect())
}
