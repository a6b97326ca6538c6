use anyhow::Result;
use docketflow::{Error, Store};
use testcontainers::{
    core::{IntoContainerPort, WaitFor},
    runners::AsyncRunner,
    GenericImage, ImageExt,
};

#[tokio::test]
async fn sessions_are_scoped_to_one_tenant_schema() -> Result<()> {
    // spin up postgres
    let image = GenericImage::new("postgres", "16-alpine")
        .with_exposed_port(5432.tcp())
        .with_wait_for(WaitFor::message_on_stderr(
            "database system is ready to accept connections",
        ))
        .with_env_var("POSTGRES_USER", "postgres")
        .with_env_var("POSTGRES_PASSWORD", "postgres");
    let container = image.start().await?;
    let host = container.get_host().await?;
    let port = container.get_host_port_ipv4(5432).await?;
    let url = format!("postgres://postgres:postgres@{host}:{port}/postgres?sslmode=disable");

    let store = Store::connect(&url).await?;
    store.ensure_agency("alpha").await?;
    store.ensure_agency("beta").await?;
    assert!(store.agency_exists("alpha").await?);
    assert!(!store.agency_exists("ghost").await?);

    // a write through alpha's session lands in alpha's schema only
    let mut session = store.session("alpha").await?;
    assert_eq!(session.schema(), "agency_alpha");
    sqlx::query("insert into charges (charge_code, created_by) values ('9-01', 'test')")
        .execute(session.conn())
        .await?;
    session.commit().await?;

    let mut alpha = store.session("alpha").await?;
    let in_alpha: i64 = sqlx::query_scalar("select count(*) from charges")
        .fetch_one(alpha.conn())
        .await?;
    alpha.rollback().await?;
    assert_eq!(in_alpha, 1);

    let mut beta = store.session("beta").await?;
    let in_beta: i64 = sqlx::query_scalar("select count(*) from charges")
        .fetch_one(beta.conn())
        .await?;
    beta.rollback().await?;
    assert_eq!(in_beta, 0);

    // the row is visible under its qualified name from outside any session
    let qualified: i64 = sqlx::query_scalar("select count(*) from agency_alpha.charges")
        .fetch_one(store.pool())
        .await?;
    assert_eq!(qualified, 1);

    // dropping a session without committing rolls its work back
    {
        let mut session = store.session("alpha").await?;
        sqlx::query("insert into charges (charge_code, created_by) values ('9-02', 'test')")
            .execute(session.conn())
            .await?;
        drop(session);
    }
    let mut alpha = store.session("alpha").await?;
    let after_drop: i64 = sqlx::query_scalar("select count(*) from charges")
        .fetch_one(alpha.conn())
        .await?;
    alpha.rollback().await?;
    assert_eq!(after_drop, 1);

    // unknown agencies fail resolution instead of falling through to public
    let err = store.session("ghost").await.unwrap_err();
    assert!(matches!(err, Error::TenantNotFound(ref agency) if agency == "ghost"));

    // permission grants live per tenant schema and refresh the cache on write
    let permissions = store.permissions();
    assert!(permissions.for_role("alpha", "clerk").await?.is_empty());
    permissions
        .grant("alpha", "clerk", "read", "case_records")
        .await?;
    let grants = permissions.for_role("alpha", "clerk").await?;
    assert_eq!(grants.len(), 1);
    assert_eq!(grants[0].action, "read");
    assert_eq!(grants[0].module, "case_records");
    assert!(permissions.for_role("beta", "clerk").await?.is_empty());

    Ok(())
}
