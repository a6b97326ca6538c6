use std::collections::HashSet;

use crate::Result;
use indoc::formatdoc;
use sqlx::PgPool;

/// A tenant schema to be provisioned alongside the shared control schema.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AgencySchema {
    pub schema: String,
}

impl AgencySchema {
    pub fn new(schema: impl Into<String>) -> Self {
        Self {
            schema: schema.into(),
        }
    }
}

#[derive(Clone, Debug)]
pub struct SchemaConfig {
    /// Shared schema holding the per-tenant directory.
    pub control_schema: String,
    pub agencies: Vec<AgencySchema>,
}

impl Default for SchemaConfig {
    fn default() -> Self {
        Self {
            control_schema: "public".into(),
            agencies: Vec::new(),
        }
    }
}

#[derive(Clone, Debug)]
pub struct SchemaAction {
    label: String,
    sql: String,
}

impl SchemaAction {
    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn sql(&self) -> &str {
        &self.sql
    }
}

#[derive(Clone, Debug, Default)]
pub struct SchemaPlan {
    pub actions: Vec<SchemaAction>,
}

impl SchemaPlan {
    fn push_action(&mut self, label: impl Into<String>, sql: impl Into<String>) {
        self.actions.push(SchemaAction {
            label: label.into(),
            sql: sql.into(),
        });
    }

    pub fn is_empty(&self) -> bool {
        self.actions.is_empty()
    }

    pub fn len(&self) -> usize {
        self.actions.len()
    }
}

#[derive(Clone, Debug)]
pub struct SchemaManager {
    pool: PgPool,
}

impl SchemaManager {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn plan(&self, config: &SchemaConfig) -> Result<SchemaPlan> {
        let mut plan = SchemaPlan::default();
        let existing_schemas = self.existing_schemas().await?;

        let control = config.control_schema.trim();
        self.plan_control_schema(&mut plan, control, existing_schemas.contains(control))
            .await?;

        for agency in &config.agencies {
            let schema = agency.schema.trim();
            self.plan_agency_schema(&mut plan, schema, existing_schemas.contains(schema))
                .await?;
        }

        Ok(plan)
    }

    pub async fn apply(&self, plan: &SchemaPlan) -> Result<()> {
        if plan.is_empty() {
            return Ok(());
        }

        let mut tx = self.pool.begin().await?;
        for action in &plan.actions {
            sqlx::query(action.sql()).execute(&mut *tx).await?;
        }
        tx.commit().await?;
        Ok(())
    }

    pub async fn sync(&self, config: &SchemaConfig) -> Result<SchemaPlan> {
        let plan = self.plan(config).await?;
        if !plan.is_empty() {
            self.apply(&plan).await?;
        }
        Ok(plan)
    }

    async fn plan_control_schema(
        &self,
        plan: &mut SchemaPlan,
        schema: &str,
        schema_exists: bool,
    ) -> Result<()> {
        if !schema_exists {
            plan.push_action(
                format!("create schema {}", quote_ident(schema)),
                format!("create schema if not exists {}", quote_ident(schema)),
            );
        }

        let existing_tables = if schema_exists {
            self.existing_tables(schema).await?
        } else {
            HashSet::new()
        };

        ensure_table(
            plan,
            schema,
            &existing_tables,
            "agencies",
            build_agencies_table_sql,
        );
        Ok(())
    }

    async fn plan_agency_schema(
        &self,
        plan: &mut SchemaPlan,
        schema: &str,
        schema_exists: bool,
    ) -> Result<()> {
        if !schema_exists {
            plan.push_action(
                format!("create schema {}", quote_ident(schema)),
                format!("create schema if not exists {}", quote_ident(schema)),
            );
        }

        let existing_tables = if schema_exists {
            self.existing_tables(schema).await?
        } else {
            HashSet::new()
        };

        // Referenced tables first.
        ensure_table(
            plan,
            schema,
            &existing_tables,
            "defendants",
            build_defendants_table_sql,
        );
        ensure_table(
            plan,
            schema,
            &existing_tables,
            "defendant_contacts",
            build_defendant_contacts_table_sql,
        );
        ensure_table(
            plan,
            schema,
            &existing_tables,
            "charges",
            build_charges_table_sql,
        );
        ensure_table(
            plan,
            schema,
            &existing_tables,
            "case_records",
            build_case_records_table_sql,
        );
        ensure_table(
            plan,
            schema,
            &existing_tables,
            "case_charges",
            build_case_charges_table_sql,
        );
        ensure_table(
            plan,
            schema,
            &existing_tables,
            "permissions",
            build_permissions_table_sql,
        );

        let existing_indexes = if schema_exists {
            self.existing_indexes(schema).await?
        } else {
            HashSet::new()
        };

        ensure_index(
            plan,
            schema,
            &existing_indexes,
            "case_records_violation_idx",
            build_violation_index_sql,
        );

        Ok(())
    }

    async fn existing_schemas(&self) -> Result<HashSet<String>> {
        let rows: Vec<(String,)> =
            sqlx::query_as("select schema_name from information_schema.schemata")
                .fetch_all(&self.pool)
                .await?;
        Ok(rows.into_iter().map(|(name,)| name).collect())
    }

    async fn existing_tables(&self, schema: &str) -> Result<HashSet<String>> {
        let rows: Vec<(String,)> = sqlx::query_as(
            "select table_name from information_schema.tables where table_schema = $1",
        )
        .bind(schema)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.into_iter().map(|(name,)| name).collect())
    }

    async fn existing_indexes(&self, schema: &str) -> Result<HashSet<String>> {
        let rows: Vec<(String,)> =
            sqlx::query_as("select indexname from pg_indexes where schemaname = $1")
                .bind(schema)
                .fetch_all(&self.pool)
                .await?;
        Ok(rows.into_iter().map(|(name,)| name).collect())
    }
}

fn ensure_table(
    plan: &mut SchemaPlan,
    schema: &str,
    existing: &HashSet<String>,
    table: &str,
    build: impl Fn(&str) -> String,
) {
    if !existing.contains(table) {
        plan.push_action(
            format!("create table {}", qualified_name(schema, table)),
            build(schema),
        );
    }
}

fn ensure_index(
    plan: &mut SchemaPlan,
    schema: &str,
    existing: &HashSet<String>,
    index: &str,
    build: impl Fn(&str) -> String,
) {
    if !existing.contains(index) {
        plan.push_action(
            format!("create index {} on {}", index, quote_ident(schema)),
            build(schema),
        );
    }
}

fn build_agencies_table_sql(schema: &str) -> String {
    formatdoc!(
        r#"
        create table if not exists {table} (
            agency_id text primary key,
            schema_name text not null unique,
            display_name text,
            created_on timestamptz not null default now()
        )
        "#,
        table = qualified_name(schema, "agencies"),
    )
}

fn build_defendants_table_sql(schema: &str) -> String {
    formatdoc!(
        r#"
        create table if not exists {table} (
            id bigserial primary key,
            first_name text not null,
            middle_name text,
            last_name text not null,
            suffix text,
            ssn_id text not null,
            dob date,
            height text,
            weight text,
            eye_color text,
            hair_color text,
            is_active boolean not null default true,
            created_by text,
            created_on timestamptz not null default now(),
            modified_by text,
            modified_on timestamptz,
            constraint defendants_ssn_key unique (ssn_id)
        )
        "#,
        table = qualified_name(schema, "defendants"),
    )
}

fn build_defendant_contacts_table_sql(schema: &str) -> String {
    formatdoc!(
        r#"
        create table if not exists {table} (
            id bigserial primary key,
            defendant_id bigint not null references {defendants} (id),
            mailing_address text not null,
            address_delivery_point text not null,
            location_city_name text not null,
            location_state_code text not null,
            location_postal_code text not null,
            phone_number text not null,
            is_active boolean not null default true,
            created_by text,
            created_on timestamptz not null default now(),
            modified_by text,
            modified_on timestamptz,
            constraint defendant_contacts_dedup_key unique (
                defendant_id, mailing_address, address_delivery_point,
                location_city_name, location_state_code, location_postal_code,
                phone_number
            )
        )
        "#,
        table = qualified_name(schema, "defendant_contacts"),
        defendants = qualified_name(schema, "defendants"),
    )
}

fn build_charges_table_sql(schema: &str) -> String {
    formatdoc!(
        r#"
        create table if not exists {table} (
            id bigserial primary key,
            charge_code text not null,
            charge_description text,
            charge_type text,
            is_active boolean not null default true,
            created_by text,
            created_on timestamptz not null default now(),
            modified_by text,
            modified_on timestamptz
        )
        "#,
        table = qualified_name(schema, "charges"),
    )
}

fn build_case_records_table_sql(schema: &str) -> String {
    formatdoc!(
        r#"
        create table if not exists {table} (
            id bigserial primary key,
            case_number text not null,
            ticket_number text,
            hearing_date date,
            hearing_time text,
            violation_date date not null,
            issue_datetime timestamptz,
            charge_window_start timestamptz,
            charge_window_end timestamptz,
            violation_location text,
            case_type text,
            defendant_id bigint not null references {defendants} (id),
            is_active boolean not null default true,
            created_by text,
            created_on timestamptz not null default now(),
            modified_by text,
            modified_on timestamptz,
            constraint case_records_number_key unique (case_number)
        )
        "#,
        table = qualified_name(schema, "case_records"),
        defendants = qualified_name(schema, "defendants"),
    )
}

fn build_case_charges_table_sql(schema: &str) -> String {
    formatdoc!(
        r#"
        create table if not exists {table} (
            case_record_id bigint not null references {cases} (id) on delete cascade,
            charge_id bigint not null references {charges} (id),
            created_by text,
            created_on timestamptz not null default now(),
            constraint case_charges_link_key unique (case_record_id, charge_id)
        )
        "#,
        table = qualified_name(schema, "case_charges"),
        cases = qualified_name(schema, "case_records"),
        charges = qualified_name(schema, "charges"),
    )
}

fn build_permissions_table_sql(schema: &str) -> String {
    formatdoc!(
        r#"
        create table if not exists {table} (
            id bigserial primary key,
            user_role text,
            permission_action text,
            module text
        )
        "#,
        table = qualified_name(schema, "permissions"),
    )
}

fn build_violation_index_sql(schema: &str) -> String {
    format!(
        "create index if not exists case_records_violation_idx on {} (violation_date desc, created_on desc)",
        qualified_name(schema, "case_records"),
    )
}

pub fn qualified_name(schema: &str, ident: &str) -> String {
    format!("{}.{}", quote_ident(schema), quote_ident(ident))
}

pub fn quote_ident(value: &str) -> String {
    let escaped = value.replace('"', "\"\"");
    format!("\"{}\"", escaped)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn qualified() {
        assert_eq!(
            qualified_name("agency_pd", "case_records"),
            "\"agency_pd\".\"case_records\""
        );
    }

    #[test]
    fn quote_handles_quotes() {
        assert_eq!(quote_ident("weird\"name"), "\"weird\"\"name\"");
    }

    #[test]
    fn dedup_constraints_back_the_natural_keys() {
        assert!(build_defendants_table_sql("a").contains("unique (ssn_id)"));
        assert!(build_defendant_contacts_table_sql("a").contains("defendant_contacts_dedup_key"));
        assert!(build_case_charges_table_sql("a").contains("case_charges_link_key"));
    }
}
