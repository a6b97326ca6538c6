use std::collections::HashMap;
use std::time::{Duration, Instant};

use chrono::NaiveDate;
use serde::Serialize;
use sqlx::{Postgres, QueryBuilder};

use crate::{
    metrics,
    model::{utc_aware_opt, CaseInput, CaseRecord, Charge, Contact, Defendant, DefendantInput},
    query::{build_conditions, push_where, CaseQuery, Condition},
    session::TenantSession,
    Error, Result, Store,
};

const SLOW_QUERY_THRESHOLD: Duration = Duration::from_millis(500);

const JOINED_GRAPH: &str = "from case_records cr \
     join defendants d on d.id = cr.defendant_id \
     join case_charges cc on cc.case_record_id = cr.id \
     join charges ch on ch.id = cc.charge_id";

/// Case-record engine: search, fetch, create and update, each as one
/// tenant-scoped unit of work.
pub struct CaseRecords {
    store: Store,
}

#[derive(Clone, Debug, Serialize)]
pub struct ChargeRef {
    pub charge_id: i64,
    pub charge_code: String,
    pub charge_description: Option<String>,
    pub charge_type: Option<String>,
}

/// One case flattened for list responses: direct fields, the defendant's
/// name parts, and its charges.
#[derive(Clone, Debug, Serialize)]
pub struct CaseSummary {
    pub id: i64,
    pub hearing_date: Option<NaiveDate>,
    pub hearing_time: Option<String>,
    pub violation_date: NaiveDate,
    pub case_number: String,
    pub ticket_number: Option<String>,
    pub first_name: Option<String>,
    pub middle_name: Option<String>,
    pub last_name: Option<String>,
    pub charges: Vec<ChargeRef>,
    pub case_type: Option<String>,
}

#[derive(Clone, Debug, Serialize)]
pub struct CasePage {
    pub total_pages: i64,
    pub total_records: i64,
    pub result: Vec<CaseSummary>,
}

#[derive(Clone, Debug, Serialize)]
pub struct CaseDetail {
    pub case: CaseRecord,
    pub defendant: Option<Defendant>,
    pub contacts: Vec<Contact>,
    pub charge_ids: Vec<i64>,
}

#[derive(Clone, Debug, Serialize)]
pub struct DefendantDetail {
    pub defendant: Defendant,
    pub contacts: Vec<Contact>,
}

/// Whether a matched defendant/contact row is merely reused (create path) or
/// has every incoming field written over it (update path).
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Reconcile {
    Reuse,
    Overwrite,
}

impl CaseRecords {
    pub(crate) fn new(store: Store) -> Self {
        Self { store }
    }

    pub async fn search(&self, agency: &str, query: &CaseQuery) -> Result<CasePage> {
        let mut session = self.store.session(agency).await?;
        let outcome = search_in(&mut session, query).await;
        session.finish(outcome).await
    }

    pub async fn fetch(&self, agency: &str, case_number: &str) -> Result<CaseDetail> {
        let mut session = self.store.session(agency).await?;
        let outcome = fetch_in(&mut session, case_number).await;
        session.finish(outcome).await
    }

    /// Create a case together with its defendant, contacts and charge links,
    /// committing once. A missing charge id aborts the whole unit.
    pub async fn create(&self, agency: &str, actor: &str, input: &CaseInput) -> Result<i64> {
        let mut session = self.store.session(agency).await?;
        let outcome = create_in(&mut session, actor, input).await;
        session.finish(outcome).await
    }

    /// Full update of the case identified by its case number, reconciling the
    /// defendant and contacts and replacing the charge links wholesale.
    pub async fn update(
        &self,
        agency: &str,
        actor: &str,
        case_number: &str,
        input: &CaseInput,
    ) -> Result<()> {
        let mut session = self.store.session(agency).await?;
        let outcome = update_in(&mut session, actor, case_number, input).await;
        session.finish(outcome).await
    }

    pub async fn all_defendants(&self, agency: &str) -> Result<Vec<DefendantDetail>> {
        let mut session = self.store.session(agency).await?;
        let outcome = all_defendants_in(&mut session).await;
        session.finish(outcome).await
    }

    pub async fn all_charges(&self, agency: &str) -> Result<Vec<Charge>> {
        let mut session = self.store.session(agency).await?;
        let outcome = all_charges_in(&mut session).await;
        session.finish(outcome).await
    }
}

pub(crate) fn total_pages(total_records: i64, page_size: i64) -> i64 {
    (total_records + page_size - 1) / page_size
}

async fn search_in(session: &mut TenantSession, query: &CaseQuery) -> Result<CasePage> {
    metrics::record_search_query();
    let conditions = build_conditions(query);
    let total_records = count_records(session, &conditions).await?;
    let page_size = i64::from(query.page_size.max(1));

    // Page 0 and past-the-end pages yield an empty result list, not an error.
    let result = if query.page == 0 {
        Vec::new()
    } else {
        let offset = (i64::from(query.page) - 1) * page_size;
        let cases = fetch_page(session, &conditions, offset, page_size).await?;
        shape_cases(session, cases).await?
    };

    Ok(CasePage {
        total_pages: total_pages(total_records, page_size),
        total_records,
        result,
    })
}

async fn count_records(session: &mut TenantSession, conditions: &[Condition]) -> Result<i64> {
    let mut builder: QueryBuilder<'static, Postgres> =
        QueryBuilder::new(format!("select count(distinct cr.id) {JOINED_GRAPH}"));
    push_where(&mut builder, conditions);
    let total = builder
        .build_query_scalar::<i64>()
        .fetch_one(session.conn())
        .await?;
    Ok(total)
}

async fn fetch_page(
    session: &mut TenantSession,
    conditions: &[Condition],
    offset: i64,
    limit: i64,
) -> Result<Vec<CaseRecord>> {
    let mut builder: QueryBuilder<'static, Postgres> =
        QueryBuilder::new(format!("select distinct cr.* {JOINED_GRAPH}"));
    push_where(&mut builder, conditions);
    builder.push(" order by cr.violation_date desc, cr.created_on desc limit ");
    builder.push_bind(limit);
    builder.push(" offset ");
    builder.push_bind(offset);

    let sql_captured = builder.sql().to_string();
    let start = Instant::now();
    let rows = builder
        .build_query_as::<CaseRecord>()
        .fetch_all(session.conn())
        .await?;
    if start.elapsed() > SLOW_QUERY_THRESHOLD {
        tracing::warn!(
            target: "docketflow::slow_query",
            elapsed_ms = start.elapsed().as_millis() as u64,
            sql = %sql_captured,
            "slow case search"
        );
    }
    Ok(rows)
}

async fn shape_cases(
    session: &mut TenantSession,
    cases: Vec<CaseRecord>,
) -> Result<Vec<CaseSummary>> {
    if cases.is_empty() {
        return Ok(Vec::new());
    }

    let case_ids: Vec<i64> = cases.iter().map(|case| case.id).collect();
    let defendant_ids: Vec<i64> = cases.iter().map(|case| case.defendant_id).collect();

    let defendants: Vec<Defendant> = sqlx::query_as("select * from defendants where id = any($1)")
        .bind(&defendant_ids)
        .fetch_all(session.conn())
        .await?;
    let defendants: HashMap<i64, Defendant> = defendants
        .into_iter()
        .map(|defendant| (defendant.id, defendant))
        .collect();

    // Left join so a dangling charge reference drops the entry, not the case.
    let charge_rows: Vec<(i64, Option<i64>, Option<String>, Option<String>, Option<String>)> =
        sqlx::query_as(
            "select cc.case_record_id, ch.id, ch.charge_code, ch.charge_description, ch.charge_type
             from case_charges cc
             left join charges ch on ch.id = cc.charge_id
             where cc.case_record_id = any($1)
             order by ch.id",
        )
        .bind(&case_ids)
        .fetch_all(session.conn())
        .await?;

    let mut charges_by_case: HashMap<i64, Vec<ChargeRef>> = HashMap::new();
    for (case_id, charge_id, code, description, charge_type) in charge_rows {
        let Some(charge_id) = charge_id else {
            continue;
        };
        charges_by_case.entry(case_id).or_default().push(ChargeRef {
            charge_id,
            charge_code: code.unwrap_or_default(),
            charge_description: description,
            charge_type,
        });
    }

    Ok(cases
        .into_iter()
        .map(|case| {
            let defendant = defendants.get(&case.defendant_id);
            CaseSummary {
                id: case.id,
                hearing_date: case.hearing_date,
                hearing_time: case.hearing_time,
                violation_date: case.violation_date,
                case_number: case.case_number,
                ticket_number: case.ticket_number,
                first_name: defendant.map(|d| d.first_name.clone()),
                middle_name: defendant.and_then(|d| d.middle_name.clone()),
                last_name: defendant.map(|d| d.last_name.clone()),
                charges: charges_by_case.remove(&case.id).unwrap_or_default(),
                case_type: case.case_type,
            }
        })
        .collect())
}

async fn fetch_in(session: &mut TenantSession, case_number: &str) -> Result<CaseDetail> {
    metrics::record_case_read();
    let case: Option<CaseRecord> =
        sqlx::query_as("select * from case_records where case_number = $1")
            .bind(case_number)
            .fetch_optional(session.conn())
            .await?;
    let case = case.ok_or_else(|| Error::CaseNotFound(case_number.to_string()))?;

    let defendant: Option<Defendant> = sqlx::query_as("select * from defendants where id = $1")
        .bind(case.defendant_id)
        .fetch_optional(session.conn())
        .await?;

    let contacts: Vec<Contact> = match &defendant {
        Some(defendant) => {
            sqlx::query_as("select * from defendant_contacts where defendant_id = $1 order by id")
                .bind(defendant.id)
                .fetch_all(session.conn())
                .await?
        }
        None => Vec::new(),
    };

    let charge_ids: Vec<i64> = sqlx::query_scalar(
        "select charge_id from case_charges where case_record_id = $1 order by charge_id",
    )
    .bind(case.id)
    .fetch_all(session.conn())
    .await?;

    Ok(CaseDetail {
        case,
        defendant,
        contacts,
        charge_ids,
    })
}

async fn create_in(session: &mut TenantSession, actor: &str, input: &CaseInput) -> Result<i64> {
    let defendant_id =
        reconcile_defendant(session, actor, &input.defendant, Reconcile::Reuse).await?;

    let case_id: i64 = sqlx::query_scalar(
        "insert into case_records (
             case_number, ticket_number, hearing_date, hearing_time, violation_date,
             issue_datetime, charge_window_start, charge_window_end,
             violation_location, case_type, defendant_id, created_by
         ) values ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12)
         returning id",
    )
    .bind(&input.case_number)
    .bind(&input.ticket_number)
    .bind(input.hearing_date)
    .bind(&input.hearing_time)
    .bind(input.violation_date)
    .bind(utc_aware_opt(input.issue_datetime))
    .bind(utc_aware_opt(input.charge_window_start))
    .bind(utc_aware_opt(input.charge_window_end))
    .bind(&input.violation_location)
    .bind(&input.case_type)
    .bind(defendant_id)
    .bind(actor)
    .fetch_one(session.conn())
    .await
    .map_err(db_write_err)?;

    link_charges(session, actor, case_id, &input.charge_ids).await?;
    metrics::record_case_write();
    Ok(case_id)
}

async fn update_in(
    session: &mut TenantSession,
    actor: &str,
    case_number: &str,
    input: &CaseInput,
) -> Result<()> {
    let case_id: Option<i64> = sqlx::query_scalar("select id from case_records where case_number = $1")
        .bind(case_number)
        .fetch_optional(session.conn())
        .await?;
    let case_id = case_id.ok_or_else(|| Error::CaseNotFound(case_number.to_string()))?;

    let defendant_id =
        reconcile_defendant(session, actor, &input.defendant, Reconcile::Overwrite).await?;

    sqlx::query(
        "update case_records set
             case_number = $1, ticket_number = $2, hearing_date = $3, hearing_time = $4,
             violation_date = $5, issue_datetime = $6, charge_window_start = $7,
             charge_window_end = $8, violation_location = $9, case_type = $10,
             defendant_id = $11, modified_by = $12, modified_on = now()
         where id = $13",
    )
    .bind(&input.case_number)
    .bind(&input.ticket_number)
    .bind(input.hearing_date)
    .bind(&input.hearing_time)
    .bind(input.violation_date)
    .bind(utc_aware_opt(input.issue_datetime))
    .bind(utc_aware_opt(input.charge_window_start))
    .bind(utc_aware_opt(input.charge_window_end))
    .bind(&input.violation_location)
    .bind(&input.case_type)
    .bind(defendant_id)
    .bind(actor)
    .bind(case_id)
    .execute(session.conn())
    .await
    .map_err(db_write_err)?;

    // Charge links are replaced wholesale, not diffed.
    sqlx::query("delete from case_charges where case_record_id = $1")
        .bind(case_id)
        .execute(session.conn())
        .await?;
    link_charges(session, actor, case_id, &input.charge_ids).await?;
    metrics::record_case_write();
    Ok(())
}

/// Find-or-create the defendant by natural key, then each contact by its
/// composite key. No locking: concurrent creators race to the unique
/// constraints, which surface as a conflict rather than a duplicate row.
async fn reconcile_defendant(
    session: &mut TenantSession,
    actor: &str,
    input: &DefendantInput,
    mode: Reconcile,
) -> Result<i64> {
    let existing: Option<i64> = sqlx::query_scalar("select id from defendants where ssn_id = $1")
        .bind(&input.ssn_id)
        .fetch_optional(session.conn())
        .await?;

    let defendant_id = match existing {
        Some(id) => {
            if mode == Reconcile::Overwrite {
                sqlx::query(
                    "update defendants set
                         first_name = $1, middle_name = $2, last_name = $3, suffix = $4,
                         ssn_id = $5, dob = $6, height = $7, weight = $8,
                         eye_color = $9, hair_color = $10,
                         modified_by = $11, modified_on = now()
                     where id = $12",
                )
                .bind(&input.first_name)
                .bind(&input.middle_name)
                .bind(&input.last_name)
                .bind(&input.suffix)
                .bind(&input.ssn_id)
                .bind(input.dob)
                .bind(&input.height)
                .bind(&input.weight)
                .bind(&input.eye_color)
                .bind(&input.hair_color)
                .bind(actor)
                .bind(id)
                .execute(session.conn())
                .await
                .map_err(db_write_err)?;
            }
            id
        }
        None => sqlx::query_scalar(
            "insert into defendants (
                 first_name, middle_name, last_name, suffix, ssn_id, dob,
                 height, weight, eye_color, hair_color, created_by
             ) values ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)
             returning id",
        )
        .bind(&input.first_name)
        .bind(&input.middle_name)
        .bind(&input.last_name)
        .bind(&input.suffix)
        .bind(&input.ssn_id)
        .bind(input.dob)
        .bind(&input.height)
        .bind(&input.weight)
        .bind(&input.eye_color)
        .bind(&input.hair_color)
        .bind(actor)
        .fetch_one(session.conn())
        .await
        .map_err(db_write_err)?,
    };

    for contact in &input.contacts {
        let found: Option<i64> = sqlx::query_scalar(
            "select id from defendant_contacts
             where defendant_id = $1 and mailing_address = $2 and address_delivery_point = $3
               and location_city_name = $4 and location_state_code = $5
               and location_postal_code = $6 and phone_number = $7",
        )
        .bind(defendant_id)
        .bind(&contact.mailing_address)
        .bind(&contact.address_delivery_point)
        .bind(&contact.location_city_name)
        .bind(&contact.location_state_code)
        .bind(&contact.location_postal_code)
        .bind(&contact.phone_number)
        .fetch_optional(session.conn())
        .await?;

        match found {
            Some(contact_id) => {
                if mode == Reconcile::Overwrite {
                    sqlx::query(
                        "update defendant_contacts set
                             mailing_address = $1, address_delivery_point = $2,
                             location_city_name = $3, location_state_code = $4,
                             location_postal_code = $5, phone_number = $6,
                             modified_by = $7, modified_on = now()
                         where id = $8",
                    )
                    .bind(&contact.mailing_address)
                    .bind(&contact.address_delivery_point)
                    .bind(&contact.location_city_name)
                    .bind(&contact.location_state_code)
                    .bind(&contact.location_postal_code)
                    .bind(&contact.phone_number)
                    .bind(actor)
                    .bind(contact_id)
                    .execute(session.conn())
                    .await
                    .map_err(db_write_err)?;
                }
            }
            None => {
                sqlx::query(
                    "insert into defendant_contacts (
                         defendant_id, mailing_address, address_delivery_point,
                         location_city_name, location_state_code, location_postal_code,
                         phone_number, created_by
                     ) values ($1, $2, $3, $4, $5, $6, $7, $8)",
                )
                .bind(defendant_id)
                .bind(&contact.mailing_address)
                .bind(&contact.address_delivery_point)
                .bind(&contact.location_city_name)
                .bind(&contact.location_state_code)
                .bind(&contact.location_postal_code)
                .bind(&contact.phone_number)
                .bind(actor)
                .execute(session.conn())
                .await
                .map_err(db_write_err)?;
            }
        }
    }

    Ok(defendant_id)
}

async fn link_charges(
    session: &mut TenantSession,
    actor: &str,
    case_id: i64,
    charge_ids: &[i64],
) -> Result<()> {
    for &charge_id in charge_ids {
        let exists: Option<i64> = sqlx::query_scalar("select id from charges where id = $1")
            .bind(charge_id)
            .fetch_optional(session.conn())
            .await?;
        if exists.is_none() {
            return Err(Error::ChargeNotFound(charge_id));
        }
        sqlx::query(
            "insert into case_charges (case_record_id, charge_id, created_by)
             values ($1, $2, $3)",
        )
        .bind(case_id)
        .bind(charge_id)
        .bind(actor)
        .execute(session.conn())
        .await
        .map_err(db_write_err)?;
    }
    Ok(())
}

async fn all_defendants_in(session: &mut TenantSession) -> Result<Vec<DefendantDetail>> {
    let defendants: Vec<Defendant> = sqlx::query_as(
        "select distinct d.* from defendants d
         join defendant_contacts dc on dc.defendant_id = d.id
         order by d.id",
    )
    .fetch_all(session.conn())
    .await?;

    if defendants.is_empty() {
        return Err(Error::DefendantsNotFound);
    }

    let ids: Vec<i64> = defendants.iter().map(|d| d.id).collect();
    let contacts: Vec<Contact> = sqlx::query_as(
        "select * from defendant_contacts where defendant_id = any($1) order by id",
    )
    .bind(&ids)
    .fetch_all(session.conn())
    .await?;

    let mut contacts_by_defendant: HashMap<i64, Vec<Contact>> = HashMap::new();
    for contact in contacts {
        contacts_by_defendant
            .entry(contact.defendant_id)
            .or_default()
            .push(contact);
    }

    Ok(defendants
        .into_iter()
        .map(|defendant| {
            let contacts = contacts_by_defendant
                .remove(&defendant.id)
                .unwrap_or_default();
            DefendantDetail {
                defendant,
                contacts,
            }
        })
        .collect())
}

async fn all_charges_in(session: &mut TenantSession) -> Result<Vec<Charge>> {
    let charges: Vec<Charge> = sqlx::query_as("select * from charges order by id")
        .fetch_all(session.conn())
        .await?;
    if charges.is_empty() {
        return Err(Error::ChargesNotFound);
    }
    Ok(charges)
}

fn db_write_err(err: sqlx::Error) -> Error {
    let err = Error::from_sqlx(err);
    if matches!(err, Error::DuplicateKey { .. }) {
        metrics::record_duplicate_conflict();
    }
    err
}
