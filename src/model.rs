use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use serde::{Deserialize, Serialize};

/// Audit columns carried by every mutable row. Populated by the write paths
/// from the acting user, never from client input.
#[derive(Clone, Debug, Serialize, sqlx::FromRow)]
pub struct AuditStamp {
    pub is_active: bool,
    pub created_by: Option<String>,
    pub created_on: DateTime<Utc>,
    pub modified_by: Option<String>,
    pub modified_on: Option<DateTime<Utc>>,
}

#[derive(Clone, Debug, Serialize, sqlx::FromRow)]
pub struct CaseRecord {
    pub id: i64,
    pub case_number: String,
    pub ticket_number: Option<String>,
    pub hearing_date: Option<NaiveDate>,
    pub hearing_time: Option<String>,
    pub violation_date: NaiveDate,
    pub issue_datetime: Option<DateTime<Utc>>,
    pub charge_window_start: Option<DateTime<Utc>>,
    pub charge_window_end: Option<DateTime<Utc>>,
    pub violation_location: Option<String>,
    pub case_type: Option<String>,
    pub defendant_id: i64,
    #[sqlx(flatten)]
    #[serde(flatten)]
    pub audit: AuditStamp,
}

#[derive(Clone, Debug, Serialize, sqlx::FromRow)]
pub struct Defendant {
    pub id: i64,
    pub first_name: String,
    pub middle_name: Option<String>,
    pub last_name: String,
    pub suffix: Option<String>,
    /// Natural dedup key: one defendant row per ssn id within an agency schema.
    pub ssn_id: String,
    pub dob: Option<NaiveDate>,
    pub height: Option<String>,
    pub weight: Option<String>,
    pub eye_color: Option<String>,
    pub hair_color: Option<String>,
    #[sqlx(flatten)]
    #[serde(flatten)]
    pub audit: AuditStamp,
}

#[derive(Clone, Debug, Serialize, sqlx::FromRow)]
pub struct Contact {
    pub id: i64,
    pub defendant_id: i64,
    pub mailing_address: String,
    pub address_delivery_point: String,
    pub location_city_name: String,
    pub location_state_code: String,
    pub location_postal_code: String,
    pub phone_number: String,
    #[sqlx(flatten)]
    #[serde(flatten)]
    pub audit: AuditStamp,
}

#[derive(Clone, Debug, Serialize, sqlx::FromRow)]
pub struct Charge {
    pub id: i64,
    pub charge_code: String,
    pub charge_description: Option<String>,
    pub charge_type: Option<String>,
    #[sqlx(flatten)]
    #[serde(flatten)]
    pub audit: AuditStamp,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ContactInput {
    pub mailing_address: String,
    pub address_delivery_point: String,
    pub location_city_name: String,
    pub location_state_code: String,
    pub location_postal_code: String,
    pub phone_number: String,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct DefendantInput {
    pub first_name: String,
    pub middle_name: Option<String>,
    pub last_name: String,
    pub suffix: Option<String>,
    pub ssn_id: String,
    pub dob: Option<NaiveDate>,
    pub height: Option<String>,
    pub weight: Option<String>,
    pub eye_color: Option<String>,
    pub hair_color: Option<String>,
    #[serde(default)]
    pub contacts: Vec<ContactInput>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct CaseInput {
    pub case_number: String,
    pub ticket_number: Option<String>,
    pub hearing_date: Option<NaiveDate>,
    pub hearing_time: Option<String>,
    pub violation_date: NaiveDate,
    pub issue_datetime: Option<NaiveDateTime>,
    pub charge_window_start: Option<NaiveDateTime>,
    pub charge_window_end: Option<NaiveDateTime>,
    pub violation_location: Option<String>,
    pub case_type: Option<String>,
    pub defendant: DefendantInput,
    #[serde(default)]
    pub charge_ids: Vec<i64>,
}

/// Naive timestamps supplied by callers are taken to already be UTC and are
/// tagged as such before storage. Persisted timestamps are always aware.
pub fn utc_aware(dt: NaiveDateTime) -> DateTime<Utc> {
    dt.and_utc()
}

pub fn utc_aware_opt(dt: Option<NaiveDateTime>) -> Option<DateTime<Utc>> {
    dt.map(utc_aware)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{NaiveDate, Timelike};

    #[test]
    fn naive_timestamps_become_utc() {
        let naive = NaiveDate::from_ymd_opt(2024, 1, 15)
            .unwrap()
            .and_hms_opt(9, 30, 0)
            .unwrap();
        let aware = utc_aware(naive);
        assert_eq!(aware.hour(), 9);
        assert_eq!(aware.timezone(), Utc);
        assert_eq!(utc_aware_opt(None), None);
    }
}
