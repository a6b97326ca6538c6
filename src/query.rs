use std::collections::BTreeMap;
use std::sync::OnceLock;

use chrono::NaiveDate;
use serde::Deserialize;
use sqlx::{Postgres, QueryBuilder};

/// Structured search input for the case-record list endpoint.
///
/// `filters` holds explicit field/value pairs; unknown fields are ignored.
/// The violation-date range is mandatory and inclusive on both ends.
#[derive(Clone, Debug, Deserialize)]
pub struct CaseQuery {
    #[serde(default)]
    pub filters: BTreeMap<String, String>,
    #[serde(default)]
    pub search_string: Option<String>,
    pub violation_start_date: NaiveDate,
    pub violation_end_date: NaiveDate,
    #[serde(default = "first_page")]
    pub page: u32,
    #[serde(default = "default_page_size")]
    pub page_size: u32,
}

fn first_page() -> u32 {
    1
}

fn default_page_size() -> u32 {
    10
}

impl CaseQuery {
    pub fn new(violation_start_date: NaiveDate, violation_end_date: NaiveDate) -> Self {
        Self {
            filters: BTreeMap::new(),
            search_string: None,
            violation_start_date,
            violation_end_date,
            page: first_page(),
            page_size: default_page_size(),
        }
    }

    pub fn filter(mut self, field: impl Into<String>, value: impl Into<String>) -> Self {
        self.filters.insert(field.into(), value.into());
        self
    }

    pub fn search(mut self, search_string: impl Into<String>) -> Self {
        self.search_string = Some(search_string.into());
        self
    }

    pub fn page(mut self, page: u32, page_size: u32) -> Self {
        self.page = page;
        self.page_size = page_size.max(1);
        self
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum MatchMode {
    /// Case-insensitive substring match.
    Substring,
    /// Exact match on the column's textual rendition.
    Exact,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum ColumnKind {
    Text,
    Date,
    Timestamp,
    Number,
}

struct ColumnDef {
    name: &'static str,
    kind: ColumnKind,
}

const fn col(name: &'static str, kind: ColumnKind) -> ColumnDef {
    ColumnDef { name, kind }
}

struct EntityColumns {
    alias: &'static str,
    columns: &'static [ColumnDef],
}

/// Searchable entities in filter-resolution order: a field name owned by more
/// than one entity binds to the first.
static SEARCHABLE: &[EntityColumns] = &[
    EntityColumns {
        alias: "cr",
        columns: &[
            col("id", ColumnKind::Number),
            col("case_number", ColumnKind::Text),
            col("ticket_number", ColumnKind::Text),
            col("hearing_date", ColumnKind::Date),
            col("hearing_time", ColumnKind::Text),
            col("violation_date", ColumnKind::Date),
            col("issue_datetime", ColumnKind::Timestamp),
            col("charge_window_start", ColumnKind::Timestamp),
            col("charge_window_end", ColumnKind::Timestamp),
            col("violation_location", ColumnKind::Text),
            col("case_type", ColumnKind::Text),
            col("defendant_id", ColumnKind::Number),
            col("created_by", ColumnKind::Text),
            col("created_on", ColumnKind::Timestamp),
            col("modified_by", ColumnKind::Text),
            col("modified_on", ColumnKind::Timestamp),
        ],
    },
    EntityColumns {
        alias: "d",
        columns: &[
            col("id", ColumnKind::Number),
            col("first_name", ColumnKind::Text),
            col("middle_name", ColumnKind::Text),
            col("last_name", ColumnKind::Text),
            col("suffix", ColumnKind::Text),
            col("ssn_id", ColumnKind::Text),
            col("dob", ColumnKind::Date),
            col("height", ColumnKind::Text),
            col("weight", ColumnKind::Text),
            col("eye_color", ColumnKind::Text),
            col("hair_color", ColumnKind::Text),
            col("created_by", ColumnKind::Text),
            col("created_on", ColumnKind::Timestamp),
            col("modified_by", ColumnKind::Text),
            col("modified_on", ColumnKind::Timestamp),
        ],
    },
    EntityColumns {
        alias: "ch",
        columns: &[
            col("id", ColumnKind::Number),
            col("charge_code", ColumnKind::Text),
            col("charge_description", ColumnKind::Text),
            col("charge_type", ColumnKind::Text),
            col("created_by", ColumnKind::Text),
            col("created_on", ColumnKind::Timestamp),
            col("modified_by", ColumnKind::Text),
            col("modified_on", ColumnKind::Timestamp),
        ],
    },
];

/// Free-text-ish fields that filter with substring semantics.
const SUBSTRING_FIELDS: &[&str] = &[
    "first_name",
    "last_name",
    "violation_location",
    "charge_description",
];

#[derive(Clone, Copy, Debug)]
pub(crate) struct FieldBinding {
    pub alias: &'static str,
    pub column: &'static str,
    pub mode: MatchMode,
}

static FIELD_BINDINGS: OnceLock<BTreeMap<&'static str, FieldBinding>> = OnceLock::new();

/// Static dispatch table from filterable field name to owning column, built
/// once at startup. First entity in `SEARCHABLE` order wins a name clash.
pub(crate) fn field_bindings() -> &'static BTreeMap<&'static str, FieldBinding> {
    FIELD_BINDINGS.get_or_init(|| {
        let mut bindings = BTreeMap::new();
        for entity in SEARCHABLE {
            for column in entity.columns {
                bindings.entry(column.name).or_insert(FieldBinding {
                    alias: entity.alias,
                    column: column.name,
                    mode: if SUBSTRING_FIELDS.contains(&column.name) {
                        MatchMode::Substring
                    } else {
                        MatchMode::Exact
                    },
                });
            }
        }
        bindings
    })
}

/// One predicate against the joined case/defendant/charge graph. The list
/// built from a [`CaseQuery`] is ANDed together by the fetch engine.
#[derive(Clone, Debug)]
pub(crate) enum Condition {
    IlikeText {
        alias: &'static str,
        column: &'static str,
        pattern: String,
    },
    TextEq {
        alias: &'static str,
        column: &'static str,
        value: String,
    },
    DateEq {
        alias: &'static str,
        column: &'static str,
        value: NaiveDate,
    },
    TimestampDateEq {
        alias: &'static str,
        column: &'static str,
        value: NaiveDate,
    },
    NumberEq {
        alias: &'static str,
        column: &'static str,
        value: f64,
    },
    DateBetween {
        alias: &'static str,
        column: &'static str,
        low: NaiveDate,
        high: NaiveDate,
    },
    Or(Vec<Condition>),
}

impl Condition {
    pub(crate) fn push_sql(&self, builder: &mut QueryBuilder<'static, Postgres>) {
        match self {
            Condition::IlikeText {
                alias,
                column,
                pattern,
            } => {
                push_column(builder, alias, column);
                builder.push(" ilike ");
                builder.push_bind(pattern.clone());
            }
            Condition::TextEq {
                alias,
                column,
                value,
            } => {
                push_column(builder, alias, column);
                builder.push("::text = ");
                builder.push_bind(value.clone());
            }
            Condition::DateEq {
                alias,
                column,
                value,
            } => {
                push_column(builder, alias, column);
                builder.push(" = ");
                builder.push_bind(*value);
            }
            Condition::TimestampDateEq {
                alias,
                column,
                value,
            } => {
                push_column(builder, alias, column);
                builder.push("::date = ");
                builder.push_bind(*value);
            }
            Condition::NumberEq {
                alias,
                column,
                value,
            } => {
                push_column(builder, alias, column);
                builder.push(" = ");
                builder.push_bind(*value);
            }
            Condition::DateBetween {
                alias,
                column,
                low,
                high,
            } => {
                push_column(builder, alias, column);
                builder.push(" between ");
                builder.push_bind(*low);
                builder.push(" and ");
                builder.push_bind(*high);
            }
            Condition::Or(conditions) => {
                if conditions.is_empty() {
                    builder.push("false");
                } else {
                    builder.push("(");
                    let mut iter = conditions.iter();
                    if let Some(first) = iter.next() {
                        first.push_sql(builder);
                    }
                    for condition in iter {
                        builder.push(" or ");
                        condition.push_sql(builder);
                    }
                    builder.push(")");
                }
            }
        }
    }
}

fn push_column(builder: &mut QueryBuilder<'static, Postgres>, alias: &str, column: &str) {
    builder.push(alias);
    builder.push(".");
    builder.push(column);
}

pub(crate) fn push_where(
    builder: &mut QueryBuilder<'static, Postgres>,
    conditions: &[Condition],
) {
    if conditions.is_empty() {
        return;
    }
    builder.push(" where ");
    let mut iter = conditions.iter();
    if let Some(first) = iter.next() {
        first.push_sql(builder);
    }
    for condition in iter {
        builder.push(" and ");
        condition.push_sql(builder);
    }
}

pub(crate) fn parse_search_date(input: &str) -> Option<NaiveDate> {
    NaiveDate::parse_from_str(input, "%Y-%m-%d").ok()
}

pub(crate) fn parse_search_number(input: &str) -> Option<f64> {
    input.trim().parse().ok()
}

/// Translate a [`CaseQuery`] into the predicate list for the joined graph.
///
/// Explicit filters resolve through the dispatch table; the free-text string
/// fans out over every searchable column as one disjunction; the violation
/// date range is always appended. Parse failures on the free-text string are
/// soft: the corresponding date/number conditions simply do not contribute.
pub(crate) fn build_conditions(query: &CaseQuery) -> Vec<Condition> {
    let bindings = field_bindings();
    let mut conditions = Vec::new();

    for (field, value) in &query.filters {
        if value.is_empty() {
            continue;
        }
        let Some(binding) = bindings.get(field.as_str()) else {
            continue;
        };
        conditions.push(match binding.mode {
            MatchMode::Substring => Condition::IlikeText {
                alias: binding.alias,
                column: binding.column,
                pattern: format!("%{}%", value),
            },
            MatchMode::Exact => Condition::TextEq {
                alias: binding.alias,
                column: binding.column,
                value: value.clone(),
            },
        });
    }

    if let Some(search) = query.search_string.as_deref().filter(|s| !s.is_empty()) {
        let search_date = parse_search_date(search);
        let search_number = parse_search_number(search);
        let mut disjunction = Vec::new();

        for entity in SEARCHABLE {
            for column in entity.columns {
                match column.kind {
                    ColumnKind::Text => disjunction.push(Condition::IlikeText {
                        alias: entity.alias,
                        column: column.name,
                        pattern: format!("%{}%", search),
                    }),
                    ColumnKind::Date => {
                        if let Some(date) = search_date {
                            disjunction.push(Condition::DateEq {
                                alias: entity.alias,
                                column: column.name,
                                value: date,
                            });
                        }
                    }
                    ColumnKind::Timestamp => {
                        if let Some(date) = search_date {
                            disjunction.push(Condition::TimestampDateEq {
                                alias: entity.alias,
                                column: column.name,
                                value: date,
                            });
                        }
                    }
                    ColumnKind::Number => {
                        if let Some(number) = search_number {
                            disjunction.push(Condition::NumberEq {
                                alias: entity.alias,
                                column: column.name,
                                value: number,
                            });
                        }
                    }
                }
            }
        }

        conditions.push(Condition::Or(disjunction));
    }

    conditions.push(Condition::DateBetween {
        alias: "cr",
        column: "violation_date",
        low: query.violation_start_date,
        high: query.violation_end_date,
    });

    conditions
}

#[cfg(test)]
mod tests {
    use super::*;

    fn range_query() -> CaseQuery {
        CaseQuery::new(
            NaiveDate::from_ymd_opt(2024, 1, 1).unwrap(),
            NaiveDate::from_ymd_opt(2024, 12, 31).unwrap(),
        )
    }

    #[test]
    fn dispatch_table_resolves_first_entity_on_clash() {
        let bindings = field_bindings();
        assert_eq!(bindings.get("id").unwrap().alias, "cr");
        assert_eq!(bindings.get("created_by").unwrap().alias, "cr");
        assert_eq!(bindings.get("first_name").unwrap().alias, "d");
        assert_eq!(bindings.get("charge_code").unwrap().alias, "ch");
    }

    #[test]
    fn substring_allow_list_controls_match_mode() {
        let bindings = field_bindings();
        assert_eq!(
            bindings.get("first_name").unwrap().mode,
            MatchMode::Substring
        );
        assert_eq!(
            bindings.get("charge_description").unwrap().mode,
            MatchMode::Substring
        );
        assert_eq!(bindings.get("case_number").unwrap().mode, MatchMode::Exact);
        assert_eq!(bindings.get("ssn_id").unwrap().mode, MatchMode::Exact);
    }

    #[test]
    fn explicit_filters_skip_empty_and_unknown_fields() {
        let query = range_query()
            .filter("first_name", "ali")
            .filter("case_number", "")
            .filter("no_such_field", "x");
        let conditions = build_conditions(&query);
        // one surviving filter plus the mandatory range
        assert_eq!(conditions.len(), 2);
    }

    #[test]
    fn rendered_sql_uses_ilike_for_substring_fields() {
        let query = range_query().filter("first_name", "ali");
        let conditions = build_conditions(&query);
        let mut builder = QueryBuilder::new("select 1 from case_records cr");
        push_where(&mut builder, &conditions);
        let sql = builder.sql();
        assert!(sql.contains("d.first_name ilike"), "sql was: {sql}");
        assert!(sql.contains("cr.violation_date between"), "sql was: {sql}");
    }

    #[test]
    fn date_search_contributes_date_and_timestamp_equality() {
        let query = range_query().search("2024-01-15");
        let conditions = build_conditions(&query);
        let Condition::Or(disjunction) = &conditions[0] else {
            panic!("expected disjunction first");
        };
        assert!(disjunction
            .iter()
            .any(|c| matches!(c, Condition::DateEq { column: "violation_date", .. })));
        assert!(disjunction
            .iter()
            .any(|c| matches!(c, Condition::TimestampDateEq { column: "issue_datetime", .. })));
        // no numeric equality: "2024-01-15" is not a number
        assert!(!disjunction
            .iter()
            .any(|c| matches!(c, Condition::NumberEq { .. })));
    }

    #[test]
    fn number_search_contributes_numeric_equality() {
        let query = range_query().search("42");
        let conditions = build_conditions(&query);
        let Condition::Or(disjunction) = &conditions[0] else {
            panic!("expected disjunction first");
        };
        assert!(disjunction
            .iter()
            .any(|c| matches!(c, Condition::NumberEq { column: "id", .. })));
    }

    #[test]
    fn unparseable_search_still_matches_text_columns() {
        let query = range_query().search("not-a-date-or-number");
        let conditions = build_conditions(&query);
        let Condition::Or(disjunction) = &conditions[0] else {
            panic!("expected disjunction first");
        };
        assert!(!disjunction.is_empty());
        assert!(disjunction
            .iter()
            .all(|c| matches!(c, Condition::IlikeText { .. })));
    }

    #[test]
    fn mandatory_range_is_always_last() {
        let conditions = build_conditions(&range_query());
        assert_eq!(conditions.len(), 1);
        assert!(matches!(
            conditions.last(),
            Some(Condition::DateBetween { column: "violation_date", .. })
        ));
    }

    #[test]
    fn parse_helpers_swallow_failures() {
        assert_eq!(parse_search_date("2024-01-15").unwrap().to_string(), "2024-01-15");
        assert!(parse_search_date("15/01/2024").is_none());
        assert_eq!(parse_search_number("12.5"), Some(12.5));
        assert!(parse_search_number("twelve").is_none());
    }
}
