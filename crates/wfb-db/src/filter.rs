//! SQL WHERE clause generation for event, series and series set criteria.
//!
//! Builders return the clause text together with the bind values in the
//! exact order their `?` placeholders appear, so callers bind them
//! positionally with [`bind_params`].

use sqlx::mysql::{MySql, MySqlArguments};
use sqlx::query::Query;

use wfb_core::filter::non_empty;
use wfb_core::time::format_utc;
use wfb_core::{EventFilter, LabelPredicate, SeriesFilter, SeriesSetFilter};

/// Type-safe parameter binding for SQL queries.
#[derive(Debug, Clone, PartialEq)]
pub enum QueryParam {
    /// 64-bit id.
    BigInt(i64),
    /// 32-bit integer (counts, series ids).
    Int(i32),
    /// Floating point (label confidence).
    Double(f64),
    /// String parameter.
    String(String),
    /// Timestamp, bound in the `yyyy-MM-dd HH:mm:ss.SSSSSS` UTC exchange format.
    Timestamp(chrono::DateTime<chrono::Utc>),
    /// Boolean flag, bound as 0/1.
    Flag(bool),
}

/// Bind every parameter onto `query` in order.
pub fn bind_params<'q>(
    mut query: Query<'q, MySql, MySqlArguments>,
    params: &'q [QueryParam],
) -> Query<'q, MySql, MySqlArguments> {
    for param in params {
        query = match param {
            QueryParam::BigInt(v) => query.bind(*v),
            QueryParam::Int(v) => query.bind(*v),
            QueryParam::Double(v) => query.bind(*v),
            QueryParam::String(s) => query.bind(s.as_str()),
            QueryParam::Timestamp(ts) => query.bind(format_utc(ts)),
            QueryParam::Flag(b) => query.bind(i32::from(*b)),
        };
    }
    query
}

/// `column IN (?,?,...)` sized to `len`.
pub(crate) fn in_list(column: &str, len: usize) -> String {
    let mut sql = String::with_capacity(column.len() + 6 + len * 2);
    sql.push_str(column);
    sql.push_str(" IN (");
    for i in 0..len {
        if i > 0 {
            sql.push(',');
        }
        sql.push('?');
    }
    sql.push(')');
    sql
}

/// Join clauses into `" WHERE a AND b"`, or an empty string when there are none.
fn where_clause(clauses: &[String]) -> String {
    if clauses.is_empty() {
        String::new()
    } else {
        format!(" WHERE {}", clauses.join(" AND "))
    }
}

// =============================================================================
// LABEL PREDICATE
// =============================================================================

/// Render one label predicate as a parenthesized group.
///
/// An unconstrained predicate renders as `(label_id IS NOT NULL)`. Otherwise
/// the group starts with the id constraint (or `label_id IS NOT NULL` when no
/// ids were given) and ANDs the remaining constraints onto it.
pub fn label_predicate_sql(predicate: &LabelPredicate) -> (String, Vec<QueryParam>) {
    if predicate.is_existence_only() {
        return ("(label_id IS NOT NULL)".to_string(), Vec::new());
    }

    let mut params = Vec::new();
    let mut sql = String::from("(");

    if predicate.ids().is_empty() {
        sql.push_str("label_id IS NOT NULL");
    } else {
        sql.push_str(&in_list("label_id", predicate.ids().len()));
        params.extend(predicate.ids().iter().map(|id| QueryParam::BigInt(*id)));
    }

    for (column, values) in [
        ("model_name", predicate.model_names()),
        ("label_name", predicate.names()),
        ("label_value", predicate.values()),
    ] {
        if !values.is_empty() {
            sql.push_str(" AND ");
            sql.push_str(&in_list(column, values.len()));
            params.extend(values.iter().cloned().map(QueryParam::String));
        }
    }

    if let Some((confidence, op)) = predicate.confidence() {
        sql.push_str(" AND label_confidence ");
        sql.push_str(op.as_sql());
        sql.push_str(" ?");
        params.push(QueryParam::Double(confidence));
    }

    sql.push(')');
    (sql, params)
}

// =============================================================================
// EVENT FILTER
// =============================================================================

/// Generates the WHERE clause for an [`EventFilter`].
///
/// Column names are unqualified: the clause is applied to a derived table
/// exposing `event_id, event_time_utc, system_name, location, classification,
/// archive, to_be_deleted, num_cf` and the label columns.
///
/// # Example
///
/// ```
/// use wfb_core::EventFilter;
/// use wfb_db::filter::{EventFilterQueryBuilder, QueryParam};
///
/// let filter = EventFilter::new().with_system("rf").with_archive(true);
/// let (sql, params) = EventFilterQueryBuilder::new(&filter).build();
/// assert_eq!(sql, " WHERE system_name = ? AND archive = ?");
/// assert_eq!(params, vec![QueryParam::String("rf".into()), QueryParam::Flag(true)]);
/// ```
pub struct EventFilterQueryBuilder<'a> {
    filter: &'a EventFilter,
}

impl<'a> EventFilterQueryBuilder<'a> {
    pub fn new(filter: &'a EventFilter) -> Self {
        Self { filter }
    }

    /// Build the clause and its bind values.
    ///
    /// Returns `(String::new(), vec![])` for an empty filter.
    pub fn build(&self) -> (String, Vec<QueryParam>) {
        let f = self.filter;
        let mut clauses = Vec::new();
        let mut params = Vec::new();

        if let Some(ids) = non_empty(&f.event_ids) {
            clauses.push(in_list("event_id", ids.len()));
            params.extend(ids.iter().map(|id| QueryParam::BigInt(*id)));
        }
        if let Some(begin) = f.begin {
            clauses.push("event_time_utc >= ?".to_string());
            params.push(QueryParam::Timestamp(begin));
        }
        if let Some(end) = f.end {
            clauses.push("event_time_utc <= ?".to_string());
            params.push(QueryParam::Timestamp(end));
        }
        if let Some(system) = &f.system {
            clauses.push("system_name = ?".to_string());
            params.push(QueryParam::String(system.clone()));
        }
        if let Some(locations) = non_empty(&f.locations) {
            clauses.push(in_list("location", locations.len()));
            params.extend(locations.iter().cloned().map(QueryParam::String));
        }
        if let Some(classifications) = non_empty(&f.classifications) {
            clauses.push(in_list("classification", classifications.len()));
            params.extend(classifications.iter().cloned().map(QueryParam::String));
        }
        if let Some(archive) = f.archive {
            clauses.push("archive = ?".to_string());
            params.push(QueryParam::Flag(archive));
        }
        if let Some(delete) = f.delete {
            clauses.push("to_be_deleted = ?".to_string());
            params.push(QueryParam::Flag(delete));
        }
        if let Some(min) = f.min_capture_files {
            clauses.push("num_cf >= ?".to_string());
            params.push(QueryParam::Int(min));
        }

        if !f.label_predicates.is_empty() {
            let mut groups = Vec::with_capacity(f.label_predicates.len());
            for predicate in &f.label_predicates {
                let (sql, p) = label_predicate_sql(predicate);
                groups.push(sql);
                params.extend(p);
            }
            clauses.push(format!("({})", groups.join(" OR ")));
        }

        (where_clause(&clauses), params)
    }
}

// =============================================================================
// SERIES FILTER
// =============================================================================

/// Generates the WHERE clause for a [`SeriesFilter`].
pub struct SeriesFilterQueryBuilder<'a> {
    filter: &'a SeriesFilter,
}

impl<'a> SeriesFilterQueryBuilder<'a> {
    pub fn new(filter: &'a SeriesFilter) -> Self {
        Self { filter }
    }

    pub fn build(&self) -> (String, Vec<QueryParam>) {
        let f = self.filter;
        let mut clauses = Vec::new();
        let mut params = Vec::new();

        if let Some(ids) = non_empty(&f.ids) {
            clauses.push(in_list("series_id", ids.len()));
            params.extend(ids.iter().map(|id| QueryParam::Int(*id)));
        }
        if let Some(system) = &f.system {
            clauses.push("system_name = ?".to_string());
            params.push(QueryParam::String(system.clone()));
        }
        if let Some(names) = non_empty(&f.names) {
            clauses.push(in_list("series_name", names.len()));
            params.extend(names.iter().cloned().map(QueryParam::String));
        }

        (where_clause(&clauses), params)
    }
}

/// Generates the WHERE clause for a [`SeriesSetFilter`].
pub struct SeriesSetFilterQueryBuilder<'a> {
    filter: &'a SeriesSetFilter,
}

impl<'a> SeriesSetFilterQueryBuilder<'a> {
    pub fn new(filter: &'a SeriesSetFilter) -> Self {
        Self { filter }
    }

    pub fn build(&self) -> (String, Vec<QueryParam>) {
        let f = self.filter;
        let mut clauses = Vec::new();
        let mut params = Vec::new();

        if let Some(ids) = non_empty(&f.ids) {
            clauses.push(in_list("set_id", ids.len()));
            params.extend(ids.iter().map(|id| QueryParam::Int(*id)));
        }
        if let Some(system) = &f.system {
            clauses.push("system_name = ?".to_string());
            params.push(QueryParam::String(system.clone()));
        }
        if let Some(names) = non_empty(&f.names) {
            clauses.push(in_list("set_name", names.len()));
            params.extend(names.iter().cloned().map(QueryParam::String));
        }

        (where_clause(&clauses), params)
    }
}

/// `IN` list over 32-bit ids (series, series sets).
pub(crate) fn int_id_list(column: &str, ids: &[i32]) -> (String, Vec<QueryParam>) {
    (
        in_list(column, ids.len()),
        ids.iter().map(|id| QueryParam::Int(*id)).collect(),
    )
}

/// `IN` list for a plain id set, used by the child-row loaders.
pub(crate) fn id_list(column: &str, ids: &[i64]) -> (String, Vec<QueryParam>) {
    (
        in_list(column, ids.len()),
        ids.iter().map(|id| QueryParam::BigInt(*id)).collect(),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};

    fn placeholders(sql: &str) -> usize {
        sql.matches('?').count()
    }

    #[test]
    fn test_empty_filter_has_no_where() {
        let (sql, params) = EventFilterQueryBuilder::new(&EventFilter::new()).build();
        assert_eq!(sql, "");
        assert!(params.is_empty());
    }

    #[test]
    fn test_empty_lists_are_ignored() {
        let filter = EventFilter::new().with_event_ids(vec![]).with_locations(vec![]);
        let (sql, params) = EventFilterQueryBuilder::new(&filter).build();
        assert_eq!(sql, "");
        assert!(params.is_empty());
    }

    #[test]
    fn test_full_filter_clause_and_bind_order() {
        let begin = Utc.with_ymd_and_hms(2019, 1, 1, 0, 0, 0).unwrap();
        let end = Utc.with_ymd_and_hms(2019, 2, 1, 0, 0, 0).unwrap();
        let filter = EventFilter::new()
            .with_event_ids(vec![1, 2, 3])
            .with_begin(begin)
            .with_end(end)
            .with_system("rf")
            .with_locations(vec!["1L05".into(), "1L06".into()])
            .with_classifications(vec!["multi".into()])
            .with_archive(false)
            .with_delete(true)
            .with_min_capture_files(8);

        let (sql, params) = EventFilterQueryBuilder::new(&filter).build();
        assert_eq!(
            sql,
            " WHERE event_id IN (?,?,?) AND event_time_utc >= ? AND event_time_utc <= ? \
             AND system_name = ? AND location IN (?,?) AND classification IN (?) \
             AND archive = ? AND to_be_deleted = ? AND num_cf >= ?"
        );
        assert_eq!(
            params,
            vec![
                QueryParam::BigInt(1),
                QueryParam::BigInt(2),
                QueryParam::BigInt(3),
                QueryParam::Timestamp(begin),
                QueryParam::Timestamp(end),
                QueryParam::String("rf".into()),
                QueryParam::String("1L05".into()),
                QueryParam::String("1L06".into()),
                QueryParam::String("multi".into()),
                QueryParam::Flag(false),
                QueryParam::Flag(true),
                QueryParam::Int(8),
            ]
        );
        assert_eq!(placeholders(&sql), params.len());
    }

    #[test]
    fn test_existence_only_label_predicate() {
        let filter = EventFilter::new().with_label_predicate(LabelPredicate::any_label());
        let (sql, params) = EventFilterQueryBuilder::new(&filter).build();
        assert_eq!(sql, " WHERE ((label_id IS NOT NULL))");
        assert!(params.is_empty());
    }

    #[test]
    fn test_label_predicate_without_ids_uses_existence_phrase() {
        let p = LabelPredicate::builder()
            .names(vec!["cavity".into()])
            .confidence(0.5, ">")
            .build()
            .unwrap();
        let (sql, params) = label_predicate_sql(&p);
        assert_eq!(
            sql,
            "(label_id IS NOT NULL AND label_name IN (?) AND label_confidence > ?)"
        );
        assert_eq!(
            params,
            vec![QueryParam::String("cavity".into()), QueryParam::Double(0.5)]
        );
    }

    #[test]
    fn test_label_predicate_bind_order() {
        let p = LabelPredicate::builder()
            .model_names(vec!["m1".into(), "m2".into()])
            .ids(vec![10])
            .names(vec!["cavity".into()])
            .values(vec!["4".into()])
            .confidence(0.9, "<=")
            .build()
            .unwrap();
        let (sql, params) = label_predicate_sql(&p);
        assert_eq!(
            sql,
            "(label_id IN (?) AND model_name IN (?,?) AND label_name IN (?) \
             AND label_value IN (?) AND label_confidence <= ?)"
        );
        assert_eq!(
            params,
            vec![
                QueryParam::BigInt(10),
                QueryParam::String("m1".into()),
                QueryParam::String("m2".into()),
                QueryParam::String("cavity".into()),
                QueryParam::String("4".into()),
                QueryParam::Double(0.9),
            ]
        );
    }

    #[test]
    fn test_label_predicates_are_ored_and_anded_with_rest() {
        let filter = EventFilter::new()
            .with_system("rf")
            .with_label_predicate(LabelPredicate::builder().names(vec!["a".into()]).build().unwrap())
            .with_label_predicate(LabelPredicate::builder().values(vec!["b".into()]).build().unwrap());
        let (sql, params) = EventFilterQueryBuilder::new(&filter).build();
        assert_eq!(
            sql,
            " WHERE system_name = ? AND ((label_id IS NOT NULL AND label_name IN (?)) \
             OR (label_id IS NOT NULL AND label_value IN (?)))"
        );
        assert_eq!(
            params,
            vec![
                QueryParam::String("rf".into()),
                QueryParam::String("a".into()),
                QueryParam::String("b".into()),
            ]
        );
    }

    #[test]
    fn test_placeholder_count_matches_params_for_many_mixes() {
        let t = Utc.with_ymd_and_hms(2020, 6, 1, 0, 0, 0).unwrap();
        let predicates = [
            LabelPredicate::any_label(),
            LabelPredicate::builder().ids(vec![1, 2]).build().unwrap(),
            LabelPredicate::builder().confidence(0.1, "!=").build().unwrap(),
        ];

        for mask in 0u32..(1 << 10) {
            let mut f = EventFilter::new();
            if mask & 1 != 0 {
                f = f.with_event_ids(vec![1, 2]);
            }
            if mask & 2 != 0 {
                f = f.with_begin(t);
            }
            if mask & 4 != 0 {
                f = f.with_end(t);
            }
            if mask & 8 != 0 {
                f = f.with_system("rf");
            }
            if mask & 16 != 0 {
                f = f.with_locations(vec!["a".into(), "b".into(), "c".into()]);
            }
            if mask & 32 != 0 {
                f = f.with_classifications(vec!["x".into()]);
            }
            if mask & 64 != 0 {
                f = f.with_archive(true);
            }
            if mask & 128 != 0 {
                f = f.with_delete(false);
            }
            if mask & 256 != 0 {
                f = f.with_min_capture_files(2);
            }
            if mask & 512 != 0 {
                for p in &predicates {
                    f = f.with_label_predicate(p.clone());
                }
            }

            let (sql, params) = EventFilterQueryBuilder::new(&f).build();
            assert_eq!(placeholders(&sql), params.len(), "mask {mask}: {sql}");
            assert_eq!(sql.is_empty(), mask == 0);
            if !sql.is_empty() {
                assert!(sql.starts_with(" WHERE "));
            }
        }
    }

    #[test]
    fn test_series_filter_clause() {
        let filter = SeriesFilter::new()
            .with_ids(vec![1, 2])
            .with_system("rf")
            .with_names(vec!["GMES".into()]);
        let (sql, params) = SeriesFilterQueryBuilder::new(&filter).build();
        assert_eq!(
            sql,
            " WHERE series_id IN (?,?) AND system_name = ? AND series_name IN (?)"
        );
        assert_eq!(
            params,
            vec![
                QueryParam::Int(1),
                QueryParam::Int(2),
                QueryParam::String("rf".into()),
                QueryParam::String("GMES".into()),
            ]
        );
    }

    #[test]
    fn test_series_filter_empty() {
        let (sql, params) = SeriesFilterQueryBuilder::new(&SeriesFilter::new()).build();
        assert_eq!(sql, "");
        assert!(params.is_empty());
    }

    #[test]
    fn test_series_set_filter_clause() {
        let filter = SeriesSetFilter::new()
            .with_system("rf")
            .with_names(vec!["GDR Trip".into(), "Detune".into()]);
        let (sql, params) = SeriesSetFilterQueryBuilder::new(&filter).build();
        assert_eq!(sql, " WHERE system_name = ? AND set_name IN (?,?)");
        assert_eq!(params.len(), placeholders(&sql));
        assert_eq!(params[1], QueryParam::String("GDR Trip".into()));

        let (sql, params) = SeriesSetFilterQueryBuilder::new(&SeriesSetFilter::new().with_ids(vec![])).build();
        assert_eq!(sql, "");
        assert!(params.is_empty());
    }

    #[test]
    fn test_int_id_list() {
        let (sql, params) = int_id_list("c.set_id", &[2, 9]);
        assert_eq!(sql, "c.set_id IN (?,?)");
        assert_eq!(params, vec![QueryParam::Int(2), QueryParam::Int(9)]);
    }

    #[test]
    fn test_id_list() {
        let (sql, params) = id_list("c.event_id", &[4, 5]);
        assert_eq!(sql, "c.event_id IN (?,?)");
        assert_eq!(params.len(), 2);
    }
}
