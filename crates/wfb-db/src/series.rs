//! Series and series set repository implementation.

use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;

use async_trait::async_trait;
use sqlx::mysql::{MySql, MySqlPool, MySqlQueryResult};
use sqlx::{Row, Transaction};
use tracing::{debug, info, warn};

use wfb_core::{
    combine_series_selection, like_to_regex, Error, NewSeries, NewSeriesSet, Result, Series, SeriesFilter, SeriesRepository, SeriesSet,
    SeriesSetFilter,
};

use crate::events::{inserted_id, lookup_system_id};
use crate::filter::{bind_params, int_id_list, QueryParam, SeriesFilterQueryBuilder, SeriesSetFilterQueryBuilder};
use crate::rows::{required, SeriesRow, SeriesSetMemberRow, SeriesSetRow};

const SERIES_SOURCE: &str = "(SELECT s.series_id, s.series_name, s.pattern, st.system_name, \
    s.description, s.units \
    FROM series s JOIN system_type st ON st.system_id = s.system_id) AS sr";

const SERIES_SET_SOURCE: &str = "(SELECT ss.set_id, ss.set_name, st.system_name, ss.description \
    FROM series_sets ss JOIN system_type st ON st.system_id = ss.system_id) AS ssr";

/// MySQL implementation of [`SeriesRepository`].
#[derive(Debug, Clone)]
pub struct MySqlSeriesRepository {
    pool: MySqlPool,
}

impl MySqlSeriesRepository {
    pub fn new(pool: MySqlPool) -> Self {
        Self { pool }
    }
}

fn validate(series: &NewSeries) -> Result<()> {
    if series.name.trim().is_empty() {
        return Err(Error::InvalidInput("Series name is required".to_string()));
    }
    if series.pattern.is_empty() {
        return Err(Error::InvalidInput("Series pattern is required".to_string()));
    }
    like_to_regex(&series.pattern)?;
    Ok(())
}

fn validate_set(set: &NewSeriesSet) -> Result<()> {
    if set.name.trim().is_empty() {
        return Err(Error::InvalidInput("Series set name is required".to_string()));
    }
    Ok(())
}

/// Commit when exactly one row changed, otherwise roll back.
async fn commit_single_row(
    tx: Transaction<'_, MySql>,
    result: &MySqlQueryResult,
    kind: &str,
    op: &str,
    id: i32,
) -> Result<()> {
    match result.rows_affected() {
        1 => tx.commit().await.map_err(Error::Database),
        0 => {
            tx.rollback().await.map_err(Error::Database)?;
            Err(Error::NotFound(format!("{} {}", kind, id)))
        }
        n => {
            tx.rollback().await.map_err(Error::Database)?;
            warn!(
                subsystem = "db",
                component = "series",
                kind,
                op,
                id,
                rows_affected = n,
                "Rolled back change"
            );
            Err(Error::Referential(format!("{} {} {} affected {} rows", kind, id, op, n)))
        }
    }
}

#[async_trait]
impl SeriesRepository for MySqlSeriesRepository {
    async fn list(&self, filter: &SeriesFilter) -> Result<Vec<Series>> {
        let (clause, params) = SeriesFilterQueryBuilder::new(filter).build();
        let sql = format!(
            "SELECT series_id, series_name, pattern, system_name, description, units \
             FROM {}{} ORDER BY series_name, series_id",
            SERIES_SOURCE, clause
        );
        let rows = bind_params(sqlx::query(&sql), &params)
            .fetch_all(&self.pool)
            .await
            .map_err(Error::Database)?;
        rows.iter()
            .map(|row| SeriesRow::from_row(row)?.into_series())
            .collect()
    }

    async fn insert(&self, series: &NewSeries) -> Result<i32> {
        validate(series)?;
        let mut tx = self.pool.begin().await.map_err(Error::Database)?;
        let system_id = lookup_system_id(&mut tx, &series.system).await?;

        let result = sqlx::query(
            "INSERT INTO series (system_id, series_name, pattern, description, units) VALUES (?, ?, ?, ?, ?)",
        )
        .bind(system_id)
        .bind(&series.name)
        .bind(&series.pattern)
        .bind(series.description.as_deref())
        .bind(series.units.as_deref())
        .execute(&mut *tx)
        .await
        .map_err(Error::Database)?;
        let id = i32::try_from(inserted_id(result, "series")?)
            .map_err(|_| Error::Internal("Generated series id out of range".to_string()))?;
        tx.commit().await.map_err(Error::Database)?;

        info!(
            subsystem = "db",
            component = "series",
            op = "insert",
            series_id = id,
            system = %series.system,
            "Series created"
        );
        Ok(id)
    }

    async fn update(&self, id: i32, series: &NewSeries) -> Result<()> {
        validate(series)?;
        let mut tx = self.pool.begin().await.map_err(Error::Database)?;
        let system_id = lookup_system_id(&mut tx, &series.system).await?;

        let result = sqlx::query(
            "UPDATE series SET system_id = ?, series_name = ?, pattern = ?, description = ?, units = ? \
             WHERE series_id = ?",
        )
        .bind(system_id)
        .bind(&series.name)
        .bind(&series.pattern)
        .bind(series.description.as_deref())
        .bind(series.units.as_deref())
        .bind(id)
        .execute(&mut *tx)
        .await
        .map_err(Error::Database)?;
        commit_single_row(tx, &result, "Series", "update", id).await?;

        info!(subsystem = "db", component = "series", op = "update", series_id = id, "Series updated");
        Ok(())
    }

    async fn delete(&self, id: i32) -> Result<()> {
        let mut tx = self.pool.begin().await.map_err(Error::Database)?;
        let result = sqlx::query("DELETE FROM series WHERE series_id = ?")
            .bind(id)
            .execute(&mut *tx)
            .await
            .map_err(Error::Database)?;
        commit_single_row(tx, &result, "Series", "delete", id).await?;

        info!(subsystem = "db", component = "series", op = "delete", series_id = id, "Series deleted");
        Ok(())
    }

    async fn list_sets(&self, filter: &SeriesSetFilter) -> Result<Vec<SeriesSet>> {
        let (clause, params) = SeriesSetFilterQueryBuilder::new(filter).build();
        let sql = format!(
            "SELECT set_id, set_name, system_name, description FROM {}{} ORDER BY set_name, set_id",
            SERIES_SET_SOURCE, clause
        );
        let rows = bind_params(sqlx::query(&sql), &params)
            .fetch_all(&self.pool)
            .await
            .map_err(Error::Database)?;
        let mut sets = rows
            .iter()
            .map(|row| SeriesSetRow::from_row(row)?.into_series_set())
            .collect::<Result<Vec<_>>>()?;
        if sets.is_empty() {
            return Ok(sets);
        }

        let index: HashMap<i32, usize> = sets.iter().enumerate().map(|(i, set)| (set.id, i)).collect();
        let set_ids: Vec<i32> = sets.iter().map(|set| set.id).collect();
        let (clause, params) = int_id_list("c.set_id", &set_ids);
        let sql = format!(
            "SELECT c.set_id, s.series_id, s.series_name, s.pattern, st.system_name, s.description, s.units \
             FROM series_set_contents c \
             JOIN series s ON s.series_id = c.series_id \
             JOIN system_type st ON st.system_id = s.system_id \
             WHERE {} \
             ORDER BY c.set_id, s.series_name, s.series_id",
            clause
        );
        let mut shared: HashMap<i32, Arc<Series>> = HashMap::new();
        for row in bind_params(sqlx::query(&sql), &params)
            .fetch_all(&self.pool)
            .await
            .map_err(Error::Database)?
        {
            let member = SeriesSetMemberRow::from_row(&row)?;
            let set_id = required(member.set_id, "series set member", "set_id")?;
            let &i = index.get(&set_id).ok_or_else(|| {
                Error::DataIntegrity(format!("Series set member refers to unknown set {}", set_id))
            })?;
            let series = member.series.into_series()?;
            let series = Arc::clone(shared.entry(series.id).or_insert_with(|| Arc::new(series)));
            sets[i].series.push(series);
        }

        debug!(
            subsystem = "db",
            component = "series",
            op = "list_sets",
            result_count = sets.len(),
            "Loaded series sets"
        );
        Ok(sets)
    }

    async fn insert_set(&self, set: &NewSeriesSet) -> Result<i32> {
        validate_set(set)?;
        let members: Vec<i32> = set.series_ids.iter().copied().collect::<BTreeSet<_>>().into_iter().collect();

        let mut tx = self.pool.begin().await.map_err(Error::Database)?;
        let system_id = lookup_system_id(&mut tx, &set.system).await?;

        if !members.is_empty() {
            let (clause, mut params) = int_id_list("series_id", &members);
            params.insert(0, QueryParam::Int(system_id));
            let sql = format!("SELECT COUNT(*) AS n FROM series WHERE system_id = ? AND {}", clause);
            let found: i64 = bind_params(sqlx::query(&sql), &params)
                .fetch_one(&mut *tx)
                .await
                .map_err(Error::Database)?
                .try_get("n")
                .map_err(Error::Database)?;
            if found != members.len() as i64 {
                tx.rollback().await.map_err(Error::Database)?;
                return Err(Error::Referential(format!(
                    "Series set '{}' names series outside system '{}'",
                    set.name, set.system
                )));
            }
        }

        let result = sqlx::query("INSERT INTO series_sets (system_id, set_name, description) VALUES (?, ?, ?)")
            .bind(system_id)
            .bind(&set.name)
            .bind(set.description.as_deref())
            .execute(&mut *tx)
            .await
            .map_err(Error::Database)?;
        let id = i32::try_from(inserted_id(result, "series set")?)
            .map_err(|_| Error::Internal("Generated series set id out of range".to_string()))?;

        for series_id in &members {
            sqlx::query("INSERT INTO series_set_contents (set_id, series_id) VALUES (?, ?)")
                .bind(id)
                .bind(series_id)
                .execute(&mut *tx)
                .await
                .map_err(Error::Database)?;
        }
        tx.commit().await.map_err(Error::Database)?;

        info!(
            subsystem = "db",
            component = "series",
            op = "insert_set",
            set_id = id,
            member_count = members.len(),
            system = %set.system,
            "Series set created"
        );
        Ok(id)
    }

    async fn delete_set(&self, id: i32) -> Result<()> {
        let mut tx = self.pool.begin().await.map_err(Error::Database)?;
        sqlx::query("DELETE FROM series_set_contents WHERE set_id = ?")
            .bind(id)
            .execute(&mut *tx)
            .await
            .map_err(Error::Database)?;
        let result = sqlx::query("DELETE FROM series_sets WHERE set_id = ?")
            .bind(id)
            .execute(&mut *tx)
            .await
            .map_err(Error::Database)?;
        commit_single_row(tx, &result, "Series set", "delete", id).await?;

        info!(subsystem = "db", component = "series", op = "delete_set", set_id = id, "Series set deleted");
        Ok(())
    }
}

/// Series names selected by explicit names plus named sets of `system`.
///
/// `None` means no selection was made and every waveform is wanted. A set
/// name that does not exist for the system is not found.
pub async fn resolve_series_selection<R>(
    repo: &R,
    system: &str,
    series: &[String],
    set_names: &[String],
) -> Result<Option<BTreeSet<String>>>
where
    R: SeriesRepository + ?Sized,
{
    let sets = if set_names.is_empty() {
        Vec::new()
    } else {
        let filter = SeriesSetFilter::new()
            .with_system(system)
            .with_names(set_names.to_vec());
        repo.list_sets(&filter).await?
    };
    if let Some(missing) = set_names.iter().find(|name| !sets.iter().any(|set| &set.name == *name)) {
        return Err(Error::NotFound(format!("Series set '{}' for system '{}'", missing, system)));
    }
    Ok(combine_series_selection(series, &sets))
}
