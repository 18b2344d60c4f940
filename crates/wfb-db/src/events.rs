//! Event repository implementation.

use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use sqlx::mysql::{MySql, MySqlPool, MySqlQueryResult};
use sqlx::{Row, Transaction};
use tracing::{debug, info, trace, warn};

use wfb_core::time::format_utc;
use wfb_core::{
    CaptureFile, Error, Event, EventFilter, EventQueryOptions, EventRepository, Label, Metadata,
    Result, WaveformSource,
};

use crate::assembler::EventAssembler;
use crate::filter::{bind_params, id_list, EventFilterQueryBuilder, QueryParam};
use crate::rows::{CaptureRow, EventRow, LabelRow, MetadataRow, SeriesMappingRow, WaveformRow};

/// Largest id list sent in one child-row query.
const ID_CHUNK: usize = 1000;

/// Event rows flattened with their system name, capture file count and
/// labels, so every filter column is addressable by name.
const EVENT_SOURCE: &str = "(SELECT e.event_id, e.event_time_utc, e.location, st.system_name, \
    e.archive, e.to_be_deleted, e.grouped, e.classification, \
    (SELECT COUNT(*) FROM capture c WHERE c.event_id = e.event_id) AS num_cf, \
    l.label_id, l.model_name, l.label_name, l.label_value, l.label_confidence \
    FROM event e \
    JOIN system_type st ON st.system_id = e.system_id \
    LEFT JOIN label l ON l.event_id = e.event_id) AS ev";

const EVENT_COLUMNS: &str =
    "event_id, event_time_utc, location, system_name, archive, to_be_deleted, grouped, classification";

/// MySQL implementation of [`EventRepository`].
///
/// With a [`WaveformSource`] attached, inserts read capture files from raw
/// data when the event carries none, and `include_data` queries fill in
/// sample values.
#[derive(Clone)]
pub struct MySqlEventRepository {
    pool: MySqlPool,
    source: Option<Arc<dyn WaveformSource>>,
}

impl MySqlEventRepository {
    pub fn new(pool: MySqlPool) -> Self {
        Self { pool, source: None }
    }

    pub fn with_source(mut self, source: Arc<dyn WaveformSource>) -> Self {
        self.source = Some(source);
        self
    }

    fn require_source(&self) -> Result<&Arc<dyn WaveformSource>> {
        self.source
            .as_ref()
            .ok_or_else(|| Error::Config("No waveform source configured for sample data".to_string()))
    }

    /// Capture files to store for `event`: its own, or those read header-only from raw data.
    async fn capture_files_for_insert(&self, event: &Event) -> Result<Vec<CaptureFile>> {
        if let Some(files) = event.capture_files() {
            return Ok(files.values().cloned().collect());
        }
        let Some(source) = &self.source else {
            return Ok(Vec::new());
        };
        if !source.has_data(event).await? {
            warn!(
                subsystem = "db",
                component = "events",
                op = "insert",
                system = event.system(),
                location = event.location(),
                "Rejected event with no raw data"
            );
            return Err(Error::NotFound(format!(
                "Waveform data for event at {} is missing",
                format_utc(&event.event_time())
            )));
        }
        source.read_capture_files(event, false).await
    }

    /// Run the child-row passes for already assembled events.
    async fn load_children(&self, assembler: &mut EventAssembler, options: EventQueryOptions) -> Result<()> {
        let event_ids = assembler.event_ids();

        if options.include_labels {
            assembler.expect_labels();
            for chunk in event_ids.chunks(ID_CHUNK) {
                let (clause, params) = id_list("event_id", chunk);
                let sql = format!(
                    "SELECT label_id, event_id, model_name, label_name, label_value, label_confidence \
                     FROM label WHERE {} ORDER BY label_id",
                    clause
                );
                for row in bind_params(sqlx::query(&sql), &params)
                    .fetch_all(&self.pool)
                    .await
                    .map_err(Error::Database)?
                {
                    assembler.add_label_row(LabelRow::from_row(&row)?)?;
                }
            }
        }

        if !options.loads_capture_files() {
            return Ok(());
        }
        assembler.expect_capture_files();

        for chunk in event_ids.chunks(ID_CHUNK) {
            let (clause, params) = id_list("event_id", chunk);
            let sql = format!(
                "SELECT capture_id, event_id, filename, sample_start, sample_end, sample_step \
                 FROM capture WHERE {} ORDER BY capture_id",
                clause
            );
            for row in bind_params(sqlx::query(&sql), &params)
                .fetch_all(&self.pool)
                .await
                .map_err(Error::Database)?
            {
                assembler.add_capture_row(CaptureRow::from_row(&row)?)?;
            }
        }

        let capture_ids = assembler.capture_ids();
        for chunk in capture_ids.chunks(ID_CHUNK) {
            let (clause, params) = id_list("capture_id", chunk);
            let sql = format!(
                "SELECT cwf_id, capture_id, waveform_name FROM capture_wf WHERE {} ORDER BY cwf_id",
                clause
            );
            for row in bind_params(sqlx::query(&sql), &params)
                .fetch_all(&self.pool)
                .await
                .map_err(Error::Database)?
            {
                assembler.add_waveform_row(WaveformRow::from_row(&row)?)?;
            }

            let sql = format!(
                "SELECT meta_id, capture_id, meta_name, `type`, `value`, `start`, `offset` \
                 FROM capture_meta WHERE {} ORDER BY meta_id",
                clause
            );
            for row in bind_params(sqlx::query(&sql), &params)
                .fetch_all(&self.pool)
                .await
                .map_err(Error::Database)?
            {
                assembler.add_metadata_row(MetadataRow::from_row(&row)?)?;
            }
        }

        for chunk in event_ids.chunks(ID_CHUNK) {
            let (clause, params) = id_list("c.event_id", chunk);
            let sql = format!(
                "SELECT DISTINCT c.event_id, w.waveform_name, s.series_id, s.series_name, s.pattern, \
                 st.system_name, s.description, s.units \
                 FROM capture_wf w \
                 JOIN capture c ON c.capture_id = w.capture_id \
                 JOIN event e ON e.event_id = c.event_id \
                 JOIN series s ON s.system_id = e.system_id AND w.waveform_name LIKE s.pattern \
                 JOIN system_type st ON st.system_id = s.system_id \
                 WHERE {} \
                 ORDER BY c.event_id, w.waveform_name, s.series_id",
                clause
            );
            for row in bind_params(sqlx::query(&sql), &params)
                .fetch_all(&self.pool)
                .await
                .map_err(Error::Database)?
            {
                assembler.add_series_mapping_row(SeriesMappingRow::from_row(&row)?)?;
            }
        }

        Ok(())
    }

    /// Replace waveform names with sample data read from raw files.
    ///
    /// Capture files known only to the raw data are added as read.
    async fn fill_waveform_data(&self, events: &mut [Event]) -> Result<()> {
        let source = self.require_source()?;
        for event in events.iter_mut() {
            let files = source.read_capture_files(event, true).await?;
            for filename in event.merge_capture_data(files)? {
                trace!(
                    subsystem = "db",
                    component = "events",
                    event_id = ?event.id(),
                    filename = %filename,
                    "Capture file found only in raw data"
                );
            }
        }
        Ok(())
    }
}

// =============================================================================
// TRANSACTION HELPERS
// =============================================================================

/// Resolve a system name to its id. Unknown and ambiguous names are referential errors.
pub(crate) async fn lookup_system_id(tx: &mut Transaction<'_, MySql>, system: &str) -> Result<i32> {
    let rows = sqlx::query("SELECT system_id FROM system_type WHERE system_name = ?")
        .bind(system)
        .fetch_all(&mut **tx)
        .await
        .map_err(Error::Database)?;
    match rows.as_slice() {
        [row] => row.try_get::<i32, _>("system_id").map_err(Error::Database),
        [] => {
            warn!(subsystem = "db", component = "events", system, "Unsupported system");
            Err(Error::Referential(format!("Waveform system '{}' is not supported", system)))
        }
        _ => Err(Error::Referential(format!(
            "Waveform system '{}' maps to {} system ids",
            system,
            rows.len()
        ))),
    }
}

/// Require exactly one affected row and return the generated id.
pub(crate) fn inserted_id(result: MySqlQueryResult, what: &str) -> Result<i64> {
    if result.rows_affected() != 1 {
        return Err(Error::Referential(format!(
            "Inserting {} affected {} rows",
            what,
            result.rows_affected()
        )));
    }
    i64::try_from(result.last_insert_id())
        .map_err(|_| Error::Internal(format!("Generated {} id out of range", what)))
}

async fn insert_capture_file(tx: &mut Transaction<'_, MySql>, event_id: i64, cf: &CaptureFile) -> Result<i64> {
    let result = sqlx::query(
        "INSERT INTO capture (event_id, filename, sample_start, sample_end, sample_step) VALUES (?, ?, ?, ?, ?)",
    )
    .bind(event_id)
    .bind(&cf.filename)
    .bind(cf.sample_start)
    .bind(cf.sample_end)
    .bind(cf.sample_step)
    .execute(&mut **tx)
    .await
    .map_err(Error::Database)?;
    let capture_id = inserted_id(result, "capture file")?;

    for waveform in cf.waveforms() {
        let result = sqlx::query("INSERT INTO capture_wf (capture_id, waveform_name) VALUES (?, ?)")
            .bind(capture_id)
            .bind(waveform.name())
            .execute(&mut **tx)
            .await
            .map_err(Error::Database)?;
        inserted_id(result, "waveform")?;
    }

    for metadata in &cf.metadata {
        insert_metadata(tx, capture_id, metadata).await?;
    }
    Ok(capture_id)
}

async fn insert_metadata(tx: &mut Transaction<'_, MySql>, capture_id: i64, metadata: &Metadata) -> Result<i64> {
    let result = sqlx::query(
        "INSERT INTO capture_meta (capture_id, meta_name, `type`, `value`, `start`, `offset`) \
         VALUES (?, ?, ?, ?, ?, ?)",
    )
    .bind(capture_id)
    .bind(&metadata.name)
    .bind(metadata.value.metadata_type().as_str())
    .bind(metadata.value.value_string())
    .bind(metadata.value.start())
    .bind(metadata.value.offset())
    .execute(&mut **tx)
    .await
    .map_err(Error::Database)?;
    inserted_id(result, "metadata")
}

async fn insert_label(tx: &mut Transaction<'_, MySql>, event_id: i64, label: &Label) -> Result<i64> {
    let result = sqlx::query(
        "INSERT INTO label (event_id, model_name, label_name, label_value, label_confidence) \
         VALUES (?, ?, ?, ?, ?)",
    )
    .bind(event_id)
    .bind(&label.model_name)
    .bind(&label.name)
    .bind(&label.value)
    .bind(label.confidence)
    .execute(&mut **tx)
    .await
    .map_err(Error::Database)?;
    inserted_id(result, "label")
}

#[async_trait]
impl EventRepository for MySqlEventRepository {
    async fn insert(&self, event: &Event) -> Result<i64> {
        let start = Instant::now();
        // Raw data is read before the transaction opens.
        let capture_files = self.capture_files_for_insert(event).await?;

        let mut tx = self.pool.begin().await.map_err(Error::Database)?;
        let system_id = lookup_system_id(&mut tx, event.system()).await?;

        let result = sqlx::query(
            "INSERT INTO event (event_time_utc, location, system_id, archive, to_be_deleted, grouped, classification) \
             VALUES (?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(format_utc(&event.event_time()))
        .bind(event.location())
        .bind(system_id)
        .bind(i32::from(event.is_archive()))
        .bind(i32::from(event.is_delete()))
        .bind(i32::from(event.is_grouped()))
        .bind(event.classification())
        .execute(&mut *tx)
        .await
        .map_err(Error::Database)?;
        let event_id = inserted_id(result, "event")?;

        for cf in &capture_files {
            insert_capture_file(&mut tx, event_id, cf).await?;
        }
        for label in event.labels().unwrap_or_default() {
            insert_label(&mut tx, event_id, label).await?;
        }

        tx.commit().await.map_err(Error::Database)?;

        info!(
            subsystem = "db",
            component = "events",
            op = "insert",
            event_id,
            system = event.system(),
            capture_files = capture_files.len(),
            duration_ms = start.elapsed().as_millis() as u64,
            "Event stored"
        );
        Ok(event_id)
    }

    async fn insert_many(&self, events: &[Event]) -> Result<Vec<i64>> {
        let mut ids = Vec::with_capacity(events.len());
        for event in events {
            ids.push(self.insert(event).await?);
        }
        Ok(ids)
    }

    async fn list(&self, filter: &EventFilter, options: EventQueryOptions) -> Result<Vec<Event>> {
        let start = Instant::now();
        filter.validate()?;

        let (clause, params) = EventFilterQueryBuilder::new(filter).build();
        let sql = format!(
            "SELECT DISTINCT {} FROM {}{} ORDER BY event_time_utc, event_id",
            EVENT_COLUMNS, EVENT_SOURCE, clause
        );
        debug!(
            subsystem = "db",
            component = "events",
            op = "list",
            param_count = params.len(),
            "Event query built"
        );

        let rows = bind_params(sqlx::query(&sql), &params)
            .fetch_all(&self.pool)
            .await
            .map_err(Error::Database)?;

        let mut assembler = EventAssembler::new();
        for row in &rows {
            assembler.add_event_row(EventRow::from_row(row)?)?;
        }
        if !assembler.is_empty() {
            self.load_children(&mut assembler, options).await?;
        }
        let mut events = assembler.into_events();

        if options.include_data && !events.is_empty() {
            self.fill_waveform_data(&mut events).await?;
        }

        debug!(
            subsystem = "db",
            component = "events",
            op = "list",
            row_count = rows.len(),
            result_count = events.len(),
            duration_ms = start.elapsed().as_millis() as u64,
            "Event list loaded"
        );
        Ok(events)
    }

    async fn get(&self, id: i64, options: EventQueryOptions) -> Result<Event> {
        let filter = EventFilter::new().with_event_ids(vec![id]);
        self.list(&filter, options)
            .await?
            .into_iter()
            .next()
            .ok_or(Error::EventNotFound(id))
    }

    async fn most_recent_id(&self, filter: &EventFilter) -> Result<Option<i64>> {
        filter.validate()?;
        let (clause, params) = EventFilterQueryBuilder::new(filter).build();
        let sql = format!(
            "SELECT DISTINCT event_id, event_time_utc FROM {}{} \
             ORDER BY event_time_utc DESC, event_id DESC LIMIT 1",
            EVENT_SOURCE, clause
        );
        let row = bind_params(sqlx::query(&sql), &params)
            .fetch_optional(&self.pool)
            .await
            .map_err(Error::Database)?;
        row.map(|r| r.try_get::<i64, _>("event_id").map_err(Error::Database))
            .transpose()
    }

    async fn location_names(&self) -> Result<Vec<String>> {
        let rows = sqlx::query("SELECT DISTINCT location FROM event ORDER BY location")
            .fetch_all(&self.pool)
            .await
            .map_err(Error::Database)?;
        rows.iter()
            .map(|r| r.try_get::<String, _>("location").map_err(Error::Database))
            .collect()
    }

    async fn series_names(&self, event_ids: &[i64]) -> Result<Vec<String>> {
        if event_ids.is_empty() {
            return Ok(Vec::new());
        }
        let mut names = Vec::new();
        for chunk in event_ids.chunks(ID_CHUNK) {
            let (clause, params) = id_list("c.event_id", chunk);
            let sql = format!(
                "SELECT DISTINCT s.series_name \
                 FROM capture_wf w \
                 JOIN capture c ON c.capture_id = w.capture_id \
                 JOIN event e ON e.event_id = c.event_id \
                 JOIN series s ON s.system_id = e.system_id AND w.waveform_name LIKE s.pattern \
                 WHERE {}",
                clause
            );
            let rows = bind_params(sqlx::query(&sql), &params)
                .fetch_all(&self.pool)
                .await
                .map_err(Error::Database)?;
            for row in rows {
                names.push(row.try_get::<String, _>("series_name").map_err(Error::Database)?);
            }
        }
        names.sort();
        names.dedup();
        Ok(names)
    }

    async fn set_delete_flag(&self, event_ids: &[i64], delete: bool) -> Result<u64> {
        if event_ids.is_empty() {
            return Ok(0);
        }
        let mut params = vec![QueryParam::Flag(delete), QueryParam::Flag(delete)];
        let (clause, ids) = id_list("event_id", event_ids);
        params.extend(ids);
        let sql = format!(
            "UPDATE event SET to_be_deleted = ?, archive = IF(? = 1, 0, archive) WHERE {}",
            clause
        );
        let result = bind_params(sqlx::query(&sql), &params)
            .execute(&self.pool)
            .await
            .map_err(Error::Database)?;

        info!(
            subsystem = "db",
            component = "events",
            op = "set_delete_flag",
            delete,
            rows_affected = result.rows_affected(),
            "Delete flag updated"
        );
        Ok(result.rows_affected())
    }

    async fn set_archive_flag(&self, event_id: i64, archive: bool) -> Result<u64> {
        let mut tx = self.pool.begin().await.map_err(Error::Database)?;
        let result = sqlx::query(
            "UPDATE event SET archive = ?, to_be_deleted = IF(? = 1, 0, to_be_deleted) WHERE event_id = ?",
        )
        .bind(i32::from(archive))
        .bind(i32::from(archive))
        .bind(event_id)
        .execute(&mut *tx)
        .await
        .map_err(Error::Database)?;

        let affected = result.rows_affected();
        if affected > 1 {
            tx.rollback().await.map_err(Error::Database)?;
            warn!(
                subsystem = "db",
                component = "events",
                op = "set_archive_flag",
                event_id,
                rows_affected = affected,
                "Rolled back archive update"
            );
            return Err(Error::Referential(format!(
                "Archive update for event {} affected {} rows",
                event_id, affected
            )));
        }
        tx.commit().await.map_err(Error::Database)?;

        info!(
            subsystem = "db",
            component = "events",
            op = "set_archive_flag",
            event_id,
            archive,
            rows_affected = affected,
            "Archive flag updated"
        );
        Ok(affected)
    }

    async fn delete(&self, event_id: i64, force: bool) -> Result<u64> {
        let mut tx = self.pool.begin().await.map_err(Error::Database)?;

        let row = sqlx::query("SELECT to_be_deleted FROM event WHERE event_id = ? FOR UPDATE")
            .bind(event_id)
            .fetch_optional(&mut *tx)
            .await
            .map_err(Error::Database)?
            .ok_or(Error::EventNotFound(event_id))?;
        let pending: bool = row.try_get("to_be_deleted").map_err(Error::Database)?;

        if !pending && !force {
            debug!(
                subsystem = "db",
                component = "events",
                op = "delete",
                event_id,
                "Event not marked for deletion"
            );
            return Ok(0);
        }

        for sql in [
            "DELETE FROM capture_meta WHERE capture_id IN (SELECT capture_id FROM capture WHERE event_id = ?)",
            "DELETE FROM capture_wf WHERE capture_id IN (SELECT capture_id FROM capture WHERE event_id = ?)",
            "DELETE FROM capture WHERE event_id = ?",
            "DELETE FROM label WHERE event_id = ?",
        ] {
            sqlx::query(sql)
                .bind(event_id)
                .execute(&mut *tx)
                .await
                .map_err(Error::Database)?;
        }

        let result = sqlx::query("DELETE FROM event WHERE event_id = ?")
            .bind(event_id)
            .execute(&mut *tx)
            .await
            .map_err(Error::Database)?;
        tx.commit().await.map_err(Error::Database)?;

        info!(
            subsystem = "db",
            component = "events",
            op = "delete",
            event_id,
            force,
            rows_affected = result.rows_affected(),
            "Event deleted"
        );
        Ok(result.rows_affected())
    }
}
