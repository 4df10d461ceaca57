use parking_lot::Mutex;
use rusqlite::{params, OptionalExtension};

use chainrelay_aggregates::Aggregate;
use chainrelay_primitives::{Event, OutboxRow, RequestId, Snapshot};

use crate::error::{StoreError, StoreResult};
use crate::id_gen::OutboxIdGenerator;
use crate::schema;

/// Payloads at or above this many bytes are zstd-compressed before being
/// written, per spec.md §4.5's "if uncompressed payload exceeds a
/// configured threshold, compress it and set isCompressed = true".
const DEFAULT_COMPRESSION_THRESHOLD_BYTES: usize = 4096;
const ZSTD_LEVEL: i32 = 3;

/// A per-statement delete cap, matching SQLite's own bound parameter
/// limit (spec.md §6: "deleteOutboxByIds with |ids| > per-statement cap
/// produces multiple statements whose union equals ids").
const DELETE_CHUNK_SIZE: usize = 65_535;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum OrderDir {
    Asc,
    Desc,
}

#[derive(Clone, Debug, Default)]
pub struct FetchOptions {
    pub version_gte: Option<u64>,
    pub version_lte: Option<u64>,
    pub limit: Option<u64>,
    pub offset: Option<u64>,
    pub order_dir: Option<OrderDir>,
}

#[derive(Clone, Debug, Default)]
pub struct PersistOutcome {
    pub inserted_outbox_ids: Vec<i64>,
    pub first_id: Option<i64>,
    pub last_id: Option<i64>,
    pub raw_events: Vec<Event>,
}

#[derive(Clone, Debug, Default)]
pub struct DeliverOutcome {
    pub delivered_ids: Vec<i64>,
    pub new_last_seen_id: i64,
}

pub enum DeliverError<E> {
    Store(StoreError),
    Publish(E),
}

impl<E> From<StoreError> for DeliverError<E> {
    fn from(value: StoreError) -> Self {
        DeliverError::Store(value)
    }
}

pub struct SnapshotPruneOptions {
    pub min_keep: u64,
    pub keep_window: i64,
}

/// SQLite-backed persistence for aggregate event streams and the shared
/// outbox/snapshots tables. Grounded on `crates/db/src/l1/db.rs`'s
/// open/write shape (a single connection wrapped behind the store type,
/// all mutation going through one choke point) and `crates/db/src/
/// macros.rs`'s pattern of stamping out one table's worth of typed
/// accessors per logical entity -- here, one physical table per
/// aggregate id instead of one RocksDB column family per entity type.
pub struct EventStore {
    conn: Mutex<rusqlite::Connection>,
    id_gen: OutboxIdGenerator,
    compression_threshold_bytes: usize,
}

impl EventStore {
    pub fn open(path: &std::path::Path) -> StoreResult<Self> {
        Ok(Self {
            conn: Mutex::new(schema::open(path)?),
            id_gen: OutboxIdGenerator::new(),
            compression_threshold_bytes: DEFAULT_COMPRESSION_THRESHOLD_BYTES,
        })
    }

    pub fn open_in_memory() -> StoreResult<Self> {
        Ok(Self {
            conn: Mutex::new(schema::open_in_memory()?),
            id_gen: OutboxIdGenerator::new(),
            compression_threshold_bytes: DEFAULT_COMPRESSION_THRESHOLD_BYTES,
        })
    }

    pub fn with_compression_threshold(mut self, threshold_bytes: usize) -> Self {
        self.compression_threshold_bytes = threshold_bytes;
        self
    }

    /// Appends every unsaved event on each aggregate to its event table
    /// and to the shared outbox, in one transaction, then clears the
    /// aggregates' unsaved-event lists on success. The whole batch across
    /// all passed-in aggregates shares one contiguous outbox id range.
    pub fn persist_aggregates_and_outbox(
        &self,
        aggregates: &mut [&mut dyn Aggregate],
    ) -> StoreResult<PersistOutcome> {
        let raw_events: Vec<Event> = aggregates
            .iter()
            .flat_map(|a| a.unsaved_events().iter().cloned())
            .collect();
        if raw_events.is_empty() {
            return Ok(PersistOutcome::default());
        }

        let (first_id, last_id) = self.id_gen.next_range(raw_events.len());

        {
            let mut conn = self.conn.lock();
            let tx = conn.transaction_with_behavior(rusqlite::TransactionBehavior::Immediate)?;
            for (offset, event) in raw_events.iter().enumerate() {
                let outbox_id = first_id + offset as i64;
                schema::ensure_aggregate_table(&tx, &event.aggregate_id)?;

                let uncompressed_len = event.payload.len() as u64;
                let (payload, is_compressed) = self.maybe_compress(&event.payload)?;

                tx.execute(
                    &format!(
                        "INSERT OR IGNORE INTO \"{}\" (version, request_id, block_height, payload, is_compressed, timestamp, type) \
                         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
                        event.aggregate_id
                    ),
                    params![
                        event.version,
                        event.request_id.to_string(),
                        event.block_height.map(|h| h as i64),
                        payload,
                        is_compressed as i64,
                        event.timestamp_micros as i64,
                        event.event_type,
                    ],
                )?;

                tx.execute(
                    "INSERT INTO outbox (id, aggregate_id, event_type, event_version, request_id, block_height, payload, is_compressed, timestamp, ulen) \
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
                    params![
                        outbox_id,
                        event.aggregate_id,
                        event.event_type,
                        event.version,
                        event.request_id.to_string(),
                        event.block_height.map(|h| h as i64).unwrap_or(-1),
                        payload,
                        is_compressed as i64,
                        event.timestamp_micros as i64,
                        uncompressed_len as i64,
                    ],
                )?;
            }
            tx.commit()?;
        }

        for aggregate in aggregates.iter_mut() {
            aggregate.clear_unsaved_events();
        }

        Ok(PersistOutcome {
            inserted_outbox_ids: (first_id..=last_id).collect(),
            first_id: Some(first_id),
            last_id: Some(last_id),
            raw_events,
        })
    }

    pub fn fetch_events_for_one_aggregate(&self, aggregate_id: &str, opts: &FetchOptions) -> StoreResult<Vec<Event>> {
        schema::validate_aggregate_id(aggregate_id)?;
        let conn = self.conn.lock();

        let exists: bool = conn
            .query_row(
                "SELECT 1 FROM sqlite_master WHERE type='table' AND name=?1",
                params![aggregate_id],
                |_| Ok(true),
            )
            .optional()?
            .unwrap_or(false);
        if !exists {
            return Ok(Vec::new());
        }

        let order = match opts.order_dir.unwrap_or(OrderDir::Asc) {
            OrderDir::Asc => "ASC",
            OrderDir::Desc => "DESC",
        };
        let mut sql = format!(
            "SELECT version, request_id, block_height, payload, is_compressed, timestamp, type FROM \"{aggregate_id}\" WHERE 1=1"
        );
        if opts.version_gte.is_some() {
            sql.push_str(" AND version >= :version_gte");
        }
        if opts.version_lte.is_some() {
            sql.push_str(" AND version <= :version_lte");
        }
        sql.push_str(&format!(" ORDER BY version {order}"));
        if let Some(limit) = opts.limit {
            sql.push_str(&format!(" LIMIT {limit}"));
            if let Some(offset) = opts.offset {
                sql.push_str(&format!(" OFFSET {offset}"));
            }
        }

        let mut stmt = conn.prepare(&sql)?;
        let mut named: Vec<(&str, &dyn rusqlite::ToSql)> = Vec::new();
        if let Some(v) = &opts.version_gte {
            named.push((":version_gte", v));
        }
        if let Some(v) = &opts.version_lte {
            named.push((":version_lte", v));
        }

        let rows = stmt.query_map(named.as_slice(), |row| {
            let version: u64 = row.get(0)?;
            let request_id: String = row.get(1)?;
            let block_height: Option<i64> = row.get(2)?;
            let payload: Vec<u8> = row.get(3)?;
            let is_compressed: i64 = row.get(4)?;
            let timestamp: i64 = row.get(5)?;
            let event_type: String = row.get(6)?;
            Ok((version, request_id, block_height, payload, is_compressed != 0, timestamp, event_type))
        })?;

        let mut events = Vec::new();
        for row in rows {
            let (version, request_id, block_height, payload, is_compressed, timestamp, event_type) = row?;
            let payload = self.maybe_decompress(payload, is_compressed)?;
            events.push(Event {
                aggregate_id: aggregate_id.to_string(),
                version,
                request_id: request_id.parse::<RequestId>().unwrap_or_default(),
                block_height: block_height.map(|h| h as u64),
                timestamp_micros: timestamp as u64,
                event_type,
                payload,
                is_compressed: false,
            });
        }
        Ok(events)
    }

    pub fn fetch_events_for_many_aggregates(&self, aggregate_ids: &[String], opts: &FetchOptions) -> StoreResult<Vec<Event>> {
        let mut out = Vec::new();
        for id in aggregate_ids {
            out.extend(self.fetch_events_for_one_aggregate(id, opts)?);
        }
        Ok(out)
    }

    /// Rehydrates an aggregate at `height`: loads the latest snapshot with
    /// `block_height <= height` (via `from_snapshot`, or `empty` if none
    /// exists), then replays events with `version > snapshot.version` and
    /// `block_height <= height`.
    pub fn rehydrate_at_height<A, FS, FE>(
        &self,
        aggregate_id: &str,
        height: i64,
        from_snapshot: FS,
        empty: FE,
    ) -> StoreResult<A>
    where
        A: Aggregate,
        FS: FnOnce(&Snapshot) -> Result<A, chainrelay_aggregates::AggregateError>,
        FE: FnOnce() -> A,
    {
        let snapshot = self.find_latest_snapshot(aggregate_id, height)?;
        let mut aggregate = match snapshot {
            Some(snap) => from_snapshot(&snap)?,
            None => empty(),
        };
        let snapshot_version = aggregate.version();

        let events = self.fetch_events_for_one_aggregate(
            aggregate_id,
            &FetchOptions {
                version_gte: Some(snapshot_version + 1),
                order_dir: Some(OrderDir::Asc),
                ..Default::default()
            },
        )?;
        for event in events {
            let within_height = event.block_height.map(|h| h as i64).unwrap_or(height) <= height;
            if within_height {
                aggregate.apply(event)?;
            }
        }
        aggregate.clear_unsaved_events();
        Ok(aggregate)
    }

    pub fn create_snapshot(&self, snapshot: &Snapshot) -> StoreResult<()> {
        self.put_snapshot(snapshot)
    }

    pub fn create_snapshot_at_height(&self, snapshot: &Snapshot) -> StoreResult<()> {
        self.put_snapshot(snapshot)
    }

    fn put_snapshot(&self, snapshot: &Snapshot) -> StoreResult<()> {
        let (payload, is_compressed) = self.maybe_compress(&snapshot.payload)?;
        let conn = self.conn.lock();
        conn.execute(
            "INSERT INTO snapshots (aggregate_id, block_height, version, payload, is_compressed) \
             VALUES (?1, ?2, ?3, ?4, ?5) \
             ON CONFLICT(aggregate_id, block_height) DO UPDATE SET version = excluded.version, payload = excluded.payload, is_compressed = excluded.is_compressed",
            params![snapshot.aggregate_id, snapshot.block_height, snapshot.version, payload, is_compressed as i64],
        )?;
        Ok(())
    }

    pub fn find_latest_snapshot(&self, aggregate_id: &str, at_or_below_height: i64) -> StoreResult<Option<Snapshot>> {
        let conn = self.conn.lock();
        let row = conn
            .query_row(
                "SELECT block_height, version, payload, is_compressed FROM snapshots \
                 WHERE aggregate_id = ?1 AND block_height <= ?2 ORDER BY block_height DESC LIMIT 1",
                params![aggregate_id, at_or_below_height],
                |row| {
                    let block_height: i64 = row.get(0)?;
                    let version: u64 = row.get(1)?;
                    let payload: Vec<u8> = row.get(2)?;
                    let is_compressed: i64 = row.get(3)?;
                    Ok((block_height, version, payload, is_compressed != 0))
                },
            )
            .optional()?;

        match row {
            Some((block_height, version, payload, is_compressed)) => {
                let payload = self.maybe_decompress(payload, is_compressed)?;
                Ok(Some(Snapshot {
                    aggregate_id: aggregate_id.to_string(),
                    version,
                    block_height,
                    payload,
                    is_compressed: false,
                }))
            }
            None => Ok(None),
        }
    }

    /// Keeps at least `opts.min_keep` snapshots for `aggregate_id`, plus
    /// any within `opts.keep_window` blocks of `current_height`; deletes
    /// the rest.
    pub fn prune_old_snapshots(&self, aggregate_id: &str, current_height: i64, opts: &SnapshotPruneOptions) -> StoreResult<usize> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(
            "SELECT id, block_height FROM snapshots WHERE aggregate_id = ?1 ORDER BY block_height DESC",
        )?;
        let rows: Vec<(i64, i64)> = stmt
            .query_map(params![aggregate_id], |row| Ok((row.get(0)?, row.get(1)?)))?
            .collect::<Result<_, _>>()?;
        drop(stmt);

        let keep_floor = current_height - opts.keep_window;
        let mut to_delete = Vec::new();
        for (idx, (id, block_height)) in rows.iter().enumerate() {
            let within_keep_count = (idx as u64) < opts.min_keep;
            let within_keep_window = *block_height >= keep_floor;
            if !within_keep_count && !within_keep_window {
                to_delete.push(*id);
            }
        }

        if to_delete.is_empty() {
            return Ok(0);
        }
        let placeholders = to_delete.iter().map(|_| "?").collect::<Vec<_>>().join(",");
        let sql = format!("DELETE FROM snapshots WHERE id IN ({placeholders})");
        let params: Vec<&dyn rusqlite::ToSql> = to_delete.iter().map(|id| id as &dyn rusqlite::ToSql).collect();
        let deleted = conn.execute(&sql, params.as_slice())?;
        Ok(deleted)
    }

    pub fn prune_events(&self, aggregate_id: &str, upto_height: i64) -> StoreResult<usize> {
        schema::validate_aggregate_id(aggregate_id)?;
        let conn = self.conn.lock();
        let exists: bool = conn
            .query_row(
                "SELECT 1 FROM sqlite_master WHERE type='table' AND name=?1",
                params![aggregate_id],
                |_| Ok(true),
            )
            .optional()?
            .unwrap_or(false);
        if !exists {
            return Ok(0);
        }
        let deleted = conn.execute(
            &format!("DELETE FROM \"{aggregate_id}\" WHERE block_height IS NOT NULL AND block_height <= ?1"),
            params![upto_height],
        )?;
        Ok(deleted)
    }

    pub fn has_backlog_before(&self, timestamp_micros: i64, id: i64) -> StoreResult<bool> {
        let conn = self.conn.lock();
        let found: Option<i64> = conn
            .query_row(
                "SELECT id FROM outbox WHERE timestamp < ?1 AND id < ?2 LIMIT 1",
                params![timestamp_micros, id],
                |row| row.get(0),
            )
            .optional()?;
        Ok(found.is_some())
    }

    pub fn has_any_pending_after_watermark(&self, last_seen_id: i64) -> StoreResult<bool> {
        let conn = self.conn.lock();
        let found: Option<i64> = conn
            .query_row("SELECT id FROM outbox WHERE id > ?1 LIMIT 1", params![last_seen_id], |row| row.get(0))
            .optional()?;
        Ok(found.is_some())
    }

    /// Selects the next byte-bounded chunk above `last_seen_id` without
    /// deleting or publishing anything. Exposed (beyond
    /// [`EventStore::fetch_deliver_ack_chunk`]'s sync-publish shape) for
    /// callers whose publish step is itself async, e.g. a wire delivery
    /// loop driving a `Producer`.
    pub fn select_pending_rows(&self, last_seen_id: i64, budget_bytes: u64) -> StoreResult<Vec<OutboxRow>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(
            "SELECT id, aggregate_id, event_type, event_version, request_id, block_height, payload, is_compressed, timestamp, ulen \
             FROM outbox WHERE id > ?1 ORDER BY id ASC",
        )?;
        let rows = stmt.query_map(params![last_seen_id], |row| {
            Ok(OutboxRow {
                id: row.get(0)?,
                aggregate_id: row.get(1)?,
                event_type: row.get(2)?,
                event_version: row.get(3)?,
                request_id: row
                    .get::<_, String>(4)?
                    .parse::<RequestId>()
                    .unwrap_or_default(),
                block_height: row.get(5)?,
                payload: row.get(6)?,
                is_compressed: {
                    let flag: i64 = row.get(7)?;
                    flag != 0
                },
                timestamp_micros: row.get(8)?,
                uncompressed_length: row.get(9)?,
            })
        })?;

        let mut chunk = Vec::new();
        let mut cumulative = 0u64;
        for row in rows {
            let row = row?;
            if !chunk.is_empty() && cumulative + row.uncompressed_length > budget_bytes {
                break;
            }
            cumulative += row.uncompressed_length;
            chunk.push(row);
        }
        Ok(chunk)
    }

    /// Fetches the next byte-bounded chunk above `last_seen_id`, hands it
    /// to `publish`, and on success deletes the delivered rows and
    /// returns the new watermark. `publish` failing rolls back with no
    /// side effects and no watermark movement.
    pub fn fetch_deliver_ack_chunk<E>(
        &self,
        last_seen_id: i64,
        budget_bytes: u64,
        publish: impl FnOnce(&[OutboxRow]) -> Result<(), E>,
    ) -> Result<DeliverOutcome, DeliverError<E>> {
        let chunk = self.select_pending_rows(last_seen_id, budget_bytes)?;
        if chunk.is_empty() {
            return Ok(DeliverOutcome {
                delivered_ids: Vec::new(),
                new_last_seen_id: last_seen_id,
            });
        }

        publish(&chunk).map_err(DeliverError::Publish)?;

        let ids: Vec<i64> = chunk.iter().map(|r| r.id).collect();
        let new_last_seen_id = *ids.last().unwrap();
        self.delete_outbox_by_ids(&ids)?;
        Ok(DeliverOutcome {
            delivered_ids: ids,
            new_last_seen_id,
        })
    }

    pub fn delete_outbox_by_ids(&self, ids: &[i64]) -> StoreResult<usize> {
        if ids.is_empty() {
            return Ok(0);
        }
        let mut conn = self.conn.lock();
        let tx = conn.transaction_with_behavior(rusqlite::TransactionBehavior::Immediate)?;
        let mut total = 0;
        for chunk in ids.chunks(DELETE_CHUNK_SIZE) {
            let placeholders = chunk.iter().map(|_| "?").collect::<Vec<_>>().join(",");
            let sql = format!("DELETE FROM outbox WHERE id IN ({placeholders})");
            let params: Vec<&dyn rusqlite::ToSql> = chunk.iter().map(|id| id as &dyn rusqlite::ToSql).collect();
            total += tx.execute(&sql, params.as_slice())?;
        }
        tx.commit()?;
        Ok(total)
    }

    fn maybe_compress(&self, payload: &[u8]) -> StoreResult<(Vec<u8>, bool)> {
        if payload.len() >= self.compression_threshold_bytes {
            let compressed = zstd::bulk::compress(payload, ZSTD_LEVEL).map_err(StoreError::Compression)?;
            Ok((compressed, true))
        } else {
            Ok((payload.to_vec(), false))
        }
    }

    fn maybe_decompress(&self, payload: Vec<u8>, is_compressed: bool) -> StoreResult<Vec<u8>> {
        if is_compressed {
            // zstd's frame header carries the original size; a generous
            // capacity bound avoids a second round trip to look it up.
            zstd::bulk::decompress(&payload, payload.len().saturating_mul(16).max(1 << 16))
                .map_err(StoreError::Decompression)
        } else {
            Ok(payload)
        }
    }

    /// Decompresses one [`OutboxRow`]'s payload, for callers (e.g. a wire
    /// delivery loop) framing rows fetched via [`Self::select_pending_rows`].
    pub fn decompress_row_payload(&self, row: &OutboxRow) -> StoreResult<Vec<u8>> {
        self.maybe_decompress(row.payload.clone(), row.is_compressed)
    }
}
