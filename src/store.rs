//! Persistence adapter.
//!
//! SQLite via rusqlite. The lifecycle treats this as a key-value collaborator:
//! requisition rows keyed by id, channel-config rows keyed by community.
//! Durability of in-flight state is best-effort; the in-memory working set
//! stays authoritative if a write fails mid-announce.

use std::path::Path;
use std::str::FromStr;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use rusqlite::{Connection, OptionalExtension, params};

use crate::errors::StoreError;
use crate::requisition::{
    ChannelConfig, ChannelId, CommunityId, MessageHandle, ParticipantId, Requisition,
    RequisitionStatus,
};

/// Async-safe handle to the store.
///
/// Wraps `Store` behind `Arc<Mutex>` and runs all access on tokio's blocking
/// thread pool via `spawn_blocking`, preventing synchronous SQLite I/O from
/// tying up async worker threads.
#[derive(Clone)]
pub struct DbHandle {
    inner: Arc<std::sync::Mutex<Store>>,
}

impl DbHandle {
    pub fn new(store: Store) -> Self {
        Self {
            inner: Arc::new(std::sync::Mutex::new(store)),
        }
    }

    /// Run a closure with access to the store on a blocking thread.
    /// All data passed into `f` must be owned (`'static`).
    pub async fn call<F, R>(&self, f: F) -> Result<R, StoreError>
    where
        F: FnOnce(&Store) -> Result<R, StoreError> + Send + 'static,
        R: Send + 'static,
    {
        let store = self.inner.clone();
        tokio::task::spawn_blocking(move || {
            let guard = store
                .lock()
                .map_err(|e| StoreError::Runtime(format!("store lock poisoned: {}", e)))?;
            f(&guard)
        })
        .await
        .map_err(|e| StoreError::Runtime(format!("store task panicked: {}", e)))?
    }
}

/// Fields of a requisition at creation time, before the store assigns an id.
#[derive(Debug, Clone)]
pub struct NewRequisition {
    pub community: CommunityId,
    pub requester: ParticipantId,
    pub material: String,
    pub quantity: u32,
    pub payment: String,
    pub deadline: DateTime<Utc>,
    pub region: String,
}

pub struct Store {
    conn: Connection,
}

impl Store {
    /// Open (or create) the database at the given path and ensure the schema.
    pub fn open(path: &Path) -> Result<Self, StoreError> {
        let conn = Connection::open(path)?;
        let store = Self { conn };
        store.init()?;
        Ok(store)
    }

    /// In-memory database, for tests.
    pub fn open_in_memory() -> Result<Self, StoreError> {
        let conn = Connection::open_in_memory()?;
        let store = Self { conn };
        store.init()?;
        Ok(store)
    }

    fn init(&self) -> Result<(), StoreError> {
        self.conn.execute_batch(
            "
            CREATE TABLE IF NOT EXISTS requisitions (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                community INTEGER NOT NULL,
                requester INTEGER NOT NULL,
                material TEXT NOT NULL,
                quantity INTEGER NOT NULL,
                payment TEXT NOT NULL,
                deadline TEXT NOT NULL,
                region TEXT NOT NULL,
                accepted_by TEXT NOT NULL DEFAULT '[]',
                completed_by TEXT NOT NULL DEFAULT '[]',
                message_handle INTEGER,
                completion_details TEXT NOT NULL DEFAULT '',
                status TEXT NOT NULL DEFAULT 'draft',
                created_at TEXT NOT NULL DEFAULT (datetime('now'))
            );

            CREATE TABLE IF NOT EXISTS channels (
                community INTEGER PRIMARY KEY,
                announce_channel INTEGER NOT NULL,
                archive_channel INTEGER NOT NULL,
                label TEXT NOT NULL
            );
            ",
        )?;
        Ok(())
    }

    /// Insert a new draft requisition and return its assigned id.
    pub fn create_requisition(&self, new: &NewRequisition) -> Result<i64, StoreError> {
        self.conn.execute(
            "INSERT INTO requisitions
                 (community, requester, material, quantity, payment, deadline, region, status)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, 'draft')",
            params![
                new.community.as_i64(),
                new.requester.as_i64(),
                new.material,
                new.quantity,
                new.payment,
                new.deadline.to_rfc3339(),
                new.region,
            ],
        )?;
        Ok(self.conn.last_insert_rowid())
    }

    /// Record the announcement handle and mark the requisition open.
    pub fn set_message_handle(&self, id: i64, handle: MessageHandle) -> Result<(), StoreError> {
        let changed = self.conn.execute(
            "UPDATE requisitions SET message_handle = ?1, status = 'open' WHERE id = ?2",
            params![handle.as_i64(), id],
        )?;
        if changed == 0 {
            return Err(StoreError::MissingRow { id });
        }
        Ok(())
    }

    /// Persist the acceptance and completion sets.
    pub fn set_participants(
        &self,
        id: i64,
        accepted: &[ParticipantId],
        completed: &[ParticipantId],
    ) -> Result<(), StoreError> {
        let changed = self.conn.execute(
            "UPDATE requisitions SET accepted_by = ?1, completed_by = ?2 WHERE id = ?3",
            params![encode_participants(accepted), encode_participants(completed), id],
        )?;
        if changed == 0 {
            return Err(StoreError::MissingRow { id });
        }
        Ok(())
    }

    pub fn set_completion_details(&self, id: i64, details: &str) -> Result<(), StoreError> {
        let changed = self.conn.execute(
            "UPDATE requisitions SET completion_details = ?1 WHERE id = ?2",
            params![details, id],
        )?;
        if changed == 0 {
            return Err(StoreError::MissingRow { id });
        }
        Ok(())
    }

    pub fn set_status(&self, id: i64, status: RequisitionStatus) -> Result<(), StoreError> {
        let changed = self.conn.execute(
            "UPDATE requisitions SET status = ?1 WHERE id = ?2",
            params![status.as_str(), id],
        )?;
        if changed == 0 {
            return Err(StoreError::MissingRow { id });
        }
        Ok(())
    }

    /// Overwrite the mutable fields of an open requisition.
    pub fn update_fields(
        &self,
        id: i64,
        quantity: u32,
        payment: &str,
        deadline: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        let changed = self.conn.execute(
            "UPDATE requisitions SET quantity = ?1, payment = ?2, deadline = ?3 WHERE id = ?4",
            params![quantity, payment, deadline.to_rfc3339(), id],
        )?;
        if changed == 0 {
            return Err(StoreError::MissingRow { id });
        }
        Ok(())
    }

    pub fn get_requisition(&self, id: i64) -> Result<Option<Requisition>, StoreError> {
        self.conn
            .query_row(
                "SELECT id, community, requester, material, quantity, payment, deadline, region,
                        accepted_by, completed_by, message_handle, completion_details, status
                 FROM requisitions WHERE id = ?1",
                params![id],
                row_to_requisition,
            )
            .optional()?
            .transpose()
    }

    /// Load the working set at startup: announced, not yet archived.
    pub fn load_active(&self) -> Result<Vec<Requisition>, StoreError> {
        let mut stmt = self.conn.prepare(
            "SELECT id, community, requester, material, quantity, payment, deadline, region,
                    accepted_by, completed_by, message_handle, completion_details, status
             FROM requisitions
             WHERE message_handle IS NOT NULL AND status != 'archived'
             ORDER BY id",
        )?;
        let rows = stmt.query_map([], row_to_requisition)?;
        let mut out = Vec::new();
        for row in rows {
            out.push(row??);
        }
        Ok(out)
    }

    pub fn get_channel_config(
        &self,
        community: CommunityId,
    ) -> Result<Option<ChannelConfig>, StoreError> {
        Ok(self
            .conn
            .query_row(
                "SELECT announce_channel, archive_channel, label FROM channels WHERE community = ?1",
                params![community.as_i64()],
                |row| {
                    Ok(ChannelConfig {
                        announce: ChannelId::from_i64(row.get(0)?),
                        archive: ChannelId::from_i64(row.get(1)?),
                        label: row.get(2)?,
                    })
                },
            )
            .optional()?)
    }

    /// Create or overwrite the channel configuration for a community.
    /// Last write wins; there is no deletion path.
    pub fn upsert_channel_config(
        &self,
        community: CommunityId,
        config: &ChannelConfig,
    ) -> Result<(), StoreError> {
        self.conn.execute(
            "INSERT INTO channels (community, announce_channel, archive_channel, label)
             VALUES (?1, ?2, ?3, ?4)
             ON CONFLICT (community) DO UPDATE
             SET announce_channel = excluded.announce_channel,
                 archive_channel = excluded.archive_channel,
                 label = excluded.label",
            params![
                community.as_i64(),
                config.announce.as_i64(),
                config.archive.as_i64(),
                config.label,
            ],
        )?;
        Ok(())
    }

    pub fn load_channel_configs(&self) -> Result<Vec<(CommunityId, ChannelConfig)>, StoreError> {
        let mut stmt = self.conn.prepare(
            "SELECT community, announce_channel, archive_channel, label FROM channels",
        )?;
        let rows = stmt.query_map([], |row| {
            Ok((
                CommunityId::from_i64(row.get(0)?),
                ChannelConfig {
                    announce: ChannelId::from_i64(row.get(1)?),
                    archive: ChannelId::from_i64(row.get(2)?),
                    label: row.get(3)?,
                },
            ))
        })?;
        let mut out = Vec::new();
        for row in rows {
            out.push(row?);
        }
        Ok(out)
    }
}

fn encode_participants(participants: &[ParticipantId]) -> String {
    let raw: Vec<u64> = participants.iter().map(|p| p.0).collect();
    serde_json::to_string(&raw).unwrap_or_else(|_| "[]".to_string())
}

fn decode_participants(
    id: i64,
    column: &'static str,
    raw: &str,
) -> Result<Vec<ParticipantId>, StoreError> {
    let ids: Vec<u64> = serde_json::from_str(raw).map_err(|_| StoreError::CorruptRow {
        id,
        column,
        value: raw.to_string(),
    })?;
    Ok(ids.into_iter().map(ParticipantId).collect())
}

/// Row mapper: rusqlite errors propagate through the outer Result, domain
/// decoding failures through the inner one.
fn row_to_requisition(row: &rusqlite::Row<'_>) -> rusqlite::Result<Result<Requisition, StoreError>> {
    let id: i64 = row.get(0)?;
    let deadline_raw: String = row.get(6)?;
    let accepted_raw: String = row.get(8)?;
    let completed_raw: String = row.get(9)?;
    let status_raw: String = row.get(12)?;

    let decoded = (|| {
        let deadline = DateTime::parse_from_rfc3339(&deadline_raw)
            .map_err(|_| StoreError::CorruptRow {
                id,
                column: "deadline",
                value: deadline_raw.clone(),
            })?
            .with_timezone(&Utc);
        let status =
            RequisitionStatus::from_str(&status_raw).map_err(|_| StoreError::CorruptRow {
                id,
                column: "status",
                value: status_raw.clone(),
            })?;
        Ok(Requisition {
            id,
            community: CommunityId::from_i64(row.get(1)?),
            requester: ParticipantId::from_i64(row.get(2)?),
            material: row.get(3)?,
            quantity: row.get(4)?,
            payment: row.get(5)?,
            deadline,
            region: row.get(7)?,
            accepted_by: decode_participants(id, "accepted_by", &accepted_raw)?,
            completed_by: decode_participants(id, "completed_by", &completed_raw)?,
            message_handle: row
                .get::<_, Option<i64>>(10)?
                .map(MessageHandle::from_i64),
            completion_details: row.get(11)?,
            status,
        })
    })();

    Ok(decoded)
}
