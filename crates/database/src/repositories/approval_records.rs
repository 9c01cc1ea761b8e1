use crate::connection::Database;
use crate::error::{Result, StoreError};
use crate::store::{RecordStore, CHANGE_FEED_CAPACITY};
use async_trait::async_trait;
use otpgate_models::{ApprovalRecord, NewApprovalRecord, RecordChange, RecordPatch};
use serde::Deserialize;
use sqlx::postgres::PgListener;
use sqlx::PgPool;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use uuid::Uuid;

/// Channel the `approval_records_notify` trigger publishes on.
pub const CHANGE_CHANNEL: &str = "approval_records_changes";

/// Longest wait between attempts to re-establish the LISTEN connection.
const MAX_RELISTEN_DELAY: Duration = Duration::from_secs(30);

/// Payload written by the change trigger.
#[derive(Debug, Deserialize)]
struct ChangeNotification {
    op: String,
    id: Uuid,
}

/// Aborts the LISTEN task once the last repository clone is dropped.
struct ListenerGuard(JoinHandle<()>);

impl Drop for ListenerGuard {
    fn drop(&mut self) {
        self.0.abort();
    }
}

/// Postgres-backed record store.
///
/// The change feed is driven by `LISTEN approval_records_changes`, so writes
/// made by any process sharing the database reach every subscriber.
#[derive(Clone)]
pub struct ApprovalRecordRepository {
    pool: PgPool,
    changes: broadcast::Sender<RecordChange>,
    _listener: Option<Arc<ListenerGuard>>,
}

impl ApprovalRecordRepository {
    /// Repository without a change feed listener. Subscribers only receive
    /// events if [`ApprovalRecordRepository::connect`] is used instead.
    pub fn new(pool: PgPool) -> Self {
        let (changes, _) = broadcast::channel(CHANGE_FEED_CAPACITY);
        Self {
            pool,
            changes,
            _listener: None,
        }
    }

    /// Repository with a background LISTEN task feeding [`RecordStore::subscribe`].
    pub async fn connect(db: &Database) -> Result<Self> {
        let listener = open_listener(db.pool()).await?;

        let mut repo = Self::new(db.pool().clone());
        let handle = tokio::spawn(run_listener(
            listener,
            repo.pool.clone(),
            repo.changes.clone(),
        ));
        repo._listener = Some(Arc::new(ListenerGuard(handle)));

        tracing::info!("Listening for approval record changes on '{}'", CHANGE_CHANNEL);
        Ok(repo)
    }

    /// Find record by ID
    pub async fn find_by_id(&self, id: Uuid) -> Result<Option<ApprovalRecord>> {
        let record = sqlx::query_as::<_, ApprovalRecord>(
            "SELECT * FROM approval_records WHERE id = $1",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(record)
    }
}

#[async_trait]
impl RecordStore for ApprovalRecordRepository {
    async fn insert(&self, new: &NewApprovalRecord) -> Result<ApprovalRecord> {
        let (email, username, phone) = new.identity.columns();

        let record = sqlx::query_as::<_, ApprovalRecord>(
            r#"
            INSERT INTO approval_records (email, username, phone, password)
            VALUES ($1, $2, $3, $4)
            RETURNING *
            "#,
        )
        .bind(email)
        .bind(username)
        .bind(phone)
        .bind(&new.password)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| match e {
            sqlx::Error::Database(ref db_err) if db_err.is_check_violation() => {
                StoreError::InvalidInput(db_err.message().to_string())
            }
            other => StoreError::from(other),
        })?;

        Ok(record)
    }

    async fn get(&self, id: Uuid) -> Result<Option<ApprovalRecord>> {
        self.find_by_id(id).await
    }

    async fn update(&self, id: Uuid, patch: &RecordPatch) -> Result<ApprovalRecord> {
        if patch.is_empty() {
            return self
                .find_by_id(id)
                .await?
                .ok_or_else(|| StoreError::record_not_found(id));
        }

        // Every assignment is written so that it can only move a column forward
        let mut query_builder = sqlx::QueryBuilder::new("UPDATE approval_records SET id = id");

        if let Some(show) = patch.show_otp_input {
            query_builder.push(", show_otp_input = show_otp_input OR ");
            query_builder.push_bind(show);
        }

        if let Some(ref otp) = patch.user_entered_otp {
            query_builder.push(", user_entered_otp = ");
            query_builder.push_bind(otp);
        }

        if let Some(at) = patch.otp_submitted_at {
            query_builder.push(", otp_submitted_at = ");
            query_builder.push_bind(at);
        }

        if let Some(approved) = patch.is_approved {
            query_builder.push(", is_approved = is_approved OR ");
            query_builder.push_bind(approved);
        }

        if let Some(at) = patch.approved_at {
            query_builder.push(", approved_at = COALESCE(approved_at, ");
            query_builder.push_bind(at);
            query_builder.push(")");
        }

        if let Some(verified) = patch.is_verified {
            query_builder.push(", is_verified = is_verified OR ");
            query_builder.push_bind(verified);
        }

        query_builder.push(" WHERE id = ");
        query_builder.push_bind(id);
        query_builder.push(" RETURNING *");

        let record = query_builder
            .build_query_as::<ApprovalRecord>()
            .fetch_optional(&self.pool)
            .await?
            .ok_or_else(|| StoreError::record_not_found(id))?;

        Ok(record)
    }

    async fn delete(&self, id: Uuid) -> Result<bool> {
        let result = sqlx::query("DELETE FROM approval_records WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected() > 0)
    }

    async fn list(&self) -> Result<Vec<ApprovalRecord>> {
        let records = sqlx::query_as::<_, ApprovalRecord>(
            "SELECT * FROM approval_records ORDER BY created_at DESC",
        )
        .fetch_all(&self.pool)
        .await?;

        Ok(records)
    }

    fn subscribe(&self) -> broadcast::Receiver<RecordChange> {
        self.changes.subscribe()
    }
}

async fn open_listener(pool: &PgPool) -> Result<PgListener> {
    let mut listener = PgListener::connect_with(pool).await?;
    listener.listen(CHANGE_CHANNEL).await?;
    Ok(listener)
}

/// Open a fresh LISTEN connection, retrying with backoff until it succeeds.
async fn relisten(pool: &PgPool) -> PgListener {
    let mut delay = Duration::from_secs(1);
    loop {
        match open_listener(pool).await {
            Ok(listener) => return listener,
            Err(e) => {
                tracing::warn!("Failed to re-establish change listener: {}", e);
                tokio::time::sleep(delay).await;
                delay = (delay * 2).min(MAX_RELISTEN_DELAY);
            }
        }
    }
}

async fn run_listener(
    mut listener: PgListener,
    pool: PgPool,
    changes: broadcast::Sender<RecordChange>,
) {
    loop {
        let notification = match listener.try_recv().await {
            Ok(Some(n)) => n,
            lost => {
                match lost {
                    Err(e) => tracing::warn!("Change listener error: {}", e),
                    _ => tracing::warn!("Change listener connection lost"),
                }

                // Notifications sent while disconnected are gone. LISTEN is
                // active again before subscribers are told to refetch.
                listener = relisten(&pool).await;
                tracing::info!("Change listener re-established, requesting resync");
                let _ = changes.send(RecordChange::Resynced);
                continue;
            }
        };

        let payload: ChangeNotification = match serde_json::from_str(notification.payload()) {
            Ok(p) => p,
            Err(e) => {
                tracing::warn!("Malformed change notification {:?}: {}", notification.payload(), e);
                continue;
            }
        };

        let change = match payload.op.as_str() {
            "DELETE" => RecordChange::Deleted(payload.id),
            op => {
                let record = sqlx::query_as::<_, ApprovalRecord>(
                    "SELECT * FROM approval_records WHERE id = $1",
                )
                .bind(payload.id)
                .fetch_optional(&pool)
                .await;

                match record {
                    Ok(Some(record)) if op == "INSERT" => RecordChange::Inserted(record),
                    Ok(Some(record)) => RecordChange::Updated(record),
                    // Deleted before we could read it; the DELETE notification follows
                    Ok(None) => continue,
                    Err(e) => {
                        tracing::warn!("Failed to load changed record {}: {}", payload.id, e);
                        continue;
                    }
                }
            }
        };

        tracing::debug!("Record change: {:?} {}", payload.op, payload.id);
        let _ = changes.send(change);
    }
}
