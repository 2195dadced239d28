//! Event repository: the durable build queue.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use deadci_core::{BuildStatus, Event, EventId, Fingerprint, RETRY_MARKER};
use sqlx::{QueryBuilder, Sqlite, SqlitePool};
use tokio::sync::Mutex;
use tracing::{debug, info};

use crate::{DbError, DbResult};

/// Maximum number of events returned by a listing.
pub const LIST_LIMIT: i64 = 500;

/// An event row in the database.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct EventRecord {
    pub id: i64,
    pub created_at: DateTime<Utc>,
    pub status: String,
    pub kind: String,
    pub domain: String,
    pub owner: String,
    pub repo: String,
    pub branch: String,
    pub commit_sha: String,
    pub base_owner: Option<String>,
    pub base_repo: Option<String>,
    pub base_branch: Option<String>,
    pub log: Vec<u8>,
}

impl TryFrom<EventRecord> for Event {
    type Error = DbError;

    fn try_from(record: EventRecord) -> DbResult<Self> {
        let status = record
            .status
            .parse::<BuildStatus>()
            .map_err(|e| DbError::InvalidRow(format!("event {}: {}", record.id, e)))?;
        let kind = record
            .kind
            .parse()
            .map_err(|e| DbError::InvalidRow(format!("event {}: {}", record.id, e)))?;

        Ok(Event {
            id: Some(EventId::new(record.id)),
            fingerprint: Fingerprint {
                domain: record.domain,
                owner: record.owner,
                repo: record.repo,
                branch: record.branch,
                commit: record.commit_sha,
            },
            kind,
            base_owner: record.base_owner,
            base_repo: record.base_repo,
            base_branch: record.base_branch,
            status,
            created_at: record.created_at,
            log: record.log,
        })
    }
}

/// Hierarchical listing filter: domain, then owner, repo, branch, commit.
///
/// A field only applies when every field before it is set.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EventFilter {
    pub domain: Option<String>,
    pub owner: Option<String>,
    pub repo: Option<String>,
    pub branch: Option<String>,
    pub commit: Option<String>,
}

impl EventFilter {
    pub fn all() -> Self {
        Self::default()
    }

    /// Build a filter from leading path segments (`["github.com", "acme"]`).
    pub fn from_segments<S: AsRef<str>>(segments: &[S]) -> Self {
        let mut parts = segments.iter().map(|s| s.as_ref().to_string());
        Self {
            domain: parts.next(),
            owner: parts.next(),
            repo: parts.next(),
            branch: parts.next(),
            commit: parts.next(),
        }
    }

    /// The effective prefix as (column, value) pairs.
    fn prefix(&self) -> Vec<(&'static str, &str)> {
        [
            ("domain", &self.domain),
            ("owner", &self.owner),
            ("repo", &self.repo),
            ("branch", &self.branch),
            ("commit_sha", &self.commit),
        ]
        .into_iter()
        .map_while(|(column, value)| value.as_deref().map(|v| (column, v)))
        .collect()
    }
}

#[async_trait]
pub trait EventStore: Send + Sync {
    /// Persist a new event and assign its id.
    async fn insert(&self, event: &mut Event) -> DbResult<EventId>;

    /// Overwrite a persisted event.
    async fn update(&self, event: &Event) -> DbResult<()>;

    /// Find the event for a fingerprint.
    async fn lookup(&self, fingerprint: &Fingerprint) -> DbResult<Option<Event>>;

    /// Atomically take the oldest pending event and mark it running.
    async fn claim_next_pending(&self) -> DbResult<Option<Event>>;

    /// Most recent events matching a filter, capped at [`LIST_LIMIT`].
    async fn list(&self, filter: &EventFilter) -> DbResult<Vec<Event>>;

    async fn count_by_status(&self, status: BuildStatus) -> DbResult<i64>;

    /// Append bytes to an event's stored log without touching anything else.
    async fn append_log(&self, id: EventId, bytes: &[u8]) -> DbResult<()>;

    /// Reset an event to pending unless it is running.
    ///
    /// Returns `None` when the event is running (or unknown) and was left untouched.
    async fn requeue(&self, id: EventId) -> DbResult<Option<Event>>;

    /// Atomically mark an event running for a manual re-run, unless it already is.
    async fn claim_for_rerun(&self, id: EventId) -> DbResult<Option<Event>>;

    /// Release events left running by a previous process back to pending.
    async fn recover_interrupted(&self) -> DbResult<u64>;
}

/// SQLite implementation of EventStore.
pub struct SqliteEventStore {
    pool: SqlitePool,
    /// Serializes every mutating operation.
    write_lock: Mutex<()>,
}

impl SqliteEventStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self {
            pool,
            write_lock: Mutex::new(()),
        }
    }

    fn into_events(records: Vec<EventRecord>) -> DbResult<Vec<Event>> {
        records.into_iter().map(Event::try_from).collect()
    }
}

#[async_trait]
impl EventStore for SqliteEventStore {
    async fn insert(&self, event: &mut Event) -> DbResult<EventId> {
        if let Some(id) = event.id {
            return Err(DbError::AlreadyPersisted(id));
        }

        let _guard = self.write_lock.lock().await;
        let id = sqlx::query_scalar::<_, i64>(
            r#"
            INSERT INTO events (created_at, status, kind, domain, owner, repo, branch, commit_sha,
                                base_owner, base_repo, base_branch, log)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            RETURNING id
            "#,
        )
        .bind(event.created_at)
        .bind(event.status.as_str())
        .bind(event.kind.as_str())
        .bind(&event.fingerprint.domain)
        .bind(&event.fingerprint.owner)
        .bind(&event.fingerprint.repo)
        .bind(&event.fingerprint.branch)
        .bind(&event.fingerprint.commit)
        .bind(&event.base_owner)
        .bind(&event.base_repo)
        .bind(&event.base_branch)
        .bind(event.log.as_slice())
        .fetch_one(&self.pool)
        .await
        .map_err(|e| match e {
            sqlx::Error::Database(ref db) if db.is_unique_violation() => {
                DbError::Duplicate(format!("event {}", event.fingerprint))
            }
            other => DbError::Database(other),
        })?;

        let id = EventId::new(id);
        event.id = Some(id);
        debug!(event_id = %id, path = %event.path(), "Inserted event");
        Ok(id)
    }

    async fn update(&self, event: &Event) -> DbResult<()> {
        let id = event.id.ok_or(DbError::NotPersisted)?;

        let _guard = self.write_lock.lock().await;
        let result = sqlx::query(
            r#"
            UPDATE events
            SET status = ?, kind = ?, domain = ?, owner = ?, repo = ?, branch = ?, commit_sha = ?,
                base_owner = ?, base_repo = ?, base_branch = ?, log = ?
            WHERE id = ?
            "#,
        )
        .bind(event.status.as_str())
        .bind(event.kind.as_str())
        .bind(&event.fingerprint.domain)
        .bind(&event.fingerprint.owner)
        .bind(&event.fingerprint.repo)
        .bind(&event.fingerprint.branch)
        .bind(&event.fingerprint.commit)
        .bind(&event.base_owner)
        .bind(&event.base_repo)
        .bind(&event.base_branch)
        .bind(event.log.as_slice())
        .bind(id.get())
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(DbError::NotFound(format!("event {}", id)));
        }
        Ok(())
    }

    async fn lookup(&self, fingerprint: &Fingerprint) -> DbResult<Option<Event>> {
        let record = sqlx::query_as::<_, EventRecord>(
            r#"
            SELECT * FROM events
            WHERE domain = ? AND owner = ? AND repo = ? AND branch = ? AND commit_sha = ?
            "#,
        )
        .bind(&fingerprint.domain)
        .bind(&fingerprint.owner)
        .bind(&fingerprint.repo)
        .bind(&fingerprint.branch)
        .bind(&fingerprint.commit)
        .fetch_optional(&self.pool)
        .await?;

        record.map(Event::try_from).transpose()
    }

    async fn claim_next_pending(&self) -> DbResult<Option<Event>> {
        let _guard = self.write_lock.lock().await;
        let record = sqlx::query_as::<_, EventRecord>(
            r#"
            UPDATE events
            SET status = 'running',
                log = CASE WHEN length(log) > 0 THEN ? ELSE log END
            WHERE id = (
                SELECT id FROM events
                WHERE status = 'pending'
                ORDER BY id ASC
                LIMIT 1
            )
            RETURNING *
            "#,
        )
        .bind(RETRY_MARKER.as_bytes())
        .fetch_optional(&self.pool)
        .await?;

        record.map(Event::try_from).transpose()
    }

    async fn list(&self, filter: &EventFilter) -> DbResult<Vec<Event>> {
        let mut query = QueryBuilder::<Sqlite>::new("SELECT * FROM events WHERE 1 = 1");
        for (column, value) in filter.prefix() {
            query.push(format!(" AND {} = ", column));
            query.push_bind(value);
        }
        query.push(" ORDER BY id DESC LIMIT ");
        query.push_bind(LIST_LIMIT);

        let records = query
            .build_query_as::<EventRecord>()
            .fetch_all(&self.pool)
            .await?;
        Self::into_events(records)
    }

    async fn count_by_status(&self, status: BuildStatus) -> DbResult<i64> {
        let count = sqlx::query_scalar::<_, i64>("SELECT COUNT(*) FROM events WHERE status = ?")
            .bind(status.as_str())
            .fetch_one(&self.pool)
            .await?;
        Ok(count)
    }

    async fn append_log(&self, id: EventId, bytes: &[u8]) -> DbResult<()> {
        let _guard = self.write_lock.lock().await;
        let result = sqlx::query("UPDATE events SET log = CAST(log || ? AS BLOB) WHERE id = ?")
            .bind(bytes)
            .bind(id.get())
            .execute(&self.pool)
            .await?;

        if result.rows_affected() == 0 {
            return Err(DbError::NotFound(format!("event {}", id)));
        }
        Ok(())
    }

    async fn requeue(&self, id: EventId) -> DbResult<Option<Event>> {
        let _guard = self.write_lock.lock().await;
        let record = sqlx::query_as::<_, EventRecord>(
            r#"
            UPDATE events SET status = 'pending'
            WHERE id = ? AND status != 'running'
            RETURNING *
            "#,
        )
        .bind(id.get())
        .fetch_optional(&self.pool)
        .await?;

        record.map(Event::try_from).transpose()
    }

    async fn claim_for_rerun(&self, id: EventId) -> DbResult<Option<Event>> {
        let _guard = self.write_lock.lock().await;
        let record = sqlx::query_as::<_, EventRecord>(
            r#"
            UPDATE events SET status = 'running', log = ?
            WHERE id = ? AND status != 'running'
            RETURNING *
            "#,
        )
        .bind(RETRY_MARKER.as_bytes())
        .bind(id.get())
        .fetch_optional(&self.pool)
        .await?;

        record.map(Event::try_from).transpose()
    }

    async fn recover_interrupted(&self) -> DbResult<u64> {
        let _guard = self.write_lock.lock().await;
        let result = sqlx::query("UPDATE events SET status = 'pending' WHERE status = 'running'")
            .execute(&self.pool)
            .await?;

        let released = result.rows_affected();
        if released > 0 {
            info!(count = released, "Released interrupted builds back to the queue");
        }
        Ok(released)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{create_pool, run_migrations};
    use deadci_core::EventType;
    use std::sync::Arc;

    async fn store() -> SqliteEventStore {
        let pool = create_pool("sqlite::memory:").await.unwrap();
        run_migrations(&pool).await.unwrap();
        SqliteEventStore::new(pool)
    }

    fn push(commit: &str) -> Event {
        Event::push(Fingerprint::new(
            "github.com",
            "acme",
            "widgets",
            "main",
            commit,
        ))
    }

    #[tokio::test]
    async fn test_insert_assigns_id_once() {
        let store = store().await;
        let mut event = push("abc123");

        let id = store.insert(&mut event).await.unwrap();
        assert_eq!(event.id, Some(id));

        let result = store.insert(&mut event).await;
        assert!(matches!(result, Err(DbError::AlreadyPersisted(existing)) if existing == id));
    }

    #[tokio::test]
    async fn test_duplicate_fingerprint_is_rejected() {
        let store = store().await;
        store.insert(&mut push("abc123")).await.unwrap();

        let result = store.insert(&mut push("abc123")).await;
        assert!(matches!(result, Err(DbError::Duplicate(_))));
        assert_eq!(store.list(&EventFilter::all()).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_update_requires_id() {
        let store = store().await;
        let result = store.update(&push("abc123")).await;
        assert!(matches!(result, Err(DbError::NotPersisted)));
    }

    #[tokio::test]
    async fn test_update_overwrites_row() {
        let store = store().await;
        let mut event = push("abc123");
        store.insert(&mut event).await.unwrap();

        event.append_log(b"compiling...");
        event.status = BuildStatus::Running;
        store.update(&event).await.unwrap();

        let stored = store.lookup(&event.fingerprint).await.unwrap().unwrap();
        assert_eq!(stored.status, BuildStatus::Running);
        assert_eq!(stored.log, b"compiling...");
        assert_eq!(stored.created_at, event.created_at);
    }

    #[tokio::test]
    async fn test_lookup_missing_is_none() {
        let store = store().await;
        let found = store.lookup(&push("nope").fingerprint).await.unwrap();
        assert!(found.is_none());
    }

    #[tokio::test]
    async fn test_pull_request_fields_round_trip() {
        let store = store().await;
        let mut event = Event::pull_request(
            Fingerprint::new("github.com", "contributor", "widgets", "fix", "def456"),
            "acme",
            "widgets",
            "main",
        );
        store.insert(&mut event).await.unwrap();

        let stored = store.lookup(&event.fingerprint).await.unwrap().unwrap();
        assert_eq!(stored.kind, EventType::PullRequest);
        assert_eq!(stored.base_owner.as_deref(), Some("acme"));
        assert_eq!(stored.base_branch.as_deref(), Some("main"));
        assert_eq!(stored.report_repo(), "widgets");
    }

    #[tokio::test]
    async fn test_claim_is_oldest_first() {
        let store = store().await;
        let mut first = push("aaa");
        let mut second = push("bbb");
        store.insert(&mut first).await.unwrap();
        store.insert(&mut second).await.unwrap();

        let claimed = store.claim_next_pending().await.unwrap().unwrap();
        assert_eq!(claimed.id, first.id);
        assert_eq!(claimed.status, BuildStatus::Running);

        let claimed = store.claim_next_pending().await.unwrap().unwrap();
        assert_eq!(claimed.id, second.id);

        assert!(store.claim_next_pending().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_claim_resets_log_only_for_requeued_builds() {
        let store = store().await;
        let mut fresh = push("aaa");
        store.insert(&mut fresh).await.unwrap();
        let claimed = store.claim_next_pending().await.unwrap().unwrap();
        assert!(claimed.log.is_empty());

        let mut retried = push("bbb");
        retried.append_log(b"old output\nfailed");
        retried.status = BuildStatus::Failed;
        store.insert(&mut retried).await.unwrap();
        store.requeue(retried.id.unwrap()).await.unwrap().unwrap();

        let claimed = store.claim_next_pending().await.unwrap().unwrap();
        assert_eq!(claimed.log, RETRY_MARKER.as_bytes());
    }

    #[tokio::test]
    async fn test_concurrent_claims_hand_out_one_row_once() {
        let store = Arc::new(store().await);
        store.insert(&mut push("abc123")).await.unwrap();

        let claims = (0..8).map(|_| {
            let store = store.clone();
            tokio::spawn(async move { store.claim_next_pending().await.unwrap() })
        });
        let results = futures::future::join_all(claims).await;

        let winners = results
            .into_iter()
            .map(|r| r.unwrap())
            .filter(Option::is_some)
            .count();
        assert_eq!(winners, 1);
        assert_eq!(store.count_by_status(BuildStatus::Running).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_append_log_keeps_status() {
        let store = store().await;
        let mut event = push("abc123");
        event.append_log(b"output");
        store.insert(&mut event).await.unwrap();
        let claimed = store.claim_next_pending().await.unwrap().unwrap();

        store
            .append_log(claimed.id.unwrap(), b"\nnote")
            .await
            .unwrap();

        let stored = store.lookup(&event.fingerprint).await.unwrap().unwrap();
        assert_eq!(stored.status, BuildStatus::Running);
        assert_eq!(stored.log_text(), "Retrying...\n\nnote");
    }

    #[tokio::test]
    async fn test_append_log_unknown_event() {
        let store = store().await;
        let result = store.append_log(EventId::new(42), b"x").await;
        assert!(matches!(result, Err(DbError::NotFound(_))));
    }

    #[tokio::test]
    async fn test_requeue_leaves_running_untouched() {
        let store = store().await;
        let mut event = push("abc123");
        store.insert(&mut event).await.unwrap();
        let running = store.claim_next_pending().await.unwrap().unwrap();

        let result = store.requeue(running.id.unwrap()).await.unwrap();
        assert!(result.is_none());

        let stored = store.lookup(&event.fingerprint).await.unwrap().unwrap();
        assert_eq!(stored.status, BuildStatus::Running);
    }

    #[tokio::test]
    async fn test_requeue_resets_terminal_to_pending() {
        let store = store().await;
        let mut event = push("abc123");
        event.status = BuildStatus::Failed;
        event.append_log(b"boom");
        store.insert(&mut event).await.unwrap();

        let requeued = store.requeue(event.id.unwrap()).await.unwrap().unwrap();
        assert_eq!(requeued.status, BuildStatus::Pending);
        assert_eq!(requeued.log, b"boom");
    }

    #[tokio::test]
    async fn test_claim_for_rerun() {
        let store = store().await;
        let mut event = push("abc123");
        event.status = BuildStatus::Failed;
        event.append_log(b"boom");
        store.insert(&mut event).await.unwrap();
        let id = event.id.unwrap();

        let claimed = store.claim_for_rerun(id).await.unwrap().unwrap();
        assert_eq!(claimed.status, BuildStatus::Running);
        assert_eq!(claimed.log, RETRY_MARKER.as_bytes());

        // Already running: refused without changes.
        assert!(store.claim_for_rerun(id).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_list_filters_by_prefix_most_recent_first() {
        let store = store().await;
        store.insert(&mut push("aaa")).await.unwrap();
        store.insert(&mut push("bbb")).await.unwrap();
        store
            .insert(&mut Event::push(Fingerprint::new(
                "github.com",
                "other",
                "tool",
                "main",
                "ccc",
            )))
            .await
            .unwrap();

        let all = store.list(&EventFilter::all()).await.unwrap();
        assert_eq!(all.len(), 3);
        assert_eq!(all[0].fingerprint.commit, "ccc");

        let acme = store
            .list(&EventFilter::from_segments(&["github.com", "acme"]))
            .await
            .unwrap();
        let commits: Vec<_> = acme.iter().map(|e| e.fingerprint.commit.as_str()).collect();
        assert_eq!(commits, vec!["bbb", "aaa"]);

        let exact = store
            .list(&EventFilter::from_segments(&[
                "github.com",
                "acme",
                "widgets",
                "main",
                "aaa",
            ]))
            .await
            .unwrap();
        assert_eq!(exact.len(), 1);
    }

    #[test]
    fn test_filter_prefix_stops_at_first_gap() {
        let filter = EventFilter {
            domain: Some("github.com".to_string()),
            owner: None,
            repo: Some("widgets".to_string()),
            ..Default::default()
        };
        assert_eq!(filter.prefix(), vec![("domain", "github.com")]);
    }

    #[tokio::test]
    async fn test_recover_interrupted_releases_running() {
        let store = store().await;
        store.insert(&mut push("aaa")).await.unwrap();
        store.insert(&mut push("bbb")).await.unwrap();
        store.claim_next_pending().await.unwrap().unwrap();

        assert_eq!(store.recover_interrupted().await.unwrap(), 1);
        assert_eq!(store.count_by_status(BuildStatus::Running).await.unwrap(), 0);
        assert_eq!(store.count_by_status(BuildStatus::Pending).await.unwrap(), 2);
    }
}
