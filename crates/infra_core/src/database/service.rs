use super::connector::{Connector, MySqlConnector};
use super::DatabaseError;
use futures::future::BoxFuture;
use infra_api::{AtomicServiceState, DatabaseConfig, ServiceState};
use sea_orm::{DatabaseConnection, DatabaseTransaction, TransactionTrait};
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Weak};
use std::time::{Duration, Instant};
use tokio::sync::{Mutex, RwLock};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

/// Timings and thresholds of the database service.
#[derive(Debug, Clone)]
pub struct DatabaseSettings {
    /// Delay before the first recovery check.
    pub recovery_initial_delay: Duration,
    /// Period of the recovery checks after the first one.
    pub recovery_interval: Duration,
    /// Opening a transaction slower than this is logged.
    pub connection_wait_warn: Duration,
    /// A transaction or query running longer than this is logged.
    pub transaction_warn: Duration,
    /// Consecutive failed units of work before the service turns degraded.
    pub failure_threshold: u32,
}

impl Default for DatabaseSettings {
    fn default() -> Self {
        Self {
            recovery_initial_delay: Duration::from_secs(2),
            recovery_interval: Duration::from_secs(5),
            connection_wait_warn: Duration::from_secs(1),
            transaction_warn: Duration::from_secs(2),
            failure_threshold: 3,
        }
    }
}

/// Pooled database access with health tracking and background recovery.
///
/// Work is handed in as closures that receive a connection (or an open
/// transaction) and return a boxed future:
///
/// ```rust,ignore
/// let level: i32 = db
///     .query(|conn| Box::pin(async move {
///         let row = DbSession::new(conn)
///             .query_one("SELECT level FROM profile WHERE id = ?", [7.into()])
///             .await?;
///         Ok(row.map(|r| r.i32("level")).transpose()?.unwrap_or(1))
///     }))
///     .await?;
/// ```
#[derive(Clone)]
pub struct DatabaseService {
    inner: Arc<Inner>,
}

struct Inner {
    connector: Box<dyn Connector>,
    settings: DatabaseSettings,
    state: AtomicServiceState,
    started: AtomicBool,
    terminated: AtomicBool,
    failures: AtomicU32,
    pool: RwLock<Option<Arc<DatabaseConnection>>>,
    recovery: Mutex<Option<JoinHandle<()>>>,
}

impl DatabaseService {
    /// MySQL-backed service with default settings.
    pub fn new(config: DatabaseConfig) -> Self {
        Self::with_connector(MySqlConnector::new(config), DatabaseSettings::default())
    }

    pub fn with_connector(connector: impl Connector + 'static, settings: DatabaseSettings) -> Self {
        Self {
            inner: Arc::new(Inner {
                connector: Box::new(connector),
                settings,
                state: AtomicServiceState::default(),
                started: AtomicBool::new(false),
                terminated: AtomicBool::new(false),
                failures: AtomicU32::new(0),
                pool: RwLock::new(None),
                recovery: Mutex::new(None),
            }),
        }
    }

    /// Opens the pool and starts the recovery loop.
    ///
    /// A failed first connection leaves the service `Degraded`; the recovery
    /// loop keeps trying in the background.
    pub async fn start(&self) {
        if self.inner.terminated.load(Ordering::Acquire) {
            warn!("Database service was stopped and cannot be restarted");
            return;
        }
        if self.inner.started.swap(true, Ordering::AcqRel) {
            return;
        }

        self.inner.state.store(ServiceState::Connecting);
        if self.inner.initialize().await {
            info!("🗄️ Database service running");
        } else {
            warn!("⚠️ Database unavailable at startup, recovery will keep retrying");
        }

        let handle = tokio::spawn(recovery_loop(Arc::downgrade(&self.inner)));
        *self.inner.recovery.lock().await = Some(handle);
    }

    /// Runs `work` inside a transaction.
    ///
    /// # Returns
    ///
    /// The work's result after commit. On error the transaction is rolled back
    /// and the error is returned unchanged.
    pub async fn transaction<F, T>(&self, work: F) -> Result<T, DatabaseError>
    where
        F: for<'c> FnOnce(&'c DatabaseTransaction) -> BoxFuture<'c, Result<T, DatabaseError>>
            + Send,
        T: Send,
    {
        let conn = self.inner.ensure_running().await?;

        let acquire_started = Instant::now();
        let txn = match conn.begin().await {
            Ok(txn) => txn,
            Err(e) => {
                self.inner.mark_failure(&e);
                return Err(DatabaseError::Connection(e));
            }
        };
        self.inner.warn_slow_acquire(acquire_started.elapsed());

        let work_started = Instant::now();
        let outcome = match work(&txn).await {
            Ok(value) => txn.commit().await.map(|_| value).map_err(DatabaseError::from),
            Err(e) => {
                if let Err(rollback) = txn.rollback().await {
                    error!("Transaction rollback failed: {}", rollback);
                }
                Err(e)
            }
        };

        self.inner.warn_slow_work("Transaction", work_started.elapsed());
        self.inner.record(&outcome);
        outcome
    }

    /// Runs `work` against the pool without a transaction.
    pub async fn query<F, T>(&self, work: F) -> Result<T, DatabaseError>
    where
        F: for<'c> FnOnce(&'c DatabaseConnection) -> BoxFuture<'c, Result<T, DatabaseError>>
            + Send,
        T: Send,
    {
        let conn = self.inner.ensure_running().await?;

        // The pool checks out a connection inside the first statement, so the
        // wait is part of the work time here.
        let work_started = Instant::now();
        let outcome = work(&*conn).await;
        self.inner.warn_slow_work("Query", work_started.elapsed());
        self.inner.record(&outcome);
        outcome
    }

    /// Stops recovery and closes the pool. The service cannot be started again.
    pub async fn stop(&self) {
        if self.inner.terminated.swap(true, Ordering::AcqRel) {
            return;
        }
        if let Some(handle) = self.inner.recovery.lock().await.take() {
            handle.abort();
        }
        if let Some(pool) = self.inner.pool.write().await.take() {
            close_pool(pool).await;
        }
        self.inner.started.store(false, Ordering::Release);
        self.inner.state.store(ServiceState::Stopped);
        info!("🛑 Database service stopped");
    }

    pub fn state(&self) -> ServiceState {
        self.inner.state.load()
    }

    pub fn is_started(&self) -> bool {
        self.inner.started.load(Ordering::Acquire)
    }

    /// Consecutive failed units of work since the last success.
    pub fn consecutive_failures(&self) -> u32 {
        self.inner.failures.load(Ordering::Relaxed)
    }
}

impl Inner {
    /// Connects a fresh pool and swaps it in. Returns whether the service is now running.
    async fn initialize(&self) -> bool {
        match self.connector.connect().await {
            Ok(conn) => {
                if self.terminated.load(Ordering::Acquire) {
                    close_pool(Arc::new(conn)).await;
                    return false;
                }
                let previous = self.pool.write().await.replace(Arc::new(conn));
                if let Some(previous) = previous {
                    close_pool(previous).await;
                }
                self.failures.store(0, Ordering::Relaxed);
                self.state.store(ServiceState::Running);
                true
            }
            Err(e) => {
                error!("❌ Database connection failed: {}", e);
                if !self.terminated.load(Ordering::Acquire) {
                    self.state.store(ServiceState::Degraded);
                }
                false
            }
        }
    }

    async fn ensure_running(&self) -> Result<Arc<DatabaseConnection>, DatabaseError> {
        let state = self.state.load();
        if state != ServiceState::Running {
            return Err(DatabaseError::Unavailable(state));
        }
        self.pool
            .read()
            .await
            .clone()
            .ok_or(DatabaseError::Unavailable(state))
    }

    fn warn_slow_acquire(&self, waited: Duration) {
        if waited > self.settings.connection_wait_warn {
            warn!("🐢 Waited {}ms for a database connection", waited.as_millis());
        }
    }

    fn warn_slow_work(&self, what: &str, elapsed: Duration) {
        if elapsed > self.settings.transaction_warn {
            warn!("🐢 {} took {}ms", what, elapsed.as_millis());
        }
    }

    fn record<T>(&self, outcome: &Result<T, DatabaseError>) {
        match outcome {
            Ok(_) => self.failures.store(0, Ordering::Relaxed),
            Err(e) => self.mark_failure(e),
        }
    }

    fn mark_failure(&self, err: &dyn std::fmt::Display) {
        let failures = self.failures.fetch_add(1, Ordering::Relaxed) + 1;
        debug!("Database work failed ({} in a row): {}", failures, err);
        if failures >= self.settings.failure_threshold
            && self
                .state
                .compare_exchange(ServiceState::Running, ServiceState::Degraded)
        {
            warn!(
                "⚠️ Database degraded after {} consecutive failures",
                failures
            );
        }
    }
}

/// Closes `pool` once no unit of work holds it any more.
async fn close_pool(pool: Arc<DatabaseConnection>) {
    match Arc::try_unwrap(pool) {
        Ok(pool) => {
            if let Err(e) = pool.close().await {
                warn!("Closing database pool failed: {}", e);
            }
        }
        Err(_) => debug!("Database pool still in use, it closes when released"),
    }
}

async fn recovery_loop(inner: Weak<Inner>) {
    let (initial, interval) = match inner.upgrade() {
        Some(inner) => (
            inner.settings.recovery_initial_delay,
            inner.settings.recovery_interval,
        ),
        None => return,
    };

    tokio::time::sleep(initial).await;
    loop {
        let Some(inner) = inner.upgrade() else {
            return;
        };
        if inner.terminated.load(Ordering::Acquire) {
            return;
        }
        if inner.state.load() != ServiceState::Running {
            info!("🔄 Attempting database recovery");
            if inner.initialize().await {
                info!("✅ Database recovered");
            }
        }
        drop(inner);
        tokio::time::sleep(interval).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::DbSession;
    use async_trait::async_trait;
    use sea_orm::{DatabaseBackend, DbErr, MockDatabase, MockExecResult, Value};
    use std::collections::BTreeMap;

    /// Fails the first `failures` connects, then hands out mock connections.
    struct MockConnector {
        failures: u32,
        attempts: Arc<AtomicU32>,
    }

    impl MockConnector {
        fn new(failures: u32) -> (Self, Arc<AtomicU32>) {
            let attempts = Arc::new(AtomicU32::new(0));
            (
                Self {
                    failures,
                    attempts: attempts.clone(),
                },
                attempts,
            )
        }
    }

    #[async_trait]
    impl Connector for MockConnector {
        async fn connect(&self) -> Result<DatabaseConnection, DbErr> {
            let attempt = self.attempts.fetch_add(1, Ordering::SeqCst);
            if attempt < self.failures {
                return Err(DbErr::Custom("connection refused".to_string()));
            }
            Ok(MockDatabase::new(DatabaseBackend::MySql)
                .append_exec_results([MockExecResult {
                    last_insert_id: 0,
                    rows_affected: 1,
                }])
                .append_query_results([vec![BTreeMap::from([(
                    "level",
                    Value::Int(Some(4)),
                )])]])
                .into_connection())
        }
    }

    fn fast_settings() -> DatabaseSettings {
        DatabaseSettings {
            recovery_initial_delay: Duration::from_millis(10),
            recovery_interval: Duration::from_millis(10),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_transaction_commits_work() {
        let (connector, _) = MockConnector::new(0);
        let db = DatabaseService::with_connector(connector, fast_settings());
        db.start().await;
        assert_eq!(db.state(), ServiceState::Running);

        let affected = db
            .transaction(|txn| {
                Box::pin(async move {
                    DbSession::new(txn)
                        .execute_update(
                            "UPDATE profile SET level = ? WHERE id = ?",
                            [Value::from(4), Value::from(7)],
                        )
                        .await
                })
            })
            .await
            .unwrap();
        assert_eq!(affected, 1);

        let level = db
            .query(|conn| {
                Box::pin(async move {
                    let row = DbSession::new(conn)
                        .query_one("SELECT level FROM profile WHERE id = ?", [Value::from(7)])
                        .await?;
                    row.map(|r| r.i32("level")).transpose()
                })
            })
            .await
            .unwrap();
        assert_eq!(level, Some(4));
        db.stop().await;
    }

    #[tokio::test]
    async fn test_unavailable_until_connected() {
        let db = DatabaseService::with_connector(MockConnector::new(u32::MAX).0, fast_settings());
        let before = db.query(|_| Box::pin(async { Ok(()) })).await;
        assert!(matches!(before, Err(DatabaseError::Unavailable(ServiceState::Stopped))));

        db.start().await;
        assert_eq!(db.state(), ServiceState::Degraded);
        let degraded = db.query(|_| Box::pin(async { Ok(()) })).await;
        assert!(matches!(degraded, Err(DatabaseError::Unavailable(ServiceState::Degraded))));
        db.stop().await;
    }

    #[tokio::test]
    async fn test_consecutive_failures_degrade() {
        let db = DatabaseService::with_connector(MockConnector::new(0).0, fast_settings());
        db.start().await;

        for _ in 0..2 {
            let result: Result<(), _> = db
                .query(|_| Box::pin(async { Err(DatabaseError::InvalidConfig("boom".into())) }))
                .await;
            assert!(result.is_err());
        }
        assert_eq!(db.state(), ServiceState::Running);
        assert_eq!(db.consecutive_failures(), 2);

        db.query(|_| Box::pin(async { Ok(()) })).await.unwrap();
        assert_eq!(db.consecutive_failures(), 0);

        for _ in 0..3 {
            let _ = db
                .query(|_| Box::pin(async { Err::<(), _>(DatabaseError::InvalidConfig("boom".into())) }))
                .await;
        }
        assert_eq!(db.state(), ServiceState::Degraded);
        db.stop().await;
    }

    #[tokio::test]
    async fn test_recovery_loop_reconnects() {
        let (connector, attempts) = MockConnector::new(2);
        let db = DatabaseService::with_connector(connector, fast_settings());
        db.start().await;
        assert_eq!(db.state(), ServiceState::Degraded);

        let deadline = Instant::now() + Duration::from_secs(2);
        while db.state() != ServiceState::Running && Instant::now() < deadline {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        assert_eq!(db.state(), ServiceState::Running);
        assert!(attempts.load(Ordering::SeqCst) >= 3);
        db.stop().await;
    }

    #[tokio::test]
    async fn test_stop_waits_out_work_holding_the_pool() {
        let db = DatabaseService::with_connector(MockConnector::new(0).0, fast_settings());
        db.start().await;

        let (release, released) = tokio::sync::oneshot::channel::<()>();
        let in_flight = tokio::spawn({
            let db = db.clone();
            async move {
                db.query(|_| {
                    Box::pin(async move {
                        let _ = released.await;
                        Ok(7)
                    })
                })
                .await
            }
        });
        tokio::time::sleep(Duration::from_millis(20)).await;

        db.stop().await;
        assert_eq!(db.state(), ServiceState::Stopped);
        release.send(()).unwrap();
        assert_eq!(in_flight.await.unwrap().unwrap(), 7);
    }

    #[tokio::test]
    async fn test_slow_query_still_counts_as_success() {
        let settings = DatabaseSettings {
            transaction_warn: Duration::from_millis(1),
            ..fast_settings()
        };
        let db = DatabaseService::with_connector(MockConnector::new(0).0, settings);
        db.start().await;

        let _ = db
            .query(|_| Box::pin(async { Err::<(), _>(DatabaseError::InvalidConfig("boom".into())) }))
            .await;
        assert_eq!(db.consecutive_failures(), 1);

        db.query(|_| {
            Box::pin(async {
                tokio::time::sleep(Duration::from_millis(20)).await;
                Ok(())
            })
        })
        .await
        .unwrap();
        assert_eq!(db.consecutive_failures(), 0);
        assert_eq!(db.state(), ServiceState::Running);
        db.stop().await;
    }

    #[tokio::test]
    async fn test_stop_is_terminal() {
        let (connector, attempts) = MockConnector::new(0);
        let db = DatabaseService::with_connector(connector, fast_settings());
        db.start().await;
        db.stop().await;
        assert_eq!(db.state(), ServiceState::Stopped);

        db.start().await;
        assert_eq!(db.state(), ServiceState::Stopped);
        assert!(!db.is_started());
        assert_eq!(attempts.load(Ordering::SeqCst), 1);
    }
}
