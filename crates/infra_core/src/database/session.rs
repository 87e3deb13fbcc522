//! Parameterised SQL over a connection or transaction.

use super::DatabaseError;
use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use sea_orm::{ConnectionTrait, DbErr, QueryResult, Statement, TryGetable, Value};

/// Runs SQL with positional `?` parameters against any connection or transaction.
///
/// ```rust,ignore
/// service.transaction(|txn| Box::pin(async move {
///     let session = DbSession::new(txn);
///     session.execute_update("UPDATE profile SET level = ? WHERE id = ?", [4.into(), 7.into()]).await
/// })).await?;
/// ```
pub struct DbSession<'a, C: ConnectionTrait> {
    conn: &'a C,
}

impl<'a, C: ConnectionTrait> DbSession<'a, C> {
    pub fn new(conn: &'a C) -> Self {
        Self { conn }
    }

    fn statement<I>(&self, sql: &str, params: I) -> Statement
    where
        I: IntoIterator<Item = Value>,
    {
        Statement::from_sql_and_values(self.conn.get_database_backend(), sql, params)
    }

    /// Executes an INSERT, UPDATE or DELETE and returns the affected row count.
    pub async fn execute_update<I>(&self, sql: &str, params: I) -> Result<u64, DatabaseError>
    where
        I: IntoIterator<Item = Value>,
    {
        let result = self.conn.execute(self.statement(sql, params)).await?;
        Ok(result.rows_affected())
    }

    pub async fn query<I>(&self, sql: &str, params: I) -> Result<Vec<Row>, DatabaseError>
    where
        I: IntoIterator<Item = Value>,
    {
        let rows = self.conn.query_all(self.statement(sql, params)).await?;
        Ok(rows.into_iter().map(Row::new).collect())
    }

    /// First row of the result, if any.
    pub async fn query_one<I>(&self, sql: &str, params: I) -> Result<Option<Row>, DatabaseError>
    where
        I: IntoIterator<Item = Value>,
    {
        let row = self.conn.query_one(self.statement(sql, params)).await?;
        Ok(row.map(Row::new))
    }

    /// Maps every row through `mapper`, stopping at the first mapping error.
    pub async fn query_map<I, T, F>(
        &self,
        sql: &str,
        params: I,
        mut mapper: F,
    ) -> Result<Vec<T>, DatabaseError>
    where
        I: IntoIterator<Item = Value>,
        F: FnMut(&Row) -> Result<T, DatabaseError>,
    {
        self.query(sql, params)
            .await?
            .iter()
            .map(|row| mapper(row))
            .collect()
    }
}

/// One result row with typed column access by label.
pub struct Row {
    inner: QueryResult,
}

impl Row {
    pub fn new(inner: QueryResult) -> Self {
        Self { inner }
    }

    pub fn get<T: TryGetable>(&self, column: &str) -> Result<T, DatabaseError> {
        self.inner
            .try_get::<T>("", column)
            .map_err(|e| column_error(column, e))
    }

    /// `None` when the column is SQL NULL.
    pub fn get_opt<T: TryGetable>(&self, column: &str) -> Result<Option<T>, DatabaseError> {
        self.inner
            .try_get::<Option<T>>("", column)
            .map_err(|e| column_error(column, e))
    }

    pub fn string(&self, column: &str) -> Result<String, DatabaseError> {
        self.get(column)
    }

    pub fn i32(&self, column: &str) -> Result<i32, DatabaseError> {
        self.get(column)
    }

    pub fn i64(&self, column: &str) -> Result<i64, DatabaseError> {
        self.get(column)
    }

    pub fn f64(&self, column: &str) -> Result<f64, DatabaseError> {
        self.get(column)
    }

    pub fn bool(&self, column: &str) -> Result<bool, DatabaseError> {
        self.get(column)
    }

    pub fn bytes(&self, column: &str) -> Result<Vec<u8>, DatabaseError> {
        self.get(column)
    }

    pub fn date(&self, column: &str) -> Result<NaiveDate, DatabaseError> {
        self.get(column)
    }

    pub fn datetime(&self, column: &str) -> Result<NaiveDateTime, DatabaseError> {
        self.get(column)
    }

    pub fn instant(&self, column: &str) -> Result<DateTime<Utc>, DatabaseError> {
        self.get(column)
    }
}

fn column_error(column: &str, err: impl Into<DbErr>) -> DatabaseError {
    DatabaseError::Column {
        column: column.to_string(),
        message: err.into().to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sea_orm::{DatabaseBackend, MockDatabase, MockExecResult};
    use std::collections::BTreeMap;

    fn profile_row(id: i32, name: &str, nickname: Option<&str>) -> BTreeMap<&'static str, Value> {
        BTreeMap::from([
            ("id", Value::Int(Some(id))),
            ("name", Value::String(Some(Box::new(name.to_string())))),
            (
                "nickname",
                Value::String(nickname.map(|n| Box::new(n.to_string()))),
            ),
        ])
    }

    #[tokio::test]
    async fn test_query_and_typed_access() {
        let db = MockDatabase::new(DatabaseBackend::MySql)
            .append_query_results([vec![
                profile_row(1, "alice", Some("al")),
                profile_row(2, "bob", None),
            ]])
            .into_connection();
        let session = DbSession::new(&db);

        let rows = session
            .query("SELECT id, name, nickname FROM profile WHERE level > ?", [Value::from(3)])
            .await
            .unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].i32("id").unwrap(), 1);
        assert_eq!(rows[0].string("name").unwrap(), "alice");
        assert_eq!(rows[0].get_opt::<String>("nickname").unwrap().as_deref(), Some("al"));
        assert_eq!(rows[1].get_opt::<String>("nickname").unwrap(), None);
        assert!(rows[0].i32("missing").is_err());
    }

    #[tokio::test]
    async fn test_query_map_and_query_one() {
        let db = MockDatabase::new(DatabaseBackend::MySql)
            .append_query_results([vec![profile_row(1, "alice", None), profile_row(2, "bob", None)]])
            .append_query_results([Vec::<BTreeMap<&str, Value>>::new()])
            .into_connection();
        let session = DbSession::new(&db);

        let names = session
            .query_map("SELECT id, name, nickname FROM profile", Vec::<Value>::new(), |row| row.string("name"))
            .await
            .unwrap();
        assert_eq!(names, vec!["alice", "bob"]);

        let none = session
            .query_one("SELECT id FROM profile WHERE id = ?", [Value::from(99)])
            .await
            .unwrap();
        assert!(none.is_none());
    }

    #[tokio::test]
    async fn test_execute_update_reports_rows() {
        let db = MockDatabase::new(DatabaseBackend::MySql)
            .append_exec_results([MockExecResult {
                last_insert_id: 0,
                rows_affected: 3,
            }])
            .into_connection();

        let affected = DbSession::new(&db)
            .execute_update("DELETE FROM party WHERE expires_at < ?", [Value::BigInt(Some(0))])
            .await
            .unwrap();
        assert_eq!(affected, 3);
    }
}
