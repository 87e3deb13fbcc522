use infra_api::ServiceState;
use sea_orm::DbErr;

#[derive(Debug, thiserror::Error)]
pub enum DatabaseError {
    #[error("database is not available (state: {0})")]
    Unavailable(ServiceState),

    #[error("invalid database configuration: {0}")]
    InvalidConfig(String),

    #[error("failed to obtain connection: {0}")]
    Connection(#[source] DbErr),

    #[error("query failed: {0}")]
    Query(#[from] DbErr),

    #[error("column '{column}': {message}")]
    Column { column: String, message: String },
}
