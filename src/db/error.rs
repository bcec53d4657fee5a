use std::fmt;

/// Result type for store operations
pub type Result<T> = std::result::Result<T, DbError>;

/// Error types for store operations
#[derive(Debug)]
pub enum DbError {
    /// Unique constraint violated (duplicate email, duplicate token hash)
    UniqueViolation(String),

    /// Row that an update or delete targeted does not exist
    NotFound(String),

    /// Validation error - invalid input data
    Validation(String),

    /// Connection error - database unreachable or authentication failure
    Connection(String),

    /// Database error - SQL errors, constraint violations
    Database(String),

    /// Pool error - connection pool issues
    Pool(String),

    /// Migration failed to apply
    Migration { version: String, message: String },
}

impl fmt::Display for DbError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DbError::UniqueViolation(msg) => write!(f, "Unique violation: {}", msg),
            DbError::NotFound(msg) => write!(f, "Not found: {}", msg),
            DbError::Validation(msg) => write!(f, "Validation error: {}", msg),
            DbError::Connection(msg) => write!(f, "Connection error: {}", msg),
            DbError::Database(msg) => write!(f, "Database error: {}", msg),
            DbError::Pool(msg) => write!(f, "Pool error: {}", msg),
            DbError::Migration { version, message } => {
                write!(f, "Migration {} failed: {}", version, message)
            }
        }
    }
}

impl std::error::Error for DbError {}

/// Convert tokio-postgres errors, surfacing unique violations separately
impl From<tokio_postgres::Error> for DbError {
    fn from(err: tokio_postgres::Error) -> Self {
        if let Some(db_error) = err.as_db_error() {
            if *db_error.code() == tokio_postgres::error::SqlState::UNIQUE_VIOLATION {
                let constraint = db_error.constraint().unwrap_or("unknown").to_string();
                return DbError::UniqueViolation(constraint);
            }

            return DbError::Database(format!("{}: {}", db_error.code().code(), db_error.message()));
        }

        DbError::Database(format!("{:?}", err))
    }
}

impl From<deadpool_postgres::PoolError> for DbError {
    fn from(err: deadpool_postgres::PoolError) -> Self {
        DbError::Pool(err.to_string())
    }
}

impl From<deadpool_postgres::BuildError> for DbError {
    fn from(err: deadpool_postgres::BuildError) -> Self {
        DbError::Connection(err.to_string())
    }
}

impl From<serde_json::Error> for DbError {
    fn from(err: serde_json::Error) -> Self {
        DbError::Validation(format!("JSON error: {}", err))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display_messages() {
        assert_eq!(
            DbError::UniqueViolation("users_email_key".to_string()).to_string(),
            "Unique violation: users_email_key"
        );
        assert_eq!(
            DbError::NotFound("conversation".to_string()).to_string(),
            "Not found: conversation"
        );
        let err = DbError::Migration {
            version: "0001_init".to_string(),
            message: "syntax error".to_string(),
        };
        assert!(err.to_string().contains("0001_init"));
    }

    #[test]
    fn test_from_serde_error() {
        let json_err = serde_json::from_str::<serde_json::Value>("{").unwrap_err();
        let err: DbError = json_err.into();
        assert!(matches!(err, DbError::Validation(_)));
    }
}
