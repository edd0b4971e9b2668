use sqlx::Error as SqlxError;

/// How a storage error should surface to engine callers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum StorageFailure {
    /// The row lock could not be acquired within the configured wait.
    LockTimeout,
    /// The store aborted us to break a lock cycle or a stale snapshot. Retry with backoff.
    LockConflict,
    UniqueViolation,
    Other(String),
}

// SQLite extended result codes
const SQLITE_BUSY: &str = "5";
const SQLITE_LOCKED: &str = "6";
const SQLITE_BUSY_RECOVERY: &str = "261";
const SQLITE_LOCKED_SHAREDCACHE: &str = "262";
const SQLITE_BUSY_SNAPSHOT: &str = "517";
const SQLITE_BUSY_TIMEOUT: &str = "773";

pub(crate) fn classify(e: &SqlxError) -> StorageFailure {
    match e {
        SqlxError::PoolTimedOut => StorageFailure::LockTimeout,
        SqlxError::Database(db) => match db.code().as_deref() {
            Some(SQLITE_BUSY) | Some(SQLITE_BUSY_RECOVERY) | Some(SQLITE_BUSY_TIMEOUT) => StorageFailure::LockTimeout,
            Some(SQLITE_LOCKED) | Some(SQLITE_LOCKED_SHAREDCACHE) | Some(SQLITE_BUSY_SNAPSHOT) => {
                StorageFailure::LockConflict
            },
            _ if db.is_unique_violation() => StorageFailure::UniqueViolation,
            _ => StorageFailure::Other(e.to_string()),
        },
        _ => StorageFailure::Other(e.to_string()),
    }
}

/// Implements `From<sqlx::Error>` for an error enum with `LockTimeout`, `LockConflict` and `DatabaseError(String)`
/// variants.
macro_rules! storage_error_conversion {
    ($err:ty) => {
        impl From<sqlx::Error> for $err {
            fn from(e: sqlx::Error) -> Self {
                match $crate::traits::classify(&e) {
                    $crate::traits::StorageFailure::LockTimeout => Self::LockTimeout,
                    $crate::traits::StorageFailure::LockConflict => Self::LockConflict,
                    $crate::traits::StorageFailure::UniqueViolation | $crate::traits::StorageFailure::Other(_) => {
                        Self::DatabaseError(e.to_string())
                    },
                }
            }
        }
    };
}

pub(crate) use storage_error_conversion;
