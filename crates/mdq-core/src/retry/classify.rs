//! Classify store (sqlx/SQLite) errors into retry policy error kinds.

use super::policy::ErrorKind;

/// SQLite primary result codes that mean "try again later".
const SQLITE_BUSY: &str = "5";
const SQLITE_LOCKED: &str = "6";

/// Classify an error returned by the task store.
///
/// Store methods return `anyhow::Error`; the underlying `sqlx::Error` is looked
/// up in the chain. Errors that did not come from sqlx are not retried.
pub fn classify_store_error(err: &anyhow::Error) -> ErrorKind {
    let Some(sqlx_err) = err.chain().find_map(|e| e.downcast_ref::<sqlx::Error>()) else {
        return ErrorKind::Other;
    };
    match sqlx_err {
        sqlx::Error::PoolTimedOut => ErrorKind::PoolTimeout,
        sqlx::Error::Io(_) => ErrorKind::Io,
        sqlx::Error::Database(db) => {
            let code = db.code();
            let primary = code.as_deref().map(|c| {
                // Extended result codes carry the primary code in the low byte.
                c.parse::<i64>()
                    .map(|n| (n & 0xff).to_string())
                    .unwrap_or_else(|_| c.to_string())
            });
            match primary.as_deref() {
                Some(SQLITE_BUSY) | Some(SQLITE_LOCKED) => ErrorKind::Busy,
                _ => ErrorKind::Other,
            }
        }
        _ => ErrorKind::Other,
    }
}
