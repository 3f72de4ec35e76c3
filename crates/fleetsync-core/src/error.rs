// Copyright (C) 2025 The fleetsync Authors
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Error types for fleetsync-core.
//!
//! Every failure a processor can observe is a [`SyncError`]. The processor loop
//! never inspects error variants directly; it branches on [`SyncError::class`],
//! which reduces the taxonomy to the four cases the engine knows how to handle.

use std::fmt;

use thiserror::Error;

/// Result type using [`SyncError`].
pub type Result<T> = std::result::Result<T, SyncError>;

/// The external resource a connectivity failure refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Resource {
    /// The upstream telematics API.
    Upstream,
    /// The adapter database.
    Database,
}

impl fmt::Display for Resource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Upstream => write!(f, "upstream API"),
            Self::Database => write!(f, "adapter database"),
        }
    }
}

/// How the processor loop reacts to an error.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ErrorClass {
    /// Absorbed by the retry policy around a database transaction.
    Transient,
    /// Moves the shared state to `Waiting` until the resource is reachable again.
    Connectivity(Resource),
    /// Referential-integrity failure; resolved through the dependency map.
    ConstraintViolation(String),
    /// Logged and escalated; terminates the process.
    Fatal,
}

/// Errors produced by the synchronization engine.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum SyncError {
    /// Short-lived storage fault (deadlock, lock timeout, busy database).
    #[error("transient storage fault: {message}")]
    Transient {
        /// Driver message.
        message: String,
    },

    /// The upstream API or the adapter database is unreachable.
    #[error("{resource} unavailable: {message}")]
    Connectivity {
        /// Which side of the sync lost connectivity.
        resource: Resource,
        /// Underlying failure description.
        message: String,
    },

    /// A foreign-key constraint rejected the merge.
    #[error("foreign key constraint '{constraint}' violated: {message}")]
    ConstraintViolation {
        /// Name of the violated constraint.
        constraint: String,
        /// Driver message.
        message: String,
    },

    /// The retry policy gave up on a transient fault.
    #[error("gave up after {attempts} attempts: {source}")]
    RetriesExhausted {
        /// Number of attempts made.
        attempts: u32,
        /// The last error observed.
        #[source]
        source: Box<SyncError>,
    },

    /// Invalid or unsupported configuration.
    #[error("configuration error: {0}")]
    Configuration(String),

    /// The tracking row for a processor is owned by another machine.
    #[error(
        "processor '{processor}' is registered to host '{recorded}' but this host is '{current}'"
    )]
    HostMismatch {
        /// Processor whose tracking row was checked.
        processor: String,
        /// Host name stored in the tracking row.
        recorded: String,
        /// Host name of this process.
        current: String,
    },

    /// An upstream entity could not be mapped to a row.
    #[error("cannot map {entity} entity: {message}")]
    Mapping {
        /// Entity type being mapped.
        entity: String,
        /// What went wrong.
        message: String,
    },

    /// The upstream API rejected a request for a reason other than connectivity.
    #[error("upstream API error: {0}")]
    Upstream(String),

    /// Unclassified database failure.
    #[error("database error: {0}")]
    Database(#[source] sqlx::Error),

    /// JSON encoding or decoding failed.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Schema migration failed.
    #[error("migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),
}

impl SyncError {
    /// Reduce this error to the class the processor loop branches on.
    pub fn class(&self) -> ErrorClass {
        match self {
            Self::Transient { .. } => ErrorClass::Transient,
            Self::Connectivity { resource, .. } => ErrorClass::Connectivity(*resource),
            Self::ConstraintViolation { constraint, .. } => {
                ErrorClass::ConstraintViolation(constraint.clone())
            }
            // Retries only run out when the database keeps failing; treat it
            // as an outage rather than crashing every processor.
            Self::RetriesExhausted { .. } => ErrorClass::Connectivity(Resource::Database),
            _ => ErrorClass::Fatal,
        }
    }

    /// Whether the retry policy should re-run the failed operation.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Transient { .. })
    }

    /// Connectivity error for the given resource.
    pub fn connectivity(resource: Resource, message: impl Into<String>) -> Self {
        Self::Connectivity {
            resource,
            message: message.into(),
        }
    }

    /// Mapping error for the given entity type.
    pub fn mapping(entity: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Mapping {
            entity: entity.into(),
            message: message.into(),
        }
    }

    /// Render the error with its full `source()` chain, one cause per segment.
    pub fn chain(&self) -> String {
        let mut out = self.to_string();
        let mut source = std::error::Error::source(self);
        while let Some(cause) = source {
            out.push_str(": caused by: ");
            out.push_str(&cause.to_string());
            source = cause.source();
        }
        out
    }
}

/// PostgreSQL SQLSTATE codes that indicate a transient concurrency fault.
const PG_TRANSIENT_CODES: &[&str] = &["40001", "40P01", "55P03", "53300"];

/// PostgreSQL SQLSTATE codes that indicate the server went away.
const PG_CONNECTIVITY_CODES: &[&str] = &["57P01", "57P02", "57P03"];

/// SQLite primary result codes for a busy or locked database.
const SQLITE_BUSY: i32 = 5;
const SQLITE_LOCKED: i32 = 6;

impl From<sqlx::Error> for SyncError {
    fn from(err: sqlx::Error) -> Self {
        match &err {
            sqlx::Error::Io(_)
            | sqlx::Error::Tls(_)
            | sqlx::Error::PoolTimedOut
            | sqlx::Error::PoolClosed
            | sqlx::Error::WorkerCrashed => {
                SyncError::connectivity(Resource::Database, err.to_string())
            }
            sqlx::Error::Database(db_err) => {
                if db_err.is_foreign_key_violation() {
                    return SyncError::ConstraintViolation {
                        constraint: db_err.constraint().unwrap_or_default().to_string(),
                        message: db_err.message().to_string(),
                    };
                }

                let code = db_err.code().map(|c| c.into_owned()).unwrap_or_default();

                if code.starts_with("08") || PG_CONNECTIVITY_CODES.contains(&code.as_str()) {
                    return SyncError::connectivity(Resource::Database, db_err.message());
                }

                if PG_TRANSIENT_CODES.contains(&code.as_str()) || is_sqlite_busy(&code) {
                    return SyncError::Transient {
                        message: db_err.message().to_string(),
                    };
                }

                SyncError::Database(err)
            }
            _ => SyncError::Database(err),
        }
    }
}

/// SQLite reports extended result codes; the low byte is the primary code.
fn is_sqlite_busy(code: &str) -> bool {
    code.parse::<i32>()
        .map(|c| matches!(c & 0xff, SQLITE_BUSY | SQLITE_LOCKED))
        .unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_classes() {
        let cases = vec![
            (
                SyncError::Transient {
                    message: "deadlock detected".to_string(),
                },
                ErrorClass::Transient,
            ),
            (
                SyncError::connectivity(Resource::Upstream, "connection refused"),
                ErrorClass::Connectivity(Resource::Upstream),
            ),
            (
                SyncError::ConstraintViolation {
                    constraint: "fk_status_data_devices".to_string(),
                    message: "insert or update violates foreign key".to_string(),
                },
                ErrorClass::ConstraintViolation("fk_status_data_devices".to_string()),
            ),
            (
                SyncError::RetriesExhausted {
                    attempts: 5,
                    source: Box::new(SyncError::Transient {
                        message: "database is locked".to_string(),
                    }),
                },
                ErrorClass::Connectivity(Resource::Database),
            ),
            (
                SyncError::Configuration("bad provider".to_string()),
                ErrorClass::Fatal,
            ),
            (SyncError::mapping("Device", "missing id"), ErrorClass::Fatal),
            (SyncError::Upstream("InvalidCastException".to_string()), ErrorClass::Fatal),
        ];

        for (error, expected) in cases {
            assert_eq!(error.class(), expected, "unexpected class for {:?}", error);
        }
    }

    #[test]
    fn test_only_transient_is_retried() {
        assert!(
            SyncError::Transient {
                message: "busy".to_string()
            }
            .is_transient()
        );
        assert!(!SyncError::connectivity(Resource::Database, "gone").is_transient());
        assert!(!SyncError::Configuration("x".to_string()).is_transient());
    }

    #[test]
    fn test_pool_errors_are_database_connectivity() {
        let err: SyncError = sqlx::Error::PoolTimedOut.into();
        assert_eq!(err.class(), ErrorClass::Connectivity(Resource::Database));

        let err: SyncError = sqlx::Error::PoolClosed.into();
        assert_eq!(err.class(), ErrorClass::Connectivity(Resource::Database));
    }

    #[test]
    fn test_row_not_found_is_fatal() {
        let err: SyncError = sqlx::Error::RowNotFound.into();
        assert_eq!(err.class(), ErrorClass::Fatal);
    }

    #[test]
    fn test_sqlite_busy_codes() {
        assert!(is_sqlite_busy("5"));
        assert!(is_sqlite_busy("517")); // SQLITE_BUSY_SNAPSHOT
        assert!(is_sqlite_busy("6"));
        assert!(!is_sqlite_busy("787")); // SQLITE_CONSTRAINT_FOREIGNKEY
        assert!(!is_sqlite_busy("40P01"));
    }

    #[test]
    fn test_chain_includes_sources() {
        let err = SyncError::RetriesExhausted {
            attempts: 3,
            source: Box::new(SyncError::Transient {
                message: "deadlock detected".to_string(),
            }),
        };
        let chain = err.chain();
        assert!(chain.starts_with("gave up after 3 attempts"));
        assert!(chain.contains("caused by: transient storage fault: deadlock detected"));
    }

    #[test]
    fn test_display() {
        let err = SyncError::HostMismatch {
            processor: "StatusData".to_string(),
            recorded: "host-a".to_string(),
            current: "host-b".to_string(),
        };
        assert_eq!(
            err.to_string(),
            "processor 'StatusData' is registered to host 'host-a' but this host is 'host-b'"
        );

        let err = SyncError::connectivity(Resource::Upstream, "timed out");
        assert_eq!(err.to_string(), "upstream API unavailable: timed out");
    }
}
