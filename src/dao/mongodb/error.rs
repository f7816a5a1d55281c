use mongodb::error::Error as MongoError;
use thiserror::Error;

/// Result alias returning [`MongoDaoError`] failures.
pub type MongoResult<T> = Result<T, MongoDaoError>;

/// Failures that can occur while talking to MongoDB.
#[derive(Debug, Error)]
pub enum MongoDaoError {
    /// Connection URI did not parse.
    #[error("failed to parse MongoDB connection URI `{uri}`")]
    InvalidUri {
        /// The offending URI.
        uri: String,
        /// Driver-level cause.
        #[source]
        source: MongoError,
    },
    /// Client could not be built from the parsed options.
    #[error("failed to build MongoDB client from options")]
    ClientConstruction {
        /// Driver-level cause.
        #[source]
        source: MongoError,
    },
    /// Initial ping kept failing during connection establishment.
    #[error("MongoDB ping failed during initial connection after {attempts} attempt(s)")]
    InitialPing {
        /// How many pings were attempted.
        attempts: u32,
        /// Driver-level cause.
        #[source]
        source: MongoError,
    },
    /// Health-check ping failed on an established connection.
    #[error("MongoDB ping health check failed")]
    HealthPing {
        /// Driver-level cause.
        #[source]
        source: MongoError,
    },
    /// A read against the shared store failed.
    #[error("failed to read key `{key}`")]
    Read {
        /// Store key involved.
        key: String,
        /// Driver-level cause.
        #[source]
        source: MongoError,
    },
    /// A write against the shared store failed.
    #[error("failed to write key `{key}`")]
    Write {
        /// Store key involved.
        key: String,
        /// Driver-level cause.
        #[source]
        source: MongoError,
    },
    /// A delete against the shared store failed.
    #[error("failed to delete key `{key}`")]
    Delete {
        /// Store key involved.
        key: String,
        /// Driver-level cause.
        #[source]
        source: MongoError,
    },
}
