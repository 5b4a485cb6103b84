//! scrambledb common - shared errors, configuration, identifiers, and the
//! database connection abstraction

pub mod config;
pub mod connection;
pub mod error;
pub mod types;

pub use config::{
    ScrambleDbConfig, ScrambleOptions, BLOCK_COLUMN_NAME, SCRAMBLE_BLOCK_SIZE,
    SCRAMBLE_TABLE_SUFFIX, TIER_COLUMN_NAME,
};
pub use connection::{ConnectionPool, DbConnection, QueryResult, ScriptedConnection, Value};
pub use error::{Result, ScrambleDbError};
pub use types::IdCreator;
