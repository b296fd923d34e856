//! Meter recorder: records utility meter broadcasts decoded by `rtlamr`
//! from an `rtl_tcp` radio into SQLite.

pub mod config;
pub mod database;
pub mod dedup;
pub mod errors;
pub mod ingest;
pub mod models;
pub mod parser;
pub mod recorder;
pub mod shutdown;
pub mod supervisor;
