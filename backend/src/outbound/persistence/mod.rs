//! PostgreSQL persistence adapters using Diesel.
//!
//! Implements the [`LoginRecordSink`](crate::domain::ports::LoginRecordSink)
//! port on PostgreSQL through `diesel-async` with `bb8` pooling. The adapter
//! only translates records to bound SQL parameters and database failures to
//! domain [`PersistenceError`](crate::domain::ports::PersistenceError) kinds.
//!
//! # Example
//!
//! ```ignore
//! use login_pipeline::outbound::persistence::{DbPool, DieselLoginRecordSink, PoolConfig};
//!
//! let pool = DbPool::new(PoolConfig::new("postgres://localhost/logins")).await?;
//! let sink = DieselLoginRecordSink::new(pool);
//! ```

mod diesel_login_record_sink;
mod pool;

pub use diesel_login_record_sink::DieselLoginRecordSink;
pub use pool::{DbPool, PoolConfig, PoolError};
