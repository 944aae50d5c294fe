//! Outbound adapters implementing domain ports for external infrastructure.
//!
//! - **persistence**: PostgreSQL-backed login record sink using Diesel
//! - **queue**: Amazon SQS-backed login event queue
//!
//! Adapters are thin translators between domain types and infrastructure
//! representations. They contain no pipeline logic.

pub mod persistence;
pub mod queue;
