//! Login event pipeline: poll queued login events, mask and reshape them,
//! store them in PostgreSQL and acknowledge them.

pub mod config;
pub mod domain;
pub mod outbound;
#[cfg(any(test, feature = "test-support"))]
pub mod test_support;
