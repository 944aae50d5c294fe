//! Domain primitives, ports and the pipeline driver.
//!
//! Purpose: turn queue-delivered login events into masked, schema-conformant
//! rows without knowing which queue or store sits behind the ports.
//!
//! Public surface:
//! - [`mask`] / [`MaskedValue`]: one-way SHA-256 masking of identifiers.
//! - [`transform`] / [`LoginRecord`] / [`MalformedPayload`]: payload
//!   validation and reshaping.
//! - [`LoginPipeline`]: the poll, transform, persist, acknowledge loop.
//! - [`ports`]: queue and sink contracts implemented by outbound adapters.

pub mod login_event;
pub mod masking;
pub mod pipeline;
pub mod ports;

pub use self::login_event::{LoginRecord, MalformedPayload, transform};
pub use self::masking::{MaskedValue, mask};
pub use self::pipeline::{
    BackoffJitter, LoginPipeline, LoginPipelinePorts, LoginPipelineRuntime, MAX_BATCH_SIZE,
    MAX_VISIBILITY_TIMEOUT, MAX_WAIT_TIME, MessageCounts, PipelineConfig, PipelineError, RandomJitter, RetryPolicy,
    RetrySleeper, RunSummary, RunTermination, TokioSleeper,
};
