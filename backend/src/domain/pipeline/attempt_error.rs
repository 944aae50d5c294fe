//! Failure returned by the retry loop once it stops calling.

pub(super) struct AttemptFailure<E> {
    pub(super) error: E,
    /// Calls made, including the failing one.
    pub(super) attempts: u32,
}
