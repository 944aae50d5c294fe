//! One-way masking of sensitive identifiers.
//!
//! IP addresses and device identifiers never reach the store in clear text.
//! They are replaced by the SHA-256 digest of their UTF-8 bytes, rendered as
//! lowercase hexadecimal. Equal inputs always yield equal digests, so masked
//! columns remain joinable without being reversible.

use std::fmt;

use sha2::{Digest, Sha256};

/// Lowercase hexadecimal SHA-256 digest of a sensitive value.
///
/// Only [`mask`] constructs a [`MaskedValue`].
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct MaskedValue(String);

impl MaskedValue {
    /// Number of hexadecimal characters in every digest.
    pub const LEN: usize = 64;

    /// Borrow the digest as a string slice.
    ///
    /// # Example
    ///
    /// ```
    /// # use login_pipeline::domain::mask;
    /// let masked = mask("10.0.0.1");
    /// assert_eq!(masked.as_str().len(), 64);
    /// ```
    pub fn as_str(&self) -> &str {
        self.0.as_str()
    }

    /// Consume the digest, returning the owned hex string.
    pub fn into_string(self) -> String {
        self.0
    }
}

impl fmt::Display for MaskedValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for MaskedValue {
    fn as_ref(&self) -> &str {
        self.as_str()
    }
}

/// Mask a sensitive value with SHA-256.
///
/// # Example
///
/// ```
/// # use login_pipeline::domain::mask;
/// assert_eq!(
///     mask("abc").as_str(),
///     "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
/// );
/// ```
pub fn mask(value: &str) -> MaskedValue {
    MaskedValue(hex::encode(Sha256::digest(value.as_bytes())))
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case("", "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855")]
    #[case("abc", "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad")]
    fn mask_matches_sha256_reference_vectors(#[case] input: &str, #[case] expected: &str) {
        assert_eq!(mask(input).as_str(), expected);
    }

    #[rstest]
    #[case("1.2.3.4")]
    #[case("2001:db8::1")]
    #[case("device-7f3a")]
    fn mask_is_deterministic(#[case] input: &str) {
        assert_eq!(mask(input), mask(input));
    }

    #[rstest]
    fn distinct_inputs_produce_distinct_digests() {
        assert_ne!(mask("1.2.3.4"), mask("1.2.3.5"));
        assert_ne!(mask("d1"), mask("D1"));
    }

    #[rstest]
    #[case("1.2.3.4")]
    #[case("a much longer device identifier that exceeds the digest width by far")]
    fn digest_has_fixed_hex_shape_and_hides_input(#[case] input: &str) {
        let masked = mask(input);

        assert_eq!(masked.as_str().len(), MaskedValue::LEN);
        assert!(
            masked
                .as_str()
                .chars()
                .all(|c| c.is_ascii_hexdigit() && !c.is_ascii_uppercase())
        );
        assert!(!masked.as_str().contains(input));
    }
}
