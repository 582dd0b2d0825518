//! Deterministic package fingerprints.
//!
//! A fingerprint is a SHA-256 digest over the canonical, separator-delimited
//! concatenation of a package's identifying inputs, rendered as lowercase
//! base32 without padding. The encoding is filesystem-safe and
//! case-insensitive-collision-free, which is why base32 (not hex or base64)
//! was chosen: state directory names land on case-insensitive filesystems
//! often enough in this codebase's deployments that hex's extra length
//! wasn't worth avoiding the risk.

use data_encoding::BASE32_NOPAD;
use sha2::{Digest, Sha256};

/// A validated, lowercase, unpadded base32 fingerprint string.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Fingerprint(String);

impl Fingerprint {
    /// Hash `inputs` in order, joined with `\x1f` (unit separator), and
    /// return the resulting fingerprint.
    ///
    /// The separator is a control byte that cannot appear in any of the
    /// plain-text inputs we hash (names, versions, URIs), so distinct input
    /// vectors never collide by virtue of concatenation ambiguity.
    pub fn compute<I, S>(inputs: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut hasher = Sha256::new();
        for (i, part) in inputs.into_iter().enumerate() {
            if i > 0 {
                hasher.update([0x1f]);
            }
            hasher.update(part.as_ref().as_bytes());
        }
        let digest = hasher.finalize();
        let encoded = BASE32_NOPAD.encode(&digest);
        Self(encoded.to_lowercase())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for Fingerprint {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn deterministic_across_calls() {
        let a = Fingerprint::compute(["containerd", "1.7", "file|/tmp/cd"]);
        let b = Fingerprint::compute(["containerd", "1.7", "file|/tmp/cd"]);
        assert_eq!(a, b);
    }

    #[test]
    fn distinct_inputs_differ() {
        let a = Fingerprint::compute(["containerd", "1.7"]);
        let b = Fingerprint::compute(["containerd", "1.8"]);
        assert_ne!(a, b);
    }

    #[test]
    fn concatenation_ambiguity_is_avoided_by_separator() {
        // "ab"+"c" and "a"+"bc" must not collide once the separator is in play.
        let a = Fingerprint::compute(["ab", "c"]);
        let b = Fingerprint::compute(["a", "bc"]);
        assert_ne!(a, b);
    }

    #[test]
    fn output_is_lowercase_and_unpadded() {
        let fp = Fingerprint::compute(["x"]);
        assert!(fp.as_str().chars().all(|c| c.is_ascii_lowercase() || c.is_ascii_digit()));
        assert!(!fp.as_str().contains('='));
    }
}
