// src/hash/digest.rs

use blake3::Hasher;

/// Number of hex characters kept from a digest.
///
/// Hashes are cache keys, not a security boundary.
pub const HASH_LENGTH: usize = 8;

/// Incremental blake3 hasher producing short hex strings.
///
/// Every field is terminated with a NUL byte so that `("ab", "c")` and
/// `("a", "bc")` hash differently.
#[derive(Debug, Clone, Default)]
pub struct ShortHasher {
    inner: Hasher,
}

impl ShortHasher {
    pub fn new() -> Self {
        Self {
            inner: Hasher::new(),
        }
    }

    pub fn field(&mut self, bytes: &[u8]) -> &mut Self {
        self.inner.update(bytes);
        self.inner.update(&[0]);
        self
    }

    pub fn str_field(&mut self, s: &str) -> &mut Self {
        self.field(s.as_bytes())
    }

    pub fn finish(&self) -> String {
        let mut hex = self.inner.finalize().to_hex().to_string();
        hex.truncate(HASH_LENGTH);
        hex
    }
}

/// Short hash over a list of string fields.
pub fn short_hash<I, S>(fields: I) -> String
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    let mut hasher = ShortHasher::new();
    for field in fields {
        hasher.str_field(field.as_ref());
    }
    hasher.finish()
}
