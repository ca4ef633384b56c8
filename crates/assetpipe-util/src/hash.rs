/// Number of hex digits kept by [`content_hash`].
pub const CONTENT_HASH_LEN: usize = 20;

/// Compute the BLAKE3 hash of a byte slice, returning the hex-encoded digest.
#[must_use]
pub fn blake3_bytes(data: &[u8]) -> String {
    blake3::hash(data).to_hex().to_string()
}

/// Short content digest used in cache-busting file names.
///
/// The first [`CONTENT_HASH_LEN`] hex digits of the BLAKE3 digest.
#[must_use]
pub fn content_hash(data: &[u8]) -> String {
    let mut hex = blake3_bytes(data);
    hex.truncate(CONTENT_HASH_LEN);
    hex
}
