//! Conversion between host text and native byte strings.
//!
//! Host strings are always valid Unicode; native strings are arbitrary bytes.
//! Going host to native cannot fail. Going native to host fails on the first
//! invalid UTF-8 sequence instead of substituting replacement characters.

use crate::error::{BridgeError, Result};

/// Host text to native bytes.
pub fn decode(host: &str) -> Vec<u8> {
    host.as_bytes().to_vec()
}

/// Native bytes to host text.
pub fn encode(native: &[u8]) -> Result<String> {
    std::str::from_utf8(native)
        .map(str::to_owned)
        .map_err(|e| BridgeError::Encoding {
            offset: e.valid_up_to(),
        })
}

/// Encode every element of a string tensor. Fails as a unit: no partial
/// list is returned.
pub fn encode_all<'a, I>(elements: I) -> Result<Vec<String>>
where
    I: IntoIterator<Item = &'a Vec<u8>>,
{
    elements.into_iter().map(|e| encode(e)).collect()
}

/// Decode a list of host strings into native byte strings.
pub fn decode_all<S: AsRef<str>>(strings: &[S]) -> Vec<Vec<u8>> {
    strings.iter().map(|s| decode(s.as_ref())).collect()
}
