//! Marshalling protocol for key/value results.
//!
//! Every collection that crosses the host boundary is length-prefixed with
//! little-endian `u32` values:
//!
//! - pair list: `count`, then `key_len key value_len value` per pair
//! - byte list: `count`, then `len bytes` per item
//! - map results: `count` of functions, then one pair list per function
//!
//! Decoding always copies into newly allocated buffers, so a decoded value
//! never aliases the buffer it was read from.
//!
//! # Module Organization
//!
//! - [`error`]: Error types for decoding
//! - [`buffer`]: Low-level read/write helpers

mod buffer;
mod error;

pub use error::WireError;

pub(crate) use buffer::copy_bytes;
use buffer::{PREFIX_SIZE, read_bytes, read_len, write_bytes, write_len};

/// A single key/value pair emitted by a map function.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default)]
pub struct KeyValue {
    /// Emitted key bytes.
    pub key: Vec<u8>,
    /// Emitted value bytes.
    pub value: Vec<u8>,
}

impl KeyValue {
    /// Create a new pair.
    pub fn new(key: impl Into<Vec<u8>>, value: impl Into<Vec<u8>>) -> Self {
        Self {
            key: key.into(),
            value: value.into(),
        }
    }

    /// Copy this pair into caller-owned buffers.
    ///
    /// Uses fallible reservation so an allocation failure is reported
    /// instead of aborting the process.
    pub fn try_clone(&self) -> Result<Self, WireError> {
        Ok(Self {
            key: copy_bytes(&self.key)?,
            value: copy_bytes(&self.value)?,
        })
    }
}

impl<K: Into<Vec<u8>>, V: Into<Vec<u8>>> From<(K, V)> for KeyValue {
    fn from((key, value): (K, V)) -> Self {
        Self::new(key, value)
    }
}

/// Results of one map call: one pair list per map function, in function order.
pub type MapResults = Vec<Vec<KeyValue>>;

/// Encode an ordered pair list.
pub fn encode_pairs(pairs: &[KeyValue]) -> Result<Vec<u8>, WireError> {
    let mut out = Vec::with_capacity(pairs_size(pairs));
    write_pairs(&mut out, pairs)?;
    Ok(out)
}

/// Decode an ordered pair list. The whole buffer must be consumed.
pub fn decode_pairs(data: &[u8]) -> Result<Vec<KeyValue>, WireError> {
    let mut offset = 0;
    let pairs = read_pairs(data, &mut offset)?;
    finish(data, offset)?;
    Ok(pairs)
}

/// Encode an ordered list of byte strings (keys, values, reductions).
pub fn encode_byte_list<T: AsRef<[u8]>>(items: &[T]) -> Result<Vec<u8>, WireError> {
    let size = PREFIX_SIZE
        + items
            .iter()
            .map(|item| PREFIX_SIZE + item.as_ref().len())
            .sum::<usize>();
    let mut out = Vec::with_capacity(size);
    write_len(&mut out, items.len())?;
    for item in items {
        write_bytes(&mut out, item.as_ref())?;
    }
    Ok(out)
}

/// Decode an ordered list of byte strings. The whole buffer must be consumed.
pub fn decode_byte_list(data: &[u8]) -> Result<Vec<Vec<u8>>, WireError> {
    let mut offset = 0;
    let count = read_len(data, &mut offset)?;
    let mut items = Vec::new();
    for _ in 0..count {
        items.push(read_bytes(data, &mut offset)?);
    }
    finish(data, offset)?;
    Ok(items)
}

/// Encode the per-function results of a map call.
pub fn encode_map_results(results: &[Vec<KeyValue>]) -> Result<Vec<u8>, WireError> {
    let size = PREFIX_SIZE + results.iter().map(|p| pairs_size(p)).sum::<usize>();
    let mut out = Vec::with_capacity(size);
    write_len(&mut out, results.len())?;
    for pairs in results {
        write_pairs(&mut out, pairs)?;
    }
    Ok(out)
}

/// Decode the per-function results of a map call.
pub fn decode_map_results(data: &[u8]) -> Result<MapResults, WireError> {
    let mut offset = 0;
    let count = read_len(data, &mut offset)?;
    let mut results = Vec::new();
    for _ in 0..count {
        results.push(read_pairs(data, &mut offset)?);
    }
    finish(data, offset)?;
    Ok(results)
}

fn pairs_size(pairs: &[KeyValue]) -> usize {
    PREFIX_SIZE
        + pairs
            .iter()
            .map(|kv| 2 * PREFIX_SIZE + kv.key.len() + kv.value.len())
            .sum::<usize>()
}

fn write_pairs(out: &mut Vec<u8>, pairs: &[KeyValue]) -> Result<(), WireError> {
    write_len(out, pairs.len())?;
    for kv in pairs {
        write_bytes(out, &kv.key)?;
        write_bytes(out, &kv.value)?;
    }
    Ok(())
}

fn read_pairs(data: &[u8], offset: &mut usize) -> Result<Vec<KeyValue>, WireError> {
    let count = read_len(data, offset)?;
    // Counts come from untrusted input; grow as items are actually read.
    let mut pairs = Vec::new();
    for _ in 0..count {
        let key = read_bytes(data, offset)?;
        let value = read_bytes(data, offset)?;
        pairs.push(KeyValue { key, value });
    }
    Ok(pairs)
}

fn finish(data: &[u8], offset: usize) -> Result<(), WireError> {
    match data.len().checked_sub(offset) {
        Some(0) | None => Ok(()),
        Some(extra) => Err(WireError::TrailingBytes(extra)),
    }
}
