//! Buffer read/write helpers for the wire format.

use super::WireError;

/// Size of every length and count prefix.
pub const PREFIX_SIZE: usize = 4;

/// Read a little-endian u32 prefix, advancing `offset`.
#[inline]
pub fn read_u32(buffer: &[u8], offset: &mut usize) -> Result<u32, WireError> {
    let bytes = read_slice(buffer, *offset, PREFIX_SIZE)?;
    let mut raw = [0u8; PREFIX_SIZE];
    raw.copy_from_slice(bytes);
    *offset += PREFIX_SIZE;
    Ok(u32::from_le_bytes(raw))
}

/// Read a length prefix as a `usize`, advancing `offset`.
#[inline]
pub fn read_len(buffer: &[u8], offset: &mut usize) -> Result<usize, WireError> {
    let len = read_u32(buffer, offset)?;
    usize::try_from(len).map_err(|_| WireError::LengthOverflow(u64::from(len)))
}

/// Safe buffer slice read helper - returns error instead of panicking.
#[inline]
pub fn read_slice(buffer: &[u8], start: usize, len: usize) -> Result<&[u8], WireError> {
    let end = start.checked_add(len).ok_or(WireError::Truncated {
        needed: usize::MAX,
        available: buffer.len(),
    })?;
    buffer.get(start..end).ok_or(WireError::Truncated {
        needed: end,
        available: buffer.len(),
    })
}

/// Read a length-prefixed byte string into a freshly allocated buffer.
pub fn read_bytes(buffer: &[u8], offset: &mut usize) -> Result<Vec<u8>, WireError> {
    let len = read_len(buffer, offset)?;
    let bytes = read_slice(buffer, *offset, len)?;
    *offset += len;
    copy_bytes(bytes)
}

/// Copy `bytes` into a new buffer, reporting allocation failure as an error.
pub fn copy_bytes(bytes: &[u8]) -> Result<Vec<u8>, WireError> {
    let mut out = Vec::new();
    out.try_reserve_exact(bytes.len())
        .map_err(|_| WireError::Allocation(bytes.len()))?;
    out.extend_from_slice(bytes);
    Ok(out)
}

/// Append a little-endian u32 prefix for `len`.
#[inline]
pub fn write_len(out: &mut Vec<u8>, len: usize) -> Result<(), WireError> {
    let len = u32::try_from(len).map_err(|_| WireError::LengthOverflow(len as u64))?;
    out.extend_from_slice(&len.to_le_bytes());
    Ok(())
}

/// Append a length-prefixed byte string.
#[inline]
pub fn write_bytes(out: &mut Vec<u8>, bytes: &[u8]) -> Result<(), WireError> {
    write_len(out, bytes.len())?;
    out.extend_from_slice(bytes);
    Ok(())
}
