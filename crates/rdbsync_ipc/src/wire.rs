//! Canonical CBOR item heads.
//!
//! A parcel is a flat sequence of CBOR items. Every item starts with a head
//! byte (major type in the top three bits, additional info in the low five)
//! followed by an optional big-endian argument. Writers always pick the
//! shortest argument width; readers reject anything else.

use bytes::{BufMut, BytesMut};

use crate::error::{ParcelError, ParcelResult};

pub(crate) const MAJOR_UNSIGNED: u8 = 0;
pub(crate) const MAJOR_NEGATIVE: u8 = 1;
pub(crate) const MAJOR_BYTES: u8 = 2;
pub(crate) const MAJOR_TEXT: u8 = 3;
pub(crate) const MAJOR_ARRAY: u8 = 4;
pub(crate) const MAJOR_TAG: u8 = 6;
pub(crate) const MAJOR_SIMPLE: u8 = 7;

pub(crate) const SIMPLE_FALSE: u8 = 20;
pub(crate) const SIMPLE_TRUE: u8 = 21;
pub(crate) const SIMPLE_NULL: u8 = 22;

/// Tag marking an index into the parcel's remote-object table.
pub(crate) const TAG_REMOTE_OBJECT: u64 = 39;

/// Tag marking an interface token.
pub(crate) const TAG_INTERFACE_TOKEN: u64 = 40;

/// Returns the encoded size of a head carrying `value`.
pub(crate) fn head_len(value: u64) -> usize {
    if value < 24 {
        1
    } else if u8::try_from(value).is_ok() {
        2
    } else if u16::try_from(value).is_ok() {
        3
    } else if u32::try_from(value).is_ok() {
        5
    } else {
        9
    }
}

/// Appends a head with the shortest argument encoding.
#[allow(clippy::cast_possible_truncation)]
pub(crate) fn put_head(buf: &mut BytesMut, major: u8, value: u64) {
    let mt = major << 5;
    if value < 24 {
        buf.put_u8(mt | value as u8);
    } else if u8::try_from(value).is_ok() {
        buf.put_u8(mt | 24);
        buf.put_u8(value as u8);
    } else if u16::try_from(value).is_ok() {
        buf.put_u8(mt | 25);
        buf.put_u16(value as u16);
    } else if u32::try_from(value).is_ok() {
        buf.put_u8(mt | 26);
        buf.put_u32(value as u32);
    } else {
        buf.put_u8(mt | 27);
        buf.put_u64(value);
    }
}

/// Appends a simple value (`false`, `true`, `null`).
pub(crate) fn put_simple(buf: &mut BytesMut, simple: u8) {
    buf.put_u8((MAJOR_SIMPLE << 5) | simple);
}

/// Returns the major type of the item at `pos` without consuming it.
pub(crate) fn peek_major(data: &[u8], pos: usize) -> ParcelResult<u8> {
    data.get(pos)
        .map(|byte| byte >> 5)
        .ok_or(ParcelError::UnexpectedEof)
}

/// Returns true if the item at `pos` is `null`.
pub(crate) fn peek_null(data: &[u8], pos: usize) -> bool {
    data.get(pos) == Some(&((MAJOR_SIMPLE << 5) | SIMPLE_NULL))
}

/// Reads a head, returning its major type and argument.
///
/// For major type 7 the argument is the simple value itself; only the
/// one-byte forms are accepted.
pub(crate) fn read_head(data: &[u8], pos: &mut usize) -> ParcelResult<(u8, u64)> {
    let initial = *data.get(*pos).ok_or(ParcelError::UnexpectedEof)?;
    *pos += 1;
    let major = initial >> 5;
    let info = initial & 0x1f;

    if major == MAJOR_SIMPLE {
        return match info {
            0..=23 => Ok((major, u64::from(info))),
            31 => Err(ParcelError::IndefiniteLength),
            _ => Err(ParcelError::invalid_value("floats and extended simple values are not accepted")),
        };
    }

    let value = match info {
        0..=23 => u64::from(info),
        24 => {
            let arg = u64::from(take(data, pos, 1)?[0]);
            if arg < 24 {
                return Err(ParcelError::NonCanonical);
            }
            arg
        }
        25 => {
            let b = take(data, pos, 2)?;
            let arg = u64::from(u16::from_be_bytes([b[0], b[1]]));
            if u8::try_from(arg).is_ok() {
                return Err(ParcelError::NonCanonical);
            }
            arg
        }
        26 => {
            let b = take(data, pos, 4)?;
            let arg = u64::from(u32::from_be_bytes([b[0], b[1], b[2], b[3]]));
            if u16::try_from(arg).is_ok() {
                return Err(ParcelError::NonCanonical);
            }
            arg
        }
        27 => {
            let b = take(data, pos, 8)?;
            let arg = u64::from_be_bytes([b[0], b[1], b[2], b[3], b[4], b[5], b[6], b[7]]);
            if u32::try_from(arg).is_ok() {
                return Err(ParcelError::NonCanonical);
            }
            arg
        }
        31 => return Err(ParcelError::IndefiniteLength),
        _ => return Err(ParcelError::invalid_value("reserved additional info")),
    };
    Ok((major, value))
}

/// Reads a head and checks its major type.
pub(crate) fn expect_head(
    data: &[u8],
    pos: &mut usize,
    major: u8,
    expected: &'static str,
) -> ParcelResult<u64> {
    let start = *pos;
    let (found, value) = read_head(data, pos)?;
    if found != major {
        *pos = start;
        return Err(ParcelError::TypeMismatch { expected, found });
    }
    Ok(value)
}

/// Consumes `len` bytes.
pub(crate) fn take<'a>(data: &'a [u8], pos: &mut usize, len: usize) -> ParcelResult<&'a [u8]> {
    let end = pos.checked_add(len).ok_or(ParcelError::UnexpectedEof)?;
    let bytes = data.get(*pos..end).ok_or(ParcelError::UnexpectedEof)?;
    *pos = end;
    Ok(bytes)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn encode(major: u8, value: u64) -> Vec<u8> {
        let mut buf = BytesMut::new();
        put_head(&mut buf, major, value);
        buf.to_vec()
    }

    #[test]
    fn shortest_encoding() {
        assert_eq!(encode(MAJOR_UNSIGNED, 0), vec![0x00]);
        assert_eq!(encode(MAJOR_UNSIGNED, 23), vec![0x17]);
        assert_eq!(encode(MAJOR_UNSIGNED, 24), vec![0x18, 24]);
        assert_eq!(encode(MAJOR_UNSIGNED, 256), vec![0x19, 0x01, 0x00]);
        assert_eq!(encode(MAJOR_TEXT, 5), vec![0x65]);
        assert_eq!(encode(MAJOR_UNSIGNED, 1 << 32).len(), 9);
        for value in [0, 23, 24, 255, 256, 65_535, 65_536, u64::from(u32::MAX), u64::MAX] {
            assert_eq!(encode(MAJOR_UNSIGNED, value).len(), head_len(value));
        }
    }

    #[test]
    fn head_roundtrip() {
        for value in [0, 1, 23, 24, 1000, 70_000, u64::MAX] {
            let bytes = encode(MAJOR_NEGATIVE, value);
            let mut pos = 0;
            assert_eq!(read_head(&bytes, &mut pos).unwrap(), (MAJOR_NEGATIVE, value));
            assert_eq!(pos, bytes.len());
        }
    }

    #[test]
    fn rejects_non_canonical() {
        let mut pos = 0;
        assert_eq!(read_head(&[0x18, 0x05], &mut pos), Err(ParcelError::NonCanonical));
        let mut pos = 0;
        assert_eq!(read_head(&[0x19, 0x00, 0x10], &mut pos), Err(ParcelError::NonCanonical));
    }

    #[test]
    fn rejects_indefinite_and_floats() {
        let mut pos = 0;
        assert_eq!(read_head(&[0x7f], &mut pos), Err(ParcelError::IndefiniteLength));
        let mut pos = 0;
        assert!(matches!(
            read_head(&[0xfb, 0, 0, 0, 0, 0, 0, 0, 0], &mut pos),
            Err(ParcelError::InvalidValue(_))
        ));
    }

    #[test]
    fn truncated_argument() {
        let mut pos = 0;
        assert_eq!(read_head(&[0x1a, 0x00], &mut pos), Err(ParcelError::UnexpectedEof));
    }

    #[test]
    fn expect_head_restores_position_on_mismatch() {
        let bytes = encode(MAJOR_TEXT, 3);
        let mut pos = 0;
        let err = expect_head(&bytes, &mut pos, MAJOR_UNSIGNED, "integer").unwrap_err();
        assert_eq!(
            err,
            ParcelError::TypeMismatch {
                expected: "integer",
                found: MAJOR_TEXT
            }
        );
        assert_eq!(pos, 0);
    }
}
