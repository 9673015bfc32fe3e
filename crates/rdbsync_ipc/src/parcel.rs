//! Ordered, typed message buffer.

use std::fmt;

use bytes::{BufMut, BytesMut};

use crate::error::{ParcelError, ParcelResult};
use crate::remote::RemoteObjectRef;
use crate::wire::{
    expect_head, head_len, peek_major, peek_null, put_head, put_simple, read_head, take,
    MAJOR_ARRAY, MAJOR_BYTES, MAJOR_NEGATIVE, MAJOR_SIMPLE, MAJOR_TAG, MAJOR_TEXT,
    MAJOR_UNSIGNED, SIMPLE_FALSE, SIMPLE_NULL, SIMPLE_TRUE, TAG_INTERFACE_TOKEN,
    TAG_REMOTE_OBJECT,
};

/// Maximum encoded size of a single parcel (1 MiB).
pub const MAX_PARCEL_SIZE: usize = 1024 * 1024;

/// An ordered, typed message buffer.
///
/// Values are read back in the order they were written. Remote-object
/// references travel in a side table; the byte stream only carries their
/// index.
#[derive(Clone, Default)]
pub struct Parcel {
    data: BytesMut,
    read_pos: usize,
    objects: Vec<RemoteObjectRef>,
}

impl Parcel {
    /// Creates an empty parcel.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates an empty parcel with the given byte capacity.
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            data: BytesMut::with_capacity(capacity.min(MAX_PARCEL_SIZE)),
            read_pos: 0,
            objects: Vec::new(),
        }
    }

    /// Wraps raw bytes received from elsewhere. The object table is empty.
    pub fn from_bytes(bytes: &[u8]) -> ParcelResult<Self> {
        if bytes.len() > MAX_PARCEL_SIZE {
            return Err(ParcelError::CapacityExceeded {
                size: bytes.len(),
                max: MAX_PARCEL_SIZE,
            });
        }
        Ok(Self {
            data: BytesMut::from(bytes),
            read_pos: 0,
            objects: Vec::new(),
        })
    }

    /// Returns the encoded bytes.
    pub fn as_bytes(&self) -> &[u8] {
        &self.data
    }

    /// Returns the encoded size in bytes.
    pub fn len(&self) -> usize {
        self.data.len()
    }

    /// Returns true if nothing was written.
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Returns the number of unread bytes.
    pub fn remaining(&self) -> usize {
        self.data.len().saturating_sub(self.read_pos)
    }

    /// Moves the read cursor back to the start.
    pub fn rewind(&mut self) {
        self.read_pos = 0;
    }

    /// Returns the number of remote objects attached to this parcel.
    pub fn object_count(&self) -> usize {
        self.objects.len()
    }

    fn reserve(&mut self, additional: usize) -> ParcelResult<()> {
        let size = self.data.len().saturating_add(additional);
        if size > MAX_PARCEL_SIZE {
            return Err(ParcelError::CapacityExceeded {
                size,
                max: MAX_PARCEL_SIZE,
            });
        }
        self.data.reserve(additional);
        Ok(())
    }

    fn write_payload(&mut self, major: u8, payload: &[u8]) -> ParcelResult<()> {
        let len = payload.len() as u64;
        self.reserve(head_len(len) + payload.len())?;
        put_head(&mut self.data, major, len);
        self.data.put_slice(payload);
        Ok(())
    }

    fn read_payload(&mut self, major: u8, expected: &'static str) -> ParcelResult<&[u8]> {
        let start = self.read_pos;
        let len = expect_head(&self.data, &mut self.read_pos, major, expected)?;
        if len > MAX_PARCEL_SIZE as u64 {
            self.read_pos = start;
            return Err(ParcelError::SizeLimitExceeded {
                claimed: len,
                max_allowed: MAX_PARCEL_SIZE as u64,
            });
        }
        #[allow(clippy::cast_possible_truncation)]
        match take(&self.data, &mut self.read_pos, len as usize) {
            Ok(bytes) => Ok(bytes),
            Err(err) => {
                self.read_pos = start;
                Err(err)
            }
        }
    }

    /// Writes a boolean.
    pub fn write_bool(&mut self, value: bool) -> ParcelResult<()> {
        self.reserve(1)?;
        put_simple(&mut self.data, if value { SIMPLE_TRUE } else { SIMPLE_FALSE });
        Ok(())
    }

    /// Writes a signed 64-bit integer.
    #[allow(clippy::cast_sign_loss)]
    pub fn write_i64(&mut self, value: i64) -> ParcelResult<()> {
        let (major, arg) = if value >= 0 {
            (MAJOR_UNSIGNED, value as u64)
        } else {
            // -1 encodes as 0, -2 as 1, and so on
            (MAJOR_NEGATIVE, (-(value + 1)) as u64)
        };
        self.reserve(head_len(arg))?;
        put_head(&mut self.data, major, arg);
        Ok(())
    }

    /// Writes a signed 32-bit integer.
    pub fn write_i32(&mut self, value: i32) -> ParcelResult<()> {
        self.write_i64(i64::from(value))
    }

    /// Writes an unsigned 32-bit integer.
    pub fn write_u32(&mut self, value: u32) -> ParcelResult<()> {
        self.write_i64(i64::from(value))
    }

    /// Writes a UTF-8 string.
    pub fn write_string(&mut self, value: &str) -> ParcelResult<()> {
        self.write_payload(MAJOR_TEXT, value.as_bytes())
    }

    /// Writes a vector of strings.
    pub fn write_string_vec<S: AsRef<str>>(&mut self, values: &[S]) -> ParcelResult<()> {
        let count = values.len() as u64;
        self.reserve(head_len(count))?;
        put_head(&mut self.data, MAJOR_ARRAY, count);
        for value in values {
            self.write_string(value.as_ref())?;
        }
        Ok(())
    }

    /// Writes a byte vector.
    pub fn write_bytes(&mut self, value: &[u8]) -> ParcelResult<()> {
        self.write_payload(MAJOR_BYTES, value)
    }

    /// Writes an interface token. Requests start with the descriptor of the
    /// interface they target.
    pub fn write_interface_token(&mut self, descriptor: &str) -> ParcelResult<()> {
        self.reserve(head_len(TAG_INTERFACE_TOKEN))?;
        put_head(&mut self.data, MAJOR_TAG, TAG_INTERFACE_TOKEN);
        self.write_string(descriptor)
    }

    /// Writes an optional remote-object reference.
    pub fn write_remote_object(&mut self, object: Option<&RemoteObjectRef>) -> ParcelResult<()> {
        match object {
            None => {
                self.reserve(1)?;
                put_simple(&mut self.data, SIMPLE_NULL);
            }
            Some(object) => {
                let index = self.objects.len() as u64;
                self.reserve(head_len(TAG_REMOTE_OBJECT) + head_len(index))?;
                put_head(&mut self.data, MAJOR_TAG, TAG_REMOTE_OBJECT);
                put_head(&mut self.data, MAJOR_UNSIGNED, index);
                self.objects.push(object.clone());
            }
        }
        Ok(())
    }

    /// Writes any [`Marshal`] value.
    pub fn write<T: Marshal + ?Sized>(&mut self, value: &T) -> ParcelResult<()> {
        value.marshal(self)
    }

    /// Reads a boolean.
    pub fn read_bool(&mut self) -> ParcelResult<bool> {
        let start = self.read_pos;
        let (major, value) = read_head(&self.data, &mut self.read_pos)?;
        match (major, value) {
            (MAJOR_SIMPLE, v) if v == u64::from(SIMPLE_TRUE) => Ok(true),
            (MAJOR_SIMPLE, v) if v == u64::from(SIMPLE_FALSE) => Ok(false),
            (found, _) => {
                self.read_pos = start;
                Err(ParcelError::TypeMismatch {
                    expected: "bool",
                    found,
                })
            }
        }
    }

    /// Reads a signed 64-bit integer.
    #[allow(clippy::cast_possible_wrap)]
    pub fn read_i64(&mut self) -> ParcelResult<i64> {
        let start = self.read_pos;
        let (major, arg) = read_head(&self.data, &mut self.read_pos)?;
        let result = match major {
            MAJOR_UNSIGNED => i64::try_from(arg).map_err(|_| ParcelError::OutOfRange {
                target: "i64",
                value: i64::MAX,
            }),
            MAJOR_NEGATIVE => i64::try_from(arg)
                .map(|n| -n - 1)
                .map_err(|_| ParcelError::OutOfRange {
                    target: "i64",
                    value: i64::MIN,
                }),
            found => Err(ParcelError::TypeMismatch {
                expected: "integer",
                found,
            }),
        };
        if result.is_err() {
            self.read_pos = start;
        }
        result
    }

    /// Reads a signed 32-bit integer.
    pub fn read_i32(&mut self) -> ParcelResult<i32> {
        let start = self.read_pos;
        let value = self.read_i64()?;
        i32::try_from(value).map_err(|_| {
            self.read_pos = start;
            ParcelError::OutOfRange {
                target: "i32",
                value,
            }
        })
    }

    /// Reads an unsigned 32-bit integer.
    pub fn read_u32(&mut self) -> ParcelResult<u32> {
        let start = self.read_pos;
        let value = self.read_i64()?;
        u32::try_from(value).map_err(|_| {
            self.read_pos = start;
            ParcelError::OutOfRange {
                target: "u32",
                value,
            }
        })
    }

    /// Reads a UTF-8 string.
    pub fn read_string(&mut self) -> ParcelResult<String> {
        let start = self.read_pos;
        let bytes = self.read_payload(MAJOR_TEXT, "text")?;
        let text = std::str::from_utf8(bytes).map(str::to_string);
        text.map_err(|_| {
            self.read_pos = start;
            ParcelError::InvalidUtf8
        })
    }

    /// Reads a vector of strings.
    pub fn read_string_vec(&mut self) -> ParcelResult<Vec<String>> {
        let count = expect_head(&self.data, &mut self.read_pos, MAJOR_ARRAY, "array")?;
        // every element takes at least one byte
        if count > self.remaining() as u64 {
            return Err(ParcelError::SizeLimitExceeded {
                claimed: count,
                max_allowed: self.remaining() as u64,
            });
        }
        #[allow(clippy::cast_possible_truncation)]
        let mut values = Vec::with_capacity(count as usize);
        for _ in 0..count {
            values.push(self.read_string()?);
        }
        Ok(values)
    }

    /// Reads a byte vector.
    pub fn read_bytes(&mut self) -> ParcelResult<Vec<u8>> {
        self.read_payload(MAJOR_BYTES, "bytes").map(<[u8]>::to_vec)
    }

    /// Reads an interface token.
    pub fn read_interface_token(&mut self) -> ParcelResult<String> {
        let start = self.read_pos;
        let tag = expect_head(&self.data, &mut self.read_pos, MAJOR_TAG, "interface token")?;
        if tag != TAG_INTERFACE_TOKEN {
            self.read_pos = start;
            return Err(ParcelError::invalid_value(format!("unexpected tag {tag}")));
        }
        self.read_string()
    }

    /// Reads the interface token and checks it against `descriptor`.
    pub fn enforce_interface(&mut self, descriptor: &str) -> ParcelResult<()> {
        let found = self.read_interface_token()?;
        if found != descriptor {
            return Err(ParcelError::InterfaceMismatch {
                expected: descriptor.to_string(),
                found,
            });
        }
        Ok(())
    }

    /// Reads an optional remote-object reference.
    pub fn read_remote_object(&mut self) -> ParcelResult<Option<RemoteObjectRef>> {
        if peek_null(&self.data, self.read_pos) {
            self.read_pos += 1;
            return Ok(None);
        }
        let start = self.read_pos;
        let tag = expect_head(&self.data, &mut self.read_pos, MAJOR_TAG, "remote object")?;
        if tag != TAG_REMOTE_OBJECT {
            self.read_pos = start;
            return Err(ParcelError::invalid_value(format!("unexpected tag {tag}")));
        }
        let index = expect_head(&self.data, &mut self.read_pos, MAJOR_UNSIGNED, "object index")?;
        usize::try_from(index)
            .ok()
            .and_then(|i| self.objects.get(i))
            .cloned()
            .map(Some)
            .ok_or(ParcelError::UnknownObject(index))
    }

    /// Reads any [`Unmarshal`] value.
    pub fn read<T: Unmarshal>(&mut self) -> ParcelResult<T> {
        T::unmarshal(self)
    }

    /// Returns the major type of the next item, if any.
    pub fn peek_item_type(&self) -> Option<u8> {
        peek_major(&self.data, self.read_pos).ok()
    }
}

impl fmt::Debug for Parcel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Parcel")
            .field("len", &self.data.len())
            .field("read_pos", &self.read_pos)
            .field("objects", &self.objects.len())
            .finish()
    }
}

/// Types that can be written into a [`Parcel`].
pub trait Marshal {
    /// Appends `self` to the parcel.
    fn marshal(&self, parcel: &mut Parcel) -> ParcelResult<()>;
}

/// Types that can be read from a [`Parcel`].
pub trait Unmarshal: Sized {
    /// Reads a value from the parcel's read cursor.
    fn unmarshal(parcel: &mut Parcel) -> ParcelResult<Self>;
}

macro_rules! impl_primitive {
    ($ty:ty, $write:ident, $read:ident) => {
        impl Marshal for $ty {
            fn marshal(&self, parcel: &mut Parcel) -> ParcelResult<()> {
                parcel.$write(*self)
            }
        }

        impl Unmarshal for $ty {
            fn unmarshal(parcel: &mut Parcel) -> ParcelResult<Self> {
                parcel.$read()
            }
        }
    };
}

impl_primitive!(bool, write_bool, read_bool);
impl_primitive!(i32, write_i32, read_i32);
impl_primitive!(u32, write_u32, read_u32);
impl_primitive!(i64, write_i64, read_i64);

impl Marshal for str {
    fn marshal(&self, parcel: &mut Parcel) -> ParcelResult<()> {
        parcel.write_string(self)
    }
}

impl Marshal for String {
    fn marshal(&self, parcel: &mut Parcel) -> ParcelResult<()> {
        parcel.write_string(self)
    }
}

impl Unmarshal for String {
    fn unmarshal(parcel: &mut Parcel) -> ParcelResult<Self> {
        parcel.read_string()
    }
}

impl Marshal for Vec<String> {
    fn marshal(&self, parcel: &mut Parcel) -> ParcelResult<()> {
        parcel.write_string_vec(self.as_slice())
    }
}

impl Unmarshal for Vec<String> {
    fn unmarshal(parcel: &mut Parcel) -> ParcelResult<Self> {
        parcel.read_string_vec()
    }
}

impl Marshal for Vec<u8> {
    fn marshal(&self, parcel: &mut Parcel) -> ParcelResult<()> {
        parcel.write_bytes(self)
    }
}

impl Unmarshal for Vec<u8> {
    fn unmarshal(parcel: &mut Parcel) -> ParcelResult<Self> {
        parcel.read_bytes()
    }
}

impl<T: Marshal + ?Sized> Marshal for &T {
    fn marshal(&self, parcel: &mut Parcel) -> ParcelResult<()> {
        (**self).marshal(parcel)
    }
}

macro_rules! impl_tuple {
    ($($name:ident),+) => {
        impl<$($name: Marshal),+> Marshal for ($($name,)+) {
            #[allow(non_snake_case)]
            fn marshal(&self, parcel: &mut Parcel) -> ParcelResult<()> {
                let ($($name,)+) = self;
                $($name.marshal(parcel)?;)+
                Ok(())
            }
        }

        impl<$($name: Unmarshal),+> Unmarshal for ($($name,)+) {
            fn unmarshal(parcel: &mut Parcel) -> ParcelResult<Self> {
                Ok(($($name::unmarshal(parcel)?,)+))
            }
        }
    };
}

impl_tuple!(A);
impl_tuple!(A, B);
impl_tuple!(A, B, C);
impl_tuple!(A, B, C, D);
impl_tuple!(A, B, C, D, E);
impl_tuple!(A, B, C, D, E, F);
