//! XDR (External Data Representation, RFC 4506) encoding used by every
//! ONC RPC message and by the procedure-specific payloads that follow the
//! call and reply headers.
//!
//! <https://datatracker.ietf.org/doc/html/rfc4506>
//!
//! XDR types map onto Rust types as follows:
//!
//! | XDR                | Rust                   |
//! |--------------------|------------------------|
//! | `int`, `enum`      | `i32`, [`SerializeEnum`] types |
//! | `unsigned int`     | `u32`                  |
//! | `hyper`            | `i64`                  |
//! | `unsigned hyper`   | `u64`                  |
//! | `bool`             | `bool`                 |
//! | `opaque<>`         | `[u8]` / `Vec<u8>`     |
//! | `opaque[n]`        | `[u8; N]`              |
//! | `string<>`         | `str` / `String`       |
//! | `T<>`              | `[T]` / `Vec<T>`       |
//! | `T *`              | `Option<T>`            |
//!
//! Every item occupies a multiple of four bytes; variable-length items are
//! prefixed with their length as an `unsigned int` and zero-padded.

use std::io::{Read, Write};

use byteorder::BigEndian;
use byteorder::{ReadBytesExt, WriteBytesExt};
use num_traits::{FromPrimitive, ToPrimitive};

pub mod rpc;
mod utils;

/// XDR assumes big endian encoding.
pub type XDREndian = BigEndian;

pub trait Serialize {
    /// Appends the XDR encoding of `self` to `dest`.
    fn serialize<W: Write>(&self, dest: &mut W) -> std::io::Result<()>;
}

pub trait Deserialize {
    /// Overwrites `self` with a value decoded from `src`.
    ///
    /// On error the contents of `self` are unspecified and `src` may have
    /// been partially consumed.
    fn deserialize<R: Read>(&mut self, src: &mut R) -> std::io::Result<()>;
}

/// Decodes a fresh `T` starting from its [Default] value.
pub fn deserialize<T>(src: &mut impl Read) -> std::io::Result<T>
where
    T: Deserialize + Default,
{
    let mut val = T::default();
    val.deserialize(src)?;

    Ok(val)
}

/// Encodes `value` into a new buffer.
pub fn to_bytes<T: Serialize + ?Sized>(value: &T) -> std::io::Result<Vec<u8>> {
    let mut buf = Vec::new();
    value.serialize(&mut buf)?;
    Ok(buf)
}

/// Marker for C-like enums encoded as XDR `enum`.
pub trait SerializeEnum: ToPrimitive {}

/// Enumerations have the same representation as signed integers.
impl<T: SerializeEnum> Serialize for T {
    fn serialize<W: Write>(&self, dest: &mut W) -> std::io::Result<()> {
        match self.to_i32() {
            Some(val) => dest.write_i32::<XDREndian>(val),
            None => Err(utils::invalid_data("enum value does not fit in an XDR int")),
        }
    }
}

/// Marker for C-like enums decoded from XDR `enum`.
pub trait DeserializeEnum: FromPrimitive {}

impl<T: DeserializeEnum> Deserialize for T {
    fn deserialize<R: Read>(&mut self, src: &mut R) -> std::io::Result<()> {
        let raw = src.read_i32::<XDREndian>()?;
        *self = FromPrimitive::from_i32(raw)
            .ok_or_else(|| utils::invalid_data(&format!("unknown enum discriminant {raw}")))?;
        Ok(())
    }
}

/// `bool` is `enum { FALSE = 0, TRUE = 1 }`.
impl Serialize for bool {
    fn serialize<W: Write>(&self, dest: &mut W) -> std::io::Result<()> {
        dest.write_i32::<XDREndian>(i32::from(*self))
    }
}

impl Deserialize for bool {
    fn deserialize<R: Read>(&mut self, src: &mut R) -> std::io::Result<()> {
        *self = match src.read_i32::<XDREndian>()? {
            0 => false,
            1 => true,
            other => return Err(utils::invalid_data(&format!("invalid XDR bool {other}"))),
        };
        Ok(())
    }
}

macro_rules! xdr_number {
    ($t:ty, $write:ident, $read:ident) => {
        impl Serialize for $t {
            fn serialize<W: Write>(&self, dest: &mut W) -> std::io::Result<()> {
                dest.$write::<XDREndian>(*self)
            }
        }

        impl Deserialize for $t {
            fn deserialize<R: Read>(&mut self, src: &mut R) -> std::io::Result<()> {
                *self = src.$read::<XDREndian>()?;
                Ok(())
            }
        }
    };
}

xdr_number!(i32, write_i32, read_i32);
xdr_number!(u32, write_u32, read_u32);
xdr_number!(i64, write_i64, read_i64);
xdr_number!(u64, write_u64, read_u64);
xdr_number!(f32, write_f32, read_f32);
xdr_number!(f64, write_f64, read_f64);

/// XDR `void`: encodes to nothing. Used for procedures without arguments
/// or results.
impl Serialize for () {
    fn serialize<W: Write>(&self, _dest: &mut W) -> std::io::Result<()> {
        Ok(())
    }
}

impl Deserialize for () {
    fn deserialize<R: Read>(&mut self, _src: &mut R) -> std::io::Result<()> {
        Ok(())
    }
}

/// Fixed-length opaque data, `opaque identifier[n]`.
impl<const N: usize> Serialize for [u8; N] {
    fn serialize<W: Write>(&self, dest: &mut W) -> std::io::Result<()> {
        dest.write_all(self)?;
        utils::write_padding(N, dest)
    }
}

impl<const N: usize> Deserialize for [u8; N] {
    fn deserialize<R: Read>(&mut self, src: &mut R) -> std::io::Result<()> {
        src.read_exact(self)?;
        utils::read_padding(N, src)
    }
}

fn write_length<W: Write>(len: usize, dest: &mut W) -> std::io::Result<()> {
    let len = len.to_u32().ok_or_else(|| utils::invalid_data("length exceeds u32"))?;
    len.serialize(dest)
}

fn read_length<R: Read>(src: &mut R) -> std::io::Result<usize> {
    deserialize::<u32>(src)?.to_usize().ok_or_else(|| utils::invalid_data("length exceeds usize"))
}

/// Variable-length opaque data, `opaque identifier<>`.
impl Serialize for [u8] {
    fn serialize<W: Write>(&self, dest: &mut W) -> std::io::Result<()> {
        write_length(self.len(), dest)?;
        dest.write_all(self)?;
        utils::write_padding(self.len(), dest)
    }
}

impl Deserialize for Vec<u8> {
    fn deserialize<R: Read>(&mut self, src: &mut R) -> std::io::Result<()> {
        let length = read_length(src)?;
        self.clear();
        // Grow through `take` so a bogus length cannot force a huge allocation
        // before the data is actually there.
        let read = src.by_ref().take(length as u64).read_to_end(self)?;
        if read != length {
            return Err(std::io::ErrorKind::UnexpectedEof.into());
        }
        utils::read_padding(length, src)
    }
}

/// XDR strings are ASCII.
impl Serialize for str {
    fn serialize<W: Write>(&self, dest: &mut W) -> std::io::Result<()> {
        self.as_bytes().serialize(dest)
    }
}

impl Deserialize for String {
    fn deserialize<R: Read>(&mut self, src: &mut R) -> std::io::Result<()> {
        let bytes = deserialize::<Vec<u8>>(src)?;
        if !bytes.is_ascii() {
            return Err(utils::invalid_data("Not ASCII string"));
        }
        *self = String::from_utf8(bytes).map_err(|_| utils::invalid_data("Not ASCII string"))?;
        Ok(())
    }
}

/// Fixed-length array, `T identifier[n]`.
impl<const N: usize, T: Serialize> Serialize for [T; N] {
    fn serialize<W: Write>(&self, dest: &mut W) -> std::io::Result<()> {
        self.iter().try_for_each(|i| i.serialize(dest))
    }
}

impl<const N: usize, T: Deserialize> Deserialize for [T; N] {
    fn deserialize<R: Read>(&mut self, src: &mut R) -> std::io::Result<()> {
        self.iter_mut().try_for_each(|i| i.deserialize(src))
    }
}

/// Variable-length array, `T identifier<>`.
impl<T: Serialize> Serialize for [T] {
    fn serialize<W: Write>(&self, dest: &mut W) -> std::io::Result<()> {
        write_length(self.len(), dest)?;
        self.iter().try_for_each(|i| i.serialize(dest))
    }
}

impl<T: Deserialize + Default> Deserialize for Vec<T> {
    fn deserialize<R: Read>(&mut self, src: &mut R) -> std::io::Result<()> {
        let length = read_length(src)?;
        self.clear();
        for _ in 0..length {
            self.push(deserialize(src)?);
        }
        Ok(())
    }
}

/// Optional data, `T *identifier`.
impl<T: Serialize> Serialize for Option<T> {
    fn serialize<W: Write>(&self, dest: &mut W) -> std::io::Result<()> {
        match self {
            Some(data) => {
                true.serialize(dest)?;
                data.serialize(dest)
            }
            None => false.serialize(dest),
        }
    }
}

impl<T: Deserialize + Default> Deserialize for Option<T> {
    fn deserialize<R: Read>(&mut self, src: &mut R) -> std::io::Result<()> {
        *self = if deserialize::<bool>(src)? { Some(deserialize(src)?) } else { None };
        Ok(())
    }
}

/// Implements [Serialize] for a struct by encoding the listed fields in order.
#[macro_export]
macro_rules! SerializeStruct {
    (
        $t:ident,
        $($element:ident),*
    ) => {
        impl $crate::xdr::Serialize for $t {
            fn serialize<W: std::io::Write>(&self, dest: &mut W) -> std::io::Result<()> {
                use $crate::xdr::Serialize as _;
                $(self.$element.serialize(dest)?;)*
                Ok(())
            }
        }
    };
}

/// Implements [Deserialize] for a struct by decoding the listed fields in order.
#[macro_export]
macro_rules! DeserializeStruct {
    (
        $t:ident,
        $($element:ident),*
    ) => {
        impl $crate::xdr::Deserialize for $t {
            fn deserialize<R: std::io::Read>(&mut self, src: &mut R) -> std::io::Result<()> {
                use $crate::xdr::Deserialize as _;
                $(self.$element.deserialize(src)?;)*
                Ok(())
            }
        }
    };
}

pub use crate::DeserializeStruct;
pub use crate::SerializeStruct;
