//! Socket-level building blocks: payload encodings, compression and the
//! framing used on the wire.

use std::fmt::{Display, Formatter};
use std::str::FromStr;

use serde::de::DeserializeOwned;
#[allow(unused_imports)]
use serde::{Deserialize, Serialize};
use serde_repr::*;

#[cfg(feature = "lz4")]
use byteorder::{ByteOrder, LittleEndian};

use crate::{Error, Result};

mod frame;
pub(crate) mod tcp;

pub use frame::{Frame, FrameDecoder, FLAG_COMPRESSED};

/// List of possible formats for encoding data sent over the network.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Deserialize_repr, Serialize_repr)]
#[repr(u8)]
pub enum Encoding {
    /// Fast binary format, useful for communicating directly between Rust apps
    Bincode,
    /// Binary format with implementations in many different languages
    MsgPack,
    /// Very common but more verbose format
    Json,
}

impl Default for Encoding {
    fn default() -> Self {
        Encoding::Bincode
    }
}

impl FromStr for Encoding {
    type Err = Error;
    fn from_str(s: &str) -> core::result::Result<Self, Error> {
        let e = match s.to_lowercase().as_str() {
            "bincode" | "bin" => Self::Bincode,
            #[cfg(feature = "msgpack_encoding")]
            "msgpack" | "messagepack" | "rmp" => Self::MsgPack,
            #[cfg(feature = "json_encoding")]
            "json" => Self::Json,
            _ => {
                return Err(Error::Other(format!(
                    "failed parsing encoding from string: {}",
                    s
                )))
            }
        };
        Ok(e)
    }
}

impl Display for Encoding {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Bincode => write!(f, "bincode"),
            Self::MsgPack => write!(f, "msgpack"),
            Self::Json => write!(f, "json"),
        }
    }
}

/// Packs serializable object to bytes based on selected encoding.
pub fn pack<S: Serialize>(obj: &S, encoding: &Encoding) -> Result<Vec<u8>> {
    match encoding {
        Encoding::Bincode => Ok(bincode::serialize(obj)?),
        Encoding::MsgPack => pack_msgpack(obj),
        Encoding::Json => pack_json(obj),
    }
}

/// Unpacks object from bytes based on selected encoding.
pub fn unpack<P: DeserializeOwned>(bytes: &[u8], encoding: &Encoding) -> Result<P> {
    match encoding {
        Encoding::Bincode => Ok(bincode::deserialize(bytes)?),
        Encoding::MsgPack => unpack_msgpack(bytes),
        Encoding::Json => unpack_json(bytes),
    }
}

#[cfg(feature = "msgpack_encoding")]
fn pack_msgpack<S: Serialize>(obj: &S) -> Result<Vec<u8>> {
    let mut buf = Vec::new();
    obj.serialize(&mut rmp_serde::Serializer::new(&mut buf))?;
    Ok(buf)
}

#[cfg(feature = "msgpack_encoding")]
fn unpack_msgpack<P: DeserializeOwned>(bytes: &[u8]) -> Result<P> {
    let mut de = rmp_serde::Deserializer::new(bytes).with_binary();
    Ok(Deserialize::deserialize(&mut de)?)
}

#[cfg(not(feature = "msgpack_encoding"))]
fn pack_msgpack<S: Serialize>(_obj: &S) -> Result<Vec<u8>> {
    Err(feature_disabled("msgpack_encoding"))
}

#[cfg(not(feature = "msgpack_encoding"))]
fn unpack_msgpack<P: DeserializeOwned>(_bytes: &[u8]) -> Result<P> {
    Err(feature_disabled("msgpack_encoding"))
}

#[cfg(feature = "json_encoding")]
fn pack_json<S: Serialize>(obj: &S) -> Result<Vec<u8>> {
    Ok(serde_json::to_vec(obj)?)
}

#[cfg(feature = "json_encoding")]
fn unpack_json<P: DeserializeOwned>(bytes: &[u8]) -> Result<P> {
    Ok(serde_json::from_slice(bytes)?)
}

#[cfg(not(feature = "json_encoding"))]
fn pack_json<S: Serialize>(_obj: &S) -> Result<Vec<u8>> {
    Err(feature_disabled("json_encoding"))
}

#[cfg(not(feature = "json_encoding"))]
fn unpack_json<P: DeserializeOwned>(_bytes: &[u8]) -> Result<P> {
    Err(feature_disabled("json_encoding"))
}

#[allow(dead_code)]
fn feature_disabled(feature: &str) -> Error {
    Error::Other(format!(
        "encoding not available, crate feature {} is not enabled",
        feature
    ))
}

/// Compresses bytes, prepending the uncompressed size.
#[cfg(feature = "lz4")]
pub(crate) fn compress(bytes: &[u8]) -> Result<Vec<u8>> {
    Ok(lz4::block::compress(bytes, None, true)?)
}

/// Decompresses bytes produced by [`compress`]. The uncompressed size
/// announced by the prefix is checked against `max_size` before anything
/// gets allocated.
#[cfg(feature = "lz4")]
pub(crate) fn decompress(bytes: &[u8], max_size: usize) -> Result<Vec<u8>> {
    if bytes.len() < 4 {
        return Err(Error::MalformedFrame(
            "compressed payload is missing the size prefix".to_string(),
        ));
    }
    let size = LittleEndian::read_i32(&bytes[..4]);
    if size < 0 {
        return Err(Error::MalformedFrame(format!(
            "negative uncompressed size: {}",
            size
        )));
    }
    if size as usize > max_size {
        return Err(Error::FrameTooLarge(size as usize, max_size));
    }
    lz4::block::decompress(bytes, None)
        .map_err(|e| Error::MalformedFrame(format!("failed decompressing payload: {}", e)))
}

#[cfg(not(feature = "lz4"))]
pub(crate) fn decompress(_bytes: &[u8], _max_size: usize) -> Result<Vec<u8>> {
    Err(Error::MalformedFrame(
        "got compressed payload but lz4 support is not enabled".to_string(),
    ))
}

#[test]
fn encoding_from_str() {
    assert_eq!(Encoding::from_str("Bincode").unwrap(), Encoding::Bincode);
    assert_eq!(Encoding::from_str("bin").unwrap(), Encoding::Bincode);
    assert!(Encoding::from_str("yaml").is_err());
}

#[cfg(feature = "lz4")]
#[test]
fn compressed_bytes_restore() {
    let bytes = b"ripple ripple ripple ripple ripple ripple ripple".to_vec();
    let compressed = compress(&bytes).unwrap();
    assert_eq!(decompress(&compressed, bytes.len()).unwrap(), bytes);
}

#[cfg(feature = "lz4")]
#[test]
fn decompressed_size_is_limited() {
    let bytes = vec![0u8; 1024 * 1024];
    let compressed = compress(&bytes).unwrap();
    assert!(compressed.len() < 64 * 1024);
    match decompress(&compressed, 64 * 1024) {
        Err(Error::FrameTooLarge(size, limit)) => {
            assert_eq!((size, limit), (bytes.len(), 64 * 1024))
        }
        other => panic!("expected frame too large error, got: {:?}", other.map(|b| b.len())),
    }
    assert!(decompress(&[1, 2], 1024).is_err());
}
