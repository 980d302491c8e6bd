use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_repr::*;

use crate::socket::{pack, unpack, Encoding};
use crate::Result;

#[derive(Debug, Copy, Clone, PartialEq, Eq, Deserialize_repr, Serialize_repr)]
#[repr(u8)]
pub enum SyncMessageType {
    /// Carries new state for the object
    Sync,
    /// Object was removed on the sending side
    Remove,
}

/// State update or removal notice for a synchronized object.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct SyncMessage {
    pub id: String,
    pub type_: SyncMessageType,
    #[serde(with = "serde_bytes")]
    pub payload: Vec<u8>,
}

impl SyncMessage {
    pub fn sync(id: &str, payload: Vec<u8>) -> Self {
        Self {
            id: id.to_string(),
            type_: SyncMessageType::Sync,
            payload,
        }
    }

    pub fn remove(id: &str) -> Self {
        Self {
            id: id.to_string(),
            type_: SyncMessageType::Remove,
            payload: Vec::new(),
        }
    }

    pub fn from_payload<P: Serialize>(id: &str, payload: &P, encoding: &Encoding) -> Result<Self> {
        Ok(Self::sync(id, pack(payload, encoding)?))
    }

    pub fn unpack_payload<P: DeserializeOwned>(&self, encoding: &Encoding) -> Result<P> {
        unpack(&self.payload, encoding)
    }
}
