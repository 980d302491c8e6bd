use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::socket::{pack, unpack, Encoding};
use crate::Result;

/// Identifier linking a reply to the request that caused it.
pub type ResponseId = u32;

/// Round-trip message, bounced back by the receiving side unless it was
/// already echoed.
#[derive(Debug, Clone, PartialEq, Default, Deserialize, Serialize)]
pub struct EchoMessage {
    pub response_id: Option<ResponseId>,
    pub echoed: bool,
    #[serde(with = "serde_bytes")]
    pub bytes: Vec<u8>,
}

impl EchoMessage {
    pub fn new(bytes: Vec<u8>) -> Self {
        Self {
            response_id: None,
            echoed: false,
            bytes,
        }
    }

    /// Marks the message as echoed back to the original sender.
    pub fn received(&mut self) {
        self.echoed = true;
    }
}

/// Application defined message tagged with a free-form kind, used to route
/// it to the right user service.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct UserMessage {
    pub kind: String,
    pub response_id: Option<ResponseId>,
    #[serde(with = "serde_bytes")]
    pub payload: Vec<u8>,
}

impl UserMessage {
    pub fn new(kind: &str, payload: Vec<u8>) -> Self {
        Self {
            kind: kind.to_string(),
            response_id: None,
            payload,
        }
    }

    pub fn from_payload<P: Serialize>(kind: &str, payload: &P, encoding: &Encoding) -> Result<Self> {
        Ok(Self::new(kind, pack(payload, encoding)?))
    }

    pub fn unpack_payload<P: DeserializeOwned>(&self, encoding: &Encoding) -> Result<P> {
        unpack(&self.payload, encoding)
    }

    /// Creates a reply for this message. Returns `None` if the sender
    /// didn't ask for a response.
    pub fn reply(&self, payload: Vec<u8>) -> Option<ReplyMessage> {
        self.response_id.map(|response_id| ReplyMessage {
            response_id,
            kind: self.kind.clone(),
            payload,
        })
    }
}

/// Reply to an earlier request, correlated by its response id.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct ReplyMessage {
    pub response_id: ResponseId,
    pub kind: String,
    #[serde(with = "serde_bytes")]
    pub payload: Vec<u8>,
}

impl ReplyMessage {
    pub fn unpack_payload<P: DeserializeOwned>(&self, encoding: &Encoding) -> Result<P> {
        unpack(&self.payload, encoding)
    }
}

#[test]
fn reply_keeps_request_id() {
    let mut request = UserMessage::from_payload("sum", &vec![1u32, 2, 3], &Encoding::Bincode).unwrap();
    assert!(request.reply(Vec::new()).is_none());

    request.response_id = Some(11);
    let sum: u32 = request
        .unpack_payload::<Vec<u32>>(&Encoding::Bincode)
        .unwrap()
        .iter()
        .sum();
    let reply = request.reply(pack(&sum, &Encoding::Bincode).unwrap()).unwrap();
    assert_eq!(reply.response_id, 11);
    assert_eq!(reply.kind, "sum");
    assert_eq!(reply.unpack_payload::<u32>(&Encoding::Bincode).unwrap(), 6);
}
