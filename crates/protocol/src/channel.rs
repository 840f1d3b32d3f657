//! Messages exchanged on the peer data channel.
//!
//! Every message is a JSON object tagged by `action`:
//!
//! ```text
//! {"action":"data","id":<index>,"content":<encoded chunk>}
//! {"action":"request","ids":[<index>, ...]}
//! {"action":"done"}
//! ```
//!
//! Unrecognized actions decode to [`ChannelMessage::Unknown`] and are ignored by
//! both peers. The browser client tags requests `req-chunk` and may send chunk
//! indices as numeric strings; both forms are accepted on decode.

use serde::{Deserialize, Deserializer, Serialize};

use crate::ProtocolError;

/// A data-channel message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "action")]
pub enum ChannelMessage {
    /// One chunk of the file, base64-encoded.
    #[serde(rename = "data")]
    Data {
        #[serde(deserialize_with = "chunk_index")]
        id: u32,
        content: String,
    },
    /// A batch of chunk indices the receiver wants served.
    #[serde(rename = "request", alias = "req-chunk")]
    Request {
        #[serde(deserialize_with = "chunk_indices")]
        ids: Vec<u32>,
    },
    /// The receiver holds every chunk.
    #[serde(rename = "done")]
    Done,
    #[serde(other)]
    Unknown,
}

impl ChannelMessage {
    /// Serializes the message to its JSON text form.
    pub fn to_json(&self) -> Result<String, ProtocolError> {
        Ok(serde_json::to_string(self)?)
    }

    /// Parses a message from JSON text.
    pub fn from_json(text: &str) -> Result<Self, ProtocolError> {
        Ok(serde_json::from_str(text)?)
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum IndexRepr {
    Number(u32),
    Text(String),
}

impl IndexRepr {
    fn into_index<E: serde::de::Error>(self) -> Result<u32, E> {
        match self {
            IndexRepr::Number(n) => Ok(n),
            IndexRepr::Text(s) => s
                .parse()
                .map_err(|_| E::custom(ProtocolError::InvalidIndex(s))),
        }
    }
}

fn chunk_index<'de, D>(deserializer: D) -> Result<u32, D::Error>
where
    D: Deserializer<'de>,
{
    IndexRepr::deserialize(deserializer)?.into_index()
}

fn chunk_indices<'de, D>(deserializer: D) -> Result<Vec<u32>, D::Error>
where
    D: Deserializer<'de>,
{
    Vec::<IndexRepr>::deserialize(deserializer)?
        .into_iter()
        .map(IndexRepr::into_index)
        .collect()
}
