use std::collections::BTreeMap;

use rdkafka::message::Headers;

/// A message as received from a stream. Rule engines only ever see it by
/// shared reference, so it cannot change once the source has yielded it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    pub stream: String,
    pub key: Option<Vec<u8>>,
    pub value: Vec<u8>,
    pub headers: BTreeMap<String, Vec<u8>>,
    pub partition: i32,
    pub offset: i64,
}

impl Message {
    /// Copy a message out of an rdkafka message. A null payload becomes an empty
    /// value; a header repeated by the producer keeps its last value.
    pub fn from_kafka<M: rdkafka::Message>(message: &M) -> Self {
        let mut headers = BTreeMap::new();
        if let Some(kafka_headers) = message.headers() {
            for header in kafka_headers.iter() {
                headers.insert(
                    header.key.to_owned(),
                    header.value.map(<[u8]>::to_vec).unwrap_or_default(),
                );
            }
        }

        Self {
            stream: message.topic().to_owned(),
            key: message.key().map(<[u8]>::to_vec),
            value: message.payload().map(<[u8]>::to_vec).unwrap_or_default(),
            headers,
            partition: message.partition(),
            offset: message.offset(),
        }
    }

    pub fn key_str(&self) -> Option<&str> {
        self.key
            .as_deref()
            .and_then(|key| std::str::from_utf8(key).ok())
    }

    pub fn value_str(&self) -> Result<&str, std::str::Utf8Error> {
        std::str::from_utf8(&self.value)
    }

    pub fn header(&self, name: &str) -> Option<&[u8]> {
        self.headers.get(name).map(Vec::as_slice)
    }
}
