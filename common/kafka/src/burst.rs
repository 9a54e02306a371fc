//! The fixed burst of labeled test messages used to exercise the consumers.

use std::collections::BTreeMap;
use std::str::FromStr;

use uuid::Uuid;

pub const BURST_SIZE: usize = 10;
pub const SHARED_KEY: &str = "Key123";

pub const BURST_HEADERS: [(&str, &str); 2] = [
    ("header-key-1", "header-value-1"),
    ("header-key-2", "header-value-2"),
];

/// Whether every message in a burst shares one key (and so one partition) or
/// gets a freshly generated one.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyMode {
    Shared,
    Unique,
}

impl FromStr for KeyMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_ref() {
            "shared" | "false" => Ok(KeyMode::Shared),
            "unique" | "true" => Ok(KeyMode::Unique),
            _ => Err(format!("Unknown key mode: {s}, must be shared or unique")),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BurstMessage {
    pub key: String,
    pub value: String,
    pub headers: BTreeMap<String, Vec<u8>>,
}

pub fn burst_headers() -> BTreeMap<String, Vec<u8>> {
    BURST_HEADERS
        .iter()
        .map(|(name, value)| (name.to_string(), value.as_bytes().to_vec()))
        .collect()
}

pub fn build_burst(mode: KeyMode) -> Vec<BurstMessage> {
    (0..BURST_SIZE)
        .map(|i| BurstMessage {
            key: match mode {
                KeyMode::Shared => SHARED_KEY.to_owned(),
                KeyMode::Unique => Uuid::new_v4().to_string(),
            },
            value: format!("{i} Message"),
            headers: burst_headers(),
        })
        .collect()
}
