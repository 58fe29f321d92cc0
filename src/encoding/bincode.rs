use super::Value;
use crate::error::Result;
use serde::{de::DeserializeOwned, Serialize};

/// Serialize a value using bincode.
pub fn serialize<T: Serialize>(value: &T) -> Result<Vec<u8>> {
    Ok(bincode::serialize(value)?)
}

/// Deserialize a value from a byte slice using bincode.
pub fn deserialize<T: DeserializeOwned>(bytes: &[u8]) -> Result<T> {
    Ok(bincode::deserialize(bytes)?)
}

impl<T> Value for T
where
    T: Serialize + DeserializeOwned,
{
    fn encode(&self) -> Result<Vec<u8>> {
        serialize(self)
    }

    fn decode(bytes: &[u8]) -> Result<Self> {
        deserialize(bytes)
    }
}
