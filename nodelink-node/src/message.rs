// Message capability
//
// Every payload that crosses a topic or a service is a `Message`: it has a
// stable type name and can be turned into bytes and back. Any serde type gets
// the capability for free, encoded with bincode.

use serde::{de::DeserializeOwned, Serialize};

use crate::error::{NodeError, Result};

pub trait Message: Send + Sync + 'static {
    /// Runtime type identifier, compared when handlers are looked up
    fn type_name() -> &'static str
    where
        Self: Sized,
    {
        std::any::type_name::<Self>()
    }

    fn encode(&self) -> Result<Vec<u8>>;

    fn decode(bytes: &[u8]) -> Result<Self>
    where
        Self: Sized;
}

impl<T> Message for T
where
    T: Serialize + DeserializeOwned + Send + Sync + 'static,
{
    fn encode(&self) -> Result<Vec<u8>> {
        bincode::serialize(self).map_err(|e| NodeError::EncodeError {
            type_name: <T as Message>::type_name().to_string(),
            reason: e.to_string(),
        })
    }

    fn decode(bytes: &[u8]) -> Result<Self> {
        bincode::deserialize(bytes).map_err(|e| NodeError::DecodeError {
            type_name: <T as Message>::type_name().to_string(),
            reason: e.to_string(),
        })
    }
}
