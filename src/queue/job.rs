//! Job unit and its byte codec.

use bytes::Bytes;

use super::{QueueError, QueueResult};

const ID_BYTES: usize = 8;

/// One unit of work tracked by the queue. The queue owns id allocation:
/// ids are assigned at push time.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Job {
    id: u64,
    payload: Bytes,
}

impl Job {
    pub fn new(payload: impl Into<Bytes>) -> Self {
        Job {
            id: 0,
            payload: payload.into(),
        }
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub(crate) fn set_id(&mut self, id: u64) {
        self.id = id;
    }

    pub fn payload(&self) -> &Bytes {
        &self.payload
    }

    /// 8-byte big-endian id followed by the payload bytes.
    pub fn encode(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(ID_BYTES + self.payload.len());
        buf.extend_from_slice(&self.id.to_be_bytes());
        buf.extend_from_slice(&self.payload);
        buf
    }

    pub fn decode(bytes: &[u8]) -> QueueResult<Self> {
        if bytes.len() < ID_BYTES {
            return Err(QueueError::JobTruncated { got: bytes.len() });
        }
        let mut id_bytes = [0u8; ID_BYTES];
        id_bytes.copy_from_slice(&bytes[..ID_BYTES]);
        Ok(Job {
            id: u64::from_be_bytes(id_bytes),
            payload: Bytes::copy_from_slice(&bytes[ID_BYTES..]),
        })
    }
}
