use bytes::Bytes;
use gattlink_core::PeerId;
use uuid::Uuid;

/// Longest value an attribute may hold.
pub const MAX_ATTRIBUTE_LEN: usize = 512;

/// Inbound ATT read addressed to one characteristic.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReadRequest {
    pub characteristic: Uuid,
    pub offset: usize,
    pub peer: Option<PeerId>,
}

impl ReadRequest {
    pub fn new(characteristic: Uuid, offset: usize) -> Self {
        Self {
            characteristic,
            offset,
            peer: None,
        }
    }

    pub fn from_peer(mut self, peer: PeerId) -> Self {
        self.peer = Some(peer);
        self
    }
}

/// Inbound ATT write: `value` is spliced into the characteristic at `offset`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WriteRequest {
    pub characteristic: Uuid,
    pub offset: usize,
    pub value: Bytes,
    pub peer: Option<PeerId>,
}

impl WriteRequest {
    pub fn new(characteristic: Uuid, offset: usize, value: impl Into<Bytes>) -> Self {
        Self {
            characteristic,
            offset,
            value: value.into(),
            peer: None,
        }
    }

    pub fn from_peer(mut self, peer: PeerId) -> Self {
        self.peer = Some(peer);
        self
    }
}
