//! Outgoing progress messages, encoded and tagged with their owner.

use hecs::Entity;

use commodity_logic::context::ProgressSink;
use commodity_logic::message::ProgressUpdate;

/// One encoded update waiting to be sent to the owner's client.
#[derive(Debug, Clone, PartialEq)]
pub struct Outgoing {
    pub entity: Entity,
    pub update: ProgressUpdate,
    pub bytes: Vec<u8>,
}

#[derive(Debug, Default)]
pub struct Distributor {
    outbox: Vec<Outgoing>,
}

impl Distributor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Encode and queue. Messages that fail to encode are logged and dropped.
    pub fn push(&mut self, entity: Entity, update: ProgressUpdate) {
        match update.encode() {
            Ok(bytes) => self.outbox.push(Outgoing { entity, update, bytes }),
            Err(e) => log::error!(
                "dropping progress update for commodity {}: {}",
                update.commodity_id,
                e
            ),
        }
    }

    /// Take everything queued so far, in send order.
    pub fn drain(&mut self) -> Vec<Outgoing> {
        std::mem::take(&mut self.outbox)
    }

    pub fn pending(&self) -> &[Outgoing] {
        &self.outbox
    }

    pub fn len(&self) -> usize {
        self.outbox.len()
    }

    pub fn is_empty(&self) -> bool {
        self.outbox.is_empty()
    }
}

/// [`ProgressSink`] that tags every update with one owner.
pub struct EntityDistributor<'a> {
    pub distributor: &'a mut Distributor,
    pub entity: Entity,
}

impl ProgressSink for EntityDistributor<'_> {
    fn send(&mut self, update: ProgressUpdate) {
        self.distributor.push(self.entity, update);
    }
}
