use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::patch::Patch;
use super::{BlobId, CardId};
use crate::cache::Keyed;

/// Descriptor of one archived run of messages stored in a single blob.
///
/// Groups of a card never overlap: `from_date..=to_date` ranges are disjoint.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MessagesGroup {
    pub card_id: CardId,
    pub blob_id: BlobId,
    pub from_date: DateTime<Utc>,
    pub to_date: DateTime<Utc>,
    pub count: usize,
    /// Patches recorded after the blob was written
    #[serde(default)]
    pub patches: Vec<Patch>,
}

impl MessagesGroup {
    pub fn covers(&self, date: DateTime<Utc>) -> bool {
        self.from_date <= date && date <= self.to_date
    }
}

impl Keyed for MessagesGroup {
    type Key = BlobId;

    fn key(&self) -> BlobId {
        self.blob_id.clone()
    }
}
