use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::{AccountId, CardId, LabelId};
use crate::cache::Keyed;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Label {
    pub label_id: LabelId,
    pub card_id: CardId,
    pub card_type: String,
    pub account: AccountId,
    pub created: DateTime<Utc>,
}

impl Keyed for Label {
    type Key = (LabelId, CardId, AccountId);

    fn key(&self) -> Self::Key {
        (
            self.label_id.clone(),
            self.card_id.clone(),
            self.account.clone(),
        )
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Collaborator {
    pub account: AccountId,
    pub card_id: CardId,
    pub card_type: String,
}

impl Keyed for Collaborator {
    type Key = (CardId, AccountId);

    fn key(&self) -> Self::Key {
        (self.card_id.clone(), self.account.clone())
    }
}
