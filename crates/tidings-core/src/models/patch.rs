//! Message patches and the copy-on-write functions that merge them.
//!
//! Merging never mutates the message it is given. Callers put the returned
//! value back into their cache with `update`, so a snapshot handed to an
//! observer is never touched by a later patch.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::message::{AttachedFile, Message, MessageType, Reaction, ThreadSummary};
use super::{BlobId, CardId, MessageId, SocialId};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum RepliesDelta {
    Increment,
    Decrement,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum PatchData {
    #[serde(rename_all = "camelCase")]
    Update {
        #[serde(default)]
        content: Option<String>,
        #[serde(default)]
        extra: Option<serde_json::Value>,
        #[serde(default, rename = "type")]
        message_type: Option<MessageType>,
    },
    Remove,
    AddReaction {
        reaction: String,
    },
    RemoveReaction {
        reaction: String,
    },
    AddFile {
        file: AttachedFile,
    },
    #[serde(rename_all = "camelCase")]
    RemoveFile {
        blob_id: BlobId,
    },
    #[serde(rename_all = "camelCase")]
    UpdateThread {
        thread_id: CardId,
        thread_type: String,
        #[serde(default)]
        replies: Option<RepliesDelta>,
        #[serde(default)]
        last_reply: Option<DateTime<Utc>>,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Patch {
    pub message_id: MessageId,
    pub card_id: CardId,
    #[serde(flatten)]
    pub data: PatchData,
    pub creator: SocialId,
    pub created: DateTime<Utc>,
}

impl Patch {
    pub fn new(
        card_id: impl Into<CardId>,
        message_id: impl Into<MessageId>,
        data: PatchData,
        creator: impl Into<SocialId>,
        created: DateTime<Utc>,
    ) -> Self {
        Self {
            message_id: message_id.into(),
            card_id: card_id.into(),
            data,
            creator: creator.into(),
            created,
        }
    }

    pub fn is_remove(&self) -> bool {
        matches!(self.data, PatchData::Remove)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum PatchOutcome {
    /// The patch produced a new version of the message.
    Updated(Message),
    /// The message was removed.
    Removed,
    /// Stale, already applied, or aimed at another message.
    Unchanged,
}

/// Merge one patch into a message.
///
/// A patch older than the message's last recorded mutation is rejected, and
/// set-like patches (reactions, files) check existence first, so replaying the
/// same patch twice leaves the message as it was after the first application.
pub fn apply_patch(message: &Message, patch: &Patch) -> PatchOutcome {
    if patch.message_id != message.id {
        return PatchOutcome::Unchanged;
    }
    if patch.created < message.last_mutation() {
        return PatchOutcome::Unchanged;
    }

    let mut next = match &patch.data {
        PatchData::Remove => return PatchOutcome::Removed,
        PatchData::Update {
            content,
            extra,
            message_type,
        } => {
            let mut next = message.clone();
            if let Some(content) = content {
                next.content = content.clone();
            }
            if let Some(extra) = extra {
                next.extra = Some(extra.clone());
            }
            if let Some(message_type) = message_type {
                next.message_type = *message_type;
            }
            next.edited = Some(patch.created);
            next
        }
        PatchData::AddReaction { reaction } => {
            if message.has_reaction(reaction, &patch.creator) {
                return PatchOutcome::Unchanged;
            }
            let mut next = message.clone();
            next.reactions.push(Reaction {
                reaction: reaction.clone(),
                creator: patch.creator.clone(),
                created: patch.created,
            });
            next
        }
        PatchData::RemoveReaction { reaction } => {
            if !message.has_reaction(reaction, &patch.creator) {
                return PatchOutcome::Unchanged;
            }
            let mut next = message.clone();
            next.reactions
                .retain(|r| !(r.reaction == *reaction && r.creator == patch.creator));
            next
        }
        PatchData::AddFile { file } => {
            if message.has_file(&file.blob_id) {
                return PatchOutcome::Unchanged;
            }
            let mut next = message.clone();
            next.files.push(file.clone());
            next
        }
        PatchData::RemoveFile { blob_id } => {
            if !message.has_file(blob_id) {
                return PatchOutcome::Unchanged;
            }
            let mut next = message.clone();
            next.files.retain(|f| f.blob_id != *blob_id);
            next
        }
        PatchData::UpdateThread {
            thread_id,
            thread_type,
            replies,
            last_reply,
        } => {
            let counted = replies.is_some()
                && message.thread.as_ref().map_or(false, |t| {
                    t.thread_id == *thread_id && t.has_counted(&patch.creator, patch.created)
                });
            if counted {
                return PatchOutcome::Unchanged;
            }
            let mut next = message.clone();
            next.thread = Some(merge_thread(
                message.thread.as_ref(),
                thread_id,
                thread_type,
                *replies,
                *last_reply,
                patch,
            ));
            next
        }
    };

    next.modified = Some(patch.created);
    PatchOutcome::Updated(next)
}

fn merge_thread(
    current: Option<&ThreadSummary>,
    thread_id: &str,
    thread_type: &str,
    replies: Option<RepliesDelta>,
    last_reply: Option<DateTime<Utc>>,
    patch: &Patch,
) -> ThreadSummary {
    let mut thread = match current {
        Some(existing) if existing.thread_id == thread_id => existing.clone(),
        _ => ThreadSummary {
            thread_id: thread_id.to_string(),
            thread_type: thread_type.to_string(),
            replies_count: 0,
            last_reply: None,
            counted_at: None,
            counted_by: Vec::new(),
        },
    };
    thread.thread_type = thread_type.to_string();

    match replies {
        Some(RepliesDelta::Increment) => thread.replies_count += 1,
        Some(RepliesDelta::Decrement) => {
            thread.replies_count = thread.replies_count.saturating_sub(1)
        }
        None => {}
    }
    if replies.is_some() {
        if thread.counted_at != Some(patch.created) {
            thread.counted_at = Some(patch.created);
            thread.counted_by.clear();
        }
        thread.counted_by.push(patch.creator.clone());
    }
    if let Some(last_reply) = last_reply {
        thread.last_reply = Some(thread.last_reply.map_or(last_reply, |t| t.max(last_reply)));
    }
    thread
}

/// Fold a batch of patches into a message in timestamp order.
/// Returns `None` when one of them removes the message.
pub fn apply_patches(message: Message, patches: &[Patch]) -> Option<Message> {
    let mut ordered: Vec<&Patch> = patches
        .iter()
        .filter(|p| p.message_id == message.id)
        .collect();
    ordered.sort_by_key(|p| p.created);

    let mut current = message;
    for patch in ordered {
        match apply_patch(&current, patch) {
            PatchOutcome::Updated(next) => current = next,
            PatchOutcome::Removed => return None,
            PatchOutcome::Unchanged => {}
        }
    }
    Some(current)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use proptest::prelude::*;

    fn at(secs: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(1_700_000_000 + secs, 0).unwrap()
    }

    fn message() -> Message {
        Message::new("m1", "c1", "hello", "alice", at(0))
    }

    fn patch(data: PatchData, secs: i64) -> Patch {
        Patch::new("c1", "m1", data, "bob", at(secs))
    }

    fn updated(outcome: PatchOutcome) -> Message {
        match outcome {
            PatchOutcome::Updated(m) => m,
            other => panic!("expected update, got {:?}", other),
        }
    }

    #[test]
    fn test_update_replaces_content() {
        let original = message();
        let next = updated(apply_patch(
            &original,
            &patch(
                PatchData::Update {
                    content: Some("edited".to_string()),
                    extra: None,
                    message_type: None,
                },
                5,
            ),
        ));
        assert_eq!(next.content, "edited");
        assert_eq!(next.edited, Some(at(5)));
        // Copy-on-write: the input is untouched
        assert_eq!(original.content, "hello");
    }

    #[test]
    fn test_stale_patch_is_rejected() {
        let edited = updated(apply_patch(
            &message(),
            &patch(
                PatchData::Update {
                    content: Some("new".to_string()),
                    extra: None,
                    message_type: None,
                },
                10,
            ),
        ));
        let older = patch(
            PatchData::Update {
                content: Some("old".to_string()),
                extra: None,
                message_type: None,
            },
            3,
        );
        assert_eq!(apply_patch(&edited, &older), PatchOutcome::Unchanged);
    }

    #[test]
    fn test_add_reaction_twice_is_idempotent() {
        let add = patch(
            PatchData::AddReaction {
                reaction: "👍".to_string(),
            },
            1,
        );
        let once = updated(apply_patch(&message(), &add));
        assert_eq!(apply_patch(&once, &add), PatchOutcome::Unchanged);
        assert_eq!(once.reactions.len(), 1);
    }

    #[test]
    fn test_remove_reaction_only_removes_own() {
        let mut m = message();
        m.reactions.push(Reaction {
            reaction: "👍".to_string(),
            creator: "carol".to_string(),
            created: at(1),
        });
        let remove = patch(
            PatchData::RemoveReaction {
                reaction: "👍".to_string(),
            },
            2,
        );
        // bob never reacted
        assert_eq!(apply_patch(&m, &remove), PatchOutcome::Unchanged);
    }

    #[test]
    fn test_files_add_and_remove() {
        let file = AttachedFile {
            blob_id: "b1".to_string(),
            mime_type: "image/png".to_string(),
            file_name: "a.png".to_string(),
            size: 10,
            creator: "bob".to_string(),
            created: at(1),
        };
        let with_file = updated(apply_patch(
            &message(),
            &patch(PatchData::AddFile { file: file.clone() }, 1),
        ));
        assert!(with_file.has_file("b1"));
        assert_eq!(
            apply_patch(&with_file, &patch(PatchData::AddFile { file }, 2)),
            PatchOutcome::Unchanged
        );
        let without = updated(apply_patch(
            &with_file,
            &patch(
                PatchData::RemoveFile {
                    blob_id: "b1".to_string(),
                },
                3,
            ),
        ));
        assert!(without.files.is_empty());
    }

    #[test]
    fn test_thread_counter() {
        let thread_patch = |replies, secs| {
            patch(
                PatchData::UpdateThread {
                    thread_id: "t1".to_string(),
                    thread_type: "chat".to_string(),
                    replies: Some(replies),
                    last_reply: Some(at(secs)),
                },
                secs,
            )
        };
        let m = updated(apply_patch(&message(), &thread_patch(RepliesDelta::Increment, 1)));
        let m = updated(apply_patch(&m, &thread_patch(RepliesDelta::Increment, 2)));
        let m = updated(apply_patch(&m, &thread_patch(RepliesDelta::Decrement, 3)));
        let thread = m.thread.clone().unwrap();
        assert_eq!(thread.replies_count, 1);
        assert_eq!(thread.last_reply, Some(at(3)));

        // Redelivery of the newest counter patch is a no-op
        assert_eq!(
            apply_patch(&m, &thread_patch(RepliesDelta::Decrement, 3)),
            PatchOutcome::Unchanged
        );

        // A different author at the same instant still counts
        let mut other = thread_patch(RepliesDelta::Increment, 3);
        other.creator = "carol".to_string();
        let m = updated(apply_patch(&m, &other));
        assert_eq!(m.thread.as_ref().unwrap().replies_count, 2);
        assert_eq!(apply_patch(&m, &other), PatchOutcome::Unchanged);
    }

    #[test]
    fn test_thread_increment_applied_twice_counts_once() {
        let increment = patch(
            PatchData::UpdateThread {
                thread_id: "t1".to_string(),
                thread_type: "chat".to_string(),
                replies: Some(RepliesDelta::Increment),
                last_reply: Some(at(5)),
            },
            5,
        );
        let once = updated(apply_patch(&message(), &increment));
        let twice = match apply_patch(&once, &increment) {
            PatchOutcome::Updated(m) => m,
            PatchOutcome::Removed => panic!("increment removed the message"),
            PatchOutcome::Unchanged => once.clone(),
        };
        assert_eq!(twice, once);
        assert_eq!(twice.thread.unwrap().replies_count, 1);
    }

    #[test]
    fn test_apply_patches_orders_by_time_and_stops_on_remove() {
        let patches = vec![
            patch(PatchData::Remove, 9),
            patch(
                PatchData::Update {
                    content: Some("x".to_string()),
                    extra: None,
                    message_type: None,
                },
                1,
            ),
        ];
        assert!(apply_patches(message(), &patches).is_none());
        assert_eq!(
            apply_patches(message(), &patches[1..]).map(|m| m.content),
            Some("x".to_string())
        );
    }

    #[test]
    fn test_patch_wire_format() {
        let json = serde_json::json!({
            "messageId": "m1",
            "cardId": "c1",
            "kind": "addReaction",
            "reaction": "🎉",
            "creator": "bob",
            "created": "2023-11-14T22:13:21Z",
        });
        let parsed: Patch = serde_json::from_value(json).unwrap();
        assert_eq!(
            parsed.data,
            PatchData::AddReaction {
                reaction: "🎉".to_string()
            }
        );
        assert_eq!(parsed.created, at(1));
    }

    fn replayable_patch() -> impl Strategy<Value = Patch> {
        (0..5u8, 1..4i64, "[a-c]", "[x-z]").prop_map(|(kind, secs, creator, text)| {
            let data = match kind {
                0 => PatchData::Update {
                    content: Some(text),
                    extra: None,
                    message_type: None,
                },
                1 => PatchData::AddReaction { reaction: text },
                2 => PatchData::RemoveReaction { reaction: text },
                _ => PatchData::UpdateThread {
                    thread_id: "t1".to_string(),
                    thread_type: "chat".to_string(),
                    replies: Some(if kind == 3 {
                        RepliesDelta::Increment
                    } else {
                        RepliesDelta::Decrement
                    }),
                    last_reply: Some(at(secs)),
                },
            };
            Patch::new("c1", "m1", data, creator, at(secs))
        })
    }

    proptest! {
        #[test]
        fn prop_reaction_replay_matches_single_application(
            reactions in prop::collection::vec("[a-d]", 1..8),
        ) {
            let patches: Vec<Patch> = reactions
                .iter()
                .map(|r| patch(PatchData::AddReaction { reaction: r.clone() }, 1))
                .collect();

            let once = apply_patches(message(), &patches).unwrap();
            let mut doubled = patches.clone();
            doubled.extend(patches.iter().cloned());
            let twice = apply_patches(message(), &doubled).unwrap();

            prop_assert_eq!(once.reactions, twice.reactions);
        }

        #[test]
        fn prop_redelivered_batch_matches_single_application(
            patches in prop::collection::vec(replayable_patch(), 1..10),
        ) {
            let once = apply_patches(message(), &patches).unwrap();
            let mut doubled = patches.clone();
            doubled.extend(patches.iter().cloned());
            let twice = apply_patches(message(), &doubled).unwrap();

            prop_assert_eq!(once, twice);
        }
    }
}
