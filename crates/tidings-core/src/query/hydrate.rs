//! Denormalized message copies on notifications.

#![deny(clippy::wildcard_enum_match_arm)]

use std::collections::HashMap;

use super::QueryContext;
use crate::archive::load_group_messages;
use crate::error::Result;
use crate::models::{apply_patch, BlobId, Message, Notification, Patch, PatchOutcome};
use crate::store::{FindGroupsParams, FindMessagesParams};

/// Attach the message to every notification that lacks one.
///
/// Notifications whose message was rolled into an archive group are served
/// from that group's blob, each blob loaded at most once per call. Lookup
/// failures are logged and leave `message` empty.
pub(crate) async fn hydrate(ctx: &QueryContext, notifications: &mut [Notification]) {
    let mut blobs: HashMap<BlobId, Vec<Message>> = HashMap::new();

    for notification in notifications.iter_mut() {
        if notification.message.is_some() {
            continue;
        }

        let found = match notification.blob_id.clone() {
            Some(blob_id) => {
                if !blobs.contains_key(&blob_id) {
                    match load_blob(ctx, &notification.card_id, &blob_id).await {
                        Ok(messages) => {
                            blobs.insert(blob_id.clone(), messages);
                        }
                        Err(e) => {
                            tracing::warn!(
                                notification_id = %notification.id,
                                %blob_id,
                                "message hydration from archive failed: {}",
                                e
                            );
                            continue;
                        }
                    }
                }
                blobs
                    .get(&blob_id)
                    .and_then(|messages| messages.iter().find(|m| m.id == notification.message_id))
                    .cloned()
            }
            None => match find_hot(ctx, notification).await {
                Ok(message) => message,
                Err(e) => {
                    tracing::warn!(
                        notification_id = %notification.id,
                        "message hydration failed: {}",
                        e
                    );
                    continue;
                }
            },
        };

        notification.message = found;
    }
}

async fn load_blob(ctx: &QueryContext, card_id: &str, blob_id: &str) -> Result<Vec<Message>> {
    let params = FindGroupsParams {
        blob_id: Some(blob_id.to_string()),
        limit: Some(1),
        ..FindGroupsParams::for_card(card_id)
    };
    let Some(group) = ctx.store.find_groups(&params).await?.into_iter().next() else {
        return Ok(Vec::new());
    };
    load_group_messages(ctx.archive.as_ref(), &group).await
}

async fn find_hot(ctx: &QueryContext, notification: &Notification) -> Result<Option<Message>> {
    let params = FindMessagesParams {
        id: Some(notification.message_id.clone()),
        ..FindMessagesParams::for_card(notification.card_id.clone())
    }
    .with_limit(1);
    Ok(ctx.store.find_messages(&params).await?.into_iter().next())
}

/// Merge a patch into a notification's hydrated message. Returns whether it changed.
pub(crate) fn patch_hydrated(notification: &mut Notification, patch: &Patch) -> bool {
    let Some(message) = notification.message.as_ref() else {
        return false;
    };
    if message.id != patch.message_id {
        return false;
    }
    match apply_patch(message, patch) {
        PatchOutcome::Updated(next) => {
            notification.message = Some(next);
            true
        }
        PatchOutcome::Removed => {
            notification.message = None;
            true
        }
        PatchOutcome::Unchanged => false,
    }
}
