pub mod card;
pub mod group;
pub mod message;
pub mod notification;
pub mod patch;

pub type AccountId = String;
pub type BlobId = String;
pub type CardId = String;
pub type ContextId = String;
pub type LabelId = String;
pub type MessageId = String;
pub type NotificationId = String;
pub type SocialId = String;

pub use card::{Collaborator, Label};
pub use group::MessagesGroup;
pub use message::{AttachedFile, Message, MessageType, Reaction, ThreadSummary};
pub use notification::{Notification, NotificationContext, NotificationType};
pub use patch::{apply_patch, apply_patches, Patch, PatchData, PatchOutcome, RepliesDelta};
