//! Typed client for the chat endpoint.
//!
//! [`ChatClient`] maps the endpoint's chat actions onto [`Session::call_as`]
//! and decodes its pushed events into [`ChatEvent`]. The endpoint keys
//! subscriptions by chat id, so sessions used with it should set
//! `rpc.topicParam` to [`CHAT_TOPIC_PARAM`].

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value, json};
use tether_core::SessionError;
use tracing::debug;

use crate::dispatcher::{ListenerHandle, PushEvent};
use crate::session::Session;

/// Params key carrying the chat id in `subscribe`/`unsubscribe`.
pub const CHAT_TOPIC_PARAM: &str = "chatId";

/// Default page size of [`ChatClient::get_chats`].
pub const DEFAULT_CHATS_LIMIT: u32 = 20;

/// Default page size of [`ChatClient::get_messages`].
pub const DEFAULT_MESSAGES_LIMIT: u32 = 30;

/// One page of a cursor-paginated listing.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Page<T> {
    /// Items on this page.
    pub items: Vec<T>,
    /// Cursor for the next page, `None` on the last one.
    #[serde(default)]
    pub next_cursor: Option<String>,
}

/// The other participant of a chat.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatPeer {
    /// User id.
    pub user_id: String,
    /// Profile id, when the user has a profile.
    #[serde(default)]
    pub profile_id: Option<String>,
    /// Display name.
    pub preferred_name: String,
    /// Avatar URL.
    #[serde(default)]
    pub avatar: Option<String>,
}

/// A conversation between two users.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Chat {
    /// Chat id.
    pub id: String,
    /// First participant.
    pub user_a_id: String,
    /// Second participant.
    pub user_b_id: String,
    /// Text of the latest message.
    #[serde(default)]
    pub last_message: Option<String>,
    /// Time of the latest message.
    #[serde(default)]
    pub last_message_time: Option<DateTime<Utc>>,
    /// Last modification time.
    #[serde(default)]
    pub updated_at: Option<DateTime<Utc>>,
    /// Archived by the current user.
    #[serde(default)]
    pub is_archived: bool,
    /// Unread message count.
    #[serde(default)]
    pub unread_count: Option<u64>,
    /// The other participant.
    #[serde(default)]
    pub other_user: Option<ChatPeer>,
    /// Fields not modelled above.
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// A chat message.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatMessage {
    /// Message id.
    pub id: String,
    /// Chat the message belongs to.
    #[serde(default)]
    pub chat_id: Option<String>,
    /// Author.
    pub sender_id: String,
    /// Text body.
    #[serde(default)]
    pub text: Option<String>,
    /// Attached media URL.
    #[serde(default)]
    pub media: Option<String>,
    /// Message kind (`text` for plain messages).
    #[serde(rename = "type", default = "default_message_kind")]
    pub kind: String,
    /// Creation time.
    pub created_at: DateTime<Utc>,
    /// Last edit time.
    #[serde(default)]
    pub edited_at: Option<DateTime<Utc>>,
    /// Time the recipient read it.
    #[serde(default)]
    pub read_at: Option<DateTime<Utc>>,
}

fn default_message_kind() -> String {
    "text".to_string()
}

/// Who a deletion applies to.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeleteScope {
    /// Only the caller's view.
    #[serde(rename = "self")]
    OnlyMe,
    /// Both participants.
    #[default]
    Both,
}

/// Events the chat endpoint pushes to subscribers.
#[derive(Clone, Debug, PartialEq, Deserialize)]
#[serde(
    tag = "event",
    content = "payload",
    rename_all = "snake_case",
    rename_all_fields = "camelCase"
)]
pub enum ChatEvent {
    /// A message was sent.
    NewMessage {
        /// Chat id.
        chat_id: String,
        /// The message.
        message: ChatMessage,
    },
    /// A message was edited.
    MessageUpdated {
        /// The updated message.
        message: ChatMessage,
    },
    /// A message was deleted.
    MessageDeleted {
        /// Message id.
        message_id: String,
        /// Deletion scope.
        scope: DeleteScope,
    },
    /// A chat was archived or unarchived.
    ChatArchived {
        /// Chat id.
        chat_id: String,
        /// Who did it.
        by: String,
        /// Archived (`true`) or restored.
        archive: bool,
    },
    /// A chat was blocked.
    ChatBlocked {
        /// Chat id.
        chat_id: String,
        /// Who did it.
        by: String,
    },
    /// A chat was deleted.
    ChatDeleted {
        /// Chat id.
        chat_id: String,
        /// Deletion scope.
        scope: DeleteScope,
    },
    /// Messages were marked read.
    MessagesRead {
        /// Message ids.
        message_ids: Vec<String>,
        /// Reader.
        by: String,
    },
}

impl ChatEvent {
    /// Decode a pushed event. Returns `None` for events this client does not
    /// model or payloads that do not match.
    pub fn decode(event: &PushEvent) -> Option<Self> {
        let envelope = json!({"event": event.topic, "payload": event.payload});
        match serde_json::from_value(envelope) {
            Ok(decoded) => Some(decoded),
            Err(e) => {
                debug!(topic = %event.topic, error = %e, "not a chat event");
                None
            }
        }
    }
}

#[derive(Deserialize)]
struct ChatEnvelope {
    chat: Chat,
}

#[derive(Deserialize)]
struct MessageEnvelope {
    message: ChatMessage,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct ArchiveResult {
    is_archived: bool,
}

#[derive(Deserialize)]
struct MarkedResult {
    marked: u64,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct PageParams<'a> {
    #[serde(skip_serializing_if = "Option::is_none")]
    chat_id: Option<&'a str>,
    limit: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    cursor: Option<&'a str>,
}

/// Chat operations over a [`Session`].
#[derive(Clone, Debug)]
pub struct ChatClient {
    session: Session,
}

impl ChatClient {
    /// Wrap a session.
    pub fn new(session: Session) -> Self {
        Self { session }
    }

    /// The underlying session.
    pub fn session(&self) -> &Session {
        &self.session
    }

    /// List the caller's chats, newest activity first.
    pub async fn get_chats(&self, limit: u32, cursor: Option<&str>) -> Result<Page<Chat>, SessionError> {
        let params = PageParams {
            chat_id: None,
            limit,
            cursor,
        };
        self.session.call_as("getChats", &params).await
    }

    /// Fetch one chat's metadata.
    pub async fn open_chat(&self, chat_id: &str) -> Result<Chat, SessionError> {
        let envelope: ChatEnvelope = self
            .session
            .call_as("openChat", &json!({"chatId": chat_id}))
            .await?;
        Ok(envelope.chat)
    }

    /// List a chat's messages, oldest first within the page.
    pub async fn get_messages(
        &self,
        chat_id: &str,
        limit: u32,
        cursor: Option<&str>,
    ) -> Result<Page<ChatMessage>, SessionError> {
        let params = PageParams {
            chat_id: Some(chat_id),
            limit,
            cursor,
        };
        self.session.call_as("getMessages", &params).await
    }

    /// Send a text message.
    pub async fn send_message(&self, chat_id: &str, text: &str) -> Result<ChatMessage, SessionError> {
        let envelope: MessageEnvelope = self
            .session
            .call_as(
                "sendMessage",
                &json!({"chatId": chat_id, "text": text, "type": "text"}),
            )
            .await?;
        Ok(envelope.message)
    }

    /// Replace the text of one of the caller's messages.
    pub async fn edit_message(&self, message_id: &str, text: &str) -> Result<ChatMessage, SessionError> {
        let envelope: MessageEnvelope = self
            .session
            .call_as("editMessage", &json!({"messageId": message_id, "text": text}))
            .await?;
        Ok(envelope.message)
    }

    /// Delete one of the caller's messages.
    pub async fn delete_message(&self, message_id: &str, scope: DeleteScope) -> Result<(), SessionError> {
        let _: Value = self
            .session
            .call_as("deleteMessage", &json!({"messageId": message_id, "scope": scope}))
            .await?;
        Ok(())
    }

    /// Delete a chat.
    pub async fn delete_chat(&self, chat_id: &str, scope: DeleteScope) -> Result<(), SessionError> {
        let _: Value = self
            .session
            .call_as("deleteChat", &json!({"chatId": chat_id, "scope": scope}))
            .await?;
        Ok(())
    }

    /// Archive (`true`) or restore a chat. Returns the resulting flag.
    pub async fn archive_chat(&self, chat_id: &str, archive: bool) -> Result<bool, SessionError> {
        let result: ArchiveResult = self
            .session
            .call_as("archiveChat", &json!({"chatId": chat_id, "archive": archive}))
            .await?;
        Ok(result.is_archived)
    }

    /// Mark messages read. Returns the number of ids submitted.
    pub async fn mark_read(&self, chat_id: &str, message_ids: &[String]) -> Result<u64, SessionError> {
        let result: MarkedResult = self
            .session
            .call_as("markRead", &json!({"chatId": chat_id, "messageIds": message_ids}))
            .await?;
        Ok(result.marked)
    }

    /// Receive a chat's pushed events.
    pub async fn subscribe(&self, chat_id: &str) -> Result<(), SessionError> {
        self.session.subscribe(chat_id).await
    }

    /// Stop receiving a chat's pushed events.
    pub async fn unsubscribe(&self, chat_id: &str) -> Result<(), SessionError> {
        self.session.unsubscribe(chat_id).await
    }

    /// Register a listener for decoded chat events. Other events are skipped.
    pub fn on_event(&self, listener: impl Fn(ChatEvent) + Send + Sync + 'static) -> ListenerHandle {
        self.session.add_listener(move |event| {
            if let Some(decoded) = ChatEvent::decode(event) {
                listener(decoded);
            }
        })
    }
}
