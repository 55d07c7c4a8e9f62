use serde::{Deserialize, Serialize};

use crate::view::{ChatViewUpdate, InboxSnapshot};

/// Events sent over the WebSocket gateway.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "data")]
pub enum GatewayEvent {
    /// Server confirms the connection is bound to an identity
    Ready { user_id: String, display_name: String },

    /// State change of the open chat view
    ChatView(ChatViewUpdate),

    /// Fresh contents of the open inbox view
    Inbox(InboxSnapshot),

    /// Message stored; `summary_stale` means the chat preview was not updated
    MessageSent { message_id: String, summary_stale: bool },

    /// Message not stored; `draft` holds the text to put back in the input
    SendFailed { draft: String, message: String },

    /// Command could not be handled
    Error { message: String },
}

/// Commands sent FROM client TO server over WebSocket.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "data")]
pub enum GatewayCommand {
    /// Open the group chat of an event (participants only)
    OpenEventChat { event_id: String },

    /// Open a private chat by id
    OpenPrivateChat { chat_id: String },

    /// Open the aggregated chat list
    OpenInbox,

    /// Send a message to the open chat
    SendMessage { text: String },

    /// Close whichever view is open
    CloseView,
}
