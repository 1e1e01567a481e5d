use crate::error::Error;
use events::Notification;
use serde::Serialize;

/// Messages pushed from the server to every connected session.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Event {
    /// A change notification relayed verbatim from the database.
    DatabaseNotification { channel: String, payload: String },
}

impl Event {
    /// Serializes the event into the text body sent over the wire.
    pub fn to_message(&self) -> Result<String, Error> {
        Ok(serde_json::to_string(self)?)
    }
}

impl From<Notification> for Event {
    fn from(notification: Notification) -> Self {
        Event::DatabaseNotification {
            channel: notification.channel,
            payload: notification.payload,
        }
    }
}
