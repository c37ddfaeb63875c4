use crate::model::{DeliveryStatus, Message};
use parking_lot::RwLock;
use std::sync::Arc;
use tokio::sync::watch;

pub const DEFAULT_EMOTION: &str = "calm";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChatSnapshot {
    pub messages: Vec<Message>,
    pub is_typing: bool,
    pub current_emotion: String,
}

impl Default for ChatSnapshot {
    fn default() -> Self {
        Self {
            messages: Vec::new(),
            is_typing: false,
            current_emotion: DEFAULT_EMOTION.to_string(),
        }
    }
}

#[derive(Clone)]
pub struct MessageStore {
    inner: Arc<RwLock<ChatSnapshot>>,
    revision: Arc<watch::Sender<u64>>,
}

impl MessageStore {
    pub fn new() -> Self {
        let (revision, _rx) = watch::channel(0);
        Self {
            inner: Arc::new(RwLock::new(ChatSnapshot::default())),
            revision: Arc::new(revision),
        }
    }

    pub fn subscribe(&self) -> watch::Receiver<u64> {
        self.revision.subscribe()
    }

    pub fn revision(&self) -> u64 {
        *self.revision.borrow()
    }

    fn changed(&self) {
        self.revision.send_modify(|revision| *revision += 1);
    }

    /// Appends at the end; never reorders or deduplicates.
    pub fn append(&self, message: Message) {
        self.inner.write().messages.push(message);
        self.changed();
    }

    pub fn replace_all(&self, messages: Vec<Message>) {
        self.inner.write().messages = messages;
        self.changed();
    }

    /// Replaces the log unless that would drop messages; one write lock covers
    /// both the length check and the swap.
    pub fn replace_all_if_not_shorter(&self, messages: Vec<Message>) -> bool {
        {
            let mut inner = self.inner.write();
            if messages.len() < inner.messages.len() {
                return false;
            }
            inner.messages = messages;
        }
        self.changed();
        true
    }

    pub fn set_typing(&self, is_typing: bool) {
        {
            let mut inner = self.inner.write();
            if inner.is_typing == is_typing {
                return;
            }
            inner.is_typing = is_typing;
        }
        self.changed();
    }

    pub fn set_emotion(&self, emotion: impl Into<String>) {
        self.inner.write().current_emotion = emotion.into();
        self.changed();
    }

    pub fn mark_failed(&self, id: &str) -> bool {
        let marked = {
            let mut inner = self.inner.write();
            match inner.messages.iter_mut().find(|message| message.id == id) {
                Some(message) => {
                    message.delivery = DeliveryStatus::Failed;
                    true
                }
                None => false,
            }
        };
        if marked {
            self.changed();
        }
        marked
    }

    pub fn clear(&self) {
        *self.inner.write() = ChatSnapshot::default();
        self.changed();
    }

    pub fn messages(&self) -> Vec<Message> {
        self.inner.read().messages.clone()
    }

    pub fn len(&self) -> usize {
        self.inner.read().messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.read().messages.is_empty()
    }

    pub fn is_typing(&self) -> bool {
        self.inner.read().is_typing
    }

    pub fn current_emotion(&self) -> String {
        self.inner.read().current_emotion.clone()
    }

    pub fn snapshot(&self) -> ChatSnapshot {
        self.inner.read().clone()
    }
}

impl Default for MessageStore {
    fn default() -> Self {
        Self::new()
    }
}
