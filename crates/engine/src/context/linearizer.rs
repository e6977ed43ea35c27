//! Branch reconstruction from a parent-pointer message tree.
//!
//! Messages live in a flat arena indexed by id. A branch is found by walking
//! `parent_id` links upward from a leaf until a message is missing or the
//! root is reached, then reversing the walk so the result reads
//! oldest → newest.

use chatweave_core::error::ContextError;
use chatweave_core::message::Message;
use std::collections::{HashMap, HashSet};
use tracing::{debug, warn};

/// Flat, append-only store of one conversation's messages, keyed by id.
#[derive(Debug, Default, Clone)]
pub struct MessageArena {
    messages: Vec<Message>,
    index: HashMap<String, usize>,
}

impl MessageArena {
    /// Build the arena. When an id appears more than once the first record
    /// wins.
    pub fn new(messages: Vec<Message>) -> Self {
        let mut arena = Self::default();
        for message in messages {
            arena.push(message);
        }
        arena
    }

    /// Append a message. Returns `false` if the id was already present.
    pub fn push(&mut self, message: Message) -> bool {
        if self.index.contains_key(&message.id) {
            warn!(message_id = %message.id, "Duplicate message id, keeping first record");
            return false;
        }
        self.index.insert(message.id.clone(), self.messages.len());
        self.messages.push(message);
        true
    }

    pub fn get(&self, id: &str) -> Option<&Message> {
        self.index.get(id).map(|&i| &self.messages[i])
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Message> {
        self.messages.iter()
    }

    /// The branch ending at `leaf_id`, oldest first.
    ///
    /// An absent or unknown leaf yields an empty branch. A parent chain that
    /// revisits a message fails with [`ContextError::MalformedHistory`].
    pub fn linearize(&self, leaf_id: Option<&str>) -> Result<Vec<&Message>, ContextError> {
        self.linearize_with(leaf_id, |message| message)
    }

    /// Like [`linearize`](Self::linearize), mapping each message as it is
    /// ordered.
    pub fn linearize_with<'a, T, F>(
        &'a self,
        leaf_id: Option<&str>,
        mut map: F,
    ) -> Result<Vec<T>, ContextError>
    where
        F: FnMut(&'a Message) -> T,
    {
        let mut chain: Vec<&'a Message> = Vec::new();
        let mut visited: HashSet<&str> = HashSet::new();
        let mut current = leaf_id;

        while let Some(id) = current {
            let Some(message) = self.get(id) else {
                if !chain.is_empty() {
                    debug!(parent_id = id, "Parent not in conversation, treating as root");
                }
                break;
            };

            if !visited.insert(message.id.as_str()) {
                return Err(ContextError::MalformedHistory {
                    message_id: message.id.clone(),
                    reason: format!("cycle detected after {} messages", chain.len()),
                });
            }

            chain.push(message);
            current = message.parent();
        }

        Ok(chain.into_iter().rev().map(&mut map).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chatweave_core::message::{ConversationId, PromptMessage};

    fn thread(len: usize) -> Vec<Message> {
        let conv = ConversationId::from("c");
        let mut messages = Vec::new();
        let mut parent: Option<String> = None;
        for i in 0..len {
            let text = format!("turn {i}");
            let message = if i % 2 == 0 {
                Message::user(&conv, parent.as_deref(), text)
            } else {
                Message::assistant(&conv, parent.as_deref(), text)
            }
            .with_id(format!("m{i}"));
            parent = Some(message.id.clone());
            messages.push(message);
        }
        messages
    }

    #[test]
    fn walks_leaf_to_root_and_reverses() {
        let arena = MessageArena::new(thread(4));
        let branch = arena.linearize(Some("m3")).unwrap();
        let ids: Vec<&str> = branch.iter().map(|m| m.id.as_str()).collect();
        assert_eq!(ids, ["m0", "m1", "m2", "m3"]);
    }

    #[test]
    fn follows_only_the_selected_branch() {
        let conv = ConversationId::from("c");
        let mut messages = thread(3);
        // Regenerated reply to m1 forms a sibling branch.
        messages.push(Message::assistant(&conv, Some("m1"), "alt").with_id("alt"));
        let arena = MessageArena::new(messages);

        let ids: Vec<String> = arena
            .linearize_with(Some("alt"), |m| m.id.clone())
            .unwrap();
        assert_eq!(ids, ["m0", "m1", "alt"]);
    }

    #[test]
    fn missing_or_unknown_leaf_is_empty() {
        let arena = MessageArena::new(thread(3));
        assert!(arena.linearize(None).unwrap().is_empty());
        assert!(arena.linearize(Some("nope")).unwrap().is_empty());
        assert!(MessageArena::default().linearize(Some("m0")).unwrap().is_empty());
    }

    #[test]
    fn missing_parent_stops_the_walk() {
        let conv = ConversationId::from("c");
        let messages = vec![
            Message::user(&conv, Some("gone"), "orphan").with_id("a"),
            Message::assistant(&conv, Some("a"), "reply").with_id("b"),
        ];
        let arena = MessageArena::new(messages);
        assert_eq!(arena.linearize(Some("b")).unwrap().len(), 2);
    }

    #[test]
    fn cycle_is_malformed_history() {
        let conv = ConversationId::from("c");
        let messages = vec![
            Message::user(&conv, Some("b"), "one").with_id("a"),
            Message::assistant(&conv, Some("a"), "two").with_id("b"),
        ];
        let arena = MessageArena::new(messages);
        let err = arena.linearize(Some("b")).unwrap_err();
        assert!(matches!(err, ContextError::MalformedHistory { .. }));
    }

    #[test]
    fn self_parent_is_malformed_history() {
        let conv = ConversationId::from("c");
        let arena = MessageArena::new(vec![Message::user(&conv, Some("a"), "x").with_id("a")]);
        assert!(arena.linearize(Some("a")).is_err());
    }

    #[test]
    fn duplicate_ids_keep_first_record() {
        let conv = ConversationId::from("c");
        let arena = MessageArena::new(vec![
            Message::user(&conv, None, "first").with_id("a"),
            Message::user(&conv, None, "second").with_id("a"),
        ]);
        assert_eq!(arena.len(), 1);
        assert_eq!(arena.get("a").unwrap().text, "first");
    }

    #[test]
    fn mapping_reshapes_without_side_effects() {
        let arena = MessageArena::new(thread(2));
        let formatted: Vec<PromptMessage> = arena
            .linearize_with(Some("m1"), |m| PromptMessage::new(m.role, m.text.clone()))
            .unwrap();
        assert_eq!(formatted[0].content, "turn 0");
        assert_eq!(formatted[1].content, "turn 1");
        assert_eq!(arena.len(), 2);
    }

    #[test]
    fn linearization_is_deterministic() {
        let arena = MessageArena::new(thread(6));
        let a = arena.linearize_with(Some("m5"), |m| m.id.clone()).unwrap();
        let b = arena.linearize_with(Some("m5"), |m| m.id.clone()).unwrap();
        assert_eq!(a, b);
    }
}
