//! Derives sidebar conversations from flat chat records.

use std::collections::HashMap;

use serde::Serialize;

use crate::api::models::ChatMessage;
use crate::identity::{Directory, Identity, Resolver, UserIdent, fold, is_well_formed_room, room_key};

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Conversation {
    /// Normalised room key.
    pub id: String,
    pub other_user_id: String,
    pub other_user_name: String,
    /// Newest message the current user received.
    pub last_message: Option<ChatMessage>,
    pub unread_count: usize,
}

impl Conversation {
    fn empty(id: String, other_user_id: String, other_user_name: String) -> Self {
        Self {
            id,
            other_user_id,
            other_user_name,
            last_message: None,
            unread_count: 0,
        }
    }
}

struct Counterpart {
    key: String,
    user_id: String,
    name: String,
}

fn counterpart(identity: &Identity, resolver: &Resolver, directory: &Directory, raw_other: &str, room: &str) -> Counterpart {
    match resolver.resolve(raw_other) {
        UserIdent::Email(email) => {
            let key = if is_well_formed_room(room) && fold(room) == room_key(identity.email(), &email) {
                fold(room)
            } else {
                room_key(identity.email(), &email)
            };
            let name = directory
                .display_name(&email)
                .or_else(|| directory.display_name(raw_other))
                .or_else(|| resolver.alias(&email))
                .map_or_else(|| email.clone(), str::to_string);
            Counterpart { key, user_id: email, name }
        }
        unresolved => {
            let raw = unresolved.as_str().to_string();
            let name = directory
                .display_name(&raw)
                .map_or_else(|| raw.clone(), str::to_string);
            Counterpart {
                key: room_key(identity.email(), &raw),
                user_id: raw,
                name,
            }
        }
    }
}

/// Groups every record involving `identity` into one conversation per
/// participant pair, in first-seen order.
pub fn derive_conversations(messages: &[ChatMessage], identity: &Identity, directory: &Directory) -> Vec<Conversation> {
    let mine: Vec<&ChatMessage> = messages.iter().filter(|m| identity.involved_in(m)).collect();
    let resolver = Resolver::build(identity, directory, mine.iter().copied());

    let mut out: Vec<Conversation> = Vec::new();
    let mut slots: HashMap<String, usize> = HashMap::new();

    for msg in mine {
        let other = counterpart(identity, &resolver, directory, identity.other_party(msg), &msg.chat_room_id);
        let idx = *slots.entry(other.key.clone()).or_insert_with(|| {
            out.push(Conversation::empty(other.key.clone(), other.user_id.clone(), other.name.clone()));
            out.len() - 1
        });
        let conv = &mut out[idx];

        if !identity.is_receiver(msg) {
            continue;
        }
        if !msg.is_read {
            conv.unread_count += 1;
        }
        let newer = match &conv.last_message {
            None => true,
            Some(current) => msg.timestamp() >= current.timestamp(),
        };
        if newer {
            conv.last_message = Some(msg.clone());
        }
    }

    out
}

/// The records of `messages` that derive to the conversation keyed `key`,
/// whatever room id they were stored under.
pub fn conversation_messages(messages: &[ChatMessage], identity: &Identity, directory: &Directory, key: &str) -> Vec<ChatMessage> {
    let mine: Vec<&ChatMessage> = messages.iter().filter(|m| identity.involved_in(m)).collect();
    let resolver = Resolver::build(identity, directory, mine.iter().copied());
    mine.into_iter()
        .filter(|m| counterpart(identity, &resolver, directory, identity.other_party(m), &m.chat_room_id).key == key)
        .cloned()
        .collect()
}

/// Finds the conversation with `other`, inserting an empty one at the front
/// when this is the first contact. Returns its index. `messages` should be
/// the records `list` was derived from, so `other` resolves the same way.
pub fn ensure_conversation(
    list: &mut Vec<Conversation>,
    identity: &Identity,
    other: &str,
    directory: &Directory,
    messages: &[ChatMessage],
) -> usize {
    let mine = messages.iter().filter(|m| identity.involved_in(m));
    let resolver = Resolver::build(identity, directory, mine);
    let target = counterpart(identity, &resolver, directory, other, "");
    if let Some(idx) = list.iter().position(|c| c.id == target.key) {
        return idx;
    }
    log::info!("starting new conversation {}", target.key);
    list.insert(0, Conversation::empty(target.key, target.user_id, target.name));
    0
}

/// Locates a conversation by room key, participant id or display name.
pub fn find_conversation<'a>(list: &'a [Conversation], needle: &str) -> Option<&'a Conversation> {
    let key = fold(needle);
    list.iter().find(|c| fold(&c.id) == key || fold(&c.other_user_id) == key || fold(&c.other_user_name) == key)
}
