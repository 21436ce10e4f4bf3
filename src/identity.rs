//! User identifier normalisation.
//!
//! Chat records name people by email or by a legacy username, and room keys
//! are built from whichever form was current when the room was seeded. This
//! module turns those strings into a [`UserIdent`] and resolves them to a
//! canonical email when the evidence allows it.

use std::collections::{HashMap, HashSet};

use once_cell::sync::Lazy;
use regex::Regex;

use crate::api::models::{ChatMessage, DirectoryUser};

static EMAIL_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^[^@\s]+@[^@\s]+\.[^@\s]+$").expect("email pattern is valid")
});

pub fn is_email_shaped(raw: &str) -> bool {
    EMAIL_RE.is_match(raw.trim())
}

/// Case-insensitive comparison key for any identifier.
pub fn fold(raw: &str) -> String {
    raw.trim().to_lowercase()
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum UserIdent {
    Email(String),
    LegacyUsername(String),
    Unresolved(String),
}

impl UserIdent {
    pub fn parse(raw: &str) -> Self {
        let trimmed = raw.trim();
        if is_email_shaped(trimmed) {
            UserIdent::Email(trimmed.to_lowercase())
        } else if !trimmed.is_empty()
            && !trimmed.contains('@')
            && !trimmed.chars().any(char::is_whitespace)
        {
            UserIdent::LegacyUsername(trimmed.to_string())
        } else {
            UserIdent::Unresolved(trimmed.to_string())
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            UserIdent::Email(s) | UserIdent::LegacyUsername(s) | UserIdent::Unresolved(s) => s,
        }
    }
}

/// The signed-in user. The email is canonical; the username is only known
/// for accounts that predate email identifiers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Identity {
    email: String,
    username: Option<String>,
}

impl Identity {
    pub fn new(email: &str, username: Option<&str>) -> Self {
        let email = fold(email);
        let username = username
            .map(str::trim)
            .filter(|u| !u.is_empty() && fold(u) != email)
            .map(str::to_string);
        Self { email, username }
    }

    pub fn email(&self) -> &str {
        &self.email
    }

    pub fn username(&self) -> Option<&str> {
        self.username.as_deref()
    }

    pub fn matches(&self, raw: &str) -> bool {
        let key = fold(raw);
        !key.is_empty()
            && (key == self.email || self.username.as_deref().is_some_and(|u| fold(u) == key))
    }

    pub fn involved_in(&self, msg: &ChatMessage) -> bool {
        self.matches(&msg.sender_id) || self.matches(&msg.receiver_id)
    }

    pub fn is_receiver(&self, msg: &ChatMessage) -> bool {
        self.matches(&msg.receiver_id)
    }

    /// The participant of `msg` that is not this user. A note to self
    /// reports the receiver.
    pub fn other_party<'a>(&self, msg: &'a ChatMessage) -> &'a str {
        if self.matches(&msg.sender_id) {
            &msg.receiver_id
        } else {
            &msg.sender_id
        }
    }
}

/// Room key for two participants: lower-cased, sorted, hyphen-joined.
pub fn room_key(a: &str, b: &str) -> String {
    let (a, b) = (fold(a), fold(b));
    if a <= b { format!("{a}-{b}") } else { format!("{b}-{a}") }
}

fn room_segments(key: &str) -> Option<(String, String)> {
    let segments: Vec<&str> = key.trim().split('-').collect();
    match segments.as_slice() {
        [a, b] if is_email_shaped(a) && is_email_shaped(b) => Some((fold(a), fold(b))),
        _ => None,
    }
}

pub fn is_well_formed_room(key: &str) -> bool {
    room_segments(key).is_some()
}

/// User directory indexed by folded email and username.
#[derive(Debug, Clone, Default)]
pub struct Directory {
    users: Vec<DirectoryUser>,
    index: HashMap<String, usize>,
}

impl Directory {
    pub fn new(users: Vec<DirectoryUser>) -> Self {
        let mut index = HashMap::new();
        for (idx, user) in users.iter().enumerate() {
            for key in [&user.email, &user.user_name].into_iter().flatten() {
                index.entry(fold(key)).or_insert(idx);
            }
        }
        Self { users, index }
    }

    pub fn lookup(&self, raw: &str) -> Option<&DirectoryUser> {
        self.index.get(&fold(raw)).map(|&i| &self.users[i])
    }

    pub fn users(&self) -> &[DirectoryUser] {
        &self.users
    }

    pub fn display_name(&self, raw: &str) -> Option<&str> {
        self.lookup(raw).and_then(DirectoryUser::label)
    }
}

/// Local part of an email.
fn local_part(email: &str) -> &str {
    email.split_once('@').map_or(email, |(local, _)| local)
}

/// Maps identifiers to canonical emails. Built once per derivation from the
/// directory and from message evidence that ties a legacy name to an email.
#[derive(Debug, Default)]
pub struct Resolver {
    emails: HashMap<String, String>,
    /// Legacy name for emails resolved from message evidence alone.
    aliases: HashMap<String, String>,
}

impl Resolver {
    pub fn build<'a, I>(identity: &Identity, directory: &Directory, messages: I) -> Self
    where
        I: IntoIterator<Item = &'a ChatMessage>,
    {
        let mut emails = HashMap::new();
        for user in directory.users() {
            if let Some(email) = user.email.as_deref().filter(|e| is_email_shaped(e)) {
                emails.insert(fold(email), fold(email));
                if let Some(name) = &user.user_name {
                    emails.entry(fold(name)).or_insert_with(|| fold(email));
                }
            }
        }

        // Evidence is a counterpart email seen directly, or the other segment
        // of a well-formed room that includes the current user. Either only
        // counts for a legacy name equal to the email's local part.
        let mut legacy: HashMap<String, String> = HashMap::new();
        let mut seen_emails: HashSet<String> = HashSet::new();
        for msg in messages {
            let raw = identity.other_party(msg).trim();
            let other = fold(raw);
            if other.is_empty() {
                continue;
            }
            if is_email_shaped(&other) {
                seen_emails.insert(other);
            } else if !emails.contains_key(&other) {
                legacy.entry(other).or_insert_with(|| raw.to_string());
            }
            if let Some((a, b)) = room_segments(&msg.chat_room_id) {
                if a == identity.email() {
                    seen_emails.insert(b);
                } else if b == identity.email() {
                    seen_emails.insert(a);
                }
            }
        }

        let mut aliases = HashMap::new();
        for (name, raw) in legacy {
            let candidates: HashSet<&String> = seen_emails
                .iter()
                .filter(|email| local_part(email) == name)
                // An email the directory gives to someone else is not this person.
                .filter(|email| {
                    !directory
                        .lookup(email)
                        .and_then(|u| u.user_name.as_deref())
                        .is_some_and(|owner| fold(owner) != name)
                })
                .collect();
            let mut candidates = candidates.into_iter();
            match (candidates.next(), candidates.next()) {
                (Some(email), None) => {
                    emails.insert(name, email.clone());
                    aliases.insert(email.clone(), raw);
                }
                (Some(_), Some(_)) => log::debug!("identifier {name} has conflicting email anchors; left unresolved"),
                (None, _) => {}
            }
        }

        Self { emails, aliases }
    }

    pub fn resolve(&self, raw: &str) -> UserIdent {
        match UserIdent::parse(raw) {
            UserIdent::Email(e) => UserIdent::Email(e),
            other => match self.emails.get(&fold(raw)) {
                Some(email) => UserIdent::Email(email.clone()),
                None => other,
            },
        }
    }

    /// The legacy name `email` was matched from, when no directory entry
    /// was involved.
    pub fn alias(&self, email: &str) -> Option<&str> {
        self.aliases.get(&fold(email)).map(String::as_str)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn msg(sender: &str, receiver: &str, room: &str) -> ChatMessage {
        ChatMessage {
            id: format!("{sender}>{receiver}@{room}"),
            sender_id: sender.into(),
            receiver_id: receiver.into(),
            chat_room_id: room.into(),
            ..Default::default()
        }
    }

    fn user(email: &str, name: &str) -> DirectoryUser {
        DirectoryUser {
            email: Some(email.into()),
            user_name: Some(name.into()),
            display_name: None,
        }
    }

    #[test]
    fn parses_identifier_kinds() {
        assert_eq!(UserIdent::parse(" Bob@X.com "), UserIdent::Email("bob@x.com".into()));
        assert_eq!(UserIdent::parse("bob"), UserIdent::LegacyUsername("bob".into()));
        assert_eq!(UserIdent::parse("bob@"), UserIdent::Unresolved("bob@".into()));
        assert_eq!(UserIdent::parse("two words"), UserIdent::Unresolved("two words".into()));
        assert_eq!(UserIdent::parse(""), UserIdent::Unresolved(String::new()));
    }

    #[test]
    fn identity_matches_either_identifier_case_insensitively() {
        let me = Identity::new("A@x.com", Some("Alice"));
        assert!(me.matches("a@X.COM"));
        assert!(me.matches("alice"));
        assert!(!me.matches("bob"));
        assert!(!me.matches(""));
        assert_eq!(me.other_party(&msg("alice", "bob", "")), "bob");
        assert_eq!(me.other_party(&msg("bob", "a@x.com", "")), "bob");
    }

    #[test]
    fn username_equal_to_email_is_dropped() {
        let me = Identity::new("a@x.com", Some("A@x.com"));
        assert_eq!(me.username(), None);
    }

    #[test]
    fn room_keys_are_sorted_and_checked() {
        assert_eq!(room_key("Bob@x.com", "a@x.com"), "a@x.com-bob@x.com");
        assert!(is_well_formed_room("a@x.com-bob@x.com"));
        assert!(!is_well_formed_room("bob-a@x.com"));
        assert!(!is_well_formed_room("a@x.com"));
        assert!(!is_well_formed_room("a@x.com-b@x.com-c@x.com"));
    }

    #[test]
    fn directory_resolves_legacy_names() {
        let me = Identity::new("a@x.com", None);
        let dir = Directory::new(vec![user("bob@x.com", "bob")]);
        let resolver = Resolver::build(&me, &dir, std::iter::empty());
        assert_eq!(resolver.resolve("BOB"), UserIdent::Email("bob@x.com".into()));
        assert_eq!(resolver.resolve("carol"), UserIdent::LegacyUsername("carol".into()));
    }

    #[test]
    fn room_anchor_resolves_legacy_name() {
        let me = Identity::new("a@x.com", None);
        let msgs = [msg("Bob", "a@x.com", "a@x.com-bob@x.com")];
        let resolver = Resolver::build(&me, &Directory::default(), &msgs);
        assert_eq!(resolver.resolve("bob"), UserIdent::Email("bob@x.com".into()));
        assert_eq!(resolver.alias("bob@x.com"), Some("Bob"));
    }

    #[test]
    fn direct_email_use_resolves_legacy_name() {
        let me = Identity::new("a@x.com", None);
        let msgs = [msg("bob", "a@x.com", "bob-a@x.com"), msg("a@x.com", "bob@x.com", "")];
        let resolver = Resolver::build(&me, &Directory::default(), &msgs);
        assert_eq!(resolver.resolve("bob"), UserIdent::Email("bob@x.com".into()));
    }

    #[test]
    fn conflicting_anchors_stay_unresolved() {
        let me = Identity::new("a@x.com", None);
        let msgs = [
            msg("bob", "a@x.com", "a@x.com-bob@x.com"),
            msg("bob", "a@x.com", "a@x.com-bob@y.com"),
        ];
        let resolver = Resolver::build(&me, &Directory::default(), &msgs);
        assert_eq!(resolver.resolve("bob"), UserIdent::LegacyUsername("bob".into()));
        assert_eq!(resolver.alias("bob@x.com"), None);
    }

    #[test]
    fn unrelated_room_is_not_an_anchor() {
        let me = Identity::new("a@x.com", None);
        let msgs = [msg("bob", "a@x.com", "a@x.com-carol@x.com")];
        let resolver = Resolver::build(&me, &Directory::default(), &msgs);
        assert_eq!(resolver.resolve("bob"), UserIdent::LegacyUsername("bob".into()));
    }

    #[test]
    fn anchor_to_someone_elses_email_is_rejected() {
        let me = Identity::new("a@x.com", None);
        let dir = Directory::new(vec![user("bob@x.com", "robert")]);
        let msgs = [msg("bob", "a@x.com", "a@x.com-bob@x.com")];
        let resolver = Resolver::build(&me, &dir, &msgs);
        assert_eq!(resolver.resolve("bob"), UserIdent::LegacyUsername("bob".into()));
    }
}
