use std::fmt::Write as _;

use crate::api::models::ChatMessage;
use crate::identity::Identity;
use crate::live::ConversationView;

pub fn render_message(msg: &ChatMessage, identity: &Identity, other_name: &str) -> String {
    let when = msg
        .timestamp()
        .map(|t| t.format("%Y-%m-%d %H:%M").to_string())
        .unwrap_or_else(|| "--".to_string());
    let who = if identity.matches(&msg.sender_id) { "me" } else { other_name };
    format!("[{when}] {who}: {}", msg.message)
}

pub fn render(view: &ConversationView, identity: &Identity, other_name: &str) -> String {
    if view.messages().is_empty() {
        return format!("No messages with {other_name} yet. Say hello!\n");
    }
    let mut out = String::new();
    for msg in view.messages() {
        let _ = writeln!(out, "{}", render_message(msg, identity, other_name));
    }
    out
}
