use std::cmp::Reverse;
use std::fmt::Write as _;

use crate::conversations::Conversation;
use crate::utils::preview;

const PREVIEW_CHARS: usize = 48;

/// Orders conversations for display: new (preview-less) ones first, then by
/// newest received message.
pub fn sorted(items: &[Conversation]) -> Vec<&Conversation> {
    let mut list: Vec<&Conversation> = items.iter().collect();
    list.sort_by_key(|c| {
        let ts = c.last_message.as_ref().and_then(|m| m.timestamp());
        (c.last_message.is_some(), Reverse(ts))
    });
    list
}

pub fn render(items: &[Conversation]) -> String {
    if items.is_empty() {
        return "No conversations yet.\n".to_string();
    }
    let mut out = String::new();
    for conv in sorted(items) {
        let unread = if conv.unread_count > 0 {
            format!(" ({} unread)", conv.unread_count)
        } else {
            String::new()
        };
        let _ = writeln!(out, "{}{}  [{}]", conv.other_user_name, unread, conv.id);
        if let Some(last) = &conv.last_message {
            let _ = writeln!(out, "    {}", preview(&last.message, PREVIEW_CHARS));
        }
    }
    out
}
