pub mod chat_view;
pub mod login;
pub mod sidebar;
