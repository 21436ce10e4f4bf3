//! Messaging client for the Orchid community board.
//!
//! The backend stores chats as flat records with inconsistent participant
//! identifiers. [`conversations`] folds them into one conversation per
//! participant pair, and [`live`] keeps the open conversation current from
//! the server's event stream.

pub mod api;
pub mod app;
pub mod conversations;
pub mod error;
pub mod identity;
pub mod live;
pub mod storage;
pub mod ui;
pub mod utils;

pub use error::{ClientError, Result};
