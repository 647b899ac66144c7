//! Client-side message synchronization for two-party chat.
//!
//! [`conversations::ConversationCache`] holds one ordered, de-duplicated
//! message list per conversation. [`history::HistoryLoader`] fills it from the
//! REST [`backend::Backend`], and [`bridge::LiveBridge`] keeps the open
//! conversation current from a [`transport::PushTransport`].

pub mod backend;
pub mod bridge;
pub mod config;
pub mod conversations;
pub mod error;
pub mod history;
pub mod logging;
pub mod transport;

pub use bridge::{BridgeState, LiveBridge};
pub use error::{Result, SyncError};
