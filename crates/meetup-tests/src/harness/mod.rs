pub mod backend;
pub mod client;

use client::TestChat;
use meetup::chat::{ChatUpdate, ConnectionState};
use meetup::protocol::Message;
use std::time::Duration;

/// Drive `chat` until its log holds at least `count` messages, or timeout.
pub async fn wait_for_messages(chat: &mut TestChat, count: usize, timeout: Duration) -> Vec<Message> {
    let deadline = tokio::time::Instant::now() + timeout;
    while chat.messages().len() < count {
        match tokio::time::timeout_at(deadline, chat.next_update()).await {
            Ok(Some(_)) => continue,
            Ok(None) | Err(_) => break,
        }
    }
    chat.messages().to_vec()
}

/// Drive `chat` until it reaches `state`, or timeout. Returns whether it did.
pub async fn wait_for_state(chat: &mut TestChat, state: ConnectionState, timeout: Duration) -> bool {
    let deadline = tokio::time::Instant::now() + timeout;
    while chat.state() != state {
        match tokio::time::timeout_at(deadline, chat.next_update()).await {
            Ok(Some(_)) => continue,
            Ok(None) | Err(_) => break,
        }
    }
    chat.state() == state
}

/// Drive `chat` until the history fetch has reported, or timeout.
pub async fn wait_for_history(chat: &mut TestChat, timeout: Duration) -> Option<ChatUpdate> {
    let deadline = tokio::time::Instant::now() + timeout;
    loop {
        match tokio::time::timeout_at(deadline, chat.next_update()).await {
            Ok(Some(update @ (ChatUpdate::HistoryLoaded { .. } | ChatUpdate::HistoryFailed(_)))) => {
                return Some(update);
            }
            Ok(Some(_)) => continue,
            Ok(None) | Err(_) => return None,
        }
    }
}

/// Initialize tracing for tests (only once per process).
pub fn init_tracing() {
    use std::sync::Once;
    static INIT: Once = Once::new();
    INIT.call_once(|| {
        tracing_subscriber::fmt()
            .with_env_filter("meetup=debug,meetup_tests=debug")
            .with_test_writer()
            .try_init()
            .ok();
    });
}
