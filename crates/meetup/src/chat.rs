//! Live chat sessions for activity rooms.
//!
//! A [`ChatSessionManager`] owns at most one session. State only changes
//! inside `&mut self` methods: callers drive inbound traffic by awaiting
//! [`ChatSessionManager::next_update`], which applies one subscription event
//! or one history result at a time.

use crate::cable::{ChannelEvent, ChannelTransport, Subscription};
use crate::client::{ApiRequest, Transport};
use crate::error::{ClientError, ClientResult};
use crate::protocol::{ChannelParams, Message, MessageId, SEND_MESSAGE_ACTION};
use crate::token::TokenStore;
use std::collections::HashSet;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

/// Connection state of a chat session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ConnectionState {
    #[default]
    Idle,
    Connecting,
    Connected,
    Disconnected,
}

impl ConnectionState {
    /// Next state after `event`, or `None` if the event does not move the machine.
    fn on_event(self, event: &ChannelEvent) -> Option<ConnectionState> {
        match (self, event) {
            (ConnectionState::Connecting | ConnectionState::Disconnected, ChannelEvent::Connected) => {
                Some(ConnectionState::Connected)
            }
            (
                ConnectionState::Idle | ConnectionState::Connecting | ConnectionState::Connected,
                ChannelEvent::Disconnected | ChannelEvent::Rejected,
            ) => Some(ConnectionState::Disconnected),
            _ => None,
        }
    }
}

/// Identity of a session: which room, for which user.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SessionKey {
    pub room_id: i64,
    pub subscriber_id: i64,
}

/// Result of [`ChatSessionManager::send`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SendOutcome {
    /// Handed to the transport; the message shows up via the subscription.
    Sent,
    /// Text was empty after trimming; nothing was sent.
    Empty,
    /// No connected session.
    NotConnected,
}

/// What changed after one step of [`ChatSessionManager::next_update`].
#[derive(Debug, Clone, PartialEq)]
pub enum ChatUpdate {
    State(ConnectionState),
    Message(Message),
    /// History merged into the log. `added` holds the history entries that
    /// were not already there, in server order.
    HistoryLoaded { added: Vec<Message> },
    HistoryFailed(String),
}

struct HistoryResult {
    key: SessionKey,
    epoch: u64,
    result: ClientResult<Vec<Message>>,
}

struct ChatSession {
    key: SessionKey,
    epoch: u64,
    state: ConnectionState,
    messages: Vec<Message>,
    seen: HashSet<MessageId>,
    subscription: Subscription,
    events_open: bool,
    history: Option<JoinHandle<()>>,
}

impl ChatSession {
    fn push(&mut self, message: Message) -> bool {
        if !self.seen.insert(message.id.clone()) {
            return false;
        }
        self.messages.push(message);
        true
    }

    fn shutdown(&mut self) {
        self.subscription.unsubscribe();
        if let Some(task) = self.history.take() {
            task.abort();
        }
        self.events_open = false;
        self.state = ConnectionState::Disconnected;
    }
}

/// Owns the live chat session for one room at a time.
pub struct ChatSessionManager<T, C> {
    api: T,
    channel: C,
    tokens: Arc<dyn TokenStore>,
    session: Option<ChatSession>,
    epoch: u64,
    history_tx: mpsc::UnboundedSender<HistoryResult>,
    history_rx: mpsc::UnboundedReceiver<HistoryResult>,
}

enum Step {
    Event(Option<ChannelEvent>),
    History(HistoryResult),
}

impl<T: Transport, C: ChannelTransport> ChatSessionManager<T, C> {
    pub fn new(api: T, channel: C, tokens: Arc<dyn TokenStore>) -> Self {
        let (history_tx, history_rx) = mpsc::unbounded_channel();
        Self {
            api,
            channel,
            tokens,
            session: None,
            epoch: 0,
            history_tx,
            history_rx,
        }
    }

    pub fn state(&self) -> ConnectionState {
        self.session
            .as_ref()
            .map_or(ConnectionState::Idle, |s| s.state)
    }

    pub fn key(&self) -> Option<SessionKey> {
        self.session.as_ref().map(|s| s.key)
    }

    /// The transcript, in arrival order.
    pub fn messages(&self) -> &[Message] {
        self.session.as_ref().map_or(&[], |s| s.messages.as_slice())
    }

    /// Open the session for `room_id` as `subscriber_id`.
    ///
    /// Any session for a different room or subscriber is closed first.
    /// Reopening the same pair is a no-op unless that session disconnected.
    pub fn open(&mut self, room_id: i64, subscriber_id: i64) -> ClientResult<()> {
        if self.tokens.token().is_none() {
            return Err(ClientError::NotAuthenticated);
        }

        let key = SessionKey {
            room_id,
            subscriber_id,
        };
        if let Some(current) = &self.session
            && current.key == key
            && current.state != ConnectionState::Disconnected
        {
            return Ok(());
        }
        self.close();

        self.epoch += 1;
        let epoch = self.epoch;
        let params = ChannelParams::activity(room_id);
        let subscription = self.channel.subscribe(&params)?;
        tracing::info!(room = room_id, subscriber = subscriber_id, "chat session opening");

        let api = self.api.clone();
        let tx = self.history_tx.clone();
        let history = tokio::spawn(async move {
            let result = fetch_history(&api, room_id).await;
            let _ = tx.send(HistoryResult { key, epoch, result });
        });

        self.session = Some(ChatSession {
            key,
            epoch,
            state: ConnectionState::Connecting,
            messages: Vec::new(),
            seen: HashSet::new(),
            subscription,
            events_open: true,
            history: Some(history),
        });
        Ok(())
    }

    /// Send `text` to the room. The message is not added locally; it arrives
    /// back through the subscription like everyone else's.
    pub fn send(&mut self, text: &str) -> SendOutcome {
        if text.trim().is_empty() {
            return SendOutcome::Empty;
        }
        let Some(session) = self.session.as_mut() else {
            return SendOutcome::NotConnected;
        };
        if session.state != ConnectionState::Connected {
            return SendOutcome::NotConnected;
        }
        match session
            .subscription
            .perform(SEND_MESSAGE_ACTION, serde_json::json!({ "body": text }))
        {
            Ok(()) => SendOutcome::Sent,
            Err(e) => {
                tracing::warn!(room = session.key.room_id, err = %e, "chat send failed");
                session.state = ConnectionState::Disconnected;
                SendOutcome::NotConnected
            }
        }
    }

    /// Close the session and drop its transcript. Safe to call repeatedly.
    pub fn close(&mut self) {
        let Some(session) = self.session.as_mut() else {
            return;
        };
        let was_live = session.events_open || session.history.is_some();
        session.shutdown();
        session.messages.clear();
        session.seen.clear();
        if was_live {
            tracing::info!(room = session.key.room_id, "chat session closed");
        }
    }

    /// Wait for and apply the next inbound change.
    ///
    /// Returns `None` when there is no session or nothing more can arrive.
    pub async fn next_update(&mut self) -> Option<ChatUpdate> {
        loop {
            let step = {
                let session = self.session.as_mut()?;
                let history_pending = session.history.is_some();
                if !session.events_open && !history_pending {
                    return None;
                }
                let events_open = session.events_open;
                tokio::select! {
                    ev = session.subscription.next_event(), if events_open => Step::Event(ev),
                    Some(h) = self.history_rx.recv(), if history_pending => Step::History(h),
                }
            };

            let update = match step {
                Step::Event(ev) => self.apply_event(ev),
                Step::History(h) => self.apply_history(h),
            };
            if update.is_some() {
                return update;
            }
        }
    }

    fn apply_event(&mut self, event: Option<ChannelEvent>) -> Option<ChatUpdate> {
        let session = self.session.as_mut()?;
        let Some(event) = event else {
            session.events_open = false;
            if session.state != ConnectionState::Disconnected {
                session.state = ConnectionState::Disconnected;
                return Some(ChatUpdate::State(session.state));
            }
            return None;
        };

        match event {
            ChannelEvent::Received(payload) => match serde_json::from_value::<Message>(payload) {
                Ok(message) => {
                    if session.push(message.clone()) {
                        Some(ChatUpdate::Message(message))
                    } else {
                        tracing::debug!(id = %message.id, "duplicate chat message dropped");
                        None
                    }
                }
                Err(e) => {
                    tracing::warn!(room = session.key.room_id, err = %e, "undecodable chat message");
                    None
                }
            },
            other => {
                let next = session.state.on_event(&other)?;
                session.state = next;
                if matches!(other, ChannelEvent::Rejected) {
                    session.subscription.unsubscribe();
                    session.events_open = false;
                }
                tracing::debug!(room = session.key.room_id, state = ?next, "chat state changed");
                Some(ChatUpdate::State(next))
            }
        }
    }

    fn apply_history(&mut self, history: HistoryResult) -> Option<ChatUpdate> {
        let session = self.session.as_mut()?;
        if session.key != history.key || session.epoch != history.epoch {
            tracing::debug!(room = history.key.room_id, "stale history response ignored");
            return None;
        }
        session.history = None;

        match history.result {
            Ok(entries) => {
                // History goes first; anything that arrived live meanwhile keeps its order after it.
                let live = std::mem::take(&mut session.messages);
                let shown = std::mem::take(&mut session.seen);
                let mut added = Vec::new();
                for message in entries {
                    let fresh = !shown.contains(&message.id);
                    if session.push(message.clone()) && fresh {
                        added.push(message);
                    }
                }
                for message in live {
                    session.push(message);
                }
                Some(ChatUpdate::HistoryLoaded { added })
            }
            Err(e) => {
                tracing::warn!(room = session.key.room_id, err = %e, "failed to fetch chat history");
                Some(ChatUpdate::HistoryFailed(e.to_string()))
            }
        }
    }
}

impl<T, C> Drop for ChatSessionManager<T, C> {
    fn drop(&mut self) {
        if let Some(mut session) = self.session.take() {
            session.shutdown();
        }
    }
}

/// Fetch the room's earlier messages. A room nobody has written in yet
/// answers 404, which is an empty history rather than an error.
pub async fn fetch_history<T: Transport>(api: &T, room_id: i64) -> ClientResult<Vec<Message>> {
    let resp = api
        .request(ApiRequest::get(format!("/activities/{room_id}/messages")))
        .await?;
    if resp.status == 404 {
        return Ok(Vec::new());
    }
    resp.ensure_success()?;
    if resp.body.trim().is_empty() || resp.body.trim() == "null" {
        return Ok(Vec::new());
    }
    resp.json()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cable::ChannelCommand;
    use crate::client::ApiResponse;
    use crate::token::MemoryTokenStore;
    use serde_json::json;
    use std::collections::HashMap;
    use std::sync::Mutex;
    use std::time::Duration;
    use tokio::sync::oneshot;

    /// History endpoint fake. Each room's response can be held back until released.
    #[derive(Clone, Default)]
    struct FakeApi {
        responses: Arc<Mutex<HashMap<i64, ApiResponse>>>,
        gates: Arc<Mutex<HashMap<i64, oneshot::Receiver<()>>>>,
        calls: Arc<Mutex<Vec<String>>>,
    }

    impl FakeApi {
        fn respond(&self, room: i64, resp: ApiResponse) {
            self.responses.lock().unwrap().insert(room, resp);
        }

        fn hold(&self, room: i64) -> oneshot::Sender<()> {
            let (tx, rx) = oneshot::channel();
            self.gates.lock().unwrap().insert(room, rx);
            tx
        }
    }

    impl Transport for FakeApi {
        async fn request(&self, req: ApiRequest) -> ClientResult<ApiResponse> {
            self.calls.lock().unwrap().push(req.path.clone());
            let room: i64 = req
                .path
                .trim_start_matches("/activities/")
                .trim_end_matches("/messages")
                .parse()
                .unwrap();
            let gate = self.gates.lock().unwrap().remove(&room);
            if let Some(gate) = gate {
                let _ = gate.await;
            }
            let resp = self.responses.lock().unwrap().get(&room).cloned();
            Ok(resp.unwrap_or_else(|| ApiResponse::new(404, "")))
        }
    }

    /// Channel fake: hands back subscriptions wired to channels the test controls.
    #[derive(Clone, Default)]
    struct FakeChannel {
        inner: Arc<Mutex<FakeChannelInner>>,
    }

    #[derive(Default)]
    struct FakeChannelInner {
        commands: Vec<mpsc::UnboundedReceiver<ChannelCommand>>,
    }

    impl ChannelTransport for FakeChannel {
        fn subscribe(&self, params: &ChannelParams) -> ClientResult<Subscription> {
            let (tx, rx) = mpsc::unbounded_channel();
            self.inner.lock().unwrap().commands.push(rx);
            Subscription::open(params.identifier(), tx)
        }
    }

    impl FakeChannel {
        /// Drain commands of the `n`th subscription, returning the events sender
        /// from its Subscribe command (if not already taken) and the rest.
        fn drain(
            &self,
            n: usize,
        ) -> (
            Option<mpsc::UnboundedSender<ChannelEvent>>,
            Vec<ChannelCommand>,
        ) {
            let mut inner = self.inner.lock().unwrap();
            let rx = &mut inner.commands[n];
            let mut events = None;
            let mut rest = Vec::new();
            while let Ok(cmd) = rx.try_recv() {
                match cmd {
                    ChannelCommand::Subscribe { events: tx, .. } => events = Some(tx),
                    other => rest.push(other),
                }
            }
            (events, rest)
        }

        fn subscriptions(&self) -> usize {
            self.inner.lock().unwrap().commands.len()
        }
    }

    fn message(id: i64, body: &str) -> Message {
        Message {
            id: MessageId::Int(id),
            body: body.to_string(),
            created_at: "2025-05-01T12:00:00Z".to_string(),
            sender: crate::protocol::MessageSender {
                id: 1,
                username: "ana".to_string(),
            },
        }
    }

    fn received(id: i64, body: &str) -> ChannelEvent {
        ChannelEvent::Received(serde_json::to_value(message(id, body)).unwrap())
    }

    fn manager(
        api: FakeApi,
        channel: FakeChannel,
    ) -> ChatSessionManager<FakeApi, FakeChannel> {
        ChatSessionManager::new(api, channel, Arc::new(MemoryTokenStore::with_token("tok")))
    }

    async fn update(mgr: &mut ChatSessionManager<FakeApi, FakeChannel>) -> ChatUpdate {
        tokio::time::timeout(Duration::from_secs(5), mgr.next_update())
            .await
            .expect("update in time")
            .expect("session still live")
    }

    /// Open and consume the (empty) history result so only channel events remain.
    async fn open_connected(
        mgr: &mut ChatSessionManager<FakeApi, FakeChannel>,
        channel: &FakeChannel,
        room: i64,
        n: usize,
    ) -> mpsc::UnboundedSender<ChannelEvent> {
        mgr.open(room, 1).unwrap();
        let (events, _) = channel.drain(n);
        let events = events.unwrap();
        assert_eq!(update(mgr).await, ChatUpdate::HistoryLoaded { added: vec![] });
        events.send(ChannelEvent::Connected).unwrap();
        assert_eq!(
            update(mgr).await,
            ChatUpdate::State(ConnectionState::Connected)
        );
        events
    }

    #[tokio::test]
    async fn open_requires_token() {
        let mut mgr = ChatSessionManager::new(
            FakeApi::default(),
            FakeChannel::default(),
            Arc::new(MemoryTokenStore::new()),
        );
        let err = mgr.open(1, 1).unwrap_err();
        assert!(matches!(err, ClientError::NotAuthenticated));
        assert_eq!(mgr.state(), ConnectionState::Idle);
    }

    #[tokio::test]
    async fn inbound_messages_keep_arrival_order_without_duplicates() {
        let channel = FakeChannel::default();
        let mut mgr = manager(FakeApi::default(), channel.clone());
        let events = open_connected(&mut mgr, &channel, 5, 0).await;

        for (id, body) in [(3, "c"), (1, "a"), (2, "b"), (1, "a again")] {
            events.send(received(id, body)).unwrap();
        }
        for expected in [3, 1, 2] {
            match update(&mut mgr).await {
                ChatUpdate::Message(m) => assert_eq!(m.id, MessageId::Int(expected)),
                other => panic!("expected message, got {other:?}"),
            }
        }

        // the duplicate produces no update; the next real event is what we see
        events.send(ChannelEvent::Disconnected).unwrap();
        assert_eq!(
            update(&mut mgr).await,
            ChatUpdate::State(ConnectionState::Disconnected)
        );

        let bodies: Vec<&str> = mgr.messages().iter().map(|m| m.body.as_str()).collect();
        assert_eq!(bodies, vec!["c", "a", "b"]);
    }

    #[tokio::test]
    async fn history_404_is_empty_log() {
        let channel = FakeChannel::default();
        let mut mgr = manager(FakeApi::default(), channel.clone());
        mgr.open(8, 1).unwrap();
        assert_eq!(mgr.state(), ConnectionState::Connecting);
        assert_eq!(
            update(&mut mgr).await,
            ChatUpdate::HistoryLoaded { added: vec![] }
        );
        assert!(mgr.messages().is_empty());
    }

    #[tokio::test]
    async fn history_merges_before_live_messages() {
        let api = FakeApi::default();
        api.respond(
            4,
            ApiResponse::new(
                200,
                serde_json::to_string(&vec![message(1, "old"), message(2, "older reply")])
                    .unwrap(),
            ),
        );
        let release = api.hold(4);
        let channel = FakeChannel::default();
        let mut mgr = manager(api, channel.clone());
        mgr.open(4, 1).unwrap();

        let (events, _) = channel.drain(0);
        let events = events.unwrap();
        events.send(ChannelEvent::Connected).unwrap();
        events.send(received(2, "older reply")).unwrap();
        events.send(received(3, "live")).unwrap();

        assert_eq!(
            update(&mut mgr).await,
            ChatUpdate::State(ConnectionState::Connected)
        );
        assert!(matches!(update(&mut mgr).await, ChatUpdate::Message(_)));
        assert!(matches!(update(&mut mgr).await, ChatUpdate::Message(_)));

        release.send(()).unwrap();
        assert_eq!(
            update(&mut mgr).await,
            ChatUpdate::HistoryLoaded {
                added: vec![message(1, "old")]
            }
        );
        let bodies: Vec<&str> = mgr.messages().iter().map(|m| m.body.as_str()).collect();
        assert_eq!(bodies, vec!["old", "older reply", "live"]);
    }

    #[tokio::test]
    async fn history_server_error_is_reported() {
        let api = FakeApi::default();
        api.respond(6, ApiResponse::new(500, r#"{"error":"db down"}"#));
        let channel = FakeChannel::default();
        let mut mgr = manager(api, channel);
        mgr.open(6, 1).unwrap();
        match update(&mut mgr).await {
            ChatUpdate::HistoryFailed(msg) => assert!(msg.contains("db down")),
            other => panic!("expected history failure, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn reopening_unsubscribes_previous_session_first() {
        let api = FakeApi::default();
        let channel = FakeChannel::default();
        let mut mgr = manager(api, channel.clone());
        let first_events = open_connected(&mut mgr, &channel, 1, 0).await;

        mgr.open(2, 1).unwrap();
        assert_eq!(channel.subscriptions(), 2);

        let (_, first_cmds) = channel.drain(0);
        assert!(
            first_cmds
                .iter()
                .any(|c| matches!(c, ChannelCommand::Unsubscribe { .. })),
            "first subscription must be released"
        );
        // the old subscription's stream is closed; late events go nowhere
        assert!(first_events.send(received(99, "stale")).is_err());

        let (second_events, _) = channel.drain(1);
        let second_events = second_events.unwrap();
        assert_eq!(
            update(&mut mgr).await,
            ChatUpdate::HistoryLoaded { added: vec![] }
        );
        second_events.send(received(1, "fresh")).unwrap();
        match update(&mut mgr).await {
            ChatUpdate::Message(m) => assert_eq!(m.body, "fresh"),
            other => panic!("expected message, got {other:?}"),
        }
        assert_eq!(mgr.key().unwrap().room_id, 2);
        assert_eq!(mgr.messages().len(), 1);
    }

    #[tokio::test]
    async fn stale_history_does_not_touch_new_session() {
        let channel = FakeChannel::default();
        let mut mgr = manager(FakeApi::default(), channel.clone());

        mgr.open(1, 1).unwrap();
        mgr.close();
        mgr.open(1, 1).unwrap();
        mgr.open(2, 1).unwrap();

        // results for earlier sessions arrive after the switch
        for (room, epoch) in [(1, 1), (1, 2)] {
            mgr.history_tx
                .send(HistoryResult {
                    key: SessionKey {
                        room_id: room,
                        subscriber_id: 1,
                    },
                    epoch,
                    result: Ok(vec![message(7, "room one")]),
                })
                .unwrap();
        }

        assert_eq!(
            update(&mut mgr).await,
            ChatUpdate::HistoryLoaded { added: vec![] }
        );
        assert!(mgr.messages().is_empty());
        assert_eq!(mgr.key().unwrap().room_id, 2);
    }

    #[tokio::test]
    async fn same_pair_open_is_noop() {
        let channel = FakeChannel::default();
        let mut mgr = manager(FakeApi::default(), channel.clone());
        let _events = open_connected(&mut mgr, &channel, 3, 0).await;
        mgr.open(3, 1).unwrap();
        assert_eq!(channel.subscriptions(), 1);
        assert_eq!(mgr.state(), ConnectionState::Connected);
    }

    #[tokio::test]
    async fn blank_text_never_reaches_transport() {
        let channel = FakeChannel::default();
        let mut mgr = manager(FakeApi::default(), channel.clone());
        let _events = open_connected(&mut mgr, &channel, 3, 0).await;

        assert_eq!(mgr.send(""), SendOutcome::Empty);
        assert_eq!(mgr.send("   "), SendOutcome::Empty);
        let (_, cmds) = channel.drain(0);
        assert!(cmds.is_empty());

        assert_eq!(mgr.send("hi all"), SendOutcome::Sent);
        let (_, cmds) = channel.drain(0);
        match cmds.as_slice() {
            [ChannelCommand::Perform { data, .. }] => {
                assert_eq!(data, &json!({"action": "send_message", "body": "hi all"}));
            }
            other => panic!("expected one perform, got {other:?}"),
        }
        // not appended locally
        assert!(mgr.messages().is_empty());
    }

    #[tokio::test]
    async fn send_before_connected_reports_not_connected() {
        let channel = FakeChannel::default();
        let mut mgr = manager(FakeApi::default(), channel.clone());
        assert_eq!(mgr.send("hello"), SendOutcome::NotConnected);

        mgr.open(3, 1).unwrap();
        assert_eq!(mgr.send("hello"), SendOutcome::NotConnected);
        let (_, cmds) = channel.drain(0);
        assert!(cmds.is_empty());
    }

    #[tokio::test]
    async fn close_is_idempotent() {
        let channel = FakeChannel::default();
        let mut mgr = manager(FakeApi::default(), channel.clone());
        let _events = open_connected(&mut mgr, &channel, 3, 0).await;

        mgr.close();
        mgr.close();
        assert_eq!(mgr.state(), ConnectionState::Disconnected);
        assert!(mgr.messages().is_empty());
        assert!(mgr.next_update().await.is_none());

        let (_, cmds) = channel.drain(0);
        let unsubscribes = cmds
            .iter()
            .filter(|c| matches!(c, ChannelCommand::Unsubscribe { .. }))
            .count();
        assert_eq!(unsubscribes, 1);
    }

    #[tokio::test]
    async fn rejected_subscription_disconnects_and_reopen_works() {
        let channel = FakeChannel::default();
        let mut mgr = manager(FakeApi::default(), channel.clone());
        mgr.open(3, 1).unwrap();
        let (events, _) = channel.drain(0);
        assert_eq!(
            update(&mut mgr).await,
            ChatUpdate::HistoryLoaded { added: vec![] }
        );

        events.unwrap().send(ChannelEvent::Rejected).unwrap();
        assert_eq!(
            update(&mut mgr).await,
            ChatUpdate::State(ConnectionState::Disconnected)
        );
        assert!(mgr.next_update().await.is_none());

        // caller reopens explicitly
        mgr.open(3, 1).unwrap();
        assert_eq!(mgr.state(), ConnectionState::Connecting);
        assert_eq!(channel.subscriptions(), 2);
    }

    #[test]
    fn state_machine_edges() {
        use ConnectionState::*;
        assert_eq!(Connecting.on_event(&ChannelEvent::Connected), Some(Connected));
        assert_eq!(Disconnected.on_event(&ChannelEvent::Connected), Some(Connected));
        assert_eq!(Connected.on_event(&ChannelEvent::Connected), None);
        assert_eq!(Idle.on_event(&ChannelEvent::Connected), None);
        assert_eq!(Connected.on_event(&ChannelEvent::Disconnected), Some(Disconnected));
        assert_eq!(Connecting.on_event(&ChannelEvent::Rejected), Some(Disconnected));
        assert_eq!(Disconnected.on_event(&ChannelEvent::Disconnected), None);
    }
}
