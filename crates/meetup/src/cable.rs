//! Pub/sub channel transport.
//!
//! [`CableConnection`] speaks the ActionCable JSON framing over a single
//! WebSocket. Every subscription gets its own typed [`ChannelEvent`] stream;
//! all subscribe/unsubscribe/perform commands go through one FIFO queue that
//! the socket task drains in order, so per-room delivery stays ordered.

use crate::error::{ClientError, ClientResult};
use crate::protocol::{CableCommand, CableControl, CableFrame, ChannelParams};
use futures_util::{SinkExt, StreamExt};
use std::collections::HashMap;
use std::sync::Mutex;
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::Message as WsMessage;
use tokio_util::sync::CancellationToken;

/// Event delivered to one subscription.
#[derive(Debug, Clone, PartialEq)]
pub enum ChannelEvent {
    /// The server confirmed the subscription.
    Connected,
    /// The socket dropped or the subscription was torn down.
    Disconnected,
    /// The server refused the subscription.
    Rejected,
    /// A broadcast payload for this subscription.
    Received(serde_json::Value),
}

/// Command queued to the channel transport.
#[derive(Debug)]
pub enum ChannelCommand {
    Subscribe {
        identifier: String,
        events: mpsc::UnboundedSender<ChannelEvent>,
    },
    Perform {
        identifier: String,
        data: serde_json::Value,
    },
    Unsubscribe {
        identifier: String,
    },
}

/// Subscribe side of the transport.
pub trait ChannelTransport: Send + Sync {
    fn subscribe(&self, params: &ChannelParams) -> ClientResult<Subscription>;
}

/// Handle to one live subscription. Dropping it unsubscribes.
#[derive(Debug)]
pub struct Subscription {
    identifier: String,
    events: mpsc::UnboundedReceiver<ChannelEvent>,
    commands: mpsc::UnboundedSender<ChannelCommand>,
    active: bool,
}

impl Subscription {
    /// Queue a subscribe command on `commands` and return the handle for it.
    pub fn open(
        identifier: String,
        commands: mpsc::UnboundedSender<ChannelCommand>,
    ) -> ClientResult<Self> {
        let (events_tx, events) = mpsc::unbounded_channel();
        commands
            .send(ChannelCommand::Subscribe {
                identifier: identifier.clone(),
                events: events_tx,
            })
            .map_err(|_| ClientError::Transport {
                message: "channel connection closed".to_string(),
            })?;
        Ok(Self {
            identifier,
            events,
            commands,
            active: true,
        })
    }

    pub fn identifier(&self) -> &str {
        &self.identifier
    }

    /// Wait for the next event. `None` once the transport is gone.
    pub async fn next_event(&mut self) -> Option<ChannelEvent> {
        self.events.recv().await
    }

    /// Invoke a server-side channel action, e.g. `send_message`.
    pub fn perform(&self, action: &str, payload: serde_json::Value) -> ClientResult<()> {
        if !self.active {
            return Err(ClientError::Transport {
                message: "subscription closed".to_string(),
            });
        }
        let mut data = match payload {
            serde_json::Value::Object(map) => map,
            serde_json::Value::Null => serde_json::Map::new(),
            other => {
                return Err(ClientError::Protocol {
                    message: format!("channel payload must be an object, got {other}"),
                });
            }
        };
        data.insert(
            "action".to_string(),
            serde_json::Value::String(action.to_string()),
        );
        self.commands
            .send(ChannelCommand::Perform {
                identifier: self.identifier.clone(),
                data: serde_json::Value::Object(data),
            })
            .map_err(|_| ClientError::Transport {
                message: "channel connection closed".to_string(),
            })
    }

    /// Release the subscription. Safe to call repeatedly.
    pub fn unsubscribe(&mut self) {
        if !self.active {
            return;
        }
        self.active = false;
        let _ = self.commands.send(ChannelCommand::Unsubscribe {
            identifier: self.identifier.clone(),
        });
        self.events.close();
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.unsubscribe();
    }
}

type CableSocket =
    tokio_tungstenite::WebSocketStream<tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>>;

/// A cable WebSocket owned by whoever connected it. Closing or dropping it
/// ends the socket and disconnects every subscription. A socket that drops
/// on its own is dialed again by the next `subscribe`.
pub struct CableConnection {
    endpoint: String,
    label: String,
    shutdown: CancellationToken,
    link: Mutex<CableLink>,
}

/// Command queue of one socket session.
struct CableLink {
    commands: mpsc::UnboundedSender<ChannelCommand>,
}

impl CableLink {
    fn live(ws: CableSocket, shutdown: CancellationToken) -> Self {
        let (commands, commands_rx) = mpsc::unbounded_channel();
        tokio::spawn(cable_loop(ws, commands_rx, shutdown));
        Self { commands }
    }

    /// Dial in the background. Commands queue up until the socket is open.
    fn redial(endpoint: String, label: String, shutdown: CancellationToken) -> Self {
        let (commands, mut commands_rx) = mpsc::unbounded_channel();
        tokio::spawn(async move {
            match dial(&endpoint, &label).await {
                Ok(ws) => cable_loop(ws, commands_rx, shutdown).await,
                Err(e) => {
                    tracing::warn!(err = %e, "cable reconnect failed");
                    disconnect_pending(&mut commands_rx);
                }
            }
        });
        Self { commands }
    }

    fn is_open(&self) -> bool {
        !self.commands.is_closed()
    }
}

impl CableConnection {
    /// Open the socket at `cable_url`, authenticating with `token` as a query parameter.
    pub async fn connect(cable_url: &str, token: &str) -> ClientResult<Self> {
        let mut url = reqwest::Url::parse(cable_url).map_err(|err| ClientError::Protocol {
            message: format!("invalid cable url {cable_url}: {err}"),
        })?;
        url.query_pairs_mut().append_pair("token", token);
        let endpoint = url.to_string();

        let ws = dial(&endpoint, cable_url).await?;
        let shutdown = CancellationToken::new();
        let link = CableLink::live(ws, shutdown.child_token());

        Ok(Self {
            endpoint,
            label: cable_url.to_string(),
            shutdown,
            link: Mutex::new(link),
        })
    }

    /// Whether the current socket session is still running.
    pub fn is_open(&self) -> bool {
        !self.shutdown.is_cancelled() && self.lock_link().is_open()
    }

    /// Close the socket. Safe to call repeatedly; later subscribes fail.
    pub fn close(&self) {
        self.shutdown.cancel();
    }

    fn lock_link(&self) -> std::sync::MutexGuard<'_, CableLink> {
        self.link.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl ChannelTransport for CableConnection {
    fn subscribe(&self, params: &ChannelParams) -> ClientResult<Subscription> {
        if self.shutdown.is_cancelled() {
            return Err(ClientError::Transport {
                message: "cable connection closed".to_string(),
            });
        }
        let mut link = self.lock_link();
        if !link.is_open() {
            tracing::info!(url = %self.label, "cable dropped; reconnecting");
            *link = CableLink::redial(
                self.endpoint.clone(),
                self.label.clone(),
                self.shutdown.child_token(),
            );
        }
        Subscription::open(params.identifier(), link.commands.clone())
    }
}

impl Drop for CableConnection {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}

async fn dial(endpoint: &str, label: &str) -> ClientResult<CableSocket> {
    let (ws, _) = tokio_tungstenite::connect_async(endpoint)
        .await
        .map_err(|err| ClientError::Transport {
            message: format!("failed to connect to cable at {label}: {err}"),
        })?;
    tracing::info!(url = %label, "cable connected");
    Ok(ws)
}

/// Stop accepting commands and answer any queued subscribe with `Disconnected`.
fn disconnect_pending(commands: &mut mpsc::UnboundedReceiver<ChannelCommand>) {
    commands.close();
    while let Ok(cmd) = commands.try_recv() {
        if let ChannelCommand::Subscribe { identifier, events } = cmd {
            tracing::debug!(%identifier, "subscription never reached the socket");
            let _ = events.send(ChannelEvent::Disconnected);
        }
    }
}

type Routes = HashMap<String, mpsc::UnboundedSender<ChannelEvent>>;

async fn cable_loop<S>(
    ws: tokio_tungstenite::WebSocketStream<S>,
    mut commands: mpsc::UnboundedReceiver<ChannelCommand>,
    shutdown: CancellationToken,
) where
    S: tokio::io::AsyncRead + tokio::io::AsyncWrite + Unpin,
{
    let mut routes = Routes::new();
    match run_cable_session(ws, &mut commands, &shutdown, &mut routes).await {
        Ok(()) => tracing::info!("cable closed"),
        Err(e) => tracing::warn!(err = %e, "cable session failed"),
    }
    commands.close();
    for (identifier, events) in routes.drain() {
        tracing::debug!(%identifier, "disconnecting subscription");
        let _ = events.send(ChannelEvent::Disconnected);
    }
    disconnect_pending(&mut commands);
}

async fn run_cable_session<S>(
    ws: tokio_tungstenite::WebSocketStream<S>,
    commands: &mut mpsc::UnboundedReceiver<ChannelCommand>,
    shutdown: &CancellationToken,
    routes: &mut Routes,
) -> ClientResult<()>
where
    S: tokio::io::AsyncRead + tokio::io::AsyncWrite + Unpin,
{
    let (mut sink, mut stream) = ws.split();

    loop {
        tokio::select! {
            _ = shutdown.cancelled() => {
                let _ = sink.send(WsMessage::Close(None)).await;
                return Ok(());
            }
            cmd = commands.recv() => {
                let Some(cmd) = cmd else {
                    let _ = sink.send(WsMessage::Close(None)).await;
                    return Ok(());
                };
                let frame = match cmd {
                    ChannelCommand::Subscribe { identifier, events } => {
                        routes.insert(identifier.clone(), events);
                        CableCommand::Subscribe { identifier }
                    }
                    ChannelCommand::Unsubscribe { identifier } => {
                        if routes.remove(&identifier).is_none() {
                            continue;
                        }
                        CableCommand::Unsubscribe { identifier }
                    }
                    ChannelCommand::Perform { identifier, data } => {
                        if !routes.contains_key(&identifier) {
                            tracing::warn!(%identifier, "perform on unknown subscription dropped");
                            continue;
                        }
                        CableCommand::Message {
                            identifier,
                            data: data.to_string(),
                        }
                    }
                };
                let line = serde_json::to_string(&frame).map_err(ClientError::protocol)?;
                sink.send(WsMessage::Text(line))
                    .await
                    .map_err(|err| ClientError::Transport {
                        message: format!("cable write failed: {err}"),
                    })?;
            }
            msg = stream.next() => {
                match msg {
                    Some(Ok(WsMessage::Text(text))) => handle_frame(&text, routes)?,
                    Some(Ok(WsMessage::Ping(payload))) => {
                        let _ = sink.send(WsMessage::Pong(payload)).await;
                    }
                    Some(Ok(WsMessage::Close(_))) | None => {
                        return Err(ClientError::Transport {
                            message: "cable closed by server".to_string(),
                        });
                    }
                    Some(Ok(_)) => {}
                    Some(Err(err)) => {
                        return Err(ClientError::Transport {
                            message: format!("cable read failed: {err}"),
                        });
                    }
                }
            }
        }
    }
}

fn handle_frame(text: &str, routes: &mut Routes) -> ClientResult<()> {
    let frame: CableFrame = match serde_json::from_str(text) {
        Ok(frame) => frame,
        Err(err) => {
            tracing::warn!(err = %err, "unrecognized cable frame");
            return Ok(());
        }
    };

    match frame {
        CableFrame::Control(CableControl::Welcome) => tracing::debug!("cable welcome"),
        CableFrame::Control(CableControl::Ping { .. }) => {}
        CableFrame::Control(CableControl::ConfirmSubscription { identifier }) => {
            if let Some(events) = routes.get(&identifier) {
                let _ = events.send(ChannelEvent::Connected);
            }
        }
        CableFrame::Control(CableControl::RejectSubscription { identifier }) => {
            tracing::warn!(%identifier, "subscription rejected");
            if let Some(events) = routes.remove(&identifier) {
                let _ = events.send(ChannelEvent::Rejected);
            }
        }
        CableFrame::Control(CableControl::Disconnect { reason, reconnect }) => {
            return Err(ClientError::Transport {
                message: format!(
                    "server disconnected cable (reason={}, reconnect={})",
                    reason.as_deref().unwrap_or("none"),
                    reconnect.unwrap_or(false)
                ),
            });
        }
        CableFrame::Broadcast {
            identifier,
            message,
        } => {
            let delivered = routes
                .get(&identifier)
                .map(|events| events.send(ChannelEvent::Received(message)).is_ok());
            match delivered {
                Some(true) => {}
                Some(false) => {
                    routes.remove(&identifier);
                }
                None => tracing::debug!(%identifier, "broadcast for unknown subscription"),
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::time::Duration;
    use tokio::net::TcpListener;

    async fn next_text<S>(ws: &mut tokio_tungstenite::WebSocketStream<S>) -> serde_json::Value
    where
        S: tokio::io::AsyncRead + tokio::io::AsyncWrite + Unpin,
    {
        loop {
            match ws.next().await.expect("socket open").expect("frame") {
                WsMessage::Text(text) => return serde_json::from_str(&text).unwrap(),
                WsMessage::Close(_) => panic!("unexpected close"),
                _ => continue,
            }
        }
    }

    async fn recv_event(sub: &mut Subscription) -> ChannelEvent {
        tokio::time::timeout(Duration::from_secs(5), sub.next_event())
            .await
            .expect("event in time")
            .expect("event stream open")
    }

    #[tokio::test]
    async fn subscribe_confirm_broadcast_perform() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let server = tokio::spawn(async move {
            let (tcp, _) = listener.accept().await.unwrap();
            let mut ws = tokio_tungstenite::accept_async(tcp).await.unwrap();
            ws.send(WsMessage::Text(json!({"type": "welcome"}).to_string()))
                .await
                .unwrap();

            let sub = next_text(&mut ws).await;
            assert_eq!(sub["command"], "subscribe");
            let identifier = sub["identifier"].as_str().unwrap().to_string();

            ws.send(WsMessage::Text(
                json!({"type": "confirm_subscription", "identifier": identifier}).to_string(),
            ))
            .await
            .unwrap();
            ws.send(WsMessage::Text(
                json!({"identifier": identifier, "message": {"body": "hello"}}).to_string(),
            ))
            .await
            .unwrap();

            let perform = next_text(&mut ws).await;
            assert_eq!(perform["command"], "message");
            let data: serde_json::Value =
                serde_json::from_str(perform["data"].as_str().unwrap()).unwrap();
            assert_eq!(data["action"], "send_message");
            assert_eq!(data["body"], "hi there");

            let unsub = next_text(&mut ws).await;
            assert_eq!(unsub["command"], "unsubscribe");
            assert_eq!(unsub["identifier"], identifier);
        });

        let cable = CableConnection::connect(&format!("ws://{addr}/cable"), "tok")
            .await
            .unwrap();
        let mut sub = cable.subscribe(&ChannelParams::activity(9)).unwrap();

        assert_eq!(recv_event(&mut sub).await, ChannelEvent::Connected);
        assert_eq!(
            recv_event(&mut sub).await,
            ChannelEvent::Received(json!({"body": "hello"}))
        );

        sub.perform("send_message", json!({"body": "hi there"}))
            .unwrap();
        sub.unsubscribe();
        sub.unsubscribe();
        assert!(sub.perform("send_message", json!({"body": "late"})).is_err());

        tokio::time::timeout(Duration::from_secs(5), server)
            .await
            .expect("server finished")
            .unwrap();
        cable.close();
    }

    #[tokio::test]
    async fn server_close_disconnects_subscriptions() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        tokio::spawn(async move {
            let (tcp, _) = listener.accept().await.unwrap();
            let mut ws = tokio_tungstenite::accept_async(tcp).await.unwrap();
            let sub = next_text(&mut ws).await;
            let identifier = sub["identifier"].as_str().unwrap().to_string();
            ws.send(WsMessage::Text(
                json!({"type": "confirm_subscription", "identifier": identifier}).to_string(),
            ))
            .await
            .unwrap();
            ws.close(None).await.unwrap();
        });

        let cable = CableConnection::connect(&format!("ws://{addr}/cable"), "tok")
            .await
            .unwrap();
        let mut sub = cable.subscribe(&ChannelParams::activity(1)).unwrap();

        assert_eq!(recv_event(&mut sub).await, ChannelEvent::Connected);
        assert_eq!(recv_event(&mut sub).await, ChannelEvent::Disconnected);
    }

    #[tokio::test]
    async fn subscribe_after_drop_dials_again() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let server = tokio::spawn(async move {
            for round in 0..2 {
                let (tcp, _) = listener.accept().await.unwrap();
                let mut ws = tokio_tungstenite::accept_async(tcp).await.unwrap();
                let sub = next_text(&mut ws).await;
                let identifier = sub["identifier"].as_str().unwrap().to_string();
                ws.send(WsMessage::Text(
                    json!({"type": "confirm_subscription", "identifier": identifier}).to_string(),
                ))
                .await
                .unwrap();
                if round == 0 {
                    ws.close(None).await.unwrap();
                } else {
                    ws.send(WsMessage::Text(
                        json!({"identifier": identifier, "message": {"body": "back"}}).to_string(),
                    ))
                    .await
                    .unwrap();
                    let _ = next_text(&mut ws).await;
                }
            }
        });

        let cable = CableConnection::connect(&format!("ws://{addr}/cable"), "tok")
            .await
            .unwrap();
        let mut first = cable.subscribe(&ChannelParams::activity(2)).unwrap();
        assert_eq!(recv_event(&mut first).await, ChannelEvent::Connected);
        assert_eq!(recv_event(&mut first).await, ChannelEvent::Disconnected);
        assert!(!cable.is_open());

        let mut second = cable.subscribe(&ChannelParams::activity(2)).unwrap();
        assert_eq!(recv_event(&mut second).await, ChannelEvent::Connected);
        assert_eq!(
            recv_event(&mut second).await,
            ChannelEvent::Received(json!({"body": "back"}))
        );
        assert!(cable.is_open());
        second.unsubscribe();

        tokio::time::timeout(Duration::from_secs(5), server)
            .await
            .expect("server finished")
            .unwrap();
    }

    #[tokio::test]
    async fn closed_connection_refuses_subscribe() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let (tcp, _) = listener.accept().await.unwrap();
            let mut ws = tokio_tungstenite::accept_async(tcp).await.unwrap();
            while ws.next().await.is_some() {}
        });

        let cable = CableConnection::connect(&format!("ws://{addr}/cable"), "tok")
            .await
            .unwrap();
        cable.close();
        cable.close();
        assert!(!cable.is_open());
        let err = cable.subscribe(&ChannelParams::activity(1)).unwrap_err();
        assert!(matches!(err, ClientError::Transport { .. }));
    }

    #[test]
    fn queued_subscribe_is_disconnected_when_socket_ends() {
        let (commands, mut rx) = mpsc::unbounded_channel();
        let mut sub = Subscription::open("room".to_string(), commands.clone()).unwrap();

        disconnect_pending(&mut rx);
        assert!(commands.is_closed());
        assert_eq!(sub.events.try_recv().unwrap(), ChannelEvent::Disconnected);
        assert!(Subscription::open("room".to_string(), commands).is_err());
    }

    #[test]
    fn reject_removes_route() {
        let mut routes = Routes::new();
        let (tx, mut rx) = mpsc::unbounded_channel();
        routes.insert("room".to_string(), tx);

        handle_frame(
            r#"{"type":"reject_subscription","identifier":"room"}"#,
            &mut routes,
        )
        .unwrap();
        assert!(routes.is_empty());
        assert_eq!(rx.try_recv().unwrap(), ChannelEvent::Rejected);
    }

    #[test]
    fn disconnect_frame_ends_session() {
        let mut routes = Routes::new();
        let err = handle_frame(
            r#"{"type":"disconnect","reason":"unauthorized","reconnect":false}"#,
            &mut routes,
        )
        .unwrap_err();
        assert!(err.to_string().contains("unauthorized"));
    }

    #[test]
    fn perform_requires_object_payload() {
        let (commands, mut rx) = mpsc::unbounded_channel();
        let sub = Subscription::open("room".to_string(), commands).unwrap();
        assert!(matches!(rx.try_recv().unwrap(), ChannelCommand::Subscribe { .. }));

        let err = sub.perform("send_message", json!("text")).unwrap_err();
        assert!(matches!(err, ClientError::Protocol { .. }));
        assert!(rx.try_recv().is_err());
    }
}
