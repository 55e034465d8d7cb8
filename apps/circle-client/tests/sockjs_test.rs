mod common;

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::State;
use axum::response::Response;
use axum::routing::get;
use axum::Router;
use serde_json::json;
use tokio::sync::mpsc;
use tokio::time;

use circle_client::realtime::{ConnectionState, RealtimeEvent, RealtimeManager, Route};
use circle_client::stomp::{Command, Frame, NOTIFICATION_FEED, NOTIFICATION_SUBSCRIPTION_ID};
use circle_client::transport::SockJsTransport;
use circle_client::StaticToken;

use common::{next_inbox_event, wait_for_state, RecordingNotifier};

/// How the fake broker behaves once a client connects.
#[derive(Clone, Copy)]
enum Script {
    /// Answer CONNECT, push one notification after the feed SUBSCRIBE.
    Serve,
    /// Close the SockJS session right after opening it.
    CloseImmediately,
}

#[derive(Clone)]
struct Broker {
    script: Script,
    /// STOMP frames the client sent, in order.
    seen: mpsc::UnboundedSender<Frame>,
}

fn sockjs_batch(frames: &[Frame]) -> String {
    let encoded: Vec<String> = frames.iter().map(Frame::encode).collect();
    format!("a{}", serde_json::to_string(&encoded).unwrap())
}

async fn upgrade(State(broker): State<Broker>, ws: WebSocketUpgrade) -> Response {
    ws.on_upgrade(move |socket| serve_session(socket, broker))
}

async fn serve_session(mut socket: WebSocket, broker: Broker) {
    if socket.send(Message::Text("o".into())).await.is_err() {
        return;
    }
    if let Script::CloseImmediately = broker.script {
        let _ = socket
            .send(Message::Text(r#"c[3000,"Go away!"]"#.into()))
            .await;
        return;
    }

    while let Some(Ok(msg)) = socket.recv().await {
        let Message::Text(text) = msg else { continue };
        let Ok(batch) = serde_json::from_str::<Vec<String>>(text.as_str()) else {
            continue;
        };
        for raw in batch {
            let Ok(frame) = Frame::decode(&raw) else { continue };
            let _ = broker.seen.send(frame.clone());
            let reply = match frame.command {
                Command::Connect => vec![Frame::new(Command::Connected)
                    .with_header("version", "1.2")
                    .with_header("heart-beat", "0,0")],
                Command::Subscribe if frame.header("destination") == Some(NOTIFICATION_FEED) => {
                    // Keep-alive first: the client must skip it.
                    let _ = socket.send(Message::Text("h".into())).await;
                    vec![Frame::new(Command::Message)
                        .with_header("subscription", NOTIFICATION_SUBSCRIPTION_ID)
                        .with_header("destination", NOTIFICATION_FEED)
                        .with_header("message-id", "1")
                        .with_body(
                            json!({
                                "type": "CONNECTION_ACCEPTED",
                                "entityId": 7,
                                "message": "brave-heron accepted your request"
                            })
                            .to_string(),
                        )]
                }
                _ => continue,
            };
            if socket
                .send(Message::Text(sockjs_batch(&reply).into()))
                .await
                .is_err()
            {
                return;
            }
        }
    }
}

async fn start_broker(script: Script) -> (SocketAddr, mpsc::UnboundedReceiver<Frame>) {
    let (seen, frames) = mpsc::unbounded_channel();
    let app = Router::new()
        .route("/ws/{server}/{session}/websocket", get(upgrade))
        .with_state(Broker { script, seen });

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
        .await
        .expect("bind");
    let addr = listener.local_addr().unwrap();

    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });

    (addr, frames)
}

async fn next_seen(frames: &mut mpsc::UnboundedReceiver<Frame>) -> Frame {
    time::timeout(Duration::from_secs(5), frames.recv())
        .await
        .expect("timeout waiting for client frame")
        .expect("broker gone")
}

#[tokio::test]
async fn sockjs_session_carries_stomp_end_to_end() {
    let (addr, mut frames) = start_broker(Script::Serve).await;
    let notifier = Arc::new(RecordingNotifier::default());
    let manager = RealtimeManager::with_notifier(
        Default::default(),
        Arc::new(SockJsTransport::new(&format!("http://{addr}"))),
        Arc::new(StaticToken::new("jwt-abc")),
        notifier.clone(),
    );
    let mut events = manager.events();
    manager.start();

    let connect = next_seen(&mut frames).await;
    assert_eq!(connect.command, Command::Connect);
    assert_eq!(connect.header("Authorization"), Some("Bearer jwt-abc"));
    let subscribe = next_seen(&mut frames).await;
    assert_eq!(subscribe.command, Command::Subscribe);
    assert_eq!(subscribe.header("id"), Some(NOTIFICATION_SUBSCRIPTION_ID));

    wait_for_state(&manager, ConnectionState::Connected).await;
    let event = next_inbox_event(&mut events).await;
    assert!(matches!(event, RealtimeEvent::Notification(_)), "got {event:?}");
    assert_eq!(manager.unread_count(), 1);

    let toasts = notifier.toasts();
    assert_eq!(toasts.len(), 1);
    assert_eq!(toasts[0].title, "brave-heron accepted your request");
    assert_eq!(toasts[0].action.as_ref().map(|a| a.route), Some(Route::Chats));

    let (tx, mut rx) = mpsc::unbounded_channel();
    let sub = manager.subscribe_to_connection(42, move |m| {
        let _ = tx.send(m);
    });
    let frame = next_seen(&mut frames).await;
    assert_eq!(frame.command, Command::Subscribe);
    assert_eq!(frame.header("destination"), Some("/topic/connection/42"));
    assert_eq!(frame.header("id"), sub.id());

    manager.stop().await;
    assert_eq!(next_seen(&mut frames).await.command, Command::Disconnect);
    assert_eq!(manager.state(), ConnectionState::Disconnected);
    assert!(rx.try_recv().is_err());
}

#[tokio::test]
async fn sockjs_close_frame_fails_the_connection() {
    let (addr, _frames) = start_broker(Script::CloseImmediately).await;
    let manager = RealtimeManager::new(
        Default::default(),
        Arc::new(SockJsTransport::new(&format!("http://{addr}"))),
        Arc::new(StaticToken::new("jwt-abc")),
    );
    manager.start();

    wait_for_state(&manager, ConnectionState::Failed).await;
    manager.stop().await;
    assert_eq!(manager.state(), ConnectionState::Disconnected);
}

#[tokio::test]
async fn unreachable_endpoint_fails_and_keeps_retrying() {
    // Bind then drop to get a port nobody listens on.
    let addr = {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        listener.local_addr().unwrap()
    };
    let manager = RealtimeManager::new(
        Default::default(),
        Arc::new(SockJsTransport::new(&format!("http://{addr}"))),
        Arc::new(StaticToken::new("jwt-abc")),
    );
    manager.start();
    wait_for_state(&manager, ConnectionState::Failed).await;
    manager.stop().await;
}
