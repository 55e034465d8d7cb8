use std::path::Path;
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::broadcast::error::RecvError;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use circle_client::config::{Config, CredentialConfig};
use circle_client::credentials::{HttpTokenSource, StaticToken, TokenSource};
use circle_client::realtime::{ConnectionState, RealtimeEvent, RealtimeManager, Subscription};
use circle_client::thread::MergedThread;
use circle_common::ConversationId;
use circle_client::transport::SockJsTransport;

#[tokio::main]
async fn main() {
    // Load .env file (silently skip if missing, env vars may be set externally)
    if dotenvy::dotenv().is_err() {
        let env_path = Path::new(env!("CARGO_MANIFEST_DIR")).join(".env");
        let _ = dotenvy::from_path(env_path);
    }

    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::from_default_env())
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = Config::from_env();

    let tokens: Arc<dyn TokenSource> = match &config.credentials {
        CredentialConfig::Static(token) => Arc::new(StaticToken::new(token.as_str())),
        CredentialConfig::Session {
            token_url,
            session_key,
        } => Arc::new(HttpTokenSource::new(token_url, session_key)),
        CredentialConfig::SignedOut => {
            tracing::warn!("no CIRCLE_TOKEN or TOKEN_URL/SESSION_KEY set, running signed out");
            Arc::new(StaticToken::signed_out())
        }
    };
    let transport = Arc::new(SockJsTransport::new(&config.api_base_url));
    let manager = RealtimeManager::new(config.realtime.clone(), transport, tokens);

    tracing::info!(
        api_base_url = %config.api_base_url,
        watching = ?config.watch_conversations,
        "circle-client configured"
    );

    let thread = Arc::new(Mutex::new(MergedThread::new(config.user_id.clone())));
    let mut subscriptions: Vec<Subscription> = Vec::new();
    let mut events = manager.events();
    let mut state = manager.state_watch();

    manager.start();

    let shutdown = tokio::signal::ctrl_c();
    tokio::pin!(shutdown);

    loop {
        tokio::select! {
            _ = &mut shutdown => {
                tracing::info!("shutting down");
                break;
            }
            changed = state.changed() => {
                if changed.is_err() {
                    break;
                }
                let now = *state.borrow_and_update();
                if now == ConnectionState::Connected {
                    follow_conversations(&manager, &config.watch_conversations, &thread, &mut subscriptions);
                }
            }
            event = events.recv() => match event {
                Ok(event) => log_event(&manager, event),
                Err(RecvError::Lagged(skipped)) => {
                    tracing::warn!(skipped, "event observer lagged");
                }
                Err(RecvError::Closed) => break,
            },
        }
    }

    for subscription in &subscriptions {
        subscription.unsubscribe();
    }
    manager.stop().await;
}

/// Subscribe to every watched conversation that has no live subscription.
///
/// Registry entries survive reconnects, so this only does work on the first
/// connect and after a subscription was lost.
fn follow_conversations(
    manager: &RealtimeManager,
    watched: &[ConversationId],
    thread: &Arc<Mutex<MergedThread>>,
    subscriptions: &mut Vec<Subscription>,
) {
    subscriptions.retain(Subscription::is_active);
    for &conversation_id in watched {
        if subscriptions
            .iter()
            .any(|s| s.conversation_id() == conversation_id)
        {
            continue;
        }
        let thread = thread.clone();
        let subscription = manager.subscribe_to_connection(conversation_id, move |message| {
            let id = message.id;
            let content = message.content.clone();
            let mut thread = thread.lock();
            if thread.push_live(conversation_id, message) {
                tracing::info!(conversation_id, message_id = id, %content, total = thread.len(), "chat message");
            }
        });
        subscriptions.push(subscription);
    }
}

fn log_event(manager: &RealtimeManager, event: RealtimeEvent) {
    match event {
        RealtimeEvent::StateChanged(state) => tracing::info!(%state, "connection state"),
        RealtimeEvent::Notification(n) => tracing::info!(
            kind = %n.kind,
            unread = manager.unread_count(),
            "notification: {}",
            n.message
        ),
        RealtimeEvent::MessageNotification { conversation_id } => tracing::info!(
            ?conversation_id,
            unread_messages = manager.unread_messages_count(),
            "new message notification"
        ),
        RealtimeEvent::NotificationsCleared | RealtimeEvent::MessagesCountCleared => {}
    }
}
