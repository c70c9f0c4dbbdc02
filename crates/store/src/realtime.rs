//! Supabase Realtime change feed over the Phoenix websocket protocol.
//!
//! Joins `realtime:public:messages` with a `postgres_changes` filter for
//! inserts and updates, heartbeats on the `phoenix` topic, and reconnects
//! with [`ReconnectBackoff`] until shutdown.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tokio::sync::{broadcast, mpsc};
use tokio_tungstenite::tungstenite::Message;
use tokio_util::sync::CancellationToken;

use solace_domain::config::StoreConfig;
use solace_domain::error::{Error, Result};
use solace_domain::records::MessageRecord;

use crate::reconnect::ReconnectBackoff;
use crate::supabase::service_key;
use crate::traits::{ChangeFeed, ChangeKind, MessageChange};

const TOPIC: &str = "realtime:public:messages";
const FEED_CAPACITY: usize = 1024;
const JOIN_TIMEOUT: Duration = Duration::from_secs(10);

/// One Phoenix channel frame.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub(crate) struct Frame {
    pub topic: String,
    pub event: String,
    #[serde(default)]
    pub payload: Value,
    #[serde(rename = "ref", default)]
    pub reference: Option<String>,
}

/// Decode a frame into a message change. Handles both the
/// `postgres_changes` envelope and the legacy `INSERT`/`UPDATE` events.
pub(crate) fn parse_change(frame: &Frame) -> Option<MessageChange> {
    let (kind_str, record) = match frame.event.as_str() {
        "postgres_changes" => {
            let data = frame.payload.get("data")?;
            (data.get("type")?.as_str()?, data.get("record")?)
        }
        "INSERT" | "UPDATE" => (frame.event.as_str(), frame.payload.get("record")?),
        _ => return None,
    };
    let kind = match kind_str {
        "INSERT" => ChangeKind::Insert,
        "UPDATE" => ChangeKind::Update,
        _ => return None,
    };
    match serde_json::from_value::<MessageRecord>(record.clone()) {
        Ok(record) => Some(MessageChange { kind, record }),
        Err(e) => {
            tracing::debug!(error = %e, "undecodable realtime record");
            None
        }
    }
}

pub struct RealtimeFeed {
    ws_url: String,
    key: String,
    heartbeat: Duration,
    backoff: ReconnectBackoff,
    sender: broadcast::Sender<MessageChange>,
    next_ref: AtomicU64,
}

impl RealtimeFeed {
    pub fn from_config(cfg: &StoreConfig) -> Result<Self> {
        let base = cfg.url.trim_end_matches('/');
        let ws_base = if let Some(rest) = base.strip_prefix("https://") {
            format!("wss://{rest}")
        } else if let Some(rest) = base.strip_prefix("http://") {
            format!("ws://{rest}")
        } else {
            return Err(Error::Config(format!("store.url must be http(s): {base}")));
        };
        let key = service_key(cfg)?;
        let (sender, _) = broadcast::channel(FEED_CAPACITY);
        Ok(Self {
            ws_url: format!("{ws_base}/realtime/v1/websocket?apikey={key}&vsn=1.0.0"),
            key,
            heartbeat: Duration::from_secs(cfg.heartbeat_secs.max(1)),
            backoff: ReconnectBackoff::default(),
            sender,
            next_ref: AtomicU64::new(1),
        })
    }

    fn frame(&self, topic: &str, event: &str, payload: Value) -> Frame {
        Frame {
            topic: topic.into(),
            event: event.into(),
            payload,
            reference: Some(self.next_ref.fetch_add(1, Ordering::Relaxed).to_string()),
        }
    }

    fn join_frame(&self) -> Frame {
        self.frame(
            TOPIC,
            "phx_join",
            json!({
                "config": {
                    "postgres_changes": [
                        { "event": "INSERT", "schema": "public", "table": "messages" },
                        { "event": "UPDATE", "schema": "public", "table": "messages" }
                    ]
                },
                "access_token": self.key,
            }),
        )
    }

    /// Keep the subscription alive until `shutdown` fires.
    pub async fn run(&self, shutdown: CancellationToken) {
        let mut attempt: u32 = 0;

        loop {
            let result = tokio::select! {
                r = self.connect_and_run() => r,
                _ = shutdown.cancelled() => {
                    tracing::info!("realtime feed shutting down");
                    return;
                }
            };

            match result {
                Ok(joined) => {
                    tracing::info!(joined, "realtime connection closed");
                    if joined {
                        attempt = 0;
                    }
                }
                Err(e) => {
                    tracing::warn!(attempt, error = %e, "realtime connection lost");
                }
            }

            if self.backoff.should_give_up(attempt) {
                tracing::error!(attempts = attempt, "realtime reconnect attempts exhausted");
                return;
            }

            let delay = self.backoff.delay_for_attempt(attempt);
            tracing::info!(delay_ms = delay.as_millis() as u64, attempt = attempt + 1, "realtime reconnecting");
            tokio::select! {
                _ = tokio::time::sleep(delay) => {}
                _ = shutdown.cancelled() => return,
            }
            attempt += 1;
        }
    }

    /// One connection: connect, join, then pump frames. Returns whether the
    /// join was acknowledged before the connection closed.
    async fn connect_and_run(&self) -> std::result::Result<bool, String> {
        let (ws, _) = tokio_tungstenite::connect_async(self.ws_url.as_str())
            .await
            .map_err(|e| e.to_string())?;
        let (mut sink, mut stream) = ws.split();

        let join = serde_json::to_string(&self.join_frame()).map_err(|e| e.to_string())?;
        sink.send(Message::Text(join))
            .await
            .map_err(|e| e.to_string())?;

        let ack = tokio::time::timeout(JOIN_TIMEOUT, async {
            while let Some(Ok(msg)) = stream.next().await {
                let Message::Text(text) = msg else { continue };
                let Ok(frame) = serde_json::from_str::<Frame>(&text) else {
                    continue;
                };
                if frame.topic == TOPIC && frame.event == "phx_reply" {
                    let status = frame.payload.get("status").and_then(|s| s.as_str());
                    return match status {
                        Some("ok") => Ok(()),
                        _ => Err(format!("join rejected: {}", frame.payload)),
                    };
                }
            }
            Err("connection closed before join reply".to_string())
        })
        .await;
        match ack {
            Ok(Ok(())) => tracing::info!(topic = TOPIC, "realtime subscribed"),
            Ok(Err(e)) => return Err(e),
            Err(_) => return Err("join reply timeout".into()),
        }

        let (outbound_tx, mut outbound_rx) = mpsc::channel::<Frame>(16);

        let hb_tx = outbound_tx.clone();
        let hb_interval = self.heartbeat;
        let next_ref = self.next_ref.fetch_add(1_000_000, Ordering::Relaxed);
        let heartbeat_task = tokio::spawn(async move {
            let mut interval = tokio::time::interval(hb_interval);
            let mut n = next_ref;
            loop {
                interval.tick().await;
                n += 1;
                let frame = Frame {
                    topic: "phoenix".into(),
                    event: "heartbeat".into(),
                    payload: json!({}),
                    reference: Some(n.to_string()),
                };
                if hb_tx.send(frame).await.is_err() {
                    break;
                }
            }
        });

        let writer_task = tokio::spawn(async move {
            while let Some(frame) = outbound_rx.recv().await {
                let json = match serde_json::to_string(&frame) {
                    Ok(j) => j,
                    Err(e) => {
                        tracing::error!(error = %e, "failed to serialize realtime frame");
                        continue;
                    }
                };
                if sink.send(Message::Text(json)).await.is_err() {
                    break;
                }
            }
        });

        while let Some(Ok(msg)) = stream.next().await {
            match msg {
                Message::Text(text) => {
                    let frame = match serde_json::from_str::<Frame>(&text) {
                        Ok(f) => f,
                        Err(e) => {
                            tracing::debug!(error = %e, "failed to parse realtime frame");
                            continue;
                        }
                    };
                    if frame.event == "phx_error" || frame.event == "phx_close" {
                        tracing::warn!(event = %frame.event, "realtime channel closed by server");
                        break;
                    }
                    if let Some(change) = parse_change(&frame) {
                        tracing::debug!(
                            message_id = %change.record.id,
                            kind = ?change.kind,
                            "realtime change"
                        );
                        let _ = self.sender.send(change);
                    }
                }
                Message::Close(_) => break,
                _ => {}
            }
        }

        heartbeat_task.abort();
        writer_task.abort();
        Ok(true)
    }
}

impl ChangeFeed for RealtimeFeed {
    fn subscribe(&self) -> broadcast::Receiver<MessageChange> {
        self.sender.subscribe()
    }
}
