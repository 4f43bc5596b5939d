//! Fill tracker (spec §4.5) — consumes the Primary venue's authenticated
//! fill-event push stream and exposes a promise-style `wait_for_fill`, plus
//! subscriber callbacks, to strategy callers.
//!
//! The reconnect loop and JSON event parsing are adapted from the teacher's
//! `polymarket::user_ws::UserWsListener` (exponential-backoff reconnect,
//! maker/taker trade-event shape); the dedup/priority bookkeeping that used
//! to live in `DedupCache` is replaced with the status-priority table spec
//! §4.5 actually specifies.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use futures::{SinkExt, StreamExt};
use serde_json::{json, Value};
use tokio::sync::{oneshot, Mutex, RwLock};
use tokio::time::sleep;
use tokio_tungstenite::{connect_async, tungstenite::Message};
use tracing::{debug, info, warn};

use crate::types::{FillStatus, Side, TrackedFill, Venue};

const MAX_BACKOFF: Duration = Duration::from_secs(30);
const DEFAULT_WAIT_TIMEOUT: Duration = Duration::from_millis(60_000);

pub type FillCallback = Box<dyn Fn(&TrackedFill) + Send + Sync>;

#[derive(Debug, Clone)]
pub struct FillsWsConfig {
    pub ws_url: String,
    pub api_key: String,
    pub api_secret: String,
    pub api_passphrase: String,
}

struct Inner {
    fills: HashMap<String, TrackedFill>,
    waiters: HashMap<String, Vec<(u64, oneshot::Sender<Option<TrackedFill>>)>>,
    next_waiter_id: u64,
    subscribers: Vec<FillCallback>,
    connected: bool,
}

pub struct FillTracker {
    inner: RwLock<Inner>,
    cfg: FillsWsConfig,
    /// Guards the single WS task: set on connect, aborted on disconnect.
    task: Mutex<Option<tokio::task::JoinHandle<()>>>,
}

impl FillTracker {
    pub fn new(cfg: FillsWsConfig) -> Arc<Self> {
        Arc::new(Self {
            inner: RwLock::new(Inner {
                fills: HashMap::new(),
                waiters: HashMap::new(),
                next_waiter_id: 0,
                subscribers: Vec::new(),
                connected: false,
            }),
            cfg,
            task: Mutex::new(None),
        })
    }

    pub fn on_fill(self: &Arc<Self>, callback: FillCallback) {
        let this = self.clone();
        tokio::spawn(async move {
            this.inner.write().await.subscribers.push(callback);
        });
    }

    pub async fn is_connected(&self) -> bool {
        self.inner.read().await.connected
    }

    pub async fn get_tracked_fill(&self, order_id: &str) -> Option<TrackedFill> {
        self.inner.read().await.fills.get(order_id).cloned()
    }

    pub async fn get_tracked_fills(&self) -> Vec<TrackedFill> {
        self.inner.read().await.fills.values().cloned().collect()
    }

    pub async fn clear_old_fills(&self, max_age: Duration) {
        let mut inner = self.inner.write().await;
        inner.fills.retain(|_, f| f.received_at.elapsed() < max_age);
    }

    /// Resolves once the order's fill reaches `CONFIRMED`/`FAILED`, or
    /// returns `None` on timeout. Detaches from the waiter table in both
    /// cases.
    pub async fn wait_for_fill(self: &Arc<Self>, order_id: &str, timeout: Option<Duration>) -> Option<TrackedFill> {
        {
            let inner = self.inner.read().await;
            if let Some(fill) = inner.fills.get(order_id) {
                if fill.status.is_terminal() {
                    return Some(fill.clone());
                }
            }
        }

        let (tx, rx) = oneshot::channel();
        let waiter_id = {
            let mut inner = self.inner.write().await;
            let id = inner.next_waiter_id;
            inner.next_waiter_id += 1;
            inner.waiters.entry(order_id.to_string()).or_default().push((id, tx));
            id
        };

        let timeout = timeout.unwrap_or(DEFAULT_WAIT_TIMEOUT);
        let result = tokio::time::timeout(timeout, rx).await;

        match result {
            Ok(Ok(fill)) => fill,
            _ => {
                let mut inner = self.inner.write().await;
                if let Some(waiters) = inner.waiters.get_mut(order_id) {
                    waiters.retain(|(id, _)| *id != waiter_id);
                }
                None
            }
        }
    }

    pub async fn connect(self: &Arc<Self>) {
        let mut task = self.task.lock().await;
        if task.is_some() {
            return;
        }
        let this = self.clone();
        *task = Some(tokio::spawn(async move { this.run().await }));
    }

    pub async fn disconnect(&self) {
        if let Some(handle) = self.task.lock().await.take() {
            handle.abort();
        }
        self.inner.write().await.connected = false;
    }

    async fn run(self: Arc<Self>) {
        let mut backoff = Duration::from_secs(1);
        loop {
            match self.connect_and_listen().await {
                Ok(()) => info!("fills websocket closed normally"),
                Err(e) => warn!(error = %e, "fills websocket error"),
            }
            self.inner.write().await.connected = false;
            sleep(backoff).await;
            backoff = (backoff * 2).min(MAX_BACKOFF);
        }
    }

    async fn connect_and_listen(&self) -> anyhow::Result<()> {
        let (ws, _resp) = tokio::time::timeout(Duration::from_secs(10), connect_async(&self.cfg.ws_url))
            .await
            .map_err(|_| anyhow::anyhow!("connect timeout"))??;
        let (mut write, mut read) = ws.split();

        let subscribe = json!({
            "type": "user",
            "operation": "subscribe",
            "channels": ["fill", "order"],
            "auth": {
                "apiKey": self.cfg.api_key,
                "secret": self.cfg.api_secret,
                "passphrase": self.cfg.api_passphrase,
            },
        });
        write.send(Message::Text(subscribe.to_string())).await?;
        self.inner.write().await.connected = true;

        while let Some(msg) = read.next().await {
            match msg {
                Ok(Message::Text(text)) => {
                    if let Ok(value) = serde_json::from_str::<Value>(&text) {
                        let events = if value.is_array() {
                            value.as_array().cloned().unwrap_or_default()
                        } else {
                            vec![value]
                        };
                        for event in events {
                            if let Some(fill) = parse_fill_event(&event) {
                                self.apply_fill(fill).await;
                            }
                        }
                    }
                }
                Ok(Message::Close(_)) => break,
                Err(e) => {
                    debug!(error = %e, "fills websocket read error");
                    break;
                }
                _ => {}
            }
        }
        Ok(())
    }

    /// Applies the priority rule from spec §4.5: store on first sight, or
    /// only when the new status outranks the existing one.
    async fn apply_fill(&self, fill: TrackedFill) {
        let order_id = fill.order_id.clone();
        let should_store = {
            let inner = self.inner.read().await;
            match inner.fills.get(&order_id) {
                None => true,
                Some(existing) => fill.status.priority() > existing.status.priority(),
            }
        };
        if !should_store {
            return;
        }

        let terminal = fill.status.is_terminal();
        let mut inner = self.inner.write().await;
        inner.fills.insert(order_id.clone(), fill.clone());
        for cb in &inner.subscribers {
            cb(&fill);
        }
        if terminal {
            if let Some(waiters) = inner.waiters.remove(&order_id) {
                for (_, tx) in waiters {
                    let _ = tx.send(Some(fill.clone()));
                }
            }
        }
    }
}

fn parse_fill_event(val: &Value) -> Option<TrackedFill> {
    let event_type = val
        .get("event_type")
        .or_else(|| val.get("type"))
        .and_then(|v| v.as_str())
        .unwrap_or_default();
    if !event_type.eq_ignore_ascii_case("trade") && !event_type.eq_ignore_ascii_case("fill") {
        return None;
    }

    let order_id = val.get("orderId").or_else(|| val.get("order_id"))?.as_str()?.to_string();
    let market = val.get("marketId").or_else(|| val.get("market_id"))?.as_str()?.to_string();
    let instrument = val
        .get("tokenId")
        .or_else(|| val.get("asset_id"))
        .and_then(|v| v.as_str())
        .map(str::to_string);

    let side = match val.get("side").and_then(|v| v.as_str()).unwrap_or_default() {
        "BUY" | "buy" => Side::Buy,
        _ => Side::Sell,
    };

    let status = match val.get("status").and_then(|v| v.as_str()).unwrap_or("") {
        "MATCHED" => FillStatus::Matched,
        "MINED" => FillStatus::Mined,
        "CONFIRMED" => FillStatus::Confirmed,
        "FAILED" => FillStatus::Failed,
        _ => return None,
    };

    let size = val
        .get("size")
        .and_then(|v| v.as_str().map(str::to_string).or_else(|| v.as_f64().map(|f| f.to_string())))
        .and_then(|s| s.parse().ok())?;
    let price = val
        .get("price")
        .and_then(|v| v.as_str().map(str::to_string).or_else(|| v.as_f64().map(|f| f.to_string())))
        .and_then(|s| s.parse().ok())?;
    let transaction_hash = val
        .get("transactionHash")
        .or_else(|| val.get("transaction_hash"))
        .and_then(|v| v.as_str())
        .map(str::to_string);
    let venue_timestamp = val.get("timestamp").and_then(|v| v.as_u64());

    Some(TrackedFill {
        order_id,
        venue: Venue::Primary,
        market,
        instrument,
        side,
        size,
        price,
        status,
        transaction_hash,
        venue_timestamp,
        received_at: Instant::now(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn sample_fill(order_id: &str, status: FillStatus) -> TrackedFill {
        TrackedFill {
            order_id: order_id.to_string(),
            venue: Venue::Primary,
            market: "m".into(),
            instrument: Some("t".into()),
            side: Side::Buy,
            size: dec!(10),
            price: dec!(0.5),
            status,
            transaction_hash: None,
            venue_timestamp: None,
            received_at: Instant::now(),
        }
    }

    fn tracker() -> Arc<FillTracker> {
        FillTracker::new(FillsWsConfig {
            ws_url: "wss://example.invalid".into(),
            api_key: "k".into(),
            api_secret: "s".into(),
            api_passphrase: "p".into(),
        })
    }

    #[tokio::test]
    async fn lower_priority_event_does_not_overwrite_higher() {
        let t = tracker();
        t.apply_fill(sample_fill("o1", FillStatus::Confirmed)).await;
        t.apply_fill(sample_fill("o1", FillStatus::Matched)).await;
        let stored = t.get_tracked_fill("o1").await.unwrap();
        assert_eq!(stored.status, FillStatus::Confirmed);
    }

    #[tokio::test]
    async fn wait_for_fill_resolves_on_terminal_status() {
        let t = tracker();
        let waiter = tokio::spawn({
            let t = t.clone();
            async move { t.wait_for_fill("o2", Some(Duration::from_secs(2))).await }
        });
        tokio::time::sleep(Duration::from_millis(20)).await;
        t.apply_fill(sample_fill("o2", FillStatus::Confirmed)).await;
        let result = waiter.await.unwrap();
        assert!(result.is_some());
    }

    #[tokio::test]
    async fn wait_for_fill_times_out_and_detaches() {
        let t = tracker();
        let result = t.wait_for_fill("o3", Some(Duration::from_millis(20))).await;
        assert!(result.is_none());
        assert!(t.inner.read().await.waiters.get("o3").map(|w| w.is_empty()).unwrap_or(true));
    }

    #[tokio::test]
    async fn clear_old_fills_evicts_by_age() {
        let t = tracker();
        t.apply_fill(sample_fill("o4", FillStatus::Confirmed)).await;
        t.clear_old_fills(Duration::from_millis(0)).await;
        assert!(t.get_tracked_fill("o4").await.is_none());
    }
}
