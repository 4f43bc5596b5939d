//! Heartbeat keep-alive for the Primary venue (spec §4.5) — the venue cancels
//! resting orders if it doesn't hear from us within ~10s, so this posts an
//! initial heartbeat and re-posts on the returned id every 8s until stopped.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Mutex;
use tracing::warn;

#[derive(Debug, Clone, Default, serde::Deserialize)]
struct HeartbeatResponse {
    id: String,
}

pub struct HeartbeatService {
    client: reqwest::Client,
    base_url: String,
    interval: Duration,
    task: Mutex<Option<tokio::task::JoinHandle<()>>>,
}

impl HeartbeatService {
    pub fn new(base_url: String, interval: Duration) -> Arc<Self> {
        Arc::new(Self {
            client: reqwest::Client::new(),
            base_url,
            interval,
            task: Mutex::new(None),
        })
    }

    pub async fn is_active(&self) -> bool {
        self.task.lock().await.is_some()
    }

    pub async fn start(self: &Arc<Self>) -> anyhow::Result<String> {
        let mut guard = self.task.lock().await;
        if guard.is_some() {
            anyhow::bail!("heartbeat already active");
        }

        let id = self.post_heartbeat(None).await?;

        let this = self.clone();
        let initial_id = id.clone();
        let handle = tokio::spawn(async move {
            let mut current_id = initial_id;
            let mut ticker = tokio::time::interval(this.interval);
            ticker.tick().await; // consume the immediate first tick
            loop {
                ticker.tick().await;
                match this.post_heartbeat(Some(&current_id)).await {
                    Ok(next_id) => current_id = next_id,
                    Err(e) => warn!(error = %e, "heartbeat re-post failed, keeping timer alive"),
                }
            }
        });
        *guard = Some(handle);
        Ok(id)
    }

    pub async fn stop(&self) {
        if let Some(handle) = self.task.lock().await.take() {
            handle.abort();
        }
    }

    async fn post_heartbeat(&self, existing_id: Option<&str>) -> anyhow::Result<String> {
        let mut req = self.client.post(format!("{}/heartbeat", self.base_url));
        if let Some(id) = existing_id {
            req = req.json(&serde_json::json!({ "id": id }));
        }
        let resp: HeartbeatResponse = req.send().await?.json().await?;
        Ok(resp.id)
    }
}
