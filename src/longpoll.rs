//! Bots Long Poll inbound loop
use crate::dispatcher::Dispatcher;
use crate::error::VkError;
use crate::vk::{inbound_from_event, VkClient};
use serde::Deserialize;
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

const WAIT_SECS: u64 = 25;
const RETRY_DELAY: Duration = Duration::from_secs(3);

#[derive(Debug, Clone, Deserialize)]
struct LongPollServer {
    key: String,
    server: String,
    #[serde(deserialize_with = "string_or_number")]
    ts: String,
}

#[derive(Debug, Deserialize)]
struct CheckResponse {
    #[serde(default, deserialize_with = "optional_string_or_number")]
    ts: Option<String>,
    #[serde(default)]
    updates: Vec<Update>,
    failed: Option<i64>,
}

#[derive(Debug, Deserialize)]
struct Update {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    object: Value,
}

fn value_to_string(value: Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

// VK sends `ts` as a string in some versions and as a number in others
fn string_or_number<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: serde::Deserializer<'de>,
{
    let value = Value::deserialize(deserializer)?;
    value_to_string(value).ok_or_else(|| serde::de::Error::custom("ts must be a string or number"))
}

fn optional_string_or_number<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    Ok(Option::<Value>::deserialize(deserializer)?.and_then(value_to_string))
}

/// What to do after one `a_check` round trip
#[derive(Debug, PartialEq, Eq)]
enum Step {
    Continue { ts: String },
    Reconnect,
}

pub struct LongPoll {
    client: VkClient,
    group_id: u64,
}

impl LongPoll {
    pub fn new(client: VkClient, group_id: u64) -> Self {
        Self { client, group_id }
    }

    /// Poll forever, dispatching every direct user message
    pub async fn run(&self, dispatcher: Arc<Dispatcher>) -> anyhow::Result<()> {
        info!("Starting Bots Long Poll for group {}", self.group_id);

        loop {
            let mut server = match self.fetch_server().await {
                Ok(server) => server,
                Err(e) => {
                    warn!("Failed to get long poll server: {}", e);
                    tokio::time::sleep(RETRY_DELAY).await;
                    continue;
                }
            };
            debug!("Long poll server ready at ts {}", server.ts);

            loop {
                let response = match self.check(&server).await {
                    Ok(response) => response,
                    Err(e) => {
                        warn!("Long poll request failed: {}", e);
                        tokio::time::sleep(RETRY_DELAY).await;
                        break;
                    }
                };

                for update in &response.updates {
                    if update.kind != "message_new" {
                        continue;
                    }
                    if let Some(message) = inbound_from_event(&update.object) {
                        debug!("Inbound message from user {}", message.user_id);
                        dispatcher.dispatch(message);
                    }
                }

                match next_step(response) {
                    Step::Continue { ts } => server.ts = ts,
                    Step::Reconnect => break,
                }
            }
        }
    }

    async fn fetch_server(&self) -> Result<LongPollServer, VkError> {
        self.client
            .call(
                "groups.getLongPollServer",
                &[("group_id", self.group_id.to_string())],
            )
            .await
    }

    async fn check(&self, server: &LongPollServer) -> Result<CheckResponse, VkError> {
        let url = format!(
            "{}?act=a_check&key={}&ts={}&wait={}",
            server.server,
            urlencoding::encode(&server.key),
            urlencoding::encode(&server.ts),
            WAIT_SECS
        );

        let response = self.client.http().get(&url).send().await?;

        if !response.status().is_success() {
            let status = response.status().as_u16();
            let body = response.text().await.unwrap_or_default();
            return Err(VkError::Http { status, body });
        }

        Ok(response.json().await?)
    }
}

/// failed=1: history outdated, continue from the new ts;
/// failed=2/3: key expired or data lost, fetch a new server.
fn next_step(response: CheckResponse) -> Step {
    match (response.failed, response.ts) {
        (None, Some(ts)) | (Some(1), Some(ts)) => Step::Continue { ts },
        _ => Step::Reconnect,
    }
}
