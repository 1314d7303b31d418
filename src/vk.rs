//! HTTP client for the VK API and the collaborators built on it
use crate::error::{DeliveryError, SourceError, VkError};
use crate::messenger::Messenger;
use crate::source::CandidateSource;
use crate::types::*;
use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use std::collections::HashMap;
use tracing::{debug, warn};

pub const DEFAULT_API_URL: &str = "https://api.vk.com";
pub const DEFAULT_API_VERSION: &str = "5.199";

#[derive(Debug, Clone)]
pub struct VkClient {
    base_url: String,
    token: String,
    version: String,
    client: reqwest::Client,
}

/// `{"response": ...}` or `{"error": {...}}`
#[derive(Debug, Deserialize)]
struct ApiEnvelope<T> {
    response: Option<T>,
    error: Option<ApiErrorBody>,
}

#[derive(Debug, Deserialize)]
struct ApiErrorBody {
    error_code: i64,
    error_msg: String,
}

impl VkClient {
    pub fn new(
        base_url: impl Into<String>,
        token: impl Into<String>,
        version: impl Into<String>,
    ) -> Self {
        Self {
            base_url: base_url.into(),
            token: token.into(),
            version: version.into(),
            client: reqwest::Client::new(),
        }
    }

    /// Underlying HTTP client, shared with the long poll loop
    pub fn http(&self) -> &reqwest::Client {
        &self.client
    }

    /// Call an API method with form-encoded parameters
    pub async fn call<T: DeserializeOwned>(
        &self,
        method: &str,
        params: &[(&str, String)],
    ) -> Result<T, VkError> {
        let url = format!("{}/method/{}", self.base_url, method);

        let mut form: Vec<(&str, String)> = params.to_vec();
        form.push(("access_token", self.token.clone()));
        form.push(("v", self.version.clone()));

        debug!("Calling VK method {}", method);

        let response = self
            .client
            .post(&url)
            .header(
                reqwest::header::CONTENT_TYPE,
                "application/x-www-form-urlencoded",
            )
            .body(encode_form(&form))
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status().as_u16();
            let body = response.text().await.unwrap_or_default();
            return Err(VkError::Http { status, body });
        }

        let body = response.text().await?;
        decode_envelope(&body)
    }
}

fn encode_form(params: &[(&str, String)]) -> String {
    params
        .iter()
        .map(|(key, value)| format!("{}={}", key, urlencoding::encode(value)))
        .collect::<Vec<_>>()
        .join("&")
}

fn decode_envelope<T: DeserializeOwned>(body: &str) -> Result<T, VkError> {
    let envelope: ApiEnvelope<T> =
        serde_json::from_str(body).map_err(|e| VkError::Decode(e.to_string()))?;

    match envelope {
        ApiEnvelope {
            error: Some(error), ..
        } => Err(VkError::Api {
            code: error.error_code,
            message: error.error_msg,
        }),
        ApiEnvelope {
            response: Some(response),
            ..
        } => Ok(response),
        _ => Err(VkError::Decode("neither response nor error".to_string())),
    }
}

#[derive(Debug, Deserialize)]
struct ItemsResponse<T> {
    #[serde(default = "Vec::new")]
    items: Vec<T>,
}

#[derive(Debug, Deserialize)]
struct UserItem {
    id: i64,
    #[serde(default)]
    first_name: String,
    #[serde(default)]
    last_name: String,
    is_closed: Option<bool>,
}

#[derive(Debug, Deserialize)]
struct Counter {
    #[serde(default)]
    count: u32,
}

#[derive(Debug, Deserialize)]
struct PhotoItem {
    id: i64,
    owner_id: i64,
    likes: Option<Counter>,
    comments: Option<Counter>,
}

impl PhotoItem {
    fn into_media(self, tagged: bool) -> Media {
        Media {
            owner_id: self.owner_id,
            id: self.id,
            likes: self.likes.map(|c| c.count).unwrap_or(0),
            comments: self.comments.map(|c| c.count).unwrap_or(0),
            tagged,
        }
    }
}

impl From<UserItem> for Candidate {
    fn from(user: UserItem) -> Self {
        Candidate {
            id: user.id,
            first_name: user.first_name,
            last_name: user.last_name,
            // absent flag: assume private
            is_closed: user.is_closed.unwrap_or(true),
        }
    }
}

/// Search and photo endpoints, called with a user token
pub struct VkCandidateSource {
    client: VkClient,
}

impl VkCandidateSource {
    pub fn new(client: VkClient) -> Self {
        Self { client }
    }
}

#[async_trait]
impl CandidateSource for VkCandidateSource {
    fn name(&self) -> &'static str {
        "vk"
    }

    async fn search(
        &self,
        criteria: &SearchCriteria,
        offset: usize,
        count: usize,
    ) -> Result<Vec<Candidate>, SourceError> {
        let params = [
            ("count", count.to_string()),
            ("offset", offset.to_string()),
            ("age_from", criteria.age.to_string()),
            ("age_to", criteria.age.to_string()),
            ("sex", criteria.gender.code().to_string()),
            ("city", criteria.city.to_string()),
            ("status", criteria.status.code().to_string()),
            ("fields", "photo_id".to_string()),
        ];

        let response: ItemsResponse<UserItem> = self
            .client
            .call("users.search", &params)
            .await
            .map_err(|e| SourceError::SearchUnavailable(e.to_string()))?;

        Ok(response.items.into_iter().map(Candidate::from).collect())
    }

    async fn get_media(&self, candidate_id: CandidateId) -> Result<Vec<Media>, SourceError> {
        let own: ItemsResponse<PhotoItem> = self
            .client
            .call(
                "photos.getAll",
                &[
                    ("owner_id", candidate_id.to_string()),
                    ("extended", "1".to_string()),
                    ("count", "200".to_string()),
                ],
            )
            .await
            .map_err(|e| SourceError::MediaUnavailable {
                candidate_id,
                reason: e.to_string(),
            })?;

        let tagged = match self
            .client
            .call::<ItemsResponse<PhotoItem>>(
                "photos.getUserPhotos",
                &[
                    ("user_id", candidate_id.to_string()),
                    ("extended", "1".to_string()),
                    ("count", "100".to_string()),
                ],
            )
            .await
        {
            Ok(response) => response.items,
            Err(e) => {
                warn!("Tagged photos unavailable for {}: {}", candidate_id, e);
                Vec::new()
            }
        };

        Ok(merge_media(own.items, tagged))
    }
}

/// Own photos first in source order, then tagged ones; a photo present in
/// both lists is kept once and flagged as tagged.
fn merge_media(own: Vec<PhotoItem>, tagged: Vec<PhotoItem>) -> Vec<Media> {
    let mut media: Vec<Media> = own.into_iter().map(|p| p.into_media(false)).collect();
    let index: HashMap<(i64, i64), usize> = media
        .iter()
        .enumerate()
        .map(|(i, m)| (m.key(), i))
        .collect();

    for photo in tagged {
        let photo = photo.into_media(true);
        match index.get(&photo.key()) {
            Some(&i) => media[i].tagged = true,
            None => media.push(photo),
        }
    }
    media
}

/// `messages.send`, called with the community token
pub struct VkMessenger {
    client: VkClient,
}

impl VkMessenger {
    pub fn new(client: VkClient) -> Self {
        Self { client }
    }
}

#[async_trait]
impl Messenger for VkMessenger {
    async fn send(&self, user_id: UserId, reply: &Reply) -> Result<(), DeliveryError> {
        let mut params = vec![
            ("user_id", user_id.to_string()),
            ("message", reply.text.clone()),
            ("random_id", "0".to_string()),
        ];
        if !reply.attachments.is_empty() {
            params.push(("attachment", reply.attachments.join(",")));
        }

        match self.client.call::<serde_json::Value>("messages.send", &params).await {
            Ok(_) => Ok(()),
            Err(e) if e.is_suppressed() => Err(DeliveryError::Suppressed(e.to_string())),
            Err(e) => Err(DeliveryError::Failed(e.to_string())),
        }
    }
}

/// Extract a direct user message from a `message_new` event object.
///
/// Outgoing messages, chat messages and empty texts yield `None`.
pub fn inbound_from_event(object: &serde_json::Value) -> Option<InboundMessage> {
    // API >= 5.103 nests the message; older versions send it flat
    let message = object.get("message").unwrap_or(object);

    if message.get("out").and_then(|v| v.as_i64()) == Some(1) {
        return None;
    }

    let from_id = message.get("from_id").and_then(|v| v.as_i64())?;
    let peer_id = message
        .get("peer_id")
        .and_then(|v| v.as_i64())
        .unwrap_or(from_id);
    let text = message.get("text").and_then(|v| v.as_str())?.trim();

    if from_id <= 0 || peer_id != from_id || text.is_empty() {
        return None;
    }

    Some(InboundMessage {
        user_id: from_id,
        text: text.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_decode_response() {
        let body = r#"{"response": {"count": 2, "items": [
            {"id": 1, "first_name": "Anna", "last_name": "K", "is_closed": false},
            {"id": 2, "first_name": "Olga", "last_name": "M"}
        ]}}"#;

        let decoded: ItemsResponse<UserItem> = decode_envelope(body).unwrap();
        let candidates: Vec<Candidate> = decoded.items.into_iter().map(Candidate::from).collect();

        assert_eq!(candidates.len(), 2);
        assert!(!candidates[0].is_closed);
        assert!(candidates[1].is_closed, "missing is_closed counts as closed");
    }

    #[test]
    fn test_decode_missing_items() {
        let decoded: ItemsResponse<PhotoItem> = decode_envelope(r#"{"response": {"count": 0}}"#).unwrap();
        assert!(decoded.items.is_empty());
    }

    #[test]
    fn test_decode_api_error() {
        let body = r#"{"error": {"error_code": 9, "error_msg": "Flood control"}}"#;

        let err = decode_envelope::<serde_json::Value>(body).unwrap_err();

        assert!(matches!(err, VkError::Api { code: 9, .. }));
        assert!(err.is_suppressed());
    }

    #[test]
    fn test_decode_garbage() {
        let err = decode_envelope::<serde_json::Value>("<html>").unwrap_err();
        assert!(matches!(err, VkError::Decode(_)));
    }

    #[test]
    fn test_encode_form_escapes_values() {
        let encoded = encode_form(&[("message", "еще раз & снова".to_string()), ("v", "5.199".to_string())]);

        assert!(encoded.starts_with("message=%D0%B5"));
        assert!(encoded.contains("%26"));
        assert!(encoded.ends_with("&v=5.199"));
    }

    #[test]
    fn test_merge_media_flags_tagged() {
        let own = vec![
            PhotoItem { id: 1, owner_id: 5, likes: Some(Counter { count: 3 }), comments: None },
            PhotoItem { id: 2, owner_id: 5, likes: None, comments: Some(Counter { count: 1 }) },
        ];
        let tagged = vec![
            PhotoItem { id: 2, owner_id: 5, likes: None, comments: None },
            PhotoItem { id: 9, owner_id: 77, likes: Some(Counter { count: 8 }), comments: None },
        ];

        let media = merge_media(own, tagged);

        assert_eq!(media.len(), 3);
        assert!(!media[0].tagged);
        assert!(media[1].tagged);
        assert_eq!(media[1].comments, 1);
        assert_eq!(media[2].attachment(), "photo77_9");
        assert!(media[2].tagged);
    }

    #[test]
    fn test_inbound_from_event() {
        let event = json!({"message": {"from_id": 42, "peer_id": 42, "text": " Еще ", "out": 0}});
        assert_eq!(
            inbound_from_event(&event),
            Some(InboundMessage { user_id: 42, text: "Еще".to_string() })
        );

        let chat = json!({"message": {"from_id": 42, "peer_id": 2000000001, "text": "hi"}});
        assert_eq!(inbound_from_event(&chat), None);

        let outgoing = json!({"message": {"from_id": 42, "peer_id": 42, "text": "hi", "out": 1}});
        assert_eq!(inbound_from_event(&outgoing), None);

        let empty = json!({"message": {"from_id": 42, "peer_id": 42, "text": "  "}});
        assert_eq!(inbound_from_event(&empty), None);

        let community = json!({"message": {"from_id": -5, "peer_id": -5, "text": "hi"}});
        assert_eq!(inbound_from_event(&community), None);
    }

    #[tokio::test]
    #[ignore] // Requires network access and a valid token
    async fn test_vk_client_integration() {
        let token = std::env::var("VKINDER_USER_TOKEN").unwrap_or_default();
        let client = VkClient::new(DEFAULT_API_URL, token, DEFAULT_API_VERSION);

        let result = client
            .call::<serde_json::Value>("users.get", &[("user_ids", "1".to_string())])
            .await;
        assert!(result.is_ok());
    }
}
