//! Chat history over REST.
//!
//! A chat view is seeded from `GET group/history/{id}` and then kept current
//! by the realtime session. The backend wraps every payload in
//! `{success, message, data}`.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;
use tracing::{debug, instrument, warn};

use tally_core::{GroupId, UserId};
use tally_settings::ApiSettings;

use crate::auth::TokenSupplier;
use crate::errors::HistoryError;
use crate::protocol::InboundFrame;

// ─────────────────────────────────────────────────────────────────────────────
// Wire types
// ─────────────────────────────────────────────────────────────────────────────

/// A group's details together with its expenses and messages so far.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct GroupHistory {
    /// The group.
    #[serde(deserialize_with = "lenient_id")]
    pub id: GroupId,
    /// Display name.
    #[serde(default)]
    pub name: String,
    /// Group owner.
    pub user_id: UserId,
    /// Free-form description.
    #[serde(default)]
    pub description: String,
    /// Number of members.
    #[serde(default)]
    pub total_users: u32,
    /// Expenses recorded in the group.
    #[serde(default, deserialize_with = "nullable_vec")]
    pub expenses: Vec<Expense>,
    /// Chat messages.
    #[serde(default, deserialize_with = "nullable_vec")]
    pub messages: Vec<ChatMessage>,
}

/// One stored chat message.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ChatMessage {
    /// Row id; absent on messages that only came over the socket.
    #[serde(default, alias = "ID", deserialize_with = "lenient_opt_id")]
    pub id: Option<i64>,
    /// Creation time.
    #[serde(default, alias = "CreatedAt")]
    pub created_at: Option<DateTime<Utc>>,
    /// Last update.
    #[serde(default, alias = "UpdatedAt")]
    pub updated_at: Option<DateTime<Utc>>,
    /// Soft-delete time.
    #[serde(default, alias = "DeletedAt")]
    pub deleted_at: Option<DateTime<Utc>>,
    /// Event type, normally `"message"`.
    #[serde(rename = "type", default = "message_kind")]
    pub kind: String,
    /// Message text.
    #[serde(default)]
    pub body: String,
    /// Author.
    #[serde(default)]
    pub sender: Option<UserId>,
    /// Group the message was posted to.
    pub group_id: GroupId,
}

/// One stored expense.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Expense {
    /// Row id.
    #[serde(default, alias = "ID", deserialize_with = "lenient_opt_id")]
    pub id: Option<i64>,
    /// Creation time.
    #[serde(default, alias = "CreatedAt")]
    pub created_at: Option<DateTime<Utc>>,
    /// Last update.
    #[serde(default, alias = "UpdatedAt")]
    pub updated_at: Option<DateTime<Utc>>,
    /// Soft-delete time.
    #[serde(default, alias = "DeletedAt")]
    pub deleted_at: Option<DateTime<Utc>>,
    /// User who recorded the expense.
    pub user_id: UserId,
    /// Short title.
    #[serde(default)]
    pub title: String,
    /// Longer description.
    #[serde(default)]
    pub description: String,
    /// Total amount.
    pub amount: f64,
    /// Group the expense belongs to.
    pub group_id: GroupId,
    /// Number of payers.
    #[serde(default)]
    pub paid_by_count: u32,
    /// Split breakdown; kept opaque.
    #[serde(default)]
    pub splits: Option<Value>,
}

fn message_kind() -> String {
    "message".to_string()
}

#[derive(Deserialize)]
#[serde(untagged)]
enum RawId {
    Int(i64),
    Text(String),
}

impl RawId {
    fn into_i64<E: serde::de::Error>(self) -> Result<i64, E> {
        match self {
            Self::Int(n) => Ok(n),
            Self::Text(s) => s
                .trim()
                .parse()
                .map_err(|_| E::custom(format!("invalid id {s:?}"))),
        }
    }
}

/// Ids arrive as numbers, or as numeric strings from older endpoints.
fn lenient_id<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: From<i64>,
{
    RawId::deserialize(deserializer)?.into_i64().map(T::from)
}

fn lenient_opt_id<'de, D>(deserializer: D) -> Result<Option<i64>, D::Error>
where
    D: Deserializer<'de>,
{
    Option::<RawId>::deserialize(deserializer)?
        .map(RawId::into_i64)
        .transpose()
}

/// Empty collections are encoded as `null`.
fn nullable_vec<'de, D, T>(deserializer: D) -> Result<Vec<T>, D::Error>
where
    D: Deserializer<'de>,
    T: DeserializeOwned,
{
    Ok(Option::<Vec<T>>::deserialize(deserializer)?.unwrap_or_default())
}

impl TryFrom<&InboundFrame> for ChatMessage {
    type Error = serde_json::Error;

    fn try_from(frame: &InboundFrame) -> Result<Self, Self::Error> {
        serde_json::from_value(frame.payload().clone())
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Timeline
// ─────────────────────────────────────────────────────────────────────────────

/// An entry in a group's combined chat and expense feed.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum TimelineItem<'a> {
    /// A chat message.
    Message(&'a ChatMessage),
    /// An expense.
    Expense(&'a Expense),
}

impl TimelineItem<'_> {
    /// When the entry was created, if known.
    pub fn created_at(&self) -> Option<DateTime<Utc>> {
        match self {
            Self::Message(m) => m.created_at,
            Self::Expense(e) => e.created_at,
        }
    }
}

impl GroupHistory {
    /// Messages and expenses in creation order.
    ///
    /// Undated entries go last. Ties keep messages before expenses.
    pub fn timeline(&self) -> Vec<TimelineItem<'_>> {
        let mut items: Vec<_> = self
            .messages
            .iter()
            .map(TimelineItem::Message)
            .chain(self.expenses.iter().map(TimelineItem::Expense))
            .collect();
        items.sort_by_key(|item| {
            let at = item.created_at();
            (at.is_none(), at)
        });
        items
    }

    /// Append a message that arrived over the socket.
    ///
    /// Returns `false`, leaving the history untouched, if it belongs to
    /// another group.
    pub fn append(&mut self, message: ChatMessage) -> bool {
        if message.group_id != self.id {
            return false;
        }
        self.messages.push(message);
        true
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Client
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Deserialize)]
struct Envelope {
    #[serde(default)]
    success: bool,
    #[serde(default)]
    message: String,
    #[serde(default)]
    data: Option<GroupHistory>,
}

#[derive(Deserialize)]
struct ErrorBody {
    #[serde(default)]
    message: String,
}

/// Fetches chat history from the REST API.
#[derive(Clone)]
pub struct HistoryClient {
    client: reqwest::Client,
    base_url: String,
    tokens: Arc<dyn TokenSupplier>,
}

impl HistoryClient {
    /// Client with its own connection pool and a per-request timeout.
    pub fn new(
        base_url: impl Into<String>,
        timeout: Duration,
        tokens: Arc<dyn TokenSupplier>,
    ) -> Result<Self, HistoryError> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self::with_client(client, base_url, tokens))
    }

    /// Client built from API settings.
    pub fn from_settings(
        settings: &ApiSettings,
        tokens: Arc<dyn TokenSupplier>,
    ) -> Result<Self, HistoryError> {
        Self::new(
            settings.base_url.clone(),
            Duration::from_millis(settings.timeout_ms),
            tokens,
        )
    }

    /// Client sharing an existing `reqwest::Client`.
    pub fn with_client(
        client: reqwest::Client,
        base_url: impl Into<String>,
        tokens: Arc<dyn TokenSupplier>,
    ) -> Self {
        Self {
            client,
            base_url: base_url.into(),
            tokens,
        }
    }

    /// Full URL of a group's history.
    pub fn endpoint(&self, group: GroupId) -> String {
        format!(
            "{}/group/history/{group}",
            self.base_url.trim_end_matches('/')
        )
    }

    /// Fetch a group's history.
    #[instrument(skip(self), fields(group_id = %group))]
    pub async fn fetch(&self, group: GroupId) -> Result<GroupHistory, HistoryError> {
        let mut request = self.client.get(self.endpoint(group));
        match self.tokens.access_token().await {
            Some(token) => request = request.bearer_auth(token),
            None => debug!("fetching history without an access token"),
        }

        let resp = request.send().await?;
        let status = resp.status();
        let body = resp.text().await?;

        if !status.is_success() {
            let message = serde_json::from_str::<ErrorBody>(&body)
                .map(|e| e.message)
                .ok()
                .filter(|m| !m.is_empty())
                .unwrap_or(body);
            warn!(status = status.as_u16(), %message, "history request failed");
            return Err(HistoryError::Rejected {
                status: status.as_u16(),
                message,
            });
        }

        let envelope: Envelope = serde_json::from_str(&body)?;
        if !envelope.success {
            warn!(message = %envelope.message, "history request rejected");
            return Err(HistoryError::Rejected {
                status: status.as_u16(),
                message: envelope.message,
            });
        }

        let history = envelope.data.ok_or(HistoryError::MissingData)?;
        debug!(
            messages = history.messages.len(),
            expenses = history.expenses.len(),
            "history fetched"
        );
        Ok(history)
    }
}

impl std::fmt::Debug for HistoryClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HistoryClient")
            .field("base_url", &self.base_url)
            .finish_non_exhaustive()
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;
    use serde_json::json;
    use wiremock::matchers::{header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    use crate::auth::StaticTokenSupplier;

    fn client(server: &MockServer, tokens: StaticTokenSupplier) -> HistoryClient {
        HistoryClient::new(server.uri(), Duration::from_secs(5), Arc::new(tokens)).unwrap()
    }

    fn history_json() -> Value {
        json!({
            "id": 42,
            "name": "Goa trip",
            "user_id": 1,
            "description": "beach",
            "total_users": 3,
            "expenses": [{
                "id": 10,
                "created_at": "2024-04-03T12:43:00Z",
                "user_id": 1,
                "title": "Dinner",
                "description": "",
                "amount": 55.0,
                "group_id": 42,
                "paid_by_count": 1,
                "splits": null
            }],
            "messages": [
                {"id": 1, "created_at": "2024-04-04T09:04:00Z", "type": "message",
                 "body": "did you pay?", "sender": 2, "group_id": 42},
                {"id": 2, "created_at": "2024-04-02T08:00:00Z", "type": "message",
                 "body": "welcome", "sender": 1, "group_id": 42}
            ]
        })
    }

    // ── decoding ────────────────────────────────────────────────────

    #[test]
    fn decodes_snake_case_history() {
        let history: GroupHistory = serde_json::from_value(history_json()).unwrap();
        assert_eq!(history.id, GroupId::new(42));
        assert_eq!(history.total_users, 3);
        assert_eq!(history.expenses[0].amount, 55.0);
        assert_eq!(history.messages[0].sender, Some(UserId::new(2)));
    }

    #[test]
    fn accepts_legacy_capitalised_keys() {
        let msg: ChatMessage = serde_json::from_value(json!({
            "ID": "7",
            "CreatedAt": "2024-04-03T12:43:00Z",
            "UpdatedAt": "2024-04-03T12:43:00Z",
            "DeletedAt": null,
            "type": "message",
            "body": "hi",
            "sender": 3,
            "group_id": 42
        }))
        .unwrap();
        assert_eq!(msg.id, Some(7));
        assert!(msg.created_at.is_some());
        assert!(msg.deleted_at.is_none());
    }

    #[test]
    fn string_group_id_is_accepted() {
        let mut raw = history_json();
        raw["id"] = json!("42");
        let history: GroupHistory = serde_json::from_value(raw).unwrap();
        assert_eq!(history.id, GroupId::new(42));
    }

    #[test]
    fn non_numeric_id_is_rejected() {
        let mut raw = history_json();
        raw["id"] = json!("abc");
        assert!(serde_json::from_value::<GroupHistory>(raw).is_err());
    }

    #[test]
    fn null_collections_decode_empty() {
        let history: GroupHistory = serde_json::from_value(json!({
            "id": 1, "name": "g", "user_id": 1, "expenses": null, "messages": null
        }))
        .unwrap();
        assert!(history.expenses.is_empty());
        assert!(history.messages.is_empty());
    }

    #[test]
    fn message_from_inbound_frame() {
        let frame = InboundFrame::parse(
            r#"{"type":"message","group_id":42,"body":"hello","sender":9}"#,
        )
        .unwrap();
        let msg = ChatMessage::try_from(&frame).unwrap();
        assert_eq!(msg.body, "hello");
        assert_eq!(msg.group_id, GroupId::new(42));
        assert!(msg.id.is_none());
    }

    // ── timeline ────────────────────────────────────────────────────

    #[test]
    fn timeline_orders_by_creation() {
        let history: GroupHistory = serde_json::from_value(history_json()).unwrap();
        let bodies: Vec<String> = history
            .timeline()
            .iter()
            .map(|item| match item {
                TimelineItem::Message(m) => m.body.clone(),
                TimelineItem::Expense(e) => e.title.clone(),
            })
            .collect();
        assert_eq!(bodies, ["welcome", "Dinner", "did you pay?"]);
    }

    #[test]
    fn undated_items_sort_last() {
        let mut history: GroupHistory = serde_json::from_value(history_json()).unwrap();
        assert!(history.append(ChatMessage {
            id: None,
            created_at: None,
            updated_at: None,
            deleted_at: None,
            kind: "message".into(),
            body: "live".into(),
            sender: None,
            group_id: GroupId::new(42),
        }));
        let last = *history.timeline().last().unwrap();
        assert_matches!(last, TimelineItem::Message(m) if m.body == "live");
    }

    #[test]
    fn append_rejects_other_group() {
        let mut history: GroupHistory = serde_json::from_value(history_json()).unwrap();
        let mut msg = history.messages[0].clone();
        msg.group_id = GroupId::new(7);
        assert!(!history.append(msg));
        assert_eq!(history.messages.len(), 2);
    }

    // ── client ──────────────────────────────────────────────────────

    #[test]
    fn endpoint_joins_base_url() {
        let tokens: Arc<dyn TokenSupplier> = Arc::new(StaticTokenSupplier::anonymous());
        let with_slash =
            HistoryClient::with_client(reqwest::Client::new(), "http://api/v1/", tokens.clone());
        let without = HistoryClient::with_client(reqwest::Client::new(), "http://api/v1", tokens);
        assert_eq!(
            with_slash.endpoint(GroupId::new(5)),
            "http://api/v1/group/history/5"
        );
        assert_eq!(with_slash.endpoint(GroupId::new(5)), without.endpoint(GroupId::new(5)));
    }

    #[tokio::test]
    async fn fetch_sends_bearer_and_decodes() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/group/history/42"))
            .and(header("authorization", "Bearer tok"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "success": true,
                "message": "ok",
                "data": history_json()
            })))
            .expect(1)
            .mount(&server)
            .await;

        let history = client(&server, StaticTokenSupplier::new("tok"))
            .fetch(GroupId::new(42))
            .await
            .unwrap();
        assert_eq!(history.name, "Goa trip");
        assert_eq!(history.messages.len(), 2);
    }

    #[tokio::test]
    async fn fetch_without_token_omits_header() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/group/history/1"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "success": true, "message": "", "data": {"id": 1, "user_id": 1}
            })))
            .mount(&server)
            .await;

        let _ = client(&server, StaticTokenSupplier::anonymous())
            .fetch(GroupId::new(1))
            .await
            .unwrap();

        let requests = server.received_requests().await.unwrap();
        assert_eq!(requests.len(), 1);
        assert!(!requests[0].headers.contains_key("authorization"));
    }

    #[tokio::test]
    async fn unsuccessful_envelope_is_rejected() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "success": false, "message": "group not found"
            })))
            .mount(&server)
            .await;

        let err = client(&server, StaticTokenSupplier::anonymous())
            .fetch(GroupId::new(9))
            .await
            .unwrap_err();
        assert_matches!(err, HistoryError::Rejected { status: 200, ref message } if message == "group not found");
    }

    #[tokio::test]
    async fn error_status_uses_server_message() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(
                ResponseTemplate::new(403)
                    .set_body_json(json!({"success": false, "message": "not a member"})),
            )
            .mount(&server)
            .await;

        let err = client(&server, StaticTokenSupplier::new("tok"))
            .fetch(GroupId::new(9))
            .await
            .unwrap_err();
        assert_matches!(err, HistoryError::Rejected { status: 403, ref message } if message == "not a member");
    }

    #[tokio::test]
    async fn error_status_with_plain_body() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(502).set_body_string("bad gateway"))
            .mount(&server)
            .await;

        let err = client(&server, StaticTokenSupplier::anonymous())
            .fetch(GroupId::new(9))
            .await
            .unwrap_err();
        assert_matches!(err, HistoryError::Rejected { status: 502, ref message } if message == "bad gateway");
    }

    #[tokio::test]
    async fn success_without_data() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(
                ResponseTemplate::new(200).set_body_json(json!({"success": true, "message": "ok"})),
            )
            .mount(&server)
            .await;

        let err = client(&server, StaticTokenSupplier::anonymous())
            .fetch(GroupId::new(9))
            .await
            .unwrap_err();
        assert_matches!(err, HistoryError::MissingData);
    }

    #[tokio::test]
    async fn invalid_json_body() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_string("<html>"))
            .mount(&server)
            .await;

        let err = client(&server, StaticTokenSupplier::anonymous())
            .fetch(GroupId::new(9))
            .await
            .unwrap_err();
        assert_matches!(err, HistoryError::Json(_));
    }
}
