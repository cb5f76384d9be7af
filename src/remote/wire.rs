//! JSON bodies exchanged with the Pocket v3 API.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use html_escape::decode_html_entities;
use serde::{Deserialize, Serialize};

use crate::domain::{Item, ItemStatus, SyncState};
use crate::remote::{ApiError, ApiResult};

#[derive(Debug, Serialize)]
pub struct RequestTokenBody<'a> {
    pub consumer_key: &'a str,
    pub redirect_uri: &'a str,
}

#[derive(Debug, Deserialize)]
pub struct RequestTokenResponse {
    pub code: String,
}

#[derive(Debug, Serialize)]
pub struct AuthorizeBody<'a> {
    pub consumer_key: &'a str,
    pub code: &'a str,
}

#[derive(Debug, Deserialize)]
pub struct AuthorizeResponse {
    pub access_token: String,
    pub username: String,
}

#[derive(Debug, Serialize)]
pub struct GetBody<'a> {
    pub consumer_key: &'a str,
    pub access_token: &'a str,
    pub state: &'static str,
    #[serde(rename = "detailType")]
    pub detail_type: &'static str,
    pub sort: &'static str,
    pub count: u32,
    pub offset: u32,
}

#[derive(Debug, Deserialize)]
pub struct GetResponse {
    #[serde(default)]
    pub list: ItemList,
}

/// The service sends `[]` instead of `{}` when the listing is empty.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
pub enum ItemList {
    Map(HashMap<String, WireItem>),
    Empty(Vec<serde_json::Value>),
}

impl Default for ItemList {
    fn default() -> Self {
        ItemList::Empty(Vec::new())
    }
}

impl ItemList {
    pub fn len(&self) -> usize {
        match self {
            ItemList::Map(map) => map.len(),
            ItemList::Empty(_) => 0,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Decode into items ordered oldest first. Deleted entries are dropped.
    pub fn into_items(self) -> ApiResult<Vec<Item>> {
        let ItemList::Map(map) = self else {
            return Ok(Vec::new());
        };

        let mut items = Vec::with_capacity(map.len());
        for wire in map.into_values() {
            if let Some(item) = wire.into_item()? {
                items.push(item);
            }
        }
        items.sort_by(|a, b| a.added_at.cmp(&b.added_at).then_with(|| a.id.cmp(&b.id)));
        Ok(items)
    }
}

#[derive(Debug, Deserialize)]
pub struct WireItem {
    pub item_id: String,
    #[serde(default)]
    pub given_url: Option<String>,
    #[serde(default)]
    pub resolved_url: Option<String>,
    #[serde(default)]
    pub given_title: Option<String>,
    #[serde(default)]
    pub resolved_title: Option<String>,
    #[serde(default)]
    pub excerpt: Option<String>,
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default)]
    pub favorite: Option<String>,
    #[serde(default)]
    pub time_added: Option<String>,
}

impl WireItem {
    /// `None` for entries the service reports as deleted.
    pub fn into_item(self) -> ApiResult<Option<Item>> {
        let status = match self.status.as_deref() {
            None | Some("0") => ItemStatus::Unread,
            Some("1") => ItemStatus::Archived,
            Some("2") => return Ok(None),
            Some(other) => {
                return Err(ApiError::MalformedResponse(format!(
                    "item {} has unknown status {:?}",
                    self.item_id, other
                )))
            }
        };

        let added_at = match self.time_added.as_deref() {
            Some(raw) => parse_unix(raw).ok_or_else(|| {
                ApiError::MalformedResponse(format!(
                    "item {} has invalid time_added {:?}",
                    self.item_id, raw
                ))
            })?,
            None => DateTime::<Utc>::UNIX_EPOCH,
        };

        let url = first_non_empty(self.resolved_url, self.given_url).unwrap_or_default();
        let title = first_non_empty(self.resolved_title, self.given_title).unwrap_or_default();

        Ok(Some(Item {
            id: self.item_id,
            url,
            title: decode_html_entities(&title).to_string(),
            excerpt: decode_html_entities(self.excerpt.as_deref().unwrap_or("")).to_string(),
            status,
            favorite: self.favorite.as_deref() == Some("1"),
            added_at,
            sync_state: SyncState::Synced,
        }))
    }
}

#[derive(Debug, Serialize)]
pub struct SendBody<'a> {
    pub consumer_key: &'a str,
    pub access_token: &'a str,
    pub actions: Vec<SendAction<'a>>,
}

#[derive(Debug, Serialize)]
pub struct SendAction<'a> {
    pub action: &'a str,
    pub item_id: &'a str,
    pub time: i64,
}

#[derive(Debug, Deserialize)]
pub struct SendResponse {
    #[serde(default)]
    pub action_results: Vec<serde_json::Value>,
}

impl SendResponse {
    pub fn confirmed(&self) -> bool {
        !self.action_results.is_empty()
            && self
                .action_results
                .iter()
                .all(|r| !matches!(r, serde_json::Value::Bool(false)))
    }
}

#[derive(Debug, Serialize)]
pub struct AddBody<'a> {
    pub consumer_key: &'a str,
    pub access_token: &'a str,
    pub url: &'a str,
}

#[derive(Debug, Deserialize)]
pub struct AddResponse {
    pub item: AddedItem,
}

#[derive(Debug, Deserialize)]
pub struct AddedItem {
    pub item_id: String,
    #[serde(default)]
    pub resolved_url: Option<String>,
    #[serde(default)]
    pub normalized_url: Option<String>,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub excerpt: Option<String>,
}

impl AddedItem {
    pub fn into_item(self, requested_url: &str) -> Item {
        let url = first_non_empty(self.resolved_url, self.normalized_url)
            .unwrap_or_else(|| requested_url.to_string());
        let mut item = Item::new(self.item_id, url);
        item.title = decode_html_entities(self.title.as_deref().unwrap_or("")).to_string();
        item.excerpt = decode_html_entities(self.excerpt.as_deref().unwrap_or("")).to_string();
        item
    }
}

fn first_non_empty(a: Option<String>, b: Option<String>) -> Option<String> {
    a.filter(|s| !s.is_empty()).or(b.filter(|s| !s.is_empty()))
}

fn parse_unix(raw: &str) -> Option<DateTime<Utc>> {
    raw.trim()
        .parse::<i64>()
        .ok()
        .and_then(|secs| DateTime::from_timestamp(secs, 0))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decodes_listing_oldest_first() {
        let body = r#"{
            "status": 1,
            "list": {
                "20": {"item_id": "20", "given_url": "https://b.example", "given_title": "B",
                       "status": "1", "favorite": "1", "time_added": "200"},
                "10": {"item_id": "10", "given_url": "https://a.example",
                       "resolved_url": "https://a.example/final", "resolved_title": "A &amp; more",
                       "excerpt": "x &lt; y", "status": "0", "favorite": "0", "time_added": "100"}
            }
        }"#;
        let response: GetResponse = serde_json::from_str(body).unwrap();
        let items = response.list.into_items().unwrap();

        assert_eq!(items.len(), 2);
        assert_eq!(items[0].id, "10");
        assert_eq!(items[0].url, "https://a.example/final");
        assert_eq!(items[0].title, "A & more");
        assert_eq!(items[0].excerpt, "x < y");
        assert_eq!(items[0].status, ItemStatus::Unread);
        assert_eq!(items[1].status, ItemStatus::Archived);
        assert!(items[1].favorite);
    }

    #[test]
    fn test_empty_listing_is_an_array() {
        let response: GetResponse = serde_json::from_str(r#"{"status": 2, "list": []}"#).unwrap();
        assert!(response.list.is_empty());
        assert!(response.list.into_items().unwrap().is_empty());
    }

    #[test]
    fn test_deleted_entries_are_dropped() {
        let wire = WireItem {
            item_id: "7".into(),
            given_url: Some("https://gone.example".into()),
            resolved_url: None,
            given_title: None,
            resolved_title: None,
            excerpt: None,
            status: Some("2".into()),
            favorite: None,
            time_added: None,
        };
        assert!(wire.into_item().unwrap().is_none());
    }

    #[test]
    fn test_unknown_status_is_malformed() {
        let body = r#"{"list": {"1": {"item_id": "1", "status": "9"}}}"#;
        let response: GetResponse = serde_json::from_str(body).unwrap();
        assert!(matches!(
            response.list.into_items(),
            Err(ApiError::MalformedResponse(_))
        ));
    }

    #[test]
    fn test_send_response_confirmation() {
        let ok: SendResponse = serde_json::from_str(r#"{"status":1,"action_results":[true]}"#).unwrap();
        assert!(ok.confirmed());
        let rejected: SendResponse =
            serde_json::from_str(r#"{"status":1,"action_results":[false]}"#).unwrap();
        assert!(!rejected.confirmed());
        let empty: SendResponse = serde_json::from_str(r#"{"status":0}"#).unwrap();
        assert!(!empty.confirmed());
    }
}
