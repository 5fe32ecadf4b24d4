//! Wire schema of the v2 search and counts responses.
//!
//! Responses are decoded in two steps: the envelope (`data`, `includes`,
//! `meta`) is parsed loosely, then every item is decoded strictly into its
//! record type so that a missing required field is reported as
//! [`FetchFailure::Malformed`] instead of silently defaulting.

use std::collections::HashMap;

use serde::de::DeserializeOwned;
use serde::Deserialize;

use crate::error::FetchFailure;

use super::client::Endpoint;
use super::types::{CountBucket, Cursor, Page, Tweet, User};

/// A record type that one endpoint returns in `data`.
pub trait Record: DeserializeOwned + Send + 'static {
    /// Endpoint serving this record type.
    const ENDPOINT: Endpoint;

    /// Attach expansion objects from `includes`.
    fn resolve_expansions(&mut self, _users: &HashMap<String, User>) {}
}

impl Record for Tweet {
    const ENDPOINT: Endpoint = Endpoint::SearchRecent;

    fn resolve_expansions(&mut self, users: &HashMap<String, User>) {
        self.author = users.get(&self.author_id).cloned();
    }
}

impl Record for CountBucket {
    const ENDPOINT: Endpoint = Endpoint::CountsRecent;
}

#[derive(Debug, Deserialize)]
struct Envelope {
    /// Absent when the result set is empty.
    #[serde(default)]
    data: Option<Vec<serde_json::Value>>,
    #[serde(default)]
    includes: Includes,
    #[serde(default)]
    meta: Meta,
}

#[derive(Debug, Default, Deserialize)]
struct Includes {
    #[serde(default)]
    users: Vec<User>,
}

#[derive(Debug, Default, Deserialize)]
struct Meta {
    #[serde(default)]
    next_token: Option<String>,
}

/// Decode a success body into a page of records.
pub fn decode_page<R: Record>(body: &str) -> Result<Page<R>, FetchFailure> {
    let envelope: Envelope = serde_json::from_str(body)
        .map_err(|e| FetchFailure::Malformed(format!("invalid response envelope: {e}")))?;

    let users: HashMap<String, User> = envelope
        .includes
        .users
        .into_iter()
        .map(|u| (u.id.clone(), u))
        .collect();

    let raw_items = envelope.data.unwrap_or_default();
    let mut items = Vec::with_capacity(raw_items.len());
    for (index, value) in raw_items.into_iter().enumerate() {
        let id = value
            .get("id")
            .and_then(serde_json::Value::as_str)
            .map(str::to_string);
        let mut item: R = serde_json::from_value(value).map_err(|e| {
            FetchFailure::Malformed(match &id {
                Some(id) => format!("item {index} (id {id}): {e}"),
                None => format!("item {index}: {e}"),
            })
        })?;
        item.resolve_expansions(&users);
        items.push(item);
    }

    // An empty token is as good as none.
    let next_token = envelope
        .meta
        .next_token
        .filter(|t| !t.is_empty())
        .map(Cursor::new);

    Ok(Page::new(items, next_token))
}
