/* This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this
 * file, You can obtain one at https://mozilla.org/MPL/2.0/. */

//! Tab identity and the record the host hands over.
//!
//! Host payloads are loosely shaped JSON. Everything that reaches the store
//! goes through [`Tab::from_json`] first, so the store only ever sees
//! well-formed ids.

use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Host-assigned tab identity, stable for the tab's lifetime.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TabId(pub u64);

/// Host-assigned window identity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct WindowId(pub u64);

impl fmt::Display for TabId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "tab:{}", self.0)
    }
}

impl fmt::Display for WindowId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "window:{}", self.0)
    }
}

/// A tab as reported by the host's query or lifecycle notifications.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", try_from = "Value")]
pub struct Tab {
    pub id: TabId,
    pub window_id: WindowId,
    /// Position inside the window; ordering only, not identity.
    pub index: u32,
    pub url: String,
    pub title: String,
    pub pinned: bool,
    /// The tab this one was opened from, if the host still tracks it.
    pub opener_tab_id: Option<TabId>,
}

impl Tab {
    pub fn new(id: u64, window_id: u64, index: u32) -> Self {
        Self {
            id: TabId(id),
            window_id: WindowId(window_id),
            index,
            url: String::new(),
            title: String::new(),
            pinned: false,
            opener_tab_id: None,
        }
    }

    pub fn with_opener(mut self, opener: u64) -> Self {
        self.opener_tab_id = Some(TabId(opener));
        self
    }

    pub fn with_url(mut self, url: impl Into<String>) -> Self {
        self.url = url.into();
        self
    }

    pub fn with_title(mut self, title: impl Into<String>) -> Self {
        self.title = title.into();
        self
    }

    pub fn pinned(mut self) -> Self {
        self.pinned = true;
        self
    }

    /// Validate a host payload into a `Tab`.
    ///
    /// `id`, `windowId` and `index` are required non-negative integers. String
    /// fields default to empty, `pinned` to false, and an opener that is not a
    /// valid id is treated as absent.
    pub fn from_json(value: &Value) -> Result<Self, TabError> {
        let object = value.as_object().ok_or(TabError::NotAnObject)?;

        let id = match object.get("id") {
            None | Some(Value::Null) => return Err(TabError::MissingId),
            Some(raw) => raw
                .as_u64()
                .ok_or_else(|| TabError::InvalidId(raw.to_string()))?,
        };
        let window_id = required_u64(object, "windowId")?;
        let index = required_u64(object, "index")?;
        let index = u32::try_from(index).map_err(|_| TabError::InvalidField {
            field: "index",
            value: index.to_string(),
        })?;

        Ok(Self {
            id: TabId(id),
            window_id: WindowId(window_id),
            index,
            url: optional_string(object, "url"),
            title: optional_string(object, "title"),
            pinned: object.get("pinned").and_then(Value::as_bool).unwrap_or(false),
            opener_tab_id: object.get("openerTabId").and_then(Value::as_u64).map(TabId),
        })
    }
}

impl TryFrom<Value> for Tab {
    type Error = TabError;

    fn try_from(value: Value) -> Result<Self, Self::Error> {
        Self::from_json(&value)
    }
}

fn required_u64(object: &Map<String, Value>, field: &'static str) -> Result<u64, TabError> {
    match object.get(field) {
        None | Some(Value::Null) => Err(TabError::MissingField(field)),
        Some(raw) => raw.as_u64().ok_or_else(|| TabError::InvalidField {
            field,
            value: raw.to_string(),
        }),
    }
}

fn optional_string(object: &Map<String, Value>, field: &str) -> String {
    object
        .get(field)
        .and_then(Value::as_str)
        .map(str::to_owned)
        .unwrap_or_default()
}

/// Rejection reasons for malformed host payloads.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TabError {
    NotAnObject,
    MissingId,
    InvalidId(String),
    MissingField(&'static str),
    InvalidField { field: &'static str, value: String },
}

impl fmt::Display for TabError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TabError::NotAnObject => write!(f, "tab payload is not an object"),
            TabError::MissingId => write!(f, "tab payload has no id"),
            TabError::InvalidId(raw) => write!(f, "tab id {raw} is not a non-negative integer"),
            TabError::MissingField(field) => write!(f, "tab payload is missing `{field}`"),
            TabError::InvalidField { field, value } => {
                write!(f, "tab field `{field}` has invalid value {value}")
            },
        }
    }
}

impl std::error::Error for TabError {}
