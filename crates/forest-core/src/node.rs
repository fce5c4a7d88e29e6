/* This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this
 * file, You can obtain one at https://mozilla.org/MPL/2.0/. */

//! Node records and the read-side shapes built from them.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::tab::{Tab, TabError, TabId, WindowId};

/// One tracked tab.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Node {
    pub id: TabId,
    pub url: String,
    pub title: String,
    pub window_id: WindowId,
    pub index: u32,
    pub pinned: bool,
    /// Kept consistent with the parent's `children` by the store.
    pub parent_id: Option<TabId>,
    /// Ordered by child `index`, no duplicates.
    pub children: Vec<TabId>,
    /// Unix epoch milliseconds.
    pub created_at_ms: i64,
}

impl Node {
    pub(crate) fn from_tab(tab: &Tab, created_at_ms: i64) -> Self {
        Self {
            id: tab.id,
            url: tab.url.clone(),
            title: tab.title.clone(),
            window_id: tab.window_id,
            index: tab.index,
            pinned: tab.pinned,
            parent_id: None,
            children: Vec::new(),
            created_at_ms,
        }
    }

    pub fn is_root(&self) -> bool {
        self.parent_id.is_none()
    }
}

/// Property update for an existing node.
///
/// There is no way to express `id`, `parentId` or `children` here; reparenting
/// goes through `opener`, which the store validates before linking.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", try_from = "Value")]
pub struct NodePatch {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub window_id: Option<WindowId>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub index: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pinned: Option<bool>,
    /// `Some(None)` detaches the node to root, `Some(Some(p))` requests parent `p`.
    #[serde(rename = "openerTabId", skip_serializing_if = "Option::is_none")]
    pub opener: Option<Option<TabId>>,
}

impl NodePatch {
    pub fn index(index: u32) -> Self {
        Self {
            index: Some(index),
            ..Self::default()
        }
    }

    pub fn placement(window_id: WindowId, index: u32) -> Self {
        Self {
            window_id: Some(window_id),
            index: Some(index),
            ..Self::default()
        }
    }

    pub fn opener(opener: Option<TabId>) -> Self {
        Self {
            opener: Some(opener),
            ..Self::default()
        }
    }

    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }

    /// Parse a host `changedFields` payload.
    ///
    /// Unknown keys, including `id`, `parentId` and `children`, are dropped.
    /// A recognised key with the wrong type is a malformed patch.
    pub fn from_json(value: &Value) -> Result<Self, TabError> {
        let object = value.as_object().ok_or(TabError::NotAnObject)?;
        let mut patch = Self::default();

        for (key, raw) in object {
            match key.as_str() {
                "url" => patch.url = Some(expect_str(raw, "url")?),
                "title" => patch.title = Some(expect_str(raw, "title")?),
                "windowId" => patch.window_id = Some(WindowId(expect_u64(raw, "windowId")?)),
                "index" => {
                    let index = expect_u64(raw, "index")?;
                    patch.index = Some(u32::try_from(index).map_err(|_| {
                        TabError::InvalidField {
                            field: "index",
                            value: index.to_string(),
                        }
                    })?);
                },
                "pinned" => {
                    patch.pinned = Some(raw.as_bool().ok_or_else(|| TabError::InvalidField {
                        field: "pinned",
                        value: raw.to_string(),
                    })?)
                },
                "openerTabId" => {
                    patch.opener = Some(match raw {
                        Value::Null => None,
                        other => Some(TabId(expect_u64(other, "openerTabId")?)),
                    })
                },
                _ => {},
            }
        }
        Ok(patch)
    }
}

impl TryFrom<Value> for NodePatch {
    type Error = TabError;

    fn try_from(value: Value) -> Result<Self, Self::Error> {
        Self::from_json(&value)
    }
}

fn expect_str(raw: &Value, field: &'static str) -> Result<String, TabError> {
    raw.as_str()
        .map(str::to_owned)
        .ok_or_else(|| TabError::InvalidField {
            field,
            value: raw.to_string(),
        })
}

fn expect_u64(raw: &Value, field: &'static str) -> Result<u64, TabError> {
    raw.as_u64().ok_or_else(|| TabError::InvalidField {
        field,
        value: raw.to_string(),
    })
}

/// A root (or subtree) with its ordered children, recursively.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TreeNode {
    pub node: Node,
    pub children: Vec<TreeNode>,
}

/// One pre-order entry of a flattened forest.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FlatEntry {
    pub node: Node,
    pub depth: usize,
}
