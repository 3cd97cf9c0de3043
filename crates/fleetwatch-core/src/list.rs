//! The list envelope shared by every listable entity.
//!
//! Callers pass [`ListOptions`] and receive a [`ListResponse`]. Stores never
//! see tokens: they receive a decoded [`PageRequest`] ("items strictly after
//! this key, at most this many") and return a [`Page`], which the
//! [`CursorCodec`](crate::CursorCodec) turns back into an envelope.

use serde::{Deserialize, Serialize};

/// Options accepted by every list operation.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ListOptions {
    /// Maximum number of items to return. Zero means "use the default".
    #[serde(default)]
    pub limit: u32,
    /// Continuation token from a previous response. Empty means "from the start".
    #[serde(default, rename = "continue", skip_serializing_if = "Option::is_none")]
    pub continue_token: Option<String>,
}

impl ListOptions {
    /// Options for the first page with the given limit.
    #[must_use]
    pub const fn new(limit: u32) -> Self {
        Self {
            limit,
            continue_token: None,
        }
    }

    /// Continue from a token returned by a previous response.
    #[must_use]
    pub fn continue_from(mut self, token: impl Into<String>) -> Self {
        self.continue_token = Some(token.into());
        self
    }
}

/// A page of results plus the token needed to fetch the next one.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ListResponse<T> {
    /// Items in collection order.
    pub items: Vec<T>,
    /// Token for the next page, empty when the listing is complete.
    #[serde(rename = "continue")]
    pub continue_token: String,
    /// Number of items remaining after this page at the time of the read.
    pub remaining_item_count: u64,
}

impl<T> ListResponse<T> {
    /// Convert the items while keeping the continuation state.
    #[must_use]
    pub fn map<U>(self, f: impl FnMut(T) -> U) -> ListResponse<U> {
        ListResponse {
            items: self.items.into_iter().map(f).collect(),
            continue_token: self.continue_token,
            remaining_item_count: self.remaining_item_count,
        }
    }

    /// Returns true if there is no further page.
    #[must_use]
    pub fn is_complete(&self) -> bool {
        self.continue_token.is_empty()
    }
}

/// Default and maximum page sizes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PageLimits {
    /// Limit used when the caller does not specify one.
    pub default_limit: u32,
    /// Upper bound applied to every request.
    pub max_limit: u32,
}

impl Default for PageLimits {
    fn default() -> Self {
        Self {
            default_limit: 100,
            max_limit: 1000,
        }
    }
}

/// A decoded page request handed to a store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PageRequest {
    /// Return only items whose key sorts strictly after this one.
    pub after: Option<Vec<u8>>,
    /// Maximum number of items to return (always at least 1).
    pub limit: u32,
}

impl PageRequest {
    /// A request for the first page.
    #[must_use]
    pub const fn first(limit: u32) -> Self {
        Self { after: None, limit }
    }

    /// Returns true if `key` belongs after the request's starting point.
    #[must_use]
    pub fn admits(&self, key: &[u8]) -> bool {
        self.after.as_deref().map_or(true, |after| key > after)
    }
}

/// A page returned by a store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Page<T> {
    /// Items in key order.
    pub items: Vec<T>,
    /// Key of the last returned item.
    pub last_key: Option<Vec<u8>>,
    /// Number of items after the last returned one.
    pub remaining: u64,
}

impl<T> Page<T> {
    /// An empty, complete page.
    #[must_use]
    pub const fn empty() -> Self {
        Self {
            items: Vec::new(),
            last_key: None,
            remaining: 0,
        }
    }

    /// Convert the items while keeping the continuation state.
    #[must_use]
    pub fn map<U>(self, f: impl FnMut(T) -> U) -> Page<U> {
        Page {
            items: self.items.into_iter().map(f).collect(),
            last_key: self.last_key,
            remaining: self.remaining,
        }
    }
}

/// Cut a page out of entries already sorted ascending by key.
///
/// Used by in-memory collections; the `RocksDB` store performs the same scan
/// directly on its ordered iterators.
pub fn paginate_sorted<T>(
    entries: impl IntoIterator<Item = (Vec<u8>, T)>,
    request: &PageRequest,
) -> Page<T> {
    let limit = request.limit.max(1) as usize;
    let mut items = Vec::with_capacity(limit.min(64));
    let mut last_key = None;
    let mut remaining = 0u64;

    for (key, item) in entries {
        if !request.admits(&key) {
            continue;
        }
        if items.len() < limit {
            items.push(item);
            last_key = Some(key);
        } else {
            remaining += 1;
        }
    }

    Page {
        items,
        last_key,
        remaining,
    }
}
