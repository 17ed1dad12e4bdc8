//! Pagination primitives for list endpoints.
//!
//! Every list operation accepts client-supplied paging which is clamped to
//! the server-side bounds before it reaches the store.

use serde::{Deserialize, Serialize};

/// Default number of items per page.
pub const DEFAULT_PAGE_SIZE: u32 = 20;

/// Maximum number of items per page; larger requests are clamped.
pub const MAX_PAGE_SIZE: u32 = 100;

/// Raw paging parameters as supplied by a client.
#[derive(Debug, Clone, Copy, Default, Deserialize)]
pub struct PageParams {
    /// Zero-based page index.
    #[serde(default)]
    pub page: u32,
    /// Requested page size; clamped to [`MAX_PAGE_SIZE`].
    #[serde(default)]
    pub page_size: Option<u32>,
}

/// A validated page window, ready to translate into `LIMIT`/`OFFSET`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Page {
    /// Zero-based page index.
    pub number: u32,
    /// Effective page size after clamping.
    pub size: u32,
}

impl Page {
    /// Build a page window from raw parameters, clamping the size into
    /// `1..=MAX_PAGE_SIZE` and defaulting to [`DEFAULT_PAGE_SIZE`].
    #[must_use]
    pub fn clamped(params: PageParams) -> Self {
        let size = params
            .page_size
            .unwrap_or(DEFAULT_PAGE_SIZE)
            .clamp(1, MAX_PAGE_SIZE);
        Self {
            number: params.page,
            size,
        }
    }

    /// Number of rows to skip.
    #[must_use]
    pub const fn offset(&self) -> u64 {
        self.number as u64 * self.size as u64
    }

    /// Number of rows to fetch.
    #[must_use]
    pub const fn limit(&self) -> u64 {
        self.size as u64
    }
}

impl Default for Page {
    fn default() -> Self {
        Self {
            number: 0,
            size: DEFAULT_PAGE_SIZE,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_apply() {
        let page = Page::clamped(PageParams::default());
        assert_eq!(page.size, DEFAULT_PAGE_SIZE);
        assert_eq!(page.offset(), 0);
    }

    #[test]
    fn oversized_request_is_clamped() {
        let page = Page::clamped(PageParams {
            page: 2,
            page_size: Some(10_000),
        });
        assert_eq!(page.size, MAX_PAGE_SIZE);
        assert_eq!(page.offset(), 200);
    }

    #[test]
    fn zero_size_becomes_one() {
        let page = Page::clamped(PageParams {
            page: 0,
            page_size: Some(0),
        });
        assert_eq!(page.size, 1);
    }
}
