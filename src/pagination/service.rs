//! Offset pagination behind opaque cursors

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

use super::cursor::{CursorCodec, CursorError};
use crate::context::token_budget::EffectivePolicy;
use crate::error::{GatewayError, Result};
use crate::policy::PolicyStore;

/// One page of results
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Page<T> {
    pub items: Vec<T>,
    pub next_cursor: Option<String>,
    pub meta: PageMeta,
}

/// Page bookkeeping; `next_cursor` is present exactly when `has_more` is true
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PageMeta {
    /// Upstream total, `None` when the upstream did not report one
    pub total_count: Option<u64>,
    pub page_size: usize,
    pub has_more: bool,
}

/// What the fetch callback is asked for
#[derive(Debug, Clone, PartialEq)]
pub struct PageRequest {
    pub offset: u64,
    pub limit: usize,
    pub order_by: Option<String>,
    pub filters: Option<Map<String, Value>>,
}

/// What the fetch callback returns
#[derive(Debug, Clone)]
pub struct Fetched<T> {
    pub items: Vec<T>,
    pub total_count: Option<u64>,
}

/// Stateless page builder; all traversal state lives in the cursor
pub struct PaginationService {
    codec: Arc<CursorCodec>,
    policies: Arc<PolicyStore>,
    cursor_ttl: Duration,
}

impl PaginationService {
    pub fn new(codec: Arc<CursorCodec>, policies: Arc<PolicyStore>, cursor_ttl: Duration) -> Self {
        Self {
            codec,
            policies,
            cursor_ttl,
        }
    }

    pub fn cursor_ttl(&self) -> Duration {
        self.cursor_ttl
    }

    /// Clamp a requested page size into `[1, max_page_size]`.
    ///
    /// Missing or non-positive sizes fall back to the default instead of
    /// failing the request.
    pub fn resolve_page_size(requested: Option<i64>, policy: &EffectivePolicy) -> usize {
        let max = policy.max_page_size.max(1);
        match requested {
            Some(size) if size > 0 => (size as u64).min(max as u64) as usize,
            _ => policy.default_page_size.clamp(1, max),
        }
    }

    /// Fetch the first page for `endpoint`
    pub async fn first_page<T, F, Fut, E>(
        &self,
        endpoint: &str,
        page_size: Option<i64>,
        order_by: Option<String>,
        filters: Option<Map<String, Value>>,
        fetch: F,
    ) -> Result<Page<T>>
    where
        F: FnOnce(PageRequest) -> Fut,
        Fut: Future<Output = std::result::Result<Fetched<T>, E>>,
        E: Into<GatewayError>,
    {
        let policy = self.policies.resolve(endpoint);
        let request = PageRequest {
            offset: 0,
            limit: Self::resolve_page_size(page_size, &policy),
            order_by,
            filters,
        };
        self.fetch_page(request, fetch).await
    }

    /// Fetch the page a previous page's cursor points at.
    ///
    /// Sort order and filters come from the cursor, so a filtered traversal
    /// stays consistent across pages.
    pub async fn next_page<T, F, Fut, E>(
        &self,
        endpoint: &str,
        cursor: &str,
        page_size: Option<i64>,
        fetch: F,
    ) -> Result<Page<T>>
    where
        F: FnOnce(PageRequest) -> Fut,
        Fut: Future<Output = std::result::Result<Fetched<T>, E>>,
        E: Into<GatewayError>,
    {
        let payload = self.codec.decode(cursor, self.cursor_ttl)?;
        let policy = self.policies.resolve(endpoint);
        let request = PageRequest {
            offset: payload.offset,
            limit: Self::resolve_page_size(page_size, &policy),
            order_by: payload.order_by,
            filters: payload.filters,
        };
        self.fetch_page(request, fetch).await
    }

    async fn fetch_page<T, F, Fut, E>(&self, request: PageRequest, fetch: F) -> Result<Page<T>>
    where
        F: FnOnce(PageRequest) -> Fut,
        Fut: Future<Output = std::result::Result<Fetched<T>, E>>,
        E: Into<GatewayError>,
    {
        let fetched = fetch(request.clone()).await.map_err(Into::into)?;
        self.build_page(request, fetched)
    }

    /// Assemble a page from fetched items, minting a cursor when more remain.
    ///
    /// Without an upstream total, a full page is taken to mean more items
    /// may follow.
    pub fn build_page<T>(&self, request: PageRequest, fetched: Fetched<T>) -> Result<Page<T>> {
        let mut items = fetched.items;
        items.truncate(request.limit);

        let seen = request.offset + items.len() as u64;
        let has_more = match fetched.total_count {
            Some(total) => seen < total,
            None => !items.is_empty() && items.len() == request.limit,
        };

        let next_cursor = if has_more {
            let next_offset = i64::try_from(seen).map_err(|_| {
                GatewayError::from(CursorError::Validation("offset out of range".to_string()))
            })?;
            Some(
                self.codec
                    .encode(next_offset, request.order_by.clone(), request.filters.clone())?,
            )
        } else {
            None
        };

        debug!(
            offset = request.offset,
            returned = items.len(),
            has_more,
            "built page"
        );

        Ok(Page {
            meta: PageMeta {
                total_count: fetched.total_count,
                page_size: items.len(),
                has_more,
            },
            next_cursor,
            items,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::token_budget::BudgetPolicy;
    use secrecy::SecretString;
    use serde_json::json;
    use std::convert::Infallible;

    fn service() -> (PaginationService, Arc<CursorCodec>) {
        let codec = Arc::new(CursorCodec::new(SecretString::new("secret".to_string())));
        let policies = Arc::new(PolicyStore::with_defaults());
        (
            PaginationService::new(codec.clone(), policies, Duration::from_secs(600)),
            codec,
        )
    }

    fn numbers(request: &PageRequest, total: u64) -> Vec<u64> {
        (request.offset..total).take(request.limit).collect()
    }

    #[test]
    fn test_page_size_clamping() {
        let policy = BudgetPolicy::default();
        assert_eq!(PaginationService::resolve_page_size(None, &policy), 20);
        assert_eq!(PaginationService::resolve_page_size(Some(0), &policy), 20);
        assert_eq!(PaginationService::resolve_page_size(Some(-5), &policy), 20);
        assert_eq!(PaginationService::resolve_page_size(Some(7), &policy), 7);
        assert_eq!(PaginationService::resolve_page_size(Some(5000), &policy), 100);
    }

    #[tokio::test]
    async fn test_traverses_all_pages() {
        let (service, _) = service();
        let total = 45u64;

        let mut page = service
            .first_page("/api/v1/bookings", Some(20), None, None, |req| async move {
                Ok::<_, Infallible>(Fetched { items: numbers(&req, total), total_count: Some(total) })
            })
            .await
            .unwrap_or_else(|e| panic!("{}", e));

        let mut seen = page.items.clone();
        let mut pages = 1;
        while let Some(cursor) = page.next_cursor.clone() {
            assert!(page.meta.has_more);
            page = service
                .next_page("/api/v1/bookings", &cursor, Some(20), |req| async move {
                    Ok::<_, Infallible>(Fetched { items: numbers(&req, total), total_count: Some(total) })
                })
                .await
                .unwrap_or_else(|e| panic!("{}", e));
            seen.extend(page.items.iter().copied());
            pages += 1;
        }

        assert_eq!(pages, 3);
        assert!(!page.meta.has_more);
        assert_eq!(page.meta.page_size, 5);
        assert_eq!(seen, (0..total).collect::<Vec<_>>());
    }

    #[tokio::test]
    async fn test_cursor_carries_order_and_filters() {
        let (service, codec) = service();
        let filters = json!({"status": "confirmed"}).as_object().cloned();

        let page = service
            .first_page(
                "/api/v1/bookings",
                Some(2),
                Some("check_in".to_string()),
                filters.clone(),
                |req| async move {
                    Ok::<_, Infallible>(Fetched { items: numbers(&req, 10), total_count: Some(10) })
                },
            )
            .await
            .unwrap_or_else(|e| panic!("{}", e));

        let cursor = page.next_cursor.expect("more pages");
        let payload = codec.decode(&cursor, Duration::from_secs(60)).unwrap();
        assert_eq!(payload.offset, 2);
        assert_eq!(payload.order_by.as_deref(), Some("check_in"));
        assert_eq!(payload.filters, filters);

        let mut observed = None;
        service
            .next_page("/api/v1/bookings", &cursor, Some(2), |req| {
                observed = Some(req.clone());
                async move {
                    Ok::<_, Infallible>(Fetched { items: numbers(&req, 10), total_count: Some(10) })
                }
            })
            .await
            .unwrap_or_else(|e| panic!("{}", e));
        let observed = observed.unwrap();
        assert_eq!(observed.offset, 2);
        assert_eq!(observed.order_by.as_deref(), Some("check_in"));
        assert_eq!(observed.filters, filters);
    }

    #[tokio::test]
    async fn test_invalid_cursor_propagates_kind() {
        let (service, _) = service();
        let result = service
            .next_page("/api/v1/bookings", "garbage!", None, |_| async {
                Ok::<_, Infallible>(Fetched::<u64> { items: vec![], total_count: Some(0) })
            })
            .await;
        assert!(matches!(
            result,
            Err(GatewayError::Cursor(CursorError::Malformed(_)))
        ));

        let foreign = CursorCodec::new(SecretString::new("other".to_string()))
            .encode(5, None, None)
            .unwrap();
        let result = service
            .next_page("/api/v1/bookings", &foreign, None, |_| async {
                Ok::<_, Infallible>(Fetched::<u64> { items: vec![], total_count: Some(0) })
            })
            .await;
        assert!(matches!(result, Err(GatewayError::Cursor(CursorError::Tampered))));
    }

    #[test]
    fn test_heuristic_without_total() {
        let (service, _) = service();
        let request = PageRequest { offset: 0, limit: 3, order_by: None, filters: None };

        let full = service
            .build_page(request.clone(), Fetched { items: vec![1, 2, 3], total_count: None })
            .unwrap();
        assert!(full.meta.has_more);
        assert!(full.next_cursor.is_some());
        assert_eq!(full.meta.total_count, None);

        let short = service
            .build_page(request, Fetched { items: vec![1], total_count: None })
            .unwrap();
        assert!(!short.meta.has_more);
        assert!(short.next_cursor.is_none());
    }

    #[test]
    fn test_oversized_upstream_page_is_truncated() {
        let (service, _) = service();
        let request = PageRequest { offset: 0, limit: 2, order_by: None, filters: None };
        let page = service
            .build_page(request, Fetched { items: vec![1, 2, 3, 4], total_count: Some(4) })
            .unwrap();
        assert_eq!(page.items, vec![1, 2]);
        assert_eq!(page.meta.page_size, 2);
        assert!(page.meta.has_more);
    }

    #[test]
    fn test_empty_page() {
        let (service, _) = service();
        let request = PageRequest { offset: 0, limit: 10, order_by: None, filters: None };
        let page = service
            .build_page(request, Fetched::<u64> { items: vec![], total_count: Some(0) })
            .unwrap();
        assert!(!page.meta.has_more);
        assert!(page.next_cursor.is_none());
        assert_eq!(page.meta.page_size, 0);
    }
}
