//! De-duplication of concurrent identical GET requests.

use std::collections::HashMap;
use std::sync::Mutex;

use futures::FutureExt;
use futures::future::{BoxFuture, Shared};

use super::error::Result;
use crate::http::HttpResponse;

type SharedResponse = Shared<BoxFuture<'static, Result<HttpResponse>>>;

/// Table of in-flight requests keyed by method, URL and body.
#[derive(Default)]
pub(crate) struct InFlight {
    requests: Mutex<HashMap<String, SharedResponse>>,
}

impl InFlight {
    /// Run `factory` unless an identical request is already in flight, in
    /// which case await that request instead.
    pub(crate) async fn coalesce<F>(&self, key: String, factory: F) -> Result<HttpResponse>
    where
        F: FnOnce() -> BoxFuture<'static, Result<HttpResponse>>,
    {
        let request = {
            let mut requests = self.requests.lock().unwrap_or_else(|e| e.into_inner());
            match requests.get(&key) {
                Some(existing) => {
                    tracing::debug!(key = %key, "joining in-flight request");
                    existing.clone()
                }
                None => {
                    let shared = factory().shared();
                    requests.insert(key.clone(), shared.clone());
                    shared
                }
            }
        };

        let result = request.clone().await;

        // Only remove the entry we awaited; a newer request may have replaced it.
        let mut requests = self.requests.lock().unwrap_or_else(|e| e.into_inner());
        if requests
            .get(&key)
            .is_some_and(|current| Shared::ptr_eq(current, &request))
        {
            requests.remove(&key);
        }

        result
    }

    #[cfg(test)]
    pub(crate) fn len(&self) -> usize {
        self.requests.lock().unwrap_or_else(|e| e.into_inner()).len()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;

    fn ok(body: &str) -> HttpResponse {
        HttpResponse::new(200, body)
    }

    #[tokio::test]
    async fn test_concurrent_identical_keys_share_one_call() {
        let in_flight = InFlight::default();
        let calls = Arc::new(AtomicUsize::new(0));

        let make = |calls: Arc<AtomicUsize>| {
            move || {
                async move {
                    calls.fetch_add(1, Ordering::SeqCst);
                    tokio::task::yield_now().await;
                    Ok(ok("shared"))
                }
                .boxed()
            }
        };

        let (a, b) = tokio::join!(
            in_flight.coalesce("GET /a".to_string(), make(Arc::clone(&calls))),
            in_flight.coalesce("GET /a".to_string(), make(Arc::clone(&calls))),
        );

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(a.expect("first"), b.expect("second"));
        assert_eq!(in_flight.len(), 0);
    }

    #[tokio::test]
    async fn test_sequential_calls_are_not_cached() {
        let in_flight = InFlight::default();
        let calls = Arc::new(AtomicUsize::new(0));

        for _ in 0..2 {
            let calls = Arc::clone(&calls);
            in_flight
                .coalesce("GET /a".to_string(), move || {
                    async move {
                        calls.fetch_add(1, Ordering::SeqCst);
                        Ok(ok("x"))
                    }
                    .boxed()
                })
                .await
                .expect("response");
        }

        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }
}
