//! Request filtering for pass-through traffic.
//!
//! A filter sees every request bound for the provider before it is
//! forwarded. It may rewrite the request (add an auth header, say) or answer
//! it directly so the provider is never contacted. Filters never see
//! state-setup requests.

use std::future::Future;

use axum::extract::Request;
use axum::response::Response;
use futures_util::future::BoxFuture;
use futures_util::FutureExt;

/// What to do with a request after filtering.
pub enum FilterOutcome {
    /// Forward this (possibly modified) request to the provider.
    Forward(Request),
    /// Answer with this response without contacting the provider.
    Respond(Response),
}

pub trait RequestFilter: Send + Sync {
    fn filter(&self, request: Request) -> BoxFuture<'static, FilterOutcome>;
}

impl<F, Fut> RequestFilter for F
where
    F: Fn(Request) -> Fut + Send + Sync,
    Fut: Future<Output = FilterOutcome> + Send + 'static,
{
    fn filter(&self, request: Request) -> BoxFuture<'static, FilterOutcome> {
        self(request).boxed()
    }
}
