//! Pass-through forwarding to the real provider.

use axum::body::{to_bytes, Body};
use axum::extract::Request;
use axum::http::{header, HeaderMap, HeaderName, HeaderValue};
use axum::response::Response;
use reqwest::Url;
use tracing::debug;

use crate::error::ProxyError;

/// Largest request body the proxy will buffer before forwarding.
pub(crate) const MAX_BODY_BYTES: usize = 32 * 1024 * 1024;

/// Headers that describe a single connection and must not be forwarded.
const HOP_BY_HOP: [HeaderName; 8] = [
    header::CONNECTION,
    HeaderName::from_static("keep-alive"),
    header::PROXY_AUTHENTICATE,
    header::PROXY_AUTHORIZATION,
    header::TE,
    header::TRAILER,
    header::TRANSFER_ENCODING,
    header::UPGRADE,
];

/// The provider the proxy forwards to.
///
/// Method, path, query, headers and body are passed through unchanged apart
/// from hop-by-hop headers and, when origin rewriting is on, `Host` and
/// `Origin`.
#[derive(Clone, Debug)]
pub struct Upstream {
    client: reqwest::Client,
    base: Url,
    change_origin: bool,
}

impl Upstream {
    /// Build a forwarder for `base_url`.
    ///
    /// With `validate_ssl` off, invalid upstream certificates are accepted.
    pub fn new(base_url: &str, validate_ssl: bool, change_origin: bool) -> Result<Self, ProxyError> {
        let base = Url::parse(base_url).map_err(|e| ProxyError::InvalidUpstream {
            url: base_url.to_string(),
            reason: e.to_string(),
        })?;
        if !matches!(base.scheme(), "http" | "https") || base.host_str().is_none() {
            return Err(ProxyError::InvalidUpstream {
                url: base_url.to_string(),
                reason: "expected an absolute http(s) URL".to_string(),
            });
        }

        let client = reqwest::Client::builder()
            .danger_accept_invalid_certs(!validate_ssl)
            .redirect(reqwest::redirect::Policy::none())
            .build()
            .map_err(|e| ProxyError::Client(e.to_string()))?;

        Ok(Self {
            client,
            base,
            change_origin,
        })
    }

    pub fn base(&self) -> &Url {
        &self.base
    }

    pub fn changes_origin(&self) -> bool {
        self.change_origin
    }

    /// Full upstream URL for an incoming path and query.
    ///
    /// A path on the base URL is kept as a prefix.
    pub fn target_url(&self, path_and_query: &str) -> String {
        let base = self.base.as_str().trim_end_matches('/');
        if path_and_query.starts_with('/') {
            format!("{base}{path_and_query}")
        } else {
            format!("{base}/{path_and_query}")
        }
    }

    /// Forward `request` and relay the provider's response.
    pub async fn forward(&self, request: Request) -> Result<Response, ProxyError> {
        let (parts, body) = request.into_parts();
        let body = to_bytes(body, MAX_BODY_BYTES)
            .await
            .map_err(|e| ProxyError::Body(e.to_string()))?;

        let path_and_query = parts
            .uri
            .path_and_query()
            .map(|pq| pq.as_str())
            .unwrap_or("/");
        let url = self.target_url(path_and_query);
        let headers = self.outbound_headers(parts.headers);

        debug!(method = %parts.method, url = %url, "forwarding to provider");

        let upstream = self
            .client
            .request(parts.method, &url)
            .headers(headers)
            .body(body)
            .send()
            .await
            .map_err(|e| ProxyError::Upstream(e.to_string()))?;

        let status = upstream.status();
        let mut headers = upstream.headers().clone();
        strip_hop_by_hop(&mut headers);
        // The body is re-framed by the proxy.
        headers.remove(header::CONTENT_LENGTH);
        let bytes = upstream
            .bytes()
            .await
            .map_err(|e| ProxyError::Upstream(e.to_string()))?;

        let mut response = Response::new(Body::from(bytes));
        *response.status_mut() = status;
        *response.headers_mut() = headers;
        Ok(response)
    }

    fn outbound_headers(&self, mut headers: HeaderMap) -> HeaderMap {
        strip_hop_by_hop(&mut headers);
        headers.remove(header::CONTENT_LENGTH);

        if self.change_origin {
            // Without a Host header the client derives it from the target URL.
            headers.remove(header::HOST);
            if headers.contains_key(header::ORIGIN) {
                let origin = self.base.origin().ascii_serialization();
                if let Ok(value) = HeaderValue::from_str(&origin) {
                    headers.insert(header::ORIGIN, value);
                }
            }
        }
        headers
    }
}

fn strip_hop_by_hop(headers: &mut HeaderMap) {
    for name in HOP_BY_HOP.iter() {
        headers.remove(name);
    }
}
