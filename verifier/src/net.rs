//! Local address detection.

use reqwest::Url;

/// Host names that refer to the machine running the verifier.
pub const LOCAL_ADDRESSES: [&str; 5] = ["localhost", "127.0.0.1", "0.0.0.0", "::1", "[::1]"];

/// Whether `url` points at this machine. Unparseable URLs are not local.
pub fn is_local_url(url: &str) -> bool {
    let Ok(parsed) = Url::parse(url) else {
        return false;
    };
    let Some(host) = parsed.host_str() else {
        return false;
    };
    let host_port = match parsed.port() {
        Some(port) => format!("{host}:{port}"),
        None => host.to_string(),
    };
    LOCAL_ADDRESSES.contains(&host) || LOCAL_ADDRESSES.contains(&host_port.as_str())
}
