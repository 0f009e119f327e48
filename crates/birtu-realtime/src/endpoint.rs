//! Real-time endpoint derivation

use birtu_core::UserId;
use url::Url;

use crate::error::ChannelError;

/// Derive the per-user socket address from the HTTP API base
///
/// `http` becomes `ws`, `https` becomes `wss`, and `/ws/{user_id}` is appended to the
/// base path: `http://localhost:8000/api` gives `ws://localhost:8000/api/ws/{user_id}`.
pub fn realtime_endpoint(base_url: &str, user_id: &UserId) -> Result<Url, ChannelError> {
    let mut url = Url::parse(base_url)
        .map_err(|err| ChannelError::invalid_endpoint(base_url, err.to_string()))?;

    let scheme = match url.scheme() {
        "http" | "ws" => "ws",
        "https" | "wss" => "wss",
        other => {
            return Err(ChannelError::invalid_endpoint(
                base_url,
                format!("unsupported scheme {}", other),
            ))
        }
    };
    url.set_scheme(scheme)
        .map_err(|_| ChannelError::invalid_endpoint(base_url, "cannot change scheme"))?;
    url.set_query(None);
    url.set_fragment(None);

    url.path_segments_mut()
        .map_err(|_| ChannelError::invalid_endpoint(base_url, "base URL cannot hold a path"))?
        .pop_if_empty()
        .push("ws")
        .push(user_id.as_str());
    Ok(url)
}
