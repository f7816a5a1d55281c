//! Seam to the viewer identity collaborator.
//!
//! Identity issuance (cookies, wallet linking) happens elsewhere; this module
//! only recovers the current viewer from a request, minting a throwaway id
//! when the caller presents none so every stream has an owner.

use std::convert::Infallible;

use axum::{extract::FromRequestParts, http::header::COOKIE, http::request::Parts};
use uuid::Uuid;

/// Header carrying the stable anonymous viewer id.
const VIEWER_ID_HEADER: &str = "x-viewer-id";
/// Header carrying an optional linked wallet address.
const VIEWER_ADDRESS_HEADER: &str = "x-viewer-address";
/// Cookie fallback for browsers that cannot set custom SSE headers.
const VIEWER_ID_COOKIE: &str = "viewer_id";

/// The viewer behind the current request.
#[derive(Debug, Clone)]
pub struct Viewer {
    /// Stable identity across reconnects within a client session.
    pub owner_id: String,
    /// Lazily attached secondary identity, when the client linked one.
    pub address: Option<String>,
}

impl<S> FromRequestParts<S> for Viewer
where
    S: Send + Sync,
{
    type Rejection = Infallible;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let header_id = parts
            .headers
            .get(VIEWER_ID_HEADER)
            .and_then(|value| value.to_str().ok())
            .map(str::trim)
            .filter(|value| !value.is_empty())
            .map(str::to_owned);

        let cookie_id = parts
            .headers
            .get(COOKIE)
            .and_then(|value| value.to_str().ok())
            .and_then(cookie_viewer_id);

        let owner_id = header_id
            .or(cookie_id)
            .unwrap_or_else(|| Uuid::new_v4().simple().to_string());

        let address = parts
            .headers
            .get(VIEWER_ADDRESS_HEADER)
            .and_then(|value| value.to_str().ok())
            .map(str::trim)
            .filter(|value| !value.is_empty())
            .map(str::to_owned);

        Ok(Viewer { owner_id, address })
    }
}

/// Pull the viewer id out of a `Cookie` header value.
fn cookie_viewer_id(header: &str) -> Option<String> {
    header.split(';').find_map(|pair| {
        let (name, value) = pair.trim().split_once('=')?;
        (name == VIEWER_ID_COOKIE && !value.is_empty()).then(|| value.to_owned())
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cookie_parsing_finds_viewer_id() {
        assert_eq!(
            cookie_viewer_id("theme=dark; viewer_id=abc123; lang=en"),
            Some("abc123".to_string())
        );
        assert_eq!(cookie_viewer_id("theme=dark"), None);
        assert_eq!(cookie_viewer_id("viewer_id="), None);
    }
}
