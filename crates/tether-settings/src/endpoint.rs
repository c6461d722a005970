//! Realtime endpoint derivation.
//!
//! The WebSocket endpoint is always the deployment origin plus a fixed path
//! suffix. The scheme follows the page: `https` pages talk `wss`, `http`
//! pages talk `ws`.

use url::Url;

use crate::errors::{Result, SettingsError};

/// Build the WebSocket URL for `base_url` with the fixed `path` suffix.
///
/// - `https://host` → `wss://host<path>`, `http://host` → `ws://host<path>`
/// - `ws://` and `wss://` bases keep their scheme
/// - a bare `host[:port]` is treated as secure
/// - userinfo, path, query and fragment on the base are discarded
///
/// Fails with [`SettingsError::InvalidValue`] when the base does not parse,
/// has no host, or uses any other scheme.
pub fn ws_url(base_url: &str, path: &str) -> Result<String> {
    let trimmed = base_url.trim();
    if trimmed.is_empty() {
        return Err(invalid(base_url, "empty"));
    }
    // a bare `host:port` would otherwise parse as scheme `host`
    let candidate = if trimmed.contains("://") {
        trimmed.to_string()
    } else {
        format!("https://{trimmed}")
    };

    let mut url = Url::parse(&candidate).map_err(|e| invalid(base_url, &e.to_string()))?;
    let scheme = match url.scheme() {
        "http" | "ws" => "ws",
        "https" | "wss" => "wss",
        other => return Err(invalid(base_url, &format!("unsupported scheme `{other}`"))),
    };
    if url.host_str().is_none_or(str::is_empty) {
        return Err(invalid(base_url, "missing host"));
    }

    // http(s) and ws(s) are all special schemes, so switching between them
    // always succeeds
    url.set_scheme(scheme)
        .map_err(|()| invalid(base_url, "cannot switch scheme"))?;
    url.set_username("")
        .map_err(|()| invalid(base_url, "cannot strip username"))?;
    url.set_password(None)
        .map_err(|()| invalid(base_url, "cannot strip password"))?;
    url.set_path(&normalize_path(path));
    url.set_query(None);
    url.set_fragment(None);
    Ok(url.into())
}

fn invalid(base_url: &str, reason: &str) -> SettingsError {
    SettingsError::InvalidValue(format!("connection.baseUrl `{base_url}`: {reason}"))
}

fn normalize_path(path: &str) -> String {
    if path.is_empty() || path.starts_with('/') {
        path.to_string()
    } else {
        format!("/{path}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;

    fn ok(base: &str, path: &str) -> String {
        ws_url(base, path).unwrap()
    }

    #[test]
    fn https_maps_to_wss() {
        assert_eq!(ok("https://app.example.com", "/ws"), "wss://app.example.com/ws");
    }

    #[test]
    fn http_maps_to_ws() {
        assert_eq!(ok("http://localhost:8000", "/ws"), "ws://localhost:8000/ws");
    }

    #[test]
    fn websocket_schemes_are_kept() {
        assert_eq!(ok("ws://10.0.0.2:9000", "/ws"), "ws://10.0.0.2:9000/ws");
        assert_eq!(ok("wss://edge.example.com", "/ws"), "wss://edge.example.com/ws");
    }

    #[test]
    fn bare_host_defaults_to_secure() {
        assert_eq!(ok("app.example.com", "/ws"), "wss://app.example.com/ws");
        assert_eq!(ok("localhost:8443", "/ws"), "wss://localhost:8443/ws");
    }

    #[test]
    fn base_path_is_replaced() {
        assert_eq!(
            ok("https://app.example.com/dashboard/matches?tab=1#top", "/ws"),
            "wss://app.example.com/ws"
        );
        assert_eq!(ok("https://app.example.com/", "/ws"), "wss://app.example.com/ws");
    }

    #[test]
    fn scheme_and_host_are_case_insensitive() {
        assert_eq!(ok("HTTP://Example.com", "/ws"), "ws://example.com/ws");
    }

    #[test]
    fn path_gets_leading_slash() {
        assert_eq!(ok("https://a.example", "realtime"), "wss://a.example/realtime");
    }

    #[test]
    fn credentials_are_stripped() {
        assert_eq!(
            ok("https://user:pw@app.example.com", "/ws"),
            "wss://app.example.com/ws"
        );
    }

    #[test]
    fn empty_base_is_rejected() {
        assert_matches!(ws_url("", "/ws"), Err(SettingsError::InvalidValue(_)));
        assert_matches!(ws_url("   ", "/ws"), Err(SettingsError::InvalidValue(_)));
        assert_matches!(ws_url("https://", "/ws"), Err(SettingsError::InvalidValue(_)));
    }

    #[test]
    fn malformed_host_is_rejected() {
        assert_matches!(
            ws_url("app example.com", "/ws"),
            Err(SettingsError::InvalidValue(_))
        );
        assert_matches!(
            ws_url("https://app example.com", "/ws"),
            Err(SettingsError::InvalidValue(_))
        );
    }

    #[test]
    fn other_schemes_are_rejected() {
        let err = ws_url("ftp://files.example.com", "/ws").unwrap_err();
        assert!(err.to_string().contains("unsupported scheme `ftp`"), "{err}");
        assert_matches!(
            ws_url("file:///etc/hosts", "/ws"),
            Err(SettingsError::InvalidValue(_))
        );
    }
}
