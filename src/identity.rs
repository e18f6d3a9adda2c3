//! Best-effort caller identity.
//!
//! Derives a stable per-caller key from request metadata. Identity here is
//! an abuse deterrent, not a security boundary: forwarded addresses are
//! spoofable and visitor tokens are client-chosen. The usage guard treats
//! the key accordingly.

use crate::usage::Tier;

/// Key used when no identity signal is present at all.
pub const ANONYMOUS_CLIENT: &str = "anonymous";

/// Request metadata relevant to identity and tier resolution.
///
/// The transport layer (HTTP handler, test harness) fills this in from
/// headers; the core never sees raw requests.
#[derive(Debug, Clone, Default)]
pub struct CallerInfo {
    /// Explicit per-client token (`x-visitor-id`).
    pub visitor_token: Option<String>,
    /// Proxy-forwarded address list (`x-forwarded-for`), comma-separated.
    pub forwarded_for: Option<String>,
    /// Direct peer address (`x-real-ip`).
    pub real_ip: Option<String>,
    /// Caller-declared tier (`x-user-tier`). A default — a durable store
    /// record marking the client as paid overrides it.
    pub tier_hint: Tier,
}

impl CallerInfo {
    /// Resolve the client key.
    ///
    /// Precedence: non-empty visitor token, then the first entry of the
    /// forwarded list, then the peer address, then [`ANONYMOUS_CLIENT`].
    /// Always returns a non-empty string.
    pub fn client_key(&self) -> String {
        if let Some(token) = self.visitor_token.as_deref().map(str::trim)
            && !token.is_empty()
        {
            return token.to_string();
        }
        if let Some(first) = self
            .forwarded_for
            .as_deref()
            .and_then(|v| v.split(',').next())
            .map(str::trim)
            && !first.is_empty()
        {
            return first.to_string();
        }
        if let Some(ip) = self.real_ip.as_deref().map(str::trim)
            && !ip.is_empty()
        {
            return ip.to_string();
        }
        ANONYMOUS_CLIENT.to_string()
    }
}
