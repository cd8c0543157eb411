// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Auth token state (§3 Auth token): opaque bearer string plus an absolute
//! expiry, shared by the three communicator coroutines and written only by
//! the authenticator.

use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

use base64::Engine;

/// Fallback token lifetime used when the JWT `exp` claim cannot be decoded.
const DEFAULT_TOKEN_LIFETIME: Duration = Duration::from_secs(900);

#[derive(Debug, Clone, Default)]
pub struct TokenState {
    pub bearer: Option<String>,
    expires_at: Option<Instant>,
}

impl TokenState {
    /// Remaining lifetime; zero once expired or before any token is set.
    pub fn remaining(&self) -> Duration {
        match self.expires_at {
            Some(expiry) => expiry.saturating_duration_since(Instant::now()),
            None => Duration::ZERO,
        }
    }

    pub fn set(&mut self, bearer: String) {
        let expires_at = decode_jwt_exp(&bearer)
            .map(|exp_unix_secs| instant_from_unix(exp_unix_secs))
            .unwrap_or_else(|| Instant::now() + DEFAULT_TOKEN_LIFETIME);
        self.bearer = Some(bearer);
        self.expires_at = Some(expires_at);
    }

    /// Discard the current token so the next `authenticate()` call does not
    /// skip re-auth on its `remaining() > 0` fast path (used on a 401).
    pub fn clear(&mut self) {
        self.bearer = None;
        self.expires_at = None;
    }
}

fn instant_from_unix(exp_unix_secs: i64) -> Instant {
    let now_unix = SystemTime::now().duration_since(UNIX_EPOCH).map(|d| d.as_secs() as i64).unwrap_or(0);
    let remaining = (exp_unix_secs - now_unix).max(0) as u64;
    Instant::now() + Duration::from_secs(remaining)
}

/// Decode the `exp` claim out of a JWT's unverified payload segment. The
/// agent never verifies the signature here — it only reads its own token's
/// claimed expiry to decide when to refresh.
fn decode_jwt_exp(token: &str) -> Option<i64> {
    let payload = token.split('.').nth(1)?;
    let decoded = base64::engine::general_purpose::URL_SAFE_NO_PAD.decode(payload).ok()?;
    let value: serde_json::Value = serde_json::from_slice(&decoded).ok()?;
    value.get("exp")?.as_i64()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn make_jwt(exp: i64) -> String {
        let header = base64::engine::general_purpose::URL_SAFE_NO_PAD.encode(r#"{"alg":"none"}"#);
        let payload = base64::engine::general_purpose::URL_SAFE_NO_PAD.encode(format!(r#"{{"exp":{exp}}}"#));
        format!("{header}.{payload}.sig")
    }

    #[test]
    fn set_decodes_exp_claim() {
        let now_unix = SystemTime::now().duration_since(UNIX_EPOCH).unwrap_or_else(|_| Duration::ZERO).as_secs() as i64;
        let mut state = TokenState::default();
        state.set(make_jwt(now_unix + 120));
        let remaining = state.remaining();
        assert!(remaining > Duration::from_secs(100) && remaining <= Duration::from_secs(120));
    }

    #[test]
    fn set_falls_back_on_malformed_token() {
        let mut state = TokenState::default();
        state.set("not-a-jwt".to_owned());
        assert!(state.remaining() > Duration::from_secs(800));
    }

    #[test]
    fn no_token_has_zero_remaining() {
        let state = TokenState::default();
        assert_eq!(state.remaining(), Duration::ZERO);
    }
}
