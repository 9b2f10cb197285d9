//! Tenant resolution from the session identity
//!
//! The bearer token is only decoded, never verified.

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine as _;
use millbook_config::TenantConfig;
use serde_json::Value;

use crate::error::{CoreError, CoreResult};

/// Subject claims checked in order
const SUBJECT_CLAIMS: [&str; 2] = ["sub", "user_id"];

fn invalid(reason: impl Into<String>) -> CoreError {
    CoreError::InvalidToken {
        reason: reason.into(),
    }
}

/// Read the subject claim of a JWT-shaped token
pub fn decode_subject(token: &str) -> CoreResult<String> {
    let token = token.trim();
    let token = token.strip_prefix("Bearer ").unwrap_or(token).trim();
    if token.is_empty() {
        return Err(CoreError::MissingTenant);
    }

    let mut parts = token.split('.');
    let payload = match (parts.next(), parts.next(), parts.next()) {
        (Some(_), Some(payload), Some(_)) => payload,
        _ => return Err(invalid("expected three dot-separated segments")),
    };

    let bytes = URL_SAFE_NO_PAD
        .decode(payload.trim_end_matches('='))
        .map_err(|e| invalid(format!("payload is not base64url: {}", e)))?;
    let claims: Value = serde_json::from_slice(&bytes)
        .map_err(|e| invalid(format!("payload is not JSON: {}", e)))?;

    SUBJECT_CLAIMS
        .iter()
        .filter_map(|claim| claims.get(claim).and_then(Value::as_str))
        .map(str::trim)
        .find(|s| !s.is_empty())
        .map(str::to_string)
        .ok_or_else(|| invalid("no subject claim"))
}

/// Tenant key for this session: the configured key, else the token subject
pub fn resolve_tenant(config: &TenantConfig) -> CoreResult<String> {
    if let Some(key) = config.key.as_deref().map(str::trim).filter(|k| !k.is_empty()) {
        log::debug!(target: "millbook::identity", "Using configured tenant key");
        return Ok(key.to_string());
    }
    match config.token.as_deref() {
        Some(token) => {
            let tenant = decode_subject(token)?;
            log::info!(target: "millbook::identity", "Resolved tenant {} from token", tenant);
            Ok(tenant)
        }
        None => Err(CoreError::MissingTenant),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn token_with(claims: &str) -> String {
        format!(
            "{}.{}.signature",
            URL_SAFE_NO_PAD.encode(r#"{"alg":"RS256"}"#),
            URL_SAFE_NO_PAD.encode(claims)
        )
    }

    #[test]
    fn test_decode_subject() {
        let token = token_with(r#"{"sub":"owner-42","iat":1}"#);
        assert_eq!(decode_subject(&token).unwrap(), "owner-42");
        assert_eq!(decode_subject(&format!("Bearer {}", token)).unwrap(), "owner-42");
    }

    #[test]
    fn test_user_id_fallback() {
        let token = token_with(r#"{"user_id":"owner-7"}"#);
        assert_eq!(decode_subject(&token).unwrap(), "owner-7");
    }

    #[test]
    fn test_malformed_tokens() {
        assert!(matches!(decode_subject("abc"), Err(CoreError::InvalidToken { .. })));
        assert!(matches!(decode_subject("a.!!!.c"), Err(CoreError::InvalidToken { .. })));
        assert!(matches!(
            decode_subject(&token_with(r#"{"iat":1}"#)),
            Err(CoreError::InvalidToken { .. })
        ));
        assert!(matches!(decode_subject("  "), Err(CoreError::MissingTenant)));
    }

    #[test]
    fn test_resolve_tenant_precedence() {
        let config = TenantConfig {
            token: Some(token_with(r#"{"sub":"from-token"}"#)),
            key: Some("mill-a".to_string()),
        };
        assert_eq!(resolve_tenant(&config).unwrap(), "mill-a");

        let config = TenantConfig {
            key: None,
            ..config
        };
        assert_eq!(resolve_tenant(&config).unwrap(), "from-token");

        assert!(matches!(
            resolve_tenant(&TenantConfig::default()),
            Err(CoreError::MissingTenant)
        ));
    }
}
