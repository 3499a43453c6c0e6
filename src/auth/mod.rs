//! Authorization (§4.8, §6 `OPENID_*`): capability checks resolved through
//! an external OAuth token-introspection service.
//!
//! The introspection endpoint itself is an out-of-scope external
//! collaborator (§1); this module only defines the narrow contract the core
//! consumes — given a bearer token and a required capability, is the caller
//! allowed to proceed.

use crate::config::Config;
use crate::error::{AppError, AppResult};
use axum::http::HeaderMap;
use serde::Deserialize;

/// Capabilities named in §4.8: every write path requires `update:edit`,
/// every read path `update:view`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Capability {
    Edit,
    View,
}

impl Capability {
    fn role(self) -> &'static str {
        match self {
            Capability::Edit => "update:edit",
            Capability::View => "update:view",
        }
    }
}

#[derive(Debug, Deserialize)]
struct IntrospectionResponse {
    active: bool,
    #[serde(default)]
    scope: Option<String>,
}

/// Introspect a bearer token against the configured OpenID provider and
/// confirm it carries the required capability's scope/role.
pub async fn authorize(http: &reqwest::Client, config: &Config, headers: &HeaderMap, cap: Capability) -> AppResult<()> {
    let token = bearer_token(headers)?;

    let Some(issuer) = &config.openid_issuer else {
        // No introspection endpoint configured: this deployment has no
        // external auth collaborator wired up. Fail closed rather than
        // silently granting every capability.
        return Err(AppError::DependencyUnavailable(
            "token introspection is not configured".into(),
        ));
    };

    let introspection_url = format!("{}/introspect", issuer.trim_end_matches('/'));
    let mut form = vec![("token", token.as_str())];
    if let Some(audience) = &config.openid_audience {
        form.push(("audience", audience.as_str()));
    }

    let response = http
        .post(&introspection_url)
        .form(&form)
        .send()
        .await
        .map_err(|e| AppError::DependencyUnavailable(format!("token introspection unreachable: {e}")))?;

    if !response.status().is_success() {
        return Err(AppError::Auth("token introspection rejected the request".into()));
    }

    let body: IntrospectionResponse = response
        .json()
        .await
        .map_err(|e| AppError::DependencyUnavailable(format!("malformed introspection response: {e}")))?;

    if !body.active {
        return Err(AppError::Auth("token is missing, invalid, or expired".into()));
    }

    let scopes: Vec<&str> = body.scope.as_deref().unwrap_or("").split_whitespace().collect();
    if !scopes.contains(&cap.role()) {
        return Err(AppError::Auth(format!("insufficient scope: requires {}", cap.role())));
    }

    Ok(())
}

fn bearer_token(headers: &HeaderMap) -> AppResult<String> {
    let header = headers
        .get(axum::http::header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .ok_or_else(|| AppError::Auth("missing authorization header".into()))?;

    header
        .strip_prefix("Bearer ")
        .map(|s| s.to_string())
        .ok_or_else(|| AppError::Auth("invalid authorization header format".into()))
}

/// Same contract as [`authorize`], for the gRPC transport: the `authorization`
/// entry of a request's `MetadataMap` stands in for the HTTP header (§6 "the
/// equivalent gRPC surface"; both transports funnel into the same
/// introspection call so they never disagree on a capability decision).
pub async fn authorize_grpc(
    http: &reqwest::Client,
    config: &Config,
    metadata: &tonic::metadata::MetadataMap,
    cap: Capability,
) -> AppResult<()> {
    let raw = metadata
        .get("authorization")
        .and_then(|v| v.to_str().ok())
        .ok_or_else(|| AppError::Auth("missing authorization metadata".into()))?;

    let mut headers = HeaderMap::new();
    let value = raw
        .parse()
        .map_err(|_| AppError::Auth("invalid authorization metadata".into()))?;
    headers.insert(axum::http::header::AUTHORIZATION, value);

    authorize(http, config, &headers, cap).await
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bearer_token_strips_the_scheme_prefix() {
        let mut headers = HeaderMap::new();
        headers.insert(axum::http::header::AUTHORIZATION, "Bearer abc123".parse().unwrap());
        assert_eq!(bearer_token(&headers).unwrap(), "abc123");
    }

    #[test]
    fn bearer_token_rejects_missing_header() {
        let headers = HeaderMap::new();
        assert!(bearer_token(&headers).is_err());
    }

    #[test]
    fn bearer_token_rejects_non_bearer_scheme() {
        let mut headers = HeaderMap::new();
        headers.insert(axum::http::header::AUTHORIZATION, "Basic abc123".parse().unwrap());
        assert!(bearer_token(&headers).is_err());
    }

    #[test]
    fn capability_role_names_match_the_spec() {
        assert_eq!(Capability::Edit.role(), "update:edit");
        assert_eq!(Capability::View.role(), "update:view");
    }
}
