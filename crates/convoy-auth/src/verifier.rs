//! Credential decoding and claim verification.

use std::collections::HashMap;

use chrono::Utc;
use jsonwebtoken::{
    Algorithm, DecodingKey, EncodingKey, Header, Validation, decode, encode, errors::ErrorKind,
};
use serde::{Deserialize, Deserializer, Serialize};
use thiserror::Error;

use convoy_core::{CoreError, PrincipalId};

/// Typed verification failures.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AuthError {
    /// Not a decodable three-segment credential, or claims are unusable.
    #[error("malformed credential: {0}")]
    Malformed(String),

    /// The header names an algorithm the verifier does not accept.
    #[error("unknown signing algorithm")]
    UnknownAlgo,

    /// The signature does not match the configured secret.
    #[error("signature mismatch")]
    SignatureMismatch,

    /// `exp` is in the past.
    #[error("credential expired")]
    Expired,

    /// `nbf` or `iat` is in the future.
    #[error("credential not yet valid")]
    NotYetValid,
}

impl From<AuthError> for CoreError {
    fn from(err: AuthError) -> Self {
        match err {
            AuthError::Malformed(_) | AuthError::UnknownAlgo => Self::validation(err.to_string()),
            _ => Self::auth(err.to_string()),
        }
    }
}

/// Result type for credential verification.
pub type AuthResult<T> = Result<T, AuthError>;

/// The claim set carried by a credential.
///
/// `sub` may be a number or a string; `roles` may be an array or a
/// comma-separated string; `perms` also answers to `permissions`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Claims {
    /// Subject: the principal id, numeric or stringified.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sub: Option<serde_json::Value>,
    /// Explicit numeric principal id; preferred over `sub`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_id: Option<i64>,
    /// Role names, expanded through the role→permissions mapping.
    #[serde(default, deserialize_with = "de_roles")]
    pub roles: Vec<String>,
    /// Explicit permission grants.
    #[serde(default, alias = "permissions")]
    pub perms: Vec<String>,
    /// Issued-at, seconds.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub iat: Option<i64>,
    /// Not-before, seconds.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub nbf: Option<i64>,
    /// Expires-at, seconds.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub exp: Option<i64>,
}

/// Accept `["a","b"]` or `"a,b"`.
fn de_roles<'de, D>(deserializer: D) -> Result<Vec<String>, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum RolesField {
        List(Vec<String>),
        Csv(String),
    }

    match Option::<RolesField>::deserialize(deserializer)? {
        None => Ok(Vec::new()),
        Some(RolesField::List(list)) => Ok(list),
        Some(RolesField::Csv(csv)) => Ok(csv
            .split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(str::to_string)
            .collect()),
    }
}

/// The outcome of a successful verification.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Verified {
    /// Resolved principal id.
    pub principal: PrincipalId,
    /// Role names as claimed.
    pub roles: Vec<String>,
    /// Effective permissions: explicit grants plus role expansions,
    /// deduplicated, original order preserved.
    pub permissions: Vec<String>,
}

/// Verifies bearer credentials against one HS256 secret.
pub struct Verifier {
    decoding: DecodingKey,
    validation: Validation,
    role_permissions: HashMap<String, Vec<String>>,
    leeway_secs: u64,
}

impl Verifier {
    /// Create a verifier for `secret` with a role→permissions mapping.
    #[must_use]
    pub fn new(
        secret: &str,
        role_permissions: HashMap<String, Vec<String>>,
        leeway_secs: u64,
    ) -> Self {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.leeway = leeway_secs;
        validation.validate_nbf = true;
        // `exp` is checked when present; credentials without one are
        // long-lived service credentials.
        validation.required_spec_claims.clear();
        Self {
            decoding: DecodingKey::from_secret(secret.as_bytes()),
            validation,
            role_permissions,
            leeway_secs,
        }
    }

    /// Verify a credential and resolve its principal and permissions.
    ///
    /// # Errors
    ///
    /// One of the typed [`AuthError`] failures: malformed, unknown-algo,
    /// signature-mismatch, expired, or not-yet-valid.
    pub fn verify(&self, token: &str) -> AuthResult<Verified> {
        let data =
            decode::<Claims>(token, &self.decoding, &self.validation).map_err(classify_error)?;
        let claims = data.claims;

        // `iat` in the future is as suspect as `nbf`; jsonwebtoken does
        // not check it, so we do.
        if let Some(iat) = claims.iat {
            let now = Utc::now().timestamp();
            let leeway = i64::try_from(self.leeway_secs).unwrap_or(0);
            if iat > now.saturating_add(leeway) {
                return Err(AuthError::NotYetValid);
            }
        }

        let principal = resolve_principal(&claims)?;
        let permissions = self.expand_permissions(&claims);

        Ok(Verified {
            principal,
            roles: claims.roles,
            permissions,
        })
    }

    /// Explicit grants first, then role expansions, deduplicated.
    fn expand_permissions(&self, claims: &Claims) -> Vec<String> {
        let mut out: Vec<String> = Vec::new();
        for perm in &claims.perms {
            if !out.contains(perm) {
                out.push(perm.clone());
            }
        }
        for role in &claims.roles {
            if let Some(expanded) = self.role_permissions.get(role) {
                for perm in expanded {
                    if !out.contains(perm) {
                        out.push(perm.clone());
                    }
                }
            }
        }
        out
    }
}

/// Numeric `user_id` wins; otherwise `sub` as a number or a numeric
/// string.
fn resolve_principal(claims: &Claims) -> AuthResult<PrincipalId> {
    if let Some(id) = claims.user_id {
        return Ok(PrincipalId(id));
    }
    match &claims.sub {
        Some(serde_json::Value::Number(n)) => n
            .as_i64()
            .map(PrincipalId)
            .ok_or_else(|| AuthError::Malformed("sub is not an integer".into())),
        Some(serde_json::Value::String(s)) => s
            .parse::<i64>()
            .map(PrincipalId)
            .map_err(|_| AuthError::Malformed(format!("sub is not numeric: {s}"))),
        Some(_) => Err(AuthError::Malformed("sub has an unusable type".into())),
        None => Err(AuthError::Malformed("no principal claim".into())),
    }
}

fn classify_error(err: jsonwebtoken::errors::Error) -> AuthError {
    match err.kind() {
        ErrorKind::ExpiredSignature => AuthError::Expired,
        ErrorKind::ImmatureSignature => AuthError::NotYetValid,
        ErrorKind::InvalidSignature => AuthError::SignatureMismatch,
        ErrorKind::InvalidAlgorithm | ErrorKind::InvalidAlgorithmName => AuthError::UnknownAlgo,
        _ => AuthError::Malformed(err.to_string()),
    }
}

/// Mint a credential for `claims` with `secret`. Used by tests and the
/// dev-token path; production credentials come from the identity
/// service.
///
/// # Errors
///
/// Returns [`AuthError::Malformed`] if the claims cannot be encoded.
pub fn mint(secret: &str, claims: &Claims) -> AuthResult<String> {
    encode(
        &Header::new(Algorithm::HS256),
        claims,
        &EncodingKey::from_secret(secret.as_bytes()),
    )
    .map_err(|e| AuthError::Malformed(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    const SECRET: &str = "unit-test-secret";

    fn verifier() -> Verifier {
        let mut roles = HashMap::new();
        roles.insert(
            "operator".to_string(),
            vec!["sessions.*".to_string(), "tickets.read".to_string()],
        );
        Verifier::new(SECRET, roles, 5)
    }

    fn claims_for(user_id: i64) -> Claims {
        let now = Utc::now().timestamp();
        Claims {
            user_id: Some(user_id),
            iat: Some(now),
            nbf: Some(now),
            exp: Some(now + 3600),
            ..Claims::default()
        }
    }

    #[test]
    fn mint_then_verify_round_trips() {
        let mut claims = claims_for(42);
        claims.roles = vec!["operator".to_string()];
        claims.perms = vec!["kb.read".to_string()];

        let token = mint(SECRET, &claims).unwrap();
        let verified = verifier().verify(&token).unwrap();

        assert_eq!(verified.principal, PrincipalId(42));
        assert_eq!(verified.roles, vec!["operator"]);
        assert_eq!(
            verified.permissions,
            vec!["kb.read", "sessions.*", "tickets.read"]
        );
    }

    #[test]
    fn wrong_secret_is_signature_mismatch() {
        let token = mint("other-secret", &claims_for(1)).unwrap();
        assert_eq!(
            verifier().verify(&token).unwrap_err(),
            AuthError::SignatureMismatch
        );
    }

    #[test]
    fn expired_credential_is_typed() {
        let now = Utc::now().timestamp();
        let claims = Claims {
            user_id: Some(1),
            iat: Some(now - 7200),
            exp: Some(now - 3600),
            ..Claims::default()
        };
        let token = mint(SECRET, &claims).unwrap();
        assert_eq!(verifier().verify(&token).unwrap_err(), AuthError::Expired);
    }

    #[test]
    fn future_nbf_is_not_yet_valid() {
        let now = Utc::now().timestamp();
        let claims = Claims {
            user_id: Some(1),
            nbf: Some(now + 3600),
            exp: Some(now + 7200),
            ..Claims::default()
        };
        let token = mint(SECRET, &claims).unwrap();
        assert_eq!(
            verifier().verify(&token).unwrap_err(),
            AuthError::NotYetValid
        );
    }

    #[test]
    fn future_iat_is_not_yet_valid() {
        let now = Utc::now().timestamp();
        let claims = Claims {
            user_id: Some(1),
            iat: Some(now + 3600),
            exp: Some(now + 7200),
            ..Claims::default()
        };
        let token = mint(SECRET, &claims).unwrap();
        assert_eq!(
            verifier().verify(&token).unwrap_err(),
            AuthError::NotYetValid
        );
    }

    #[test]
    fn garbage_is_malformed() {
        assert!(matches!(
            verifier().verify("not.a.credential").unwrap_err(),
            AuthError::Malformed(_)
        ));
    }

    #[test]
    fn roles_accept_csv_form() {
        let json = r#"{"user_id": 7, "roles": "operator, admin"}"#;
        let claims: Claims = serde_json::from_str(json).unwrap();
        assert_eq!(claims.roles, vec!["operator", "admin"]);
    }

    #[test]
    fn numeric_string_sub_resolves() {
        let claims = Claims {
            sub: Some(serde_json::Value::String("99".into())),
            ..Claims::default()
        };
        let token = mint(SECRET, &claims).unwrap();
        let verified = verifier().verify(&token).unwrap();
        assert_eq!(verified.principal, PrincipalId(99));
    }

    #[test]
    fn permissions_alias_is_accepted() {
        let json = r#"{"user_id": 7, "permissions": ["tickets.write"]}"#;
        let claims: Claims = serde_json::from_str(json).unwrap();
        assert_eq!(claims.perms, vec!["tickets.write"]);
    }
}
