//! Credential, session and user types exchanged with the auth endpoints.
//!
//! Wire shapes use camelCase keys. The access token is a JWT whose payload
//! is decoded (never verified) to read its expiry.

use base64::Engine as _;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};

use crate::error::ClientError;

/// Access/refresh credential pair as returned by login, register and refresh.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TokenPair {
    pub access_token: String,
    pub refresh_token: String,
    /// Token kind, normally "Bearer".
    #[serde(default = "default_token_type")]
    pub token_type: String,
    pub expires_at: DateTime<Utc>,
}

fn default_token_type() -> String {
    "Bearer".to_string()
}

impl TokenPair {
    /// Value for the `Authorization` header.
    pub fn authorization(&self) -> String {
        format!("{} {}", self.token_type, self.access_token)
    }
}

/// Metadata about the device a session was opened from.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeviceInfo {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub device_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub platform: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_agent: Option<String>,
}

impl DeviceInfo {
    /// Describe the current process (OS family and client version).
    pub fn current(client_version: &str) -> Self {
        Self {
            device_name: None,
            platform: Some(std::env::consts::OS.to_string()),
            user_agent: Some(format!("parley/{client_version}")),
        }
    }
}

/// Server-side session created alongside a credential pair.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionDescriptor {
    pub id: String,
    pub expires_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub device_info: Option<DeviceInfo>,
}

impl SessionDescriptor {
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires_at
    }
}

/// Authenticated user profile.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct User {
    pub id: String,
    pub email: String,
    pub first_name: String,
    pub last_name: String,
    pub user_type: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub organization_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<DateTime<Utc>>,
}

impl User {
    pub fn display_name(&self) -> String {
        format!("{} {}", self.first_name, self.last_name)
            .trim()
            .to_string()
    }
}

/// `{user, tokens, session}` payload of login, register and refresh.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthPayload {
    pub user: User,
    pub tokens: TokenPair,
    pub session: SessionDescriptor,
}

/// `{user}` payload of `GET /auth/me`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CurrentUser {
    pub user: User,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LoginRequest {
    pub email: String,
    pub password: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub remember_me: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub device_info: Option<DeviceInfo>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RegisterRequest {
    pub first_name: String,
    pub last_name: String,
    pub email: String,
    pub password: String,
    pub user_type: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub organization_id: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChangePasswordRequest {
    pub current_password: String,
    pub new_password: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ForgotPasswordRequest {
    pub email: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResetPasswordRequest {
    pub token: String,
    pub new_password: String,
}

/// Unverified claims carried in the access token payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenClaims {
    /// Expiry as unix seconds.
    pub exp: i64,
    #[serde(default)]
    pub sub: Option<String>,
    #[serde(default)]
    pub iat: Option<i64>,
    #[serde(default)]
    pub email: Option<String>,
}

impl TokenClaims {
    /// Decode the payload segment of a JWT without checking its signature.
    ///
    /// Signature verification is the server's job; the client only needs
    /// the expiry to decide whether a token is worth attaching.
    pub fn decode_unverified(token: &str) -> Result<Self, ClientError> {
        let mut parts = token.split('.');
        let payload = match (parts.next(), parts.next(), parts.next(), parts.next()) {
            (Some(_), Some(payload), Some(_), None) if !payload.is_empty() => payload,
            _ => {
                return Err(ClientError::Validation(
                    "access token is not a three-part JWT".to_string(),
                ));
            }
        };

        let bytes = URL_SAFE_NO_PAD
            .decode(payload.trim_end_matches('='))
            .map_err(|e| ClientError::Validation(format!("invalid token payload encoding: {e}")))?;

        serde_json::from_slice(&bytes)
            .map_err(|e| ClientError::Validation(format!("invalid token claims: {e}")))
    }

    /// Expiry as a timestamp. Out-of-range values are treated as already expired.
    pub fn expires_at(&self) -> DateTime<Utc> {
        Utc.timestamp_opt(self.exp, 0)
            .single()
            .unwrap_or(DateTime::<Utc>::MIN_UTC)
    }

    /// True iff `now` is strictly before the expiry.
    pub fn is_valid_at(&self, now: DateTime<Utc>) -> bool {
        now < self.expires_at()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn unsigned_token(claims: &TokenClaims) -> String {
        let header = URL_SAFE_NO_PAD.encode(br#"{"alg":"none","typ":"JWT"}"#);
        let payload = URL_SAFE_NO_PAD.encode(serde_json::to_vec(claims).unwrap());
        format!("{header}.{payload}.unsigned")
    }

    fn claims_expiring(at: DateTime<Utc>) -> TokenClaims {
        TokenClaims {
            exp: at.timestamp(),
            sub: Some("user-1".to_string()),
            iat: None,
            email: None,
        }
    }

    #[test]
    fn decode_roundtrips_expiry() {
        let exp = Utc::now() + Duration::minutes(15);
        let token = unsigned_token(&claims_expiring(exp));
        let claims = TokenClaims::decode_unverified(&token).unwrap();
        assert_eq!(claims.exp, exp.timestamp());
        assert_eq!(claims.sub.as_deref(), Some("user-1"));
    }

    #[test]
    fn decode_rejects_malformed_tokens() {
        assert!(TokenClaims::decode_unverified("not-a-jwt").is_err());
        assert!(TokenClaims::decode_unverified("a..c").is_err());
        assert!(TokenClaims::decode_unverified("a.b.c.d").is_err());
        assert!(TokenClaims::decode_unverified("a.!!!.c").is_err());
    }

    #[test]
    fn decode_rejects_payload_without_exp() {
        let payload = URL_SAFE_NO_PAD.encode(br#"{"sub":"x"}"#);
        let token = format!("h.{payload}.s");
        assert!(TokenClaims::decode_unverified(&token).is_err());
    }

    #[test]
    fn validity_is_strictly_before_expiry() {
        let now = Utc::now();
        let claims = claims_expiring(now);
        // exp has second precision; at or after the expiry second it is invalid.
        let exp = claims.expires_at();
        assert!(!claims.is_valid_at(exp));
        assert!(!claims.is_valid_at(exp + Duration::seconds(1)));
        assert!(claims.is_valid_at(exp - Duration::seconds(1)));
    }

    #[test]
    fn token_pair_uses_camel_case() {
        let pair = TokenPair {
            access_token: "a".into(),
            refresh_token: "r".into(),
            token_type: "Bearer".into(),
            expires_at: Utc::now(),
        };
        let json = serde_json::to_string(&pair).unwrap();
        assert!(json.contains("\"accessToken\":\"a\""));
        assert!(json.contains("\"refreshToken\":\"r\""));
        assert_eq!(pair.authorization(), "Bearer a");
    }

    #[test]
    fn token_type_defaults_to_bearer() {
        let json = r#"{"accessToken":"a","refreshToken":"r","expiresAt":"2030-01-01T00:00:00Z"}"#;
        let pair: TokenPair = serde_json::from_str(json).unwrap();
        assert_eq!(pair.token_type, "Bearer");
    }

    #[test]
    fn register_request_omits_missing_organization() {
        let req = RegisterRequest {
            first_name: "Ada".into(),
            last_name: "Lovelace".into(),
            email: "ada@example.com".into(),
            password: "pw".into(),
            user_type: "student".into(),
            organization_id: None,
        };
        let json = serde_json::to_string(&req).unwrap();
        assert!(json.contains("\"firstName\":\"Ada\""));
        assert!(json.contains("\"userType\":\"student\""));
        assert!(!json.contains("organizationId"));
    }

    #[test]
    fn session_expiry_is_inclusive() {
        let now = Utc::now();
        let session = SessionDescriptor {
            id: "s".into(),
            expires_at: now,
            device_info: None,
        };
        assert!(session.is_expired_at(now));
        assert!(!session.is_expired_at(now - Duration::seconds(1)));
    }
}
