use jsonwebtoken::{DecodingKey, Validation};
use serde::{Deserialize, Deserializer, Serialize};
use std::fmt;

use super::SessionError;

/// Identity claims carried by the backend's access token
///
/// The backend puts the user id in `user_id`, `id` and (as a string) `sub`;
/// any of them is accepted.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenClaims {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sub: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_id: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub role: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub first_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_name: Option<String>,
    /// Expiry as Unix seconds; absent means the token never expires
    #[serde(
        default,
        skip_serializing_if = "Option::is_none",
        deserialize_with = "deserialize_epoch"
    )]
    pub exp: Option<i64>,
}

fn deserialize_epoch<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Option<i64>, D::Error> {
    Ok(Option::<f64>::deserialize(deserializer)?.map(|secs| secs.floor() as i64))
}

impl TokenClaims {
    /// Numeric user id, used as `uploader_id` when creating datasets
    pub fn uploader_id(&self) -> Option<i64> {
        self.user_id
            .or(self.id)
            .or_else(|| self.sub.as_deref().and_then(|sub| sub.parse().ok()))
    }

    pub fn subject_id(&self) -> Option<String> {
        self.sub
            .clone()
            .or_else(|| self.uploader_id().map(|id| id.to_string()))
    }

    pub fn display_name(&self) -> Option<String> {
        match (&self.first_name, &self.last_name) {
            (Some(first), Some(last)) => Some(format!("{first} {last}")),
            (Some(name), None) | (None, Some(name)) => Some(name.clone()),
            (None, None) => None,
        }
    }
}

/// Decode the payload of a JWT without checking its signature.
///
/// The client never holds the signing secret; the server re-validates every
/// token it receives. Only the structure and the claims are checked here.
pub fn decode_claims(token: &str) -> Result<TokenClaims, SessionError> {
    let mut validation = Validation::default();
    validation.insecure_disable_signature_validation();
    validation.validate_exp = false;
    validation.validate_aud = false;
    validation.required_spec_claims.clear();

    let data = jsonwebtoken::decode::<TokenClaims>(token, &DecodingKey::from_secret(&[]), &validation)?;
    Ok(data.claims)
}

/// An authenticated user: the raw bearer token and what it says about them
#[derive(Clone, PartialEq, Eq)]
pub struct Session {
    raw_token: String,
    claims: TokenClaims,
}

impl Session {
    pub fn from_token(token: impl Into<String>) -> Result<Self, SessionError> {
        let raw_token = token.into();
        let claims = decode_claims(&raw_token)?;
        Ok(Self { raw_token, claims })
    }

    pub fn token(&self) -> &str {
        &self.raw_token
    }

    pub fn claims(&self) -> &TokenClaims {
        &self.claims
    }

    pub fn expires_at(&self) -> Option<i64> {
        self.claims.exp
    }

    /// Valid while `now < exp`; a token without `exp` is always valid
    pub fn is_valid_at(&self, now_epoch_secs: i64) -> bool {
        self.claims.exp.is_none_or(|exp| now_epoch_secs < exp)
    }

    pub fn uploader_id(&self) -> Option<i64> {
        self.claims.uploader_id()
    }
}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("raw_token", &"<redacted>")
            .field("claims", &self.claims)
            .finish()
    }
}


#[cfg(test)]
mod tests {
    use super::test_tokens::{for_user, mint};
    use super::*;

    const NOW: i64 = 1_700_000_000;

    #[test]
    fn test_decode_backend_shaped_token() {
        let token = for_user(42, Some(NOW + 3600));
        let session = Session::from_token(token).unwrap();

        assert_eq!(session.uploader_id(), Some(42));
        assert_eq!(session.claims().subject_id().as_deref(), Some("42"));
        assert_eq!(session.claims().role.as_deref(), Some("user"));
        assert_eq!(session.expires_at(), Some(NOW + 3600));
    }

    #[test]
    fn test_expired_token_is_invalid() {
        let session = Session::from_token(for_user(1, Some(NOW - 1))).unwrap();
        assert!(!session.is_valid_at(NOW));

        let boundary = Session::from_token(for_user(1, Some(NOW))).unwrap();
        assert!(!boundary.is_valid_at(NOW));
        assert!(boundary.is_valid_at(NOW - 1));
    }

    #[test]
    fn test_token_without_expiry_is_always_valid() {
        let session = Session::from_token(for_user(7, None)).unwrap();
        assert!(session.is_valid_at(0));
        assert!(session.is_valid_at(i64::MAX));
    }

    #[test]
    fn test_uploader_id_falls_back_to_sub() {
        let token = mint(&TokenClaims {
            sub: Some("99".to_string()),
            ..Default::default()
        });
        let session = Session::from_token(token).unwrap();
        assert_eq!(session.uploader_id(), Some(99));

        let opaque_sub = mint(&TokenClaims {
            sub: Some("google-oauth2|abc".to_string()),
            ..Default::default()
        });
        assert_eq!(Session::from_token(opaque_sub).unwrap().uploader_id(), None);
    }

    #[test]
    fn test_garbage_is_rejected() {
        assert!(matches!(
            Session::from_token("not-a-jwt"),
            Err(SessionError::InvalidToken(_))
        ));
        assert!(Session::from_token("a.b.c").is_err());
    }

    #[test]
    fn test_debug_redacts_token() {
        let session = Session::from_token(for_user(3, None)).unwrap();
        let rendered = format!("{session:?}");
        assert!(rendered.contains("<redacted>"));
        assert!(!rendered.contains(session.token()));
    }

    #[test]
    fn test_display_name() {
        let claims = TokenClaims {
            first_name: Some("Ada".into()),
            last_name: Some("Lovelace".into()),
            ..Default::default()
        };
        assert_eq!(claims.display_name().as_deref(), Some("Ada Lovelace"));
        assert_eq!(TokenClaims::default().display_name(), None);
    }
}
