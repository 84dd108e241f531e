//! # Authentication
//!
//! Users sign in through the Telegram login widget. The widget payload is
//! checked against the bot token, then we hand out our own HS256 JWTs:
//!
//! - access token: `token_type = "access"`, lifetime `JWT_EXPIRY_HOURS`
//! - refresh token: `token_type = "refresh"`, lifetime `REFRESH_EXPIRY_DAYS`
//!
//! Every protected handler takes a [`Principal`] argument, which is pulled
//! from the `Authorization: Bearer <token>` header.
use std::sync::Arc;

use axum::{
    extract::FromRequestParts,
    http::{header::AUTHORIZATION, request::Parts},
};
use chrono::{Duration, Utc};
use hmac::{Hmac, Mac};
use jsonwebtoken::{
    DecodingKey, EncodingKey, Header, Validation, decode, encode, errors::ErrorKind,
};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::{
    error::AppError,
    models::{Role, UserId},
    state::AppState,
};

/// Telegram rejects widget data older than a day.
pub const TELEGRAM_AUTH_MAX_AGE_SECS: i64 = 86_400;

type HmacSha256 = Hmac<Sha256>;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Principal {
    pub user_id: UserId,
    pub role: Role,
}

impl Principal {
    /// Acting on someone else's behalf needs admin.
    pub fn check_acts_for(&self, user_id: UserId) -> Result<(), AppError> {
        if self.user_id == user_id || self.role.is_admin() {
            Ok(())
        } else {
            Err(AppError::Forbidden)
        }
    }

    pub fn require_admin(&self) -> Result<(), AppError> {
        if self.role.is_admin() {
            Ok(())
        } else {
            Err(AppError::Forbidden)
        }
    }
}

impl FromRequestParts<Arc<AppState>> for Principal {
    type Rejection = AppError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &Arc<AppState>,
    ) -> Result<Self, Self::Rejection> {
        let header = parts
            .headers
            .get(AUTHORIZATION)
            .and_then(|value| value.to_str().ok())
            .ok_or_else(|| AppError::Unauthorized("authorization header is required".into()))?;

        let token = header.strip_prefix("Bearer ").ok_or_else(|| {
            AppError::Unauthorized("expected 'Bearer {token}' authorization".into())
        })?;

        let claims = state.tokens.verify(token, TokenType::Access)?;

        Ok(Principal {
            user_id: claims.user_id,
            role: claims.role,
        })
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TokenType {
    Access,
    Refresh,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    pub user_id: UserId,
    pub role: Role,
    pub token_type: TokenType,
    pub iat: i64,
    pub exp: i64,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TokenPair {
    pub access_token: String,
    pub refresh_token: String,
    pub expires_in: i64,
}

#[derive(Clone)]
pub struct TokenIssuer {
    encoding: EncodingKey,
    decoding: DecodingKey,
    access_ttl: Duration,
    refresh_ttl: Duration,
}

impl TokenIssuer {
    pub fn new(secret: &str, access_ttl: Duration, refresh_ttl: Duration) -> Self {
        Self {
            encoding: EncodingKey::from_secret(secret.as_bytes()),
            decoding: DecodingKey::from_secret(secret.as_bytes()),
            access_ttl,
            refresh_ttl,
        }
    }

    fn sign(&self, user_id: UserId, role: Role, token_type: TokenType) -> Result<String, AppError> {
        let now = Utc::now();
        let ttl = match token_type {
            TokenType::Access => self.access_ttl,
            TokenType::Refresh => self.refresh_ttl,
        };

        let claims = Claims {
            user_id,
            role,
            token_type,
            iat: now.timestamp(),
            exp: (now + ttl).timestamp(),
        };

        encode(&Header::default(), &claims, &self.encoding)
            .map_err(|e| AppError::Internal(format!("failed to sign token: {e}")))
    }

    pub fn issue(&self, user_id: UserId, role: Role) -> Result<TokenPair, AppError> {
        Ok(TokenPair {
            access_token: self.sign(user_id, role, TokenType::Access)?,
            refresh_token: self.sign(user_id, role, TokenType::Refresh)?,
            expires_in: self.access_ttl.num_seconds(),
        })
    }

    pub fn verify(&self, token: &str, expected: TokenType) -> Result<Claims, AppError> {
        let claims = decode::<Claims>(token, &self.decoding, &Validation::default())
            .map_err(|e| {
                let reason = match e.kind() {
                    ErrorKind::ExpiredSignature => "token expired",
                    ErrorKind::InvalidSignature => "invalid signature",
                    _ => "invalid token",
                };
                AppError::Unauthorized(reason.into())
            })?
            .claims;

        if claims.token_type != expected {
            return Err(AppError::Unauthorized("wrong token type".into()));
        }

        Ok(claims)
    }
}

/// Payload produced by the Telegram login widget.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TelegramLogin {
    pub id: i64,
    pub first_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub photo_url: Option<String>,
    pub auth_date: i64,
    pub hash: String,
}

impl TelegramLogin {
    /// Every field except `hash`, sorted by key, as `key=value` lines.
    pub fn data_check_string(&self) -> String {
        let id = self.id.to_string();
        let auth_date = self.auth_date.to_string();

        let fields = [
            ("auth_date", Some(auth_date.as_str())),
            ("first_name", Some(self.first_name.as_str())),
            ("id", Some(id.as_str())),
            ("last_name", self.last_name.as_deref()),
            ("photo_url", self.photo_url.as_deref()),
            ("username", self.username.as_deref()),
        ];

        fields
            .iter()
            .filter_map(|(key, value)| value.map(|value| format!("{key}={value}")))
            .collect::<Vec<_>>()
            .join("\n")
    }

    fn mac(&self, bot_token: &str) -> HmacSha256 {
        let secret = Sha256::digest(bot_token.as_bytes());
        let mut mac = HmacSha256::new_from_slice(&secret).expect("HMAC takes any key size");
        mac.update(self.data_check_string().as_bytes());
        mac
    }

    pub fn sign(&mut self, bot_token: &str) {
        self.hash = hex::encode(self.mac(bot_token).finalize().into_bytes());
    }

    pub fn verify(&self, bot_token: &str, now: i64) -> Result<(), AppError> {
        let hash = hex::decode(&self.hash)
            .map_err(|_| AppError::Unauthorized("malformed telegram hash".into()))?;

        self.mac(bot_token)
            .verify_slice(&hash)
            .map_err(|_| AppError::Unauthorized("telegram signature mismatch".into()))?;

        if now - self.auth_date > TELEGRAM_AUTH_MAX_AGE_SECS {
            return Err(AppError::Unauthorized("telegram login expired".into()));
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const BOT_TOKEN: &str = "123456:TEST-BOT-TOKEN";

    fn issuer() -> TokenIssuer {
        TokenIssuer::new(
            "test-secret-that-is-long-enough-for-hs256",
            Duration::hours(1),
            Duration::days(1),
        )
    }

    fn login() -> TelegramLogin {
        let mut login = TelegramLogin {
            id: 42,
            first_name: "Anna".to_string(),
            last_name: None,
            username: Some("anna".to_string()),
            photo_url: None,
            auth_date: Utc::now().timestamp(),
            hash: String::new(),
        };
        login.sign(BOT_TOKEN);
        login
    }

    #[test]
    fn access_token_round_trips() {
        let pair = issuer().issue(5, Role::Volunteer).unwrap();
        let claims = issuer().verify(&pair.access_token, TokenType::Access).unwrap();
        assert_eq!(claims.user_id, 5);
        assert_eq!(claims.role, Role::Volunteer);
        assert_eq!(pair.expires_in, 3600);
    }

    #[test]
    fn refresh_token_is_not_an_access_token() {
        let pair = issuer().issue(5, Role::User).unwrap();
        assert!(matches!(
            issuer().verify(&pair.refresh_token, TokenType::Access),
            Err(AppError::Unauthorized(_))
        ));
    }

    #[test]
    fn tokens_from_another_secret_are_rejected() {
        let other = TokenIssuer::new(
            "a-completely-different-secret-of-length",
            Duration::hours(1),
            Duration::days(1),
        );
        let pair = other.issue(5, Role::Admin).unwrap();
        assert!(issuer().verify(&pair.access_token, TokenType::Access).is_err());
    }

    #[test]
    fn data_check_string_is_sorted_and_skips_missing_fields() {
        let login = TelegramLogin {
            auth_date: 1700000000,
            ..login()
        };
        assert_eq!(
            login.data_check_string(),
            "auth_date=1700000000\nfirst_name=Anna\nid=42\nusername=anna"
        );
    }

    #[test]
    fn signed_login_verifies() {
        assert!(login().verify(BOT_TOKEN, Utc::now().timestamp()).is_ok());
    }

    #[test]
    fn tampered_login_fails() {
        let mut tampered = login();
        tampered.first_name = "Mallory".to_string();
        assert!(tampered.verify(BOT_TOKEN, Utc::now().timestamp()).is_err());
        assert!(login().verify("other-token", Utc::now().timestamp()).is_err());
    }

    #[test]
    fn stale_login_fails() {
        let login = login();
        let later = login.auth_date + TELEGRAM_AUTH_MAX_AGE_SECS + 1;
        assert!(matches!(
            login.verify(BOT_TOKEN, later),
            Err(AppError::Unauthorized(_))
        ));
    }

    #[test]
    fn acting_for_others_needs_admin() {
        let user = Principal {
            user_id: 1,
            role: Role::Volunteer,
        };
        assert!(user.check_acts_for(1).is_ok());
        assert!(user.check_acts_for(2).is_err());

        let admin = Principal {
            user_id: 9,
            role: Role::Admin,
        };
        assert!(admin.check_acts_for(2).is_ok());
    }
}
