use super::models::{Claims, TokenKind};
use chrono::{DateTime, Duration, Utc};
use jsonwebtoken::errors::ErrorKind;
use jsonwebtoken::{Algorithm, DecodingKey, EncodingKey, Header, Validation, decode, encode};

#[derive(Debug, thiserror::Error)]
pub enum JwtError {
    #[error("JWT encoding error: {0}")]
    Encoding(#[from] jsonwebtoken::errors::Error),
    #[error("JWT decoding error: {0}")]
    Decoding(String),
    #[error("Invalid token")]
    InvalidToken,
    #[error("Token expired")]
    TokenExpired,
    #[error("Token has the wrong type")]
    WrongTokenType,
    #[error("Token lifetime overflows the clock")]
    LifetimeOverflow,
}

#[derive(Debug, Clone)]
pub struct JwtSettings {
    pub secret: String,
    pub algorithm: Algorithm,
    pub access_ttl: Duration,
    pub refresh_ttl: Duration,
}

#[derive(Clone)]
pub struct JwtService {
    encoding_key: EncodingKey,
    decoding_key: DecodingKey,
    algorithm: Algorithm,
    access_ttl: Duration,
    refresh_ttl: Duration,
}

impl JwtService {
    pub fn new(settings: &JwtSettings) -> Self {
        Self {
            encoding_key: EncodingKey::from_secret(settings.secret.as_ref()),
            decoding_key: DecodingKey::from_secret(settings.secret.as_ref()),
            algorithm: settings.algorithm,
            access_ttl: settings.access_ttl,
            refresh_ttl: settings.refresh_ttl,
        }
    }

    pub fn issue_access(&self, user_id: i64) -> Result<String, JwtError> {
        self.issue_access_at(user_id, Utc::now())
    }

    pub fn issue_refresh(&self, user_id: i64) -> Result<String, JwtError> {
        self.issue_refresh_at(user_id, Utc::now())
    }

    pub fn verify(&self, token: &str, expected: TokenKind) -> Result<Claims, JwtError> {
        self.verify_at(token, expected, Utc::now())
    }

    /// Access tokens carry no random component: equal key, subject and clock
    /// produce the same token.
    pub fn issue_access_at(&self, user_id: i64, now: DateTime<Utc>) -> Result<String, JwtError> {
        self.sign(Claims {
            sub: user_id.to_string(),
            token_type: TokenKind::Access,
            iat: now.timestamp(),
            exp: expiry(now, self.access_ttl)?,
            jti: None,
        })
    }

    pub fn issue_refresh_at(&self, user_id: i64, now: DateTime<Utc>) -> Result<String, JwtError> {
        self.sign(Claims {
            sub: user_id.to_string(),
            token_type: TokenKind::Refresh,
            iat: now.timestamp(),
            exp: expiry(now, self.refresh_ttl)?,
            jti: Some(uuid::Uuid::new_v4().to_string()),
        })
    }

    fn sign(&self, claims: Claims) -> Result<String, JwtError> {
        let header = Header::new(self.algorithm);
        encode(&header, &claims, &self.encoding_key).map_err(JwtError::Encoding)
    }

    pub fn verify_at(
        &self,
        token: &str,
        expected: TokenKind,
        now: DateTime<Utc>,
    ) -> Result<Claims, JwtError> {
        if token.is_empty() || token.split('.').count() != 3 {
            return Err(JwtError::InvalidToken);
        }

        // Expiry is compared against `now` below rather than the wall clock.
        let mut validation = Validation::new(self.algorithm);
        validation.validate_exp = false;
        validation.leeway = 0;
        validation.set_required_spec_claims(&["exp", "sub"]);

        let claims = match decode::<Claims>(token, &self.decoding_key, &validation) {
            Ok(token_data) => token_data.claims,
            Err(err) => {
                log::debug!("JWT token decode error: {:?}", err);
                return Err(match err.kind() {
                    ErrorKind::InvalidToken
                    | ErrorKind::InvalidSignature
                    | ErrorKind::InvalidAlgorithm
                    | ErrorKind::Base64(_)
                    | ErrorKind::Json(_)
                    | ErrorKind::Utf8(_) => JwtError::InvalidToken,
                    _ => JwtError::Decoding(err.to_string()),
                });
            }
        };

        if claims.exp <= now.timestamp() {
            log::debug!(
                "JWT token expired. Exp: {}, Now: {}",
                claims.exp,
                now.timestamp()
            );
            return Err(JwtError::TokenExpired);
        }
        if claims.token_type != expected {
            return Err(JwtError::WrongTokenType);
        }
        if claims.user_id().is_none() {
            return Err(JwtError::InvalidToken);
        }

        Ok(claims)
    }
}

fn expiry(now: DateTime<Utc>, ttl: Duration) -> Result<i64, JwtError> {
    now.checked_add_signed(ttl)
        .map(|exp| exp.timestamp())
        .ok_or(JwtError::LifetimeOverflow)
}
