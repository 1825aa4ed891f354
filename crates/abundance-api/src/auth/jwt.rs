//! Signed token issuance and validation
//!
//! Two independent HS256 contexts share this code: session tokens (subject is
//! the user id) and email-verification tokens (subject is the email address).
//! Each context has its own secret, lifetime and purpose tag, so a token from
//! one context never validates in the other.

use abundance_core::{AuthConfig, UserId};
use jsonwebtoken::errors::ErrorKind;
use jsonwebtoken::{
    decode, encode, get_current_timestamp, Algorithm, DecodingKey, EncodingKey, Header,
    Validation,
};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

/// Claims embedded in every token
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    /// Token issuer
    pub iss: String,
    /// Subject: user id for sessions, email for verification tokens
    pub sub: String,
    /// Unique token identifier
    pub jti: String,
    /// Issued at (Unix seconds)
    pub iat: u64,
    /// Expiration (Unix seconds)
    pub exp: u64,
    /// Purpose tag, see [`TokenPurpose::as_str`]
    #[serde(default)]
    pub typ: String,
}

/// What a token may be used for
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokenPurpose {
    Session,
    EmailVerification,
}

impl TokenPurpose {
    pub fn as_str(&self) -> &'static str {
        match self {
            TokenPurpose::Session => "session",
            TokenPurpose::EmailVerification => "email_verification",
        }
    }
}

/// Token issuance and validation errors
#[derive(Debug, Error)]
pub enum TokenError {
    #[error("token is malformed")]
    Malformed,

    #[error("token signature is invalid")]
    InvalidSignature,

    #[error("unexpected signing method")]
    UnexpectedAlgorithm,

    #[error("token has expired")]
    Expired,

    #[error("token claims are invalid: {0}")]
    InvalidClaims(String),

    #[error("failed to encode token: {0}")]
    Encoding(#[from] jsonwebtoken::errors::Error),
}

impl TokenError {
    /// Stable identifier used in audit records
    pub fn kind(&self) -> &'static str {
        match self {
            TokenError::Malformed => "malformed",
            TokenError::InvalidSignature => "invalid_signature",
            TokenError::UnexpectedAlgorithm => "unexpected_algorithm",
            TokenError::Expired => "expired",
            TokenError::InvalidClaims(_) => "invalid_claims",
            TokenError::Encoding(_) => "encoding",
        }
    }
}

/// One signing context: secret, lifetime and purpose
#[derive(Clone)]
pub struct TokenContext {
    purpose: TokenPurpose,
    issuer: String,
    lifetime_secs: u64,
    encoding_key: EncodingKey,
    decoding_key: DecodingKey,
}

impl std::fmt::Debug for TokenContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokenContext")
            .field("purpose", &self.purpose)
            .field("issuer", &self.issuer)
            .field("lifetime_secs", &self.lifetime_secs)
            .finish_non_exhaustive()
    }
}

impl TokenContext {
    pub fn new(secret: &str, lifetime_secs: u64, issuer: &str, purpose: TokenPurpose) -> Self {
        Self {
            purpose,
            issuer: issuer.to_string(),
            lifetime_secs,
            encoding_key: EncodingKey::from_secret(secret.as_bytes()),
            decoding_key: DecodingKey::from_secret(secret.as_bytes()),
        }
    }

    pub fn lifetime_secs(&self) -> u64 {
        self.lifetime_secs
    }

    /// Issue a token for `subject` valid for the context lifetime
    pub fn issue(&self, subject: &str) -> Result<String, TokenError> {
        self.issue_at(subject, get_current_timestamp())
    }

    /// Issue a token as if the current time were `now`
    pub fn issue_at(&self, subject: &str, now: u64) -> Result<String, TokenError> {
        let claims = Claims {
            iss: self.issuer.clone(),
            sub: subject.to_string(),
            jti: Uuid::new_v4().to_string(),
            iat: now,
            exp: now.saturating_add(self.lifetime_secs),
            typ: self.purpose.as_str().to_string(),
        };

        Ok(encode(
            &Header::new(Algorithm::HS256),
            &claims,
            &self.encoding_key,
        )?)
    }

    /// Check signature, algorithm, issuer, expiry and purpose, then return the claims
    pub fn validate(&self, token: &str) -> Result<Claims, TokenError> {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.leeway = 0;
        validation.set_issuer(&[&self.issuer]);
        validation.set_required_spec_claims(&["exp", "iss", "sub"]);

        let data = decode::<Claims>(token, &self.decoding_key, &validation).map_err(|e| {
            match e.kind() {
                ErrorKind::ExpiredSignature => TokenError::Expired,
                ErrorKind::InvalidSignature => TokenError::InvalidSignature,
                ErrorKind::InvalidAlgorithm | ErrorKind::InvalidAlgorithmName => {
                    TokenError::UnexpectedAlgorithm
                }
                ErrorKind::InvalidIssuer => TokenError::InvalidClaims("issuer".to_string()),
                ErrorKind::MissingRequiredClaim(claim) => TokenError::InvalidClaims(claim.clone()),
                ErrorKind::ImmatureSignature => TokenError::InvalidClaims("nbf".to_string()),
                _ => TokenError::Malformed,
            }
        })?;

        let claims = data.claims;
        if claims.typ != self.purpose.as_str() {
            return Err(TokenError::InvalidClaims("typ".to_string()));
        }
        if claims.sub.is_empty() {
            return Err(TokenError::InvalidClaims("sub".to_string()));
        }

        Ok(claims)
    }
}

/// Session and verification token contexts built from [`AuthConfig`]
#[derive(Debug, Clone)]
pub struct TokenService {
    session: TokenContext,
    verification: TokenContext,
}

impl TokenService {
    pub fn new(config: &AuthConfig) -> Self {
        Self {
            session: TokenContext::new(
                &config.jwt_secret,
                config.jwt_expiration_secs,
                &config.issuer,
                TokenPurpose::Session,
            ),
            verification: TokenContext::new(
                &config.verification_secret,
                config.verification_expiration_secs,
                &config.issuer,
                TokenPurpose::EmailVerification,
            ),
        }
    }

    #[cfg(test)]
    pub(crate) fn session(&self) -> &TokenContext {
        &self.session
    }

    pub fn session_lifetime_secs(&self) -> u64 {
        self.session.lifetime_secs()
    }

    pub fn issue_session(&self, user_id: UserId) -> Result<String, TokenError> {
        self.session.issue(&user_id.to_string())
    }

    /// Validate a session token and return the user id it names
    pub fn validate_session(&self, token: &str) -> Result<UserId, TokenError> {
        let claims = self.session.validate(token)?;
        claims
            .sub
            .parse::<UserId>()
            .map_err(|_| TokenError::InvalidClaims("sub".to_string()))
    }

    pub fn issue_verification(&self, email: &str) -> Result<String, TokenError> {
        self.verification.issue(email)
    }

    /// Validate a verification token and return the email it names
    pub fn validate_verification(&self, token: &str) -> Result<String, TokenError> {
        Ok(self.verification.validate(token)?.sub)
    }
}
