//! Authentication and authorization
//!
//! - Session and verification tokens (`jwt`)
//! - Argon2id password hashing (`password`)
//! - Session extraction middleware (`middleware`)
//! - Role checks against the user directory (`access`)
//! - Verification resend throttling (`rate_limit`)

pub mod access;
pub mod jwt;
pub mod middleware;
pub mod password;
pub mod rate_limit;

pub use access::AccessControl;
pub use jwt::{Claims, TokenContext, TokenError, TokenPurpose, TokenService};
pub use middleware::{
    authenticate, block_if_authenticated, require_session, session_token, AuthenticatedUser,
    SESSION_COOKIE,
};
pub use password::{CredentialHasher, PasswordConfig, PasswordError};
pub use rate_limit::{resend_rate_limit, FixedWindowRateLimiter, RESEND_LIMIT_MESSAGE};
