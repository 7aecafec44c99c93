//! Session tokens
//!
//! Sessions are HS256 JWTs issued by the surrounding grade application.
//! `SessionValidator` is the only place a `Session` is produced.

use jsonwebtoken::{decode, encode, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use std::time::{SystemTime, UNIX_EPOCH};

use crate::auth::{required_role, Role};
use crate::types::AttestError;

/// Authenticated caller, passed explicitly to every operation that needs it
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Session {
    pub id: String,
    pub role: Role,
    pub email: String,
}

impl Session {
    /// Fail with `Forbidden` unless the session holds at least `required`
    pub fn require(&self, required: Role) -> Result<(), AttestError> {
        if self.role >= required {
            Ok(())
        } else {
            Err(AttestError::Forbidden(format!(
                "{} role required",
                required
            )))
        }
    }

    /// Fail with `Forbidden` unless the session may perform `operation`
    pub fn authorize(&self, operation: &str) -> Result<(), AttestError> {
        let required = required_role(operation).ok_or_else(|| {
            AttestError::Forbidden(format!("Unknown operation {}", operation))
        })?;
        self.require(required)
    }
}

/// Payload stored in the session token
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    /// User id
    pub sub: String,
    pub role: Role,
    pub email: String,
    pub iat: u64,
    pub exp: u64,
}

impl From<Claims> for Session {
    fn from(claims: Claims) -> Self {
        Self {
            id: claims.sub,
            role: claims.role,
            email: claims.email,
        }
    }
}

#[derive(Clone)]
pub struct SessionValidator {
    secret: String,
    expiry_seconds: u64,
}

impl SessionValidator {
    /// Returns an error if the secret is empty or too short
    pub fn new(secret: String, expiry_seconds: u64) -> Result<Self, AttestError> {
        if secret.is_empty() {
            return Err(AttestError::Config(
                "JWT_SECRET is required in production mode".into(),
            ));
        }

        if secret.len() < 32 {
            return Err(AttestError::Config(
                "JWT_SECRET must be at least 32 characters".into(),
            ));
        }

        Ok(Self {
            secret,
            expiry_seconds,
        })
    }

    /// Issue a token for a session. Used by tests and local tooling.
    pub fn issue(&self, session: &Session) -> Result<String, AttestError> {
        let now = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map_err(|e| AttestError::Internal(format!("System time error: {}", e)))?
            .as_secs();

        let claims = Claims {
            sub: session.id.clone(),
            role: session.role,
            email: session.email.clone(),
            iat: now,
            exp: now + self.expiry_seconds,
        };

        encode(
            &Header::default(),
            &claims,
            &EncodingKey::from_secret(self.secret.as_bytes()),
        )
        .map_err(|e| AttestError::Internal(format!("Failed to issue token: {}", e)))
    }

    /// Verify a token and produce the session it carries
    pub fn validate(&self, token: &str) -> Result<Session, AttestError> {
        decode::<Claims>(
            token,
            &DecodingKey::from_secret(self.secret.as_bytes()),
            &Validation::default(),
        )
        .map(|data| Session::from(data.claims))
        .map_err(|err| {
            use jsonwebtoken::errors::ErrorKind;
            let msg = match err.kind() {
                ErrorKind::ExpiredSignature => "Token expired",
                ErrorKind::InvalidToken => "Invalid token",
                ErrorKind::InvalidSignature => "Invalid signature",
                _ => "Token validation failed",
            };
            AttestError::Unauthorized(msg.to_string())
        })
    }

    /// Session from an `Authorization` header value
    pub fn authenticate(&self, auth_header: Option<&str>) -> Result<Session, AttestError> {
        let token = extract_token_from_header(auth_header)
            .ok_or_else(|| AttestError::Unauthorized("Missing bearer token".to_string()))?;
        self.validate(token)
    }
}

/// Extract the token from a `Bearer <token>` header
pub fn extract_token_from_header(auth_header: Option<&str>) -> Option<&str> {
    let token = auth_header?.strip_prefix("Bearer ")?.trim();
    if token.is_empty() {
        None
    } else {
        Some(token)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn validator() -> SessionValidator {
        SessionValidator::new("test-secret-that-is-at-least-32-characters-long".into(), 3600).unwrap()
    }

    fn teacher() -> Session {
        Session {
            id: "t1".into(),
            role: Role::Teacher,
            email: "t1@school.test".into(),
        }
    }

    #[test]
    fn test_issue_and_validate() {
        let v = validator();
        let token = v.issue(&teacher()).unwrap();
        assert_eq!(v.validate(&token).unwrap(), teacher());
    }

    #[test]
    fn test_wrong_secret_rejected() {
        let other =
            SessionValidator::new("different-secret-that-is-at-least-32-characters".into(), 3600)
                .unwrap();
        let token = validator().issue(&teacher()).unwrap();
        assert!(matches!(other.validate(&token), Err(AttestError::Unauthorized(_))));
    }

    #[test]
    fn test_extract_token_from_header() {
        assert_eq!(extract_token_from_header(Some("Bearer abc123")), Some("abc123"));
        assert_eq!(extract_token_from_header(Some("Bearer ")), None);
        assert_eq!(extract_token_from_header(Some("Basic abc123")), None);
        assert_eq!(extract_token_from_header(None), None);
    }

    #[test]
    fn test_authenticate_requires_header() {
        assert!(matches!(
            validator().authenticate(None),
            Err(AttestError::Unauthorized(_))
        ));
    }

    #[test]
    fn test_secret_validation() {
        assert!(SessionValidator::new("short".into(), 3600).is_err());
        assert!(SessionValidator::new("".into(), 3600).is_err());
    }

    #[test]
    fn test_require_role() {
        let session = teacher();
        assert!(session.require(Role::Student).is_ok());
        assert!(session.require(Role::Teacher).is_ok());
        assert!(matches!(session.require(Role::Admin), Err(AttestError::Forbidden(_))));
        assert!(session.authorize("attest_grade").is_ok());
        assert!(session.authorize("reload").is_err());
    }
}
