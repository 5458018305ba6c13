//! Authentication error types.

use bankcore_common::BankError;
use thiserror::Error;

/// Errors raised while authenticating a caller.
#[derive(Debug, Error)]
pub enum AuthError {
    #[error("Invalid credentials")]
    InvalidCredentials,

    #[error("OTP expired or not found")]
    OtpExpired,

    #[error("Too many attempts. Try again later.")]
    TooManyAttempts,

    #[error("Invalid OTP. Attempts left: {remaining}")]
    InvalidOtp { remaining: u32 },

    #[error("Invalid or expired token")]
    InvalidToken,

    /// The principal directory could not be loaded or saved.
    #[error("Principal directory error: {0}")]
    Directory(String),

    #[error("User not found: {0}")]
    UnknownPrincipal(String),

    /// A directory change was refused.
    #[error("{message}")]
    Rejected { message: String, field: &'static str },
}

impl AuthError {
    pub fn error_code(&self) -> &'static str {
        match self {
            AuthError::InvalidCredentials => "INVALID_CREDENTIALS",
            AuthError::OtpExpired => "OTP_EXPIRED",
            AuthError::TooManyAttempts => "OTP_TOO_MANY_ATTEMPTS",
            AuthError::InvalidOtp { .. } => "OTP_INVALID",
            AuthError::InvalidToken => "INVALID_TOKEN",
            AuthError::Directory(_) => "DIRECTORY_ERROR",
            AuthError::UnknownPrincipal(_) => "USER_NOT_FOUND",
            AuthError::Rejected { .. } => "DIRECTORY_CHANGE_REJECTED",
        }
    }
}

impl From<AuthError> for BankError {
    fn from(err: AuthError) -> Self {
        match err {
            AuthError::Directory(msg) => BankError::Internal(msg),
            AuthError::UnknownPrincipal(username) => BankError::PrincipalNotFound(username),
            AuthError::Rejected { message, field } => BankError::InvalidRequest {
                message,
                field: Some(field.to_string()),
            },
            other => BankError::Unauthenticated(other.to_string()),
        }
    }
}

/// Result type for authentication.
pub type AuthResult<T> = Result<T, AuthError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_auth_errors_are_unauthenticated() {
        let err: BankError = AuthError::InvalidOtp { remaining: 3 }.into();
        assert_eq!(err.status_code(), 401);
        assert_eq!(err.public_message(), "Invalid OTP. Attempts left: 3");

        let err: BankError = AuthError::Directory("bad json".into()).into();
        assert_eq!(err.status_code(), 500);
    }

    #[test]
    fn test_directory_change_errors() {
        let err: BankError = AuthError::UnknownPrincipal("bob".into()).into();
        assert_eq!(err.status_code(), 404);
        assert_eq!(err.error_code(), "USER_NOT_FOUND");

        let err: BankError = AuthError::Rejected {
            message: "Unknown role: Wizard".into(),
            field: "roles",
        }
        .into();
        assert_eq!(err.status_code(), 400);
        assert_eq!(err.field(), Some("roles"));
    }
}
