use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::error::AppError;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    /// Subject (numeric subscriber id)
    pub sub: String,
    /// Expiration time (Unix timestamp)
    pub exp: i64,
    /// Issued at (Unix timestamp)
    pub iat: i64,
    #[serde(default)]
    pub roles: Vec<String>,
    /// Additional custom claims
    #[serde(flatten)]
    pub extra: HashMap<String, serde_json::Value>,
}

impl Claims {
    /// The subscriber this token was issued to
    pub fn subscriber_id(&self) -> Result<i64, AppError> {
        self.sub
            .parse()
            .map_err(|_| AppError::Auth(format!("Subject is not a subscriber id: {}", self.sub)))
    }

    pub fn has_role(&self, role: &str) -> bool {
        self.roles.iter().any(|r| r == role)
    }

    pub fn is_expired(&self) -> bool {
        let now = chrono::Utc::now().timestamp();
        self.exp < now
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn claims(sub: &str) -> Claims {
        Claims {
            sub: sub.to_string(),
            exp: chrono::Utc::now().timestamp() + 60,
            iat: chrono::Utc::now().timestamp(),
            roles: vec!["member".to_string()],
            extra: Default::default(),
        }
    }

    #[test]
    fn test_numeric_subject() {
        assert_eq!(claims("42").subscriber_id().unwrap(), 42);
        assert!(claims("42").has_role("member"));
        assert!(!claims("42").is_expired());
    }

    #[test]
    fn test_non_numeric_subject_rejected() {
        assert!(matches!(claims("user-42").subscriber_id(), Err(AppError::Auth(_))));
    }
}
