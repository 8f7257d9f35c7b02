use std::fmt;
use std::str::FromStr;

use chrono::{Duration, Utc};
use jsonwebtoken::{decode, encode, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

use crate::config;
use crate::error::ApiError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Admin,
    Accountant,
    Teacher,
    Staff,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Admin => "admin",
            Role::Accountant => "accountant",
            Role::Teacher => "teacher",
            Role::Staff => "staff",
        }
    }

    /// Roles allowed to move money or change fee positions
    pub const FINANCE: &'static [Role] = &[Role::Admin, Role::Accountant];

    /// Roles allowed to approve or revoke concessions
    pub const APPROVERS: &'static [Role] = &[Role::Admin];
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Role {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "admin" => Ok(Role::Admin),
            "accountant" => Ok(Role::Accountant),
            "teacher" => Ok(Role::Teacher),
            "staff" => Ok(Role::Staff),
            other => Err(format!("Unknown role '{}'", other)),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    pub sub: Uuid,
    pub school_id: Uuid,
    pub role: Role,
    pub exp: i64,
    pub iat: i64,
}

impl Claims {
    pub fn new(user_id: Uuid, school_id: Uuid, role: Role) -> Self {
        let now = Utc::now();
        let expiry_hours = config::config().security.jwt_expiry_hours;
        let exp = (now + Duration::hours(expiry_hours as i64)).timestamp();

        Self {
            sub: user_id,
            school_id,
            role,
            exp,
            iat: now.timestamp(),
        }
    }
}

#[derive(Debug, Error)]
pub enum JwtError {
    #[error("JWT generation error: {0}")]
    TokenGeneration(String),

    #[error("Invalid JWT token: {0}")]
    InvalidToken(String),

    #[error("JWT secret not configured")]
    InvalidSecret,
}

pub fn generate_jwt(claims: &Claims) -> Result<String, JwtError> {
    let secret = &config::config().security.jwt_secret;

    if secret.is_empty() {
        return Err(JwtError::InvalidSecret);
    }

    let encoding_key = EncodingKey::from_secret(secret.as_bytes());
    encode(&Header::default(), claims, &encoding_key).map_err(|e| JwtError::TokenGeneration(e.to_string()))
}

pub fn validate_jwt(token: &str) -> Result<Claims, JwtError> {
    let secret = &config::config().security.jwt_secret;

    if secret.is_empty() {
        return Err(JwtError::InvalidSecret);
    }

    let decoding_key = DecodingKey::from_secret(secret.as_bytes());
    let token_data = decode::<Claims>(token, &decoding_key, &Validation::default())
        .map_err(|e| JwtError::InvalidToken(e.to_string()))?;

    Ok(token_data.claims)
}

/// The authenticated caller: whose school every operation is scoped to,
/// who gets recorded in audit and collector fields, and what they may do.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Actor {
    pub user_id: Uuid,
    pub school_id: Uuid,
    pub role: Role,
}

impl Actor {
    pub fn require(&self, allowed: &[Role]) -> Result<(), ApiError> {
        if allowed.contains(&self.role) {
            Ok(())
        } else {
            Err(ApiError::forbidden(format!(
                "Role '{}' is not permitted to perform this action",
                self.role
            )))
        }
    }
}

impl From<Claims> for Actor {
    fn from(claims: Claims) -> Self {
        Self {
            user_id: claims.sub,
            school_id: claims.school_id,
            role: claims.role,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn token_round_trip_keeps_scope() {
        let user = Uuid::new_v4();
        let school = Uuid::new_v4();
        let token = generate_jwt(&Claims::new(user, school, Role::Accountant)).unwrap();
        let actor = Actor::from(validate_jwt(&token).unwrap());
        assert_eq!(actor.user_id, user);
        assert_eq!(actor.school_id, school);
        assert_eq!(actor.role, Role::Accountant);
    }

    #[test]
    fn tampered_tokens_are_rejected() {
        let token = generate_jwt(&Claims::new(Uuid::new_v4(), Uuid::new_v4(), Role::Admin)).unwrap();
        let tampered = format!("{}x", token);
        assert!(matches!(validate_jwt(&tampered), Err(JwtError::InvalidToken(_))));
    }

    #[test]
    fn roles_are_checked() {
        let teacher = Actor {
            user_id: Uuid::new_v4(),
            school_id: Uuid::new_v4(),
            role: Role::Teacher,
        };
        assert_eq!(teacher.require(Role::FINANCE).unwrap_err().status_code(), 403);
        let accountant = Actor { role: Role::Accountant, ..teacher };
        assert!(accountant.require(Role::FINANCE).is_ok());
        assert!(accountant.require(Role::APPROVERS).is_err());
    }
}
