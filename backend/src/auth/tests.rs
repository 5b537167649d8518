use super::*;
use jsonwebtoken::{EncodingKey, Header, encode};
use std::env;

const SECRET: &str = "supersecretjwtsecretforunittesting123";

fn set_env_vars() {
    unsafe {
        env::set_var("AUTH_JWT_SECRET", SECRET);
    }
}

fn token(claims: &AccessClaims, secret: &str) -> String {
    encode(
        &Header::default(),
        claims,
        &EncodingKey::from_secret(secret.as_bytes()),
    )
    .unwrap()
}

#[test]
fn test_validate_access_token_success() {
    set_env_vars();
    let my_claims = AccessClaims {
        sub: "123e4567-e89b-12d3-a456-426614174000".to_string(),
        role: "client".to_string(),
        email: Some("client@example.com".to_string()),
        exp: 9999999999,
    };

    let claims =
        validate_access_token(&token(&my_claims, SECRET)).expect("Valid token should pass");
    assert_eq!(claims.sub, my_claims.sub);
    assert_eq!(claims.role, "client");
}

#[test]
fn test_validate_access_token_expired() {
    set_env_vars();
    let my_claims = AccessClaims {
        sub: "123e4567-e89b-12d3-a456-426614174000".to_string(),
        role: "client".to_string(),
        email: None,
        exp: 1,
    };

    assert!(validate_access_token(&token(&my_claims, SECRET)).is_err());
}

#[test]
fn test_validate_access_token_invalid_signature() {
    set_env_vars();
    let my_claims = AccessClaims {
        sub: "123e4567-e89b-12d3-a456-426614174000".to_string(),
        role: "client".to_string(),
        email: None,
        exp: 9999999999,
    };

    assert!(validate_access_token(&token(&my_claims, "wrongsecret")).is_err());
}

#[test]
fn test_admin_role_detection() {
    let admin = AuthUser {
        user_id: Uuid::new_v4(),
        email: None,
        role: ADMIN_ROLE.to_string(),
    };
    let trainer = AuthUser {
        role: "fitness_trainer".to_string(),
        ..admin.clone()
    };

    assert!(admin.is_admin());
    assert!(!trainer.is_admin());
}
