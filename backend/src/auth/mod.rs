use std::str::FromStr;

use jsonwebtoken::{decode, encode, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use solana_sdk::pubkey::Pubkey;
use solana_sdk::signature::Signature;
use thiserror::Error;
use uuid::Uuid;

use crate::models::Profile;

/// Text the wallet signs, followed by the unix timestamp in seconds.
pub const CHALLENGE_PREFIX: &str = "Sign in to ScrapX at ";

#[derive(Debug, Error)]
pub enum AuthError {
    #[error("token error: {0}")]
    Jwt(#[from] jsonwebtoken::errors::Error),
    #[error("invalid wallet address")]
    InvalidWallet,
    #[error("signature does not match wallet")]
    InvalidSignature,
    #[error("malformed login message")]
    MalformedChallenge,
    #[error("login message expired")]
    StaleChallenge,
    #[error("token subject is not a profile id")]
    InvalidSubject,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct Claims {
    pub sub: String,
    pub wallet: String,
    pub iat: usize,
    pub exp: usize,
}

/// The authenticated caller, inserted into request extensions by the
/// `authenticate` middleware.
#[derive(Debug, Clone)]
pub struct AuthUser {
    pub id: Uuid,
    pub wallet: String,
}

impl TryFrom<Claims> for AuthUser {
    type Error = AuthError;

    fn try_from(claims: Claims) -> Result<Self, Self::Error> {
        let id = Uuid::parse_str(&claims.sub).map_err(|_| AuthError::InvalidSubject)?;
        Ok(Self {
            id,
            wallet: claims.wallet,
        })
    }
}

pub fn challenge_message(now: i64) -> String {
    format!("{CHALLENGE_PREFIX}{now}")
}

/// Accepts a login message signed at most `window_secs` away from `now`.
pub fn check_challenge(message: &str, now: i64, window_secs: i64) -> Result<(), AuthError> {
    let issued_at: i64 = message
        .strip_prefix(CHALLENGE_PREFIX)
        .and_then(|ts| ts.trim().parse().ok())
        .ok_or(AuthError::MalformedChallenge)?;
    match now.checked_sub(issued_at).map(i64::unsigned_abs) {
        Some(age) if age <= window_secs.unsigned_abs() => Ok(()),
        _ => Err(AuthError::StaleChallenge),
    }
}

/// Checks an ed25519 signature (base58) over `message` against a base58
/// wallet address.
pub fn verify_wallet_signature(
    wallet_address: &str,
    signature: &str,
    message: &str,
) -> Result<Pubkey, AuthError> {
    let pubkey = Pubkey::from_str(wallet_address).map_err(|_| AuthError::InvalidWallet)?;
    let signature_bytes = bs58::decode(signature)
        .into_vec()
        .map_err(|_| AuthError::InvalidSignature)?;
    let signature_array: [u8; 64] = signature_bytes
        .try_into()
        .map_err(|_| AuthError::InvalidSignature)?;
    let signature = Signature::from(signature_array);

    if signature.verify(&pubkey.to_bytes(), message.as_bytes()) {
        Ok(pubkey)
    } else {
        Err(AuthError::InvalidSignature)
    }
}

pub fn create_token(
    profile: &Profile,
    jwt_secret: &str,
    ttl_hours: i64,
    now: i64,
) -> Result<String, AuthError> {
    let claims = Claims {
        sub: profile.id.to_string(),
        wallet: profile.wallet_address.clone(),
        iat: now as usize,
        exp: (now + ttl_hours * 60 * 60) as usize,
    };
    let token = encode(
        &Header::default(),
        &claims,
        &EncodingKey::from_secret(jwt_secret.as_bytes()),
    )?;
    Ok(token)
}

pub fn validate_token(token: &str, jwt_secret: &str) -> Result<AuthUser, AuthError> {
    let token_data = decode::<Claims>(
        token,
        &DecodingKey::from_secret(jwt_secret.as_bytes()),
        &Validation::default(),
    )?;
    AuthUser::try_from(token_data.claims)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use solana_sdk::signature::{Keypair, Signer};

    use crate::models::Role;

    fn profile(wallet: &str) -> Profile {
        Profile {
            id: Uuid::new_v4(),
            wallet_address: wallet.to_string(),
            display_name: None,
            phone: None,
            role: Role::Seller,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    #[test]
    fn token_round_trip() {
        let now = Utc::now().timestamp();
        let profile = profile("wallet");
        let token = create_token(&profile, "secret", 24, now).unwrap();
        let user = validate_token(&token, "secret").unwrap();
        assert_eq!(user.id, profile.id);
        assert_eq!(user.wallet, "wallet");
        assert!(validate_token(&token, "other-secret").is_err());
    }

    #[test]
    fn expired_token_is_rejected() {
        let long_ago = Utc::now().timestamp() - 3 * 24 * 60 * 60;
        let token = create_token(&profile("wallet"), "secret", 1, long_ago).unwrap();
        assert!(validate_token(&token, "secret").is_err());
    }

    #[test]
    fn wallet_signature_verifies() {
        let keypair = Keypair::new();
        let message = challenge_message(1_700_000_000);
        let signature = keypair.sign_message(message.as_bytes()).to_string();
        let wallet = keypair.pubkey().to_string();

        assert_eq!(
            verify_wallet_signature(&wallet, &signature, &message).unwrap(),
            keypair.pubkey()
        );
        assert!(matches!(
            verify_wallet_signature(&wallet, &signature, "Sign in to ScrapX at 1"),
            Err(AuthError::InvalidSignature)
        ));
        let stranger = Keypair::new().pubkey().to_string();
        assert!(verify_wallet_signature(&stranger, &signature, &message).is_err());
        assert!(matches!(
            verify_wallet_signature("not-a-key", &signature, &message),
            Err(AuthError::InvalidWallet)
        ));
    }

    #[test]
    fn challenge_window() {
        let message = challenge_message(1_000);
        assert!(check_challenge(&message, 1_100, 300).is_ok());
        assert!(matches!(
            check_challenge(&message, 2_000, 300),
            Err(AuthError::StaleChallenge)
        ));
        assert!(matches!(
            check_challenge("hello 1000", 1_000, 300),
            Err(AuthError::MalformedChallenge)
        ));
    }

    #[test]
    fn extreme_timestamps_are_stale() {
        for issued_at in [i64::MIN, i64::MAX] {
            let message = challenge_message(issued_at);
            assert!(matches!(
                check_challenge(&message, 1_700_000_000, 300),
                Err(AuthError::StaleChallenge)
            ));
        }
        assert!(matches!(
            check_challenge(&challenge_message(1_700_000_000), i64::MIN, 300),
            Err(AuthError::StaleChallenge)
        ));
    }
}
