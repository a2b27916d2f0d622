// Token issuance and validation service
//
// Tokens are PASETO v4.local: XChaCha20 encryption with a BLAKE2b MAC under a
// single 32-byte symmetric key. Payloads are opaque to clients and any
// modified byte fails authentication.

use chrono::{DateTime, Duration, SubsecRound, Utc};
use pasetors::{
    keys::SymmetricKey,
    token::UntrustedToken,
    version4::{LocalToken, V4},
    Local,
};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

use crate::auth::error::AuthError;
use crate::auth::roles::RoleSet;
use crate::config::{
    AuthConfig, MAX_ACCESS_TOKEN_TTL_MINUTES, MAX_REFRESH_TOKEN_TTL_DAYS, TOKEN_KEY_LENGTH,
};

/// Identity to embed in a token
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Identity {
    pub subject_id: i32,
    pub name: String,
    pub roles: RoleSet,
}

/// Claims of a short-lived access token
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccessClaims {
    pub sub: i32,
    pub name: String,
    pub roles: RoleSet,
    #[serde(with = "chrono::serde::ts_seconds")]
    pub iat: DateTime<Utc>,
    #[serde(with = "chrono::serde::ts_seconds")]
    pub nbf: DateTime<Utc>,
    #[serde(with = "chrono::serde::ts_seconds")]
    pub exp: DateTime<Utc>,
    pub jti: Uuid,
}

/// Claims of a long-lived refresh token; no roles
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RefreshClaims {
    pub sub: i32,
    pub name: String,
    #[serde(with = "chrono::serde::ts_seconds")]
    pub iat: DateTime<Utc>,
    #[serde(with = "chrono::serde::ts_seconds")]
    pub nbf: DateTime<Utc>,
    #[serde(with = "chrono::serde::ts_seconds")]
    pub exp: DateTime<Utc>,
    pub jti: Uuid,
}

/// Token payload, discriminated by the `type` field
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum TokenClaims {
    Access(AccessClaims),
    Refresh(RefreshClaims),
}

impl TokenClaims {
    pub fn subject_id(&self) -> i32 {
        match self {
            TokenClaims::Access(c) => c.sub,
            TokenClaims::Refresh(c) => c.sub,
        }
    }

    fn window(&self) -> (DateTime<Utc>, DateTime<Utc>) {
        match self {
            TokenClaims::Access(c) => (c.nbf, c.exp),
            TokenClaims::Refresh(c) => (c.nbf, c.exp),
        }
    }
}

/// A freshly minted token and its expiry
#[derive(Debug, Clone)]
pub struct IssuedToken {
    pub token: String,
    pub expires_at: DateTime<Utc>,
    pub jti: Uuid,
}

/// Token service for issuing and validating sealed tokens
pub struct TokenService {
    key: SymmetricKey<V4>,
    access_ttl: Duration,
    refresh_ttl: Duration,
}

impl fmt::Debug for TokenService {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TokenService")
            .field("access_ttl", &self.access_ttl)
            .field("refresh_ttl", &self.refresh_ttl)
            .finish_non_exhaustive()
    }
}

impl TokenService {
    /// Create a TokenService from raw key bytes
    ///
    /// The key must be exactly 32 bytes; anything else is a fatal configuration error.
    pub fn new(
        secret: &[u8],
        access_ttl_minutes: i64,
        refresh_ttl_days: i64,
    ) -> Result<Self, AuthError> {
        if secret.len() != TOKEN_KEY_LENGTH {
            return Err(AuthError::Fatal(format!(
                "Token key must be {} bytes, got {}",
                TOKEN_KEY_LENGTH,
                secret.len()
            )));
        }

        if !(1..=MAX_ACCESS_TOKEN_TTL_MINUTES).contains(&access_ttl_minutes) {
            return Err(AuthError::Fatal(format!(
                "Access token TTL out of range: {access_ttl_minutes} minutes"
            )));
        }
        if !(1..=MAX_REFRESH_TOKEN_TTL_DAYS).contains(&refresh_ttl_days) {
            return Err(AuthError::Fatal(format!(
                "Refresh token TTL out of range: {refresh_ttl_days} days"
            )));
        }

        let key = SymmetricKey::<V4>::from(secret)
            .map_err(|e| AuthError::Fatal(format!("Unusable token key: {e:?}")))?;

        Ok(Self {
            key,
            access_ttl: Duration::minutes(access_ttl_minutes),
            refresh_ttl: Duration::days(refresh_ttl_days),
        })
    }

    pub fn from_config(config: &AuthConfig) -> Result<Self, AuthError> {
        Self::new(
            &config.token_secret,
            config.access_token_ttl_minutes,
            config.refresh_token_ttl_days,
        )
    }

    pub fn access_ttl(&self) -> Duration {
        self.access_ttl
    }

    pub fn refresh_ttl(&self) -> Duration {
        self.refresh_ttl
    }

    /// Issue an access token with the configured TTL
    pub fn issue_access_token(&self, identity: &Identity) -> Result<IssuedToken, AuthError> {
        self.issue_access_token_at(identity, self.access_ttl, Utc::now())
    }

    /// Issue an access token valid from `now` for `ttl`
    pub fn issue_access_token_at(
        &self,
        identity: &Identity,
        ttl: Duration,
        now: DateTime<Utc>,
    ) -> Result<IssuedToken, AuthError> {
        let (now, exp) = validity_window(now, ttl)?;
        let jti = Uuid::new_v4();
        let claims = TokenClaims::Access(AccessClaims {
            sub: identity.subject_id,
            name: identity.name.clone(),
            roles: identity.roles.clone(),
            iat: now,
            nbf: now,
            exp,
            jti,
        });

        let token = self.seal(&claims)?;
        Ok(IssuedToken { token, expires_at: exp, jti })
    }

    /// Issue a refresh token with the configured TTL
    pub fn issue_refresh_token(&self, identity: &Identity) -> Result<IssuedToken, AuthError> {
        self.issue_refresh_token_at(identity, self.refresh_ttl, Utc::now())
    }

    /// Issue a refresh token valid from `now` for `ttl`
    pub fn issue_refresh_token_at(
        &self,
        identity: &Identity,
        ttl: Duration,
        now: DateTime<Utc>,
    ) -> Result<IssuedToken, AuthError> {
        let (now, exp) = validity_window(now, ttl)?;
        let jti = Uuid::new_v4();
        let claims = TokenClaims::Refresh(RefreshClaims {
            sub: identity.subject_id,
            name: identity.name.clone(),
            iat: now,
            nbf: now,
            exp,
            jti,
        });

        let token = self.seal(&claims)?;
        Ok(IssuedToken { token, expires_at: exp, jti })
    }

    /// Validate a token of either kind
    pub fn validate(&self, token: &str) -> Result<TokenClaims, AuthError> {
        self.validate_at(token, Utc::now())
    }

    /// Validate a token of either kind against the clock value `now`
    pub fn validate_at(&self, token: &str, now: DateTime<Utc>) -> Result<TokenClaims, AuthError> {
        let untrusted = UntrustedToken::<Local, V4>::try_from(token).map_err(|_| AuthError::InvalidToken)?;
        let trusted =
            LocalToken::decrypt(&self.key, &untrusted, None, None).map_err(|_| AuthError::InvalidToken)?;

        let claims: TokenClaims =
            serde_json::from_str(trusted.payload()).map_err(|_| AuthError::MalformedClaims)?;

        let (nbf, exp) = claims.window();
        if now > exp {
            return Err(AuthError::TokenExpired);
        }
        if now < nbf {
            return Err(AuthError::InvalidToken);
        }

        Ok(claims)
    }

    /// Validate an access token
    pub fn validate_access(&self, token: &str) -> Result<AccessClaims, AuthError> {
        self.validate_access_at(token, Utc::now())
    }

    pub fn validate_access_at(&self, token: &str, now: DateTime<Utc>) -> Result<AccessClaims, AuthError> {
        match self.validate_at(token, now)? {
            TokenClaims::Access(claims) => Ok(claims),
            TokenClaims::Refresh(_) => Err(AuthError::InvalidToken),
        }
    }

    /// Validate a refresh token
    pub fn validate_refresh(&self, token: &str) -> Result<RefreshClaims, AuthError> {
        self.validate_refresh_at(token, Utc::now())
    }

    pub fn validate_refresh_at(&self, token: &str, now: DateTime<Utc>) -> Result<RefreshClaims, AuthError> {
        match self.validate_at(token, now)? {
            TokenClaims::Refresh(claims) => Ok(claims),
            TokenClaims::Access(_) => Err(AuthError::InvalidToken),
        }
    }

    fn seal(&self, claims: &TokenClaims) -> Result<String, AuthError> {
        let payload = serde_json::to_vec(claims)
            .map_err(|e| AuthError::Internal(format!("Failed to serialize claims: {e}")))?;

        // Nonce generation draws from the OS entropy source
        LocalToken::encrypt(&self.key, &payload, None, None)
            .map_err(|e| AuthError::Fatal(format!("Token encryption failed: {e:?}")))
    }

    #[cfg(test)]
    pub(crate) fn seal_raw(&self, payload: &[u8]) -> String {
        LocalToken::encrypt(&self.key, payload, None, None).expect("encryption succeeds")
    }
}

/// Whole-second issue and expiry instants, matching what the claims encode
fn validity_window(now: DateTime<Utc>, ttl: Duration) -> Result<(DateTime<Utc>, DateTime<Utc>), AuthError> {
    let now = now.trunc_subsecs(0);
    let exp = now
        .checked_add_signed(ttl)
        .ok_or_else(|| AuthError::Internal(format!("Token expiry out of range: now {now} + {ttl}")))?;
    Ok((now, exp))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::roles::RoleTable;
    use chrono::Timelike;
    use proptest::prelude::*;

    const SECRET: [u8; 32] = *b"0123456789abcdef0123456789abcdef";

    fn test_token_service() -> TokenService {
        TokenService::new(&SECRET, 60, 7).unwrap()
    }

    fn identity(subject_id: i32, name: &str, roles: &[&str]) -> Identity {
        let table = RoleTable::from_pairs([("developer", 1), ("admin", 15), ("picker", 20), ("guest", 99)]);
        Identity {
            subject_id,
            name: name.to_string(),
            roles: table.role_set(roles.iter().copied()).unwrap(),
        }
    }

    #[test]
    fn test_key_length_is_enforced() {
        assert!(matches!(TokenService::new(b"too short", 60, 7), Err(AuthError::Fatal(_))));
        assert!(matches!(TokenService::new(&[7u8; 33], 60, 7), Err(AuthError::Fatal(_))));
    }

    #[test]
    fn test_ttl_range_is_enforced() {
        assert!(matches!(TokenService::new(&SECRET, 0, 7), Err(AuthError::Fatal(_))));
        assert!(matches!(TokenService::new(&SECRET, i64::MAX, 7), Err(AuthError::Fatal(_))));
        assert!(matches!(TokenService::new(&SECRET, 60, 100_000_000), Err(AuthError::Fatal(_))));
        assert!(TokenService::new(&SECRET, MAX_ACCESS_TOKEN_TTL_MINUTES, MAX_REFRESH_TOKEN_TTL_DAYS).is_ok());
    }

    #[test]
    fn test_expiry_overflow_is_an_error() {
        let service = test_token_service();
        let who = identity(5, "Ezra", &["picker"]);
        let ttl = Duration::days(300_000 * 365);

        assert!(matches!(
            service.issue_refresh_token_at(&who, ttl, Utc::now()),
            Err(AuthError::Internal(_))
        ));
        assert!(matches!(
            service.issue_access_token_at(&who, ttl, Utc::now()),
            Err(AuthError::Internal(_))
        ));
    }

    #[test]
    fn test_reported_expiry_matches_sealed_expiry() {
        let service = test_token_service();
        let who = identity(6, "Fay", &["picker"]);
        let now = Utc::now().with_nanosecond(123_456_789).unwrap();

        let refresh = service.issue_refresh_token_at(&who, Duration::days(7), now).unwrap();
        let claims = service.validate_refresh_at(&refresh.token, now).unwrap();
        assert_eq!(refresh.expires_at, claims.exp);
        assert_eq!(refresh.expires_at.timestamp_subsec_nanos(), 0);
        assert_eq!(claims.iat, now.trunc_subsecs(0));

        let access = service.issue_access_token_at(&who, Duration::minutes(60), now).unwrap();
        let claims = service.validate_access_at(&access.token, now).unwrap();
        assert_eq!(access.expires_at, claims.exp);
    }

    #[test]
    fn test_access_token_round_trip() {
        let service = test_token_service();
        let who = identity(42, "Pat Picker", &["picker"]);
        let issued = service.issue_access_token(&who).unwrap();

        let claims = service.validate_access(&issued.token).unwrap();
        assert_eq!(claims.sub, 42);
        assert_eq!(claims.name, "Pat Picker");
        assert_eq!(claims.roles, who.roles);
        assert_eq!(claims.jti, issued.jti);
        assert_eq!((claims.exp - claims.iat).num_minutes(), 60);
        assert_eq!(claims.nbf, claims.iat);

        assert!(matches!(service.validate(&issued.token).unwrap(), TokenClaims::Access(_)));
    }

    #[test]
    fn test_refresh_token_carries_no_roles() {
        let service = test_token_service();
        let issued = service.issue_refresh_token(&identity(7, "Ann Admin", &["admin"])).unwrap();

        let claims = service.validate_refresh(&issued.token).unwrap();
        assert_eq!(claims.sub, 7);
        assert_eq!((claims.exp - claims.iat).num_days(), 7);

        let payload = serde_json::to_value(TokenClaims::Refresh(claims)).unwrap();
        assert_eq!(payload["type"], "refresh");
        assert!(payload.get("roles").is_none());
    }

    #[test]
    fn test_token_kinds_are_not_interchangeable() {
        let service = test_token_service();
        let who = identity(1, "Dev", &["developer"]);
        let access = service.issue_access_token(&who).unwrap();
        let refresh = service.issue_refresh_token(&who).unwrap();

        assert!(matches!(service.validate_refresh(&access.token), Err(AuthError::InvalidToken)));
        assert!(matches!(service.validate_access(&refresh.token), Err(AuthError::InvalidToken)));
    }

    #[test]
    fn test_expired_token_is_rejected() {
        let service = test_token_service();
        let issued_at = Utc::now();
        let issued = service
            .issue_access_token_at(&identity(3, "Dee", &["picker"]), Duration::minutes(60), issued_at)
            .unwrap();

        let just_before = issued_at + Duration::minutes(59);
        assert!(service.validate_access_at(&issued.token, just_before).is_ok());

        let after = issued_at + Duration::minutes(61);
        assert!(matches!(
            service.validate_access_at(&issued.token, after),
            Err(AuthError::TokenExpired)
        ));
    }

    #[test]
    fn test_refresh_token_expires_after_days() {
        let service = test_token_service();
        let now = Utc::now();
        let issued = service.issue_refresh_token_at(&identity(3, "Dee", &[]), Duration::days(7), now).unwrap();

        assert!(service.validate_refresh_at(&issued.token, now + Duration::days(6)).is_ok());
        assert!(matches!(
            service.validate_refresh_at(&issued.token, now + Duration::days(8)),
            Err(AuthError::TokenExpired)
        ));
    }

    #[test]
    fn test_not_yet_valid_token_is_rejected() {
        let service = test_token_service();
        let future = Utc::now() + Duration::hours(1);
        let issued = service
            .issue_access_token_at(&identity(3, "Dee", &[]), Duration::minutes(60), future)
            .unwrap();

        assert!(matches!(service.validate_access(&issued.token), Err(AuthError::InvalidToken)));
    }

    #[test]
    fn test_any_modified_character_is_rejected() {
        let service = test_token_service();
        let issued = service.issue_access_token(&identity(9, "Tam", &["admin"])).unwrap();
        let token = issued.token;
        let prefix_len = "v4.local.".len();

        // The last character can carry unused base64 bits, skip it
        for index in 0..token.len() - 1 {
            let mut bytes = token.clone().into_bytes();
            bytes[index] = if bytes[index] == b'A' { b'B' } else { b'A' };
            let tampered = String::from_utf8(bytes).unwrap();

            let result = service.validate(&tampered);
            assert!(
                matches!(result, Err(AuthError::InvalidToken)),
                "tampering at {} (body offset {}) was not detected",
                index,
                index.saturating_sub(prefix_len)
            );
        }
    }

    #[test]
    fn test_other_key_is_rejected() {
        let service = test_token_service();
        let other = TokenService::new(&[9u8; 32], 60, 7).unwrap();
        let issued = service.issue_access_token(&identity(1, "A", &[])).unwrap();

        assert!(matches!(other.validate(&issued.token), Err(AuthError::InvalidToken)));
    }

    #[test]
    fn test_malformed_tokens_are_rejected() {
        let service = test_token_service();
        for token in ["", "not.a.token", "v4.local.", "v4.public.abc", "v3.local.AAAA"] {
            assert!(matches!(service.validate(token), Err(AuthError::InvalidToken)), "{token}");
        }
    }

    #[test]
    fn test_authentic_payload_without_claims_is_malformed() {
        let service = test_token_service();

        let token = service.seal_raw(br#"{"type":"access","sub":1}"#);
        assert!(matches!(service.validate(&token), Err(AuthError::MalformedClaims)));

        let token = service.seal_raw(b"plain text");
        assert!(matches!(service.validate(&token), Err(AuthError::MalformedClaims)));
    }

    #[test]
    fn test_each_issue_produces_a_distinct_token() {
        let service = test_token_service();
        let who = identity(5, "Sam", &["picker"]);
        let now = Utc::now();
        let first = service.issue_refresh_token_at(&who, Duration::days(7), now).unwrap();
        let second = service.issue_refresh_token_at(&who, Duration::days(7), now).unwrap();

        assert_ne!(first.token, second.token);
        assert_ne!(first.jti, second.jti);
    }

    proptest! {
        #[test]
        fn prop_access_token_round_trip(
            subject_id in 1i32..1_000_000,
            name in "[A-Za-z ]{1,30}",
            ttl in 1i64..10_000,
        ) {
            let service = test_token_service();
            let who = identity(subject_id, &name, &["picker", "admin"]);
            let now = Utc::now();
            let issued = service.issue_access_token_at(&who, Duration::minutes(ttl), now)?;

            let claims = service.validate_access_at(&issued.token, now)?;
            prop_assert_eq!(claims.sub, subject_id);
            prop_assert_eq!(&claims.name, &name);
            prop_assert_eq!(&claims.roles, &who.roles);
            prop_assert_eq!((claims.exp - claims.iat).num_minutes(), ttl);

            let expired = service.validate_access_at(&issued.token, now + Duration::minutes(ttl) + Duration::seconds(1));
            prop_assert!(matches!(expired, Err(AuthError::TokenExpired)));
        }

        #[test]
        fn prop_random_strings_are_rejected(garbage in "[a-zA-Z0-9._-]{0,80}") {
            let service = test_token_service();
            prop_assert!(service.validate(&garbage).is_err());
        }
    }
}
