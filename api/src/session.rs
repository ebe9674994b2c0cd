//! Play-session tokens.
//!
//! A session token is an HS256 JWT binding a game session to one song path. It
//! is handed to the client as a cookie when a game starts and has to come back,
//! old enough, before a play is counted. This only slows down trivial play-count
//! inflation; it does not prove anyone actually played.
use jsonwebtoken::errors::ErrorKind;
use jsonwebtoken::{Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub const SESSION_COOKIE: &str = "game_session";

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum SessionError {
    #[error("No game session")]
    NoSession,

    #[error("Invalid game session")]
    Invalid,

    #[error("Game session expired")]
    Expired,

    #[error("Game session is not for this song, expected {expected}, got {got}")]
    WrongSong { expected: String, got: String },

    #[error("Not enough playtime")]
    NotEnoughPlaytime,
}

#[derive(Debug, Serialize, Deserialize)]
struct SessionClaims {
    path: String,
    iss: String,
    aud: String,
    iat: i64,
    exp: i64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VerifiedSession {
    pub issued_at: i64,
}

pub struct SessionSigner {
    encoding_key: EncodingKey,
    decoding_key: DecodingKey,
    validation: Validation,
    issuer: String,
    lifetime_seconds: i64,
    min_playtime_seconds: i64,
}

impl SessionSigner {
    pub fn new(
        secret: &[u8],
        issuer: &str,
        lifetime_seconds: i64,
        min_playtime_seconds: i64,
    ) -> Self {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.set_issuer(&[issuer]);
        validation.set_audience(&[issuer]);
        validation.set_required_spec_claims(&["exp", "iss", "aud"]);
        validation.leeway = 0;

        Self {
            encoding_key: EncodingKey::from_secret(secret),
            decoding_key: DecodingKey::from_secret(secret),
            validation,
            issuer: issuer.to_string(),
            lifetime_seconds,
            min_playtime_seconds,
        }
    }

    pub fn lifetime_seconds(&self) -> i64 {
        self.lifetime_seconds
    }

    pub fn issue(&self, path: &str) -> Result<String, jsonwebtoken::errors::Error> {
        self.issue_at(path, now())
    }

    pub fn issue_at(&self, path: &str, now: i64) -> Result<String, jsonwebtoken::errors::Error> {
        let claims = SessionClaims {
            path: path.to_string(),
            iss: self.issuer.clone(),
            aud: self.issuer.clone(),
            iat: now,
            exp: now + self.lifetime_seconds,
        };
        self.sign(&claims)
    }

    pub fn verify(&self, token: &str, path: &str) -> Result<VerifiedSession, SessionError> {
        self.verify_at(token, path, now())
    }

    /// Like [`verify`](Self::verify), with expiry and playtime measured at `now`.
    /// The token must also be unexpired by the wall clock.
    pub fn verify_at(
        &self,
        token: &str,
        path: &str,
        now: i64,
    ) -> Result<VerifiedSession, SessionError> {
        let claims = self.verify_claims(token, now)?;
        // phase two: the payload has to have our shape, whatever signed it
        let claims: SessionClaims =
            serde_json::from_value(claims).map_err(|_| SessionError::Invalid)?;

        if claims.path != path {
            return Err(SessionError::WrongSong {
                expected: claims.path,
                got: path.to_string(),
            });
        }
        if now - claims.iat < self.min_playtime_seconds {
            return Err(SessionError::NotEnoughPlaytime);
        }

        Ok(VerifiedSession {
            issued_at: claims.iat,
        })
    }

    fn sign(&self, claims: &SessionClaims) -> Result<String, jsonwebtoken::errors::Error> {
        jsonwebtoken::encode(&Header::new(Algorithm::HS256), claims, &self.encoding_key)
    }

    /// Phase one: signature and the registered claims, on the raw claim set.
    fn verify_claims(&self, token: &str, now: i64) -> Result<serde_json::Value, SessionError> {
        let data = jsonwebtoken::decode::<serde_json::Value>(
            token,
            &self.decoding_key,
            &self.validation,
        )
        .map_err(|e| match e.kind() {
            ErrorKind::ExpiredSignature => SessionError::Expired,
            _ => SessionError::Invalid,
        })?;

        let exp = data
            .claims
            .get("exp")
            .and_then(|v| v.as_i64())
            .ok_or(SessionError::Invalid)?;
        if exp <= now {
            return Err(SessionError::Expired);
        }

        Ok(data.claims)
    }
}

fn now() -> i64 {
    chrono::Utc::now().timestamp()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    const ISSUER: &str = "guess-the-lyrics";
    const SECRET: &[u8] = b"0123456789abcdef0123456789abcdef";

    fn signer(min_playtime: i64) -> SessionSigner {
        SessionSigner::new(SECRET, ISSUER, 3600, min_playtime)
    }

    #[test]
    fn verifies_its_own_tokens() {
        let signer = signer(0);
        let token = signer.issue("adele/hello").unwrap();
        assert!(signer.verify(&token, "adele/hello").is_ok());
    }

    #[test]
    fn playtime_is_enforced() {
        let signer = signer(30);
        let start = now();
        let token = signer.issue_at("adele/hello", start).unwrap();

        assert_eq!(
            signer.verify_at(&token, "adele/hello", start + 10),
            Err(SessionError::NotEnoughPlaytime)
        );
        assert_eq!(
            signer.verify_at(&token, "adele/hello", start + 30),
            Ok(VerifiedSession { issued_at: start })
        );
    }

    #[test]
    fn token_is_bound_to_its_song() {
        let signer = signer(0);
        let token = signer.issue("a/b").unwrap();
        assert_eq!(
            signer.verify(&token, "c/d"),
            Err(SessionError::WrongSong {
                expected: "a/b".to_string(),
                got: "c/d".to_string()
            })
        );
    }

    #[test]
    fn expired_tokens_are_rejected() {
        let signer = signer(0);
        let start = now();
        let token = signer.issue_at("a/b", start).unwrap();
        assert_eq!(
            signer.verify_at(&token, "a/b", start + 3600),
            Err(SessionError::Expired)
        );

        // long gone by the wall clock too
        let token = signer.issue_at("a/b", 1_000).unwrap();
        assert_eq!(
            signer.verify_at(&token, "a/b", 1_100),
            Err(SessionError::Expired)
        );
    }

    #[test]
    fn expiry_forced_into_the_past() {
        let signer = signer(0);
        let now = now();
        let token = signer
            .sign(&SessionClaims {
                path: "a/b".to_string(),
                iss: ISSUER.to_string(),
                aud: ISSUER.to_string(),
                iat: now - 7200,
                exp: now - 1,
            })
            .unwrap();
        assert_eq!(signer.verify(&token, "a/b"), Err(SessionError::Expired));
    }

    #[test]
    fn tampered_tokens_are_invalid() {
        let signer = signer(0);
        let start = now();
        let token = signer.issue_at("a/b", start).unwrap();
        let other = SessionSigner::new(b"another secret entirely", ISSUER, 3600, 0)
            .issue_at("c/d", start)
            .unwrap();

        // payload for another song under our signature
        let ours: Vec<&str> = token.split('.').collect();
        let theirs: Vec<&str> = other.split('.').collect();
        let forged = format!("{}.{}.{}", ours[0], theirs[1], ours[2]);
        assert_eq!(
            signer.verify_at(&forged, "c/d", start + 100),
            Err(SessionError::Invalid)
        );

        assert_eq!(
            signer.verify_at("not-a-token", "a/b", start + 100),
            Err(SessionError::Invalid)
        );
        assert_eq!(
            signer.verify_at(&format!("{token}.extra"), "a/b", start + 100),
            Err(SessionError::Invalid)
        );
    }

    #[test]
    fn other_keys_issuers_and_algorithms_are_invalid() {
        let start = now();
        let token = signer(0).issue_at("a/b", start).unwrap();

        let other_key = SessionSigner::new(b"another secret entirely", ISSUER, 3600, 0);
        assert_eq!(
            other_key.verify_at(&token, "a/b", start + 100),
            Err(SessionError::Invalid)
        );

        let other_issuer = SessionSigner::new(SECRET, "someone-else", 3600, 0);
        assert_eq!(
            other_issuer.verify_at(&token, "a/b", start + 100),
            Err(SessionError::Invalid)
        );

        let hs512 = jsonwebtoken::encode(
            &Header::new(Algorithm::HS512),
            &json!({"path": "a/b", "iss": ISSUER, "aud": ISSUER, "iat": start, "exp": start + 3600}),
            &EncodingKey::from_secret(SECRET),
        )
        .unwrap();
        assert_eq!(
            signer(0).verify_at(&hs512, "a/b", start + 100),
            Err(SessionError::Invalid)
        );
    }

    #[test]
    fn payload_of_the_wrong_shape_is_invalid() {
        let signer = signer(0);
        let start = now();
        // correctly signed, registered claims fine, but no path
        let token = jsonwebtoken::encode(
            &Header::new(Algorithm::HS256),
            &json!({"iss": ISSUER, "aud": ISSUER, "iat": start, "exp": start + 3600}),
            &signer.encoding_key,
        )
        .unwrap();
        assert_eq!(
            signer.verify_at(&token, "a/b", start + 100),
            Err(SessionError::Invalid)
        );

        // and without an audience
        let token = jsonwebtoken::encode(
            &Header::new(Algorithm::HS256),
            &json!({"path": "a/b", "iss": ISSUER, "iat": start, "exp": start + 3600}),
            &signer.encoding_key,
        )
        .unwrap();
        assert_eq!(
            signer.verify_at(&token, "a/b", start + 100),
            Err(SessionError::Invalid)
        );
    }
}
