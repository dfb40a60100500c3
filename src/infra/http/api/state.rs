use std::sync::Arc;

use sha2::{Digest, Sha256};
use subtle::ConstantTimeEq;

use crate::cache::CacheAdmin;

/// Digest of the configured admin bearer token.
#[derive(Clone)]
pub struct AdminToken {
    digest: Vec<u8>,
}

impl AdminToken {
    pub fn new(token: &str) -> Self {
        Self {
            digest: hash_token(token),
        }
    }

    /// Constant-time comparison of `candidate` against the configured token.
    pub fn verify(&self, candidate: &str) -> bool {
        self.digest.ct_eq(&hash_token(candidate)).unwrap_u8() == 1
    }
}

fn hash_token(token: &str) -> Vec<u8> {
    let mut hasher = Sha256::new();
    hasher.update(token.as_bytes());
    hasher.finalize().to_vec()
}

#[derive(Clone)]
pub struct ApiState {
    pub admin: CacheAdmin,
    /// `None` disables the API: every call is refused.
    pub token: Option<Arc<AdminToken>>,
}

impl ApiState {
    pub fn new(admin: CacheAdmin, token: Option<&str>) -> Self {
        Self {
            admin,
            token: token.map(|token| Arc::new(AdminToken::new(token))),
        }
    }
}
