use hmac::{Hmac, KeyInit, Mac};
use sha2::Sha256;

type HmacSha256 = Hmac<Sha256>;

/// Signing token for one app: wraps the key/secret pair and produces the
/// hex HMAC-SHA256 signatures used by channel auth and the HTTP API.
pub struct Token {
    pub key: String,
    pub secret: String,
}

impl Token {
    pub fn new(key: String, secret: String) -> Self {
        Self { key, secret }
    }

    /// Hex-encoded HMAC-SHA256 of `data` under the app secret.
    pub fn sign(&self, data: &str) -> String {
        let mut mac = HmacSha256::new_from_slice(self.secret.as_bytes())
            .expect("HMAC accepts keys of any length");
        mac.update(data.as_bytes());
        hex::encode(mac.finalize().into_bytes())
    }

    /// Validates `signature` against the expected signature for `data`.
    pub fn verify(&self, data: &str, signature: &str) -> bool {
        secure_compare(&self.sign(data), signature)
    }
}

/// Constant-time string comparison. Both inputs are compared in full even
/// on early mismatch so timing does not leak the matching prefix length.
pub fn secure_compare(a: &str, b: &str) -> bool {
    if a.len() != b.len() {
        return false;
    }
    let mut result = 0u8;
    for (x, y) in a.bytes().zip(b.bytes()) {
        result |= x ^ y;
    }
    result == 0
}
