use anyhow::anyhow;
use scrypt::{
    password_hash::{PasswordHash, PasswordHasher, PasswordVerifier, SaltString},
    Scrypt,
};
use sha2::{Digest, Sha256};

/// Hash a plaintext password under the identity of the record that will own
/// the hash. The salt is derived from the owner's id, so hashing the same
/// plaintext for two different records (a student and its history entry)
/// yields two different encoded strings; verification parses the PHC string
/// and is salt-agnostic, so both still validate the same plaintext.
pub fn hash_password(plain: &str, identity_id: &str) -> anyhow::Result<String> {
    let salt = identity_salt(identity_id)?;
    let hash = Scrypt
        .hash_password(plain.as_bytes(), &salt)
        .map_err(|e| anyhow!("scrypt hash failed: {}", e))?
        .to_string();
    Ok(hash)
}

/// Verify a plaintext against a PHC-encoded scrypt hash.
pub fn verify_password(hash: &str, plain: &str) -> bool {
    let parsed = match PasswordHash::new(hash) {
        Ok(h) => h,
        Err(_) => return false,
    };
    Scrypt.verify_password(plain.as_bytes(), &parsed).is_ok()
}

fn identity_salt(identity_id: &str) -> anyhow::Result<SaltString> {
    let mut hasher = Sha256::new();
    hasher.update(identity_id.as_bytes());
    let digest = hasher.finalize();
    SaltString::encode_b64(&digest[..16]).map_err(|e| anyhow!("salt encoding failed: {}", e))
}

/// Anti-forgery token for destroying one specific record: scoped to the
/// action name and the exact id, so a token captured for one student cannot
/// be replayed against another.
pub fn delete_token(student_id: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(b"delete");
    hasher.update(student_id.as_bytes());
    format!("{:x}", hasher.finalize())
}
