//! Password-based encryption of the sensitive backup section.
//!
//! ## Format
//!
//! - Key: PBKDF2-HMAC-SHA256(password, salt, iterations), 32 bytes
//! - Cipher: AES-256-GCM with a random 12-byte IV as nonce
//! - `encryptedData`: base64 of `ciphertext || tag`
//! - `encryptionInfo`: algorithm tag, hex salt, hex IV, iteration count

use super::document::EncryptionInfo;
use crate::error::{CoreError, CoreResult};
use aes_gcm::{
    aead::{Aead, KeyInit},
    Aes256Gcm, Nonce,
};
use base64::{engine::general_purpose::STANDARD, Engine as _};
use rand::RngCore;
use serde_json::Value;
use sha2::Sha256;
use zeroize::Zeroizing;

/// Algorithm tag written by this build.
pub const ALGORITHM: &str = "AES-256-GCM-PBKDF2";

/// Algorithm tag of the obsolete XOR scheme. Always rejected.
pub const LEGACY_ALGORITHM: &str = "XOR-PBKDF2";

/// Salt size in bytes.
pub const SALT_SIZE: usize = 32;

/// IV (GCM nonce) size in bytes.
pub const IV_SIZE: usize = 12;

const KEY_SIZE: usize = 32;

/// Iteration count assumed when `encryptionInfo.iterations` is absent.
pub const DEFAULT_ITERATIONS: u32 = 100_000;

/// Highest iteration count accepted, so a crafted file cannot stall
/// decryption before authentication fails.
pub const MAX_ITERATIONS: u32 = 10 * DEFAULT_ITERATIONS;

fn derive_key(password: &str, salt: &[u8], iterations: u32) -> Zeroizing<[u8; KEY_SIZE]> {
    let mut key = Zeroizing::new([0u8; KEY_SIZE]);
    pbkdf2::pbkdf2_hmac::<Sha256>(password.as_bytes(), salt, iterations, &mut key[..]);
    key
}

fn iterations_in_range(iterations: u32) -> bool {
    (1..=MAX_ITERATIONS).contains(&iterations)
}

/// Encrypts `value` as JSON under `password`.
///
/// Returns the base64 ciphertext and the matching `encryptionInfo`.
///
/// # Errors
///
/// Returns a configuration error for an empty password or an iteration
/// count outside `1..=MAX_ITERATIONS`.
pub fn encrypt_sensitive_data(
    value: &Value,
    password: &str,
    iterations: u32,
) -> CoreResult<(String, EncryptionInfo)> {
    if password.is_empty() {
        return Err(CoreError::configuration(
            "a password is required to encrypt sensitive data",
        ));
    }
    if !iterations_in_range(iterations) {
        return Err(CoreError::configuration(format!(
            "key derivation iterations must be between 1 and {MAX_ITERATIONS}, got {iterations}"
        )));
    }

    let mut salt = [0u8; SALT_SIZE];
    let mut iv = [0u8; IV_SIZE];
    let mut rng = rand::thread_rng();
    rng.fill_bytes(&mut salt);
    rng.fill_bytes(&mut iv);

    let key = derive_key(password, &salt, iterations);
    let cipher = Aes256Gcm::new_from_slice(&key[..])
        .map_err(|_| CoreError::encryption_failed("invalid key length"))?;

    let plaintext = Zeroizing::new(serde_json::to_vec(value)?);
    let ciphertext = cipher
        .encrypt(Nonce::from_slice(&iv), plaintext.as_slice())
        .map_err(|_| CoreError::encryption_failed("AES-GCM encryption error"))?;

    Ok((
        STANDARD.encode(ciphertext),
        EncryptionInfo {
            algorithm: ALGORITHM.to_string(),
            salt: hex::encode(salt),
            iv: hex::encode(iv),
            iterations: Some(iterations),
        },
    ))
}

/// Decrypts a payload produced by [`encrypt_sensitive_data`].
///
/// # Errors
///
/// Returns [`CoreError::DecryptionFailed`] when authentication fails or the
/// decrypted text is not a JSON object or array, which in practice means a
/// wrong password. Malformed salt, IV or base64, or an iteration count
/// outside `1..=MAX_ITERATIONS`, is a format error.
pub fn decrypt_sensitive_data(
    data: &str,
    password: &str,
    salt: &str,
    iv: &str,
    iterations: u32,
) -> CoreResult<Value> {
    check_iterations(Some(iterations))?;

    let salt = hex::decode(salt)
        .map_err(|e| CoreError::not_backup_format(format!("encryptionInfo.salt is not hex: {e}")))?;
    let iv = hex::decode(iv)
        .map_err(|e| CoreError::not_backup_format(format!("encryptionInfo.iv is not hex: {e}")))?;
    if iv.len() != IV_SIZE {
        return Err(CoreError::not_backup_format(format!(
            "encryptionInfo.iv must be {IV_SIZE} bytes, got {}",
            iv.len()
        )));
    }
    let ciphertext = STANDARD
        .decode(data.trim())
        .map_err(|e| CoreError::not_backup_format(format!("encryptedData is not base64: {e}")))?;

    let key = derive_key(password, &salt, iterations);
    let cipher = Aes256Gcm::new_from_slice(&key[..])
        .map_err(|_| CoreError::decryption_failed("invalid key length"))?;
    let plaintext = Zeroizing::new(
        cipher
            .decrypt(Nonce::from_slice(&iv), ciphertext.as_slice())
            .map_err(|_| CoreError::decryption_failed("authentication failed"))?,
    );

    let text = std::str::from_utf8(&plaintext)
        .map_err(|_| CoreError::decryption_failed("decrypted data is not UTF-8"))?;
    let cleaned = strip_noise(text);
    if !(cleaned.starts_with('{') || cleaned.starts_with('[')) {
        return Err(CoreError::decryption_failed(
            "decrypted data is not a JSON document",
        ));
    }

    serde_json::from_str(&cleaned)
        .map_err(|e| CoreError::decryption_failed(format!("decrypted data is not valid JSON: {e}")))
}

/// Removes a BOM and control characters other than JSON whitespace.
fn strip_noise(text: &str) -> Zeroizing<String> {
    let cleaned: String = text
        .chars()
        .filter(|&c| c != '\u{feff}' && (!c.is_control() || matches!(c, '\n' | '\r' | '\t')))
        .collect();
    Zeroizing::new(cleaned.trim_start().to_string())
}

/// Checks a declared iteration count. An absent count is valid and means
/// [`DEFAULT_ITERATIONS`].
///
/// # Errors
///
/// Returns [`CoreError::NotBackupFormat`] for zero or anything above
/// [`MAX_ITERATIONS`].
pub fn check_iterations(iterations: Option<u32>) -> CoreResult<()> {
    match iterations {
        Some(n) if !iterations_in_range(n) => Err(CoreError::not_backup_format(format!(
            "encryptionInfo.iterations must be between 1 and {MAX_ITERATIONS}, got {n}"
        ))),
        _ => Ok(()),
    }
}

/// Checks that `info` names an algorithm this build can decrypt.
///
/// # Errors
///
/// Returns [`CoreError::UnsupportedAlgorithm`] otherwise, including for the
/// legacy XOR scheme.
pub fn check_algorithm(info: &EncryptionInfo) -> CoreResult<()> {
    if info.algorithm == ALGORITHM {
        Ok(())
    } else {
        Err(CoreError::UnsupportedAlgorithm {
            algorithm: info.algorithm.clone(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use serde_json::json;

    const FAST: u32 = 10;

    #[test]
    fn round_trip() {
        let value = json!({"serviceConfigs": [{"id": "1", "apiKey": "k"}]});
        let (data, info) = encrypt_sensitive_data(&value, "correct-horse-battery", FAST).unwrap();

        assert_eq!(info.algorithm, ALGORITHM);
        assert_eq!(info.salt.len(), SALT_SIZE * 2);
        assert_eq!(info.iv.len(), IV_SIZE * 2);

        let decrypted =
            decrypt_sensitive_data(&data, "correct-horse-battery", &info.salt, &info.iv, FAST)
                .unwrap();
        assert_eq!(decrypted, value);
    }

    #[test]
    fn wrong_password_hints() {
        let (data, info) = encrypt_sensitive_data(&json!({"a": 1}), "right", FAST).unwrap();
        let err = decrypt_sensitive_data(&data, "wrong", &info.salt, &info.iv, FAST).unwrap_err();
        assert!(matches!(err, CoreError::DecryptionFailed { .. }));
        assert!(err.to_string().contains("verify your password"));
    }

    #[test]
    fn fresh_salt_and_iv_per_call() {
        let value = json!([1, 2, 3]);
        let (a, info_a) = encrypt_sensitive_data(&value, "pw", FAST).unwrap();
        let (b, info_b) = encrypt_sensitive_data(&value, "pw", FAST).unwrap();
        assert_ne!(a, b);
        assert_ne!(info_a.salt, info_b.salt);
        assert_ne!(info_a.iv, info_b.iv);
    }

    #[test]
    fn empty_password_rejected() {
        let err = encrypt_sensitive_data(&json!({}), "", FAST).unwrap_err();
        assert!(matches!(err, CoreError::Configuration { .. }));
    }

    #[test]
    fn malformed_fields_are_format_errors() {
        let (data, info) = encrypt_sensitive_data(&json!({}), "pw", FAST).unwrap();
        assert!(matches!(
            decrypt_sensitive_data(&data, "pw", "zz", &info.iv, FAST),
            Err(CoreError::NotBackupFormat { .. })
        ));
        assert!(matches!(
            decrypt_sensitive_data("***", "pw", &info.salt, &info.iv, FAST),
            Err(CoreError::NotBackupFormat { .. })
        ));
    }

    #[test]
    fn iteration_count_is_bounded() {
        let (data, info) = encrypt_sensitive_data(&json!({}), "pw", FAST).unwrap();
        for iterations in [0, MAX_ITERATIONS + 1, u32::MAX] {
            assert!(matches!(
                decrypt_sensitive_data(&data, "pw", &info.salt, &info.iv, iterations),
                Err(CoreError::NotBackupFormat { .. })
            ));
        }
        assert!(check_iterations(None).is_ok());
        assert!(check_iterations(Some(MAX_ITERATIONS)).is_ok());

        let err = encrypt_sensitive_data(&json!({}), "pw", u32::MAX).unwrap_err();
        assert!(matches!(err, CoreError::Configuration { .. }));
    }

    #[test]
    fn legacy_algorithm_rejected() {
        let info = EncryptionInfo {
            algorithm: LEGACY_ALGORITHM.into(),
            salt: String::new(),
            iv: String::new(),
            iterations: None,
        };
        assert!(matches!(
            check_algorithm(&info),
            Err(CoreError::UnsupportedAlgorithm { .. })
        ));
    }

    #[test]
    fn noise_is_stripped() {
        assert_eq!(strip_noise("\u{feff}\u{0}  {\"a\":1}").as_str(), "{\"a\":1}");
    }

    fn json_value() -> impl Strategy<Value = Value> {
        let leaf = prop_oneof![
            Just(Value::Null),
            any::<bool>().prop_map(Value::from),
            any::<i64>().prop_map(Value::from),
            "[a-zA-Z0-9 ]{0,16}".prop_map(Value::from),
        ];
        leaf.prop_recursive(3, 24, 4, |inner| {
            prop_oneof![
                prop::collection::vec(inner.clone(), 0..4).prop_map(Value::Array),
                prop::collection::btree_map("[a-z]{1,6}", inner, 0..4)
                    .prop_map(|m| Value::Object(m.into_iter().collect())),
            ]
        })
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(32))]

        #[test]
        fn any_document_round_trips(inner in json_value(), password in "[ -~]{1,24}") {
            let value = json!({ "payload": inner });
            let (data, info) = encrypt_sensitive_data(&value, &password, FAST).unwrap();
            let decrypted = decrypt_sensitive_data(&data, &password, &info.salt, &info.iv, FAST).unwrap();
            prop_assert_eq!(decrypted, value);
        }
    }
}
