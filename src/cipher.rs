use aes::cipher::{BlockDecrypt, KeyInit};
use aes::{Aes256, Block};
use data_encoding::BASE64;
use std::io::{self, Write};
use std::process::{Command, Stdio};
use std::sync::Mutex;

use crate::error::{CipherError, FormatError, KmsError};

/// AES-256 key size in bytes
pub const KEY_LEN: usize = 32;
const BLOCK_LEN: usize = 16;

/// AES-256-ECB decrypt, no padding removal: output length equals input length
pub fn decrypt_block(cipher_bytes: &[u8], key: &[u8]) -> Result<Vec<u8>, CipherError> {
    if key.len() != KEY_LEN {
        return Err(CipherError::KeyLength(key.len()));
    }
    if cipher_bytes.len() % BLOCK_LEN != 0 {
        return Err(CipherError::BlockLength(cipher_bytes.len()));
    }

    let cipher = Aes256::new_from_slice(key).map_err(|_| CipherError::KeyLength(key.len()))?;
    let mut output = cipher_bytes.to_vec();

    for chunk in output.chunks_exact_mut(BLOCK_LEN) {
        cipher.decrypt_block(Block::from_mut_slice(chunk));
    }

    Ok(output)
}

/// Decrypt a whole hex-encoded firmware image with AES-256-ECB
pub fn decrypt_file(hex_data: &str, key: &[u8]) -> Result<Vec<u8>, CipherError> {
    let encrypted = hex::decode(hex_data.trim()).map_err(FormatError::from)?;
    decrypt_block(&encrypted, key)
}

/// Remote key-management decrypt operation (wrapped data key -> plaintext key)
pub trait KeyManagementService: Send {
    fn decrypt(&self, ciphertext_blob: &[u8], region: &str) -> Result<Vec<u8>, KmsError>;
}

/// Unwrap a data key through the key-management service.
///
/// Never fails outward: every error is logged and reported as `None`.
pub fn unwrap_data_key(
    service: &dyn KeyManagementService,
    ciphertext_blob: &[u8],
    region: &str,
) -> Option<Vec<u8>> {
    match service.decrypt(ciphertext_blob, region) {
        Ok(plaintext) => {
            log::debug!("Unwrapped {}-byte data key in {}", plaintext.len(), region);
            Some(plaintext)
        }
        Err(e) => {
            log::error!("Data key unwrap failed in {}: {}", region, e);
            None
        }
    }
}

/// KMS decrypt through the `aws` command line client
pub struct AwsCliKms;

impl KeyManagementService for AwsCliKms {
    fn decrypt(&self, ciphertext_blob: &[u8], region: &str) -> Result<Vec<u8>, KmsError> {
        let mut child = Command::new("aws")
            .args([
                "kms",
                "decrypt",
                "--ciphertext-blob",
                "fileb:///dev/stdin",
                "--region",
                region,
                "--output",
                "text",
                "--query",
                "Plaintext",
            ])
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()?;

        // aws closes stdin when it exits early; stderr then carries the reason
        let write_error = child
            .stdin
            .take()
            .and_then(|mut stdin| stdin.write_all(ciphertext_blob).err());

        let output = child.wait_with_output()?;
        plaintext_from_output(output.status.success(), &output.stdout, &output.stderr, write_error)
    }
}

/// Interpret a finished `aws kms decrypt` run: a failed exit wins over a stdin write error
fn plaintext_from_output(
    success: bool,
    stdout: &[u8],
    stderr: &[u8],
    write_error: Option<io::Error>,
) -> Result<Vec<u8>, KmsError> {
    if !success {
        let stderr = String::from_utf8_lossy(stderr);
        return Err(KmsError::Rejected(stderr.trim().to_string()));
    }
    if let Some(e) = write_error {
        return Err(KmsError::Io(e));
    }

    decode_plaintext(stdout)
}

/// `--output text --query Plaintext` prints the key as base64 plus a newline
fn decode_plaintext(stdout: &[u8]) -> Result<Vec<u8>, KmsError> {
    let plaintext_b64 = String::from_utf8_lossy(stdout);
    Ok(BASE64.decode(plaintext_b64.trim().as_bytes())?)
}

/// Supplies the 32-byte frame decryption key, consulted only for encrypted frames
pub trait KeySource: Send {
    fn data_key(&self) -> Option<Vec<u8>>;
}

/// Key known up front
pub struct StaticKey(Vec<u8>);

impl StaticKey {
    pub fn new(key: Vec<u8>) -> Self {
        StaticKey(key)
    }
}

impl KeySource for StaticKey {
    fn data_key(&self) -> Option<Vec<u8>> {
        Some(self.0.clone())
    }
}

/// No key configured; encrypted frames cannot be read
pub struct NoKey;

impl KeySource for NoKey {
    fn data_key(&self) -> Option<Vec<u8>> {
        None
    }
}

/// Wrapped key unwrapped through a key-management service on first use.
///
/// A failed unwrap is not cached; the next attempt asks the service again.
pub struct KmsKey<K: KeyManagementService> {
    service: K,
    wrapped_key: Vec<u8>,
    region: String,
    unwrapped: Mutex<Option<Vec<u8>>>,
}

impl<K: KeyManagementService> KmsKey<K> {
    pub fn new(service: K, wrapped_key: Vec<u8>, region: impl Into<String>) -> Self {
        KmsKey {
            service,
            wrapped_key,
            region: region.into(),
            unwrapped: Mutex::new(None),
        }
    }
}

impl<K: KeyManagementService> KeySource for KmsKey<K> {
    fn data_key(&self) -> Option<Vec<u8>> {
        let mut unwrapped = match self.unwrapped.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };

        if unwrapped.is_none() {
            *unwrapped = unwrap_data_key(&self.service, &self.wrapped_key, &self.region);
        }
        unwrapped.clone()
    }
}
