//! Single-file store format.
//!
//! Layout (all integers little-endian):
//!
//! ```text
//! [flag: u8][magic: "LDXF"][version: u8]
//! [salt: 16 bytes][verifier: 32 bytes]      -- only when flag == 1
//! [crc32: u32][length: u64][payload: length bytes]
//! ```
//!
//! The payload is the bincode-serialized [`StoreImage`]. For protected
//! files it is XORed with a keystream derived from the salt and password;
//! the CRC covers the bytes as stored. The flag byte comes first so that
//! [`is_password_protected`] only ever reads one byte.

use std::fs::File;
use std::io::{ErrorKind, Read};
use std::path::Path;

use rand::RngCore;
use tracing::debug;

use crate::error::{StoreError, StoreResult};
use crate::image::StoreImage;

/// Magic bytes following the flag byte.
pub const MAGIC: &[u8; 4] = b"LDXF";

/// Current on-disk format version.
pub const FORMAT_VERSION: u8 = 1;

const FLAG_PLAIN: u8 = 0;
const FLAG_PROTECTED: u8 = 1;
const SALT_LEN: usize = 16;
const VERIFIER_LEN: usize = 32;
const PREAMBLE_LEN: usize = 1 + 4 + 1;
const FRAME_LEN: usize = 4 + 8;

const VERIFIER_CONTEXT: &str = "ldx store password verifier v1";
const KEYSTREAM_CONTEXT: &str = "ldx store payload keystream v1";

/// Report whether the file at `path` requires a password.
///
/// Reads only the flag byte: any value other than the plain flag counts as
/// protected. An empty file has no readable flag and reports protected.
pub fn is_password_protected(path: &Path) -> StoreResult<bool> {
    let mut file = match File::open(path) {
        Ok(file) => file,
        Err(e) if e.kind() == ErrorKind::NotFound => {
            return Err(StoreError::NotFound(path.to_path_buf()))
        }
        Err(e) => return Err(e.into()),
    };
    let mut flag = [0u8; 1];
    match file.read(&mut flag)? {
        0 => Ok(true),
        _ => Ok(flag[0] != FLAG_PLAIN),
    }
}

/// Serialize an image into file bytes.
pub fn encode(image: &StoreImage, password: Option<&str>) -> StoreResult<Vec<u8>> {
    let mut payload =
        bincode::serialize(image).map_err(|e| StoreError::Serialization(e.to_string()))?;

    let header_len = PREAMBLE_LEN + SALT_LEN + VERIFIER_LEN + FRAME_LEN;
    let mut out = Vec::with_capacity(header_len + payload.len());
    match password {
        Some(password) => {
            let mut salt = [0u8; SALT_LEN];
            rand::thread_rng().fill_bytes(&mut salt);
            out.push(FLAG_PROTECTED);
            out.extend_from_slice(MAGIC);
            out.push(FORMAT_VERSION);
            out.extend_from_slice(&salt);
            out.extend_from_slice(&verifier(&salt, password));
            apply_keystream(&salt, password, &mut payload);
        }
        None => {
            out.push(FLAG_PLAIN);
            out.extend_from_slice(MAGIC);
            out.push(FORMAT_VERSION);
        }
    }

    out.extend_from_slice(&crc32fast::hash(&payload).to_le_bytes());
    out.extend_from_slice(&(payload.len() as u64).to_le_bytes());
    out.extend_from_slice(&payload);
    debug!(bytes = out.len(), protected = password.is_some(), "encoded store image");
    Ok(out)
}

/// Parse file bytes into an image.
///
/// `path` is only used for error reporting. Any non-plain flag byte without
/// a password is [`StoreError::PasswordRequired`]; the header is only
/// validated once a password is supplied.
pub fn decode(path: &Path, bytes: &[u8], password: Option<&str>) -> StoreResult<StoreImage> {
    let format_err = |reason: &str| StoreError::Format {
        path: path.to_path_buf(),
        reason: reason.to_string(),
    };

    let password = password.filter(|p| !p.is_empty());
    if password.is_none() && bytes.first().is_some_and(|&flag| flag != FLAG_PLAIN) {
        return Err(StoreError::PasswordRequired(path.to_path_buf()));
    }
    if bytes.len() < PREAMBLE_LEN {
        return Err(format_err("file too short"));
    }
    if &bytes[1..5] != MAGIC {
        return Err(format_err("bad magic"));
    }
    let version = bytes[5];
    if version != FORMAT_VERSION {
        return Err(format_err(&format!("unsupported format version {version}")));
    }

    let mut offset = PREAMBLE_LEN;
    let key = match bytes[0] {
        FLAG_PLAIN => None,
        FLAG_PROTECTED => {
            let password =
                password.ok_or_else(|| StoreError::PasswordRequired(path.to_path_buf()))?;
            if bytes.len() < offset + SALT_LEN + VERIFIER_LEN {
                return Err(format_err("truncated password header"));
            }
            let mut salt = [0u8; SALT_LEN];
            salt.copy_from_slice(&bytes[offset..offset + SALT_LEN]);
            offset += SALT_LEN;
            let stored = &bytes[offset..offset + VERIFIER_LEN];
            offset += VERIFIER_LEN;
            if verifier(&salt, password).as_slice() != stored {
                return Err(StoreError::InvalidPassword);
            }
            Some((salt, password))
        }
        other => return Err(format_err(&format!("unknown flag byte {other}"))),
    };

    if bytes.len() < offset + FRAME_LEN {
        return Err(format_err("truncated frame header"));
    }
    let crc = u32::from_le_bytes(read_array(&bytes[offset..offset + 4]));
    let len = u64::from_le_bytes(read_array(&bytes[offset + 4..offset + FRAME_LEN])) as usize;
    offset += FRAME_LEN;

    let stored = bytes
        .get(offset..)
        .filter(|rest| rest.len() == len)
        .ok_or_else(|| format_err("payload length mismatch"))?;
    if crc32fast::hash(stored) != crc {
        return Err(format_err("checksum mismatch"));
    }

    let mut payload = stored.to_vec();
    if let Some((salt, password)) = key {
        apply_keystream(&salt, password, &mut payload);
    }
    bincode::deserialize(&payload).map_err(|e| format_err(&format!("corrupt payload: {e}")))
}

fn read_array<const N: usize>(slice: &[u8]) -> [u8; N] {
    let mut out = [0u8; N];
    out.copy_from_slice(slice);
    out
}

fn keyed_input(salt: &[u8; SALT_LEN], password: &str) -> Vec<u8> {
    let mut input = Vec::with_capacity(SALT_LEN + password.len());
    input.extend_from_slice(salt);
    input.extend_from_slice(password.as_bytes());
    input
}

fn verifier(salt: &[u8; SALT_LEN], password: &str) -> [u8; VERIFIER_LEN] {
    blake3::derive_key(VERIFIER_CONTEXT, &keyed_input(salt, password))
}

fn apply_keystream(salt: &[u8; SALT_LEN], password: &str, data: &mut [u8]) {
    let key = blake3::derive_key(KEYSTREAM_CONTEXT, &keyed_input(salt, password));
    let mut stream = vec![0u8; data.len()];
    blake3::Hasher::new_keyed(&key)
        .finalize_xof()
        .fill(&mut stream);
    for (byte, k) in data.iter_mut().zip(stream) {
        *byte ^= k;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ldx_types::Document;
    use std::path::PathBuf;

    fn sample() -> StoreImage {
        let mut image = StoreImage::new();
        image.insert("c", Document::with_id(1)).unwrap();
        image.set_user_version(7);
        image
    }

    fn path() -> PathBuf {
        PathBuf::from("test.ldx")
    }

    #[test]
    fn plain_roundtrip() {
        let bytes = encode(&sample(), None).unwrap();
        assert_eq!(bytes[0], FLAG_PLAIN);
        let image = decode(&path(), &bytes, None).unwrap();
        assert_eq!(image, sample());
    }

    #[test]
    fn plain_ignores_supplied_password() {
        let bytes = encode(&sample(), None).unwrap();
        assert!(decode(&path(), &bytes, Some("whatever")).is_ok());
    }

    #[test]
    fn protected_requires_correct_password() {
        let bytes = encode(&sample(), Some("secret")).unwrap();
        assert_eq!(bytes[0], FLAG_PROTECTED);
        assert!(matches!(
            decode(&path(), &bytes, None),
            Err(StoreError::PasswordRequired(_))
        ));
        assert!(matches!(
            decode(&path(), &bytes, Some("")),
            Err(StoreError::PasswordRequired(_))
        ));
        assert!(matches!(
            decode(&path(), &bytes, Some("wrong")),
            Err(StoreError::InvalidPassword)
        ));
        assert_eq!(decode(&path(), &bytes, Some("secret")).unwrap(), sample());
    }

    #[test]
    fn corruption_is_detected() {
        let mut bytes = encode(&sample(), None).unwrap();
        let last = bytes.len() - 1;
        bytes[last] ^= 0xff;
        assert!(matches!(
            decode(&path(), &bytes, None),
            Err(StoreError::Format { .. })
        ));
    }

    #[test]
    fn rejects_foreign_files() {
        assert!(matches!(
            decode(&path(), b"\0PNG\x01garbage", None),
            Err(StoreError::Format { .. })
        ));
        assert!(matches!(
            decode(&path(), b"", None),
            Err(StoreError::Format { .. })
        ));
    }

    #[test]
    fn any_nonzero_flag_is_protected() {
        let dir = tempfile::tempdir().unwrap();
        let odd = dir.path().join("odd.ldx");
        let mut bytes = encode(&sample(), Some("pw")).unwrap();
        bytes[0] = 2;
        std::fs::write(&odd, &bytes).unwrap();

        assert!(is_password_protected(&odd).unwrap());
        assert!(matches!(
            decode(&odd, &bytes, None),
            Err(StoreError::PasswordRequired(_))
        ));
        assert!(matches!(
            decode(&odd, &bytes, Some("")),
            Err(StoreError::PasswordRequired(_))
        ));
        assert!(matches!(
            decode(&odd, &bytes, Some("pw")),
            Err(StoreError::Format { .. })
        ));
    }

    #[test]
    fn flag_byte_decides_protection() {
        let dir = tempfile::tempdir().unwrap();
        let plain = dir.path().join("plain.ldx");
        let locked = dir.path().join("locked.ldx");
        let empty = dir.path().join("empty.ldx");
        std::fs::write(&plain, encode(&sample(), None).unwrap()).unwrap();
        std::fs::write(&locked, encode(&sample(), Some("pw")).unwrap()).unwrap();
        std::fs::write(&empty, b"").unwrap();

        assert!(!is_password_protected(&plain).unwrap());
        assert!(is_password_protected(&locked).unwrap());
        assert!(is_password_protected(&empty).unwrap());
        assert!(matches!(
            is_password_protected(&dir.path().join("missing.ldx")),
            Err(StoreError::NotFound(_))
        ));
    }
}
