//! Content hashing for workspace files and structured values.
//!
//! Every digest produced here is the first [`DIGEST_LEN`] lowercase hex
//! characters of a SHA-256.

use std::path::Path;

use serde::Serialize;
use serde_json::Value;
use sha2::{Digest, Sha256};
use tokio::io::AsyncReadExt;
use tracing::debug;

use crate::errors::SandflowError;

/// Number of hex characters kept from a full SHA-256 digest.
pub const DIGEST_LEN: usize = 16;

const CHUNK_SIZE: usize = 8192;

fn truncate_hex(hasher: Sha256) -> String {
    let mut hex = format!("{:x}", hasher.finalize());
    hex.truncate(DIGEST_LEN);
    hex
}

pub fn hash_bytes(data: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(data);
    truncate_hex(hasher)
}

/// Hash a file's contents, streaming it in fixed-size chunks.
///
/// A missing or unreadable file yields an empty string rather than an error.
pub async fn hash_file(path: &Path) -> String {
    let mut file = match tokio::fs::File::open(path).await {
        Ok(f) => f,
        Err(e) => {
            debug!(path = %path.display(), error = %e, "File not hashable");
            return String::new();
        }
    };

    let mut hasher = Sha256::new();
    let mut buf = vec![0u8; CHUNK_SIZE];
    loop {
        match file.read(&mut buf).await {
            Ok(0) => break,
            Ok(n) => hasher.update(&buf[..n]),
            Err(e) => {
                debug!(path = %path.display(), error = %e, "Read failed while hashing");
                return String::new();
            }
        }
    }
    truncate_hex(hasher)
}

/// Render a JSON value in canonical form: object keys sorted at every level,
/// no insignificant whitespace.
pub fn canonical_json(value: &Value) -> String {
    let mut out = String::new();
    write_canonical(value, &mut out);
    out
}

fn write_canonical(value: &Value, out: &mut String) {
    match value {
        Value::Object(map) => {
            let mut keys: Vec<&String> = map.keys().collect();
            keys.sort();
            out.push('{');
            for (i, key) in keys.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                // Serializing a plain string cannot fail.
                out.push_str(&Value::String((*key).clone()).to_string());
                out.push(':');
                write_canonical(&map[key.as_str()], out);
            }
            out.push('}');
        }
        Value::Array(items) => {
            out.push('[');
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                write_canonical(item, out);
            }
            out.push(']');
        }
        scalar => out.push_str(&scalar.to_string()),
    }
}

/// Hash any serializable value through its canonical JSON form, so that two
/// values that differ only in map key order hash identically.
pub fn hash_value<T: Serialize + ?Sized>(value: &T) -> Result<String, SandflowError> {
    let json = serde_json::to_value(value)?;
    Ok(hash_bytes(canonical_json(&json).as_bytes()))
}
