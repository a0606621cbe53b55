//! Token codec for task collections.
//!
//! A token is the collection as JSON, taken to UTF-8 bytes, then base64
//! encoded with the standard alphabet (the one `btoa`/`atob` use). Going
//! through bytes explicitly keeps accented text and emoji intact.
//!
//! Decoding never fails loudly: anything that is not a well-formed token
//! for an array of tasks comes back as `None`, and the caller falls back to
//! durable storage.

use crate::task::Task;
use base64::Engine;
use base64::engine::general_purpose::{STANDARD, URL_SAFE_NO_PAD};
use tracing::{debug, warn};

/// Shortest token worth decoding. `encode(&[])` is exactly this long.
pub const MIN_TOKEN_LEN: usize = 4;

/// Encode a task collection into a token.
///
/// Returns the empty string if serialization fails. No valid token is
/// empty, so callers can test for it with `is_empty()`.
pub fn encode(tasks: &[Task]) -> String {
    match serde_json::to_vec(tasks) {
        Ok(bytes) => STANDARD.encode(bytes),
        Err(e) => {
            warn!("Failed to encode {} task(s): {}", tasks.len(), e);
            String::new()
        }
    }
}

/// Decode a token back into a task collection.
///
/// A leading `#` is ignored so raw URL fragments can be passed straight in.
pub fn decode(token: &str) -> Option<Vec<Task>> {
    let token = token.trim().trim_start_matches('#');
    if token.len() < MIN_TOKEN_LEN {
        return None;
    }

    let bytes = match STANDARD.decode(token) {
        Ok(bytes) => bytes,
        // Links that went through a URL-safe rewrite lose `+`, `/` and padding
        Err(_) => match URL_SAFE_NO_PAD.decode(token.trim_end_matches('=')) {
            Ok(bytes) => bytes,
            Err(e) => {
                debug!("Token is not base64: {}", e);
                return None;
            }
        },
    };

    let text = match String::from_utf8(bytes) {
        Ok(text) => text,
        Err(e) => {
            debug!("Token payload is not UTF-8: {}", e);
            return None;
        }
    };

    match serde_json::from_str::<Vec<Task>>(&text) {
        Ok(tasks) => Some(tasks),
        Err(e) => {
            debug!("Token payload is not a task array: {}", e);
            None
        }
    }
}
