//! The page location: where the workspace id and share tokens travel.
//!
//! `Location` abstracts `window.location` plus `history.replaceState`, so
//! rewriting the URL never navigates. The helpers here are pure string
//! transforms over hrefs and are shared by the resolver, the share-link
//! builder and the startup sequence.

use std::sync::RwLock;
use std::sync::atomic::{AtomicUsize, Ordering};
use thiserror::Error;
use url::Url;

#[derive(Debug, Error)]
pub enum LocationError {
    #[error("Location is not readable: {0}")]
    Unreadable(String),

    #[error("Location is not writable: {0}")]
    Unwritable(String),

    #[error("Invalid URL {href}: {reason}")]
    InvalidUrl { href: String, reason: String },
}

pub type Result<T> = std::result::Result<T, LocationError>;

pub trait Location {
    /// The full current URL.
    fn href(&self) -> Result<String>;

    /// Swap the current URL for `href` without navigating.
    fn replace(&self, href: &str) -> Result<()>;
}

impl<L: Location + ?Sized> Location for &L {
    fn href(&self) -> Result<String> {
        (**self).href()
    }

    fn replace(&self, href: &str) -> Result<()> {
        (**self).replace(href)
    }
}

/// In-memory location for tests and the CLI.
pub struct MemoryLocation {
    href: RwLock<String>,
    readable: bool,
    writable: bool,
    replacements: AtomicUsize,
}

impl MemoryLocation {
    pub fn new(href: impl Into<String>) -> Self {
        Self {
            href: RwLock::new(href.into()),
            readable: true,
            writable: true,
            replacements: AtomicUsize::new(0),
        }
    }

    /// A location that can be read but refuses rewrites.
    pub fn read_only(href: impl Into<String>) -> Self {
        Self {
            writable: false,
            ..Self::new(href)
        }
    }

    /// A location that can be neither read nor written (sandboxed frame).
    pub fn sandboxed() -> Self {
        Self {
            readable: false,
            writable: false,
            ..Self::new(String::new())
        }
    }

    /// How many times `replace` succeeded.
    pub fn replacements(&self) -> usize {
        self.replacements.load(Ordering::Relaxed)
    }

    /// Current href regardless of the readable flag.
    pub fn current(&self) -> String {
        self.href.read().unwrap_or_else(|e| e.into_inner()).clone()
    }
}

impl Location for MemoryLocation {
    fn href(&self) -> Result<String> {
        if !self.readable {
            return Err(LocationError::Unreadable("sandboxed".into()));
        }
        Ok(self.current())
    }

    fn replace(&self, href: &str) -> Result<()> {
        if !self.writable {
            return Err(LocationError::Unwritable("sandboxed".into()));
        }
        parse(href)?;
        *self.href.write().unwrap_or_else(|e| e.into_inner()) = href.to_string();
        self.replacements.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }
}

fn parse(href: &str) -> Result<Url> {
    Url::parse(href).map_err(|e| LocationError::InvalidUrl {
        href: href.to_string(),
        reason: e.to_string(),
    })
}

/// Value of query parameter `name`, falling back to a `name=value` pair in
/// the fragment.
pub fn read_param(href: &str, name: &str) -> Option<String> {
    let url = Url::parse(href).ok()?;
    if let Some((_, value)) = url.query_pairs().find(|(k, _)| k == name) {
        return Some(value.into_owned());
    }
    url.fragment()?
        .split('&')
        .filter_map(|pair| pair.split_once('='))
        .find(|(k, _)| *k == name)
        .map(|(_, v)| v.to_string())
}

/// `href` with query parameter `name` set to `value`. Other parameters and
/// the fragment are kept.
pub fn set_param(href: &str, name: &str, value: &str) -> Result<String> {
    let mut url = parse(href)?;
    let others: Vec<(String, String)> = url
        .query_pairs()
        .filter(|(k, _)| k != name)
        .map(|(k, v)| (k.into_owned(), v.into_owned()))
        .collect();
    url.query_pairs_mut()
        .clear()
        .extend_pairs(others)
        .append_pair(name, value);
    Ok(url.into())
}

/// The fragment after `#`, if it is non-empty.
pub fn fragment(href: &str) -> Option<String> {
    let url = Url::parse(href).ok()?;
    url.fragment()
        .filter(|f| !f.is_empty())
        .map(str::to_string)
}

/// The fragment, unless it is a `key=value` parameter list rather than a
/// share token. Tokens are base64, where `=` only appears as trailing padding.
pub fn fragment_token(href: &str) -> Option<String> {
    fragment(href).filter(|f| !f.trim_end_matches('=').contains('='))
}

/// `href` with its fragment replaced, or removed when `fragment` is `None`.
pub fn set_fragment(href: &str, fragment: Option<&str>) -> Result<String> {
    let mut url = parse(href)?;
    url.set_fragment(fragment);
    Ok(url.into())
}
