//! Share links: the whole board packed into a URL fragment.
//!
//! The link keeps the page's query (and so the workspace id) and puts the
//! encoded collection after `#`. Oversized boards are refused before any
//! link is produced or any location touched.

use crate::codec;
use crate::location::{self, Location, LocationError};
use crate::task::Task;
use thiserror::Error;
use tracing::{info, warn};

#[derive(Debug, Error)]
pub enum ShareError {
    #[error("Board too large to share by link ({len} characters, limit {cap})")]
    TooLarge { len: usize, cap: usize },

    #[error("Board could not be encoded for sharing")]
    Encode,

    #[error("Location error: {0}")]
    Location(#[from] LocationError),
}

pub type Result<T> = std::result::Result<T, ShareError>;

fn checked_token(tasks: &[Task], cap: usize) -> Result<String> {
    let token = codec::encode(tasks);
    if token.is_empty() {
        return Err(ShareError::Encode);
    }
    if token.len() > cap {
        warn!("Refusing share link: token is {} characters, cap {}", token.len(), cap);
        return Err(ShareError::TooLarge {
            len: token.len(),
            cap,
        });
    }
    Ok(token)
}

/// Build a link to `href` carrying `tasks` in its fragment.
pub fn share_link(href: &str, tasks: &[Task], cap: usize) -> Result<String> {
    let token = checked_token(tasks, cap)?;
    let link = location::set_fragment(href, Some(&token))?;
    info!("Built share link for {} task(s)", tasks.len());
    Ok(link)
}

/// Put `tasks` into the location's fragment.
///
/// The cap is checked first; a refused board leaves the location unchanged.
pub fn publish_to_location(location: &dyn Location, tasks: &[Task], cap: usize) -> Result<String> {
    let token = checked_token(tasks, cap)?;
    let href = location.href()?;
    let link = location::set_fragment(&href, Some(&token))?;
    location.replace(&link)?;
    Ok(link)
}
