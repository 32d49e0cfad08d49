//! Channel identifiers, meta channels, and wildcard matching.
//!
//! Bayeux channels are slash-separated paths. Channels under `/meta/` manage
//! the session itself; everything else carries application data. A channel
//! whose last segment is `*` matches exactly one extra segment, and `**`
//! matches one or more.

use std::fmt;

use crate::error::{ProtocolError, ProtocolResult};

/// The handshake meta channel.
pub const META_HANDSHAKE: &str = "/meta/handshake";
/// The connect (long poll) meta channel.
pub const META_CONNECT: &str = "/meta/connect";
/// The subscribe meta channel.
pub const META_SUBSCRIBE: &str = "/meta/subscribe";
/// The unsubscribe meta channel.
pub const META_UNSUBSCRIBE: &str = "/meta/unsubscribe";
/// The disconnect meta channel.
pub const META_DISCONNECT: &str = "/meta/disconnect";

/// A validated Bayeux channel path.
///
/// Construction via [`ChannelId::new`] enforces the Bayeux path grammar:
/// absolute, no empty segments, wildcards only as the final segment.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ChannelId {
    path: String,
}

impl ChannelId {
    /// Parse and validate a channel path.
    pub fn new(path: impl Into<String>) -> ProtocolResult<Self> {
        let path = path.into();
        if !path.starts_with('/') || path.len() < 2 {
            return Err(ProtocolError::invalid_channel(
                &path,
                "channel paths are absolute and non-empty",
            ));
        }
        let segments: Vec<&str> = path[1..].split('/').collect();
        for (index, segment) in segments.iter().enumerate() {
            if segment.is_empty() {
                return Err(ProtocolError::invalid_channel(
                    &path,
                    "empty channel segment",
                ));
            }
            let is_last = index == segments.len() - 1;
            if !is_last && segment.contains('*') {
                return Err(ProtocolError::invalid_channel(
                    &path,
                    "wildcards are only allowed as the last segment",
                ));
            }
        }
        Ok(Self { path })
    }

    /// The channel path as a string slice.
    pub fn as_str(&self) -> &str {
        &self.path
    }

    /// `true` for `/meta/...` channels.
    pub fn is_meta(&self) -> bool {
        self.path.starts_with("/meta/")
    }

    /// `true` if the last segment is `*` or `**`.
    pub fn is_wild(&self) -> bool {
        self.path.ends_with("/*") || self.is_deep_wild()
    }

    /// `true` if the last segment is `**`.
    pub fn is_deep_wild(&self) -> bool {
        self.path.ends_with("/**")
    }

    /// Whether this channel matches `path`.
    ///
    /// Non-wild channels match only themselves. `/foo/*` matches `/foo/bar`
    /// but not `/foo/bar/baz`; `/foo/**` matches both.
    pub fn matches(&self, path: &str) -> bool {
        if self.is_deep_wild() {
            let prefix = &self.path[..self.path.len() - 2];
            return path.starts_with(prefix) && path.len() > prefix.len();
        }
        if self.is_wild() {
            let prefix = &self.path[..self.path.len() - 1];
            return path.starts_with(prefix)
                && path.len() > prefix.len()
                && !path[prefix.len()..].contains('/');
        }
        self.path == path
    }

    /// The wildcard channel paths that match `path`, nearest first.
    ///
    /// For `/a/b/c` these are `/a/b/*`, `/a/b/**`, `/a/**` and `/**`.
    pub fn wilds_of(path: &str) -> Vec<String> {
        let Some(index) = path.rfind('/') else {
            return Vec::new();
        };
        let parent = &path[..index];
        let mut wilds = Vec::with_capacity(4);
        wilds.push(format!("{parent}/*"));
        let mut ancestor = parent;
        loop {
            wilds.push(format!("{ancestor}/**"));
            match ancestor.rfind('/') {
                Some(i) => ancestor = &ancestor[..i],
                None => break,
            }
        }
        wilds
    }
}

impl fmt::Display for ChannelId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.path)
    }
}

impl AsRef<str> for ChannelId {
    fn as_ref(&self) -> &str {
        &self.path
    }
}
