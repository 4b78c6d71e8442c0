//! Minimal AT-URI parsing.
//!
//! An AT-URI addresses a record as `at://<authority>/<collection>/<rkey>`.
//! Only the three-segment record form and the bare authority form are
//! accepted; anything else is rejected.

use crate::error::{Error, Result};

/// A parsed AT-URI.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AtUri {
    pub authority: String,
    pub collection: Option<String>,
    pub rkey: Option<String>,
}

impl AtUri {
    /// Parse an `at://` URI.
    pub fn parse(uri: &str) -> Result<Self> {
        let rest = uri
            .strip_prefix("at://")
            .ok_or_else(|| Error::InvalidAtUri(uri.to_string()))?;

        let mut parts = rest.split('/');
        let authority = match parts.next() {
            Some(a) if !a.is_empty() => a.to_string(),
            _ => return Err(Error::InvalidAtUri(uri.to_string())),
        };

        let collection = parts.next().map(str::to_string);
        let rkey = parts.next().map(str::to_string);

        if parts.next().is_some() {
            return Err(Error::InvalidAtUri(uri.to_string()));
        }
        if collection.as_deref() == Some("") || rkey.as_deref() == Some("") {
            return Err(Error::InvalidAtUri(uri.to_string()));
        }
        // A collection without a record key is not a record reference.
        if collection.is_some() && rkey.is_none() {
            return Err(Error::InvalidAtUri(uri.to_string()));
        }

        Ok(Self {
            authority,
            collection,
            rkey,
        })
    }

    /// The authority (normally a DID).
    pub fn authority(&self) -> &str {
        &self.authority
    }
}

impl std::fmt::Display for AtUri {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match (&self.collection, &self.rkey) {
            (Some(c), Some(r)) => write!(f, "at://{}/{}/{}", self.authority, c, r),
            _ => write!(f, "at://{}", self.authority),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_record_uri() {
        let uri = AtUri::parse("at://did:plc:abc123/app.bsky.feed.post/3kfoo").unwrap();
        assert_eq!(uri.authority(), "did:plc:abc123");
        assert_eq!(uri.collection.as_deref(), Some("app.bsky.feed.post"));
        assert_eq!(uri.rkey.as_deref(), Some("3kfoo"));
    }

    #[test]
    fn parses_bare_authority() {
        let uri = AtUri::parse("at://did:plc:abc123").unwrap();
        assert_eq!(uri.authority(), "did:plc:abc123");
        assert!(uri.collection.is_none());
    }

    #[test]
    fn rejects_malformed_uris() {
        assert!(AtUri::parse("https://example.com").is_err());
        assert!(AtUri::parse("at://").is_err());
        assert!(AtUri::parse("at://did:plc:abc/collection").is_err());
        assert!(AtUri::parse("at://did:plc:abc/c/r/extra").is_err());
    }

    #[test]
    fn display_round_trips() {
        let s = "at://did:plc:abc123/app.bsky.feed.post/3kfoo";
        assert_eq!(AtUri::parse(s).unwrap().to_string(), s);
    }
}
