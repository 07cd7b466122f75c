// kyc-realtime-kit/src/cache/key.rs

use serde::{Deserialize, Serialize};
use std::fmt;

/// The domain segment shared by every KYC query.
pub const KYC_DOMAIN: &str = "kyc";

/// Identifies a unit of cached query data, e.g. `(kyc, admin, co123)`.
///
/// Keys nest by prefix: `(kyc, admin)` covers `(kyc, admin, co123)` but not
/// `(kyc, client)`, and `(kyc, admin, co123)` does not cover its sibling
/// `(kyc, admin, co456)`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ScopeKey(Vec<String>);

impl ScopeKey {
    pub fn new<I, S>(segments: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self(segments.into_iter().map(Into::into).collect())
    }

    /// `(kyc)`, the root of every KYC query.
    pub fn kyc() -> Self {
        Self(vec![KYC_DOMAIN.to_owned()])
    }

    /// A key one level below `self`.
    pub fn child(&self, segment: impl Into<String>) -> Self {
        let mut segments = self.0.clone();
        segments.push(segment.into());
        Self(segments)
    }

    pub fn segments(&self) -> &[String] {
        &self.0
    }

    /// True when invalidating `self` must also invalidate `other`.
    pub fn covers(&self, other: &ScopeKey) -> bool {
        other.0.starts_with(&self.0)
    }
}

impl fmt::Display for ScopeKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({})", self.0.join(", "))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn coarse_keys_cover_nested_keys_but_not_siblings() {
        let admin = ScopeKey::kyc().child("admin");
        let co123 = admin.child("co123");
        let co456 = admin.child("co456");
        let client = ScopeKey::new(["kyc", "client"]);

        assert!(admin.covers(&co123));
        assert!(admin.covers(&admin));
        assert!(ScopeKey::kyc().covers(&client));
        assert!(!co123.covers(&co456));
        assert!(!co123.covers(&admin));
        assert!(!admin.covers(&client));
        assert_eq!(co123.to_string(), "(kyc, admin, co123)");
    }
}
