//! Pool keys

use std::fmt;

/// Identity of a pooled handle: an ordered tuple of strings such as
/// `(credential_scope, region)`.
///
/// Two keys are equal iff every component is equal, in order.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PoolKey(Vec<String>);

impl PoolKey {
    pub fn new<I, S>(parts: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self(parts.into_iter().map(Into::into).collect())
    }

    pub fn parts(&self) -> &[String] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Display for PoolKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.join("/"))
    }
}

impl<S: Into<String>> From<(S, S)> for PoolKey {
    fn from((a, b): (S, S)) -> Self {
        Self::new([a, b])
    }
}
