use std::fmt;

const MASK: &str = "****";

/// A configuration value (API secret, webhook signing key) that is masked whenever it is formatted.
///
/// The only way to read the value is [`Secret::reveal`], which keeps accidental leaks into logs easy to spot in review.
#[derive(Clone, Default, PartialEq, Eq)]
pub struct Secret<T>(T);

impl<T> Secret<T> {
    pub fn new(value: T) -> Self {
        Self(value)
    }

    pub fn reveal(&self) -> &T {
        &self.0
    }
}

impl<T: AsRef<str>> Secret<T> {
    /// False for empty or all-whitespace values, which is what an unset environment variable usually turns into.
    pub fn is_set(&self) -> bool {
        !self.0.as_ref().trim().is_empty()
    }
}

impl<T> From<T> for Secret<T> {
    fn from(value: T) -> Self {
        Self(value)
    }
}

impl<T> fmt::Debug for Secret<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(MASK)
    }
}

impl<T> fmt::Display for Secret<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(MASK)
    }
}
