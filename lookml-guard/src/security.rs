//! Credential handling for connections to the modeling service.

use zeroize::{Zeroize, ZeroizeOnDrop};

/// A secure string that automatically clears its contents when dropped.
#[derive(Clone, ZeroizeOnDrop)]
pub struct SecureString(String);

impl std::fmt::Debug for SecureString {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "SecureString(***)")
    }
}

impl SecureString {
    /// Create a new secure string.
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    /// Get the string value. Use carefully and avoid storing the result.
    pub fn expose(&self) -> &str {
        &self.0
    }

    /// Returns true if the wrapped value is empty.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Convert to a regular string. The SecureString will be zeroized.
    pub fn into_string(mut self) -> String {
        let value = std::mem::take(&mut self.0);
        self.0.zeroize();
        value
    }
}

impl From<String> for SecureString {
    fn from(value: String) -> Self {
        Self(value)
    }
}

impl From<&str> for SecureString {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

/// Masks an identifier for display, keeping only its first four characters.
pub fn mask(value: &str) -> String {
    if value.is_empty() {
        return String::new();
    }
    let prefix: String = value.chars().take(4).collect();
    format!("{prefix}...")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_secure_string_debug_hides_value() {
        let secure = SecureString::new("client-secret");
        assert_eq!(format!("{secure:?}"), "SecureString(***)");
        assert_eq!(secure.expose(), "client-secret");
    }

    #[test]
    fn test_into_string() {
        let secure = SecureString::from("abc");
        assert!(!secure.is_empty());
        assert_eq!(secure.into_string(), "abc");
    }

    #[test]
    fn test_mask() {
        assert_eq!(mask("abcdef123"), "abcd...");
        assert_eq!(mask("ab"), "ab...");
        assert_eq!(mask(""), "");
    }
}
