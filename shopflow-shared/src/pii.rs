use serde::{Deserialize, Serialize, Serializer};
use std::fmt;

/// A wrapper for sensitive values (card numbers, CVCs) that keeps them out of
/// `Debug`/`Display` output and therefore out of `tracing` fields.
#[derive(Clone, PartialEq, Eq, Deserialize)]
#[serde(transparent)]
pub struct Masked<T>(pub T);

impl<T> fmt::Debug for Masked<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "********")
    }
}

impl<T> fmt::Display for Masked<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "********")
    }
}

impl<T: AsRef<str>> Serialize for Masked<T> {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&self.redacted())
    }
}

impl<T> Masked<T> {
    pub fn new(value: T) -> Self {
        Self(value)
    }

    pub fn expose(&self) -> &T {
        &self.0
    }

    pub fn into_inner(self) -> T {
        self.0
    }
}

impl<T: AsRef<str>> Masked<T> {
    /// Last `n` characters, e.g. the trailing digits of a card number.
    pub fn tail(&self, n: usize) -> &str {
        if n == 0 {
            return "";
        }
        let s = self.0.as_ref();
        let start = s
            .char_indices()
            .rev()
            .nth(n - 1)
            .map(|(i, _)| i)
            .unwrap_or(0);
        &s[start..]
    }

    /// Everything but the last four characters replaced by `*`.
    pub fn redacted(&self) -> String {
        let s = self.0.as_ref();
        let len = s.chars().count();
        if len <= 4 {
            return "*".repeat(len);
        }
        format!("{}{}", "*".repeat(len - 4), self.tail(4))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_debug_never_leaks() {
        let card = Masked::new("4242424242424242".to_string());
        assert_eq!(format!("{:?}", card), "********");
        assert_eq!(format!("{}", card), "********");
    }

    #[test]
    fn test_tail_and_redacted() {
        let card = Masked::new("4000000000000000".to_string());
        assert_eq!(card.tail(4), "0000");
        assert_eq!(card.redacted(), "************0000");
        assert_eq!(card.tail(0), "");

        let short = Masked::new("123");
        assert_eq!(short.tail(4), "123");
        assert_eq!(short.redacted(), "***");
    }

    #[test]
    fn test_serialize_is_redacted() {
        let card = Masked::new("4242424242424242".to_string());
        let json = serde_json::to_string(&card).unwrap();
        assert_eq!(json, "\"************4242\"");
    }
}
