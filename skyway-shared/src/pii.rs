use serde::{Deserialize, Serialize, Serializer};
use std::fmt;

/// Wraps a personal value (identity document, email) so that `Debug` and
/// `Display` only reveal its last two characters. Serialization is untouched:
/// API responses still carry the real value.
#[derive(Clone, PartialEq, Eq, Deserialize)]
#[serde(transparent)]
pub struct Masked<T>(pub T);

impl<T: AsRef<str>> Masked<T> {
    fn redacted(&self) -> String {
        let value = self.0.as_ref();
        let visible: String = value
            .chars()
            .rev()
            .take(2)
            .collect::<Vec<_>>()
            .into_iter()
            .rev()
            .collect();
        let hidden = value.chars().count().saturating_sub(2).max(4);
        format!("{}{}", "*".repeat(hidden), visible)
    }
}

impl<T: AsRef<str>> fmt::Debug for Masked<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Masked({})", self.redacted())
    }
}

impl<T: AsRef<str>> fmt::Display for Masked<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.redacted())
    }
}

impl<T: Serialize> Serialize for Masked<T> {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        self.0.serialize(serializer)
    }
}

impl<T> Masked<T> {
    pub fn into_inner(self) -> T {
        self.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_keeps_only_the_tail() {
        let doc = Masked("1712345678".to_string());
        assert_eq!(doc.to_string(), "********78");
        assert_eq!(format!("{:?}", doc), "Masked(********78)");
    }

    #[test]
    fn short_values_are_padded() {
        assert_eq!(Masked("ab").to_string(), "****ab");
    }

    #[test]
    fn serializes_the_real_value() {
        let email = Masked("ana@example.com".to_string());
        assert_eq!(serde_json::to_string(&email).unwrap(), "\"ana@example.com\"");
    }
}
