use serde::{Deserialize, Serialize};

/// A single business contact row.
///
/// Identity is the normalised `company + address` composite key; the other
/// fields are payload. Empty fields are permitted, but a lead with an empty
/// company is invalid and gets dropped before deduplication.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Lead {
    pub company: String,
    pub address: String,
    pub phone: String,
    pub email: String,
    pub website: String,
}

impl Lead {
    pub fn is_valid(&self) -> bool {
        !normalize_text(&self.company).is_empty()
    }

    /// Canonical identity: normalised company and address joined by a unit
    /// separator, so `("a b", "c")` and `("a", "b c")` stay distinct.
    pub fn canonical_key(&self) -> String {
        format!(
            "{}\u{241f}{}",
            normalize_text(&self.company),
            normalize_text(&self.address)
        )
    }
}

/// Lowercase, trim, and collapse internal whitespace runs to single spaces.
pub fn normalize_text(s: &str) -> String {
    s.split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase()
}

/// Strip a phone number down to its digits (country code included).
pub fn normalize_phone(s: &str) -> String {
    s.chars().filter(|c| c.is_ascii_digit()).collect()
}
