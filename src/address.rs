//! Mailbox addresses for submitters, admin lists, rule recipients and the
//! configured sender.
//!
//! Addresses from configuration and rule drafts are checked when they are
//! stored; addresses read from event payloads are checked when a job is
//! prepared. Construction through [`Address::new`] never fails so builders
//! stay infallible.

use std::fmt;

use email_address::EmailAddress;
use serde::{Deserialize, Serialize};

use crate::error::AddressError;

/// A mailbox, optionally with a display name.
///
/// ```
/// use courier::Address;
///
/// let submitter: Address = ("Ann", "ann@example.com").into();
/// assert_eq!(submitter.to_string(), "Ann <ann@example.com>");
/// assert!(submitter.is_mailbox("ANN@example.com"));
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Address {
    pub name: Option<String>,
    pub email: String,
}

impl Address {
    /// An unchecked address.
    pub fn new(email: impl Into<String>) -> Self {
        Self {
            name: None,
            email: email.into(),
        }
    }

    /// An unchecked address with a display name. A blank name is dropped.
    pub fn with_name(name: impl Into<String>, email: impl Into<String>) -> Self {
        let name = name.into();
        Self {
            name: (!name.trim().is_empty()).then_some(name),
            email: email.into(),
        }
    }

    /// Trim and check an address taken from untrusted input.
    ///
    /// ```
    /// use courier::Address;
    ///
    /// assert_eq!(Address::parse(" ann@example.com ").unwrap().email, "ann@example.com");
    /// assert!(Address::parse("ann.example.com").is_err());
    /// ```
    pub fn parse(email: &str) -> Result<Self, AddressError> {
        let address = Self::new(email.trim());
        address.validate()?;
        Ok(address)
    }

    /// [`Address::parse`] plus a display name. A blank name is dropped.
    pub fn parse_with_name(name: &str, email: &str) -> Result<Self, AddressError> {
        let mut address = Self::parse(email)?;
        let name = name.trim();
        if !name.is_empty() {
            address.name = Some(name.to_string());
        }
        Ok(address)
    }

    /// Parse a comma-separated list such as `ADMIN_EMAILS`.
    ///
    /// Empty entries are skipped and repeated mailboxes are kept once, in
    /// first-seen order.
    ///
    /// ```
    /// use courier::Address;
    ///
    /// let list = Address::parse_list("info@x.com, ops@x.com,,INFO@x.com").unwrap();
    /// assert_eq!(list.len(), 2);
    /// ```
    pub fn parse_list(list: &str) -> Result<Vec<Self>, AddressError> {
        let mut parsed: Vec<Self> = Vec::new();
        for entry in list.split(',').map(str::trim).filter(|s| !s.is_empty()) {
            let address = Self::parse(entry)?;
            if !parsed.iter().any(|a| a.is_mailbox(&address.email)) {
                parsed.push(address);
            }
        }
        Ok(parsed)
    }

    pub fn validate(&self) -> Result<(), AddressError> {
        if EmailAddress::is_valid(&self.email) {
            Ok(())
        } else {
            Err(AddressError(format!(
                "'{}' is not a valid email address",
                self.email
            )))
        }
    }

    /// Whether `email` names the same mailbox, ignoring ASCII case.
    pub fn is_mailbox(&self, email: &str) -> bool {
        self.email.eq_ignore_ascii_case(email.trim())
    }

    /// `Name <email>`, or the bare email without a name.
    pub fn formatted(&self) -> String {
        match &self.name {
            Some(name) => format!("{name} <{}>", self.email),
            None => self.email.clone(),
        }
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.formatted())
    }
}

impl From<&str> for Address {
    fn from(email: &str) -> Self {
        Self::new(email)
    }
}

impl From<String> for Address {
    fn from(email: String) -> Self {
        Self::new(email)
    }
}

impl From<(&str, &str)> for Address {
    fn from((name, email): (&str, &str)) -> Self {
        Self::with_name(name, email)
    }
}

/// Anything the [`OutboundMessage`](crate::OutboundMessage) builder accepts as
/// an address.
pub trait ToAddress {
    fn to_address(&self) -> Address;
}

impl<T: ToAddress + ?Sized> ToAddress for &T {
    fn to_address(&self) -> Address {
        (*self).to_address()
    }
}

impl ToAddress for Address {
    fn to_address(&self) -> Address {
        self.clone()
    }
}

impl ToAddress for str {
    fn to_address(&self) -> Address {
        Address::new(self)
    }
}

impl ToAddress for String {
    fn to_address(&self) -> Address {
        Address::new(self.as_str())
    }
}

impl<N: AsRef<str>, E: AsRef<str>> ToAddress for (N, E) {
    fn to_address(&self) -> Address {
        Address::with_name(self.0.as_ref(), self.1.as_ref())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_blank_name_is_dropped() {
        assert_eq!(Address::with_name("  ", "a@x.com").name, None);
        assert_eq!(Address::with_name("  ", "a@x.com").formatted(), "a@x.com");
        assert_eq!(
            Address::parse_with_name(" Ann ", "a@x.com").unwrap().formatted(),
            "Ann <a@x.com>"
        );
    }

    #[test]
    fn test_parse_rejects_malformed_submitter_input() {
        for bad in ["", "ann.example.com", "ann@", "@example.com", "ann @example.com"] {
            assert!(Address::parse(bad).is_err(), "{bad}");
        }
        assert_eq!(
            Address::parse("ann+contact@mail.example.com").unwrap().email,
            "ann+contact@mail.example.com"
        );
    }

    #[test]
    fn test_parse_list() {
        assert!(Address::parse_list("").unwrap().is_empty());
        assert!(Address::parse_list("info@x.com, nope").is_err());

        let list = Address::parse_list(" info@x.com ,ops@x.com, Info@X.com ").unwrap();
        let emails: Vec<_> = list.iter().map(|a| a.email.as_str()).collect();
        assert_eq!(emails, vec!["info@x.com", "ops@x.com"]);
    }

    #[test]
    fn test_is_mailbox_ignores_case() {
        let address = Address::new("Careers@Example.com");
        assert!(address.is_mailbox("careers@example.com"));
        assert!(!address.is_mailbox("info@example.com"));
    }

    #[test]
    fn test_to_address_tuple() {
        let address = ("Ops", "ops@x.com").to_address();
        assert_eq!(address.name.as_deref(), Some("Ops"));
    }
}
