//! # tl-identity-hash
//!
//! Salted SHA-256 implementation of `TipsterIdentity`.
//! Reviewers see a stable pseudonym per caller, never the raw email or phone.

use sha2::{Digest, Sha256};
use tl_core::models::{ContactKind, TipsterContact, TipsterId};
use tl_core::traits::TipsterIdentity;

pub struct HashedTipsterIdentity {
    /// Secret salt (e.g., from an environment variable). Changing it re-keys every tipster.
    salt: String,
}

impl HashedTipsterIdentity {
    pub fn new(salt: &str) -> Self {
        Self {
            salt: salt.to_string(),
        }
    }
}

/// Canonical form so formatting differences map to one identity.
fn normalize(contact: &TipsterContact) -> String {
    let value = contact.value.trim();
    match contact.kind {
        ContactKind::Email => value.to_lowercase(),
        ContactKind::Phone => {
            let digits: String = value.chars().filter(|c| c.is_ascii_digit()).collect();
            if value.starts_with('+') {
                format!("+{digits}")
            } else {
                digits
            }
        }
        ContactKind::Anonymous => value.to_string(),
    }
}

impl TipsterIdentity for HashedTipsterIdentity {
    /// Produces e.g. `email-3fa91c07d2e4b8a1`.
    fn resolve(&self, contact: &TipsterContact) -> TipsterId {
        let prefix = match contact.kind {
            ContactKind::Email => "email",
            ContactKind::Phone => "phone",
            ContactKind::Anonymous => "anon",
        };
        let mut hasher = Sha256::new();
        hasher.update(self.salt.as_bytes());
        hasher.update(prefix.as_bytes());
        hasher.update(normalize(contact).as_bytes());
        let hash = hex::encode(hasher.finalize());
        // First 64 bits of the digest
        TipsterId(format!("{prefix}-{}", &hash[..16]))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn contact(kind: ContactKind, value: &str) -> TipsterContact {
        TipsterContact {
            kind,
            value: value.to_string(),
        }
    }

    #[test]
    fn email_case_and_whitespace_do_not_matter() {
        let identity = HashedTipsterIdentity::new("pepper");
        let a = identity.resolve(&contact(ContactKind::Email, "Jane.Doe@Example.org"));
        let b = identity.resolve(&contact(ContactKind::Email, "  jane.doe@example.org "));
        assert_eq!(a, b);
        assert!(a.0.starts_with("email-"));
        assert_eq!(a.0.len(), "email-".len() + 16);
        assert!(!a.0.contains("jane"));
    }

    #[test]
    fn phone_formatting_is_ignored() {
        let identity = HashedTipsterIdentity::new("pepper");
        let a = identity.resolve(&contact(ContactKind::Phone, "+1 (555) 010-0199"));
        let b = identity.resolve(&contact(ContactKind::Phone, "+15550100199"));
        assert_eq!(a, b);
    }

    #[test]
    fn salt_and_kind_separate_identities() {
        let one = HashedTipsterIdentity::new("pepper");
        let other = HashedTipsterIdentity::new("paprika");
        let c = contact(ContactKind::Anonymous, "device-77");
        assert_ne!(one.resolve(&c), other.resolve(&c));
        assert_eq!(one.resolve(&c), one.resolve(&c));

        let as_email = one.resolve(&contact(ContactKind::Email, "device-77"));
        assert_ne!(one.resolve(&c), as_email);
    }
}
