//! DKIM signing for outbound mail.
//!
//! The signer covers a fixed header list (`From`, `To`, `Subject`, `Date`,
//! `Message-ID`) with simple body canonicalisation and RSA-SHA256. Output
//! is deterministic for a fixed key, header set, and body.

pub mod canonicalize;
pub mod error;
pub mod keys;
pub mod signer;

use courier_common::config::{DkimConfig, DriverKind};

pub use canonicalize::{canonical_header_block, canonicalize_body, canonicalize_header};
pub use error::DkimError;
pub use keys::{KeyPair, generate_keys};
pub use signer::DkimSigner;

/// Whether messages sent through `driver` should be signed.
///
/// Local-only drivers (`null`, `sendmail`) never sign; everything else
/// signs exactly when the key, selector, and domain are all configured.
#[must_use]
pub fn should_sign(driver: DriverKind, dkim: &DkimConfig) -> bool {
    !driver.is_local_only() && dkim.is_complete()
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    fn complete_config() -> DkimConfig {
        DkimConfig {
            dkim_private_key: "QUJD".to_string(),
            dkim_selector: "s1".to_string(),
            dkim_domain: "example.com".to_string(),
        }
    }

    #[test]
    fn signs_remote_drivers_with_complete_config() {
        assert!(should_sign(DriverKind::Smtp, &complete_config()));
        assert!(should_sign(DriverKind::Mailgun, &complete_config()));
    }

    #[test]
    fn never_signs_local_drivers() {
        assert!(!should_sign(DriverKind::Sendmail, &complete_config()));
        assert!(!should_sign(DriverKind::Null, &complete_config()));
    }

    #[test]
    fn incomplete_config_disables_signing() {
        let mut config = complete_config();
        config.dkim_selector.clear();
        assert!(!should_sign(DriverKind::Smtp, &config));

        let mut config = complete_config();
        config.dkim_private_key.clear();
        assert!(!should_sign(DriverKind::Smtp, &config));

        let mut config = complete_config();
        config.dkim_domain.clear();
        assert!(!should_sign(DriverKind::Smtp, &config));
    }
}
