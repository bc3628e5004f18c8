//! Offline signing of placeholder templates.
//!
//! A template such as `Dear [name], you are [role:Admin,User].` is expanded
//! into every combination of its fixed options, and each combination is
//! signed. A holder later fills in the answers and anyone with the public key
//! (or shared HMAC secret) can check that the filled-in text is one the
//! signer approved.

pub mod crypto;
pub mod error;
pub mod format;
pub mod keys;
pub mod sign;
pub mod storage;
pub mod template;
pub mod verify;

pub use crate::crypto::{CipherMode, KdfParams};
pub use crate::error::{Error, Result};
pub use crate::format::SignedDocument;
pub use crate::keys::{HmacKeyBundle, HmacKeySize, KeyBundle, RsaKeySize};
pub use crate::sign::{SignatureAlgorithm, SignedTable, Signer};
pub use crate::storage::Storage;
pub use crate::template::{Answers, Template};
pub use crate::verify::{Outcome, VerificationReport, Verifier};

use anyhow::Context;
use directories::ProjectDirs;
use std::path::PathBuf;

/// Signs every variant of `template_text` and packages the result as a
/// persistable document.
pub fn sign_document(template_text: &str, signer: &Signer) -> Result<SignedDocument> {
    let (template, table) = sign::sign_template(template_text, signer)?;
    Ok(SignedDocument::new(&template, &table))
}

pub fn default_keys_dir() -> anyhow::Result<PathBuf> {
    let project_dirs =
        ProjectDirs::from("", "", "formseal").context("could not determine platform directories")?;

    Ok(project_dirs.data_dir().join("keys"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::keys::unlock_signing_key;
    use crate::verify::verify_document;
    use rsa::RsaPublicKey;
    use tempfile::tempdir;

    const LETTER: &str = "Dear [name], you are [role:Admin,User].[address]";

    fn answers(pairs: &[(&str, &str)]) -> Answers {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn keygen_sign_verify_through_files() {
        let dir = tempdir().unwrap();
        let sk = Storage::new(dir.path().join("sk.json"));
        let pk = Storage::new(dir.path().join("pk.json"));
        let doc = Storage::new(dir.path().join("doc.json"));

        let bundle =
            KeyBundle::generate(RsaKeySize::Bits2048, "pw", CipherMode::Aes256Ctr).unwrap();
        sk.save_new_json(&format::PrivateKeyRecord::from_bundle(&bundle))
            .unwrap();
        pk.save_new_json(&format::PublicKeyRecord::from_bundle(&bundle))
            .unwrap();

        let record: format::PrivateKeyRecord = sk.load_json().unwrap();
        let private = unlock_signing_key(&record.sealed_key().unwrap(), "pw").unwrap();
        let document = sign_document(LETTER, &Signer::Rsa(private)).unwrap();
        doc.save_json(&document).unwrap();

        let document = SignedDocument::parse(&doc.load().unwrap()).unwrap();
        let public: format::PublicKeyRecord = pk.load_json().unwrap();
        let verifier = Verifier::Rsa(public.to_public_key().unwrap());

        let valid = verify_document(
            &document,
            &answers(&[("name", "Ana"), ("role", "Admin"), ("address", "Rua 1")]),
            &verifier,
        )
        .unwrap();
        assert_eq!(valid.outcome(), Outcome::Valid);

        let unsigned = verify_document(
            &document,
            &answers(&[("name", "Ana"), ("role", "Manager")]),
            &verifier,
        )
        .unwrap();
        assert_eq!(unsigned.outcome(), Outcome::NotFound);
    }

    #[test]
    fn hmac_secret_from_bundle_signs_and_verifies() {
        let (bundle, _) = keys::generate_hmac_key(
            HmacKeySize::Bits256,
            "pw",
            CipherMode::Aes256Cbc,
            KdfParams::default(),
        )
        .unwrap();
        let secret = bundle.reveal("pw").unwrap();

        let signer = Signer::hmac(secret.as_str(), KdfParams::default()).unwrap();
        let document = sign_document(LETTER, &signer).unwrap();

        let report = verify_document(
            &document,
            &answers(&[("role", "User")]),
            &Verifier::hmac(secret.as_str()).unwrap(),
        )
        .unwrap();
        assert!(report.is_valid());
    }

    #[test]
    fn three_by_three_template_signs_nine_variants() {
        let key = crate::keys::test_support::signing_key();
        let document = sign_document(
            "[a:1,2,3] and [b:x,y,z] for [who]",
            &Signer::Rsa(key.clone()),
        )
        .unwrap();
        assert_eq!(document.signed_combinations.len(), 9);

        let report = verify_document(
            &document,
            &answers(&[("a", "2"), ("b", "z"), ("who", "anyone")]),
            &Verifier::Rsa(RsaPublicKey::from(key)),
        )
        .unwrap();
        assert_eq!(report.signed_text(), "2 and z for [who]");
        assert!(report.is_valid());
    }
}
