//! Verification of a holder's answers against a signed table.
//!
//! The template is re-rendered from the answers, the lookup key is recomputed
//! and the stored signature is checked. Lookup misses and bad signatures are
//! reported as distinct outcomes.

use std::collections::BTreeMap;

use base64::{Engine as _, engine::general_purpose::STANDARD};
use rsa::{Pkcs1v15Sign, RsaPublicKey};
use serde::Serialize;
use sha2::Sha256;
use subtle::ConstantTimeEq;
use tracing::{debug, info};
use zeroize::Zeroizing;

use crate::crypto::derive_key;
use crate::error::{Error, Result};
use crate::format::SignedDocument;
use crate::keys::parse_public_key;
use crate::sign::{SignatureAlgorithm, SignedEntry, SignedTable, digest, hmac_sha256};
use crate::template::{Answers, Template};

pub enum Verifier {
    Rsa(RsaPublicKey),
    Hmac(Zeroizing<String>),
}

impl Verifier {
    /// Imports an encoded public key, see [`parse_public_key`].
    pub fn rsa_from_encoded(encoded: &str) -> Result<Self> {
        parse_public_key(encoded).map(Verifier::Rsa)
    }

    pub fn hmac(secret: impl Into<String>) -> Result<Self> {
        let secret = Zeroizing::new(secret.into());
        if secret.is_empty() {
            return Err(Error::KeyUnavailable("HMAC secret is empty".into()));
        }
        Ok(Verifier::Hmac(secret))
    }

    pub fn algorithm(&self) -> SignatureAlgorithm {
        match self {
            Verifier::Rsa(_) => SignatureAlgorithm::RsaSha256,
            Verifier::Hmac(_) => SignatureAlgorithm::HmacSha256,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Outcome {
    Valid,
    NotFound,
    SignatureInvalid,
}

#[derive(Debug, Clone, Serialize)]
pub struct VerificationReport {
    outcome: Outcome,
    signature_matched: bool,
    selected_text: String,
    signed_text: String,
    inputs: BTreeMap<String, String>,
    lookup_key: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    signature: Option<String>,
    signature_algorithm: SignatureAlgorithm,
}

impl VerificationReport {
    pub fn outcome(&self) -> Outcome {
        self.outcome
    }

    pub fn is_valid(&self) -> bool {
        self.signature_matched
    }

    /// The answers substituted into every placeholder, unanswered ones left as
    /// their markers.
    pub fn selected_text(&self) -> &str {
        &self.selected_text
    }

    /// The text whose digest was looked up.
    pub fn signed_text(&self) -> &str {
        &self.signed_text
    }

    pub fn inputs(&self) -> &BTreeMap<String, String> {
        &self.inputs
    }

    pub fn lookup_key(&self) -> &str {
        &self.lookup_key
    }

    /// Encoded signature of the matched entry, if the lookup hit.
    pub fn signature(&self) -> Option<&str> {
        self.signature.as_deref()
    }

    pub fn signature_algorithm(&self) -> SignatureAlgorithm {
        self.signature_algorithm
    }

    /// Collapses the report to `Ok` only when the signature checked out.
    pub fn into_result(self) -> Result<Self> {
        match self.outcome {
            Outcome::Valid => Ok(self),
            Outcome::NotFound => Err(Error::SignatureNotFound),
            Outcome::SignatureInvalid => Err(Error::SignatureInvalid),
        }
    }
}

/// Checks whether `answers` reproduce a signed variant of `template_text`.
///
/// Returns a report for every lookup result, including misses; only template,
/// key or table errors are returned as `Err`.
pub fn verify(
    template_text: &str,
    answers: &Answers,
    table: &SignedTable,
    verifier: &Verifier,
) -> Result<VerificationReport> {
    if verifier.algorithm() != table.algorithm() {
        return Err(Error::AlgorithmMismatch {
            expected: verifier.algorithm().as_str(),
            found: table.algorithm().as_str(),
        });
    }

    let template = Template::parse(template_text)?;
    let selected_text = template.render_selected(answers);
    let signed_text = template.render_signed(answers, table.algorithm().free_text_policy());

    let (lookup_key, outcome, signature) = match verifier {
        Verifier::Rsa(public) => {
            let digest = digest(&signed_text);
            let key = STANDARD.encode(digest);
            match table.get(&key) {
                None => (key, Outcome::NotFound, None),
                Some(entry) => {
                    let outcome = match public.verify(
                        Pkcs1v15Sign::new::<Sha256>(),
                        &digest,
                        entry.signature(),
                    ) {
                        Ok(()) => Outcome::Valid,
                        Err(_) => Outcome::SignatureInvalid,
                    };
                    (key, outcome, Some(entry.encoded_signature()))
                }
            }
        }
        Verifier::Hmac(secret) => {
            let params = table
                .hmac_params()
                .ok_or_else(|| Error::record("HMAC table has no salt"))?;
            let mac_key = derive_key(secret, &params.salt, params.kdf)?;
            let mac = hmac_sha256(mac_key.as_ref(), &signed_text)?;
            let key = hex::encode(mac);
            match table.get(&key) {
                // A signed variant with this text under another MAC means the
                // secret is wrong, not that the answers were never signed.
                None => match signed_variant(table, &signed_text) {
                    Some(entry) => (
                        key,
                        Outcome::SignatureInvalid,
                        Some(entry.encoded_signature()),
                    ),
                    None => (key, Outcome::NotFound, None),
                },
                Some(entry) => {
                    let outcome = if bool::from(entry.signature().ct_eq(&mac)) {
                        Outcome::Valid
                    } else {
                        Outcome::SignatureInvalid
                    };
                    (key, outcome, Some(entry.encoded_signature()))
                }
            }
        }
    };

    debug!(lookup_key = %lookup_key, ?outcome, "looked up signed variant");
    info!(
        algorithm = table.algorithm().as_str(),
        ?outcome,
        "verified answers"
    );

    Ok(VerificationReport {
        outcome,
        signature_matched: outcome == Outcome::Valid,
        selected_text,
        signed_text,
        inputs: answers
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect(),
        lookup_key,
        signature,
        signature_algorithm: table.algorithm(),
    })
}

fn signed_variant<'a>(table: &'a SignedTable, signed_text: &str) -> Option<&'a SignedEntry> {
    let wanted = digest(signed_text);
    table
        .iter()
        .map(|(_, entry)| entry)
        .find(|entry| *entry.digest() == wanted)
}

/// Validates a persisted document and verifies `answers` against it.
pub fn verify_document(
    document: &SignedDocument,
    answers: &Answers,
    verifier: &Verifier,
) -> Result<VerificationReport> {
    document.template()?;
    let table = document.table()?;
    verify(&document.original, answers, &table, verifier)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::KdfParams;
    use crate::keys::test_support::{foreign_key, signing_key};
    use crate::sign::{SignedEntry, Signer, sign_template};

    const LETTER: &str = "Dear [name], you are [role:Admin,User].[address]";

    fn answers(pairs: &[(&str, &str)]) -> Answers {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    fn rsa_table() -> SignedTable {
        sign_template(LETTER, &Signer::Rsa(signing_key().clone()))
            .unwrap()
            .1
    }

    #[test]
    fn rsa_valid_combination() {
        let verifier = Verifier::Rsa(RsaPublicKey::from(signing_key()));
        let report = verify(
            LETTER,
            &answers(&[("name", "Ana"), ("role", "Admin"), ("address", "Rua 1")]),
            &rsa_table(),
            &verifier,
        )
        .unwrap();

        assert_eq!(report.outcome(), Outcome::Valid);
        assert!(report.is_valid());
        assert_eq!(report.selected_text(), "Dear Ana, you are Admin.Rua 1");
        assert_eq!(report.signed_text(), "Dear [name], you are Admin.[address]");
        assert!(report.signature().is_some());
    }

    #[test]
    fn rsa_unsigned_option_is_not_found() {
        let verifier = Verifier::Rsa(RsaPublicKey::from(signing_key()));
        let report = verify(
            LETTER,
            &answers(&[("name", "Ana"), ("role", "Manager")]),
            &rsa_table(),
            &verifier,
        )
        .unwrap();

        assert_eq!(report.outcome(), Outcome::NotFound);
        assert!(report.signature().is_none());
        assert!(matches!(report.into_result(), Err(Error::SignatureNotFound)));
    }

    #[test]
    fn rsa_foreign_key_is_signature_invalid() {
        let verifier = Verifier::Rsa(RsaPublicKey::from(foreign_key()));
        let report = verify(
            LETTER,
            &answers(&[("role", "User")]),
            &rsa_table(),
            &verifier,
        )
        .unwrap();

        assert_eq!(report.outcome(), Outcome::SignatureInvalid);
        assert!(matches!(report.into_result(), Err(Error::SignatureInvalid)));
    }

    #[test]
    fn hmac_round_trip_and_wrong_secret() {
        let signer = Signer::hmac("team secret", KdfParams::default()).unwrap();
        let (_, table) = sign_template(LETTER, &signer).unwrap();
        let given = answers(&[("name", "Ana"), ("role", "User")]);

        let right = Verifier::hmac("team secret").unwrap();
        let report = verify(LETTER, &given, &table, &right).unwrap();
        assert_eq!(report.outcome(), Outcome::Valid);
        assert_eq!(report.signed_text(), "Dear , you are User.");

        let wrong = Verifier::hmac("other").unwrap();
        let report = verify(LETTER, &given, &table, &wrong).unwrap();
        assert_eq!(report.outcome(), Outcome::SignatureInvalid);
        assert!(report.signature().is_some());
        assert!(matches!(report.into_result(), Err(Error::SignatureInvalid)));
    }

    #[test]
    fn hmac_unsigned_option_is_not_found_under_any_secret() {
        let signer = Signer::hmac("team secret", KdfParams::default()).unwrap();
        let (_, table) = sign_template(LETTER, &signer).unwrap();
        let given = answers(&[("role", "Manager")]);

        for secret in ["team secret", "other"] {
            let verifier = Verifier::hmac(secret).unwrap();
            let report = verify(LETTER, &given, &table, &verifier).unwrap();
            assert_eq!(report.outcome(), Outcome::NotFound, "{secret}");
        }
    }

    #[test]
    fn hmac_tampered_signature_is_invalid() {
        let signer = Signer::hmac("s", KdfParams::default()).unwrap();
        let (_, table) = sign_template(LETTER, &signer).unwrap();
        let params = *table.hmac_params().unwrap();

        let mut tampered = SignedTable::new(SignatureAlgorithm::HmacSha256, Some(params)).unwrap();
        for (key, entry) in table.iter() {
            let mut signature = entry.signature().to_vec();
            signature[0] ^= 1;
            let forged = SignedEntry::new(
                entry.text().to_string(),
                *entry.digest(),
                signature,
                entry.algorithm(),
            );
            tampered.insert_keyed(key.clone(), forged).unwrap();
        }

        let report = verify(
            LETTER,
            &answers(&[("role", "Admin")]),
            &tampered,
            &Verifier::hmac("s").unwrap(),
        )
        .unwrap();
        assert_eq!(report.outcome(), Outcome::SignatureInvalid);
    }

    #[test]
    fn verifier_must_match_table_algorithm() {
        let result = verify(
            LETTER,
            &Answers::new(),
            &rsa_table(),
            &Verifier::hmac("s").unwrap(),
        );
        assert!(matches!(result, Err(Error::AlgorithmMismatch { .. })));
    }

    #[test]
    fn unparseable_public_key_is_import_failure() {
        assert!(matches!(
            Verifier::rsa_from_encoded("definitely not a key"),
            Err(Error::KeyImportFailed(_))
        ));
    }

    #[test]
    fn report_serialises_outcome_in_snake_case() {
        let verifier = Verifier::Rsa(RsaPublicKey::from(signing_key()));
        let given = answers(&[("role", "Other")]);
        let report = verify(LETTER, &given, &rsa_table(), &verifier).unwrap();
        let json = serde_json::to_value(&report).unwrap();

        assert_eq!(json["outcome"], "not_found");
        assert_eq!(json["signature_matched"], false);
        assert_eq!(json["signature_algorithm"], "RSA");
        assert_eq!(json["inputs"]["role"], "Other");
    }

    #[test]
    fn document_round_trip_verifies() {
        let signer = Signer::Rsa(signing_key().clone());
        let (template, table) = sign_template(LETTER, &signer).unwrap();
        let bytes = SignedDocument::new(&template, &table).to_bytes().unwrap();
        let document = SignedDocument::parse(&bytes).unwrap();

        let verifier = Verifier::Rsa(RsaPublicKey::from(signing_key()));
        let report = verify_document(&document, &answers(&[("role", "User")]), &verifier).unwrap();
        assert_eq!(report.outcome(), Outcome::Valid);
    }
}
