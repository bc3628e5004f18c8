use assert_cmd::Command;
use predicates::prelude::*;
use std::fs;
use std::path::{Path, PathBuf};
use tempfile::tempdir;

const LETTER: &str = "Dear [name], you are [role:Admin,User].[address]";

fn bin() -> Command {
    let mut cmd = Command::new(assert_cmd::cargo::cargo_bin!("formseal"));
    cmd.env_remove("FORMSEAL_PASSWORD")
        .env_remove("FORMSEAL_HMAC_SECRET")
        .env_remove("FORMSEAL_KEYS_DIR")
        .env_remove("FORMSEAL_PBKDF2_ITERATIONS");
    cmd
}

fn find_bundle(dir: &Path, prefix: &str) -> PathBuf {
    fs::read_dir(dir)
        .unwrap()
        .map(|e| e.unwrap().path())
        .find(|p| {
            p.file_name()
                .unwrap()
                .to_string_lossy()
                .starts_with(&format!("{prefix}-"))
        })
        .unwrap()
}

/// Generates an RSA key pair under `dir/keys` and returns (sk, pk).
fn keygen(dir: &Path, mode: &str) -> (PathBuf, PathBuf) {
    let keys = dir.join("keys");
    bin()
        .env("FORMSEAL_PASSWORD", "pw")
        .arg("--keys-dir")
        .arg(&keys)
        .arg("keygen")
        .arg("--size")
        .arg("2048")
        .arg("--mode")
        .arg(mode)
        .assert()
        .success()
        .stdout(predicate::str::contains("private key:"));

    (find_bundle(&keys, "sk"), find_bundle(&keys, "pk"))
}

fn write_template(dir: &Path, text: &str) -> PathBuf {
    let path = dir.join("template.txt");
    fs::write(&path, text).unwrap();
    path
}

fn sign_rsa(dir: &Path, sk: &Path) -> PathBuf {
    let template = write_template(dir, LETTER);
    let out = dir.join("signed.json");
    bin()
        .env("FORMSEAL_PASSWORD", "pw")
        .arg("sign")
        .arg("--template")
        .arg(&template)
        .arg("--private-key")
        .arg(sk)
        .arg("--out")
        .arg(&out)
        .assert()
        .success()
        .stdout(predicate::str::contains("signed 2 combinations"));
    out
}

#[test]
fn keygen_writes_private_and_public_bundles() {
    let dir = tempdir().unwrap();
    let (sk, pk) = keygen(dir.path(), "aes-256-ctr");

    let private: serde_json::Value = serde_json::from_slice(&fs::read(sk).unwrap()).unwrap();
    assert_eq!(private["CipherMode"], "aes-256-ctr");
    assert!(private["Nonce"].is_string());
    assert!(private["EncryptedSecretKey"].is_string());
    assert_eq!(private["KeySize"], 2048);

    let public: serde_json::Value = serde_json::from_slice(&fs::read(pk).unwrap()).unwrap();
    assert!(public["PublicKey"].is_string());
}

#[test]
fn keygen_rejects_unsupported_size() {
    let dir = tempdir().unwrap();
    bin()
        .env("FORMSEAL_PASSWORD", "pw")
        .arg("--keys-dir")
        .arg(dir.path())
        .arg("keygen")
        .arg("--size")
        .arg("1024")
        .assert()
        .failure()
        .stderr(predicate::str::contains("unsupported key size"));
}

#[test]
fn keygen_rejects_unknown_mode() {
    let dir = tempdir().unwrap();
    bin()
        .env("FORMSEAL_PASSWORD", "pw")
        .arg("--keys-dir")
        .arg(dir.path())
        .arg("keygen")
        .arg("--mode")
        .arg("aes-128-ecb")
        .assert()
        .failure()
        .stderr(predicate::str::contains("unsupported cipher mode"));
}

#[test]
fn low_iteration_count_is_rejected() {
    let dir = tempdir().unwrap();
    bin()
        .env("FORMSEAL_PASSWORD", "pw")
        .arg("--keys-dir")
        .arg(dir.path())
        .arg("--pbkdf2-iterations")
        .arg("1000")
        .arg("keygen")
        .assert()
        .failure()
        .stderr(predicate::str::contains("below the minimum"));
}

#[test]
fn rsa_sign_and_verify_roundtrip() {
    let dir = tempdir().unwrap();
    let (sk, pk) = keygen(dir.path(), "aes-256-cbc");
    let signed = sign_rsa(dir.path(), &sk);

    bin()
        .arg("verify")
        .arg("--document")
        .arg(&signed)
        .arg("--public-key")
        .arg(&pk)
        .arg("--answer")
        .arg("name=Ana")
        .arg("--answer")
        .arg("role=Admin")
        .arg("--answer")
        .arg("address=Rua 1")
        .assert()
        .success()
        .stdout(predicate::str::contains("\"outcome\": \"valid\""))
        .stdout(predicate::str::contains("Dear Ana, you are Admin.Rua 1"));
}

#[test]
fn unsigned_combination_fails_verification() {
    let dir = tempdir().unwrap();
    let (sk, pk) = keygen(dir.path(), "aes-256-ctr");
    let signed = sign_rsa(dir.path(), &sk);

    bin()
        .arg("verify")
        .arg("--document")
        .arg(&signed)
        .arg("--public-key")
        .arg(&pk)
        .arg("--answer")
        .arg("role=Manager")
        .assert()
        .failure()
        .stdout(predicate::str::contains("\"outcome\": \"not_found\""))
        .stderr(predicate::str::contains("no signed variant matches"));
}

#[test]
fn foreign_public_key_is_signature_invalid() {
    let dir = tempdir().unwrap();
    let (sk, _) = keygen(dir.path(), "aes-256-cbc");
    let signed = sign_rsa(dir.path(), &sk);

    let other = tempdir().unwrap();
    let (_, foreign_pk) = keygen(other.path(), "aes-256-cbc");

    bin()
        .arg("verify")
        .arg("--document")
        .arg(&signed)
        .arg("--public-key")
        .arg(&foreign_pk)
        .arg("--answer")
        .arg("role=User")
        .assert()
        .failure()
        .stdout(predicate::str::contains("\"outcome\": \"signature_invalid\""))
        .stderr(predicate::str::contains("signature is invalid"));
}

#[test]
fn wrong_password_fails() {
    let dir = tempdir().unwrap();
    let (sk, _) = keygen(dir.path(), "aes-256-ctr");
    let template = write_template(dir.path(), LETTER);

    bin()
        .env("FORMSEAL_PASSWORD", "wrong_pw")
        .arg("sign")
        .arg("--template")
        .arg(&template)
        .arg("--private-key")
        .arg(&sk)
        .arg("--out")
        .arg(dir.path().join("signed.json"))
        .assert()
        .failure()
        .stderr(predicate::str::contains("invalid password or corrupted data"));

    assert!(!dir.path().join("signed.json").exists());
}

#[test]
fn template_over_limits_is_rejected() {
    let dir = tempdir().unwrap();
    let template = write_template(dir.path(), "[role:a,b,c,d]");

    bin()
        .env("FORMSEAL_HMAC_SECRET", "secret")
        .arg("sign-hmac")
        .arg("--template")
        .arg(&template)
        .arg("--out")
        .arg(dir.path().join("signed.json"))
        .assert()
        .failure()
        .stderr(predicate::str::contains("invalid template"));
}

#[test]
fn hmac_sign_and_verify_roundtrip() {
    let dir = tempdir().unwrap();
    let template = write_template(dir.path(), LETTER);
    let out = dir.path().join("signed.json");

    bin()
        .env("FORMSEAL_HMAC_SECRET", "team secret")
        .arg("sign-hmac")
        .arg("--template")
        .arg(&template)
        .arg("--out")
        .arg(&out)
        .assert()
        .success();

    let document: serde_json::Value = serde_json::from_slice(&fs::read(&out).unwrap()).unwrap();
    assert_eq!(document["signature_algorithm"], "HMAC-SHA256 (hex)");
    assert!(document["salt"].is_string());

    bin()
        .env("FORMSEAL_HMAC_SECRET", "team secret")
        .arg("verify-hmac")
        .arg("--document")
        .arg(&out)
        .arg("--answer")
        .arg("role=User")
        .assert()
        .success()
        .stdout(predicate::str::contains("Dear , you are User."));

    bin()
        .env("FORMSEAL_HMAC_SECRET", "other secret")
        .arg("verify-hmac")
        .arg("--document")
        .arg(&out)
        .arg("--answer")
        .arg("role=User")
        .assert()
        .failure()
        .stdout(predicate::str::contains("\"outcome\": \"signature_invalid\""))
        .stderr(predicate::str::contains("signature is invalid"));

    bin()
        .env("FORMSEAL_HMAC_SECRET", "other secret")
        .arg("verify-hmac")
        .arg("--document")
        .arg(&out)
        .arg("--answer")
        .arg("role=Manager")
        .assert()
        .failure()
        .stdout(predicate::str::contains("\"outcome\": \"not_found\""));
}

#[test]
fn hmac_keygen_and_reveal() {
    let dir = tempdir().unwrap();
    let keys = dir.path().join("keys");

    let generated = bin()
        .env("FORMSEAL_PASSWORD", "pw")
        .arg("--keys-dir")
        .arg(&keys)
        .arg("hmac-keygen")
        .arg("--bits")
        .arg("128")
        .arg("--mode")
        .arg("aes-256-ctr")
        .assert()
        .success()
        .stdout(predicate::str::contains("hmac key:"))
        .get_output()
        .stdout
        .clone();
    let generated = String::from_utf8(generated).unwrap();
    let secret = generated
        .lines()
        .find_map(|line| line.strip_prefix("secret:"))
        .unwrap()
        .trim()
        .to_string();

    let bundle = find_bundle(&keys, "hmacKey");

    bin()
        .env("FORMSEAL_PASSWORD", "pw")
        .arg("hmac-reveal")
        .arg("--key")
        .arg(&bundle)
        .assert()
        .success()
        .stdout(predicate::str::is_match("^[A-Za-z0-9+/]{22}==\n$").unwrap())
        .stdout(format!("{secret}\n"));

    bin()
        .env("FORMSEAL_PASSWORD", "nope")
        .arg("hmac-reveal")
        .arg("--key")
        .arg(&bundle)
        .assert()
        .failure()
        .stderr(predicate::str::contains("invalid password or corrupted data"));
}

#[test]
fn public_key_exports_xml() {
    let dir = tempdir().unwrap();
    let (_, pk) = keygen(dir.path(), "aes-256-cbc");

    bin()
        .arg("public-key")
        .arg("--key")
        .arg(&pk)
        .arg("--xml")
        .assert()
        .success()
        .stdout(predicate::str::starts_with("<RSAKeyValue><Modulus>"));
}

#[test]
fn fields_lists_placeholders() {
    let dir = tempdir().unwrap();
    let template = write_template(dir.path(), LETTER);

    bin()
        .arg("fields")
        .arg("--template")
        .arg(&template)
        .assert()
        .success()
        .stdout(predicate::str::contains("role\tAdmin | User"))
        .stdout(predicate::str::contains("name\tfree text"))
        .stdout(predicate::str::contains("variants: 2"));
}
