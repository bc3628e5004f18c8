use anyhow::{Context, Result};
use chrono::Utc;
use clap::{Parser, Subcommand};
use formseal::crypto::kdf::MIN_ITERATIONS;
use formseal::format::{HmacKeyRecord, PrivateKeyRecord, PublicKeyRecord};
use formseal::keys::{
    self, check_key_size, encode_public_key, public_key_to_xml, unlock_signing_key,
};
use formseal::verify::verify_document;
use formseal::{
    Answers, CipherMode, HmacKeySize, KdfParams, KeyBundle, RsaKeySize, SignedDocument, Signer,
    Storage, Template, Verifier, default_keys_dir, sign_document,
};
use std::fs;
use std::path::{Path, PathBuf};
use tracing_subscriber::EnvFilter;
mod auth;

#[derive(Debug, Parser)]
#[command(name = "formseal")]
#[command(
    version,
    about = "Sign every filled-in variant of a placeholder template, then verify answers offline."
)]
struct Cli {
    /// Directory new key bundles are written to
    #[arg(long, global = true, value_name = "DIR", env = "FORMSEAL_KEYS_DIR")]
    keys_dir: Option<PathBuf>,

    /// PBKDF2-HMAC-SHA256 iterations for new key bundles and HMAC signing
    #[arg(
        long = "pbkdf2-iterations",
        global = true,
        env = "FORMSEAL_PBKDF2_ITERATIONS",
        default_value_t = MIN_ITERATIONS
    )]
    pbkdf2_iterations: u32,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Generates an RSA key pair with a password-sealed private key
    Keygen {
        /// Modulus size: 2048, 3072 or 4096
        #[arg(long, default_value_t = 2048)]
        size: u32,
        /// aes-256-cbc or aes-256-ctr
        #[arg(long, default_value = "aes-256-cbc")]
        mode: CipherMode,
    },

    /// Generates a password-sealed HMAC key
    HmacKeygen {
        /// Key size: 128, 256 or 512
        #[arg(long, default_value_t = 256)]
        bits: u32,
        #[arg(long, default_value = "aes-256-cbc")]
        mode: CipherMode,
    },

    /// Prints the base64 secret held in an HMAC key bundle
    #[command(arg_required_else_help = true)]
    HmacReveal {
        #[arg(long, value_name = "FILE")]
        key: PathBuf,
    },

    /// Prints a public key as SPKI base64 or RSAKeyValue XML
    #[command(arg_required_else_help = true)]
    PublicKey {
        #[arg(long, value_name = "FILE")]
        key: PathBuf,
        #[arg(long, default_value_t = false)]
        xml: bool,
    },

    /// Lists the placeholders of a template
    #[command(arg_required_else_help = true)]
    Fields {
        #[arg(long, value_name = "FILE")]
        template: PathBuf,
    },

    /// Signs every variant of a template with an RSA private key
    #[command(arg_required_else_help = true)]
    Sign {
        #[arg(long, value_name = "FILE")]
        template: PathBuf,
        #[arg(long = "private-key", value_name = "FILE")]
        private_key: PathBuf,
        #[arg(long, value_name = "FILE")]
        out: PathBuf,
    },

    /// Signs every variant of a template with a shared HMAC secret
    #[command(arg_required_else_help = true)]
    SignHmac {
        #[arg(long, value_name = "FILE")]
        template: PathBuf,
        #[arg(long, value_name = "FILE")]
        out: PathBuf,
    },

    /// Verifies answers against an RSA-signed document
    #[command(arg_required_else_help = true)]
    Verify {
        #[arg(long, value_name = "FILE")]
        document: PathBuf,
        #[arg(long = "public-key", value_name = "FILE")]
        public_key: PathBuf,
        /// Placeholder answer, repeatable
        #[arg(long = "answer", value_name = "NAME=VALUE", value_parser = parse_answer)]
        answers: Vec<(String, String)>,
    },

    /// Verifies answers against an HMAC-signed document
    #[command(arg_required_else_help = true)]
    VerifyHmac {
        #[arg(long, value_name = "FILE")]
        document: PathBuf,
        #[arg(long = "answer", value_name = "NAME=VALUE", value_parser = parse_answer)]
        answers: Vec<(String, String)>,
    },
}

fn parse_answer(s: &str) -> std::result::Result<(String, String), String> {
    let (name, value) = s
        .split_once('=')
        .ok_or_else(|| format!("expected NAME=VALUE, got '{s}'"))?;
    let name = name.trim();
    if name.is_empty() {
        return Err("answer name cannot be empty".into());
    }
    Ok((name.to_string(), value.to_string()))
}

fn resolve_keys_dir(dir: Option<PathBuf>) -> Result<PathBuf> {
    match dir {
        Some(d) => Ok(d),
        None => default_keys_dir(),
    }
}

fn bundle_stamp() -> String {
    Utc::now().format("%Y%m%d%H%M%S%3f").to_string()
}

fn bundle_path(dir: &Path, prefix: &str, stamp: &str) -> PathBuf {
    dir.join(format!("{prefix}-{stamp}.json"))
}

fn read_template(path: &Path) -> Result<String> {
    fs::read_to_string(path).with_context(|| format!("failed to read template {}", path.display()))
}

fn load_document(path: &Path) -> Result<SignedDocument> {
    let data = Storage::new(path).load()?;
    SignedDocument::parse(&data).with_context(|| format!("invalid document {}", path.display()))
}

fn print_report(report: formseal::VerificationReport) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(&report)?);
    report.into_result()?;
    Ok(())
}

fn main() -> Result<()> {
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("formseal=warn")),
        )
        .with_writer(std::io::stderr)
        .init();

    let args = Cli::parse();
    let kdf = KdfParams::new(args.pbkdf2_iterations)?;

    match args.command {
        Commands::Keygen { size, mode } => {
            let size = RsaKeySize::try_from(size)?;
            let dir = resolve_keys_dir(args.keys_dir)?;
            let password = auth::read_new_password_with_confirmation()?;

            let bundle = KeyBundle::generate_with_kdf(size, &password, mode, kdf)?;

            let stamp = bundle_stamp();
            let sk = Storage::new(bundle_path(&dir, "sk", &stamp));
            let pk = Storage::new(bundle_path(&dir, "pk", &stamp));
            sk.save_new_json(&PrivateKeyRecord::from_bundle(&bundle))?;
            pk.save_new_json(&PublicKeyRecord::from_bundle(&bundle))?;

            println!("private key: {}", sk.path().display());
            println!("public key:  {}", pk.path().display());
        }
        Commands::HmacKeygen { bits, mode } => {
            let size = HmacKeySize::try_from(bits)?;
            let dir = resolve_keys_dir(args.keys_dir)?;
            let password = auth::read_new_password_with_confirmation()?;

            let (bundle, secret) = keys::generate_hmac_key(size, &password, mode, kdf)?;

            let storage = Storage::new(bundle_path(&dir, "hmacKey", &bundle_stamp()));
            storage.save_new_json(&HmacKeyRecord::from_bundle(&bundle))?;
            println!("hmac key: {}", storage.path().display());
            println!("secret:   {}", secret.as_str());
        }
        Commands::HmacReveal { key } => {
            let record: HmacKeyRecord = Storage::new(key).load_json()?;
            let bundle = record.to_bundle()?;
            let password = auth::read_password()?;
            println!("{}", bundle.reveal(&password)?.as_str());
        }
        Commands::PublicKey { key, xml } => {
            let record: PublicKeyRecord = Storage::new(key).load_json()?;
            let public = record.to_public_key()?;
            if xml {
                println!("{}", public_key_to_xml(&public));
            } else {
                println!("{}", encode_public_key(&public)?);
            }
        }
        Commands::Fields { template } => {
            let template = Template::parse(read_template(&template)?)?;
            for placeholder in template.placeholders() {
                match placeholder.options() {
                    Some(options) => println!("{}\t{}", placeholder.name(), options.join(" | ")),
                    None => println!("{}\tfree text", placeholder.name()),
                }
            }
            println!("variants: {}", template.variant_count());
        }
        Commands::Sign {
            template,
            private_key,
            out,
        } => {
            let text = read_template(&template)?;
            let record: PrivateKeyRecord = Storage::new(private_key).load_json()?;
            let sealed = record.sealed_key()?;
            let password = auth::read_password()?;
            let private = unlock_signing_key(&sealed, &password)?;
            drop(password);
            if let Some(size) = record.key_size()? {
                check_key_size(&private, size)?;
            }

            let document = sign_document(&text, &Signer::Rsa(private))?;
            let storage = Storage::new(out);
            storage.save_json(&document)?;
            println!(
                "signed {} combinations -> {}",
                document.signed_combinations.len(),
                storage.path().display()
            );
        }
        Commands::SignHmac { template, out } => {
            let text = read_template(&template)?;
            let secret = auth::read_hmac_secret()?;
            let signer = Signer::hmac(secret.as_str(), kdf)?;
            drop(secret);

            let document = sign_document(&text, &signer)?;
            let storage = Storage::new(out);
            storage.save_json(&document)?;
            println!(
                "signed {} combinations -> {}",
                document.signed_combinations.len(),
                storage.path().display()
            );
        }
        Commands::Verify {
            document,
            public_key,
            answers,
        } => {
            let document = load_document(&document)?;
            let record: PublicKeyRecord = Storage::new(public_key).load_json()?;
            let verifier = Verifier::Rsa(record.to_public_key()?);
            let answers: Answers = answers.into_iter().collect();

            print_report(verify_document(&document, &answers, &verifier)?)?;
        }
        Commands::VerifyHmac { document, answers } => {
            let document = load_document(&document)?;
            let secret = auth::read_hmac_secret()?;
            let verifier = Verifier::hmac(secret.as_str())?;
            let answers: Answers = answers.into_iter().collect();

            print_report(verify_document(&document, &answers, &verifier)?)?;
        }
    }

    Ok(())
}
