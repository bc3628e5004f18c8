use anyhow::{Result, bail};
use std::io::{self, BufRead, IsTerminal};
use zeroize::Zeroizing;

pub const PASSWORD_ENV: &str = "FORMSEAL_PASSWORD";
pub const HMAC_SECRET_ENV: &str = "FORMSEAL_HMAC_SECRET";

/// Password that unseals a key bundle.
pub fn read_password() -> Result<Zeroizing<String>> {
    read_secret(PASSWORD_ENV, "Password: ")
}

/// Shared HMAC secret for signing or verifying.
pub fn read_hmac_secret() -> Result<Zeroizing<String>> {
    read_secret(HMAC_SECRET_ENV, "HMAC secret: ")
}

fn read_secret(env: &str, prompt: &str) -> Result<Zeroizing<String>> {
    //  FORMSEAL_PASSWORD="supersecret" formseal sign ...
    if let Ok(value) = std::env::var(env) {
        if !value.is_empty() {
            return Ok(Zeroizing::new(value));
        }
    }

    //  printf "%s" "$SECRET" | formseal sign ...
    if !io::stdin().is_terminal() {
        let mut buf = Zeroizing::new(String::new());
        io::stdin().read_line(&mut buf)?;
        trim_newline(&mut buf);

        if !buf.is_empty() {
            return Ok(buf);
        }
    }

    if io::stdin().is_terminal() {
        let value = Zeroizing::new(rpassword::prompt_password(prompt)?);
        if !value.is_empty() {
            return Ok(value);
        }
    }

    bail!("no {} provided", prompt.trim_end_matches(": ").to_lowercase())
}

/// New password for a key bundle. Piped input must repeat it on a second line.
pub fn read_new_password_with_confirmation() -> Result<Zeroizing<String>> {
    if let Ok(pw) = std::env::var(PASSWORD_ENV) {
        if !pw.is_empty() {
            return Ok(Zeroizing::new(pw));
        }
    }

    if !io::stdin().is_terminal() {
        let stdin = io::stdin();
        let mut handle = stdin.lock();

        let mut pw1 = Zeroizing::new(String::new());
        let mut pw2 = Zeroizing::new(String::new());

        handle.read_line(&mut pw1)?;
        handle.read_line(&mut pw2)?;

        trim_newline(&mut pw1);
        trim_newline(&mut pw2);

        return confirm(pw1, pw2);
    }

    let pw1 = Zeroizing::new(rpassword::prompt_password("New password: ")?);
    let pw2 = Zeroizing::new(rpassword::prompt_password("Confirm password: ")?);

    confirm(pw1, pw2)
}

fn confirm(pw1: Zeroizing<String>, pw2: Zeroizing<String>) -> Result<Zeroizing<String>> {
    if pw1.is_empty() {
        bail!("password cannot be empty");
    }

    if pw1 != pw2 {
        bail!("passwords do not match");
    }

    Ok(pw1)
}

fn trim_newline(s: &mut String) {
    while s.ends_with('\n') || s.ends_with('\r') {
        s.pop();
    }
}
