//! Prints an `INSERT` for a staff login.
//!
//! Usage: seed_user <username-or-email> <display name> <password>

use argon2::password_hash::{SaltString, rand_core::OsRng};
use argon2::{Argon2, PasswordHasher};

const DEFAULT_DOMAIN: &str = "clinic.local";

fn sql_quote(s: &str) -> String {
    format!("'{}'", s.replace('\'', "''"))
}

fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    let mut args = std::env::args().skip(1);
    let (Some(login), Some(display_name), Some(password)) = (args.next(), args.next(), args.next())
    else {
        anyhow::bail!("Usage: seed_user <username-or-email> <display name> <password>");
    };

    let domain = std::env::var("LOGIN_EMAIL_DOMAIN").unwrap_or_else(|_| DEFAULT_DOMAIN.into());
    let login = login.trim().to_lowercase();
    let email = if login.contains('@') {
        login
    } else {
        format!("{login}@{}", domain.trim().trim_start_matches('@'))
    };

    let salt = SaltString::generate(&mut OsRng);
    let phc = Argon2::default()
        .hash_password(password.as_bytes(), &salt)
        .map_err(|e| anyhow::anyhow!("hash error: {e}"))?
        .to_string();

    println!(
        "INSERT INTO app_user (email, display_name, password_hash) VALUES ({}, {}, {});",
        sql_quote(&email),
        sql_quote(&display_name),
        sql_quote(&phc)
    );
    Ok(())
}
