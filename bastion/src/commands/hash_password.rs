//! `bastion hash-password`, grounded in this codebase's `commands/hash.rs`.

use std::io::{stdin, BufRead};

use anyhow::{Context, Result};
use bastion_common::helpers::hash::hash_password;

pub(crate) async fn command() -> Result<()> {
    let password = if console::user_attended() {
        dialoguer::Password::new().with_prompt("Password to be hashed").interact()?
    } else {
        let mut line = String::new();
        stdin().lock().read_line(&mut line).context("reading password from stdin")?;
        line.trim_end_matches(['\n', '\r']).to_string()
    };

    let hash = hash_password(&password).context("hashing password")?;
    println!("{hash}");
    Ok(())
}
