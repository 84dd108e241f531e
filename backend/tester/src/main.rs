use std::fs;

use anyhow::{Context, Result};
use chrono::Utc;
use clap::Parser;
use server::auth::TelegramLogin;

/// Writes a Telegram login payload signed with the given bot token.
#[derive(Parser, Debug)]
#[command(author, version, about)]
struct Args {
    #[arg(long)]
    id: i64,

    #[arg(long, default_value = "Tester")]
    first_name: String,

    #[arg(long)]
    username: Option<String>,

    #[arg(long, env = "TELEGRAM_BOT_TOKEN")]
    bot_token: String,

    #[arg(long, default_value = "login.json")]
    out: String,
}

fn main() -> Result<()> {
    let args = Args::parse();

    let mut login = TelegramLogin {
        id: args.id,
        first_name: args.first_name,
        last_name: None,
        username: args.username,
        photo_url: None,
        auth_date: Utc::now().timestamp(),
        hash: String::new(),
    };
    login.sign(&args.bot_token);

    println!("{}", login.data_check_string());
    println!("hash={}", login.hash);

    fs::write(&args.out, serde_json::to_vec_pretty(&login)?)
        .with_context(|| format!("Failed to write {}", args.out))?;

    Ok(())
}
