//! Seed or update a player record in the RocksDB store
//!
//! Registration lives outside the round core; this is how accounts get into a
//! local database for development. Run it while the server is stopped.

use bingo_hall::common::types::{Player, PlayerRole};
use bingo_hall::store::{GameStore, RocksPersistence};
use chrono::{Duration, Utc};
use clap::{Parser, ValueEnum};

#[derive(Clone, Copy, Debug, ValueEnum)]
enum Role {
    Player,
    Admin,
    SuperAdmin,
}

impl From<Role> for PlayerRole {
    fn from(role: Role) -> Self {
        match role {
            Role::Player => PlayerRole::Player,
            Role::Admin => PlayerRole::Admin,
            Role::SuperAdmin => PlayerRole::SuperAdmin,
        }
    }
}

#[derive(Parser, Debug)]
#[command(name = "seed_player")]
#[command(about = "Create or update a bingo player", long_about = None)]
struct Args {
    #[arg(long)]
    id: u64,

    #[arg(long)]
    username: String,

    #[arg(long, default_value = "1000")]
    balance: u64,

    /// Session token the client will present in x-session-token
    #[arg(long)]
    token: String,

    #[arg(long, value_enum, default_value = "player")]
    role: Role,

    /// Grant premium (auto-claim) for this many days
    #[arg(long)]
    premium_days: Option<i64>,

    /// Database directory
    #[arg(long, default_value = "./DB/bingo_data")]
    db_path: String,
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    println!("📂 Opening database: {}", args.db_path);
    let store = GameStore::open(Box::new(RocksPersistence::open(&args.db_path)?))?;

    let existing = store.player(args.id)?;
    let mut player = Player::new(args.id, args.username, args.balance, args.token);
    player.role = args.role.into();
    player.premium_expires_at = args.premium_days.map(|days| Utc::now() + Duration::days(days));
    if let Some(previous) = &existing {
        player.auto_claim = previous.auto_claim;
    }

    store.upsert_player(player.clone())?;

    let verb = if existing.is_some() { "Updated" } else { "Created" };
    println!("✅ {} player #{} ({})", verb, player.id, player.username);
    println!("   Balance: {}", player.balance);
    println!("   Role:    {:?}", player.role);
    match player.premium_expires_at {
        Some(expiry) => println!("   Premium: until {}", expiry.format("%Y-%m-%d %H:%M UTC")),
        None => println!("   Premium: no"),
    }
    Ok(())
}
