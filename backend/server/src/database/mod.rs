//! # SQLite
//!
//! Single-file database holding users, help requests and everything the game
//! layer tracks.
//!
//! ## Requirements
//!
//! - Status changes on a request must not race: two volunteers taking the same
//!   request at once means exactly one of them wins
//! - Experience and achievement progress are read-modify-write, so each update
//!   runs inside one transaction
//! - Small dataset, a few thousand users at most
//!
//! ## Implementation
//!
//! - One `rusqlite::Connection` behind a mutex, queries run on the blocking pool
//!   through [`Database::call`]
//! - Status changes are conditional updates (`WHERE status = ?`). Zero rows
//!   touched means someone else got there first, which we report as a conflict
//! - Schema is created on open with `IF NOT EXISTS`. Categories and the
//!   achievement catalog are seeded with `INSERT OR IGNORE` so edits made in the
//!   database survive restarts
//!
//! ## Commands
//!
//! Peek at the leaderboard.
//! ```sh
//! sqlite3 helpboard.db "SELECT user_id, level, experience FROM user_stats ORDER BY experience DESC LIMIT 10"
//! ```
use std::sync::{Arc, Mutex, PoisonError};

use rusqlite::{Connection, ErrorCode, params};
use tracing::info;

use crate::{achievements::CATALOG, error::AppError};

pub mod game;
pub mod requests;
pub mod users;

const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS users (
    id          INTEGER PRIMARY KEY AUTOINCREMENT,
    telegram_id TEXT    NOT NULL UNIQUE,
    username    TEXT    NOT NULL DEFAULT '',
    first_name  TEXT    NOT NULL DEFAULT '',
    last_name   TEXT    NOT NULL DEFAULT '',
    photo_url   TEXT    NOT NULL DEFAULT '',
    phone       TEXT    NOT NULL DEFAULT '',
    address     TEXT    NOT NULL DEFAULT '',
    about       TEXT    NOT NULL DEFAULT '',
    role        TEXT    NOT NULL DEFAULT 'user',
    created_at  TEXT    NOT NULL,
    updated_at  TEXT    NOT NULL
);

CREATE TABLE IF NOT EXISTS categories (
    id          INTEGER PRIMARY KEY,
    name        TEXT    NOT NULL UNIQUE,
    description TEXT    NOT NULL DEFAULT '',
    icon        TEXT    NOT NULL DEFAULT '',
    color       TEXT    NOT NULL DEFAULT ''
);

CREATE TABLE IF NOT EXISTS help_requests (
    id           INTEGER PRIMARY KEY AUTOINCREMENT,
    title        TEXT    NOT NULL,
    description  TEXT    NOT NULL,
    status       TEXT    NOT NULL DEFAULT 'new',
    category_id  INTEGER NOT NULL REFERENCES categories(id),
    priority     TEXT    NOT NULL DEFAULT 'medium',
    location     TEXT    NOT NULL,
    requester_id INTEGER NOT NULL REFERENCES users(id),
    assigned_to  INTEGER REFERENCES users(id),
    is_deleted   INTEGER NOT NULL DEFAULT 0,
    created_at   TEXT    NOT NULL,
    updated_at   TEXT    NOT NULL,
    completed_at TEXT,
    CHECK ((assigned_to IS NOT NULL) = (status IN ('in_progress', 'completed'))),
    CHECK ((completed_at IS NOT NULL) = (status = 'completed'))
);

CREATE INDEX IF NOT EXISTS idx_help_requests_status ON help_requests(status);
CREATE INDEX IF NOT EXISTS idx_help_requests_requester ON help_requests(requester_id);
CREATE INDEX IF NOT EXISTS idx_help_requests_assigned ON help_requests(assigned_to);

CREATE TABLE IF NOT EXISTS request_comments (
    id         INTEGER PRIMARY KEY AUTOINCREMENT,
    request_id INTEGER NOT NULL REFERENCES help_requests(id),
    user_id    INTEGER NOT NULL REFERENCES users(id),
    text       TEXT    NOT NULL,
    created_at TEXT    NOT NULL
);

CREATE TABLE IF NOT EXISTS request_ratings (
    id         INTEGER PRIMARY KEY AUTOINCREMENT,
    request_id INTEGER NOT NULL UNIQUE REFERENCES help_requests(id),
    rater_id   INTEGER NOT NULL REFERENCES users(id),
    rated_id   INTEGER NOT NULL REFERENCES users(id),
    rating     INTEGER NOT NULL CHECK (rating BETWEEN 1 AND 5),
    comment    TEXT    NOT NULL DEFAULT '',
    created_at TEXT    NOT NULL
);

CREATE TABLE IF NOT EXISTS user_stats (
    user_id            INTEGER PRIMARY KEY REFERENCES users(id),
    level              INTEGER NOT NULL DEFAULT 1 CHECK (level >= 1),
    experience         INTEGER NOT NULL DEFAULT 0 CHECK (experience >= 0),
    completed_requests INTEGER NOT NULL DEFAULT 0,
    created_requests   INTEGER NOT NULL DEFAULT 0
);

CREATE TABLE IF NOT EXISTS achievements (
    id          TEXT    PRIMARY KEY,
    title       TEXT    NOT NULL,
    description TEXT    NOT NULL,
    metric      TEXT    NOT NULL,
    target      INTEGER NOT NULL CHECK (target > 0),
    exp_reward  INTEGER NOT NULL CHECK (exp_reward >= 0)
);

CREATE TABLE IF NOT EXISTS user_achievements (
    user_id        INTEGER NOT NULL REFERENCES users(id),
    achievement_id TEXT    NOT NULL REFERENCES achievements(id),
    progress       INTEGER NOT NULL DEFAULT 0,
    unlocked       INTEGER NOT NULL DEFAULT 0,
    unlocked_at    TEXT,
    PRIMARY KEY (user_id, achievement_id)
);

CREATE TABLE IF NOT EXISTS notifications (
    id             TEXT    PRIMARY KEY,
    user_id        INTEGER NOT NULL REFERENCES users(id),
    kind           TEXT    NOT NULL,
    title          TEXT    NOT NULL,
    message        TEXT    NOT NULL,
    request_id     INTEGER,
    achievement_id TEXT,
    is_read        INTEGER NOT NULL DEFAULT 0,
    created_at     TEXT    NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_notifications_user ON notifications(user_id, is_read);
"#;

/// (id, name, description, icon, color)
const CATEGORIES: &[(i64, &str, &str, &str, &str)] = &[
    (1, "Shopping", "Groceries, pharmacy and other errands", "cart", "#4CAF50"),
    (2, "Transport", "Rides and help getting somewhere", "car", "#2196F3"),
    (3, "Household", "Repairs, cleaning and heavy lifting", "home", "#FF9800"),
    (4, "Medical", "Appointments and care assistance", "heart", "#F44336"),
    (5, "Tech help", "Phones, computers and online services", "laptop", "#9C27B0"),
    (6, "Other", "Anything that does not fit elsewhere", "dots", "#607D8B"),
];

#[derive(Clone)]
pub struct Database {
    conn: Arc<Mutex<Connection>>,
}

impl Database {
    pub fn open(path: &str) -> Result<Self, AppError> {
        let conn = Connection::open(path)?;
        conn.execute_batch("PRAGMA journal_mode = WAL;")?;
        info!("Opened database at {}", path);

        Self::init(conn)
    }

    pub fn open_in_memory() -> Result<Self, AppError> {
        Self::init(Connection::open_in_memory()?)
    }

    fn init(conn: Connection) -> Result<Self, AppError> {
        conn.execute_batch("PRAGMA foreign_keys = ON;")?;
        conn.execute_batch(SCHEMA)?;
        seed(&conn)?;

        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// Runs `f` against the connection on the blocking pool.
    pub async fn call<F, T>(&self, f: F) -> Result<T, AppError>
    where
        F: FnOnce(&mut Connection) -> Result<T, AppError> + Send + 'static,
        T: Send + 'static,
    {
        let conn = self.conn.clone();

        tokio::task::spawn_blocking(move || {
            // A panicking query must not lock everyone else out
            let mut conn = conn.lock().unwrap_or_else(PoisonError::into_inner);
            f(&mut conn)
        })
        .await
        .map_err(|e| AppError::Internal(format!("database task failed: {e}")))?
    }
}

fn seed(conn: &Connection) -> Result<(), AppError> {
    let mut category = conn.prepare(
        "INSERT OR IGNORE INTO categories (id, name, description, icon, color)
         VALUES (?1, ?2, ?3, ?4, ?5)",
    )?;
    for (id, name, description, icon, color) in CATEGORIES {
        category.execute(params![id, name, description, icon, color])?;
    }

    let mut achievement = conn.prepare(
        "INSERT OR IGNORE INTO achievements (id, title, description, metric, target, exp_reward)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
    )?;
    for def in CATALOG {
        achievement.execute(params![
            def.id,
            def.title,
            def.description,
            def.metric,
            def.target,
            def.exp_reward
        ])?;
    }

    Ok(())
}

/// True for UNIQUE/CHECK/FOREIGN KEY failures.
pub(crate) fn is_constraint_violation(error: &rusqlite::Error) -> bool {
    matches!(
        error,
        rusqlite::Error::SqliteFailure(e, _) if e.code == ErrorCode::ConstraintViolation
    )
}
