use chrono::Utc;
use rusqlite::{Connection, OptionalExtension, Row, params};

use super::Database;
use crate::{
    error::AppError,
    models::{Role, User, UserId},
};

const USER_COLUMNS: &str = "id, telegram_id, username, first_name, last_name, photo_url, \
                            phone, address, about, role, created_at, updated_at";

pub(crate) fn user_from_row(row: &Row<'_>) -> rusqlite::Result<User> {
    Ok(User {
        id: row.get(0)?,
        telegram_id: row.get(1)?,
        username: row.get(2)?,
        first_name: row.get(3)?,
        last_name: row.get(4)?,
        photo_url: row.get(5)?,
        phone: row.get(6)?,
        address: row.get(7)?,
        about: row.get(8)?,
        role: row.get(9)?,
        created_at: row.get(10)?,
        updated_at: row.get(11)?,
    })
}

pub(crate) fn load_user(conn: &Connection, user_id: UserId) -> Result<User, AppError> {
    conn.query_row(
        &format!("SELECT {USER_COLUMNS} FROM users WHERE id = ?1"),
        [user_id],
        user_from_row,
    )
    .optional()?
    .ok_or(AppError::NotFound("user"))
}

/// Identity fields Telegram hands us on every login.
#[derive(Clone, Debug)]
pub struct TelegramIdentity {
    pub telegram_id: String,
    pub username: String,
    pub first_name: String,
    pub last_name: String,
    pub photo_url: String,
    /// Forces this role on login, used for configured admins.
    pub promote_to: Option<Role>,
}

#[derive(Clone, Debug, Default)]
pub struct ProfileEdit {
    pub phone: Option<String>,
    pub address: Option<String>,
    pub about: Option<String>,
}

impl Database {
    /// Creates the user on first login, refreshes Telegram fields afterwards.
    /// The game profile row is created alongside.
    pub async fn upsert_user(&self, identity: TelegramIdentity) -> Result<User, AppError> {
        self.call(move |conn| {
            let now = Utc::now();
            let tx = conn.transaction()?;

            tx.execute(
                "INSERT INTO users (telegram_id, username, first_name, last_name, photo_url, role, created_at, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?7)
                 ON CONFLICT(telegram_id) DO UPDATE SET
                     username   = excluded.username,
                     first_name = excluded.first_name,
                     last_name  = excluded.last_name,
                     photo_url  = excluded.photo_url,
                     updated_at = excluded.updated_at",
                params![
                    identity.telegram_id,
                    identity.username,
                    identity.first_name,
                    identity.last_name,
                    identity.photo_url,
                    identity.promote_to.unwrap_or(Role::User),
                    now
                ],
            )?;

            let user_id: UserId = tx.query_row(
                "SELECT id FROM users WHERE telegram_id = ?1",
                [&identity.telegram_id],
                |row| row.get(0),
            )?;

            if let Some(role) = identity.promote_to {
                tx.execute(
                    "UPDATE users SET role = ?1 WHERE id = ?2",
                    params![role, user_id],
                )?;
            }

            tx.execute(
                "INSERT OR IGNORE INTO user_stats (user_id) VALUES (?1)",
                [user_id],
            )?;

            let user = load_user(&tx, user_id)?;
            tx.commit()?;

            Ok(user)
        })
        .await
    }

    pub async fn get_user(&self, user_id: UserId) -> Result<User, AppError> {
        self.call(move |conn| load_user(conn, user_id)).await
    }

    pub async fn update_profile(&self, user_id: UserId, edit: ProfileEdit) -> Result<User, AppError> {
        self.call(move |conn| {
            let changed = conn.execute(
                "UPDATE users SET
                     phone      = COALESCE(?1, phone),
                     address    = COALESCE(?2, address),
                     about      = COALESCE(?3, about),
                     updated_at = ?4
                 WHERE id = ?5",
                params![edit.phone, edit.address, edit.about, Utc::now(), user_id],
            )?;
            if changed == 0 {
                return Err(AppError::NotFound("user"));
            }

            load_user(conn, user_id)
        })
        .await
    }

    pub async fn set_role(&self, user_id: UserId, role: Role) -> Result<User, AppError> {
        self.call(move |conn| {
            let changed = conn.execute(
                "UPDATE users SET role = ?1, updated_at = ?2 WHERE id = ?3",
                params![role, Utc::now(), user_id],
            )?;
            if changed == 0 {
                return Err(AppError::NotFound("user"));
            }

            load_user(conn, user_id)
        })
        .await
    }
}
