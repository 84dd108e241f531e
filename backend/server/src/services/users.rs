use chrono::Utc;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::{
    auth::{Principal, TelegramLogin, TokenIssuer, TokenPair, TokenType},
    config::Config,
    database::{
        Database,
        users::{ProfileEdit, TelegramIdentity},
    },
    error::AppError,
    models::{Role, User, UserId},
    utils::check_optional,
};

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Session {
    pub user: User,
    #[serde(flatten)]
    pub tokens: TokenPair,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateProfile {
    pub phone: Option<String>,
    pub address: Option<String>,
    pub about: Option<String>,
}

#[derive(Clone)]
pub struct UserService {
    db: Database,
    tokens: TokenIssuer,
    bot_token: Option<String>,
    allow_unverified_login: bool,
    admin_telegram_ids: Vec<String>,
}

impl UserService {
    pub fn new(db: Database, tokens: TokenIssuer, config: &Config) -> Self {
        Self {
            db,
            tokens,
            bot_token: config.telegram_bot_token.clone(),
            allow_unverified_login: config.allow_unverified_login,
            admin_telegram_ids: config.admin_telegram_ids.clone(),
        }
    }

    fn check_login(&self, login: &TelegramLogin) -> Result<(), AppError> {
        match self.bot_token.as_deref() {
            Some(bot_token) => login.verify(bot_token, Utc::now().timestamp()),
            None if self.allow_unverified_login => {
                warn!(telegram_id = login.id, "Accepting unverified Telegram login");
                Ok(())
            }
            None => Err(AppError::Unauthorized(
                "telegram login is not configured".into(),
            )),
        }
    }

    pub async fn telegram_login(&self, login: TelegramLogin) -> Result<Session, AppError> {
        self.check_login(&login)?;

        let telegram_id = login.id.to_string();
        let promote_to = self
            .admin_telegram_ids
            .contains(&telegram_id)
            .then_some(Role::Admin);

        let user = self
            .db
            .upsert_user(TelegramIdentity {
                telegram_id,
                username: login.username.unwrap_or_default(),
                first_name: login.first_name,
                last_name: login.last_name.unwrap_or_default(),
                photo_url: login.photo_url.unwrap_or_default(),
                promote_to,
            })
            .await?;

        info!(user_id = user.id, role = %user.role, "User logged in");

        self.session(user)
    }

    /// Reloads the user so role changes since the last login take effect.
    pub async fn refresh(&self, refresh_token: &str) -> Result<Session, AppError> {
        let claims = self.tokens.verify(refresh_token, TokenType::Refresh)?;
        let user = self.db.get_user(claims.user_id).await.map_err(|e| match e {
            AppError::NotFound(_) => AppError::Unauthorized("user no longer exists".into()),
            other => other,
        })?;

        self.session(user)
    }

    fn session(&self, user: User) -> Result<Session, AppError> {
        let tokens = self.tokens.issue(user.id, user.role)?;
        Ok(Session { user, tokens })
    }

    pub async fn get(&self, user_id: UserId) -> Result<User, AppError> {
        self.db.get_user(user_id).await
    }

    pub async fn update_profile(
        &self,
        actor: &Principal,
        input: UpdateProfile,
    ) -> Result<User, AppError> {
        let edit = ProfileEdit {
            phone: check_optional("phone", input.phone, 0, 32)?,
            address: check_optional("address", input.address, 0, 255)?,
            about: check_optional("about", input.about, 0, 1000)?,
        };

        self.db.update_profile(actor.user_id, edit).await
    }

    /// Plain users become volunteers, anyone else keeps their role. Returns
    /// fresh tokens since the role lives in the access token.
    pub async fn become_volunteer(&self, actor: &Principal) -> Result<Session, AppError> {
        let user = self.db.get_user(actor.user_id).await?;

        let user = if user.role == Role::User {
            info!(user_id = user.id, "User signed up as volunteer");
            self.db.set_role(user.id, Role::Volunteer).await?
        } else {
            user
        };

        self.session(user)
    }

    pub async fn set_role(
        &self,
        actor: &Principal,
        user_id: UserId,
        role: Role,
    ) -> Result<User, AppError> {
        actor.require_admin()?;

        let user = self.db.set_role(user_id, role).await?;
        info!(user_id, role = %role, by = actor.user_id, "Role changed");

        Ok(user)
    }
}
