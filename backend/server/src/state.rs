use std::sync::Arc;

use chrono::Duration;

use super::{
    auth::TokenIssuer,
    config::Config,
    database::Database,
    outbox::TaskSink,
    services::{game::GameService, requests::RequestService, users::UserService},
};

pub struct AppState {
    pub config: Config,
    pub tokens: TokenIssuer,
    pub users: UserService,
    pub requests: RequestService,
    pub game: GameService,
}

impl AppState {
    pub fn new(config: Config, database: Database, outbox: Arc<dyn TaskSink>) -> Arc<Self> {
        let tokens = TokenIssuer::new(
            &config.jwt_secret,
            Duration::hours(config.jwt_expiry_hours),
            Duration::days(config.refresh_expiry_days),
        );

        let users = UserService::new(database.clone(), tokens.clone(), &config);
        let requests = RequestService::new(database.clone(), outbox.clone());
        let game = GameService::new(database, outbox);

        Arc::new(Self {
            config,
            tokens,
            users,
            requests,
            game,
        })
    }
}

#[cfg(test)]
pub mod testing {
    use super::*;
    use crate::outbox::testing::RecordingOutbox;

    /// In-memory database, recording outbox.
    pub fn test_state() -> (Arc<AppState>, Arc<RecordingOutbox>) {
        let outbox = Arc::new(RecordingOutbox::default());
        let database = Database::open_in_memory().unwrap();
        let state = AppState::new(Config::for_tests(), database, outbox.clone());
        (state, outbox)
    }
}
