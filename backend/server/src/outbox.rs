//! # Outbox
//!
//! Side effects of request activity: experience awards, achievement progress
//! and notifications. Handlers submit [`Task`]s and return right away, a single
//! worker applies them in submission order.
//!
//! ## Failure handling
//! - A failed task is logged and dropped, the request that caused it has
//!   already succeeded
//! - Follow-ups (a level-up notification, the reward for an unlock) are
//!   submitted as new tasks, never applied inline
//!
//! Tests swap in a recording sink and drain it by hand.
use tokio::{
    sync::mpsc::{UnboundedReceiver, UnboundedSender, unbounded_channel},
    task::JoinHandle,
};
use tracing::{error, info, warn};

use crate::{
    achievements::Advance,
    models::{Metric, NotificationKind, RequestId, UserId},
    services::game::GameService,
};

/// Notification content before it gets an id and timestamp.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Notice {
    pub user_id: UserId,
    pub kind: NotificationKind,
    pub title: String,
    pub message: String,
    pub request_id: Option<RequestId>,
    pub achievement_id: Option<String>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Task {
    AwardExperience {
        user_id: UserId,
        amount: i64,
        reason: &'static str,
    },
    Track {
        user_id: UserId,
        metric: Metric,
        advance: Advance,
    },
    Notify(Notice),
}

impl Task {
    pub fn award(user_id: UserId, amount: i64, reason: &'static str) -> Self {
        Task::AwardExperience {
            user_id,
            amount,
            reason,
        }
    }

    pub fn track(user_id: UserId, metric: Metric, advance: Advance) -> Self {
        Task::Track {
            user_id,
            metric,
            advance,
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            Task::AwardExperience { .. } => "award_experience",
            Task::Track { .. } => "track_progress",
            Task::Notify(_) => "notify",
        }
    }
}

pub trait TaskSink: Send + Sync {
    fn submit(&self, task: Task);
}

pub struct ChannelOutbox {
    sender: UnboundedSender<Task>,
}

impl ChannelOutbox {
    pub fn new() -> (Self, UnboundedReceiver<Task>) {
        let (sender, receiver) = unbounded_channel();
        (Self { sender }, receiver)
    }
}

impl TaskSink for ChannelOutbox {
    fn submit(&self, task: Task) {
        if let Err(e) = self.sender.send(task) {
            warn!(task = e.0.label(), "Outbox closed, dropping task");
        }
    }
}

pub fn spawn_worker(mut receiver: UnboundedReceiver<Task>, game: GameService) -> JoinHandle<()> {
    tokio::spawn(async move {
        info!("Outbox worker started");

        while let Some(task) = receiver.recv().await {
            let label = task.label();
            if let Err(e) = game.apply(task).await {
                error!(task = label, error = %e, "Background task failed");
            }
        }

        info!("Outbox worker stopped");
    })
}

#[cfg(test)]
pub mod testing {
    use std::sync::Mutex;

    use super::*;

    #[derive(Default)]
    pub struct RecordingOutbox {
        tasks: Mutex<Vec<Task>>,
    }

    impl RecordingOutbox {
        pub fn take(&self) -> Vec<Task> {
            std::mem::take(&mut *self.tasks.lock().unwrap())
        }
    }

    impl TaskSink for RecordingOutbox {
        fn submit(&self, task: Task) {
            self.tasks.lock().unwrap().push(task);
        }
    }

    /// Applies everything submitted, including follow-ups, until quiet.
    /// Returns every task that ran.
    pub async fn drain(outbox: &RecordingOutbox, game: &GameService) -> Vec<Task> {
        let mut applied = Vec::new();

        loop {
            let batch = outbox.take();
            if batch.is_empty() {
                return applied;
            }
            for task in batch {
                game.apply(task.clone()).await.unwrap();
                applied.push(task);
            }
        }
    }
}
