//! Process-wide project registry.
//!
//! One `Project` per user. The map lock is only held to fetch or create the
//! per-user cell; the per-user async mutex is what a turn holds for its full
//! duration, so two concurrent messages from the same user serialize instead
//! of racing on shared project state.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;

use crate::types::{Project, UserId};

/// Shared handle to one user's project; lock it for the whole turn.
pub type ProjectCell = Arc<tokio::sync::Mutex<Project>>;

/// Keyed registry mapping a user to their project.
#[derive(Default)]
pub struct ProjectStore {
    projects: RwLock<HashMap<UserId, ProjectCell>>,
}

impl ProjectStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fetch the user's project cell, creating a fresh project on first
    /// contact.
    pub fn project(&self, user_id: UserId) -> ProjectCell {
        if let Some(cell) = self.projects.read().get(&user_id) {
            return cell.clone();
        }
        let mut projects = self.projects.write();
        projects
            .entry(user_id)
            .or_insert_with(|| Arc::new(tokio::sync::Mutex::new(Project::new(user_id))))
            .clone()
    }

    /// Replace the user's project wholesale.
    pub async fn reset(&self, user_id: UserId) {
        let cell = self.project(user_id);
        let mut project = cell.lock().await;
        *project = Project::new(user_id);
    }

    /// Whether the user has been seen before.
    pub fn contains(&self, user_id: UserId) -> bool {
        self.projects.read().contains_key(&user_id)
    }
}
