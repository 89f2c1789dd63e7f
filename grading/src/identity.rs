//! Grader directory
//!
//! Session and account management live outside the engine; it only asks who
//! a grader is and who else may grade a topic.

use std::collections::BTreeMap;
use std::sync::{Arc, RwLock};

use serde::{Deserialize, Serialize};

use crate::state::{GraderId, TopicId};

/// Whether a grader marks papers or supervises
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GraderRole {
    Examiner,
    Leader,
}

/// What the engine needs to know about a grader
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GraderProfile {
    pub id: GraderId,
    pub name: String,
    pub subject: String,
    /// Topic the grader is seated on
    pub topic_id: Option<TopicId>,
    pub role: GraderRole,
    /// Passed calibration and may take production work
    pub qualified: bool,
    /// Practising; work is recorded but never counted
    pub in_training: bool,
}

impl GraderProfile {
    /// A qualified examiner seated on `topic_id`
    pub fn examiner(id: GraderId, topic_id: TopicId) -> Self {
        Self {
            id,
            name: format!("examiner-{}", id),
            subject: String::new(),
            topic_id: Some(topic_id),
            role: GraderRole::Examiner,
            qualified: true,
            in_training: false,
        }
    }

    pub fn leader(id: GraderId, topic_id: TopicId) -> Self {
        Self {
            name: format!("leader-{}", id),
            role: GraderRole::Leader,
            ..Self::examiner(id, topic_id)
        }
    }

    pub fn unqualified(mut self) -> Self {
        self.qualified = false;
        self
    }

    pub fn training(mut self) -> Self {
        self.in_training = true;
        self
    }

    pub fn is_leader(&self) -> bool {
        self.role == GraderRole::Leader
    }
}

/// Error type for directory lookups
#[derive(Debug, thiserror::Error)]
pub enum DirectoryError {
    #[error("Unknown grader: {0}")]
    UnknownGrader(GraderId),

    #[error("Lock poisoned")]
    LockPoisoned,

    #[error("Directory unavailable: {0}")]
    Unavailable(String),
}

/// Shared reference to a grader directory
pub type SharedDirectory = Arc<dyn GraderDirectory>;

/// Identity collaborator
pub trait GraderDirectory: Send + Sync {
    fn grader(&self, grader_id: GraderId) -> Result<GraderProfile, DirectoryError>;

    /// Qualified, non-training examiners seated on `topic_id`, ordered by id
    fn qualified_graders(&self, topic_id: TopicId) -> Result<Vec<GraderId>, DirectoryError>;
}

/// Directory held in memory
#[derive(Default)]
pub struct StaticDirectory {
    graders: RwLock<BTreeMap<GraderId, GraderProfile>>,
}

impl StaticDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_graders(graders: impl IntoIterator<Item = GraderProfile>) -> Self {
        let directory = Self::new();
        if let Ok(mut map) = directory.graders.write() {
            map.extend(graders.into_iter().map(|g| (g.id, g)));
        }
        directory
    }

    /// Insert or replace a profile
    pub fn upsert(&self, profile: GraderProfile) -> Result<(), DirectoryError> {
        let mut map = self
            .graders
            .write()
            .map_err(|_| DirectoryError::LockPoisoned)?;
        map.insert(profile.id, profile);
        Ok(())
    }

    pub fn shared(self) -> Arc<Self> {
        Arc::new(self)
    }
}

impl GraderDirectory for StaticDirectory {
    fn grader(&self, grader_id: GraderId) -> Result<GraderProfile, DirectoryError> {
        let map = self
            .graders
            .read()
            .map_err(|_| DirectoryError::LockPoisoned)?;
        map.get(&grader_id)
            .cloned()
            .ok_or(DirectoryError::UnknownGrader(grader_id))
    }

    fn qualified_graders(&self, topic_id: TopicId) -> Result<Vec<GraderId>, DirectoryError> {
        let map = self
            .graders
            .read()
            .map_err(|_| DirectoryError::LockPoisoned)?;
        Ok(map
            .values()
            .filter(|g| {
                g.topic_id == Some(topic_id)
                    && g.role == GraderRole::Examiner
                    && g.qualified
                    && !g.in_training
            })
            .map(|g| g.id)
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_qualified_graders_filter() {
        let directory = StaticDirectory::with_graders([
            GraderProfile::examiner(1, 10),
            GraderProfile::examiner(2, 10).unqualified(),
            GraderProfile::examiner(3, 10).training(),
            GraderProfile::examiner(4, 20),
            GraderProfile::leader(5, 10),
            GraderProfile::examiner(6, 10),
        ]);

        assert_eq!(directory.qualified_graders(10).unwrap(), vec![1, 6]);
    }

    #[test]
    fn test_unknown_grader() {
        let directory = StaticDirectory::new();
        assert!(matches!(
            directory.grader(9),
            Err(DirectoryError::UnknownGrader(9))
        ));

        directory.upsert(GraderProfile::leader(9, 1)).unwrap();
        assert!(directory.grader(9).unwrap().is_leader());
    }
}
