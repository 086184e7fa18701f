use serde::{Deserialize, Serialize};

/// One candidate from the external catalog. The embedding is optional: an
/// activity that arrives without one is still rankable, at neutral score.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Activity {
    pub id: i64,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub embedding: Option<Vec<f64>>,
}

impl Activity {
    pub fn has_embedding(&self) -> bool {
        self.embedding.as_ref().is_some_and(|e| !e.is_empty())
    }
}

/// The pair currently presented to the user. Slots are drawn from the pool,
/// never synthesized; both empty (or right empty) signals "cannot duel".
#[derive(Debug, Clone, Default, Serialize)]
pub struct DuelState {
    pub left: Option<Activity>,
    pub right: Option<Activity>,
}

impl DuelState {
    pub fn is_ready(&self) -> bool {
        self.left.is_some() && self.right.is_some()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WinnerSide {
    Left,
    Right,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionPhase {
    AwaitingChoice,
    CannotDuel,
}

/// Per-category tag selection as the caller assembles it: four single-select
/// categories plus multi-select moods.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SelectedTags {
    pub weather: Option<String>,
    pub time: Option<String>,
    pub season: Option<String>,
    pub intensity: Option<String>,
    #[serde(default)]
    pub mood: Vec<String>,
}

impl SelectedTags {
    pub fn flatten(&self) -> Vec<String> {
        let mut tags = Vec::new();
        for single in [&self.weather, &self.time, &self.season, &self.intensity] {
            if let Some(tag) = single {
                tags.push(tag.clone());
            }
        }
        tags.extend(self.mood.iter().cloned());
        tags
    }

    pub fn count(&self) -> usize {
        self.flatten().len()
    }
}

/// Read-only view of a session returned to the caller after every operation.
#[derive(Debug, Clone, Serialize)]
pub struct SessionSnapshot {
    pub session_id: String,
    pub phase: SessionPhase,
    pub left: Option<Activity>,
    pub right: Option<Activity>,
    pub pool_size: usize,
    pub refill_in_flight: bool,
}
