//! Artifact model shared with the UI layer

use crate::utils::error::ErrorResponse;
use crate::utils::format::{format_duration, format_size};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Lifecycle of an artifact
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ArtifactStatus {
    Uploading,
    Processing,
    Ready,
    Failed,
}

impl ArtifactStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, ArtifactStatus::Ready | ArtifactStatus::Failed)
    }
}

/// What the controller knows about a recording when it hands it over
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArtifactMeta {
    pub recording_id: Uuid,
    pub name: String,
    pub participants_count: usize,
}

/// Server-side representation of a recording
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Artifact {
    pub id: Uuid,
    pub recording_id: Uuid,
    pub name: String,
    pub created_at: DateTime<Utc>,
    pub duration_seconds: u64,
    pub size_bytes: u64,
    pub participants_count: usize,
    pub status: ArtifactStatus,

    /// Completion of the current stage, 0..=100
    pub progress_percent: u8,

    /// Completion across both stages; never decreases
    pub overall_percent: u8,

    pub chunks_acknowledged: u64,

    /// Set once the artifact failed
    pub error: Option<ErrorResponse>,
}

impl Artifact {
    pub fn new(id: Uuid, meta: &ArtifactMeta) -> Self {
        Self {
            id,
            recording_id: meta.recording_id,
            name: meta.name.clone(),
            created_at: Utc::now(),
            duration_seconds: 0,
            size_bytes: 0,
            participants_count: meta.participants_count,
            status: ArtifactStatus::Uploading,
            progress_percent: 0,
            overall_percent: 0,
            chunks_acknowledged: 0,
            error: None,
        }
    }

    /// "1:23:45" / "45:23"
    pub fn duration_label(&self) -> String {
        format_duration(self.duration_seconds)
    }

    /// "2.1 GB"
    pub fn size_label(&self) -> String {
        format_size(self.size_bytes)
    }

    /// Set stage progress; ignores anything that would move backwards
    pub(crate) fn advance(&mut self, stage_percent: u8) {
        let stage_percent = stage_percent.min(100);
        if stage_percent > self.progress_percent {
            self.progress_percent = stage_percent;
        }
        let overall = match self.status {
            ArtifactStatus::Uploading => self.progress_percent / 2,
            ArtifactStatus::Processing => 50 + self.progress_percent / 2,
            ArtifactStatus::Ready => 100,
            ArtifactStatus::Failed => self.overall_percent,
        };
        self.overall_percent = self.overall_percent.max(overall);
    }

    /// Enter a new stage; stage progress restarts, overall progress does not
    pub(crate) fn enter(&mut self, status: ArtifactStatus) {
        self.status = status;
        match status {
            ArtifactStatus::Failed => {}
            ArtifactStatus::Ready => {
                self.progress_percent = 100;
                self.overall_percent = 100;
            }
            _ => {
                self.progress_percent = 0;
                self.advance(0);
            }
        }
    }
}

/// Pipeline notifications
#[derive(Debug, Clone, PartialEq)]
pub enum ArtifactEvent {
    /// First chunk was acknowledged; the artifact is now listed
    Created(Artifact),
    Updated(Artifact),
    Ready(Artifact),
    Failed(Artifact),
}

impl ArtifactEvent {
    pub fn artifact(&self) -> &Artifact {
        match self {
            ArtifactEvent::Created(a)
            | ArtifactEvent::Updated(a)
            | ArtifactEvent::Ready(a)
            | ArtifactEvent::Failed(a) => a,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn artifact() -> Artifact {
        Artifact::new(
            Uuid::new_v4(),
            &ArtifactMeta {
                recording_id: Uuid::new_v4(),
                name: "Team Meeting #1".into(),
                participants_count: 2,
            },
        )
    }

    #[test]
    fn test_stage_progress_never_decreases() {
        let mut a = artifact();
        a.advance(60);
        a.advance(40);
        assert_eq!(a.progress_percent, 60);
        assert_eq!(a.overall_percent, 30);
    }

    #[test]
    fn test_overall_survives_stage_change() {
        let mut a = artifact();
        a.advance(100);
        assert_eq!(a.overall_percent, 50);

        a.enter(ArtifactStatus::Processing);
        assert_eq!(a.progress_percent, 0);
        assert_eq!(a.overall_percent, 50);

        a.advance(50);
        assert_eq!(a.overall_percent, 75);

        a.enter(ArtifactStatus::Ready);
        assert_eq!((a.progress_percent, a.overall_percent), (100, 100));
    }

    #[test]
    fn test_failed_keeps_partial_progress() {
        let mut a = artifact();
        a.advance(80);
        a.enter(ArtifactStatus::Failed);
        assert_eq!(a.progress_percent, 80);
        assert_eq!(a.overall_percent, 40);
    }

    #[test]
    fn test_serializes_camel_case() {
        let json = serde_json::to_value(artifact()).unwrap();
        assert_eq!(json["status"], "uploading");
        assert_eq!(json["participantsCount"], 2);
        assert!(json.get("progressPercent").is_some());
    }
}
