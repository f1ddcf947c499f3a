//! Participant roster
//!
//! The local participant joins as host; remote participants arrive through
//! the media transport extension point.

use crate::capture::{TrackKind, TrackSelection};
use serde::{Deserialize, Serialize};

/// Participants a room can hold, the local one included
pub const MAX_PARTICIPANTS: usize = 8;

pub const LOCAL_PARTICIPANT_ID: &str = "local";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Participant {
    pub id: String,
    pub name: String,
    pub is_host: bool,
    pub is_local: bool,
    pub video_enabled: bool,
    pub audio_enabled: bool,
}

/// One track of a remote participant's media
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteTrack {
    pub kind: TrackKind,
    pub enabled: bool,
}

/// What the transport knows about a remote participant's media
///
/// An empty track list means the participant left.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RemoteStream {
    pub display_name: Option<String>,
    pub tracks: Vec<RemoteTrack>,
}

impl RemoteStream {
    fn enabled(&self, kind: TrackKind) -> bool {
        self.tracks.iter().any(|t| t.kind == kind && t.enabled)
    }
}

#[derive(Debug, Clone, Default)]
pub struct Roster {
    participants: Vec<Participant>,
}

fn local_enabled(selection: &[TrackSelection], kind: TrackKind) -> bool {
    selection
        .iter()
        .any(|s| s.kind == kind && s.device_id.is_some() && s.enabled)
}

impl Roster {
    pub fn participants(&self) -> Vec<Participant> {
        self.participants.clone()
    }

    pub fn len(&self) -> usize {
        self.participants.len()
    }

    pub fn is_empty(&self) -> bool {
        self.participants.is_empty()
    }

    pub fn get(&self, id: &str) -> Option<&Participant> {
        self.participants.iter().find(|p| p.id == id)
    }

    /// Add (or refresh) the local participant, always first in the list
    pub fn join_local(&mut self, name: &str, selection: &[TrackSelection]) {
        self.participants.retain(|p| !p.is_local);
        self.participants.insert(
            0,
            Participant {
                id: LOCAL_PARTICIPANT_ID.to_string(),
                name: name.to_string(),
                is_host: true,
                is_local: true,
                video_enabled: local_enabled(selection, TrackKind::Video),
                audio_enabled: local_enabled(selection, TrackKind::Audio),
            },
        );
    }

    /// Mirror the local track selection
    pub fn sync_local(&mut self, selection: &[TrackSelection]) {
        if let Some(local) = self.participants.iter_mut().find(|p| p.is_local) {
            local.video_enabled = local_enabled(selection, TrackKind::Video);
            local.audio_enabled = local_enabled(selection, TrackKind::Audio);
        }
    }

    pub fn clear(&mut self) {
        self.participants.clear();
    }

    /// Apply a remote stream update
    ///
    /// Returns false when a new participant would exceed
    /// [`MAX_PARTICIPANTS`].
    pub fn apply_remote(&mut self, participant_id: &str, stream: &RemoteStream) -> bool {
        if stream.tracks.is_empty() {
            self.participants.retain(|p| p.is_local || p.id != participant_id);
            return true;
        }

        let video_enabled = stream.enabled(TrackKind::Video);
        let audio_enabled = stream.enabled(TrackKind::Audio);

        if let Some(existing) = self
            .participants
            .iter_mut()
            .find(|p| !p.is_local && p.id == participant_id)
        {
            if let Some(name) = &stream.display_name {
                existing.name = name.clone();
            }
            existing.video_enabled = video_enabled;
            existing.audio_enabled = audio_enabled;
            return true;
        }

        if self.participants.len() >= MAX_PARTICIPANTS {
            return false;
        }
        self.participants.push(Participant {
            id: participant_id.to_string(),
            name: stream
                .display_name
                .clone()
                .unwrap_or_else(|| participant_id.to_string()),
            is_host: false,
            is_local: false,
            video_enabled,
            audio_enabled,
        });
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn stream(name: &str, video: bool) -> RemoteStream {
        RemoteStream {
            display_name: Some(name.to_string()),
            tracks: vec![
                RemoteTrack {
                    kind: TrackKind::Video,
                    enabled: video,
                },
                RemoteTrack {
                    kind: TrackKind::Audio,
                    enabled: true,
                },
            ],
        }
    }

    #[test]
    fn test_local_is_host_and_mirrors_selection() {
        let mut roster = Roster::default();
        roster.join_local(
            "You",
            &[
                TrackSelection::new(TrackKind::Video, Some("cam-1".into()), false),
                TrackSelection::new(TrackKind::Audio, Some("mic-1".into()), true),
            ],
        );

        let local = roster.get(LOCAL_PARTICIPANT_ID).unwrap();
        assert!(local.is_host);
        assert!(!local.video_enabled);
        assert!(local.audio_enabled);

        roster.sync_local(&[TrackSelection::absent(TrackKind::Audio)]);
        assert!(!roster.get(LOCAL_PARTICIPANT_ID).unwrap().audio_enabled);
    }

    #[test]
    fn test_remote_join_update_leave() {
        let mut roster = Roster::default();
        roster.join_local("You", &[]);

        assert!(roster.apply_remote("p-2", &stream("Jane Smith", false)));
        assert_eq!(roster.len(), 2);
        assert!(!roster.get("p-2").unwrap().video_enabled);

        roster.apply_remote("p-2", &stream("Jane Smith", true));
        assert_eq!(roster.len(), 2);
        assert!(roster.get("p-2").unwrap().video_enabled);

        roster.apply_remote("p-2", &RemoteStream::default());
        assert_eq!(roster.len(), 1);
    }

    #[test]
    fn test_room_is_capped() {
        let mut roster = Roster::default();
        roster.join_local("You", &[]);
        for i in 1..MAX_PARTICIPANTS {
            assert!(roster.apply_remote(&format!("p-{i}"), &stream("Guest", true)));
        }
        assert!(!roster.apply_remote("one-too-many", &stream("Guest", true)));
        assert_eq!(roster.len(), MAX_PARTICIPANTS);
    }
}
