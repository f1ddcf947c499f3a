//! Session lifecycle
//!
//! The controller is the single control surface the UI talks to; the
//! snapshot is what it renders.

pub mod controller;
pub mod roster;
pub mod snapshot;

pub use controller::{RecordingToggle, SessionController, SessionError, SessionResult};
pub use roster::{Participant, RemoteStream, RemoteTrack, Roster, MAX_PARTICIPANTS};
pub use snapshot::SessionSnapshot;
