//! Projection of remote player state onto UI-facing fields.
//!
//! The playback SDK emits a state object whenever the remote player changes:
//!
//! ```json
//! {
//!     "position": 1000,
//!     "paused": false,
//!     "shuffle": false,
//!     "repeat_mode": 0,
//!     "loading": false,
//!     "track_window": {
//!         "current_track": {
//!             "uri": "spotify:track:a",
//!             "name": "Song",
//!             "duration_ms": 5000,
//!             "artists": [{ "name": "Artist" }],
//!             "linked_from": { "uri": null }
//!         }
//!     }
//! }
//! ```
//!
//! [`Snapshot::apply`] folds such states into a [`Snapshot`]. The fold keeps
//! no state besides the snapshot itself.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_repr::{Deserialize_repr, Serialize_repr};
use serde_with::{serde_as, DurationMilliSeconds};

use crate::events::Event;

#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Hash, Deserialize_repr, Serialize_repr)]
#[repr(u8)]
pub enum RepeatMode {
    #[default]
    Off = 0,
    Context = 1,
    Track = 2,
}

#[serde_as]
#[derive(Clone, Debug, Default, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct PlayerState {
    #[serde_as(as = "DurationMilliSeconds<u64>")]
    pub position: Duration,
    pub paused: bool,
    pub shuffle: bool,
    pub repeat_mode: RepeatMode,
    pub loading: bool,
    pub track_window: TrackWindow,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct TrackWindow {
    pub current_track: Option<Track>,
}

#[serde_as]
#[derive(Clone, Debug, Default, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct Track {
    pub uri: String,
    pub name: String,
    #[serde_as(as = "DurationMilliSeconds<u64>")]
    pub duration_ms: Duration,
    pub artists: Vec<Artist>,
    pub linked_from: Option<LinkedFrom>,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct Artist {
    pub name: String,
}

/// Original track of a relinked (e.g. region-restricted) track.
#[derive(Clone, Debug, Default, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct LinkedFrom {
    pub uri: Option<String>,
}

impl Track {
    /// The URI identifying this track to the user: the one it was linked
    /// from if it was relinked, else its own.
    #[must_use]
    pub fn resolved_uri(&self) -> &str {
        self.linked_from
            .as_ref()
            .and_then(|linked| linked.uri.as_deref())
            .unwrap_or(&self.uri)
    }

    /// `"Artist - Song"`, or only the song without artists.
    #[must_use]
    pub fn display_name(&self) -> String {
        match self.artists.first() {
            Some(artist) => format!("{} - {}", artist.name, self.name),
            None => self.name.clone(),
        }
    }
}

#[serde_as]
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Snapshot {
    pub current_uri: String,
    pub current_track: String,
    #[serde_as(as = "DurationMilliSeconds<u64>")]
    pub seek: Duration,
    #[serde_as(as = "DurationMilliSeconds<u64>")]
    pub max_seek: Duration,
    pub is_playing: bool,
    pub shuffle: bool,
    pub repeat: RepeatMode,
    pub is_player_ready: bool,
    pub is_device_connected: bool,
    pub volume: f32,
}

impl Default for Snapshot {
    fn default() -> Self {
        Self {
            current_uri: String::new(),
            current_track: String::new(),
            seek: Duration::ZERO,
            max_seek: Duration::ZERO,
            is_playing: false,
            shuffle: false,
            repeat: RepeatMode::Off,
            is_player_ready: false,
            is_device_connected: false,
            volume: Self::DEFAULT_VOLUME,
        }
    }
}

impl Snapshot {
    pub const DEFAULT_VOLUME: f32 = 0.5;

    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Folds a player state into the snapshot and reports what changed.
    pub fn apply(&mut self, state: &PlayerState) -> Vec<Event> {
        let mut events = Vec::new();

        // A zero position carries no information: the SDK reports it while
        // loading as well as at the very start of a track.
        if !state.position.is_zero() {
            self.seek = state.position;
        }

        let is_playing = !state.paused;
        if self.is_playing != is_playing {
            self.is_playing = is_playing;
            events.push(if is_playing { Event::Play } else { Event::Pause });
        }

        let is_ready = !state.loading;
        if self.is_player_ready != is_ready {
            self.is_player_ready = is_ready;
            events.push(if is_ready { Event::Ready } else { Event::Loading });
        }

        if self.shuffle != state.shuffle {
            self.shuffle = state.shuffle;
            events.push(Event::ShuffleChanged);
        }

        if self.repeat != state.repeat_mode {
            self.repeat = state.repeat_mode;
            events.push(Event::RepeatChanged);
        }

        if let Some(track) = &state.track_window.current_track {
            let uri = track.resolved_uri();
            if self.current_uri != uri {
                self.current_uri = uri.to_owned();
                self.current_track = track.display_name();
                self.max_seek = track.duration_ms;
                self.seek = Duration::ZERO;
                debug!("now playing {}", self.current_track);
                events.push(Event::TrackChanged);
            }
        }

        events
    }

    /// Records the outcome of transferring playback to this device.
    pub fn device_transferred(&mut self, connected: bool) {
        self.is_device_connected = connected;
        if connected {
            self.is_player_ready = true;
        }
    }

    /// Sets the volume, clamped to `0.0..=1.0`. Non-finite values are
    /// ignored.
    pub fn set_volume(&mut self, volume: f32) {
        if volume.is_finite() {
            self.volume = volume.clamp(0.0, 1.0);
        }
    }

    pub fn reset(&mut self) {
        *self = Self::default();
    }
}
