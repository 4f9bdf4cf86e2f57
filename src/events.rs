//! Changes observed while folding player state.
//!
//! [`Snapshot::apply`](crate::player::Snapshot::apply) reports which
//! semantic changes an incoming player state caused, so that a UI can react
//! to transitions instead of diffing snapshots itself.
//!
//! # Example
//!
//! ```rust
//! use tunebridge::events::Event;
//!
//! fn handle_event(event: Event) {
//!     match event {
//!         Event::Play => println!("Playback started"),
//!         Event::TrackChanged => println!("New track playing"),
//!         _ => {}
//!     }
//! }
//! ```

/// Semantic change in the player snapshot.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum Event {
    /// Playback has started or resumed.
    Play,

    /// Playback has paused.
    Pause,

    /// A different track is current.
    TrackChanged,

    /// The shuffle flag flipped.
    ShuffleChanged,

    /// The repeat mode changed.
    RepeatChanged,

    /// The player finished loading and accepts commands.
    Ready,

    /// The player started loading and does not accept commands.
    Loading,
}
