pub mod player;
pub mod recorder;

pub use player::{Player, PlayerHandle};
pub use recorder::{Recorder, RecorderHandle};
