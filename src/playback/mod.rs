//! Playback pipeline: buffering, state, supervision, sessions

pub mod buffer;
pub mod session;
pub mod state;
pub mod supervisor;

pub use buffer::{BufferQueue, PushOutcome};
pub use session::PlayerSession;
pub use state::{PlaybackState, RenderGate, StateMachine};
pub use supervisor::{ReconnectPolicy, StallMonitor, StallTick};
