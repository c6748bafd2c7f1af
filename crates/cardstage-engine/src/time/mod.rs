//! Frame timing.
//!
//! - one `FrameClock` per window, ticked once per redraw
//! - `Interval` fires at a fixed period of accumulated frame time (stats logging)

mod frame_clock;

pub use frame_clock::{FrameClock, FrameTime, Interval};
