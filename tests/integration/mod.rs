//! Integration test modules for Astrid
//!
//! - scheduling: Event sets and the mix as seen from the audio callback
//! - feed: Wire frames to scheduled events
//! - looping: Loop retrigger through the delivery loop
//! - renderer: End-to-end with sockets, the buffer bus and the voice counter

pub mod feed;
pub mod looping;
pub mod renderer;
pub mod scheduling;
