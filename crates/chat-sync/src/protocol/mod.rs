//! Protocol-level utilities for the conversation event stream.

pub mod constants;
pub mod sse;

pub use constants::*;
pub use sse::{SseFrame, SseParser};
