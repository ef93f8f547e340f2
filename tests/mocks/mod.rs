//! Mock implementations of the chat and the video engine
//!
//! Both record what the code under test asked of them, so tests can assert on
//! messages and files without network access or a yt-dlp binary.

pub mod recording_sink;
pub mod scripted_engine;

#[allow(unused_imports)]
pub use recording_sink::{RecordingSink, SinkCall};
#[allow(unused_imports)]
pub use scripted_engine::ScriptedEngine;
