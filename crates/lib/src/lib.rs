//! Talkform core library — form data model, spam gate, conversation engine,
//! notification dispatch, and the submission gateway used by the CLI.

pub mod config;
pub mod engine;
pub mod forms;
pub mod gateway;
pub mod notify;
pub mod spam;
pub mod store;
