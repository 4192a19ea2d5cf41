//! Line-oriented terminal client for Tandem.
//!
//! A thin shell over [`tandem_app::AppHandle`]: input lines become intents,
//! snapshot changes and notifications become output lines. All orchestration
//! lives in the generic [`tandem_app::Runtime`].

#![forbid(unsafe_code)]
#![deny(missing_docs)]

pub mod commands;
pub mod render;

pub use commands::{Command, CommandError, HELP};
