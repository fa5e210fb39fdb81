//! CLI commands

mod debug;

pub use debug::{debug, DebugArgs};
