//! Replays JSON book scripts through the ledger engine.

pub mod replay;
pub mod script;

pub use replay::{Book, BookReport, replay};
pub use script::{ReportRequest, Script, ScriptLine, Step};
