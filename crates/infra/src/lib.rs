//! Infrastructure for the ledger: event store, command pipeline, posting
//! engine, configuration and disposable read models.

pub mod command_dispatcher;
pub mod config;
pub mod event_store;
pub mod ledger_engine;
pub mod projections;
pub mod read_model;
pub mod workers;


pub use config::{ConfigError, LedgerConfig, PostingCodes};
pub use ledger_engine::{EngineError, LedgerEngine, LedgerSnapshot, NewAccount, NewJournalEntry};
