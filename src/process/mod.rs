//! Per-process metadata (start time, load, command line) for saved windows.

mod collector;

pub use collector::{
    ProcessInfo, ProcessInfoCollector, ProcessQuery, ProcessQueryError, PsQuery, QueryOutput,
    parse_process_listing,
};
