//! The six end-to-end reference scenarios: one for each lifecycle path the
//! engine is responsible for (happy path, rejection, transient-retry
//! recovery, dead-letter, crash recovery, broker-enqueue failure).

pub mod broker_enqueue_failure;
pub mod crash_recovery;
pub mod dead_letter;
pub mod happy_path;
pub mod rejection;
pub mod retry_then_success;
