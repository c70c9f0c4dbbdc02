//! Message-processing runtime.
//!
//! A user turn moves through three stages, each recorded as a status
//! column on its row: transcription, reply generation and speech. The
//! [`dispatch`] module feeds rows to the stages from two triggers (poll
//! and push) over one bounded worker pool. The reply stage holds the only
//! cross-process claim; the other two rely on the in-process
//! [`in_flight`] set.
//!
//! Background loops besides dispatch: the idle [`reaper`].

pub mod context;
pub mod dispatch;
pub mod edit;
pub mod in_flight;
pub mod prompts;
pub mod reaper;
pub mod reply;
pub mod sentences;
pub mod speech;
pub mod summarize;
pub mod tier;
pub mod tools;
pub mod transcribe;
