pub mod processor;
pub mod sse;

pub use processor::{LineOutcome, MessagesStreamProcessor};
