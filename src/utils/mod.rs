pub mod retry;

pub use retry::{Backoff, RestartDecision, RestartPolicy};
