//! Idempotency module
//!
//! Prevents duplicate request processing using idempotency keys.

mod record;

pub use record::{compute_request_hash, IdempotencyError, IdempotencyRecord, IdempotentRequest};
