//! Durable-delivery primitives shared by any component that dispatches
//! work through the external job queue: backoff scheduling, the egress
//! job envelope, and dead-letter bookkeeping.

pub mod dlq;
pub mod retry;
