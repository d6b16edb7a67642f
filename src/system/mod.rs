//! # System Interaction Layer
//!
//! The boundary between the resolver and the operating system.
//!
//! - **`executor`**: spawns the commands of an execution plan, polls each
//!   environment's cancellation token while they run, and reports how the
//!   environment ended.

pub mod executor;
