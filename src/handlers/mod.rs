//! Command Handlers module
//!
//! Handlers that orchestrate ledger operations. Each operation runs in one
//! store transaction that locks the holders it touches, writes the movements
//! and cached balances together, and commits or leaves nothing behind.

mod admin_handler;
mod allocation_handler;
mod commands;
mod movement_handler;
mod session_handler;
mod unit_of_work;

#[cfg(test)]
mod tests;

pub use admin_handler::AdminHandler;
pub use allocation_handler::AllocationHandler;
pub use commands::*;
pub use movement_handler::MovementHandler;
pub use session_handler::SessionHandler;
pub use unit_of_work::MAX_ATTEMPTS;
