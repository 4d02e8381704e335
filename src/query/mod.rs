//! Query module
//!
//! Read-only views over the movement log: balances over time, period totals,
//! audit trails, session status and the dashboard. Nothing here writes.

mod service;

pub use service::{
    AuditEntry, AuditTrail, Dashboard, KindTotal, MovementPage, PeriodTotals, QueryService, RegisterBalance,
    SessionStatus, VaultBalance, DEFAULT_PAGE_SIZE, MAX_PAGE_SIZE,
};
