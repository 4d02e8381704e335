//! Register Aggregate
//!
//! A physical cash point (caja). Registers never hold a balance themselves;
//! cash lives in the session currently open on the register.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

use crate::domain::DomainError;

/// Register state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RegisterState {
    Closed,
    Open,
    /// A count is in progress; cash operations are held off
    Reconciling,
    Blocked,
}

impl RegisterState {
    pub fn as_str(&self) -> &'static str {
        match self {
            RegisterState::Closed => "closed",
            RegisterState::Open => "open",
            RegisterState::Reconciling => "reconciling",
            RegisterState::Blocked => "blocked",
        }
    }
}

impl Default for RegisterState {
    fn default() -> Self {
        Self::Closed
    }
}

impl fmt::Display for RegisterState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RegisterState {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "closed" => Ok(RegisterState::Closed),
            "open" => Ok(RegisterState::Open),
            "reconciling" => Ok(RegisterState::Reconciling),
            "blocked" => Ok(RegisterState::Blocked),
            other => Err(format!("unknown register state: {}", other)),
        }
    }
}

/// Register Aggregate
///
/// `current_session_id` is set exactly when the state is `Open` or
/// `Reconciling`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Register {
    pub id: Uuid,
    pub code: String,
    pub name: String,
    pub location: Option<String>,
    pub active: bool,
    pub state: RegisterState,
    pub current_responsible: Option<Uuid>,
    pub current_session_id: Option<Uuid>,
    pub last_opened_at: Option<DateTime<Utc>>,
    pub last_closed_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Register {
    pub fn create(
        id: Uuid,
        code: impl Into<String>,
        name: impl Into<String>,
        location: Option<String>,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id,
            code: code.into(),
            name: name.into(),
            location,
            active: true,
            state: RegisterState::Closed,
            current_responsible: None,
            current_session_id: None,
            last_opened_at: None,
            last_closed_at: None,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn has_open_session(&self) -> bool {
        matches!(self.state, RegisterState::Open | RegisterState::Reconciling)
    }

    // =========================================================================
    // Session lifecycle
    // =========================================================================

    pub fn ensure_can_open(&self) -> Result<(), DomainError> {
        if !self.active {
            return Err(DomainError::RegisterInactive(self.id));
        }
        match self.state {
            RegisterState::Closed => Ok(()),
            RegisterState::Blocked => Err(DomainError::RegisterBlocked(self.id)),
            RegisterState::Open | RegisterState::Reconciling => {
                Err(DomainError::SessionAlreadyOpen { register_id: self.id })
            }
        }
    }

    /// Cash operations need an open register that is not being counted
    pub fn ensure_operable(&self) -> Result<(), DomainError> {
        match self.state {
            RegisterState::Open => Ok(()),
            RegisterState::Reconciling => Err(DomainError::RegisterBusy(self.id)),
            RegisterState::Blocked => Err(DomainError::RegisterBlocked(self.id)),
            RegisterState::Closed => Err(DomainError::InvalidTransition(format!(
                "register {} has no open session",
                self.id
            ))),
        }
    }

    pub fn mark_opened(&mut self, session_id: Uuid, operator: Uuid, now: DateTime<Utc>) -> Result<(), DomainError> {
        self.ensure_can_open()?;
        self.state = RegisterState::Open;
        self.current_session_id = Some(session_id);
        self.current_responsible = Some(operator);
        self.last_opened_at = Some(now);
        self.updated_at = now;
        Ok(())
    }

    /// Close from `Open` or `Reconciling`
    pub fn mark_closed(&mut self, now: DateTime<Utc>) -> Result<(), DomainError> {
        if !self.has_open_session() {
            return Err(DomainError::InvalidTransition(format!(
                "register {} is {}, cannot close",
                self.id, self.state
            )));
        }
        self.state = RegisterState::Closed;
        self.current_session_id = None;
        self.current_responsible = None;
        self.last_closed_at = Some(now);
        self.updated_at = now;
        Ok(())
    }

    /// Enter the counting state ahead of a close
    pub fn begin_count(&mut self, now: DateTime<Utc>) -> Result<(), DomainError> {
        match self.state {
            RegisterState::Open => {
                self.state = RegisterState::Reconciling;
                self.updated_at = now;
                Ok(())
            }
            RegisterState::Reconciling => Err(DomainError::RegisterBusy(self.id)),
            other => Err(DomainError::InvalidTransition(format!(
                "register {} is {}, cannot start a count",
                self.id, other
            ))),
        }
    }

    /// Leave the counting state after a spot check. No-op when not counting.
    pub fn end_count(&mut self, now: DateTime<Utc>) {
        if self.state == RegisterState::Reconciling {
            self.state = RegisterState::Open;
            self.updated_at = now;
        }
    }

    // =========================================================================
    // Administration
    // =========================================================================

    pub fn set_active(&mut self, active: bool, now: DateTime<Utc>) -> Result<(), DomainError> {
        if !active && self.has_open_session() {
            return Err(DomainError::RegisterHasOpenSession(self.id));
        }
        self.active = active;
        self.updated_at = now;
        Ok(())
    }

    pub fn block(&mut self, now: DateTime<Utc>) -> Result<(), DomainError> {
        match self.state {
            RegisterState::Closed => {
                self.state = RegisterState::Blocked;
                self.updated_at = now;
                Ok(())
            }
            RegisterState::Blocked => Err(DomainError::InvalidTransition(format!(
                "register {} is already blocked",
                self.id
            ))),
            RegisterState::Open | RegisterState::Reconciling => Err(DomainError::RegisterHasOpenSession(self.id)),
        }
    }

    pub fn unblock(&mut self, now: DateTime<Utc>) -> Result<(), DomainError> {
        if self.state != RegisterState::Blocked {
            return Err(DomainError::InvalidTransition(format!(
                "register {} is {}, not blocked",
                self.id, self.state
            )));
        }
        self.state = RegisterState::Closed;
        self.updated_at = now;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn register() -> Register {
        Register::create(Uuid::new_v4(), "CAJA-01", "Front desk", None, Utc::now())
    }

    #[test]
    fn test_open_close_cycle() {
        let mut reg = register();
        let session_id = Uuid::new_v4();
        let operator = Uuid::new_v4();

        reg.mark_opened(session_id, operator, Utc::now()).unwrap();
        assert_eq!(reg.state, RegisterState::Open);
        assert_eq!(reg.current_session_id, Some(session_id));
        assert_eq!(reg.current_responsible, Some(operator));

        assert_eq!(
            reg.ensure_can_open(),
            Err(DomainError::SessionAlreadyOpen { register_id: reg.id })
        );

        reg.mark_closed(Utc::now()).unwrap();
        assert_eq!(reg.state, RegisterState::Closed);
        assert!(reg.current_session_id.is_none());
        assert!(reg.last_closed_at.is_some());
    }

    #[test]
    fn test_counting_holds_operations() {
        let mut reg = register();
        reg.mark_opened(Uuid::new_v4(), Uuid::new_v4(), Utc::now()).unwrap();
        reg.begin_count(Utc::now()).unwrap();

        assert_eq!(reg.ensure_operable(), Err(DomainError::RegisterBusy(reg.id)));
        assert_eq!(reg.begin_count(Utc::now()), Err(DomainError::RegisterBusy(reg.id)));

        reg.mark_closed(Utc::now()).unwrap();
        assert_eq!(reg.state, RegisterState::Closed);
    }

    #[test]
    fn test_spot_check_ends_count() {
        let mut reg = register();
        reg.mark_opened(Uuid::new_v4(), Uuid::new_v4(), Utc::now()).unwrap();
        reg.begin_count(Utc::now()).unwrap();

        reg.end_count(Utc::now());
        assert_eq!(reg.state, RegisterState::Open);
        assert!(reg.ensure_operable().is_ok());
    }

    #[test]
    fn test_blocked_register_cannot_open() {
        let mut reg = register();
        reg.block(Utc::now()).unwrap();
        assert_eq!(reg.ensure_can_open(), Err(DomainError::RegisterBlocked(reg.id)));
        reg.unblock(Utc::now()).unwrap();
        assert!(reg.ensure_can_open().is_ok());
    }

    #[test]
    fn test_admin_forbidden_while_open() {
        let mut reg = register();
        reg.mark_opened(Uuid::new_v4(), Uuid::new_v4(), Utc::now()).unwrap();
        assert_eq!(reg.block(Utc::now()), Err(DomainError::RegisterHasOpenSession(reg.id)));
        assert_eq!(
            reg.set_active(false, Utc::now()),
            Err(DomainError::RegisterHasOpenSession(reg.id))
        );
    }

    #[test]
    fn test_inactive_register_cannot_open() {
        let mut reg = register();
        reg.set_active(false, Utc::now()).unwrap();
        assert_eq!(reg.ensure_can_open(), Err(DomainError::RegisterInactive(reg.id)));
    }
}
