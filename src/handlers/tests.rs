//! Handler tests over the in-memory store

use std::sync::Arc;

use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use uuid::Uuid;

use crate::aggregate::{RegisterState, Session, SessionState, Vault};
use crate::config::LedgerSettings;
use crate::domain::{
    fold_balance, Amount, DenominationBreakdown, DomainError, ErrorClass, HolderRef, Money, MovementKind,
    OperationContext, ReconciliationKind, VarianceStatus,
};
use crate::error::AppError;
use crate::handlers::{
    AdminHandler, AllocateCommand, AllocationHandler, BeginCountCommand, CloseSessionCommand,
    CreateRegisterCommand, MovementHandler, OpenSessionCommand, ProvisionVaultCommand, RecordMovementCommand,
    ReturnToVaultCommand, SessionHandler, SpotCheckCommand, TransferCommand,
};
use crate::ledger::{LedgerStore, MemoryLedgerStore, MovementFilter};

fn money(units: i64) -> Money {
    Money::from_units(units).unwrap()
}

fn amount(units: i64) -> Amount {
    Amount::from_units(units).unwrap()
}

/// Breakdown of a whole amount in the default banknotes and coins
fn cash(units: i64) -> DenominationBreakdown {
    let mut rest = units;
    let mut pairs = Vec::new();
    for face in [200, 100, 50, 20, 10, 5, 2, 1] {
        let count = rest / face;
        if count > 0 {
            pairs.push((Decimal::from(face), count as u32));
            rest -= count * face;
        }
    }
    DenominationBreakdown::from_pairs(pairs)
}

struct Ledger {
    store: Arc<dyn LedgerStore>,
    settings: Arc<LedgerSettings>,
    ctx: OperationContext,
}

impl Ledger {
    fn new() -> Self {
        Self {
            store: Arc::new(MemoryLedgerStore::new()),
            settings: Arc::new(LedgerSettings::default()),
            ctx: OperationContext::for_actor(Uuid::new_v4()),
        }
    }

    fn admin(&self) -> AdminHandler {
        AdminHandler::new(self.store.clone(), self.settings.clone())
    }

    fn sessions(&self) -> SessionHandler {
        SessionHandler::new(self.store.clone(), self.settings.clone())
    }

    fn movements(&self) -> MovementHandler {
        MovementHandler::new(self.store.clone(), self.settings.clone())
    }

    fn allocations(&self) -> AllocationHandler {
        AllocationHandler::new(self.store.clone(), self.settings.clone())
    }

    async fn vault(&self, initial: i64, per_limit: i64, total_limit: i64) -> Vault {
        let command = ProvisionVaultCommand {
            code: format!("BOV-{}", Uuid::new_v4().simple()),
            name: "Main vault".to_string(),
            initial_balance: money(initial),
            per_allocation_limit: money(per_limit),
            total_allocations_limit: money(total_limit),
        };
        self.admin().provision_vault(command, None, &self.ctx).await.unwrap().vault
    }

    async fn register(&self) -> Uuid {
        let command = CreateRegisterCommand::new(format!("CAJA-{}", Uuid::new_v4().simple()), "Front desk");
        self.admin().create_register(command, None, &self.ctx).await.unwrap().id
    }

    async fn open(&self, register_id: Uuid, opening: i64) -> Session {
        let command = OpenSessionCommand::new(register_id, money(opening), cash(opening));
        self.sessions().open(command, None, &self.ctx).await.unwrap().session
    }

    async fn income(&self, session_id: Uuid, units: i64) -> Result<crate::domain::Movement, AppError> {
        let command = RecordMovementCommand::new(
            HolderRef::session(session_id),
            MovementKind::Income,
            amount(units),
            "Interest collected",
        );
        self.movements().record(command, None, &self.ctx).await
    }

    async fn allocate(&self, vault_id: Uuid, session_id: Uuid, units: i64) -> Result<crate::handlers::LinkedMovements, AppError> {
        let command = AllocateCommand {
            vault_id,
            session_id,
            amount: amount(units),
            concept: None,
        };
        self.allocations().allocate(command, None, &self.ctx).await
    }

    async fn stored_vault(&self, id: Uuid) -> Vault {
        self.store.vault(id).await.unwrap().unwrap()
    }

    async fn stored_session(&self, id: Uuid) -> Session {
        self.store.session(id).await.unwrap().unwrap()
    }

    async fn history(&self, holder: HolderRef) -> Vec<crate::domain::Movement> {
        self.store.movements(holder, &MovementFilter::all()).await.unwrap()
    }
}

fn domain_err(err: AppError) -> DomainError {
    match err {
        AppError::Domain(e) => e,
        other => panic!("expected domain error, got {:?}", other),
    }
}

// =========================================================================
// Session lifecycle
// =========================================================================

#[tokio::test]
async fn test_open_writes_opening_movement_and_count() {
    let ledger = Ledger::new();
    let register_id = ledger.register().await;

    let result = ledger
        .sessions()
        .open(OpenSessionCommand::new(register_id, money(200), cash(200)), None, &ledger.ctx)
        .await
        .unwrap();

    assert_eq!(result.session.sequence_number, 1);
    assert_eq!(result.session.current_balance, money(200));
    assert_eq!(result.opening_movement.kind, MovementKind::Opening);
    assert_eq!(result.opening_movement.balance_before, Money::ZERO);
    assert_eq!(result.opening_movement.balance_after, money(200));
    assert_eq!(result.reconciliation.kind, ReconciliationKind::Opening);
    assert_eq!(result.reconciliation.variance, Decimal::ZERO);

    let register = ledger.store.register(register_id).await.unwrap().unwrap();
    assert_eq!(register.state, RegisterState::Open);
    assert_eq!(register.current_session_id, Some(result.session.id));
    assert_eq!(register.current_responsible, ledger.ctx.actor_id);
}

#[tokio::test]
async fn test_open_rejects_mismatched_breakdown() {
    let ledger = Ledger::new();
    let register_id = ledger.register().await;

    // 200 stated, 199 counted
    let breakdown = DenominationBreakdown::from_pairs([(dec!(100), 1), (dec!(50), 1), (dec!(20), 2), (dec!(5), 1), (dec!(2), 2)]);
    let err = ledger
        .sessions()
        .open(OpenSessionCommand::new(register_id, money(200), breakdown), None, &ledger.ctx)
        .await
        .unwrap_err();

    assert!(matches!(domain_err(err), DomainError::DenominationMismatch { .. }));
    assert!(ledger.store.sessions_for_register(register_id).await.unwrap().is_empty());
    let register = ledger.store.register(register_id).await.unwrap().unwrap();
    assert_eq!(register.state, RegisterState::Closed);
}

#[tokio::test]
async fn test_open_rejects_unknown_denomination() {
    let ledger = Ledger::new();
    let register_id = ledger.register().await;

    let breakdown = DenominationBreakdown::from_pairs([(dec!(3), 1)]);
    let err = ledger
        .sessions()
        .open(OpenSessionCommand::new(register_id, money(3), breakdown), None, &ledger.ctx)
        .await
        .unwrap_err();

    assert_eq!(domain_err(err), DomainError::UnknownDenomination(dec!(3)));
}

#[tokio::test]
async fn test_concurrent_opens_exactly_one_wins() {
    let ledger = Ledger::new();
    let register_id = ledger.register().await;

    let mut tasks = Vec::new();
    for _ in 0..2 {
        let handler = ledger.sessions();
        let ctx = ledger.ctx.clone();
        tasks.push(tokio::spawn(async move {
            handler
                .open(OpenSessionCommand::new(register_id, money(100), cash(100)), None, &ctx)
                .await
        }));
    }

    let mut opened = 0;
    let mut refused = 0;
    for task in tasks {
        match task.await.unwrap() {
            Ok(_) => opened += 1,
            Err(e) => {
                assert_eq!(domain_err(e), DomainError::SessionAlreadyOpen { register_id });
                refused += 1;
            }
        }
    }

    assert_eq!((opened, refused), (1, 1));
    let sessions = ledger.store.sessions_for_register(register_id).await.unwrap();
    assert_eq!(sessions.len(), 1);
    assert_eq!(sessions[0].state, SessionState::Open);
}

#[tokio::test]
async fn test_close_records_variance_without_blocking() {
    let ledger = Ledger::new();
    let register_id = ledger.register().await;
    let session = ledger.open(register_id, 500).await;

    let result = ledger
        .sessions()
        .close(CloseSessionCommand::new(session.id, money(480), cash(480)), None, &ledger.ctx)
        .await
        .unwrap();

    assert_eq!(result.reconciliation.kind, ReconciliationKind::Closing);
    assert_eq!(result.reconciliation.system_amount, money(500));
    assert_eq!(result.reconciliation.variance, dec!(-20));
    assert_eq!(result.reconciliation.status, VarianceStatus::Short);
    assert!(result.requires_review);
    assert_eq!(result.session.state, SessionState::Closed);
    assert_eq!(result.session.closing_amount, Some(money(480)));
    assert_eq!(result.register.state, RegisterState::Closed);
    assert_eq!(result.register.current_responsible, None);

    let closings: Vec<_> = ledger
        .store
        .reconciliations_for_session(session.id)
        .await
        .unwrap()
        .into_iter()
        .filter(|r| r.kind == ReconciliationKind::Closing)
        .collect();
    assert_eq!(closings.len(), 1);
}

#[tokio::test]
async fn test_small_variance_is_not_flagged() {
    let ledger = Ledger::new();
    let register_id = ledger.register().await;
    let session = ledger.open(register_id, 500).await;

    let result = ledger
        .sessions()
        .close(CloseSessionCommand::new(session.id, money(505), cash(505)), None, &ledger.ctx)
        .await
        .unwrap();

    assert_eq!(result.reconciliation.status, VarianceStatus::Over);
    assert!(!result.requires_review);
}

#[tokio::test]
async fn test_close_twice_fails() {
    let ledger = Ledger::new();
    let register_id = ledger.register().await;
    let session = ledger.open(register_id, 100).await;

    let close = CloseSessionCommand::new(session.id, money(100), cash(100));
    ledger.sessions().close(close.clone(), None, &ledger.ctx).await.unwrap();
    let err = ledger.sessions().close(close, None, &ledger.ctx).await.unwrap_err();

    assert_eq!(domain_err(err), DomainError::SessionAlreadyClosed(session.id));
}

#[tokio::test]
async fn test_session_numbers_increase_per_register() {
    let ledger = Ledger::new();
    let register_id = ledger.register().await;

    let first = ledger.open(register_id, 0).await;
    ledger
        .sessions()
        .close(CloseSessionCommand::new(first.id, Money::ZERO, DenominationBreakdown::empty()), None, &ledger.ctx)
        .await
        .unwrap();
    let second = ledger.open(register_id, 50).await;

    assert_eq!(first.sequence_number, 1);
    assert_eq!(second.sequence_number, 2);
}

#[tokio::test]
async fn test_count_holds_movements_until_spot_check() {
    let ledger = Ledger::new();
    let register_id = ledger.register().await;
    let session = ledger.open(register_id, 100).await;

    let register = ledger
        .sessions()
        .begin_count(BeginCountCommand { session_id: session.id }, None, &ledger.ctx)
        .await
        .unwrap();
    assert_eq!(register.state, RegisterState::Reconciling);

    let err = ledger.income(session.id, 10).await.unwrap_err();
    assert_eq!(domain_err(err), DomainError::RegisterBusy(register_id));

    let spot = SpotCheckCommand {
        session_id: session.id,
        counted_amount: money(100),
        denomination_breakdown: cash(100),
        notes: Some("mid-shift count".to_string()),
    };
    let count = ledger.sessions().spot_check(spot, None, &ledger.ctx).await.unwrap();
    assert_eq!(count.kind, ReconciliationKind::SpotCheck);
    assert_eq!(count.status, VarianceStatus::Balanced);

    assert!(ledger.income(session.id, 10).await.is_ok());
    assert_eq!(ledger.stored_session(session.id).await.state, SessionState::Open);
}

#[tokio::test]
async fn test_mutations_require_actor() {
    let ledger = Ledger::new();
    let register_id = ledger.register().await;

    let err = ledger
        .sessions()
        .open(OpenSessionCommand::new(register_id, money(10), cash(10)), None, &OperationContext::new())
        .await
        .unwrap_err();
    assert_eq!(domain_err(err), DomainError::MissingActor);
}

// =========================================================================
// Movements
// =========================================================================

#[tokio::test]
async fn test_record_chains_balances() {
    let ledger = Ledger::new();
    let register_id = ledger.register().await;
    let session = ledger.open(register_id, 200).await;

    let income = ledger.income(session.id, 50).await.unwrap();
    assert_eq!(income.balance_before, money(200));
    assert_eq!(income.balance_after, money(250));

    let expense = ledger
        .movements()
        .record(
            RecordMovementCommand::new(HolderRef::session(session.id), MovementKind::Expense, amount(30), "Loan disbursement")
                .with_external_reference("LOAN-0042"),
            None,
            &ledger.ctx,
        )
        .await
        .unwrap();
    assert_eq!(expense.balance_before, money(250));
    assert_eq!(expense.balance_after, money(220));
    assert_eq!(expense.external_reference.as_deref(), Some("LOAN-0042"));

    let stored = ledger.stored_session(session.id).await;
    assert_eq!(stored.current_balance, money(220));
    assert_eq!(stored.running_income_total, money(50));
    assert_eq!(stored.running_expense_total, money(30));
    assert_eq!(stored.movement_count, 3);
}

#[tokio::test]
async fn test_expense_cannot_overdraw_session() {
    let ledger = Ledger::new();
    let register_id = ledger.register().await;
    let session = ledger.open(register_id, 100).await;

    let err = ledger
        .movements()
        .record(
            RecordMovementCommand::new(HolderRef::session(session.id), MovementKind::Expense, amount(150), "Payout"),
            None,
            &ledger.ctx,
        )
        .await
        .unwrap_err();

    assert!(matches!(domain_err(err), DomainError::InsufficientBalance { .. }));
    assert_eq!(ledger.history(HolderRef::session(session.id)).await.len(), 1);
}

#[tokio::test]
async fn test_record_against_closed_session_fails() {
    let ledger = Ledger::new();
    let register_id = ledger.register().await;
    let session = ledger.open(register_id, 100).await;
    ledger
        .sessions()
        .close(CloseSessionCommand::new(session.id, money(100), cash(100)), None, &ledger.ctx)
        .await
        .unwrap();

    let err = ledger.income(session.id, 10).await.unwrap_err();
    assert_eq!(domain_err(err), DomainError::HolderClosed(session.id));
}

#[tokio::test]
async fn test_record_unknown_holder() {
    let ledger = Ledger::new();
    let err = ledger.income(Uuid::new_v4(), 10).await.unwrap_err();
    assert!(matches!(domain_err(err), DomainError::HolderNotFound(_)));
}

#[tokio::test]
async fn test_internal_kinds_are_not_recordable() {
    let ledger = Ledger::new();
    let vault = ledger.vault(1000, 500, 800).await;

    for kind in [MovementKind::Opening, MovementKind::AllocationOut, MovementKind::TransferIn] {
        let err = ledger
            .movements()
            .record(
                RecordMovementCommand::new(HolderRef::vault(vault.id), kind, amount(10), "manual"),
                None,
                &ledger.ctx,
            )
            .await
            .unwrap_err();
        assert!(matches!(domain_err(err), DomainError::InvalidMovementKind { .. }));
    }
}

#[tokio::test]
async fn test_vault_deposit_raises_total_and_available() {
    let ledger = Ledger::new();
    let vault = ledger.vault(1000, 500, 800).await;

    ledger
        .movements()
        .record(
            RecordMovementCommand::new(HolderRef::vault(vault.id), MovementKind::Income, amount(250), "Bank withdrawal"),
            None,
            &ledger.ctx,
        )
        .await
        .unwrap();

    let stored = ledger.stored_vault(vault.id).await;
    assert_eq!(stored.total_balance, money(1250));
    assert_eq!(stored.available_balance, money(1250));
    assert_eq!(stored.allocated_balance, Money::ZERO);
}

#[tokio::test]
async fn test_concurrent_records_never_share_balance_before() {
    let ledger = Ledger::new();
    let register_id = ledger.register().await;
    let session = ledger.open(register_id, 100).await;

    let mut tasks = Vec::new();
    for _ in 0..10 {
        let handler = ledger.movements();
        let ctx = ledger.ctx.clone();
        let session_id = session.id;
        tasks.push(tokio::spawn(async move {
            handler
                .record(
                    RecordMovementCommand::new(HolderRef::session(session_id), MovementKind::Income, amount(10), "Payment"),
                    None,
                    &ctx,
                )
                .await
        }));
    }
    for task in tasks {
        task.await.unwrap().unwrap();
    }

    let history = ledger.history(HolderRef::session(session.id)).await;
    assert_eq!(history.len(), 11);
    for pair in history.windows(2) {
        assert_eq!(pair[0].balance_after, pair[1].balance_before);
    }
    assert_eq!(ledger.stored_session(session.id).await.current_balance, money(200));
    assert_eq!(fold_balance(&history).unwrap(), money(200));
}

// =========================================================================
// Allocations and transfers
// =========================================================================

#[tokio::test]
async fn test_allocation_moves_cash_to_session() {
    let ledger = Ledger::new();
    let vault = ledger.vault(10000, 5000, 8000).await;
    let register_id = ledger.register().await;
    let session = ledger.open(register_id, 0).await;

    let linked = ledger.allocate(vault.id, session.id, 3000).await.unwrap();

    let stored = ledger.stored_vault(vault.id).await;
    assert_eq!(stored.total_balance, money(10000));
    assert_eq!(stored.available_balance, money(7000));
    assert_eq!(stored.allocated_balance, money(3000));
    assert_eq!(ledger.stored_session(session.id).await.current_balance, money(3000));

    assert_eq!(linked.source.kind, MovementKind::AllocationOut);
    assert_eq!(linked.destination.kind, MovementKind::AllocationIn);
    assert_eq!(linked.source.linked_movement_id, Some(linked.link_id));
    assert_eq!(linked.destination.linked_movement_id, Some(linked.link_id));
    assert_eq!(linked.source.amount, linked.destination.amount);

    let pair = ledger.store.linked_movements(linked.link_id).await.unwrap();
    assert_eq!(pair.len(), 2);
}

#[tokio::test]
async fn test_allocation_adds_to_opening_float() {
    let ledger = Ledger::new();
    let vault = ledger.vault(10000, 5000, 8000).await;
    let register_id = ledger.register().await;
    let session = ledger.open(register_id, 200).await;

    ledger.allocate(vault.id, session.id, 3000).await.unwrap();
    assert_eq!(ledger.stored_session(session.id).await.current_balance, money(3200));
}

#[tokio::test]
async fn test_allocation_beyond_available_leaves_no_trace() {
    let ledger = Ledger::new();
    let vault = ledger.vault(5000, 10000, 10000).await;
    let register_id = ledger.register().await;
    let session = ledger.open(register_id, 0).await;

    let err = ledger.allocate(vault.id, session.id, 6000).await.unwrap_err();
    assert!(matches!(domain_err(err), DomainError::InsufficientAvailableBalance { .. }));

    let stored = ledger.stored_vault(vault.id).await;
    assert_eq!(stored.available_balance, money(5000));
    assert_eq!(stored.allocated_balance, Money::ZERO);
    assert_eq!(ledger.stored_session(session.id).await.current_balance, Money::ZERO);
    assert_eq!(ledger.history(HolderRef::vault(vault.id)).await.len(), 1);
    assert_eq!(ledger.history(HolderRef::session(session.id)).await.len(), 1);
}

#[tokio::test]
async fn test_allocation_limits() {
    let ledger = Ledger::new();
    let vault = ledger.vault(10000, 2000, 3000).await;
    let register_id = ledger.register().await;
    let session = ledger.open(register_id, 0).await;

    let err = ledger.allocate(vault.id, session.id, 2500).await.unwrap_err();
    let err = domain_err(err);
    assert!(matches!(err, DomainError::AllocationLimitExceeded { .. }));
    assert!(err.to_string().contains("exceeds per-allocation limit of 2000"));

    ledger.allocate(vault.id, session.id, 2000).await.unwrap();
    let err = ledger.allocate(vault.id, session.id, 1500).await.unwrap_err();
    assert!(matches!(domain_err(err), DomainError::TotalAllocationLimitExceeded { .. }));
}

#[tokio::test]
async fn test_allocation_to_closed_session() {
    let ledger = Ledger::new();
    let vault = ledger.vault(10000, 5000, 8000).await;
    let register_id = ledger.register().await;
    let session = ledger.open(register_id, 0).await;
    ledger
        .sessions()
        .close(CloseSessionCommand::new(session.id, Money::ZERO, DenominationBreakdown::empty()), None, &ledger.ctx)
        .await
        .unwrap();

    let err = ledger.allocate(vault.id, session.id, 100).await.unwrap_err();
    assert_eq!(domain_err(err), DomainError::DestinationNotOpen(session.id));
}

#[tokio::test]
async fn test_return_to_vault_restores_available() {
    let ledger = Ledger::new();
    let vault = ledger.vault(10000, 5000, 8000).await;
    let register_id = ledger.register().await;
    let session = ledger.open(register_id, 0).await;
    ledger.allocate(vault.id, session.id, 3000).await.unwrap();

    let command = ReturnToVaultCommand {
        session_id: session.id,
        vault_id: vault.id,
        amount: amount(1000),
        concept: Some("Excess cash".to_string()),
    };
    let linked = ledger.allocations().return_to_vault(command, None, &ledger.ctx).await.unwrap();
    assert_eq!(linked.source.holder, HolderRef::session(session.id));
    assert_eq!(linked.destination.holder, HolderRef::vault(vault.id));

    let stored = ledger.stored_vault(vault.id).await;
    assert_eq!(stored.total_balance, money(10000));
    assert_eq!(stored.available_balance, money(8000));
    assert_eq!(stored.allocated_balance, money(2000));
    assert_eq!(ledger.stored_session(session.id).await.current_balance, money(2000));
}

#[tokio::test]
async fn test_return_cannot_exceed_session_balance() {
    let ledger = Ledger::new();
    let vault = ledger.vault(10000, 5000, 8000).await;
    let register_id = ledger.register().await;
    let session = ledger.open(register_id, 0).await;
    ledger.allocate(vault.id, session.id, 500).await.unwrap();

    let command = ReturnToVaultCommand {
        session_id: session.id,
        vault_id: vault.id,
        amount: amount(600),
        concept: None,
    };
    let err = ledger.allocations().return_to_vault(command, None, &ledger.ctx).await.unwrap_err();
    assert!(matches!(domain_err(err), DomainError::InsufficientBalance { .. }));
    assert_eq!(ledger.stored_vault(vault.id).await.allocated_balance, money(500));
}

#[tokio::test]
async fn test_transfer_between_sessions() {
    let ledger = Ledger::new();
    let first = ledger.open(ledger.register().await, 300).await;
    let second = ledger.open(ledger.register().await, 100).await;

    let command = TransferCommand {
        from_session_id: first.id,
        to_session_id: second.id,
        amount: amount(120),
        concept: None,
    };
    let linked = ledger.allocations().transfer(command, None, &ledger.ctx).await.unwrap();
    assert_eq!(linked.source.kind, MovementKind::TransferOut);
    assert_eq!(linked.destination.kind, MovementKind::TransferIn);

    assert_eq!(ledger.stored_session(first.id).await.current_balance, money(180));
    assert_eq!(ledger.stored_session(second.id).await.current_balance, money(220));
}

#[tokio::test]
async fn test_transfer_rejections() {
    let ledger = Ledger::new();
    let open = ledger.open(ledger.register().await, 300).await;
    let closed = ledger.open(ledger.register().await, 0).await;
    ledger
        .sessions()
        .close(CloseSessionCommand::new(closed.id, Money::ZERO, DenominationBreakdown::empty()), None, &ledger.ctx)
        .await
        .unwrap();

    let same = TransferCommand {
        from_session_id: open.id,
        to_session_id: open.id,
        amount: amount(10),
        concept: None,
    };
    let err = ledger.allocations().transfer(same, None, &ledger.ctx).await.unwrap_err();
    assert_eq!(domain_err(err), DomainError::SameSessionTransfer);

    let to_closed = TransferCommand {
        from_session_id: open.id,
        to_session_id: closed.id,
        amount: amount(10),
        concept: None,
    };
    let err = ledger.allocations().transfer(to_closed, None, &ledger.ctx).await.unwrap_err();
    assert_eq!(domain_err(err), DomainError::DestinationNotOpen(closed.id));
    assert_eq!(ledger.stored_session(open.id).await.current_balance, money(300));
}

// =========================================================================
// Idempotency
// =========================================================================

#[tokio::test]
async fn test_idempotent_record_is_written_once() {
    let ledger = Ledger::new();
    let register_id = ledger.register().await;
    let session = ledger.open(register_id, 100).await;
    let command = RecordMovementCommand::new(HolderRef::session(session.id), MovementKind::Income, amount(25), "Payment");

    let first = ledger.movements().record(command.clone(), Some("pay-1"), &ledger.ctx).await.unwrap();
    let again = ledger.movements().record(command, Some("pay-1"), &ledger.ctx).await.unwrap();

    assert_eq!(first.id, again.id);
    assert_eq!(ledger.history(HolderRef::session(session.id)).await.len(), 2);
    assert_eq!(ledger.stored_session(session.id).await.current_balance, money(125));
}

#[tokio::test]
async fn test_idempotency_key_reuse_with_different_request() {
    let ledger = Ledger::new();
    let register_id = ledger.register().await;
    let session = ledger.open(register_id, 100).await;

    let command = RecordMovementCommand::new(HolderRef::session(session.id), MovementKind::Income, amount(25), "Payment");
    ledger.movements().record(command, Some("pay-2"), &ledger.ctx).await.unwrap();

    let different = RecordMovementCommand::new(HolderRef::session(session.id), MovementKind::Income, amount(30), "Payment");
    let err = ledger.movements().record(different, Some("pay-2"), &ledger.ctx).await.unwrap_err();
    assert!(matches!(err, AppError::IdempotencyConflict(ref key) if key == "pay-2"));
}

// =========================================================================
// Administration
// =========================================================================

#[tokio::test]
async fn test_duplicate_register_code() {
    let ledger = Ledger::new();
    let command = CreateRegisterCommand::new("CAJA-07", "Back office").with_location("Branch 3");
    ledger.admin().create_register(command.clone(), None, &ledger.ctx).await.unwrap();

    let err = ledger.admin().create_register(command, None, &ledger.ctx).await.unwrap_err();
    assert_eq!(domain_err(err), DomainError::DuplicateRegisterCode("CAJA-07".to_string()));
}

#[tokio::test]
async fn test_duplicate_vault_code() {
    let ledger = Ledger::new();
    let command = || ProvisionVaultCommand {
        code: "BOV-1".to_string(),
        name: "Main vault".to_string(),
        initial_balance: money(1000),
        per_allocation_limit: money(500),
        total_allocations_limit: money(800),
    };
    ledger.admin().provision_vault(command(), None, &ledger.ctx).await.unwrap();

    let err = ledger.admin().provision_vault(command(), None, &ledger.ctx).await.unwrap_err();
    assert!(!err.is_retryable());
    let err = domain_err(err);
    assert_eq!(err, DomainError::DuplicateVaultCode("BOV-1".to_string()));
    assert_eq!(err.class(), ErrorClass::State);

    let vaults = ledger.store.vaults().await.unwrap();
    assert_eq!(vaults.len(), 1);
    assert_eq!(vaults[0].total_balance, money(1000));
}

#[tokio::test]
async fn test_block_and_deactivate_rules() {
    let ledger = Ledger::new();
    let register_id = ledger.register().await;
    let session = ledger.open(register_id, 0).await;

    let err = ledger.admin().block_register(register_id, None, &ledger.ctx).await.unwrap_err();
    assert_eq!(domain_err(err), DomainError::RegisterHasOpenSession(register_id));
    let err = ledger.admin().set_register_active(register_id, false, None, &ledger.ctx).await.unwrap_err();
    assert_eq!(domain_err(err), DomainError::RegisterHasOpenSession(register_id));

    ledger
        .sessions()
        .close(CloseSessionCommand::new(session.id, Money::ZERO, DenominationBreakdown::empty()), None, &ledger.ctx)
        .await
        .unwrap();

    let blocked = ledger.admin().block_register(register_id, None, &ledger.ctx).await.unwrap();
    assert_eq!(blocked.state, RegisterState::Blocked);
    let err = ledger
        .sessions()
        .open(OpenSessionCommand::new(register_id, Money::ZERO, DenominationBreakdown::empty()), None, &ledger.ctx)
        .await
        .unwrap_err();
    assert_eq!(domain_err(err), DomainError::RegisterBlocked(register_id));

    ledger.admin().unblock_register(register_id, None, &ledger.ctx).await.unwrap();
    let inactive = ledger.admin().set_register_active(register_id, false, None, &ledger.ctx).await.unwrap();
    assert!(!inactive.active);
    let err = ledger
        .sessions()
        .open(OpenSessionCommand::new(register_id, Money::ZERO, DenominationBreakdown::empty()), None, &ledger.ctx)
        .await
        .unwrap_err();
    assert_eq!(domain_err(err), DomainError::RegisterInactive(register_id));
}

#[tokio::test]
async fn test_vault_invariant_after_activity() {
    let ledger = Ledger::new();
    let vault = ledger.vault(10000, 5000, 8000).await;
    let register_id = ledger.register().await;
    let session = ledger.open(register_id, 0).await;
    ledger.allocate(vault.id, session.id, 4000).await.unwrap();
    ledger
        .allocations()
        .return_to_vault(
            ReturnToVaultCommand {
                session_id: session.id,
                vault_id: vault.id,
                amount: amount(1500),
                concept: None,
            },
            None,
            &ledger.ctx,
        )
        .await
        .unwrap();

    let report = ledger.admin().verify_invariant(vault.id).await.unwrap();
    assert_eq!(report.total_balance, money(10000));
    assert_eq!(report.available_balance, money(7500));
    assert_eq!(report.allocated_balance, money(2500));
    assert_eq!(report.movements_replayed, 3);
}

// =========================================================================
// Properties
// =========================================================================

mod properties {
    use super::*;
    use proptest::prelude::*;
    use rust_decimal::prelude::ToPrimitive;

    #[derive(Debug, Clone)]
    enum Step {
        Allocate(i64),
        Return(i64),
    }

    fn step() -> impl Strategy<Value = Step> {
        prop_oneof![
            (1i64..3000).prop_map(Step::Allocate),
            (1i64..3000).prop_map(Step::Return),
        ]
    }

    proptest! {
        #![proptest_config(ProptestConfig {
            cases: 32,
            ..ProptestConfig::default()
        })]

        /// Allocations and returns up to the outstanding allocation never
        /// change the vault total.
        #[test]
        fn vault_total_is_conserved(steps in prop::collection::vec(step(), 1..12)) {
            tokio_test::block_on(async {
                let ledger = Ledger::new();
                let vault = ledger.vault(10000, 4000, 9000).await;
                let register_id = ledger.register().await;
                let session = ledger.open(register_id, 0).await;

                for step in steps {
                    match step {
                        Step::Allocate(units) => {
                            // Limit errors are expected; they must leave nothing behind.
                            let _ = ledger.allocate(vault.id, session.id, units).await;
                        }
                        Step::Return(units) => {
                            let outstanding = ledger.stored_vault(vault.id).await.allocated_balance;
                            let units = units.min(outstanding.value().trunc().to_i64().unwrap_or(0));
                            if units == 0 {
                                continue;
                            }
                            ledger
                                .allocations()
                                .return_to_vault(
                                    ReturnToVaultCommand {
                                        session_id: session.id,
                                        vault_id: vault.id,
                                        amount: amount(units),
                                        concept: None,
                                    },
                                    None,
                                    &ledger.ctx,
                                )
                                .await
                                .unwrap();
                        }
                    }

                    let stored = ledger.stored_vault(vault.id).await;
                    assert_eq!(stored.total_balance, money(10000));
                    assert!(stored.check_invariant().is_ok());
                    assert_eq!(
                        ledger.stored_session(session.id).await.current_balance,
                        stored.allocated_balance
                    );
                }

                assert!(ledger.admin().verify_invariant(vault.id).await.is_ok());
            });
        }

        /// The cached session balance always equals the fold of its history.
        #[test]
        fn session_balance_is_fold_of_history(
            flows in prop::collection::vec((any::<bool>(), 1i64..500), 1..20)
        ) {
            tokio_test::block_on(async {
                let ledger = Ledger::new();
                let register_id = ledger.register().await;
                let session = ledger.open(register_id, 300).await;

                for (is_income, units) in flows {
                    let kind = if is_income { MovementKind::Income } else { MovementKind::Expense };
                    let command = RecordMovementCommand::new(HolderRef::session(session.id), kind, amount(units), "flow");
                    // Overdrafts are refused and write nothing.
                    let _ = ledger.movements().record(command, None, &ledger.ctx).await;
                }

                let history = ledger.history(HolderRef::session(session.id)).await;
                let stored = ledger.stored_session(session.id).await;
                assert_eq!(fold_balance(&history).unwrap(), stored.current_balance);
                assert!(stored.check_invariant().is_ok());
                assert_eq!(stored.movement_count as usize, history.len());
            });
        }
    }
}
