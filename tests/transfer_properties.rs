//! Property tests for the conservation guarantees of the transfer paths.

mod common;

use proptest::prelude::*;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;

use binbroker_backend::error::CoreError;
use binbroker_backend::transfers::{ReceiverRef, TransferRequest};

const STARTING: Decimal = dec!(100000);

fn transfer_to(id: &str, amount: Decimal) -> TransferRequest {
    TransferRequest {
        to: ReceiverRef::AccountId(id.to_string()),
        amount,
        note: None,
    }
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(48))]

    /// Any valid transfer leaves the sum of the two balances unchanged, on
    /// both the atomic path and the compensating fallback.
    #[test]
    fn prop_transfer_conserves_total(cents in 1u64..=10_000_000u64, atomic: bool) {
        let rt = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .unwrap();
        rt.block_on(async move {
            let core = common::build_core(STARTING, atomic);
            core.ledger.get_or_create("sender").await.unwrap();
            core.ledger.get_or_create("receiver").await.unwrap();

            let amount = Decimal::new(cents as i64, 2);
            let receipt = core
                .transfers
                .transfer("sender", transfer_to("receiver", amount))
                .await
                .unwrap();

            let sender = core.ledger.get("sender").await.unwrap().unwrap();
            let receiver = core.ledger.get("receiver").await.unwrap().unwrap();

            prop_assert_eq!(sender.balance, STARTING - amount);
            prop_assert_eq!(receiver.balance, STARTING + amount);
            prop_assert_eq!(sender.balance + receiver.balance, STARTING * dec!(2));
            prop_assert_eq!(receipt.new_balance, sender.balance);

            // The two journal legs cancel exactly.
            let legs = core.ledger.journal_for_ref(&receipt.transfer.id).await.unwrap();
            prop_assert_eq!(legs.len(), 2);
            let net: Decimal = legs.iter().map(|e| e.amount).sum();
            prop_assert_eq!(net, Decimal::ZERO);
            Ok(())
        })?;
    }

    /// Overdraws are rejected with neither balance mutated, regardless of
    /// how far past the available balance the request goes.
    #[test]
    fn prop_overdraw_never_mutates(excess_cents in 1u64..=1_000_000u64, atomic: bool) {
        let rt = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .unwrap();
        rt.block_on(async move {
            let core = common::build_core(STARTING, atomic);
            core.ledger.get_or_create("sender").await.unwrap();
            core.ledger.get_or_create("receiver").await.unwrap();

            let amount = STARTING + Decimal::new(excess_cents as i64, 2);
            let err = core
                .transfers
                .transfer("sender", transfer_to("receiver", amount))
                .await
                .unwrap_err();
            prop_assert!(
                matches!(err, CoreError::InsufficientFunds { .. }),
                "expected InsufficientFunds, got {:?}",
                err
            );

            let sender = core.ledger.get("sender").await.unwrap().unwrap();
            let receiver = core.ledger.get("receiver").await.unwrap().unwrap();
            prop_assert_eq!(sender.balance, STARTING);
            prop_assert_eq!(receiver.balance, STARTING);
            Ok(())
        })?;
    }
}
