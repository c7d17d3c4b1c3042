mod common;

use common::Harness;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use topup_ledger::application::lifecycle::Adjustment;
use topup_ledger::application::notifier::Reason;
use topup_ledger::domain::account::{AccountId, Amount};
use topup_ledger::domain::ports::RecordRepository;
use topup_ledger::domain::record::{RecordFilter, RecordStatus, StorageKey};

/// balance == approved deposits + operator adds - operator deducts
///            - prices of orders that were not refunded
async fn assert_conserved(h: &Harness, users: &[AccountId], adds: Decimal, deducts: Decimal) {
    let orders = h.stores.orders.list(&RecordFilter::all()).await.unwrap();
    let deposits = h.stores.deposits.list(&RecordFilter::all()).await.unwrap();

    let charged: Decimal = orders
        .iter()
        .filter(|o| o.status != RecordStatus::Failed)
        .map(|o| o.price().value())
        .sum();
    let deposited: Decimal = deposits
        .iter()
        .filter(|d| d.status == RecordStatus::Completed)
        .map(|d| d.amount.value())
        .sum();
    let mut balances = Decimal::ZERO;
    let mut spent = Decimal::ZERO;
    for user in users {
        let account = h.account(user).await;
        assert!(!account.balance.is_negative());
        balances += account.balance.0;
        spent += account.total_spent.0;
    }

    assert_eq!(balances, deposited + adds - deducts - charged);
    let completed: Decimal = orders
        .iter()
        .filter(|o| o.status == RecordStatus::Completed)
        .map(|o| o.price().value())
        .sum();
    assert_eq!(spent, completed);
}

#[tokio::test]
async fn test_random_operations_conserve_money() {
    let mut rng = StdRng::seed_from_u64(0x70_b0);
    let h = Harness::new();
    let users: Vec<AccountId> = ["u1", "u2", "u3"].into_iter().map(AccountId::from).collect();
    for user in &users {
        h.wallet.open_account(user).await.unwrap();
    }

    let watcher = h.watcher();
    let mut orders: Vec<(AccountId, StorageKey)> = Vec::new();
    let mut deposits: Vec<(AccountId, StorageKey)> = Vec::new();
    let (mut adds, mut deducts) = (Decimal::ZERO, Decimal::ZERO);

    for step in 0..400u32 {
        let user = users[rng.gen_range(0..users.len())].clone();
        match rng.gen_range(0..9) {
            0 => {
                let amount = Decimal::from(rng.gen_range(20..=500i64));
                let reference = format!("A{:03}B{:03}", step, 999 - step);
                if let Ok(deposit) = h.wallet.submit_deposit(&user, amount, "bKash", &reference).await {
                    deposits.push((user, deposit.storage_key));
                }
            }
            1 | 2 => {
                let price = Decimal::from(rng.gen_range(10..=120i64));
                if let Ok(order) = h.buy(&user, price).await {
                    orders.push((user, order.storage_key));
                }
            }
            3 if !orders.is_empty() => {
                let (owner, key) = &orders[rng.gen_range(0..orders.len())];
                let _ = h.engine.approve_order(owner, key).await;
            }
            4 if !orders.is_empty() => {
                let (owner, key) = &orders[rng.gen_range(0..orders.len())];
                let _ = h.engine.reject_order(owner, key, Reason::order_default()).await;
            }
            5 if !deposits.is_empty() => {
                let (owner, key) = &deposits[rng.gen_range(0..deposits.len())];
                let _ = h.engine.approve_deposit(owner, key).await;
            }
            6 if !deposits.is_empty() => {
                let (owner, key) = &deposits[rng.gen_range(0..deposits.len())];
                let _ = h.engine.reject_deposit(owner, key, Reason::deposit_default()).await;
            }
            7 => {
                let amount = Decimal::from(rng.gen_range(1..=80i64));
                let direction = if rng.gen_bool(0.6) { Adjustment::Add } else { Adjustment::Deduct };
                if h
                    .engine
                    .adjust_balance(&user, direction, Amount::new(amount).unwrap())
                    .await
                    .is_ok()
                {
                    match direction {
                        Adjustment::Add => adds += amount,
                        Adjustment::Deduct => deducts += amount,
                    }
                }
            }
            _ => {
                h.advance_minutes(rng.gen_range(1..=20));
                watcher.tick().await.unwrap();
            }
        }

        if step % 50 == 0 {
            assert_conserved(&h, &users, adds, deducts).await;
        }
    }
    assert_conserved(&h, &users, adds, deducts).await;
    assert!(adds > dec!(0));
}
