//! This module is an integration test that explores transaction sequences
//! against a small hand-assembled bank contract.
#![cfg(test)]

use std::collections::HashMap;

use ethnum::U256;
use evm_path_explorer::{
    explorer::{TerminationPolicy, UnexploredReason},
    expr::{eval::evaluate, Operator, SymbolicValue},
    harness::abi::Value,
    vm::outcome::OutcomeKind,
};

mod common;

#[test]
fn withdrawing_a_symbolic_amount_splits_on_the_balance() -> anyhow::Result<()> {
    let common::Bank {
        mut engine,
        user,
        bank,
    } = common::deployed_bank()?;
    engine.invoke_function(&bank, "deposit", &[], &user, SymbolicValue::word(100u8))?;
    let amount = engine.fresh_symbolic_value(256, "amount");
    engine.invoke_function(
        &bank,
        "withdraw",
        &[Value::from(amount.clone())],
        &user,
        common::zero(),
    )?;
    let campaign = engine.run(&TerminationPolicy::default())?;

    // One path where the balance covers the amount, and one where it does not
    assert_eq!(campaign.terminals().len(), 2);
    assert_eq!(campaign.successes().count(), 1);
    let reverted = campaign.by_kind(OutcomeKind::Revert);
    assert_eq!(reverted.len(), 1);
    assert!(campaign.is_complete());

    // The successful withdrawal leaves `100 - amount` behind
    let success = campaign
        .successes()
        .next()
        .ok_or_else(|| anyhow::anyhow!("No successful terminal"))?;
    let symbol = amount
        .as_symbol()
        .cloned()
        .ok_or_else(|| anyhow::anyhow!("Amount is not a symbol"))?;
    let remaining = success
        .world()
        .read_storage(bank.address(), &user.address().as_word())?;
    for withdrawn in [0u8, 37, 100] {
        let assignment = HashMap::from([(symbol.clone(), U256::from(withdrawn))]);
        assert_eq!(
            evaluate(&remaining, &assignment).value(),
            U256::from(100 - withdrawn)
        );
    }

    // The revert rolls back the withdrawal but not the deposit
    let revert = reverted[0];
    assert_eq!(
        common::stored_balance(revert, bank.address(), user.address()),
        Some(U256::from(100u8))
    );
    assert_eq!(
        revert.world().balance(user.address()).as_concrete(),
        Some(U256::from(common::USER_BALANCE - 100))
    );
    assert_eq!(
        revert.world().balance(bank.address()).as_concrete(),
        Some(U256::from(100u8))
    );

    // And its testcase withdraws more than was deposited
    let index = campaign
        .terminals()
        .iter()
        .position(|s| s.outcome().is_some_and(|o| o.kind() == OutcomeKind::Revert))
        .ok_or_else(|| anyhow::anyhow!("No reverting terminal"))?;
    let testcase = campaign.concretize(index)?;
    assert_eq!(testcase.transactions.len(), 3);
    assert_eq!(testcase.outcome, OutcomeKind::Revert);
    assert!(!testcase.flagged);
    let withdrawn = testcase
        .transactions
        .last()
        .and_then(|tx| common::word_argument(&tx.calldata))
        .ok_or_else(|| anyhow::anyhow!("No withdrawal"))?;
    assert!(withdrawn > U256::from(100u8));

    Ok(())
}

#[test]
fn withdrawing_exactly_the_deposits_cannot_revert() -> anyhow::Result<()> {
    let common::Bank {
        mut engine,
        user,
        bank,
    } = common::deployed_bank()?;
    let first = engine.fresh_symbolic_value(256, "first");
    let second = engine.fresh_symbolic_value(256, "second");
    engine.invoke_function(&bank, "deposit", &[], &user, first.clone())?;
    engine.invoke_function(&bank, "deposit", &[], &user, second.clone())?;
    let total = SymbolicValue::apply(Operator::Add, vec![first, second])?;
    engine.invoke_function(&bank, "withdraw", &[Value::from(total)], &user, common::zero())?;
    let campaign = engine.run(&TerminationPolicy::default())?;

    assert_eq!(campaign.terminals().len(), 1);
    assert_eq!(campaign.successes().count(), 1);
    assert!(campaign.by_kind(OutcomeKind::Revert).is_empty());
    assert_eq!(
        common::stored_balance(&campaign.terminals()[0], bank.address(), user.address()),
        Some(U256::ZERO)
    );

    Ok(())
}

#[test]
fn states_over_the_step_bound_are_reported_unexplored() -> anyhow::Result<()> {
    let common::Bank {
        mut engine,
        user,
        bank,
    } = common::deployed_bank()?;
    engine.invoke_function(&bank, "deposit", &[], &user, SymbolicValue::word(100u8))?;
    let campaign = engine.run(&TerminationPolicy::default().with_max_steps_per_state(5))?;

    assert!(campaign.terminals().is_empty());
    assert_eq!(campaign.unexplored().len(), 1);
    assert_eq!(campaign.unexplored()[0].reason, UnexploredReason::StepBound);
    assert!(!campaign.is_complete());
    assert_eq!(engine.ready_states(), 0);

    Ok(())
}

#[test]
fn concrete_sequences_explore_deterministically() -> anyhow::Result<()> {
    let run = || -> anyhow::Result<(Vec<OutcomeKind>, Option<U256>)> {
        let common::Bank {
            mut engine,
            user,
            bank,
        } = common::deployed_bank()?;
        engine.invoke_function(&bank, "deposit", &[], &user, SymbolicValue::word(100u8))?;
        engine.invoke_function(&bank, "withdraw", &[Value::from(40u64)], &user, common::zero())?;
        let campaign = engine.run(&TerminationPolicy::default())?;
        let kinds = campaign
            .terminals()
            .iter()
            .filter_map(|s| s.outcome().map(|o| o.kind()))
            .collect();
        let stored = campaign
            .terminals()
            .first()
            .and_then(|s| common::stored_balance(s, bank.address(), user.address()));
        Ok((kinds, stored))
    };

    let first = run()?;
    let second = run()?;
    assert_eq!(first, second);
    assert_eq!(first.0, vec![OutcomeKind::Return]);
    assert_eq!(first.1, Some(U256::from(60u8)));

    Ok(())
}

#[test]
fn unknown_functions_are_rejected() -> anyhow::Result<()> {
    let common::Bank {
        mut engine,
        user,
        bank,
    } = common::deployed_bank()?;

    assert!(engine
        .invoke_function(&bank, "transfer", &[], &user, common::zero())
        .is_err());
    assert!(engine
        .invoke_function(&bank, "withdraw", &[], &user, common::zero())
        .is_err());
    assert_eq!(engine.pending(), 0);

    Ok(())
}
