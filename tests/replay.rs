//! This module is an integration test that checks the testcases and path
//! conditions produced by exploring the bank contract against concrete runs.
#![cfg(test)]

use std::collections::HashMap;

use ethnum::U256;
use evm_path_explorer::{
    explorer::{Campaign, TerminationPolicy},
    expr::{eval::holds, SymbolicValue},
    harness::{abi::Value, transaction::Transaction},
    vm::state::{symbolic_bytes, TransactionKind},
};
use proptest::prelude::*;

mod common;

/// Deposits 100 and then withdraws a symbolic amount, returning the campaign
/// and the amount.
fn explore_withdrawal() -> anyhow::Result<(Campaign, SymbolicValue)> {
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
    Ok((engine.run(&TerminationPolicy::default())?, amount))
}

#[test]
fn testcases_reproduce_their_paths() -> anyhow::Result<()> {
    let (campaign, _) = explore_withdrawal()?;
    assert_eq!(campaign.terminals().len(), 2);

    for index in 0..campaign.terminals().len() {
        let testcase = campaign.concretize(index)?;
        assert_eq!(testcase.transactions[0].kind, TransactionKind::Deploy);

        // The setup is deterministic, so the deployment lands at the same address
        let common::Bank {
            mut engine, bank, ..
        } = common::deployed_bank()?;
        assert_eq!(testcase.transactions[0].target, bank.address());

        for tx in testcase.transactions.iter().skip(1) {
            engine.submit(
                Transaction::call(tx.caller, tx.target, symbolic_bytes(&tx.calldata))
                    .with_value(SymbolicValue::word(tx.value)),
            )?;
        }
        let replayed = engine.run(&TerminationPolicy::default())?;

        assert_eq!(replayed.terminals().len(), 1);
        let outcome = replayed.terminals()[0]
            .outcome()
            .ok_or_else(|| anyhow::anyhow!("Replay did not terminate"))?;
        assert_eq!(outcome.kind(), testcase.outcome);
        assert_eq!(replayed.terminals()[0].pc(), campaign.terminals()[index].pc());
    }

    Ok(())
}

#[test]
fn exploration_is_repeatable_up_to_symbol_identity() -> anyhow::Result<()> {
    let shapes = || -> anyhow::Result<Vec<Vec<String>>> {
        let (campaign, _) = explore_withdrawal()?;
        let mut shapes: Vec<_> = campaign.terminals().iter().map(|s| s.path().shape()).collect();
        shapes.sort();
        Ok(shapes)
    };

    assert_eq!(shapes()?, shapes()?);

    Ok(())
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(16))]

    #[test]
    fn exactly_one_sibling_path_admits_each_input(amount in 0u64..400) {
        let (campaign, symbol) = explore_withdrawal()
            .map_err(|e| TestCaseError::fail(e.to_string()))?;
        let symbol = symbol
            .as_symbol()
            .cloned()
            .ok_or_else(|| TestCaseError::fail("Amount is not a symbol"))?;
        let assignment = HashMap::from([(symbol, U256::from(amount))]);

        let admitting: Vec<_> = campaign
            .terminals()
            .iter()
            .filter(|s| s.path().constraints().iter().all(|c| holds(c, &assignment)))
            .collect();

        prop_assert_eq!(admitting.len(), 1);
        let reverted = admitting[0].outcome().is_some_and(|o| !o.is_success());
        prop_assert_eq!(reverted, amount > 100);
    }
}
