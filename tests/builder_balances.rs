use shieldq::{
    build::{
        simulated::SimulatedBuilder,
        traits::{ConstructionError, TransactionBuilder},
    },
    operation::{OperationRequest, Recipient, RequestError},
    types::{MAX_MONEY, PoolType},
};

#[test]
fn send_many_moves_exactly_the_requested_value() {
    let builder = SimulatedBuilder::new();
    builder.fund(PoolType::Sapling, 100);

    let request = OperationRequest::send_many(
        PoolType::Sapling,
        vec![Recipient::pay(PoolType::Orchard, 30), Recipient::pay(PoolType::Transparent, 20)],
        10,
    );
    let built = builder.build(&request, 11).expect("build");
    assert_eq!(built.value, 50);
    assert_eq!(built.txid.len(), 64);
    assert_eq!(builder.balance(PoolType::Sapling), 50);
    assert_eq!(builder.balance(PoolType::Orchard), 30);
    assert_eq!(builder.balance(PoolType::Transparent), 20);
}

#[test]
fn overflowing_outputs_fail_without_touching_balances() {
    let builder = SimulatedBuilder::new();
    builder.fund(PoolType::Sapling, 7);

    let request = OperationRequest::send_many(
        PoolType::Sapling,
        vec![Recipient::pay(PoolType::Orchard, u64::MAX), Recipient::pay(PoolType::Transparent, 1)],
        10,
    );
    assert_eq!(builder.build(&request, 11), Err(ConstructionError::AmountOutOfRange));
    assert_eq!(ConstructionError::AmountOutOfRange.to_string(), "Amount out of range");

    assert_eq!(builder.balance(PoolType::Sapling), 7);
    assert_eq!(builder.balance(PoolType::Orchard), 0);
    assert_eq!(builder.balance(PoolType::Transparent), 0);
}

#[test]
fn single_huge_output_is_insufficient_funds() {
    let builder = SimulatedBuilder::new();
    let request = OperationRequest::send_many(PoolType::Sapling, vec![Recipient::pay(PoolType::Orchard, u64::MAX)], 10);
    assert_eq!(
        builder.build(&request, 11),
        Err(ConstructionError::InsufficientFunds {
            available: 0,
            required: u64::MAX,
        })
    );
    assert_eq!(builder.balance(PoolType::Orchard), 0);
}

#[test]
fn credit_overflow_leaves_sources_intact() {
    let builder = SimulatedBuilder::new();
    builder.fund(PoolType::Sapling, u64::MAX);
    builder.fund(PoolType::Orchard, 1);

    let merge = OperationRequest::merge_to_address(vec![PoolType::Orchard], PoolType::Sapling, 10);
    assert_eq!(builder.build(&merge, 11), Err(ConstructionError::AmountOutOfRange));
    assert_eq!(builder.balance(PoolType::Orchard), 1);
    assert_eq!(builder.balance(PoolType::Sapling), u64::MAX);

    // Funding saturates rather than wrapping.
    builder.fund(PoolType::Sapling, 5);
    assert_eq!(builder.balance(PoolType::Sapling), u64::MAX);
}

#[test]
fn submission_rejects_amounts_beyond_the_money_supply() {
    let overflow = OperationRequest::send_many(
        PoolType::Sapling,
        vec![Recipient::pay(PoolType::Orchard, u64::MAX), Recipient::pay(PoolType::Transparent, 1)],
        10,
    );
    assert_eq!(overflow.validate(), Err(RequestError::AmountOutOfRange));

    let over_supply = OperationRequest::send_many(
        PoolType::Sapling,
        vec![Recipient::pay(PoolType::Orchard, MAX_MONEY), Recipient::pay(PoolType::Transparent, 1)],
        10,
    );
    assert_eq!(over_supply.validate(), Err(RequestError::AmountOutOfRange));

    let at_supply = OperationRequest::send_many(PoolType::Sapling, vec![Recipient::pay(PoolType::Orchard, MAX_MONEY)], 10);
    assert_eq!(at_supply.validate(), Ok(()));
}
