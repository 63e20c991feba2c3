use std::collections::HashSet;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use bitcoin::consensus::serialize;
use bitcoin::{Amount, Network, OutPoint, PrivateKey, PublicKey, ScriptBuf};

use crate::error::{BroadcastError, RebindError};
use crate::trusted::chain::MockChain;
use crate::trusted::domain::registry::{RequestId, RequestState};
use crate::trusted::domain::request::{ResolvedCoin, SpendPath, TransactionType, TrustedBroadcastRequest};
use crate::trusted::engine::rebind;
use crate::trusted::engine::tests::fixtures::*;
use crate::trusted::keys::InMemoryKeyStore;
use crate::trusted::runtime::{PollDriver, TrustedBroadcastService};

type TestService = TrustedBroadcastService<Arc<MockChain>, Arc<MockChain>, Arc<InMemoryKeyStore>>;

fn setup(height: u32, seeds: &[u8]) -> (Arc<MockChain>, Arc<InMemoryKeyStore>, TestService) {
    let chain = Arc::new(MockChain::new(height));
    let keys = Arc::new(keys(seeds));
    let service = TrustedBroadcastService::new(chain.clone(), chain.clone(), keys.clone(), Network::Regtest);
    (chain, keys, service)
}

fn outpoint_of(tx: &bitcoin::Transaction, vout: u32) -> OutPoint {
    OutPoint::new(tx.compute_txid(), vout)
}

#[test]
fn end_to_end_broadcasts_once_height_is_reached() {
    let (chain, _keys, service) = setup(99, &[1]);
    let id = service
        .broadcast(1, TransactionType::ClientEscape, request(1, 100))
        .unwrap();

    let funding = funding_tx(1, 100_000);
    chain.mine(funding.clone());

    // one block early: nothing, whatever the chain holds
    assert!(service.try_broadcast_all().is_empty());
    assert!(chain.submitted().is_empty());
    assert_eq!(service.state(id), Some(RequestState::Pending));

    chain.set_height(100);
    let sent = service.try_broadcast_all();

    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].input[0].previous_output, outpoint_of(&funding, 0));
    assert_eq!(sent[0].output, template(1).transaction.output);
    assert_eq!(chain.submitted(), sent);
    assert_eq!(service.state(id), Some(RequestState::Transmitted));
}

#[test]
fn does_not_retransmit_same_coin() {
    let (chain, _keys, service) = setup(100, &[1]);
    service
        .broadcast(1, TransactionType::ClientEscape, request(1, 100))
        .unwrap();
    chain.mine(funding_tx(1, 100_000));

    assert_eq!(service.try_broadcast_all().len(), 1);
    assert!(service.try_broadcast_all().is_empty());

    chain.set_height(101);
    assert!(service.try_broadcast_all().is_empty());
    assert_eq!(chain.submitted().len(), 1);
}

#[test]
fn every_matching_coin_gets_its_own_transaction() {
    let (chain, _keys, service) = setup(100, &[1]);
    service
        .broadcast(1, TransactionType::TumblerEscape, request(1, 50))
        .unwrap();

    let first = paying(watched_script(1), 100_000, 1);
    let second = paying(watched_script(1), 120_000, 2);
    chain.mine(first.clone());
    chain.mine(second.clone());

    let sent = service.try_broadcast_all();

    assert_eq!(sent.len(), 2);
    assert_eq!(sent[0].input[0].previous_output, outpoint_of(&first, 0));
    assert_eq!(sent[1].input[0].previous_output, outpoint_of(&second, 0));
}

#[test]
fn coin_arriving_later_is_still_picked_up() {
    let (chain, _keys, service) = setup(100, &[1]);
    service
        .broadcast(1, TransactionType::TumblerEscape, request(1, 50))
        .unwrap();

    chain.mine(paying(watched_script(1), 100_000, 1));
    assert_eq!(service.try_broadcast_all().len(), 1);

    chain.set_height(101);
    chain.mine(paying(watched_script(1), 100_000, 2));
    assert_eq!(service.try_broadcast_all().len(), 1);
    assert_eq!(chain.submitted().len(), 2);
}

#[test]
fn query_failure_only_skips_that_request() {
    let (chain, _keys, service) = setup(100, &[1, 2]);
    service
        .broadcast(1, TransactionType::ClientRedeem, request(1, 100))
        .unwrap();
    service
        .broadcast(1, TransactionType::TumblerRedeem, request(2, 100))
        .unwrap();

    chain.mine(funding_tx(1, 100_000));
    chain.mine(funding_tx(2, 100_000));
    chain.fail_queries_for(watched_script(1));

    let sent = service.try_broadcast_all();
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].input[0].previous_output, outpoint_of(&funding_tx(2, 100_000), 0));

    chain.heal(&watched_script(1));
    let sent = service.try_broadcast_all();
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].input[0].previous_output, outpoint_of(&funding_tx(1, 100_000), 0));
}

#[test]
fn request_without_coin_stays_eligible_forever() {
    let (chain, _keys, service) = setup(100, &[2]);
    let id = service
        .broadcast(3, TransactionType::ClientOffer, request(2, 100))
        .unwrap();

    for height in 100..110 {
        chain.set_height(height);
        assert!(service.try_broadcast_all().is_empty());
    }

    assert_eq!(service.state(id), Some(RequestState::Eligible));
    assert!(service.anomalies().is_empty());
}

#[test]
fn unconfirmed_coin_waits_for_confirmation() {
    let (chain, _keys, service) = setup(100, &[1]);
    service
        .broadcast(1, TransactionType::ClientEscape, request(1, 100))
        .unwrap();

    let funding = funding_tx(1, 100_000);
    chain.push_mempool(funding.clone());
    assert!(service.try_broadcast_all().is_empty());

    chain.set_height(101);
    chain.mine(funding);
    assert_eq!(service.try_broadcast_all().len(), 1);
}

#[test]
fn zero_confirmations_accepts_mempool_coins() {
    let (chain, keys, _) = setup(100, &[1]);
    let service = TrustedBroadcastService::new(chain.clone(), chain.clone(), keys, Network::Regtest)
        .with_min_confirmations(0);
    service
        .broadcast(1, TransactionType::ClientEscape, request(1, 100))
        .unwrap();

    chain.push_mempool(funding_tx(1, 100_000));
    assert_eq!(service.try_broadcast_all().len(), 1);
}

#[test]
fn insufficient_value_is_flagged_and_not_retried() {
    let (chain, _keys, service) = setup(100, &[1]);
    let id = service
        .broadcast(4, TransactionType::TumblerCashout, request(1, 100))
        .unwrap();

    let funding = funding_tx(1, 10_000);
    chain.mine(funding.clone());

    assert!(service.try_broadcast_all().is_empty());

    let anomalies = service.anomalies();
    assert_eq!(anomalies.len(), 1);
    assert_eq!(anomalies[0].request, id);
    assert_eq!(anomalies[0].cycle, 4);
    assert_eq!(anomalies[0].outpoint, outpoint_of(&funding, 0));
    assert!(matches!(anomalies[0].error, RebindError::InsufficientValue { .. }));

    chain.set_height(101);
    assert!(service.try_broadcast_all().is_empty());
    assert_eq!(service.anomalies().len(), 1);
    assert_eq!(service.state(id), Some(RequestState::Eligible));
}

#[test]
fn missing_key_is_retried_once_loaded() {
    let (chain, keys, service) = setup(100, &[]);
    service
        .broadcast(1, TransactionType::ClientFulfill, request(1, 100))
        .unwrap();
    chain.mine(funding_tx(1, 100_000));

    assert!(service.try_broadcast_all().is_empty());
    assert!(service.anomalies().is_empty());

    keys.insert(secret(1));
    assert_eq!(service.try_broadcast_all().len(), 1);
}

#[test]
fn rejected_submission_is_retried_with_same_transaction() {
    let (chain, keys, service) = setup(100, &[1]);
    let id = service
        .broadcast(1, TransactionType::ClientEscape, request(1, 100))
        .unwrap();
    let funding = funding_tx(1, 100_000);
    chain.mine(funding.clone());
    chain.reject_next_submissions(1);

    assert!(service.try_broadcast_all().is_empty());
    assert_eq!(service.state(id), Some(RequestState::Resolved));

    let sent = service.try_broadcast_all();
    assert_eq!(sent.len(), 1);

    let out = &funding.output[0];
    let coin = ResolvedCoin {
        outpoint: outpoint_of(&funding, 0),
        value: out.value,
        script: out.script_pubkey.clone(),
    };
    let expected = rebind(&template(1), &coin, &*keys).unwrap();
    assert_eq!(serialize(&sent[0]), serialize(&expected));
    assert_eq!(service.state(id), Some(RequestState::Transmitted));
}

#[test]
fn broadcast_watches_script() {
    let (chain, _keys, service) = setup(0, &[1]);
    service
        .broadcast(1, TransactionType::ClientEscape, request(1, 100))
        .unwrap();

    assert_eq!(chain.watched(), vec![watched_script(1)]);
}

#[test]
fn invalid_request_is_neither_watched_nor_registered() {
    let (chain, _keys, service) = setup(0, &[1]);
    let mut req = request(1, 100);
    // OP_RETURN OP_0
    req.watched_script = bitcoin::ScriptBuf::from_bytes(vec![0x6a, 0x00]);

    let err = service
        .broadcast(1, TransactionType::ClientEscape, req)
        .unwrap_err();

    assert!(matches!(err, BroadcastError::InvalidRequest(_)));
    assert!(chain.watched().is_empty());
    assert!(service.requests().is_empty());
}

#[test]
fn failed_watch_registers_nothing() {
    let (chain, _keys, service) = setup(0, &[1]);
    chain.set_watch_unavailable(true);

    let err = service
        .broadcast(1, TransactionType::ClientEscape, request(1, 100))
        .unwrap_err();

    assert!(matches!(err, BroadcastError::Watch(_)));
    assert!(service.requests().is_empty());

    chain.set_watch_unavailable(false);
    assert!(service
        .broadcast(1, TransactionType::ClientEscape, request(1, 100))
        .is_ok());
}

#[test]
fn unknown_height_skips_poll() {
    let (chain, _keys, service) = setup(100, &[1]);
    service
        .broadcast(1, TransactionType::ClientEscape, request(1, 100))
        .unwrap();
    chain.mine(funding_tx(1, 100_000));
    chain.set_height_unavailable(true);

    assert!(service.try_broadcast_all().is_empty());

    chain.set_height_unavailable(false);
    assert_eq!(service.try_broadcast_all().len(), 1);
}

#[test]
fn lookup_by_cycle_and_type() {
    let (_chain, _keys, service) = setup(0, &[1, 2]);
    service
        .broadcast(1, TransactionType::ClientEscape, request(1, 100))
        .unwrap();
    let wanted = service
        .broadcast(2, TransactionType::ClientEscape, request(2, 100))
        .unwrap();

    assert_eq!(service.find(2, TransactionType::ClientEscape), vec![wanted]);
    assert_eq!(service.requests().len(), 2);
}

#[test]
fn driver_tick_polls_service() {
    let (chain, _keys, service) = setup(100, &[1]);
    service
        .broadcast(1, TransactionType::ClientEscape, request(1, 100))
        .unwrap();
    chain.mine(funding_tx(1, 100_000));

    let mut driver = PollDriver::new(Arc::new(service), Duration::from_millis(1));

    assert_eq!(driver.tick().len(), 1);
    assert_eq!(driver.last_height(), Some(100));
    assert!(driver.tick().is_empty());
}

#[test]
fn overflowing_template_does_not_hold_back_other_requests() {
    let (chain, _keys, service) = setup(100, &[1, 2]);
    let mut bad = request(1, 100);
    bad.template.transaction.output[0].value = Amount::from_sat(u64::MAX);

    let err = service
        .broadcast(1, TransactionType::ClientEscape, bad)
        .unwrap_err();
    assert!(matches!(err, BroadcastError::InvalidRequest(_)));

    service
        .broadcast(1, TransactionType::TumblerEscape, request(2, 100))
        .unwrap();
    chain.mine(funding_tx(1, 100_000));
    chain.mine(funding_tx(2, 100_000));

    let sent = service.try_broadcast_all();
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].input[0].previous_output, outpoint_of(&funding_tx(2, 100_000), 0));
    assert_eq!(chain.watched(), vec![watched_script(2)]);
}

#[test]
fn uncompressed_p2pkh_signer_is_spent() {
    let chain = Arc::new(MockChain::new(100));
    let wif = PrivateKey::new_uncompressed(secret(3), Network::Regtest).to_wif();
    let keys = InMemoryKeyStore::from_wif_lines(&wif).unwrap();
    let service = TrustedBroadcastService::new(chain.clone(), chain.clone(), keys, Network::Regtest);

    let signer = PublicKey::new_uncompressed(public(3).inner);
    let script = ScriptBuf::new_p2pkh(&signer.pubkey_hash());
    let mut template = template_with(3, SpendPath::P2pkh);
    template.signer = signer;
    let id = service
        .broadcast(
            5,
            TransactionType::TumblerRedeem,
            TrustedBroadcastRequest::new(script.clone(), template, 100),
        )
        .unwrap();

    let funding = paying(script, 100_000, 0);
    chain.mine(funding.clone());

    let sent = service.try_broadcast_all();
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].input[0].previous_output, outpoint_of(&funding, 0));
    assert!(sent[0].input[0]
        .script_sig
        .as_bytes()
        .ends_with(&signer.to_bytes()));
    assert_eq!(service.state(id), Some(RequestState::Transmitted));
    assert!(service.anomalies().is_empty());
}

#[test]
fn concurrent_polls_transmit_a_coin_once() {
    let (chain, _keys, service) = setup(100, &[1]);
    service
        .broadcast(1, TransactionType::ClientEscape, request(1, 100))
        .unwrap();
    chain.mine(funding_tx(1, 100_000));
    let service = Arc::new(service);

    let handles: Vec<_> = (0..8)
        .map(|_| {
            let service = service.clone();
            thread::spawn(move || service.try_broadcast_all().len())
        })
        .collect();
    let sent: usize = handles.into_iter().map(|h| h.join().unwrap()).sum();

    assert_eq!(sent, 1);
    assert_eq!(chain.submitted().len(), 1);
}

#[test]
fn concurrent_registrations_get_distinct_ids() {
    let (_chain, _keys, service) = setup(0, &[]);
    let service = Arc::new(service);

    let handles: Vec<_> = (1..=8u8)
        .map(|seed| {
            let service = service.clone();
            thread::spawn(move || {
                service
                    .broadcast(u32::from(seed), TransactionType::ClientOffer, request(seed, 100))
                    .unwrap()
            })
        })
        .collect();
    let ids: HashSet<RequestId> = handles.into_iter().map(|h| h.join().unwrap()).collect();

    assert_eq!(ids.len(), 8);
    assert_eq!(service.requests().len(), 8);
}
