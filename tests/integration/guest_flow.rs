use crate::fixtures::*;
use mixer_core::domain::protocol::{decode_tx_hex, encode_tx_hex, TwoPartyJoin};
use mixer_core::domain::{LobbyMessage, SessionState};
use mixer_core::foundation::SessionId;
use mixer_core::infrastructure::identity::Identity;
use mixer_core::infrastructure::safe::MemorySafe;
use std::sync::Arc;

#[tokio::test(start_paused = true)]
async fn guest_answers_an_opening_and_charges_its_budget() {
    let safe = Arc::new(MemorySafe::new());
    let wallet = Arc::new(MockWallet::new());
    wallet.fund_pocket(2, outpoint(0x20, 0), 700_000, "addr-2-0", vec![4, 0]);
    unlock_pocket(&safe, 2);
    let identity = Identity { pockets: vec![mixing_pocket(2, 200_000)], ..Identity::default() };
    let mut mixer = TestMixer::build(identity, wallet, safe);

    mixer.connect().await;
    assert!(mixer.coordinator.channel_open(), "a mixing pocket keeps the channel open");

    let mut initiator = TestPeer::join(mixer.hub.clone(), "init").await;
    let id = SessionId::new([9; 16]);
    initiator.send_broadcast(&LobbyMessage::CoinJoinOpen { id, amount: 500_000 }).await;
    mixer.pump().await;
    assert_eq!(mixer.coordinator.session_state(id), Some(SessionState::Accepted));

    // The guest's candidate spends pocket 2 and is marked initial.
    let (_, candidate_msg) = initiator.recv().await.expect("candidate reply");
    let LobbyMessage::CoinJoin { tx: candidate_hex, initial, .. } = candidate_msg else {
        panic!("expected the candidate transaction");
    };
    assert!(initial);
    let candidate = decode_tx_hex(&candidate_hex).expect("candidate decodes");
    assert_eq!(candidate.input.len(), 1);

    // The initiator merges and proposes the joint transaction.
    let initiator_tx = test_tx(0x44, 1, &[500_000, 220_000]);
    let joint = TwoPartyJoin::merge(&initiator_tx, &candidate).expect("merge");
    initiator.send_dh(MIXER_PUB_KEY, &LobbyMessage::CoinJoin { id, tx: encode_tx_hex(&joint), initial: false }).await;
    mixer.pump().await;
    assert_eq!(mixer.coordinator.session_state(id), Some(SessionState::Sign));

    // The guest signed its own input and sent the refinement back.
    let (_, signed_msg) = initiator.recv().await.expect("guest-signed transaction");
    let LobbyMessage::CoinJoin { tx: signed_hex, .. } = signed_msg else {
        panic!("expected the guest-signed transaction");
    };
    let mut final_tx = decode_tx_hex(&signed_hex).expect("signed decodes");
    let guest_inputs = tx_outpoints(&candidate);
    assert!(final_tx.input.iter().filter(|i| guest_inputs.contains(&i.previous_output)).all(|i| !i.script_sig.is_empty()));

    // The initiator completes the join and returns the final transaction.
    sign_inputs(&mut final_tx, &tx_outpoints(&initiator_tx));
    initiator.send_dh(MIXER_PUB_KEY, &LobbyMessage::CoinJoin { id, tx: encode_tx_hex(&final_tx), initial: false }).await;
    mixer.pump().await;

    assert_eq!(mixer.coordinator.session_count(), 0);
    let pocket = mixer.coordinator.identity().pocket(2).expect("pocket 2");
    assert_eq!(pocket.mixing_options.spent, TEST_GUEST_FEE, "budget charged exactly once");
    assert!(pocket.mixing, "budget not yet exhausted");
    assert!(mixer.store.save_count() >= 1, "identity persisted on the budget update");
    assert!(mixer.gui.saw("accepted"));
    assert!(mixer.gui.saw("finished"));
}

#[tokio::test(start_paused = true)]
async fn exhausting_the_budget_demotes_the_pocket() {
    let safe = Arc::new(MemorySafe::new());
    let wallet = Arc::new(MockWallet::new());
    wallet.fund_pocket(2, outpoint(0x20, 0), 700_000, "addr-2-0", vec![4, 0]);
    unlock_pocket(&safe, 2);
    // one more join reaches the budget
    let mut pocket = mixing_pocket(2, 100_000);
    pocket.mixing_options.spent = 60_000;
    let identity = Identity { pockets: vec![pocket], ..Identity::default() };
    let mut mixer = TestMixer::build(identity, wallet, safe);

    mixer.connect().await;
    let mut initiator = TestPeer::join(mixer.hub.clone(), "init").await;
    let id = SessionId::new([10; 16]);
    initiator.send_broadcast(&LobbyMessage::CoinJoinOpen { id, amount: 500_000 }).await;
    mixer.pump().await;

    let (_, candidate_msg) = initiator.recv().await.expect("candidate reply");
    let LobbyMessage::CoinJoin { tx: candidate_hex, .. } = candidate_msg else {
        panic!("expected the candidate transaction");
    };
    let candidate = decode_tx_hex(&candidate_hex).expect("candidate decodes");
    let initiator_tx = test_tx(0x45, 1, &[500_000, 220_000]);
    let joint = TwoPartyJoin::merge(&initiator_tx, &candidate).expect("merge");
    initiator.send_dh(MIXER_PUB_KEY, &LobbyMessage::CoinJoin { id, tx: encode_tx_hex(&joint), initial: false }).await;
    mixer.pump().await;

    let (_, signed_msg) = initiator.recv().await.expect("guest-signed transaction");
    let LobbyMessage::CoinJoin { tx: signed_hex, .. } = signed_msg else {
        panic!("expected the guest-signed transaction");
    };
    let mut final_tx = decode_tx_hex(&signed_hex).expect("signed decodes");
    sign_inputs(&mut final_tx, &tx_outpoints(&initiator_tx));
    initiator.send_dh(MIXER_PUB_KEY, &LobbyMessage::CoinJoin { id, tx: encode_tx_hex(&final_tx), initial: false }).await;
    mixer.pump().await;

    let pocket = mixer.coordinator.identity().pocket(2).expect("pocket 2");
    assert_eq!(pocket.mixing_options.spent, 110_000);
    assert!(!pocket.mixing, "budget reached, pocket demoted");
    assert!(pocket.cached_keys.is_none());
    assert!(!mixer.coordinator.channel_open(), "no mixing pocket and no tasks, channel closed");
}
