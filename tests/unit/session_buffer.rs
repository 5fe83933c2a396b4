use crate::fixtures::*;
use mixer_core::domain::protocol::encode_tx_hex;
use mixer_core::domain::{CandidateReply, MixTask, PeerInfo, Session};
use mixer_core::foundation::{SessionId, RECEIVED_BUFFER_CAP};

fn announcing_session() -> Session {
    let my_tx = test_tx(0x11, 1, &[500_000]);
    let task = MixTask::new(encode_tx_hex(&my_tx), 500_000, None, 10_000);
    Session::initiator(SessionId::new([1; 16]), my_tx, 500_000, task)
}

fn candidate(n: u8) -> CandidateReply {
    CandidateReply { tx_hex: format!("{:02x}", n), peer: PeerInfo { pub_key: format!("02{:02x}", n), trusted: true } }
}

#[test]
fn buffer_is_bounded_under_reply_spam() {
    let mut session = announcing_session();
    for n in 0..RECEIVED_BUFFER_CAP {
        assert!(session.push_received(candidate(n as u8)));
    }
    assert!(!session.push_received(candidate(0xFF)), "candidate past the cap must be dropped");
    assert_eq!(session.received_len(), RECEIVED_BUFFER_CAP);
}

#[test]
fn take_received_drains_the_buffer() {
    let mut session = announcing_session();
    session.push_received(candidate(1));
    session.push_received(candidate(2));
    let drained = session.take_received();
    assert_eq!(drained.len(), 2);
    assert_eq!(session.received_len(), 0);
    assert!(session.push_received(candidate(3)), "buffer accepts candidates again after draining");
}
