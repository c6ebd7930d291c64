//! Property tests for the RPC frame codec and conversation formats.

use murmur_proto::{
    convo::ConvoMessage, Envelope, Frame, FrameHeader, Opcode, RpcRequest, RpcResponse,
};
use murmur_proto::rpc::RunRoundCall;
use proptest::prelude::*;

fn arb_opcode() -> impl Strategy<Value = Opcode> {
    prop_oneof![
        Just(Opcode::NewConvoRound),
        Just(Opcode::RunConvoRound),
        Just(Opcode::RoundAccepted),
        Just(Opcode::RoundReplies),
        Just(Opcode::Error),
    ]
}

proptest! {
    #[test]
    fn frame_round_trip(
        opcode in arb_opcode(),
        request_id in any::<u64>(),
        payload in proptest::collection::vec(any::<u8>(), 0..2048),
    ) {
        let frame = Frame::new(FrameHeader::new(opcode, request_id), payload);

        let mut wire = Vec::new();
        frame.encode(&mut wire).expect("should encode");

        let parsed = Frame::decode(&wire).expect("should decode");
        prop_assert_eq!(parsed.header.request_id(), request_id);
        prop_assert_eq!(parsed.header.opcode_enum(), Some(opcode));
        prop_assert_eq!(parsed.payload, frame.payload);
    }

    #[test]
    fn truncated_frames_never_parse(
        payload in proptest::collection::vec(any::<u8>(), 1..512),
        cut in any::<prop::sample::Index>(),
    ) {
        let frame = Frame::new(FrameHeader::new(Opcode::RunConvoRound, 1), payload);
        let mut wire = Vec::new();
        frame.encode(&mut wire).expect("should encode");

        let cut_at = cut.index(wire.len());
        prop_assert!(Frame::decode(&wire[..cut_at]).is_err());
    }

    #[test]
    fn run_round_preserves_batch(
        round in any::<u32>(),
        onions in proptest::collection::vec(
            proptest::collection::vec(any::<u8>(), 0..400),
            0..32,
        ),
    ) {
        let call = RunRoundCall { round, onions: onions.clone() };
        let frame = RpcRequest::RunConvoRound(call).into_frame(0).expect("should encode");

        let RpcRequest::RunConvoRound(parsed) =
            RpcRequest::from_frame(&frame).expect("should decode")
        else {
            return Err(TestCaseError::fail("wrong variant"));
        };
        prop_assert_eq!(parsed.round, round);
        prop_assert_eq!(parsed.onions, onions);
    }

    #[test]
    fn envelope_round_trip(round in any::<u32>(), onion in proptest::collection::vec(any::<u8>(), 0..512)) {
        let env = Envelope::ConvoRequest { round, onion };
        let wire = env.encode().expect("should encode");
        prop_assert_eq!(Envelope::decode(&wire).expect("should decode"), env);
    }

    #[test]
    fn timestamp_message_round_trip(secs in any::<i64>()) {
        let wire = ConvoMessage::Timestamp(secs).marshal();
        prop_assert_eq!(
            ConvoMessage::unmarshal(&wire).expect("should parse"),
            ConvoMessage::Timestamp(secs)
        );
    }
}

#[test]
fn response_request_opcodes_disjoint() {
    let req = RpcRequest::NewConvoRound(murmur_proto::rpc::NewRoundCall { round: 1 })
        .into_frame(3)
        .unwrap();
    assert!(RpcResponse::from_frame(&req).is_err());
}
