use bytes::BytesMut;
use homeport_domain::{ChatMessage, IdentityId, MessageId, PresenceUpdate, RoomId};
use homeport_wire::{
	DEFAULT_MAX_FRAME_SIZE, Envelope, EventFrame, FramingError, Msg, decode_frame, encode_frame, encode_frame_default,
	try_decode_frame_from_buffer,
};
use proptest::prelude::*;

fn message_envelope(room: &str, sender: i64, content: String, sent_at: i64) -> Envelope {
	Envelope::v1(Msg::Event(EventFrame::Message(ChatMessage {
		id: MessageId::new_v4(),
		room_id: RoomId::new(room).expect("valid room id"),
		sender_id: IdentityId::new(sender),
		content,
		sent_at_unix_ms: sent_at,
	})))
}

#[test]
fn envelope_roundtrip_through_frame() {
	let env = message_envelope("lobby", 7, "hello there".to_string(), 1_700_000_000_000);

	let frame = encode_frame_default(&env).expect("encode");
	let (decoded, consumed) = decode_frame::<Envelope>(&frame, DEFAULT_MAX_FRAME_SIZE).expect("decode");

	assert_eq!(consumed, frame.len());
	assert_eq!(decoded, env);
}

#[test]
fn back_to_back_frames_decode_in_order() {
	let first = message_envelope("lobby", 1, "first".to_string(), 1);
	let second = Envelope::v1(Msg::Event(EventFrame::Presence(PresenceUpdate {
		identity_id: IdentityId::new(2),
		is_online: false,
		observed_at_unix_ms: 2,
	})));

	let mut buf = BytesMut::new();
	buf.extend_from_slice(&encode_frame_default(&first).expect("encode first"));
	buf.extend_from_slice(&encode_frame_default(&second).expect("encode second"));

	let a = try_decode_frame_from_buffer::<Envelope>(&mut buf, DEFAULT_MAX_FRAME_SIZE)
		.expect("ok")
		.expect("first frame");
	let b = try_decode_frame_from_buffer::<Envelope>(&mut buf, DEFAULT_MAX_FRAME_SIZE)
		.expect("ok")
		.expect("second frame");

	assert_eq!(a, first);
	assert_eq!(b, second);
	assert!(buf.is_empty());
}

#[test]
fn oversized_payload_is_rejected_before_writing() {
	let env = message_envelope("lobby", 1, "x".repeat(4096), 1);
	let err = encode_frame(&env, 64).unwrap_err();
	match err {
		FramingError::FrameTooLarge { len, max } => assert!(len > max),
		other => panic!("unexpected error: {other:?}"),
	}
}

proptest! {
	#[test]
	fn frame_roundtrip_arbitrary_content(content in ".{0,512}", sender in any::<i64>(), sent_at in any::<i64>()) {
		let env = message_envelope("ops-room", sender, content, sent_at);

		let frame = encode_frame_default(&env).expect("encode");
		let (decoded, consumed) = decode_frame::<Envelope>(&frame, DEFAULT_MAX_FRAME_SIZE).expect("decode");

		prop_assert_eq!(consumed, frame.len());
		prop_assert_eq!(decoded, env);
	}

	#[test]
	fn arbitrary_split_points_still_decode(content in ".{0,128}", split in 0usize..32) {
		let env = message_envelope("ops-room", 9, content, 42);
		let frame = encode_frame_default(&env).expect("encode");
		let split = split.min(frame.len());

		let mut buf = BytesMut::new();
		buf.extend_from_slice(&frame[..split]);
		let early = try_decode_frame_from_buffer::<Envelope>(&mut buf, DEFAULT_MAX_FRAME_SIZE).expect("ok");
		if split < frame.len() {
			prop_assert!(early.is_none());
		}

		buf.extend_from_slice(&frame[split..]);
		if early.is_none() {
			let decoded = try_decode_frame_from_buffer::<Envelope>(&mut buf, DEFAULT_MAX_FRAME_SIZE)
				.expect("ok")
				.expect("frame completes");
			prop_assert_eq!(decoded, env);
		}
		prop_assert!(buf.is_empty());
	}
}
