use std::io::Write;

use mtp_crypto::{AuthKey, DequeBuffer, Side, decrypt_data_v2, encrypt_with_padding};
use mtp_session::transport::{Abridged, Full, Intermediate, Obfuscated, TransportError, derive_keys};
use mtp_session::{
    DecryptError, Dcenter, Framing, Incoming, Message, MessageId, OutgoingBody, Session,
    SessionError, envelope,
};
use mtp_tl::{Identifiable, RawVec, Serializable, functions, types};

fn keyed_dc() -> Dcenter {
    let mut key = [0u8; 256];
    for (i, b) in key.iter_mut().enumerate() { *b = i as u8; }
    let mut dc = Dcenter::new(2);
    dc.install_key(AuthKey::from_bytes(key), 0x1122_3344_5566_7788, 0);
    dc
}

/// Parse the plaintext header the way a server would.
fn open_as_server(dc: &Dcenter, payload: &[u8]) -> (i64, i64, i64, i32, Vec<u8>) {
    let key = dc.key.get().unwrap();
    let mut frame = payload.to_vec();
    let plain = decrypt_data_v2(&mut frame, &key, Side::Client).unwrap();
    let word = |r: std::ops::Range<usize>| i64::from_le_bytes((&plain[r]).try_into().unwrap());
    let seq = i32::from_le_bytes((&plain[24..28]).try_into().unwrap());
    let len = u32::from_le_bytes((&plain[28..32]).try_into().unwrap()) as usize;
    (word(0..8), word(8..16), word(16..24), seq, plain[32..32 + len].to_vec())
}

/// Encrypt a message the way a server would.
fn seal_as_server(dc: &Dcenter, session_id: i64, msg_id: i64, seq_no: i32, body: &[u8]) -> Vec<u8> {
    let key = dc.key.get().unwrap();
    let mut buf = DequeBuffer::with_capacity(32 + body.len() + 32, 24);
    buf.extend(dc.salt.to_le_bytes());
    buf.extend(session_id.to_le_bytes());
    buf.extend(msg_id.to_le_bytes());
    buf.extend(seq_no.to_le_bytes());
    buf.extend((body.len() as u32).to_le_bytes());
    buf.extend(body.iter().copied());
    encrypt_with_padding(&mut buf, &key, Side::Server, &[0x5c; 32]);
    buf.as_ref().to_vec()
}

// ─── Session ──────────────────────────────────────────────────────────────────

#[test]
fn seq_no_parity() {
    let mut s = Session::with_id(1);
    assert_eq!(s.next_seq_no(true), 1);
    assert_eq!(s.next_seq_no(false), 2);
    assert_eq!(s.next_seq_no(true), 3);
    assert_eq!(s.next_seq_no(true), 5);
    assert_eq!(s.next_seq_no(false), 6);
}

#[test]
fn msg_ids_strictly_increase_and_are_word_aligned() {
    let mut s = Session::with_id(1);
    let mut last = 0;
    for _ in 0..1000 {
        let MessageId(id) = s.next_msg_id(0);
        assert!(id > last);
        assert_eq!(id % 4, 0);
        last = id;
    }
}

#[test]
fn packing_without_key_fails_before_counters_move() {
    let mut s = Session::with_id(1);
    let dc = Dcenter::new(4);
    let err = s.pack(&dc, &[0; 4], true).unwrap_err();
    assert_eq!(err, SessionError::KeyMissing);
    assert_eq!(s.next_seq_no(true), 1);
}

#[test]
fn packed_message_opens_on_server_side() {
    let dc = keyed_dc();
    let mut s = Session::with_id(0x0102_0304_0506_0708);
    let body = functions::Ping { ping_id: 99 }.to_bytes();
    let packed = s.pack(&dc, &body, true).unwrap();

    assert_eq!(&packed.payload[..8], &dc.key.get().unwrap().key_id());
    let (salt, session_id, msg_id, seq_no, got) = open_as_server(&dc, &packed.payload);
    assert_eq!(salt, dc.salt);
    assert_eq!(session_id, s.id());
    assert_eq!(msg_id, packed.msg_id.0);
    assert_eq!(seq_no, 1);
    assert_eq!(got, body);
}

#[test]
fn server_frame_decrypts() {
    let dc = keyed_dc();
    let s = Session::with_id(77);
    let body = types::Pong { msg_id: 5, ping_id: 6 }.to_bytes();
    let mut frame = seal_as_server(&dc, 77, 1_000_001, 3, &body);
    let msg = s.decrypt(&dc.key.get().unwrap(), &mut frame).unwrap();
    assert_eq!(msg.session_id, 77);
    assert_eq!(msg.msg_id, 1_000_001);
    assert_eq!(msg.seq_no, 3);
    assert_eq!(msg.body, body);
}

#[test]
fn frame_for_other_session_is_rejected() {
    let dc = keyed_dc();
    let s = Session::with_id(77);
    let mut frame = seal_as_server(&dc, 78, 1, 1, &[0; 4]);
    let err = s.decrypt(&dc.key.get().unwrap(), &mut frame).unwrap_err();
    assert_eq!(err, DecryptError::SessionMismatch { expected: 77, got: 78 });
    assert!(!err.is_fatal());
}

#[test]
fn tampered_frame_is_fatal() {
    let dc = keyed_dc();
    let s = Session::with_id(77);
    let mut frame = seal_as_server(&dc, 77, 1, 1, &[0; 4]);
    let last = frame.len() - 1;
    frame[last] ^= 1;
    let err = s.decrypt(&dc.key.get().unwrap(), &mut frame).unwrap_err();
    assert!(err.is_fatal());
}

#[test]
fn container_keeps_inner_order() {
    let dc = keyed_dc();
    let mut s = Session::with_id(9);
    let bodies = vec![
        OutgoingBody { body: functions::Ping { ping_id: 1 }.to_bytes(), content_related: true },
        OutgoingBody { body: types::MsgsAck { msg_ids: vec![4] }.to_bytes(), content_related: false },
        OutgoingBody { body: functions::Ping { ping_id: 2 }.to_bytes(), content_related: true },
    ];
    let packed = s.pack_container(&dc, &bodies).unwrap();
    assert_eq!(packed.inner.len(), 3);
    assert!(packed.inner.iter().all(|id| *id < packed.container_id));

    let (_, _, msg_id, seq_no, body) = open_as_server(&dc, &packed.payload);
    assert_eq!(msg_id, packed.container_id.0);
    assert_eq!(seq_no % 2, 0);

    let envelopes = envelope::decode(msg_id, seq_no, &body);
    let ids: Vec<i64> = envelopes.iter().map(|e| e.msg_id).collect();
    assert_eq!(ids, packed.inner.iter().map(|m| m.0).collect::<Vec<_>>());
    let seqs: Vec<i32> = envelopes.iter().map(|e| e.seq_no).collect();
    assert_eq!(seqs, vec![1, 2, 3]);
}

#[test]
fn plaintext_frame_layout() {
    let mut s = Session::with_id(1);
    let (id, wire) = s.pack_plain(0, vec![0xAA, 0xBB, 0xCC, 0xDD]);
    assert_eq!(wire.len(), 8 + 8 + 4 + 4);
    assert_eq!(&wire[..8], &[0; 8]);
    assert_eq!(i64::from_le_bytes((&wire[8..16]).try_into().unwrap()), id.0);
    let back = Message::from_plaintext_bytes(&wire).unwrap();
    assert_eq!(back.body, vec![0xAA, 0xBB, 0xCC, 0xDD]);
}

// ─── Envelope ─────────────────────────────────────────────────────────────────

fn rpc_result(req_msg_id: i64, result: &[u8]) -> Vec<u8> {
    let mut out = types::RpcResult::CONSTRUCTOR_ID.to_bytes();
    out.extend(req_msg_id.to_le_bytes());
    out.extend_from_slice(result);
    out
}

fn gzip(data: &[u8]) -> Vec<u8> {
    let mut enc = flate2::write::GzEncoder::new(Vec::new(), flate2::Compression::default());
    enc.write_all(data).unwrap();
    enc.finish().unwrap()
}

#[test]
fn malformed_container_entry_does_not_hide_siblings() {
    let messages = vec![
        types::Message { msg_id: 10, seq_no: 1, body: rpc_result(1, &[1, 0, 0, 0]) },
        // bad_server_salt truncated after its first field
        types::Message { msg_id: 11, seq_no: 2, body: {
            let mut b = types::BadServerSalt::CONSTRUCTOR_ID.to_bytes();
            b.extend(5i64.to_le_bytes());
            b
        } },
        types::Message { msg_id: 12, seq_no: 3, body: types::Pong { msg_id: 7, ping_id: 8 }.to_bytes() },
    ];
    let body = types::MsgContainer { messages: RawVec(messages) }.to_bytes();
    let out = envelope::decode(100, 2, &body);

    assert_eq!(out.len(), 3);
    assert_eq!(
        out[0].item.as_ref().unwrap(),
        &Incoming::RpcResult { req_msg_id: 1, outcome: Ok(vec![1, 0, 0, 0]) }
    );
    assert!(out[1].item.is_err());
    assert_eq!(out[2].item.as_ref().unwrap(), &Incoming::Pong { msg_id: 7, ping_id: 8 });
    assert!(out[0].is_content_related());
    assert!(!out[1].is_content_related());
}

#[test]
fn gzip_inside_rpc_result_is_inflated() {
    let payload: Vec<u8> = (0..64u8).collect();
    let packed = types::GzipPacked { packed_data: gzip(&payload) }.to_bytes();
    let out = envelope::decode(1, 1, &rpc_result(33, &packed));
    assert_eq!(
        out[0].item.as_ref().unwrap(),
        &Incoming::RpcResult { req_msg_id: 33, outcome: Ok(payload) }
    );
}

#[test]
fn unreadable_result_keeps_its_request_id() {
    let packed = types::GzipPacked { packed_data: vec![1, 2, 3, 4, 5, 6, 7, 8] }.to_bytes();
    let out = envelope::decode(1, 1, &rpc_result(33, &packed));
    assert_eq!(out.len(), 1);
    match &out[0].item {
        Err(envelope::EnvelopeError::RpcResult { req_msg_id: 33, source }) => {
            assert!(matches!(**source, envelope::EnvelopeError::Inflate(_)), "{source}");
        }
        other => panic!("unexpected {other:?}"),
    }
}

#[test]
fn gzip_wrapped_message_is_classified() {
    let inner = types::NewSessionCreated { first_msg_id: 1, unique_id: 2, server_salt: 3 }.to_bytes();
    let body = types::GzipPacked { packed_data: gzip(&inner) }.to_bytes();
    let out = envelope::decode(1, 1, &body);
    assert_eq!(
        out[0].item.as_ref().unwrap(),
        &Incoming::NewSession { first_msg_id: 1, server_salt: 3 }
    );
}

#[test]
fn rpc_error_is_split_from_success() {
    let err = types::RpcError { error_code: 420, error_message: "FLOOD_WAIT_3".into() }.to_bytes();
    let out = envelope::decode(1, 1, &rpc_result(9, &err));
    match out[0].item.as_ref().unwrap() {
        Incoming::RpcResult { req_msg_id: 9, outcome: Err(e) } => {
            assert_eq!(e.error_code, 420);
            assert_eq!(e.error_message, "FLOOD_WAIT_3");
        }
        other => panic!("unexpected {other:?}"),
    }
}

#[test]
fn unknown_constructor_is_passed_through() {
    let body = [0x78, 0x56, 0x34, 0x12, 1, 2, 3, 4];
    let out = envelope::decode(1, 1, &body);
    assert_eq!(
        out[0].item.as_ref().unwrap(),
        &Incoming::Other { constructor: 0x12345678, body: body.to_vec() }
    );
}

// ─── Framings ─────────────────────────────────────────────────────────────────

fn roundtrip<F: Framing>(sender: &mut F, receiver: &mut F, payload: &[u8]) -> Vec<u8> {
    let mut wire = Vec::new();
    sender.encode(payload, &mut wire);
    // Feed one byte at a time to exercise partial reads.
    let mut buf = Vec::new();
    let mut got = None;
    for b in wire {
        assert!(got.is_none());
        buf.push(b);
        got = receiver.decode(&mut buf).unwrap();
    }
    assert!(buf.is_empty());
    got.unwrap()
}

#[test]
fn abridged_short_and_long_lengths() {
    let short = vec![1u8; 8];
    let mut wire = Vec::new();
    Abridged::new().encode(&short, &mut wire);
    assert_eq!(wire[0], 2);
    assert_eq!(roundtrip(&mut Abridged::new(), &mut Abridged::new(), &short), short);

    let long = vec![2u8; 0x7f * 4];
    let mut wire = Vec::new();
    Abridged::new().encode(&long, &mut wire);
    assert_eq!(&wire[..4], &[0x7f, 0x7f, 0, 0]);
    assert_eq!(roundtrip(&mut Abridged::new(), &mut Abridged::new(), &long), long);
    assert_eq!(Abridged::new().init_bytes(), vec![0xef]);
}

#[test]
fn intermediate_roundtrip() {
    let payload = vec![3u8; 20];
    let mut wire = Vec::new();
    Intermediate::new().encode(&payload, &mut wire);
    assert_eq!(&wire[..4], &20u32.to_le_bytes());
    assert_eq!(roundtrip(&mut Intermediate::new(), &mut Intermediate::new(), &payload), payload);
    assert_eq!(Intermediate::new().init_bytes(), vec![0xee; 4]);
}

#[test]
fn negative_word_is_server_error() {
    let mut buf = Vec::new();
    Intermediate::new().encode(&(-404i32).to_le_bytes(), &mut buf);
    assert_eq!(Intermediate::new().decode(&mut buf), Err(TransportError::Server(-404)));
}

#[test]
fn full_checks_crc_and_sequence() {
    let mut tx = Full::new();
    let mut rx = Full::new();
    assert!(tx.init_bytes().is_empty());
    for i in 0..3u8 {
        let payload = vec![i; 12];
        assert_eq!(roundtrip(&mut tx, &mut rx, &payload), payload);
    }

    let mut wire = Vec::new();
    Full::new().encode(&[1, 2, 3, 4], &mut wire);
    assert_eq!(&wire[..4], &16u32.to_le_bytes());
    let mut corrupt = wire.clone();
    corrupt[9] ^= 0xff;
    assert!(matches!(
        Full::new().decode(&mut corrupt),
        Err(TransportError::ChecksumMismatch { .. })
    ));

    // A second packet with seq 0 is out of order.
    let mut rx = Full::new();
    let mut again = wire.clone();
    rx.decode(&mut wire).unwrap().unwrap();
    assert_eq!(
        rx.decode(&mut again),
        Err(TransportError::SequenceMismatch { expected: 1, got: 0 })
    );

    let mut short = 8u32.to_le_bytes().to_vec();
    assert_eq!(Full::new().decode(&mut short), Err(TransportError::BadLength(8)));
}

#[test]
fn obfuscated_header_layout() {
    let nonce: [u8; 64] = std::array::from_fn(|i| i as u8 + 1);
    let mut obf = Obfuscated::with_nonce(Abridged::new(), nonce, None).unwrap();
    let init = obf.init_bytes();
    assert_eq!(init.len(), 64);
    assert_eq!(&init[..56], &nonce[..56]);
    // The tag is only visible after decryption with the client key.
    assert_ne!(&init[56..60], &[0xef; 4]);

    let keys = derive_keys(&{ let mut n = nonce; n[56..60].copy_from_slice(&[0xef; 4]); n }, None);
    assert_eq!(&keys.enc_key[..], &nonce[8..40]);
    let mut reversed = nonce[8..56].to_vec();
    reversed.reverse();
    assert_eq!(&keys.dec_key[..], &reversed[..32]);
    assert_eq!(&keys.dec_iv[..], &reversed[32..48]);
}

#[test]
fn obfuscated_traffic_mirrors_between_peers() {
    let nonce: [u8; 64] = std::array::from_fn(|i| (i as u8).wrapping_mul(7) | 1);
    let secret = [0x42; 16];
    let mut client = Obfuscated::with_nonce(Intermediate::new(), nonce, Some(&secret)).unwrap();
    let _ = client.init_bytes();

    // The server decrypts with the client's encryption key and encrypts with
    // the reversed one, so a peer built from the same header with the key
    // pairs swapped can read our traffic.
    let keys = derive_keys(&{ let mut n = nonce; n[56..60].copy_from_slice(&[0xee; 4]); n }, Some(&secret));
    let mut server_dec = mtp_crypto::aes::AesCtr::new(&keys.enc_key, &keys.enc_iv);
    let mut server_enc = mtp_crypto::aes::AesCtr::new(&keys.dec_key, &keys.dec_iv);
    let mut header = nonce;
    header[56..60].copy_from_slice(&[0xee; 4]);
    server_dec.apply(&mut header);

    let mut wire = Vec::new();
    client.encode(&[9, 9, 9, 9], &mut wire);
    server_dec.apply(&mut wire);
    assert_eq!(wire, [4, 0, 0, 0, 9, 9, 9, 9]);

    let mut reply = vec![8, 0, 0, 0, 1, 2, 3, 4, 5, 6, 7, 8];
    server_enc.apply(&mut reply);
    assert_eq!(client.decode(&mut reply).unwrap(), Some(vec![1, 2, 3, 4, 5, 6, 7, 8]));
}

#[test]
fn full_framing_cannot_be_obfuscated() {
    assert!(Obfuscated::with_nonce(Full::new(), [1; 64], None).is_none());
}

#[test]
fn random_obfuscation_header_avoids_reserved_prefixes() {
    for _ in 0..32 {
        let mut obf = Obfuscated::new(Abridged::new(), None).unwrap().unwrap();
        let init = obf.init_bytes();
        assert_ne!(init[0], 0xef);
        assert_ne!(&init[4..8], &[0; 4]);
        assert_ne!(&init[..4], b"POST");
    }
}
