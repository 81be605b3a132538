use mtp_tl::deserialize::Error;
use mtp_tl::{
    enums, from_words, functions, to_words, types, Blob, Cursor, Deserializable, Identifiable,
    Int, RawVec, RemoteCall, Serializable,
};

// ── Primitives ────────────────────────────────────────────────────────────────

#[test]
fn roundtrip_i32() {
    for v in [0i32, -1, i32::MAX, i32::MIN, 42] {
        let bytes = v.to_bytes();
        assert_eq!(i32::from_bytes(&bytes).unwrap(), v);
    }
}

#[test]
fn i64_is_two_words_low_first() {
    let words = to_words(&0x1122_3344_5566_7788i64.to_bytes());
    assert_eq!(words, vec![0x5566_7788, 0x1122_3344]);
}

#[test]
fn bool_constructors() {
    assert_eq!(to_words(&true.to_bytes()), vec![0x997275b5]);
    assert_eq!(to_words(&false.to_bytes()), vec![0xbc799737]);
    assert!(bool::from_bytes(&true.to_bytes()).unwrap());
    assert!(!bool::from_bytes(&false.to_bytes()).unwrap());
}

#[test]
fn bool_rejects_other_ids() {
    let err = bool::from_bytes(&0xdeadbeefu32.to_bytes()).unwrap_err();
    assert_eq!(err, Error::BadTypeId { id: 0xdeadbeef });
}

#[test]
fn boxed_int() {
    let bytes = Int(1).to_bytes();
    assert_eq!(to_words(&bytes), vec![0xa8509bda, 1]);
    assert_eq!(Int::from_bytes(&bytes).unwrap(), Int(1));
}

#[test]
fn boxed_int_wrong_constructor() {
    let bytes = from_words(&[0x12345678, 1]);
    assert_eq!(
        Int::from_bytes(&bytes),
        Err(Error::UnexpectedConstructor { expected: 0xa8509bda, got: 0x12345678 })
    );
}

// ── Strings / bytes ───────────────────────────────────────────────────────────

#[test]
fn short_string_fits_one_word() {
    let bytes = "abc".to_bytes();
    assert_eq!(bytes, vec![3, b'a', b'b', b'c']);
    assert_eq!(String::from_bytes(&bytes).unwrap(), "abc");
}

#[test]
fn four_char_string_pads_to_two_words() {
    let bytes = "abcd".to_bytes();
    assert_eq!(bytes, vec![4, b'a', b'b', b'c', b'd', 0, 0, 0]);
}

#[test]
fn empty_string() {
    let bytes = String::new().to_bytes();
    assert_eq!(bytes, vec![0, 0, 0, 0]);
    assert_eq!(String::from_bytes(&bytes).unwrap(), "");
}

#[test]
fn long_string_uses_extended_header() {
    let s = "x".repeat(300);
    let bytes = s.to_bytes();
    assert_eq!(&bytes[..4], &[0xfe, 0x2c, 0x01, 0x00]);
    assert_eq!(bytes.len() % 4, 0);
    assert_eq!(String::from_bytes(&bytes).unwrap(), s);
}

#[test]
fn bytes_always_word_aligned() {
    for len in [0usize, 1, 2, 3, 4, 5, 252, 253, 254, 255, 256, 1000] {
        let v = vec![0x5au8; len];
        let bytes = v.to_bytes();
        assert_eq!(bytes.len() % 4, 0, "len {len}");
        assert_eq!(bytes.len(), v.serialized_len(), "len {len}");

        let mut cursor = Cursor::from_slice(&bytes);
        assert_eq!(Vec::<u8>::deserialize(&mut cursor).unwrap(), v);
        assert_eq!(cursor.pos(), bytes.len(), "len {len}");
    }
}

#[test]
fn truncated_string_reports_sizes() {
    // Claims 10 bytes, carries 3.
    let err = Vec::<u8>::from_bytes(&[10, 1, 2, 3]).unwrap_err();
    assert_eq!(err, Error::InsufficientData { needed: 10, remaining: 3 });
}

// ── Vectors ───────────────────────────────────────────────────────────────────

#[test]
fn vector_of_ints() {
    let v: Vec<i32> = vec![1, 2, 3, -99];
    let bytes = v.to_bytes();
    assert_eq!(to_words(&bytes)[..2], [0x1cb5c415, 4]);
    assert_eq!(Vec::<i32>::from_bytes(&bytes).unwrap(), v);
}

#[test]
fn empty_vector() {
    let bytes = Vec::<i64>::new().to_bytes();
    assert_eq!(to_words(&bytes), vec![0x1cb5c415, 0]);
    assert_eq!(Vec::<i64>::from_bytes(&bytes).unwrap(), Vec::<i64>::new());
}

#[test]
fn bare_vector_has_no_header() {
    let bytes = RawVec(vec![7i32, 8]).to_bytes();
    assert_eq!(to_words(&bytes), vec![2, 7, 8]);
}

#[test]
fn vector_count_larger_than_buffer() {
    let bytes = from_words(&[0x1cb5c415, 1_000_000, 1]);
    assert!(matches!(
        Vec::<i32>::from_bytes(&bytes),
        Err(Error::InsufficientData { .. })
    ));
}

#[test]
fn truncated_primitive() {
    assert_eq!(
        i32::from_bytes(&[0x01, 0x02]),
        Err(Error::InsufficientData { needed: 4, remaining: 2 })
    );
}

// ── Option ────────────────────────────────────────────────────────────────────

#[test]
fn option_none_writes_nothing() {
    let v: Option<i32> = None;
    assert_eq!(v.to_bytes(), b"");
}

#[test]
fn option_some_writes_inner() {
    assert_eq!(Some(42i32).to_bytes(), 42i32.to_bytes());
}

// ── Schema types ──────────────────────────────────────────────────────────────

#[test]
fn ping_serializes_id_then_fields() {
    let words = to_words(&functions::Ping { ping_id: 5 }.to_bytes());
    assert_eq!(words, vec![0x7abe77ec, 5, 0]);
}

#[test]
fn get_config_is_a_single_word() {
    assert_eq!(to_words(&functions::help::GetConfig {}.to_bytes()), vec![0xc4f9186b]);
}

#[test]
fn boxed_dispatch_picks_variant() {
    let salt = types::BadServerSalt {
        bad_msg_id: 10,
        bad_msg_seqno: 3,
        error_code: 48,
        new_server_salt: 0x0102_0304_0506_0708,
    };
    let bytes = salt.to_bytes();
    match enums::BadMsgNotification::from_bytes(&bytes).unwrap() {
        enums::BadMsgNotification::BadServerSalt(s) => assert_eq!(s, salt),
        other => panic!("wrong variant: {other:?}"),
    }
}

#[test]
fn boxed_dispatch_unknown_id() {
    let bytes = from_words(&[0x0badf00d, 0, 0]);
    assert_eq!(
        enums::Pong::from_bytes(&bytes),
        Err(Error::BadTypeId { id: 0x0badf00d })
    );
}

#[test]
fn rpc_result_keeps_raw_payload() {
    let inner = types::Pong { msg_id: 1, ping_id: 2 }.to_bytes();
    let result = types::RpcResult { req_msg_id: 99, result: Blob(inner.clone()) };
    let bytes = result.to_bytes();

    let mut cursor = Cursor::from_slice(&bytes);
    assert_eq!(u32::deserialize(&mut cursor).unwrap(), types::RpcResult::CONSTRUCTOR_ID);
    let decoded = types::RpcResult::deserialize(&mut cursor).unwrap();
    assert_eq!(decoded.req_msg_id, 99);
    assert_eq!(decoded.result.0, inner);
    assert_eq!(cursor.remaining(), 0);
}

#[test]
fn container_messages_roundtrip() {
    let container = types::MsgContainer {
        messages: RawVec(vec![
            types::Message { msg_id: 4, seq_no: 1, body: 7i32.to_bytes() },
            types::Message { msg_id: 8, seq_no: 2, body: Int(5).to_bytes() },
        ]),
    };
    let bytes = container.to_bytes();
    let words = to_words(&bytes);
    assert_eq!(words[0], 0x73f1f8dc);
    assert_eq!(words[1], 2);
    // msg_id (2 words) + seqno + bytes
    assert_eq!(words[5], 4);

    let mut cursor = Cursor::from_slice(&bytes[4..]);
    assert_eq!(types::MsgContainer::deserialize(&mut cursor).unwrap(), container);
}

#[test]
fn dc_option_flags_and_secret() {
    let opt = types::DcOption {
        ipv6: true,
        media_only: true,
        id: 2,
        ip_address: "2001:67c:4e8:f002::a".into(),
        port: 443,
        secret: Some(vec![1, 2, 3]),
        ..Default::default()
    };
    let bytes = opt.to_bytes();
    assert_eq!(to_words(&bytes)[1], 0b11 | (1 << 10));

    let decoded = enums::DcOption::from_bytes(&bytes).unwrap();
    assert_eq!(decoded, enums::DcOption::DcOption(opt));
}

#[test]
fn config_prefix_and_tail() {
    let tail = from_words(&[0xdead, 0xbeef]);
    let config = types::Config {
        flags: 0,
        date: 1_700_000_000,
        expires: 1_700_003_600,
        test_mode: false,
        this_dc: 2,
        dc_options: vec![
            types::DcOption {
                id: 1,
                ip_address: "149.154.175.53".into(),
                port: 443,
                ..Default::default()
            }
            .into(),
        ],
        rest: Blob(tail.clone()),
    };
    let bytes = config.to_bytes();
    let enums::Config::Config(decoded) = enums::Config::from_bytes(&bytes).unwrap();
    assert_eq!(decoded.this_dc, 2);
    assert_eq!(decoded.dc_options.len(), 1);
    assert_eq!(decoded.rest.0, tail);
    assert_eq!(decoded.to_bytes(), bytes);
}

#[test]
fn wrappers_nest_query_verbatim() {
    let init = functions::InitConnection {
        api_id: 1,
        device_model: "d".into(),
        system_version: "s".into(),
        app_version: "a".into(),
        system_lang_code: "en".into(),
        lang_pack: String::new(),
        lang_code: "en".into(),
        query: functions::help::GetConfig {},
    };
    let call = functions::InvokeWithLayer { layer: mtp_tl::LAYER, query: init };
    let words = to_words(&call.to_bytes());
    assert_eq!(words[0], 0xda9b0d0d);
    assert_eq!(words[1], mtp_tl::LAYER as u32);
    assert_eq!(words[2], 0xc1cd5ea9);
    assert_eq!(words[3], 0, "flags");
    assert_eq!(*words.last().unwrap(), 0xc4f9186b);

    fn returns_config<R: RemoteCall<Return = enums::Config>>(_: &R) {}
    returns_config(&call);
}

#[test]
fn future_salts_inner_entries_are_bare() {
    let salts = types::FutureSalts {
        req_msg_id: 1,
        now: 2,
        salts: RawVec(vec![types::FutureSalt { valid_since: 3, valid_until: 4, salt: 5 }]),
    };
    let words = to_words(&salts.to_bytes());
    // id, req_msg_id(2), now, count, then the bare entry
    assert_eq!(words[5], 3);
    assert_eq!(words.len(), 5 + 4);
}
