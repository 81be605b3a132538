//! End-to-end runs against a fake DC speaking the abridged transport.

use std::net::SocketAddr;
use std::time::Duration;

use mtp_crypto::{AuthKey, DequeBuffer, Side, decrypt_data_v2, encrypt_with_padding};
use mtp_sender::{
    Config, ConfigSource, DcAddress, Instance, InvocationError, ReconnectConfig, StartError, Target,
};
use mtp_session::{DcSnapshot, PersistedState};
use mtp_tl::{Blob, Cursor, Deserializable, Identifiable, Serializable, enums, functions, types};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};

const UPDATE_ID: u32 = 0x4433_2211;

/// The unsolicited message the fake DC pushes ahead of every pong.
fn update_for(ping_id: i64) -> Vec<u8> {
    let mut body = UPDATE_ID.to_le_bytes().to_vec();
    body.extend_from_slice(&ping_id.to_le_bytes());
    body
}

fn key_bytes() -> [u8; 256] {
    let mut key = [0u8; 256];
    for (i, b) in key.iter_mut().enumerate() { *b = (i * 7) as u8; }
    key
}

async fn read_frame(stream: &mut TcpStream) -> std::io::Result<Vec<u8>> {
    let mut len = [0u8; 4];
    stream.read_exact(&mut len[..1]).await?;
    let words = if len[0] == 0x7f {
        stream.read_exact(&mut len[..3]).await?;
        u32::from_le_bytes([len[0], len[1], len[2], 0]) as usize
    } else {
        len[0] as usize
    };
    let mut frame = vec![0u8; words * 4];
    stream.read_exact(&mut frame).await?;
    Ok(frame)
}

async fn write_frame(stream: &mut TcpStream, payload: &[u8]) -> std::io::Result<()> {
    let words = payload.len() / 4;
    let mut out = Vec::with_capacity(payload.len() + 4);
    if words < 0x7f {
        out.push(words as u8);
    } else {
        out.push(0x7f);
        out.extend_from_slice(&(words as u32).to_le_bytes()[..3]);
    }
    out.extend_from_slice(payload);
    stream.write_all(&out).await
}

/// Strip `invokeWithLayer` and `initConnection` wrappers off a query.
fn unwrap_query(body: &[u8]) -> Vec<u8> {
    let mut cur = Cursor::from_slice(body);
    if cur.peek_u32().unwrap() != functions::InvokeWithLayer::<()>::CONSTRUCTOR_ID {
        return body.to_vec();
    }
    u32::deserialize(&mut cur).unwrap();
    i32::deserialize(&mut cur).unwrap();
    assert_eq!(u32::deserialize(&mut cur).unwrap(), functions::InitConnection::<()>::CONSTRUCTOR_ID);
    u32::deserialize(&mut cur).unwrap();
    i32::deserialize(&mut cur).unwrap();
    for _ in 0..6 {
        String::deserialize(&mut cur).unwrap();
    }
    Blob::deserialize(&mut cur).unwrap().0
}

struct FakeDc {
    key:  AuthKey,
    addr: SocketAddr,
    next_msg_id: i64,
}

impl FakeDc {
    fn seal(&mut self, session_id: i64, body: &[u8]) -> Vec<u8> {
        self.next_msg_id += 4;
        let mut buf = DequeBuffer::with_capacity(32 + body.len() + 32, 24);
        buf.extend(1i64.to_le_bytes());
        buf.extend(session_id.to_le_bytes());
        buf.extend(self.next_msg_id.to_le_bytes());
        buf.extend(1i32.to_le_bytes());
        buf.extend((body.len() as u32).to_le_bytes());
        buf.extend(body.iter().copied());
        encrypt_with_padding(&mut buf, &self.key, Side::Server, &[0x3a; 32]);
        buf.as_ref().to_vec()
    }

    fn server_config(&self) -> Vec<u8> {
        types::Config {
            flags: 0,
            date: 1_700_000_000,
            expires: 1_700_003_600,
            test_mode: false,
            this_dc: 2,
            dc_options: vec![enums::DcOption::DcOption(types::DcOption {
                id: 2,
                ip_address: self.addr.ip().to_string(),
                port: self.addr.port() as i32,
                ..Default::default()
            })],
            rest: Blob(Vec::new()),
        }
        .to_bytes()
    }

    /// The replies for one client message, in order.
    fn answer(&self, msg_id: i64, query: &[u8]) -> Vec<Vec<u8>> {
        let mut cur = Cursor::from_slice(query);
        let Ok(id) = u32::deserialize(&mut cur) else { return Vec::new() };
        let result = match id {
            types::MsgsAck::CONSTRUCTOR_ID => return Vec::new(),
            functions::Ping::CONSTRUCTOR_ID => {
                let ping_id = i64::deserialize(&mut cur).unwrap();
                return vec![update_for(ping_id), types::Pong { msg_id, ping_id }.to_bytes()];
            }
            functions::help::GetConfig::CONSTRUCTOR_ID => self.server_config(),
            _ => types::RpcError { error_code: 400, error_message: "METHOD_INVALID".into() }.to_bytes(),
        };
        vec![types::RpcResult { req_msg_id: msg_id, result: Blob(result) }.to_bytes()]
    }

    async fn serve(mut self, listener: TcpListener) {
        while let Ok((mut stream, _)) = listener.accept().await {
            let mut tag = [0u8; 1];
            if stream.read_exact(&mut tag).await.is_err() || tag[0] != 0xef {
                continue;
            }
            'conn: while let Ok(mut frame) = read_frame(&mut stream).await {
                let plain = decrypt_data_v2(&mut frame, &self.key, Side::Client).unwrap();
                let session_id = i64::from_le_bytes(plain[8..16].try_into().unwrap());
                let msg_id = i64::from_le_bytes(plain[16..24].try_into().unwrap());
                let len = u32::from_le_bytes(plain[28..32].try_into().unwrap()) as usize;
                let query = unwrap_query(&plain[32..32 + len]);

                for reply in self.answer(msg_id, &query) {
                    let sealed = self.seal(session_id, &reply);
                    if write_frame(&mut stream, &sealed).await.is_err() {
                        break 'conn;
                    }
                }
            }
        }
    }
}

async fn start_fake_dc() -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let dc = FakeDc { key: AuthKey::from_bytes(key_bytes()), addr, next_msg_id: 0x6000_0000_0000_0001 };
    tokio::spawn(dc.serve(listener));
    addr
}

fn config_for(addr: SocketAddr) -> Config {
    Config {
        dc_addresses: Some(vec![DcAddress::new(2, addr.to_string())]),
        main_dc: 2,
        connect_timeout: Duration::from_secs(5),
        state: Some(PersistedState {
            main_dc: 2,
            dcs: vec![DcSnapshot { dc_id: 2, auth_key: Some(key_bytes()), salt: 1, time_offset: 0 }],
        }),
        ..Default::default()
    }
}

#[tokio::test]
async fn discovers_dc_table_and_answers_ping() {
    let addr = start_fake_dc().await;
    let instance = Instance::connect(config_for(addr)).await.unwrap();

    let dcs = instance.current_config();
    assert_eq!(dcs.source, ConfigSource::Server { date: 1_700_000_000, expires: 1_700_003_600 });
    assert_eq!(dcs.address(2, false).unwrap().addr, addr.to_string());

    let enums::Pong::Pong(pong) = instance
        .invoke(&functions::Ping { ping_id: 0x5eed }, Target::Main)
        .await
        .unwrap();
    assert_eq!(pong.ping_id, 0x5eed);

    let state = instance.export_state().await.unwrap();
    assert_eq!(state.main_dc, 2);
    assert_eq!(state.dc(2).unwrap().auth_key, Some(key_bytes()));
    instance.shutdown();
}

#[tokio::test]
async fn rpc_errors_reach_the_caller() {
    let addr = start_fake_dc().await;
    let instance = Instance::connect(config_for(addr)).await.unwrap();

    let err = instance.submit(vec![0xef, 0xbe, 0xad, 0xde], Target::Main).await.unwrap_err();
    assert!(err.is("METHOD_INVALID"), "{err}");
    instance.shutdown();
}

#[tokio::test]
async fn unsolicited_messages_become_updates() {
    let addr = start_fake_dc().await;
    let instance = Instance::connect(config_for(addr)).await.unwrap();
    let mut updates = instance.updates().unwrap();
    instance.invoke(&functions::Ping { ping_id: 7 }, Target::Main).await.unwrap();

    let update = tokio::time::timeout(Duration::from_secs(5), updates.next()).await.unwrap();
    assert_eq!(update, Some(update_for(7)));
    instance.shutdown();
}

#[tokio::test]
async fn updates_before_subscribing_are_not_kept() {
    let addr = start_fake_dc().await;
    let instance = Instance::connect(config_for(addr)).await.unwrap();
    instance.invoke(&functions::Ping { ping_id: 1 }, Target::Main).await.unwrap();

    let mut updates = instance.updates().unwrap();
    instance.invoke(&functions::Ping { ping_id: 2 }, Target::Main).await.unwrap();
    let update = tokio::time::timeout(Duration::from_secs(5), updates.next()).await.unwrap();
    assert_eq!(update, Some(update_for(2)));
    instance.shutdown();
}

#[tokio::test]
async fn unreachable_dc_fails_startup() {
    let addr = {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        listener.local_addr().unwrap()
    };
    let mut config = config_for(addr);
    config.reconnect = ReconnectConfig {
        max_attempts: 1,
        base_delay: Duration::from_millis(10),
        ..Default::default()
    };

    match Instance::connect(config).await {
        Err(StartError::NoReachableDc) => {}
        Err(e) => panic!("unexpected error: {e}"),
        Ok(_) => panic!("connected to a closed port"),
    }
}

#[tokio::test]
async fn shut_down_instance_rejects_calls() {
    let addr = start_fake_dc().await;
    let instance = Instance::connect(config_for(addr)).await.unwrap();
    instance.shutdown();

    let err = tokio::time::timeout(
        Duration::from_secs(5),
        instance.submit(functions::Ping { ping_id: 1 }.to_bytes(), Target::Main),
    )
    .await
    .unwrap()
    .unwrap_err();
    assert!(matches!(err, InvocationError::Dropped), "{err}");
}
