// Copyright 2025 Dustin McAfee
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! End-to-end LTSM channel scenario over a real loopback socket: a
//! client opens a non-zero channel through the system-command channel
//! and sends bytes on it; the embedding application must observe them
//! verbatim via `ServerEvent::ChannelDataReceived`.

use rustvncserver::{ServerEvent, VncServer};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::time::Duration;

const PORT: u16 = 15901;
const ENCODING_LTSM: i32 = 0x4C54_534D;

async fn connect() -> TcpStream {
    for _ in 0..50 {
        if let Ok(stream) = TcpStream::connect(("127.0.0.1", PORT)).await {
            return stream;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    panic!("server never accepted a connection on port {PORT}");
}

fn ltsm_message(channel: u8, payload: &[u8]) -> Vec<u8> {
    let mut buf = Vec::with_capacity(8 + payload.len());
    buf.push(119); // CLIENT_MSG_LTSM
    buf.push(channel);
    buf.extend_from_slice(&0u16.to_be_bytes()); // flags
    buf.extend_from_slice(&(payload.len() as u32).to_be_bytes());
    buf.extend_from_slice(payload);
    buf
}

#[tokio::test]
async fn channel_open_then_data_reaches_the_embedding_application() {
    let server = VncServer::new(2, 2);
    server.set_password(None);
    let mut events = server.take_events().unwrap();

    tokio::spawn({
        let server = server.clone();
        async move {
            let _ = server.listen(PORT).await;
        }
    });

    let mut stream = connect().await;

    // Version + security (None) + ClientInit.
    let mut version = [0u8; 12];
    stream.read_exact(&mut version).await.unwrap();
    stream.write_all(b"RFB 003.008\n").await.unwrap();
    let mut count = [0u8; 1];
    stream.read_exact(&mut count).await.unwrap();
    let mut types = vec![0u8; count[0] as usize];
    stream.read_exact(&mut types).await.unwrap();
    stream.write_all(&[1]).await.unwrap();
    let mut result = [0u8; 4];
    stream.read_exact(&mut result).await.unwrap();
    stream.write_all(&[0]).await.unwrap(); // non-shared ClientInit

    // ServerInit.
    let mut header = [0u8; 4 + 16 + 4];
    stream.read_exact(&mut header).await.unwrap();
    let name_len = u32::from_be_bytes([header[20], header[21], header[22], header[23]]) as usize;
    let mut name = vec![0u8; name_len];
    stream.read_exact(&mut name).await.unwrap();

    // SetEncodings advertising LTSM.
    let mut set_enc = vec![2u8, 0];
    set_enc.extend_from_slice(&1u16.to_be_bytes());
    set_enc.extend_from_slice(&ENCODING_LTSM.to_be_bytes());
    stream.write_all(&set_enc).await.unwrap();

    // System-channel ChannelOpen admitting channel 1 as a "fuse" endpoint.
    let open_cmd = br#"{"cmd":"ChannelOpen","id":1,"kind":"fuse","target":"/mnt","mode":"rw"}"#;
    stream.write_all(&ltsm_message(0, open_cmd)).await.unwrap();

    let opened = loop {
        match events.recv().await.unwrap() {
            ServerEvent::ChannelOpened { channel, kind, .. } => break (channel, kind),
            _ => continue,
        }
    };
    assert_eq!(opened, (1, "fuse".to_string()));

    // Data on the admitted channel must reach the application verbatim,
    // and must keep working for a second frame (the admitted channel's
    // ingress receiver must not have been dropped after the first one).
    stream.write_all(&ltsm_message(1, b"ping")).await.unwrap();
    stream.write_all(&ltsm_message(1, b"pong")).await.unwrap();

    let mut received = Vec::new();
    while received.len() < 2 {
        if let ServerEvent::ChannelDataReceived { channel, payload, .. } = events.recv().await.unwrap() {
            assert_eq!(channel, 1);
            received.push(payload);
        }
    }
    assert_eq!(received, vec![b"ping".to_vec(), b"pong".to_vec()]);
}
