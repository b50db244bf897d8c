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

//! End-to-end wire scenarios over a real loopback socket: version and
//! security negotiation, `ServerInit`, and a Raw framebuffer update.

use rustvncserver::VncServer;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::time::Duration;

const PORT: u16 = 15900;

async fn connect() -> TcpStream {
    for _ in 0..50 {
        if let Ok(stream) = TcpStream::connect(("127.0.0.1", PORT)).await {
            return stream;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    panic!("server never accepted a connection on port {PORT}");
}

#[tokio::test]
async fn full_handshake_and_raw_update_round_trip() {
    let server = VncServer::new(4, 2);
    server.set_password(None);

    let mut pixels = vec![0u8; 4 * 2 * 4];
    for chunk in pixels.chunks_exact_mut(4) {
        chunk.copy_from_slice(&[0x10, 0x20, 0x30, 0xFF]);
    }
    server.update_framebuffer(&pixels, 0, 0, 4, 2);

    tokio::spawn({
        let server = server.clone();
        async move {
            let _ = server.listen(PORT).await;
        }
    });

    let mut stream = connect().await;

    // Version negotiation.
    let mut version = [0u8; 12];
    stream.read_exact(&mut version).await.unwrap();
    assert_eq!(&version, b"RFB 003.008\n");
    stream.write_all(b"RFB 003.008\n").await.unwrap();

    // Security negotiation: server offers only SECURITY_TYPE_NONE.
    let mut count = [0u8; 1];
    stream.read_exact(&mut count).await.unwrap();
    assert_eq!(count[0], 1);
    let mut types = vec![0u8; count[0] as usize];
    stream.read_exact(&mut types).await.unwrap();
    assert_eq!(types, vec![1]); // SECURITY_TYPE_NONE
    stream.write_all(&[1]).await.unwrap();

    let mut result = [0u8; 4];
    stream.read_exact(&mut result).await.unwrap();
    assert_eq!(u32::from_be_bytes(result), 0); // SECURITY_RESULT_OK

    // ClientInit: non-shared.
    stream.write_all(&[0]).await.unwrap();

    // ServerInit.
    let mut header = [0u8; 4 + 16 + 4];
    stream.read_exact(&mut header).await.unwrap();
    let width = u16::from_be_bytes([header[0], header[1]]);
    let height = u16::from_be_bytes([header[2], header[3]]);
    assert_eq!((width, height), (4, 2));
    let name_len = u32::from_be_bytes([header[20], header[21], header[22], header[23]]) as usize;
    let mut name = vec![0u8; name_len];
    stream.read_exact(&mut name).await.unwrap();

    // Request a full (non-incremental) update; no SetEncodings was sent,
    // so the session falls back to Raw in the server's native RGBA32 format.
    let mut req = vec![3u8, 0]; // FramebufferUpdateRequest, incremental=0
    req.extend_from_slice(&0u16.to_be_bytes()); // x
    req.extend_from_slice(&0u16.to_be_bytes()); // y
    req.extend_from_slice(&4u16.to_be_bytes()); // width
    req.extend_from_slice(&2u16.to_be_bytes()); // height
    stream.write_all(&req).await.unwrap();

    let mut update_header = [0u8; 4];
    stream.read_exact(&mut update_header).await.unwrap();
    assert_eq!(update_header[0], 0); // SERVER_MSG_FRAMEBUFFER_UPDATE
    assert_eq!(u16::from_be_bytes([update_header[2], update_header[3]]), 1); // one rectangle

    let mut rect_header = [0u8; 12];
    stream.read_exact(&mut rect_header).await.unwrap();
    assert_eq!(i32::from_be_bytes(rect_header[8..12].try_into().unwrap()), 0); // ENCODING_RAW

    let mut body = vec![0u8; 4 * 2 * 4];
    stream.read_exact(&mut body).await.unwrap();
    for chunk in body.chunks_exact(4) {
        assert_eq!(chunk, &[0x10, 0x20, 0x30, 0xFF]);
    }
}
