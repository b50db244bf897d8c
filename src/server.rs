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

//! The public `VncServer` handle: owns the shared framebuffer, accepts
//! TCP connections, and spawns a [`crate::client::run`] task per client.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, RwLock};

use log::{error, info};
use tokio::net::TcpListener;
use tokio::sync::{broadcast, mpsc};

use crate::client::{self, ClientConfig};
use crate::error::Result;
use crate::events::ServerEvent;
use crate::framebuffer::FrameBuffer;
use crate::region::Region;

/// Depth of the broadcast channel that carries damaged regions from
/// [`VncServer::update_framebuffer`] out to every active connection.
const DAMAGE_CHANNEL_CAPACITY: usize = 64;

struct Inner {
    framebuffer: Arc<Mutex<FrameBuffer>>,
    password: RwLock<Option<String>>,
    desktop_name: RwLock<String>,
    next_client_id: AtomicUsize,
    damage: broadcast::Sender<Region>,
    events_tx: mpsc::UnboundedSender<ServerEvent>,
    events_rx: Mutex<Option<mpsc::UnboundedReceiver<ServerEvent>>>,
}

/// A VNC server: owns one shared framebuffer and accepts any number of
/// concurrent RFB/LTSM client connections against it.
///
/// Cheap to clone — every clone shares the same framebuffer, password,
/// and event stream (spec.md §4.8's architecture: one `FrameSource`, many
/// viewers).
#[derive(Clone)]
pub struct VncServer {
    inner: Arc<Inner>,
}

impl VncServer {
    /// Creates a server with a black `width`x`height` framebuffer and no
    /// password (i.e. `SECURITY_TYPE_NONE` only, until `set_password` is
    /// called).
    #[must_use]
    pub fn new(width: u16, height: u16) -> Self {
        let (damage, _) = broadcast::channel(DAMAGE_CHANNEL_CAPACITY);
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        Self {
            inner: Arc::new(Inner {
                framebuffer: Arc::new(Mutex::new(FrameBuffer::new(width, height))),
                password: RwLock::new(None),
                desktop_name: RwLock::new("rust-ltsm".to_string()),
                next_client_id: AtomicUsize::new(1),
                damage,
                events_tx,
                events_rx: Mutex::new(Some(events_rx)),
            }),
        }
    }

    /// Sets (or clears) the VNC authentication password. `None` falls
    /// back to `SECURITY_TYPE_NONE`.
    pub fn set_password(&self, password: Option<String>) {
        *self.inner.password.write().unwrap() = password;
    }

    /// Sets the desktop name sent in `ServerInit` to new connections.
    pub fn set_desktop_name(&self, name: impl Into<String>) {
        *self.inner.desktop_name.write().unwrap() = name.into();
    }

    /// Takes ownership of this server's event receiver. Returns `None` if
    /// already taken (only one consumer may drain `ServerEvent`s at a
    /// time).
    pub fn take_events(&self) -> Option<mpsc::UnboundedReceiver<ServerEvent>> {
        self.inner.events_rx.lock().unwrap().take()
    }

    /// Writes `pixels` (tightly packed RGBA8, `w * h * 4` bytes) into the
    /// framebuffer at `(x, y)` and notifies every active connection that
    /// this region is now damaged.
    pub fn update_framebuffer(&self, pixels: &[u8], x: u16, y: u16, w: u16, h: u16) {
        let region = Region::new(x as i16, y as i16, w, h);
        let values: Vec<u32> = pixels
            .chunks_exact(4)
            .map(|c| u32::from_le_bytes([c[0], c[1], c[2], c[3]]))
            .collect();
        {
            let mut fb = self.inner.framebuffer.lock().unwrap();
            fb.splice(&region, &values);
        }
        // No active receivers is the common case between connections; ignore.
        let _ = self.inner.damage.send(region);
    }

    /// Binds `port` on every local interface and accepts connections
    /// until a fatal I/O error occurs. Each client runs on its own
    /// spawned task; a single client erroring never stops the listener.
    pub async fn listen(&self, port: u16) -> Result<()> {
        let listener = TcpListener::bind(("0.0.0.0", port)).await.map_err(crate::error::VncError::WireIo)?;
        info!("listening for VNC connections on port {port}");

        loop {
            let (stream, addr) = listener.accept().await.map_err(crate::error::VncError::WireIo)?;
            let id = self.inner.next_client_id.fetch_add(1, Ordering::Relaxed);
            let config = ClientConfig {
                id,
                addr,
                passwords: self
                    .inner
                    .password
                    .read()
                    .unwrap()
                    .clone()
                    .into_iter()
                    .collect(),
                desktop_name: self.inner.desktop_name.read().unwrap().clone(),
                framebuffer: self.framebuffer_handle(),
                events: self.inner.events_tx.clone(),
                damage: self.inner.damage.clone(),
            };

            tokio::spawn(async move {
                if let Err(e) = client::run(stream, config).await {
                    if e.is_fatal() {
                        error!("client {id} ({addr}) terminated: {e}");
                    } else {
                        info!("client {id} ({addr}) disconnected: {e}");
                    }
                }
            });
        }
    }

    fn framebuffer_handle(&self) -> Arc<Mutex<FrameBuffer>> {
        Arc::clone(&self.inner.framebuffer)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn update_framebuffer_writes_pixels_and_broadcasts_damage() {
        let server = VncServer::new(4, 4);
        let mut rx = server.inner.damage.subscribe();

        let mut pixels = vec![0u8; 4 * 4 * 4];
        for chunk in pixels.chunks_exact_mut(4) {
            chunk.copy_from_slice(&[10, 20, 30, 255]);
        }
        server.update_framebuffer(&pixels, 0, 0, 4, 4);

        let region = rx.try_recv().unwrap();
        assert_eq!(region, Region::new(0, 0, 4, 4));

        let fb = server.inner.framebuffer.lock().unwrap();
        assert_eq!(fb.pixel(0, 0), u32::from_le_bytes([10, 20, 30, 255]));
    }

    #[test]
    fn set_password_updates_shared_state() {
        let server = VncServer::new(2, 2);
        server.set_password(Some("hunter2".to_string()));
        assert_eq!(server.inner.password.read().unwrap().as_deref(), Some("hunter2"));
        server.set_password(None);
        assert!(server.inner.password.read().unwrap().is_none());
    }
}
