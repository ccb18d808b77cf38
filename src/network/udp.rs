//! UDP socket server
//!
//! One thread owns the receive side of the socket and dispatches every
//! datagram to the registered listeners. When the socket fails it is closed,
//! and after a back-off a new one is bound on the same port. Receive timeouts
//! are expected on an idle intercom and are not failures.

use bytes::Bytes;
use parking_lot::RwLock;
use socket2::{Domain, Protocol, Socket, Type};
use std::io::ErrorKind;
use std::net::{Ipv4Addr, SocketAddr, UdpSocket};
use std::sync::atomic::{AtomicBool, AtomicU16, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crate::audio::events::Listeners;
use crate::constants::{MAX_PACKET_SIZE, RESTART_DELAY_MS};
use crate::error::NetworkError;

/// One received datagram
#[derive(Debug, Clone)]
pub struct ReceivedPacket {
    pub source: SocketAddr,
    pub payload: Bytes,
}

/// Server statistics
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct UdpStats {
    pub packets_received: u64,
    pub bytes_received: u64,
    pub packets_sent: u64,
    pub restarts: u64,
}

#[derive(Default)]
struct Counters {
    packets_received: AtomicU64,
    bytes_received: AtomicU64,
    packets_sent: AtomicU64,
    restarts: AtomicU64,
}

struct ServerShared {
    port: AtomicU16,
    receive_timeout: Duration,
    running: AtomicBool,
    socket: RwLock<Option<Arc<UdpSocket>>>,
    received: Listeners<ReceivedPacket>,
    counters: Counters,
}

/// UDP server bound on all IPv4 interfaces
pub struct UdpServer {
    shared: Arc<ServerShared>,
    handle: Option<JoinHandle<()>>,
}

/// Create a UDP socket bound to `0.0.0.0:port`
pub fn create_socket(port: u16, receive_timeout: Duration) -> Result<UdpSocket, NetworkError> {
    let socket = Socket::new(Domain::IPV4, Type::DGRAM, Some(Protocol::UDP))
        .map_err(|e| NetworkError::BindFailed(e.to_string()))?;

    socket
        .set_reuse_address(true)
        .map_err(|e| NetworkError::BindFailed(e.to_string()))?;
    socket
        .set_read_timeout(Some(receive_timeout))
        .map_err(|e| NetworkError::BindFailed(e.to_string()))?;

    let addr = SocketAddr::from((Ipv4Addr::UNSPECIFIED, port));
    socket
        .bind(&addr.into())
        .map_err(|e| NetworkError::BindFailed(format!("{}: {}", addr, e)))?;

    Ok(socket.into())
}

impl UdpServer {
    /// Create a server for `port`; 0 picks an ephemeral port on `begin`
    pub fn new(port: u16, receive_timeout: Duration) -> Self {
        Self {
            shared: Arc::new(ServerShared {
                port: AtomicU16::new(port),
                receive_timeout,
                running: AtomicBool::new(false),
                socket: RwLock::new(None),
                received: Listeners::new(),
                counters: Counters::default(),
            }),
            handle: None,
        }
    }

    pub fn on_received<F>(&self, listener: F)
    where
        F: Fn(&ReceivedPacket) + Send + Sync + 'static,
    {
        self.shared.received.add(listener);
    }

    /// Bind the socket and start the receive thread
    pub fn begin(&mut self) -> Result<(), NetworkError> {
        if self.handle.is_some() {
            return Ok(());
        }

        let shared = &self.shared;
        let socket = create_socket(shared.port.load(Ordering::SeqCst), shared.receive_timeout)?;
        let local_addr = socket
            .local_addr()
            .map_err(|e| NetworkError::BindFailed(e.to_string()))?;

        // Rebinds reuse the port the first socket got
        shared.port.store(local_addr.port(), Ordering::SeqCst);
        shared.running.store(true, Ordering::SeqCst);

        tracing::info!("Socket bound on port {}", local_addr.port());

        let socket = Arc::new(socket);
        *shared.socket.write() = Some(socket.clone());

        let shared = self.shared.clone();
        let handle = thread::Builder::new()
            .name("udp-server".into())
            .spawn(move || shared.receive_loop(Some(socket)))
            .map_err(|e| NetworkError::BindFailed(e.to_string()))?;

        self.handle = Some(handle);
        Ok(())
    }

    /// Port the server is (or will be) bound on
    pub fn port(&self) -> u16 {
        self.shared.port.load(Ordering::SeqCst)
    }

    pub fn is_running(&self) -> bool {
        self.shared.running.load(Ordering::SeqCst)
    }

    /// Send one datagram from the server socket
    pub fn send_to(&self, addr: SocketAddr, data: &[u8]) -> Result<usize, NetworkError> {
        self.shared.send_to(addr, data)
    }

    /// Handle for sending from other threads
    pub fn sender(&self) -> UdpSendHandle {
        UdpSendHandle {
            shared: self.shared.clone(),
        }
    }

    pub fn stats(&self) -> UdpStats {
        self.shared.stats()
    }

    /// Stop the receive thread and close the socket
    pub fn stop(&mut self) {
        let Some(handle) = self.handle.take() else {
            return;
        };

        self.shared.running.store(false, Ordering::SeqCst);

        // Wake the receive thread instead of waiting for its timeout
        let wake_addr = SocketAddr::from((Ipv4Addr::LOCALHOST, self.port()));
        if let Ok(waker) = UdpSocket::bind((Ipv4Addr::LOCALHOST, 0)) {
            let _ = waker.send_to(&[], wake_addr);
        }

        let _ = handle.join();
        tracing::info!("UDP server stopped");
    }
}

impl Drop for UdpServer {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Cloneable sending side of a [`UdpServer`]
#[derive(Clone)]
pub struct UdpSendHandle {
    shared: Arc<ServerShared>,
}

impl UdpSendHandle {
    pub fn send_to(&self, addr: SocketAddr, data: &[u8]) -> Result<usize, NetworkError> {
        self.shared.send_to(addr, data)
    }
}

impl ServerShared {
    fn receive_loop(&self, mut socket: Option<Arc<UdpSocket>>) {
        let mut buffer = vec![0u8; MAX_PACKET_SIZE];

        while self.running.load(Ordering::SeqCst) {
            let current = match socket.take() {
                Some(socket) => socket,
                None => match create_socket(self.port.load(Ordering::SeqCst), self.receive_timeout) {
                    Ok(socket) => {
                        tracing::info!("Socket bound on port {}", self.port.load(Ordering::SeqCst));
                        Arc::new(socket)
                    }
                    Err(e) => {
                        tracing::error!("Failed to open socket: {}", e);
                        self.restart_delay();
                        continue;
                    }
                },
            };

            *self.socket.write() = Some(current.clone());
            self.serve(&current, &mut buffer);
            *self.socket.write() = None;

            if self.running.load(Ordering::SeqCst) {
                tracing::warn!("Restarting UDP server...");
                self.restart_delay();
            }
        }
    }

    fn serve(&self, socket: &UdpSocket, buffer: &mut [u8]) {
        while self.running.load(Ordering::SeqCst) {
            match socket.recv_from(buffer) {
                Ok((len, source)) => {
                    if !self.running.load(Ordering::SeqCst) {
                        break;
                    }

                    self.counters.packets_received.fetch_add(1, Ordering::Relaxed);
                    self.counters.bytes_received.fetch_add(len as u64, Ordering::Relaxed);

                    self.received.call(&ReceivedPacket {
                        source,
                        payload: Bytes::copy_from_slice(&buffer[..len]),
                    });
                }
                Err(e) if matches!(e.kind(), ErrorKind::WouldBlock | ErrorKind::TimedOut) => {
                    continue;
                }
                Err(e) => {
                    tracing::error!("recv_from failed: {}", e);
                    break;
                }
            }
        }
    }

    fn restart_delay(&self) {
        self.counters.restarts.fetch_add(1, Ordering::Relaxed);
        thread::sleep(Duration::from_millis(RESTART_DELAY_MS));
    }

    fn send_to(&self, addr: SocketAddr, data: &[u8]) -> Result<usize, NetworkError> {
        if data.len() > MAX_PACKET_SIZE {
            return Err(NetworkError::PacketTooLarge(data.len()));
        }

        let socket = self
            .socket
            .read()
            .clone()
            .ok_or_else(|| NetworkError::SendFailed("Socket not bound".to_string()))?;

        let sent = socket
            .send_to(data, addr)
            .map_err(|e| NetworkError::SendFailed(e.to_string()))?;
        self.counters.packets_sent.fetch_add(1, Ordering::Relaxed);
        Ok(sent)
    }

    fn stats(&self) -> UdpStats {
        UdpStats {
            packets_received: self.counters.packets_received.load(Ordering::Relaxed),
            bytes_received: self.counters.bytes_received.load(Ordering::Relaxed),
            packets_sent: self.counters.packets_sent.load(Ordering::Relaxed),
            restarts: self.counters.restarts.load(Ordering::Relaxed),
        }
    }
}
