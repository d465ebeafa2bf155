//! UDP echo listener and echo exchange
//!
//! The listener runs on its own worker thread. `EchoListener::start` is a
//! synchronous two-step handshake: it returns only after the worker reports
//! that the bind succeeded or failed, so a caller never sends a probe toward
//! a port nobody is listening on yet.

use super::types::{is_timeout, DetectionError};
use std::io;
use std::net::{Ipv4Addr, Ipv6Addr, SocketAddr, SocketAddrV4, UdpSocket};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc;
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};
use tracing::{debug, error};

/// Payload sent by the echo exchange
pub const ECHO_PAYLOAD: &[u8] = b"echo";

/// How often a waiting listener checks for a stop request
const POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Binds the listener socket for a port
///
/// Injected so tests can delay or fail the bind.
pub type Binder = Arc<dyn Fn(u16) -> io::Result<UdpSocket> + Send + Sync>;

/// Binder that listens on 0.0.0.0:port
pub fn default_binder() -> Binder {
    Arc::new(|port| UdpSocket::bind(SocketAddrV4::new(Ipv4Addr::UNSPECIFIED, port)))
}

/// A running echo listener
///
/// Answers at most one datagram, then exits. Dropping the handle asks the
/// worker to stop without waiting for it.
pub struct EchoListener {
    port: u16,
    stop: Arc<AtomicBool>,
    worker: Option<JoinHandle<bool>>,
}

impl EchoListener {
    /// Start a listener and block until it is bound
    ///
    /// # Arguments
    ///
    /// * `port` - Port to listen on
    /// * `wait` - How long the bound listener waits for one inbound datagram
    /// * `ready_timeout` - Upper bound on the readiness handshake
    /// * `binder` - Socket factory
    ///
    /// Returns an error if the bind fails or does not complete within
    /// `ready_timeout`.
    pub fn start(
        port: u16,
        wait: Duration,
        ready_timeout: Duration,
        binder: &Binder,
    ) -> io::Result<Self> {
        let (ready_tx, ready_rx) = mpsc::sync_channel::<io::Result<()>>(1);
        let stop = Arc::new(AtomicBool::new(false));
        let worker_stop = stop.clone();
        let binder = binder.clone();

        let worker = thread::Builder::new()
            .name(format!("echo-{}", port))
            .spawn(move || {
                debug!("echo server start on port {}", port);
                let socket = match binder(port).and_then(|s| {
                    s.set_read_timeout(Some(POLL_INTERVAL))?;
                    Ok(s)
                }) {
                    Ok(s) => s,
                    Err(e) => {
                        let _ = ready_tx.send(Err(e));
                        return false;
                    }
                };

                if worker_stop.load(Ordering::SeqCst) {
                    return false;
                }
                let _ = ready_tx.send(Ok(()));

                let served = serve_once(&socket, wait, &worker_stop);
                debug!("echo server end on port {} (served: {})", port, served);
                served
            })?;

        let ack = ready_rx.recv_timeout(ready_timeout).unwrap_or_else(|_| {
            Err(io::Error::new(
                io::ErrorKind::TimedOut,
                "echo listener did not report readiness",
            ))
        });

        match ack {
            Ok(()) => Ok(Self {
                port,
                stop,
                worker: Some(worker),
            }),
            Err(e) => {
                error!("echo server listen error on port {}: {}", port, e);
                stop.store(true, Ordering::SeqCst);
                Err(e)
            }
        }
    }

    /// Port the listener is bound to
    pub fn port(&self) -> u16 {
        self.port
    }

    /// Stop the listener and wait for the port to be released
    ///
    /// Returns whether a datagram was echoed.
    pub fn finish(mut self) -> bool {
        self.stop.store(true, Ordering::SeqCst);
        self.worker
            .take()
            .map(|w| w.join().unwrap_or(false))
            .unwrap_or(false)
    }
}

impl Drop for EchoListener {
    fn drop(&mut self) {
        self.stop.store(true, Ordering::SeqCst);
    }
}

/// Wait for one datagram and send it back to its sender
fn serve_once(socket: &UdpSocket, wait: Duration, stop: &AtomicBool) -> bool {
    let deadline = Instant::now() + wait;
    let mut buf = [0u8; 1600];

    while Instant::now() < deadline && !stop.load(Ordering::SeqCst) {
        match socket.recv_from(&mut buf) {
            Ok((n, addr)) => {
                if let Err(e) = socket.send_to(&buf[..n], addr) {
                    debug!("echo reply to {} failed: {}", addr, e);
                    return false;
                }
                return true;
            }
            Err(e) if is_timeout(&e) => continue,
            // ICMP errors from earlier sends can surface here on some platforms
            Err(e) if e.kind() == io::ErrorKind::ConnectionReset => continue,
            Err(e) => {
                debug!("echo server read error: {}", e);
                return false;
            }
        }
    }
    false
}

/// Send `payload` to `target` and wait for it to come back
///
/// A failed send returns immediately instead of waiting out the timeout.
pub fn echo_exchange(
    target: SocketAddr,
    payload: &[u8],
    timeout: Duration,
) -> Result<(), DetectionError> {
    let bind_addr: SocketAddr = if target.is_ipv4() {
        (Ipv4Addr::UNSPECIFIED, 0).into()
    } else {
        (Ipv6Addr::UNSPECIFIED, 0).into()
    };
    let socket = UdpSocket::bind(bind_addr)?;

    socket.send_to(payload, target).map_err(|e| {
        debug!("echo send to {} failed: {}", target, e);
        DetectionError::Io(e)
    })?;

    socket.set_read_timeout(Some(timeout))?;
    let deadline = Instant::now() + timeout;
    let mut buf = [0u8; 1600];

    loop {
        let (n, _) = socket.recv_from(&mut buf)?;
        if &buf[..n] == payload {
            return Ok(());
        }
        let remaining = deadline.saturating_duration_since(Instant::now());
        if remaining.is_zero() {
            return Err(DetectionError::Timeout);
        }
        socket.set_read_timeout(Some(remaining))?;
    }
}
