//! The event-driven reactor and length-prefixed IPC protocol (spec §4.9).
//!
//! A single-threaded event loop multiplexes a listening socket and its
//! accepted connections over [`poll::Poller`]. Each connection walks
//! `CLOSED -> AWAIT_HANDSHAKE -> READY`: on accept the peer must send a
//! one-byte protocol version `(MAJOR << 3) | MINOR` followed by a NUL before
//! any framed message is accepted. Once ready, frames are
//! [`crate::wire`]-encoded values tagged `SYNC`/`ASYNC`/`RESP` (spec §4.8).
//!
//! This module sits at the OS boundary, so it returns `anyhow::Result`
//! rather than [`crate::error::RayError`] -- a socket failure is not
//! something query code branches on by variant, it is logged and the
//! connection is dropped.

pub mod poll;
pub mod source;
pub mod timers;

use std::collections::HashMap;
use std::io::{self, Read, Write};
use std::net::{TcpListener, TcpStream};
use std::os::fd::{AsRawFd, RawFd};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::{bail, Context, Result};
use tracing::{debug, info, warn};

use crate::heap::Heap;
use crate::value::Value;
use crate::wire::{self, FrameHeader, FRAME_HEADER_LEN, MSG_ASYNC, MSG_RESP, MSG_SYNC};

use poll::{Event, Interest, Poller};
use timers::TimerWheel;

/// Protocol version sent during the handshake, `(MAJOR << 3) | MINOR`
/// (spec §4.9 "handshake").
const PROTO_MAJOR: u8 = 3;
const PROTO_MINOR: u8 = 0;

/// Registration ids 0/1/2 are reserved for stdin/stdout/stderr (spec §4.9);
/// connections and the listener get ids starting here.
const FIRST_CONN_TOKEN: usize = 3;
const LISTENER_TOKEN: usize = 1_000_000_000;
const WAKE_TOKEN: usize = 1_000_000_001;

const SYNC_TIMEOUT: Duration = Duration::from_secs(30);

static SIGINT_RECEIVED: AtomicBool = AtomicBool::new(false);

extern "C" fn on_sigint(_: libc::c_int) {
    SIGINT_RECEIVED.store(true, Ordering::SeqCst);
}

/// Install a `SIGINT` handler that just flips a flag; the reactor notices it
/// between poll iterations via the self-pipe rather than doing anything
/// signal-unsafe in the handler itself.
fn install_sigint_handler(wake_write_fd: RawFd) -> Result<()> {
    unsafe {
        let mut sa: libc::sigaction = std::mem::zeroed();
        sa.sa_sigaction = on_sigint as usize;
        libc::sigemptyset(&mut sa.sa_mask);
        sa.sa_flags = 0;
        if libc::sigaction(libc::SIGINT, &sa, std::ptr::null_mut()) != 0 {
            return Err(io::Error::last_os_error()).context("sigaction(SIGINT)");
        }
    }
    WAKE_WRITE_FD.store(wake_write_fd, Ordering::SeqCst);
    Ok(())
}

/// The write end of the self-pipe, stashed so the signal path (which cannot
/// safely reach into `Reactor`'s fields) can still nudge the poll loop awake.
/// Written once at startup, read every time the handler fires a write.
static WAKE_WRITE_FD: std::sync::atomic::AtomicI32 = std::sync::atomic::AtomicI32::new(-1);

fn nudge_wake_pipe() {
    let fd = WAKE_WRITE_FD.load(Ordering::SeqCst);
    if fd >= 0 {
        unsafe {
            libc::write(fd, b"\0".as_ptr() as *const _, 1);
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ConnState {
    AwaitHandshake,
    Ready,
}

struct RxState {
    header: Option<FrameHeader>,
    buf: Vec<u8>,
}

impl RxState {
    fn new() -> Self {
        RxState { header: None, buf: Vec::new() }
    }

    fn needed(&self) -> usize {
        match self.header {
            None => FRAME_HEADER_LEN,
            Some(h) => FRAME_HEADER_LEN + h.body_len as usize,
        }
    }
}

struct Connection {
    stream: TcpStream,
    state: ConnState,
    rx: RxState,
    tx_pending: std::collections::VecDeque<Vec<u8>>,
    handshake_buf: Vec<u8>,
}

impl Connection {
    fn new(stream: TcpStream) -> Self {
        Connection {
            stream,
            state: ConnState::AwaitHandshake,
            rx: RxState::new(),
            tx_pending: std::collections::VecDeque::new(),
            handshake_buf: Vec::new(),
        }
    }
}

/// What the caller's dispatch callback returns for a request frame.
pub enum Response {
    /// Send this value back tagged `RESP` (the reply to a `SYNC` request).
    Reply(Value),
    /// `ASYNC` frames get no reply.
    None,
}

/// Drives the accept/handshake/framed-message loop. Construct with
/// [`Reactor::bind`], install a dispatch closure, then call [`Reactor::run`].
pub struct Reactor {
    listener: TcpListener,
    poller: Box<dyn Poller>,
    connections: HashMap<usize, Connection>,
    free_tokens: Vec<usize>,
    next_token: usize,
    heap: Arc<Heap>,
    timers: TimerWheel,
    wake_read_fd: RawFd,
    wake_write_fd: RawFd,
    shutting_down: bool,
}

impl Reactor {
    pub fn bind(addr: &str, heap: Arc<Heap>) -> Result<Self> {
        let listener = TcpListener::bind(addr).with_context(|| format!("binding listener on {addr}"))?;
        listener.set_nonblocking(true)?;
        let mut poller = poll::default_poller()?;
        poller.register(listener.as_raw_fd(), LISTENER_TOKEN, Interest::READABLE)?;

        let mut fds = [0i32; 2];
        if unsafe { libc::pipe(fds.as_mut_ptr()) } != 0 {
            return Err(io::Error::last_os_error()).context("creating wake pipe");
        }
        let [wake_read_fd, wake_write_fd] = fds;
        unsafe {
            let flags = libc::fcntl(wake_read_fd, libc::F_GETFL);
            libc::fcntl(wake_read_fd, libc::F_SETFL, flags | libc::O_NONBLOCK);
        }
        poller.register(wake_read_fd, WAKE_TOKEN, Interest::READABLE)?;

        info!(addr, "reactor listening");
        Ok(Reactor {
            listener,
            poller,
            connections: HashMap::new(),
            free_tokens: Vec::new(),
            next_token: FIRST_CONN_TOKEN,
            heap,
            timers: TimerWheel::new(),
            wake_read_fd,
            wake_write_fd,
            shutting_down: false,
        })
    }

    /// Arm `SIGINT` to close the loop cleanly on the next iteration rather
    /// than terminating the process mid-syscall.
    pub fn install_sigint(&self) -> Result<()> {
        install_sigint_handler(self.wake_write_fd)
    }

    pub fn timers(&mut self) -> &mut TimerWheel {
        &mut self.timers
    }

    pub fn local_addr(&self) -> Result<std::net::SocketAddr> {
        Ok(self.listener.local_addr()?)
    }

    /// Run exactly one poll/dispatch round. Lets an embedder (or a test)
    /// drive the loop itself instead of handing control to [`Reactor::run`].
    pub fn step(&mut self, timeout_ms: Option<i32>, on_request: &mut impl FnMut(Value) -> Response) -> Result<()> {
        let mut events = Vec::new();
        self.poller.poll(timeout_ms, &mut events).context("polling")?;
        self.timers.fire_due(Self::now_ms());
        for ev in events {
            self.handle_event(ev, on_request)?;
        }
        Ok(())
    }

    fn alloc_token(&mut self) -> usize {
        self.free_tokens.pop().unwrap_or_else(|| {
            let t = self.next_token;
            self.next_token += 1;
            t
        })
    }

    fn now_ms() -> u64 {
        // `Instant` rather than `SystemTime` since the timer wheel only ever
        // compares deadlines scheduled from this same process.
        static START: std::sync::OnceLock<Instant> = std::sync::OnceLock::new();
        let start = *START.get_or_init(Instant::now);
        start.elapsed().as_millis() as u64
    }

    /// Run until `should_stop` returns true or `SIGINT` is observed.
    /// `on_request` is invoked for every fully-received `SYNC`/`ASYNC` frame;
    /// its [`Response`] is written back for `SYNC` frames tagged `RESP`.
    pub fn run(&mut self, mut on_request: impl FnMut(Value) -> Response) -> Result<()> {
        let mut events = Vec::new();
        loop {
            if SIGINT_RECEIVED.load(Ordering::SeqCst) {
                info!("SIGINT observed, shutting down reactor");
                self.shutting_down = true;
            }
            if self.shutting_down {
                return Ok(());
            }

            let timeout = self.timers.next_timeout_ms(Self::now_ms());
            events.clear();
            if let Err(e) = self.poller.poll(timeout, &mut events) {
                if e.kind() == io::ErrorKind::Interrupted {
                    continue;
                }
                return Err(e).context("polling");
            }
            self.timers.fire_due(Self::now_ms());

            for ev in events.drain(..) {
                self.handle_event(ev, &mut on_request)?;
            }
        }
    }

    fn handle_event(&mut self, ev: Event, on_request: &mut impl FnMut(Value) -> Response) -> Result<()> {
        if ev.token == WAKE_TOKEN {
            let mut drain = [0u8; 64];
            while unsafe { libc::read(self.wake_read_fd, drain.as_mut_ptr() as *mut _, drain.len()) } > 0 {}
            return Ok(());
        }
        if ev.token == LISTENER_TOKEN {
            return self.accept_all();
        }
        if ev.error {
            self.close_connection(ev.token);
            return Ok(());
        }
        if ev.readable {
            if let Err(err) = self.handle_readable(ev.token, on_request) {
                debug!(token = ev.token, %err, "closing connection after read error");
                self.close_connection(ev.token);
                return Ok(());
            }
        }
        if ev.writable {
            if let Err(err) = self.flush_writes(ev.token) {
                debug!(token = ev.token, %err, "closing connection after write error");
                self.close_connection(ev.token);
            }
        }
        Ok(())
    }

    fn accept_all(&mut self) -> Result<()> {
        loop {
            match self.listener.accept() {
                Ok((stream, peer)) => {
                    stream.set_nonblocking(true)?;
                    let fd = stream.as_raw_fd();
                    let token = self.alloc_token();
                    self.poller.register(fd, token, Interest::READABLE)?;
                    self.connections.insert(token, Connection::new(stream));
                    debug!(token, %peer, "accepted connection, awaiting handshake");
                }
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => return Ok(()),
                Err(e) => return Err(e).context("accept"),
            }
        }
    }

    fn handle_readable(&mut self, token: usize, on_request: &mut impl FnMut(Value) -> Response) -> Result<()> {
        loop {
            let state = match self.connections.get(&token) {
                Some(c) => c.state,
                None => return Ok(()),
            };
            match state {
                ConnState::AwaitHandshake => {
                    if !self.read_handshake_byte(token)? {
                        return Ok(());
                    }
                }
                ConnState::Ready => {
                    if !self.read_frame_chunk(token, on_request)? {
                        return Ok(());
                    }
                }
            }
        }
    }

    /// Read the handshake one byte at a time until a trailing NUL; the peer
    /// sends exactly `(MAJOR<<3)|MINOR` then `0u8` (spec §4.9).
    fn read_handshake_byte(&mut self, token: usize) -> Result<bool> {
        let conn = self.connections.get_mut(&token).unwrap();
        let mut byte = [0u8; 1];
        match conn.stream.read(&mut byte) {
            Ok(0) => {
                self.close_connection(token);
                Ok(false)
            }
            Ok(_) => {
                if byte[0] == 0 {
                    // The version byte is the last one before the NUL; an
                    // optional "username:password" ASCII prefix may precede
                    // it, so the first byte is not necessarily the version.
                    let version = *conn.handshake_buf.last().unwrap_or(&0);
                    let major = version >> 3;
                    if major != PROTO_MAJOR {
                        warn!(token, major, expected = PROTO_MAJOR, "protocol major mismatch");
                        self.close_connection(token);
                        return Ok(false);
                    }
                    conn.state = ConnState::Ready;
                    let reply = [(PROTO_MAJOR << 3) | PROTO_MINOR, 0];
                    if let Err(e) = conn.stream.write_all(&reply) {
                        warn!(token, error = %e, "failed to write handshake reply");
                        self.close_connection(token);
                        return Ok(false);
                    }
                    debug!(token, "handshake complete");
                } else {
                    conn.handshake_buf.push(byte[0]);
                }
                Ok(true)
            }
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => Ok(false),
            Err(e) => Err(e.into()),
        }
    }

    /// Pull as many bytes as are available into the connection's
    /// accumulation buffer; once a full header and body have arrived,
    /// decode the frame and dispatch it.
    fn read_frame_chunk(&mut self, token: usize, on_request: &mut impl FnMut(Value) -> Response) -> Result<bool> {
        let conn = self.connections.get_mut(&token).unwrap();
        let needed = conn.rx.needed();
        let have = conn.rx.buf.len();
        if have >= needed {
            return self.dispatch_complete_frame(token, on_request);
        }
        let mut chunk = vec![0u8; needed - have];
        match conn.stream.read(&mut chunk) {
            Ok(0) => {
                self.close_connection(token);
                Ok(false)
            }
            Ok(n) => {
                conn.rx.buf.extend_from_slice(&chunk[..n]);
                if conn.rx.header.is_none() && conn.rx.buf.len() >= FRAME_HEADER_LEN {
                    let header = wire::decode_header(&conn.rx.buf)?;
                    conn.rx.header = Some(header);
                }
                if conn.rx.buf.len() >= conn.rx.needed() {
                    self.dispatch_complete_frame(token, on_request)
                } else {
                    Ok(true)
                }
            }
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => Ok(false),
            Err(e) => Err(e.into()),
        }
    }

    fn dispatch_complete_frame(&mut self, token: usize, on_request: &mut impl FnMut(Value) -> Response) -> Result<bool> {
        let heap = self.heap.clone();
        let conn = self.connections.get_mut(&token).unwrap();
        let (value, msgtype) = wire::decode_frame(&heap, &conn.rx.buf)?;
        conn.rx = RxState::new();

        match on_request(value) {
            Response::Reply(reply) if msgtype == MSG_SYNC || msgtype == MSG_ASYNC => {
                let framed = wire::encode_frame(&reply, MSG_RESP)?;
                self.queue_write(token, framed)?;
            }
            _ => {}
        }
        Ok(true)
    }

    fn queue_write(&mut self, token: usize, bytes: Vec<u8>) -> Result<()> {
        let Some(conn) = self.connections.get_mut(&token) else { return Ok(()) };
        conn.tx_pending.push_back(bytes);
        let fd = conn.stream.as_raw_fd();
        self.poller.reregister(fd, token, Interest::read_write())?;
        self.flush_writes(token)
    }

    fn flush_writes(&mut self, token: usize) -> Result<()> {
        loop {
            let Some(conn) = self.connections.get_mut(&token) else { return Ok(()) };
            let Some(front) = conn.tx_pending.front_mut() else {
                let fd = conn.stream.as_raw_fd();
                self.poller.reregister(fd, token, Interest::READABLE)?;
                return Ok(());
            };
            match conn.stream.write(front) {
                Ok(0) => return Ok(()),
                Ok(n) => {
                    front.drain(0..n);
                    if front.is_empty() {
                        conn.tx_pending.pop_front();
                    }
                }
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => return Ok(()),
                Err(e) => return Err(e.into()),
            }
        }
    }

    fn close_connection(&mut self, token: usize) {
        if let Some(conn) = self.connections.remove(&token) {
            let _ = self.poller.deregister(conn.stream.as_raw_fd());
            self.free_tokens.push(token);
            debug!(token, "connection closed");
        }
    }
}

impl Drop for Reactor {
    fn drop(&mut self) {
        unsafe {
            libc::close(self.wake_read_fd);
            libc::close(self.wake_write_fd);
        }
    }
}

/// A blocking client-side helper for the synchronous RPC pattern (spec §4.9
/// "Synchronous client RPC"): send a `SYNC` frame, busy-receive frames off
/// the same socket (answering any nested non-`RESP` frame would be a
/// protocol violation from this side, so anything but `RESP` is an error)
/// until the matching `RESP` arrives or 30 seconds pass.
/// Perform the client side of the connection handshake: send an optional
/// "user:password" ASCII prefix followed by `(MAJOR<<3)|MINOR` and a NUL,
/// then read back the server's own version byte and NUL (spec §4.9).
pub fn handshake(stream: &mut TcpStream, credentials: Option<(&str, &str)>) -> Result<()> {
    let mut out = Vec::new();
    if let Some((user, pass)) = credentials {
        out.extend_from_slice(format!("{user}:{pass}").as_bytes());
    }
    out.push((PROTO_MAJOR << 3) | PROTO_MINOR);
    out.push(0);
    stream.write_all(&out).context("sending handshake")?;

    let mut reply = [0u8; 2];
    stream.set_read_timeout(Some(SYNC_TIMEOUT))?;
    stream.read_exact(&mut reply).context("reading handshake reply")?;
    let major = reply[0] >> 3;
    if major != PROTO_MAJOR || reply[1] != 0 {
        bail!("server handshake reply rejected: major {major}, expected {PROTO_MAJOR}");
    }
    Ok(())
}

pub fn send_sync(stream: &mut TcpStream, request: &Value) -> Result<Value> {
    stream.set_nonblocking(false)?;
    stream.set_read_timeout(Some(SYNC_TIMEOUT))?;
    let framed = wire::encode_frame(request, MSG_SYNC)?;
    stream.write_all(&framed).context("sending SYNC frame")?;

    let deadline = Instant::now() + SYNC_TIMEOUT;
    let mut buf = Vec::new();
    loop {
        if Instant::now() >= deadline {
            bail!("send_sync timed out waiting for RESP");
        }
        if buf.len() < FRAME_HEADER_LEN {
            read_more(stream, &mut buf, FRAME_HEADER_LEN - buf.len())?;
            continue;
        }
        let header = wire::decode_header(&buf)?;
        let total = FRAME_HEADER_LEN + header.body_len as usize;
        if buf.len() < total {
            read_more(stream, &mut buf, total - buf.len())?;
            continue;
        }
        let (value, msgtype) = wire::decode_frame(&stream_heap(), &buf)?;
        buf.drain(0..total);
        if msgtype == MSG_RESP {
            return Ok(value);
        }
        // A nested ASYNC/SYNC frame arriving while we wait is processed by
        // discarding it here; a real client would hand it to its own
        // dispatch table instead.
    }
}

fn read_more(stream: &mut TcpStream, buf: &mut Vec<u8>, want: usize) -> Result<()> {
    let mut chunk = vec![0u8; want];
    let n = stream.read(&mut chunk).context("reading RESP frame")?;
    if n == 0 {
        bail!("connection closed while waiting for RESP");
    }
    buf.extend_from_slice(&chunk[..n]);
    Ok(())
}

/// `send_sync` needs a heap to decode into; callers that already have one
/// should prefer threading it through directly. This default keeps the
/// helper usable from a plain client binary with no VM context of its own.
fn stream_heap() -> Arc<Heap> {
    Heap::new(crate::heap::HeapConfig::default())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::heap::HeapConfig;
    use std::net::TcpStream;

    fn heap() -> Arc<Heap> {
        Heap::new(HeapConfig::default())
    }

    #[test]
    fn handshake_then_sync_roundtrip_echoes_increment() {
        let reactor_heap = heap();
        let mut reactor = Reactor::bind("127.0.0.1:0", reactor_heap).unwrap();
        let addr = reactor.local_addr().unwrap();

        let handle = std::thread::spawn(move || {
            let mut client = TcpStream::connect(addr).unwrap();
            handshake(&mut client, None).unwrap();
            let reply = send_sync(&mut client, &Value::atom_i64(41)).unwrap();
            reply.as_atom_i64().unwrap()
        });

        let deadline = Instant::now() + Duration::from_secs(5);
        let mut answered = false;
        while Instant::now() < deadline {
            reactor
                .step(Some(100), &mut |v| {
                    let n = v.as_atom_i64().unwrap();
                    answered = true;
                    Response::Reply(Value::atom_i64(n + 1))
                })
                .unwrap();
            if answered && handle.is_finished() {
                break;
            }
        }
        assert_eq!(handle.join().unwrap(), 42);
    }

    #[test]
    fn rejects_handshake_with_wrong_major_version() {
        let reactor_heap = heap();
        let mut reactor = Reactor::bind("127.0.0.1:0", reactor_heap).unwrap();
        let addr = reactor.local_addr().unwrap();
        let mut client = TcpStream::connect(addr).unwrap();
        client.write_all(&[(5u8 << 3) | 0, 0]).unwrap();

        reactor.step(Some(1000), &mut |_| Response::None).unwrap();
        assert!(reactor.connections.is_empty());
    }
}
