//! 事件轮询后端：mio `Poll` 驱动的单线程反应器。

use crate::{
    io_error::{self, CONNECT, CREATE_STREAM, OPEN_STREAM, READ, REGISTER, map_io_error},
    resolve::resolve,
    shared::{Epoch, Shared},
};
use bytes::Bytes;
use crossbeam_channel::{Receiver, RecvTimeoutError, Sender, TryRecvError};
use mio::{Events, Interest, Poll, Token, Waker, net::TcpStream};
use parking_lot::Mutex;
use qsocket_core::{
    ConnectionState, ErrorCode, ReceiveCallback, Result, SocketBackend, SocketConfig, SocketError,
    SocketType, StateCallback, validate_endpoint, validate_payload,
};
use std::{
    io::{self, Read, Write},
    net::{Shutdown, SocketAddr},
    sync::Arc,
    thread::{self, JoinHandle},
    time::{Duration, Instant},
};
use tracing::{debug, info, trace, warn};

const WAKE: Token = Token(0);
const STREAM: Token = Token(1);
const EVENT_CAPACITY: usize = 64;

/// 发送回执在发送超时之外额外等待的时间，覆盖事件线程的调度延迟。
const REPLY_GRACE: Duration = Duration::from_millis(500);

/// 基于就绪通知的后端。
///
/// # 教案式注释
///
/// ## 意图 (Why)
/// - 以一个事件线程同时承载建连握手、读、写三类工作，避免每个方向各占一个阻塞线程；
/// - 调用方线程只负责投递命令，真正的套接字操作都在事件线程上完成。
///
/// ## 逻辑 (How)
/// - `connect` 在调用方线程解析主机、创建 `Poll` 与 `Waker`，随后启动事件线程并等待握手结果；
/// - 事件线程以非阻塞方式逐个尝试候选地址，通过 `take_error` + `peer_addr` 判定握手是否完成；
/// - 连接建立后流以 `READABLE | WRITABLE` 注册：可读时一次读尽，可写时继续冲刷挂起的发送；
/// - 发送与关闭命令经 `crossbeam-channel` 投递，并用 `Waker` 唤醒 `poll`。
///
/// ## 契约 (What)
/// - 满足 [`SocketBackend`] 的全部约定；除主动断开外，所有回调都在事件线程上触发。
///
/// ## 注意事项 (Trade-offs)
/// - 同一时刻至多一个挂起的发送，由 `send_lock` 保证；
/// - 发送截止时间由事件线程执行，调用方的等待只额外宽限 [`REPLY_GRACE`]。
pub struct EventedBackend {
    shared: Arc<Shared>,
    config: SocketConfig,
    session: Mutex<Option<EventedSession>>,
    send_lock: Mutex<()>,
}

enum Command {
    Send {
        data: Bytes,
        reply: Sender<Result<()>>,
    },
    Shutdown,
}

struct EventedSession {
    epoch: Epoch,
    commands: Sender<Command>,
    waker: Arc<Waker>,
    thread: Option<JoinHandle<()>>,
}

impl EventedSession {
    fn close(mut self, shared: &Shared) {
        let _ = self.commands.send(Command::Shutdown);
        if let Err(err) = self.waker.wake() {
            debug!(error = %err, "failed to wake event loop");
        }
        let Some(handle) = self.thread.take() else {
            return;
        };
        if handle.thread().id() == thread::current().id() || shared.dispatching_on_current_thread()
        {
            return;
        }
        if handle.join().is_err() {
            warn!(socket_type = %SocketType::Evented, "event loop thread panicked");
        }
    }
}

impl EventedBackend {
    pub fn new(config: SocketConfig) -> Self {
        Self {
            shared: Shared::new(SocketType::Evented, config.log_io()),
            config,
            session: Mutex::new(None),
            send_lock: Mutex::new(()),
        }
    }

    fn take_session(&self) -> Option<EventedSession> {
        self.session.lock().take()
    }

    fn start(&self, epoch: Epoch, host: &str, port: u16) -> Result<Receiver<Result<()>>> {
        let addrs = resolve(host, port)?;
        let poll = Poll::new().map_err(|err| map_io_error(CREATE_STREAM, err))?;
        let waker = Waker::new(poll.registry(), WAKE)
            .map(Arc::new)
            .map_err(|err| map_io_error(REGISTER, err))?;

        let (commands, inbox) = crossbeam_channel::unbounded();
        let (ready_tx, ready_rx) = crossbeam_channel::bounded(1);
        let event_loop = EventLoop {
            shared: Arc::clone(&self.shared),
            epoch,
            poll,
            events: Events::with_capacity(EVENT_CAPACITY),
            commands: inbox,
            config: self.config.clone(),
        };
        // 会话槽在事件线程启动前就被占住：连接成功回调里的 `disconnect` 必须能取到本次会话。
        let mut slot = self.session.lock();
        let thread = thread::Builder::new()
            .name("qsocket-evented-loop".into())
            .spawn(move || event_loop.run(addrs, ready_tx))
            .map_err(|err| map_io_error(CREATE_STREAM, err))?;

        *slot = Some(EventedSession {
            epoch,
            commands,
            waker,
            thread: Some(thread),
        });
        Ok(ready_rx)
    }
}

impl SocketBackend for EventedBackend {
    fn socket_type(&self) -> SocketType {
        SocketType::Evented
    }

    fn connect(&self, host: &str, port: u16) -> Result<()> {
        validate_endpoint(host, port)?;
        let epoch = self.shared.begin_connect()?;
        if let Some(stale) = self.take_session() {
            stale.close(&self.shared);
        }
        info!(socket_type = %SocketType::Evented, host, port, "connecting");

        let ready = match self.start(epoch, host, port) {
            Ok(ready) => ready,
            Err(err) => {
                warn!(socket_type = %SocketType::Evented, host, port, error = %err, "connect failed");
                return Err(self.shared.fail_connect(epoch, err));
            }
        };
        // 失败时事件线程已经完成状态迁移与回调，这里只转交结果。
        match ready.recv() {
            Ok(Ok(())) => Ok(()),
            Ok(Err(err)) => {
                warn!(socket_type = %SocketType::Evented, host, port, error = %err, "connect failed");
                Err(err)
            }
            Err(_) => Err(self
                .shared
                .fail_connect(epoch, io_error::io_context_gone(ErrorCode::ConnectionFailed))),
        }
    }

    fn disconnect(&self) {
        let was_active = self.shared.release();
        if let Some(session) = self.take_session() {
            session.close(&self.shared);
        }
        if was_active {
            info!(socket_type = %SocketType::Evented, "disconnected");
            self.shared.emit_disconnected(None);
        }
    }

    fn send(&self, data: &[u8]) -> Result<()> {
        validate_payload(data)?;
        let _sending = self.send_lock.lock();
        let (commands, waker) = {
            let session = self.session.lock();
            match session.as_ref() {
                Some(session) if self.shared.is_current(session.epoch) => {
                    (session.commands.clone(), Arc::clone(&session.waker))
                }
                _ => return Err(SocketError::new(ErrorCode::NotConnected)),
            }
        };

        let (reply, outcome) = crossbeam_channel::bounded(1);
        commands
            .send(Command::Send {
                data: Bytes::copy_from_slice(data),
                reply,
            })
            .map_err(|_| io_error::io_context_gone(ErrorCode::SendFailed))?;
        waker
            .wake()
            .map_err(|err| map_io_error(io_error::WRITE, err))?;

        match outcome.recv_timeout(self.config.send_timeout() + REPLY_GRACE) {
            Ok(result) => result,
            Err(RecvTimeoutError::Timeout) => Err(io_error::send_reply_timeout(data.len())),
            Err(RecvTimeoutError::Disconnected) => Err(io_error::send_aborted(data.len())),
        }
    }

    fn state(&self) -> ConnectionState {
        self.shared.state()
    }

    fn set_receive_callback(&self, callback: Option<ReceiveCallback>) {
        self.shared.set_receive_callback(callback);
    }

    fn set_state_callback(&self, callback: Option<StateCallback>) {
        self.shared.set_state_callback(callback);
    }
}

impl Drop for EventedBackend {
    fn drop(&mut self) {
        self.shared.clear_callbacks();
        self.shared.release();
        if let Some(session) = self.take_session() {
            session.close(&self.shared);
        }
    }
}

/// 事件线程私有的反应器状态。
struct EventLoop {
    shared: Arc<Shared>,
    epoch: Epoch,
    poll: Poll,
    events: Events,
    commands: Receiver<Command>,
    config: SocketConfig,
}

enum Handshake {
    Established,
    Failed(SocketError),
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum Flow {
    Continue,
    Stop,
}

struct PendingSend {
    data: Bytes,
    written: usize,
    deadline: Instant,
    reply: Sender<Result<()>>,
}

impl PendingSend {
    fn finish(self, result: Result<()>) {
        let _ = self.reply.send(result);
    }
}

struct Connection {
    stream: TcpStream,
    pending: Option<PendingSend>,
    buf: Vec<u8>,
}

impl EventLoop {
    fn run(mut self, addrs: Vec<SocketAddr>, ready: Sender<Result<()>>) {
        let deadline = Instant::now() + self.config.connect_timeout();
        let stream = match self.handshake(&addrs, deadline) {
            Ok(stream) => stream,
            Err(err) => {
                let err = self.shared.fail_connect(self.epoch, err);
                let _ = ready.send(Err(err));
                return;
            }
        };

        {
            let _dispatch = self.shared.dispatch_guard();
            if !self.shared.complete_connect(self.epoch) {
                let _ = ready.send(Err(io_error::connect_aborted()));
                return;
            }
            self.shared.emit_connected();
        }
        let _ = ready.send(Ok(()));

        let conn = Connection {
            stream,
            pending: None,
            buf: vec![0u8; self.config.read_buffer_size()],
        };
        self.serve(conn);
    }

    fn handshake(&mut self, addrs: &[SocketAddr], deadline: Instant) -> Result<TcpStream> {
        let mut last_error = None;
        for &addr in addrs {
            if Instant::now() >= deadline {
                break;
            }
            let mut stream = match TcpStream::connect(addr) {
                Ok(stream) => stream,
                Err(err) => {
                    last_error = Some(map_io_error(CONNECT, err).with_extra("addr", addr));
                    continue;
                }
            };
            self.poll
                .registry()
                .register(&mut stream, STREAM, Interest::READABLE | Interest::WRITABLE)
                .map_err(|err| map_io_error(REGISTER, err))?;

            match self.await_connected(&stream, addr, deadline)? {
                Handshake::Established => {
                    stream
                        .set_nodelay(self.config.nodelay())
                        .map_err(|err| map_io_error(OPEN_STREAM, err))?;
                    return Ok(stream);
                }
                Handshake::Failed(err) => {
                    debug!(%addr, error = %err, "evented connect attempt failed");
                    let _ = self.poll.registry().deregister(&mut stream);
                    last_error = Some(err.with_extra("addr", addr));
                }
            }
        }
        Err(last_error.unwrap_or_else(|| {
            SocketError::new(ErrorCode::ConnectionTimeout)
                .with_message("connect deadline elapsed before any address answered")
        }))
    }

    fn await_connected(
        &mut self,
        stream: &TcpStream,
        addr: SocketAddr,
        deadline: Instant,
    ) -> Result<Handshake> {
        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return Err(io_error::connect_timeout_error(&addr.ip().to_string(), addr.port()));
            }
            if let Err(err) = self.poll.poll(&mut self.events, Some(remaining)) {
                if err.kind() == io::ErrorKind::Interrupted {
                    continue;
                }
                return Err(map_io_error(CONNECT, err));
            }

            let mut woken = false;
            let mut writable = false;
            for event in self.events.iter() {
                match event.token() {
                    WAKE => woken = true,
                    STREAM => {
                        writable |= event.is_writable() || event.is_error() || event.is_write_closed()
                    }
                    _ => {}
                }
            }
            if woken && self.shutdown_requested() {
                return Err(io_error::connect_aborted());
            }
            if !writable {
                continue;
            }

            match stream.take_error() {
                Ok(Some(err)) | Err(err) => {
                    return Ok(Handshake::Failed(map_io_error(CONNECT, err)));
                }
                Ok(None) => {}
            }
            match stream.peer_addr() {
                Ok(_) => return Ok(Handshake::Established),
                Err(err) if err.kind() == io::ErrorKind::NotConnected => continue,
                Err(err) => return Ok(Handshake::Failed(map_io_error(CONNECT, err))),
            }
        }
    }

    /// 握手阶段只关心关闭命令；此时不可能存在合法的发送。
    fn shutdown_requested(&self) -> bool {
        loop {
            match self.commands.try_recv() {
                Ok(Command::Shutdown) | Err(TryRecvError::Disconnected) => return true,
                Ok(Command::Send { reply, .. }) => {
                    let _ = reply.send(Err(SocketError::new(ErrorCode::NotConnected)));
                }
                Err(TryRecvError::Empty) => return false,
            }
        }
    }

    fn serve(mut self, mut conn: Connection) {
        // 握手阶段的 poll 可能已经消费了可读边沿（对端的问候或 FIN），进入轮询前先读一次。
        let mut flow = self.read_available(&mut conn);
        while flow == Flow::Continue && self.shared.is_current(self.epoch) {
            let timeout = conn
                .pending
                .as_ref()
                .map(|pending| pending.deadline.saturating_duration_since(Instant::now()));
            if let Err(err) = self.poll.poll(&mut self.events, timeout) {
                if err.kind() == io::ErrorKind::Interrupted {
                    continue;
                }
                self.shared.connection_lost(self.epoch, map_io_error(READ, err));
                break;
            }

            let mut woken = false;
            let mut readable = false;
            let mut writable = false;
            for event in self.events.iter() {
                match event.token() {
                    WAKE => woken = true,
                    STREAM => {
                        readable |= event.is_readable() || event.is_read_closed() || event.is_error();
                        writable |= event.is_writable();
                    }
                    _ => {}
                }
            }

            if readable {
                flow = self.read_available(&mut conn);
            }
            if flow == Flow::Continue && woken {
                flow = self.handle_commands(&mut conn);
            }
            if flow == Flow::Continue && writable {
                self.flush(&mut conn);
            }
            expire_send(&mut conn);
        }

        if let Some(pending) = conn.pending.take() {
            let total = pending.data.len();
            pending.finish(Err(io_error::send_aborted(total)));
        }
        let _ = self.poll.registry().deregister(&mut conn.stream);
        let _ = conn.stream.shutdown(Shutdown::Both);
        debug!(socket_type = %SocketType::Evented, "event loop stopped");
    }

    /// 边沿触发：必须一直读到 `WouldBlock`。
    fn read_available(&self, conn: &mut Connection) -> Flow {
        loop {
            match conn.stream.read(&mut conn.buf) {
                Ok(0) => {
                    self.shared
                        .connection_lost(self.epoch, io_error::connection_closed());
                    return Flow::Stop;
                }
                Ok(n) => {
                    if !self
                        .shared
                        .emit_data(self.epoch, Bytes::copy_from_slice(&conn.buf[..n]))
                    {
                        return Flow::Stop;
                    }
                }
                Err(err) if err.kind() == io::ErrorKind::WouldBlock => return Flow::Continue,
                Err(err) if err.kind() == io::ErrorKind::Interrupted => continue,
                Err(err) => {
                    self.shared.connection_lost(self.epoch, map_io_error(READ, err));
                    return Flow::Stop;
                }
            }
        }
    }

    fn handle_commands(&self, conn: &mut Connection) -> Flow {
        loop {
            match self.commands.try_recv() {
                Ok(Command::Send { data, reply }) => {
                    if conn.pending.is_some() {
                        let _ = reply.send(Err(SocketError::new(ErrorCode::SendFailed)
                            .with_message("another send is still in flight")));
                        continue;
                    }
                    conn.pending = Some(PendingSend {
                        data,
                        written: 0,
                        deadline: Instant::now() + self.config.send_timeout(),
                        reply,
                    });
                    self.flush(conn);
                }
                Ok(Command::Shutdown) | Err(TryRecvError::Disconnected) => return Flow::Stop,
                Err(TryRecvError::Empty) => return Flow::Continue,
            }
        }
    }

    fn flush(&self, conn: &mut Connection) {
        let Some(mut pending) = conn.pending.take() else {
            return;
        };
        let total = pending.data.len();
        while pending.written < total {
            match conn.stream.write(&pending.data[pending.written..]) {
                Ok(0) => {
                    let err = io::Error::from(io::ErrorKind::WriteZero);
                    let written = pending.written;
                    pending.finish(Err(io_error::send_io_error(err, written, total)));
                    return;
                }
                Ok(n) => pending.written += n,
                Err(err) if err.kind() == io::ErrorKind::WouldBlock => {
                    conn.pending = Some(pending);
                    return;
                }
                Err(err) if err.kind() == io::ErrorKind::Interrupted => continue,
                Err(err) => {
                    let written = pending.written;
                    pending.finish(Err(io_error::send_io_error(err, written, total)));
                    return;
                }
            }
        }
        if self.shared.log_io() {
            trace!(socket_type = %SocketType::Evented, bytes = total, "sent");
        }
        pending.finish(Ok(()));
    }
}

fn expire_send(conn: &mut Connection) {
    let expired = conn
        .pending
        .as_ref()
        .is_some_and(|pending| Instant::now() >= pending.deadline);
    if expired {
        if let Some(pending) = conn.pending.take() {
            let (written, total) = (pending.written, pending.data.len());
            pending.finish(Err(io_error::send_timeout_error(written, total)));
        }
    }
}
