//! 阻塞套接字后端：socket2 建连 + 独立读线程。

use crate::{
    io_error::{self, CONNECT, CREATE_SOCKET, CREATE_STREAM, OPEN_STREAM, READ, map_io_error},
    resolve::resolve,
    shared::{Epoch, Shared},
};
use bytes::Bytes;
use parking_lot::Mutex;
use qsocket_core::{
    ConnectionState, ErrorCode, ReceiveCallback, Result, SocketBackend, SocketConfig, SocketError,
    SocketType, StateCallback, validate_endpoint, validate_payload,
};
use socket2::{Domain, Protocol, SockAddr, Socket, Type};
use std::{
    io::{self, Read, Write},
    net::{Shutdown, SocketAddr, TcpStream},
    sync::Arc,
    thread::{self, JoinHandle},
    time::{Duration, Instant},
};
use tracing::{debug, info, trace, warn};

/// 基于阻塞系统调用的后端。
///
/// # 教案式注释
///
/// ## 意图 (Why)
/// - 直接操作套接字，适合需要完全掌控系统调用行为的场景；
/// - 读路径运行在专属线程上，调用方线程只承担建连与发送。
///
/// ## 逻辑 (How)
/// - `connect` 在调用方线程上解析主机，并用 `socket2::Socket::connect_timeout` 逐个尝试候选地址；
/// - 成功后把套接字转为 `std::net::TcpStream`，以 `Arc` 在读线程与发送路径之间共享；
/// - 读线程阻塞在 `read` 上，`disconnect` 通过 `shutdown(Both)` 唤醒它，再 `join` 回收；
/// - 发送设置 `SO_SNDTIMEO` 为固定发送超时，并在整体截止时间内循环写出。
///
/// ## 契约 (What)
/// - 满足 [`SocketBackend`] 的全部约定；所有回调要么在调用方线程（连接成功、主动断开），
///   要么在读线程（数据、非请求性断开）上触发，并由分发锁串行化。
///
/// ## 注意事项 (Trade-offs)
/// - 每条连接占用一个线程；
/// - 若在回调中调用 `disconnect`（无论回调运行在读线程还是调用方线程），都不会等待读线程，
///   读线程在回调返回后自行退出。
pub struct RawSocketBackend {
    shared: Arc<Shared>,
    config: SocketConfig,
    session: Mutex<Option<RawSession>>,
    send_lock: Mutex<()>,
}

struct RawSession {
    epoch: Epoch,
    stream: Arc<TcpStream>,
    reader: Option<JoinHandle<()>>,
}

impl RawSession {
    /// 关闭套接字并回收读线程。
    ///
    /// 读线程被唤醒后还要进入一次分发锁才能退出，因此在回调内（当前线程持有分发锁）
    /// 或读线程自身上调用时只关闭套接字，线程随后自行结束。
    fn close(mut self, shared: &Shared) {
        let _ = self.stream.shutdown(Shutdown::Both);
        let Some(reader) = self.reader.take() else {
            return;
        };
        if reader.thread().id() == thread::current().id() || shared.dispatching_on_current_thread()
        {
            debug!(socket_type = %SocketType::Raw, "reader thread detached");
            return;
        }
        if reader.join().is_err() {
            warn!(socket_type = %SocketType::Raw, "reader thread panicked");
        }
    }
}

impl RawSocketBackend {
    pub fn new(config: SocketConfig) -> Self {
        Self {
            shared: Shared::new(SocketType::Raw, config.log_io()),
            config,
            session: Mutex::new(None),
            send_lock: Mutex::new(()),
        }
    }

    fn take_session(&self, epoch: Option<Epoch>) -> Option<RawSession> {
        let mut session = self.session.lock();
        match (session.as_ref(), epoch) {
            (Some(current), Some(epoch)) if current.epoch != epoch => None,
            _ => session.take(),
        }
    }

    fn open(&self, host: &str, port: u16) -> Result<TcpStream> {
        let addrs = resolve(host, port)?;
        let deadline = Instant::now() + self.config.connect_timeout();
        let mut last_error = None;

        for addr in addrs {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                break;
            }
            match connect_one(addr, remaining) {
                Ok(stream) => return self.configure(stream),
                Err(err) => {
                    debug!(%addr, error = %err, "raw connect attempt failed");
                    last_error = Some(err);
                }
            }
        }
        Err(last_error.unwrap_or_else(|| io_error::connect_timeout_error(host, port)))
    }

    fn configure(&self, stream: TcpStream) -> Result<TcpStream> {
        stream
            .set_nodelay(self.config.nodelay())
            .and_then(|_| stream.set_write_timeout(Some(self.config.send_timeout())))
            .map_err(|err| map_io_error(OPEN_STREAM, err))?;
        Ok(stream)
    }

    fn spawn_reader(&self, stream: Arc<TcpStream>, epoch: Epoch) -> Result<JoinHandle<()>> {
        let shared = Arc::clone(&self.shared);
        let buffer_size = self.config.read_buffer_size();
        thread::Builder::new()
            .name("qsocket-raw-reader".into())
            .spawn(move || read_loop(shared, stream, epoch, buffer_size))
            .map_err(|err| map_io_error(CREATE_STREAM, err))
    }

    fn establish(&self, epoch: Epoch, stream: TcpStream) -> Result<()> {
        let stream = Arc::new(stream);
        // 读线程的首个回调会阻塞在分发锁上，直到连接成功回调发出。
        let dispatch = self.shared.dispatch_guard();
        let reader = match self.spawn_reader(Arc::clone(&stream), epoch) {
            Ok(reader) => reader,
            Err(err) => {
                let _ = stream.shutdown(Shutdown::Both);
                return Err(self.shared.fail_connect(epoch, err));
            }
        };
        *self.session.lock() = Some(RawSession {
            epoch,
            stream,
            reader: Some(reader),
        });
        if !self.shared.complete_connect(epoch) {
            // 读线程可能正等待分发锁，先释放再回收，避免互相等待。
            drop(dispatch);
            if let Some(session) = self.take_session(Some(epoch)) {
                session.close(&self.shared);
            }
            return Err(io_error::connect_aborted());
        }
        self.shared.emit_connected();
        drop(dispatch);
        Ok(())
    }
}

fn connect_one(addr: SocketAddr, timeout: Duration) -> Result<TcpStream> {
    let socket = Socket::new(Domain::for_address(addr), Type::STREAM, Some(Protocol::TCP))
        .map_err(|err| map_io_error(CREATE_SOCKET, err))?;
    socket
        .connect_timeout(&SockAddr::from(addr), timeout)
        .map_err(|err| map_io_error(CONNECT, err).with_extra("addr", addr))?;
    Ok(socket.into())
}

fn read_loop(shared: Arc<Shared>, stream: Arc<TcpStream>, epoch: Epoch, buffer_size: usize) {
    let mut buf = vec![0u8; buffer_size];
    loop {
        match (&*stream).read(&mut buf) {
            Ok(0) => {
                shared.connection_lost(epoch, io_error::connection_closed());
                return;
            }
            Ok(n) => {
                if !shared.emit_data(epoch, Bytes::copy_from_slice(&buf[..n])) {
                    return;
                }
            }
            Err(err) if err.kind() == io::ErrorKind::Interrupted => continue,
            Err(err) => {
                shared.connection_lost(epoch, map_io_error(READ, err));
                return;
            }
        }
    }
}

fn write_fully(stream: &TcpStream, data: &[u8], deadline: Instant) -> Result<()> {
    let mut written = 0;
    while written < data.len() {
        if Instant::now() >= deadline {
            return Err(io_error::send_timeout_error(written, data.len()));
        }
        match (&*stream).write(&data[written..]) {
            Ok(0) => {
                return Err(io_error::send_io_error(
                    io::Error::from(io::ErrorKind::WriteZero),
                    written,
                    data.len(),
                ));
            }
            Ok(n) => written += n,
            Err(err) if err.kind() == io::ErrorKind::Interrupted => continue,
            Err(err) => return Err(io_error::send_io_error(err, written, data.len())),
        }
    }
    Ok(())
}

impl SocketBackend for RawSocketBackend {
    fn socket_type(&self) -> SocketType {
        SocketType::Raw
    }

    fn connect(&self, host: &str, port: u16) -> Result<()> {
        validate_endpoint(host, port)?;
        let epoch = self.shared.begin_connect()?;
        if let Some(stale) = self.take_session(None) {
            stale.close(&self.shared);
        }
        info!(socket_type = %SocketType::Raw, host, port, "connecting");

        match self.open(host, port) {
            Ok(stream) => self.establish(epoch, stream),
            Err(err) => {
                warn!(socket_type = %SocketType::Raw, host, port, error = %err, "connect failed");
                Err(self.shared.fail_connect(epoch, err))
            }
        }
    }

    fn disconnect(&self) {
        let was_active = self.shared.release();
        if let Some(session) = self.take_session(None) {
            session.close(&self.shared);
        }
        if was_active {
            info!(socket_type = %SocketType::Raw, "disconnected");
            self.shared.emit_disconnected(None);
        }
    }

    fn send(&self, data: &[u8]) -> Result<()> {
        validate_payload(data)?;
        let _sending = self.send_lock.lock();
        let stream = {
            let session = self.session.lock();
            match session.as_ref() {
                Some(session) if self.shared.is_current(session.epoch) => {
                    Arc::clone(&session.stream)
                }
                _ => return Err(SocketError::new(ErrorCode::NotConnected)),
            }
        };
        let deadline = Instant::now() + self.config.send_timeout();
        write_fully(&stream, data, deadline)?;
        if self.shared.log_io() {
            trace!(socket_type = %SocketType::Raw, bytes = data.len(), "sent");
        }
        Ok(())
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

impl Drop for RawSocketBackend {
    fn drop(&mut self) {
        self.shared.clear_callbacks();
        self.shared.release();
        if let Some(session) = self.take_session(None) {
            session.close(&self.shared);
        }
    }
}
