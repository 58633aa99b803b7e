//! 托管流后端：在专属线程上运行 Tokio 单线程运行时作为 IO 执行上下文。

use crate::{
    io_error::{self, CONNECT, CREATE_STREAM, OPEN_STREAM, READ, map_io_error},
    resolve::resolve_async,
    shared::{Epoch, Shared},
};
use bytes::Bytes;
use crossbeam_channel::{RecvTimeoutError, Sender};
use parking_lot::Mutex;
use qsocket_core::{
    ConnectionState, ErrorCode, ReceiveCallback, Result, SocketBackend, SocketConfig, SocketError,
    SocketType, StateCallback, validate_endpoint, validate_payload,
};
use std::{
    io,
    sync::Arc,
    thread::{self, JoinHandle},
    time::Duration,
};
use tokio::{
    io::{AsyncReadExt, AsyncWriteExt},
    net::{
        TcpStream as TokioTcpStream,
        tcp::{OwnedReadHalf, OwnedWriteHalf},
    },
    runtime::{Builder as RuntimeBuilder, Runtime},
    sync::{Notify, mpsc},
};
use tracing::{debug, info, trace, warn};

/// 发送回执在发送超时之外额外等待的时间。
const REPLY_GRACE: Duration = Duration::from_millis(500);

/// 由运行时托管的流式后端，也是门面的默认实现。
///
/// # 教案式注释
///
/// ## 意图 (Why)
/// - 把连接的全部生命周期交给一个 Tokio 运行时调度，读、写与建连超时都用 Future 组合表达；
/// - 每个连接拥有独立的运行时线程，回调始终在该线程上触发，调用方无需关心执行器。
///
/// ## 逻辑 (How)
/// - `connect` 在调用方线程构建 `current_thread` 运行时，交给新线程 `block_on` 驱动主循环；
/// - 主循环用 `tokio::select!` 组合“建连 + 超时”与关闭信号，成功后拆分读写半部；
/// - 读半部运行在独立任务中，写请求经 `mpsc` 进入主循环并在 `tokio::time::timeout` 内写完；
/// - 关闭通过 [`Notify`] 发出，即使主循环正阻塞在写上也能立即响应。
///
/// ## 契约 (What)
/// - 满足 [`SocketBackend`] 的全部约定；除主动断开外，所有回调都在运行时线程上触发。
///
/// ## 注意事项 (Trade-offs)
/// - 一个连接一个运行时，换取隔离性而非极致的资源利用率。
pub struct StreamBackend {
    shared: Arc<Shared>,
    config: SocketConfig,
    session: Mutex<Option<StreamSession>>,
    send_lock: Mutex<()>,
}

struct SendRequest {
    data: Bytes,
    reply: Sender<Result<()>>,
}

struct StreamSession {
    epoch: Epoch,
    requests: mpsc::UnboundedSender<SendRequest>,
    shutdown: Arc<Notify>,
    thread: Option<JoinHandle<()>>,
}

impl StreamSession {
    fn close(mut self, shared: &Shared) {
        self.shutdown.notify_one();
        let Some(handle) = self.thread.take() else {
            return;
        };
        if handle.thread().id() == thread::current().id() || shared.dispatching_on_current_thread()
        {
            return;
        }
        if handle.join().is_err() {
            warn!(socket_type = %SocketType::Stream, "run loop thread panicked");
        }
    }
}

impl StreamBackend {
    pub fn new(config: SocketConfig) -> Self {
        Self {
            shared: Shared::new(SocketType::Stream, config.log_io()),
            config,
            session: Mutex::new(None),
            send_lock: Mutex::new(()),
        }
    }

    fn take_session(&self) -> Option<StreamSession> {
        self.session.lock().take()
    }

    fn start(
        &self,
        epoch: Epoch,
        host: &str,
        port: u16,
    ) -> Result<crossbeam_channel::Receiver<Result<()>>> {
        let runtime = RuntimeBuilder::new_current_thread()
            .enable_all()
            .build()
            .map_err(|err| map_io_error(CREATE_STREAM, err))?;

        let (requests, inbox) = mpsc::unbounded_channel();
        let shutdown = Arc::new(Notify::new());
        let (ready_tx, ready_rx) = crossbeam_channel::bounded(1);
        let run_loop = RunLoop {
            shared: Arc::clone(&self.shared),
            epoch,
            config: self.config.clone(),
            inbox,
            shutdown: Arc::clone(&shutdown),
        };
        let target = (host.to_owned(), port);
        // 先占住会话槽再启动运行时线程，保证连接成功回调里的 `disconnect` 能取到本次会话。
        let mut slot = self.session.lock();
        let thread = thread::Builder::new()
            .name("qsocket-stream-runloop".into())
            .spawn(move || drive(runtime, run_loop, target, ready_tx))
            .map_err(|err| map_io_error(CREATE_STREAM, err))?;

        *slot = Some(StreamSession {
            epoch,
            requests,
            shutdown,
            thread: Some(thread),
        });
        Ok(ready_rx)
    }
}

impl SocketBackend for StreamBackend {
    fn socket_type(&self) -> SocketType {
        SocketType::Stream
    }

    fn connect(&self, host: &str, port: u16) -> Result<()> {
        validate_endpoint(host, port)?;
        let epoch = self.shared.begin_connect()?;
        if let Some(stale) = self.take_session() {
            stale.close(&self.shared);
        }
        info!(socket_type = %SocketType::Stream, host, port, "connecting");

        let ready = match self.start(epoch, host, port) {
            Ok(ready) => ready,
            Err(err) => {
                warn!(socket_type = %SocketType::Stream, host, port, error = %err, "connect failed");
                return Err(self.shared.fail_connect(epoch, err));
            }
        };
        match ready.recv() {
            Ok(Ok(())) => Ok(()),
            Ok(Err(err)) => {
                warn!(socket_type = %SocketType::Stream, host, port, error = %err, "connect failed");
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
            info!(socket_type = %SocketType::Stream, "disconnected");
            self.shared.emit_disconnected(None);
        }
    }

    fn send(&self, data: &[u8]) -> Result<()> {
        validate_payload(data)?;
        let _sending = self.send_lock.lock();
        let requests = {
            let session = self.session.lock();
            match session.as_ref() {
                Some(session) if self.shared.is_current(session.epoch) => session.requests.clone(),
                _ => return Err(SocketError::new(ErrorCode::NotConnected)),
            }
        };

        let (reply, outcome) = crossbeam_channel::bounded(1);
        requests
            .send(SendRequest {
                data: Bytes::copy_from_slice(data),
                reply,
            })
            .map_err(|_| io_error::send_aborted(data.len()))?;

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

impl Drop for StreamBackend {
    fn drop(&mut self) {
        self.shared.clear_callbacks();
        self.shared.release();
        if let Some(session) = self.take_session() {
            session.close(&self.shared);
        }
    }
}

fn drive(
    runtime: Runtime,
    run_loop: RunLoop,
    (host, port): (String, u16),
    ready: Sender<Result<()>>,
) {
    runtime.block_on(run_loop.run(&host, port, ready));
    debug!(socket_type = %SocketType::Stream, "run loop stopped");
}

/// 运行时线程上的主循环状态。
struct RunLoop {
    shared: Arc<Shared>,
    epoch: Epoch,
    config: SocketConfig,
    inbox: mpsc::UnboundedReceiver<SendRequest>,
    shutdown: Arc<Notify>,
}

impl RunLoop {
    async fn run(mut self, host: &str, port: u16, ready: Sender<Result<()>>) {
        let connecting = tokio::time::timeout(
            self.config.connect_timeout(),
            open(host, port, self.config.nodelay()),
        );
        let outcome = tokio::select! {
            result = connecting => match result {
                Ok(result) => result,
                Err(_elapsed) => Err(io_error::connect_timeout_error(host, port)),
            },
            _ = self.shutdown.notified() => Err(io_error::connect_aborted()),
        };
        let stream = match outcome {
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

        let (reader, mut writer) = stream.into_split();
        let mut read_task = tokio::spawn(read_loop(
            Arc::clone(&self.shared),
            reader,
            self.epoch,
            self.config.read_buffer_size(),
        ));

        loop {
            tokio::select! {
                _ = &mut read_task => break,
                _ = self.shutdown.notified() => {
                    read_task.abort();
                    let _ = (&mut read_task).await;
                    break;
                }
                request = self.inbox.recv() => {
                    let Some(SendRequest { data, reply }) = request else {
                        break;
                    };
                    tokio::select! {
                        result = write_within(&mut writer, &data, self.config.send_timeout()) => {
                            if result.is_ok() && self.shared.log_io() {
                                trace!(socket_type = %SocketType::Stream, bytes = data.len(), "sent");
                            }
                            let _ = reply.send(result);
                        }
                        _ = self.shutdown.notified() => {
                            let _ = reply.send(Err(io_error::send_aborted(data.len())));
                            read_task.abort();
                            let _ = (&mut read_task).await;
                            break;
                        }
                    }
                }
            }
        }

        while let Ok(SendRequest { data, reply }) = self.inbox.try_recv() {
            let _ = reply.send(Err(io_error::send_aborted(data.len())));
        }
        let _ = writer.shutdown().await;
    }
}

async fn open(host: &str, port: u16, nodelay: bool) -> Result<TokioTcpStream> {
    let addrs = resolve_async(host, port).await?;
    let mut last_error = None;
    for addr in addrs {
        match TokioTcpStream::connect(addr).await {
            Ok(stream) => {
                stream
                    .set_nodelay(nodelay)
                    .map_err(|err| map_io_error(OPEN_STREAM, err))?;
                return Ok(stream);
            }
            Err(err) => {
                debug!(%addr, error = %err, "stream connect attempt failed");
                last_error = Some(map_io_error(CONNECT, err).with_extra("addr", addr));
            }
        }
    }
    Err(last_error.unwrap_or_else(|| io_error::connect_timeout_error(host, port)))
}

async fn read_loop(shared: Arc<Shared>, mut reader: OwnedReadHalf, epoch: Epoch, buffer_size: usize) {
    let mut buf = vec![0u8; buffer_size];
    loop {
        match reader.read(&mut buf).await {
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

/// 在 `limit` 内写完 `data`，超时后按已写字节数区分错误码。
async fn write_within(writer: &mut OwnedWriteHalf, data: &[u8], limit: Duration) -> Result<()> {
    let mut written = 0;
    let outcome = tokio::time::timeout(limit, async {
        while written < data.len() {
            match writer.write(&data[written..]).await {
                Ok(0) => return Err(io::Error::from(io::ErrorKind::WriteZero)),
                Ok(n) => written += n,
                Err(err) if err.kind() == io::ErrorKind::Interrupted => continue,
                Err(err) => return Err(err),
            }
        }
        Ok(())
    })
    .await;

    match outcome {
        Ok(Ok(())) => Ok(()),
        Ok(Err(err)) => Err(io_error::send_io_error(err, written, data.len())),
        Err(_elapsed) => Err(io_error::send_timeout_error(written, data.len())),
    }
}
