use parking_lot::Mutex;
use qsocket::{QsSocketConfig, prelude::*};
use std::{
    io::{self, Read},
    net::{TcpListener, TcpStream},
    sync::{Arc, OnceLock, Weak},
    thread,
    time::{Duration, Instant},
};

#[derive(Clone, Debug, PartialEq, Eq)]
enum Event {
    Connected(SocketId),
    Disconnected(SocketId, Option<ErrorCode>),
    Failed(SocketId, ErrorCode),
}

#[derive(Default)]
struct Recorder {
    events: Mutex<Vec<Event>>,
    data: Mutex<Vec<u8>>,
}

impl Recorder {
    fn events(&self) -> Vec<Event> {
        self.events.lock().clone()
    }

    fn data(&self) -> Vec<u8> {
        self.data.lock().clone()
    }
}

impl SocketDelegate for Recorder {
    fn socket_did_connect(&self, socket: SocketId) {
        self.events.lock().push(Event::Connected(socket));
    }

    fn socket_did_disconnect(&self, socket: SocketId, error: Option<&SocketError>) {
        self.events
            .lock()
            .push(Event::Disconnected(socket, error.map(SocketError::code)));
    }

    fn socket_did_receive_data(&self, _socket: SocketId, data: &Bytes) {
        self.data.lock().extend_from_slice(data);
    }

    fn socket_did_fail(&self, socket: SocketId, error: &SocketError) {
        self.events.lock().push(Event::Failed(socket, error.code()));
    }
}

fn wait_for(what: &str, mut condition: impl FnMut() -> bool) {
    let deadline = Instant::now() + Duration::from_secs(5);
    while !condition() {
        assert!(Instant::now() < deadline, "timed out waiting for {what}");
        thread::sleep(Duration::from_millis(10));
    }
}

fn echo_peer() -> u16 {
    let listener = TcpListener::bind("127.0.0.1:0").expect("bind loopback");
    let port = listener.local_addr().expect("local addr").port();
    thread::spawn(move || {
        for stream in listener.incoming() {
            let Ok(stream) = stream else { break };
            thread::spawn(move || echo(stream));
        }
    });
    port
}

fn echo(stream: TcpStream) {
    let Ok(mut writer) = stream.try_clone() else {
        return;
    };
    let mut reader = stream;
    let _ = io::copy(&mut reader, &mut writer);
}

fn closing_peer() -> u16 {
    let listener = TcpListener::bind("127.0.0.1:0").expect("bind loopback");
    let port = listener.local_addr().expect("local addr").port();
    thread::spawn(move || {
        for stream in listener.incoming() {
            drop(stream);
        }
    });
    port
}

fn closed_port() -> u16 {
    let listener = TcpListener::bind("127.0.0.1:0").expect("bind loopback");
    listener.local_addr().expect("local addr").port()
}

#[test]
fn session_is_translated_into_delegate_notifications() {
    for socket_type in SocketType::ALL {
        let port = echo_peer();
        let socket = QsSocket::new(socket_type);
        let recorder = Arc::new(Recorder::default());
        socket.set_delegate(&recorder);
        let id = socket.id();

        socket.connect("127.0.0.1", port).expect("connect");
        assert_eq!(recorder.events(), vec![Event::Connected(id)], "{socket_type}");

        socket.send(b"ping").expect("send");
        wait_for("echo", || recorder.data() == b"ping");

        socket.disconnect();
        assert_eq!(
            recorder.events(),
            vec![Event::Connected(id), Event::Disconnected(id, None)],
            "{socket_type}"
        );
        assert!(!socket.is_connected());
    }
}

#[test]
fn failed_connect_reports_fail_then_disconnect() {
    for socket_type in SocketType::ALL {
        let socket = QsSocket::new(socket_type);
        let recorder = Arc::new(Recorder::default());
        socket.set_delegate(&recorder);
        let id = socket.id();

        let err = socket.connect("127.0.0.1", closed_port()).expect_err("refused");
        assert!(err.is_connection(), "{socket_type}: {err}");
        assert_eq!(
            recorder.events(),
            vec![
                Event::Failed(id, err.code()),
                Event::Disconnected(id, Some(err.code())),
            ],
            "{socket_type}"
        );
    }
}

#[test]
fn peer_close_reports_connection_closed() {
    for socket_type in SocketType::ALL {
        let socket = QsSocket::new(socket_type);
        let recorder = Arc::new(Recorder::default());
        socket.set_delegate(&recorder);
        let id = socket.id();

        socket.connect("127.0.0.1", closing_peer()).expect("connect");
        wait_for("close notification", || recorder.events().len() == 3);
        assert_eq!(
            recorder.events(),
            vec![
                Event::Connected(id),
                Event::Failed(id, ErrorCode::ConnectionClosed),
                Event::Disconnected(id, Some(ErrorCode::ConnectionClosed)),
            ],
            "{socket_type}"
        );
        assert_eq!(socket.state(), ConnectionState::Disconnected);
    }
}

#[test]
fn validation_errors_do_not_notify_the_delegate() {
    let socket = QsSocket::default();
    let recorder = Arc::new(Recorder::default());
    socket.set_delegate(&recorder);

    assert_eq!(
        socket.connect("", 80).expect_err("host").code(),
        ErrorCode::InvalidHost
    );
    assert_eq!(
        socket.connect("127.0.0.1", 0).expect_err("port").code(),
        ErrorCode::InvalidPort
    );
    assert_eq!(socket.send(b"").expect_err("empty").code(), ErrorCode::EmptyData);
    assert_eq!(
        socket.send(b"x").expect_err("idle").code(),
        ErrorCode::NotConnected
    );
    assert!(recorder.events().is_empty());
}

#[test]
fn dropped_delegate_is_silently_skipped() {
    let port = echo_peer();
    let socket = QsSocket::new(SocketType::Raw);
    let recorder = Arc::new(Recorder::default());
    socket.set_delegate(&recorder);
    drop(recorder);

    socket.connect("127.0.0.1", port).expect("connect without observer");
    socket.send(b"nobody listens").expect("send");
    socket.disconnect();
    assert!(!socket.has_delegate());
}

#[test]
fn one_delegate_can_tell_sockets_apart() {
    let port = echo_peer();
    let recorder = Arc::new(Recorder::default());
    let first = QsSocket::new(SocketType::Evented);
    let second = QsSocket::new(SocketType::Stream);
    first.set_delegate(&recorder);
    second.set_delegate(&recorder);

    first.connect("127.0.0.1", port).expect("first");
    second.connect("127.0.0.1", port).expect("second");
    first.disconnect();

    assert_eq!(
        recorder.events(),
        vec![
            Event::Connected(first.id()),
            Event::Connected(second.id()),
            Event::Disconnected(first.id(), None),
        ]
    );
    assert!(second.is_connected());
}

#[test]
fn dropping_the_socket_closes_quietly() {
    for socket_type in SocketType::ALL {
        let listener = TcpListener::bind("127.0.0.1:0").expect("bind");
        let port = listener.local_addr().expect("addr").port();
        let recorder = Arc::new(Recorder::default());
        let socket = QsSocket::new(socket_type);
        socket.set_delegate(&recorder);
        socket.connect("127.0.0.1", port).expect("connect");
        let (mut accepted, _) = listener.accept().expect("accept");
        accepted
            .set_read_timeout(Some(Duration::from_secs(5)))
            .expect("read timeout");

        drop(socket);
        let mut buf = [0u8; 4];
        assert_eq!(accepted.read(&mut buf).expect("eof"), 0, "{socket_type}");
        assert_eq!(recorder.events().len(), 1, "{socket_type}: only the connect");
    }
}

/// 观察者在收到数据时主动断开，验证回调内调用 `disconnect` 不会死锁。
#[test]
fn delegate_may_disconnect_from_a_notification() {
    struct HangUp {
        socket: OnceLock<Weak<QsSocket>>,
        recorder: Recorder,
    }

    impl SocketDelegate for HangUp {
        fn socket_did_receive_data(&self, socket: SocketId, data: &Bytes) {
            self.recorder.socket_did_receive_data(socket, data);
            if let Some(socket) = self.socket.get().and_then(Weak::upgrade) {
                socket.disconnect();
            }
        }

        fn socket_did_disconnect(&self, socket: SocketId, error: Option<&SocketError>) {
            self.recorder.socket_did_disconnect(socket, error);
        }
    }

    for socket_type in SocketType::ALL {
        let port = echo_peer();
        let socket = Arc::new(QsSocket::new(socket_type));
        let delegate = Arc::new(HangUp {
            socket: OnceLock::new(),
            recorder: Recorder::default(),
        });
        let _ = delegate.socket.set(Arc::downgrade(&socket));
        socket.set_delegate(&delegate);

        socket.connect("127.0.0.1", port).expect("connect");
        socket.send(b"bye").expect("send");
        wait_for("hang up", || !delegate.recorder.events().is_empty());
        assert_eq!(
            delegate.recorder.events(),
            vec![Event::Disconnected(socket.id(), None)],
            "{socket_type}"
        );
        assert!(!socket.is_connected());
    }
}

#[test]
fn socket_can_be_built_from_a_toml_document() {
    let config = QsSocketConfig::from_toml_str(
        r#"
        socket_type = "raw"

        [socket]
        connect_timeout_ms = 1500
        send_timeout_ms = 750
        "#,
    )
    .expect("parse");
    let socket = QsSocket::from_config(&config).expect("build");
    assert_eq!(socket.socket_type(), SocketType::Raw);
    assert_eq!(socket.config().connect_timeout(), Duration::from_millis(1500));
    assert_eq!(socket.config().send_timeout(), Duration::from_millis(750));
}
