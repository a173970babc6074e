//! End-to-end tests for the stream function node.
//!
//! A mock Zipper accepts the connection, checks the handshake and drives
//! data frames through a real [`NodeState`].

use std::future::pending;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use futures::{SinkExt, StreamExt};
use tokio::net::{TcpListener, TcpStream};
use tokio_test::{assert_err, assert_ok};
use tokio_util::codec::Framed;

use image_recognition_common::{AcceleratorConfig, EngineConfig, StreamError, WasiConfig};
use image_recognition_core::{EngineAdapter, ImportProvider, ImportTable};
use image_recognition_stream::{
    Frame, FrameCodec, Handshake, NodeState, StreamFunction, fingerprint,
};

const LABEL_WAT: &str = r#"
    (module
        (memory (export "memory") 1)
        (global $heap (mut i32) (i32.const 1024))
        (data (i32.const 16) "sushi")

        (func (export "__wbindgen_malloc") (param $size i32) (result i32)
            (local $ptr i32)
            (local.set $ptr (global.get $heap))
            (global.set $heap (i32.add (global.get $heap) (local.get $size)))
            (local.get $ptr))

        (func (export "infer") (param $ret i32) (param i32 i32)
            (i32.store (local.get $ret) (i32.const 16))
            (i32.store offset=4 (local.get $ret) (i32.const 5)))
    )
"#;

type ZipperSide = Framed<TcpStream, FrameCodec>;

// ============================================================================
// Helpers
// ============================================================================

fn node_state(module_path: &Path) -> NodeState {
    let imports: Arc<dyn ImportProvider> =
        Arc::new(|_: &AcceleratorConfig| -> Vec<Box<dyn ImportTable>> { Vec::new() });
    let config = EngineConfig {
        module_path: module_path.to_path_buf(),
        optimize: false,
        ..Default::default()
    };
    let wasi = WasiConfig {
        inherit_env: false,
        inherit_stdio: false,
        dirs: Vec::new(),
        ..Default::default()
    };
    let adapter = EngineAdapter::new(config, wasi, AcceleratorConfig::default(), imports);
    NodeState::new(Arc::new(adapter), 0x11)
}

fn label_module(dir: &tempfile::TempDir) -> PathBuf {
    let path = dir.path().join("label.wasm");
    std::fs::write(&path, wat::parse_str(LABEL_WAT).unwrap()).unwrap();
    path
}

fn stream_function(addr: &str, state: NodeState) -> StreamFunction {
    let mut sfn =
        StreamFunction::new("image-recognition", addr).with_connect_timeout(Duration::from_secs(5));
    sfn.observe_data_key(0x10);
    sfn.set_handler(state).unwrap();
    sfn
}

/// Accept one stream function and return its handshake.
async fn accept(listener: &TcpListener) -> (ZipperSide, Handshake) {
    let (stream, _) = listener.accept().await.unwrap();
    let mut framed = Framed::new(stream, FrameCodec::new(1024 * 1024));

    match framed.next().await {
        Some(Ok(Frame::Handshake(handshake))) => (framed, handshake),
        other => panic!("expected handshake, got {other:?}"),
    }
}

async fn next_frame(zipper: &mut ZipperSide) -> Frame {
    tokio::time::timeout(Duration::from_secs(10), zipper.next())
        .await
        .expect("timed out waiting for frame")
        .expect("connection closed")
        .expect("invalid frame")
}

// ============================================================================
// Test: Connection
// ============================================================================

#[tokio::test]
async fn test_connect_failure_is_reported() {
    // Reserve a port, then free it so nothing listens there
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap().to_string();
    drop(listener);

    let dir = tempfile::tempdir().unwrap();
    let state = node_state(&dir.path().join("absent.so"));
    let sfn = stream_function(&addr, state.clone());

    let err = assert_err!(sfn.connect().await);
    assert!(matches!(err, StreamError::Connect { .. }));
    assert!(err.is_startup_failure());

    // No message was ever dispatched
    assert_eq!(state.counter().current(), 0);
    assert_eq!(state.engine().stats().failed(), 0);
}

#[tokio::test]
async fn test_handshake_announces_function() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap().to_string();

    let zipper = tokio::spawn(async move {
        let (mut framed, handshake) = accept(&listener).await;
        framed.send(Frame::HandshakeAck).await.unwrap();
        framed.send(Frame::Goaway("done".into())).await.unwrap();
        handshake
    });

    let dir = tempfile::tempdir().unwrap();
    let connection = assert_ok!(
        stream_function(&addr, node_state(&dir.path().join("absent.so")))
            .connect()
            .await
    );
    assert_eq!(connection.name(), "image-recognition");

    let handled = assert_ok!(connection.serve(pending::<()>()).await);
    assert_eq!(handled, 0);

    let handshake = zipper.await.unwrap();
    assert_eq!(
        handshake,
        Handshake {
            name: "image-recognition".into(),
            observe: vec![0x10],
        }
    );
}

#[tokio::test]
async fn test_goaway_during_handshake() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap().to_string();

    tokio::spawn(async move {
        let (mut framed, _) = accept(&listener).await;
        framed
            .send(Frame::Goaway("function name taken".into()))
            .await
            .unwrap();
    });

    let dir = tempfile::tempdir().unwrap();
    let result = stream_function(&addr, node_state(&dir.path().join("absent.so")))
        .connect()
        .await;

    assert!(matches!(
        result,
        Err(StreamError::Handshake { ref reason }) if reason == "function name taken"
    ));
}

// ============================================================================
// Test: Serving
// ============================================================================

#[tokio::test]
async fn test_empty_payload_end_to_end() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap().to_string();

    let zipper = tokio::spawn(async move {
        let (mut framed, _) = accept(&listener).await;
        framed.send(Frame::HandshakeAck).await.unwrap();
        framed.send(Frame::data(0x10, Vec::new())).await.unwrap();
        let reply = next_frame(&mut framed).await;
        framed.send(Frame::Goaway("done".into())).await.unwrap();
        reply
    });

    // Missing module: initialization fails for every message
    let dir = tempfile::tempdir().unwrap();
    let state = node_state(&dir.path().join("absent.so"));
    let sfn = stream_function(&addr, state.clone());
    let connection = sfn.connect().await.unwrap();
    let handled = connection.serve(pending::<()>()).await.unwrap();

    assert_eq!(handled, 1);
    assert_eq!(zipper.await.unwrap(), Frame::data(0x11, Vec::new()));
    assert_eq!(state.counter().current(), 1);
    assert_eq!(state.engine().stats().failed(), 1);
    assert_eq!(state.engine().stats().released(), 0);
    assert_eq!(fingerprint(b""), "da39a3ee5e6b4b0d3255bfef95601890afd80709");
}

#[tokio::test]
async fn test_only_observed_keys_are_handled() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap().to_string();

    let zipper = tokio::spawn(async move {
        let (mut framed, _) = accept(&listener).await;
        framed.send(Frame::HandshakeAck).await.unwrap();
        for frame in [
            Frame::data(0x12, &b"not for us"[..]),
            Frame::data(0x10, &b"JPEG"[..]),
            Frame::data(0x10, &b"\x89PNG"[..]),
        ] {
            framed.send(frame).await.unwrap();
        }
        let first = next_frame(&mut framed).await;
        let second = next_frame(&mut framed).await;
        framed.send(Frame::Goaway("done".into())).await.unwrap();
        vec![first, second]
    });

    let dir = tempfile::tempdir().unwrap();
    let state = node_state(&label_module(&dir));
    let sfn = stream_function(&addr, state.clone());
    let connection = sfn.connect().await.unwrap();
    let handled = connection.serve(pending::<()>()).await.unwrap();

    assert_eq!(handled, 2);
    assert_eq!(
        zipper.await.unwrap(),
        vec![Frame::data(0x11, Vec::new()), Frame::data(0x11, Vec::new())]
    );
    assert_eq!(state.counter().current(), 2);

    let stats = state.engine().stats();
    assert_eq!(stats.initialized(), 2);
    assert_eq!(stats.released(), 2);
}

#[tokio::test]
async fn test_shutdown_sends_goaway() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap().to_string();
    let (shutdown_tx, shutdown_rx) = tokio::sync::oneshot::channel::<()>();

    let zipper = tokio::spawn(async move {
        let (mut framed, _) = accept(&listener).await;
        framed.send(Frame::HandshakeAck).await.unwrap();
        shutdown_tx.send(()).unwrap();
        next_frame(&mut framed).await
    });

    let dir = tempfile::tempdir().unwrap();
    let connection = stream_function(&addr, node_state(&dir.path().join("absent.so")))
        .connect()
        .await
        .unwrap();
    let handled = connection
        .serve(async {
            let _ = shutdown_rx.await;
        })
        .await
        .unwrap();

    assert_eq!(handled, 0);
    assert_eq!(zipper.await.unwrap(), Frame::Goaway("shutdown".into()));
}
