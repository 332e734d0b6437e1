//! Live camera preview for positioning the sample.
//!
//! A capture thread keeps the newest MJPEG frame in a watch channel and a
//! small web server pushes it to browsers: `GET /` is a viewer page,
//! `GET /stream` a websocket sending one binary message per JPEG frame.

use std::{
    net::{SocketAddr, TcpListener},
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
    thread::{spawn, JoinHandle},
};

use axum::{
    extract::{
        connect_info::ConnectInfo,
        ws::{Message, WebSocket, WebSocketUpgrade},
        State,
    },
    response::{Html, IntoResponse},
    routing::get,
    Router,
};
use futures::{sink::SinkExt, stream::StreamExt};
use tokio::sync::{oneshot, watch};
use tower_http::{
    cors::{Any, CorsLayer},
    trace::{DefaultMakeSpan, TraceLayer},
};
use tracing::{error, info, warn};
use v4l::io::traits::CaptureStream;

use crate::{
    usb_camera::{frame_bytes, Camera},
    Error, Result,
};

pub const DEFAULT_ADDR: &str = "0.0.0.0:8080";

pub type Frame = Option<Arc<Vec<u8>>>;

const VIEWER: &str = r#"<!doctype html>
<html>
<head><title>microscope preview</title></head>
<body style="margin:0;background:#111">
<img id="frame" style="max-width:100vw;max-height:100vh;display:block;margin:auto">
<script>
const img = document.getElementById("frame");
const ws = new WebSocket(`ws://${location.host}/stream`);
ws.binaryType = "blob";
ws.onmessage = (ev) => {
  const url = URL.createObjectURL(ev.data);
  img.onload = () => URL.revokeObjectURL(url);
  img.src = url;
};
</script>
</body>
</html>
"#;

pub struct Preview {
    stop: Arc<AtomicBool>,
    capture: JoinHandle<Camera>,
    shutdown: Option<oneshot::Sender<()>>,
    server: JoinHandle<Result<()>>,
    addr: SocketAddr,
}

impl Preview {
    /// Take over the camera and start streaming it. [`Preview::stop`] hands
    /// the camera back.
    pub fn start(camera: Camera, addr: SocketAddr) -> Result<Self> {
        let listener = TcpListener::bind(addr)?;
        listener.set_nonblocking(true)?;
        let addr = listener.local_addr()?;

        let (frame_tx, frame_rx) = watch::channel(None);
        let stop = Arc::new(AtomicBool::new(false));
        let capture_stop = stop.clone();
        let capture = spawn(move || {
            if let Err(e) = stream_frames(&camera, &frame_tx, &capture_stop) {
                error!("preview capture stopped: {e}");
            }
            camera
        });

        let (shutdown_tx, shutdown_rx) = oneshot::channel();
        let server = spawn(move || -> Result<()> {
            let rt = tokio::runtime::Runtime::new()?;
            rt.block_on(serve_preview(listener, frame_rx, shutdown_rx))
        });
        info!("preview on http://{addr}/");
        Ok(Preview {
            stop,
            capture,
            shutdown: Some(shutdown_tx),
            server,
            addr,
        })
    }

    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    /// Stop streaming and return the camera for still capture.
    pub fn stop(mut self) -> Result<Camera> {
        self.stop.store(true, Ordering::SeqCst);
        if let Some(tx) = self.shutdown.take() {
            let _ = tx.send(());
        }
        let camera = self
            .capture
            .join()
            .map_err(|_| Error::Preview("capture thread panicked".into()))?;
        match self.server.join() {
            Ok(Ok(())) => {}
            Ok(Err(e)) => warn!("preview server failed: {e}"),
            Err(_) => warn!("preview server thread panicked"),
        }
        info!("preview stopped");
        Ok(camera)
    }
}

fn stream_frames(camera: &Camera, tx: &watch::Sender<Frame>, stop: &AtomicBool) -> Result<()> {
    let mut stream = camera.stream()?;
    while !stop.load(Ordering::SeqCst) {
        let (buf, meta) = stream.next()?;
        tx.send_replace(Some(Arc::new(frame_bytes(buf, meta).to_vec())));
    }
    Ok(())
}

struct PreviewState {
    frames: watch::Receiver<Frame>,
}

pub fn router(frames: watch::Receiver<Frame>) -> Router {
    let state = Arc::new(PreviewState { frames });
    Router::new()
        .route("/", get(viewer_handler))
        .route("/stream", get(ws_preview_handler))
        .layer(
            TraceLayer::new_for_http()
                .make_span_with(DefaultMakeSpan::default().include_headers(true)),
        )
        .layer(CorsLayer::new().allow_origin(Any))
        .with_state(state)
}

pub async fn serve_preview(
    listener: TcpListener,
    frames: watch::Receiver<Frame>,
    shutdown: oneshot::Receiver<()>,
) -> Result<()> {
    let listener = tokio::net::TcpListener::from_std(listener)?;
    axum::serve(
        listener,
        router(frames).into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(async {
        let _ = shutdown.await;
    })
    .await?;
    Ok(())
}

async fn viewer_handler() -> Html<&'static str> {
    Html(VIEWER)
}

async fn ws_preview_handler(
    ws: WebSocketUpgrade,
    State(state): State<Arc<PreviewState>>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_preview_socket(socket, state, addr))
}

async fn handle_preview_socket(socket: WebSocket, state: Arc<PreviewState>, who: SocketAddr) {
    info!("preview client {who} connected");
    let (mut sender, mut receiver) = socket.split();
    let mut frames = state.frames.clone();

    let mut send_task = tokio::spawn(async move {
        while frames.changed().await.is_ok() {
            let frame = frames.borrow_and_update().clone();
            if let Some(jpeg) = frame {
                if sender.send(Message::Binary(jpeg.to_vec())).await.is_err() {
                    break;
                }
            }
        }
    });

    let mut recv_task = tokio::spawn(async move {
        while let Some(Ok(msg)) = receiver.next().await {
            if let Message::Close(_) = msg {
                break;
            }
        }
    });

    // If any one of the tasks exit, abort the other.
    tokio::select! {
        _ = (&mut send_task) => {
            recv_task.abort();
        },
        _ = (&mut recv_task) => {
            send_task.abort();
        }
    }
    info!("preview client {who} disconnected");
}
