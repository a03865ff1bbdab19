#![allow(dead_code)]

use futures::future::BoxFuture;
use futures::stream::SplitStream;
use futures::StreamExt;
use net_admin::config::Paths;
use net_admin::exec::{CommandOutput, CommandRunner, CommandSpec};
use net_admin::handlers::HandlerContext;
use net_admin::netif::{InterfaceAddress, AddressSource};
use net_admin::server::ChannelServer;
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::io;
use std::net::SocketAddr;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};

pub type WsStream = WebSocketStream<MaybeTlsStream<tokio::net::TcpStream>>;

#[derive(Default)]
struct RunnerState {
    codes: VecDeque<i32>,
    calls: Vec<CommandSpec>,
    delay: Duration,
}

/// Command runner that records every command and exits with scripted codes
/// (0 once the script runs out).
#[derive(Clone, Default)]
pub struct StubRunner {
    state: Arc<Mutex<RunnerState>>,
}

impl StubRunner {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_codes(self, codes: impl IntoIterator<Item = i32>) -> Self {
        self.state.lock().codes.extend(codes);
        self
    }

    /// Make every command take `delay` to finish.
    pub fn with_delay(self, delay: Duration) -> Self {
        self.state.lock().delay = delay;
        self
    }

    pub fn calls(&self) -> Vec<CommandSpec> {
        self.state.lock().calls.clone()
    }
}

impl CommandRunner for StubRunner {
    fn run<'a>(&'a self, command: &'a CommandSpec) -> BoxFuture<'a, io::Result<CommandOutput>> {
        let (code, delay) = {
            let mut state = self.state.lock();
            state.calls.push(command.clone());
            (state.codes.pop_front().unwrap_or(0), state.delay)
        };
        Box::pin(async move {
            if !delay.is_zero() {
                tokio::time::sleep(delay).await;
            }
            Ok(CommandOutput::with_code(code))
        })
    }
}

/// Address source answering with a fixed address.
pub struct StubAddresses(pub Option<InterfaceAddress>);

impl AddressSource for StubAddresses {
    fn ipv4_address(&self, _interface: &str) -> io::Result<Option<InterfaceAddress>> {
        Ok(self.0.clone())
    }
}

/// Handler context rooted at `dir`, with wifi config files inside it.
pub fn test_context(dir: &Path, runner: StubRunner, addresses: StubAddresses) -> Arc<HandlerContext> {
    let mut paths = Paths::under(dir);
    paths.wpa_supplicant_conf = dir.join("wpa_supplicant.conf");
    paths.hostapd_conf = dir.join("hostapd.conf");
    Arc::new(HandlerContext::new(paths, Arc::new(runner), Arc::new(addresses)))
}

/// Start a channel server on an ephemeral loopback port.
pub fn start_channel(context: Arc<HandlerContext>) -> (Arc<ChannelServer>, SocketAddr) {
    let server = Arc::new(ChannelServer::new("127.0.0.1:0".parse().unwrap(), context));
    server.start().unwrap();
    let addr = server.local_addr().unwrap();
    (server, addr)
}

/// Stop a server without blocking the test runtime.
pub async fn stop_channel(server: &Arc<ChannelServer>) {
    let server = server.clone();
    tokio::task::spawn_blocking(move || server.stop())
        .await
        .unwrap();
}

pub async fn connect(addr: SocketAddr) -> WsStream {
    let (ws, _) = connect_async(format!("ws://{}", addr)).await.unwrap();
    ws
}

/// Helper: receive next text message, parse as JSON.
pub async fn recv_json(ws: &mut SplitStream<WsStream>) -> serde_json::Value {
    let deadline = Duration::from_secs(2);
    loop {
        let msg = tokio::time::timeout(deadline, ws.next())
            .await
            .expect("timed out waiting for message")
            .expect("stream ended")
            .expect("websocket error");
        match msg {
            Message::Text(text) => return serde_json::from_str(&text).unwrap(),
            Message::Ping(_) | Message::Pong(_) => continue,
            other => panic!("expected text message, got {:?}", other),
        }
    }
}

/// Poll `check` until it holds or two seconds pass.
pub async fn eventually(mut check: impl FnMut() -> bool) -> bool {
    for _ in 0..100 {
        if check() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    check()
}
