//! Mock feed server for integration tests.
//!
//! Speaks just enough of the socket.io-style framing to drive a real
//! client: sends the transport-open frame, acknowledges the namespace,
//! answers scripted requests and lets tests push arbitrary frames.

use std::collections::VecDeque;
use std::net::SocketAddr;
use std::sync::Arc;

use futures_util::{SinkExt, StreamExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{broadcast, mpsc, Mutex};
use tokio_tungstenite::{accept_async, tungstenite::Message};

/// Substring-triggered canned response.
pub type ResponseRule = (String, String);

pub struct MockFeedServer {
    addr: SocketAddr,
    shutdown_tx: mpsc::Sender<()>,
    messages: Arc<Mutex<VecDeque<String>>>,
    connections: Arc<Mutex<u32>>,
    push_tx: broadcast::Sender<String>,
}

impl MockFeedServer {
    /// Start a server on an available port. A received text frame
    /// containing a rule's substring triggers that rule's response.
    pub async fn start(rules: Vec<ResponseRule>) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let messages: Arc<Mutex<VecDeque<String>>> = Arc::new(Mutex::new(VecDeque::new()));
        let connections: Arc<Mutex<u32>> = Arc::new(Mutex::new(0));
        let (shutdown_tx, mut shutdown_rx) = mpsc::channel::<()>(1);
        let (push_tx, _) = broadcast::channel::<String>(64);
        let rules = Arc::new(rules);

        let messages_clone = messages.clone();
        let connections_clone = connections.clone();
        let push_clone = push_tx.clone();

        tokio::spawn(async move {
            loop {
                tokio::select! {
                    Ok((stream, _)) = listener.accept() => {
                        let messages = messages_clone.clone();
                        let connections = connections_clone.clone();
                        let push_rx = push_clone.subscribe();
                        let rules = rules.clone();
                        tokio::spawn(handle_connection(stream, messages, connections, push_rx, rules));
                    }
                    _ = shutdown_rx.recv() => {
                        break;
                    }
                }
            }
        });

        Self {
            addr,
            shutdown_tx,
            messages,
            connections,
            push_tx,
        }
    }

    pub fn url(&self) -> String {
        format!("ws://{}", self.addr)
    }

    /// Push a frame to every connected client.
    pub fn push(&self, frame: impl Into<String>) {
        let _ = self.push_tx.send(frame.into());
    }

    pub async fn connection_count(&self) -> u32 {
        *self.connections.lock().await
    }

    pub async fn received_messages(&self) -> Vec<String> {
        self.messages.lock().await.iter().cloned().collect()
    }

    pub async fn shutdown(self) {
        let _ = self.shutdown_tx.send(()).await;
    }
}

async fn handle_connection(
    stream: TcpStream,
    messages: Arc<Mutex<VecDeque<String>>>,
    connections: Arc<Mutex<u32>>,
    mut push_rx: broadcast::Receiver<String>,
    rules: Arc<Vec<ResponseRule>>,
) {
    {
        let mut count = connections.lock().await;
        *count += 1;
    }

    let ws_stream = match accept_async(stream).await {
        Ok(ws) => ws,
        Err(e) => {
            eprintln!("WebSocket handshake failed: {e}");
            return;
        }
    };

    let (mut write, mut read) = ws_stream.split();

    // Transport open; the client answers with "40".
    let _ = write
        .send(Message::Text(
            r#"0{"sid":"mock","pingInterval":25000,"pingTimeout":20000}"#.to_string(),
        ))
        .await;

    loop {
        tokio::select! {
            msg = read.next() => {
                match msg {
                    Some(Ok(Message::Text(text))) => {
                        {
                            let mut msgs = messages.lock().await;
                            msgs.push_back(text.clone());
                        }
                        if text == "40" {
                            let _ = write
                                .send(Message::Text(r#"40{"sid":"mock"}"#.to_string()))
                                .await;
                            continue;
                        }
                        for (needle, response) in rules.iter() {
                            if text.contains(needle.as_str()) {
                                let _ = write.send(Message::Text(response.clone())).await;
                            }
                        }
                    }
                    Some(Ok(Message::Ping(data))) => {
                        let _ = write.send(Message::Pong(data)).await;
                    }
                    Some(Ok(Message::Close(_))) | Some(Err(_)) | None => break,
                    _ => {}
                }
            }
            frame = push_rx.recv() => {
                match frame {
                    Ok(frame) => {
                        let _ = write.send(Message::Text(frame)).await;
                    }
                    Err(_) => break,
                }
            }
        }
    }
}
