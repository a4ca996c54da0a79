//! Line-delimited JSON command server.
//!
//! One thread per client. Each request line gets exactly one response line; a malformed
//! request closes that client's connection and nothing else.

use std::io::{BufRead, BufReader, Write};
use std::net::{Shutdown, SocketAddr, TcpListener, TcpStream};
use std::sync::Arc;

use anyhow::{Context, Result};

use crate::commands::Commands;

pub struct CommandServer {
    listener: TcpListener,
    commands: Arc<Commands>,
}

impl CommandServer {
    pub fn bind(addr: SocketAddr, commands: Arc<Commands>) -> Result<Self> {
        let listener = TcpListener::bind(addr).with_context(|| format!("bind {addr}"))?;
        Ok(Self { listener, commands })
    }

    pub fn local_addr(&self) -> Result<SocketAddr> {
        self.listener.local_addr().context("query listener address")
    }

    /// Accept clients until the listener fails.
    pub fn serve(self) -> Result<()> {
        tracing::info!(bind = %self.local_addr()?, "command server listening");
        for stream in self.listener.incoming() {
            let stream = match stream {
                Ok(s) => s,
                Err(e) => {
                    tracing::warn!("accept error: {e:#}");
                    continue;
                }
            };
            let peer = stream.peer_addr().ok();
            let commands = self.commands.clone();
            let spawned = std::thread::Builder::new()
                .name("tunebox-session".into())
                .spawn(move || {
                    tracing::info!(peer = ?peer, "client connected");
                    if let Err(e) = serve_session(stream, &commands) {
                        tracing::warn!(peer = ?peer, "client session error: {e:#}");
                    }
                    tracing::info!(peer = ?peer, "client disconnected");
                });
            if let Err(e) = spawned {
                tracing::warn!("spawn session thread: {e}");
            }
        }
        Ok(())
    }
}

fn serve_session(stream: TcpStream, commands: &Commands) -> Result<()> {
    let reader = BufReader::new(stream.try_clone().context("clone client socket")?);
    let mut writer = stream;

    for line in reader.lines() {
        let line = line.context("read request")?;
        if line.trim().is_empty() {
            continue;
        }
        match commands.handle_line(&line) {
            Ok(response) => {
                let mut out = serde_json::to_vec(&response).context("encode response")?;
                out.push(b'\n');
                writer.write_all(&out).context("write response")?;
                writer.flush().context("flush response")?;
            }
            Err(fatal) => {
                tracing::warn!("{fatal}; closing session");
                let _ = writer.shutdown(Shutdown::Both);
                return Ok(());
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::commands::tests::test_commands;
    use serde_json::Value;
    use std::io::Read;

    fn start() -> SocketAddr {
        let server = CommandServer::bind(
            "127.0.0.1:0".parse().unwrap(),
            Arc::new(test_commands(&[])),
        )
        .unwrap();
        let addr = server.local_addr().unwrap();
        std::thread::spawn(move || server.serve());
        addr
    }

    fn request(
        writer: &mut TcpStream,
        reader: &mut BufReader<TcpStream>,
        line: &str,
    ) -> Value {
        writer.write_all(line.as_bytes()).unwrap();
        writer.write_all(b"\n").unwrap();
        let mut response = String::new();
        reader.read_line(&mut response).unwrap();
        serde_json::from_str(&response).unwrap()
    }

    #[test]
    fn answers_one_line_per_request() {
        let addr = start();
        let mut writer = TcpStream::connect(addr).unwrap();
        let mut reader = BufReader::new(writer.try_clone().unwrap());

        let added = request(
            &mut writer,
            &mut reader,
            r#"{"type":"add_songs","params":["a.mp3"]}"#,
        );
        assert_eq!(added["result"], true);
        let shown = request(&mut writer, &mut reader, r#"{"type":"show_playlist"}"#);
        assert_eq!(shown["songs"], serde_json::json!(["a.mp3"]));
        let rejected = request(&mut writer, &mut reader, r#"{"type":"nope"}"#);
        assert_eq!(rejected["result"], false);
    }

    #[test]
    fn malformed_request_closes_only_that_session() {
        let addr = start();
        let mut bad = TcpStream::connect(addr).unwrap();
        let mut good = TcpStream::connect(addr).unwrap();
        let mut good_reader = BufReader::new(good.try_clone().unwrap());

        bad.write_all(b"{not json\n").unwrap();
        let mut rest = Vec::new();
        assert_eq!(bad.read_to_end(&mut rest).unwrap_or(0), 0);

        let status = request(&mut good, &mut good_reader, r#"{"type":"player_status"}"#);
        assert_eq!(status["result"], true);
    }
}
