use anyhow::{anyhow, bail, Context, Result};
use log::info;
use std::net::{TcpStream, ToSocketAddrs};
use std::time::{Duration, Instant};
use tungstenite::client::IntoClientRequest;
use tungstenite::http::HeaderValue;
use tungstenite::protocol::WebSocketConfig;
use tungstenite::stream::MaybeTlsStream;
use tungstenite::{client_tls_with_config, Connector, Message, WebSocket};

const DIAL_TIMEOUT: Duration = Duration::from_secs(10);

/// One received message, already reassembled from frames.
pub enum Payload {
    Text(String),
    Binary(Vec<u8>),
}

impl Payload {
    pub fn len(&self) -> usize {
        match self {
            Payload::Text(text) => text.len(),
            Payload::Binary(data) => data.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Bidirectional message stream owned by a single test for its duration.
///
/// Deadlines are absolute: once set, every subsequent blocking operation
/// is bounded by the time remaining, and expiry surfaces as an ordinary
/// error from that operation.
pub trait MessageStream {
    fn set_read_deadline(&mut self, deadline: Instant) -> Result<()>;
    fn set_write_deadline(&mut self, deadline: Instant) -> Result<()>;
    fn set_read_limit(&mut self, limit: usize);
    fn recv(&mut self) -> Result<Payload>;
    fn send_text(&mut self, text: &str) -> Result<()>;
    fn send_binary(&mut self, data: &[u8]) -> Result<()>;
}

pub struct DialOptions {
    pub no_verify: bool,
    pub max_message_size: usize,
}

/// WebSocket-backed message stream.
pub struct WsStream {
    ws: WebSocket<MaybeTlsStream<TcpStream>>,
    read_deadline: Option<Instant>,
    write_deadline: Option<Instant>,
}

/// Connect to an ndt7 endpoint and perform the WebSocket handshake,
/// advertising the ndt7 subprotocol.
pub fn dial(url: &str, opts: &DialOptions) -> Result<WsStream> {
    let mut request = url.into_client_request()?;
    request.headers_mut().insert(
        "Sec-WebSocket-Protocol",
        HeaderValue::from_static(crate::ndt7::WS_PROTOCOL),
    );
    let uri = request.uri();
    let host = uri.host().ok_or_else(|| anyhow!("URL has no host"))?;
    let port = uri.port_u16().unwrap_or(match uri.scheme_str() {
        Some("wss") => 443,
        _ => 80,
    });
    let addr = (host, port)
        .to_socket_addrs()
        .context("Can't resolve IP address")?
        .next()
        .ok_or_else(|| anyhow!("Don't have IP address"))?;
    info!("Connecting to {} ({})", host, addr);
    let tcp = TcpStream::connect_timeout(&addr, DIAL_TIMEOUT)?;
    tcp.set_read_timeout(Some(DIAL_TIMEOUT))?;
    tcp.set_write_timeout(Some(DIAL_TIMEOUT))?;
    let config = WebSocketConfig {
        max_message_size: Some(opts.max_message_size),
        max_frame_size: Some(opts.max_message_size),
        ..WebSocketConfig::default()
    };
    let connector = if opts.no_verify {
        Some(Connector::NativeTls(
            native_tls::TlsConnector::builder()
                .danger_accept_invalid_certs(true)
                .danger_accept_invalid_hostnames(true)
                .build()?,
        ))
    } else {
        None
    };
    let (ws, _response) = client_tls_with_config(request, tcp, Some(config), connector)?;
    Ok(WsStream {
        ws,
        read_deadline: None,
        write_deadline: None,
    })
}

impl WsStream {
    fn socket(&self) -> Result<&TcpStream> {
        match self.ws.get_ref() {
            MaybeTlsStream::Plain(tcp) => Ok(tcp),
            MaybeTlsStream::NativeTls(tls) => Ok(tls.get_ref()),
            _ => Err(anyhow!("unsupported stream type")),
        }
    }

    fn remaining(deadline: Option<Instant>, what: &str) -> Result<Option<Duration>> {
        match deadline {
            None => Ok(None),
            Some(deadline) => {
                let left = deadline
                    .checked_duration_since(Instant::now())
                    .filter(|left| !left.is_zero())
                    .ok_or_else(|| anyhow!("{} deadline elapsed", what))?;
                Ok(Some(left))
            }
        }
    }
}

impl MessageStream for WsStream {
    fn set_read_deadline(&mut self, deadline: Instant) -> Result<()> {
        self.read_deadline = Some(deadline);
        Ok(())
    }

    fn set_write_deadline(&mut self, deadline: Instant) -> Result<()> {
        self.write_deadline = Some(deadline);
        Ok(())
    }

    fn set_read_limit(&mut self, limit: usize) {
        self.ws.set_config(|config| {
            config.max_message_size = Some(limit);
            config.max_frame_size = Some(limit);
        });
    }

    fn recv(&mut self) -> Result<Payload> {
        loop {
            if let Some(left) = Self::remaining(self.read_deadline, "read")? {
                self.socket()?.set_read_timeout(Some(left))?;
            }
            match self.ws.read()? {
                Message::Text(text) => return Ok(Payload::Text(text)),
                Message::Binary(data) => return Ok(Payload::Binary(data)),
                Message::Close(_) => bail!("connection closed by peer"),
                // ping/pong bookkeeping is handled inside tungstenite
                _ => continue,
            }
        }
    }

    fn send_text(&mut self, text: &str) -> Result<()> {
        if let Some(left) = Self::remaining(self.write_deadline, "write")? {
            self.socket()?.set_write_timeout(Some(left))?;
        }
        self.ws.send(Message::Text(text.to_owned()))?;
        Ok(())
    }

    fn send_binary(&mut self, data: &[u8]) -> Result<()> {
        if let Some(left) = Self::remaining(self.write_deadline, "write")? {
            self.socket()?.set_write_timeout(Some(left))?;
        }
        self.ws.send(Message::Binary(data.to_vec()))?;
        Ok(())
    }
}
