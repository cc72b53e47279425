use crate::audio::EncodedAudioPacket;
use crate::config::Config;
use crate::error::LiveError;
use crate::protocol::{self, LiveMessage, ServerMessage};
use crate::session::{LiveSession, SessionCallbacks, SessionConnector};
use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_tungstenite::{connect_async, tungstenite::protocol::Message};
use url::Url;

/// WebSocket handshake plus TLS must finish within this.
const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug)]
pub enum NetCommand {
    SendText(String),
    Close,
}

/// Opens Gemini Live sessions over a WebSocket.
pub struct GeminiConnector {
    config: Config,
}

impl GeminiConnector {
    pub fn new(config: Config) -> Self {
        Self { config }
    }

    fn session_url(&self) -> anyhow::Result<Url> {
        if self.config.api_key.is_empty() {
            anyhow::bail!("no API key configured");
        }
        let url = Url::parse_with_params(self.config.ws_url, &[("key", self.config.api_key.as_str())])?;
        Ok(url)
    }

    async fn open(&self, callbacks: SessionCallbacks) -> anyhow::Result<GeminiSession> {
        let url = self.session_url()?;
        log::info!("Connecting to {}...", self.config.ws_url);
        let (ws_stream, _) = with_timeout(CONNECT_TIMEOUT, async {
            Ok::<_, anyhow::Error>(connect_async(url.as_str()).await?)
        })
        .await?;
        log::info!("WebSocket connected");

        let (mut write, read) = ws_stream.split();

        // 建立连接后第一帧必须是 setup
        let setup_json = serde_json::to_string(&protocol::setup_message(&self.config))?;
        log::debug!("Sending setup: {}", setup_json);
        write.send(Message::Text(setup_json.into())).await?;

        let (cmd_tx, mut cmd_rx) = mpsc::channel::<NetCommand>(100);

        // 写循环：串行发送所有命令
        let write_callbacks = callbacks.clone();
        tokio::spawn(async move {
            while let Some(cmd) = cmd_rx.recv().await {
                let result = match cmd {
                    NetCommand::SendText(text) => write.send(Message::Text(text.into())).await,
                    NetCommand::Close => {
                        let result = write.send(Message::Close(None)).await;
                        if let Err(e) = &result {
                            log::warn!("Failed to send close frame: {}", e);
                        }
                        break;
                    }
                };
                if let Err(e) = result {
                    write_callbacks.on_error(format!("WebSocket write failed: {}", e));
                    break;
                }
            }
            log::debug!("Writer loop finished");
        });

        // 读循环：把服务端消息转换为回调
        tokio::spawn(read_loop(read, callbacks));

        Ok(GeminiSession { cmd_tx })
    }
}

#[async_trait]
impl SessionConnector for GeminiConnector {
    async fn connect(&self, callbacks: SessionCallbacks) -> Result<Arc<dyn LiveSession>, LiveError> {
        match self.open(callbacks).await {
            Ok(session) => Ok(Arc::new(session)),
            Err(e) => Err(LiveError::SessionOpenFailure(e.to_string())),
        }
    }
}

async fn with_timeout<T>(
    limit: Duration,
    fut: impl Future<Output = anyhow::Result<T>>,
) -> anyhow::Result<T> {
    match tokio::time::timeout(limit, fut).await {
        Ok(result) => result,
        Err(_) => anyhow::bail!("connect timed out after {:?}", limit),
    }
}

async fn read_loop<S>(mut read: S, callbacks: SessionCallbacks)
where
    S: futures_util::Stream<Item = Result<Message, tokio_tungstenite::tungstenite::Error>> + Unpin,
{
    // 收到 Close 帧后继续读，让 tungstenite 把关闭应答发出去
    let mut close_reason: Option<String> = None;
    loop {
        match read.next().await {
            Some(Ok(Message::Text(text))) => dispatch(text.as_str(), &callbacks),
            // Gemini 的 JSON 也可能以二进制帧下发
            Some(Ok(Message::Binary(data))) => match std::str::from_utf8(&data) {
                Ok(text) => dispatch(text, &callbacks),
                Err(_) => log::warn!("Dropping non-UTF-8 binary frame ({} bytes)", data.len()),
            },
            Some(Ok(Message::Close(frame))) => {
                let reason = frame
                    .map(|f| format!("{} {}", u16::from(f.code), f.reason.as_str()))
                    .unwrap_or_else(|| "closed".to_string());
                log::info!("Server closed connection: {}", reason);
                if close_reason.is_none() {
                    close_reason = Some(reason);
                }
            }
            Some(Ok(_)) => {}
            Some(Err(e)) => {
                match close_reason {
                    // 关闭握手之后的错误不再上报
                    Some(reason) => callbacks.on_close(reason),
                    None => {
                        callbacks.on_error(format!("WebSocket error: {}", e));
                        callbacks.on_close("connection lost");
                    }
                }
                return;
            }
            None => {
                callbacks.on_close(close_reason.unwrap_or_else(|| "stream ended".to_string()));
                return;
            }
        }
    }
}

fn dispatch(text: &str, callbacks: &SessionCallbacks) {
    let msg: ServerMessage = match serde_json::from_str(text) {
        Ok(msg) => msg,
        Err(e) => {
            log::warn!("Unparseable server message ({}): {}", e, truncate(text, 200));
            return;
        }
    };

    if msg.setup_complete.is_some() {
        log::info!("Setup complete");
        callbacks.on_open();
    }
    if let Some(content) = msg.server_content {
        callbacks.on_message(LiveMessage::from(content));
    }
    if let Some(go_away) = msg.go_away {
        log::warn!("Server will disconnect soon (time left: {:?})", go_away.time_left);
    }
}

fn truncate(s: &str, max_bytes: usize) -> &str {
    if s.len() <= max_bytes {
        return s;
    }
    let mut end = max_bytes;
    while end > 0 && !s.is_char_boundary(end) {
        end -= 1;
    }
    &s[..end]
}

/// Handle of one open WebSocket session.
pub struct GeminiSession {
    cmd_tx: mpsc::Sender<NetCommand>,
}

#[async_trait]
impl LiveSession for GeminiSession {
    async fn send_realtime_input(&self, packet: EncodedAudioPacket) -> Result<(), LiveError> {
        let text = serde_json::to_string(&protocol::realtime_input_message(packet))
            .map_err(|e| LiveError::TransmitFailure(e.to_string()))?;
        self.cmd_tx
            .send(NetCommand::SendText(text))
            .await
            .map_err(|_| LiveError::TransmitFailure("connection closed".into()))
    }

    async fn close(&self) {
        if self.cmd_tx.send(NetCommand::Close).await.is_err() {
            log::debug!("Session already closed");
        }
    }
}
