use crate::config::Config;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::net::UdpSocket;
use tokio::sync::mpsc;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum GuiCommand {
    Start,
    Stop,
    Status,
}

#[derive(Debug)]
pub enum GuiEvent {
    Command(GuiCommand),
}

pub struct GuiBridge {
    socket: Arc<UdpSocket>,
    target_addr: String,
    tx: mpsc::Sender<GuiEvent>,
}

pub fn parse_command(msg: &str) -> Option<GuiCommand> {
    serde_json::from_str(msg.trim()).ok()
}

// GUI进程和Core进程通过本地UDP通信，端口在配置中指定
impl GuiBridge {
    pub async fn new(config: &Config, tx: mpsc::Sender<GuiEvent>) -> anyhow::Result<Self> {
        // 只监听本机
        let socket = UdpSocket::bind(format!("127.0.0.1:{}", config.gui_local_port)).await?;
        let target_addr = format!("127.0.0.1:{}", config.gui_remote_port);

        Ok(Self {
            socket: Arc::new(socket),
            target_addr,
            tx,
        })
    }

    pub async fn run(&self) -> anyhow::Result<()> {
        let mut buf = [0u8; 4096]; // 4KB缓冲区
        loop {
            // 通过UDP socket接收消息
            let (len, _) = self.socket.recv_from(&mut buf).await?;
            if len == 0 {
                continue;
            }
            let Ok(msg) = std::str::from_utf8(&buf[..len]) else {
                continue;
            };
            match parse_command(msg) {
                Some(cmd) => {
                    if let Err(e) = self.tx.send(GuiEvent::Command(cmd)).await {
                        log::error!("Failed to send GUI event: {}", e);
                        break;
                    }
                }
                None => log::warn!("Unknown GUI message: {}", msg),
            }
        }
        Ok(())
    }

    /// Serialize `payload` as JSON and send it to the GUI process.
    pub async fn send_json<T: Serialize>(&self, payload: &T) -> anyhow::Result<()> {
        let msg = serde_json::to_string(payload)?;
        self.send_message(&msg).await
    }

    pub async fn send_message(&self, msg: &str) -> anyhow::Result<()> {
        self.socket
            .send_to(msg.as_bytes(), &self.target_addr)
            .await?;
        Ok(())
    }
}
