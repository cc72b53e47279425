mod audio;
mod config;
mod controller;
mod error;
mod gui_bridge;
mod net_link;
mod protocol;
mod session;
mod state_machine;
mod transcript;

#[cfg(test)]
mod testing;

use audio::AudioBackend;
use config::Config;
use controller::{LiveController, UiUpdate};
use gui_bridge::{GuiBridge, GuiCommand, GuiEvent};
use net_link::GeminiConnector;
use std::sync::Arc;
use tokio::signal;
use tokio::sync::mpsc;

#[cfg(feature = "alsa")]
fn audio_backend(config: &Config) -> Arc<dyn AudioBackend> {
    Arc::new(audio::alsa_device::AlsaBackend::new(config))
}

#[cfg(not(feature = "alsa"))]
fn audio_backend(_config: &Config) -> Arc<dyn AudioBackend> {
    log::warn!("Built without the `alsa` feature, audio capture is unavailable");
    Arc::new(audio::NoAudioBackend)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // 初始化日志
    env_logger::init();

    // 加载配置，API key 可由环境变量覆盖
    let config = Config::new().unwrap_or_default().with_env_overrides();
    if config.api_key.is_empty() {
        log::warn!("No API key set, export {} before starting a session", config::API_KEY_ENV);
    }

    // GUI进程通道
    let (tx_gui_event, mut rx_gui_event) = mpsc::channel::<GuiEvent>(100);
    // 控制器状态更新通道
    let (tx_ui, mut rx_ui) = mpsc::unbounded_channel::<UiUpdate>();

    // 启动GUI桥，与GUI进程通信
    let gui_bridge = Arc::new(GuiBridge::new(&config, tx_gui_event).await?);
    let gui_bridge_clone = gui_bridge.clone();
    tokio::spawn(async move {
        if let Err(e) = gui_bridge_clone.run().await {
            log::error!("GuiBridge error: {}", e);
        }
    });

    // 状态更新转发给GUI
    let gui_bridge_clone = gui_bridge.clone();
    tokio::spawn(async move {
        while let Some(update) = rx_ui.recv().await {
            if let Err(e) = gui_bridge_clone.send_json(&update).await {
                log::warn!("Failed to send to GUI: {}", e);
            }
        }
    });

    let connector = Arc::new(GeminiConnector::new(config.clone()));
    let backend = audio_backend(&config);
    let (mut controller, mut rx_live_event) =
        LiveController::new(config.clone(), connector, backend, tx_ui);

    log::info!(
        "{} {} started. State: {:?}",
        config.app_name,
        config.app_version,
        controller.state()
    );

    // 主事件循环：会话回调、GUI命令、Ctrl+C
    loop {
        tokio::select! {
            _ = signal::ctrl_c() => {
                log::info!("Received Ctrl+C, shutting down...");
                controller.stop();
                break;
            }

            Some(event) = rx_live_event.recv() => {
                controller.handle_event(event);
            }

            Some(event) = rx_gui_event.recv() => {
                match event {
                    GuiEvent::Command(GuiCommand::Start) => {
                        if let Err(e) = controller.start() {
                            log::error!("Failed to start session: {}", e);
                        }
                    }
                    GuiEvent::Command(GuiCommand::Stop) => controller.stop(),
                    GuiEvent::Command(GuiCommand::Status) => {
                        if let Err(e) = gui_bridge.send_json(&controller.status()).await {
                            log::warn!("Failed to send status to GUI: {}", e);
                        }
                    }
                }
            }
        }
    }

    // 给关闭帧一点时间发出去
    tokio::time::sleep(std::time::Duration::from_millis(200)).await;
    Ok(())
}
