/// 运行时覆盖 API key 的环境变量
pub const API_KEY_ENV: &str = "GEMINI_API_KEY";

#[derive(Debug, Clone)]
pub struct Config {
    pub app_name: &'static str,
    pub app_version: &'static str,

    // 网络配置
    pub ws_url: &'static str,
    pub model: &'static str,
    pub api_key: String,

    // 会话参数
    pub voice_name: &'static str,
    pub system_instruction: &'static str,

    // 音频配置
    pub capture_sample_rate: u32,
    pub playback_sample_rate: u32,
    pub block_size: usize,
    pub capture_device: &'static str,
    pub playback_device: &'static str,
    pub playback_period_size: usize,

    // GUI进程配置
    pub gui_local_port: u16,
    pub gui_remote_port: u16,
}

impl Config {
    /// 从编译时设置的环境变量创建配置
    /// 所有参数都在编译时从 config.toml 中读取
    pub fn new() -> Result<Self, &'static str> {
        Ok(Self {
            app_name: env!("APP_NAME"),
            app_version: env!("APP_VERSION"),

            ws_url: env!("WS_URL"),
            model: env!("LIVE_MODEL"),
            api_key: env!("API_KEY").to_string(),

            voice_name: env!("VOICE_NAME"),
            system_instruction: env!("SYSTEM_INSTRUCTION"),

            capture_sample_rate: env!("CAPTURE_SAMPLE_RATE").parse()
                .map_err(|_| "Failed to parse CAPTURE_SAMPLE_RATE")?,
            playback_sample_rate: env!("PLAYBACK_SAMPLE_RATE").parse()
                .map_err(|_| "Failed to parse PLAYBACK_SAMPLE_RATE")?,
            block_size: parse_block_size(env!("BLOCK_SIZE"))?,
            capture_device: env!("CAPTURE_DEVICE"),
            playback_device: env!("PLAYBACK_DEVICE"),
            playback_period_size: env!("PLAYBACK_PERIOD_SIZE").parse()
                .map_err(|_| "Failed to parse PLAYBACK_PERIOD_SIZE")?,

            gui_local_port: env!("GUI_LOCAL_PORT").parse()
                .map_err(|_| "Failed to parse GUI_LOCAL_PORT")?,
            gui_remote_port: env!("GUI_REMOTE_PORT").parse()
                .map_err(|_| "Failed to parse GUI_REMOTE_PORT")?,
        })
    }

    /// Applies runtime overrides. Only the API key may change after build time.
    pub fn with_env_overrides(mut self) -> Self {
        if let Ok(key) = std::env::var(API_KEY_ENV) {
            if !key.trim().is_empty() {
                self.api_key = key.trim().to_string();
            }
        }
        self
    }
}

/// 采集块大小必须为正数
fn parse_block_size(value: &str) -> Result<usize, &'static str> {
    match value.trim().parse::<usize>() {
        Ok(0) => Err("BLOCK_SIZE must be greater than zero"),
        Ok(n) => Ok(n),
        Err(_) => Err("Failed to parse BLOCK_SIZE"),
    }
}

impl Default for Config {
    fn default() -> Self {
        Self::new().expect("Failed to create default Config from build-time environment variables")
    }
}
