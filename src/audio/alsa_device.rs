//! ALSA implementations of the microphone and playback context.
//!
//! Both run their device I/O on dedicated OS threads (not tokio tasks):
//! - capture thread: ALSA read → block accumulation → tap callback
//! - playback thread: scheduled sources → mix one period → ALSA write

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};

use alsa::pcm::{Access, Format, HwParams, PCM};
use alsa::{Direction, ValueOr};
use anyhow::{Context, Result};

use super::{
    AudioBackend, AudioBlock, BlockCallback, EndedCallback, Microphone, PlaybackBuffer,
    PlaybackContext, SourceId,
};
use crate::config::Config;
use crate::error::LiveError;

/// Parameters negotiated with the ALSA hardware.
#[derive(Debug, Clone)]
pub struct AlsaParams {
    /// Actual sample rate after negotiation
    pub sample_rate: u32,
    /// Actual number of channels
    pub channels: u32,
    /// Period size in frames
    pub period_size: usize,
}

/// Open a PCM device for capture (recording).
pub fn open_capture(device: &str, sample_rate: u32, channels: u32) -> Result<(PCM, AlsaParams)> {
    open_pcm(device, Direction::Capture, sample_rate, channels, None, "Capture")
}

/// Open a PCM device for playback.
pub fn open_playback(
    device: &str,
    sample_rate: u32,
    channels: u32,
    period_size: Option<usize>,
) -> Result<(PCM, AlsaParams)> {
    open_pcm(
        device,
        Direction::Playback,
        sample_rate,
        channels,
        period_size,
        "Playback",
    )
}

fn open_pcm(
    device: &str,
    direction: Direction,
    sample_rate: u32,
    channels: u32,
    period_size: Option<usize>,
    dir_name: &str,
) -> Result<(PCM, AlsaParams)> {
    let pcm = PCM::new(device, direction, false)
        .with_context(|| format!("Failed to open PCM device '{}' for {}", device, dir_name))?;

    {
        let hwp = HwParams::any(&pcm).with_context(|| "Failed to initialize HwParams")?;
        hwp.set_access(Access::RWInterleaved)?;
        hwp.set_format(Format::S16LE)?;
        hwp.set_channels(channels)?;
        hwp.set_rate_near(sample_rate, ValueOr::Nearest)?;
        if let Some(ps) = period_size {
            hwp.set_period_size_near(ps as alsa::pcm::Frames, ValueOr::Nearest)?;
        }
        pcm.hw_params(&hwp)?;
    }

    let (actual_rate, actual_channels, period_size) = {
        let hwp = pcm.hw_params_current()?;
        let rate = hwp.get_rate()?;
        let ch = hwp.get_channels()?;
        let ps = hwp.get_period_size()? as usize;
        (rate, ch, ps)
    };

    if actual_rate != sample_rate {
        log::warn!(
            "ALSA {}: requested {}Hz but device negotiated {}Hz",
            dir_name,
            sample_rate,
            actual_rate
        );
    }

    let params = AlsaParams {
        sample_rate: actual_rate,
        channels: actual_channels,
        period_size,
    };

    log::info!(
        "ALSA {}: device={}, rate={}, channels={}, period_size={}",
        dir_name,
        device,
        actual_rate,
        actual_channels,
        period_size,
    );

    Ok((pcm, params))
}

// ======================== Backend ========================

pub struct AlsaBackend {
    capture_device: String,
    playback_device: String,
    playback_period_size: usize,
}

impl AlsaBackend {
    pub fn new(config: &Config) -> Self {
        Self {
            capture_device: config.capture_device.to_string(),
            playback_device: config.playback_device.to_string(),
            playback_period_size: config.playback_period_size,
        }
    }
}

impl AudioBackend for AlsaBackend {
    fn open_microphone(&self, sample_rate: u32) -> Result<Box<dyn Microphone>, LiveError> {
        let (pcm, params) = open_capture(&self.capture_device, sample_rate, 1)
            .map_err(|e| LiveError::CaptureUnavailable(format!("{:#}", e)))?;
        Ok(Box::new(AlsaMicrophone {
            pcm: Some(pcm),
            params,
            running: Arc::new(AtomicBool::new(false)),
            handle: None,
        }))
    }

    fn open_playback(&self, sample_rate: u32) -> Result<Box<dyn PlaybackContext>, LiveError> {
        let period = (self.playback_period_size > 0).then_some(self.playback_period_size);
        let (pcm, params) = open_playback(&self.playback_device, sample_rate, 1, period)
            .map_err(|e| LiveError::CaptureUnavailable(format!("{:#}", e)))?;
        AlsaPlayback::start(pcm, params)
            .map(|p| Box::new(p) as Box<dyn PlaybackContext>)
            .map_err(|e| LiveError::CaptureUnavailable(format!("{:#}", e)))
    }
}

// ======================== Capture ========================

pub struct AlsaMicrophone {
    pcm: Option<PCM>,
    params: AlsaParams,
    running: Arc<AtomicBool>,
    handle: Option<JoinHandle<()>>,
}

impl Microphone for AlsaMicrophone {
    fn tap(&mut self, block_size: usize, on_block: BlockCallback) -> Result<(), LiveError> {
        if block_size == 0 {
            return Err(LiveError::CaptureUnavailable("block size must be positive".into()));
        }
        let Some(pcm) = self.pcm.take() else {
            return Err(LiveError::CaptureUnavailable("capture device already released".into()));
        };
        self.running.store(true, Ordering::SeqCst);
        let running = self.running.clone();
        let params = self.params.clone();

        let handle = thread::Builder::new()
            .name("audio-capture".into())
            .spawn(move || {
                if let Err(e) = capture_thread(pcm, params, block_size, on_block, &running) {
                    log::error!("Capture thread error: {}", e);
                }
            })
            .map_err(|e| LiveError::CaptureUnavailable(e.to_string()))?;
        self.handle = Some(handle);
        Ok(())
    }

    fn release(&mut self) {
        self.running.store(false, Ordering::SeqCst);
        if let Some(h) = self.handle.take() {
            let _ = h.join();
        }
        self.pcm.take();
    }
}

impl Drop for AlsaMicrophone {
    fn drop(&mut self) {
        self.release();
    }
}

fn capture_thread(
    pcm: PCM,
    params: AlsaParams,
    block_size: usize,
    mut on_block: BlockCallback,
    running: &AtomicBool,
) -> Result<()> {
    let channels = params.channels as usize;
    let io = pcm.io_i16()?;
    let mut read_buf = vec![0i16; params.period_size * channels];
    // 按通道累积，凑够 block_size 帧回调一次
    let mut pending: Vec<Vec<f32>> = (0..channels).map(|_| Vec::with_capacity(block_size * 2)).collect();

    log::info!("Capture started: rate={}, ch={}, block={}", params.sample_rate, channels, block_size);

    while running.load(Ordering::Relaxed) {
        match io.readi(&mut read_buf) {
            Ok(frames) => {
                // Split interleaved → per-channel
                for i in 0..frames {
                    for (ch, buf) in pending.iter_mut().enumerate() {
                        buf.push(read_buf[i * channels + ch] as f32 / 32768.0);
                    }
                }
                while pending[0].len() >= block_size {
                    let block = AudioBlock {
                        sample_rate: params.sample_rate,
                        channels: pending.iter_mut().map(|buf| buf.drain(..block_size).collect()).collect(),
                    };
                    if !running.load(Ordering::Relaxed) {
                        break;
                    }
                    on_block(&block);
                }
            }
            Err(e) => {
                log::warn!("ALSA capture error: {}, recovering...", e);
                if let Err(e2) = pcm.prepare() {
                    log::error!("Failed to recover PCM capture: {}", e2);
                    break;
                }
            }
        }
    }

    log::info!("Capture stopped");
    Ok(())
}

// ======================== Playback ========================

struct ScheduledSource {
    id: SourceId,
    start_frame: u64,
    samples: Vec<f32>,
    on_ended: EndedCallback,
}

#[derive(Default)]
struct Timeline {
    /// Frames handed to ALSA so far; the context clock.
    frames_written: u64,
    sources: Vec<ScheduledSource>,
}

pub struct AlsaPlayback {
    sample_rate: u32,
    timeline: Arc<Mutex<Timeline>>,
    running: Arc<AtomicBool>,
    handle: Option<JoinHandle<()>>,
}

impl AlsaPlayback {
    fn start(pcm: PCM, params: AlsaParams) -> Result<Self> {
        let timeline = Arc::new(Mutex::new(Timeline::default()));
        let running = Arc::new(AtomicBool::new(true));
        let sample_rate = params.sample_rate;

        let handle = {
            let timeline = timeline.clone();
            let running = running.clone();
            thread::Builder::new()
                .name("audio-play".into())
                .spawn(move || {
                    if let Err(e) = play_thread(pcm, params, &timeline, &running) {
                        log::error!("Playback thread error: {}", e);
                    }
                })?
        };

        Ok(Self {
            sample_rate,
            timeline,
            running,
            handle: Some(handle),
        })
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Timeline> {
        // 播放线程 panic 后仍可继续访问
        self.timeline.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl PlaybackContext for AlsaPlayback {
    fn current_time(&self) -> f64 {
        self.lock().frames_written as f64 / self.sample_rate as f64
    }

    fn start_source(
        &mut self,
        id: SourceId,
        buffer: PlaybackBuffer,
        when: f64,
        on_ended: EndedCallback,
    ) -> Result<(), LiveError> {
        if !self.running.load(Ordering::SeqCst) {
            return Err(LiveError::SessionError("playback context closed".into()));
        }
        let start_frame = (when.max(0.0) * self.sample_rate as f64).round() as u64;
        let samples = buffer.channels.into_iter().next().unwrap_or_default();
        self.lock().sources.push(ScheduledSource {
            id,
            start_frame,
            samples,
            on_ended,
        });
        Ok(())
    }

    fn stop_source(&mut self, id: SourceId) {
        self.lock().sources.retain(|s| s.id != id);
    }

    fn close(&mut self) {
        self.running.store(false, Ordering::SeqCst);
        if let Some(h) = self.handle.take() {
            let _ = h.join();
        }
        self.lock().sources.clear();
    }
}

impl Drop for AlsaPlayback {
    fn drop(&mut self) {
        self.close();
    }
}

/// Mix every source overlapping `[start, start + out.len())` into `out`.
///
/// Returns the sources that finished within the window.
fn mix_period(timeline: &mut Timeline, out: &mut [f32]) -> Vec<ScheduledSource> {
    let start = timeline.frames_written;
    let end = start + out.len() as u64;

    for source in &timeline.sources {
        let source_end = source.start_frame + source.samples.len() as u64;
        if source.start_frame >= end || source_end <= start {
            continue;
        }
        let from = source.start_frame.max(start);
        let to = source_end.min(end);
        for frame in from..to {
            out[(frame - start) as usize] += source.samples[(frame - source.start_frame) as usize];
        }
    }

    let mut finished = Vec::new();
    let mut i = 0;
    while i < timeline.sources.len() {
        let s = &timeline.sources[i];
        if s.start_frame + s.samples.len() as u64 <= end {
            finished.push(timeline.sources.swap_remove(i));
        } else {
            i += 1;
        }
    }
    timeline.frames_written = end;
    finished
}

fn play_thread(
    pcm: PCM,
    params: AlsaParams,
    timeline: &Mutex<Timeline>,
    running: &AtomicBool,
) -> Result<()> {
    let channels = params.channels as usize;
    let period = params.period_size.max(1);
    let io = pcm.io_i16()?;
    let mut mix = vec![0f32; period];
    let mut out = vec![0i16; period * channels];

    log::info!("Playback started: rate={}, ch={}, period={}", params.sample_rate, channels, period);

    while running.load(Ordering::Relaxed) {
        mix.iter_mut().for_each(|s| *s = 0.0);
        let finished = {
            let mut timeline = timeline.lock().unwrap_or_else(|e| e.into_inner());
            mix_period(&mut timeline, &mut mix)
        };
        for source in finished {
            (source.on_ended)();
        }

        // mono → device channels
        for (i, sample) in mix.iter().enumerate() {
            let value = (sample.clamp(-1.0, 1.0) * 32767.0) as i16;
            for ch in 0..channels {
                out[i * channels + ch] = value;
            }
        }

        let mut frames_written = 0;
        let mut retry_count = 0u32;
        while frames_written < period {
            match io.writei(&out[frames_written * channels..]) {
                Ok(n) => {
                    frames_written += n;
                    retry_count = 0;
                }
                Err(e) => {
                    log::warn!("ALSA XRUN or error: {}, recovering...", e);
                    retry_count += 1;
                    if let Err(e2) = pcm.prepare() {
                        log::error!("Failed to recover PCM playback: {}", e2);
                        break;
                    }
                    if retry_count >= 3 {
                        log::error!("Dropping {} unwritten frames", period - frames_written);
                        break;
                    }
                }
            }
        }
    }

    log::info!("Playback stopped");
    Ok(())
}
