//! Gapless scheduling of server audio on a [`PlaybackContext`].

use std::collections::HashSet;
use std::sync::Arc;

use super::pcm_codec::{self, PlaybackBuffer};
use super::{PlaybackContext, SourceId};
use crate::error::LiveError;

/// Channel count of model audio.
pub const OUTPUT_CHANNELS: usize = 1;

/// Routes a natural end-of-playback back to the owner of the scheduler.
pub type EndedNotifier = Arc<dyn Fn(SourceId) + Send + Sync>;

pub struct PlaybackScheduler {
    sample_rate: u32,
    context: Option<Box<dyn PlaybackContext>>,
    active: HashSet<SourceId>,
    next_start_time: f64,
    next_id: SourceId,
    notify_ended: EndedNotifier,
}

impl PlaybackScheduler {
    pub fn new(sample_rate: u32, notify_ended: EndedNotifier) -> Self {
        Self {
            sample_rate,
            context: None,
            active: HashSet::new(),
            next_start_time: 0.0,
            next_id: 0,
            notify_ended,
        }
    }

    /// Attach the output context of a new session. A previous context is closed first.
    pub fn attach(&mut self, context: Box<dyn PlaybackContext>) {
        self.close();
        self.context = Some(context);
    }

    #[cfg(test)]
    pub fn is_attached(&self) -> bool {
        self.context.is_some()
    }

    #[cfg(test)]
    pub fn next_start_time(&self) -> f64 {
        self.next_start_time
    }

    #[cfg(test)]
    pub fn active_count(&self) -> usize {
        self.active.len()
    }

    #[cfg(test)]
    pub fn is_active(&self, id: SourceId) -> bool {
        self.active.contains(&id)
    }

    /// Decode one base64 inline chunk and queue it behind everything already scheduled.
    ///
    /// Returns the start time, or `None` when no context is attached.
    pub fn enqueue_chunk(&mut self, base64_data: &str) -> Result<Option<f64>, LiveError> {
        if self.context.is_none() {
            return Ok(None);
        }
        let bytes = pcm_codec::decode_transport(base64_data)?;
        let buffer = pcm_codec::decode_to_playback_buffer(&bytes, self.sample_rate, OUTPUT_CHANNELS)?;
        self.schedule(buffer)
    }

    /// Schedule an already decoded buffer.
    pub fn schedule(&mut self, buffer: PlaybackBuffer) -> Result<Option<f64>, LiveError> {
        let Some(context) = self.context.as_mut() else {
            return Ok(None);
        };

        let start_time = self.next_start_time.max(context.current_time());
        let duration = buffer.duration();
        let id = self.next_id;
        self.next_id += 1;

        let notify = Arc::clone(&self.notify_ended);
        context.start_source(id, buffer, start_time, Box::new(move || notify(id)))?;

        self.active.insert(id);
        self.next_start_time = start_time + duration;
        log::trace!(
            "Scheduled source {} at {:.3}s for {:.3}s ({} active)",
            id,
            start_time,
            duration,
            self.active.len()
        );
        Ok(Some(start_time))
    }

    /// Natural completion. Removing an unknown or already stopped source is a no-op.
    pub fn on_source_ended(&mut self, id: SourceId) {
        self.active.remove(&id);
    }

    /// Hard stop of everything playing or pending; the next chunk starts from "now".
    ///
    /// Returns the number of sources stopped.
    pub fn interrupt(&mut self) -> usize {
        let stopped = self.active.len();
        if let Some(context) = self.context.as_mut() {
            for id in self.active.drain() {
                context.stop_source(id);
            }
        } else {
            self.active.clear();
        }
        self.next_start_time = 0.0;
        stopped
    }

    /// Stop everything and release the context. Safe to call repeatedly.
    pub fn close(&mut self) {
        self.interrupt();
        if let Some(mut context) = self.context.take() {
            context.close();
            log::debug!("Playback context closed");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::FakePlayback;
    use std::sync::Mutex;

    fn buffer(seconds: f64) -> PlaybackBuffer {
        let frames = (seconds * 24000.0).round() as usize;
        PlaybackBuffer {
            sample_rate: 24000,
            channels: vec![vec![0.0; frames]],
        }
    }

    fn scheduler() -> (PlaybackScheduler, FakePlayback, Arc<Mutex<Vec<SourceId>>>) {
        let ended = Arc::new(Mutex::new(Vec::new()));
        let sink = ended.clone();
        let mut scheduler =
            PlaybackScheduler::new(24000, Arc::new(move |id| sink.lock().unwrap().push(id)));
        let playback = FakePlayback::new();
        scheduler.attach(Box::new(playback.clone()));
        (scheduler, playback, ended)
    }

    #[test]
    fn chunks_play_back_to_back() {
        let (mut scheduler, playback, _) = scheduler();
        playback.set_time(1.0);
        assert_eq!(scheduler.schedule(buffer(0.5)).unwrap(), Some(1.0));
        assert_eq!(scheduler.schedule(buffer(0.25)).unwrap(), Some(1.5));
        assert_eq!(scheduler.schedule(buffer(0.5)).unwrap(), Some(1.75));
        assert!((scheduler.next_start_time() - 2.25).abs() < 1e-9);
        assert_eq!(scheduler.active_count(), 3);
    }

    #[test]
    fn late_chunk_starts_now_instead_of_in_the_past() {
        let (mut scheduler, playback, _) = scheduler();
        scheduler.schedule(buffer(0.5)).unwrap();
        playback.set_time(3.0);
        assert_eq!(scheduler.schedule(buffer(0.5)).unwrap(), Some(3.0));
        assert!((scheduler.next_start_time() - 3.5).abs() < 1e-9);
    }

    #[test]
    fn jittered_arrivals_never_overlap() {
        let (mut scheduler, playback, _) = scheduler();
        let durations = [0.3, 0.1, 0.7, 0.05, 0.4, 0.2, 0.6, 0.15];
        let arrivals = [0.0, 0.1, 0.15, 1.5, 1.52, 2.9, 2.95, 4.0];
        let mut starts = Vec::new();
        for (d, t) in durations.iter().zip(arrivals) {
            playback.set_time(t);
            starts.push(scheduler.schedule(buffer(*d)).unwrap().unwrap());
        }
        for i in 1..starts.len() {
            assert!(starts[i] >= starts[i - 1]);
            assert!(starts[i] + 1e-9 >= starts[i - 1] + durations[i - 1]);
            assert!(starts[i] >= arrivals[i]);
        }
    }

    #[test]
    fn interruption_stops_every_active_source() {
        let (mut scheduler, playback, _) = scheduler();
        for _ in 0..4 {
            scheduler.schedule(buffer(0.2)).unwrap();
        }
        assert_eq!(scheduler.interrupt(), 4);
        assert_eq!(scheduler.active_count(), 0);
        assert_eq!(scheduler.next_start_time(), 0.0);

        let mut stopped = playback.stopped();
        stopped.sort_unstable();
        assert_eq!(stopped, vec![0, 1, 2, 3]);

        playback.set_time(5.0);
        assert_eq!(scheduler.schedule(buffer(0.2)).unwrap(), Some(5.0));
    }

    #[test]
    fn natural_end_removes_source_once() {
        let (mut scheduler, playback, ended) = scheduler();
        scheduler.schedule(buffer(0.2)).unwrap();
        scheduler.schedule(buffer(0.2)).unwrap();

        playback.finish(0);
        assert_eq!(*ended.lock().unwrap(), vec![0]);
        scheduler.on_source_ended(0);
        scheduler.on_source_ended(0);
        assert!(!scheduler.is_active(0));
        assert!(scheduler.is_active(1));

        scheduler.interrupt();
        // Completion racing an interruption is harmless.
        scheduler.on_source_ended(1);
        assert_eq!(scheduler.active_count(), 0);
    }

    #[test]
    fn chunk_without_context_is_ignored() {
        let mut scheduler = PlaybackScheduler::new(24000, Arc::new(|_| {}));
        assert_eq!(scheduler.enqueue_chunk("AAAA").unwrap(), None);
        assert_eq!(scheduler.active_count(), 0);
    }

    #[test]
    fn malformed_chunk_is_reported_and_nothing_scheduled() {
        let (mut scheduler, playback, _) = scheduler();
        // "AA==" is a single byte, half a sample
        let err = scheduler.enqueue_chunk("AA==").unwrap_err();
        assert!(matches!(err, LiveError::DecodeFailure(_)));
        assert!(scheduler.enqueue_chunk("%%%").is_err());
        assert!(playback.started().is_empty());
        assert_eq!(scheduler.next_start_time(), 0.0);
    }

    #[test]
    fn inline_chunk_is_decoded_at_output_rate() {
        let (mut scheduler, playback, _) = scheduler();
        let samples = vec![0.25f32; 2400];
        let packet = pcm_codec::encode_samples(&samples, 24000);
        scheduler.enqueue_chunk(&packet.data).unwrap();
        let started = playback.started();
        assert_eq!(started.len(), 1);
        assert_eq!(started[0].frames, 2400);
        assert!((scheduler.next_start_time() - 0.1).abs() < 1e-9);
    }

    #[test]
    fn close_is_idempotent() {
        let (mut scheduler, playback, _) = scheduler();
        scheduler.schedule(buffer(0.2)).unwrap();
        scheduler.close();
        scheduler.close();
        assert_eq!(playback.close_count(), 1);
        assert!(!scheduler.is_attached());
        assert_eq!(scheduler.active_count(), 0);
    }
}
