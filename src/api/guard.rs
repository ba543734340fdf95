use crate::core::logging::log_request_completed;
use crate::core::recorder::Recorder;
use crate::core::recording::Recording;
use chrono::Utc;
use std::ops::{Deref, DerefMut};
use std::sync::Arc;

/// Error stored when the request is abandoned before a response was produced.
pub const ABANDONED_ERROR: &str = "client disconnected before response";

/// Owns the in-flight [`Recording`] of one request and finalizes it on drop.
///
/// Finalization stamps the completion time, emits the `request completed`
/// log line and hands the recording to the [`Recorder`]. Dropping is the only
/// way out, so this happens exactly once on every path: early errors,
/// finished relays, and relays cut short by a client disconnect.
///
/// A guard dropped before [`RecordingGuard::responded`] was called, with no
/// error set, belongs to a handler future that was cancelled (the client went
/// away while the upstream call was pending). Its recording gets
/// [`ABANDONED_ERROR`].
pub struct RecordingGuard {
    rec: Recording,
    recorder: Arc<Recorder>,
    responded: bool,
}

impl RecordingGuard {
    pub fn new(rec: Recording, recorder: Arc<Recorder>) -> Self {
        Self {
            rec,
            recorder,
            responded: false,
        }
    }

    /// Mark that a response has been handed to the client.
    pub fn responded(&mut self) {
        self.responded = true;
    }
}

impl Deref for RecordingGuard {
    type Target = Recording;

    fn deref(&self) -> &Recording {
        &self.rec
    }
}

impl DerefMut for RecordingGuard {
    fn deref_mut(&mut self) -> &mut Recording {
        &mut self.rec
    }
}

impl Drop for RecordingGuard {
    fn drop(&mut self) {
        let mut rec = std::mem::take(&mut self.rec);
        if !self.responded && rec.error.is_none() {
            rec.error = Some(ABANDONED_ERROR.to_string());
        }
        rec.finish(Utc::now());
        log_request_completed(&rec);
        self.recorder.record(rec);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::recording::Provider;

    #[tokio::test]
    async fn test_drop_hands_recording_over_once() {
        let (recorder, mut receiver) = Recorder::detached(4);
        let recorder = Arc::new(recorder);

        let rec = Recording::new(Provider::OpenAI, "POST", "/v1/embeddings", "", Utc::now());
        let id = rec.id.clone();
        {
            let mut guard = RecordingGuard::new(rec, recorder.clone());
            guard.response.status = 201;
            guard.responded();
        }

        let finalized = receiver.try_recv().unwrap();
        assert_eq!(finalized.id, id);
        assert_eq!(finalized.response.status, 201);
        assert!(finalized.error.is_none());
        assert!(finalized.timing.completed_at >= finalized.timing.started_at);
        assert!(receiver.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_drop_during_unwind_still_records() {
        let (recorder, mut receiver) = Recorder::detached(4);
        let recorder = Arc::new(recorder);

        let rec = Recording::new(Provider::Claude, "POST", "/v1/messages", "", Utc::now());
        let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
            let mut guard = RecordingGuard::new(rec, recorder.clone());
            guard.fail(500, "boom");
            panic!("handler panicked");
        }));
        assert!(result.is_err());

        let finalized = receiver.try_recv().unwrap();
        assert_eq!(finalized.error.as_deref(), Some("boom"));
    }

    #[tokio::test]
    async fn test_drop_before_response_marks_abandoned() {
        let (recorder, mut receiver) = Recorder::detached(4);
        let recorder = Arc::new(recorder);

        let rec = Recording::new(Provider::Gemini, "POST", "/v1beta/models/x:generateContent", "", Utc::now());
        drop(RecordingGuard::new(rec, recorder));

        let finalized = receiver.try_recv().unwrap();
        assert_eq!(finalized.response.status, 0);
        assert_eq!(finalized.error.as_deref(), Some(ABANDONED_ERROR));
    }
}
