//! Timing decorator for created encoders.

use std::sync::Arc;

use crate::error::CodecError;
use crate::profiler::{MarkerCategory, MarkerHandle, ProfilerMarkerFactory, ProfilerScope};
use crate::traits::VideoEncoder;
use crate::types::{EncodedPacket, EncoderConfig, EncoderInfo, VideoFrame};

const ENCODE_MARKER: &str = "VideoEncoder.Encode";
const THREAD_GROUP: &str = "Video";
const THREAD_NAME: &str = "VideoEncoder";

/// Forwards every call to the wrapped encoder unchanged and records a
/// timing sample around the data-plane `encode` call only. Control calls
/// (`init`, rate updates, `info`) are deliberately unmeasured.
pub struct InstrumentedEncoder {
    inner: Box<dyn VideoEncoder>,
    profiler: Arc<dyn ProfilerMarkerFactory>,
    marker: MarkerHandle,
    // Registered on first encode: the encoding thread is not known until
    // the pipeline issues the first data-plane call.
    thread_scope: Option<Box<dyn ProfilerScope>>,
}

impl InstrumentedEncoder {
    /// Wrap `inner`, creating the encode marker up front.
    pub fn new(inner: Box<dyn VideoEncoder>, profiler: Arc<dyn ProfilerMarkerFactory>) -> Self {
        let marker = profiler.create_marker(ENCODE_MARKER, MarkerCategory::Codec);
        Self {
            inner,
            profiler,
            marker,
            thread_scope: None,
        }
    }
}

impl VideoEncoder for InstrumentedEncoder {
    fn init(&mut self, config: &EncoderConfig) -> Result<(), CodecError> {
        self.inner.init(config)
    }

    fn encode(
        &mut self,
        frame: &VideoFrame,
        force_keyframe: bool,
    ) -> Result<EncodedPacket, CodecError> {
        if self.thread_scope.is_none() {
            self.thread_scope = Some(self.profiler.begin_thread_scope(THREAD_GROUP, THREAD_NAME));
        }
        // The guard closes the sample on every exit path, including the
        // wrapped encoder's error returns.
        let _sample = self.profiler.begin_sample(self.marker);
        self.inner.encode(frame, force_keyframe)
    }

    fn set_bitrate(&mut self, bitrate_bps: u32) -> Result<(), CodecError> {
        self.inner.set_bitrate(bitrate_bps)
    }

    fn set_framerate(&mut self, fps: u32) -> Result<(), CodecError> {
        self.inner.set_framerate(fps)
    }

    fn info(&self) -> EncoderInfo {
        self.inner.info()
    }
}

#[cfg(test)]
pub(crate) mod testing {
    //! Recording profiler double shared by the decorator and factory
    //! tests.

    use std::sync::Arc;

    use parking_lot::Mutex;

    use super::*;

    #[derive(Default)]
    pub struct ProfilerLog {
        pub markers: Vec<String>,
        pub thread_scopes: usize,
        pub samples_begun: usize,
        pub samples_ended: usize,
    }

    #[derive(Default)]
    pub struct RecordingProfiler {
        pub log: Arc<Mutex<ProfilerLog>>,
    }

    struct SampleGuard {
        log: Arc<Mutex<ProfilerLog>>,
    }

    impl ProfilerScope for SampleGuard {}

    impl Drop for SampleGuard {
        fn drop(&mut self) {
            self.log.lock().samples_ended += 1;
        }
    }

    struct ThreadGuard;

    impl ProfilerScope for ThreadGuard {}

    impl ProfilerMarkerFactory for RecordingProfiler {
        fn create_marker(&self, name: &str, _category: MarkerCategory) -> MarkerHandle {
            let mut log = self.log.lock();
            log.markers.push(name.to_string());
            MarkerHandle(log.markers.len() as u64)
        }

        fn begin_thread_scope(&self, _group: &str, _name: &str) -> Box<dyn ProfilerScope> {
            self.log.lock().thread_scopes += 1;
            Box::new(ThreadGuard)
        }

        fn begin_sample(&self, _marker: MarkerHandle) -> Box<dyn ProfilerScope> {
            self.log.lock().samples_begun += 1;
            Box::new(SampleGuard {
                log: Arc::clone(&self.log),
            })
        }
    }
}
