//! Pipeline orchestration: load, hand off to the executor, expose views.
//!
//! States move `Idle -> Loading -> Ready -> Idle`. Loading additionally
//! requires the executor to have announced readiness.

use std::collections::HashMap;
use std::fmt;
use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::Arc;
use std::thread::JoinHandle;

use serde::Serialize;

use crate::analysis::{DerivedMetric, MetricValue};
use crate::audio::{
    AudioBufferSetup, AudioInfo, AudioMetadata, AudioSource, BufferManager, Decoder, SharedBytes,
    SymphoniaDecoder,
};
use crate::bridge::{Action, Failure, FailureKind, LoadRequest, MessageBridge, Payload};
use crate::config::PipelineConfig;
use crate::error::{BridgeError, BufferError, PipelineError, Result};
use crate::executor::AudioExecutor;
use crate::waveform::BufferView;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum PipelineState {
    Idle,
    Loading,
    Ready,
}

impl fmt::Display for PipelineState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PipelineState::Idle => write!(f, "idle"),
            PipelineState::Loading => write!(f, "loading"),
            PipelineState::Ready => write!(f, "ready"),
        }
    }
}

/// Change notifications delivered to subscribers.
#[derive(Debug, Clone, PartialEq)]
pub enum PipelineEvent {
    StateChanged { from: PipelineState, to: PipelineState },
    ExecutorReady,
    /// A load failed; the pipeline is back to idle.
    LoadFailed { message: String, recoverable: bool },
    /// Reset failed; the previous state and buffers are kept.
    ResetFailed { message: String },
}

/// Point-in-time copy of the observable pipeline fields.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PipelineSnapshot {
    pub state: PipelineState,
    pub executor_ready: bool,
    pub info: Option<AudioInfo>,
}

/// Owns the pipeline state and the controller side of the executor bridge.
pub struct AudioPipeline {
    config: PipelineConfig,
    bridge: MessageBridge,
    /// Controller-side decoder for the native decode path.
    native: Option<BufferManager>,
    executor: Option<JoinHandle<()>>,
    state: PipelineState,
    executor_ready: bool,
    decoded: Option<AudioBufferSetup>,
    metadata: Option<AudioMetadata>,
    metrics: HashMap<DerivedMetric, MetricValue>,
    subscribers: Vec<Sender<PipelineEvent>>,
}

impl AudioPipeline {
    /// Build around an existing bridge. The executor on the other end is
    /// owned by the caller.
    pub fn new(config: PipelineConfig, bridge: MessageBridge) -> Self {
        Self {
            config,
            bridge,
            native: None,
            executor: None,
            state: PipelineState::Idle,
            executor_ready: false,
            decoded: None,
            metadata: None,
            metrics: HashMap::new(),
            subscribers: Vec::new(),
        }
    }

    /// Spawn `executor` on a background thread and connect to it.
    pub fn with_executor(config: PipelineConfig, executor: AudioExecutor) -> Result<Self> {
        let (endpoint, handle) = executor
            .spawn()
            .map_err(|e| PipelineError::Executor(format!("failed to spawn executor: {}", e)))?;
        let mut pipeline = Self::new(config, MessageBridge::new(endpoint));
        pipeline.executor = Some(handle);
        Ok(pipeline)
    }

    /// Default composition: symphonia on the executor and for native decode.
    pub fn spawn(config: PipelineConfig) -> Result<Self> {
        let executor = AudioExecutor::new(Box::new(SymphoniaDecoder::new()), config.flux.clone());
        let pipeline = Self::with_executor(config, executor)?;
        Ok(pipeline.with_native_decoder(Box::new(SymphoniaDecoder::new())))
    }

    /// Install the decoder used when `prefer_native_decode` is set.
    pub fn with_native_decoder(mut self, decoder: Box<dyn Decoder>) -> Self {
        self.native = Some(BufferManager::new(decoder));
        self
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    pub fn state(&self) -> PipelineState {
        self.state
    }

    pub fn is_executor_ready(&self) -> bool {
        self.executor_ready
    }

    pub fn decoded(&self) -> Option<&AudioBufferSetup> {
        self.decoded.as_ref()
    }

    pub fn snapshot(&self) -> PipelineSnapshot {
        PipelineSnapshot {
            state: self.state,
            executor_ready: self.executor_ready,
            info: self.decoded.as_ref().map(AudioBufferSetup::info),
        }
    }

    /// Receive every subsequent [`PipelineEvent`].
    pub fn subscribe(&mut self) -> Receiver<PipelineEvent> {
        let (tx, rx) = mpsc::channel();
        self.subscribers.push(tx);
        rx
    }

    /// Block until the executor announces readiness.
    pub fn wait_until_ready(&mut self) -> Result<()> {
        let timeout = self.config.ready_timeout();
        self.bridge.wait_ready(timeout)?;
        self.sync_readiness();
        Ok(())
    }

    /// Load and decode `source`, then hand the buffers to the executor.
    ///
    /// A load while `Ready` first resets. On failure the pipeline returns
    /// to `Idle` with no decoded data.
    pub fn load_audio(&mut self, source: AudioSource) -> Result<AudioInfo> {
        self.refresh();
        if !self.executor_ready {
            return Err(BridgeError::NotReady {
                kind: Action::LoadAudio.request_kind(),
            }
            .into());
        }
        match self.state {
            PipelineState::Loading => {
                return Err(PipelineError::State {
                    operation: "load_audio",
                    state: self.state,
                })
            }
            PipelineState::Ready => self.reset_audio()?,
            PipelineState::Idle => {}
        }

        self.set_state(PipelineState::Loading);
        match self.load_inner(&source) {
            Ok(setup) => {
                let info = setup.info();
                self.decoded = Some(setup);
                self.set_state(PipelineState::Ready);
                Ok(info)
            }
            Err(e) => {
                log::error!("Audio load failed: {}", e);
                if may_complete_late(&e) {
                    self.release_abandoned_load();
                }
                self.decoded = None;
                self.set_state(PipelineState::Idle);
                self.emit(PipelineEvent::LoadFailed {
                    message: e.to_string(),
                    recoverable: e.is_recoverable(),
                });
                Err(e)
            }
        }
    }

    fn load_inner(&mut self, source: &AudioSource) -> Result<AudioBufferSetup> {
        let bytes = source.read_bytes()?;
        if bytes.is_empty() {
            return Err(BufferError::Load("input is empty".into()).into());
        }
        let raw: SharedBytes = Arc::from(bytes);

        let native_attempt = match &self.native {
            Some(native) if self.config.prefer_native_decode => {
                Some(native.decode_shared(raw.clone()))
            }
            _ => None,
        };
        match native_attempt {
            Some(Ok(setup)) => return self.hand_off(LoadRequest::Decoded(setup)),
            Some(Err(e)) => {
                log::warn!("Native decode failed ({}), falling back to executor decode", e)
            }
            None => {}
        }

        self.hand_off(LoadRequest::Encoded(raw))
    }

    fn hand_off(&mut self, request: LoadRequest) -> Result<AudioBufferSetup> {
        let timeout = self.config.request_timeout();
        match self.bridge.request(Action::LoadAudio, Payload::Load(request), timeout)? {
            Payload::Loaded(setup) => Ok(setup),
            Payload::Failed(f) => Err(failure_error(f)),
            other => Err(unexpected(Action::LoadAudio, &other)),
        }
    }

    /// A load the controller gave up on may still finish on the executor.
    /// Queue an unload behind it so those buffers are released too.
    fn release_abandoned_load(&mut self) {
        let timeout = self.config.request_timeout();
        match self.bridge.request(Action::UnloadAudio, Payload::Empty, timeout) {
            Ok(Payload::Ack(released)) => {
                log::debug!("Executor released abandoned load (held audio: {})", released)
            }
            Ok(other) => {
                log::warn!("Unexpected '{}' reply to unload after failed load", other.label())
            }
            Err(BridgeError::Timeout { .. }) => {
                log::warn!("Unload after failed load still queued on executor")
            }
            Err(e) => log::warn!("Could not release executor buffers after failed load: {}", e),
        }
    }

    /// Ask the executor to release its buffers, then drop ours.
    ///
    /// If the executor does not confirm, the current state and buffers are
    /// kept and the error is returned.
    pub fn reset_audio(&mut self) -> Result<()> {
        self.refresh();
        match self.state {
            PipelineState::Idle => {
                self.metrics.clear();
                self.metadata = None;
                return Ok(());
            }
            PipelineState::Loading => {
                return Err(PipelineError::State {
                    operation: "reset_audio",
                    state: self.state,
                })
            }
            PipelineState::Ready => {}
        }

        let timeout = self.config.request_timeout();
        let result = self
            .bridge
            .request(Action::UnloadAudio, Payload::Empty, timeout)
            .map_err(PipelineError::from)
            .and_then(|payload| match payload {
                Payload::Ack(released) => {
                    if !released {
                        log::warn!("Executor held no audio at reset");
                    }
                    Ok(())
                }
                Payload::Failed(f) => Err(failure_error(f)),
                other => Err(unexpected(Action::UnloadAudio, &other)),
            });

        if let Err(e) = result {
            log::error!("Audio reset failed: {}", e);
            self.emit(PipelineEvent::ResetFailed { message: e.to_string() });
            return Err(e);
        }

        self.decoded = None;
        self.metadata = None;
        self.metrics.clear();
        self.set_state(PipelineState::Idle);
        Ok(())
    }

    /// Compute (or return the cached) derived metric.
    pub fn get_derived_metric(&mut self, metric: DerivedMetric) -> Result<MetricValue> {
        self.require_ready("get_derived_metric")?;
        if let Some(value) = self.metrics.get(&metric) {
            log::debug!("Metric cache hit: {}", metric);
            return Ok(value.clone());
        }

        let timeout = self.config.request_timeout();
        match self
            .bridge
            .request(Action::GetDerivedMetric, Payload::Metric(metric), timeout)?
        {
            Payload::MetricValue(value) => {
                self.metrics.insert(metric, value.clone());
                Ok(value)
            }
            Payload::Failed(f) => Err(failure_error(f)),
            other => Err(unexpected(Action::GetDerivedMetric, &other)),
        }
    }

    /// Metadata re-extracted by the executor. Cached until reset.
    pub fn get_metadata(&mut self) -> Result<AudioMetadata> {
        self.require_ready("get_metadata")?;
        if let Some(meta) = &self.metadata {
            return Ok(meta.clone());
        }

        let timeout = self.config.request_timeout();
        match self.bridge.request(Action::GetMetadata, Payload::Empty, timeout)? {
            Payload::Metadata(meta) => {
                self.metadata = Some((*meta).clone());
                Ok(*meta)
            }
            Payload::Failed(f) => Err(failure_error(f)),
            other => Err(unexpected(Action::GetMetadata, &other)),
        }
    }

    /// Read-only view over the decoded channels.
    pub fn get_buffer_view(&self) -> Result<BufferView> {
        self.require_ready("get_buffer_view")?;
        self.decoded
            .as_ref()
            .map(BufferView::from_setup)
            .ok_or(PipelineError::State {
                operation: "get_buffer_view",
                state: self.state,
            })
    }

    /// Disconnect from the executor and wait for its thread to finish.
    pub fn shutdown(self) {
        let AudioPipeline { bridge, executor, .. } = self;
        drop(bridge);
        if let Some(handle) = executor {
            if handle.join().is_err() {
                log::error!("Audio executor thread panicked");
            }
        }
    }

    fn require_ready(&self, operation: &'static str) -> Result<()> {
        if self.state == PipelineState::Ready {
            Ok(())
        } else {
            Err(PipelineError::State {
                operation,
                state: self.state,
            })
        }
    }

    /// Drain pending executor traffic without blocking.
    fn refresh(&mut self) {
        if let Err(e) = self.bridge.poll() {
            log::debug!("Executor channel: {}", e);
        }
        self.sync_readiness();
    }

    fn sync_readiness(&mut self) {
        if self.bridge.is_ready() && !self.executor_ready {
            self.executor_ready = true;
            self.emit(PipelineEvent::ExecutorReady);
        }
    }

    fn set_state(&mut self, to: PipelineState) {
        let from = self.state;
        if from == to {
            return;
        }
        self.state = to;
        log::debug!("Pipeline {} -> {}", from, to);
        self.emit(PipelineEvent::StateChanged { from, to });
    }

    fn emit(&mut self, event: PipelineEvent) {
        self.subscribers.retain(|tx| tx.send(event.clone()).is_ok());
    }
}

/// Whether the executor may still act on a load request after `err`.
fn may_complete_late(err: &PipelineError) -> bool {
    matches!(
        err,
        PipelineError::Bridge(BridgeError::Timeout { .. } | BridgeError::UnexpectedResponse { .. })
    )
}

fn failure_error(failure: Failure) -> PipelineError {
    match failure.kind {
        FailureKind::Decode => BufferError::Decode(failure.message).into(),
        _ => PipelineError::Executor(failure.to_string()),
    }
}

fn unexpected(action: Action, payload: &Payload) -> PipelineError {
    PipelineError::Executor(format!(
        "unexpected '{}' payload in reply to '{}'",
        payload.label(),
        action
    ))
}
