//! Background executor: decodes audio and computes derived metrics off the
//! controller thread.

use std::thread::JoinHandle;

use crate::analysis::{self, DerivedMetric};
use crate::audio::{AudioBufferSetup, AudioMetadata, BufferManager, Decoder};
use crate::bridge::{
    Action, Endpoint, Failure, FailureKind, LoadRequest, Message, Payload, ERROR_KIND,
};
use crate::config::FluxConfig;

/// Executor state. Holds its own handles to the loaded regions.
pub struct AudioExecutor {
    buffers: BufferManager,
    loaded: Option<AudioBufferSetup>,
    flux: FluxConfig,
}

impl AudioExecutor {
    pub fn new(decoder: Box<dyn Decoder>, flux: FluxConfig) -> Self {
        Self {
            buffers: BufferManager::new(decoder),
            loaded: None,
            flux,
        }
    }

    pub fn is_loaded(&self) -> bool {
        self.loaded.is_some()
    }

    /// Spawn the executor on its own thread.
    /// Returns the controller's endpoint and the thread handle.
    pub fn spawn(self) -> std::io::Result<(Endpoint, JoinHandle<()>)> {
        let (controller, executor) = Endpoint::pair();
        let handle = std::thread::Builder::new()
            .name("audio-executor".into())
            .spawn(move || self.run(executor))?;
        Ok((controller, handle))
    }

    /// Announce readiness, then serve requests until the controller hangs up.
    pub fn run(mut self, endpoint: Endpoint) {
        log::debug!("Audio executor starting ({} decoder)", self.buffers.decoder_name());
        if !endpoint.send(Message::ready()) {
            return;
        }

        while let Some(msg) = endpoint.recv() {
            if let Some(response) = self.handle(msg) {
                if !endpoint.send(response) {
                    break;
                }
            }
        }
        log::debug!("Audio executor stopped");
    }

    /// Handle one message, producing the response to send back (if any).
    pub fn handle(&mut self, msg: Message) -> Option<Message> {
        let Some(action) = Action::from_request_kind(&msg.kind) else {
            log::error!("Unknown message type: {}", msg.kind);
            if msg.id.is_none() {
                return None;
            }
            let failure = Failure::new(
                FailureKind::Unsupported,
                format!("unknown request '{}'", msg.kind),
            );
            return Some(msg.reply(ERROR_KIND, Payload::Failed(failure)));
        };

        if msg.id.is_none() {
            log::warn!("Request '{}' without correlation id ignored", msg.kind);
            return None;
        }

        log::debug!("Handling '{}'", action);
        let payload = match action {
            Action::LoadAudio => self.load(&msg.payload),
            Action::UnloadAudio => self.unload(),
            Action::GetMetadata => self.metadata(),
            Action::GetDerivedMetric => match &msg.payload {
                Payload::Metric(metric) => self.derived_metric(*metric),
                _ => unsupported_payload(action),
            },
        };
        Some(msg.reply(action.response_kind(), payload))
    }

    fn load(&mut self, payload: &Payload) -> Payload {
        let Payload::Load(request) = payload else {
            return unsupported_payload(Action::LoadAudio);
        };

        // Release the previous buffers before taking new ones
        self.loaded = None;

        let setup = match request {
            LoadRequest::Decoded(setup) => {
                log::info!(
                    "Adopted decoded audio: {} channels, {} samples",
                    setup.num_channels(),
                    setup.num_samples
                );
                setup.clone()
            }
            LoadRequest::Encoded(raw) => match self.buffers.decode_shared(raw.clone()) {
                Ok(setup) => setup,
                Err(e) => {
                    log::error!("Executor decode failed: {}", e);
                    return Payload::Failed(Failure::new(FailureKind::Decode, e.to_string()));
                }
            },
        };

        self.loaded = Some(setup.clone());
        Payload::Loaded(setup)
    }

    fn unload(&mut self) -> Payload {
        let was_loaded = self.loaded.take().is_some();
        if !was_loaded {
            log::debug!("Unload requested with nothing loaded");
        }
        Payload::Ack(was_loaded)
    }

    fn metadata(&self) -> Payload {
        match &self.loaded {
            Some(setup) => Payload::Metadata(Box::new(AudioMetadata::from_setup(setup))),
            None => not_loaded(),
        }
    }

    fn derived_metric(&self, metric: DerivedMetric) -> Payload {
        let Some(setup) = &self.loaded else {
            return not_loaded();
        };
        match analysis::compute(metric, setup, &self.flux) {
            Ok(value) => Payload::MetricValue(value),
            Err(e) => {
                log::warn!("Failed to compute {}: {}", metric, e);
                Payload::Failed(Failure::new(FailureKind::Analysis, e))
            }
        }
    }
}

fn not_loaded() -> Payload {
    Payload::Failed(Failure::new(FailureKind::NotLoaded, "no audio loaded"))
}

fn unsupported_payload(action: Action) -> Payload {
    Payload::Failed(Failure::new(
        FailureKind::Unsupported,
        format!("unexpected payload for '{}'", action),
    ))
}
