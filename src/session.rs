use futures_util::{Stream, StreamExt};
use std::pin::Pin;
use tracing::{debug, info, warn};

use crate::gemini::{FragmentStream, ManuscriptService, ANALYSIS_FALLBACK, CHAT_FALLBACK};
use crate::transcript::{Speaker, Transcript, Turn, TurnId};
use crate::upload::UploadedImage;

/// Shown in place of an assistant reply that could not be produced.
pub const CHAT_FAILURE_MESSAGE: &str = "I'm having trouble reading the manuscript right now.";

/// Bumped whenever the image changes or the session is reset. Events carry
/// the epoch they were started under; anything older is dropped.
pub type Epoch = u64;

pub type EventStream = Pin<Box<dyn Stream<Item = StreamEvent> + Send>>;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AnalysisState {
    Idle,
    Analyzing { text: String },
    Complete { text: String },
    /// Partial text streamed before the failure is kept.
    Failed { text: String, message: String },
}

impl AnalysisState {
    pub fn text(&self) -> &str {
        match self {
            AnalysisState::Idle => "",
            AnalysisState::Analyzing { text }
            | AnalysisState::Complete { text }
            | AnalysisState::Failed { text, .. } => text,
        }
    }

    pub fn error(&self) -> Option<&str> {
        match self {
            AnalysisState::Failed { message, .. } => Some(message),
            _ => None,
        }
    }

    pub fn is_idle(&self) -> bool {
        matches!(self, AnalysisState::Idle)
    }

    pub fn is_analyzing(&self) -> bool {
        matches!(self, AnalysisState::Analyzing { .. })
    }

    /// Idle, or failed and waiting for a retry.
    pub fn can_start(&self) -> bool {
        matches!(self, AnalysisState::Idle | AnalysisState::Failed { .. })
    }
}

/// One step of a streamed response, as seen by the session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StreamEvent {
    Fragment(String),
    Finished,
    Failed(String),
}

pub struct AnalysisStream {
    pub epoch: Epoch,
    pub events: EventStream,
}

pub struct ChatStream {
    pub epoch: Epoch,
    pub turn: TurnId,
    pub events: EventStream,
}

/// Turn a fragment stream into events: every fragment, then exactly one
/// `Finished` or `Failed`.
pub fn events(stream: FragmentStream, fallback: &'static str) -> EventStream {
    Box::pin(futures_util::stream::unfold(Some(stream), move |state| async move {
        let mut stream = state?;
        match stream.next().await {
            Some(Ok(fragment)) => Some((StreamEvent::Fragment(fragment), Some(stream))),
            Some(Err(e)) => Some((StreamEvent::Failed(e.user_message(fallback)), None)),
            None => Some((StreamEvent::Finished, None)),
        }
    }))
}

#[derive(Debug, Default)]
pub struct Session {
    image: Option<UploadedImage>,
    analysis: AnalysisState,
    transcript: Transcript,
    pending_reply: Option<TurnId>,
    epoch: Epoch,
}

impl Default for AnalysisState {
    fn default() -> Self {
        AnalysisState::Idle
    }
}

impl Session {
    pub fn image(&self) -> Option<&UploadedImage> {
        self.image.as_ref()
    }

    pub fn analysis(&self) -> &AnalysisState {
        &self.analysis
    }

    pub fn transcript(&self) -> &[Turn] {
        self.transcript.turns()
    }

    pub fn is_chat_busy(&self) -> bool {
        self.pending_reply.is_some()
    }

    #[cfg(test)]
    pub fn epoch(&self) -> Epoch {
        self.epoch
    }

    /// Replace the image and start over. `None` (dialog cancelled) changes nothing.
    pub fn select_image(&mut self, image: Option<UploadedImage>) -> bool {
        let Some(image) = image else {
            return false;
        };
        info!(file = %image.file_name(), "Image selected");
        self.clear_progress();
        self.image = Some(image);
        true
    }

    pub fn reset(&mut self) {
        info!("Session reset");
        self.clear_progress();
        self.image = None;
    }

    fn clear_progress(&mut self) {
        self.analysis = AnalysisState::Idle;
        self.transcript.clear();
        self.pending_reply = None;
        self.epoch += 1;
    }

    /// Begin analysing the current image.
    ///
    /// Returns `None` without touching the service when there is no image or
    /// an analysis is running or complete. A failed analysis may be retried;
    /// the retry starts from empty text. If the service refuses up front (no
    /// credential, bad data URL) the state goes straight to `Failed`.
    pub fn start_analysis<S>(&mut self, service: &S, prompt_override: Option<&str>) -> Option<AnalysisStream>
    where
        S: ManuscriptService + ?Sized,
    {
        if !self.analysis.can_start() {
            return None;
        }
        let image = self.image.as_ref()?;

        self.analysis = AnalysisState::Analyzing {
            text: String::new(),
        };

        match service.stream_analysis(&image.data_url, prompt_override) {
            Ok(stream) => Some(AnalysisStream {
                epoch: self.epoch,
                events: events(stream, ANALYSIS_FALLBACK),
            }),
            Err(e) => {
                warn!(error = %e, "Analysis could not start");
                self.analysis = AnalysisState::Failed {
                    text: String::new(),
                    message: e.user_message(ANALYSIS_FALLBACK),
                };
                None
            }
        }
    }

    /// Apply one analysis event. Returns false when the event was dropped.
    pub fn apply_analysis(&mut self, epoch: Epoch, event: StreamEvent) -> bool {
        if epoch != self.epoch {
            debug!(epoch, current = self.epoch, "Dropping stale analysis event");
            return false;
        }

        let AnalysisState::Analyzing { text } = &mut self.analysis else {
            return false;
        };

        match event {
            StreamEvent::Fragment(fragment) => {
                text.push_str(&fragment);
            }
            StreamEvent::Finished => {
                let text = std::mem::take(text);
                info!(chars = text.len(), "Analysis complete");
                self.analysis = AnalysisState::Complete { text };
            }
            StreamEvent::Failed(message) => {
                let text = std::mem::take(text);
                warn!(%message, kept_chars = text.len(), "Analysis failed");
                self.analysis = AnalysisState::Failed { text, message };
            }
        }
        true
    }

    /// Ask a follow-up question about the current image.
    ///
    /// Blank questions, a missing image or a reply still in flight make this
    /// a no-op. Otherwise the question and an empty assistant turn are
    /// appended and the model sees the conversation as it stood before them.
    pub fn submit_chat<S>(&mut self, service: &S, message: &str) -> Option<ChatStream>
    where
        S: ManuscriptService + ?Sized,
    {
        if message.trim().is_empty() || self.pending_reply.is_some() {
            return None;
        }
        let image = self.image.as_ref()?;

        let history = self.transcript.turns().to_vec();
        self.transcript.push(Speaker::User, message);
        let turn = self.transcript.push(Speaker::Assistant, "");
        self.pending_reply = Some(turn);

        debug!(history_turns = history.len(), "Submitting chat message");

        match service.stream_chat(&history, message, &image.data_url) {
            Ok(stream) => Some(ChatStream {
                epoch: self.epoch,
                turn,
                events: events(stream, CHAT_FALLBACK),
            }),
            Err(e) => {
                warn!(error = %e, "Chat could not start");
                self.transcript.replace_text(turn, CHAT_FAILURE_MESSAGE);
                self.pending_reply = None;
                None
            }
        }
    }

    /// Apply one chat event to the reply it belongs to. Returns false when
    /// the event was dropped.
    pub fn apply_chat(&mut self, epoch: Epoch, turn: TurnId, event: StreamEvent) -> bool {
        if epoch != self.epoch || self.pending_reply != Some(turn) {
            debug!(epoch, current = self.epoch, "Dropping stale chat event");
            return false;
        }

        match event {
            StreamEvent::Fragment(fragment) => {
                self.transcript.append_text(turn, &fragment);
            }
            StreamEvent::Finished => {
                self.pending_reply = None;
            }
            StreamEvent::Failed(message) => {
                warn!(%message, "Chat reply failed");
                self.transcript.replace_text(turn, CHAT_FAILURE_MESSAGE);
                self.pending_reply = None;
            }
        }
        true
    }
}
