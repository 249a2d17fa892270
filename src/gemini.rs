use futures_util::{Stream, StreamExt};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::pin::Pin;
use tracing::{debug, info, warn};

use crate::config::{self, GeminiConfig};
use crate::transcript::Turn;
use crate::upload::{parse_data_url, DataUrlError};

const SYSTEM_INSTRUCTION: &str = "You are an expert paleographer, cryptographer, and art historian specializing in ancient, obscure, and encrypted manuscripts (such as the Voynich Manuscript, Codex Seraphinianus, or medieval alchemy texts).

Your goal is to analyze images with high precision, balancing academic rigor with creative interpretation where facts are missing.

Always format your response using Markdown. Use bolding for key terms.";

const ANALYSIS_TASK: &str = "Analyze the provided image with high precision.

Structure your analysis into these sections:

1. **Identification & Overview**: Identify the manuscript if possible (e.g., \"This appears to be Folio 78r from the Voynich Manuscript\"). If unknown, describe its likely era and origin style.
2. **Visual Analysis**: Describe the illustrations in detail. What are the figures doing? What do the colors (green, blue, red) signify? Note any botanical, astronomical, or anatomical features.
3. **Script Analysis**: Analyze the writing system. Is it a known language, a cipher, or an invented script (like \"Voynichese\")? Describe the glyph shapes.
4. **Decipherment Attempt**:
   - If it is a known language, provide a translation.
   - If it is an undeciphered text (like Voynich), provide a \"best guess\" thematic interpretation based on current academic theories (e.g., herbal medicine, balneology/baths, astrology).
   - *Creative Decoding*: Create a plausible, poetic interpretation of what this specific page might be saying about the scene depicted.

Be thorough, academic yet accessible, and imaginative where facts are missing.";

pub const ANALYSIS_FALLBACK: &str = "Failed to analyze the manuscript.";
pub const CHAT_FALLBACK: &str = "Failed to chat with the manuscript.";

/// Text fragments in arrival order. Ends after the first error.
pub type FragmentStream = Pin<Box<dyn Stream<Item = Result<String, GeminiError>> + Send>>;

#[derive(Debug, thiserror::Error)]
pub enum GeminiError {
    #[error("API Key is missing. Please check your environment configuration.")]
    MissingCredential,

    #[error("Malformed image data: {0}")]
    MalformedInput(#[from] DataUrlError),

    #[error("Request failed: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("Gemini API error{}: {message}", status_suffix(.status))]
    Service { status: Option<u16>, message: String },

    #[error("Invalid response chunk: {0}")]
    Decode(#[from] serde_json::Error),
}

fn status_suffix(status: &Option<u16>) -> String {
    status.map(|code| format!(" ({})", code)).unwrap_or_default()
}

impl GeminiError {
    /// Message shown to the user: the service's own text when it sent one.
    pub fn user_message(&self, fallback: &str) -> String {
        match self {
            GeminiError::MissingCredential | GeminiError::MalformedInput(_) => self.to_string(),
            GeminiError::Service { message, .. } if !message.trim().is_empty() => message.clone(),
            _ => fallback.to_string(),
        }
    }

    fn from_error_body(status: u16, body: &str) -> Self {
        let message = serde_json::from_str::<ErrorEnvelope>(body)
            .ok()
            .and_then(|envelope| envelope.error.message)
            .unwrap_or_default();
        GeminiError::Service {
            status: Some(status),
            message,
        }
    }
}

/// The two streaming operations the session drives.
pub trait ManuscriptService {
    fn stream_analysis(
        &self,
        data_url: &str,
        prompt_override: Option<&str>,
    ) -> Result<FragmentStream, GeminiError>;

    fn stream_chat(
        &self,
        history: &[Turn],
        message: &str,
        data_url: &str,
    ) -> Result<FragmentStream, GeminiError>;
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerateContentRequest {
    contents: Vec<Content>,
    system_instruction: Content,
}

#[derive(Debug, Serialize)]
struct Content {
    #[serde(skip_serializing_if = "Option::is_none")]
    role: Option<String>,
    parts: Vec<Part>,
}

#[derive(Debug, Serialize)]
#[serde(untagged)]
enum Part {
    Text {
        text: String,
    },
    InlineData {
        #[serde(rename = "inlineData")]
        inline_data: InlineData,
    },
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct InlineData {
    mime_type: String,
    data: String,
}

#[derive(Debug, Deserialize)]
struct StreamChunk {
    #[serde(default)]
    candidates: Vec<Candidate>,
    #[serde(default)]
    error: Option<ApiError>,
}

#[derive(Debug, Deserialize)]
struct Candidate {
    #[serde(default)]
    content: Option<ResponseContent>,
}

#[derive(Debug, Deserialize)]
struct ResponseContent {
    #[serde(default)]
    parts: Vec<ResponsePart>,
}

#[derive(Debug, Deserialize)]
struct ResponsePart {
    #[serde(default)]
    text: Option<String>,
    #[serde(default)]
    thought: bool,
}

#[derive(Debug, Deserialize)]
struct ErrorEnvelope {
    error: ApiError,
}

#[derive(Debug, Deserialize)]
struct ApiError {
    #[serde(default)]
    code: Option<u16>,
    #[serde(default)]
    message: Option<String>,
}

pub struct GeminiClient {
    endpoint: String,
    model: String,
    api_key: Option<String>,
    client: reqwest::Client,
}

impl GeminiClient {
    pub fn new(api_key: Option<String>, endpoint: String, model: String) -> Self {
        GeminiClient {
            endpoint: endpoint.trim_end_matches('/').to_string(),
            model,
            api_key: api_key.filter(|key| !key.trim().is_empty()),
            client: reqwest::Client::new(),
        }
    }

    pub fn from_config(config: &GeminiConfig) -> Self {
        Self::new(
            config::api_key_from_env(),
            config.endpoint.clone(),
            config.model.clone(),
        )
    }

    pub fn get_model(&self) -> &str {
        &self.model
    }

    pub fn has_credential(&self) -> bool {
        self.api_key.is_some()
    }

    /// Check the credential, split the data URL and prepare the request.
    ///
    /// Nothing is sent until the returned stream is first polled.
    fn stream_generate(&self, data_url: &str, prompt: String) -> Result<FragmentStream, GeminiError> {
        let api_key = self.api_key.as_ref().ok_or(GeminiError::MissingCredential)?;
        let image = parse_data_url(data_url)?;

        let request = GenerateContentRequest {
            contents: vec![Content {
                role: Some("user".to_string()),
                parts: vec![
                    Part::InlineData {
                        inline_data: InlineData {
                            mime_type: image.media_type.to_string(),
                            data: image.payload.to_string(),
                        },
                    },
                    Part::Text { text: prompt },
                ],
            }],
            system_instruction: Content {
                role: None,
                parts: vec![Part::Text {
                    text: SYSTEM_INSTRUCTION.to_string(),
                }],
            },
        };

        info!(
            model = %self.model,
            media_type = image.media_type,
            payload_bytes = image.payload.len(),
            "Starting Gemini stream"
        );

        let builder = self
            .client
            .post(format!(
                "{}/models/{}:streamGenerateContent?alt=sse",
                self.endpoint, self.model
            ))
            .header("x-goog-api-key", api_key)
            .json(&request);

        let reader = FragmentReader::new(builder);
        Ok(Box::pin(futures_util::stream::unfold(reader, |mut reader| async move {
            reader.next_fragment().await.map(|item| (item, reader))
        })))
    }
}

impl ManuscriptService for GeminiClient {
    fn stream_analysis(
        &self,
        data_url: &str,
        prompt_override: Option<&str>,
    ) -> Result<FragmentStream, GeminiError> {
        let prompt = prompt_override
            .filter(|prompt| !prompt.trim().is_empty())
            .unwrap_or(ANALYSIS_TASK);
        self.stream_generate(data_url, prompt.to_string())
    }

    fn stream_chat(
        &self,
        history: &[Turn],
        message: &str,
        data_url: &str,
    ) -> Result<FragmentStream, GeminiError> {
        self.stream_generate(data_url, build_chat_prompt(history, message))
    }
}

/// Replay the conversation as plain text. The model keeps no session, so the
/// whole history (and the image) travels with every question.
pub fn build_chat_prompt(history: &[Turn], message: &str) -> String {
    let context = history
        .iter()
        .map(|turn| format!("{}: {}", turn.speaker.label(), turn.text))
        .collect::<Vec<_>>()
        .join("\n");

    format!(
        "Context of conversation:\n{}\n\nUSER QUESTION: {}\n\nAnswer the user's question based on the image provided and the context above.",
        context, message
    )
}

struct FragmentReader {
    request: Option<reqwest::RequestBuilder>,
    body: Option<Pin<Box<dyn Stream<Item = reqwest::Result<Vec<u8>>> + Send>>>,
    decoder: SseDecoder,
    pending: VecDeque<String>,
    finished: bool,
}

impl FragmentReader {
    fn new(request: reqwest::RequestBuilder) -> Self {
        FragmentReader {
            request: Some(request),
            body: None,
            decoder: SseDecoder::default(),
            pending: VecDeque::new(),
            finished: false,
        }
    }

    async fn next_fragment(&mut self) -> Option<Result<String, GeminiError>> {
        if self.finished {
            return None;
        }
        match self.advance().await {
            Ok(Some(fragment)) => Some(Ok(fragment)),
            Ok(None) => {
                self.finished = true;
                debug!("Gemini stream finished");
                None
            }
            Err(e) => {
                self.finished = true;
                warn!(error = %e, "Gemini stream failed");
                Some(Err(e))
            }
        }
    }

    async fn advance(&mut self) -> Result<Option<String>, GeminiError> {
        if let Some(request) = self.request.take() {
            let response = request.send().await?;
            let status = response.status();
            if !status.is_success() {
                let body = response.text().await.unwrap_or_default();
                return Err(GeminiError::from_error_body(status.as_u16(), &body));
            }
            let body = response
                .bytes_stream()
                .map(|chunk| chunk.map(|bytes| bytes.to_vec()));
            self.body = Some(Box::pin(body));
        }

        loop {
            while let Some(payload) = self.pending.pop_front() {
                if let Some(text) = decode_chunk(&payload)? {
                    return Ok(Some(text));
                }
            }

            let Some(body) = self.body.as_mut() else {
                return Ok(None);
            };

            match body.next().await {
                Some(chunk) => {
                    let chunk = chunk?;
                    self.pending.extend(self.decoder.push(&chunk));
                }
                None => {
                    self.body = None;
                    self.pending.extend(self.decoder.finish());
                }
            }
        }
    }
}

/// Pull the text out of one SSE payload. `None` for chunks that carry no text
/// (usage metadata, finish reasons).
fn decode_chunk(payload: &str) -> Result<Option<String>, GeminiError> {
    let chunk: StreamChunk = serde_json::from_str(payload)?;

    if let Some(error) = chunk.error {
        return Err(GeminiError::Service {
            status: error.code,
            message: error.message.unwrap_or_default(),
        });
    }

    let text: String = chunk
        .candidates
        .first()
        .and_then(|candidate| candidate.content.as_ref())
        .map(|content| {
            content
                .parts
                .iter()
                .filter(|part| !part.thought)
                .filter_map(|part| part.text.as_deref())
                .collect()
        })
        .unwrap_or_default();

    if text.is_empty() {
        Ok(None)
    } else {
        Ok(Some(text))
    }
}

/// Incremental `text/event-stream` decoder. Only `data:` fields matter here.
#[derive(Debug, Default)]
struct SseDecoder {
    buffer: Vec<u8>,
    data: String,
}

impl SseDecoder {
    /// Feed raw bytes; returns the data of every event completed by them.
    fn push(&mut self, chunk: &[u8]) -> Vec<String> {
        self.buffer.extend_from_slice(chunk);
        let mut events = Vec::new();

        while let Some(pos) = self.buffer.iter().position(|b| *b == b'\n') {
            let line: Vec<u8> = self.buffer.drain(..=pos).collect();
            let line = String::from_utf8_lossy(&line[..line.len() - 1]);
            self.take_line(line.trim_end_matches('\r'), &mut events);
        }

        events
    }

    /// Flush whatever is left once the body ends.
    fn finish(&mut self) -> Vec<String> {
        let mut events = Vec::new();
        if !self.buffer.is_empty() {
            let rest = std::mem::take(&mut self.buffer);
            let line = String::from_utf8_lossy(&rest);
            self.take_line(line.trim_end_matches('\r'), &mut events);
        }
        if !self.data.is_empty() {
            events.push(std::mem::take(&mut self.data));
        }
        events
    }

    fn take_line(&mut self, line: &str, events: &mut Vec<String>) {
        if line.is_empty() {
            if !self.data.is_empty() {
                events.push(std::mem::take(&mut self.data));
            }
            return;
        }

        if let Some(value) = line.strip_prefix("data:") {
            if !self.data.is_empty() {
                self.data.push('\n');
            }
            self.data.push_str(value.strip_prefix(' ').unwrap_or(value));
        }
    }
}
