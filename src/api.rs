use crate::aggregator::SourceSet;
use crate::error::ServiceError;
use crate::models::GroundingSource;
use crate::prompt::ContentPart;
use crate::router::{RequestConfig, Tool};
use async_trait::async_trait;
use base64::Engine;
use eventsource_stream::{EventStreamError, Eventsource};
use futures::{Stream, StreamExt};
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use std::pin::Pin;
use std::time::Duration;

// Alias for the stream of response fragments we hand to the aggregator
pub type FragmentStream = Pin<Box<dyn Stream<Item = Result<Fragment, ServiceError>> + Send>>;

#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ContentRole {
    User,
    Model,
}

// One turn of request content
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Content {
    pub role: ContentRole,
    pub parts: Vec<ContentPart>,
}

impl Content {
    pub fn user(parts: Vec<ContentPart>) -> Self {
        Self { role: ContentRole::User, parts }
    }

    pub fn model_text(text: impl Into<String>) -> Self {
        Self {
            role: ContentRole::Model,
            parts: vec![ContentPart::text(text)],
        }
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ServiceRequest {
    pub contents: Vec<Content>,
    pub config: RequestConfig,
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ServiceResponse {
    pub text: String,
    pub sources: Vec<GroundingSource>,
}

/// One incremental piece of a streamed reply.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Fragment {
    pub text: String,
    pub sources: Vec<GroundingSource>,
}

impl Fragment {
    pub fn text(text: impl Into<String>) -> Self {
        Self { text: text.into(), sources: Vec::new() }
    }
}

// Trait defining the interface to the hosted generative-language service
#[async_trait]
pub trait GenerativeApiProvider: Send + Sync {
    async fn send_one_shot(&self, model: &str, request: &ServiceRequest) -> Result<ServiceResponse, ServiceError>;

    // Returns a stream of response fragments.
    async fn send_streaming(&self, model: &str, request: &ServiceRequest) -> Result<FragmentStream, ServiceError>;
}

/// Pull-based view over a [`FragmentStream`] that can be abandoned early.
pub struct ResponseStream {
    inner: Option<FragmentStream>,
}

impl ResponseStream {
    pub fn new(stream: FragmentStream) -> Self {
        Self { inner: Some(stream) }
    }

    /// Next fragment, or `None` once the stream ended or was abandoned.
    pub async fn next(&mut self) -> Option<Result<Fragment, ServiceError>> {
        let stream = self.inner.as_mut()?;
        let item = stream.next().await;
        if item.is_none() {
            self.inner = None;
        }
        item
    }

    /// Drops the underlying stream; later calls to `next` return `None`.
    pub fn abandon(&mut self) {
        if self.inner.take().is_some() {
            log::debug!("Response stream abandoned before completion");
        }
    }

    pub fn is_finished(&self) -> bool {
        self.inner.is_none()
    }
}

// --- Gemini Provider Implementation ---

#[derive(Serialize, Debug)]
#[serde(rename_all = "camelCase")]
struct GeminiRequestBody {
    contents: Vec<GeminiContent>,
    #[serde(skip_serializing_if = "Option::is_none")]
    system_instruction: Option<GeminiContent>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    tools: Vec<GeminiTool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    generation_config: Option<GenerationConfig>,
}

#[derive(Serialize, Debug)]
struct GeminiContent {
    #[serde(skip_serializing_if = "Option::is_none")]
    role: Option<ContentRole>,
    parts: Vec<GeminiPart>,
}

#[derive(Serialize, Debug)]
#[serde(rename_all = "camelCase")]
struct GeminiPart {
    #[serde(skip_serializing_if = "Option::is_none")]
    text: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    inline_data: Option<InlineData>,
}

#[derive(Serialize, Debug)]
#[serde(rename_all = "camelCase")]
struct InlineData {
    mime_type: String,
    data: String, // base64
}

#[derive(Serialize, Debug)]
#[serde(rename_all = "camelCase")]
struct GeminiTool {
    google_search: GoogleSearch,
}

#[derive(Serialize, Debug)]
struct GoogleSearch {}

#[derive(Serialize, Debug)]
#[serde(rename_all = "camelCase")]
struct GenerationConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    thinking_config: Option<ThinkingConfig>,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_output_tokens: Option<u32>,
}

#[derive(Serialize, Debug)]
#[serde(rename_all = "camelCase")]
struct ThinkingConfig {
    thinking_budget: u32,
}

// Response structure, shared by one-shot replies and streamed chunks
#[derive(Deserialize, Debug, Default)]
#[serde(rename_all = "camelCase")]
struct GeminiResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
}

#[derive(Deserialize, Debug)]
#[serde(rename_all = "camelCase")]
struct Candidate {
    content: Option<CandidateContent>,
    grounding_metadata: Option<GroundingMetadata>,
}

#[derive(Deserialize, Debug)]
struct CandidateContent {
    #[serde(default)]
    parts: Vec<ResponsePart>,
}

#[derive(Deserialize, Debug)]
struct ResponsePart {
    text: Option<String>,
    // Reasoning summaries are not part of the visible answer
    #[serde(default)]
    thought: bool,
}

#[derive(Deserialize, Debug)]
#[serde(rename_all = "camelCase")]
struct GroundingMetadata {
    #[serde(default)]
    grounding_chunks: Vec<GroundingChunk>,
}

#[derive(Deserialize, Debug)]
struct GroundingChunk {
    web: Option<WebChunk>,
}

#[derive(Deserialize, Debug)]
struct WebChunk {
    uri: Option<String>,
    title: Option<String>,
}

impl GeminiResponse {
    fn text(&self) -> String {
        self.candidates
            .first()
            .and_then(|c| c.content.as_ref())
            .map(|content| {
                content
                    .parts
                    .iter()
                    .filter(|p| !p.thought)
                    .filter_map(|p| p.text.as_deref())
                    .collect::<String>()
            })
            .unwrap_or_default()
    }

    fn sources(&self) -> Vec<GroundingSource> {
        let Some(metadata) = self.candidates.first().and_then(|c| c.grounding_metadata.as_ref()) else {
            return Vec::new();
        };
        metadata
            .grounding_chunks
            .iter()
            .filter_map(|chunk| chunk.web.as_ref())
            .filter_map(|web| {
                let uri = web.uri.clone().filter(|u| !u.is_empty())?;
                Some(GroundingSource {
                    title: web.title.clone().unwrap_or_else(|| uri.clone()),
                    uri,
                })
            })
            .collect()
    }
}

fn to_gemini_parts(parts: &[ContentPart]) -> Vec<GeminiPart> {
    parts
        .iter()
        .map(|part| match part {
            ContentPart::Text(text) => GeminiPart { text: Some(text.clone()), inline_data: None },
            ContentPart::InlineData { mime_type, data } => GeminiPart {
                text: None,
                inline_data: Some(InlineData {
                    mime_type: mime_type.clone(),
                    data: base64::engine::general_purpose::STANDARD.encode(data),
                }),
            },
        })
        .collect()
}

fn build_request_body(request: &ServiceRequest) -> GeminiRequestBody {
    let config = &request.config;
    let generation_config = if config.reasoning_budget.is_some() || config.max_output_tokens.is_some() {
        Some(GenerationConfig {
            thinking_config: config.reasoning_budget.map(|thinking_budget| ThinkingConfig { thinking_budget }),
            max_output_tokens: config.max_output_tokens,
        })
    } else {
        None
    };

    GeminiRequestBody {
        contents: request
            .contents
            .iter()
            .map(|c| GeminiContent { role: Some(c.role), parts: to_gemini_parts(&c.parts) })
            .collect(),
        system_instruction: config.system_instruction.as_ref().map(|instruction| GeminiContent {
            role: None,
            parts: vec![GeminiPart { text: Some(instruction.clone()), inline_data: None }],
        }),
        tools: config
            .tools
            .iter()
            .map(|tool| match tool {
                Tool::SearchGrounding => GeminiTool { google_search: GoogleSearch {} },
            })
            .collect(),
        generation_config,
    }
}

fn parse_stream_chunk(event_data: &str) -> Result<Fragment, ServiceError> {
    let chunk: GeminiResponse = serde_json::from_str(event_data).map_err(|e| {
        log::warn!("Failed to parse stream chunk as JSON: {} - Data: {}", e, event_data);
        ServiceError::MalformedFragment(format!("{}: {}", e, event_data))
    })?;
    Ok(Fragment { text: chunk.text(), sources: chunk.sources() })
}

fn status_error(status: StatusCode, body: String) -> ServiceError {
    let message = format!("status {}: {}", status, body);
    if status == StatusCode::REQUEST_TIMEOUT || status == StatusCode::GATEWAY_TIMEOUT {
        ServiceError::Timeout(message)
    } else if status.is_client_error() {
        ServiceError::RequestRejected(message)
    } else {
        ServiceError::ServiceUnavailable(message)
    }
}

pub struct GeminiProvider {
    client: Client,
    api_url: String,
    api_key: String,
    timeout: Duration,
}

impl GeminiProvider {
    /// `timeout` bounds connecting and each wait for data. Streamed replies may
    /// run longer as long as bytes keep arriving; one-shot calls are also
    /// bounded as a whole.
    pub fn new(api_url: impl Into<String>, api_key: impl Into<String>, timeout: Duration) -> Result<Self, ServiceError> {
        let client = Client::builder().connect_timeout(timeout).read_timeout(timeout).build()?;
        Ok(Self {
            client,
            api_url: api_url.into().trim_end_matches('/').to_string(),
            api_key: api_key.into(),
            timeout,
        })
    }

    async fn post(
        &self,
        url: &str,
        request: &ServiceRequest,
        total_timeout: Option<Duration>,
    ) -> Result<reqwest::Response, ServiceError> {
        request.config.validate()?;
        let body = build_request_body(request);

        let mut builder = self.client.post(url).header("x-goog-api-key", &self.api_key).json(&body);
        if let Some(total) = total_timeout {
            builder = builder.timeout(total);
        }
        let response = builder
            .send()
            .await
            .map_err(|e| {
                log::error!("Failed to send request to {}: {:?}", url, e);
                ServiceError::from(e)
            })?;

        if !response.status().is_success() {
            let status = response.status();
            let error_body = response.text().await.unwrap_or_else(|_| "<Failed to read error body>".to_string());
            log::error!("Generative API request failed with status {}: {}", status, error_body);
            return Err(status_error(status, error_body));
        }
        Ok(response)
    }
}

#[async_trait]
impl GenerativeApiProvider for GeminiProvider {
    async fn send_one_shot(&self, model: &str, request: &ServiceRequest) -> Result<ServiceResponse, ServiceError> {
        let url = format!("{}/models/{}:generateContent", self.api_url, model);
        log::info!("Sending one-shot request using model: {}", model);

        let response = self.post(&url, request, Some(self.timeout)).await?;
        let parsed: GeminiResponse = response.json().await?;

        let mut sources = SourceSet::default();
        sources.extend_new(parsed.sources());
        Ok(ServiceResponse { text: parsed.text(), sources: sources.into_vec() })
    }

    async fn send_streaming(&self, model: &str, request: &ServiceRequest) -> Result<FragmentStream, ServiceError> {
        let url = format!("{}/models/{}:streamGenerateContent?alt=sse", self.api_url, model);
        log::info!("Sending STREAM request using model: {}", model);

        let response = self.post(&url, request, None).await?;

        // Process the SSE stream
        let fragment_stream = response.bytes_stream().eventsource().filter_map(|event_result| async move {
            match event_result {
                Ok(event) => {
                    let event_data = event.data.trim();
                    if event_data.is_empty() {
                        return None;
                    }
                    Some(parse_stream_chunk(event_data))
                }
                Err(EventStreamError::Transport(e)) => {
                    log::error!("Error reading stream event: {:?}", e);
                    Some(Err(ServiceError::from(e)))
                }
                Err(e) => Some(Err(ServiceError::MalformedFragment(e.to_string()))),
            }
        });

        // Box the stream
        Ok(Box::pin(fragment_stream))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::aggregator::{aggregate, AggregateStatus};
    use crate::router::REASONING_BUDGET;
    use futures::stream;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    // Reads one HTTP request (headers plus Content-Length body) off the socket
    async fn read_request(socket: &mut tokio::net::TcpStream) {
        let mut buf = Vec::new();
        let mut chunk = [0u8; 4096];
        loop {
            let n = socket.read(&mut chunk).await.unwrap();
            if n == 0 {
                return;
            }
            buf.extend_from_slice(&chunk[..n]);
            let Some(end) = buf.windows(4).position(|w| w == b"\r\n\r\n") else {
                continue;
            };
            let headers = String::from_utf8_lossy(&buf[..end]).to_ascii_lowercase();
            let content_length = headers
                .lines()
                .find_map(|l| l.strip_prefix("content-length:"))
                .and_then(|v| v.trim().parse::<usize>().ok())
                .unwrap_or(0);
            if buf.len() >= end + 4 + content_length {
                return;
            }
        }
    }

    #[test]
    fn request_body_orders_parts_and_sets_tools() {
        let request = ServiceRequest {
            contents: vec![Content::user(vec![
                ContentPart::InlineData { mime_type: "image/png".to_string(), data: vec![1, 2, 3] },
                ContentPart::text("describe"),
            ])],
            config: RequestConfig {
                system_instruction: Some("be brief".to_string()),
                tools: vec![Tool::SearchGrounding],
                ..Default::default()
            },
        };
        let json = serde_json::to_value(build_request_body(&request)).unwrap();
        assert_eq!(json["contents"][0]["role"], "user");
        assert_eq!(json["contents"][0]["parts"][0]["inlineData"]["mimeType"], "image/png");
        assert_eq!(json["contents"][0]["parts"][0]["inlineData"]["data"], "AQID");
        assert_eq!(json["contents"][0]["parts"][1]["text"], "describe");
        assert_eq!(json["systemInstruction"]["parts"][0]["text"], "be brief");
        assert!(json["tools"][0]["googleSearch"].is_object());
        assert!(json.get("generationConfig").is_none());
    }

    #[test]
    fn request_body_carries_reasoning_budget() {
        let request = ServiceRequest {
            contents: vec![Content::user(vec![ContentPart::text("why")])],
            config: RequestConfig { reasoning_budget: Some(REASONING_BUDGET), ..Default::default() },
        };
        let json = serde_json::to_value(build_request_body(&request)).unwrap();
        assert_eq!(json["generationConfig"]["thinkingConfig"]["thinkingBudget"], REASONING_BUDGET);
        assert!(json["generationConfig"].get("maxOutputTokens").is_none());
        assert!(json.get("tools").is_none());
    }

    #[test]
    fn chunk_parsing_extracts_text_and_sources() {
        let data = r#"{"candidates":[{"content":{"parts":[{"text":"plan","thought":true},{"text":"Hello "},{"text":"world"}]},
            "groundingMetadata":{"groundingChunks":[{"web":{"uri":"https://a.example","title":"A"}},{"web":{"title":"no uri"}},{}]}}]}"#;
        let fragment = parse_stream_chunk(data).unwrap();
        assert_eq!(fragment.text, "Hello world");
        assert_eq!(
            fragment.sources,
            vec![GroundingSource { title: "A".to_string(), uri: "https://a.example".to_string() }]
        );
    }

    #[test]
    fn chunk_without_candidates_is_empty() {
        let fragment = parse_stream_chunk(r#"{"usageMetadata":{}}"#).unwrap();
        assert_eq!(fragment, Fragment::default());
    }

    #[test]
    fn garbage_chunk_is_malformed() {
        let err = parse_stream_chunk("not json").unwrap_err();
        assert!(err.is_malformed_fragment());
    }

    #[test]
    fn status_mapping() {
        assert!(matches!(status_error(StatusCode::BAD_REQUEST, String::new()), ServiceError::RequestRejected(_)));
        assert!(matches!(status_error(StatusCode::GATEWAY_TIMEOUT, String::new()), ServiceError::Timeout(_)));
        assert!(matches!(
            status_error(StatusCode::SERVICE_UNAVAILABLE, String::new()),
            ServiceError::ServiceUnavailable(_)
        ));
    }

    #[tokio::test]
    async fn slow_stream_outlives_the_timeout_while_data_keeps_arriving() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let server = tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            read_request(&mut socket).await;
            socket
                .write_all(b"HTTP/1.1 200 OK\r\ncontent-type: text/event-stream\r\nconnection: close\r\n\r\n")
                .await
                .unwrap();
            for i in 0..6 {
                tokio::time::sleep(Duration::from_millis(300)).await;
                let event = format!("data: {{\"candidates\":[{{\"content\":{{\"parts\":[{{\"text\":\"p{i} \"}}]}}}}]}}\n\n");
                socket.write_all(event.as_bytes()).await.unwrap();
            }
            socket.shutdown().await.unwrap();
        });

        let provider = GeminiProvider::new(format!("http://{addr}"), "test-key", Duration::from_secs(1)).unwrap();
        let request = ServiceRequest {
            contents: vec![Content::user(vec![ContentPart::text("long answer")])],
            config: RequestConfig::default(),
        };
        let fragments = provider.send_streaming("test-model", &request).await.unwrap();
        let outcome = aggregate(ResponseStream::new(fragments), |_| {}).await;

        assert_eq!(outcome.status, AggregateStatus::Completed);
        assert_eq!(outcome.text, "p0 p1 p2 p3 p4 p5 ");
        server.await.unwrap();
    }

    #[tokio::test]
    async fn response_stream_stops_after_abandon() {
        let inner: FragmentStream = Box::pin(stream::iter(vec![
            Ok(Fragment::text("a")),
            Ok(Fragment::text("b")),
        ]));
        let mut stream = ResponseStream::new(inner);
        assert_eq!(stream.next().await.unwrap().unwrap().text, "a");
        stream.abandon();
        assert!(stream.is_finished());
        assert!(stream.next().await.is_none());
    }

    #[tokio::test]
    async fn response_stream_finishes_on_exhaustion() {
        let inner: FragmentStream = Box::pin(stream::iter(vec![Ok(Fragment::text("only"))]));
        let mut stream = ResponseStream::new(inner);
        assert!(stream.next().await.is_some());
        assert!(stream.next().await.is_none());
        assert!(stream.is_finished());
    }
}
