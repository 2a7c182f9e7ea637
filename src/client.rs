use std::env;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderValue};
use reqwest::{Client as ReqwestClient, Response, header};
use serde::Deserialize;
use url::Url;

use crate::completion::{Completion, CompletionRequest, TextStream};
use crate::error::{Error, Result};
use crate::observability::{COMPLETION_DURATION, COMPLETION_ERRORS, COMPLETION_REQUESTS};
use crate::sse::process_sse;

/// Base URL used when neither an option nor `CONFAB_BASE_URL` is given.
pub const DEFAULT_API_URL: &str = "https://api.openai.com/v1/";

/// Environment variables consulted for the API key, in order.
pub const API_KEY_VARS: [&str; 2] = ["CONFAB_API_KEY", "OPENAI_API_KEY"];

/// Environment variable that overrides the base URL.
pub const BASE_URL_VAR: &str = "CONFAB_BASE_URL";

const DEFAULT_TIMEOUT: Duration = Duration::from_secs(120);

/// Error object returned by the API in error responses and stream chunks.
#[derive(Debug, Clone, Deserialize)]
pub(crate) struct ApiErrorBody {
    pub message: String,
}

#[derive(Debug, Deserialize)]
struct ErrorResponse {
    error: Option<ApiErrorBody>,
}

#[derive(Debug, Deserialize)]
struct ChatCompletion {
    #[serde(default)]
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChoiceMessage,
}

#[derive(Debug, Deserialize)]
struct ChoiceMessage {
    content: Option<String>,
}

/// Client for OpenAI-compatible chat-completions APIs.
#[derive(Debug, Clone)]
pub struct OpenAiClient {
    api_key: String,
    client: ReqwestClient,
    base_url: Url,
    timeout: Duration,
}

impl OpenAiClient {
    /// Create a new client.
    ///
    /// The API key can be provided directly or read from `CONFAB_API_KEY`,
    /// falling back to `OPENAI_API_KEY`.
    pub fn new(api_key: Option<String>) -> Result<Self> {
        Self::with_options(api_key, None, None)
    }

    /// Create a new client with custom settings.
    ///
    /// Without an explicit base URL, `CONFAB_BASE_URL` is consulted before the
    /// default.
    pub fn with_options(
        api_key: Option<String>,
        base_url: Option<String>,
        timeout: Option<Duration>,
    ) -> Result<Self> {
        let api_key = match api_key {
            Some(key) => key,
            None => API_KEY_VARS
                .iter()
                .find_map(|var| env::var(var).ok().filter(|key| !key.trim().is_empty()))
                .ok_or_else(|| {
                    Error::authentication(
                        "API key not provided and neither CONFAB_API_KEY nor OPENAI_API_KEY is set",
                    )
                })?,
        };

        let base_url = base_url
            .or_else(|| env::var(BASE_URL_VAR).ok())
            .unwrap_or_else(|| DEFAULT_API_URL.to_string());
        let base_url = parse_base_url(&base_url)?;

        let timeout = timeout.unwrap_or(DEFAULT_TIMEOUT);
        let client = ReqwestClient::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| Error::completion(format!("Failed to build HTTP client: {e}"), None))?;

        Ok(Self {
            api_key,
            client,
            base_url,
            timeout,
        })
    }

    /// The base URL requests are sent under.
    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    fn endpoint(&self) -> Result<Url> {
        Ok(self.base_url.join("chat/completions")?)
    }

    fn default_headers(&self) -> Result<HeaderMap> {
        let mut headers = HeaderMap::new();
        headers.insert(
            header::CONTENT_TYPE,
            HeaderValue::from_static("application/json"),
        );
        headers.insert(header::ACCEPT, HeaderValue::from_static("application/json"));
        let bearer = HeaderValue::from_str(&format!("Bearer {}", self.api_key))
            .map_err(|_| Error::authentication("API key contains invalid header characters"))?;
        headers.insert(header::AUTHORIZATION, bearer);
        Ok(headers)
    }

    async fn post(&self, request: &CompletionRequest, headers: HeaderMap) -> Result<Response> {
        COMPLETION_REQUESTS.click();
        let response = self
            .client
            .post(self.endpoint()?)
            .headers(headers)
            .json(request)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    Error::completion(
                        format!(
                            "Request timed out after {:.0}s: {e}",
                            self.timeout.as_secs_f64()
                        ),
                        None,
                    )
                } else if e.is_connect() {
                    Error::completion(format!("Connection error: {e}"), None)
                } else {
                    Error::completion(format!("Request failed: {e}"), None)
                }
            })?;

        if !response.status().is_success() {
            return Err(process_error_response(response).await);
        }
        Ok(response)
    }
}

#[async_trait]
impl Completion for OpenAiClient {
    async fn complete(&self, request: &CompletionRequest) -> Result<String> {
        let start = Instant::now();
        let mut request = request.clone();
        request.stream = false;

        let result = async {
            let response = self.post(&request, self.default_headers()?).await?;
            let completion = response.json::<ChatCompletion>().await.map_err(|e| {
                Error::serialization(format!("Failed to parse response: {e}"), Some(Box::new(e)))
            })?;
            completion
                .choices
                .into_iter()
                .next()
                .map(|choice| choice.message.content.unwrap_or_default())
                .ok_or_else(|| Error::completion("response contained no choices", None))
        }
        .await;

        COMPLETION_DURATION.add(start.elapsed().as_secs_f64());
        if let Err(err) = &result {
            COMPLETION_ERRORS.click();
            tracing::error!(error = %err, model = %request.model, "completion failed");
        }
        result
    }

    async fn stream(&self, request: &CompletionRequest) -> Result<TextStream> {
        let mut request = request.clone();
        request.stream = true;

        let mut headers = self.default_headers()?;
        headers.insert(
            header::ACCEPT,
            HeaderValue::from_static("text/event-stream"),
        );
        let response = match self.post(&request, headers).await {
            Ok(response) => response,
            Err(err) => {
                COMPLETION_ERRORS.click();
                tracing::error!(error = %err, model = %request.model, "completion stream failed");
                return Err(err);
            }
        };

        Ok(Box::pin(process_sse(response.bytes_stream())))
    }
}

fn parse_base_url(base_url: &str) -> Result<Url> {
    let mut url = Url::parse(base_url)?;
    if !url.path().ends_with('/') {
        let path = format!("{}/", url.path());
        url.set_path(&path);
    }
    Ok(url)
}

/// Process API response errors and convert to our Error type.
async fn process_error_response(response: Response) -> Error {
    let status_code = response.status().as_u16();
    match response.text().await {
        Ok(body) => error_from_body(status_code, &body),
        Err(e) => Error::completion(format!("Failed to read error response: {e}"), Some(status_code)),
    }
}

fn error_from_body(status_code: u16, body: &str) -> Error {
    let message = serde_json::from_str::<ErrorResponse>(body)
        .ok()
        .and_then(|response| response.error)
        .map(|error| error.message)
        .unwrap_or_else(|| body.trim().to_string());
    match status_code {
        401 => Error::authentication(message),
        _ => Error::completion(message, Some(status_code)),
    }
}
