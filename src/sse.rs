//! Server-Sent Events (SSE) processing for streamed chat completions.
//!
//! Each event carries a `data:` line with a JSON chunk whose
//! `choices[0].delta.content` holds the next piece of the reply.  The stream
//! ends with `data: [DONE]`.

use bytes::Bytes;
use futures::stream::{self, Stream, StreamExt};
use serde::Deserialize;

use crate::client::ApiErrorBody;
use crate::error::{Error, Result};
use crate::observability::STREAM_FRAGMENTS;

#[derive(Debug, Deserialize)]
struct ChunkEnvelope {
    #[serde(default)]
    choices: Vec<ChunkChoice>,
    error: Option<ApiErrorBody>,
}

#[derive(Debug, Deserialize)]
struct ChunkChoice {
    #[serde(default)]
    delta: ChunkDelta,
}

#[derive(Debug, Default, Deserialize)]
struct ChunkDelta {
    content: Option<String>,
}

#[derive(Debug, PartialEq, Eq)]
enum Frame {
    Text(String),
    Done,
    Skip,
}

struct SseState<S> {
    stream: S,
    buffer: Vec<u8>,
    finished: bool,
}

/// Turn a response byte stream into a stream of reply fragments.
///
/// Empty deltas are skipped.  The stream ends at `[DONE]`, at the end of the
/// body, or after the first error.
pub fn process_sse<S>(byte_stream: S) -> impl Stream<Item = Result<String>>
where
    S: Stream<Item = std::result::Result<Bytes, reqwest::Error>> + Unpin + 'static,
{
    let stream = byte_stream.map(|result| {
        result
            .map_err(|e| Error::streaming(format!("Error in HTTP stream: {e}"), Some(Box::new(e))))
    });
    let state = SseState {
        stream,
        buffer: Vec::new(),
        finished: false,
    };

    stream::unfold(state, |mut state| async move {
        loop {
            if let Some(event) = take_event(&mut state.buffer) {
                match parse_event(&event) {
                    Ok(Frame::Text(text)) => {
                        STREAM_FRAGMENTS.click();
                        return Some((Ok(text), state));
                    }
                    Ok(Frame::Skip) => continue,
                    Ok(Frame::Done) => return None,
                    Err(err) => {
                        state.finished = true;
                        state.buffer.clear();
                        return Some((Err(err), state));
                    }
                }
            }
            if state.finished {
                return None;
            }

            match state.stream.next().await {
                Some(Ok(bytes)) => {
                    state.buffer.extend(bytes.iter().filter(|b| **b != b'\r'));
                }
                Some(Err(e)) => {
                    state.finished = true;
                    state.buffer.clear();
                    return Some((Err(e), state));
                }
                None => {
                    // A body that ends without a blank line still holds one event.
                    state.finished = true;
                    if state.buffer.iter().any(|b| !b.is_ascii_whitespace()) {
                        state.buffer.extend_from_slice(b"\n\n");
                    } else {
                        return None;
                    }
                }
            }
        }
    })
}

/// Remove and return the first complete event from `buffer`.
fn take_event(buffer: &mut Vec<u8>) -> Option<Vec<u8>> {
    let end = buffer.windows(2).position(|window| window == b"\n\n")?;
    let mut event: Vec<u8> = buffer.drain(..end + 2).collect();
    event.truncate(end);
    Some(event)
}

fn parse_event(event: &[u8]) -> Result<Frame> {
    let text = std::str::from_utf8(event).map_err(|e| {
        Error::streaming(format!("Invalid UTF-8 in stream: {e}"), Some(Box::new(e)))
    })?;
    let data: Vec<&str> = text
        .lines()
        .filter_map(|line| line.strip_prefix("data:"))
        .map(|data| data.strip_prefix(' ').unwrap_or(data))
        .collect();
    if data.is_empty() {
        return Ok(Frame::Skip);
    }
    let data = data.join("\n");
    if data.trim() == "[DONE]" {
        return Ok(Frame::Done);
    }

    let chunk: ChunkEnvelope = serde_json::from_str(&data).map_err(|e| {
        Error::serialization(
            format!("Failed to parse stream chunk: {e}"),
            Some(Box::new(e)),
        )
    })?;
    if let Some(error) = chunk.error {
        return Err(Error::completion(error.message, None));
    }
    match chunk
        .choices
        .into_iter()
        .next()
        .and_then(|choice| choice.delta.content)
    {
        Some(content) if !content.is_empty() => Ok(Frame::Text(content)),
        _ => Ok(Frame::Skip),
    }
}
