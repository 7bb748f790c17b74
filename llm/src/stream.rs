//! Incremental completion output.
//!
//! A [`CompletionStream`] yields text fragments in arrival order and ends
//! after the provider's end-of-stream marker, a clean end of body, the first
//! error, or cancellation, whichever comes first.

use crate::error::LlmError;
use bytes::Bytes;
use futures::stream::{BoxStream, Stream, StreamExt};
use std::collections::VecDeque;
use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};
use tokio_util::sync::{CancellationToken, WaitForCancellationFutureOwned};

/// Splits a byte stream into lines, keeping partial lines across chunks.
#[derive(Debug, Default)]
pub struct SseLineDecoder {
    buffer: Vec<u8>,
}

impl SseLineDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed a chunk and return every line it completed.
    pub fn push(&mut self, chunk: &[u8]) -> Vec<String> {
        self.buffer.extend_from_slice(chunk);

        let mut lines = Vec::new();
        let mut start = 0;
        while let Some(pos) = self.buffer[start..].iter().position(|&b| b == b'\n') {
            let end = start + pos;
            lines.push(decode_line(&self.buffer[start..end]));
            start = end + 1;
        }
        self.buffer.drain(..start);
        lines
    }

    /// Whatever is left after the last newline.
    pub fn finish(&mut self) -> Option<String> {
        if self.buffer.is_empty() {
            return None;
        }
        let line = decode_line(&self.buffer);
        self.buffer.clear();
        Some(line)
    }
}

// Decoding per line keeps multi-byte characters intact when a chunk boundary
// falls inside one.
fn decode_line(bytes: &[u8]) -> String {
    let line = String::from_utf8_lossy(bytes);
    line.strip_suffix('\r').unwrap_or(&line).to_string()
}

#[derive(Debug, PartialEq, Eq)]
pub enum SseLine<'a> {
    Data(&'a str),
    Done,
    /// Blank lines, comments, `event:`/`id:` fields
    Ignored,
}

pub fn parse_sse_line(line: &str) -> SseLine<'_> {
    let Some(data) = line.trim().strip_prefix("data:") else {
        return SseLine::Ignored;
    };
    match data.trim() {
        "[DONE]" => SseLine::Done,
        "" => SseLine::Ignored,
        data => SseLine::Data(data),
    }
}

/// What a provider made of one `data:` payload.
#[derive(Debug)]
pub enum Frame {
    Text(String),
    /// Malformed or content-free frame
    Skip,
    /// Provider reported a failure mid-stream
    Error(LlmError),
}

struct SseState<F> {
    bytes: BoxStream<'static, Result<Bytes, LlmError>>,
    decoder: SseLineDecoder,
    parse: F,
    pending: VecDeque<Result<String, LlmError>>,
    done: bool,
}

impl<F> SseState<F>
where
    F: FnMut(&str) -> Frame,
{
    fn handle_line(&mut self, line: &str) {
        if self.done {
            return;
        }
        match parse_sse_line(line) {
            SseLine::Done => self.done = true,
            SseLine::Ignored => {}
            SseLine::Data(data) => match (self.parse)(data) {
                Frame::Text(text) if !text.is_empty() => self.pending.push_back(Ok(text)),
                Frame::Text(_) | Frame::Skip => {}
                Frame::Error(e) => {
                    self.pending.push_back(Err(e));
                    self.done = true;
                }
            },
        }
    }
}

/// Idempotent cancellation for one [`CompletionStream`].
#[derive(Clone, Debug)]
pub struct CancelHandle {
    token: CancellationToken,
}

impl CancelHandle {
    /// Stop the stream. Safe to call repeatedly and after completion.
    pub fn cancel(&self) {
        self.token.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }
}

pub struct CompletionStream {
    inner: Option<BoxStream<'static, Result<String, LlmError>>>,
    token: CancellationToken,
    cancelled: Pin<Box<WaitForCancellationFutureOwned>>,
}

impl CompletionStream {
    /// Wrap a fragment stream. The wrapper ends it after its first error.
    pub fn new(inner: impl Stream<Item = Result<String, LlmError>> + Send + 'static) -> Self {
        let token = CancellationToken::new();
        let cancelled = Box::pin(token.clone().cancelled_owned());
        Self {
            inner: Some(inner.boxed()),
            token,
            cancelled,
        }
    }

    /// Decode a server-sent-events body. `parse` turns each `data:` payload
    /// into a [`Frame`].
    pub fn from_sse<S, E, F>(bytes: S, parse: F) -> Self
    where
        S: Stream<Item = Result<Bytes, E>> + Send + 'static,
        E: Into<LlmError>,
        F: FnMut(&str) -> Frame + Send + 'static,
    {
        let state = SseState {
            bytes: bytes.map(|chunk| chunk.map_err(Into::into)).boxed(),
            decoder: SseLineDecoder::new(),
            parse,
            pending: VecDeque::new(),
            done: false,
        };

        let fragments = futures::stream::unfold(state, |mut state| async move {
            loop {
                if let Some(item) = state.pending.pop_front() {
                    return Some((item, state));
                }
                if state.done {
                    return None;
                }
                match state.bytes.next().await {
                    Some(Ok(chunk)) => {
                        for line in state.decoder.push(&chunk) {
                            state.handle_line(&line);
                        }
                    }
                    Some(Err(e)) => {
                        state.pending.push_back(Err(e));
                        state.done = true;
                    }
                    None => {
                        if let Some(line) = state.decoder.finish() {
                            state.handle_line(&line);
                        }
                        state.done = true;
                    }
                }
            }
        });

        Self::new(fragments)
    }

    pub fn cancel_handle(&self) -> CancelHandle {
        CancelHandle {
            token: self.token.clone(),
        }
    }

    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }

    /// Drain the stream into one string.
    pub async fn collect_text(mut self) -> Result<String, LlmError> {
        let mut text = String::new();
        while let Some(fragment) = self.next().await {
            text.push_str(&fragment?);
        }
        Ok(text)
    }
}

impl Stream for CompletionStream {
    type Item = Result<String, LlmError>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = &mut *self;
        let Some(inner) = this.inner.as_mut() else {
            return Poll::Ready(None);
        };

        if this.cancelled.as_mut().poll(cx).is_ready() {
            // Dropping the body closes the connection.
            this.inner = None;
            return Poll::Ready(None);
        }

        match inner.poll_next_unpin(cx) {
            Poll::Ready(Some(Ok(text))) => Poll::Ready(Some(Ok(text))),
            Poll::Ready(Some(Err(e))) => {
                this.inner = None;
                Poll::Ready(Some(Err(e)))
            }
            Poll::Ready(None) => {
                this.inner = None;
                Poll::Ready(None)
            }
            Poll::Pending => Poll::Pending,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::stream;
    use serde_json::Value;
    use std::time::Duration;

    fn text_frame(data: &str) -> Frame {
        match serde_json::from_str::<Value>(data) {
            Ok(value) => match value.get("error") {
                Some(error) => Frame::Error(LlmError::from_error_value(error, None)),
                None => Frame::Text(value["t"].as_str().unwrap_or_default().to_string()),
            },
            Err(_) => Frame::Skip,
        }
    }

    fn body(chunks: &[&str]) -> impl Stream<Item = Result<Bytes, std::io::Error>> + Send + 'static {
        let chunks: Vec<_> = chunks
            .iter()
            .map(|c| Ok(Bytes::from(c.to_string())))
            .collect();
        stream::iter(chunks)
    }

    async fn collect(stream: CompletionStream) -> Vec<Result<String, LlmError>> {
        stream.collect().await
    }

    #[test]
    fn test_decoder_split_across_chunks() {
        let mut decoder = SseLineDecoder::new();
        assert!(decoder.push(b"data: {\"t\":\"he").is_empty());
        assert_eq!(decoder.push(b"llo\"}\r\ndata: x\n"), vec!["data: {\"t\":\"hello\"}", "data: x"]);
        assert_eq!(decoder.finish(), None);
    }

    #[test]
    fn test_decoder_multibyte_boundary() {
        let line = "data: é\n".as_bytes();
        let (a, b) = line.split_at(7);
        let mut decoder = SseLineDecoder::new();
        assert!(decoder.push(a).is_empty());
        assert_eq!(decoder.push(b), vec!["data: é"]);
    }

    #[test]
    fn test_decoder_keeps_trailing_partial_line() {
        let mut decoder = SseLineDecoder::new();
        decoder.push(b"data: one\ndata: tw");
        assert_eq!(decoder.finish().as_deref(), Some("data: tw"));
        assert_eq!(decoder.finish(), None);
    }

    #[test]
    fn test_parse_sse_line() {
        assert_eq!(parse_sse_line("data: {\"a\":1}"), SseLine::Data("{\"a\":1}"));
        assert_eq!(parse_sse_line("data:{\"a\":1}"), SseLine::Data("{\"a\":1}"));
        assert_eq!(parse_sse_line("data: [DONE]"), SseLine::Done);
        assert_eq!(parse_sse_line(": OPENROUTER PROCESSING"), SseLine::Ignored);
        assert_eq!(parse_sse_line(""), SseLine::Ignored);
        assert_eq!(parse_sse_line("event: message"), SseLine::Ignored);
    }

    #[tokio::test]
    async fn test_fragments_in_order() {
        let stream = CompletionStream::from_sse(
            body(&[
                ": OPENROUTER PROCESSING\n\n",
                "data: {\"t\":\"Hi\"}\n\ndata: {\"t\":\" th",
                "ere\"}\n\ndata: {\"t\":\"!\"}\n\ndata: [DONE]\n\n",
            ]),
            text_frame,
        );
        let text = stream.collect_text().await.unwrap();
        assert_eq!(text, "Hi there!");
    }

    #[tokio::test]
    async fn test_malformed_frames_skipped() {
        let stream = CompletionStream::from_sse(
            body(&["data: {\"t\":\"a\"}\ndata: {broken\ndata: {\"t\":\"b\"}\ndata: [DONE]\n"]),
            text_frame,
        );
        let items = collect(stream).await;
        let texts: Vec<_> = items.into_iter().map(|i| i.unwrap()).collect();
        assert_eq!(texts, vec!["a", "b"]);
    }

    #[tokio::test]
    async fn test_nothing_after_done() {
        let stream = CompletionStream::from_sse(
            body(&["data: {\"t\":\"a\"}\ndata: [DONE]\ndata: {\"t\":\"late\"}\n"]),
            text_frame,
        );
        assert_eq!(stream.collect_text().await.unwrap(), "a");
    }

    #[tokio::test]
    async fn test_end_of_body_without_done() {
        let stream = CompletionStream::from_sse(body(&["data: {\"t\":\"a\"}\ndata: {\"t\":\"b\"}"]), text_frame);
        assert_eq!(stream.collect_text().await.unwrap(), "ab");
    }

    #[tokio::test]
    async fn test_error_frame_ends_stream() {
        let stream = CompletionStream::from_sse(
            body(&[
                "data: {\"t\":\"a\"}\n",
                "data: {\"error\":{\"message\":\"overloaded\"}}\n",
                "data: {\"t\":\"b\"}\n",
            ]),
            text_frame,
        );
        let items = collect(stream).await;
        assert_eq!(items.len(), 2);
        assert_eq!(items[0].as_ref().unwrap(), "a");
        assert!(items[1].is_err());
    }

    #[tokio::test]
    async fn test_transport_error_yields_once() {
        let chunks: Vec<Result<Bytes, std::io::Error>> = vec![
            Ok(Bytes::from("data: {\"t\":\"a\"}\n")),
            Err(std::io::Error::other("reset")),
            Ok(Bytes::from("data: {\"t\":\"b\"}\n")),
        ];
        let items = collect(CompletionStream::from_sse(stream::iter(chunks), text_frame)).await;
        assert_eq!(items.len(), 2);
        assert!(matches!(items[1], Err(LlmError::Io(_))));
    }

    #[tokio::test]
    async fn test_inner_errors_end_wrapper() {
        let inner = stream::iter(vec![
            Ok("a".to_string()),
            Err(LlmError::Stream("first".into())),
            Err(LlmError::Stream("second".into())),
        ]);
        let items = collect(CompletionStream::new(inner)).await;
        assert_eq!(items.len(), 2);
    }

    #[tokio::test]
    async fn test_cancel_before_poll() {
        let stream = CompletionStream::new(stream::iter(vec![Ok("a".to_string())]));
        let handle = stream.cancel_handle();
        handle.cancel();
        handle.cancel();
        assert!(collect(stream).await.is_empty());
    }

    #[tokio::test]
    async fn test_cancel_wakes_pending_consumer() {
        let inner = stream::iter(vec![Ok("a".to_string())]).chain(stream::pending());
        let mut stream = CompletionStream::new(inner);
        let handle = stream.cancel_handle();

        assert_eq!(stream.next().await.unwrap().unwrap(), "a");
        let canceller = tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(10)).await;
            handle.cancel();
        });
        let next = tokio::time::timeout(Duration::from_secs(5), stream.next()).await;
        assert!(matches!(next, Ok(None)));
        assert!(stream.is_cancelled());
        canceller.await.unwrap();
    }

    #[tokio::test]
    async fn test_cancel_after_completion_is_noop() {
        let mut stream = CompletionStream::new(stream::iter(vec![Ok("a".to_string())]));
        let handle = stream.cancel_handle();
        assert!(stream.next().await.is_some());
        assert!(stream.next().await.is_none());
        handle.cancel();
        assert!(stream.next().await.is_none());
    }
}
