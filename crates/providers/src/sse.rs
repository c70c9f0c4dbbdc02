//! Server-sent-event framing for streamed chat completions. The framing
//! lives here; payload decoding lives in each adapter's [`SseParser`].

use crate::util::from_reqwest;
use solace_domain::error::Result;
use solace_domain::stream::{BoxStream, StreamEvent};

/// Stateful parser for one SSE response.
pub(crate) trait SseParser: Send + 'static {
    /// Handle one `data:` payload.
    fn parse(&mut self, data: &str) -> Vec<Result<StreamEvent>>;

    /// Called once when the body closes. Flushes anything the parser was
    /// still holding (partially assembled tool calls, a pending `Done`).
    fn finish(&mut self) -> Vec<Result<StreamEvent>> {
        Vec::new()
    }
}

/// Pop every complete event block off `buffer` and return its `data:`
/// payloads. An unterminated trailing block stays in the buffer.
pub(crate) fn drain_data_lines(buffer: &mut String) -> Vec<String> {
    let mut data_lines = Vec::new();

    // Some servers send CRLF framing.
    if buffer.contains('\r') {
        *buffer = buffer.replace("\r\n", "\n");
    }

    while let Some(pos) = buffer.find("\n\n") {
        let block: String = buffer.drain(..pos).collect();
        buffer.drain(..2);

        for line in block.lines() {
            let line = line.trim();
            if let Some(data) = line.strip_prefix("data:") {
                let data = data.trim();
                if !data.is_empty() {
                    data_lines.push(data.to_string());
                }
            }
        }
    }

    data_lines
}

/// Wraps a parser and remembers whether it has produced a terminal
/// `Done`, so the stream can close cleanly when the body ends without one.
struct Tracked<P> {
    parser: P,
    saw_done: bool,
}

impl<P: SseParser> Tracked<P> {
    fn mark(&mut self, events: Vec<Result<StreamEvent>>) -> Vec<Result<StreamEvent>> {
        if events.iter().any(|e| matches!(e, Ok(StreamEvent::Done { .. }))) {
            self.saw_done = true;
        }
        events
    }

    fn feed(&mut self, buffer: &mut String) -> Vec<Result<StreamEvent>> {
        let mut out = Vec::new();
        for data in drain_data_lines(buffer) {
            let events = self.parser.parse(&data);
            out.extend(self.mark(events));
        }
        out
    }

    fn close(&mut self, buffer: &mut String) -> Vec<Result<StreamEvent>> {
        let mut out = Vec::new();
        if !buffer.trim().is_empty() {
            buffer.push_str("\n\n");
            out = self.feed(buffer);
        }
        let tail = self.parser.finish();
        out.extend(self.mark(tail));
        if !self.saw_done {
            out.push(Ok(StreamEvent::Done {
                usage: None,
                finish_reason: Some("stop".into()),
            }));
        }
        out
    }
}

/// Turn an SSE response body into a [`BoxStream`] of parsed events.
///
/// A transport error ends the stream after yielding it. A body that closes
/// without a `Done` gets a synthetic one with `finish_reason = "stop"`.
pub(crate) fn sse_response_stream<P>(
    response: reqwest::Response,
    parser: P,
) -> BoxStream<'static, Result<StreamEvent>>
where
    P: SseParser,
{
    let stream = async_stream::stream! {
        let mut response = response;
        let mut buffer = String::new();
        let mut tracked = Tracked { parser, saw_done: false };

        loop {
            match response.chunk().await {
                Ok(Some(bytes)) => {
                    buffer.push_str(&String::from_utf8_lossy(&bytes));
                    for event in tracked.feed(&mut buffer) {
                        yield event;
                    }
                }
                Ok(None) => {
                    for event in tracked.close(&mut buffer) {
                        yield event;
                    }
                    break;
                }
                Err(e) => {
                    yield Err(from_reqwest(e));
                    break;
                }
            }
        }
    };

    Box::pin(stream)
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Tests
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn completion_chunks_split_across_reads() {
        let mut buf = String::from("data: {\"choices\":[{\"delta\":{\"content\":\"Hi\"}}]}\n\ndata: {\"cho");
        let lines = drain_data_lines(&mut buf);
        assert_eq!(lines.len(), 1);
        assert!(lines[0].contains("\"Hi\""));
        assert_eq!(buf, "data: {\"cho");
    }

    #[test]
    fn drain_ignores_non_data_lines() {
        let mut buf = String::from("event: ping\nid: 42\nretry: 5000\ndata: payload\n\n");
        let lines = drain_data_lines(&mut buf);
        assert_eq!(lines, vec!["payload"]);
    }

    #[test]
    fn drain_accepts_crlf_framing() {
        let mut buf = String::from("data: one\r\n\r\ndata: two\r\n\r\n");
        let lines = drain_data_lines(&mut buf);
        assert_eq!(lines, vec!["one", "two"]);
        assert!(buf.is_empty());
    }

    #[test]
    fn drain_incremental_buffering() {
        let mut buf = String::from("data: chunk1");
        assert!(drain_data_lines(&mut buf).is_empty());

        buf.push_str("\n\ndata: [DONE]\n\n");
        let lines = drain_data_lines(&mut buf);
        assert_eq!(lines, vec!["chunk1", "[DONE]"]);
        assert!(buf.is_empty());
    }

    struct Echo;

    impl SseParser for Echo {
        fn parse(&mut self, data: &str) -> Vec<Result<StreamEvent>> {
            vec![Ok(StreamEvent::Token { text: data.to_owned() })]
        }
    }

    #[test]
    fn close_flushes_tail_and_synthesizes_done() {
        let mut tracked = Tracked { parser: Echo, saw_done: false };
        let mut buf = String::from("data: last");
        let events = tracked.close(&mut buf);
        assert_eq!(events.len(), 2);
        assert!(matches!(&events[0], Ok(StreamEvent::Token { text }) if text == "last"));
        assert!(matches!(&events[1], Ok(StreamEvent::Done { .. })));
    }
}
