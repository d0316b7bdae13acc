//! API Module
//!
//! Chat request/response types, streaming support and SSE encoding.

pub mod completion;
pub mod sse;
pub mod streaming;

pub use completion::{ChatRequest, ChatResponse, Choice, Message, Usage};
pub use sse::{encode_stream, Event};
pub use streaming::{
    parse_sse_line, ChatStream, ChatStreamResponse, MessageDelta, SseData, SseDecoder,
    StreamAccumulator, StreamChoice,
};
