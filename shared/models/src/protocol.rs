//! Framing constants for the multiplexed query response stream.
//!
//! A query response is one chunked text body carrying three payloads in
//! order: the JSON source list, the streamed markdown answer, and the JSON
//! related-question list. Two reserved sentinel tokens separate the
//! sections:
//!
//! ```text
//! <sources JSON>  __LLM_RESPONSE__  <answer markdown, growing>  __RELATED_QUESTIONS__  <relates JSON>
//! ```
//!
//! Both sections use a dedicated sentinel; the related section is never
//! located by scanning for a JSON key, which would break the moment the
//! model emits that substring inside the answer itself.

/// Marks the end of the source list and the start of the streamed answer.
pub const LLM_RESPONSE_SENTINEL: &str = "__LLM_RESPONSE__";

/// Marks the end of the answer and the start of the related-question list.
pub const RELATED_QUESTIONS_SENTINEL: &str = "__RELATED_QUESTIONS__";

/// Whitespace padding emitted around sentinels. Parsers must not rely on
/// it being present.
pub const SENTINEL_PADDING: &str = "\n\n";
