//! Prompt construction for the answer and related-question calls.

use once_cell::sync::Lazy;
use regex::Regex;
use searchhub_models::Source;

/// Sequences that should terminate answer generation; models occasionally
/// try to append a reference section or an end-of-turn token of their own.
pub const STOP_WORDS: &[&str] = &[
    "<|im_end|>",
    "[End]",
    "[end]",
    "\nReferences:\n",
    "\nSources:\n",
    "End.",
];

/// Warning prepended to the answer when retrieval produced nothing.
pub const NO_SOURCES_WARNING: &str =
    "(The search engine returned nothing for this query. Please take the answer below with a grain of salt.)\n\n";

const RAG_QUERY_TEXT: &str = r#"
You are a professional AI assistant for web search. You are given a user question, and please write clean, concise and accurate answer to the question. You will be given a set of related contexts to the question, each starting with a reference number like [[citation:x]], where x is a number. Please use the context and cite the context at the end of each sentence if applicable.

Your answer must be correct, accurate and written by an expert using an unbiased and professional tone. Please limit to 1024 tokens. Do not give any information that is not related to the question, and do not repeat. Say "information is missing on" followed by the related topic, if the given context do not provide sufficient information.

Please cite the contexts with the reference numbers, in the format [citation:x]. If a sentence comes from multiple contexts, please list all applicable citations, like [citation:3][citation:5]. Other than code and specific names and citations, your answer must be written in the same language as the question.

Here are the set of contexts:

{context}

Remember, don't blindly repeat the contexts verbatim. Here is the user question:
"#;

const MORE_QUESTIONS_PROMPT: &str = r#"
You are a helpful assistant that helps the user to ask related questions, based on user's original question and the related contexts. Please identify worthwhile topics that can be follow-ups, and write questions no longer than 20 words each. Please make sure that specifics, like events, names, locations, are included in follow up questions so they can be asked standalone. For example, if the original question asks about "the Manhattan project", in the follow up question, do not just say "the project", but use the full name "the Manhattan project". Your related questions must be in the same language as the original question.

Here are the contexts of the question:

{context}

Remember, based on the original question and related contexts, suggest three such further questions. Do NOT repeat the original question. Each related question should be no longer than 20 words. Here is the original question:
"#;

static INST_MARKERS: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\[/?INST\]").unwrap());

/// Strips instruction-template markers from raw user input before it is
/// sent anywhere near a prompt.
pub fn sanitize_query(query: &str) -> String {
    INST_MARKERS.replace_all(query.trim(), "").to_string()
}

/// System prompt for the grounded answer: each snippet prefixed with its
/// 1-based bracketed citation index.
pub fn build_rag_system_prompt(sources: &[Source]) -> String {
    let context = sources
        .iter()
        .enumerate()
        .map(|(i, s)| format!("[[citation:{}]] {}", i + 1, s.snippet))
        .collect::<Vec<_>>()
        .join("\n\n");
    RAG_QUERY_TEXT.replace("{context}", &context)
}

/// System prompt for the related-question tool call: raw snippets only, no
/// citation indices.
pub fn build_more_questions_prompt(sources: &[Source]) -> String {
    let context = sources
        .iter()
        .map(|s| s.snippet.as_str())
        .collect::<Vec<_>>()
        .join("\n\n");
    MORE_QUESTIONS_PROMPT.replace("{context}", &context)
}
