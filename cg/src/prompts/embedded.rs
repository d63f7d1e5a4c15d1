//! Embedded prompts
//!
//! These are compiled into the binary from .pmt files at build time.

use tracing::debug;

/// Outline planner system prompt
pub const OUTLINE: &str = include_str!("../../prompts/outline.pmt");

/// Chapter writer system prompt
pub const CHAPTER: &str = include_str!("../../prompts/chapter.pmt");

/// Per-kind chapter request (user message)
pub const CHAPTER_REQUEST: &str = include_str!("../../prompts/chapter-request.pmt");

/// Answer grader system prompt
pub const SCORE: &str = include_str!("../../prompts/score.pmt");

/// Chapter assistant system prompt
pub const CHAT: &str = include_str!("../../prompts/chat.pmt");

/// Flashcard request
pub const FLASHCARD: &str = include_str!("../../prompts/flashcard.pmt");

/// Names of every embedded template
pub const NAMES: &[&str] = &["outline", "chapter", "chapter-request", "score", "chat", "flashcard"];

/// Get the embedded prompt by name
pub fn get_embedded(name: &str) -> Option<&'static str> {
    debug!(%name, "get_embedded: called");
    match name {
        "outline" => Some(OUTLINE),
        "chapter" => Some(CHAPTER),
        "chapter-request" => Some(CHAPTER_REQUEST),
        "score" => Some(SCORE),
        "chat" => Some(CHAT),
        "flashcard" => Some(FLASHCARD),
        _ => {
            debug!("get_embedded: no match found");
            None
        }
    }
}
