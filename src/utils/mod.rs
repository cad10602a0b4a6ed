//! Shared utility functions.
//!
//! - String truncation (UTF-8 safe, boundary-aware)
//! - JSON extraction from free-form replies
//! - Keyword matching used by the heuristic analyzers

mod string;

pub use string::{
    contains_word, count_word_hits, extract_json_object, significant_words, truncate_at_boundary,
};
