//! Tag-delimited answer extraction.
//!
//! Every prompt asks the model to wrap its authoritative output in a tag pair
//! (`<answer>yes</answer>`). Nothing else in the crate looks at raw model text.

/// Tag used for decisions, categories, rewritten queries and final answers.
pub const ANSWER_TAG: &str = "answer";

/// Return the text between the first `<tag>` and the first `</tag>` after it.
///
/// `None` means no well-formed pair exists; `Some("")` means the pair was
/// found with nothing inside.
pub fn extract_tag<'a>(text: &'a str, tag: &str) -> Option<&'a str> {
    let open = format!("<{}>", tag);
    let close = format!("</{}>", tag);

    let start = text.find(&open)? + open.len();
    let len = text[start..].find(&close)?;
    Some(&text[start..start + len])
}

/// Shorthand for the `answer` tag.
pub fn extract_answer(text: &str) -> Option<&str> {
    extract_tag(text, ANSWER_TAG)
}

/// Interpret a decision-stage reply.
///
/// Only a case-insensitive literal `yes` inside the tag counts as yes;
/// surrounding whitespace is not forgiven.
/// A missing tag is reported separately so callers can log it; it still
/// resolves to "no retrieval".
pub fn parse_yes_no(text: &str) -> YesNo {
    match extract_answer(text) {
        Some(answer) if answer.eq_ignore_ascii_case("yes") => YesNo::Yes,
        Some(_) => YesNo::No,
        None => YesNo::Absent,
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum YesNo {
    Yes,
    No,
    Absent,
}

impl YesNo {
    pub fn is_yes(self) -> bool {
        self == Self::Yes
    }
}
