//! Heuristic section extraction from document text.

/// Hard cap on extracted section labels, in document order.
pub const MAX_SECTIONS: usize = 20;

/// Lines at or above this length are never treated as headings.
const MAX_HEADING_CHARS: usize = 100;

/// Extract section labels from the current document text.
///
/// A line counts as a section label when its trimmed form ends with a
/// colon and the raw line stays under 100 characters. Deliberately
/// approximate; there is no semantic validation of the heading text.
pub fn extract_sections(text: &str) -> Vec<String> {
    let mut sections = Vec::new();
    for line in text.lines() {
        let trimmed = line.trim();
        if trimmed.ends_with(':') && line.chars().count() < MAX_HEADING_CHARS {
            sections.push(trimmed.to_string());
            if sections.len() == MAX_SECTIONS {
                break;
            }
        }
    }
    sections
}
