//! Stage-1 input transform: raw text to normalized text.
//!
//! Pure line-filter heuristics, no state:
//!
//! - drop standalone page numbers and short lines repeated often enough to be
//!   running headers or footers
//! - strip non-printable characters and normalize bullet markers
//! - drop lines with fewer than 3 words
//! - collapse space/tab runs and excess blank lines

use std::collections::HashMap;

const HEADER_REPEAT_THRESHOLD: usize = 3;
const HEADER_MAX_WORDS: usize = 10;
const MIN_WORDS_PER_LINE: usize = 3;

/// Normalize raw text for chunking.
pub fn clean_text(text: &str) -> String {
    let text = text.replace("\r\n", "\n").replace('\r', "\n");
    let lines: Vec<&str> = text
        .split('\n')
        .filter(|line| !is_page_number(line))
        .collect();

    let repeated = repeated_headers(&lines);

    let mut cleaned_lines = Vec::with_capacity(lines.len());
    for line in lines {
        let trimmed = line.trim();
        if repeated.contains_key(trimmed) {
            continue;
        }

        let mut line: String = trimmed.chars().filter(|c| !c.is_control()).collect();
        line = normalize_bullet(&line);

        if line.split_whitespace().count() < MIN_WORDS_PER_LINE {
            continue;
        }
        cleaned_lines.push(line);
    }

    let joined = cleaned_lines.join("\n");
    collapse_blank_lines(&collapse_spaces(&joined))
        .trim()
        .to_string()
}

/// A line that is only digits (with surrounding whitespace) is a page number.
fn is_page_number(line: &str) -> bool {
    let trimmed = line.trim();
    !trimmed.is_empty() && trimmed.chars().all(|c| c.is_ascii_digit())
}

/// Short lines that repeat more than the threshold are running headers/footers.
fn repeated_headers<'a>(lines: &[&'a str]) -> HashMap<&'a str, usize> {
    let mut counts: HashMap<&str, usize> = HashMap::new();
    for line in lines {
        let trimmed = line.trim();
        if !trimmed.is_empty() {
            *counts.entry(trimmed).or_insert(0) += 1;
        }
    }
    counts
        .into_iter()
        .filter(|(line, count)| {
            *count > HEADER_REPEAT_THRESHOLD && line.split_whitespace().count() < HEADER_MAX_WORDS
        })
        .collect()
}

/// Rewrite `•`, `-`, or `*` bullet markers to a uniform `* `.
fn normalize_bullet(line: &str) -> String {
    let mut chars = line.chars();
    match chars.next() {
        Some('\u{2022}') | Some('-') | Some('*') => {
            let rest = chars.as_str();
            if rest.starts_with(char::is_whitespace) {
                format!("* {}", rest.trim_start())
            } else {
                line.to_string()
            }
        }
        _ => line.to_string(),
    }
}

/// Collapse runs of spaces and tabs into a single space.
fn collapse_spaces(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut in_run = false;
    for c in text.chars() {
        if c == ' ' || c == '\t' {
            if !in_run {
                out.push(' ');
            }
            in_run = true;
        } else {
            in_run = false;
            out.push(c);
        }
    }
    out
}

/// Collapse runs of three or more newlines into a single blank line.
fn collapse_blank_lines(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut newlines = 0;
    for c in text.chars() {
        if c == '\n' {
            newlines += 1;
            if newlines <= 2 {
                out.push('\n');
            }
        } else {
            newlines = 0;
            out.push(c);
        }
    }
    out
}
