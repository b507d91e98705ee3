//! Structural extraction of agent output into an [`AgentContext`].
//!
//! Recognised markers:
//! - markdown headings, classified as summary, files, findings or other sections
//! - an inline `Summary:` / `TL;DR:` label
//! - bullet and numbered list items
//! - file paths with a known source or config extension
//! - lines mentioning warnings, errors or failures
//!
//! Output without any of these, or whose structured digest cannot fit the
//! budget, degrades to the trimmed text or a head+tail excerpt joined by
//! [`ELISION_MARKER`]. Parsing a digest this parser produced yields the same
//! digest again.

use std::sync::LazyLock;

use agentflow_common::{AgentContext, ELISION_MARKER, Role, render_digest};
use regex::Regex;
use tracing::debug;

use super::ContextLimits;

static BULLET_REGEX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^(?:[-*+•]|\d{1,3}[.)])\s+").unwrap());

static LABEL_REGEX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)^(?:summary|tl;?dr|overview)\s*:\s*").unwrap());

static PATH_REGEX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"[A-Za-z0-9_][A-Za-z0-9_./\-]*\.(?:rs|toml|lock|py|pyi|ts|tsx|js|jsx|mjs|go|java|kt|c|h|cc|cpp|hpp|cs|rb|php|swift|scala|sh|sql|md|json|yaml|yml|html|css|scss|vue|proto|txt|cfg|ini|xml|gradle)\b",
    )
    .unwrap()
});

static WARNING_REGEX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(concat!(
        r"(?i)\b(?:warning|warn|error|errors|failed|failure|fails|panic|panics",
        r"|todo|fixme|caution|deprecated)\b"
    ))
    .unwrap()
});

static SUMMARY_HEADING_REGEX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)\b(?:summary|overview|tl;?dr)\b").unwrap());

static FILES_HEADING_REGEX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)\bfiles?\b").unwrap());

static FINDINGS_HEADING_REGEX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)\bfindings?\b").unwrap());

/// Stripped from the front of cleaned lines. A cleaned line must never
/// start a fence (` or ~) when its digest is parsed again.
const LEADING_MARKS: &[char] = &['#', '>', '`', '~', '*'];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Section {
    Preamble,
    Summary,
    Files,
    Findings,
    Other,
}

impl Section {
    fn classify(title: &str) -> Self {
        if SUMMARY_HEADING_REGEX.is_match(title) {
            Section::Summary
        } else if FILES_HEADING_REGEX.is_match(title) {
            Section::Files
        } else if FINDINGS_HEADING_REGEX.is_match(title) {
            Section::Findings
        } else {
            Section::Other
        }
    }

    /// Sections whose lines may supply the summary, findings and scanned paths.
    fn is_free_text(self) -> bool {
        matches!(self, Section::Preamble | Section::Other)
    }
}

#[derive(Debug)]
struct Line<'a> {
    text: &'a str,
    section: Section,
    heading: bool,
    fenced: bool,
}

impl Line<'_> {
    fn is_content(&self) -> bool {
        !self.heading && !self.fenced && !self.text.is_empty()
    }
}

#[derive(Debug, Default)]
struct Extracted {
    summary: String,
    files: Vec<String>,
    findings: Vec<String>,
}

/// Compresses raw agent output into a bounded, forward-safe digest.
#[derive(Debug, Clone, Default)]
pub struct ContextParser {
    limits: ContextLimits,
}

impl ContextParser {
    pub fn new(limits: ContextLimits) -> Self {
        Self { limits }
    }

    pub fn limits(&self) -> &ContextLimits {
        &self.limits
    }

    /// Extract a digest tagged with the producing role.
    pub fn extract_for(&self, role: Role, raw: &str) -> AgentContext {
        AgentContext {
            role: Some(role),
            ..self.extract(raw)
        }
    }

    /// Extract a digest from raw output. Never fails; the digest is never
    /// longer than `min(raw length, max_chars)` characters.
    pub fn extract(&self, raw: &str) -> AgentContext {
        let raw_length = char_len(raw);
        let budget = raw_length.min(self.limits.max_chars);
        let trimmed = raw.trim();

        if trimmed.is_empty() {
            return AgentContext {
                raw_length,
                ..Default::default()
            };
        }

        if !trimmed.contains(ELISION_MARKER) {
            let lines = scan(trimmed);
            if is_structured(&lines) {
                let extracted = self.extract_structure(&lines);
                if let Some(ctx) = fit(extracted, budget, raw_length) {
                    return ctx;
                }
                debug!(raw_length, budget, "structured digest did not fit, using excerpt");
            }
        }

        let summary = if char_len(trimmed) <= budget {
            trimmed.to_string()
        } else {
            excerpt(trimmed, budget)
        };
        let compressed_length = char_len(&summary);
        AgentContext {
            role: None,
            summary,
            file_manifest: Vec::new(),
            key_findings: Vec::new(),
            raw_length,
            compressed_length,
        }
    }

    fn extract_structure(&self, lines: &[Line<'_>]) -> Extracted {
        let (summary, consumed) = self.find_summary(lines);
        let files = self.find_files(lines, consumed);
        let findings = self.find_findings(lines, consumed);
        Extracted {
            summary,
            files,
            findings,
        }
    }

    /// Returns the summary and, when it came from a free-text line, that
    /// line's index so it is not reused as a finding or path source.
    fn find_summary(&self, lines: &[Line<'_>]) -> (String, Option<usize>) {
        let section_parts: Vec<String> = lines
            .iter()
            .filter(|l| l.section == Section::Summary && l.is_content())
            .map(|l| clean_line(l.text, true))
            .filter(|s| !s.is_empty())
            .collect();
        if !section_parts.is_empty() {
            let joined = clean_line(&section_parts.join(" "), true);
            return (
                truncate_at_whitespace(&joined, self.limits.max_summary_chars),
                None,
            );
        }

        let candidates = || {
            lines
                .iter()
                .enumerate()
                .filter(|(_, l)| l.section.is_free_text() && l.is_content())
        };

        let labelled = candidates().find(|(_, l)| {
            !is_bullet(l.text) && LABEL_REGEX.is_match(l.text.trim_start_matches(LEADING_MARKS))
        });
        let plain = || {
            candidates().find(|(_, l)| !is_bullet(l.text) && !clean_line(l.text, true).is_empty())
        };
        let bullet = || candidates().find(|(_, l)| !clean_line(l.text, true).is_empty());

        match labelled
            .filter(|(_, l)| !clean_line(l.text, true).is_empty())
            .or_else(plain)
            .or_else(bullet)
        {
            Some((index, line)) => (
                truncate_at_whitespace(&clean_line(line.text, true), self.limits.max_summary_chars),
                Some(index),
            ),
            None => (String::new(), None),
        }
    }

    fn find_files(&self, lines: &[Line<'_>], consumed: Option<usize>) -> Vec<String> {
        let mut files = Vec::new();
        let has_files_section = lines
            .iter()
            .any(|l| l.heading && l.section == Section::Files);

        if has_files_section {
            for line in lines
                .iter()
                .filter(|l| l.section == Section::Files && !l.heading && !l.text.is_empty())
            {
                let found = paths_in(line.text);
                if !found.is_empty() {
                    for path in found {
                        push_unique(&mut files, path);
                    }
                } else if !line.fenced && is_bullet(line.text) {
                    let item = clean_line(line.text, false);
                    if !item.is_empty() && char_len(&item) <= self.limits.max_finding_chars {
                        push_unique(&mut files, item);
                    }
                }
            }
        } else {
            for (_, line) in lines.iter().enumerate().filter(|(i, l)| {
                l.section.is_free_text() && !l.heading && Some(*i) != consumed
            }) {
                for path in paths_in(line.text) {
                    push_unique(&mut files, path);
                }
            }
        }

        files.truncate(self.limits.max_files);
        files
    }

    fn find_findings(&self, lines: &[Line<'_>], consumed: Option<usize>) -> Vec<String> {
        let mut findings = Vec::new();
        for (index, line) in lines.iter().enumerate() {
            if !line.is_content() || Some(index) == consumed {
                continue;
            }
            let take = match line.section {
                Section::Summary | Section::Files => false,
                Section::Findings => true,
                Section::Preamble | Section::Other => {
                    is_bullet(line.text) || WARNING_REGEX.is_match(line.text)
                }
            };
            if !take {
                continue;
            }
            let item = truncate_chars(&clean_line(line.text, false), self.limits.max_finding_chars);
            if !item.is_empty() {
                push_unique(&mut findings, item);
            }
            if findings.len() >= self.limits.max_findings {
                break;
            }
        }
        findings
    }
}

/// Render the extracted parts, dropping findings then files and finally
/// shortening the summary until the digest fits `budget`.
fn fit(mut extracted: Extracted, budget: usize, raw_length: usize) -> Option<AgentContext> {
    loop {
        let digest = render_digest(&extracted.summary, &extracted.files, &extracted.findings);
        let length = char_len(&digest);
        if digest.is_empty() {
            return None;
        }
        if length <= budget {
            return Some(AgentContext {
                role: None,
                summary: extracted.summary,
                file_manifest: extracted.files,
                key_findings: extracted.findings,
                raw_length,
                compressed_length: length,
            });
        }
        if extracted.findings.pop().is_some() || extracted.files.pop().is_some() {
            continue;
        }
        extracted.summary = truncate_at_whitespace(&extracted.summary, budget);
        if extracted.summary.is_empty() {
            return None;
        }
    }
}

fn scan(text: &str) -> Vec<Line<'_>> {
    let mut lines = Vec::new();
    let mut section = Section::Preamble;
    let mut fenced = false;

    for raw_line in text.lines() {
        let text = raw_line.trim();
        if text.starts_with("```") || text.starts_with("~~~") {
            fenced = !fenced;
            lines.push(Line {
                text,
                section,
                heading: false,
                fenced: true,
            });
            continue;
        }
        if !fenced && let Some(title) = heading_title(text) {
            section = Section::classify(title);
            lines.push(Line {
                text,
                section,
                heading: true,
                fenced: false,
            });
            continue;
        }
        lines.push(Line {
            text,
            section,
            heading: false,
            fenced,
        });
    }
    lines
}

fn heading_title(line: &str) -> Option<&str> {
    let hashes = line.chars().take_while(|c| *c == '#').count();
    if hashes == 0 || hashes > 6 {
        return None;
    }
    let rest = &line[hashes..];
    if !rest.is_empty() && !rest.starts_with(char::is_whitespace) {
        return None;
    }
    Some(rest.trim().trim_end_matches('#').trim().trim_end_matches(':'))
}

fn is_structured(lines: &[Line<'_>]) -> bool {
    lines.iter().any(|l| {
        l.heading
            || !paths_in(l.text).is_empty()
            || (l.is_content()
                && (is_bullet(l.text)
                    || WARNING_REGEX.is_match(l.text)
                    || LABEL_REGEX.is_match(l.text.trim_start_matches(LEADING_MARKS))))
    })
}

fn is_bullet(line: &str) -> bool {
    BULLET_REGEX.is_match(line)
}

fn paths_in(line: &str) -> Vec<String> {
    PATH_REGEX
        .find_iter(line)
        .map(|m| m.as_str().to_string())
        .filter(|p| char_len(p) <= super::MAX_FINDING_CHARS)
        .collect()
}

/// Strip list markers, quote/heading/emphasis marks and (optionally) a
/// summary label until none remain, then collapse whitespace.
fn clean_line(line: &str, strip_label: bool) -> String {
    let mut current = line.trim().to_string();
    loop {
        let mut next = BULLET_REGEX.replace(&current, "").trim().to_string();
        next = next.trim_start_matches(LEADING_MARKS).trim().to_string();
        if strip_label {
            next = LABEL_REGEX.replace(&next, "").trim().to_string();
        }
        if next == current {
            break;
        }
        current = next;
    }
    current.split_whitespace().collect::<Vec<_>>().join(" ")
}

fn push_unique(items: &mut Vec<String>, item: String) {
    if !items.contains(&item) {
        items.push(item);
    }
}

fn char_len(s: &str) -> usize {
    s.chars().count()
}

fn truncate_chars(s: &str, max: usize) -> String {
    if char_len(s) <= max {
        return s.to_string();
    }
    s.chars().take(max).collect::<String>().trim_end().to_string()
}

/// Cut to at most `max` characters, preferring the last whitespace boundary.
fn truncate_at_whitespace(s: &str, max: usize) -> String {
    if char_len(s) <= max {
        return s.to_string();
    }
    let head: String = s.chars().take(max).collect();
    let next_is_space = s.chars().nth(max).is_some_and(char::is_whitespace);
    if next_is_space {
        return head.trim_end().to_string();
    }
    match head.rfind(char::is_whitespace) {
        Some(pos) if pos > 0 => head[..pos].trim_end().to_string(),
        _ => head.trim_end().to_string(),
    }
}

/// Head and tail of `text` joined by the elision marker, at most `budget` characters.
fn excerpt(text: &str, budget: usize) -> String {
    let marker_len = char_len(ELISION_MARKER);
    if budget <= marker_len + 2 {
        return truncate_chars(text, budget);
    }

    let available = budget - marker_len;
    let head_len = available * 2 / 3;
    let tail_len = available - head_len;

    let head = {
        let cut = truncate_at_whitespace(text, head_len);
        if cut.is_empty() {
            truncate_chars(text, head_len)
        } else {
            cut
        }
    };

    let total = char_len(text);
    let tail_raw: String = text.chars().skip(total - tail_len).collect();
    let tail = match tail_raw.find(char::is_whitespace) {
        Some(pos) if !tail_raw[pos..].trim().is_empty() => tail_raw[pos..].trim_start().to_string(),
        _ => tail_raw.trim_start().to_string(),
    };

    format!("{}{}{}", head, ELISION_MARKER, tail)
}
