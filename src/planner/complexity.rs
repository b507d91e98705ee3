//! Deterministic complexity scoring over a task description.

use agentflow_common::Complexity;

/// Score at or above which a task is complex.
pub const COMPLEX_THRESHOLD: i32 = 3;

const KEYWORD_WEIGHT: i32 = 2;
const WORDS_PER_POINT: usize = 12;

/// Word stems that signal cross-cutting or risky work.
const COMPLEX_STEMS: &[&str] = &[
    "architect",
    "authenti",
    "authoriz",
    "cach",
    "concurren",
    "databas",
    "distribut",
    "framework",
    "infrastructur",
    "integrat",
    "microservice",
    "migrat",
    "multi",
    "orchestrat",
    "overhaul",
    "performan",
    "pipeline",
    "protocol",
    "redesign",
    "rewrit",
    "scalab",
    "schema",
    "secur",
    "sharding",
    "subsystem",
    "synchroniz",
];

/// Word stems that signal small, local edits.
const SIMPLE_STEMS: &[&str] = &[
    "bump",
    "comment",
    "docstring",
    "minor",
    "readme",
    "rename",
    "small",
    "spelling",
    "trivial",
    "tweak",
    "typo",
    "wording",
];

/// Breakdown of how a description was scored.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ComplexityScore {
    pub score: i32,
    pub complex_terms: Vec<String>,
    pub simple_terms: Vec<String>,
    pub words: usize,
}

impl ComplexityScore {
    pub fn complexity(&self) -> Complexity {
        if self.score >= COMPLEX_THRESHOLD {
            Complexity::Complex
        } else {
            Complexity::Simple
        }
    }
}

fn words(description: &str) -> impl Iterator<Item = String> + '_ {
    description
        .split(|c: char| !c.is_alphanumeric())
        .filter(|w| !w.is_empty())
        .map(str::to_lowercase)
}

/// Score a description. Each word counts at most once per stem list.
pub fn score(description: &str) -> ComplexityScore {
    let mut complex_terms = Vec::new();
    let mut simple_terms = Vec::new();
    let mut count = 0;

    for word in words(description) {
        count += 1;
        if COMPLEX_STEMS.iter().any(|stem| word.starts_with(stem)) {
            if !complex_terms.contains(&word) {
                complex_terms.push(word);
            }
        } else if SIMPLE_STEMS.iter().any(|stem| word.starts_with(stem))
            && !simple_terms.contains(&word)
        {
            simple_terms.push(word);
        }
    }

    let score = complex_terms.len() as i32 * KEYWORD_WEIGHT + (count / WORDS_PER_POINT) as i32
        - simple_terms.len() as i32 * KEYWORD_WEIGHT;

    ComplexityScore {
        score,
        complex_terms,
        simple_terms,
        words: count,
    }
}

pub fn classify(description: &str) -> Complexity {
    score(description).complexity()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_typo_fix_is_simple() {
        let s = score("fix a typo in README");
        assert_eq!(s.simple_terms, vec!["typo", "readme"]);
        assert!(s.score < 0);
        assert_eq!(s.complexity(), Complexity::Simple);
    }

    #[test]
    fn test_distributed_cache_is_complex() {
        let s =
            score("integrate a new distributed caching layer into the authentication microservice");
        assert_eq!(
            s.complex_terms,
            vec!["integrate", "distributed", "caching", "authentication", "microservice"]
        );
        assert_eq!(s.complexity(), Complexity::Complex);
    }

    #[test]
    fn test_repeated_terms_count_once() {
        let once = score("cache");
        let twice = score("cache cache cache");
        assert_eq!(once.score, twice.score);
    }

    #[test]
    fn test_long_descriptions_lean_complex() {
        let long = "add a button ".repeat(12);
        assert_eq!(classify(&long), Complexity::Complex);
        assert_eq!(classify("add a button"), Complexity::Simple);
    }

    #[test]
    fn test_classification_is_stable() {
        let d = "Migrate the billing schema and add a typo check";
        assert_eq!(score(d), score(d));
    }

    #[test]
    fn test_empty_description() {
        let s = score("");
        assert_eq!(s.words, 0);
        assert_eq!(s.complexity(), Complexity::Simple);
    }
}
