//! Text rewrite rules for request optimization
//!
//! Rules run in order over the request content. Each carries a risk class so
//! the active strategy can decide whether it applies, and an estimated
//! per-application saving used when ranking rules.

use regex::Regex;
use serde::{Deserialize, Serialize};
use std::sync::LazyLock;

pub(crate) static WHITESPACE_RUN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\s+").unwrap());
pub(crate) static BLANK_LINES: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\n\s*\n").unwrap());
pub(crate) static REPEATED_PERIODS: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[.]{2,}").unwrap());
pub(crate) static POLITENESS_PREFIXES: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(请|请你|麻烦你)").unwrap());
pub(crate) static GRATITUDE_PHRASES: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(谢谢|感谢|多谢)").unwrap());
pub(crate) static REDUNDANT_EXPLANATIONS: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(也就是说|换句话说|即)").unwrap());
pub(crate) static INTENSIFIERS: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(非常|特别|极其|相当)").unwrap());
pub(crate) static COMMA_RUNS: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"，\s*，").unwrap());
pub(crate) static POLITENESS_MARKERS: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(请|麻烦你|谢谢你)").unwrap());

static DEFAULT_RULES: LazyLock<Vec<OptimizationRule>> = LazyLock::new(|| {
    vec![
        OptimizationRule::pattern(
            "whitespace_collapse",
            WHITESPACE_RUN.clone(),
            " ",
            RiskLevel::Low,
            50,
        ),
        OptimizationRule::pattern(
            "blank_line_collapse",
            BLANK_LINES.clone(),
            "\n",
            RiskLevel::Low,
            30,
        ),
        OptimizationRule::duplicate_words("duplicate_word_collapse", RiskLevel::Medium, 100),
        OptimizationRule::pattern(
            "repeated_period_cleanup",
            REPEATED_PERIODS.clone(),
            ".",
            RiskLevel::Low,
            20,
        ),
        OptimizationRule::pattern(
            "politeness_normalization",
            POLITENESS_PREFIXES.clone(),
            "请",
            RiskLevel::Low,
            25,
        ),
        OptimizationRule::pattern(
            "gratitude_removal",
            GRATITUDE_PHRASES.clone(),
            "",
            RiskLevel::Low,
            40,
        ),
        OptimizationRule::pattern(
            "redundant_explanation_removal",
            REDUNDANT_EXPLANATIONS.clone(),
            "",
            RiskLevel::Medium,
            80,
        ),
    ]
});

/// How likely a rule is to change the meaning of the text
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RiskLevel {
    Low,
    Medium,
    High,
}

/// How hard the optimizer rewrites request content
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OptimizationStrategy {
    /// Only low-risk rules
    Conservative,
    /// Low- and medium-risk rules
    #[default]
    Balanced,
    /// Every rule plus an extra compression pass
    Aggressive,
}

impl OptimizationStrategy {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Conservative => "conservative",
            Self::Balanced => "balanced",
            Self::Aggressive => "aggressive",
        }
    }

    /// Whether a rule of the given risk class runs under this strategy
    pub fn accepts(&self, risk: RiskLevel) -> bool {
        match self {
            Self::Aggressive => true,
            Self::Balanced => matches!(risk, RiskLevel::Low | RiskLevel::Medium),
            Self::Conservative => matches!(risk, RiskLevel::Low),
        }
    }
}

impl std::fmt::Display for OptimizationStrategy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Clone)]
enum RuleKind {
    /// Regex substitution; the replacement may use `$1`-style group refs
    Pattern { regex: Regex, replacement: String },
    /// Collapses immediately repeated words, which regex alone cannot express
    DuplicateWords,
}

/// One ordered rewrite applied to request content
#[derive(Clone)]
pub struct OptimizationRule {
    name: String,
    kind: RuleKind,
    risk: RiskLevel,
    estimated_savings: u32,
}

impl OptimizationRule {
    fn pattern(
        name: impl Into<String>,
        regex: Regex,
        replacement: impl Into<String>,
        risk: RiskLevel,
        estimated_savings: u32,
    ) -> Self {
        Self {
            name: name.into(),
            kind: RuleKind::Pattern {
                regex,
                replacement: replacement.into(),
            },
            risk,
            estimated_savings,
        }
    }

    fn duplicate_words(name: impl Into<String>, risk: RiskLevel, estimated_savings: u32) -> Self {
        Self {
            name: name.into(),
            kind: RuleKind::DuplicateWords,
            risk,
            estimated_savings,
        }
    }

    /// Build a custom substitution rule from a pattern string
    pub fn rewrite(
        name: impl Into<String>,
        pattern: &str,
        replacement: impl Into<String>,
        risk: RiskLevel,
        estimated_savings: u32,
    ) -> Result<Self, regex::Error> {
        Ok(Self::pattern(
            name,
            Regex::new(pattern)?,
            replacement,
            risk,
            estimated_savings,
        ))
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn risk(&self) -> RiskLevel {
        self.risk
    }

    pub fn estimated_savings(&self) -> u32 {
        self.estimated_savings
    }

    /// Run the rewrite over `text`
    pub fn apply(&self, text: &str) -> String {
        match &self.kind {
            RuleKind::Pattern { regex, replacement } => {
                regex.replace_all(text, replacement.as_str()).into_owned()
            }
            RuleKind::DuplicateWords => collapse_duplicate_words(text),
        }
    }
}

impl std::fmt::Debug for OptimizationRule {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OptimizationRule")
            .field("name", &self.name)
            .field("risk", &self.risk)
            .field("estimated_savings", &self.estimated_savings)
            .finish()
    }
}

/// The built-in rewrite rules, in application order
pub fn default_rules() -> Vec<OptimizationRule> {
    DEFAULT_RULES.clone()
}

/// Extra compression applied on top of the rule list under the aggressive
/// strategy
pub(crate) fn aggressive_pass(text: &str) -> String {
    let text = INTENSIFIERS.replace_all(text, "");
    let text = COMMA_RUNS.replace_all(&text, "，");
    collapse_duplicate_words(&text)
}

/// Minimal cleanup applied under the conservative strategy
pub(crate) fn conservative_pass(text: &str) -> String {
    let text = WHITESPACE_RUN.replace_all(text, " ");
    BLANK_LINES.replace_all(&text, "\n").into_owned()
}

fn is_word_char(c: char) -> bool {
    c.is_alphanumeric() || c == '_'
}

/// Split into maximal runs of word and non-word characters
fn segments(text: &str) -> Vec<(bool, &str)> {
    let mut out = Vec::new();
    let mut start = 0;
    let mut current: Option<bool> = None;
    for (idx, c) in text.char_indices() {
        let word = is_word_char(c);
        match current {
            Some(kind) if kind == word => {}
            Some(kind) => {
                out.push((kind, &text[start..idx]));
                start = idx;
                current = Some(word);
            }
            None => current = Some(word),
        }
    }
    if let Some(kind) = current {
        out.push((kind, &text[start..]));
    }
    out
}

/// Collapse a word immediately repeated across whitespace down to one copy
///
/// Matches are consumed left to right: the surviving copy of a collapsed
/// pair does not pair again with the word that follows it, so `a a a`
/// becomes `a a`. Words must match exactly, and only whitespace may sit
/// between them.
pub fn collapse_duplicate_words(text: &str) -> String {
    let segments = segments(text);
    let mut out = String::with_capacity(text.len());
    let mut i = 0;
    while i < segments.len() {
        let (is_word, seg) = segments[i];
        if is_word
            && i + 2 < segments.len()
            && segments[i + 1].1.chars().all(char::is_whitespace)
            && segments[i + 2].0
            && segments[i + 2].1 == seg
        {
            out.push_str(seg);
            i += 3;
        } else {
            out.push_str(seg);
            i += 1;
        }
    }
    out
}

/// Count how many duplicate-word pairs a collapse pass would remove
pub fn count_duplicate_word_pairs(text: &str) -> usize {
    let segments = segments(text);
    let mut count = 0;
    let mut i = 0;
    while i < segments.len() {
        let (is_word, seg) = segments[i];
        if is_word
            && i + 2 < segments.len()
            && segments[i + 1].1.chars().all(char::is_whitespace)
            && segments[i + 2].0
            && segments[i + 2].1 == seg
        {
            count += 1;
            i += 3;
        } else {
            i += 1;
        }
    }
    count
}
