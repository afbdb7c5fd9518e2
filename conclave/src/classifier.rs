//! Task classification — turns free-text task descriptions into structured profiles.
//!
//! The classifier is a pure function of its input: an ordered scan over
//! fixed domain signatures (first match wins) plus a secondary complexity
//! scan. Unmatched input yields a `General` profile — classification
//! never fails.

use serde::{Deserialize, Serialize};

/// Closed set of task domains the router understands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskDomain {
    /// Software engineering: code generation, debugging, builds.
    Software,
    /// Content production: marketing copy, articles, messaging.
    Content,
    /// Data and business analysis.
    Analysis,
    /// Open-ended creative work: naming, ideation, storytelling.
    Creative,
    /// Customer-facing support and dialogue.
    Support,
    /// Fallback when no signature matches.
    General,
}

impl TaskDomain {
    /// All defined domains.
    pub fn all() -> &'static [TaskDomain] {
        &[
            Self::Software,
            Self::Content,
            Self::Analysis,
            Self::Creative,
            Self::Support,
            Self::General,
        ]
    }
}

impl std::fmt::Display for TaskDomain {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Software => write!(f, "software"),
            Self::Content => write!(f, "content"),
            Self::Analysis => write!(f, "analysis"),
            Self::Creative => write!(f, "creative"),
            Self::Support => write!(f, "support"),
            Self::General => write!(f, "general"),
        }
    }
}

/// Coarse complexity level derived from indicator words.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Complexity {
    Low,
    Medium,
    High,
}

impl std::fmt::Display for Complexity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Low => write!(f, "low"),
            Self::Medium => write!(f, "medium"),
            Self::High => write!(f, "high"),
        }
    }
}

/// Capability a provider must offer to handle a task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Capability {
    /// Producing or fixing source code.
    CodeGeneration,
    /// Long- and short-form prose.
    Writing,
    /// Structured data interpretation.
    DataAnalysis,
    /// Multi-step reasoning and planning.
    Reasoning,
    /// Conversational back-and-forth.
    Dialogue,
    /// Combining multiple inputs into one answer.
    Synthesis,
}

impl std::fmt::Display for Capability {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::CodeGeneration => write!(f, "code_generation"),
            Self::Writing => write!(f, "writing"),
            Self::DataAnalysis => write!(f, "data_analysis"),
            Self::Reasoning => write!(f, "reasoning"),
            Self::Dialogue => write!(f, "dialogue"),
            Self::Synthesis => write!(f, "synthesis"),
        }
    }
}

/// Structured classification of one incoming task.
///
/// Immutable once produced; owned by the resolver call that consumes it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskProfile {
    /// Matched domain (or `General`).
    pub domain: TaskDomain,
    /// Derived complexity level.
    pub complexity: Complexity,
    /// Capabilities the handling provider must offer.
    pub required_capabilities: Vec<Capability>,
    /// Target quality score (0.0-1.0) for this task class.
    pub target_quality: f64,
    /// Per-call cost ceiling the caller is willing to pay.
    pub target_cost: f64,
    /// Latency target in milliseconds.
    pub max_latency_ms: u64,
    /// Keywords that triggered the match (for justification strings).
    pub matched_keywords: Vec<String>,
}

/// One entry in the ordered domain signature table.
struct DomainSignature {
    domain: TaskDomain,
    keywords: &'static [&'static str],
    capabilities: &'static [Capability],
}

/// Ordered signature table — first match wins.
const DOMAIN_SIGNATURES: &[DomainSignature] = &[
    DomainSignature {
        domain: TaskDomain::Software,
        keywords: &[
            "code", "bug", "compile", "build", "deploy", "function", "api",
            "refactor", "debug", "script", "implement", "test suite",
        ],
        capabilities: &[Capability::CodeGeneration, Capability::Reasoning],
    },
    DomainSignature {
        domain: TaskDomain::Content,
        keywords: &[
            "blog", "article", "copy", "marketing", "newsletter", "headline",
            "social post", "landing page", "press release",
        ],
        capabilities: &[Capability::Writing],
    },
    DomainSignature {
        domain: TaskDomain::Analysis,
        keywords: &[
            "analyze", "analysis", "report", "metrics", "trend", "forecast",
            "dataset", "chart", "summarize data", "kpi",
        ],
        capabilities: &[Capability::DataAnalysis, Capability::Reasoning],
    },
    DomainSignature {
        domain: TaskDomain::Creative,
        keywords: &[
            "brainstorm", "creative", "story", "name ideas", "slogan",
            "imagine", "concept", "poem",
        ],
        capabilities: &[Capability::Writing, Capability::Synthesis],
    },
    DomainSignature {
        domain: TaskDomain::Support,
        keywords: &[
            "customer", "support ticket", "complaint", "reply to", "respond to",
            "follow up", "faq",
        ],
        capabilities: &[Capability::Dialogue, Capability::Writing],
    },
];

const HIGH_COMPLEXITY_TERMS: &[&str] = &[
    "architecture", "migrate", "distributed", "end-to-end", "comprehensive",
    "multi-step", "strategy", "complex", "in depth", "thorough",
];

const LOW_COMPLEXITY_TERMS: &[&str] = &[
    "simple", "quick", "short", "one-liner", "small", "trivial", "brief",
];

/// Pure keyword/priority classifier. No side effects, never fails.
#[derive(Debug, Clone, Default)]
pub struct TaskClassifier;

impl TaskClassifier {
    pub fn new() -> Self {
        Self
    }

    /// Classify a task description into a profile.
    ///
    /// An explicit `hint` short-circuits the domain scan but complexity
    /// and capabilities are still derived from the text.
    pub fn classify(&self, text: &str, hint: Option<TaskDomain>) -> TaskProfile {
        let lower = text.to_lowercase();

        let (domain, capabilities, matched) = match hint {
            Some(domain) => (domain, Self::capabilities_for(domain), Vec::new()),
            None => {
                let hit = DOMAIN_SIGNATURES.iter().find_map(|sig| {
                    let matched: Vec<String> = sig
                        .keywords
                        .iter()
                        .filter(|k| lower.contains(**k))
                        .map(|k| k.to_string())
                        .collect();
                    if matched.is_empty() {
                        None
                    } else {
                        Some((sig.domain, sig.capabilities.to_vec(), matched))
                    }
                });
                hit.unwrap_or((
                    TaskDomain::General,
                    vec![Capability::Reasoning],
                    Vec::new(),
                ))
            }
        };

        let complexity = Self::estimate_complexity(&lower, text.len());
        let (target_quality, target_cost, max_latency_ms) = Self::targets_for(complexity);

        TaskProfile {
            domain,
            complexity,
            required_capabilities: capabilities,
            target_quality,
            target_cost,
            max_latency_ms,
            matched_keywords: matched,
        }
    }

    /// Secondary indicator-word scan. `Medium` is the default.
    fn estimate_complexity(lower: &str, raw_len: usize) -> Complexity {
        if HIGH_COMPLEXITY_TERMS.iter().any(|t| lower.contains(t)) || raw_len > 800 {
            Complexity::High
        } else if LOW_COMPLEXITY_TERMS.iter().any(|t| lower.contains(t)) && raw_len <= 800 {
            Complexity::Low
        } else {
            Complexity::Medium
        }
    }

    /// Default capability set when only a domain hint is given.
    fn capabilities_for(domain: TaskDomain) -> Vec<Capability> {
        DOMAIN_SIGNATURES
            .iter()
            .find(|sig| sig.domain == domain)
            .map(|sig| sig.capabilities.to_vec())
            .unwrap_or_else(|| vec![Capability::Reasoning])
    }

    /// Cost/quality/latency targets per complexity level.
    fn targets_for(complexity: Complexity) -> (f64, f64, u64) {
        match complexity {
            Complexity::Low => (0.6, 0.01, 5_000),
            Complexity::Medium => (0.7, 0.05, 15_000),
            Complexity::High => (0.85, 0.25, 60_000),
        }
    }
}
