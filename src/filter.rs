// src/filter.rs
// Pure rule evaluation for one item. No I/O, no mutation. Check order:
// domain, keywords, regex, language. Any present, failing check excludes.

use regex::RegexBuilder;
use tracing::warn;

use crate::fetch::NormalizedItem;
use crate::source::FilterRules;

/// Result of one evaluation. `PoisonedPattern` marks an item excluded
/// because a configured regex failed to compile (item-scoped, non-fatal).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    Accept,
    Reject,
    PoisonedPattern,
}

impl Verdict {
    pub fn is_accept(&self) -> bool {
        matches!(self, Verdict::Accept)
    }
}

enum Pattern {
    Ok(regex::Regex),
    Poisoned,
}

/// Rules with regex lists compiled once per run. Invalid patterns are
/// remembered as poisoned and logged at compile time, not per item.
pub struct CompiledRules {
    include_keywords: Vec<String>,
    exclude_keywords: Vec<String>,
    regex_include: Vec<Pattern>,
    regex_exclude: Vec<Pattern>,
    domain_allow: Vec<String>,
    domain_deny: Vec<String>,
    language: Option<String>,
}

fn compile_list(patterns: &[String], source_hint: &str) -> Vec<Pattern> {
    patterns
        .iter()
        .map(|p| {
            match RegexBuilder::new(p)
                .case_insensitive(true)
                .size_limit(1 << 20)
                .build()
            {
                Ok(re) => Pattern::Ok(re),
                Err(e) => {
                    warn!(target: "filter", source = %source_hint, pattern = %p, error = %e, "invalid filter pattern");
                    Pattern::Poisoned
                }
            }
        })
        .collect()
}

/// Domain of a URL, scheme and leading `www.` stripped, lowercased.
pub fn extract_domain(url: &str) -> String {
    let rest = url
        .strip_prefix("https://")
        .or_else(|| url.strip_prefix("http://"))
        .unwrap_or(url);
    let rest = rest.strip_prefix("www.").unwrap_or(rest);
    rest.split('/')
        .next()
        .unwrap_or_default()
        .split(':')
        .next()
        .unwrap_or_default()
        .to_ascii_lowercase()
}

fn keyword_hit(text_lower: &str, keywords: &[String]) -> bool {
    keywords
        .iter()
        .any(|kw| text_lower.contains(&kw.to_lowercase()))
}

/// Coarse marker-based language check. Skipped for unknown constraints.
fn language_matches(text_lower: &str, language: &str) -> bool {
    let markers: &[&str] = match language {
        "fr" => &[
            " le ", " la ", " les ", " de ", " des ", " et ", " à ", " pour ", " sur ",
        ],
        "en" => &[" the ", " and ", " of ", " for ", " on ", " with ", " from "],
        _ => return true,
    };
    markers.iter().any(|m| text_lower.contains(m))
}

impl CompiledRules {
    pub fn compile(rules: &FilterRules, source_hint: &str) -> Self {
        Self {
            include_keywords: rules.include_keywords.clone(),
            exclude_keywords: rules.exclude_keywords.clone(),
            regex_include: compile_list(&rules.regex_include, source_hint),
            regex_exclude: compile_list(&rules.regex_exclude, source_hint),
            domain_allow: rules
                .domain_allow
                .iter()
                .map(|d| d.to_ascii_lowercase())
                .collect(),
            domain_deny: rules
                .domain_deny
                .iter()
                .map(|d| d.to_ascii_lowercase())
                .collect(),
            language: rules.language.clone(),
        }
    }

    pub fn has_poisoned(&self) -> bool {
        self.regex_include
            .iter()
            .chain(self.regex_exclude.iter())
            .any(|p| matches!(p, Pattern::Poisoned))
    }

    /// Evaluate one item. Checks run in a fixed order; the first failing
    /// present check excludes. Absence of all rules accepts everything.
    pub fn evaluate(&self, item: &NormalizedItem) -> Verdict {
        // 1) domain
        if !self.domain_allow.is_empty() || !self.domain_deny.is_empty() {
            let domain = extract_domain(&item.link);
            if !self.domain_allow.is_empty() && !self.domain_allow.contains(&domain) {
                return Verdict::Reject;
            }
            if self.domain_deny.contains(&domain) {
                return Verdict::Reject;
            }
        }

        let text = format!("{}\n{}", item.title, item.summary);
        let text_lower = text.to_lowercase();

        // 2) keywords
        if !self.include_keywords.is_empty() && !keyword_hit(&text_lower, &self.include_keywords) {
            return Verdict::Reject;
        }
        if !self.exclude_keywords.is_empty() && keyword_hit(&text_lower, &self.exclude_keywords) {
            return Verdict::Reject;
        }

        // 3) regex; a poisoned pattern excludes the item instead of failing
        //    the run
        if !self.regex_include.is_empty() {
            let mut hit = false;
            for p in &self.regex_include {
                match p {
                    Pattern::Ok(re) => {
                        if re.is_match(&text) {
                            hit = true;
                            break;
                        }
                    }
                    Pattern::Poisoned => return Verdict::PoisonedPattern,
                }
            }
            if !hit {
                return Verdict::Reject;
            }
        }
        for p in &self.regex_exclude {
            match p {
                Pattern::Ok(re) => {
                    if re.is_match(&text) {
                        return Verdict::Reject;
                    }
                }
                Pattern::Poisoned => return Verdict::PoisonedPattern,
            }
        }

        // 4) language
        if let Some(lang) = &self.language {
            // Pad so boundary markers can match at the edges.
            let padded = format!(" {text_lower} ");
            if !language_matches(&padded, lang) {
                return Verdict::Reject;
            }
        }

        Verdict::Accept
    }
}
