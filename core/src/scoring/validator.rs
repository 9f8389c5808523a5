use crate::collaborators::{DomainInfo, GuardedCollaborators};
use crate::config::{PenaltyConfig, ScoringConfig};
use crate::domain::SourceUrl;
use crate::lists::ListSnapshot;
use crate::types::{RejectionReason, Snippet, SnippetVerdict};
use futures::stream::{self, StreamExt};

const SENTENCE_WINDOW: usize = 3;
const WINDOW_CONCURRENCY: usize = 4;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidatedSnippet {
    pub domain: String,
    pub is_approved_domain: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Validation {
    Passed(ValidatedSnippet),
    Rejected(SnippetVerdict),
}

#[derive(Debug, Clone)]
pub struct SnippetValidator {
    penalties: PenaltyConfig,
    min_excerpt_words: usize,
    max_excerpt_chars: usize,
    too_similar_threshold: f64,
    page_match_threshold: f64,
    max_page_windows: usize,
}

impl SnippetValidator {
    pub fn new(config: &ScoringConfig) -> Self {
        Self {
            penalties: config.penalties.clone(),
            min_excerpt_words: config.min_excerpt_words,
            max_excerpt_chars: config.max_excerpt_chars,
            too_similar_threshold: config.too_similar_threshold,
            page_match_threshold: config.page_match_threshold,
            max_page_windows: config.max_page_windows,
        }
    }

    /// Runs the integrity checks in order and stops at the first failure, so
    /// a snippet is only ever excluded for one reason.
    pub async fn validate(
        &self,
        collaborators: &GuardedCollaborators,
        lists: &ListSnapshot,
        statement: &str,
        snippet: &Snippet,
    ) -> Validation {
        let source = match SourceUrl::parse(&snippet.source_url) {
            Some(source) if source.is_secure() => source,
            parsed => {
                let domain = parsed.map(|s| s.domain().to_string());
                return self.reject(RejectionReason::InsecureScheme, domain);
            }
        };
        let domain = source.domain().to_string();

        let info = match collaborators.lookup(&domain).await {
            Ok(info) => info.unwrap_or_default(),
            Err(e) => {
                tracing::debug!(domain = %domain, error = %e, "Registry lookup failed, using lists only");
                DomainInfo::default()
            }
        };

        if lists.is_blacklisted(&domain) || info.is_blacklisted {
            return self.reject(RejectionReason::Blacklisted, Some(domain));
        }

        if lists.is_search_engine(&domain)
            || info.is_search_engine
            || source.is_search_results_page()
        {
            return self.reject(RejectionReason::SearchEngine, Some(domain));
        }

        if !self.is_well_formed_excerpt(&snippet.excerpt) {
            return self.reject(RejectionReason::MalformedExcerpt, Some(domain));
        }

        match collaborators.similarity(statement, &snippet.excerpt).await {
            Ok(similarity) if similarity <= self.too_similar_threshold => {}
            Ok(similarity) => {
                tracing::debug!(domain = %domain, similarity, "Excerpt restates the statement");
                return self.reject(RejectionReason::TooSimilar, Some(domain));
            }
            Err(_) => return self.reject(RejectionReason::TooSimilar, Some(domain)),
        }

        if !self
            .is_present_on_page(collaborators, source.as_str(), &snippet.excerpt)
            .await
        {
            return self.reject(RejectionReason::NotFoundOnPage, Some(domain));
        }

        match collaborators
            .is_fabricated(statement, &snippet.excerpt)
            .await
        {
            Ok(false) => {}
            Ok(true) | Err(_) => return self.reject(RejectionReason::Fabricated, Some(domain)),
        }

        let is_approved_domain = lists.is_approved(&domain) || info.is_approved;

        Validation::Passed(ValidatedSnippet {
            domain,
            is_approved_domain,
        })
    }

    pub fn reject(&self, reason: RejectionReason, domain: Option<String>) -> Validation {
        Validation::Rejected(SnippetVerdict::rejected(
            reason,
            self.penalties.for_reason(reason),
            domain,
        ))
    }

    pub fn is_well_formed_excerpt(&self, excerpt: &str) -> bool {
        let trimmed = excerpt.trim();

        if trimmed.chars().count() > self.max_excerpt_chars {
            return false;
        }

        if trimmed.split_whitespace().count() < self.min_excerpt_words {
            return false;
        }

        if trimmed.chars().any(|c| c.is_control() && !c.is_whitespace()) {
            return false;
        }

        !contains_markup(trimmed)
    }

    async fn is_present_on_page(
        &self,
        collaborators: &GuardedCollaborators,
        url: &str,
        excerpt: &str,
    ) -> bool {
        let page = match collaborators.fetch(url).await {
            Ok(page) => page,
            Err(e) => {
                tracing::debug!(url = %url, error = %e, "Fetch failed, treating excerpt as not found");
                return false;
            }
        };

        let page_text = strip_markup(&page);
        if normalize_text(&page_text).contains(&normalize_text(excerpt)) {
            return true;
        }

        let windows = sentence_windows(&page_text, SENTENCE_WINDOW, self.max_page_windows);
        if windows.is_empty() {
            return false;
        }

        let threshold = self.page_match_threshold;
        let mut scores = stream::iter(windows)
            .map(|window| async move {
                collaborators
                    .similarity(excerpt, &window)
                    .await
                    .unwrap_or(0.0)
            })
            .buffer_unordered(WINDOW_CONCURRENCY);

        while let Some(score) = scores.next().await {
            if score > threshold {
                return true;
            }
        }

        false
    }
}

fn contains_markup(text: &str) -> bool {
    let bytes = text.as_bytes();
    bytes.windows(2).enumerate().any(|(i, pair)| {
        pair[0] == b'<'
            && (pair[1].is_ascii_alphabetic() || pair[1] == b'/' || pair[1] == b'!')
            && text[i..].contains('>')
    })
}

/// Drop `<...>` tags and decode the handful of entities that commonly
/// appear in page text.
pub fn strip_markup(html: &str) -> String {
    let mut out = String::with_capacity(html.len());
    let mut in_tag = false;

    for c in html.chars() {
        match c {
            '<' => in_tag = true,
            '>' if in_tag => {
                in_tag = false;
                out.push(' ');
            }
            _ if !in_tag => out.push(c),
            _ => {}
        }
    }

    out.replace("&nbsp;", " ")
        .replace("&quot;", "\"")
        .replace("&#39;", "'")
        .replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&amp;", "&")
}

pub fn normalize_text(text: &str) -> String {
    text.split_whitespace()
        .map(|word| {
            word.chars()
                .map(|c| match c {
                    '\u{2018}' | '\u{2019}' => '\'',
                    '\u{201C}' | '\u{201D}' => '"',
                    '\u{2013}' | '\u{2014}' => '-',
                    c => c,
                })
                .flat_map(char::to_lowercase)
                .collect::<String>()
        })
        .collect::<Vec<_>>()
        .join(" ")
}

pub fn sentence_windows(text: &str, size: usize, max_windows: usize) -> Vec<String> {
    let collapsed = text.split_whitespace().collect::<Vec<_>>().join(" ");
    let sentences: Vec<&str> = collapsed
        .split(". ")
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .collect();

    (0..sentences.len())
        .take(max_windows)
        .map(|start| {
            let end = (start + size).min(sentences.len());
            sentences[start..end].join(". ")
        })
        .collect()
}
