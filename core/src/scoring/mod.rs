mod aggregator;
mod quality;
mod validator;

pub use aggregator::{domain_factors, ResponseAggregator};
pub use quality::{QualityError, QualityScorer};
pub use validator::{
    normalize_text, sentence_windows, strip_markup, SnippetValidator, ValidatedSnippet,
    Validation,
};
