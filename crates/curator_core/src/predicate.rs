use std::collections::BTreeSet;

use crate::config::TagDefinition;
use crate::model::{Article, ArticleFormat, ReadState, TagSet};

/// Boolean tag membership test. An empty clause never excludes.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TagCriteria {
    pub all_tags: TagSet,
    pub any_tags: TagSet,
    pub not_any_tags: TagSet,
}

impl TagCriteria {
    pub fn is_empty(&self) -> bool {
        self.all_tags.is_empty() && self.any_tags.is_empty() && self.not_any_tags.is_empty()
    }

    pub fn evaluate(&self, tags: &TagSet) -> bool {
        let all = self.all_tags.iter().all(|tag| tags.contains(tag));
        let any = self.any_tags.is_empty() || self.any_tags.iter().any(|tag| tags.contains(tag));
        let none = !self.not_any_tags.iter().any(|tag| tags.contains(tag));
        all && any && none
    }
}

/// Full membership rule of one list: tag criteria plus format and read-state filters.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ListQuery {
    pub criteria: TagCriteria,
    /// Empty admits every format.
    pub formats: BTreeSet<ArticleFormat>,
    pub read_state: Option<ReadState>,
}

impl ListQuery {
    pub fn is_unconstrained(&self) -> bool {
        self.criteria.is_empty() && self.formats.is_empty() && self.read_state.is_none()
    }

    pub fn admits_format(&self, format: ArticleFormat) -> bool {
        self.formats.is_empty() || self.formats.contains(&format)
    }

    pub fn admits_read_state(&self, state: ReadState) -> bool {
        self.read_state.is_none_or(|wanted| wanted == state)
    }

    /// Tag and read-state filters only. The format filter is applied by the
    /// resolver against the rendition that will actually be listed.
    pub fn admits_tags_and_state(&self, article: &Article) -> bool {
        self.admits_read_state(article.read_state) && self.criteria.evaluate(&article.tags)
    }

    pub fn admits(&self, article: &Article) -> bool {
        self.admits_format(article.format) && self.admits_tags_and_state(article)
    }
}

/// Whether `definition` may be assigned to an article carrying `tags`. A tag
/// with no applicability clauses applies everywhere.
pub fn prerequisites_met(definition: &TagDefinition, tags: &TagSet) -> bool {
    definition.applies_to.evaluate(tags)
}
