use serde::{Deserialize, Serialize};

use crate::field::Field;
use crate::time::Timestamp;

#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Paper {
    pub id: String,
    pub title: String,
    #[serde(default)]
    pub authors: Vec<String>,
    #[serde(default)]
    pub r#abstract: String,
    #[serde(default)]
    pub journal: String,
    pub publish_date: Timestamp,
    pub field: Field,
}

/// A paper as a user sees it: marked if it's one of their favorites.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FeedPaper {
    #[serde(flatten)]
    pub paper: Paper,
    pub favorite: bool,
}

impl FeedPaper {
    pub fn mark(papers: Vec<Paper>, favorites: &[String]) -> Vec<Self> {
        papers
            .into_iter()
            .map(|paper| Self {
                favorite: favorites.contains(&paper.id),
                paper,
            })
            .collect()
    }
}

/// How many papers the recommended listing returns at most.
pub const RECOMMENDED_LIMIT: usize = 20;
/// How far back, in days, the recommended listing looks.
pub const RECOMMENDED_DAYS: i64 = 7;

/// Which of the two paper listings a client asked for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Listing {
    /// Everything in the user's fields.
    All,
    /// Only the last week's papers, capped.
    Recommended,
}

/// What a client may narrow a listing by.
#[derive(Debug, Clone, Copy, Default, Deserialize)]
pub struct PaperFilter {
    /// Only this field, which must be one the user selected.
    pub field: Option<Field>,
    /// Only papers from the last this-many days. Overrides the listing's
    /// own window.
    pub days: Option<u32>,
}

/// A backend-level paper query. Results are newest first.
#[derive(Debug, Clone)]
pub struct PaperQuery {
    pub fields: Vec<Field>,
    pub since: Option<Timestamp>,
    pub limit: Option<usize>,
}

impl PaperQuery {
    pub fn matches(&self, paper: &Paper) -> bool {
        if !self.fields.contains(&paper.field) {
            return false;
        }
        match self.since {
            Some(since) => paper.publish_date >= since,
            None => true,
        }
    }
}

/// Sorts newest first and applies the query's limit.
pub fn sort_and_limit(papers: &mut Vec<Paper>, limit: Option<usize>) {
    papers.sort_by(|a, b| b.publish_date.cmp(&a.publish_date));

    if let Some(limit) = limit {
        papers.truncate(limit);
    }
}
