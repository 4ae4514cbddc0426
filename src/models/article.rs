use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A stored article row.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Article {
    pub id: i64,
    pub title: String,
    pub url: String,
    pub source: String,
    /// `YYYY-MM-DD`, or the raw reinterpreted text when the site date was malformed.
    pub published_at: String,
    pub created_at: DateTime<Utc>,
    /// `None` while the article is pending delivery.
    pub delivered_at: Option<DateTime<Utc>>,
}

impl Article {
    #[cfg(test)]
    pub fn is_pending(&self) -> bool {
        self.delivered_at.is_none()
    }

    /// Two-line chat message: headline, then link.
    pub fn message_body(&self) -> String {
        format!("{}\n{}", self.title, self.url)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewArticle {
    pub title: String,
    pub url: String,
    pub source: String,
    pub published_at: String,
}

/// Raw item pulled from a listing page, before date normalization.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Candidate {
    pub title: String,
    pub url: String,
    pub raw_date: String,
}

impl Candidate {
    pub fn into_new_article(self, source: &str, published_at: String) -> NewArticle {
        NewArticle {
            title: self.title,
            url: self.url,
            source: source.to_string(),
            published_at,
        }
    }
}

/// Which pending article the delivery step picks first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeliveryOrder {
    /// Highest id first. Older backlog waits while new items keep arriving.
    #[default]
    NewestFirst,
    /// Lowest id first.
    OldestFirst,
}

impl DeliveryOrder {
    pub(crate) fn sql(self) -> &'static str {
        match self {
            DeliveryOrder::NewestFirst => "DESC",
            DeliveryOrder::OldestFirst => "ASC",
        }
    }
}
