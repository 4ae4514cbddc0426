mod article;

pub use article::{Article, Candidate, DeliveryOrder, NewArticle};
