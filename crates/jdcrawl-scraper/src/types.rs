//! Wire shapes of the JD review, QA, and search responses.
//!
//! Only the fields the crawler reads are modelled; serde ignores the rest.

use std::fmt;

use jdcrawl_core::ProductId;
use serde::Deserialize;

/// Ids arrive as JSON numbers on some endpoints and strings on others.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(untagged)]
pub enum RawId {
    Number(u64),
    Text(String),
}

impl fmt::Display for RawId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RawId::Number(n) => write!(f, "{n}"),
            RawId::Text(s) => f.write_str(s),
        }
    }
}

/// `functionId=pc_club_productPageComments`
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReviewPageResponse {
    pub comments: Option<Vec<RawComment>>,
    pub max_page: Option<u32>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawComment {
    pub id: RawId,
    pub nickname: Option<String>,
    pub content: Option<String>,
    pub creation_time: Option<String>,
    pub score: Option<u8>,
    pub location: Option<String>,
    pub reference_name: Option<String>,
}

/// `functionId=getQuestionAnswerList`
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QaPageResponse {
    pub question_list: Option<Vec<RawQuestion>>,
    pub total_page: Option<u32>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawQuestion {
    pub id: RawId,
    pub content: Option<String>,
    pub created: Option<String>,
    #[serde(default)]
    pub answer_list: Option<Vec<RawAnswer>>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawAnswer {
    pub id: RawId,
    pub content: Option<String>,
    pub created: Option<String>,
    pub location: Option<String>,
}

/// One product tile on a keyword search results page.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SearchHit {
    pub product_id: ProductId,
    pub description: String,
}
