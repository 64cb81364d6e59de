//! Response parsers: raw body text in, typed pages out.
//!
//! Every parser returns a [`FetchedPage`] whose `last_page` flag reflects the
//! explicit end-of-feed marker of that endpoint, when the response carries
//! one. A response missing its result list is a [`CrawlError::Schema`], not
//! an empty page, so an anti-bot interstitial never silently ends a feed.

use jdcrawl_core::{FeedType, ProductId, Record, RecordDetail};
use regex::Regex;

use crate::error::CrawlError;
use crate::pagination::FetchedPage;
use crate::types::{QaPageResponse, RawQuestion, ReviewPageResponse, SearchHit};

/// Unwraps `callback({...});` style JSONP. Plain JSON is returned unchanged.
#[must_use]
pub fn strip_jsonp(body: &str) -> &str {
    let trimmed = body.trim();
    if trimmed.starts_with('{') || trimmed.starts_with('[') {
        return trimmed;
    }
    match (trimmed.find('('), trimmed.rfind(')')) {
        (Some(open), Some(close)) if open < close => trimmed[open + 1..close].trim(),
        _ => trimmed,
    }
}

fn decode<'a, T: serde::Deserialize<'a>>(body: &'a str, context: &str) -> Result<T, CrawlError> {
    serde_json::from_str(strip_jsonp(body)).map_err(|source| CrawlError::Deserialize {
        context: context.to_owned(),
        source,
    })
}

fn fold_newlines(text: &str) -> String {
    text.replace(['\r', '\n'], " ")
}

/// Parses one page of `pc_club_productPageComments`.
///
/// `maxPage` counts pages, so page index `i` is the last when
/// `i + 1 >= maxPage`.
///
/// # Errors
///
/// [`CrawlError::Deserialize`] on malformed JSON, [`CrawlError::Schema`] when
/// the `comments` list is absent.
pub fn parse_review_page(
    product_id: &ProductId,
    page_index: u32,
    body: &str,
) -> Result<FetchedPage<Record>, CrawlError> {
    let response: ReviewPageResponse = decode(body, "reviews page")?;
    let comments = response
        .comments
        .ok_or_else(|| CrawlError::schema("reviews page", "missing `comments` list"))?;

    let records = comments
        .into_iter()
        .map(|c| Record {
            product_id: product_id.clone(),
            feed_type: FeedType::Reviews,
            external_record_id: c.id.to_string(),
            content: fold_newlines(c.content.as_deref().unwrap_or_default()),
            timestamp: c.creation_time.unwrap_or_default(),
            detail: RecordDetail::Review {
                author: c.nickname,
                score: c.score,
                location: c.location,
                product_name: c.reference_name,
            },
        })
        .collect();

    let last_page = response
        .max_page
        .is_some_and(|max| page_index.saturating_add(1) >= max);

    Ok(FetchedPage {
        items: records,
        last_page,
    })
}

/// Parses one page of `getQuestionAnswerList`.
///
/// Each answer becomes its own record with identity
/// `"{question_id}:{answer_id}"`; an unanswered question becomes a single
/// record with identity `"{question_id}"`.
///
/// # Errors
///
/// [`CrawlError::Deserialize`] on malformed JSON, [`CrawlError::Schema`] when
/// `questionList` is absent.
pub fn parse_qa_page(
    product_id: &ProductId,
    page_index: u32,
    body: &str,
) -> Result<FetchedPage<Record>, CrawlError> {
    let response: QaPageResponse = decode(body, "qa page")?;
    let questions = response
        .question_list
        .ok_or_else(|| CrawlError::schema("qa page", "missing `questionList`"))?;

    let mut records = Vec::new();
    for question in questions {
        records.extend(question_records(product_id, question));
    }

    let last_page = response
        .total_page
        .is_some_and(|total| page_index.saturating_add(1) >= total);

    Ok(FetchedPage {
        items: records,
        last_page,
    })
}

fn question_records(product_id: &ProductId, question: RawQuestion) -> Vec<Record> {
    let question_id = question.id.to_string();
    let question_content = fold_newlines(question.content.as_deref().unwrap_or_default());
    let question_created = question.created.unwrap_or_default();
    let answers = question.answer_list.unwrap_or_default();

    if answers.is_empty() {
        return vec![Record {
            product_id: product_id.clone(),
            feed_type: FeedType::Qa,
            external_record_id: question_id.clone(),
            content: question_content.clone(),
            timestamp: question_created.clone(),
            detail: RecordDetail::Answer {
                question_id,
                question_content,
                question_created,
                answer_id: None,
                location: None,
            },
        }];
    }

    answers
        .into_iter()
        .map(|answer| {
            let answer_id = answer.id.to_string();
            Record {
                product_id: product_id.clone(),
                feed_type: FeedType::Qa,
                external_record_id: format!("{question_id}:{answer_id}"),
                content: fold_newlines(answer.content.as_deref().unwrap_or_default()),
                timestamp: answer.created.unwrap_or_default(),
                detail: RecordDetail::Answer {
                    question_id: question_id.clone(),
                    question_content: question_content.clone(),
                    question_created: question_created.clone(),
                    answer_id: Some(answer_id),
                    location: answer.location,
                },
            }
        })
        .collect()
}

/// Parses the first half of a keyword search results page.
///
/// Product tiles are `<li class="gl-item" data-sku="...">` elements; the
/// description is the text of the tile's `p-name` `<em>`. The inline
/// `page_count:"N"` script variable is the explicit end marker.
///
/// # Errors
///
/// [`CrawlError::Schema`] when the page has neither product tiles nor the
/// result list container.
pub fn parse_search_page(page_index: u32, body: &str) -> Result<FetchedPage<SearchHit>, CrawlError> {
    let page_count_re =
        Regex::new(r#"page_count\s*:\s*["']?(\d+)"#).expect("valid page_count regex");

    let hits = search_tiles(body);
    if hits.is_empty() && !body.contains("J_goodsList") {
        return Err(CrawlError::schema(
            "search page",
            "no product tiles and no result list container",
        ));
    }

    let page_count = page_count_re
        .captures(body)
        .and_then(|c| c.get(1))
        .and_then(|m| m.as_str().parse::<u32>().ok());
    let last_page = page_count.is_some_and(|count| page_index.saturating_add(1) >= count);

    Ok(FetchedPage {
        items: hits,
        last_page,
    })
}

/// Parses the lazily loaded second half of a results page. The body is a
/// bare fragment of tiles, so an empty body just means no further hits.
#[must_use]
pub fn parse_search_tail(body: &str) -> Vec<SearchHit> {
    search_tiles(body)
}

fn search_tiles(body: &str) -> Vec<SearchHit> {
    let li_re = Regex::new(r#"(?is)<li\b[^>]*>"#).expect("valid li regex");
    let sku_re = Regex::new(r#"(?i)data-sku\s*=\s*["'](\d+)["']"#).expect("valid sku regex");
    let name_re = Regex::new(r#"(?is)<div[^>]*class\s*=\s*["'][^"']*p-name[^"']*["'][^>]*>.*?<em[^>]*>(.*?)</em>"#)
        .expect("valid p-name regex");
    let tags_re = Regex::new(r"(?is)<[^>]+>").expect("valid tags regex");

    let tiles: Vec<(usize, usize, &str)> = li_re
        .find_iter(body)
        .filter(|m| m.as_str().contains("gl-item"))
        .filter_map(|m| {
            let sku = sku_re.captures(m.as_str())?.get(1)?.as_str();
            Some((m.start(), m.end(), sku))
        })
        .collect();

    let mut hits = Vec::with_capacity(tiles.len());
    for (i, (_, tag_end, sku)) in tiles.iter().enumerate() {
        let segment_end = tiles.get(i + 1).map_or(body.len(), |next| next.0);
        let segment = &body[*tag_end..segment_end];
        let description = name_re
            .captures(segment)
            .and_then(|c| c.get(1))
            .map(|m| tags_re.replace_all(m.as_str(), "").trim().to_owned())
            .unwrap_or_default();

        match ProductId::new(*sku) {
            Ok(product_id) => hits.push(SearchHit {
                product_id,
                description,
            }),
            Err(e) => tracing::debug!(error = %e, "skipping search tile with invalid sku"),
        }
    }
    hits
}

#[cfg(test)]
#[path = "parse_test.rs"]
mod tests;
