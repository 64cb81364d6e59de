//! Request URL construction for the JD endpoints.
//!
//! The crawl layer always counts pages from 0. Each endpoint numbers its
//! pages differently:
//!
//! - reviews: 0-based `page`
//! - QA: 1-based `page`
//! - search: every visible results page is served as two half-pages. The
//!   first half of visible page `n` (1-based) is `/Search?page=2n-1`; the
//!   second is loaded on scroll from `/s_new.php?page=2n`.

use jdcrawl_core::ProductId;
use reqwest::Url;

use super::{Endpoints, ReviewParams};
use crate::error::CrawlError;

fn parse_base(base: &str) -> Result<Url, CrawlError> {
    Url::parse(base).map_err(|e| CrawlError::InvalidUrl {
        url: base.to_owned(),
        reason: e.to_string(),
    })
}

pub(super) fn review_url(
    endpoints: &Endpoints,
    params: &ReviewParams,
    product_id: &ProductId,
    page_index: u32,
) -> Result<String, CrawlError> {
    let mut url = parse_base(&endpoints.api_base)?;
    url.query_pairs_mut()
        .append_pair("appid", "item-v3")
        .append_pair("functionId", "pc_club_productPageComments")
        .append_pair("client", "pc")
        .append_pair("clientVersion", "1.0.0")
        .append_pair("productId", product_id.as_str())
        .append_pair("score", &params.score.to_string())
        .append_pair("sortType", &params.sort_type.to_string())
        .append_pair("page", &page_index.to_string())
        .append_pair("pageSize", &params.page_size.to_string())
        .append_pair("isShadowSku", "0")
        .append_pair("fold", "0");
    Ok(url.into())
}

pub(super) fn qa_url(
    endpoints: &Endpoints,
    product_id: &ProductId,
    page_index: u32,
) -> Result<String, CrawlError> {
    let mut url = parse_base(&endpoints.api_base)?;
    url.query_pairs_mut()
        .append_pair("appid", "item-v3")
        .append_pair("functionId", "getQuestionAnswerList")
        .append_pair("client", "pc")
        .append_pair("clientVersion", "1.0.0")
        .append_pair("page", &page_index.saturating_add(1).to_string())
        .append_pair("productId", product_id.as_str());
    Ok(url.into())
}

/// Tiles per half-page; the second half starts right after the first.
const SEARCH_HALF_SIZE: u32 = 30;

pub(super) fn search_url(
    endpoints: &Endpoints,
    keyword: &str,
    page_index: u32,
) -> Result<String, CrawlError> {
    let mut url = parse_base(&endpoints.search_base)?;
    url.set_path("/Search");
    let site_page = page_index.saturating_mul(2).saturating_add(1);
    url.query_pairs_mut()
        .append_pair("keyword", keyword)
        .append_pair("enc", "utf-8")
        .append_pair("page", &site_page.to_string());
    Ok(url.into())
}

pub(super) fn search_tail_url(
    endpoints: &Endpoints,
    keyword: &str,
    page_index: u32,
) -> Result<String, CrawlError> {
    let mut url = parse_base(&endpoints.search_base)?;
    url.set_path("/s_new.php");
    let site_page = page_index.saturating_mul(2).saturating_add(2);
    let first_tile = site_page
        .saturating_sub(1)
        .saturating_mul(SEARCH_HALF_SIZE)
        .saturating_add(1);
    url.query_pairs_mut()
        .append_pair("keyword", keyword)
        .append_pair("enc", "utf-8")
        .append_pair("page", &site_page.to_string())
        .append_pair("s", &first_tile.to_string())
        .append_pair("scrolling", "y");
    Ok(url.into())
}

/// Product detail page, sent as the `Referer` of feed requests.
pub(super) fn item_referer(product_id: &ProductId) -> String {
    format!("https://item.jd.com/{product_id}.html")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn endpoints() -> Endpoints {
        Endpoints {
            api_base: "https://api.m.jd.com".to_owned(),
            search_base: "https://search.jd.com".to_owned(),
        }
    }

    fn query(url: &str, key: &str) -> Option<String> {
        Url::parse(url)
            .unwrap()
            .query_pairs()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.into_owned())
    }

    #[test]
    fn review_pages_are_zero_based() {
        let pid = ProductId::new("100012043978").unwrap();
        let url = review_url(&endpoints(), &ReviewParams::default(), &pid, 0).unwrap();
        assert_eq!(query(&url, "page").as_deref(), Some("0"));
        assert_eq!(query(&url, "productId").as_deref(), Some("100012043978"));
        assert_eq!(query(&url, "sortType").as_deref(), Some("6"));
        assert_eq!(query(&url, "score").as_deref(), Some("0"));
    }

    #[test]
    fn qa_pages_are_one_based() {
        let pid = ProductId::new("1").unwrap();
        let url = qa_url(&endpoints(), &pid, 0).unwrap();
        assert_eq!(query(&url, "page").as_deref(), Some("1"));
        assert_eq!(
            query(&url, "functionId").as_deref(),
            Some("getQuestionAnswerList")
        );
    }

    #[test]
    fn search_pages_skip_half_pages_and_encode_keyword() {
        let url = search_url(&endpoints(), "笔记本 电脑", 2).unwrap();
        assert!(url.starts_with("https://search.jd.com/Search?"));
        assert_eq!(query(&url, "page").as_deref(), Some("5"));
        assert_eq!(query(&url, "keyword").as_deref(), Some("笔记本 电脑"));
        assert!(!url.contains(' '));
    }

    #[test]
    fn search_tail_is_the_following_half_page() {
        let url = search_tail_url(&endpoints(), "laptop", 2).unwrap();
        assert!(url.starts_with("https://search.jd.com/s_new.php?"));
        assert_eq!(query(&url, "page").as_deref(), Some("6"));
        assert_eq!(query(&url, "s").as_deref(), Some("151"));
        assert_eq!(query(&url, "scrolling").as_deref(), Some("y"));
    }

    #[test]
    fn invalid_base_is_reported() {
        let bad = Endpoints {
            api_base: "not a url".to_owned(),
            search_base: "also bad".to_owned(),
        };
        let pid = ProductId::new("1").unwrap();
        assert!(matches!(
            qa_url(&bad, &pid, 0),
            Err(CrawlError::InvalidUrl { .. })
        ));
    }
}
