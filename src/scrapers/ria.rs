use crate::config::MarketplaceConfig;
use crate::error::FetchError;
use crate::models::ListingDocument;
use crate::scrapers::traits::ListingSource;
use crate::scrapers::types::{PageResult, SearchParams};
use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde_json::Value;
use std::time::Duration;
use tracing::{debug, warn};

const ASSET_TIMEOUT: Duration = Duration::from_secs(20);

/// HTTP fetcher for the dom.ria.com search, detail and owner endpoints
pub struct ListingFetcher {
    client: Client,
    base_url: String,
    search_timeout: Duration,
    detail_timeout: Duration,
}

impl ListingFetcher {
    pub fn new(config: &MarketplaceConfig) -> Result<Self> {
        let client = Client::builder()
            .user_agent(config.user_agent.as_str())
            .build()
            .context("Failed to create HTTP client")?;

        Ok(Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            search_timeout: config.search_timeout(),
            detail_timeout: config.detail_timeout(),
        })
    }

    async fn get_text(
        &self,
        url: &str,
        query: &[(&str, String)],
        timeout: Duration,
    ) -> Result<(StatusCode, String), FetchError> {
        let response = self
            .client
            .get(url)
            .query(query)
            .timeout(timeout)
            .send()
            .await
            .map_err(FetchError::from_reqwest)?;

        let status = response.status();
        let body = response.text().await.map_err(FetchError::from_reqwest)?;
        Ok((status, body))
    }
}

#[async_trait]
impl ListingSource for ListingFetcher {
    async fn fetch_page(&self, params: &SearchParams, page: u32) -> Result<PageResult, FetchError> {
        let url = format!("{}/node/searchEngine/v2/", self.base_url);
        debug!("Fetching search page {} for region {}", page, params.region_id);

        let (status, body) = self
            .get_text(&url, &params.query(page), self.search_timeout)
            .await?;
        if !status.is_success() {
            return Err(FetchError::Http(format!("search returned {status}")));
        }

        parse_search_body(&body)
    }

    async fn fetch_detail(&self, id: u64) -> Result<ListingDocument, FetchError> {
        let url = format!("{}/realty/data/{}", self.base_url, id);
        let query = [("lang_id", "4".to_string()), ("key", String::new())];

        let (status, body) = self.get_text(&url, &query, self.detail_timeout).await?;
        if status == StatusCode::NOT_FOUND {
            return Err(FetchError::NotFound(id));
        }
        if !status.is_success() {
            return Err(FetchError::Http(format!("detail {id} returned {status}")));
        }

        let value: Value =
            serde_json::from_str(&body).map_err(|e| FetchError::Malformed(e.to_string()))?;
        if !value.is_object() {
            return Err(FetchError::Malformed(format!("detail {id} is not an object")));
        }

        Ok(ListingDocument::from_value(id, &value))
    }

    async fn lookup_phone(&self, hash: &str) -> Result<Option<String>, FetchError> {
        let url = format!(
            "{}/v1/api/realty/getOwnerAndAgencyData/{}",
            self.base_url, hash
        );
        let query = [("spa_final_page", "true".to_string())];

        let (status, body) = self.get_text(&url, &query, self.detail_timeout).await?;
        if !status.is_success() {
            return Err(FetchError::Http(format!("owner lookup returned {status}")));
        }

        let value: Value =
            serde_json::from_str(&body).map_err(|e| FetchError::Malformed(e.to_string()))?;
        let phone = value
            .pointer("/owner/phones/0/phone_num")
            .and_then(Value::as_str)
            .map(str::to_string);

        if phone.is_none() {
            warn!("Owner lookup succeeded but carried no phone");
        }
        Ok(phone)
    }

    async fn fetch_asset(&self, url: &str) -> Result<Vec<u8>, FetchError> {
        let response = self
            .client
            .get(url)
            .timeout(ASSET_TIMEOUT)
            .send()
            .await
            .map_err(FetchError::from_reqwest)?;

        if !response.status().is_success() {
            return Err(FetchError::Http(format!("asset returned {}", response.status())));
        }

        let bytes = response.bytes().await.map_err(FetchError::from_reqwest)?;
        Ok(bytes.to_vec())
    }
}

/// Parse `{"items": [...]}`. A missing `items` array is malformed, not empty.
fn parse_search_body(body: &str) -> Result<PageResult, FetchError> {
    let value: Value =
        serde_json::from_str(body).map_err(|e| FetchError::Malformed(e.to_string()))?;

    let items = value
        .get("items")
        .and_then(Value::as_array)
        .ok_or_else(|| FetchError::Malformed("search response has no items array".to_string()))?;

    let ids = items
        .iter()
        .filter_map(|item| match item {
            Value::Number(n) => n.as_u64(),
            Value::String(s) => s.parse().ok(),
            _ => None,
        })
        .collect();

    Ok(PageResult::from_ids(ids))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use wiremock::matchers::{method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn fetcher(server: &MockServer) -> ListingFetcher {
        let config = MarketplaceConfig {
            base_url: server.uri(),
            search_timeout_secs: 2,
            detail_timeout_secs: 2,
            ..Default::default()
        };
        ListingFetcher::new(&config).unwrap()
    }

    #[test]
    fn test_parse_search_body() {
        let page = parse_search_body(r#"{"items":[1,"2",{"x":3}]}"#).unwrap();
        assert_eq!(page.ids, vec![1, 2]);
        assert!(!page.exhausted);

        assert!(parse_search_body(r#"{"items":[]}"#).unwrap().exhausted);
        assert!(matches!(
            parse_search_body(r#"{"count":0}"#),
            Err(FetchError::Malformed(_))
        ));
        assert!(matches!(
            parse_search_body("<html>busy</html>"),
            Err(FetchError::Malformed(_))
        ));
    }

    #[tokio::test]
    async fn test_fetch_page_sends_search_query() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/node/searchEngine/v2/"))
            .and(query_param("state_id", "5"))
            .and(query_param("page", "1"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"items": [11, 12]})))
            .expect(1)
            .mount(&server)
            .await;

        let page = fetcher(&server)
            .fetch_page(&SearchParams::default(), 1)
            .await
            .unwrap();
        assert_eq!(page.ids, vec![11, 12]);
    }

    #[tokio::test]
    async fn test_server_error_is_not_exhaustion() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/node/searchEngine/v2/"))
            .respond_with(ResponseTemplate::new(503))
            .mount(&server)
            .await;

        let result = fetcher(&server).fetch_page(&SearchParams::default(), 0).await;
        assert!(matches!(result, Err(FetchError::Http(_))));
    }

    #[tokio::test]
    async fn test_slow_search_times_out() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/node/searchEngine/v2/"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(json!({"items": [1]}))
                    .set_delay(Duration::from_secs(5)),
            )
            .mount(&server)
            .await;

        let result = fetcher(&server).fetch_page(&SearchParams::default(), 0).await;
        assert!(matches!(result, Err(FetchError::Timeout(_))));
    }

    #[tokio::test]
    async fn test_fetch_detail_and_not_found() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/realty/data/77"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "publishing_date": "2025-06-01 10:00:00",
                "rooms_count": 2,
                "total_square_meters": 50.0,
                "beautiful_url": "realty-77.html"
            })))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/realty/data/78"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;

        let fetcher = fetcher(&server);
        let doc = fetcher.fetch_detail(77).await.unwrap();
        assert_eq!(doc.id, 77);
        assert_eq!(doc.beautiful_url, "realty-77.html");

        assert!(matches!(
            fetcher.fetch_detail(78).await,
            Err(FetchError::NotFound(78))
        ));
    }

    #[tokio::test]
    async fn test_lookup_phone() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/v1/api/realty/getOwnerAndAgencyData/abc123"))
            .and(query_param("spa_final_page", "true"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "owner": {"phones": [{"phone_num": "(093) 612 09 93"}]}
            })))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/v1/api/realty/getOwnerAndAgencyData/nophone"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"owner": {}})))
            .mount(&server)
            .await;

        let fetcher = fetcher(&server);
        assert_eq!(
            fetcher.lookup_phone("abc123").await.unwrap().as_deref(),
            Some("(093) 612 09 93")
        );
        assert_eq!(fetcher.lookup_phone("nophone").await.unwrap(), None);
    }
}
