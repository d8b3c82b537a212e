use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{Value, json};
use url::Url;

use common::config::SearchConfig;
use uniquery_api::error::BackendErrorBody;
use uniquery_api::view::DeletePitsResponse;

use super::{ALL_PITS, GatewayError, GatewayResponse, SearchGateway, keep_alive_param};

/// `SearchGateway` over the OpenSearch REST API.
#[derive(Debug, Clone)]
pub struct OpenSearchGateway {
    base_url: Url,
    username: Option<String>,
    password: Option<String>,
    http: reqwest::Client,
}

#[derive(Deserialize)]
struct CreatePitResponse {
    pit_id: String,
}

impl OpenSearchGateway {
    pub fn new(config: &SearchConfig) -> Result<Self, GatewayError> {
        let base_url = Url::parse(&format!("{}/", config.url.trim_end_matches('/')))
            .map_err(|e| GatewayError::transport(format!("invalid search url: {e}")))?;
        let http = reqwest::Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|e| GatewayError::transport(e.to_string()))?;

        Ok(Self {
            base_url,
            username: config.username.clone(),
            password: config.password.clone(),
            http,
        })
    }

    fn endpoint(&self, path: &str) -> Result<Url, GatewayError> {
        self.base_url
            .join(path)
            .map_err(|e| GatewayError::transport(format!("invalid search path '{path}': {e}")))
    }

    fn request(&self, method: reqwest::Method, url: Url) -> reqwest::RequestBuilder {
        let builder = self.http.request(method, url);
        match &self.username {
            Some(user) => builder.basic_auth(user, self.password.as_ref()),
            None => builder,
        }
    }

    async fn send(&self, builder: reqwest::RequestBuilder) -> Result<GatewayResponse, GatewayError> {
        let resp = builder.send().await.map_err(|e| {
            log::error!("Search backend request failed: {e}");
            GatewayError::transport(e.to_string())
        })?;
        handle_response(resp).await
    }
}

async fn handle_response(resp: reqwest::Response) -> Result<GatewayResponse, GatewayError> {
    let status = resp.status().as_u16();
    if resp.status().is_success() {
        let body = resp
            .bytes()
            .await
            .map_err(|e| GatewayError::transport(e.to_string()))?;
        Ok(GatewayResponse { status, body })
    } else {
        let text = resp.text().await.unwrap_or_default();
        Err(error_from_body(status, &text))
    }
}

/// Extract `error.type`/`error.reason`; the body itself is never forwarded.
fn error_from_body(status: u16, text: &str) -> GatewayError {
    match serde_json::from_str::<BackendErrorBody>(text) {
        Ok(body) => GatewayError {
            status,
            error_type: body.error.error_type,
            message: body.error.reason,
        },
        Err(_) => GatewayError {
            status,
            error_type: String::new(),
            message: format!("search backend responded with status {status}"),
        },
    }
}

fn index_path(indices: &[String], suffix: &str) -> String {
    format!("{}/{suffix}", indices.join(","))
}

#[async_trait]
impl SearchGateway for OpenSearchGateway {
    async fn search_submit(
        &self,
        query: &Value,
        indices: &[String],
        scroll: Option<Duration>,
        preference: &str,
        track_total_hits: bool,
    ) -> Result<GatewayResponse, GatewayError> {
        let url = self.endpoint(&index_path(indices, "_search"))?;
        let mut params = vec![
            ("ignore_unavailable", "true".to_string()),
            ("allow_no_indices", "true".to_string()),
            ("track_total_hits", track_total_hits.to_string()),
        ];
        if let Some(keep_alive) = scroll {
            params.push(("scroll", keep_alive_param(keep_alive)));
        }
        if !preference.is_empty() {
            params.push(("preference", preference.to_string()));
        }

        self.send(
            self.request(reqwest::Method::POST, url)
                .query(&params)
                .json(query),
        )
        .await
    }

    async fn scroll(
        &self,
        scroll_id: &str,
        keep_alive: Duration,
    ) -> Result<GatewayResponse, GatewayError> {
        let url = self.endpoint("_search/scroll")?;
        let body = json!({
            "scroll": keep_alive_param(keep_alive),
            "scroll_id": scroll_id,
        });
        self.send(self.request(reqwest::Method::POST, url).json(&body))
            .await
    }

    async fn count(
        &self,
        query: &Value,
        indices: &[String],
    ) -> Result<GatewayResponse, GatewayError> {
        let url = self.endpoint(&index_path(indices, "_count"))?;
        let mut body = json!({});
        if let Some(q) = query.get("query") {
            body["query"] = q.clone();
        }
        self.send(
            self.request(reqwest::Method::POST, url)
                .query(&[("ignore_unavailable", "true"), ("allow_no_indices", "true")])
                .json(&body),
        )
        .await
    }

    async fn create_point_in_time(
        &self,
        indices: &[String],
        keep_alive: Duration,
    ) -> Result<String, GatewayError> {
        let url = self.endpoint(&index_path(indices, "_search/point_in_time"))?;
        let response = self
            .send(
                self.request(reqwest::Method::POST, url)
                    .query(&[("keep_alive", keep_alive_param(keep_alive))]),
            )
            .await?;

        serde_json::from_slice::<CreatePitResponse>(&response.body)
            .map(|r| r.pit_id)
            .map_err(|e| GatewayError {
                status: response.status,
                error_type: String::new(),
                message: format!("point in time response without pit_id: {e}"),
            })
    }

    async fn search_with_pit(&self, query: &Value) -> Result<GatewayResponse, GatewayError> {
        let url = self.endpoint("_search")?;
        self.send(self.request(reqwest::Method::POST, url).json(query))
            .await
    }

    async fn delete_point_in_time(
        &self,
        pit_ids: &[String],
    ) -> Result<DeletePitsResponse, GatewayError> {
        let builder = if pit_ids.iter().any(|id| id == ALL_PITS) {
            self.request(
                reqwest::Method::DELETE,
                self.endpoint("_search/point_in_time/_all")?,
            )
        } else {
            self.request(
                reqwest::Method::DELETE,
                self.endpoint("_search/point_in_time")?,
            )
            .json(&json!({ "pit_id": pit_ids }))
        };

        let response = self.send(builder).await?;
        serde_json::from_slice(&response.body).map_err(|e| GatewayError {
            status: response.status,
            error_type: String::new(),
            message: format!("unexpected point in time deletion response: {e}"),
        })
    }

    async fn delete_scroll(&self, scroll_ids: &[String]) -> Result<GatewayResponse, GatewayError> {
        let url = self.endpoint("_search/scroll")?;
        self.send(
            self.request(reqwest::Method::DELETE, url)
                .json(&json!({ "scroll_id": scroll_ids })),
        )
        .await
    }
}
