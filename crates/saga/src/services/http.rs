//! HTTP clients for the user and product services.

use std::time::Duration;

use async_trait::async_trait;
use domain::{Product, ProductId, StockAdjustmentBatch, User, UserId};
use reqwest::{Client, Response, StatusCode};
use serde::Serialize;
use serde::de::DeserializeOwned;

use crate::error::{Result, SagaError};
use crate::services::catalog::Catalog;
use crate::services::users::UserDirectory;

fn build_client(timeout: Duration) -> Result<Client> {
    Client::builder()
        .timeout(timeout)
        .build()
        .map_err(|e| SagaError::upstream(format!("failed to build HTTP client: {e}")))
}

fn send_error(service: &str, err: reqwest::Error) -> SagaError {
    if err.is_timeout() {
        SagaError::upstream(format!("{service} request timed out"))
    } else {
        SagaError::upstream(format!("{service} request failed: {err}"))
    }
}

/// Decodes a successful response or maps the collaborator's error.
///
/// A 404 becomes [`SagaError::NotFound`]; any other non-2xx becomes
/// [`SagaError::Upstream`] with the collaborator's status and its `error`
/// message verbatim.
async fn read_json<T: DeserializeOwned>(service: &str, response: Response) -> Result<T> {
    let status = response.status();
    if status.is_success() {
        return response.json::<T>().await.map_err(|e| SagaError::Upstream {
            status: Some(status.as_u16()),
            message: format!("{service} returned an unreadable body: {e}"),
        });
    }

    let body = response.text().await.unwrap_or_default();
    let message = serde_json::from_str::<serde_json::Value>(&body)
        .ok()
        .and_then(|v| v.get("error").and_then(|e| e.as_str()).map(str::to_string))
        .unwrap_or_else(|| {
            if body.is_empty() {
                format!("{service} responded with {status}")
            } else {
                body
            }
        });

    tracing::warn!(service, status = status.as_u16(), %message, "collaborator call failed");

    if status == StatusCode::NOT_FOUND {
        Err(SagaError::NotFound(message))
    } else {
        Err(SagaError::Upstream {
            status: Some(status.as_u16()),
            message,
        })
    }
}

/// User lookups against `GET {base_url}/users/{id}`.
#[derive(Debug, Clone)]
pub struct HttpUserDirectory {
    client: Client,
    base_url: String,
}

impl HttpUserDirectory {
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> Result<Self> {
        Ok(Self {
            client: build_client(timeout)?,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }
}

#[async_trait]
impl UserDirectory for HttpUserDirectory {
    #[tracing::instrument(skip(self), fields(base_url = %self.base_url))]
    async fn get_user(&self, id: UserId) -> Result<User> {
        let response = self
            .client
            .get(format!("{}/users/{id}", self.base_url))
            .send()
            .await
            .map_err(|e| send_error("user-service", e))?;
        read_json("user-service", response).await
    }
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct StockItem {
    product_id: ProductId,
    quantity: i64,
}

#[derive(Serialize)]
struct UpdateStockRequest {
    items: Vec<StockItem>,
}

/// Product reads and stock adjustment against the product service.
///
/// - `GET {base_url}/produtos/{id}`
/// - `POST {base_url}/produtos/update-stock` with `{items: [{productId, quantity}]}`,
///   where `quantity` is the signed delta. The batch idempotency key travels
///   in the `Idempotency-Key` header.
///
/// The product service does not deduplicate on that header, so a repeated
/// batch is applied again. The coordinator skips the stock step for orders it
/// already adjusted, but only within one process: resuming a settlement after
/// a restart can decrement stock twice against this catalog.
#[derive(Debug, Clone)]
pub struct HttpCatalog {
    client: Client,
    base_url: String,
}

impl HttpCatalog {
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> Result<Self> {
        Ok(Self {
            client: build_client(timeout)?,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }
}

#[async_trait]
impl Catalog for HttpCatalog {
    #[tracing::instrument(skip(self), fields(base_url = %self.base_url))]
    async fn get_product(&self, id: ProductId) -> Result<Product> {
        let response = self
            .client
            .get(format!("{}/produtos/{id}", self.base_url))
            .send()
            .await
            .map_err(|e| send_error("product-service", e))?;
        read_json("product-service", response).await
    }

    #[tracing::instrument(skip(self, batch), fields(base_url = %self.base_url, items = batch.adjustments.len()))]
    async fn adjust_stock(&self, batch: &StockAdjustmentBatch) -> Result<Vec<Product>> {
        let body = UpdateStockRequest {
            items: batch
                .adjustments
                .iter()
                .map(|a| StockItem {
                    product_id: a.product_id,
                    quantity: a.delta,
                })
                .collect(),
        };

        let mut request = self
            .client
            .post(format!("{}/produtos/update-stock", self.base_url))
            .json(&body);
        if let Some(key) = &batch.idempotency_key {
            request = request.header("Idempotency-Key", key);
        }

        let response = request
            .send()
            .await
            .map_err(|e| send_error("product-service", e))?;
        read_json("product-service", response).await
    }
}
