use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use std::sync::Arc;
use std::time::Duration;

use super::{GatewayClient, GatewayError, Invoice, InvoiceRequest};

const INVOICES_PATH: &str = "/v2/invoices";

/// Configuration for the Xendit invoice API
#[derive(Debug, Clone)]
pub struct XenditConfig {
    pub secret_key: String,
    pub base_url: String,
}

impl XenditConfig {
    pub fn new(secret_key: impl Into<String>, base_url: impl Into<String>) -> Self {
        Self {
            secret_key: secret_key.into(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
        }
    }
}

#[derive(Debug, Deserialize)]
struct InvoiceSummary {
    status: String,
}

/// Xendit REST client. Basic auth with the secret key as user name and an
/// empty password.
#[derive(Clone)]
pub struct XenditClient {
    config: Arc<XenditConfig>,
    http_client: Client,
}

impl XenditClient {
    pub fn new(config: XenditConfig) -> Result<Self, GatewayError> {
        if config.secret_key.is_empty() {
            return Err(GatewayError::Config("missing Xendit secret key".to_string()));
        }

        let http_client = Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .map_err(|e| GatewayError::Http(e.to_string()))?;

        Ok(XenditClient {
            config: Arc::new(config),
            http_client,
        })
    }

    fn url(&self) -> String {
        format!("{}{}", self.config.base_url, INVOICES_PATH)
    }

    /// Convert a response into `T`, keeping the body of non-2xx responses.
    async fn handle_response<T: serde::de::DeserializeOwned>(
        response: reqwest::Response,
    ) -> Result<T, GatewayError> {
        let status = response.status();

        if status.is_success() {
            response
                .json::<T>()
                .await
                .map_err(|e| GatewayError::Parse(e.to_string()))
        } else {
            let error_body = response
                .text()
                .await
                .unwrap_or_else(|_| "Unable to read error response".to_string());

            Err(GatewayError::Api {
                status_code: status.as_u16(),
                message: error_body,
            })
        }
    }
}

#[async_trait]
impl GatewayClient for XenditClient {
    async fn create_invoice(&self, request: &InvoiceRequest) -> Result<Invoice, GatewayError> {
        let response = self
            .http_client
            .post(self.url())
            .basic_auth(&self.config.secret_key, Some(""))
            .json(request)
            .send()
            .await
            .map_err(|e| GatewayError::Http(e.to_string()))?;

        let invoice: Invoice = Self::handle_response(response).await?;

        tracing::info!(
            external_id = %request.external_id,
            invoice_id = %invoice.id,
            expiry_date = %invoice.expiry_date,
            "Gateway invoice created"
        );

        Ok(invoice)
    }

    async fn check_invoice_status(&self, external_id: &str) -> Result<String, GatewayError> {
        let response = self
            .http_client
            .get(self.url())
            .basic_auth(&self.config.secret_key, Some(""))
            .query(&[("external_id", external_id)])
            .send()
            .await
            .map_err(|e| GatewayError::Http(e.to_string()))?;

        let invoices: Vec<InvoiceSummary> = Self::handle_response(response).await?;

        invoices
            .into_iter()
            .next()
            .map(|invoice| invoice.status)
            .ok_or_else(|| GatewayError::InvoiceNotFound(external_id.to_string()))
    }
}
