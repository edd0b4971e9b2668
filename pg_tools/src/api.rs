use std::{sync::Arc, time::Duration};

use gbm_common::Money;
use log::*;
use reqwest::{
    header::{HeaderMap, HeaderValue},
    Client,
    Method,
    StatusCode,
};
use serde::{de::DeserializeOwned, Serialize};

use crate::{
    config::GatewayConfig,
    data_objects::{CancelPaymentRequest, CancelPaymentResponse, PgPayment},
    GatewayApiError,
};

const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Clone)]
pub struct GatewayApi {
    config: GatewayConfig,
    client: Arc<Client>,
}

impl GatewayApi {
    pub fn new(config: GatewayConfig) -> Result<Self, GatewayApiError> {
        let mut headers = HeaderMap::with_capacity(2);
        let mut val = HeaderValue::from_str(&format!("PortOne {}", config.api_secret.reveal()))
            .map_err(|e| GatewayApiError::Initialization(e.to_string()))?;
        val.set_sensitive(true);
        headers.insert("Authorization", val);
        headers.insert("Content-Type", HeaderValue::from_static("application/json"));
        let client = Client::builder()
            .default_headers(headers)
            .timeout(REQUEST_TIMEOUT)
            .build()
            .map_err(|e| GatewayApiError::Initialization(e.to_string()))?;
        Ok(Self { config, client: Arc::new(client) })
    }

    pub async fn rest_query<T: DeserializeOwned, B: Serialize>(
        &self,
        method: Method,
        path: &str,
        params: &[(&str, &str)],
        body: Option<B>,
    ) -> Result<T, GatewayApiError> {
        let url = self.url(path);
        trace!("Sending REST query: {method} {url}");
        let mut req = self.client.request(method, url);
        if !params.is_empty() {
            req = req.query(params);
        }
        if let Some(body) = body {
            req = req.json(&body);
        }
        let response = req.send().await.map_err(|e| GatewayApiError::Transport(e.to_string()))?;
        if response.status().is_success() {
            trace!("REST query successful. {}", response.status());
            response.json::<T>().await.map_err(|e| GatewayApiError::JsonError(e.to_string()))
        } else {
            let status = response.status().as_u16();
            let message = response.text().await.map_err(|e| GatewayApiError::Transport(e.to_string()))?;
            Err(GatewayApiError::QueryError { status, message })
        }
    }

    pub fn url(&self, path: &str) -> String {
        format!("{}{path}", self.config.api_url.trim_end_matches('/'))
    }

    pub fn config(&self) -> &GatewayConfig {
        &self.config
    }

    /// Fetches the payment with the given merchant-side payment id.
    pub async fn get_payment(&self, payment_id: &str) -> Result<PgPayment, GatewayApiError> {
        let path = format!("/payments/{payment_id}");
        let params = self.store_params();
        debug!("Fetching payment {payment_id}");
        let result = self.rest_query::<PgPayment, ()>(Method::GET, &path, &params, None).await;
        match result {
            Err(GatewayApiError::QueryError { status, .. }) if status == StatusCode::NOT_FOUND.as_u16() => {
                Err(GatewayApiError::PaymentNotFound(payment_id.to_string()))
            },
            Ok(payment) => {
                debug!("Fetched payment {payment_id}. Status {}", payment.status);
                Ok(payment)
            },
            Err(e) => Err(e),
        }
    }

    /// Cancels `amount` of a payment. The amount actually cancelled is in the returned cancellation.
    pub async fn cancel_payment(
        &self,
        payment_id: &str,
        amount: Money,
        reason: &str,
    ) -> Result<CancelPaymentResponse, GatewayApiError> {
        let path = format!("/payments/{payment_id}/cancel");
        let body = CancelPaymentRequest { store_id: self.config.store_id.clone(), amount, reason: reason.to_string() };
        debug!("Cancelling {amount} of payment {payment_id}");
        let result = self.rest_query::<CancelPaymentResponse, _>(Method::POST, &path, &[], Some(body)).await?;
        info!(
            "Cancelled {} of payment {payment_id}. Cancellation {} is {}",
            result.cancellation.total_amount, result.cancellation.id, result.cancellation.status
        );
        Ok(result)
    }

    fn store_params(&self) -> Vec<(&str, &str)> {
        self.config.store_id.as_deref().map(|id| vec![("storeId", id)]).unwrap_or_default()
    }
}
