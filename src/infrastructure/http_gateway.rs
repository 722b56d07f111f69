// Rental service REST gateway
use crate::application::persistence_gateway::PersistenceGateway;
use crate::domain::session::RentalBinding;
use crate::domain::vehicle::{TripLogRecord, VehicleRecord};
use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::StatusCode;
use std::time::Duration;

#[derive(Debug, Clone)]
pub struct HttpGateway {
    client: reqwest::Client,
    base_url: String,
    service_token: Option<String>,
}

impl HttpGateway {
    pub fn new(base_url: String, service_token: Option<String>, timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .context("Failed to build rental service HTTP client")?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            service_token,
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    fn authorize(&self, request: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match &self.service_token {
            Some(token) => request.bearer_auth(token),
            None => request,
        }
    }
}

#[async_trait]
impl PersistenceGateway for HttpGateway {
    async fn list_vehicles(&self) -> Result<Vec<VehicleRecord>> {
        let response = self
            .authorize(self.client.get(self.url("/api/cars")))
            .send()
            .await
            .context("Failed to send request to rental service")?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            anyhow::bail!("Listing cars failed with status {}: {}", status, body);
        }

        response
            .json::<Vec<VehicleRecord>>()
            .await
            .context("Failed to parse car records")
    }

    async fn find_active_rental_for_user(&self, user_id: i64) -> Result<Option<RentalBinding>> {
        let response = self
            .authorize(self.client.get(self.url("/api/rentals/active")))
            .query(&[("user_id", user_id)])
            .send()
            .await
            .context("Failed to send request to rental service")?;

        if response.status() == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            anyhow::bail!("Active rental lookup failed with status {}: {}", status, body);
        }

        let binding = response
            .json::<RentalBinding>()
            .await
            .context("Failed to parse active rental")?;
        Ok(Some(binding))
    }

    async fn append_trip_log(&self, record: TripLogRecord) -> Result<()> {
        let response = self
            .authorize(self.client.post(self.url("/api/trip-logs")))
            .json(&record)
            .send()
            .await
            .context("Failed to send trip log to rental service")?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            anyhow::bail!("Trip log append failed with status {}: {}", status, body);
        }

        Ok(())
    }
}
