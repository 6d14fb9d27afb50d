//! reqwest implementation of [`ControlPlane`]

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, RequestBuilder};
use serde::Deserialize;

use sensorctl_core::config::ControlPlaneConfig;
use sensorctl_core::types::SensorRecord;
use sensorctl_core::Sensor;

use super::{ControlPlane, CreateRequest, RetryableCall};
use crate::error::ControlPlaneError;

const API_KEY_HEADER: &str = "x-api-key";
const PING_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Debug, Deserialize)]
struct CreateResponse {
    #[serde(default)]
    ec2_sensor_name: String,
}

/// HTTP client for the sensor inventory API
pub struct HttpControlPlane {
    http: Client,
    base: String,
    api_key: String,
    request_timeout: Duration,
    create_timeout: Duration,
    retry: RetryableCall,
}

impl HttpControlPlane {
    pub fn new(config: &ControlPlaneConfig) -> Result<Self, ControlPlaneError> {
        let http = Client::builder().build()?;
        Ok(Self {
            http,
            base: config.base().to_string(),
            api_key: config.api_key.clone(),
            request_timeout: config.request_timeout,
            create_timeout: config.create_timeout,
            retry: RetryableCall::from_config(config),
        })
    }

    fn authorized(&self, builder: RequestBuilder) -> RequestBuilder {
        builder.header(API_KEY_HEADER, &self.api_key)
    }

    async fn fetch_once(&self, name: &str) -> Result<Sensor, ControlPlaneError> {
        let url = format!("{}/{}", self.base, name);
        let response = self
            .authorized(self.http.get(&url))
            .timeout(self.request_timeout)
            .send()
            .await?;
        let status = response.status();
        let body = response.text().await?;

        if is_missing_marker(&body) {
            tracing::debug!("Sensor {} no longer exists in the API", name);
            return Ok(Sensor::deleted(name));
        }
        if !status.is_success() {
            return Err(ControlPlaneError::Status {
                status: status.as_u16(),
                body,
            });
        }

        let record: SensorRecord =
            serde_json::from_str(&body).map_err(|e| ControlPlaneError::Decode(e.to_string()))?;
        Ok(record.into_sensor(name))
    }

    async fn create_once(&self, request: &CreateRequest) -> Result<String, ControlPlaneError> {
        let url = format!("{}/create", self.base);
        let response = self
            .authorized(self.http.post(&url))
            .header(reqwest::header::ACCEPT, "application/json")
            .json(request)
            .timeout(self.create_timeout)
            .send()
            .await?;
        let body = check_status(response).await?;

        let created: CreateResponse =
            serde_json::from_str(&body).map_err(|e| ControlPlaneError::Decode(e.to_string()))?;
        if created.ec2_sensor_name.is_empty() {
            return Err(ControlPlaneError::MissingName);
        }
        Ok(created.ec2_sensor_name)
    }

    async fn delete_once(&self, name: &str) -> Result<(), ControlPlaneError> {
        let url = format!("{}/delete/{}", self.base, name);
        let response = self
            .authorized(self.http.delete(&url))
            .timeout(self.request_timeout)
            .send()
            .await?;
        check_status(response).await?;
        Ok(())
    }
}

#[async_trait]
impl ControlPlane for HttpControlPlane {
    async fn fetch(&self, name: &str) -> Result<Sensor, ControlPlaneError> {
        self.retry
            .run(&format!("fetch {}", name), |_| self.fetch_once(name))
            .await
    }

    async fn create(&self, request: &CreateRequest) -> Result<String, ControlPlaneError> {
        let name = self
            .retry
            .run("create sensor", |_| self.create_once(request))
            .await?;
        tracing::info!("Control plane created sensor {}", name);
        Ok(name)
    }

    async fn delete(&self, name: &str) -> Result<(), ControlPlaneError> {
        self.retry
            .run(&format!("delete {}", name), |_| self.delete_once(name))
            .await?;
        tracing::info!("Control plane deleted sensor {}", name);
        Ok(())
    }

    async fn ping(&self) -> bool {
        let url = format!("{}/test-connectivity-check", self.base);
        match self
            .authorized(self.http.get(&url))
            .timeout(PING_TIMEOUT)
            .send()
            .await
        {
            // Any answer short of a server error means the API is up
            Ok(response) => response.status().as_u16() < 500,
            Err(e) => {
                tracing::debug!("API connectivity check failed: {}", e);
                false
            }
        }
    }
}

/// Plain-text body the API returns for unknown sensors
fn is_missing_marker(body: &str) -> bool {
    body.contains("Error:") && body.contains("does not exist")
}

async fn check_status(response: reqwest::Response) -> Result<String, ControlPlaneError> {
    let status = response.status();
    let body = response.text().await?;
    if !status.is_success() {
        return Err(ControlPlaneError::Status {
            status: status.as_u16(),
            body,
        });
    }
    Ok(body)
}

#[cfg(test)]
mod tests {
    use super::*;
    use sensorctl_core::SensorStatus;

    fn client_for(server: &mockito::ServerGuard) -> HttpControlPlane {
        let config = ControlPlaneConfig {
            base_url: format!("{}/sensors/", server.url()),
            api_key: "test-key".to_string(),
            backoff_unit: Duration::from_millis(5),
            ..Default::default()
        };
        HttpControlPlane::new(&config).unwrap()
    }

    #[test]
    fn test_missing_marker() {
        assert!(is_missing_marker("Error: sensor ec2-sensor-1 does not exist"));
        assert!(!is_missing_marker("does not exist"));
        assert!(!is_missing_marker(r#"{"sensor_status":"running"}"#));
    }

    #[tokio::test]
    async fn test_fetch_parses_record() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("GET", "/sensors/ec2-sensor-7")
            .match_header("x-api-key", "test-key")
            .with_status(200)
            .with_body(
                r#"{"ec2_sensor_name":"ec2-sensor-7","sensor_ip":"10.1.2.3","sensor_status":"running","brolin_version":"28.1.0"}"#,
            )
            .expect(1)
            .create_async()
            .await;

        let sensor = client_for(&server).fetch("ec2-sensor-7").await.unwrap();
        mock.assert_async().await;

        assert_eq!(sensor.status, SensorStatus::Running);
        assert_eq!(sensor.valid_address(), Some("10.1.2.3"));
        assert_eq!(sensor.version.as_deref(), Some("28.1.0"));
        assert!(sensor.is_ready());
    }

    #[tokio::test]
    async fn test_fetch_missing_sensor_is_deleted_not_error() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("GET", "/sensors/ec2-sensor-9")
            .with_status(404)
            .with_body("Error: sensor ec2-sensor-9 does not exist")
            .expect(1)
            .create_async()
            .await;

        let sensor = client_for(&server).fetch("ec2-sensor-9").await.unwrap();
        mock.assert_async().await;

        assert!(sensor.is_deleted());
        assert_eq!(sensor.name, "ec2-sensor-9");
    }

    #[tokio::test]
    async fn test_fetch_terminated_and_empty_status() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("GET", "/sensors/gone")
            .with_body(r#"{"ec2_sensor_name":"gone","sensor_status":"terminated"}"#)
            .create_async()
            .await;
        server
            .mock("GET", "/sensors/blank")
            .with_body(r#"{"sensor_status":""}"#)
            .create_async()
            .await;

        let client = client_for(&server);
        assert!(client.fetch("gone").await.unwrap().is_deleted());

        let blank = client.fetch("blank").await.unwrap();
        assert_eq!(blank.status, SensorStatus::Unknown);
        assert_eq!(blank.name, "blank");
    }

    #[tokio::test]
    async fn test_fetch_fails_after_exactly_three_attempts() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("GET", "/sensors/flaky")
            .with_status(503)
            .with_body("unavailable")
            .expect(3)
            .create_async()
            .await;

        let err = client_for(&server).fetch("flaky").await.unwrap_err();
        mock.assert_async().await;

        assert!(matches!(
            err,
            ControlPlaneError::RetriesExhausted { attempts: 3, .. }
        ));
    }

    #[tokio::test]
    async fn test_fetch_rejected_key_is_an_error() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("GET", "/sensors/ec2-sensor-3")
            .with_status(401)
            .with_body(r#"{"message":"Unauthorized"}"#)
            .expect(3)
            .create_async()
            .await;

        let err = client_for(&server).fetch("ec2-sensor-3").await.unwrap_err();
        mock.assert_async().await;

        let ControlPlaneError::RetriesExhausted { last, .. } = err else {
            panic!("expected retries to be exhausted, got {:?}", err);
        };
        assert!(matches!(*last, ControlPlaneError::Status { status: 401, .. }));
    }

    #[tokio::test]
    async fn test_fetch_success_makes_one_request() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("GET", "/sensors/steady")
            .with_body(r#"{"ec2_sensor_name":"steady","sensor_status":"pending","sensor_ip":"null"}"#)
            .expect(1)
            .create_async()
            .await;

        let sensor = client_for(&server).fetch("steady").await.unwrap();
        mock.assert_async().await;
        assert_eq!(sensor.status, SensorStatus::Pending);
        assert_eq!(sensor.valid_address(), None);
    }

    #[tokio::test]
    async fn test_create_sends_payload_and_returns_name() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/sensors/create")
            .match_header("x-api-key", "test-key")
            .match_body(mockito::Matcher::Json(serde_json::json!({
                "development_branch": "testing",
                "team_name": "cicd",
                "username": "alice"
            })))
            .with_status(200)
            .with_body(r#"{"ec2_sensor_name":"ec2-sensor-42","sensor_ip":"null","sensor_status":"pending"}"#)
            .expect(1)
            .create_async()
            .await;

        let request = CreateRequest {
            development_branch: "testing".into(),
            team_name: "cicd".into(),
            username: "alice".into(),
        };
        let name = client_for(&server).create(&request).await.unwrap();
        mock.assert_async().await;
        assert_eq!(name, "ec2-sensor-42");
    }

    #[tokio::test]
    async fn test_create_without_name_fails() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("POST", "/sensors/create")
            .with_body(r#"{"sensor_status":"pending"}"#)
            .expect(3)
            .create_async()
            .await;

        let request = CreateRequest {
            development_branch: "testing".into(),
            team_name: "cicd".into(),
            username: "alice".into(),
        };
        match client_for(&server).create(&request).await {
            Err(ControlPlaneError::RetriesExhausted { last, .. }) => {
                assert!(matches!(*last, ControlPlaneError::MissingName));
            }
            other => panic!("unexpected result: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_delete_and_ping() {
        let mut server = mockito::Server::new_async().await;
        let delete = server
            .mock("DELETE", "/sensors/delete/ec2-sensor-3")
            .with_status(200)
            .expect(1)
            .create_async()
            .await;
        server
            .mock("GET", "/sensors/test-connectivity-check")
            .with_status(404)
            .create_async()
            .await;

        let client = client_for(&server);
        client.delete("ec2-sensor-3").await.unwrap();
        delete.assert_async().await;

        assert!(client.ping().await);
    }

    #[tokio::test]
    async fn test_ping_server_error_is_offline() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("GET", "/sensors/test-connectivity-check")
            .with_status(500)
            .create_async()
            .await;

        assert!(!client_for(&server).ping().await);
    }
}
