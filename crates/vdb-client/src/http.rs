use reqwest::{Client, Response};
use serde::de::DeserializeOwned;
use std::time::Duration;
use tracing::{debug, info};
use url::Url;
use vdb_core::wire::{decode_json, parse_error_detail};
use vdb_core::{
    CaptureRequest, CaptureResponse, CreateRunRequest, CreateRunResponse, HealthResponse, RunMode,
    RunStatusResponse,
};

use crate::error::ClientError;
use crate::service::{RunService, TransportChannel, DEFAULT_CHANNEL_CAPACITY};
use crate::ws;

pub const DEFAULT_SERVER_URL: &str = "http://127.0.0.1:8080";
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, Clone)]
pub struct ServiceClient {
    http: Client,
    base_url: Url,
    channel_capacity: usize,
}

impl ServiceClient {
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self, ClientError> {
        let mut base_url = Url::parse(base_url.trim())?;
        if !matches!(base_url.scheme(), "http" | "https") {
            return Err(ClientError::Scheme(base_url.scheme().to_string()));
        }
        // relative joins must keep any path prefix
        if !base_url.path().ends_with('/') {
            let path = format!("{}/", base_url.path());
            base_url.set_path(&path);
        }
        let http = Client::builder().timeout(timeout).build()?;
        Ok(Self {
            http,
            base_url,
            channel_capacity: DEFAULT_CHANNEL_CAPACITY,
        })
    }

    pub fn with_channel_capacity(mut self, capacity: usize) -> Self {
        self.channel_capacity = capacity.max(1);
        self
    }

    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    pub fn endpoint(&self, path: &str) -> Result<Url, ClientError> {
        Ok(self.base_url.join(path)?)
    }

    pub fn stream_url(&self, mode: RunMode, run_id: &str) -> Result<Url, ClientError> {
        let mut url = self.endpoint(&mode.stream_path(run_id))?;
        let scheme = match url.scheme() {
            "http" => "ws",
            "https" => "wss",
            other => return Err(ClientError::Scheme(other.to_string())),
        };
        url.set_scheme(scheme)
            .map_err(|_| ClientError::Scheme(scheme.to_string()))?;
        Ok(url)
    }

    pub async fn health(&self) -> Result<HealthResponse, ClientError> {
        let response = self.http.get(self.endpoint("health")?).send().await?;
        decode_response(response).await
    }

    pub async fn status(&self, run_id: &str) -> Result<RunStatusResponse, ClientError> {
        let url = self.endpoint(&format!("status/{run_id}"))?;
        debug!(run_id, "status_requested");
        let response = self.http.get(url).send().await?;
        decode_response(response).await
    }

    pub async fn capture(&self, request: &CaptureRequest) -> Result<CaptureResponse, ClientError> {
        let response = self
            .http
            .post(self.endpoint("debug/vcd")?)
            .json(request)
            .send()
            .await?;
        decode_response(response).await
    }
}

impl RunService for ServiceClient {
    async fn create_run(
        &self,
        request: &CreateRunRequest,
    ) -> Result<CreateRunResponse, ClientError> {
        request.validate()?;
        let url = self.endpoint(request.mode.start_path())?;
        let response = self.http.post(url).json(request).send().await?;
        let created: CreateRunResponse = decode_response(response).await?;
        info!(run_id = %created.run_id, mode = %request.mode, "run_created");
        Ok(created)
    }

    async fn open_stream(
        &self,
        mode: RunMode,
        run_id: &str,
    ) -> Result<TransportChannel, ClientError> {
        let url = self.stream_url(mode, run_id)?;
        ws::open_channel(&url, self.channel_capacity).await
    }
}

async fn decode_response<T: DeserializeOwned>(response: Response) -> Result<T, ClientError> {
    let status = response.status();
    let body = response.text().await?;
    if !status.is_success() {
        let detail = parse_error_detail(&body)
            .or_else(|| Some(body.trim().to_string()).filter(|text| !text.is_empty()))
            .unwrap_or_else(|| {
                status
                    .canonical_reason()
                    .unwrap_or("request rejected")
                    .to_string()
            });
        return Err(ClientError::Rejected {
            status: status.as_u16(),
            detail,
        });
    }
    decode_json(&body).map_err(|err| ClientError::Decode(err.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn endpoints_keep_the_base_path() {
        let client = ServiceClient::new("http://lab.local:8080/api", DEFAULT_REQUEST_TIMEOUT)
            .expect("client");
        assert_eq!(client.base_url().as_str(), "http://lab.local:8080/api/");
        assert_eq!(
            client.endpoint("testgen/start").expect("url").as_str(),
            "http://lab.local:8080/api/testgen/start"
        );
    }

    #[test]
    fn stream_urls_switch_to_websocket_schemes() {
        let plain = ServiceClient::new(DEFAULT_SERVER_URL, DEFAULT_REQUEST_TIMEOUT).expect("client");
        assert_eq!(
            plain
                .stream_url(RunMode::Optimize, "ab12cd34")
                .expect("url")
                .as_str(),
            "ws://127.0.0.1:8080/stream/ab12cd34"
        );
        let tls = ServiceClient::new("https://verify.example.com", DEFAULT_REQUEST_TIMEOUT)
            .expect("client");
        assert_eq!(
            tls.stream_url(RunMode::Testgen, "ff00")
                .expect("url")
                .as_str(),
            "wss://verify.example.com/testgen/stream/ff00"
        );
    }

    #[test]
    fn rejects_non_http_base_urls() {
        assert!(matches!(
            ServiceClient::new("ftp://files.example.com", DEFAULT_REQUEST_TIMEOUT),
            Err(ClientError::Scheme(_))
        ));
        assert!(matches!(
            ServiceClient::new("not a url", DEFAULT_REQUEST_TIMEOUT),
            Err(ClientError::InvalidUrl(_))
        ));
    }
}
