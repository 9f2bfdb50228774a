//! HTTP client for driving Appium sessions.
//!
//! This module provides the `SessionController` seam the lease manager uses
//! to open and close driver sessions, with an HTTP implementation speaking
//! the W3C WebDriver session API and a no-op one for local development.

use std::time::Duration;

use async_trait::async_trait;
use device_pool_core::{DeviceId, ServerEndpoint};
use device_pool_store::Platform;
use serde::{Deserialize, Serialize};

use crate::error::{PoolError, Result};

/// What a session is opened against.
#[derive(Debug, Clone, Copy)]
pub struct SessionTarget<'a> {
    /// The device the session drives.
    pub device_id: &'a DeviceId,
    /// Its platform.
    pub platform: Platform,
    /// Its platform version.
    pub platform_version: &'a str,
    /// WDA local port (iOS only).
    pub wda_local_port: Option<u16>,
}

/// Trait for driver session control.
///
/// This trait abstracts the session client interface, allowing for
/// mock implementations in tests.
#[async_trait]
pub trait SessionController: Send + Sync {
    /// Open a session on `server` and return its id.
    ///
    /// # Errors
    ///
    /// Returns `PoolError::SessionStartFailed` if the server is unreachable,
    /// answers with a non-success status, or returns no session id.
    async fn start_session(&self, server: &ServerEndpoint, target: SessionTarget<'_>)
        -> Result<String>;

    /// Close a session.
    ///
    /// # Errors
    ///
    /// Returns `PoolError::SessionStopFailed` if the request fails.
    async fn stop_session(&self, server: &ServerEndpoint, session_id: &str) -> Result<()>;
}

/// Request body for `POST /session`.
#[derive(Debug, Serialize)]
struct NewSessionRequest<'a> {
    capabilities: Capabilities<'a>,
}

#[derive(Debug, Serialize)]
struct Capabilities<'a> {
    #[serde(rename = "firstMatch")]
    first_match: [FirstMatch<'a>; 1],
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct FirstMatch<'a> {
    platform_name: &'static str,
    platform_version: &'a str,
    device_name: &'a str,
    automation_name: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    wda_local_port: Option<u16>,
}

impl<'a> NewSessionRequest<'a> {
    fn for_target(target: SessionTarget<'a>) -> Self {
        Self {
            capabilities: Capabilities {
                first_match: [FirstMatch {
                    platform_name: target.platform.as_str(),
                    platform_version: target.platform_version,
                    device_name: target.device_id.as_str(),
                    automation_name: target.platform.automation_name(),
                    wda_local_port: target
                        .wda_local_port
                        .filter(|_| target.platform.needs_port()),
                }],
            },
        }
    }
}

/// Response of `POST /session`. W3C servers nest the id under `value`;
/// older servers put it at the top level.
#[derive(Debug, Default, Deserialize)]
struct NewSessionResponse {
    #[serde(default)]
    value: Option<SessionValue>,
    #[serde(default, rename = "sessionId")]
    session_id: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct SessionValue {
    #[serde(default, rename = "sessionId")]
    session_id: Option<String>,
}

impl NewSessionResponse {
    fn into_session_id(self) -> Option<String> {
        self.value
            .and_then(|v| v.session_id)
            .or(self.session_id)
            .filter(|id| !id.is_empty())
    }
}

/// HTTP client for Appium servers.
#[derive(Debug, Clone)]
pub struct HttpSessionController {
    client: reqwest::Client,
    start_timeout: Duration,
    stop_timeout: Duration,
}

impl HttpSessionController {
    /// Timeout for opening a session; device boot can be slow.
    pub const START_TIMEOUT: Duration = Duration::from_secs(60);

    /// Timeout for closing a session.
    pub const STOP_TIMEOUT: Duration = Duration::from_secs(30);

    /// Create a new session controller.
    ///
    /// # Errors
    ///
    /// Returns `PoolError::Config` if the HTTP client cannot be created.
    pub fn new() -> Result<Self> {
        let client = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(5))
            .build()
            .map_err(|e| PoolError::Config(format!("failed to create HTTP client: {e}")))?;
        Ok(Self::with_client(client))
    }

    /// Create a new session controller with a custom reqwest client.
    #[must_use]
    pub const fn with_client(client: reqwest::Client) -> Self {
        Self {
            client,
            start_timeout: Self::START_TIMEOUT,
            stop_timeout: Self::STOP_TIMEOUT,
        }
    }

    /// Override the request timeouts.
    #[must_use]
    pub const fn with_timeouts(mut self, start: Duration, stop: Duration) -> Self {
        self.start_timeout = start;
        self.stop_timeout = stop;
        self
    }
}

#[async_trait]
impl SessionController for HttpSessionController {
    async fn start_session(
        &self,
        server: &ServerEndpoint,
        target: SessionTarget<'_>,
    ) -> Result<String> {
        let url = format!("{server}/session");

        let response = self
            .client
            .post(&url)
            .timeout(self.start_timeout)
            .json(&NewSessionRequest::for_target(target))
            .send()
            .await
            .map_err(|e| PoolError::SessionStartFailed(format!("request to {server} failed: {e}")))?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| PoolError::SessionStartFailed(format!("failed to read response: {e}")))?;

        if !status.is_success() {
            tracing::error!(
                device_id = %target.device_id,
                server = %server,
                status = %status,
                "Appium refused to start session"
            );
            return Err(PoolError::SessionStartFailed(format!(
                "{server} returned status {status}: {body}"
            )));
        }

        let session_id = serde_json::from_str::<NewSessionResponse>(&body)
            .ok()
            .and_then(NewSessionResponse::into_session_id)
            .ok_or_else(|| {
                PoolError::SessionStartFailed(format!("cannot parse sessionId from: {body}"))
            })?;

        tracing::debug!(
            device_id = %target.device_id,
            server = %server,
            session_id = %session_id,
            "Started Appium session"
        );
        Ok(session_id)
    }

    async fn stop_session(&self, server: &ServerEndpoint, session_id: &str) -> Result<()> {
        let url = format!("{server}/session/{session_id}");

        let response = self
            .client
            .delete(&url)
            .timeout(self.stop_timeout)
            .send()
            .await
            .map_err(|e| PoolError::SessionStopFailed(format!("request to {server} failed: {e}")))?;

        let status = response.status();
        if status.is_success() {
            tracing::debug!(server = %server, session_id = %session_id, "Stopped Appium session");
            Ok(())
        } else {
            Err(PoolError::SessionStopFailed(format!(
                "{server} returned status {status}"
            )))
        }
    }
}

/// A session controller for running without Appium.
///
/// Sessions are given random ids and nothing is contacted.
#[derive(Debug, Clone, Default)]
pub struct NoopSessionController;

impl NoopSessionController {
    /// Create a new no-op session controller.
    #[must_use]
    pub const fn new() -> Self {
        Self
    }
}

#[async_trait]
impl SessionController for NoopSessionController {
    async fn start_session(
        &self,
        server: &ServerEndpoint,
        target: SessionTarget<'_>,
    ) -> Result<String> {
        let session_id = uuid::Uuid::new_v4().to_string();
        tracing::warn!(
            device_id = %target.device_id,
            server = %server,
            session_id = %session_id,
            "NoopSessionController: start_session called but no Appium configured"
        );
        Ok(session_id)
    }

    async fn stop_session(&self, server: &ServerEndpoint, session_id: &str) -> Result<()> {
        tracing::warn!(
            server = %server,
            session_id = %session_id,
            "NoopSessionController: stop_session called but no Appium configured"
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use wiremock::matchers::{body_json, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn target<'a>(device_id: &'a DeviceId, platform: Platform, port: Option<u16>) -> SessionTarget<'a> {
        SessionTarget {
            device_id,
            platform,
            platform_version: "17.4",
            wda_local_port: port,
        }
    }

    #[test]
    fn ios_capabilities_carry_port() {
        let id = DeviceId::new("ios-1").unwrap();
        let body = serde_json::to_value(NewSessionRequest::for_target(target(
            &id,
            Platform::Ios,
            Some(8101),
        )))
        .unwrap();

        assert_eq!(
            body,
            json!({"capabilities": {"firstMatch": [{
                "platformName": "ios",
                "platformVersion": "17.4",
                "deviceName": "ios-1",
                "automationName": "XCUITest",
                "wdaLocalPort": 8101
            }]}})
        );
    }

    #[test]
    fn android_capabilities_omit_port() {
        let id = DeviceId::new("emulator-5554").unwrap();
        let body = serde_json::to_value(NewSessionRequest::for_target(target(
            &id,
            Platform::Android,
            Some(8101),
        )))
        .unwrap();

        let first = &body["capabilities"]["firstMatch"][0];
        assert_eq!(first["automationName"], "UiAutomator2");
        assert!(first.get("wdaLocalPort").is_none());
    }

    #[test]
    fn session_id_falls_back_to_top_level() {
        let nested: NewSessionResponse =
            serde_json::from_str(r#"{"value":{"sessionId":"abc","capabilities":{}}}"#).unwrap();
        assert_eq!(nested.into_session_id().as_deref(), Some("abc"));

        let legacy: NewSessionResponse =
            serde_json::from_str(r#"{"sessionId":"def","status":0,"value":{}}"#).unwrap();
        assert_eq!(legacy.into_session_id().as_deref(), Some("def"));

        let missing: NewSessionResponse = serde_json::from_str(r#"{"value":{}}"#).unwrap();
        assert_eq!(missing.into_session_id(), None);
    }

    #[tokio::test]
    async fn start_session_posts_capabilities() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/session"))
            .and(body_json(json!({"capabilities": {"firstMatch": [{
                "platformName": "android",
                "platformVersion": "17.4",
                "deviceName": "emulator-5554",
                "automationName": "UiAutomator2"
            }]}})))
            .respond_with(
                ResponseTemplate::new(200).set_body_json(json!({"value": {"sessionId": "s-42"}})),
            )
            .expect(1)
            .mount(&server)
            .await;

        let controller = HttpSessionController::new().unwrap();
        let endpoint = ServerEndpoint::new(server.uri()).unwrap();
        let id = DeviceId::new("emulator-5554").unwrap();

        let session_id = controller
            .start_session(&endpoint, target(&id, Platform::Android, None))
            .await
            .unwrap();
        assert_eq!(session_id, "s-42");
    }

    #[tokio::test]
    async fn start_session_rejects_error_status() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/session"))
            .respond_with(ResponseTemplate::new(500).set_body_string("device offline"))
            .mount(&server)
            .await;

        let controller = HttpSessionController::new().unwrap();
        let endpoint = ServerEndpoint::new(server.uri()).unwrap();
        let id = DeviceId::new("d1").unwrap();

        let result = controller
            .start_session(&endpoint, target(&id, Platform::Android, None))
            .await;
        assert!(matches!(result, Err(PoolError::SessionStartFailed(_))));
    }

    #[tokio::test]
    async fn start_session_requires_session_id() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/session"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"value": {}})))
            .mount(&server)
            .await;

        let controller = HttpSessionController::new().unwrap();
        let endpoint = ServerEndpoint::new(server.uri()).unwrap();
        let id = DeviceId::new("d1").unwrap();

        let result = controller
            .start_session(&endpoint, target(&id, Platform::Android, None))
            .await;
        assert!(matches!(result, Err(PoolError::SessionStartFailed(_))));
    }

    #[tokio::test]
    async fn start_session_unreachable_server() {
        let controller = HttpSessionController::new().unwrap();
        // Port 9 (discard) is not an Appium server
        let endpoint = ServerEndpoint::new("http://127.0.0.1:9").unwrap();
        let id = DeviceId::new("d1").unwrap();

        let result = controller
            .start_session(&endpoint, target(&id, Platform::Android, None))
            .await;
        assert!(matches!(result, Err(PoolError::SessionStartFailed(_))));
    }

    #[tokio::test]
    async fn stop_session_deletes() {
        let server = MockServer::start().await;
        Mock::given(method("DELETE"))
            .and(path("/session/s-42"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"value": null})))
            .expect(1)
            .mount(&server)
            .await;

        let controller = HttpSessionController::new().unwrap();
        let endpoint = ServerEndpoint::new(server.uri()).unwrap();
        controller.stop_session(&endpoint, "s-42").await.unwrap();
    }

    #[tokio::test]
    async fn noop_controller_issues_unique_ids() {
        let controller = NoopSessionController::new();
        let endpoint = ServerEndpoint::new("http://localhost:4723").unwrap();
        let id = DeviceId::new("d1").unwrap();

        let first = controller
            .start_session(&endpoint, target(&id, Platform::Ios, Some(8100)))
            .await
            .unwrap();
        let second = controller
            .start_session(&endpoint, target(&id, Platform::Ios, Some(8100)))
            .await
            .unwrap();
        assert_ne!(first, second);
        controller.stop_session(&endpoint, &first).await.unwrap();
    }
}
