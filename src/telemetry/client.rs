//! Telemetry clients: the census REST client and a scripted test double

use crate::config::TelemetrySettings;
use crate::error::{MatchmakingError, Result};
use crate::telemetry::events::{CaptureEvent, CensusList, KillEvent, RawKillEvent, RawWorldEvent};
use crate::types::{RoundWindow, TelemetryId};
use async_trait::async_trait;
use serde::de::DeserializeOwned;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;
use tokio::time::sleep;
use tracing::{debug, error, warn};

/// Source of per-round gameplay events
#[async_trait]
pub trait TelemetryClient: Send + Sync {
    /// Kills involving `telemetry_id` inside `window`. An empty list is a valid answer.
    async fn kill_events(
        &self,
        telemetry_id: TelemetryId,
        window: RoundWindow,
    ) -> Result<Vec<KillEvent>>;

    /// Facility ownership changes inside `window`
    async fn capture_events(&self, window: RoundWindow) -> Result<Vec<CaptureEvent>>;
}

/// HTTP client for the census API
pub struct CensusClient {
    http: reqwest::Client,
    settings: TelemetrySettings,
}

impl CensusClient {
    pub fn new(settings: TelemetrySettings) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(settings.request_timeout_seconds))
            .build()
            .map_err(|e| MatchmakingError::ConfigurationError {
                message: format!("Failed to build telemetry HTTP client: {}", e),
            })?;

        Ok(Self { http, settings })
    }

    fn collection_url(&self, collection: &str) -> String {
        format!(
            "{}/s:{}/get/ps2:v2/{}/",
            self.settings.base_url.trim_end_matches('/'),
            self.settings.service_id,
            collection
        )
    }

    fn kills_url(&self, telemetry_id: TelemetryId, window: RoundWindow) -> String {
        format!(
            "{}?character_id={}&type=KILL&after={}&before={}&c:limit={}",
            self.collection_url("characters_event"),
            telemetry_id,
            window.start,
            window.end,
            self.settings.result_limit
        )
    }

    fn captures_url(&self, window: RoundWindow) -> String {
        format!(
            "{}?world_id={}&type=FACILITY&after={}&before={}&c:limit={}",
            self.collection_url("world_event"),
            self.settings.world_id,
            window.start,
            window.end,
            self.settings.result_limit
        )
    }

    /// GET with exponential backoff; fails with `ExternalUnavailable` once the
    /// retry budget is spent
    async fn request<T: DeserializeOwned>(&self, endpoint: &str, url: &str) -> Result<Vec<T>> {
        let mut retry_count = 0;
        let mut delay = Duration::from_millis(self.settings.retry_delay_ms);

        loop {
            match self.try_request::<T>(url).await {
                Ok(items) => return Ok(items),
                Err(e) => {
                    retry_count += 1;
                    if retry_count > self.settings.max_retry_attempts {
                        error!(
                            "Telemetry endpoint '{}' unreachable after {} retries: {}",
                            endpoint, self.settings.max_retry_attempts, e
                        );
                        return Err(MatchmakingError::ExternalUnavailable {
                            endpoint: endpoint.to_string(),
                            message: e.to_string(),
                        }
                        .into());
                    }

                    warn!(
                        "Telemetry request {} to '{}' failed: {}. Retrying in {:?}",
                        retry_count, endpoint, e, delay
                    );

                    sleep(delay).await;
                    delay = Duration::from_millis((delay.as_millis() as u64 * 2).min(5000));
                }
            }
        }
    }

    async fn try_request<T: DeserializeOwned>(&self, url: &str) -> Result<Vec<T>> {
        let response = self.http.get(url).send().await?;

        let status = response.status();
        if !status.is_success() {
            return Err(anyhow::anyhow!("HTTP status {}", status));
        }

        let list: CensusList<T> = response.json().await?;
        match list.returned {
            Some(_) => Ok(list.items),
            None => Err(anyhow::anyhow!(
                "Response without result count: {}",
                list.error.unwrap_or_else(|| "no error given".to_string())
            )),
        }
    }
}

#[async_trait]
impl TelemetryClient for CensusClient {
    async fn kill_events(
        &self,
        telemetry_id: TelemetryId,
        window: RoundWindow,
    ) -> Result<Vec<KillEvent>> {
        let url = self.kills_url(telemetry_id, window);
        let raw: Vec<RawKillEvent> = self.request("characters_event", &url).await?;

        let mut events = Vec::with_capacity(raw.len());
        for item in raw {
            match KillEvent::try_from(item) {
                Ok(event) if window.contains(event.timestamp) => events.push(event),
                Ok(_) => {}
                Err(e) => warn!("Skipping kill event for {}: {}", telemetry_id, e),
            }
        }

        debug!(
            "Fetched {} kill events for character {} in [{}, {})",
            events.len(),
            telemetry_id,
            window.start,
            window.end
        );
        Ok(events)
    }

    async fn capture_events(&self, window: RoundWindow) -> Result<Vec<CaptureEvent>> {
        let url = self.captures_url(window);
        let raw: Vec<RawWorldEvent> = self.request("world_event", &url).await?;

        // Census lists newest first
        let mut events: Vec<CaptureEvent> = raw
            .into_iter()
            .filter_map(|item| CaptureEvent::try_from(item).ok())
            .filter(|event| window.contains(event.timestamp))
            .collect();
        events.sort_by_key(|event| event.timestamp);

        debug!(
            "Fetched {} capture events in [{}, {})",
            events.len(),
            window.start,
            window.end
        );
        Ok(events)
    }
}

/// Scripted telemetry for tests and dry runs
#[derive(Debug, Default)]
pub struct MockTelemetryClient {
    kills: Mutex<HashMap<TelemetryId, Vec<KillEvent>>>,
    captures: Mutex<Vec<CaptureEvent>>,
    unreachable: Mutex<HashSet<TelemetryId>>,
    captures_unreachable: AtomicBool,
    requests: AtomicUsize,
}

impl MockTelemetryClient {
    pub fn new() -> Self {
        Self::default()
    }

    /// Script the kills reported for a character; events are returned as given
    pub fn set_kills(&self, telemetry_id: TelemetryId, events: Vec<KillEvent>) {
        if let Ok(mut kills) = self.kills.lock() {
            kills.insert(telemetry_id, events);
        }
    }

    pub fn set_captures(&self, events: Vec<CaptureEvent>) {
        if let Ok(mut captures) = self.captures.lock() {
            *captures = events;
        }
    }

    /// Make kill requests for this character fail
    pub fn set_unreachable(&self, telemetry_id: TelemetryId) {
        if let Ok(mut unreachable) = self.unreachable.lock() {
            unreachable.insert(telemetry_id);
        }
    }

    pub fn set_captures_unreachable(&self, value: bool) {
        self.captures_unreachable.store(value, Ordering::SeqCst);
    }

    /// Number of requests served, failed ones included
    pub fn request_count(&self) -> usize {
        self.requests.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl TelemetryClient for MockTelemetryClient {
    async fn kill_events(
        &self,
        telemetry_id: TelemetryId,
        _window: RoundWindow,
    ) -> Result<Vec<KillEvent>> {
        self.requests.fetch_add(1, Ordering::SeqCst);
        let unreachable = self
            .unreachable
            .lock()
            .map(|set| set.contains(&telemetry_id))
            .unwrap_or(false);
        if unreachable {
            return Err(MatchmakingError::ExternalUnavailable {
                endpoint: "characters_event".to_string(),
                message: format!("scripted failure for {}", telemetry_id),
            }
            .into());
        }

        Ok(self
            .kills
            .lock()
            .ok()
            .and_then(|kills| kills.get(&telemetry_id).cloned())
            .unwrap_or_default())
    }

    async fn capture_events(&self, _window: RoundWindow) -> Result<Vec<CaptureEvent>> {
        self.requests.fetch_add(1, Ordering::SeqCst);
        if self.captures_unreachable.load(Ordering::SeqCst) {
            return Err(MatchmakingError::ExternalUnavailable {
                endpoint: "world_event".to_string(),
                message: "scripted failure".to_string(),
            }
            .into());
        }

        Ok(self
            .captures
            .lock()
            .map(|captures| captures.clone())
            .unwrap_or_default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Faction;

    fn census() -> CensusClient {
        CensusClient::new(TelemetrySettings {
            base_url: "https://census.example.com/".to_string(),
            service_id: "draftroom".to_string(),
            ..TelemetrySettings::default()
        })
        .unwrap()
    }

    #[test]
    fn test_kill_query_url() {
        let url = census().kills_url(42, RoundWindow::new(1000, 1600));
        assert_eq!(
            url,
            "https://census.example.com/s:draftroom/get/ps2:v2/characters_event/\
             ?character_id=42&type=KILL&after=1000&before=1600&c:limit=500"
        );
    }

    #[test]
    fn test_capture_query_url() {
        let url = census().captures_url(RoundWindow::new(1000, 1600));
        assert!(url.starts_with("https://census.example.com/s:draftroom/get/ps2:v2/world_event/"));
        assert!(url.contains("world_id=19"));
        assert!(url.contains("after=1000&before=1600"));
    }

    #[tokio::test]
    async fn test_mock_scripted_answers() {
        let telemetry = MockTelemetryClient::new();
        let window = RoundWindow::new(0, 100);
        telemetry.set_kills(
            7,
            vec![KillEvent {
                attacker: 7,
                victim: 8,
                attacker_loadout: 1,
                victim_loadout: 1,
                weapon: 3,
                timestamp: 10,
            }],
        );
        telemetry.set_captures(vec![CaptureEvent {
            facility_id: 1,
            faction: Faction::Vanu,
            timestamp: 20,
        }]);
        telemetry.set_unreachable(9);

        assert_eq!(telemetry.kill_events(7, window).await.unwrap().len(), 1);
        assert!(telemetry.kill_events(8, window).await.unwrap().is_empty());

        let err = telemetry.kill_events(9, window).await.unwrap_err();
        assert!(matches!(
            err.downcast_ref::<MatchmakingError>(),
            Some(MatchmakingError::ExternalUnavailable { .. })
        ));

        assert_eq!(telemetry.capture_events(window).await.unwrap().len(), 1);
        assert_eq!(telemetry.request_count(), 4);
    }
}
