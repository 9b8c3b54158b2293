use std::time::Duration;

use reqwest::{Client, StatusCode, Url};
use tracing::{debug, warn};

use super::{Identity, Payload, PreferenceStore, Preferences, SyncError};

const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

/// Preference service reached over HTTP.
///
/// `PUT {endpoint}/preferences/{identity}` stores a full document,
/// `PATCH .../layouts` a layout update, `GET` reads the document back and
/// `POST .../beacon` is the shutdown send.
#[derive(Debug, Clone)]
pub struct HttpPreferenceStore {
    client: Client,
    endpoint: Url,
}

impl HttpPreferenceStore {
    pub fn new(endpoint: &str) -> Result<Self, SyncError> {
        let endpoint =
            Url::parse(endpoint).map_err(|_| SyncError::InvalidEndpoint(endpoint.to_string()))?;
        if endpoint.cannot_be_a_base() {
            return Err(SyncError::InvalidEndpoint(endpoint.to_string()));
        }
        let client = Client::builder().timeout(REQUEST_TIMEOUT).build()?;
        Ok(Self { client, endpoint })
    }

    fn url(&self, identity: &Identity, tail: Option<&str>) -> Result<Url, SyncError> {
        let mut url = self.endpoint.clone();
        {
            let mut segments = url
                .path_segments_mut()
                .map_err(|()| SyncError::InvalidEndpoint(self.endpoint.to_string()))?;
            segments.pop_if_empty().push("preferences").push(identity.as_str());
            if let Some(tail) = tail {
                segments.push(tail);
            }
        }
        Ok(url)
    }
}

fn check(status: StatusCode) -> Result<(), SyncError> {
    if status.is_success() { Ok(()) } else { Err(SyncError::Status(status.as_u16())) }
}

impl PreferenceStore for HttpPreferenceStore {
    async fn push(&self, identity: &Identity, payload: &Payload) -> Result<(), SyncError> {
        let request = match payload {
            Payload::Full(prefs) => self.client.put(self.url(identity, None)?).json(prefs),
            Payload::Layouts(update) => {
                self.client.patch(self.url(identity, Some("layouts"))?).json(update)
            }
        };
        let response = request.send().await?;
        check(response.status())?;
        debug!(%identity, revision = payload.revision(), "pushed preferences");
        Ok(())
    }

    async fn pull(&self, identity: &Identity) -> Result<Option<Preferences>, SyncError> {
        let response = self.client.get(self.url(identity, None)?).send().await?;
        if response.status() == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        check(response.status())?;
        Ok(Some(response.json().await?))
    }

    fn beacon(&self, identity: &Identity, preferences: Preferences) {
        let url = match self.url(identity, Some("beacon")) {
            Ok(url) => url,
            Err(e) => {
                warn!("beacon skipped: {e}");
                return;
            }
        };
        let request = self.client.post(url).json(&preferences);
        tokio::spawn(async move {
            if let Err(e) = request.send().await {
                debug!("beacon failed: {e}");
            }
        });
    }
}
