//! HTTP client for a remote completion store.
//!
//! Endpoints, relative to the configured base URL:
//!
//! | call           | request                                       |
//! |----------------|-----------------------------------------------|
//! | today status   | `GET  api/users/{user}/status/today?date=`    |
//! | set level      | `POST api/users/{user}/levels`                |
//! | history        | `GET  api/users/{user}/history?end=&days=`    |
//! | note           | `GET  api/users/{user}/notes/{task}?date=`    |
//! | set note       | `POST api/users/{user}/notes/{task}`          |
//! | catalog        | `GET  api/users/{user}/catalog`               |

use std::time::Duration;

use async_trait::async_trait;
use chrono::NaiveDate;
use reqwest::{Client, Response, StatusCode};
use tracing::debug;
use url::Url;

use crate::catalog::{ItemKey, Level, TaskCatalog};
use crate::clock::date_key;
use crate::day_record::{parse_status_map, StatusMap};
use crate::history::HistoryWindow;
use crate::sync::remote::{CatalogSource, CompletionStore};
use crate::sync::types::{NotePayload, SetLevelRequest, SyncError, WriteResponse};

/// Default per-request timeout.
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

/// Remote completion store reached over HTTP.
#[derive(Debug, Clone)]
pub struct HttpRemote {
    client: Client,
    base: Url,
}

impl HttpRemote {
    /// Create a client for `base_url` with a per-request timeout.
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self, SyncError> {
        let mut base = Url::parse(base_url)?;
        if !base.path().ends_with('/') {
            let path = format!("{}/", base.path());
            base.set_path(&path);
        }
        let client = Client::builder().timeout(timeout).build()?;
        Ok(Self { client, base })
    }

    pub fn base_url(&self) -> &Url {
        &self.base
    }

    fn user_url(&self, user: &str, rest: &str) -> Result<Url, SyncError> {
        let path = format!("api/users/{}/{}", urlencoding::encode(user), rest);
        Ok(self.base.join(&path)?)
    }

    fn note_url(&self, user: &str, task: &str) -> Result<Url, SyncError> {
        self.user_url(user, &format!("notes/{}", urlencoding::encode(task)))
    }

    async fn send(&self, request: reqwest::RequestBuilder) -> Result<Response, SyncError> {
        let response = request.send().await.map_err(transport)?;
        self.check(response).await
    }

    async fn check(&self, response: Response) -> Result<Response, SyncError> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }

        let body = response.text().await.unwrap_or_default();
        debug!(%status, body = %body, "remote answered with an error status");
        if status.is_server_error() {
            Err(SyncError::Unavailable(status.to_string()))
        } else {
            Err(SyncError::Rejected(format!("{status}: {body}")))
        }
    }

    async fn json_value(&self, response: Response) -> Result<serde_json::Value, SyncError> {
        let text = response.text().await.map_err(transport)?;
        Ok(serde_json::from_str(&text)?)
    }

    async fn expect_success(&self, response: Response) -> Result<(), SyncError> {
        let text = response.text().await.map_err(transport)?;
        let answer: WriteResponse = serde_json::from_str(&text)?;
        if answer.success {
            Ok(())
        } else {
            Err(SyncError::Rejected(
                answer.error.unwrap_or_else(|| "remote reported failure".to_string()),
            ))
        }
    }
}

fn transport(e: reqwest::Error) -> SyncError {
    if e.is_timeout() {
        SyncError::Timeout
    } else {
        SyncError::Network(e)
    }
}

#[async_trait]
impl CompletionStore for HttpRemote {
    async fn today_status(&self, user: &str, date: NaiveDate) -> Result<StatusMap, SyncError> {
        let url = self.user_url(user, "status/today")?;
        let response = self
            .send(self.client.get(url).query(&[("date", date_key(date))]))
            .await?;
        let value = self.json_value(response).await?;

        // Accept both `{date, status: {...}}` and a bare status map.
        let status = match value.get("status") {
            Some(inner) if inner.is_object() => inner,
            _ => &value,
        };
        Ok(parse_status_map(status))
    }

    async fn set_level(
        &self,
        user: &str,
        date: NaiveDate,
        item: &ItemKey,
        level: Level,
    ) -> Result<(), SyncError> {
        let url = self.user_url(user, "levels")?;
        let body = SetLevelRequest {
            date,
            task: item.task.clone(),
            activity: item.activity.clone(),
            level,
        };
        let response = self.send(self.client.post(url).json(&body)).await?;
        self.expect_success(response).await
    }

    async fn history(
        &self,
        user: &str,
        end: NaiveDate,
        days: u32,
    ) -> Result<HistoryWindow, SyncError> {
        let url = self.user_url(user, "history")?;
        let query = [("end", date_key(end)), ("days", days.to_string())];
        let response = self.send(self.client.get(url).query(&query)).await?;
        let value = self.json_value(response).await?;
        Ok(HistoryWindow::from_wire(end, &value))
    }

    async fn note(
        &self,
        user: &str,
        date: NaiveDate,
        task: &str,
    ) -> Result<Option<String>, SyncError> {
        let url = self.note_url(user, task)?;
        let request = self.client.get(url).query(&[("date", date_key(date))]);
        let response = request.send().await.map_err(transport)?;
        if response.status() == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        let response = self.check(response).await?;
        let text = response.text().await.map_err(transport)?;
        let payload: NotePayload = serde_json::from_str(&text)?;
        Ok(Some(payload.note).filter(|n| !n.is_empty()))
    }

    async fn set_note(
        &self,
        user: &str,
        date: NaiveDate,
        task: &str,
        note: &str,
    ) -> Result<(), SyncError> {
        let url = self.note_url(user, task)?;
        let body = NotePayload {
            date: Some(date),
            note: note.to_string(),
        };
        let response = self.send(self.client.post(url).json(&body)).await?;
        self.expect_success(response).await
    }
}

#[async_trait]
impl CatalogSource for HttpRemote {
    async fn catalog(&self, user: &str) -> Result<TaskCatalog, SyncError> {
        let url = self.user_url(user, "catalog")?;
        let response = self.send(self.client.get(url)).await?;
        let text = response.text().await.map_err(transport)?;
        TaskCatalog::from_json(&text).map_err(|e| SyncError::Malformed(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mockito::Matcher;

    fn day() -> NaiveDate {
        NaiveDate::from_ymd_opt(2025, 10, 6).unwrap()
    }

    fn remote(server: &mockito::ServerGuard) -> HttpRemote {
        HttpRemote::new(&server.url(), Duration::from_secs(5)).unwrap()
    }

    #[test]
    fn base_url_gets_trailing_slash() {
        let remote = HttpRemote::new("http://localhost:8000/checkin", DEFAULT_REQUEST_TIMEOUT).unwrap();
        assert_eq!(remote.base_url().as_str(), "http://localhost:8000/checkin/");
        let url = remote.user_url("bob smith", "levels").unwrap();
        assert_eq!(
            url.as_str(),
            "http://localhost:8000/checkin/api/users/bob%20smith/levels"
        );
    }

    #[test]
    fn rejects_invalid_base_url() {
        assert!(matches!(
            HttpRemote::new("not a url", DEFAULT_REQUEST_TIMEOUT),
            Err(SyncError::InvalidUrl(_))
        ));
    }

    #[tokio::test]
    async fn today_status_accepts_wrapped_payload() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("GET", "/api/users/alice/status/today")
            .match_query(Matcher::UrlEncoded("date".into(), "2025-10-06".into()))
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(r#"{"date": "2025-10-06", "status": {"reading": 2, "meaning": {"writing": 1}}}"#)
            .create_async()
            .await;

        let status = remote(&server).today_status("alice", day()).await.unwrap();
        mock.assert_async().await;
        assert_eq!(status.len(), 2);
    }

    #[tokio::test]
    async fn set_level_posts_json_body() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/api/users/alice/levels")
            .match_body(Matcher::Json(serde_json::json!({
                "date": "2025-10-06",
                "task": "meaning",
                "activity": "writing",
                "level": 3
            })))
            .with_status(200)
            .with_body(r#"{"success": true}"#)
            .create_async()
            .await;

        remote(&server)
            .set_level("alice", day(), &ItemKey::new("meaning", Some("writing")), 3)
            .await
            .unwrap();
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn unsuccessful_write_is_rejected() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("POST", "/api/users/alice/levels")
            .with_status(200)
            .with_body(r#"{"success": false, "error": "locked"}"#)
            .create_async()
            .await;

        let err = remote(&server)
            .set_level("alice", day(), &ItemKey::flat("reading"), 1)
            .await
            .unwrap_err();
        assert!(matches!(err, SyncError::Rejected(ref m) if m == "locked"));
    }

    #[tokio::test]
    async fn server_error_is_unavailable() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("GET", "/api/users/alice/status/today")
            .match_query(Matcher::Any)
            .with_status(503)
            .create_async()
            .await;

        let err = remote(&server).today_status("alice", day()).await.unwrap_err();
        assert!(err.is_transient());
    }

    #[tokio::test]
    async fn history_parses_window() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("GET", "/api/users/alice/history")
            .match_query(Matcher::AllOf(vec![
                Matcher::UrlEncoded("end".into(), "2025-10-06".into()),
                Matcher::UrlEncoded("days".into(), "30".into()),
            ]))
            .with_status(200)
            .with_body(r#"{"2025-10-05": {"reading": 1}, "2025-10-04": {"reading": 2}}"#)
            .create_async()
            .await;

        let window = remote(&server).history("alice", day(), 30).await.unwrap();
        assert_eq!(window.len(), 2);
        assert_eq!(window.end(), day());
    }

    #[tokio::test]
    async fn missing_note_is_none() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("GET", "/api/users/alice/notes/reading")
            .match_query(Matcher::Any)
            .with_status(404)
            .create_async()
            .await;
        server
            .mock("GET", "/api/users/alice/notes/caring")
            .match_query(Matcher::Any)
            .with_status(200)
            .with_body(r#"{"note": "called mum"}"#)
            .create_async()
            .await;

        let remote = remote(&server);
        assert_eq!(remote.note("alice", day(), "reading").await.unwrap(), None);
        assert_eq!(
            remote.note("alice", day(), "caring").await.unwrap().as_deref(),
            Some("called mum")
        );
    }

    #[tokio::test]
    async fn catalog_is_validated() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("GET", "/api/users/alice/catalog")
            .with_status(200)
            .with_body(r#"{"tasks": []}"#)
            .create_async()
            .await;

        let err = remote(&server).catalog("alice").await.unwrap_err();
        assert!(matches!(err, SyncError::Malformed(_)));
    }
}
