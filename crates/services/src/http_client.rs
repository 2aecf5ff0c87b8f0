//! [`CatalogApi`] and [`ProgressApi`] over HTTP.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, RequestBuilder, Response, StatusCode};
use serde::de::DeserializeOwned;

use progress_core::model::{
    ChapterId, Enrollment, Formation, FormationSlug, Lesson, LessonId, LessonProgress,
    ProgressDelta,
};

use crate::api::{CatalogApi, Dashboard, FormationProgressView, ProgressApi};
use crate::config::SyncConfig;
use crate::error::SyncError;

#[derive(Clone)]
pub struct HttpProgressClient {
    client: Client,
    base_url: String,
    token: Option<String>,
}

impl HttpProgressClient {
    /// # Errors
    ///
    /// Returns `reqwest::Error` if the HTTP client cannot be built.
    pub fn new(
        base_url: impl Into<String>,
        token: Option<String>,
        timeout: Duration,
    ) -> Result<Self, reqwest::Error> {
        let client = Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            base_url: base_url.into(),
            token,
        })
    }

    /// `None` when no API URL is configured.
    ///
    /// # Errors
    ///
    /// Returns `reqwest::Error` if the HTTP client cannot be built.
    pub fn from_config(config: &SyncConfig) -> Result<Option<Self>, reqwest::Error> {
        config
            .api_url
            .as_ref()
            .map(|url| Self::new(url.clone(), config.token.clone(), config.request_timeout))
            .transpose()
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{}", self.base_url.trim_end_matches('/'), path)
    }

    fn authed(&self, request: RequestBuilder) -> Result<RequestBuilder, SyncError> {
        let token = self.token.as_ref().ok_or(SyncError::Unauthorized)?;
        Ok(request.bearer_auth(token))
    }

    async fn send<T: DeserializeOwned>(request: RequestBuilder) -> Result<T, SyncError> {
        let response = request.send().await?;
        Ok(checked(response).await?.json().await?)
    }
}

/// Map a non-success status onto a sync error.
///
/// Only 401 means the token is bad; 403 is the backend refusing access to a
/// lesson, which is a refusal of the values rather than of the credentials.
fn classify_status(status: StatusCode, body: String) -> SyncError {
    match status {
        StatusCode::UNAUTHORIZED => SyncError::Unauthorized,
        StatusCode::NOT_FOUND => SyncError::NotFound,
        StatusCode::BAD_REQUEST | StatusCode::FORBIDDEN | StatusCode::UNPROCESSABLE_ENTITY => {
            SyncError::Rejected(body)
        }
        other => SyncError::Server(other.as_u16()),
    }
}

async fn checked(response: Response) -> Result<Response, SyncError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    // the body is only used for the rejection message
    let body = response.text().await.unwrap_or_default();
    Err(classify_status(status, body))
}

#[async_trait]
impl CatalogApi for HttpProgressClient {
    async fn formation(&self, slug: &FormationSlug) -> Result<Formation, SyncError> {
        let url = self.url(&format!("formations/{slug}"));
        Self::send(self.client.get(url)).await
    }

    async fn lesson(&self, lesson_id: LessonId) -> Result<Lesson, SyncError> {
        let url = self.url(&format!("lessons/{lesson_id}"));
        Self::send(self.client.get(url)).await
    }

    async fn chapter_lessons(&self, chapter_id: ChapterId) -> Result<Vec<Lesson>, SyncError> {
        let url = self.url(&format!("chapters/{chapter_id}/lessons"));
        Self::send(self.client.get(url)).await
    }
}

#[async_trait]
impl ProgressApi for HttpProgressClient {
    fn has_credentials(&self) -> bool {
        self.token.is_some()
    }

    async fn formation_progress(
        &self,
        slug: &FormationSlug,
    ) -> Result<FormationProgressView, SyncError> {
        let url = self.url(&format!("formations/{slug}/progress"));
        Self::send(self.authed(self.client.get(url))?).await
    }

    async fn lesson_progress(
        &self,
        lesson_id: LessonId,
    ) -> Result<Option<LessonProgress>, SyncError> {
        let url = self.url(&format!("lessons/{lesson_id}/progress"));
        match Self::send(self.authed(self.client.get(url))?).await {
            Ok(progress) => Ok(Some(progress)),
            Err(SyncError::NotFound) => Ok(None),
            Err(e) => Err(e),
        }
    }

    async fn upsert_progress(
        &self,
        lesson_id: LessonId,
        delta: &ProgressDelta,
    ) -> Result<LessonProgress, SyncError> {
        let url = self.url(&format!("lessons/{lesson_id}/progress"));
        Self::send(self.authed(self.client.post(url))?.json(delta)).await
    }

    async fn enroll(&self, slug: &FormationSlug) -> Result<Enrollment, SyncError> {
        let url = self.url(&format!("formations/{slug}/enroll"));
        Self::send(self.authed(self.client.post(url))?).await
    }

    async fn dashboard(&self) -> Result<Dashboard, SyncError> {
        let url = self.url("progress-dashboard");
        Self::send(self.authed(self.client.get(url))?).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorClass;

    #[test]
    fn statuses_map_to_error_classes() {
        let class = |code: u16| {
            classify_status(StatusCode::from_u16(code).unwrap(), "nope".into()).class()
        };
        assert_eq!(class(401), ErrorClass::Authorization);
        assert_eq!(class(403), ErrorClass::Validation);
        assert_eq!(class(404), ErrorClass::Fatal);
        assert_eq!(class(400), ErrorClass::Validation);
        assert_eq!(class(422), ErrorClass::Validation);
        assert_eq!(class(500), ErrorClass::Transient);
        assert_eq!(class(503), ErrorClass::Transient);
        assert_eq!(class(429), ErrorClass::Transient);
    }

    #[test]
    fn rejection_keeps_the_body() {
        let err = classify_status(StatusCode::BAD_REQUEST, "unknown field `foo`".into());
        assert!(matches!(err, SyncError::Rejected(body) if body.contains("foo")));
    }

    #[test]
    fn urls_join_without_double_slashes() {
        let client =
            HttpProgressClient::new("http://localhost:8080/", None, Duration::from_secs(1))
                .unwrap();
        assert_eq!(
            client.url("lessons/3/progress"),
            "http://localhost:8080/lessons/3/progress"
        );
        assert!(!client.has_credentials());
    }

    #[test]
    fn missing_url_means_no_client() {
        assert!(
            HttpProgressClient::from_config(&SyncConfig::default())
                .unwrap()
                .is_none()
        );
    }
}
