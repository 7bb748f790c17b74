use crate::error::LlmError;
use reqwest::header::HeaderMap;
use reqwest::multipart::Form;
use reqwest::{IntoUrl, Response};
use serde::{Serialize, de::DeserializeOwned};
use std::fmt::Debug;
use tracing::{Level, event, instrument};

#[derive(Clone, Default)]
pub(crate) struct Client {
    client: reqwest::Client,
    upgrade_url: Option<String>,
}

impl Client {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_headers(headers: HeaderMap) -> Result<Self, LlmError> {
        let client = reqwest::Client::builder().default_headers(headers).build()?;
        Ok(Client {
            client,
            upgrade_url: None,
        })
    }

    /// Where quota errors from this client should send the user.
    pub fn with_upgrade_url(mut self, url: impl Into<String>) -> Self {
        self.upgrade_url = Some(url.into());
        self
    }

    pub fn upgrade_url(&self) -> Option<&str> {
        self.upgrade_url.as_deref()
    }

    async fn check(&self, response: Response) -> Result<Response, LlmError> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let body = response.text().await.unwrap_or_default();
        Err(LlmError::from_status(
            status.as_u16(),
            &body,
            self.upgrade_url.as_deref(),
        ))
    }

    #[instrument(level = "trace", skip(self))]
    pub async fn get<U, T>(&self, url: U) -> Result<T, LlmError>
    where
        U: IntoUrl + Debug,
        T: DeserializeOwned,
    {
        let response = self.get_response(url).await?;
        let text = response.text().await?;
        event!(Level::TRACE, response = text);

        Ok(serde_json::from_str::<T>(&text)?)
    }

    /// GET with the status checked but the body left unread.
    #[instrument(level = "trace", skip(self))]
    pub async fn get_response<U>(&self, url: U) -> Result<Response, LlmError>
    where
        U: IntoUrl + Debug,
    {
        let response = self.client.get(url).send().await?;
        self.check(response).await
    }

    #[instrument(level = "trace", skip(self, request))]
    pub async fn post<U, S, T>(&self, url: U, request: &S) -> Result<T, LlmError>
    where
        U: IntoUrl + Debug,
        S: Serialize + ?Sized,
        T: DeserializeOwned,
    {
        let response = self.client.post(url).json(request).send().await?;
        let response = self.check(response).await?;
        let text = response.text().await?;
        event!(Level::TRACE, response = text);

        Ok(serde_json::from_str::<T>(&text)?)
    }

    /// POST a JSON body and return the raw response bytes.
    #[instrument(level = "trace", skip(self, request))]
    pub async fn post_bytes<U, S>(&self, url: U, request: &S) -> Result<bytes::Bytes, LlmError>
    where
        U: IntoUrl + Debug,
        S: Serialize + ?Sized,
    {
        let response = self.client.post(url).json(request).send().await?;
        let response = self.check(response).await?;
        Ok(response.bytes().await?)
    }

    /// POST a JSON body; the caller consumes the body as a stream.
    #[instrument(level = "trace", skip(self, request))]
    pub async fn post_stream<U, S>(&self, url: U, request: &S) -> Result<Response, LlmError>
    where
        U: IntoUrl + Debug,
        S: Serialize + ?Sized,
    {
        let response = self.client.post(url).json(request).send().await?;
        self.check(response).await
    }

    #[instrument(level = "trace", skip(self, form))]
    pub async fn post_multipart<U, T>(&self, url: U, form: Form) -> Result<T, LlmError>
    where
        U: IntoUrl + Debug,
        T: DeserializeOwned,
    {
        let response = self.client.post(url).multipart(form).send().await?;
        let response = self.check(response).await?;
        let text = response.text().await?;
        event!(Level::TRACE, response = text);

        Ok(serde_json::from_str::<T>(&text)?)
    }
}
