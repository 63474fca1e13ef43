//! Client for the remote question repository.
//!
//! The repository is a PostgREST-style HTTP store holding a single
//! `questions` table keyed by a caller-assigned numeric `index`. This
//! crate wraps the four CRUD operations behind a typed client and
//! validates records at the boundary so the rest of the system never
//! sees a question without text or an index.
//!
//! Configuration comes from the environment. When the endpoint or key
//! is absent the client reports [`QuestionsError::NotConfigured`];
//! callers treat that as "remote flows disabled", not a failure.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use quizwheel_core::Item;

/// Environment variable naming the repository base URL.
pub const QUESTIONS_URL_ENV: &str = "QUIZWHEEL_QUESTIONS_URL";
/// Environment variable holding the repository API key.
pub const QUESTIONS_KEY_ENV: &str = "QUIZWHEEL_QUESTIONS_KEY";

const REQUEST_TIMEOUT: Duration = Duration::from_secs(15);

/// Errors surfaced by the question repository client.
#[derive(Debug, thiserror::Error)]
pub enum QuestionsError {
    #[error("question repository is not configured; set {QUESTIONS_URL_ENV} and {QUESTIONS_KEY_ENV}")]
    NotConfigured,
    #[error("transport failure talking to question repository: {0}")]
    Transport(String),
    #[error("question repository returned status {status}: {message}")]
    Api { status: u16, message: String },
    #[error("a question with index {0} already exists")]
    IndexConflict(u32),
    #[error("invalid question record: {0}")]
    InvalidRecord(String),
}

/// Connection settings for the remote repository.
#[derive(Debug, Clone)]
pub struct QuestionsConfig {
    pub base_url: String,
    pub api_key: String,
}

impl QuestionsConfig {
    #[must_use]
    pub fn new(base_url: impl Into<String>, api_key: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            api_key: api_key.into(),
        }
    }

    /// Reads the endpoint and key from the environment.
    ///
    /// # Errors
    ///
    /// Returns [`QuestionsError::NotConfigured`] when either variable is
    /// unset or blank.
    pub fn from_env() -> Result<Self, QuestionsError> {
        Self::from_settings(
            std::env::var(QUESTIONS_URL_ENV).ok(),
            std::env::var(QUESTIONS_KEY_ENV).ok(),
        )
    }

    /// Builds the config from raw settings values; a blank value counts as
    /// unset.
    ///
    /// # Errors
    ///
    /// Returns [`QuestionsError::NotConfigured`] when either value is
    /// missing or blank.
    pub fn from_settings(
        base_url: Option<String>,
        api_key: Option<String>,
    ) -> Result<Self, QuestionsError> {
        let base_url = base_url
            .filter(|value| !value.trim().is_empty())
            .ok_or(QuestionsError::NotConfigured)?;
        let api_key = api_key
            .filter(|value| !value.trim().is_empty())
            .ok_or(QuestionsError::NotConfigured)?;
        Ok(Self { base_url, api_key })
    }
}

/// One row in the remote `questions` table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QuestionRecord {
    pub index: u32,
    pub question: String,
    #[serde(default)]
    pub answers: Option<String>,
}

impl QuestionRecord {
    /// Checks the record against the repository contract.
    ///
    /// # Errors
    ///
    /// Returns [`QuestionsError::InvalidRecord`] when the index is zero
    /// or the question text is blank.
    pub fn validate(&self) -> Result<(), QuestionsError> {
        if self.index == 0 {
            return Err(QuestionsError::InvalidRecord(
                "index must be at least 1".to_owned(),
            ));
        }
        if self.question.trim().is_empty() {
            return Err(QuestionsError::InvalidRecord(
                "question text must not be blank".to_owned(),
            ));
        }
        Ok(())
    }

    /// Converts the record into a wheel item. The stringified index
    /// becomes the segment name so repository rows stay addressable
    /// after they land on the wheel.
    #[must_use]
    pub fn into_wheel_item(self) -> Item {
        Item {
            name: self.index.to_string(),
            prompt: self.question,
            answer: self.answers,
        }
    }
}

/// Smallest index not yet taken, starting from 1.
#[must_use]
pub fn next_index(records: &[QuestionRecord]) -> u32 {
    records
        .iter()
        .map(|record| record.index)
        .max()
        .map_or(1, |max| max.saturating_add(1))
}

/// Blocking HTTP client for the question repository.
pub struct QuestionsClient {
    agent: ureq::Agent,
    config: QuestionsConfig,
}

impl QuestionsClient {
    #[must_use]
    pub fn new(config: QuestionsConfig) -> Self {
        let agent = ureq::AgentBuilder::new()
            .timeout(REQUEST_TIMEOUT)
            .build();
        Self { agent, config }
    }

    /// Builds a client from the environment.
    ///
    /// # Errors
    ///
    /// Returns [`QuestionsError::NotConfigured`] when the endpoint or
    /// key is missing.
    pub fn from_env() -> Result<Self, QuestionsError> {
        Ok(Self::new(QuestionsConfig::from_env()?))
    }

    fn table_url(&self) -> String {
        format!(
            "{}/rest/v1/questions",
            self.config.base_url.trim_end_matches('/')
        )
    }

    fn request(&self, method: &str, url: &str) -> ureq::Request {
        self.agent
            .request(method, url)
            .set("apikey", &self.config.api_key)
            .set("Authorization", &format!("Bearer {}", self.config.api_key))
            .set("Content-Type", "application/json")
    }

    /// Fetches every question in the repository, sorted by index.
    ///
    /// Rows that fail validation are dropped here with a warning rather
    /// than propagated; a single bad row must not take down the list.
    ///
    /// # Errors
    ///
    /// Returns [`QuestionsError::Transport`] or [`QuestionsError::Api`]
    /// when the request fails, and [`QuestionsError::InvalidRecord`]
    /// when the response body is not a JSON array.
    pub fn list(&self) -> Result<Vec<QuestionRecord>, QuestionsError> {
        let url = format!("{}?select=*", self.table_url());
        let response = self
            .request("GET", &url)
            .call()
            .map_err(map_request_error)?;
        let rows: Vec<serde_json::Value> = response
            .into_json()
            .map_err(|err| QuestionsError::InvalidRecord(err.to_string()))?;

        let mut records = Vec::with_capacity(rows.len());
        for row in rows {
            match serde_json::from_value::<QuestionRecord>(row) {
                Ok(record) => match record.validate() {
                    Ok(()) => records.push(record),
                    Err(err) => {
                        tracing::warn!(error = %err, "dropping invalid question row");
                    }
                },
                Err(err) => {
                    tracing::warn!(error = %err, "dropping unreadable question row");
                }
            }
        }
        records.sort_by_key(|record| record.index);
        Ok(records)
    }

    /// Inserts a new question under the given index.
    ///
    /// # Errors
    ///
    /// Returns [`QuestionsError::InvalidRecord`] when the inputs fail
    /// validation, [`QuestionsError::IndexConflict`] when the index is
    /// already taken, and transport/API errors otherwise.
    pub fn create(
        &self,
        index: u32,
        question: &str,
        answers: Option<&str>,
    ) -> Result<QuestionRecord, QuestionsError> {
        let record = QuestionRecord {
            index,
            question: question.trim().to_owned(),
            answers: answers.map(str::trim).map(str::to_owned),
        };
        record.validate()?;

        let body = serde_json::json!([{
            "index": record.index,
            "question": record.question,
            "answers": record.answers,
        }]);
        self.request("POST", &self.table_url())
            .send_json(body)
            .map_err(|err| match err {
                ureq::Error::Status(409, _) => QuestionsError::IndexConflict(index),
                other => map_request_error(other),
            })?;
        Ok(record)
    }

    /// Applies a partial update to the question at `index`. Fields left
    /// as `None` keep their stored value.
    ///
    /// # Errors
    ///
    /// Returns [`QuestionsError::InvalidRecord`] when no field is given
    /// or the new question text is blank, and transport/API errors
    /// otherwise.
    pub fn update(
        &self,
        index: u32,
        question: Option<&str>,
        answers: Option<&str>,
    ) -> Result<(), QuestionsError> {
        if question.is_none() && answers.is_none() {
            return Err(QuestionsError::InvalidRecord(
                "update requires a new question or answer".to_owned(),
            ));
        }
        let mut body = serde_json::Map::new();
        if let Some(text) = question {
            if text.trim().is_empty() {
                return Err(QuestionsError::InvalidRecord(
                    "question text must not be blank".to_owned(),
                ));
            }
            body.insert(
                "question".to_owned(),
                serde_json::Value::String(text.trim().to_owned()),
            );
        }
        if let Some(text) = answers {
            body.insert(
                "answers".to_owned(),
                serde_json::Value::String(text.trim().to_owned()),
            );
        }

        let url = format!("{}?index=eq.{index}", self.table_url());
        self.request("PATCH", &url)
            .send_json(serde_json::Value::Object(body))
            .map_err(map_request_error)?;
        Ok(())
    }

    /// Deletes the question at `index`. Deleting an absent index is a
    /// no-op on the PostgREST side and succeeds here as well.
    ///
    /// # Errors
    ///
    /// Returns transport or API errors from the repository.
    pub fn delete(&self, index: u32) -> Result<(), QuestionsError> {
        let url = format!("{}?index=eq.{index}", self.table_url());
        self.request("DELETE", &url)
            .call()
            .map_err(map_request_error)?;
        Ok(())
    }
}

fn map_request_error(err: ureq::Error) -> QuestionsError {
    match err {
        ureq::Error::Status(status, response) => {
            let message = response
                .into_string()
                .unwrap_or_else(|_| "<unreadable body>".to_owned());
            QuestionsError::Api { status, message }
        }
        ureq::Error::Transport(transport) => QuestionsError::Transport(transport.to_string()),
    }
}
