//! Reply validation for prompts

use crate::engine::Activity;
use serde::de::DeserializeOwned;
use serde::Serialize;
use thiserror::Error;

/// Why a reply did not satisfy a prompt
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum Rejection {
    #[error("activity is not a message")]
    NotMessage,

    #[error("message carries no text")]
    NotText,

    #[error("{0}")]
    Invalid(String),
}

/// Turns an inbound activity into the value a prompt returns
pub trait Validator: Send + Sync + 'static {
    type Value: Serialize + DeserializeOwned;

    fn validate(&self, activity: &Activity) -> Result<Self::Value, Rejection>;
}

/// Accepts the text of any message, including empty text
#[derive(Debug, Clone, Copy, Default)]
pub struct TextValidator;

impl Validator for TextValidator {
    type Value = String;

    fn validate(&self, activity: &Activity) -> Result<String, Rejection> {
        if !activity.is_message() {
            return Err(Rejection::NotMessage);
        }
        activity.text().map(str::to_string).ok_or(Rejection::NotText)
    }
}
