//! Prompt leaf topic
//!
//! Sends a prompt, then waits across turns for a reply its validator accepts.
//! Suspension is the persisted [`PromptPhase`]; nothing blocks between turns.

mod validator;

pub use validator::{Rejection, TextValidator, Validator};

use crate::engine::Turn;
use crate::error::{ProtocolViolation, TopicResult};
use crate::topic::{Instance, Topic};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Renders and sends the prompt. `rejection` is set when re-prompting after an
/// invalid reply.
pub type Prompter<S> = fn(&mut Turn<'_>, &PromptState<S>, Option<&Rejection>) -> TopicResult<()>;

/// Prompt whose reply is taken verbatim from the message text
pub type TextPrompt<S> = Prompt<S, TextValidator>;

/// Where a prompt instance is in its lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PromptPhase {
    #[default]
    Created,
    Prompting,
    AwaitingReply,
    Satisfied,
    Exhausted,
}

impl PromptPhase {
    pub fn as_str(self) -> &'static str {
        match self {
            PromptPhase::Created => "created",
            PromptPhase::Prompting => "prompting",
            PromptPhase::AwaitingReply => "awaiting_reply",
            PromptPhase::Satisfied => "satisfied",
            PromptPhase::Exhausted => "exhausted",
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, PromptPhase::Satisfied | PromptPhase::Exhausted)
    }
}

impl fmt::Display for PromptPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Persisted prompt state
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct PromptState<S> {
    /// Caller-chosen tag echoed back in the result
    pub name: String,
    /// Opaque per-instance configuration for the prompter
    pub prompt_state: S,
    /// Replies received so far
    pub turns: u32,
    pub phase: PromptPhase,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PromptInitArgs<S> {
    pub name: String,
    pub prompt_state: S,
}

/// Outcome of a prompt
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PromptResult<T> {
    Value(T),
    TooManyAttempts,
}

impl<T> PromptResult<T> {
    pub fn value(self) -> Option<T> {
        match self {
            PromptResult::Value(value) => Some(value),
            PromptResult::TooManyAttempts => None,
        }
    }
}

/// What a prompt hands back to its parent
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PromptReturn<T> {
    pub name: String,
    pub result: PromptResult<T>,
}

/// Replies a prompt accepts before giving up, unless configured otherwise
pub const DEFAULT_MAX_TURNS: u32 = 100;

/// Leaf topic asking one question
pub struct Prompt<S, V> {
    name: String,
    max_turns: u32,
    prompter: Prompter<S>,
    validator: V,
}

impl<S, V: Validator> Prompt<S, V> {
    pub fn new(name: impl Into<String>, validator: V, prompter: Prompter<S>) -> Self {
        Self {
            name: name.into(),
            max_turns: DEFAULT_MAX_TURNS,
            prompter,
            validator,
        }
    }

    /// Replies accepted before giving up; clamped to at least one
    #[must_use]
    pub fn max_turns(mut self, max_turns: u32) -> Self {
        self.max_turns = max_turns.max(1);
        self
    }

    pub fn turn_budget(&self) -> u32 {
        self.max_turns
    }
}

impl<S> TextPrompt<S> {
    pub fn text(name: impl Into<String>, prompter: Prompter<S>) -> Self {
        Self::new(name, TextValidator, prompter)
    }
}

impl<S, V> fmt::Debug for Prompt<S, V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Prompt")
            .field("name", &self.name)
            .field("max_turns", &self.max_turns)
            .finish_non_exhaustive()
    }
}

impl<S, V> Topic for Prompt<S, V>
where
    S: Serialize + DeserializeOwned + Default + Send + Sync + 'static,
    V: Validator,
{
    type InitArgs = PromptInitArgs<S>;
    type State = PromptState<S>;
    type ReturnArgs = PromptReturn<V::Value>;

    fn name(&self) -> &str {
        &self.name
    }

    fn init(
        &self,
        turn: &mut Turn<'_>,
        instance: &mut Instance<Self>,
        args: PromptInitArgs<S>,
    ) -> TopicResult<()> {
        instance.state = PromptState {
            name: args.name,
            prompt_state: args.prompt_state,
            turns: 0,
            phase: PromptPhase::Prompting,
        };
        (self.prompter)(turn, &instance.state, None)?;
        instance.state.phase = PromptPhase::AwaitingReply;
        Ok(())
    }

    fn on_receive(&self, turn: &mut Turn<'_>, instance: &mut Instance<Self>) -> TopicResult<()> {
        if instance.state.phase != PromptPhase::AwaitingReply {
            return Err(ProtocolViolation::PromptNotAwaiting {
                instance_id: instance.id().to_string(),
                phase: instance.state.phase.to_string(),
            }
            .into());
        }

        let verdict = match turn.activity() {
            Some(activity) => self.validator.validate(activity),
            None => Err(Rejection::NotMessage),
        };
        instance.state.turns += 1;

        match verdict {
            Ok(value) => {
                instance.state.phase = PromptPhase::Satisfied;
                let name = instance.state.name.clone();
                turn.return_to_parent(
                    instance,
                    PromptReturn {
                        name,
                        result: PromptResult::Value(value),
                    },
                )
            }
            Err(rejection) if instance.state.turns < self.max_turns => {
                tracing::debug!(
                    instance_id = %instance.id(),
                    prompt = %instance.state.name,
                    turns = instance.state.turns,
                    %rejection,
                    "Reply rejected, prompting again"
                );
                (self.prompter)(turn, &instance.state, Some(&rejection))
            }
            Err(rejection) => {
                tracing::warn!(
                    instance_id = %instance.id(),
                    prompt = %instance.state.name,
                    turns = instance.state.turns,
                    %rejection,
                    "Prompt exhausted its turn budget"
                );
                instance.state.phase = PromptPhase::Exhausted;
                let name = instance.state.name.clone();
                turn.return_to_parent(
                    instance,
                    PromptReturn {
                        name,
                        result: PromptResult::TooManyAttempts,
                    },
                )
            }
        }
    }
}
