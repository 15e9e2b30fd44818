//! Schema-driven slot-filling form
//!
//! `SimpleForm` asks for each schema field in order through a text prompt
//! child, one at a time, and returns the collected values once every field
//! is filled.

mod schema;

pub use schema::{FieldMetadata, FieldType, OrderedForm, Schema};

use crate::composite::{ChildReturns, CompletedChild};
use crate::engine::Turn;
use crate::error::{ProtocolViolation, TopicError, TopicResult};
use crate::prompt::{
    PromptInitArgs, PromptResult, PromptReturn, PromptState, Rejection, TextPrompt,
    DEFAULT_MAX_TURNS,
};
use crate::topic::{AnyTopic, Instance, Topic};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;

/// Collected answers by field name, sorted by name; use [`Schema::ordered`]
/// to read them back in the order they were asked
pub type FormData = BTreeMap<String, String>;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SimpleFormState {
    pub schema: Schema,
    pub form: FormData,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SimpleFormInitArgs {
    pub schema: Schema,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SimpleFormReturn {
    pub form: FormData,
}

/// Per-prompt configuration the form hands its text prompt
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FormPromptState {
    pub prompt: String,
}

/// Sequential form over a [`Schema`]
#[derive(Debug)]
pub struct SimpleForm {
    name: String,
    text_prompt: Arc<TextPrompt<FormPromptState>>,
    child_returns: ChildReturns<SimpleForm>,
}

impl SimpleForm {
    pub fn new(name: impl Into<String>) -> Self {
        Self::with_max_turns(name, DEFAULT_MAX_TURNS)
    }

    /// Form whose prompts give up after `max_turns` rejected replies
    pub fn with_max_turns(name: impl Into<String>, max_turns: u32) -> Self {
        let name = name.into();
        let prompt_name = format!("{name}.text_prompt");
        Self {
            text_prompt: Arc::new(
                TextPrompt::text(prompt_name.clone(), send_field_prompt)
                    .max_turns(max_turns),
            ),
            child_returns: ChildReturns::new()
                .on_child_return(prompt_name, on_text_prompt_return),
            name,
        }
    }

    /// Name of the text prompt topic this form spawns
    pub fn prompt_topic(&self) -> &str {
        self.text_prompt.name()
    }
}

/// A field still needs asking when it has no value or an empty one.
///
/// The empty check means a field answered with `""` is asked again on the
/// next scan, with a fresh prompt, for as long as the user keeps sending
/// empty replies. Kept deliberately; changing it changes which replies
/// complete a form.
fn is_unfilled(form: &FormData, field: &str) -> bool {
    form.get(field).map_or(true, String::is_empty)
}

fn send_field_prompt(
    turn: &mut Turn<'_>,
    state: &PromptState<FormPromptState>,
    _rejection: Option<&Rejection>,
) -> TopicResult<()> {
    turn.send_activity(state.prompt_state.prompt.clone());
    Ok(())
}

fn on_text_prompt_return(
    form: &SimpleForm,
    turn: &mut Turn<'_>,
    instance: &mut Instance<SimpleForm>,
    child: CompletedChild,
) -> TopicResult<()> {
    let PromptReturn { name, result } = child.args::<PromptReturn<String>>()?;
    let metadata = instance
        .state
        .schema
        .get(&name)
        .ok_or_else(|| ProtocolViolation::UnknownField { field: name.clone() })?;

    let value = match result {
        PromptResult::Value(reply) => metadata.field_type.coerce(reply)?,
        PromptResult::TooManyAttempts => {
            return Err(TopicError::PromptExhausted {
                field: name,
                turns: form.text_prompt.turn_budget(),
            })
        }
    };

    tracing::debug!(
        instance_id = %instance.id(),
        field = %name,
        "Form field answered"
    );
    instance.state.form.insert(name, value);
    instance.clear_child();
    turn.do_next(instance);
    Ok(())
}

impl Topic for SimpleForm {
    type InitArgs = SimpleFormInitArgs;
    type State = SimpleFormState;
    type ReturnArgs = SimpleFormReturn;

    fn name(&self) -> &str {
        &self.name
    }

    fn init(
        &self,
        turn: &mut Turn<'_>,
        instance: &mut Instance<Self>,
        args: SimpleFormInitArgs,
    ) -> TopicResult<()> {
        instance.state = SimpleFormState {
            schema: args.schema,
            form: FormData::new(),
        };
        turn.do_next(instance);
        Ok(())
    }

    fn next(&self, turn: &mut Turn<'_>, instance: &mut Instance<Self>) -> TopicResult<()> {
        if instance.has_child() || instance.has_returned() {
            return Ok(());
        }
        instance.state.schema.ensure_supported()?;

        let pending = instance
            .state
            .schema
            .iter()
            .find(|(field, _)| is_unfilled(&instance.state.form, field))
            .map(|(field, metadata)| (field.to_string(), metadata.prompt.clone()));

        match pending {
            Some((field, prompt)) => {
                let child_id = turn.create_instance(
                    self.text_prompt.as_ref(),
                    Some(instance.id()),
                    PromptInitArgs {
                        name: field,
                        prompt_state: FormPromptState { prompt },
                    },
                )?;
                instance.set_child(child_id)?;
                Ok(())
            }
            None => {
                let form = instance.state.form.clone();
                turn.return_to_parent(instance, SimpleFormReturn { form })
            }
        }
    }

    fn on_child_return(
        &self,
        turn: &mut Turn<'_>,
        instance: &mut Instance<Self>,
        child: CompletedChild,
    ) -> TopicResult<()> {
        self.child_returns.invoke(self, turn, instance, child)
    }

    fn child_topics(&self) -> Vec<Arc<dyn AnyTopic>> {
        let prompt: Arc<dyn AnyTopic> = self.text_prompt.clone();
        vec![prompt]
    }
}
