//! Property-based tests for the turn engine
//!
//! These drive a `SimpleForm` through arbitrary schemas and answer sequences.

use crate::form::{FieldMetadata, Schema, SimpleForm, SimpleFormInitArgs};
use crate::runtime::testing::TurnDriver;
use crate::topic::TopicRegistry;
use proptest::prelude::*;
use serde_json::{json, Map, Value};

// ============================================================================
// Test Helpers
// ============================================================================

fn prompt_for(field: &str) -> String {
    format!("Please enter {field}")
}

fn schema_for(fields: &[String]) -> Schema {
    fields.iter().fold(Schema::new(), |schema, field| {
        schema.field(field.clone(), FieldMetadata::string(prompt_for(field)))
    })
}

fn registry() -> TopicRegistry {
    TopicRegistry::new()
        .with_topic(SimpleForm::new("form"))
        .unwrap()
}

fn start(driver: &mut TurnDriver<'_>, fields: &[String]) {
    let args = serde_json::to_value(SimpleFormInitArgs {
        schema: schema_for(fields),
    })
    .unwrap();
    let result = driver.start("form", args).unwrap();
    assert!(result.completed.is_none());
}

/// Root plus exactly one prompt child, linked to each other
fn assert_single_active_child(driver: &TurnDriver<'_>) {
    let instances = driver.instances();
    assert_eq!(instances.len(), 2);
    let root = driver.root().unwrap();
    let leaf = driver.active_leaf().unwrap();
    assert_eq!(root.child_instance_id.as_deref(), Some(leaf.id.as_str()));
    assert_eq!(leaf.parent_id.as_deref(), Some(root.id.as_str()));
    assert!(leaf.child_instance_id.is_none());
}

// ============================================================================
// Arbitrary Generators
// ============================================================================

fn arb_fields() -> impl Strategy<Value = Vec<String>> {
    prop::collection::hash_set("[a-z]{1,8}", 1..6)
        .prop_map(|set| set.into_iter().collect())
}

fn arb_fields_and_answers() -> impl Strategy<Value = (Vec<String>, Vec<String>)> {
    arb_fields().prop_flat_map(|fields| {
        let n = fields.len();
        (
            Just(fields),
            prop::collection::vec("[A-Za-z ]{1,12}", n),
        )
    })
}

// ============================================================================
// Properties
// ============================================================================

proptest! {
    #[test]
    fn prop_prompts_follow_schema_order((fields, answers) in arb_fields_and_answers()) {
        let registry = registry();
        let mut driver = TurnDriver::new(&registry);
        start(&mut driver, &fields);

        for (i, (field, answer)) in fields.iter().zip(&answers).enumerate() {
            prop_assert_eq!(driver.sent().len(), i + 1);
            prop_assert_eq!(driver.sent().last().cloned(), Some(prompt_for(field)));
            assert_single_active_child(&driver);

            let result = driver.say(answer).unwrap();
            prop_assert_eq!(result.completed.is_some(), i + 1 == fields.len());
        }
    }

    #[test]
    fn prop_completed_form_matches_answers((fields, answers) in arb_fields_and_answers()) {
        let registry = registry();
        let mut driver = TurnDriver::new(&registry);
        start(&mut driver, &fields);

        let mut completed = Vec::new();
        for answer in &answers {
            if let Some(value) = driver.say(answer).unwrap().completed {
                completed.push(value);
            }
        }

        let expected: Map<String, Value> = fields
            .iter()
            .cloned()
            .zip(answers.iter().map(|a| json!(a)))
            .collect();
        prop_assert_eq!(completed, vec![json!({ "form": expected })]);
        prop_assert!(driver.instances().is_empty());
    }

    #[test]
    fn prop_empty_answers_reprompt_same_field(
        (fields, answers) in arb_fields_and_answers(),
        blanks in prop::collection::vec(0usize..3, 1..6),
    ) {
        let registry = registry();
        let mut driver = TurnDriver::new(&registry);
        start(&mut driver, &fields);

        for (i, (field, answer)) in fields.iter().zip(&answers).enumerate() {
            let repeats = blanks.get(i).copied().unwrap_or(0);
            for _ in 0..repeats {
                let result = driver.say("").unwrap();
                prop_assert!(result.completed.is_none());
                prop_assert_eq!(driver.sent().last().cloned(), Some(prompt_for(field)));
                assert_single_active_child(&driver);
            }
            driver.say(answer).unwrap();
        }

        let prompts_sent = fields.len()
            + (0..fields.len())
                .map(|i| blanks.get(i).copied().unwrap_or(0))
                .sum::<usize>();
        prop_assert_eq!(driver.sent().len(), prompts_sent);
        prop_assert!(driver.root().is_none());
    }
}
