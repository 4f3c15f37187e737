//! Options validation for plugin setup.
//!
//! A plugin may declare an [`OptionsSpec`] pairing a validator with a
//! default value. `validate_options` never runs the validator on a `None`
//! input when a default is available; it only parses caller-supplied input.

use std::fmt;
use std::sync::Arc;

use serde_json::Value;

use crate::error::{Error, Result};

/// A schema capable of validating and normalizing a plugin's options.
/// Implementors typically wrap a `serde_json::Value -> T` deserialize step,
/// but the trait stays JSON-shaped so the registry can hold it as
/// `Arc<dyn OptionsSchema>` independent of the plugin's own option type.
pub trait OptionsSchema: Send + Sync {
    fn parse(&self, input: Value) -> std::result::Result<Value, String>;
}

impl fmt::Debug for dyn OptionsSchema {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "<options schema>")
    }
}

/// A plugin's declared options contract: an optional validator plus an
/// optional default used when the caller supplies no options at all.
#[derive(Clone)]
pub struct OptionsSpec {
    pub validator: Arc<dyn OptionsSchema>,
    pub default_value: Option<Value>,
}

impl fmt::Debug for OptionsSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OptionsSpec")
            .field("default_value", &self.default_value)
            .finish()
    }
}

/// Validates `input` against `spec` for the named plugin.
///
/// - No spec: the plugin takes no options; returns `Ok(None)` regardless of `input`.
/// - No input but a default exists: returns the default, unvalidated (it is
///   trusted author-supplied data, not user input).
/// - Otherwise: runs the validator and rewraps any failure as
///   [`Error::OptionsValidationFailed`].
pub fn validate_options(
    plugin_name: &str,
    spec: Option<&OptionsSpec>,
    input: Option<Value>,
) -> Result<Option<Value>> {
    let Some(spec) = spec else {
        return Ok(None);
    };
    let value = match input {
        Some(v) => v,
        None => match &spec.default_value {
            Some(default) => return Ok(Some(default.clone())),
            None => Value::Null,
        },
    };
    spec.validator
        .parse(value)
        .map(Some)
        .map_err(|message| Error::OptionsValidationFailed {
            plugin: plugin_name.to_string(),
            message,
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    struct EvenNumber;
    impl OptionsSchema for EvenNumber {
        fn parse(&self, input: Value) -> std::result::Result<Value, String> {
            match input.as_i64() {
                Some(n) if n % 2 == 0 => Ok(input),
                Some(n) => Err(format!("{n} is not even")),
                None => Err("expected an integer".to_string()),
            }
        }
    }

    #[test]
    fn no_spec_means_no_options() {
        assert_eq!(validate_options("p", None, Some(json!(3))).unwrap(), None);
    }

    #[test]
    fn missing_input_falls_back_to_default_without_validation() {
        let spec = OptionsSpec {
            validator: Arc::new(EvenNumber),
            default_value: Some(json!(3)), // odd, would fail validation, but default is trusted
        };
        assert_eq!(validate_options("p", Some(&spec), None).unwrap(), Some(json!(3)));
    }

    #[test]
    fn present_input_is_validated() {
        let spec = OptionsSpec {
            validator: Arc::new(EvenNumber),
            default_value: None,
        };
        assert_eq!(validate_options("p", Some(&spec), Some(json!(4))).unwrap(), Some(json!(4)));
        let err = validate_options("p", Some(&spec), Some(json!(3))).unwrap_err();
        assert!(matches!(err, Error::OptionsValidationFailed { plugin, .. } if plugin == "p"));
    }
}
