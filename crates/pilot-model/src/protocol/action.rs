use serde::{Deserialize, Serialize, de::DeserializeOwned};
use serde_json::Value;

use crate::ModelError;

/// A typed action: its wire name plus the parameter and result types that travel in the envelope.
///
/// Implementors are usually zero-sized marker types:
/// ```
/// use pilot_model::Action;
/// use serde::{Deserialize, Serialize};
///
/// #[derive(Serialize, Deserialize)]
/// struct ScrollParams { pixels: i64 }
///
/// struct Scroll;
/// impl Action for Scroll {
///     const NAME: &'static str = "scroll";
///     type Params = ScrollParams;
///     type Output = ();
/// }
/// ```
pub trait Action: Send + Sync + 'static {
    const NAME: &'static str;
    type Params: Serialize + DeserializeOwned + Send + 'static;
    type Output: Serialize + DeserializeOwned + Send + 'static;

    fn encode_params(params: &Self::Params) -> Result<Value, ModelError> {
        Ok(serde_json::to_value(params)?)
    }

    fn decode_params(raw: Value) -> Result<Self::Params, ModelError> {
        serde_json::from_value(raw)
            .map_err(|e| ModelError::InvalidPayload(format!("{} parameters: {e}", Self::NAME)))
    }

    fn encode_output(output: &Self::Output) -> Result<Value, ModelError> {
        Ok(serde_json::to_value(output)?)
    }

    fn decode_output(raw: Value) -> Result<Self::Output, ModelError> {
        serde_json::from_value(raw)
            .map_err(|e| ModelError::InvalidPayload(format!("{} result: {e}", Self::NAME)))
    }
}

/// Move the target to a new location.
///
/// The canonical context-destroying action: reaching the next context proves it completed.
pub struct Navigate;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NavigateParams {
    pub url: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NavigateOutput {
    pub location: Option<String>,
}

impl Action for Navigate {
    const NAME: &'static str = "navigate";
    type Params = NavigateParams;
    type Output = NavigateOutput;
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn decode_reports_action_name() {
        let err = Navigate::decode_params(json!({"href": 1})).unwrap_err();
        assert!(err.to_string().contains("navigate parameters"));
    }

    #[test]
    fn params_encode_as_object() {
        let v = Navigate::encode_params(&NavigateParams { url: "https://a".into() }).unwrap();
        assert_eq!(v, json!({"url": "https://a"}));
    }
}
