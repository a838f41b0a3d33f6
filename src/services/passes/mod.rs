//! The individual model passes of a takeoff.
//!
//! Each pass builds its prompt, makes exactly one gateway call (or none, when
//! the grid pass skips a reference sheet) and decodes the reply. Passes never
//! substitute defaults on failure; that is the analyzer's call.

pub mod grid;
pub mod legend;
pub mod quick;
pub mod validation;

use tracing::debug;

use crate::domain::takeoff::PreparedPayload;
use crate::error::{PassError, PassKind};
use crate::services::decoder::{self, Decoded};
use crate::services::gateway::ModelGateway;

/// Sends one prompt and decodes whatever comes back.
pub(crate) async fn ask(
    gateway: &dyn ModelGateway,
    pass: PassKind,
    prompt: &str,
    payload: &PreparedPayload,
    temperature: f32,
) -> Result<Decoded, PassError> {
    let text = gateway
        .generate(prompt, payload, temperature)
        .await
        .map_err(|e| PassError::new(pass, e))?;

    let decoded = decoder::decode(&text);
    debug!(pass = %pass, strategy = ?decoded.strategy, "Pass response decoded");
    Ok(decoded)
}

#[cfg(test)]
pub(crate) mod test_support {
    use async_trait::async_trait;
    use parking_lot::Mutex;
    use std::collections::VecDeque;

    use crate::domain::takeoff::{Document, PreparedPayload};
    use crate::error::GatewayError;
    use crate::services::gateway::ModelGateway;

    /// Replays canned replies in order and records every prompt it was sent.
    #[derive(Default)]
    pub struct ScriptedGateway {
        replies: Mutex<VecDeque<Result<String, GatewayError>>>,
        pub prompts: Mutex<Vec<String>>,
    }

    impl ScriptedGateway {
        pub fn with_replies(replies: Vec<Result<String, GatewayError>>) -> Self {
            Self {
                replies: Mutex::new(replies.into()),
                prompts: Mutex::new(Vec::new()),
            }
        }

        pub fn calls(&self) -> usize {
            self.prompts.lock().len()
        }
    }

    pub fn payload() -> PreparedPayload {
        PreparedPayload::Inline {
            mime_type: "image/png".into(),
            data_base64: "AAAA".into(),
        }
    }

    #[async_trait]
    impl ModelGateway for ScriptedGateway {
        async fn prepare_payload(&self, _document: &Document) -> Result<PreparedPayload, GatewayError> {
            Ok(payload())
        }

        async fn generate(
            &self,
            prompt: &str,
            _payload: &PreparedPayload,
            _temperature: f32,
        ) -> Result<String, GatewayError> {
            self.prompts.lock().push(prompt.to_string());
            self.replies
                .lock()
                .pop_front()
                .unwrap_or(Err(GatewayError::EmptyResponse))
        }

        async fn health_check(&self) -> Result<(), GatewayError> {
            Ok(())
        }
    }
}
