//! Single-pass rough count for previews.

use serde::{Deserialize, Serialize};
use tracing::{info, instrument};

use super::ask;
use crate::domain::takeoff::{f64_field, u32_field, DeviceCount, PreparedPayload};
use crate::error::{PassError, PassKind};
use crate::services::gateway::ModelGateway;

pub const QUICK_PROMPT: &str = r#"Quickly count all low-voltage device symbols on this floor plan.
Group by system (CABLING, ACCESS, CCTV, FIRE, INTERCOM).
Return JSON: { "summary": {"CABLING": {"Data Outlet": 10}}, "totalDevices": 15, "confidence": 0.85 }"#;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QuickCount {
    pub summary: DeviceCount,
    pub total_devices: u64,
    pub confidence: f64,
    pub analysis_method: String,
}

#[instrument(skip(gateway, payload))]
pub async fn run(
    gateway: &dyn ModelGateway,
    payload: &PreparedPayload,
    temperature: f32,
) -> Result<QuickCount, PassError> {
    let decoded = ask(gateway, PassKind::Quick, QUICK_PROMPT, payload, temperature).await?;
    let value = &decoded.value;

    let summary = value
        .get("summary")
        .map(DeviceCount::from_value)
        .unwrap_or_default();
    // Trust our own sum over the model's arithmetic
    let total_devices = match summary.total() {
        0 => u32_field(value, "totalDevices").map(u64::from).unwrap_or(0),
        n => n,
    };

    let quick = QuickCount {
        summary,
        total_devices,
        confidence: f64_field(value, "confidence").unwrap_or(0.0).clamp(0.0, 1.0),
        analysis_method: crate::domain::takeoff::ANALYSIS_METHOD_QUICK.to_string(),
    };
    info!(total = quick.total_devices, "Quick count complete");
    Ok(quick)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::passes::test_support::{payload, ScriptedGateway};

    #[tokio::test]
    async fn test_quick_count_sums_summary() {
        let gateway = ScriptedGateway::with_replies(vec![Ok(r#"{
            "summary": {"CABLING": {"Data Outlet": 10}, "CCTV": {"Dome Camera": 3}},
            "totalDevices": 99, "confidence": 0.7
        }"#
        .into())]);

        let quick = run(&gateway, &payload(), 0.2).await.unwrap();
        assert_eq!(quick.total_devices, 13);
        assert_eq!(quick.confidence, 0.7);
        assert_eq!(quick.analysis_method, "quick-single-pass");
    }
}
