//! Pass 3: independent recount with closet attribution and code review.

use serde_json::json;
use tracing::{info, instrument};

use super::ask;
use crate::domain::takeoff::{GridCountResult, LegendInfo, PreparedPayload, ValidationResult};
use crate::error::{PassError, PassKind};
use crate::services::gateway::ModelGateway;

pub fn build_prompt(grid: &GridCountResult, legend: &LegendInfo) -> String {
    let previous = serde_json::to_string_pretty(&json!({
        "totalsBySystem": grid.totals,
        "confidence": grid.confidence,
    }))
    .unwrap_or_else(|_| "{}".to_string());

    let known_symbols = if legend.symbols.is_empty() {
        "(none recorded)".to_string()
    } else {
        legend
            .symbols
            .iter()
            .map(|s| {
                if s.visual_description.is_empty() {
                    format!("- {}", s.description)
                } else {
                    format!("- {}: {}", s.description, s.visual_description)
                }
            })
            .collect::<Vec<_>>()
            .join("\n")
    };

    format!(
        r#"You are a senior low-voltage estimator checking another estimator's takeoff.

PREVIOUS COUNT (may contain mistakes):
{previous}

KNOWN SYMBOLS:
{known_symbols}

TASKS:
1. Recount every low-voltage device on the sheet yourself. Do not copy the previous
   count; report what you actually see.
2. Identify telecom rooms (MDF, IDF, TR). For each, list which devices it feeds,
   port counts, cable runs and estimated cable footage.
3. Identify backbone cabling between rooms (fiber strands, copper pairs, category).
4. Check code compliance:
   - NFPA 72: smoke detectors no more than 30 ft apart; pull stations within 5 ft of
     exits; horn/strobes in occupiable spaces and restrooms
   - NEC: separation of low-voltage and power
   - TIA-568: every work area within 295 ft cable length of its TR/IDF
   - ADA: card readers mounted 48" max AFF
   - IBC: egress doors with access control have REX devices

Systems: CABLING, ACCESS, CCTV, FIRE, INTERCOM, AV, INTRUSION.

Return ONLY JSON:
{{
  "sheetName": "E1.01",
  "summary": {{"CABLING": {{"Data Outlet": 12}}, "FIRE": {{"Smoke Detector": 4}}}},
  "closets": [
    {{"name": "IDF-1", "floor": "1", "location": "Room 104", "feedsTo": [], "feedsFrom": "MDF",
      "dataPorts": 24, "voicePorts": 0, "fiberPorts": 2, "cableRuns": 24,
      "avgCableLength": 150, "totalCableFt": 3600,
      "devicesFed": {{"CABLING": {{"Data Outlet": 12}}}}, "notes": ""}}
  ],
  "backbones": [
    {{"from": "MDF", "to": "IDF-1", "type": "Fiber", "strandCount": 12, "pairCount": null,
      "category": "OM4", "estimatedLength": "150ft", "notes": ""}}
  ],
  "codeCompliance": {{
    "status": "COMPLIANT",
    "violations": [{{"code": "NFPA 72", "severity": "HIGH", "location": "Corridor 110", "issue": "Smoke detector spacing exceeds 30 ft"}}],
    "notes": ""
  }},
  "overallConfidence": 0.9,
  "totalDevices": 16,
  "totalCableRuns": 24,
  "totalBackbones": 1,
  "notes": ""
}}"#
    )
}

#[instrument(skip(gateway, payload, grid, legend))]
pub async fn run(
    gateway: &dyn ModelGateway,
    payload: &PreparedPayload,
    grid: &GridCountResult,
    legend: &LegendInfo,
    temperature: f32,
) -> Result<ValidationResult, PassError> {
    let prompt = build_prompt(grid, legend);
    let decoded = ask(gateway, PassKind::Validation, &prompt, payload, temperature).await?;
    let mut validation = ValidationResult::from_value(&decoded.value);
    if let Some(note) = decoded.note() {
        validation.notes.get_or_insert_with(|| note.to_string());
    }

    info!(
        total = validation.summary.total(),
        closets = validation.closets.len(),
        violations = validation.code_compliance.violations.len(),
        "Validation pass complete"
    );
    Ok(validation)
}
