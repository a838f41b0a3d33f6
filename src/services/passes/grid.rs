//! Pass 2: zone-by-zone device count over a 3x3 grid.

use tracing::{info, instrument};

use super::ask;
use crate::domain::takeoff::{GridCountResult, LegendInfo, PreparedPayload};
use crate::error::{PassError, PassKind};
use crate::services::gateway::ModelGateway;

pub const ZONES: [&str; 9] = [
    "topLeft",
    "topCenter",
    "topRight",
    "middleLeft",
    "middleCenter",
    "middleRight",
    "bottomLeft",
    "bottomCenter",
    "bottomRight",
];

const OVERCOUNT_RULE: &str =
    "When in doubt, COUNT IT - better to overcount than miss a device. Reviewers remove extras.";
const STRICT_RULE: &str =
    "Only count symbols you can clearly identify. Mention uncertain symbols in countingNotes instead.";

/// Builds the grid prompt, embedding the legend when one was found.
pub fn build_prompt(legend: &LegendInfo, prefer_overcount: bool) -> String {
    let legend_section = if legend.has_symbols() {
        let lines: Vec<String> = legend
            .symbols
            .iter()
            .map(|s| format!("- {}: {} ({})", s.symbol, s.description, s.system))
            .collect();
        format!(
            "LEGEND SYMBOLS FOUND ON THIS SHEET:\n{}\nMatch symbols against this legend.",
            lines.join("\n")
        )
    } else {
        "No legend was found. Use standard low-voltage symbology.".to_string()
    };

    let counting_rule = if prefer_overcount { OVERCOUNT_RULE } else { STRICT_RULE };

    format!(
        r#"You are counting low-voltage device symbols on a construction floor plan.

{legend_section}

METHOD:
Divide the sheet into a 3x3 grid: {zones}.
Scan each zone systematically, left to right and top to bottom, and count every
device symbol inside it. A symbol on a zone boundary belongs to the zone holding
its center.

DO NOT COUNT:
- symbols inside the legend box or symbol key
- title blocks, revision blocks, general notes
- enlarged details, riser diagrams and schedules

{counting_rule}

Systems: CABLING, ACCESS, CCTV, FIRE, INTERCOM, A/V, INTRUSION.

Return ONLY JSON:
{{
  "sheetName": "E1.01",
  "gridCounts": {{
    "topLeft": {{"CABLING": {{"Data Outlet": 4}}, "FIRE": {{"Smoke Detector": 1}}}},
    "topCenter": {{}}
  }},
  "totalsBySystem": {{"CABLING": {{"Data Outlet": 4}}, "FIRE": {{"Smoke Detector": 1}}}},
  "confidence": 0.85,
  "countingNotes": ""
}}"#,
        zones = ZONES.join(", "),
    )
}

#[instrument(skip(gateway, payload, legend), fields(sheet_type = %legend.sheet_type))]
pub async fn run(
    gateway: &dyn ModelGateway,
    payload: &PreparedPayload,
    legend: &LegendInfo,
    temperature: f32,
    prefer_overcount: bool,
) -> Result<GridCountResult, PassError> {
    if !legend.should_count_devices {
        info!("Reference sheet, skipping device count");
        return Ok(GridCountResult::skipped(legend));
    }

    let prompt = build_prompt(legend, prefer_overcount);
    let decoded = ask(gateway, PassKind::Grid, &prompt, payload, temperature).await?;
    let mut grid = GridCountResult::from_value(&decoded.value);
    if let Some(note) = decoded.note() {
        grid.notes.get_or_insert_with(|| note.to_string());
    }

    info!(
        total = grid.totals.total(),
        confidence = grid.confidence,
        "Grid pass complete"
    );
    Ok(grid)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::takeoff::{LegendSymbol, SheetType};
    use crate::services::passes::test_support::{payload, ScriptedGateway};

    fn legend_with_symbol() -> LegendInfo {
        LegendInfo {
            legend_found: true,
            symbols: vec![LegendSymbol {
                symbol: "Circle with D".into(),
                description: "Data Outlet".into(),
                system: "CABLING".into(),
                visual_description: "circle, letter D".into(),
            }],
            ..LegendInfo::default()
        }
    }

    #[test]
    fn test_prompt_embeds_legend_and_zones() {
        let prompt = build_prompt(&legend_with_symbol(), true);
        assert!(prompt.contains("- Circle with D: Data Outlet (CABLING)"));
        assert!(prompt.contains("bottomRight"));
        assert!(prompt.contains("When in doubt, COUNT IT"));
    }

    #[test]
    fn test_prompt_without_legend_or_overcount() {
        let prompt = build_prompt(&LegendInfo::default(), false);
        assert!(prompt.contains("No legend was found"));
        assert!(!prompt.contains("When in doubt"));
    }

    #[tokio::test]
    async fn test_reference_sheet_makes_no_gateway_call() {
        let gateway = ScriptedGateway::default();
        let legend = LegendInfo {
            sheet_type: SheetType::LegendSheet,
            sheet_name: Some("T0.01".into()),
            should_count_devices: false,
            ..LegendInfo::default()
        };

        let grid = run(&gateway, &payload(), &legend, 0.1, true).await.unwrap();
        assert_eq!(gateway.calls(), 0, "skipped sheets must not call the model");
        assert!(grid.skipped);
        assert!(grid.totals.is_zero());
        assert_eq!(grid.confidence, 1.0);
        assert!(grid.notes.unwrap().contains("LEGEND_SHEET"));
    }

    #[tokio::test]
    async fn test_grid_pass_reads_totals() {
        let gateway = ScriptedGateway::with_replies(vec![Ok(
            r#"{"totalsBySystem": {"CABLING": {"Data Outlet": 10}}, "confidence": 0.8}"#.to_string(),
        )]);

        let grid = run(&gateway, &payload(), &legend_with_symbol(), 0.1, true)
            .await
            .unwrap();
        assert_eq!(grid.totals.get("CABLING", "Data Outlet"), 10);
        assert_eq!(grid.confidence, 0.8);
        assert!(gateway.prompts.lock()[0].contains("Data Outlet (CABLING)"));
    }
}
