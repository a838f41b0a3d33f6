//! Pass 1: classify the sheet and read its symbol legend.

use tracing::{info, instrument};

use super::ask;
use crate::domain::takeoff::{LegendInfo, PreparedPayload};
use crate::error::{PassError, PassKind};
use crate::services::gateway::ModelGateway;

pub const LEGEND_PROMPT: &str = r#"You are an expert low-voltage construction estimator reviewing a drawing sheet.

STEP 1 - CLASSIFY THE SHEET:
- FLOOR_PLAN: a building floor plan with device symbols placed in rooms. Devices SHOULD be counted.
- LEGEND_SHEET: a sheet that only defines symbols. Devices should NOT be counted.
- SCHEDULE_SHEET: equipment or device schedules in table form. Devices should NOT be counted.
- TITLE_SHEET: cover sheet, drawing index, general notes. Devices should NOT be counted.
- DETAIL_SHEET: mounting details, riser diagrams, elevations. Devices should NOT be counted.

STEP 2 - FIND THE LEGEND:
Look for a symbol legend, key or abbreviations table anywhere on the sheet
(often in a corner or along the title block). For every symbol record what it
looks like, what it stands for, and which system it belongs to.

Systems: CABLING (data/voice/fiber/WAP), ACCESS (card readers, door contacts, REX,
electric strikes), CCTV (cameras), FIRE (smoke/heat detectors, pull stations,
horn/strobes), INTERCOM, A/V (speakers, displays), INTRUSION (motion sensors, keypads).

Return ONLY JSON:
{
  "sheetType": "FLOOR_PLAN",
  "sheetName": "E1.01 - First Floor Technology Plan",
  "shouldCountDevices": true,
  "sheetTypeReason": "Floor plan with device symbols in rooms",
  "legendFound": true,
  "legendLocation": "bottom right",
  "symbols": [
    {"symbol": "Circle with D", "description": "Data Outlet", "system": "CABLING", "visualDescription": "small circle with the letter D"}
  ],
  "notes": ""
}"#;

#[instrument(skip(gateway, payload))]
pub async fn run(
    gateway: &dyn ModelGateway,
    payload: &PreparedPayload,
    temperature: f32,
) -> Result<LegendInfo, PassError> {
    let decoded = ask(gateway, PassKind::Legend, LEGEND_PROMPT, payload, temperature).await?;
    let legend = LegendInfo::from_value(&decoded.value);

    info!(
        sheet_type = %legend.sheet_type,
        should_count = legend.should_count_devices,
        symbols = legend.symbols.len(),
        "Legend pass complete"
    );
    Ok(legend)
}
