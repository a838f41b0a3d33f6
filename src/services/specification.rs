//! Division 27/28 specification parsing and spec-vs-plan comparison.

use std::collections::BTreeMap;
use tracing::{info, instrument};

use crate::config::SeverityThresholds;
use crate::domain::specification::{
    CrossReference, SpecDiscrepancy, SpecMatch, SpecificationResult, SystemRequirements,
};
use crate::domain::takeoff::{DeviceCount, Document};
use crate::error::{AnalysisError, PassError, PassKind};
use crate::services::decoder;
use crate::services::gateway::ModelGateway;
use crate::services::reconciler::{percent_of, severity_for};

pub const SPECIFICATION_PROMPT: &str = r#"You are an expert low-voltage construction estimator analyzing project specifications.

Extract device counts, material requirements and system specifications from this document.

FOCUS ON:
- Division 27: COMMUNICATIONS (structured cabling, data, voice, fiber, wireless)
- Division 28: ELECTRONIC SAFETY AND SECURITY (fire alarm, access control, CCTV, intrusion)

EXTRACT:
1. Device schedules: tables listing device quantities
2. Approved manufacturers per system and component category
3. Cable requirements: type, rating (plenum/riser), jacket color, usage
4. Equipment requirements: panels, racks, switches, NVRs
5. Testing and certification requirements

Return ONLY JSON:
{
  "specificationTitle": "Project - Communications & Security Specifications",
  "divisions": [{"number": "27 10 00", "title": "STRUCTURED CABLING", "requirements": ["All cables shall be plenum rated"]}],
  "deviceSchedules": [{"system": "CABLING", "type": "Data Outlet", "specifiedQty": 248, "section": "27 15 00", "notes": "CAT6A"}],
  "approvedManufacturers": {"CABLING": {"Cable": ["Belden", "CommScope"]}, "FIRE": {"FACP": ["Notifier", "EST"]}},
  "cableRequirements": [{"type": "CAT6A", "rating": "Plenum", "jacket": "Blue", "system": "CABLING", "usage": "Data outlets"}],
  "equipmentRequirements": [{"type": "Access Control Panel", "model": "Mercury MR52", "qty": 8, "section": "28 13 00"}],
  "testingRequirements": ["All CAT6A cables certified to TIA-568.2-D"],
  "notes": "",
  "confidence": 0.9
}"#;

#[instrument(skip(gateway, document), fields(document = %document.name))]
pub async fn parse_specification(
    gateway: &dyn ModelGateway,
    document: &Document,
    temperature: f32,
) -> Result<SpecificationResult, AnalysisError> {
    let payload = gateway.prepare_payload(document).await?;
    let text = gateway
        .generate(SPECIFICATION_PROMPT, &payload, temperature)
        .await
        .map_err(|e| PassError::new(PassKind::Specification, e))?;

    let spec = SpecificationResult::from_value(&decoder::decode(&text).value);
    info!(
        schedules = spec.device_schedules.len(),
        divisions = spec.divisions.len(),
        "Specification parsed"
    );
    Ok(spec)
}

/// Plan quantity for a scheduled device: exact name first, then the first
/// case-insensitive substring match in either direction.
fn plan_quantity(totals: &DeviceCount, system: &str, device_type: &str) -> u32 {
    let exact = totals.get(system, device_type);
    if exact > 0 {
        return exact;
    }

    let wanted = device_type.to_lowercase();
    totals
        .systems()
        .find(|(s, _)| *s == system)
        .and_then(|(_, devices)| {
            devices.iter().find_map(|(name, qty)| {
                let name = name.to_lowercase();
                (name.contains(&wanted) || wanted.contains(&name)).then_some(*qty)
            })
        })
        .unwrap_or(0)
}

pub fn cross_reference(
    spec: &SpecificationResult,
    totals: &DeviceCount,
    thresholds: &SeverityThresholds,
) -> CrossReference {
    if spec.device_schedules.is_empty() {
        return CrossReference::default();
    }

    let mut matches = Vec::new();
    let mut discrepancies = Vec::new();

    for schedule in &spec.device_schedules {
        let spec_qty = schedule.specified_qty;
        let plan_qty = plan_quantity(totals, &schedule.system, &schedule.device_type);
        if spec_qty == 0 && plan_qty == 0 {
            continue;
        }

        let difference = i64::from(plan_qty) - i64::from(spec_qty);
        if difference == 0 {
            matches.push(SpecMatch {
                system: schedule.system.clone(),
                device_type: schedule.device_type.clone(),
                qty: spec_qty,
            });
            continue;
        }

        let percent_diff = percent_of(difference.unsigned_abs(), u64::from(spec_qty));
        discrepancies.push(SpecDiscrepancy {
            system: schedule.system.clone(),
            device_type: schedule.device_type.clone(),
            spec_qty,
            plan_qty,
            difference,
            percent_diff,
            severity: severity_for(percent_diff, thresholds),
            section: schedule.section.clone(),
            recommendation: if difference > 0 {
                format!("Floor plans show {} more than spec. Verify with engineer.", difference)
            } else {
                format!(
                    "Spec shows {} more than plans. Check for missing symbols.",
                    difference.unsigned_abs()
                )
            },
        });
    }

    let compared = matches.len() + discrepancies.len();
    let match_rate = if compared == 0 {
        0.0
    } else {
        matches.len() as f64 / compared as f64 * 100.0
    };

    CrossReference {
        total_checked: spec.device_schedules.len(),
        match_rate,
        analysis_complete: true,
        matches,
        discrepancies,
        requirements_by_system: requirements_by_system(spec, totals),
    }
}

/// Manufacturers and cabling the specification lists for each counted system.
fn requirements_by_system(
    spec: &SpecificationResult,
    totals: &DeviceCount,
) -> BTreeMap<String, SystemRequirements> {
    totals
        .systems()
        .filter_map(|(system, _)| {
            let requirements = SystemRequirements {
                approved_manufacturers: spec.manufacturers_for(system).cloned().unwrap_or_default(),
                cable_requirements: spec
                    .cable_requirements_for(system)
                    .into_iter()
                    .cloned()
                    .collect(),
            };
            let listed = !requirements.approved_manufacturers.is_empty()
                || !requirements.cable_requirements.is_empty();
            listed.then(|| (system.to_string(), requirements))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::specification::{CableRequirement, DeviceSchedule};
    use crate::domain::takeoff::Severity;
    use crate::services::passes::test_support::ScriptedGateway;

    fn schedule(system: &str, device_type: &str, qty: u32) -> DeviceSchedule {
        DeviceSchedule {
            system: system.into(),
            device_type: device_type.into(),
            specified_qty: qty,
            section: Some("27 15 00".into()),
            notes: None,
        }
    }

    fn spec(schedules: Vec<DeviceSchedule>) -> SpecificationResult {
        SpecificationResult {
            device_schedules: schedules,
            ..Default::default()
        }
    }

    #[test]
    fn test_cross_reference_matches_and_discrepancies() {
        let mut totals = DeviceCount::new();
        totals.add("CABLING", "Data Outlet", 248);
        totals.add("FIRE", "Photoelectric Smoke Detector", 80);

        let result = cross_reference(
            &spec(vec![
                schedule("CABLING", "Data Outlet", 248),
                schedule("FIRE", "Smoke Detector", 86),
                schedule("CCTV", "Dome Camera", 0),
            ]),
            &totals,
            &SeverityThresholds::default(),
        );

        assert!(result.analysis_complete);
        assert_eq!(result.total_checked, 3);
        assert_eq!(result.matches.len(), 1);
        assert_eq!(result.discrepancies.len(), 1);
        assert_eq!(result.match_rate, 50.0);

        let smoke = &result.discrepancies[0];
        assert_eq!(smoke.plan_qty, 80);
        assert_eq!(smoke.difference, -6);
        assert_eq!(smoke.severity, Severity::Low);
        assert_eq!(
            smoke.recommendation,
            "Spec shows 6 more than plans. Check for missing symbols."
        );
    }

    #[test]
    fn test_cross_reference_lists_requirements_for_counted_systems() {
        let mut totals = DeviceCount::new();
        totals.add("FIRE", "Pull Station", 14);
        totals.add("CCTV", "Dome Camera", 6);

        let mut specification = spec(vec![schedule("FIRE", "Pull Station", 14)]);
        specification
            .approved_manufacturers
            .entry("FIRE".into())
            .or_default()
            .insert("FACP".into(), vec!["Notifier".into()]);
        specification.cable_requirements.push(CableRequirement {
            cable_type: "18/2 FPLP".into(),
            system: "FIRE".into(),
            ..Default::default()
        });
        specification.cable_requirements.push(CableRequirement {
            cable_type: "CAT6A".into(),
            system: "CABLING".into(),
            ..Default::default()
        });

        let result = cross_reference(&specification, &totals, &SeverityThresholds::default());
        assert_eq!(result.requirements_by_system.len(), 1, "CCTV has no requirements, CABLING no devices");
        let fire = &result.requirements_by_system["FIRE"];
        assert_eq!(fire.approved_manufacturers["FACP"], vec!["Notifier"]);
        assert_eq!(fire.cable_requirements.len(), 1);
        assert_eq!(fire.cable_requirements[0].cable_type, "18/2 FPLP");
    }

    #[test]
    fn test_missing_spec_quantity_is_high() {
        let mut totals = DeviceCount::new();
        totals.add("ACCESS", "Card Reader", 12);
        let result = cross_reference(
            &spec(vec![schedule("ACCESS", "Card Reader", 0)]),
            &totals,
            &SeverityThresholds::default(),
        );
        let d = &result.discrepancies[0];
        assert_eq!(d.percent_diff, 100.0);
        assert_eq!(d.severity, Severity::High);
        assert!(d.recommendation.starts_with("Floor plans show 12 more"));
    }

    #[test]
    fn test_no_schedules_is_incomplete() {
        let result = cross_reference(&spec(vec![]), &DeviceCount::new(), &SeverityThresholds::default());
        assert!(!result.analysis_complete);
        assert_eq!(result.total_checked, 0);
    }

    #[tokio::test]
    async fn test_parse_specification_decodes_schedules() {
        let gateway = ScriptedGateway::with_replies(vec![Ok(r#"```json
{"specificationTitle": "Riverside MS", "deviceSchedules": [{"system": "FIRE", "type": "Pull Station", "specifiedQty": "14"}],
 "approvedManufacturers": {"FIRE": {"FACP": ["Notifier", "EST"]}},
 "cableRequirements": [{"type": "18/2 FPLP", "system": "FIRE", "rating": "Plenum"}],
 "confidence": 0.9}
```"#
            .into())]);
        let doc = Document::new("spec.pdf", vec![1, 2, 3], None);

        let spec = parse_specification(&gateway, &doc, 0.1).await.unwrap();
        assert_eq!(spec.title.as_deref(), Some("Riverside MS"));
        assert_eq!(spec.device_schedules[0].specified_qty, 14);
        assert_eq!(spec.manufacturers_for("FIRE").unwrap()["FACP"], vec!["Notifier", "EST"]);
        assert_eq!(spec.cable_requirements_for("FIRE").len(), 1);
        assert!(spec.manufacturers_for("CCTV").is_none());
    }
}
