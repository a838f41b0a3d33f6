//! Merges the three pass results of one document into its final takeoff.
//!
//! The validation summary is authoritative. Every (system, device type) seen
//! by either the grid or the validation pass is compared, and mismatches are
//! reported as [`Discrepancy`] records ranked by percent difference.

use crate::config::SeverityThresholds;
use crate::domain::takeoff::{
    Discrepancy, GridCountResult, LegendInfo, PassConfidence, PerDocumentResult, Severity,
    ValidationResult, ANALYSIS_METHOD_MULTIPASS,
};

pub const RESOLUTION_USE_VALIDATION: &str = "Using higher validation count";
pub const RESOLUTION_REVIEW: &str = "Review recommended";

/// Percent difference relative to `base`; 100 when `base` is zero.
pub fn percent_of(difference: u64, base: u64) -> f64 {
    if base == 0 {
        100.0
    } else {
        difference as f64 / base as f64 * 100.0
    }
}

pub fn severity_for(percent: f64, thresholds: &SeverityThresholds) -> Severity {
    if percent > thresholds.high_pct {
        Severity::High
    } else if percent > thresholds.medium_pct {
        Severity::Medium
    } else {
        Severity::Low
    }
}

/// Compares one device type's counts. `None` when they agree.
pub fn classify(
    system: &str,
    device_type: &str,
    grid: u32,
    validation: u32,
    thresholds: &SeverityThresholds,
) -> Option<Discrepancy> {
    if grid == validation {
        return None;
    }

    let percent_diff = percent_of(u64::from(grid.abs_diff(validation)), u64::from(grid));
    Some(Discrepancy {
        system: system.to_string(),
        device_type: device_type.to_string(),
        grid_count: grid,
        validation_count: validation,
        difference: i64::from(validation) - i64::from(grid),
        percent_diff,
        severity: severity_for(percent_diff, thresholds),
        resolution: if validation >= grid {
            RESOLUTION_USE_VALIDATION
        } else {
            RESOLUTION_REVIEW
        }
        .to_string(),
    })
}

/// Builds the per-document result. Pure; `elapsed_seconds` is left at zero
/// for the caller to fill in.
pub fn reconcile(
    legend: LegendInfo,
    grid: GridCountResult,
    validation: ValidationResult,
    thresholds: &SeverityThresholds,
) -> PerDocumentResult {
    let mut keys = grid.totals.keys();
    keys.extend(validation.summary.keys());

    let discrepancies: Vec<Discrepancy> = keys
        .iter()
        .filter_map(|(system, device_type)| {
            classify(
                system,
                device_type,
                grid.totals.get(system, device_type),
                validation.summary.get(system, device_type),
                thresholds,
            )
        })
        .collect();

    let notes: Vec<String> = [
        legend.notes.clone(),
        grid.notes.clone(),
        validation.notes.clone(),
        validation.code_compliance.notes.clone(),
    ]
    .into_iter()
    .flatten()
    .collect();

    PerDocumentResult {
        sheet_name: validation
            .sheet_name
            .clone()
            .or_else(|| grid.sheet_name.clone())
            .or_else(|| legend.sheet_name.clone()),
        pass_confidence: PassConfidence {
            legend_found: legend.legend_found,
            grid_confidence: grid.confidence,
            validation_confidence: validation.overall_confidence,
        },
        total_devices: validation.summary.total(),
        summary: validation.summary,
        zone_counts: grid.zone_counts,
        grid_totals: grid.totals,
        closets: validation.closets,
        backbones: validation.backbones,
        code_compliance: validation.code_compliance,
        devices: validation.devices,
        discrepancies,
        legend,
        analysis_method: ANALYSIS_METHOD_MULTIPASS.to_string(),
        notes,
        elapsed_seconds: 0.0,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::takeoff::{DeviceCount, SheetType};

    fn thresholds() -> SeverityThresholds {
        SeverityThresholds::default()
    }

    #[test]
    fn test_boundaries_are_strict() {
        // 10 -> 11 is exactly 10%, 10 -> 12 exactly 20%
        let d = classify("CABLING", "Data Outlet", 10, 11, &thresholds()).unwrap();
        assert_eq!(d.severity, Severity::Low);
        let d = classify("CABLING", "Data Outlet", 10, 12, &thresholds()).unwrap();
        assert_eq!(d.severity, Severity::Medium);
        assert_eq!(d.percent_diff, 20.0);
        let d = classify("CABLING", "Data Outlet", 10, 13, &thresholds()).unwrap();
        assert_eq!(d.severity, Severity::High);
    }

    #[test]
    fn test_severity_symmetric_in_magnitude() {
        let over = classify("FIRE", "Smoke Detector", 20, 25, &thresholds()).unwrap();
        let under = classify("FIRE", "Smoke Detector", 20, 15, &thresholds()).unwrap();
        assert_eq!(over.severity, under.severity);
        assert_eq!(over.difference, 5);
        assert_eq!(under.difference, -5);
        assert_eq!(over.resolution, RESOLUTION_USE_VALIDATION);
        assert_eq!(under.resolution, RESOLUTION_REVIEW);
    }

    #[test]
    fn test_missing_from_grid_is_full_difference() {
        let d = classify("CCTV", "Dome Camera", 0, 3, &thresholds()).unwrap();
        assert_eq!(d.percent_diff, 100.0);
        assert_eq!(d.severity, Severity::High);
        assert!(classify("CCTV", "Dome Camera", 4, 4, &thresholds()).is_none());
    }

    #[test]
    fn test_custom_thresholds() {
        let loose = SeverityThresholds {
            high_pct: 50.0,
            medium_pct: 25.0,
        };
        let d = classify("ACCESS", "Card Reader", 10, 13, &loose).unwrap();
        assert_eq!(d.severity, Severity::Medium);
    }

    #[test]
    fn test_reconcile_uses_validation_summary() {
        let mut grid = GridCountResult::failed("grid");
        grid.totals.add("CABLING", "Data Outlet", 10);
        grid.totals.add("CABLING", "WAP", 2);
        grid.confidence = 0.8;

        let mut validation = ValidationResult::default();
        validation.summary.add("CABLING", "Data Outlet", 12);
        validation.summary.add("CABLING", "WAP", 2);
        validation.overall_confidence = 0.9;

        let result = reconcile(LegendInfo::default(), grid, validation, &thresholds());
        assert_eq!(result.summary.get("CABLING", "Data Outlet"), 12);
        assert_eq!(result.total_devices, 14);
        assert_eq!(result.discrepancies.len(), 1);
        assert_eq!(result.discrepancies[0].device_type, "Data Outlet");
        assert_eq!(result.grid_totals.get("CABLING", "Data Outlet"), 10);
        assert_eq!(result.pass_confidence.grid_confidence, 0.8);
        assert_eq!(result.analysis_method, "3-pass-multipass");
    }

    #[test]
    fn test_reference_sheet_has_no_discrepancies() {
        let legend = LegendInfo {
            sheet_type: SheetType::TitleSheet,
            should_count_devices: false,
            ..LegendInfo::default()
        };
        let grid = GridCountResult::skipped(&legend);
        let result = reconcile(legend, grid, ValidationResult::default(), &thresholds());
        assert!(result.discrepancies.is_empty());
        assert_eq!(result.summary, DeviceCount::new());
        assert_eq!(result.total_devices, 0);
    }
}
