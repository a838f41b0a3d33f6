//! Folds per-document outcomes into one batch result.

use tracing::warn;

use crate::domain::takeoff::{
    AggregateResult, AggregatedDevice, DeviceCountTable, DeviceTableEntry, Issue, IssueSeverity,
    PerDocumentResult, SheetCloset, SheetDiscrepancy, SheetQty, SheetResult,
};

/// Systems every batch reports, even when nothing was counted.
pub const SEEDED_SYSTEMS: [&str; 6] = ["CABLING", "ACCESS", "CCTV", "FIRE", "INTERCOM", "A/V"];

/// Systems the device table knows by name; anything else lands in [`OTHER_SYSTEM`].
pub const TABLE_SYSTEMS: [&str; 8] = [
    "CABLING", "ACCESS", "CCTV", "FIRE", "INTERCOM", "A/V", "AV", "INTRUSION",
];
pub const OTHER_SYSTEM: &str = "OTHER";

pub const CANCELLED_REASON: &str = "cancelled";

/// Accumulator owned by a single batch run.
#[derive(Debug)]
pub struct AggregateBuilder {
    result: AggregateResult,
}

impl Default for AggregateBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl AggregateBuilder {
    pub fn new() -> Self {
        let mut result = AggregateResult::default();
        for system in SEEDED_SYSTEMS {
            result.totals_by_system.ensure_system(system);
        }
        Self { result }
    }

    /// Adds an analysed sheet. `warnings` become WARNING issues on the sheet.
    pub fn record_analyzed(&mut self, file_name: &str, result: PerDocumentResult, warnings: Vec<String>) {
        for (system, device_type, qty) in result.summary.iter() {
            self.result.totals_by_system.add(system, device_type, qty);

            let device = self
                .result
                .aggregated_devices
                .entry(format!("{}:{}", system, device_type))
                .or_insert_with(|| AggregatedDevice {
                    symbol: device_type.to_string(),
                    system: system.to_string(),
                    total_qty: 0,
                    by_sheet: Vec::new(),
                });
            device.total_qty += u64::from(qty);
            device.by_sheet.push(SheetQty {
                sheet: file_name.to_string(),
                qty,
            });
        }

        self.result
            .closets
            .extend(result.closets.iter().cloned().map(|closet| SheetCloset {
                sheet: file_name.to_string(),
                closet,
            }));
        self.result
            .discrepancies
            .extend(result.discrepancies.iter().cloned().map(|discrepancy| SheetDiscrepancy {
                sheet: file_name.to_string(),
                discrepancy,
            }));

        for message in warnings {
            self.push_issue(file_name, IssueSeverity::Warning, message);
        }

        self.result.sheets.push(SheetResult::analyzed(file_name, result));
    }

    /// A document that could not be analysed at all.
    pub fn record_failure(&mut self, file_name: &str, reason: &str) {
        self.push_issue(
            file_name,
            IssueSeverity::Critical,
            format!("Failed to analyze: {}", reason),
        );
        self.result.sheets.push(SheetResult::failed(file_name, reason));
    }

    /// A document left unprocessed because the batch was cancelled.
    pub fn record_cancelled(&mut self, file_name: &str) {
        self.result.cancelled = true;
        self.push_issue(
            file_name,
            IssueSeverity::Warning,
            "Analysis cancelled before this sheet was processed".to_string(),
        );
        self.result
            .sheets
            .push(SheetResult::failed(file_name, CANCELLED_REASON));
    }

    fn push_issue(&mut self, sheet: &str, severity: IssueSeverity, message: String) {
        self.result.issues.push(Issue {
            sheet: sheet.to_string(),
            severity,
            message,
        });
    }

    pub fn finish(self) -> AggregateResult {
        self.result
    }
}

/// Lowercases and replaces runs of anything non-alphanumeric with `_`.
pub fn clean_key(device_type: &str) -> String {
    let mut key = String::with_capacity(device_type.len());
    for c in device_type.to_lowercase().chars() {
        if c.is_ascii_lowercase() || c.is_ascii_digit() {
            key.push(c);
        } else if !key.ends_with('_') {
            key.push('_');
        }
    }
    key
}

/// Flattens batch totals into the `system -> key -> entry` table used for
/// bills of materials.
pub fn to_device_count_table(result: &AggregateResult) -> DeviceCountTable {
    let mut table: DeviceCountTable = TABLE_SYSTEMS
        .iter()
        .chain(std::iter::once(&OTHER_SYSTEM))
        .map(|s| (s.to_string(), Default::default()))
        .collect();

    for (system, device_type, qty) in result.totals_by_system.iter() {
        let target = if TABLE_SYSTEMS.iter().any(|known| *known == system) {
            system
        } else {
            warn!(system = %system, device = %device_type, "Unknown system, filing under OTHER");
            OTHER_SYSTEM
        };

        let entry = table
            .entry(target.to_string())
            .or_default()
            .entry(clean_key(device_type))
            .or_insert_with(|| DeviceTableEntry {
                display_name: device_type.to_string(),
                qty: 0,
                unit: "EA".to_string(),
            });
        entry.qty += u64::from(qty);
    }

    table
}
