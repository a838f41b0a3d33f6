//! Takeoff domain types: documents, per-pass results, and batch aggregates.
//!
//! Model output is schema-less, so every pass result has a lenient
//! `from_value` constructor that never fails: missing or wrongly-typed fields
//! fall back to defaults instead of rejecting the whole response.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{BTreeMap, BTreeSet};

// ============================================================================
// Lenient field access
// ============================================================================

pub(crate) fn str_field(v: &Value, key: &str) -> Option<String> {
    match v.get(key)? {
        Value::String(s) if !s.trim().is_empty() => Some(s.trim().to_string()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

pub(crate) fn f64_field(v: &Value, key: &str) -> Option<f64> {
    let value = match v.get(key)? {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    };
    value.filter(|f| f.is_finite())
}

pub(crate) fn u32_field(v: &Value, key: &str) -> Option<u32> {
    v.get(key).and_then(parse_count)
}

pub(crate) fn bool_field(v: &Value, key: &str) -> Option<bool> {
    match v.get(key)? {
        Value::Bool(b) => Some(*b),
        Value::String(s) => match s.trim().to_lowercase().as_str() {
            "true" | "yes" => Some(true),
            "false" | "no" => Some(false),
            _ => None,
        },
        _ => None,
    }
}

pub(crate) fn array_field<'a>(v: &'a Value, key: &str) -> &'a [Value] {
    v.get(key)
        .and_then(Value::as_array)
        .map(Vec::as_slice)
        .unwrap_or(&[])
}

pub(crate) fn string_list(v: &Value, key: &str) -> Vec<String> {
    match v.get(key) {
        Some(Value::Array(items)) => items
            .iter()
            .filter_map(|i| i.as_str())
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .collect(),
        Some(Value::String(s)) if !s.trim().is_empty() => vec![s.trim().to_string()],
        _ => Vec::new(),
    }
}

/// Interprets a model-supplied quantity. Negative, fractional-negative and
/// non-numeric values are rejected; numeric strings use their leading digits.
pub fn parse_count(v: &Value) -> Option<u32> {
    match v {
        Value::Number(n) => {
            if let Some(u) = n.as_u64() {
                u32::try_from(u).ok()
            } else {
                n.as_f64()
                    .filter(|f| f.is_finite() && *f >= 0.0 && *f <= u32::MAX as f64)
                    .map(|f| f.trunc() as u32)
            }
        }
        Value::String(s) => {
            let digits: String = s.trim().chars().take_while(|c| c.is_ascii_digit()).collect();
            digits.parse().ok()
        }
        _ => None,
    }
}

// ============================================================================
// Documents and payloads
// ============================================================================

/// Media kind of an uploaded drawing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MediaKind {
    Pdf,
    Image,
}

/// One uploaded floor-plan file.
#[derive(Debug, Clone)]
pub struct Document {
    pub name: String,
    pub content: Vec<u8>,
    pub media_type: Option<String>,
}

impl Document {
    pub fn new(name: impl Into<String>, content: Vec<u8>, media_type: Option<String>) -> Self {
        Self {
            name: name.into(),
            content,
            media_type: media_type.filter(|m| !m.trim().is_empty()),
        }
    }

    pub fn kind(&self) -> MediaKind {
        let declared_pdf = self
            .media_type
            .as_deref()
            .is_some_and(|m| m.eq_ignore_ascii_case("application/pdf"));
        if declared_pdf || self.name.to_lowercase().ends_with(".pdf") {
            MediaKind::Pdf
        } else {
            MediaKind::Image
        }
    }

    pub fn is_pdf(&self) -> bool {
        self.kind() == MediaKind::Pdf
    }

    /// Media type sent to the model. PDFs are always `application/pdf`,
    /// whatever the client declared; images keep their declared type.
    pub fn mime_type(&self) -> &str {
        match (&self.media_type, self.kind()) {
            (_, MediaKind::Pdf) => "application/pdf",
            (Some(m), MediaKind::Image) => m,
            (None, MediaKind::Image) => "image/png",
        }
    }

    pub fn size(&self) -> usize {
        self.content.len()
    }
}

/// A document in the form the model service accepts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PreparedPayload {
    Inline { mime_type: String, data_base64: String },
    Uploaded { mime_type: String, file_uri: String },
}

impl PreparedPayload {
    pub fn mime_type(&self) -> &str {
        match self {
            Self::Inline { mime_type, .. } | Self::Uploaded { mime_type, .. } => mime_type,
        }
    }

    pub fn is_inline(&self) -> bool {
        matches!(self, Self::Inline { .. })
    }
}

// ============================================================================
// Device counts
// ============================================================================

/// Quantities keyed by system, then device-type label.
///
/// Only positive quantities are stored; an absent key reads as zero.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DeviceCount(BTreeMap<String, BTreeMap<String, u32>>);

impl DeviceCount {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builds counts from a `{ SYSTEM: { "Device": n } }` object, skipping
    /// anything that isn't a non-negative quantity.
    pub fn from_value(v: &Value) -> Self {
        let mut counts = Self::new();
        let Some(systems) = v.as_object() else {
            return counts;
        };
        for (system, devices) in systems {
            let Some(devices) = devices.as_object() else {
                tracing::debug!(system = %system, "Skipping non-object summary entry");
                continue;
            };
            for (device_type, qty) in devices {
                if let Some(qty) = parse_count(qty) {
                    counts.add(system, device_type, qty);
                }
            }
        }
        counts
    }

    /// Registers a system with no devices so it shows up in serialized output.
    pub fn ensure_system(&mut self, system: &str) {
        self.0.entry(system.to_string()).or_default();
    }

    pub fn get(&self, system: &str, device_type: &str) -> u32 {
        self.0
            .get(system)
            .and_then(|d| d.get(device_type))
            .copied()
            .unwrap_or(0)
    }

    pub fn add(&mut self, system: &str, device_type: &str, qty: u32) {
        if qty == 0 {
            return;
        }
        let entry = self
            .0
            .entry(system.to_string())
            .or_default()
            .entry(device_type.to_string())
            .or_insert(0);
        *entry = entry.saturating_add(qty);
    }

    pub fn merge(&mut self, other: &DeviceCount) {
        for (system, device_type, qty) in other.iter() {
            self.add(system, device_type, qty);
        }
    }

    /// Every (system, device-type, qty) triple with a positive quantity.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str, u32)> {
        self.0.iter().flat_map(|(system, devices)| {
            devices
                .iter()
                .map(move |(device_type, qty)| (system.as_str(), device_type.as_str(), *qty))
        })
    }

    pub fn systems(&self) -> impl Iterator<Item = (&str, &BTreeMap<String, u32>)> {
        self.0.iter().map(|(s, d)| (s.as_str(), d))
    }

    pub fn keys(&self) -> BTreeSet<(String, String)> {
        self.iter()
            .map(|(s, d, _)| (s.to_string(), d.to_string()))
            .collect()
    }

    pub fn total(&self) -> u64 {
        self.iter().map(|(_, _, q)| u64::from(q)).sum()
    }

    /// True when no device has a positive quantity.
    pub fn is_zero(&self) -> bool {
        self.iter().next().is_none()
    }
}

// ============================================================================
// Pass 1: legend
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SheetType {
    #[default]
    FloorPlan,
    LegendSheet,
    ScheduleSheet,
    TitleSheet,
    DetailSheet,
}

impl SheetType {
    /// Maps a free-text label; anything unrecognised counts as a floor plan.
    pub fn from_label(label: &str) -> Self {
        let normalized: String = label
            .trim()
            .chars()
            .map(|c| if c == ' ' || c == '-' { '_' } else { c.to_ascii_uppercase() })
            .collect();
        match normalized.as_str() {
            "LEGEND_SHEET" | "LEGEND" => Self::LegendSheet,
            "SCHEDULE_SHEET" | "SCHEDULE" => Self::ScheduleSheet,
            "TITLE_SHEET" | "TITLE" | "COVER_SHEET" => Self::TitleSheet,
            "DETAIL_SHEET" | "DETAIL" => Self::DetailSheet,
            _ => Self::FloorPlan,
        }
    }
}

impl std::fmt::Display for SheetType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SheetType::FloorPlan => write!(f, "FLOOR_PLAN"),
            SheetType::LegendSheet => write!(f, "LEGEND_SHEET"),
            SheetType::ScheduleSheet => write!(f, "SCHEDULE_SHEET"),
            SheetType::TitleSheet => write!(f, "TITLE_SHEET"),
            SheetType::DetailSheet => write!(f, "DETAIL_SHEET"),
        }
    }
}

/// One legend entry: what a symbol looks like and what it stands for.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LegendSymbol {
    pub symbol: String,
    pub description: String,
    pub system: String,
    pub visual_description: String,
}

impl LegendSymbol {
    fn from_value(v: &Value) -> Option<Self> {
        let symbol = Self {
            symbol: str_field(v, "symbol").unwrap_or_default(),
            description: str_field(v, "description").unwrap_or_default(),
            system: str_field(v, "system").unwrap_or_default(),
            visual_description: str_field(v, "visualDescription").unwrap_or_default(),
        };
        (!symbol.symbol.is_empty() || !symbol.description.is_empty()).then_some(symbol)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LegendInfo {
    pub sheet_type: SheetType,
    pub sheet_name: Option<String>,
    pub should_count_devices: bool,
    pub sheet_type_reason: Option<String>,
    pub legend_found: bool,
    pub legend_location: Option<String>,
    pub symbols: Vec<LegendSymbol>,
    pub notes: Option<String>,
}

impl Default for LegendInfo {
    fn default() -> Self {
        Self {
            sheet_type: SheetType::FloorPlan,
            sheet_name: None,
            should_count_devices: true,
            sheet_type_reason: None,
            legend_found: false,
            legend_location: None,
            symbols: Vec::new(),
            notes: None,
        }
    }
}

impl LegendInfo {
    pub fn from_value(v: &Value) -> Self {
        Self {
            sheet_type: str_field(v, "sheetType")
                .map(|s| SheetType::from_label(&s))
                .unwrap_or_default(),
            sheet_name: str_field(v, "sheetName"),
            // Only an explicit `false` stops counting
            should_count_devices: bool_field(v, "shouldCountDevices").unwrap_or(true),
            sheet_type_reason: str_field(v, "sheetTypeReason"),
            legend_found: bool_field(v, "legendFound").unwrap_or(false),
            legend_location: str_field(v, "legendLocation"),
            symbols: array_field(v, "symbols")
                .iter()
                .filter_map(LegendSymbol::from_value)
                .collect(),
            notes: str_field(v, "notes"),
        }
    }

    /// Safe stand-in when legend extraction could not run.
    pub fn unavailable(note: impl Into<String>) -> Self {
        Self {
            notes: Some(note.into()),
            ..Self::default()
        }
    }

    pub fn has_symbols(&self) -> bool {
        self.legend_found && !self.symbols.is_empty()
    }
}

// ============================================================================
// Pass 2: grid count
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GridCountResult {
    pub sheet_name: Option<String>,
    pub zone_counts: BTreeMap<String, DeviceCount>,
    pub totals: DeviceCount,
    pub confidence: f64,
    pub notes: Option<String>,
    pub skipped: bool,
}

impl GridCountResult {
    pub fn from_value(v: &Value) -> Self {
        let zone_counts: BTreeMap<String, DeviceCount> = v
            .get("gridCounts")
            .and_then(Value::as_object)
            .map(|zones| {
                zones
                    .iter()
                    .map(|(zone, counts)| (zone.clone(), DeviceCount::from_value(counts)))
                    .collect()
            })
            .unwrap_or_default();

        let mut totals = v
            .get("totalsBySystem")
            .map(DeviceCount::from_value)
            .unwrap_or_default();
        // Model sometimes returns zones without summing them
        if totals.is_zero() {
            for zone in zone_counts.values() {
                totals.merge(zone);
            }
        }

        Self {
            sheet_name: str_field(v, "sheetName"),
            zone_counts,
            totals,
            confidence: f64_field(v, "confidence").unwrap_or(0.0).clamp(0.0, 1.0),
            notes: str_field(v, "countingNotes").or_else(|| str_field(v, "notes")),
            skipped: false,
        }
    }

    /// Result for a reference-only sheet: nothing counted, fully confident.
    pub fn skipped(legend: &LegendInfo) -> Self {
        let name = legend.sheet_name.as_deref().unwrap_or("unnamed sheet");
        Self {
            sheet_name: legend.sheet_name.clone(),
            zone_counts: BTreeMap::new(),
            totals: DeviceCount::new(),
            confidence: 1.0,
            notes: Some(format!(
                "Skipped counting - {} \"{}\" used for symbol reference only",
                legend.sheet_type, name
            )),
            skipped: true,
        }
    }

    pub fn failed(note: impl Into<String>) -> Self {
        Self {
            sheet_name: None,
            zone_counts: BTreeMap::new(),
            totals: DeviceCount::new(),
            confidence: 0.0,
            notes: Some(note.into()),
            skipped: false,
        }
    }
}

// ============================================================================
// Pass 3: validation
// ============================================================================

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ClosetAttribution {
    pub name: String,
    pub floor: Option<String>,
    pub location: Option<String>,
    pub feeds_to: Vec<String>,
    pub feeds_from: Option<String>,
    pub data_ports: u32,
    pub voice_ports: u32,
    pub fiber_ports: u32,
    pub cable_runs: u32,
    pub avg_cable_length: f64,
    pub total_cable_ft: f64,
    pub devices_fed: DeviceCount,
    pub notes: Option<String>,
}

impl ClosetAttribution {
    fn from_value(v: &Value) -> Option<Self> {
        let name = str_field(v, "name")?;
        Some(Self {
            name,
            floor: str_field(v, "floor"),
            location: str_field(v, "location"),
            feeds_to: string_list(v, "feedsTo"),
            feeds_from: str_field(v, "feedsFrom"),
            data_ports: u32_field(v, "dataPorts").unwrap_or(0),
            voice_ports: u32_field(v, "voicePorts").unwrap_or(0),
            fiber_ports: u32_field(v, "fiberPorts").unwrap_or(0),
            cable_runs: u32_field(v, "cableRuns").unwrap_or(0),
            avg_cable_length: f64_field(v, "avgCableLength").unwrap_or(0.0).max(0.0),
            total_cable_ft: f64_field(v, "totalCableFt").unwrap_or(0.0).max(0.0),
            devices_fed: v
                .get("devicesFed")
                .map(DeviceCount::from_value)
                .unwrap_or_default(),
            notes: str_field(v, "notes"),
        })
    }
}

/// Cabling between two closets.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Backbone {
    pub from: String,
    pub to: String,
    pub cable_type: Option<String>,
    pub strand_count: Option<u32>,
    pub pair_count: Option<u32>,
    pub category: Option<String>,
    pub estimated_length: Option<String>,
    pub notes: Option<String>,
}

impl Backbone {
    fn from_value(v: &Value) -> Option<Self> {
        Some(Self {
            from: str_field(v, "from")?,
            to: str_field(v, "to")?,
            cable_type: str_field(v, "type"),
            strand_count: u32_field(v, "strandCount"),
            pair_count: u32_field(v, "pairCount"),
            category: str_field(v, "category"),
            estimated_length: str_field(v, "estimatedLength"),
            notes: str_field(v, "notes"),
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ComplianceStatus {
    Compliant,
    Warnings,
    Violations,
    #[default]
    Unknown,
}

impl ComplianceStatus {
    pub fn from_label(label: &str) -> Self {
        match label.trim().to_uppercase().as_str() {
            "COMPLIANT" | "PASS" | "OK" => Self::Compliant,
            "WARNINGS" | "WARNING" => Self::Warnings,
            "VIOLATIONS" | "VIOLATION" | "FAIL" => Self::Violations,
            _ => Self::Unknown,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CodeViolation {
    pub code: String,
    pub severity: String,
    pub location: Option<String>,
    pub issue: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CodeCompliance {
    pub status: ComplianceStatus,
    pub violations: Vec<CodeViolation>,
    pub notes: Option<String>,
}

impl CodeCompliance {
    pub fn from_value(v: &Value) -> Self {
        Self {
            status: str_field(v, "status")
                .map(|s| ComplianceStatus::from_label(&s))
                .unwrap_or_default(),
            violations: array_field(v, "violations")
                .iter()
                .map(|item| CodeViolation {
                    code: str_field(item, "code").unwrap_or_default(),
                    severity: str_field(item, "severity").unwrap_or_else(|| "LOW".to_string()),
                    location: str_field(item, "location"),
                    issue: str_field(item, "issue").unwrap_or_default(),
                })
                .filter(|violation| !violation.code.is_empty() || !violation.issue.is_empty())
                .collect(),
            notes: str_field(v, "notes"),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ValidationResult {
    pub sheet_name: Option<String>,
    pub summary: DeviceCount,
    pub closets: Vec<ClosetAttribution>,
    pub backbones: Vec<Backbone>,
    pub code_compliance: CodeCompliance,
    pub overall_confidence: f64,
    pub devices: Vec<Value>,
    pub total_devices: Option<u32>,
    pub total_cable_runs: Option<u32>,
    pub notes: Option<String>,
}

impl ValidationResult {
    pub fn from_value(v: &Value) -> Self {
        Self {
            sheet_name: str_field(v, "sheetName"),
            summary: v
                .get("summary")
                .map(DeviceCount::from_value)
                .unwrap_or_default(),
            closets: array_field(v, "closets")
                .iter()
                .filter_map(ClosetAttribution::from_value)
                .collect(),
            backbones: array_field(v, "backbones")
                .iter()
                .filter_map(Backbone::from_value)
                .collect(),
            code_compliance: v
                .get("codeCompliance")
                .map(CodeCompliance::from_value)
                .unwrap_or_default(),
            overall_confidence: f64_field(v, "overallConfidence")
                .or_else(|| f64_field(v, "confidence"))
                .unwrap_or(0.0)
                .clamp(0.0, 1.0),
            devices: array_field(v, "devices").to_vec(),
            total_devices: u32_field(v, "totalDevices"),
            total_cable_runs: u32_field(v, "totalCableRuns"),
            notes: str_field(v, "notes"),
        }
    }

    pub fn failed(note: impl Into<String>) -> Self {
        Self {
            notes: Some(note.into()),
            ..Self::default()
        }
    }

    /// Stand-in for a reference sheet that was never counted.
    pub fn not_counted(legend: &LegendInfo) -> Self {
        Self {
            sheet_name: legend.sheet_name.clone(),
            overall_confidence: 1.0,
            notes: Some(format!("Not validated - {} sheet", legend.sheet_type)),
            ..Self::default()
        }
    }
}

// ============================================================================
// Reconciled per-document result
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Severity {
    Low,
    Medium,
    High,
}

/// Mismatch between the grid count and the validation count of one device type.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Discrepancy {
    pub system: String,
    pub device_type: String,
    pub grid_count: u32,
    pub validation_count: u32,
    /// `validation_count - grid_count`
    pub difference: i64,
    pub percent_diff: f64,
    pub severity: Severity,
    pub resolution: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PassConfidence {
    pub legend_found: bool,
    pub grid_confidence: f64,
    pub validation_confidence: f64,
}

pub const ANALYSIS_METHOD_MULTIPASS: &str = "3-pass-multipass";
pub const ANALYSIS_METHOD_QUICK: &str = "quick-single-pass";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PerDocumentResult {
    pub sheet_name: Option<String>,
    pub legend: LegendInfo,
    pub zone_counts: BTreeMap<String, DeviceCount>,
    pub grid_totals: DeviceCount,
    /// Final counts: the validation pass summary.
    pub summary: DeviceCount,
    pub closets: Vec<ClosetAttribution>,
    pub backbones: Vec<Backbone>,
    pub code_compliance: CodeCompliance,
    pub devices: Vec<Value>,
    pub total_devices: u64,
    pub discrepancies: Vec<Discrepancy>,
    pub pass_confidence: PassConfidence,
    pub analysis_method: String,
    pub notes: Vec<String>,
    pub elapsed_seconds: f64,
}

// ============================================================================
// Batch aggregate
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum IssueSeverity {
    Critical,
    Warning,
    Info,
}

/// A per-document processing problem surfaced to the reviewer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Issue {
    pub sheet: String,
    pub severity: IssueSeverity,
    pub message: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SheetStatus {
    Analyzed,
    Failed,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SheetResult {
    pub file_name: String,
    pub status: SheetStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<PerDocumentResult>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl SheetResult {
    pub fn analyzed(file_name: impl Into<String>, result: PerDocumentResult) -> Self {
        Self {
            file_name: file_name.into(),
            status: SheetStatus::Analyzed,
            result: Some(result),
            error: None,
        }
    }

    pub fn failed(file_name: impl Into<String>, error: impl Into<String>) -> Self {
        Self {
            file_name: file_name.into(),
            status: SheetStatus::Failed,
            result: None,
            error: Some(error.into()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SheetQty {
    pub sheet: String,
    pub qty: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AggregatedDevice {
    pub symbol: String,
    pub system: String,
    pub total_qty: u64,
    pub by_sheet: Vec<SheetQty>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SheetCloset {
    pub sheet: String,
    #[serde(flatten)]
    pub closet: ClosetAttribution,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SheetDiscrepancy {
    pub sheet: String,
    #[serde(flatten)]
    pub discrepancy: Discrepancy,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AggregateResult {
    pub sheets: Vec<SheetResult>,
    pub totals_by_system: DeviceCount,
    pub aggregated_devices: BTreeMap<String, AggregatedDevice>,
    pub closets: Vec<SheetCloset>,
    pub discrepancies: Vec<SheetDiscrepancy>,
    pub issues: Vec<Issue>,
    pub cancelled: bool,
}

/// Progress notification emitted once per document, in input order, just
/// before that document's analysis starts.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchProgress {
    /// 1-based index of the document being analysed.
    pub current: usize,
    pub total: usize,
    pub file_name: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceTableEntry {
    pub display_name: String,
    pub qty: u64,
    pub unit: String,
}

/// `system -> device key -> entry`, the shape BOM generation consumes.
pub type DeviceCountTable = BTreeMap<String, BTreeMap<String, DeviceTableEntry>>;

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_document_kind_detection() {
        let by_type = Document::new("plan", vec![1], Some("application/pdf".into()));
        assert!(by_type.is_pdf());

        let by_name = Document::new("E1.01.PDF", vec![1], None);
        assert!(by_name.is_pdf());
        assert_eq!(by_name.mime_type(), "application/pdf");

        let image = Document::new("plan.jpg", vec![1], Some("image/jpeg".into()));
        assert_eq!(image.kind(), MediaKind::Image);

        let untyped = Document::new("scan", vec![1], Some("  ".into()));
        assert_eq!(untyped.mime_type(), "image/png");
    }

    #[test]
    fn test_parse_count_leniency() {
        assert_eq!(parse_count(&json!(12)), Some(12));
        assert_eq!(parse_count(&json!(3.0)), Some(3));
        assert_eq!(parse_count(&json!("7")), Some(7));
        assert_eq!(parse_count(&json!("14 ea")), Some(14));
        assert_eq!(parse_count(&json!(-2)), None);
        assert_eq!(parse_count(&json!("many")), None);
        assert_eq!(parse_count(&json!(null)), None);
    }

    #[test]
    fn test_device_count_from_value_skips_junk() {
        let counts = DeviceCount::from_value(&json!({
            "CABLING": {"Data Outlet": 10, "WAP": "2", "Fiber Outlet": -1},
            "FIRE": {"Smoke Detector": 0},
            "totalDevices": 12
        }));
        assert_eq!(counts.get("CABLING", "Data Outlet"), 10);
        assert_eq!(counts.get("CABLING", "WAP"), 2);
        assert_eq!(counts.get("CABLING", "Fiber Outlet"), 0);
        assert_eq!(counts.get("FIRE", "Smoke Detector"), 0);
        assert_eq!(counts.total(), 12);
        assert_eq!(counts.keys().len(), 2);
    }

    #[test]
    fn test_device_count_merge() {
        let mut a = DeviceCount::new();
        a.add("CCTV", "Dome Camera", 3);
        let mut b = DeviceCount::new();
        b.add("CCTV", "Dome Camera", 2);
        b.add("ACCESS", "Card Reader", 1);
        a.merge(&b);
        assert_eq!(a.get("CCTV", "Dome Camera"), 5);
        assert_eq!(a.get("ACCESS", "Card Reader"), 1);
    }

    #[test]
    fn test_sheet_type_labels() {
        assert_eq!(SheetType::from_label("legend sheet"), SheetType::LegendSheet);
        assert_eq!(SheetType::from_label("SCHEDULE_SHEET"), SheetType::ScheduleSheet);
        assert_eq!(SheetType::from_label("mystery"), SheetType::FloorPlan);
        assert_eq!(SheetType::DetailSheet.to_string(), "DETAIL_SHEET");
    }

    #[test]
    fn test_legend_defaults_to_counting() {
        let legend = LegendInfo::from_value(&json!({"sheetType": "LEGEND_SHEET"}));
        assert_eq!(legend.sheet_type, SheetType::LegendSheet);
        assert!(legend.should_count_devices);

        let legend = LegendInfo::from_value(&json!({
            "sheetType": "LEGEND_SHEET",
            "shouldCountDevices": false,
            "legendFound": true,
            "symbols": [{"symbol": "Circle with D", "description": "Data Outlet", "system": "CABLING"}, {}]
        }));
        assert!(!legend.should_count_devices);
        assert_eq!(legend.symbols.len(), 1);
        assert!(legend.has_symbols());
    }

    #[test]
    fn test_grid_totals_summed_from_zones_when_missing() {
        let grid = GridCountResult::from_value(&json!({
            "gridCounts": {
                "topLeft": {"CABLING": {"Data Outlet": 3}},
                "bottomRight": {"CABLING": {"Data Outlet": 2}, "CCTV": {"Dome Camera": 1}}
            },
            "confidence": 1.7
        }));
        assert_eq!(grid.totals.get("CABLING", "Data Outlet"), 5);
        assert_eq!(grid.totals.get("CCTV", "Dome Camera"), 1);
        assert_eq!(grid.confidence, 1.0);
    }

    #[test]
    fn test_validation_result_parses_closets_and_backbones() {
        let validation = ValidationResult::from_value(&json!({
            "summary": {"CABLING": {"Data Outlet": 12}},
            "closets": [
                {"name": "MDF", "feedsTo": ["IDF-1"], "dataPorts": 53, "totalCableFt": "7735",
                 "devicesFed": {"CABLING": {"Data Outlet": 12}}},
                {"floor": "Level 2"}
            ],
            "backbones": [{"from": "MDF", "to": "IDF-1", "type": "Fiber", "strandCount": 12, "estimatedLength": "150ft"}],
            "codeCompliance": {"status": "WARNINGS", "violations": [{"code": "NFPA72_STROBE", "issue": "Missing strobe"}]},
            "overallConfidence": 0.92
        }));
        assert_eq!(validation.summary.get("CABLING", "Data Outlet"), 12);
        assert_eq!(validation.closets.len(), 1);
        assert_eq!(validation.closets[0].feeds_to, vec!["IDF-1".to_string()]);
        assert_eq!(validation.closets[0].total_cable_ft, 7735.0);
        assert_eq!(validation.backbones[0].estimated_length.as_deref(), Some("150ft"));
        assert_eq!(validation.code_compliance.status, ComplianceStatus::Warnings);
        assert_eq!(validation.code_compliance.violations[0].severity, "LOW");
        assert_eq!(validation.overall_confidence, 0.92);
    }
}
