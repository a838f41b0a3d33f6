//! Division 27/28 specification documents and their comparison against plan counts.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

use super::takeoff::{array_field, f64_field, str_field, string_list, u32_field, Severity};

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SpecDivision {
    pub number: String,
    pub title: String,
    pub requirements: Vec<String>,
}

/// A quantity the specification explicitly schedules.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DeviceSchedule {
    pub system: String,
    pub device_type: String,
    pub specified_qty: u32,
    pub section: Option<String>,
    pub notes: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CableRequirement {
    pub cable_type: String,
    pub rating: Option<String>,
    pub jacket: Option<String>,
    pub system: String,
    pub usage: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EquipmentRequirement {
    pub equipment_type: String,
    pub model: Option<String>,
    pub qty: Option<u32>,
    pub section: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SpecificationResult {
    pub title: Option<String>,
    pub divisions: Vec<SpecDivision>,
    pub device_schedules: Vec<DeviceSchedule>,
    /// system -> component category -> manufacturers
    pub approved_manufacturers: BTreeMap<String, BTreeMap<String, Vec<String>>>,
    pub cable_requirements: Vec<CableRequirement>,
    pub equipment_requirements: Vec<EquipmentRequirement>,
    pub testing_requirements: Vec<String>,
    pub notes: Option<String>,
    pub confidence: f64,
}

impl SpecificationResult {
    pub fn from_value(v: &Value) -> Self {
        let approved_manufacturers = v
            .get("approvedManufacturers")
            .and_then(Value::as_object)
            .map(|systems| {
                systems
                    .iter()
                    .filter_map(|(system, categories)| {
                        let by_category = categories
                            .as_object()?
                            .keys()
                            .map(|category| (category.clone(), string_list(categories, category)))
                            .collect();
                        Some((system.clone(), by_category))
                    })
                    .collect()
            })
            .unwrap_or_default();

        Self {
            title: str_field(v, "specificationTitle"),
            divisions: array_field(v, "divisions")
                .iter()
                .map(|d| SpecDivision {
                    number: str_field(d, "number").unwrap_or_default(),
                    title: str_field(d, "title").unwrap_or_default(),
                    requirements: string_list(d, "requirements"),
                })
                .collect(),
            device_schedules: array_field(v, "deviceSchedules")
                .iter()
                .filter_map(|s| {
                    Some(DeviceSchedule {
                        system: str_field(s, "system")?,
                        device_type: str_field(s, "type")?,
                        specified_qty: u32_field(s, "specifiedQty").unwrap_or(0),
                        section: str_field(s, "section"),
                        notes: str_field(s, "notes"),
                    })
                })
                .collect(),
            approved_manufacturers,
            cable_requirements: array_field(v, "cableRequirements")
                .iter()
                .filter_map(|c| {
                    Some(CableRequirement {
                        cable_type: str_field(c, "type")?,
                        rating: str_field(c, "rating"),
                        jacket: str_field(c, "jacket"),
                        system: str_field(c, "system").unwrap_or_default(),
                        usage: str_field(c, "usage"),
                    })
                })
                .collect(),
            equipment_requirements: array_field(v, "equipmentRequirements")
                .iter()
                .filter_map(|e| {
                    Some(EquipmentRequirement {
                        equipment_type: str_field(e, "type")?,
                        model: str_field(e, "model"),
                        qty: u32_field(e, "qty"),
                        section: str_field(e, "section"),
                    })
                })
                .collect(),
            testing_requirements: string_list(v, "testingRequirements"),
            notes: str_field(v, "notes"),
            confidence: f64_field(v, "confidence").unwrap_or(0.0).clamp(0.0, 1.0),
        }
    }

    pub fn manufacturers_for(&self, system: &str) -> Option<&BTreeMap<String, Vec<String>>> {
        self.approved_manufacturers.get(system)
    }

    pub fn cable_requirements_for(&self, system: &str) -> Vec<&CableRequirement> {
        self.cable_requirements
            .iter()
            .filter(|c| c.system == system)
            .collect()
    }
}

/// A scheduled device whose plan count equals the specified quantity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SpecMatch {
    pub system: String,
    pub device_type: String,
    pub qty: u32,
}

/// Specification requirements that apply to a system counted on the plans.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SystemRequirements {
    /// component category -> manufacturers
    pub approved_manufacturers: BTreeMap<String, Vec<String>>,
    pub cable_requirements: Vec<CableRequirement>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SpecDiscrepancy {
    pub system: String,
    pub device_type: String,
    pub spec_qty: u32,
    pub plan_qty: u32,
    /// `plan_qty - spec_qty`
    pub difference: i64,
    pub percent_diff: f64,
    pub severity: Severity,
    pub section: Option<String>,
    pub recommendation: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CrossReference {
    pub matches: Vec<SpecMatch>,
    pub discrepancies: Vec<SpecDiscrepancy>,
    pub total_checked: usize,
    pub match_rate: f64,
    pub analysis_complete: bool,
    /// Keyed by plan system; systems the specification says nothing about are omitted.
    pub requirements_by_system: BTreeMap<String, SystemRequirements>,
}
