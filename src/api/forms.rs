//! Query-string filter forms and their validation.

use std::collections::BTreeSet;

use serde::Serialize;

use crate::error::{AppError, FormErrors, Result};
use crate::models::{RoleId, Vlan};
use crate::repository::DeviceRepository;
use crate::service::MapFilter;

pub const FORM_ERROR: &str = "Form fields filled out incorrectly";
const INVALID_CHOICE: &str = "Select a valid choice. That choice is not one of the available choices.";
const INVALID_BOOLEAN: &str = "Enter a valid boolean value.";

/// Raw map filter input, echoed back to the page as submitted
#[derive(Debug, Clone, Default, Serialize)]
pub struct MapFilterForm {
    pub vlan_group: Option<String>,
    pub vlan: Option<String>,
    pub device_roles: Vec<String>,
    pub calculate_connections: Option<String>,
}

impl MapFilterForm {
    /// Collect form fields from query pairs. Repeated single-valued keys keep
    /// the last value; blank values count as not given.
    pub fn from_query(pairs: Vec<(String, String)>) -> Self {
        let mut form = MapFilterForm::default();
        for (key, value) in pairs {
            match key.as_str() {
                "vlan_group" => form.vlan_group = non_blank(value),
                "vlan" => form.vlan = non_blank(value),
                "device_roles" => {
                    if let Some(value) = non_blank(value) {
                        form.device_roles.push(value);
                    }
                }
                // Present but empty means an unchecked box, so keep it
                "calculate_connections" => form.calculate_connections = Some(value.trim().to_string()),
                _ => {}
            }
        }
        form
    }

    /// Check every field against the repository. Field problems come back as
    /// [`AppError::Validation`]; repository failures pass through unchanged.
    pub async fn validate(&self, repo: &dyn DeviceRepository) -> Result<MapFilter> {
        let mut errors = FormErrors::new();

        let vlan_group = match self.vlan_group.as_deref() {
            None => None,
            Some(raw) => {
                let group = match parse_id(raw) {
                    Some(id) => repo.get_vlan_group(id).await?,
                    None => None,
                };
                if group.is_none() {
                    add_error(&mut errors, "vlan_group", INVALID_CHOICE);
                }
                group
            }
        };

        let vlan = lookup_vlan(repo, self.vlan.as_deref(), &mut errors).await?;

        let mut device_roles = Vec::new();
        if !self.device_roles.is_empty() {
            let mut ids: BTreeSet<RoleId> = BTreeSet::new();
            for raw in &self.device_roles {
                match parse_id(raw) {
                    Some(id) => {
                        ids.insert(id);
                    }
                    None => add_error(
                        &mut errors,
                        "device_roles",
                        &format!("\"{}\" is not a valid value.", raw),
                    ),
                }
            }

            let wanted: Vec<RoleId> = ids.iter().copied().collect();
            device_roles = repo.find_device_roles(&wanted).await?;
            for id in &ids {
                if !device_roles.iter().any(|r| r.id == *id) {
                    add_error(
                        &mut errors,
                        "device_roles",
                        &format!("Select a valid choice. {} is not one of the available choices.", id),
                    );
                }
            }
        }

        let calculate_connections = match self.calculate_connections.as_deref() {
            None => true,
            Some(raw) => parse_bool(raw).unwrap_or_else(|| {
                add_error(&mut errors, "calculate_connections", INVALID_BOOLEAN);
                false
            }),
        };

        if !errors.is_empty() {
            return Err(AppError::Validation {
                message: FORM_ERROR.to_string(),
                form_errors: errors,
            });
        }

        Ok(MapFilter {
            vlan_group,
            vlan,
            device_roles,
            calculate_connections,
        })
    }
}

/// Optional VLAN filter of the CPE lookup
#[derive(Debug, Clone, Default, Serialize)]
pub struct ConnectedCpeForm {
    pub vlan: Option<String>,
}

impl ConnectedCpeForm {
    pub fn from_query(pairs: Vec<(String, String)>) -> Self {
        let mut form = ConnectedCpeForm::default();
        for (key, value) in pairs {
            if key == "vlan" {
                form.vlan = non_blank(value);
            }
        }
        form
    }

    pub async fn validate(&self, repo: &dyn DeviceRepository) -> Result<Option<Vlan>> {
        let mut errors = FormErrors::new();
        let vlan = lookup_vlan(repo, self.vlan.as_deref(), &mut errors).await?;
        if !errors.is_empty() {
            return Err(AppError::Validation {
                message: FORM_ERROR.to_string(),
                form_errors: errors,
            });
        }
        Ok(vlan)
    }
}

async fn lookup_vlan(
    repo: &dyn DeviceRepository,
    raw: Option<&str>,
    errors: &mut FormErrors,
) -> Result<Option<Vlan>> {
    let Some(raw) = raw else {
        return Ok(None);
    };
    let vlan = match parse_id(raw) {
        Some(id) => repo.get_vlan(id).await?,
        None => None,
    };
    if vlan.is_none() {
        add_error(errors, "vlan", INVALID_CHOICE);
    }
    Ok(vlan)
}

fn non_blank(value: String) -> Option<String> {
    let trimmed = value.trim();
    (!trimmed.is_empty()).then(|| trimmed.to_string())
}

fn add_error(errors: &mut FormErrors, field: &str, message: &str) {
    errors
        .entry(field.to_string())
        .or_default()
        .push(message.to_string());
}

/// Record ids are positive integers
pub fn parse_id(raw: &str) -> Option<u64> {
    raw.trim().parse::<u64>().ok().filter(|id| *id > 0)
}

pub fn parse_bool(raw: &str) -> Option<bool> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "true" | "1" | "on" | "yes" => Some(true),
        "false" | "0" | "off" | "no" | "" => Some(false),
        _ => None,
    }
}
