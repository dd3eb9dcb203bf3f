use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::{Map, Value};
use thiserror::Error;

use crate::error::{ServiceError, ValidationErrors};
use crate::types::OrgKind;

pub const KEY_TYPE: &str = "type";
pub const KEY_CREATED_BY: &str = "createdBy";
pub const KEY_CREATED_AT: &str = "createdAt";
pub const KEY_UPDATED_BY: &str = "updatedBy";
pub const KEY_UPDATED_AT: &str = "updatedAt";
pub const KEY_VAT: &str = "vat";

/// Keys owned by the system. Caller values for these are discarded.
pub const SYSTEM_KEYS: &[&str] = &[KEY_TYPE, KEY_CREATED_BY, KEY_CREATED_AT, KEY_UPDATED_BY, KEY_UPDATED_AT];

const RESERVED_TYPE: &str = "owner";

/// Caller-supplied attribute bag, as received at the boundary
pub type AttributePatch = Map<String, Value>;

/// Errors decoding a persisted attribute bag
#[derive(Debug, Error, PartialEq)]
pub enum AttributeError {
    #[error("attribute bag has no type")]
    MissingType,

    #[error("unknown organization type: {0}")]
    UnknownType(String),

    #[error("invalid timestamp in {key}: {value}")]
    InvalidTimestamp { key: &'static str, value: String },
}

/// Business fields shared by every organization kind
#[derive(Debug, Clone, PartialEq)]
pub struct CompanyProfile {
    pub vat: String,
    /// Caller-defined keys outside the known schema
    pub extra: Map<String, Value>,
}

/// Organization profile, tagged by kind
#[derive(Debug, Clone, PartialEq)]
pub enum OrgProfile {
    Distributor(CompanyProfile),
    Reseller(CompanyProfile),
    Customer(CompanyProfile),
}

impl OrgProfile {
    pub fn new(kind: OrgKind, company: CompanyProfile) -> Self {
        match kind {
            OrgKind::Distributor => OrgProfile::Distributor(company),
            OrgKind::Reseller => OrgProfile::Reseller(company),
            OrgKind::Customer => OrgProfile::Customer(company),
        }
    }

    pub fn kind(&self) -> OrgKind {
        match self {
            OrgProfile::Distributor(_) => OrgKind::Distributor,
            OrgProfile::Reseller(_) => OrgKind::Reseller,
            OrgProfile::Customer(_) => OrgKind::Customer,
        }
    }

    pub fn company(&self) -> &CompanyProfile {
        match self {
            OrgProfile::Distributor(c) | OrgProfile::Reseller(c) | OrgProfile::Customer(c) => c,
        }
    }
}

/// System-managed attributes. Only this module can change them.
#[derive(Debug, Clone, PartialEq)]
pub struct SystemFields {
    created_by: Option<String>,
    created_at: DateTime<Utc>,
    updated_by: Option<String>,
    updated_at: Option<DateTime<Utc>>,
}

impl SystemFields {
    fn created(created_by: Option<String>, at: DateTime<Utc>) -> Self {
        Self {
            created_by,
            created_at: at,
            updated_by: None,
            updated_at: None,
        }
    }

    fn stamped(&self, updated_by: &str, at: DateTime<Utc>) -> Self {
        Self {
            created_by: self.created_by.clone(),
            created_at: self.created_at,
            updated_by: Some(updated_by.to_string()),
            updated_at: Some(at),
        }
    }

    /// Parent organization's remote ID; none for distributors
    pub fn created_by(&self) -> Option<&str> {
        self.created_by.as_deref()
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn updated_by(&self) -> Option<&str> {
        self.updated_by.as_deref()
    }

    pub fn updated_at(&self) -> Option<DateTime<Utc>> {
        self.updated_at
    }
}

/// Typed replacement for the organization's free-form custom data
#[derive(Debug, Clone, PartialEq)]
pub struct OrgAttributes {
    profile: OrgProfile,
    system: SystemFields,
}

impl OrgAttributes {
    /// Validate a create request's bag and stamp the system fields
    pub fn for_create(
        kind: OrgKind,
        created_by: Option<String>,
        at: DateTime<Utc>,
        patch: &AttributePatch,
    ) -> Result<Self, ServiceError> {
        let mut errors = ValidationErrors::new();
        reject_reserved_type(patch, &mut errors);
        let vat = vat_from_patch(patch, true, &mut errors);
        errors.into_result()?;

        let company = CompanyProfile {
            vat: vat.unwrap_or_default(),
            extra: caller_keys(patch),
        };

        Ok(Self {
            profile: OrgProfile::new(kind, company),
            system: SystemFields::created(created_by, at),
        })
    }

    /// Overlay a caller patch on the current attributes. Kind and parent are kept.
    pub fn merged(&self, patch: &AttributePatch, updated_by: &str, at: DateTime<Utc>) -> Result<Self, ServiceError> {
        let mut errors = ValidationErrors::new();
        reject_reserved_type(patch, &mut errors);
        let vat = vat_from_patch(patch, false, &mut errors);
        errors.into_result()?;

        let current = self.profile.company();
        let mut extra = current.extra.clone();
        extra.extend(caller_keys(patch));

        let company = CompanyProfile {
            vat: vat.unwrap_or_else(|| current.vat.clone()),
            extra,
        };

        Ok(Self {
            profile: OrgProfile::new(self.kind(), company),
            system: self.system.stamped(updated_by, at),
        })
    }

    pub fn kind(&self) -> OrgKind {
        self.profile.kind()
    }

    pub fn profile(&self) -> &OrgProfile {
        &self.profile
    }

    pub fn system(&self) -> &SystemFields {
        &self.system
    }

    pub fn vat(&self) -> &str {
        &self.profile.company().vat
    }

    pub fn parent_id(&self) -> Option<&str> {
        self.system.created_by()
    }

    /// Flatten to the persisted / remote attribute bag
    pub fn to_custom_data(&self) -> Map<String, Value> {
        let company = self.profile.company();
        let mut map = company.extra.clone();
        map.insert(KEY_VAT.into(), Value::String(company.vat.clone()));
        map.insert(KEY_TYPE.into(), Value::String(self.kind().as_str().into()));
        if let Some(created_by) = &self.system.created_by {
            map.insert(KEY_CREATED_BY.into(), Value::String(created_by.clone()));
        }
        map.insert(KEY_CREATED_AT.into(), Value::String(self.system.created_at.to_rfc3339()));
        if let Some(updated_by) = &self.system.updated_by {
            map.insert(KEY_UPDATED_BY.into(), Value::String(updated_by.clone()));
        }
        if let Some(updated_at) = &self.system.updated_at {
            map.insert(KEY_UPDATED_AT.into(), Value::String(updated_at.to_rfc3339()));
        }
        map
    }

    /// Decode a persisted attribute bag
    pub fn from_custom_data(map: &Map<String, Value>) -> Result<Self, AttributeError> {
        let kind_str = map
            .get(KEY_TYPE)
            .and_then(Value::as_str)
            .ok_or(AttributeError::MissingType)?;
        let kind: OrgKind = kind_str
            .parse()
            .map_err(|_| AttributeError::UnknownType(kind_str.to_string()))?;

        let created_at = match map.get(KEY_CREATED_AT).and_then(Value::as_str) {
            Some(s) => parse_timestamp(KEY_CREATED_AT, s)?,
            None => DateTime::<Utc>::default(),
        };
        let updated_at = match map.get(KEY_UPDATED_AT).and_then(Value::as_str) {
            Some(s) => Some(parse_timestamp(KEY_UPDATED_AT, s)?),
            None => None,
        };

        let system = SystemFields {
            created_by: string_value(map, KEY_CREATED_BY),
            created_at,
            updated_by: string_value(map, KEY_UPDATED_BY),
            updated_at,
        };

        let company = CompanyProfile {
            vat: string_value(map, KEY_VAT).unwrap_or_default(),
            extra: caller_keys(map),
        };

        Ok(Self {
            profile: OrgProfile::new(kind, company),
            system,
        })
    }
}

impl Serialize for OrgAttributes {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.to_custom_data().serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for OrgAttributes {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let map = Map::<String, Value>::deserialize(deserializer)?;
        Self::from_custom_data(&map).map_err(serde::de::Error::custom)
    }
}

fn reject_reserved_type(patch: &AttributePatch, errors: &mut ValidationErrors) {
    if let Some(value) = patch.get(KEY_TYPE).and_then(Value::as_str) {
        if value.trim().eq_ignore_ascii_case(RESERVED_TYPE) {
            errors.push("custom_data.type", "reserved_value", value);
        }
    }
}

fn vat_from_patch(patch: &AttributePatch, required: bool, errors: &mut ValidationErrors) -> Option<String> {
    match patch.get(KEY_VAT) {
        None | Some(Value::Null) => {
            if required {
                errors.push("custom_data.vat", "required", "");
            }
            None
        }
        Some(Value::String(s)) if s.trim().is_empty() => {
            errors.push("custom_data.vat", "cannot_be_empty", s.as_str());
            None
        }
        Some(Value::String(s)) => Some(s.trim().to_string()),
        Some(other) => {
            errors.push("custom_data.vat", "must_be_string", other.to_string());
            None
        }
    }
}

/// Keys a caller is allowed to own
fn caller_keys(map: &Map<String, Value>) -> Map<String, Value> {
    map.iter()
        .filter(|(k, _)| k.as_str() != KEY_VAT && !SYSTEM_KEYS.contains(&k.as_str()))
        .map(|(k, v)| (k.clone(), v.clone()))
        .collect()
}

fn string_value(map: &Map<String, Value>, key: &str) -> Option<String> {
    map.get(key).and_then(Value::as_str).map(str::to_string)
}

fn parse_timestamp(key: &'static str, value: &str) -> Result<DateTime<Utc>, AttributeError> {
    DateTime::parse_from_rfc3339(value)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|_| AttributeError::InvalidTimestamp {
            key,
            value: value.to_string(),
        })
}
