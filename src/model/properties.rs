//! Element variant registry.
//!
//! Every element carries one `ElementProperties` variant chosen from the
//! header's type name. Repository subtypes (`Folder`, `GovernancePolicy`,
//! `Campaign`, ...) map onto a closed set of kinds; anything else becomes
//! `Unrecognized` and keeps its raw payload so newer repositories do not break
//! older assemblers.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::str::FromStr;
use std::sync::OnceLock;

use crate::error::{MetaviewError, Result};
use crate::model::header::ElementHeader;

/// The closed set of element kinds the assembler understands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ElementKind {
    Collection,
    GovernanceDefinition,
    ActorProfile,
    ActorRole,
    DataField,
    DataFile,
    Api,
    ConnectorType,
    InformationSupplyChain,
    SupplyChainSegment,
    Project,
    Asset,
    Unrecognized,
}

impl ElementKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ElementKind::Collection => "collection",
            ElementKind::GovernanceDefinition => "governance-definition",
            ElementKind::ActorProfile => "actor-profile",
            ElementKind::ActorRole => "actor-role",
            ElementKind::DataField => "data-field",
            ElementKind::DataFile => "data-file",
            ElementKind::Api => "api",
            ElementKind::ConnectorType => "connector-type",
            ElementKind::InformationSupplyChain => "information-supply-chain",
            ElementKind::SupplyChainSegment => "supply-chain-segment",
            ElementKind::Project => "project",
            ElementKind::Asset => "asset",
            ElementKind::Unrecognized => "unrecognized",
        }
    }
}

impl fmt::Display for ElementKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ElementKind {
    type Err = MetaviewError;

    fn from_str(s: &str) -> Result<Self> {
        serde_json::from_value(Value::String(s.to_string()))
            .map_err(|_| MetaviewError::InvalidInput(format!("unknown element kind: {}", s)))
    }
}

/// Fields every kind shares.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct CommonProperties {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub qualified_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub display_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub additional_properties: BTreeMap<String, Value>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct CollectionProperties {
    #[serde(flatten)]
    pub common: CommonProperties,
    pub category: Option<String>,
    pub collection_type: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct GovernanceDefinitionProperties {
    #[serde(flatten)]
    pub common: CommonProperties,
    pub summary: Option<String>,
    pub scope: Option<String>,
    pub domain_identifier: Option<i32>,
    pub importance: Option<String>,
    pub implications: Vec<String>,
    pub outcomes: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct ActorProfileProperties {
    #[serde(flatten)]
    pub common: CommonProperties,
    pub user_ids: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct ActorRoleProperties {
    #[serde(flatten)]
    pub common: CommonProperties,
    pub identifier: Option<String>,
    pub scope: Option<String>,
    pub domain_identifier: Option<i32>,
    pub head_count: Option<i32>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct DataFieldProperties {
    #[serde(flatten)]
    pub common: CommonProperties,
    pub data_type: Option<String>,
    pub position: Option<i32>,
    pub min_cardinality: Option<i32>,
    pub max_cardinality: Option<i32>,
    pub is_nullable: Option<bool>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct DataFileProperties {
    #[serde(flatten)]
    pub common: CommonProperties,
    pub path_name: Option<String>,
    pub file_type: Option<String>,
    pub file_extension: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct ApiProperties {
    #[serde(flatten)]
    pub common: CommonProperties,
    pub network_address: Option<String>,
    pub api_version: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct ConnectorTypeProperties {
    #[serde(flatten)]
    pub common: CommonProperties,
    pub connector_provider_class_name: Option<String>,
    pub supported_asset_type_name: Option<String>,
    pub connector_framework_name: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct InformationSupplyChainProperties {
    #[serde(flatten)]
    pub common: CommonProperties,
    pub scope: Option<String>,
    pub purposes: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct SupplyChainSegmentProperties {
    #[serde(flatten)]
    pub common: CommonProperties,
    pub scope: Option<String>,
    pub integration_style: Option<String>,
    pub estimated_volumetrics: BTreeMap<String, String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct ProjectProperties {
    #[serde(flatten)]
    pub common: CommonProperties,
    pub identifier: Option<String>,
    pub start_date: Option<DateTime<Utc>>,
    pub planned_end_date: Option<DateTime<Utc>>,
    pub project_status: Option<String>,
    pub project_phase: Option<String>,
    pub project_health: Option<String>,
    pub priority: Option<i32>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct AssetProperties {
    #[serde(flatten)]
    pub common: CommonProperties,
    pub deployed_implementation_type: Option<String>,
}

/// Polymorphic element payload, tagged by kind.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "kebab-case")]
pub enum ElementProperties {
    Collection(CollectionProperties),
    GovernanceDefinition(GovernanceDefinitionProperties),
    ActorProfile(ActorProfileProperties),
    ActorRole(ActorRoleProperties),
    DataField(DataFieldProperties),
    DataFile(DataFileProperties),
    Api(ApiProperties),
    ConnectorType(ConnectorTypeProperties),
    InformationSupplyChain(InformationSupplyChainProperties),
    SupplyChainSegment(SupplyChainSegmentProperties),
    Project(ProjectProperties),
    Asset(AssetProperties),
    #[serde(rename_all = "camelCase")]
    Unrecognized { type_name: String, raw: Value },
}

impl ElementProperties {
    pub fn kind(&self) -> ElementKind {
        match self {
            ElementProperties::Collection(_) => ElementKind::Collection,
            ElementProperties::GovernanceDefinition(_) => ElementKind::GovernanceDefinition,
            ElementProperties::ActorProfile(_) => ElementKind::ActorProfile,
            ElementProperties::ActorRole(_) => ElementKind::ActorRole,
            ElementProperties::DataField(_) => ElementKind::DataField,
            ElementProperties::DataFile(_) => ElementKind::DataFile,
            ElementProperties::Api(_) => ElementKind::Api,
            ElementProperties::ConnectorType(_) => ElementKind::ConnectorType,
            ElementProperties::InformationSupplyChain(_) => ElementKind::InformationSupplyChain,
            ElementProperties::SupplyChainSegment(_) => ElementKind::SupplyChainSegment,
            ElementProperties::Project(_) => ElementKind::Project,
            ElementProperties::Asset(_) => ElementKind::Asset,
            ElementProperties::Unrecognized { .. } => ElementKind::Unrecognized,
        }
    }

    /// Shared fields, `None` for unrecognized payloads.
    pub fn common(&self) -> Option<&CommonProperties> {
        match self {
            ElementProperties::Collection(p) => Some(&p.common),
            ElementProperties::GovernanceDefinition(p) => Some(&p.common),
            ElementProperties::ActorProfile(p) => Some(&p.common),
            ElementProperties::ActorRole(p) => Some(&p.common),
            ElementProperties::DataField(p) => Some(&p.common),
            ElementProperties::DataFile(p) => Some(&p.common),
            ElementProperties::Api(p) => Some(&p.common),
            ElementProperties::ConnectorType(p) => Some(&p.common),
            ElementProperties::InformationSupplyChain(p) => Some(&p.common),
            ElementProperties::SupplyChainSegment(p) => Some(&p.common),
            ElementProperties::Project(p) => Some(&p.common),
            ElementProperties::Asset(p) => Some(&p.common),
            ElementProperties::Unrecognized { .. } => None,
        }
    }

    pub fn qualified_name(&self) -> Option<&str> {
        match self {
            ElementProperties::Unrecognized { raw, .. } => {
                raw.get("qualifiedName").and_then(Value::as_str)
            }
            other => other.common().and_then(|c| c.qualified_name.as_deref()),
        }
    }

    /// Best human-facing name: displayName, then name, then qualifiedName.
    pub fn display_name(&self) -> Option<&str> {
        match self.common() {
            Some(c) => c
                .display_name
                .as_deref()
                .or(c.name.as_deref())
                .or(c.qualified_name.as_deref()),
            None => None,
        }
    }

    /// Repository type name recorded by an unrecognized variant.
    pub fn unrecognized_type_name(&self) -> Option<&str> {
        match self {
            ElementProperties::Unrecognized { type_name, .. } => Some(type_name),
            _ => None,
        }
    }
}

impl fmt::Display for ElementProperties {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // Field order is declaration order and maps are BTreeMaps, so this is stable.
        let text = serde_json::to_string(self).map_err(|_| fmt::Error)?;
        f.write_str(&text)
    }
}

const BUILTIN_ALIASES: &[(ElementKind, &[&str])] = &[
    (
        ElementKind::Collection,
        &[
            "Collection",
            "Folder",
            "RootCollection",
            "DigitalProduct",
            "DigitalProductCatalog",
            "ResultsSet",
        ],
    ),
    (
        ElementKind::GovernanceDefinition,
        &[
            "GovernanceDefinition",
            "GovernanceDriver",
            "GovernanceStrategy",
            "BusinessImperative",
            "Regulation",
            "RegulationArticle",
            "GovernancePolicy",
            "GovernancePrinciple",
            "GovernanceObligation",
            "GovernanceApproach",
            "GovernanceControl",
            "GovernanceRule",
            "GovernanceProcess",
            "GovernanceProcedure",
            "GovernanceResponsibility",
            "DataProcessingPurpose",
            "SecurityAccessControl",
            "TermsAndConditions",
            "LicenseType",
            "CertificationType",
        ],
    ),
    (
        ElementKind::ActorProfile,
        &["ActorProfile", "Person", "Team", "ITProfile", "UserIdentity"],
    ),
    (
        ElementKind::ActorRole,
        &[
            "ActorRole",
            "PersonRole",
            "TeamRole",
            "GovernanceRole",
            "ProjectManager",
            "TeamLeader",
            "TeamMember",
            "CommunityMember",
            "AssetOwner",
        ],
    ),
    (ElementKind::DataField, &["DataField"]),
    (
        ElementKind::DataFile,
        &["DataFile", "CSVFile", "AvroFile", "JSONFile", "ParquetFile", "KeystoreFile"],
    ),
    (ElementKind::Api, &["DeployedAPI", "APIEndpoint"]),
    (ElementKind::ConnectorType, &["ConnectorType"]),
    (ElementKind::InformationSupplyChain, &["InformationSupplyChain"]),
    (ElementKind::SupplyChainSegment, &["InformationSupplyChainSegment"]),
    (
        ElementKind::Project,
        &["Project", "Campaign", "Task", "PersonalProject", "StudyProject"],
    ),
    (
        ElementKind::Asset,
        &[
            "Asset",
            "Referenceable",
            "DataAsset",
            "DataSet",
            "Database",
            "DeployedDatabaseSchema",
            "Process",
            "SoftwareServer",
        ],
    ),
];

fn builtin_aliases() -> &'static HashMap<String, ElementKind> {
    static BUILTIN: OnceLock<HashMap<String, ElementKind>> = OnceLock::new();
    BUILTIN.get_or_init(|| {
        BUILTIN_ALIASES
            .iter()
            .flat_map(|(kind, names)| names.iter().map(move |n| (n.to_string(), *kind)))
            .collect()
    })
}

/// Maps repository type names onto element kinds and reads payloads.
#[derive(Debug, Clone)]
pub struct PropertiesRegistry {
    aliases: HashMap<String, ElementKind>,
}

impl PropertiesRegistry {
    /// Registry with the built-in type names only
    pub fn new() -> Self {
        Self {
            aliases: builtin_aliases().clone(),
        }
    }

    /// Built-in type names plus caller aliases (aliases win on conflict)
    pub fn with_aliases(aliases: &BTreeMap<String, ElementKind>) -> Self {
        let mut registry = Self::new();
        for (type_name, kind) in aliases {
            registry.register(type_name.clone(), *kind);
        }
        registry
    }

    pub fn register(&mut self, type_name: impl Into<String>, kind: ElementKind) {
        self.aliases.insert(type_name.into(), kind);
    }

    /// Kind for a type name; `Unrecognized` when the name is not registered.
    pub fn kind_of(&self, type_name: &str) -> ElementKind {
        self.aliases
            .get(type_name)
            .copied()
            .unwrap_or(ElementKind::Unrecognized)
    }

    /// Read a raw payload as the variant selected by `type_name`.
    ///
    /// Unknown type names never fail. A payload that is not an object, or that
    /// does not fit its kind's shape, is a `MalformedRecord`.
    pub fn resolve(&self, type_name: &str, raw: &Value) -> Result<ElementProperties> {
        let kind = self.kind_of(type_name);
        if kind == ElementKind::Unrecognized {
            return Ok(ElementProperties::Unrecognized {
                type_name: type_name.to_string(),
                raw: raw.clone(),
            });
        }

        let payload = match raw {
            Value::Null => Value::Object(Default::default()),
            Value::Object(_) => raw.clone(),
            other => {
                return Err(MetaviewError::MalformedRecord(format!(
                    "{} properties must be an object, got {}",
                    type_name,
                    json_type(other)
                )))
            }
        };

        let malformed =
            |e: serde_json::Error| MetaviewError::MalformedRecord(format!("{} properties: {}", type_name, e));

        let props = match kind {
            ElementKind::Collection => {
                ElementProperties::Collection(serde_json::from_value(payload).map_err(malformed)?)
            }
            ElementKind::GovernanceDefinition => ElementProperties::GovernanceDefinition(
                serde_json::from_value(payload).map_err(malformed)?,
            ),
            ElementKind::ActorProfile => {
                ElementProperties::ActorProfile(serde_json::from_value(payload).map_err(malformed)?)
            }
            ElementKind::ActorRole => {
                ElementProperties::ActorRole(serde_json::from_value(payload).map_err(malformed)?)
            }
            ElementKind::DataField => {
                ElementProperties::DataField(serde_json::from_value(payload).map_err(malformed)?)
            }
            ElementKind::DataFile => {
                ElementProperties::DataFile(serde_json::from_value(payload).map_err(malformed)?)
            }
            ElementKind::Api => {
                ElementProperties::Api(serde_json::from_value(payload).map_err(malformed)?)
            }
            ElementKind::ConnectorType => {
                ElementProperties::ConnectorType(serde_json::from_value(payload).map_err(malformed)?)
            }
            ElementKind::InformationSupplyChain => ElementProperties::InformationSupplyChain(
                serde_json::from_value(payload).map_err(malformed)?,
            ),
            ElementKind::SupplyChainSegment => ElementProperties::SupplyChainSegment(
                serde_json::from_value(payload).map_err(malformed)?,
            ),
            ElementKind::Project => {
                ElementProperties::Project(serde_json::from_value(payload).map_err(malformed)?)
            }
            ElementKind::Asset => {
                ElementProperties::Asset(serde_json::from_value(payload).map_err(malformed)?)
            }
            ElementKind::Unrecognized => ElementProperties::Unrecognized {
                type_name: type_name.to_string(),
                raw: raw.clone(),
            },
        };

        Ok(props)
    }

    /// Check that a variant agrees with its header's type name.
    pub fn validate(&self, header: &ElementHeader, properties: &ElementProperties) -> Result<()> {
        let expected = self.kind_of(&header.type_name);
        let actual = properties.kind();
        if expected != actual {
            return Err(MetaviewError::MalformedRecord(format!(
                "{} carries {} properties but its type resolves to {}",
                header, actual, expected
            )));
        }
        if let Some(type_name) = properties.unrecognized_type_name() {
            if type_name != header.type_name {
                return Err(MetaviewError::MalformedRecord(format!(
                    "{} carries unrecognized properties for type {}",
                    header, type_name
                )));
            }
        }
        Ok(())
    }
}

impl Default for PropertiesRegistry {
    fn default() -> Self {
        Self::new()
    }
}

/// Resolve with the built-in registry.
pub fn resolve_properties(type_name: &str, raw: &Value) -> Result<ElementProperties> {
    PropertiesRegistry::new().resolve(type_name, raw)
}

fn json_type(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_resolve_collection() {
        let props = resolve_properties(
            "Collection",
            &json!({"qualifiedName": "Collection::sales", "displayName": "Sales", "category": "reports"}),
        )
        .unwrap();
        assert_eq!(props.kind(), ElementKind::Collection);
        assert_eq!(props.display_name(), Some("Sales"));
        assert_eq!(props.qualified_name(), Some("Collection::sales"));
        match props {
            ElementProperties::Collection(c) => assert_eq!(c.category.as_deref(), Some("reports")),
            other => panic!("unexpected variant {:?}", other),
        }
    }

    #[test]
    fn test_subtype_aliases() {
        let registry = PropertiesRegistry::new();
        assert_eq!(registry.kind_of("Folder"), ElementKind::Collection);
        assert_eq!(registry.kind_of("GovernancePolicy"), ElementKind::GovernanceDefinition);
        assert_eq!(registry.kind_of("Campaign"), ElementKind::Project);
        assert_eq!(
            registry.kind_of("InformationSupplyChainSegment"),
            ElementKind::SupplyChainSegment
        );
    }

    #[test]
    fn test_unknown_type_is_unrecognized() {
        let raw = json!({"qualifiedName": "X::1", "brandNewField": 3});
        let props = resolve_properties("QuantumLedger", &raw).unwrap();
        assert_eq!(props.kind(), ElementKind::Unrecognized);
        assert_eq!(props.unrecognized_type_name(), Some("QuantumLedger"));
        assert_eq!(props.qualified_name(), Some("X::1"));
        assert_eq!(props.display_name(), None);
    }

    #[test]
    fn test_unknown_fields_tolerated() {
        let props = resolve_properties(
            "Project",
            &json!({"name": "Apollo", "futureField": {"a": 1}, "startDate": "2024-01-01T00:00:00Z"}),
        )
        .unwrap();
        match props {
            ElementProperties::Project(p) => {
                assert_eq!(p.common.name.as_deref(), Some("Apollo"));
                assert!(p.start_date.is_some());
            }
            other => panic!("unexpected variant {:?}", other),
        }
    }

    #[test]
    fn test_malformed_payload() {
        let err = resolve_properties("DataField", &json!({"position": "first"})).unwrap_err();
        assert!(matches!(err, MetaviewError::MalformedRecord(_)));

        let err = resolve_properties("Collection", &json!(["not", "an", "object"])).unwrap_err();
        assert!(err.to_string().contains("array"));
    }

    #[test]
    fn test_null_payload_is_empty() {
        let props = resolve_properties("Asset", &Value::Null).unwrap();
        assert_eq!(props, ElementProperties::Asset(AssetProperties::default()));
    }

    #[test]
    fn test_configured_alias() {
        let mut aliases = BTreeMap::new();
        aliases.insert("DataMesh".to_string(), ElementKind::Collection);
        aliases.insert("Folder".to_string(), ElementKind::Asset);
        let registry = PropertiesRegistry::with_aliases(&aliases);
        assert_eq!(registry.kind_of("DataMesh"), ElementKind::Collection);
        assert_eq!(registry.kind_of("Folder"), ElementKind::Asset);
    }

    #[test]
    fn test_validate_mismatch() {
        let registry = PropertiesRegistry::new();
        let header = ElementHeader::new("g-1", "Collection");
        let props = ElementProperties::Project(ProjectProperties::default());
        let err = registry.validate(&header, &props).unwrap_err();
        assert!(matches!(err, MetaviewError::MalformedRecord(_)));

        let ok = ElementProperties::Collection(CollectionProperties::default());
        assert!(registry.validate(&header, &ok).is_ok());

        let header = ElementHeader::new("g-2", "QuantumLedger");
        let wrong = ElementProperties::Unrecognized {
            type_name: "OtherThing".to_string(),
            raw: Value::Null,
        };
        assert!(registry.validate(&header, &wrong).is_err());
    }

    #[test]
    fn test_stable_display() {
        let a = resolve_properties("Collection", &json!({"displayName": "A", "qualifiedName": "q"})).unwrap();
        let b = resolve_properties("Collection", &json!({"qualifiedName": "q", "displayName": "A"})).unwrap();
        assert_eq!(a, b);
        assert_eq!(a.to_string(), b.to_string());
        assert!(a.to_string().starts_with("{\"kind\":\"collection\""));
    }

    #[test]
    fn test_kind_from_str() {
        assert_eq!("supply-chain-segment".parse::<ElementKind>().unwrap(), ElementKind::SupplyChainSegment);
        assert!("nope".parse::<ElementKind>().is_err());
    }
}
