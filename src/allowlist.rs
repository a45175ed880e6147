use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

use anyhow::{Context, Result};
use jsonschema::JSONSchema;
use serde::Deserialize;
use serde_json::Value;

use crate::ir::{ClassRecord, MethodRecord, OBJECT_CLASS, internal_name};

/// JSON Schema every platform catalogue must satisfy.
const CATALOGUE_SCHEMA: &str = r##"{
  "type": "object",
  "additionalProperties": {
    "oneOf": [
      { "type": "array", "items": { "$ref": "#/definitions/method" } },
      {
        "type": "object",
        "properties": {
          "superclass": { "type": ["string", "null"] },
          "interfaces": { "type": "array", "items": { "type": "string" } },
          "interface": { "type": "boolean" },
          "abstract": { "type": "boolean" },
          "methods": { "type": "array", "items": { "$ref": "#/definitions/method" } }
        },
        "additionalProperties": false
      }
    ]
  },
  "definitions": {
    "method": {
      "type": "object",
      "required": ["name", "descriptor"],
      "properties": {
        "name": { "type": "string", "minLength": 1 },
        "descriptor": { "type": "string", "pattern": "^\\(.*\\).+$" },
        "static": { "type": "boolean" }
      },
      "additionalProperties": false
    }
  }
}"##;

#[derive(Deserialize)]
#[serde(untagged)]
enum CatalogueEntry {
    Methods(Vec<CatalogueMethod>),
    Class(CatalogueClass),
}

#[derive(Deserialize)]
struct CatalogueClass {
    #[serde(default)]
    superclass: Option<String>,
    #[serde(default)]
    interfaces: Vec<String>,
    #[serde(default)]
    interface: bool,
    #[serde(default, rename = "abstract")]
    is_abstract: bool,
    #[serde(default)]
    methods: Vec<CatalogueMethod>,
}

#[derive(Deserialize)]
struct CatalogueMethod {
    name: String,
    descriptor: String,
    #[serde(default, rename = "static")]
    is_static: bool,
}

/// Trusted surface of one platform class.
#[derive(Clone, Debug)]
struct PlatformClass {
    name: String,
    superclass: Option<String>,
    interfaces: Vec<String>,
    is_interface: bool,
    is_abstract: bool,
    /// Method identifier to static flag.
    methods: BTreeMap<String, bool>,
}

/// Read-only map of platform classes whose source is not analyzed but whose surface is trusted.
#[derive(Clone, Debug, Default)]
pub(crate) struct Allowlist {
    classes: BTreeMap<String, PlatformClass>,
}

impl Allowlist {
    pub(crate) fn load(path: &Path) -> Result<Self> {
        let text = fs::read_to_string(path)
            .with_context(|| format!("failed to read {}", path.display()))?;
        Self::from_json(&text).with_context(|| format!("invalid allowlist {}", path.display()))
    }

    pub(crate) fn from_json(text: &str) -> Result<Self> {
        let value: Value = serde_json::from_str(text).context("failed to parse catalogue JSON")?;
        validate_catalogue(&value)?;
        let catalogue: BTreeMap<String, CatalogueEntry> =
            serde_json::from_value(value).context("failed to decode catalogue")?;

        let mut classes = BTreeMap::new();
        for (raw_name, entry) in catalogue {
            let name = internal_name(&raw_name);
            let class = match entry {
                CatalogueEntry::Methods(methods) => PlatformClass {
                    superclass: default_superclass(&name),
                    interfaces: Vec::new(),
                    is_interface: false,
                    is_abstract: false,
                    methods: method_map(methods),
                    name: name.clone(),
                },
                CatalogueEntry::Class(class) => PlatformClass {
                    superclass: class
                        .superclass
                        .as_deref()
                        .map(internal_name)
                        .or_else(|| default_superclass(&name)),
                    interfaces: class.interfaces.iter().map(|i| internal_name(i)).collect(),
                    is_interface: class.interface,
                    is_abstract: class.is_abstract || class.interface,
                    methods: method_map(class.methods),
                    name: name.clone(),
                },
            };
            if classes.insert(name.clone(), class).is_some() {
                anyhow::bail!("platform class {name} listed twice");
            }
        }
        Ok(Self { classes })
    }

    pub(crate) fn contains(&self, class: &str) -> bool {
        self.classes.contains_key(class)
    }

    pub(crate) fn len(&self) -> usize {
        self.classes.len()
    }

    /// System-class stub for the hierarchy graph.
    pub(crate) fn to_record(&self, class: &str) -> Option<ClassRecord> {
        let platform = self.classes.get(class)?;
        let mut record = ClassRecord::new(&platform.name, platform.superclass.clone());
        record.interfaces = platform.interfaces.clone();
        record.is_interface = platform.is_interface;
        record.is_abstract = platform.is_abstract;
        record.is_system_class = true;
        for (identifier, is_static) in &platform.methods {
            let (name, descriptor) = split_identifier(identifier);
            record.add_method(MethodRecord::new(name, descriptor, *is_static));
        }
        Some(record)
    }
}

fn validate_catalogue(value: &Value) -> Result<()> {
    let schema: Value = serde_json::from_str(CATALOGUE_SCHEMA).context("catalogue schema")?;
    let compiled = JSONSchema::compile(&schema)
        .map_err(|error| anyhow::anyhow!("invalid catalogue schema: {error}"))?;
    if let Err(errors) = compiled.validate(value) {
        let messages: Vec<String> = errors.map(|error| error.to_string()).collect();
        anyhow::bail!("catalogue does not match schema: {}", messages.join("; "));
    }
    Ok(())
}

fn default_superclass(name: &str) -> Option<String> {
    (name != OBJECT_CLASS).then(|| OBJECT_CLASS.to_string())
}

fn method_map(methods: Vec<CatalogueMethod>) -> BTreeMap<String, bool> {
    methods
        .into_iter()
        .map(|method| (format!("{}{}", method.name, method.descriptor), method.is_static))
        .collect()
}

fn split_identifier(identifier: &str) -> (&str, &str) {
    match identifier.find('(') {
        Some(index) => identifier.split_at(index),
        None => (identifier, ""),
    }
}
