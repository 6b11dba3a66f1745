//! Resources loaded from a thing description.
//!
//! Each property, action and event becomes a [`Resource`]: a locator per
//! interaction verb plus the schema its payloads follow. Actions take their
//! schema from `input`, events from `data`, properties from the affordance itself.

use super::locator::{DeviceAddress, OperationKind, ResourceLocator, Scheme, Verb};
use super::schema::ResourceSchema;
use crate::error::{BindingError, BindingResult};
use serde_json::{Map, Value as Json};
use std::collections::{BTreeMap, BTreeSet};
use tracing::debug;

const METHOD_NAME_KEYS: &[&str] = &["sbo:methodName", "bt:methodName", "bir:methodName", "methodName"];
/// Keys whose presence means an affordance describes its own payload.
const SCHEMA_KEYS: &[&str] = &["type", "dataformat", "pattern", "properties"];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AffordanceKind {
    Property,
    Action,
    Event,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Resource {
    pub name: String,
    pub kind: AffordanceKind,
    pub schema: Option<ResourceSchema>,
    forms: Vec<(Verb, ResourceLocator)>,
}

impl Resource {
    /// A resource with a single form.
    pub fn new(
        name: impl Into<String>,
        kind: AffordanceKind,
        verb: Verb,
        locator: ResourceLocator,
        schema: Option<ResourceSchema>,
    ) -> Self {
        let locator = match locator.operation {
            Some(_) => locator,
            None => locator.with_operation(verb.default_operation()),
        };
        Self {
            name: name.into(),
            kind,
            schema,
            forms: vec![(verb, locator)],
        }
    }

    /// Locator to use for `verb`.
    pub fn form(&self, verb: Verb) -> BindingResult<&ResourceLocator> {
        self.forms
            .iter()
            .find(|(v, _)| *v == verb)
            .map(|(_, locator)| locator)
            .ok_or_else(|| {
                BindingError::Operation(format!("'{}' has no form for {:?}", self.name, verb))
            })
    }

    pub fn forms(&self) -> impl Iterator<Item = (Verb, &ResourceLocator)> {
        self.forms.iter().map(|(v, l)| (*v, l))
    }

    /// Devices this resource reaches over a GATT connection.
    pub fn gatt_devices(&self) -> impl Iterator<Item = DeviceAddress> + '_ {
        self.forms
            .iter()
            .filter(|(_, l)| l.scheme == Scheme::Gatt)
            .map(|(_, l)| l.device)
    }

    /// Schema for decoding or encoding, failing when the description has none.
    pub fn schema(&self) -> BindingResult<&ResourceSchema> {
        self.schema
            .as_ref()
            .ok_or_else(|| BindingError::Description(format!("'{}' declares no payload schema", self.name)))
    }
}

/// Every resource of one thing description.
#[derive(Debug, Clone, Default)]
pub struct ResourceCatalog {
    pub title: Option<String>,
    properties: BTreeMap<String, Resource>,
    actions: BTreeMap<String, Resource>,
    events: BTreeMap<String, Resource>,
}

impl ResourceCatalog {
    pub fn from_thing_description(td: &Json) -> BindingResult<Self> {
        let root = td
            .as_object()
            .ok_or_else(|| BindingError::Description("thing description must be an object".into()))?;

        let mut catalog = Self {
            title: root.get("title").and_then(Json::as_str).map(str::to_string),
            ..Default::default()
        };

        for (section, kind) in [
            ("properties", AffordanceKind::Property),
            ("actions", AffordanceKind::Action),
            ("events", AffordanceKind::Event),
        ] {
            let Some(affordances) = root.get(section).and_then(Json::as_object) else {
                continue;
            };
            for (name, affordance) in affordances {
                let resource = load_affordance(name, kind, affordance)?;
                debug!(
                    "Loaded {:?} '{}' with {} form(s)",
                    kind,
                    name,
                    resource.forms.len()
                );
                let target = match kind {
                    AffordanceKind::Property => &mut catalog.properties,
                    AffordanceKind::Action => &mut catalog.actions,
                    AffordanceKind::Event => &mut catalog.events,
                };
                target.insert(name.clone(), resource);
            }
        }
        Ok(catalog)
    }

    pub fn property(&self, name: &str) -> BindingResult<&Resource> {
        lookup(&self.properties, name, "property")
    }

    pub fn action(&self, name: &str) -> BindingResult<&Resource> {
        lookup(&self.actions, name, "action")
    }

    pub fn event(&self, name: &str) -> BindingResult<&Resource> {
        lookup(&self.events, name, "event")
    }

    pub fn resources(&self) -> impl Iterator<Item = &Resource> {
        self.properties
            .values()
            .chain(self.actions.values())
            .chain(self.events.values())
    }

    /// Every device this description connects to. Advertisement-only devices are left out.
    pub fn gatt_devices(&self) -> BTreeSet<DeviceAddress> {
        self.resources().flat_map(Resource::gatt_devices).collect()
    }
}

fn lookup<'a>(map: &'a BTreeMap<String, Resource>, name: &str, what: &str) -> BindingResult<&'a Resource> {
    map.get(name)
        .ok_or_else(|| BindingError::Description(format!("no {what} named '{name}'")))
}

fn load_affordance(name: &str, kind: AffordanceKind, affordance: &Json) -> BindingResult<Resource> {
    let obj = affordance
        .as_object()
        .ok_or_else(|| BindingError::Description(format!("'{name}' must be an object")))?;

    let schema_json = match kind {
        AffordanceKind::Property => Some(affordance),
        AffordanceKind::Action => obj.get("input"),
        AffordanceKind::Event => obj.get("data"),
    };
    let schema = match schema_json {
        Some(json) if describes_payload(json) => Some(ResourceSchema::from_json(json)?),
        _ => None,
    };

    let forms_json = obj
        .get("forms")
        .and_then(Json::as_array)
        .filter(|forms| !forms.is_empty())
        .ok_or_else(|| BindingError::Description(format!("'{name}' has no forms")))?;

    let mut forms = Vec::new();
    for form in forms_json {
        let form = form
            .as_object()
            .ok_or_else(|| BindingError::Description(format!("form of '{name}' must be an object")))?;
        let href = form
            .get("href")
            .and_then(Json::as_str)
            .ok_or_else(|| BindingError::Description(format!("form of '{name}' has no href")))?;

        let mut base = ResourceLocator::parse(href)?;
        if let Some(content_type) = form.get("contentType").and_then(Json::as_str) {
            base = base.with_content_type(content_type);
        }
        let method = method_name(form)?;

        for verb in form_verbs(form, kind, obj)? {
            // Earlier forms win, matching first-form selection.
            if forms.iter().any(|(v, _)| *v == verb) {
                continue;
            }
            let locator = match (method, base.operation) {
                (Some(op), _) => base.clone().with_operation(op),
                (None, Some(_)) => base.clone(),
                (None, None) => base.clone().with_operation(verb.default_operation()),
            };
            forms.push((verb, locator));
        }
    }

    Ok(Resource {
        name: name.to_string(),
        kind,
        schema,
        forms,
    })
}

fn describes_payload(json: &Json) -> bool {
    json.as_object().is_some_and(|obj| {
        obj.keys().any(|key| {
            let bare = key.rsplit(':').next().unwrap_or(key).to_ascii_lowercase();
            SCHEMA_KEYS.contains(&bare.as_str())
                || bare == "receiveddataformat"
                || bare == "expecteddataformat"
        })
    })
}

fn method_name(form: &Map<String, Json>) -> BindingResult<Option<OperationKind>> {
    let Some(raw) = METHOD_NAME_KEYS
        .iter()
        .find_map(|key| form.get(*key))
        .and_then(Json::as_str)
    else {
        return Ok(None);
    };
    OperationKind::from_method_name(raw)
        .map(Some)
        .ok_or_else(|| BindingError::Operation(format!("unknown BLE method '{raw}'")))
}

fn form_verbs(
    form: &Map<String, Json>,
    kind: AffordanceKind,
    affordance: &Map<String, Json>,
) -> BindingResult<Vec<Verb>> {
    let ops: Vec<&str> = match form.get("op") {
        Some(Json::String(op)) => vec![op.as_str()],
        Some(Json::Array(ops)) => ops.iter().filter_map(Json::as_str).collect(),
        _ => Vec::new(),
    };

    if !ops.is_empty() {
        return ops
            .into_iter()
            .map(|op| {
                Verb::from_op(op).ok_or_else(|| BindingError::Operation(format!("unsupported op '{op}'")))
            })
            .collect();
    }

    let flag = |key: &str| affordance.get(key).and_then(Json::as_bool).unwrap_or(false);
    Ok(match kind {
        AffordanceKind::Property if flag("readOnly") => vec![Verb::ReadProperty],
        AffordanceKind::Property if flag("writeOnly") => vec![Verb::WriteProperty],
        AffordanceKind::Property => vec![Verb::ReadProperty, Verb::WriteProperty],
        AffordanceKind::Action => vec![Verb::InvokeAction],
        AffordanceKind::Event => vec![Verb::SubscribeEvent],
    })
}
