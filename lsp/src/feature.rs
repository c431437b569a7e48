//! Dynamic features: pluggable protocol behavior attached to a client.
//!
//! The client calls a feature at fixed points: while building the initialize
//! request ([`DynamicFeature::fill_client_capabilities`]), right after the
//! handshake ([`DynamicFeature::initialize`]), when the server (un)registers a
//! capability matching [`DynamicFeature::registration_method`], and when the
//! client stops ([`DynamicFeature::dispose`]).

use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};

use serde::Deserialize;
use serde_json::{Map, Value};

use crate::types::DocumentSelector;

pub type NotificationHandler = Arc<dyn Fn(Option<Value>) + Send + Sync>;

/// Server notification subscriptions, shared with the client's reader task.
#[derive(Clone, Default)]
pub struct NotificationRegistry {
    handlers: Arc<RwLock<HashMap<String, NotificationHandler>>>,
}

impl NotificationRegistry {
    /// Subscribe to `method`. A later subscription to the same method replaces
    /// the earlier one.
    pub fn on_notification<F>(&self, method: impl Into<String>, handler: F)
    where
        F: Fn(Option<Value>) + Send + Sync + 'static,
    {
        self.handlers
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(method.into(), Arc::new(handler));
    }

    #[must_use]
    pub fn is_registered(&self, method: &str) -> bool {
        self.handlers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .contains_key(method)
    }

    pub(crate) fn handler(&self, method: &str) -> Option<NotificationHandler> {
        self.handlers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(method)
            .cloned()
    }

    pub(crate) fn clear(&self) {
        self.handlers
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
    }
}

/// One entry of a `client/registerCapability` request.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RegistrationData {
    pub id: String,
    pub method: String,
    #[serde(default)]
    pub register_options: Option<Value>,
}

pub trait DynamicFeature: Send + Sync {
    /// Method this feature accepts dynamic registrations for, if any.
    fn registration_method(&self) -> Option<&str> {
        None
    }

    /// Contribute to the `capabilities` object of the initialize request.
    fn fill_client_capabilities(&self, capabilities: &mut Value);

    fn initialize(
        &self,
        server_capabilities: &Value,
        document_selector: &DocumentSelector,
        notifications: &NotificationRegistry,
    );

    fn register(&self, data: RegistrationData);

    fn unregister(&self, id: &str);

    fn dispose(&self);
}

/// Set `capabilities[section][key]`, creating or replacing `section` when it
/// is not an object. Other entries of the section are kept.
pub fn set_capability(capabilities: &mut Value, section: &str, key: &str, value: Value) {
    if !capabilities.is_object() {
        *capabilities = Value::Object(Map::new());
    }
    let entry = &mut capabilities[section];
    if !entry.is_object() {
        *entry = Value::Object(Map::new());
    }
    entry[key] = value;
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn set_capability_merges_into_existing_section() {
        let mut caps = serde_json::json!({ "experimental": { "other": 1 } });
        set_capability(&mut caps, "experimental", "flag", Value::Bool(true));
        assert_eq!(caps["experimental"]["other"], 1);
        assert_eq!(caps["experimental"]["flag"], true);
    }

    #[test]
    fn set_capability_creates_missing_section() {
        let mut caps = Value::Null;
        set_capability(&mut caps, "experimental", "flag", Value::Bool(true));
        assert_eq!(caps, serde_json::json!({ "experimental": { "flag": true } }));
    }

    #[test]
    fn registry_routes_to_latest_handler() {
        let registry = NotificationRegistry::default();
        let hits = Arc::new(AtomicUsize::new(0));

        registry.on_notification("custom/a", |_| panic!("replaced handler must not run"));
        let counter = hits.clone();
        registry.on_notification("custom/a", move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        });

        assert!(registry.is_registered("custom/a"));
        assert!(registry.handler("custom/b").is_none());
        (registry.handler("custom/a").unwrap())(None);
        assert_eq!(hits.load(Ordering::SeqCst), 1);

        registry.clear();
        assert!(!registry.is_registered("custom/a"));
    }

    #[test]
    fn registration_data_deserializes_camel_case() {
        let data: RegistrationData = serde_json::from_value(serde_json::json!({
            "id": "r1",
            "method": "workspace/didChangeWatchedFiles",
            "registerOptions": { "watchers": [] }
        }))
        .unwrap();
        assert_eq!(data.id, "r1");
        assert!(data.register_options.is_some());
    }
}
