//! Internal LSP message shapes for JSON-RPC communication.

use std::path::{Path, PathBuf};

use serde::Serialize;
use serde_json::Value;

use crate::types::FileChangeKind;

pub(crate) const METHOD_NOT_FOUND: i64 = -32601;

#[derive(Debug, thiserror::Error)]
#[error("cannot convert path to file URI: {}", path.display())]
pub struct PathToUriError {
    path: PathBuf,
}

#[derive(Debug, Serialize)]
pub(crate) struct Request {
    pub jsonrpc: &'static str,
    pub id: u64,
    pub method: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub params: Option<Value>,
}

impl Request {
    pub fn new(id: u64, method: &'static str, params: Option<Value>) -> Self {
        Self {
            jsonrpc: "2.0",
            id,
            method,
            params,
        }
    }
}

#[derive(Debug, Serialize)]
pub(crate) struct Notification {
    pub jsonrpc: &'static str,
    pub method: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub params: Option<Value>,
}

impl Notification {
    pub fn new(method: &'static str, params: Option<Value>) -> Self {
        Self {
            jsonrpc: "2.0",
            method,
            params,
        }
    }
}

/// Reply to a server-initiated request.
pub(crate) fn response(id: Value, result: Value) -> Value {
    serde_json::json!({ "jsonrpc": "2.0", "id": id, "result": result })
}

pub(crate) fn method_not_found(id: Value, method: &str) -> Value {
    serde_json::json!({
        "jsonrpc": "2.0",
        "id": id,
        "error": {
            "code": METHOD_NOT_FOUND,
            "message": format!("Method not found: {method}")
        }
    })
}

/// Base client capabilities before dynamic features contribute theirs.
pub(crate) fn base_client_capabilities() -> Value {
    serde_json::json!({
        "textDocument": {
            "synchronization": {
                "dynamicRegistration": false,
                "willSave": false,
                "willSaveWaitUntil": false,
                "didSave": true
            }
        },
        "workspace": {
            "configuration": true,
            "didChangeWatchedFiles": {
                "dynamicRegistration": false
            }
        }
    })
}

pub(crate) fn initialize_params(
    client_name: &str,
    root_uri: Option<&str>,
    capabilities: Value,
) -> Value {
    let workspace_folders = root_uri.map_or(Value::Null, |uri| {
        serde_json::json!([{ "uri": uri, "name": "workspace" }])
    });
    serde_json::json!({
        "processId": std::process::id(),
        "clientInfo": { "name": client_name, "version": env!("CARGO_PKG_VERSION") },
        "rootUri": root_uri,
        "capabilities": capabilities,
        "workspaceFolders": workspace_folders
    })
}

pub(crate) fn did_open_params(uri: &str, language_id: &str, version: i32, text: &str) -> Value {
    serde_json::json!({
        "textDocument": {
            "uri": uri,
            "languageId": language_id,
            "version": version,
            "text": text
        }
    })
}

pub(crate) fn did_change_params(uri: &str, version: i32, text: &str) -> Value {
    serde_json::json!({
        "textDocument": { "uri": uri, "version": version },
        "contentChanges": [{ "text": text }]
    })
}

pub(crate) fn text_document_params(uri: &str) -> Value {
    serde_json::json!({ "textDocument": { "uri": uri } })
}

pub(crate) fn did_change_watched_files_params(changes: &[(String, FileChangeKind)]) -> Value {
    let changes: Vec<Value> = changes
        .iter()
        .map(|(uri, kind)| serde_json::json!({ "uri": uri, "type": kind.lsp_code() }))
        .collect();
    serde_json::json!({ "changes": changes })
}

pub fn path_to_file_uri(path: &Path) -> Result<url::Url, PathToUriError> {
    url::Url::from_file_path(path).map_err(|()| PathToUriError {
        path: path.to_path_buf(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn initialize_params_carry_capabilities_and_root() {
        let caps = serde_json::json!({ "experimental": { "supportsShowHTML": true } });
        let params = initialize_params("JimpleLSP", Some("file:///ws"), caps);
        assert!(params["processId"].is_number());
        assert_eq!(params["clientInfo"]["name"], "JimpleLSP");
        assert_eq!(params["rootUri"], "file:///ws");
        assert_eq!(params["workspaceFolders"][0]["uri"], "file:///ws");
        assert_eq!(params["capabilities"]["experimental"]["supportsShowHTML"], true);
    }

    #[test]
    fn initialize_params_without_workspace_use_nulls() {
        let params = initialize_params("JimpleLSP", None, base_client_capabilities());
        assert!(params["rootUri"].is_null());
        assert!(params["workspaceFolders"].is_null());
        assert_eq!(
            params["capabilities"]["textDocument"]["synchronization"]["didSave"],
            true
        );
    }

    #[test]
    fn base_capabilities_advertise_configuration_pull() {
        let caps = base_client_capabilities();
        assert_eq!(caps["workspace"]["configuration"], true);
        assert_eq!(
            caps["workspace"]["didChangeWatchedFiles"]["dynamicRegistration"],
            false
        );
    }

    #[test]
    fn document_params() {
        let open = did_open_params("file:///a.jimple", "jimple", 1, "class A {}");
        assert_eq!(open["textDocument"]["languageId"], "jimple");
        assert_eq!(open["textDocument"]["version"], 1);

        let change = did_change_params("file:///a.jimple", 4, "class B {}");
        assert_eq!(change["textDocument"]["version"], 4);
        assert_eq!(change["contentChanges"][0]["text"], "class B {}");

        assert_eq!(
            text_document_params("file:///a.jimple")["textDocument"]["uri"],
            "file:///a.jimple"
        );
    }

    #[test]
    fn watched_file_changes_use_lsp_codes() {
        let params = did_change_watched_files_params(&[
            ("file:///a.jimple".to_string(), FileChangeKind::Created),
            ("file:///b.apk".to_string(), FileChangeKind::Changed),
            ("file:///c.jar".to_string(), FileChangeKind::Deleted),
        ]);
        let types: Vec<i64> = params["changes"]
            .as_array()
            .unwrap()
            .iter()
            .map(|c| c["type"].as_i64().unwrap())
            .collect();
        assert_eq!(types, vec![1, 2, 3]);
    }

    #[test]
    fn request_omits_absent_params() {
        let json = serde_json::to_value(Request::new(1, "shutdown", None)).unwrap();
        assert_eq!(json["method"], "shutdown");
        assert!(json.get("params").is_none());

        let json = serde_json::to_value(Notification::new("exit", None)).unwrap();
        assert!(json.get("id").is_none());
        assert!(json.get("params").is_none());
    }

    #[test]
    fn method_not_found_names_the_method() {
        let reply = method_not_found(serde_json::json!(3), "workspace/applyEdit");
        assert_eq!(reply["id"], 3);
        assert_eq!(reply["error"]["code"], METHOD_NOT_FOUND);
        assert!(
            reply["error"]["message"]
                .as_str()
                .unwrap()
                .contains("workspace/applyEdit")
        );
    }
}
