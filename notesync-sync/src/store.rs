//! Remote store access.
//!
//! [`RemoteStore`] is the only view the sync engine has of the store: read
//! every note, write many notes in one call, delete one note, and read or
//! write the metadata document. [`FirebaseStore`] implements it over the
//! Realtime Database REST API:
//!
//! | operation         | request                              |
//! |-------------------|--------------------------------------|
//! | `fetch_all`       | `GET    {db}/{notes}.json`           |
//! | `update_many`     | `PATCH  {db}/{notes}.json`           |
//! | `delete`          | `DELETE {db}/{notes}/{key}.json`     |
//! | `update_metadata` | `PATCH  {db}/{metadata}.json`        |
//! | `fetch_metadata`  | `GET    {db}/{metadata}.json`        |

use std::collections::BTreeMap;

use serde_json::{Map, Value};

use notesync_core::{Config, StorageKey, SyncMetadata};

use crate::error::{store_err, StoreError};

/// Flat key-value document store holding one entry per note.
pub trait RemoteStore {
    /// Every stored note entry, keyed by storage key. An empty namespace is an
    /// empty map.
    fn fetch_all(&self) -> Result<BTreeMap<String, Value>, StoreError>;

    /// Write several entries in one request. Keys are storage keys.
    fn update_many(&self, entries: &Map<String, Value>) -> Result<(), StoreError>;

    /// Remove one entry.
    fn delete(&self, key: &StorageKey) -> Result<(), StoreError>;

    /// Merge `fields` into the metadata document.
    fn update_metadata(&self, fields: &Map<String, Value>) -> Result<(), StoreError>;

    /// The metadata document, or `None` if nothing has synced yet.
    fn fetch_metadata(&self) -> Result<Option<SyncMetadata>, StoreError>;
}

/// Realtime Database client.
#[derive(Debug, Clone)]
pub struct FirebaseStore {
    agent: ureq::Agent,
    base_url: String,
    notes_path: String,
    metadata_path: String,
}

impl FirebaseStore {
    /// Build a client from validated configuration. No request is made.
    pub fn new(config: &Config) -> Self {
        let agent = ureq::AgentBuilder::new()
            .timeout(config.request_timeout())
            .build();
        Self {
            agent,
            base_url: config.database_url.trim().trim_end_matches('/').to_string(),
            notes_path: config.notes_path.trim_matches('/').to_string(),
            metadata_path: config.metadata_path.trim_matches('/').to_string(),
        }
    }

    /// Build a client and check the database answers by reading metadata.
    pub fn connect(config: &Config) -> Result<Self, StoreError> {
        let store = Self::new(config);
        store.fetch_metadata()?;
        Ok(store)
    }

    fn url(&self, segments: &[&str]) -> String {
        format!("{}/{}.json", self.base_url, segments.join("/"))
    }

    fn get(&self, url: &str) -> Result<Value, StoreError> {
        let response = self
            .agent
            .get(url)
            .call()
            .map_err(|e| store_err("GET", url, e))?;
        response.into_json().map_err(|source| StoreError::Body {
            url: url.to_string(),
            source,
        })
    }

    fn patch(&self, url: &str, body: &Map<String, Value>) -> Result<(), StoreError> {
        self.agent
            .request("PATCH", url)
            .send_json(body)
            .map_err(|e| store_err("PATCH", url, e))?;
        Ok(())
    }
}

impl RemoteStore for FirebaseStore {
    fn fetch_all(&self) -> Result<BTreeMap<String, Value>, StoreError> {
        let url = self.url(&[&self.notes_path]);
        Ok(children(self.get(&url)?))
    }

    fn update_many(&self, entries: &Map<String, Value>) -> Result<(), StoreError> {
        self.patch(&self.url(&[&self.notes_path]), entries)
    }

    fn delete(&self, key: &StorageKey) -> Result<(), StoreError> {
        // Keys written by other clients may hold `?`, `%` or spaces.
        let segment = urlencoding::encode(key.as_str());
        let url = self.url(&[&self.notes_path, &segment]);
        self.agent
            .delete(&url)
            .call()
            .map_err(|e| store_err("DELETE", &url, e))?;
        Ok(())
    }

    fn update_metadata(&self, fields: &Map<String, Value>) -> Result<(), StoreError> {
        self.patch(&self.url(&[&self.metadata_path]), fields)
    }

    fn fetch_metadata(&self) -> Result<Option<SyncMetadata>, StoreError> {
        let url = self.url(&[&self.metadata_path]);
        match self.get(&url)? {
            Value::Null => Ok(None),
            value => Ok(Some(serde_json::from_value(value)?)),
        }
    }
}

/// Children of a namespace read.
///
/// The database answers `null` for an empty namespace and may answer an
/// array when every key is a small integer; both are folded into a map.
pub fn children(value: Value) -> BTreeMap<String, Value> {
    match value {
        Value::Object(map) => map.into_iter().collect(),
        Value::Array(items) => items
            .into_iter()
            .enumerate()
            .filter(|(_, item)| !item.is_null())
            .map(|(index, item)| (index.to_string(), item))
            .collect(),
        _ => BTreeMap::new(),
    }
}

#[cfg(test)]
mod tests {
    use std::io::{Read, Write};
    use std::net::TcpListener;
    use std::thread::JoinHandle;

    use serde_json::json;

    use super::*;

    /// Answer exactly one HTTP request with `status` and `body`; the handle
    /// yields the raw request text.
    fn serve_once(status: &'static str, body: &'static str) -> (String, JoinHandle<String>) {
        let listener = TcpListener::bind("127.0.0.1:0").expect("bind");
        let url = format!("http://{}", listener.local_addr().expect("addr"));
        let handle = std::thread::spawn(move || {
            let (mut stream, _) = listener.accept().expect("accept");
            let mut request = Vec::new();
            let mut buf = [0u8; 4096];
            loop {
                let n = stream.read(&mut buf).expect("read");
                request.extend_from_slice(&buf[..n]);
                let text = String::from_utf8_lossy(&request).to_string();
                if let Some(header_end) = text.find("\r\n\r\n") {
                    let length = text[..header_end]
                        .lines()
                        .find_map(|l| {
                            l.to_ascii_lowercase()
                                .strip_prefix("content-length:")
                                .map(|v| v.trim().parse::<usize>().unwrap_or(0))
                        })
                        .unwrap_or(0);
                    if request.len() >= header_end + 4 + length {
                        break;
                    }
                }
                if n == 0 {
                    break;
                }
            }
            let response = format!(
                "HTTP/1.1 {status}\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{body}",
                body.len()
            );
            stream.write_all(response.as_bytes()).expect("write");
            String::from_utf8_lossy(&request).to_string()
        });
        (url, handle)
    }

    fn store_at(url: &str) -> FirebaseStore {
        FirebaseStore::new(&Config::new(url))
    }

    #[test]
    fn urls_join_namespace_and_key() {
        let store = store_at("https://notes.firebaseio.com/");
        assert_eq!(store.url(&["notes"]), "https://notes.firebaseio.com/notes.json");
        assert_eq!(
            store.url(&["notes", "x-coredata:__A_ICNote_p1"]),
            "https://notes.firebaseio.com/notes/x-coredata:__A_ICNote_p1.json"
        );
    }

    #[test]
    fn children_folds_null_and_arrays() {
        assert!(children(Value::Null).is_empty());
        let folded = children(json!([null, { "id": "one" }, { "id": "two" }]));
        assert_eq!(folded.keys().cloned().collect::<Vec<_>>(), vec!["1", "2"]);
        let object = children(json!({ "k": { "id": "v" } }));
        assert_eq!(object["k"]["id"], "v");
    }

    #[test]
    fn fetch_all_reads_the_notes_namespace() {
        let (url, server) = serve_once("200 OK", r#"{"p1":{"id":"p1","updated_date":"T1"}}"#);
        let entries = store_at(&url).fetch_all().expect("fetch_all");
        assert_eq!(entries["p1"]["updated_date"], "T1");
        let request = server.join().expect("server");
        assert!(request.starts_with("GET /notes.json"), "got {request}");
    }

    #[test]
    fn update_many_patches_with_json_body() {
        let (url, server) = serve_once("200 OK", "{}");
        let mut entries = Map::new();
        entries.insert("p1".to_string(), json!({ "id": "p1" }));
        store_at(&url).update_many(&entries).expect("update");
        let request = server.join().expect("server");
        assert!(request.starts_with("PATCH /notes.json"), "got {request}");
        assert!(request.contains(r#"{"p1":{"id":"p1"}}"#), "got {request}");
    }

    #[test]
    fn delete_addresses_one_key() {
        let (url, server) = serve_once("200 OK", "null");
        store_at(&url)
            .delete(&StorageKey::from("p9"))
            .expect("delete");
        let request = server.join().expect("server");
        assert!(request.starts_with("DELETE /notes/p9.json"), "got {request}");
    }

    #[test]
    fn delete_percent_encodes_the_key() {
        let (url, server) = serve_once("200 OK", "null");
        store_at(&url)
            .delete(&StorageKey::from("50% off?x=1 #2"))
            .expect("delete");
        let request = server.join().expect("server");
        assert!(
            request.starts_with("DELETE /notes/50%25%20off%3Fx%3D1%20%232.json "),
            "got {request}"
        );
    }

    #[test]
    fn empty_metadata_is_none() {
        let (url, server) = serve_once("200 OK", "null");
        assert_eq!(store_at(&url).fetch_metadata().expect("metadata"), None);
        server.join().expect("server");
    }

    #[test]
    fn http_error_status_is_reported() {
        let (url, server) = serve_once("401 Unauthorized", r#"{"error":"Permission denied"}"#);
        let err = store_at(&url).fetch_all().unwrap_err();
        match err {
            StoreError::Status { status, body, .. } => {
                assert_eq!(status, 401);
                assert!(body.contains("Permission denied"));
            }
            other => panic!("expected status error, got {other:?}"),
        }
        server.join().expect("server");
    }
}
