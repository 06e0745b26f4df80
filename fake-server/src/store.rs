//! In-memory records behind the fake knowledge API.
//!
//! Only the rules the conformance scenarios probe are modelled: referential
//! checks, uniqueness, cascades and the optional subsystems.

use crate::{Error, Result};
use serde_json::{Map, Value, json};
use std::{
    collections::BTreeMap,
    sync::{
        Mutex,
        atomic::{AtomicBool, Ordering},
    },
};
use uuid::Uuid;

/// Shortest passphrase a keyset accepts.
pub const MIN_PASSPHRASE_LENGTH: usize = 12;

#[derive(Debug, Clone)]
pub struct Options {
    /// Whether scheduled backups are set up in this deployment.
    pub backups_configured: bool,
    /// Whether public-key encryption is set up in this deployment.
    pub encryption_configured: bool,
    /// Whether the caller presented a credential.
    pub authenticated: bool,
}

impl Default for Options {
    fn default() -> Self {
        Self {
            backups_configured: false,
            encryption_configured: true,
            authenticated: true,
        }
    }
}

/// One successful delete, in the order it happened.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Deletion {
    pub kind: &'static str,
    pub id: String,
}

#[derive(Debug, Clone)]
struct Note {
    content: String,
    tags: Vec<String>,
    collection_id: Option<String>,
}

#[derive(Debug, Clone)]
struct Collection {
    name: String,
    description: Option<String>,
}

#[derive(Debug, Clone)]
struct Link {
    from_id: String,
    to_id: String,
    kind: String,
}

#[derive(Debug, Clone)]
struct Template {
    name: String,
    content: String,
}

#[derive(Debug, Clone)]
struct Scheme {
    notation: String,
}

#[derive(Debug, Clone)]
struct Concept {
    scheme_id: String,
    pref_label: String,
}

#[derive(Debug, Clone)]
struct Job {
    note_id: String,
    job_type: String,
}

#[derive(Debug, Default)]
struct Inner {
    notes: BTreeMap<String, Note>,
    collections: BTreeMap<String, Collection>,
    links: BTreeMap<String, Link>,
    templates: BTreeMap<String, Template>,
    schemes: BTreeMap<String, Scheme>,
    concepts: BTreeMap<String, Concept>,
    jobs: BTreeMap<String, Job>,
    keysets: BTreeMap<String, String>,
    deletions: Vec<Deletion>,
}

impl Inner {
    fn note(&self, id: &str) -> Result<&Note> {
        self.notes.get(id).ok_or_else(|| Error::not_found("note", id))
    }

    fn deleted(&mut self, kind: &'static str, id: &str) -> Value {
        self.deletions.push(Deletion {
            kind,
            id: id.to_string(),
        });
        json!({ "deleted": true, "id": id })
    }
}

fn new_id() -> String {
    Uuid::new_v4().to_string()
}

fn note_json(id: &str, note: &Note) -> Value {
    json!({
        "id": id,
        "tags": note.tags,
        "collection_id": note.collection_id,
        "original": { "content": note.content },
    })
}

fn link_json(id: &str, link: &Link) -> Value {
    json!({
        "id": id,
        "from_id": link.from_id,
        "to_id": link.to_id,
        "kind": link.kind,
    })
}

/// Replaces `{{name}}` placeholders with the matching variables.
pub fn render(template: &str, variables: &Map<String, Value>) -> String {
    variables.iter().fold(template.to_string(), |text, (name, value)| {
        let replacement = match value {
            Value::String(s) => s.clone(),
            other => other.to_string(),
        };
        text.replace(&format!("{{{{{name}}}}}"), &replacement)
    })
}

#[derive(Debug, Default)]
pub struct Store {
    inner: Mutex<Inner>,
    options: Options,
    stalled: AtomicBool,
}

impl Store {
    pub fn new(options: Options) -> Self {
        Self {
            inner: Mutex::default(),
            options,
            stalled: AtomicBool::new(false),
        }
    }

    pub fn options(&self) -> &Options {
        &self.options
    }

    /// While stalled, tool calls are accepted but never answered.
    pub fn set_stalled(&self, stalled: bool) {
        self.stalled.store(stalled, Ordering::SeqCst);
    }

    pub fn is_stalled(&self) -> bool {
        self.stalled.load(Ordering::SeqCst)
    }

    fn with<T>(&self, f: impl FnOnce(&mut Inner) -> Result<T>) -> Result<T> {
        if !self.options.authenticated {
            return Err(Error::Unauthorized);
        }
        // A poisoned lock only means a test panicked mid-call.
        let mut inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        f(&mut inner)
    }

    /// Successful deletes so far, oldest first.
    pub fn deletions(&self) -> Vec<Deletion> {
        self.inner
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .deletions
            .clone()
    }

    /// Number of records of every kind still stored.
    pub fn record_count(&self) -> usize {
        let inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        inner.notes.len()
            + inner.collections.len()
            + inner.links.len()
            + inner.templates.len()
            + inner.schemes.len()
            + inner.concepts.len()
            + inner.keysets.len()
    }

    pub fn create_note(&self, content: String, tags: Vec<String>) -> Result<Value> {
        self.with(|inner| {
            if content.trim().is_empty() {
                return Err(Error::Validation("content is required".into()));
            }
            let id = new_id();
            let note = Note {
                content,
                tags,
                collection_id: None,
            };
            let body = json!({ "id": id, "tags": note.tags });
            inner.notes.insert(id, note);
            Ok(body)
        })
    }

    pub fn get_note(&self, id: &str) -> Result<Value> {
        self.with(|inner| Ok(note_json(id, inner.note(id)?)))
    }

    pub fn list_notes(&self, tags: &[String], limit: Option<usize>) -> Result<Value> {
        self.with(|inner| {
            let notes: Vec<_> = inner
                .notes
                .iter()
                .filter(|(_, note)| tags.iter().all(|tag| note.tags.contains(tag)))
                .take(limit.unwrap_or(usize::MAX))
                .map(|(id, note)| note_json(id, note))
                .collect();
            Ok(json!({ "total": notes.len(), "notes": notes }))
        })
    }

    /// Removes a note along with its links and jobs.
    pub fn delete_note(&self, id: &str) -> Result<Value> {
        self.with(|inner| {
            inner
                .notes
                .remove(id)
                .ok_or_else(|| Error::not_found("note", id))?;
            inner
                .links
                .retain(|_, link| link.from_id != id && link.to_id != id);
            inner.jobs.retain(|_, job| job.note_id != id);
            Ok(inner.deleted("note", id))
        })
    }

    pub fn create_collection(&self, name: String, description: Option<String>) -> Result<Value> {
        self.with(|inner| {
            if name.trim().is_empty() {
                return Err(Error::Validation("collection name is required".into()));
            }
            let id = new_id();
            let body = json!({ "id": id, "name": name });
            inner.collections.insert(id, Collection { name, description });
            Ok(body)
        })
    }

    /// Lists collections as a bare array.
    pub fn list_collections(&self) -> Result<Value> {
        self.with(|inner| {
            let collections: Vec<_> = inner
                .collections
                .iter()
                .map(|(id, c)| json!({ "id": id, "name": c.name }))
                .collect();
            Ok(Value::Array(collections))
        })
    }

    pub fn get_collection(&self, id: &str) -> Result<Value> {
        self.with(|inner| {
            let collection = inner
                .collections
                .get(id)
                .ok_or_else(|| Error::not_found("collection", id))?;
            let note_count = inner
                .notes
                .values()
                .filter(|note| note.collection_id.as_deref() == Some(id))
                .count();
            Ok(json!({
                "id": id,
                "name": collection.name,
                "description": collection.description,
                "note_count": note_count,
            }))
        })
    }

    pub fn move_note_to_collection(&self, note_id: &str, collection_id: &str) -> Result<Value> {
        self.with(|inner| {
            if !inner.collections.contains_key(collection_id) {
                return Err(Error::not_found("collection", collection_id));
            }
            let note = inner
                .notes
                .get_mut(note_id)
                .ok_or_else(|| Error::not_found("note", note_id))?;
            note.collection_id = Some(collection_id.to_string());
            Ok(json!({ "id": note_id, "collection_id": collection_id }))
        })
    }

    pub fn get_collection_notes(&self, id: &str) -> Result<Value> {
        self.with(|inner| {
            if !inner.collections.contains_key(id) {
                return Err(Error::not_found("collection", id));
            }
            let notes: Vec<_> = inner
                .notes
                .iter()
                .filter(|(_, note)| note.collection_id.as_deref() == Some(id))
                .map(|(note_id, note)| note_json(note_id, note))
                .collect();
            Ok(json!({ "notes": notes }))
        })
    }

    /// Removes a collection. Its notes stay, unfiled.
    pub fn delete_collection(&self, id: &str) -> Result<Value> {
        self.with(|inner| {
            inner
                .collections
                .remove(id)
                .ok_or_else(|| Error::not_found("collection", id))?;
            for note in inner.notes.values_mut() {
                if note.collection_id.as_deref() == Some(id) {
                    note.collection_id = None;
                }
            }
            Ok(inner.deleted("collection", id))
        })
    }

    pub fn create_link(&self, from_id: String, to_id: String, kind: String) -> Result<Value> {
        self.with(|inner| {
            inner.note(&from_id)?;
            inner.note(&to_id)?;
            if from_id == to_id {
                return Err(Error::Validation("a note must not link to itself".into()));
            }
            let id = new_id();
            let link = Link {
                from_id,
                to_id,
                kind,
            };
            let body = link_json(&id, &link);
            inner.links.insert(id, link);
            Ok(body)
        })
    }

    pub fn get_note_links(&self, id: &str) -> Result<Value> {
        self.with(|inner| {
            inner.note(id)?;
            let outgoing: Vec<_> = inner
                .links
                .iter()
                .filter(|(_, link)| link.from_id == id)
                .map(|(link_id, link)| link_json(link_id, link))
                .collect();
            let incoming: Vec<_> = inner
                .links
                .iter()
                .filter(|(_, link)| link.to_id == id)
                .map(|(link_id, link)| link_json(link_id, link))
                .collect();
            Ok(json!({ "outgoing": outgoing, "incoming": incoming }))
        })
    }

    pub fn delete_link(&self, id: &str) -> Result<Value> {
        self.with(|inner| {
            inner
                .links
                .remove(id)
                .ok_or_else(|| Error::not_found("link", id))?;
            Ok(inner.deleted("link", id))
        })
    }

    pub fn create_template(&self, name: String, content: String) -> Result<Value> {
        self.with(|inner| {
            if inner.templates.values().any(|t| t.name == name) {
                return Err(Error::Conflict(format!(
                    "template named {name:?} already exists"
                )));
            }
            let id = new_id();
            let body = json!({ "id": id, "name": name });
            inner.templates.insert(id, Template { name, content });
            Ok(body)
        })
    }

    pub fn list_templates(&self) -> Result<Value> {
        self.with(|inner| {
            let templates: Vec<_> = inner
                .templates
                .iter()
                .map(|(id, t)| json!({ "id": id, "name": t.name }))
                .collect();
            Ok(json!({ "templates": templates }))
        })
    }

    /// Creates a note from a template and returns only its id.
    pub fn instantiate_template(
        &self,
        id: &str,
        variables: Map<String, Value>,
        tags: Vec<String>,
    ) -> Result<Value> {
        self.with(|inner| {
            let template = inner
                .templates
                .get(id)
                .ok_or_else(|| Error::not_found("template", id))?;
            let note = Note {
                content: render(&template.content, &variables),
                tags,
                collection_id: None,
            };
            let note_id = new_id();
            inner.notes.insert(note_id.clone(), note);
            Ok(json!({ "id": note_id }))
        })
    }

    pub fn delete_template(&self, id: &str) -> Result<Value> {
        self.with(|inner| {
            inner
                .templates
                .remove(id)
                .ok_or_else(|| Error::not_found("template", id))?;
            Ok(inner.deleted("template", id))
        })
    }

    pub fn create_concept_scheme(&self, notation: String, title: String) -> Result<Value> {
        self.with(|inner| {
            if inner.schemes.values().any(|s| s.notation == notation) {
                return Err(Error::Conflict(format!(
                    "concept scheme with notation {notation:?} already exists"
                )));
            }
            let id = new_id();
            let body = json!({ "id": id, "notation": notation, "title": title });
            inner.schemes.insert(id, Scheme { notation });
            Ok(body)
        })
    }

    pub fn create_concept(&self, scheme_id: String, pref_label: String) -> Result<Value> {
        self.with(|inner| {
            if pref_label.trim().is_empty() {
                return Err(Error::Validation("pref_label is required".into()));
            }
            if !inner.schemes.contains_key(&scheme_id) {
                return Err(Error::not_found("concept scheme", scheme_id));
            }
            let id = new_id();
            let body = json!({ "id": id, "scheme_id": scheme_id, "pref_label": pref_label });
            inner.concepts.insert(
                id,
                Concept {
                    scheme_id,
                    pref_label,
                },
            );
            Ok(body)
        })
    }

    pub fn get_concept(&self, id: &str) -> Result<Value> {
        self.with(|inner| {
            let concept = inner
                .concepts
                .get(id)
                .ok_or_else(|| Error::not_found("concept", id))?;
            Ok(json!({
                "id": id,
                "scheme_id": concept.scheme_id,
                "pref_label": concept.pref_label,
            }))
        })
    }

    pub fn delete_concept(&self, id: &str) -> Result<Value> {
        self.with(|inner| {
            inner
                .concepts
                .remove(id)
                .ok_or_else(|| Error::not_found("concept", id))?;
            Ok(inner.deleted("concept", id))
        })
    }

    /// Refuses to remove a scheme that still holds concepts.
    pub fn delete_concept_scheme(&self, id: &str) -> Result<Value> {
        self.with(|inner| {
            if !inner.schemes.contains_key(id) {
                return Err(Error::not_found("concept scheme", id));
            }
            let remaining = inner
                .concepts
                .values()
                .filter(|c| c.scheme_id == id)
                .count();
            if remaining > 0 {
                return Err(Error::Conflict(format!(
                    "concept scheme {id} still has {remaining} concepts"
                )));
            }
            inner.schemes.remove(id);
            Ok(inner.deleted("concept-scheme", id))
        })
    }

    /// Queues a job. With `deduplicate`, a pending job of the same type for
    /// the same note is returned instead of a new one.
    pub fn create_job(&self, note_id: String, job_type: String, deduplicate: bool) -> Result<Value> {
        self.with(|inner| {
            inner.note(&note_id)?;
            if deduplicate {
                let existing = inner
                    .jobs
                    .iter()
                    .find(|(_, job)| job.note_id == note_id && job.job_type == job_type);
                if let Some((id, _)) = existing {
                    return Ok(json!({ "id": id, "status": "pending", "deduplicated": true }));
                }
            }
            let id = new_id();
            let body = json!({ "id": id, "status": "pending", "deduplicated": false });
            inner.jobs.insert(id, Job { note_id, job_type });
            Ok(body)
        })
    }

    pub fn list_jobs(&self, note_id: Option<&str>) -> Result<Value> {
        self.with(|inner| {
            let jobs: Vec<_> = inner
                .jobs
                .iter()
                .filter(|(_, job)| note_id.is_none_or(|n| job.note_id == n))
                .map(|(id, job)| {
                    json!({
                        "id": id,
                        "note_id": job.note_id,
                        "job_type": job.job_type,
                        "status": "pending",
                    })
                })
                .collect();
            Ok(json!({ "jobs": jobs }))
        })
    }

    pub fn get_queue_stats(&self) -> Result<Value> {
        self.with(|inner| {
            let pending = inner.jobs.len();
            Ok(json!({
                "pending": pending,
                "processing": 0,
                "completed_last_hour": 0,
                "failed_last_hour": 0,
                "total": pending,
            }))
        })
    }

    pub fn create_keyset(&self, name: String, passphrase: &str) -> Result<Value> {
        self.with(|inner| {
            self.encryption()?;
            if passphrase.chars().count() < MIN_PASSPHRASE_LENGTH {
                return Err(Error::Validation(format!(
                    "Passphrase too short (minimum {MIN_PASSPHRASE_LENGTH} characters required)"
                )));
            }
            if inner.keysets.contains_key(&name) {
                return Err(Error::Conflict(format!("keyset {name:?} already exists")));
            }
            let public_key = Uuid::new_v4().simple().to_string();
            let body = json!({ "name": name, "public_key": public_key });
            inner.keysets.insert(name, public_key);
            Ok(body)
        })
    }

    pub fn list_keysets(&self) -> Result<Value> {
        self.with(|inner| {
            self.encryption()?;
            let keysets: Vec<_> = inner
                .keysets
                .iter()
                .map(|(name, key)| json!({ "name": name, "public_key": key }))
                .collect();
            Ok(json!({ "keysets": keysets }))
        })
    }

    pub fn delete_keyset(&self, name: &str) -> Result<Value> {
        self.with(|inner| {
            self.encryption()?;
            inner
                .keysets
                .remove(name)
                .ok_or_else(|| Error::not_found("keyset", name))?;
            Ok(inner.deleted("keyset", name))
        })
    }

    pub fn backup_status(&self) -> Result<Value> {
        self.backups()?;
        Ok(json!({ "status": "idle", "last_backup": null }))
    }

    pub fn list_backups(&self) -> Result<Value> {
        self.backups()?;
        Ok(json!({ "backups": [] }))
    }

    fn encryption(&self) -> Result<()> {
        if self.options.encryption_configured {
            Ok(())
        } else {
            Err(Error::NotConfigured("Encryption"))
        }
    }

    fn backups(&self) -> Result<()> {
        self.with(|_| {
            if self.options.backups_configured {
                Ok(())
            } else {
                Err(Error::NotConfigured("Scheduled backups"))
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn id(value: &Value) -> String {
        value["id"].as_str().unwrap().to_string()
    }

    #[test]
    fn test_render() {
        let variables = json!({"title": "X", "body": "Y"});
        let text = render("# {{title}}\n\n{{body}}", variables.as_object().unwrap());
        assert_eq!(text, "# X\n\nY");
    }

    #[test]
    fn test_delete_note_cascades_links() {
        let store = Store::default();
        let a = id(&store.create_note("# A".into(), vec![]).unwrap());
        let b = id(&store.create_note("# B".into(), vec![]).unwrap());
        let link = id(&store.create_link(a.clone(), b.clone(), "related".into()).unwrap());

        store.delete_note(&a).unwrap();
        assert!(matches!(
            store.delete_link(&link),
            Err(Error::NotFound { kind: "link", .. })
        ));
        assert_eq!(
            store.get_note_links(&b).unwrap(),
            json!({"outgoing": [], "incoming": []})
        );
    }

    #[test]
    fn test_scheme_with_concepts_cannot_be_deleted() {
        let store = Store::default();
        let scheme = id(&store
            .create_concept_scheme("TST".into(), "Test".into())
            .unwrap());
        let concept = id(&store.create_concept(scheme.clone(), "Thing".into()).unwrap());

        assert!(matches!(
            store.delete_concept_scheme(&scheme),
            Err(Error::Conflict(_))
        ));
        store.delete_concept(&concept).unwrap();
        store.delete_concept_scheme(&scheme).unwrap();
        assert_eq!(store.record_count(), 0);
    }

    #[test]
    fn test_short_passphrase() {
        let store = Store::default();
        let err = store.create_keyset("k".into(), "short").unwrap_err();
        assert_eq!(
            err.to_string(),
            "API error 400: Passphrase too short (minimum 12 characters required)"
        );
    }

    #[test]
    fn test_job_deduplication() {
        let store = Store::default();
        let note = id(&store.create_note("# J".into(), vec![]).unwrap());

        let first = store.create_job(note.clone(), "embed".into(), true).unwrap();
        let second = store.create_job(note.clone(), "embed".into(), true).unwrap();
        assert_eq!(first["id"], second["id"]);
        assert_eq!(second["deduplicated"], json!(true));

        store.create_job(note.clone(), "embed".into(), false).unwrap();
        let jobs = store.list_jobs(Some(&note)).unwrap();
        assert_eq!(jobs["jobs"].as_array().unwrap().len(), 2);
    }

    #[test]
    fn test_unauthenticated_store_rejects_everything() {
        let store = Store::new(Options {
            authenticated: false,
            ..Options::default()
        });
        assert_eq!(store.list_notes(&[], None), Err(Error::Unauthorized));
    }

    #[test]
    fn test_backups_not_configured() {
        let store = Store::default();
        let err = store.backup_status().unwrap_err();
        assert!(err.to_string().contains("not configured"));

        let store = Store::new(Options {
            backups_configured: true,
            ..Options::default()
        });
        assert!(store.list_backups().is_ok());
    }

    #[test]
    fn test_encryption_not_configured() {
        let store = Store::new(Options {
            encryption_configured: false,
            ..Options::default()
        });
        let err = store
            .create_keyset("k".into(), "long enough passphrase")
            .unwrap_err();
        assert_eq!(err, Error::NotConfigured("Encryption"));
        assert!(err.to_string().contains("not configured"));
        assert!(store.list_keysets().is_err());
    }
}
