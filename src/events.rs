//! Event and photo records with JSON persistence.
//!
//! Records are held in memory behind `RwLock`s and written through the
//! storage backend on every mutation. Search only ever reads a snapshot;
//! a photo approved or deleted mid-search may or may not appear, which is
//! acceptable for a search feature.

use crate::auth;
use crate::eid::Eid;
use crate::face::records::{FaceData, PhotoFaceRecord};
use crate::storage::StorageManager;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::{Arc, RwLock};

const EVENTS_FILE: &str = "events.json";
const PHOTOS_FILE: &str = "photos.json";

#[derive(thiserror::Error, Debug)]
pub enum StoreError {
    #[error("event not found")]
    EventNotFound,

    #[error("photo not found")]
    PhotoNotFound,

    #[error("io error: {0:?}")]
    Io(#[from] std::io::Error),

    #[error("corrupt record file: {0:?}")]
    Corrupt(#[from] serde_json::Error),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Event {
    pub id: Eid,
    pub name: String,
    pub created_at: DateTime<Utc>,

    /// Inactive events are hidden from guests entirely.
    #[serde(default = "default_true")]
    pub active: bool,

    /// Per-event kill switch for the face search feature.
    #[serde(default = "default_true")]
    pub face_search_enabled: bool,

    #[serde(default)]
    pub deleted: bool,

    /// SHA-256 of the host credential. The raw token is returned once at
    /// creation and never stored.
    pub host_token_hash: String,

    /// SHA-256 of the guest access credential for this event's gate.
    pub access_token_hash: String,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct EventCreate {
    pub name: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub face_search_enabled: Option<bool>,
}

/// Raw credentials handed back exactly once, at event creation.
#[derive(Debug, Clone, Serialize)]
pub struct EventTokens {
    pub host_token: String,
    pub access_token: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Photo {
    pub id: Eid,
    pub event_id: Eid,

    /// File name in the uploads backend.
    pub file_id: String,
    /// Serving URL for the stored binary.
    pub url: String,

    #[serde(default = "default_true")]
    pub approved: bool,

    #[serde(default)]
    pub deleted: bool,

    pub created_at: DateTime<Utc>,

    /// Detected faces and their descriptors, written at ingest time.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub face_data: Option<FaceData>,
}

#[derive(Debug, Clone)]
pub struct PhotoCreate {
    pub event_id: Eid,
    pub file_id: String,
    pub url: String,
    pub approved: bool,
    pub face_data: Option<FaceData>,
}

fn default_true() -> bool {
    true
}

pub struct EventStore {
    events: RwLock<Vec<Event>>,
    photos: RwLock<Vec<Photo>>,
    store: Arc<dyn StorageManager>,
}

impl EventStore {
    pub fn load(store: Arc<dyn StorageManager>) -> Result<Self, StoreError> {
        let events = read_records(store.as_ref(), EVENTS_FILE)?;
        let photos = read_records(store.as_ref(), PHOTOS_FILE)?;

        log::debug!("loaded {} events, {} photos", events.len(), photos.len());

        Ok(Self {
            events: RwLock::new(events),
            photos: RwLock::new(photos),
            store,
        })
    }

    pub fn create_event(&self, create: EventCreate) -> Result<(Event, EventTokens), StoreError> {
        let tokens = EventTokens {
            host_token: auth::generate_token(),
            access_token: auth::generate_token(),
        };

        let event = Event {
            id: Eid::new(),
            name: create.name,
            created_at: Utc::now(),
            active: true,
            face_search_enabled: create.face_search_enabled.unwrap_or(true),
            deleted: false,
            host_token_hash: auth::hash_token(&tokens.host_token),
            access_token_hash: auth::hash_token(&tokens.access_token),
        };

        let mut events = self.events.write().unwrap();
        events.push(event.clone());
        self.persist(EVENTS_FILE, &*events)?;

        Ok((event, tokens))
    }

    pub fn get_event(&self, id: &Eid) -> Option<Event> {
        self.events
            .read()
            .unwrap()
            .iter()
            .find(|e| &e.id == id)
            .cloned()
    }

    pub fn list_events(&self) -> Vec<Event> {
        self.events
            .read()
            .unwrap()
            .iter()
            .filter(|e| !e.deleted)
            .cloned()
            .collect()
    }

    /// Soft-delete an event and cascade to its photos.
    pub fn delete_event(&self, id: &Eid) -> Result<(), StoreError> {
        {
            let mut events = self.events.write().unwrap();
            let event = events
                .iter_mut()
                .find(|e| &e.id == id && !e.deleted)
                .ok_or(StoreError::EventNotFound)?;
            event.deleted = true;
            self.persist(EVENTS_FILE, &*events)?;
        }

        let mut photos = self.photos.write().unwrap();
        for photo in photos.iter_mut().filter(|p| &p.event_id == id) {
            photo.deleted = true;
        }
        self.persist(PHOTOS_FILE, &*photos)?;

        Ok(())
    }

    pub fn add_photo(&self, create: PhotoCreate) -> Result<Photo, StoreError> {
        let exists = self
            .events
            .read()
            .unwrap()
            .iter()
            .any(|e| e.id == create.event_id && !e.deleted);
        if !exists {
            return Err(StoreError::EventNotFound);
        }

        let photo = Photo {
            id: Eid::new(),
            event_id: create.event_id,
            file_id: create.file_id,
            url: create.url,
            approved: create.approved,
            deleted: false,
            created_at: Utc::now(),
            face_data: create.face_data,
        };

        let mut photos = self.photos.write().unwrap();
        photos.push(photo.clone());
        self.persist(PHOTOS_FILE, &*photos)?;

        Ok(photo)
    }

    pub fn photos_for_event(&self, event_id: &Eid) -> Vec<Photo> {
        self.photos
            .read()
            .unwrap()
            .iter()
            .filter(|p| &p.event_id == event_id && !p.deleted)
            .cloned()
            .collect()
    }

    pub fn set_face_data(&self, photo_id: &Eid, face_data: Option<FaceData>) -> Result<(), StoreError> {
        let mut photos = self.photos.write().unwrap();
        let photo = photos
            .iter_mut()
            .find(|p| &p.id == photo_id && !p.deleted)
            .ok_or(StoreError::PhotoNotFound)?;
        photo.face_data = face_data;
        self.persist(PHOTOS_FILE, &*photos)
    }

    pub fn delete_photo(&self, photo_id: &Eid) -> Result<(), StoreError> {
        let mut photos = self.photos.write().unwrap();
        let photo = photos
            .iter_mut()
            .find(|p| &p.id == photo_id && !p.deleted)
            .ok_or(StoreError::PhotoNotFound)?;
        photo.deleted = true;
        self.persist(PHOTOS_FILE, &*photos)
    }

    pub fn set_approved(&self, photo_id: &Eid, approved: bool) -> Result<(), StoreError> {
        let mut photos = self.photos.write().unwrap();
        let photo = photos
            .iter_mut()
            .find(|p| &p.id == photo_id && !p.deleted)
            .ok_or(StoreError::PhotoNotFound)?;
        photo.approved = approved;
        self.persist(PHOTOS_FILE, &*photos)
    }

    /// Snapshot of the event's searchable faces: approved, non-deleted
    /// photos carrying at least one stored descriptor, in (creation time,
    /// id) order so that equal-similarity matches tie-break onto the oldest
    /// photo deterministically.
    pub fn searchable_faces(&self, event_id: &Eid) -> Vec<PhotoFaceRecord> {
        let photos = self.photos.read().unwrap();

        let mut searchable: Vec<&Photo> = photos
            .iter()
            .filter(|p| &p.event_id == event_id && p.approved && !p.deleted)
            .filter(|p| p.face_data.as_ref().map(FaceData::has_descriptors).unwrap_or(false))
            .collect();
        searchable.sort_by(|a, b| {
            a.created_at
                .cmp(&b.created_at)
                .then_with(|| a.id.cmp(&b.id))
        });

        searchable
            .into_iter()
            .map(|p| PhotoFaceRecord {
                photo_id: p.id.clone(),
                photo_url: p.url.clone(),
                entries: p
                    .face_data
                    .as_ref()
                    .map(|d| d.entries.clone())
                    .unwrap_or_default(),
            })
            .collect()
    }

    fn persist<T: Serialize>(&self, file: &str, records: &[T]) -> Result<(), StoreError> {
        let data = serde_json::to_vec_pretty(records)?;
        self.store.write(file, &data)?;
        Ok(())
    }

    #[cfg(test)]
    pub fn push_photo_raw(&self, photo: Photo) {
        self.photos.write().unwrap().push(photo);
    }
}

fn read_records<T: serde::de::DeserializeOwned>(
    store: &dyn StorageManager,
    file: &str,
) -> Result<Vec<T>, StoreError> {
    if !store.exists(file) {
        return Ok(Vec::new());
    }
    Ok(serde_json::from_slice(&store.read(file)?)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::face::records::{DetectedFace, FaceEntry};
    use crate::storage::BackendLocal;
    use chrono::TimeZone;

    fn test_store() -> (EventStore, tempfile::TempDir) {
        let tmp = tempfile::tempdir().unwrap();
        let backend = Arc::new(BackendLocal::new(tmp.path().to_str().unwrap()).unwrap());
        (EventStore::load(backend).unwrap(), tmp)
    }

    fn face_data(descriptor: Option<Vec<f32>>) -> FaceData {
        FaceData {
            entries: vec![FaceEntry {
                face: DetectedFace {
                    x: 0.0,
                    y: 0.0,
                    width: 10.0,
                    height: 10.0,
                    confidence: 0.9,
                },
                descriptor,
            }],
        }
    }

    fn photo_create(store: &EventStore, event_id: &Eid, approved: bool, data: Option<FaceData>) -> Photo {
        store
            .add_photo(PhotoCreate {
                event_id: event_id.clone(),
                file_id: format!("{}.jpg", Eid::new()),
                url: format!("/api/file/{}.jpg", Eid::new()),
                approved,
                face_data: data,
            })
            .unwrap()
    }

    #[test]
    fn test_create_event_hashes_tokens() {
        let (store, _tmp) = test_store();
        let (event, tokens) = store
            .create_event(EventCreate {
                name: "wedding".to_string(),
                ..Default::default()
            })
            .unwrap();

        assert_ne!(event.host_token_hash, tokens.host_token);
        assert!(auth::verify_token(&tokens.host_token, &event.host_token_hash));
        assert!(auth::verify_token(&tokens.access_token, &event.access_token_hash));
        assert!(event.active);
        assert!(event.face_search_enabled);
    }

    #[test]
    fn test_persistence_roundtrip() {
        let tmp = tempfile::tempdir().unwrap();
        let backend = Arc::new(BackendLocal::new(tmp.path().to_str().unwrap()).unwrap());

        let event_id = {
            let store = EventStore::load(backend.clone()).unwrap();
            let (event, _) = store
                .create_event(EventCreate {
                    name: "party".to_string(),
                    ..Default::default()
                })
                .unwrap();
            photo_create(&store, &event.id, true, Some(face_data(Some(vec![1.0, 0.0]))));
            event.id
        };

        let reloaded = EventStore::load(backend).unwrap();
        assert!(reloaded.get_event(&event_id).is_some());
        assert_eq!(reloaded.photos_for_event(&event_id).len(), 1);
        assert_eq!(reloaded.searchable_faces(&event_id).len(), 1);
    }

    #[test]
    fn test_searchable_faces_filters() {
        let (store, _tmp) = test_store();
        let (event, _) = store
            .create_event(EventCreate {
                name: "gala".to_string(),
                ..Default::default()
            })
            .unwrap();

        // searchable
        let good = photo_create(&store, &event.id, true, Some(face_data(Some(vec![1.0]))));
        // unapproved
        photo_create(&store, &event.id, false, Some(face_data(Some(vec![1.0]))));
        // detected but unmatchable: faces without descriptors
        photo_create(&store, &event.id, true, Some(face_data(None)));
        // no face data at all
        photo_create(&store, &event.id, true, None);
        // deleted
        let deleted = photo_create(&store, &event.id, true, Some(face_data(Some(vec![1.0]))));
        store.delete_photo(&deleted.id).unwrap();

        let records = store.searchable_faces(&event.id);
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].photo_id, good.id);
    }

    #[test]
    fn test_searchable_faces_ordered_by_creation() {
        let (store, _tmp) = test_store();
        let (event, _) = store
            .create_event(EventCreate {
                name: "ordered".to_string(),
                ..Default::default()
            })
            .unwrap();

        let at = |secs: i64| Utc.timestamp_opt(1_700_000_000 + secs, 0).unwrap();
        for (name, secs) in [("b", 10), ("a", 0), ("c", 20)] {
            store.push_photo_raw(Photo {
                id: Eid::from(name),
                event_id: event.id.clone(),
                file_id: format!("{name}.jpg"),
                url: format!("/api/file/{name}.jpg"),
                approved: true,
                deleted: false,
                created_at: at(secs),
                face_data: Some(face_data(Some(vec![1.0]))),
            });
        }

        let ids: Vec<String> = store
            .searchable_faces(&event.id)
            .into_iter()
            .map(|r| r.photo_id.to_string())
            .collect();
        assert_eq!(ids, vec!["a", "b", "c"]);
    }

    #[test]
    fn test_delete_event_cascades() {
        let (store, _tmp) = test_store();
        let (event, _) = store
            .create_event(EventCreate {
                name: "gone".to_string(),
                ..Default::default()
            })
            .unwrap();
        photo_create(&store, &event.id, true, Some(face_data(Some(vec![1.0]))));

        store.delete_event(&event.id).unwrap();

        assert!(store.get_event(&event.id).unwrap().deleted);
        assert!(store.photos_for_event(&event.id).is_empty());
        assert!(store.searchable_faces(&event.id).is_empty());
        assert!(store.list_events().is_empty());

        // adding to a deleted event fails
        let err = store
            .add_photo(PhotoCreate {
                event_id: event.id.clone(),
                file_id: "x.jpg".to_string(),
                url: "/api/file/x.jpg".to_string(),
                approved: true,
                face_data: None,
            })
            .unwrap_err();
        assert!(matches!(err, StoreError::EventNotFound));
    }
}
