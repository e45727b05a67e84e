use std::sync::{Arc, RwLock};

use anyhow::{bail, Context};
use clap::Parser;
use inquire::error::InquireResult;

mod access;
mod auth;
mod cli;
mod config;
mod eid;
mod events;
mod face;
mod ingest;
mod storage;
#[cfg(test)]
mod tests;
mod web;

use config::Config;
use eid::Eid;
use events::EventStore;
use face::{engine, DescriptorExtractor, FaceSearchService};
use storage::BackendLocal;
use web::AppState;

fn build_state(data_dir: &str) -> anyhow::Result<Arc<AppState>> {
    let config = Config::load_with(data_dir)?;

    let uploads_dir = std::path::Path::new(data_dir).join("uploads");
    let uploads = Arc::new(BackendLocal::new(
        uploads_dir.to_str().context("invalid uploads path")?,
    )?);

    let records = Arc::new(BackendLocal::new(data_dir)?);
    let store = Arc::new(EventStore::load(records)?);

    let fs = &config.face_search;
    let factory = engine::default_factory(
        config.resolve_path(&fs.detector_model),
        config.resolve_path(&fs.recognition_model),
        fs.detection_confidence,
    );
    let extractor = DescriptorExtractor::new(factory, fs.max_reference_bytes);
    let face = Arc::new(FaceSearchService::new(extractor, fs.default_min_similarity));

    Ok(Arc::new(AppState {
        config: Arc::new(RwLock::new(config)),
        store,
        uploads,
        face,
        uploads_dir,
    }))
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let args = cli::Args::parse();
    let state = build_state(&args.data_dir)?;

    match args.command {
        cli::Command::Daemon {} => web::start_daemon(state),

        cli::Command::Event { action } => match action {
            cli::EventArgs::Create {
                name,
                no_face_search,
            } => {
                let (event, tokens) = state.store.create_event(events::EventCreate {
                    name,
                    face_search_enabled: Some(!no_face_search),
                })?;

                println!(
                    "{}",
                    serde_json::to_string_pretty(&serde_json::json!({
                        "id": event.id,
                        "name": event.name,
                        "faceSearchEnabled": event.face_search_enabled,
                        "hostToken": tokens.host_token,
                        "accessToken": tokens.access_token,
                    }))?
                );
                Ok(())
            }

            cli::EventArgs::List {} => {
                for event in state.store.list_events() {
                    let photos = state.store.photos_for_event(&event.id);
                    let searchable = state.store.searchable_faces(&event.id);
                    println!(
                        "{}  {}  ({} photos, {} searchable){}",
                        event.id,
                        event.name,
                        photos.len(),
                        searchable.len(),
                        if event.face_search_enabled {
                            ""
                        } else {
                            "  [face search off]"
                        }
                    );
                }
                Ok(())
            }

            cli::EventArgs::Delete { id, yes } => {
                if !yes {
                    match inquire::prompt_confirmation(format!(
                        "Delete event {id} and all of its photos?"
                    )) {
                        InquireResult::Ok(true) => {}
                        InquireResult::Ok(false) => return Ok(()),
                        InquireResult::Err(err) => bail!("An error occurred: {}", err),
                    }
                }

                state.store.delete_event(&Eid::from(id.as_str()))?;
                println!("event {id} deleted");
                Ok(())
            }
        },

        cli::Command::Photo { action } => match action {
            cli::PhotoArgs::Add {
                event,
                path,
                unapproved,
            } => {
                let bytes = std::fs::read(&path).with_context(|| format!("reading {path}"))?;
                let photo = ingest::ingest_photo(
                    &state.store,
                    state.uploads.as_ref(),
                    &state.face,
                    &Eid::from(event.as_str()),
                    &bytes,
                    !unapproved,
                )?;
                println!("{}", serde_json::to_string_pretty(&photo)?);
                Ok(())
            }

            cli::PhotoArgs::Approve { id, revoke } => {
                state.store.set_approved(&Eid::from(id.as_str()), !revoke)?;
                println!(
                    "photo {id} {}",
                    if revoke { "unapproved" } else { "approved" }
                );
                Ok(())
            }

            cli::PhotoArgs::Delete { id, yes } => {
                if !yes {
                    match inquire::prompt_confirmation(format!("Delete photo {id}?")) {
                        InquireResult::Ok(true) => {}
                        InquireResult::Ok(false) => return Ok(()),
                        InquireResult::Err(err) => bail!("An error occurred: {}", err),
                    }
                }

                state.store.delete_photo(&Eid::from(id.as_str()))?;
                println!("photo {id} deleted");
                Ok(())
            }

            cli::PhotoArgs::Reindex { event } => {
                let updated = ingest::reindex_event(
                    &state.store,
                    state.uploads.as_ref(),
                    &state.face,
                    &Eid::from(event.as_str()),
                )?;
                println!("{updated} photos reindexed");
                Ok(())
            }
        },

        cli::Command::Search {
            event,
            path,
            threshold,
            count,
        } => {
            let bytes = std::fs::read(&path).with_context(|| format!("reading {path}"))?;

            let event_id = Eid::from(event.as_str());
            if state
                .store
                .get_event(&event_id)
                .filter(|e| !e.deleted)
                .is_none()
            {
                bail!("event not found");
            }

            let candidates = state.store.searchable_faces(&event_id);
            let results = state.face.search(&bytes, &candidates, threshold)?;

            if count {
                println!("{} matches found", results.len());
                return Ok(());
            }

            println!("{}", serde_json::to_string_pretty(&results)?);
            Ok(())
        }
    }
}
