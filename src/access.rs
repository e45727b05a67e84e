//! Request authorization for event-scoped operations.
//!
//! Search is allowed for the event's host, an administrator, or a caller
//! presenting the event's access credential. Every failure mode (event
//! missing, soft-deleted, inactive, feature disabled, or simply no valid
//! credential) collapses into one opaque `NotFound`, so an unauthorized
//! caller cannot probe which events exist or have the feature enabled.

use crate::auth;
use crate::events::Event;

/// Credentials presented with a request. Either or both may be absent.
#[derive(Debug, Clone, Default)]
pub struct Credentials {
    /// `Authorization: Bearer` value: the admin token or an event host token.
    pub bearer: Option<String>,
    /// `X-Event-Token` value: the guest credential for one event's gate.
    pub event_token: Option<String>,
}

/// The single opaque denial outcome.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("event not found")]
pub struct NotFound;

impl Credentials {
    pub fn is_admin(&self, admin_token: &str) -> bool {
        // an empty configured token disables the admin role outright
        !admin_token.is_empty()
            && self
                .bearer
                .as_deref()
                .map(|t| auth::constant_time_eq(t, admin_token))
                .unwrap_or(false)
    }

    fn is_host(&self, event: &Event) -> bool {
        self.bearer
            .as_deref()
            .map(|t| auth::verify_token(t, &event.host_token_hash))
            .unwrap_or(false)
    }

    fn holds_event_access(&self, event: &Event) -> bool {
        self.event_token
            .as_deref()
            .map(|t| auth::verify_token(t, &event.access_token_hash))
            .unwrap_or(false)
    }
}

/// Authorize a face search against an event.
pub fn authorize_search(
    event: Option<&Event>,
    creds: &Credentials,
    admin_token: &str,
) -> Result<(), NotFound> {
    let event = event.ok_or(NotFound)?;

    if event.deleted || !event.active || !event.face_search_enabled {
        return Err(NotFound);
    }

    if creds.is_admin(admin_token) || creds.is_host(event) || creds.holds_event_access(event) {
        Ok(())
    } else {
        Err(NotFound)
    }
}

/// Authorize event management (reading details, uploading photos): host or
/// admin only. Management works on inactive events but never on deleted
/// ones, and is independent of the face search flag.
pub fn authorize_manage(
    event: Option<&Event>,
    creds: &Credentials,
    admin_token: &str,
) -> Result<(), NotFound> {
    let event = event.ok_or(NotFound)?;

    if event.deleted {
        return Err(NotFound);
    }

    if creds.is_admin(admin_token) || creds.is_host(event) {
        Ok(())
    } else {
        Err(NotFound)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::eid::Eid;
    use chrono::Utc;

    const ADMIN: &str = "admin-secret";

    fn event_with(host_token: &str, access_token: &str) -> Event {
        Event {
            id: Eid::new(),
            name: "test".to_string(),
            created_at: Utc::now(),
            active: true,
            face_search_enabled: true,
            deleted: false,
            host_token_hash: auth::hash_token(host_token),
            access_token_hash: auth::hash_token(access_token),
        }
    }

    fn guest(token: &str) -> Credentials {
        Credentials {
            bearer: None,
            event_token: Some(token.to_string()),
        }
    }

    fn bearer(token: &str) -> Credentials {
        Credentials {
            bearer: Some(token.to_string()),
            event_token: None,
        }
    }

    #[test]
    fn test_all_three_roles_may_search() {
        let event = event_with("host-tok", "guest-tok");

        assert!(authorize_search(Some(&event), &bearer(ADMIN), ADMIN).is_ok());
        assert!(authorize_search(Some(&event), &bearer("host-tok"), ADMIN).is_ok());
        assert!(authorize_search(Some(&event), &guest("guest-tok"), ADMIN).is_ok());
    }

    #[test]
    fn test_anti_enumeration_single_outcome() {
        let guest_creds = guest("guest-tok");

        // nonexistent event
        let missing = authorize_search(None, &guest_creds, ADMIN).unwrap_err();

        // existing event, feature disabled, valid credential
        let mut disabled = event_with("host-tok", "guest-tok");
        disabled.face_search_enabled = false;
        let feature_off = authorize_search(Some(&disabled), &guest_creds, ADMIN).unwrap_err();

        // existing searchable event, wrong credential
        let event = event_with("host-tok", "other-guest-tok");
        let forbidden = authorize_search(Some(&event), &guest_creds, ADMIN).unwrap_err();

        // soft-deleted and inactive events
        let mut deleted = event_with("host-tok", "guest-tok");
        deleted.deleted = true;
        let gone = authorize_search(Some(&deleted), &guest_creds, ADMIN).unwrap_err();

        let mut inactive = event_with("host-tok", "guest-tok");
        inactive.active = false;
        let dormant = authorize_search(Some(&inactive), &guest_creds, ADMIN).unwrap_err();

        // one indistinguishable outcome for all of them
        for outcome in [missing, feature_off, forbidden, gone, dormant] {
            assert_eq!(outcome, NotFound);
        }
    }

    #[test]
    fn test_anonymous_is_denied() {
        let event = event_with("host-tok", "guest-tok");
        assert!(authorize_search(Some(&event), &Credentials::default(), ADMIN).is_err());
    }

    #[test]
    fn test_empty_admin_token_disables_admin() {
        let event = event_with("host-tok", "guest-tok");
        // bearer happens to present the empty string
        let creds = bearer("");
        assert!(authorize_search(Some(&event), &creds, "").is_err());
    }

    #[test]
    fn test_guest_may_not_manage() {
        let event = event_with("host-tok", "guest-tok");
        assert!(authorize_manage(Some(&event), &guest("guest-tok"), ADMIN).is_err());
        assert!(authorize_manage(Some(&event), &bearer("host-tok"), ADMIN).is_ok());
        assert!(authorize_manage(Some(&event), &bearer(ADMIN), ADMIN).is_ok());
    }

    #[test]
    fn test_manage_works_on_inactive_but_not_deleted() {
        let mut event = event_with("host-tok", "guest-tok");
        event.active = false;
        assert!(authorize_manage(Some(&event), &bearer("host-tok"), ADMIN).is_ok());

        event.deleted = true;
        assert!(authorize_manage(Some(&event), &bearer("host-tok"), ADMIN).is_err());
    }
}
