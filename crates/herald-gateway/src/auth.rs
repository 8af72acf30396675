use axum::http::HeaderMap;

use crate::app::AppState;

/// Admin bearer-token check. A missing `admin_token` in config disables
/// the whole surface rather than opening it.
pub fn check_admin(state: &AppState, headers: &HeaderMap) -> bool {
    let Some(ref expected) = state.config.gateway.admin_token else {
        return false;
    };
    headers
        .get("authorization")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .map(|token| token == expected)
        .unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};

    use herald_core::config::HeraldConfig;
    use herald_lock::{LeaseBackend, LockError};
    use herald_store::CampaignStore;
    use herald_users::UserStore;
    use herald_worker::WorkerMetrics;

    struct NoLease;

    #[async_trait::async_trait]
    impl LeaseBackend for NoLease {
        async fn acquire(&self, _ttl: std::time::Duration) -> Result<bool, LockError> {
            Ok(false)
        }
        async fn refresh(&self, _ttl: std::time::Duration) -> Result<bool, LockError> {
            Ok(false)
        }
        async fn release(&self) -> Result<(), LockError> {
            Ok(())
        }
        async fn ping(&self) -> Result<(), LockError> {
            Ok(())
        }
    }

    fn state_with_token(token: Option<&str>) -> AppState {
        let conn = Arc::new(Mutex::new(rusqlite::Connection::open_in_memory().unwrap()));
        let users = UserStore::new(conn.clone()).unwrap();
        let campaigns = CampaignStore::new(conn).unwrap();
        let mut config = HeraldConfig::default();
        config.gateway.admin_token = token.map(String::from);
        AppState::new(
            config,
            campaigns,
            users,
            Arc::new(WorkerMetrics::new()),
            Arc::new(NoLease),
        )
    }

    fn headers(value: Option<&str>) -> HeaderMap {
        let mut headers = HeaderMap::new();
        if let Some(v) = value {
            headers.insert("authorization", v.parse().unwrap());
        }
        headers
    }

    #[test]
    fn accepts_matching_bearer_token() {
        let state = state_with_token(Some("s3cret"));
        assert!(check_admin(&state, &headers(Some("Bearer s3cret"))));
    }

    #[test]
    fn rejects_wrong_missing_or_malformed() {
        let state = state_with_token(Some("s3cret"));
        assert!(!check_admin(&state, &headers(Some("Bearer nope"))));
        assert!(!check_admin(&state, &headers(Some("s3cret"))));
        assert!(!check_admin(&state, &headers(None)));
    }

    #[test]
    fn no_configured_token_rejects_everything() {
        let state = state_with_token(None);
        assert!(!check_admin(&state, &headers(Some("Bearer anything"))));
    }
}
