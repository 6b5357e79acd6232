//! Redis key names.

/// Key namespace of one application.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeySpace {
    app_id: String,
}

impl KeySpace {
    /// Creates the namespace of `app_id`.
    #[must_use]
    pub fn new(app_id: impl Into<String>) -> Self {
        Self {
            app_id: app_id.into(),
        }
    }

    /// The application ID.
    #[must_use]
    pub fn app_id(&self) -> &str {
        &self.app_id
    }

    fn key(&self, kind: &str, id: &str) -> String {
        format!("app:{}:{kind}:{id}", self.app_id)
    }

    #[must_use]
    pub fn code_grant(&self, code_hash: &str) -> String {
        self.key("code-grant", code_hash)
    }

    #[must_use]
    pub fn access_grant(&self, token_hash: &str) -> String {
        self.key("access-grant", token_hash)
    }

    #[must_use]
    pub fn offline_grant(&self, id: &str) -> String {
        self.key("offline-grant", id)
    }

    /// Per-user index of offline grant IDs.
    #[must_use]
    pub fn offline_grant_list(&self, user_id: &str) -> String {
        self.key("offline-grant-list", user_id)
    }

    /// Name of the mutex guarding one offline grant.
    #[must_use]
    pub fn offline_grant_mutex(&self, id: &str) -> String {
        self.key("offline-grant-mutex", id)
    }

    #[must_use]
    pub fn settings_action_grant(&self, code_hash: &str) -> String {
        self.key("settings-action-grant", code_hash)
    }

    #[must_use]
    pub fn app_session_token(&self, token_hash: &str) -> String {
        self.key("app-session-token", token_hash)
    }

    #[must_use]
    pub fn challenge(&self, token: &str) -> String {
        self.key("challenge", token)
    }

    #[must_use]
    pub fn authorization(&self, id: &str) -> String {
        self.key("authorization", id)
    }

    /// Per-user map of client ID to authorization ID.
    #[must_use]
    pub fn authorization_list(&self, user_id: &str) -> String {
        self.key("authorization-list", user_id)
    }

    #[must_use]
    pub fn idp_session(&self, id: &str) -> String {
        self.key("idp-session", id)
    }

    /// Per-user set of IDP session IDs.
    #[must_use]
    pub fn idp_session_list(&self, user_id: &str) -> String {
        self.key("idp-session-list", user_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_keys_are_namespaced_by_app() {
        let keys = KeySpace::new("keygate");
        assert_eq!(keys.code_grant("abc"), "app:keygate:code-grant:abc");
        assert_eq!(keys.offline_grant("g1"), "app:keygate:offline-grant:g1");
        assert_eq!(
            keys.offline_grant_list("user-1"),
            "app:keygate:offline-grant-list:user-1"
        );
        assert_eq!(
            keys.offline_grant_mutex("g1"),
            "app:keygate:offline-grant-mutex:g1"
        );
    }

    #[test]
    fn test_apps_do_not_share_keys() {
        let a = KeySpace::new("a");
        let b = KeySpace::new("b");
        assert_ne!(a.access_grant("h"), b.access_grant("h"));
    }
}
