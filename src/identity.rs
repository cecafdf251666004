//! Caller identity and the per-request decision log.

use serde::{Deserialize, Serialize};

/// Who is calling: produced by the authentication layer, read-only inside the engine.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RequestIdentity {
    pub is_admin: bool,
    pub role_group: u8,
    pub authorized_user_id: Option<u64>,
    pub debug: bool,
}

impl RequestIdentity {
    pub fn anonymous() -> Self {
        Self::default()
    }

    pub fn user(user_id: u64, role_group: u8) -> Self {
        RequestIdentity {
            is_admin: false,
            role_group,
            authorized_user_id: Some(user_id),
            debug: false,
        }
    }

    pub fn admin() -> Self {
        RequestIdentity {
            is_admin: true,
            ..Self::default()
        }
    }
}

/// Accumulates every decision the pipeline makes for one request. Entries are always mirrored
/// to `tracing` at debug level; they are only retained when the caller may see them.
#[derive(Debug, Default)]
pub struct DecisionLog {
    retain: bool,
    lines: Vec<String>,
}

impl DecisionLog {
    pub fn new(retain: bool) -> Self {
        DecisionLog {
            retain,
            lines: Vec::new(),
        }
    }

    pub fn note(&mut self, line: impl Into<String>) {
        let line = line.into();
        tracing::debug!(target: "crudmap::decision", "{}", line);
        if self.retain {
            self.lines.push(line);
        }
    }

    pub fn lines(&self) -> &[String] {
        &self.lines
    }
}

/// Per-request state: never shared between requests.
#[derive(Debug)]
pub struct RequestContext {
    pub identity: RequestIdentity,
    pub log: DecisionLog,
    /// Role from the relation or permission table row that granted access, once looked up.
    pub relation_role: Option<u8>,
    debug_allowed: bool,
}

impl RequestContext {
    /// `debug_allowed` is the process-wide switch (`EngineConfig::debug_enabled`).
    pub fn new(identity: RequestIdentity, debug_allowed: bool) -> Self {
        let retain = debug_allowed && identity.debug && identity.is_admin;
        RequestContext {
            identity,
            log: DecisionLog::new(retain),
            relation_role: None,
            debug_allowed,
        }
    }

    /// Whether internal error text and the decision log may be returned to this caller.
    pub fn debug_enabled(&self) -> bool {
        self.debug_allowed && self.identity.debug && self.identity.is_admin
    }

    pub fn is_admin(&self) -> bool {
        self.identity.is_admin
    }

    /// Decision log lines for the response, when visible to this caller.
    pub fn visible_logs(&self) -> Option<Vec<String>> {
        self.debug_enabled().then(|| self.log.lines().to_vec())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn log_is_retained_only_for_admin_debug() {
        let mut user = RequestIdentity::user(1, 0);
        user.debug = true;
        let mut ctx = RequestContext::new(user, true);
        ctx.log.note("skipped");
        assert!(ctx.log.lines().is_empty());
        assert!(ctx.visible_logs().is_none());

        let mut admin = RequestIdentity::admin();
        admin.debug = true;
        let mut ctx = RequestContext::new(admin.clone(), true);
        ctx.log.note("skipped");
        assert_eq!(ctx.visible_logs(), Some(vec!["skipped".to_string()]));

        let ctx = RequestContext::new(admin, false);
        assert!(!ctx.debug_enabled());
    }
}
