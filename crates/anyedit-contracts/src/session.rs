use anyhow::Result;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Plan {
    Free,
    Pro,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UserProfile {
    pub name: String,
    pub email: String,
    pub avatar_url: Option<String>,
    pub plan: Plan,
}

impl UserProfile {
    /// The fixed record established after key selection. There is no real
    /// identity fetch behind it.
    pub fn simulated() -> Self {
        Self {
            name: "Pro User".to_string(),
            email: "user@example.com".to_string(),
            avatar_url: None,
            plan: Plan::Pro,
        }
    }
}

/// Host-provided key-selection mechanism. Both operations are optional at
/// the application level: a store constructed without a selector degrades to
/// analyze-only mode.
pub trait KeySelector {
    fn has_selected_key(&self) -> bool;
    fn open_select_key(&self) -> Result<()>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoginOutcome {
    Established,
    Unavailable,
}

pub struct SessionStore {
    selector: Option<Box<dyn KeySelector>>,
    user: Option<UserProfile>,
}

impl SessionStore {
    pub fn new(selector: Option<Box<dyn KeySelector>>) -> Self {
        Self {
            selector,
            user: None,
        }
    }

    /// Probes the selector for a pre-existing key and silently establishes a
    /// session when one is found, without prompting.
    pub fn initialize(&mut self) {
        let has_key = self
            .selector
            .as_ref()
            .map(|selector| selector.has_selected_key())
            .unwrap_or(false);
        if has_key {
            self.user = Some(UserProfile::simulated());
        }
    }

    /// Runs the interactive key selection. Without a selector this is a safe
    /// no-op reported as [`LoginOutcome::Unavailable`]; a selector failure
    /// propagates and leaves the session unset.
    pub fn login(&mut self) -> Result<LoginOutcome> {
        let Some(selector) = self.selector.as_ref() else {
            return Ok(LoginOutcome::Unavailable);
        };
        selector.open_select_key()?;
        self.user = Some(UserProfile::simulated());
        Ok(LoginOutcome::Established)
    }

    pub fn logout(&mut self) {
        self.user = None;
    }

    pub fn current_user(&self) -> Option<&UserProfile> {
        self.user.as_ref()
    }

    pub fn is_authenticated(&self) -> bool {
        self.user.is_some()
    }
}
