//! IRCv3 capability negotiation engine.
//!
//! Tracks the server-advertised capability set (`CAP LS`) and the
//! currently enabled set (`CAP LIST`/`ACK`), computes requests from the
//! configured capability option, and gates registration: `CAP END` is
//! held back until negotiation (and SASL, when requested) finishes.
//!
//! # Reference
//! - <https://ircv3.net/specs/extensions/capability-negotiation>

use std::collections::BTreeMap;

/// Capabilities this client knows how to use; anything else is never
/// requested, even when configured.
pub const SUPPORTED_CAPS: &[&str] = &[
    "account-notify",
    "account-tag",
    "away-notify",
    "batch",
    "cap-notify",
    "chghost",
    "draft/chathistory",
    "draft/multiline",
    "echo-message",
    "extended-join",
    "invite-notify",
    "message-tags",
    "multi-prefix",
    "sasl",
    "server-time",
    "setname",
    "userhost-in-names",
];

/// Check if a capability name is in the supported catalogue.
pub fn is_supported(name: &str) -> bool {
    SUPPORTED_CAPS.contains(&name)
}

/// What the engine wants done after consuming a CAP message.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum CapAction {
    /// Send `CAP REQ :<caps>`.
    Request(String),
    /// Begin SASL authentication (the `sasl` capability was acked).
    StartSasl,
    /// Send `CAP END` (pre-registration negotiation finished).
    End,
}

/// Configured negotiation inputs, derived from server options.
#[derive(Clone, Debug, Default)]
pub struct CapConfig {
    /// The `capabilities` option, split on commas: capability names,
    /// `*` (everything supported), `!name` exclusions.
    pub requested: Vec<String>,
    /// Whether SASL credentials are configured; forces `sasl` into the
    /// request set.
    pub sasl: bool,
}

impl CapConfig {
    /// Parse the `capabilities` option value.
    pub fn parse(option: &str, sasl: bool) -> Self {
        CapConfig {
            requested: option
                .split(',')
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(str::to_string)
                .collect(),
            sasl,
        }
    }

    /// Expand the option into the concrete set of wanted capabilities.
    fn wanted(&self) -> Vec<String> {
        let mut wanted: Vec<String> = Vec::new();
        for item in &self.requested {
            if item == "*" {
                for cap in SUPPORTED_CAPS {
                    if !wanted.iter().any(|w| w == cap) {
                        wanted.push((*cap).to_string());
                    }
                }
            } else if let Some(excluded) = item.strip_prefix('!') {
                wanted.retain(|w| w != excluded);
            } else if !wanted.iter().any(|w| w == item) {
                wanted.push(item.clone());
            }
        }
        if self.sasl && !wanted.iter().any(|w| w == "sasl") {
            wanted.push("sasl".to_string());
        }
        wanted
    }
}

/// Capability negotiation state for one server connection.
#[derive(Clone, Debug, Default)]
pub struct CapEngine {
    /// Server-advertised capabilities with optional values (`CAP LS`).
    ls: BTreeMap<String, Option<String>>,
    /// Currently enabled capabilities.
    enabled: BTreeMap<String, Option<String>>,
    /// Still collecting multiline `CAP * LS *` replies.
    ls_in_progress: bool,
    /// Registration (001) not yet reached; END bracketing applies.
    pre_registration: bool,
    /// An END is owed once SASL finishes.
    end_after_sasl: bool,
}

impl CapEngine {
    pub fn new() -> Self {
        CapEngine {
            pre_registration: true,
            ..CapEngine::default()
        }
    }

    /// Reset all negotiation state (connection closed).
    pub fn clear(&mut self) {
        *self = CapEngine::new();
    }

    /// The negotiated value of a capability from `CAP LS`, if any.
    pub fn ls_value(&self, name: &str) -> Option<&str> {
        self.ls.get(name).and_then(|v| v.as_deref())
    }

    /// Whether the server advertised a capability.
    pub fn advertised(&self, name: &str) -> bool {
        self.ls.contains_key(name)
    }

    /// Whether a capability is currently enabled.
    pub fn enabled(&self, name: &str) -> bool {
        self.enabled.contains_key(name)
    }

    /// Iterate enabled capability names.
    pub fn enabled_names(&self) -> impl Iterator<Item = &str> {
        self.enabled.keys().map(String::as_str)
    }

    /// Registration completed (001 received); later CAP NEW/DEL must
    /// not re-trigger END.
    pub fn registration_complete(&mut self) {
        self.pre_registration = false;
        self.end_after_sasl = false;
    }

    /// SASL finished (success or failure); emit the deferred END.
    pub fn sasl_finished(&mut self) -> Vec<CapAction> {
        if self.end_after_sasl {
            self.end_after_sasl = false;
            vec![CapAction::End]
        } else {
            vec![]
        }
    }

    /// Consume a `CAP * LS` reply. `more` is true when the reply
    /// carried the `*` continuation marker.
    pub fn on_ls(&mut self, caps: &str, more: bool, cfg: &CapConfig) -> Vec<CapAction> {
        for item in caps.split_whitespace() {
            match item.split_once('=') {
                Some((name, value)) => {
                    self.ls.insert(name.to_string(), Some(value.to_string()));
                }
                None => {
                    self.ls.insert(item.to_string(), None);
                }
            }
        }

        if more {
            self.ls_in_progress = true;
            return vec![];
        }
        self.ls_in_progress = false;

        let to_request: Vec<String> = cfg
            .wanted()
            .into_iter()
            .filter(|cap| is_supported(cap) && self.ls.contains_key(cap) && !self.enabled(cap))
            .collect();

        if to_request.is_empty() {
            if self.pre_registration {
                return vec![CapAction::End];
            }
            return vec![];
        }
        vec![CapAction::Request(to_request.join(" "))]
    }

    /// True while more `CAP * LS *` replies are expected; registration
    /// completion is gated on this going false.
    pub fn ls_in_progress(&self) -> bool {
        self.ls_in_progress
    }

    /// Consume a `CAP * ACK` reply.
    pub fn on_ack(&mut self, caps: &str, cfg: &CapConfig) -> Vec<CapAction> {
        let mut sasl_acked = false;
        for item in caps.split_whitespace() {
            if let Some(name) = item.strip_prefix('-') {
                self.enabled.remove(name);
                continue;
            }
            let name = item.trim_start_matches(['~', '=']);
            let value = self.ls.get(name).cloned().flatten();
            self.enabled.insert(name.to_string(), value);
            if name == "sasl" {
                sasl_acked = true;
            }
        }

        if sasl_acked && cfg.sasl {
            if self.pre_registration {
                self.end_after_sasl = true;
            }
            return vec![CapAction::StartSasl];
        }
        if self.pre_registration && !self.end_after_sasl {
            return vec![CapAction::End];
        }
        vec![]
    }

    /// Consume a `CAP * NAK` reply. The rejection is logged by the
    /// caller; negotiation still terminates pre-registration.
    pub fn on_nak(&mut self, _caps: &str) -> Vec<CapAction> {
        if self.pre_registration {
            vec![CapAction::End]
        } else {
            vec![]
        }
    }

    /// Consume a `CAP * NEW` reply (post-registration capability
    /// additions): update the LS map and re-request wanted deltas,
    /// without END bracketing.
    pub fn on_new(&mut self, caps: &str, cfg: &CapConfig) -> Vec<CapAction> {
        let mut added: Vec<String> = Vec::new();
        for item in caps.split_whitespace() {
            let (name, value) = match item.split_once('=') {
                Some((n, v)) => (n, Some(v.to_string())),
                None => (item, None),
            };
            self.ls.insert(name.to_string(), value);
            added.push(name.to_string());
        }

        let wanted = cfg.wanted();
        let to_request: Vec<String> = added
            .into_iter()
            .filter(|cap| {
                is_supported(cap) && wanted.iter().any(|w| w == cap) && !self.enabled(cap)
            })
            .collect();

        if to_request.is_empty() {
            vec![]
        } else {
            vec![CapAction::Request(to_request.join(" "))]
        }
    }

    /// Consume a `CAP * DEL` reply: the server withdrew capabilities.
    pub fn on_del(&mut self, caps: &str) -> Vec<CapAction> {
        for item in caps.split_whitespace() {
            self.ls.remove(item);
            self.enabled.remove(item);
        }
        vec![]
    }

    /// Consume a `CAP * LIST` reply (enabled set resync).
    pub fn on_list(&mut self, caps: &str) {
        self.enabled.clear();
        for item in caps.split_whitespace() {
            let value = self.ls.get(item).cloned().flatten();
            self.enabled.insert(item.to_string(), value);
        }
    }
}
