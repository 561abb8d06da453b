//! Phone-number authorization gate.

use std::collections::HashSet;

use tracing::{info, warn};

/// Decides whether a sender may use the assistant.
///
/// Two modes, fixed at construction: open (empty allowlist, every sender
/// passes) or allowlisted (only normalized members pass). `is_authorized`
/// never fails; an unauthorized sender is a logged non-event, not an error.
pub struct AuthGate {
    allowed: HashSet<String>,
}

impl AuthGate {
    /// Build a gate from configured numbers. Entries are normalized so
    /// formatting differences in the config don't cause false negatives.
    pub fn new(allowed_numbers: &[String]) -> Self {
        let allowed: HashSet<String> = allowed_numbers
            .iter()
            .map(|n| normalize(n))
            .filter(|n| !n.is_empty())
            .collect();

        if allowed.is_empty() {
            info!("Auth gate in OPEN mode (all numbers allowed)");
        } else {
            info!(count = allowed.len(), "Auth gate initialized with allowlist");
        }

        Self { allowed }
    }

    /// Whether the gate is in open mode.
    pub fn is_open(&self) -> bool {
        self.allowed.is_empty()
    }

    /// Check whether a phone number may use the assistant.
    pub fn is_authorized(&self, phone_number: &str) -> bool {
        if self.is_open() {
            return true;
        }

        let authorized = self.allowed.contains(&normalize(phone_number));
        if !authorized {
            warn!(from = phone_number, "Unauthorized message attempt");
        }
        authorized
    }
}

/// Normalize a phone number for comparison: strip everything except
/// digits, preserving a single leading `+`.
fn normalize(phone: &str) -> String {
    let trimmed = phone.trim();
    let (prefix, rest) = match trimmed.strip_prefix('+') {
        Some(rest) => ("+", rest),
        None => ("", trimmed),
    };
    let digits: String = rest.chars().filter(|c| c.is_ascii_digit()).collect();
    if digits.is_empty() {
        String::new()
    } else {
        format!("{prefix}{digits}")
    }
}
