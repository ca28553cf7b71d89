//! MT-SICS command dispatch.
//!
//! Lookup is exact equality on the command ID. Aliases (`@`, `SI..`) are
//! resolved by the normalizer before a command reaches the table, so no
//! two rules ever compete for the same token. Anything without a rule gets
//! the generic acknowledgement `<ID> A`.

use crate::profile::InstrumentProfile;
use chrono::{DateTime, Timelike, Utc};
use std::collections::HashMap;

/// Everything a rule may look at when producing a response.
pub struct Request<'a> {
    pub command: &'a str,
    pub profile: &'a InstrumentProfile,
    pub now: DateTime<Utc>,
}

/// Produces the response text (without CR LF) for a request.
pub type Responder = fn(&Request<'_>) -> String;

/// A command token and the function that answers it.
#[derive(Clone, Copy)]
pub struct CommandRule {
    pub token: &'static str,
    pub description: &'static str,
    pub respond: Responder,
}

/// The commands the simulated balance answers with data.
pub const STANDARD_RULES: &[CommandRule] = &[
    CommandRule {
        token: "S",
        description: "Stable weight value",
        respond: |r| format!("S S {} KG", synthetic_weight(r.now)),
    },
    CommandRule {
        token: "TA",
        description: "Tare weight value",
        respond: |r| format!("TA A {} KG", synthetic_weight(r.now)),
    },
    CommandRule {
        token: "I11",
        description: "Balance model",
        respond: |r| format!("I11 A \"{}\"", r.profile.model),
    },
    CommandRule {
        token: "I2",
        description: "Balance type",
        respond: |r| format!("I2 A \"{}\"", r.profile.kind),
    },
    CommandRule {
        token: "I4",
        description: "Serial number",
        respond: |r| format!("I4 A \"{}\"", r.profile.serial_number),
    },
    CommandRule {
        token: "I3",
        description: "Firmware revision",
        respond: |r| format!("I3 A \"{}\"", r.profile.firmware_rev),
    },
    CommandRule {
        token: "M01",
        description: "Weighing mode",
        respond: |r| format!("M01 A {}", r.profile.configuration.weigh_mode),
    },
    CommandRule {
        token: "M02",
        description: "Environment stability",
        respond: |r| format!("M02 A {}", r.profile.configuration.environmental_stability),
    },
    CommandRule {
        token: "M03",
        description: "Auto zero mode",
        respond: |r| format!("M03 A {}", r.profile.configuration.auto_zero_mode),
    },
    CommandRule {
        token: "M16",
        description: "Standby timeout",
        respond: |r| format!("M16 A {}", r.profile.configuration.standby_timeout),
    },
];

/// Generic acknowledgement for commands without a dedicated rule
/// (`TIM`, `DAT`, `I10`, `D`, `DW`, `M12`, ...).
fn acknowledge(request: &Request<'_>) -> String {
    format!("{} A", request.command)
}

/// Simulated weight: the current second rounded down to a multiple of ten.
///
/// A stand-in so weight responses change over time. Not a physical model.
pub fn synthetic_weight(now: DateTime<Utc>) -> String {
    let weight = now.second() / 10 * 10;
    format!("{:.2}", f64::from(weight))
}

/// Maps command IDs to responses. Owns the instrument profile.
pub struct Dispatcher {
    profile: InstrumentProfile,
    rules: HashMap<&'static str, CommandRule>,
    fallback: Responder,
}

impl Dispatcher {
    /// A dispatcher answering the standard command set.
    pub fn new(profile: InstrumentProfile) -> Self {
        let mut dispatcher = Self {
            profile,
            rules: HashMap::with_capacity(STANDARD_RULES.len()),
            fallback: acknowledge,
        };
        for rule in STANDARD_RULES {
            dispatcher.register(*rule);
        }
        dispatcher
    }

    /// Adds a rule, replacing any earlier rule for the same token.
    pub fn register(&mut self, rule: CommandRule) {
        self.rules.insert(rule.token, rule);
    }

    pub fn profile(&self) -> &InstrumentProfile {
        &self.profile
    }

    /// Registered rules, sorted by token.
    pub fn rules(&self) -> Vec<&CommandRule> {
        let mut rules: Vec<_> = self.rules.values().collect();
        rules.sort_by_key(|rule| rule.token);
        rules
    }

    /// Produces the response for a canonical command ID. Never fails.
    pub fn dispatch(&self, command: &str, now: DateTime<Utc>) -> String {
        let request = Request {
            command,
            profile: &self.profile,
            now,
        };
        let respond = self
            .rules
            .get(command)
            .map_or(self.fallback, |rule| rule.respond);
        respond(&request)
    }
}
