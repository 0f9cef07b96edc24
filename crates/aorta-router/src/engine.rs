//! The pure routing function: given a rule set and a message, decide which
//! addresses it should be delivered to. Intentionally free of any I/O so
//! it can be unit tested without a spool or a network connection.

use crate::rule::Rule;
use aorta_common::message::Message;

#[derive(Debug, Clone, Default)]
pub struct RuleSet {
    rules: Vec<Rule>,
}

impl RuleSet {
    pub fn new(rules: Vec<Rule>) -> Self {
        Self { rules }
    }

    pub fn rules(&self) -> &[Rule] {
        &self.rules
    }

    /// Destinations for `message`, unioned across every matching rule and
    /// de-duplicated in first-seen order.
    pub fn route(&self, message: &Message) -> Vec<String> {
        let mut seen = std::collections::HashSet::new();
        let mut out = Vec::new();
        for rule in &self.rules {
            if let Some(dest) = rule.destinations_for(message) {
                for d in dest {
                    if seen.insert(d.clone()) {
                        out.push(d);
                    }
                }
            }
        }
        out
    }
}
