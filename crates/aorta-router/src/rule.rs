//! Rule definitions and the file loader that turns a YAML or JSON rule
//! file into a validated [`Rule`] list, surfacing the file path and rule
//! index on any validation failure.

use crate::criterion::Criterion;
use crate::error::{Result, RuleError};
use aorta_common::message::Message;
use serde::{Deserialize, Serialize};
use std::path::Path;

/// One routing rule: if every criterion matches and the message's own
/// address isn't named in `exclude`, the message is routed to every
/// address in `destinations` (plus the sender's address, if
/// `return_to_sender` is set).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Rule {
    #[serde(default)]
    pub return_to_sender: bool,
    pub destinations: Vec<String>,
    pub criterions: Vec<Criterion>,
    #[serde(default)]
    pub exclude: Vec<String>,
}

impl Rule {
    /// A rule matches when every criterion matches and the message's
    /// address is not named in `exclude`. `exclude` suppresses the whole
    /// rule for messages originating from those addresses; it does not
    /// filter `destinations`.
    pub fn is_match(&self, message: &Message) -> bool {
        if self
            .criterions
            .iter()
            .any(|c| !c.matches(message.attribute(&c.attname).as_ref()))
        {
            return false;
        }
        if let Some(address) = &message.address {
            if self.exclude.contains(address) {
                return false;
            }
        }
        true
    }

    /// Destinations this rule contributes for `message`, or `None` if it
    /// doesn't match. `return_to_sender` adds the message's own `address`
    /// back into the destination set, covering reply-style routes.
    pub fn destinations_for(&self, message: &Message) -> Option<Vec<String>> {
        if !self.is_match(message) {
            return None;
        }
        let mut dest = self.destinations.clone();
        if self.return_to_sender {
            if let Some(sender) = message.address.clone() {
                if !dest.contains(&sender) {
                    dest.push(sender);
                }
            }
        }
        Some(dest)
    }

    fn validate(&self, path: &str, index: usize) -> Result<()> {
        if self.destinations.is_empty() && !self.return_to_sender {
            return Err(RuleError::InvalidRule {
                path: path.to_string(),
                index,
                reason: "rule has no destinations and return_to_sender is false".into(),
            });
        }
        if self.criterions.is_empty() {
            return Err(RuleError::InvalidRule {
                path: path.to_string(),
                index,
                reason: "rule must have at least one criterion".into(),
            });
        }
        Ok(())
    }
}

/// Loads and validates a rule file. YAML and JSON are both accepted since
/// JSON is valid YAML; the file extension does not need to match.
pub fn load_rules(path: impl AsRef<Path>) -> Result<Vec<Rule>> {
    let path_ref = path.as_ref();
    let path_str = path_ref.display().to_string();
    let contents = std::fs::read_to_string(path_ref).map_err(|e| RuleError::Io {
        path: path_str.clone(),
        source: e,
    })?;
    let rules: Vec<Rule> = serde_yaml::from_str(&contents).map_err(|e| RuleError::Parse {
        path: path_str.clone(),
        source: e,
    })?;
    for (index, rule) in rules.iter().enumerate() {
        rule.validate(&path_str, index)?;
    }
    Ok(rules)
}

#[cfg(test)]
mod tests {
    use super::*;
    use aorta_common::message::MessageClass;

    #[test]
    fn loads_a_valid_yaml_rule_file() {
        let yaml = r#"
- destinations: ["orders-service"]
  criterions:
    - name: address
      operator: eq
      value: "orders.created"
"#;
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("rules.yaml");
        std::fs::write(&path, yaml).unwrap();

        let rules = load_rules(&path).unwrap();
        assert_eq!(rules.len(), 1);
        assert_eq!(rules[0].destinations, vec!["orders-service".to_string()]);
    }

    #[test]
    fn rejects_a_rule_with_no_criteria_naming_the_file_and_index() {
        let yaml = r#"
- destinations: ["orders-service"]
  criterions: []
"#;
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("rules.yaml");
        std::fs::write(&path, yaml).unwrap();

        let err = load_rules(&path).unwrap_err();
        match err {
            RuleError::InvalidRule { index, .. } => assert_eq!(index, 0),
            other => panic!("expected InvalidRule, got {other:?}"),
        }
    }

    #[test]
    fn return_to_sender_adds_the_message_address_as_a_destination() {
        let rule = Rule {
            return_to_sender: true,
            destinations: vec!["archive".into()],
            criterions: vec![],
            exclude: vec![],
        };
        let mut msg = aorta_common::message::Message::new(MessageClass::Event, vec![]);
        msg.address = Some("orders.created".into());
        let dest = rule.destinations_for(&msg).unwrap();
        assert!(dest.contains(&"archive".to_string()));
        assert!(dest.contains(&"orders.created".to_string()));
    }

    #[test]
    fn exclude_suppresses_the_whole_rule_for_the_listed_sender_address() {
        let rule = Rule {
            return_to_sender: false,
            destinations: vec!["orders-service".into()],
            criterions: vec![],
            exclude: vec!["blocked.sender".into()],
        };
        let mut msg = aorta_common::message::Message::new(MessageClass::Event, vec![]);
        msg.address = Some("blocked.sender".into());
        assert!(rule.destinations_for(&msg).is_none());

        msg.address = Some("allowed.sender".into());
        let dest = rule.destinations_for(&msg).unwrap();
        assert_eq!(dest, vec!["orders-service".to_string()]);
    }
}
