// ABOUTME: Recipient resolution from instance variables
// ABOUTME: Maps recipient rules to contact details stored under reserved keys

use serde::{Deserialize, Serialize};

use crate::model::{RecipientRule, VariableBag};

/// Contact details an action is addressed to.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct Recipient {
    pub id: Option<String>,
    pub name: Option<String>,
    pub phone: Option<String>,
    pub email: Option<String>,
}

impl Recipient {
    pub fn is_blank(&self) -> bool {
        self.phone.is_none() && self.email.is_none() && self.id.is_none()
    }
}

/// Resolve a recipient rule against the bag's reserved contact keys
/// (`lead_phone`, `agent_email`, and so on). Explicit rules name the
/// key prefix directly.
pub fn resolve(rule: &RecipientRule, variables: &VariableBag) -> Recipient {
    let prefix = match rule {
        RecipientRule::Lead => "lead",
        RecipientRule::AssignedAgent => "agent",
        RecipientRule::Owner => "owner",
        RecipientRule::Explicit(prefix) => prefix.as_str(),
    };

    let field = |suffix: &str| {
        variables
            .get(&format!("{}_{}", prefix, suffix))
            .map(VariableBag::value_to_string)
            .filter(|s| !s.is_empty())
    };

    Recipient {
        id: field("id"),
        name: field("name"),
        phone: field("phone"),
        email: field("email"),
    }
}
