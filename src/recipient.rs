//! Recipient resolution: rule + payload to destination addresses.

use crate::address::Address;
use crate::config::AdminGroups;
use crate::error::ResolutionError;
use crate::event::Payload;
use crate::rule::{AutomationRule, RecipientPolicy};

/// Resolve the destination addresses for a rule.
///
/// `submitter` reads and validates `payload["email"]`. `admin_group` returns
/// the admin list for the payload's `form_name`, falling back to the default
/// list. `custom_address` is returned as stored; it was validated when the
/// rule was saved.
pub fn resolve(
    rule: &AutomationRule,
    payload: &Payload,
    admins: &AdminGroups,
) -> Result<Vec<Address>, ResolutionError> {
    match &rule.conditions.recipient {
        RecipientPolicy::Submitter => {
            let email = payload
                .get("email")
                .map(|e| e.trim())
                .filter(|e| !e.is_empty())
                .ok_or(ResolutionError::MissingSubmitterEmail)?;
            let mut address = Address::parse(email)
                .map_err(|_| ResolutionError::InvalidSubmitterEmail(email.to_string()))?;
            address.name = payload
                .get("name")
                .map(|n| n.trim())
                .filter(|n| !n.is_empty())
                .map(str::to_string);
            Ok(vec![address])
        }
        RecipientPolicy::AdminGroup => {
            let form_name = payload.get("form_name").map(String::as_str);
            let group = admins.for_form(form_name);
            if group.is_empty() {
                return Err(ResolutionError::EmptyAdminGroup);
            }
            Ok(group.to_vec())
        }
        RecipientPolicy::CustomAddress(address) => Ok(vec![address.clone()]),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rule::{RuleConditions, RuleId, Trigger};
    use crate::template::TemplateId;
    use chrono::Utc;

    fn rule(recipient: RecipientPolicy) -> AutomationRule {
        AutomationRule {
            id: RuleId::new(),
            name: "r".into(),
            trigger: Trigger::FormSubmission,
            template_id: TemplateId::new(),
            conditions: RuleConditions::new(recipient),
            is_active: true,
            sent_count: 0,
            created_at: Utc::now(),
            last_sent_at: None,
        }
    }

    fn payload(pairs: &[(&str, &str)]) -> Payload {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn test_submitter() {
        let resolved = resolve(
            &rule(RecipientPolicy::Submitter),
            &payload(&[("email", "a@x.com"), ("name", "A")]),
            &AdminGroups::default(),
        )
        .unwrap();
        assert_eq!(resolved, vec![Address::with_name("A", "a@x.com")]);
    }

    #[test]
    fn test_submitter_missing_or_invalid() {
        let r = rule(RecipientPolicy::Submitter);
        let admins = AdminGroups::default();
        assert_eq!(
            resolve(&r, &Payload::new(), &admins),
            Err(ResolutionError::MissingSubmitterEmail)
        );
        assert_eq!(
            resolve(&r, &payload(&[("email", "  ")]), &admins),
            Err(ResolutionError::MissingSubmitterEmail)
        );
        assert_eq!(
            resolve(&r, &payload(&[("email", "not-an-email")]), &admins),
            Err(ResolutionError::InvalidSubmitterEmail("not-an-email".into()))
        );
    }

    #[test]
    fn test_admin_group_fans_out() {
        let admins = AdminGroups::new(vec![
            Address::new("info@example.com"),
            Address::new("ops@example.com"),
        ])
        .with_form("careers", vec![Address::new("careers@example.com")]);
        let r = rule(RecipientPolicy::AdminGroup);

        let contact = resolve(&r, &payload(&[("form_name", "contact")]), &admins).unwrap();
        assert_eq!(contact.len(), 2);

        let careers = resolve(&r, &payload(&[("form_name", "careers")]), &admins).unwrap();
        assert_eq!(careers, vec![Address::new("careers@example.com")]);
    }

    #[test]
    fn test_empty_admin_group() {
        assert_eq!(
            resolve(&rule(RecipientPolicy::AdminGroup), &Payload::new(), &AdminGroups::default()),
            Err(ResolutionError::EmptyAdminGroup)
        );
    }

    #[test]
    fn test_custom_address_verbatim() {
        let address = Address::with_name("Ops", "ops@example.com");
        let resolved = resolve(
            &rule(RecipientPolicy::CustomAddress(address.clone())),
            &Payload::new(),
            &AdminGroups::default(),
        )
        .unwrap();
        assert_eq!(resolved, vec![address]);
    }
}
