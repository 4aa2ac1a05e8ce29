//! Trigger matching: which active rules an event activates.

use crate::event::TriggerEvent;
use crate::rule::AutomationRule;

/// Whether `rule` fires for `event`.
///
/// The rule must be active, its trigger must equal the event type, and a
/// `form_name` filter (if set) must equal the payload's `form_name`.
pub fn matches(rule: &AutomationRule, event: &TriggerEvent) -> bool {
    if !rule.is_active || rule.trigger != event.event_type {
        return false;
    }
    match &rule.conditions.form_name {
        Some(expected) => event.form_name() == Some(expected.as_str()),
        None => true,
    }
}

/// Rules that fire for `event`, keeping the order of `rules`.
///
/// ```
/// use courier::{matching_rules, Trigger, TriggerEvent};
///
/// let event = TriggerEvent::new(Trigger::Manual, "k");
/// assert!(matching_rules(&event, &[]).is_empty());
/// ```
pub fn matching_rules<'a>(
    event: &TriggerEvent,
    rules: &'a [AutomationRule],
) -> Vec<&'a AutomationRule> {
    rules.iter().filter(|rule| matches(rule, event)).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rule::{RecipientPolicy, RuleConditions, RuleId, Trigger};
    use crate::template::TemplateId;
    use chrono::Utc;

    fn rule(trigger: Trigger, form_name: Option<&str>, active: bool) -> AutomationRule {
        AutomationRule {
            id: RuleId::new(),
            name: "r".into(),
            trigger,
            template_id: TemplateId::new(),
            conditions: RuleConditions {
                form_name: form_name.map(str::to_string),
                delay_seconds: 0,
                recipient: RecipientPolicy::Submitter,
            },
            is_active: active,
            sent_count: 0,
            created_at: Utc::now(),
            last_sent_at: None,
        }
    }

    #[test]
    fn test_trigger_must_match() {
        let event = TriggerEvent::new(Trigger::FormSubmission, "k");
        assert!(matches(&rule(Trigger::FormSubmission, None, true), &event));
        assert!(!matches(&rule(Trigger::UserRegistration, None, true), &event));
    }

    #[test]
    fn test_inactive_never_matches() {
        let event = TriggerEvent::new(Trigger::Manual, "k");
        assert!(!matches(&rule(Trigger::Manual, None, false), &event));
    }

    #[test]
    fn test_form_name_filter() {
        let contact = TriggerEvent::new(Trigger::FormSubmission, "k").field("form_name", "contact");
        let careers = TriggerEvent::new(Trigger::FormSubmission, "k").field("form_name", "careers");
        let unnamed = TriggerEvent::new(Trigger::FormSubmission, "k");

        let filtered = rule(Trigger::FormSubmission, Some("contact"), true);
        assert!(matches(&filtered, &contact));
        assert!(!matches(&filtered, &careers));
        assert!(!matches(&filtered, &unnamed));

        let unfiltered = rule(Trigger::FormSubmission, None, true);
        assert!(matches(&unfiltered, &careers));
        assert!(matches(&unfiltered, &unnamed));
    }

    #[test]
    fn test_preserves_rule_order() {
        let rules = vec![
            rule(Trigger::FormSubmission, None, true),
            rule(Trigger::Manual, None, true),
            rule(Trigger::FormSubmission, Some("contact"), true),
            rule(Trigger::FormSubmission, None, false),
            rule(Trigger::FormSubmission, None, true),
        ];
        let event = TriggerEvent::new(Trigger::FormSubmission, "k").field("form_name", "contact");

        let ids: Vec<_> = matching_rules(&event, &rules).iter().map(|r| r.id).collect();
        assert_eq!(ids, vec![rules[0].id, rules[2].id, rules[4].id]);
    }
}
