//! Rule and template stores.
//!
//! The engine only reads rules and templates (plus bumping a rule's send
//! counter); creating and editing them is the administrative surface.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::RwLock;

use crate::clock::{Clock, SystemClock};
use crate::error::StoreError;
use crate::rule::{AutomationRule, RuleDraft, RuleId};
use crate::template::{Template, TemplateDraft, TemplateId};

/// Storage for automation rules.
pub trait RuleStore: Send + Sync {
    /// Validate and store a new rule.
    fn create_rule(&self, draft: RuleDraft) -> Result<AutomationRule, StoreError>;

    /// Replace the editable part of a rule. Counters are preserved.
    fn update_rule(&self, id: RuleId, draft: RuleDraft) -> Result<AutomationRule, StoreError>;

    /// Toggle a rule on or off.
    fn set_active(&self, id: RuleId, active: bool) -> Result<AutomationRule, StoreError>;

    /// Get a rule by id.
    fn rule(&self, id: RuleId) -> Option<AutomationRule>;

    /// All rules, in creation order.
    fn rules(&self) -> Vec<AutomationRule>;

    /// Count a confirmed send against the rule.
    fn record_sent(&self, id: RuleId, at: DateTime<Utc>) -> Result<(), StoreError>;
}

/// Storage for versioned templates.
pub trait TemplateStore: Send + Sync {
    /// Store version 1 of a new template.
    fn create_template(&self, draft: TemplateDraft) -> Result<Template, StoreError>;

    /// Store a new version of an existing template.
    fn update_template(&self, id: TemplateId, draft: TemplateDraft)
        -> Result<Template, StoreError>;

    /// Latest version of a template.
    fn template(&self, id: TemplateId) -> Option<Template>;

    /// A specific version of a template.
    fn template_version(&self, id: TemplateId, version: u32) -> Option<Template>;

    /// Latest version of every template, in creation order.
    fn templates(&self) -> Vec<Template>;
}

/// Combined store handed to the engine.
pub trait Store: RuleStore + TemplateStore {}

impl<T: RuleStore + TemplateStore> Store for T {}

#[derive(Debug, Default)]
struct Inner {
    rules: Vec<AutomationRule>,
    rule_index: HashMap<RuleId, usize>,
    /// All versions, oldest first.
    templates: HashMap<TemplateId, Vec<Template>>,
    template_order: Vec<TemplateId>,
}

impl Inner {
    fn rule_mut(&mut self, id: RuleId) -> Result<&mut AutomationRule, StoreError> {
        let idx = *self
            .rule_index
            .get(&id)
            .ok_or(StoreError::RuleNotFound(id))?;
        Ok(&mut self.rules[idx])
    }

    fn check_template(&self, id: TemplateId) -> Result<(), StoreError> {
        if self.templates.contains_key(&id) {
            Ok(())
        } else {
            Err(StoreError::TemplateNotFound(id))
        }
    }
}

/// Thread-safe in-memory rule and template store.
///
/// ```
/// use courier::{MemoryStore, RuleDraft, RuleStore, TemplateDraft, TemplateKind, TemplateStore, Trigger};
///
/// let store = MemoryStore::new();
/// let template = store
///     .create_template(TemplateDraft::new("Thanks", TemplateKind::FormConfirmation, "Hi {{name}}", "..."))
///     .unwrap();
/// let rule = store
///     .create_rule(RuleDraft::new("Confirm", Trigger::FormSubmission, template.id))
///     .unwrap();
///
/// assert_eq!(store.rules().len(), 1);
/// assert_eq!(rule.sent_count, 0);
/// ```
#[derive(Debug)]
pub struct MemoryStore {
    inner: RwLock<Inner>,
    clock: Arc<dyn Clock>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::with_clock(Arc::new(SystemClock))
    }

    pub fn with_clock(clock: Arc<dyn Clock>) -> Self {
        Self {
            inner: RwLock::new(Inner::default()),
            clock,
        }
    }

    /// Create a store wrapped in an Arc for sharing.
    pub fn shared() -> Arc<Self> {
        Arc::new(Self::new())
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl RuleStore for MemoryStore {
    fn create_rule(&self, draft: RuleDraft) -> Result<AutomationRule, StoreError> {
        draft.validate()?;
        let mut inner = self.inner.write();
        inner.check_template(draft.template_id)?;

        let rule = AutomationRule {
            id: RuleId::new(),
            name: draft.name,
            trigger: draft.trigger,
            template_id: draft.template_id,
            conditions: draft.conditions,
            is_active: draft.is_active,
            sent_count: 0,
            created_at: self.clock.now(),
            last_sent_at: None,
        };
        let idx = inner.rules.len();
        inner.rule_index.insert(rule.id, idx);
        inner.rules.push(rule.clone());

        tracing::debug!(rule_id = %rule.id, trigger = %rule.trigger, "Rule created");
        Ok(rule)
    }

    fn update_rule(&self, id: RuleId, draft: RuleDraft) -> Result<AutomationRule, StoreError> {
        draft.validate()?;
        let mut inner = self.inner.write();
        inner.check_template(draft.template_id)?;

        let rule = inner.rule_mut(id)?;
        rule.name = draft.name;
        rule.trigger = draft.trigger;
        rule.template_id = draft.template_id;
        rule.conditions = draft.conditions;
        rule.is_active = draft.is_active;

        tracing::debug!(rule_id = %id, "Rule updated");
        Ok(rule.clone())
    }

    fn set_active(&self, id: RuleId, active: bool) -> Result<AutomationRule, StoreError> {
        let mut inner = self.inner.write();
        let rule = inner.rule_mut(id)?;
        rule.is_active = active;

        tracing::info!(rule_id = %id, active, "Rule active flag changed");
        Ok(rule.clone())
    }

    fn rule(&self, id: RuleId) -> Option<AutomationRule> {
        let inner = self.inner.read();
        inner.rule_index.get(&id).map(|&idx| inner.rules[idx].clone())
    }

    fn rules(&self) -> Vec<AutomationRule> {
        self.inner.read().rules.clone()
    }

    fn record_sent(&self, id: RuleId, at: DateTime<Utc>) -> Result<(), StoreError> {
        let mut inner = self.inner.write();
        let rule = inner.rule_mut(id)?;
        rule.sent_count = rule.sent_count.saturating_add(1);
        rule.last_sent_at = Some(at);
        Ok(())
    }
}

impl TemplateStore for MemoryStore {
    fn create_template(&self, draft: TemplateDraft) -> Result<Template, StoreError> {
        draft.validate()?;
        let now = self.clock.now();
        let template = draft.build_at(TemplateId::new(), 1, now, now);

        let mut inner = self.inner.write();
        inner.template_order.push(template.id);
        inner.templates.insert(template.id, vec![template.clone()]);

        tracing::debug!(template_id = %template.id, "Template created");
        Ok(template)
    }

    fn update_template(
        &self,
        id: TemplateId,
        draft: TemplateDraft,
    ) -> Result<Template, StoreError> {
        draft.validate()?;
        let now = self.clock.now();

        let mut inner = self.inner.write();
        let versions = inner
            .templates
            .get_mut(&id)
            .ok_or(StoreError::TemplateNotFound(id))?;
        let (version, created_at) = match versions.last() {
            Some(latest) => (latest.version + 1, latest.created_at),
            None => (1, now),
        };
        let template = draft.build_at(id, version, created_at, now);
        versions.push(template.clone());

        tracing::debug!(template_id = %id, version, "Template updated");
        Ok(template)
    }

    fn template(&self, id: TemplateId) -> Option<Template> {
        self.inner
            .read()
            .templates
            .get(&id)
            .and_then(|versions| versions.last().cloned())
    }

    fn template_version(&self, id: TemplateId, version: u32) -> Option<Template> {
        self.inner
            .read()
            .templates
            .get(&id)
            .and_then(|versions| versions.iter().find(|t| t.version == version).cloned())
    }

    fn templates(&self) -> Vec<Template> {
        let inner = self.inner.read();
        inner
            .template_order
            .iter()
            .filter_map(|id| inner.templates.get(id).and_then(|v| v.last().cloned()))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::address::Address;
    use crate::rule::{RecipientPolicy, Trigger};
    use crate::template::TemplateKind;

    fn draft_template() -> TemplateDraft {
        TemplateDraft::new("t", TemplateKind::Welcome, "Hi {{name}}", "Body")
    }

    #[test]
    fn test_rules_keep_creation_order() {
        let store = MemoryStore::new();
        let t = store.create_template(draft_template()).unwrap();
        let a = store.create_rule(RuleDraft::new("a", Trigger::Manual, t.id)).unwrap();
        let b = store.create_rule(RuleDraft::new("b", Trigger::Manual, t.id)).unwrap();
        let c = store.create_rule(RuleDraft::new("c", Trigger::Manual, t.id)).unwrap();

        let ids: Vec<_> = store.rules().into_iter().map(|r| r.id).collect();
        assert_eq!(ids, vec![a.id, b.id, c.id]);
    }

    #[test]
    fn test_rule_requires_existing_template() {
        let store = MemoryStore::new();
        let missing = TemplateId::new();
        let err = store
            .create_rule(RuleDraft::new("a", Trigger::Manual, missing))
            .unwrap_err();
        assert_eq!(err, StoreError::TemplateNotFound(missing));
    }

    #[test]
    fn test_custom_address_validated_at_save() {
        let store = MemoryStore::new();
        let t = store.create_template(draft_template()).unwrap();
        let draft = RuleDraft::new("a", Trigger::Manual, t.id)
            .recipient(RecipientPolicy::CustomAddress(Address::new("nope")));
        assert!(matches!(
            store.create_rule(draft),
            Err(StoreError::InvalidRule(_))
        ));
        assert!(store.rules().is_empty());
    }

    #[test]
    fn test_update_preserves_counters() {
        let store = MemoryStore::new();
        let t = store.create_template(draft_template()).unwrap();
        let rule = store.create_rule(RuleDraft::new("a", Trigger::Manual, t.id)).unwrap();
        let at = Utc::now();
        store.record_sent(rule.id, at).unwrap();

        let updated = store
            .update_rule(rule.id, RuleDraft::new("renamed", Trigger::Manual, t.id).delay_seconds(5))
            .unwrap();
        assert_eq!(updated.name, "renamed");
        assert_eq!(updated.sent_count, 1);
        assert_eq!(updated.last_sent_at, Some(at));
        assert_eq!(updated.created_at, rule.created_at);
    }

    #[test]
    fn test_set_active_unknown_rule() {
        let store = MemoryStore::new();
        let id = RuleId::new();
        assert_eq!(store.set_active(id, false), Err(StoreError::RuleNotFound(id)));
    }

    #[test]
    fn test_template_versions_are_kept() {
        let store = MemoryStore::new();
        let v1 = store.create_template(draft_template()).unwrap();
        let v2 = store
            .update_template(
                v1.id,
                TemplateDraft::new("t", TemplateKind::Welcome, "Hello {{name}}", "Body"),
            )
            .unwrap();

        assert_eq!(v2.version, 2);
        assert_eq!(store.template(v1.id).unwrap().subject, "Hello {{name}}");
        assert_eq!(store.template_version(v1.id, 1).unwrap().subject, "Hi {{name}}");
        assert!(store.template_version(v1.id, 3).is_none());
        assert_eq!(store.templates().len(), 1);
    }
}
