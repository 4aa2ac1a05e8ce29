//! Message templates and the placeholder renderer.
//!
//! Subjects and bodies carry `{{field}}` placeholders filled from the event
//! payload. Rendering is fail-soft: a field absent from the payload leaves the
//! placeholder text in the output and is reported in
//! [`Rendered::missing_variables`].
//!
//! ```
//! use courier::{render, Payload, TemplateDraft, TemplateKind};
//!
//! let template = TemplateDraft::new("Welcome", TemplateKind::Welcome, "Hi {{name}}", "Thanks {{name}}!")
//!     .build();
//!
//! let rendered = render(&template, &Payload::new());
//! assert_eq!(rendered.subject, "Hi {{name}}");
//! assert_eq!(rendered.missing_variables, vec!["name".to_string()]);
//! ```

use std::collections::BTreeSet;
use std::fmt;
use std::sync::OnceLock;

use chrono::{DateTime, Utc};
use regex::{Captures, Regex};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::StoreError;
use crate::event::Payload;

/// Identity of a [`Template`], shared by all its versions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TemplateId(Uuid);

impl TemplateId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    pub const fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl Default for TemplateId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for TemplateId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// What a template is used for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TemplateKind {
    FormConfirmation,
    AdminAlert,
    Welcome,
    Newsletter,
}

/// One version of a message template.
///
/// Versions are immutable. Editing a template through the
/// [`TemplateStore`](crate::TemplateStore) stores a new version under the same
/// id; jobs keep rendering the version they were scheduled with.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Template {
    pub id: TemplateId,
    pub version: u32,
    pub name: String,
    pub kind: TemplateKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub subject: String,
    pub body: String,
    /// Placeholder names the author expects the payload to carry.
    pub declared_variables: BTreeSet<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Template {
    /// Every placeholder name used in the subject and body.
    pub fn placeholders(&self) -> BTreeSet<String> {
        placeholders_in(&self.subject)
            .chain(placeholders_in(&self.body))
            .collect()
    }
}

/// The operator-editable part of a template.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TemplateDraft {
    pub name: String,
    pub kind: TemplateKind,
    pub description: Option<String>,
    pub subject: String,
    pub body: String,
    /// When `None`, the placeholders found in subject and body are declared.
    pub declared_variables: Option<BTreeSet<String>>,
}

impl TemplateDraft {
    pub fn new(
        name: impl Into<String>,
        kind: TemplateKind,
        subject: impl Into<String>,
        body: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            kind,
            description: None,
            subject: subject.into(),
            body: body.into(),
            declared_variables: None,
        }
    }

    pub fn description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    /// Declare the variables explicitly.
    pub fn declare<I, S>(mut self, variables: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.declared_variables = Some(variables.into_iter().map(Into::into).collect());
        self
    }

    /// Save-time validation.
    pub fn validate(&self) -> Result<(), StoreError> {
        if self.name.trim().is_empty() {
            return Err(StoreError::InvalidTemplate("name must not be empty".into()));
        }
        if self.subject.trim().is_empty() {
            return Err(StoreError::InvalidTemplate(
                "subject must not be empty".into(),
            ));
        }
        Ok(())
    }

    /// Build version 1 of a new template stamped with the current time.
    pub fn build(self) -> Template {
        let now = Utc::now();
        self.build_at(TemplateId::new(), 1, now, now)
    }

    pub(crate) fn build_at(
        self,
        id: TemplateId,
        version: u32,
        created_at: DateTime<Utc>,
        updated_at: DateTime<Utc>,
    ) -> Template {
        let declared_variables = match self.declared_variables {
            Some(declared) => declared,
            None => placeholders_in(&self.subject)
                .chain(placeholders_in(&self.body))
                .collect(),
        };
        Template {
            id,
            version,
            name: self.name,
            kind: self.kind,
            description: self.description,
            subject: self.subject,
            body: self.body,
            declared_variables,
            created_at,
            updated_at,
        }
    }
}

/// Output of [`render`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Rendered {
    pub subject: String,
    pub body: String,
    /// Placeholder names with no payload value, in order of first appearance.
    pub missing_variables: Vec<String>,
}

impl Rendered {
    /// Missing variables that the template declared.
    pub fn missing_declared<'a>(&'a self, template: &'a Template) -> impl Iterator<Item = &'a str> {
        self.missing_variables
            .iter()
            .filter(|name| template.declared_variables.contains(name.as_str()))
            .map(String::as_str)
    }
}

fn placeholder() -> Option<&'static Regex> {
    static PLACEHOLDER: OnceLock<Option<Regex>> = OnceLock::new();
    PLACEHOLDER
        .get_or_init(|| Regex::new(r"\{\{(\w+)\}\}").ok())
        .as_ref()
}

fn placeholders_in(text: &str) -> impl Iterator<Item = String> + '_ {
    placeholder()
        .into_iter()
        .flat_map(move |re| re.captures_iter(text))
        .map(|caps| caps[1].to_string())
}

/// Substitute payload values into a template. Never fails.
pub fn render(template: &Template, payload: &Payload) -> Rendered {
    let mut missing = Vec::new();
    let subject = substitute(&template.subject, payload, &mut missing);
    let body = substitute(&template.body, payload, &mut missing);
    Rendered {
        subject,
        body,
        missing_variables: missing,
    }
}

fn substitute(text: &str, payload: &Payload, missing: &mut Vec<String>) -> String {
    let Some(re) = placeholder() else {
        return text.to_string();
    };
    re.replace_all(text, |caps: &Captures<'_>| match payload.get(&caps[1]) {
        Some(value) => value.clone(),
        None => {
            if !missing.iter().any(|m| m == &caps[1]) {
                missing.push(caps[1].to_string());
            }
            caps[0].to_string()
        }
    })
    .into_owned()
}
