// ABOUTME: Closed template grammar for referencing workflow input and step outputs
// ABOUTME: Parses `{{ root.path }}` strings into literal and expression segments

use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::Value as JsonValue;
use std::fmt;

use super::error::{Result, TemplateError};

static EXPRESSION_PATTERN: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"\{\{\s*([^{}]*?)\s*\}\}").expect("expression pattern is a valid regex")
});

/// Where an expression starts its lookup.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TemplateRoot {
    /// `workflow.input`
    Input,
    /// `steps.<id>.outputs`
    Step(String),
}

/// A single `{{ ... }}` reference with its path below the root.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Expression {
    pub root: TemplateRoot,
    pub path: Vec<String>,
}

impl Expression {
    /// Parse the text between the braces, e.g. `steps.plan.outputs.items.0`.
    pub fn parse(source: &str) -> Result<Self> {
        let syntax = |reason: String| TemplateError::Syntax {
            template: source.to_string(),
            reason,
        };

        let segments: Vec<&str> = source.split('.').collect();
        if let Some(bad) = segments.iter().find(|segment| !is_identifier(segment)) {
            return Err(syntax(format!("invalid path segment '{}'", bad)));
        }

        match segments.as_slice() {
            ["workflow", "input", rest @ ..] => Ok(Self {
                root: TemplateRoot::Input,
                path: rest.iter().map(|s| s.to_string()).collect(),
            }),
            ["steps", step_id, "outputs", rest @ ..] => Ok(Self {
                root: TemplateRoot::Step(step_id.to_string()),
                path: rest.iter().map(|s| s.to_string()).collect(),
            }),
            ["steps", step_id, ..] => Err(syntax(format!(
                "references to step '{}' must continue with '.outputs'",
                step_id
            ))),
            _ => Err(syntax(
                "expressions must start with 'workflow.input' or 'steps.<id>.outputs'".to_string(),
            )),
        }
    }

    /// The step this expression reads from, if any.
    pub fn step_id(&self) -> Option<&str> {
        match &self.root {
            TemplateRoot::Step(id) => Some(id),
            TemplateRoot::Input => None,
        }
    }
}

impl fmt::Display for Expression {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.root {
            TemplateRoot::Input => write!(f, "workflow.input")?,
            TemplateRoot::Step(id) => write!(f, "steps.{}.outputs", id)?,
        }
        for segment in &self.path {
            write!(f, ".{}", segment)?;
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Segment {
    Literal(String),
    Expression(Expression),
}

/// A parsed template string.
#[derive(Debug, Clone, PartialEq)]
pub struct Template {
    segments: Vec<Segment>,
}

impl Template {
    pub fn parse(text: &str) -> Result<Self> {
        let mut segments = Vec::new();
        let mut cursor = 0;

        for captures in EXPRESSION_PATTERN.captures_iter(text) {
            let (Some(whole), Some(inner)) = (captures.get(0), captures.get(1)) else {
                continue;
            };
            push_literal(&mut segments, &text[cursor..whole.start()], text)?;
            let expression = Expression::parse(inner.as_str()).map_err(|err| match err {
                TemplateError::Syntax { reason, .. } => TemplateError::Syntax {
                    template: text.to_string(),
                    reason,
                },
                other => other,
            })?;
            segments.push(Segment::Expression(expression));
            cursor = whole.end();
        }
        push_literal(&mut segments, &text[cursor..], text)?;

        Ok(Self { segments })
    }

    pub fn segments(&self) -> &[Segment] {
        &self.segments
    }

    pub fn expressions(&self) -> impl Iterator<Item = &Expression> {
        self.segments.iter().filter_map(|segment| match segment {
            Segment::Expression(expression) => Some(expression),
            Segment::Literal(_) => None,
        })
    }

    pub fn is_literal(&self) -> bool {
        self.expressions().next().is_none()
    }

    /// The expression when the whole template is exactly one, with nothing around it.
    pub fn as_single_expression(&self) -> Option<&Expression> {
        match self.segments.as_slice() {
            [Segment::Expression(expression)] => Some(expression),
            _ => None,
        }
    }

    /// Evaluate against a lookup function.
    ///
    /// A whole-string expression yields the referenced value unchanged. Anything else
    /// is rendered into a string: strings verbatim, null as empty, other values as JSON.
    pub fn evaluate<F>(&self, mut lookup: F) -> Result<JsonValue>
    where
        F: FnMut(&Expression) -> Result<JsonValue>,
    {
        if let Some(expression) = self.as_single_expression() {
            return lookup(expression);
        }

        let mut rendered = String::new();
        for segment in &self.segments {
            match segment {
                Segment::Literal(text) => rendered.push_str(text),
                Segment::Expression(expression) => match lookup(expression)? {
                    JsonValue::String(text) => rendered.push_str(&text),
                    JsonValue::Null => {}
                    other => rendered.push_str(&other.to_string()),
                },
            }
        }
        Ok(JsonValue::String(rendered))
    }
}

/// Stray `}}` is plain text; a `{{` left over here opened no well-formed expression.
fn push_literal(segments: &mut Vec<Segment>, text: &str, template: &str) -> Result<()> {
    if text.contains("{{") {
        return Err(TemplateError::Syntax {
            template: template.to_string(),
            reason: "'{{' does not open a well-formed expression".to_string(),
        });
    }
    if !text.is_empty() {
        segments.push(Segment::Literal(text.to_string()));
    }
    Ok(())
}

fn is_identifier(segment: &str) -> bool {
    !segment.is_empty()
        && segment
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
}

/// Walk `path` below `value`. Numeric segments index arrays.
pub fn lookup_path<'a>(value: &'a JsonValue, path: &[String]) -> Option<&'a JsonValue> {
    path.iter().try_fold(value, |current, segment| match current {
        JsonValue::Object(map) => map.get(segment),
        JsonValue::Array(items) => segment.parse::<usize>().ok().and_then(|i| items.get(i)),
        _ => None,
    })
}
