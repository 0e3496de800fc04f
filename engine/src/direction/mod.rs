//! Direction definitions
//!
//! A direction is one business line served by the bot (coffee shop, tobacco
//! shop, marketplace, personal). Each one owns a menu tree, task templates and
//! policy rules. Directions are data: they are parsed from TOML at startup,
//! validated as a whole and never mutated afterwards.
//!
//! # Format
//!
//! ```toml
//! [[directions]]
//! key = "coffee"
//! display_name = "Кофейня"
//! policies = []
//!
//! [[directions.menu]]
//! label = "✅ Чек-ин"
//! flow = "checkin"
//!
//! [[directions.templates]]
//! name = "checkin"
//! title = "Чек-ин"
//!
//! [[directions.templates.fields]]
//! name = "location"
//! label = "Точка"
//! type = "text"
//! ```

pub mod registry;

pub use registry::DirectionRegistry;

use sdk::errors::EngineError;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::Path;

use crate::policy::{self, PolicyRule};
use crate::validator::ValidatorExpr;

/// Directions shipped with the engine
const BUILTIN_DIRECTIONS: &str = include_str!("../../directions/builtin.toml");

/// Kind of value a field collects
#[derive(Debug, Clone, PartialEq)]
pub enum FieldType {
    Text,
    Number,
    Choice(Vec<String>),
    Date,
    Attachment,
}

impl FieldType {
    pub fn as_str(&self) -> &'static str {
        match self {
            FieldType::Text => "text",
            FieldType::Number => "number",
            FieldType::Choice(_) => "choice",
            FieldType::Date => "date",
            FieldType::Attachment => "attachment",
        }
    }
}

/// One step of a template
#[derive(Debug, Clone, PartialEq)]
pub struct FieldDescriptor {
    pub name: String,
    /// Prompt shown to the user
    pub label: String,
    pub field_type: FieldType,
    pub required: bool,
    pub validator: Option<ValidatorExpr>,
}

/// Ordered fields of a template; names are unique
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FieldSchema {
    fields: Vec<FieldDescriptor>,
}

impl FieldSchema {
    pub fn new(fields: Vec<FieldDescriptor>) -> Self {
        Self { fields }
    }

    pub fn get(&self, index: usize) -> Option<&FieldDescriptor> {
        self.fields.get(index)
    }

    pub fn get_by_name(&self, name: &str) -> Option<&FieldDescriptor> {
        self.fields.iter().find(|f| f.name == name)
    }

    pub fn position(&self, name: &str) -> Option<usize> {
        self.fields.iter().position(|f| f.name == name)
    }

    pub fn iter(&self) -> impl Iterator<Item = &FieldDescriptor> {
        self.fields.iter()
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Template {
    pub name: String,
    pub title: String,
    pub fields: FieldSchema,
}

/// Read-only views over committed tasks a menu can offer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReportKind {
    /// Latest tasks of the user in this direction
    Recent,
    /// Tasks still open
    Open,
    /// Tasks waiting for escalation
    Escalated,
}

impl ReportKind {
    pub fn title(&self) -> &'static str {
        match self {
            ReportKind::Recent => "Recent tasks",
            ReportKind::Open => "Open tasks",
            ReportKind::Escalated => "Escalated tasks",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum MenuAction {
    Submenu(Vec<MenuNode>),
    StartFlow(String),
    ShowReport(ReportKind),
}

#[derive(Debug, Clone, PartialEq)]
pub struct MenuNode {
    pub label: String,
    pub action: MenuAction,
}

/// Immutable definition of one direction
#[derive(Debug, Clone, PartialEq)]
pub struct Direction {
    pub key: String,
    pub display_name: String,
    pub menu: Vec<MenuNode>,
    /// Templates in declaration order
    pub templates: Vec<Template>,
    pub policies: Vec<PolicyRule>,
}

impl Direction {
    pub fn template(&self, name: &str) -> Option<&Template> {
        self.templates.iter().find(|t| t.name == name)
    }

    /// Menu level reached by following `path` (indices into nested submenus).
    ///
    /// Returns `None` if the path no longer points at a submenu.
    pub fn menu_at(&self, path: &[usize]) -> Option<&[MenuNode]> {
        let mut level: &[MenuNode] = &self.menu;
        for &index in path {
            match level.get(index).map(|node| &node.action) {
                Some(MenuAction::Submenu(children)) => level = children,
                _ => return None,
            }
        }
        Some(level)
    }
}

// ---------------------------------------------------------------------------
// TOML representation
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
struct DirectionsFile {
    #[serde(default)]
    directions: Vec<RawDirection>,
}

// Required keys are optional here so that a missing one yields a message
// naming the direction instead of a bare serde error.
#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct RawDirection {
    key: Option<String>,
    display_name: Option<String>,
    menu: Option<Vec<RawMenuNode>>,
    templates: Option<Vec<RawTemplate>>,
    policies: Option<Vec<PolicyRule>>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct RawMenuNode {
    label: String,
    flow: Option<String>,
    report: Option<ReportKind>,
    submenu: Option<Vec<RawMenuNode>>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct RawTemplate {
    name: String,
    title: Option<String>,
    fields: Vec<RawField>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct RawField {
    name: String,
    label: Option<String>,
    #[serde(rename = "type")]
    field_type: String,
    #[serde(default)]
    options: Vec<String>,
    #[serde(default = "default_required")]
    required: bool,
    validator: Option<String>,
}

fn default_required() -> bool {
    true
}

/// Parse and validate direction definitions from TOML source.
pub fn load_directions(source: &str) -> Result<Vec<Direction>, EngineError> {
    let file: DirectionsFile = toml::from_str(source)
        .map_err(|e| EngineError::InvalidDirectionConfig(format!("malformed TOML: {}", e)))?;

    if file.directions.is_empty() {
        return Err(EngineError::InvalidDirectionConfig(
            "no directions defined".to_string(),
        ));
    }

    file.directions
        .into_iter()
        .enumerate()
        .map(|(index, raw)| build_direction(index, raw))
        .collect()
}

/// Load directions from a file on disk.
pub fn load_directions_file(path: &Path) -> Result<Vec<Direction>, EngineError> {
    let source = std::fs::read_to_string(path).map_err(|e| {
        EngineError::InvalidDirectionConfig(format!(
            "failed to read directions file {}: {}",
            path.display(),
            e
        ))
    })?;
    load_directions(&source)
}

/// The directions shipped with the engine.
pub fn builtin_directions() -> Result<Vec<Direction>, EngineError> {
    load_directions(BUILTIN_DIRECTIONS)
}

fn invalid(direction: &str, msg: impl AsRef<str>) -> EngineError {
    EngineError::InvalidDirectionConfig(format!("direction '{}': {}", direction, msg.as_ref()))
}

fn build_direction(index: usize, raw: RawDirection) -> Result<Direction, EngineError> {
    let key = raw.key.ok_or_else(|| {
        EngineError::InvalidDirectionConfig(format!("direction #{} is missing 'key'", index + 1))
    })?;

    if key.is_empty()
        || !key
            .chars()
            .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_' || c == '-')
    {
        return Err(invalid(
            &key,
            "key must be a non-empty lowercase slug ([a-z0-9_-])",
        ));
    }

    let display_name = raw
        .display_name
        .filter(|n| !n.trim().is_empty())
        .ok_or_else(|| invalid(&key, "missing 'display_name'"))?;
    let raw_menu = raw.menu.ok_or_else(|| invalid(&key, "missing 'menu'"))?;
    let raw_templates = raw
        .templates
        .ok_or_else(|| invalid(&key, "missing 'templates'"))?;
    let policies = raw
        .policies
        .ok_or_else(|| invalid(&key, "missing 'policies'"))?;

    let mut templates = Vec::with_capacity(raw_templates.len());
    let mut template_names = HashSet::new();
    for raw_template in raw_templates {
        if !template_names.insert(raw_template.name.clone()) {
            return Err(invalid(
                &key,
                format!("duplicate template '{}'", raw_template.name),
            ));
        }
        templates.push(build_template(&key, raw_template)?);
    }

    if raw_menu.is_empty() {
        return Err(invalid(&key, "menu is empty"));
    }
    let menu = build_menu(&key, raw_menu, &templates)?;

    policy::validate_rules(&policies, &templates).map_err(|msg| invalid(&key, msg))?;

    Ok(Direction {
        key,
        display_name,
        menu,
        templates,
        policies,
    })
}

fn build_template(key: &str, raw: RawTemplate) -> Result<Template, EngineError> {
    if raw.fields.is_empty() {
        return Err(invalid(key, format!("template '{}' has no fields", raw.name)));
    }

    let mut seen = HashSet::new();
    let mut fields = Vec::with_capacity(raw.fields.len());

    for raw_field in raw.fields {
        let ctx = format!("template '{}', field '{}'", raw.name, raw_field.name);

        if !seen.insert(raw_field.name.clone()) {
            return Err(invalid(key, format!("{}: duplicate field name", ctx)));
        }

        let field_type = match raw_field.field_type.as_str() {
            "text" => FieldType::Text,
            "number" => FieldType::Number,
            "date" => FieldType::Date,
            "attachment" => FieldType::Attachment,
            "choice" => {
                if raw_field.options.is_empty() {
                    return Err(invalid(key, format!("{}: choice without options", ctx)));
                }
                FieldType::Choice(raw_field.options.clone())
            }
            other => {
                return Err(invalid(key, format!("{}: unknown type '{}'", ctx, other)));
            }
        };

        if !raw_field.options.is_empty() && !matches!(field_type, FieldType::Choice(_)) {
            return Err(invalid(
                key,
                format!("{}: options are only allowed on choice fields", ctx),
            ));
        }

        let validator = match raw_field.validator.as_deref() {
            Some(src) => {
                let expr: ValidatorExpr = src
                    .parse()
                    .map_err(|e: String| invalid(key, format!("{}: {}", ctx, e)))?;
                if expr.is_numeric() && field_type != FieldType::Number {
                    return Err(invalid(
                        key,
                        format!("{}: range validator on a non-number field", ctx),
                    ));
                }
                Some(expr)
            }
            None => None,
        };

        fields.push(FieldDescriptor {
            label: raw_field.label.unwrap_or_else(|| raw_field.name.clone()),
            name: raw_field.name,
            field_type,
            required: raw_field.required,
            validator,
        });
    }

    Ok(Template {
        title: raw.title.unwrap_or_else(|| raw.name.clone()),
        name: raw.name,
        fields: FieldSchema::new(fields),
    })
}

fn build_menu(
    key: &str,
    nodes: Vec<RawMenuNode>,
    templates: &[Template],
) -> Result<Vec<MenuNode>, EngineError> {
    nodes
        .into_iter()
        .map(|node| {
            let action = match (node.flow, node.report, node.submenu) {
                (Some(flow), None, None) => {
                    if !templates.iter().any(|t| t.name == flow) {
                        return Err(invalid(
                            key,
                            format!("menu '{}' starts unknown template '{}'", node.label, flow),
                        ));
                    }
                    MenuAction::StartFlow(flow)
                }
                (None, Some(report), None) => MenuAction::ShowReport(report),
                (None, None, Some(children)) => {
                    if children.is_empty() {
                        return Err(invalid(
                            key,
                            format!("submenu '{}' is empty", node.label),
                        ));
                    }
                    MenuAction::Submenu(build_menu(key, children, templates)?)
                }
                _ => {
                    return Err(invalid(
                        key,
                        format!(
                            "menu '{}' needs exactly one of 'flow', 'report' or 'submenu'",
                            node.label
                        ),
                    ));
                }
            };
            Ok(MenuNode {
                label: node.label,
                action,
            })
        })
        .collect()
}
