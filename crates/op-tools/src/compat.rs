//! Tool/Method compatibility validation
//!
//! The validator is stateless. A report depends only on the tool, the method
//! it resolves to and the control-parameter allow-list, and issues come out in
//! declaration order, so repeated runs over unchanged registries serialize
//! identically.

use op_core::config::DispatchSettings;
use op_core::{Constraints, Error, ParamType, ParameterDescriptor, Result};
use op_introspection::SchemaShape;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeSet;
use std::fmt;
use tracing::{debug, warn};

use crate::method::MethodDefinition;
use crate::registry::{MethodRegistry, Registries};
use crate::tool::ToolDefinition;

/// Reason attached to a required method input the tool does not declare
pub const MISSING_REQUIRED: &str = "missing required parameter";

/// Reason attached to a tool parameter the method never reads
pub const UNUSED_BY_METHOD: &str = "unused by method";

/// Issue category
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IssueCategory {
    UnresolvedMethod,
    MissingRequired,
    TypeMismatch,
    UnknownType,
    ConstraintWider,
    ConstraintConflict,
    ConstraintNarrower,
    RequirednessMismatch,
    UnusedByMethod,
    /// Method introspection yielded no parameters; cannot tell a genuinely
    /// parameterless method from an introspection gap
    EmptyMethodSchema,
}

impl IssueCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            IssueCategory::UnresolvedMethod => "unresolved_method",
            IssueCategory::MissingRequired => "missing_required",
            IssueCategory::TypeMismatch => "type_mismatch",
            IssueCategory::UnknownType => "unknown_type",
            IssueCategory::ConstraintWider => "constraint_wider",
            IssueCategory::ConstraintConflict => "constraint_conflict",
            IssueCategory::ConstraintNarrower => "constraint_narrower",
            IssueCategory::RequirednessMismatch => "requiredness_mismatch",
            IssueCategory::UnusedByMethod => "unused_by_method",
            IssueCategory::EmptyMethodSchema => "empty_method_schema",
        }
    }
}

impl fmt::Display for IssueCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One error or warning
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompatibilityIssue {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parameter: Option<String>,
    pub category: IssueCategory,
    pub reason: String,
}

impl CompatibilityIssue {
    fn on(parameter: &str, category: IssueCategory, reason: impl Into<String>) -> Self {
        Self {
            parameter: Some(parameter.to_string()),
            category,
            reason: reason.into(),
        }
    }

    fn general(category: IssueCategory, reason: impl Into<String>) -> Self {
        Self {
            parameter: None,
            category,
            reason: reason.into(),
        }
    }
}

impl fmt::Display for CompatibilityIssue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.parameter {
            Some(p) => write!(f, "[{}] {}: {}", self.category, p, self.reason),
            None => write!(f, "[{}] {}", self.category, self.reason),
        }
    }
}

/// Result of validating one tool against its method
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompatibilityReport {
    pub tool_name: String,
    pub method_name: String,
    pub errors: Vec<CompatibilityIssue>,
    pub warnings: Vec<CompatibilityIssue>,
}

impl CompatibilityReport {
    fn new(tool: &ToolDefinition) -> Self {
        Self {
            tool_name: tool.name.clone(),
            method_name: tool.method.clone(),
            errors: Vec::new(),
            warnings: Vec::new(),
        }
    }

    pub fn is_compatible(&self) -> bool {
        self.errors.is_empty()
    }

    pub fn has_warnings(&self) -> bool {
        !self.warnings.is_empty()
    }

    /// Turn a report with errors into `SchemaIncompatible`
    pub fn into_result(self) -> Result<Self> {
        if self.is_compatible() {
            return Ok(self);
        }
        let details: Vec<String> = self.errors.iter().map(ToString::to_string).collect();
        Err(Error::SchemaIncompatible(format!(
            "tool '{}' -> method '{}': {}",
            self.tool_name,
            self.method_name,
            details.join("; ")
        )))
    }

    fn error(&mut self, issue: CompatibilityIssue) {
        self.errors.push(issue);
    }

    fn warn(&mut self, issue: CompatibilityIssue) {
        self.warnings.push(issue);
    }
}

/// Reports for every registered tool, sorted by tool name
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ValidationSummary {
    pub reports: Vec<CompatibilityReport>,
    pub error_count: usize,
    pub warning_count: usize,
}

impl ValidationSummary {
    /// Whether the build gate passes. Warnings fail only in strict mode.
    pub fn passes(&self, strict: bool) -> bool {
        self.error_count == 0 && (!strict || self.warning_count == 0)
    }
}

/// Stateless compatibility checker
#[derive(Debug, Clone)]
pub struct CompatibilityValidator {
    control_parameters: BTreeSet<String>,
}

impl Default for CompatibilityValidator {
    fn default() -> Self {
        Self::from_settings(&DispatchSettings::default())
    }
}

impl CompatibilityValidator {
    /// Validator with an explicit control-parameter allow-list
    pub fn new<I, S>(control_parameters: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            control_parameters: control_parameters.into_iter().map(Into::into).collect(),
        }
    }

    pub fn from_settings(settings: &DispatchSettings) -> Self {
        Self::new(settings.control_parameters.iter().cloned())
    }

    pub fn is_control_parameter(&self, name: &str) -> bool {
        self.control_parameters.contains(name)
    }

    /// Validate one tool against the method it names
    pub fn validate(&self, tool: &ToolDefinition, methods: &MethodRegistry) -> CompatibilityReport {
        let mut report = CompatibilityReport::new(tool);

        let Some(method) = methods.get(&tool.method) else {
            report.error(CompatibilityIssue::general(
                IssueCategory::UnresolvedMethod,
                format!("referenced method '{}' is not registered", tool.method),
            ));
            return report;
        };

        self.compare(tool, method, &mut report);

        debug!(
            tool = %report.tool_name,
            method = %report.method_name,
            errors = report.errors.len(),
            warnings = report.warnings.len(),
            "Validated tool"
        );
        report
    }

    /// Validate every registered tool
    pub fn validate_all(&self, registries: &Registries) -> ValidationSummary {
        let mut reports: Vec<CompatibilityReport> = registries
            .tools
            .iter()
            .map(|tool| self.validate(tool, &registries.methods))
            .collect();
        reports.sort_by(|a, b| a.tool_name.cmp(&b.tool_name));

        let error_count = reports.iter().map(|r| r.errors.len()).sum();
        let warning_count = reports.iter().map(|r| r.warnings.len()).sum();
        if error_count > 0 {
            warn!(error_count, warning_count, "Compatibility validation found errors");
        }

        ValidationSummary {
            reports,
            error_count,
            warning_count,
        }
    }

    fn compare(&self, tool: &ToolDefinition, method: &MethodDefinition, report: &mut CompatibilityReport) {
        if method.input_schema.is_empty() {
            let reason = match method.input_shape {
                SchemaShape::Opaque => {
                    "method input model has an irregular shape and yielded no parameters"
                }
                _ => "method input model yielded no parameters",
            };
            report.warn(CompatibilityIssue::general(IssueCategory::EmptyMethodSchema, reason));
        }

        for expected in &method.input_schema {
            if expected.required && tool.parameter(&expected.name).is_none() {
                report.error(CompatibilityIssue::on(
                    &expected.name,
                    IssueCategory::MissingRequired,
                    MISSING_REQUIRED,
                ));
            }
        }

        for declared in &tool.parameters {
            match method.input(&declared.name) {
                Some(expected) => compare_parameter(declared, expected, report),
                None if self.is_control_parameter(&declared.name) => {}
                // Nothing is known about the method side, so "unused" would be a guess
                None if method.input_schema.is_empty() => {}
                None => report.warn(CompatibilityIssue::on(
                    &declared.name,
                    IssueCategory::UnusedByMethod,
                    UNUSED_BY_METHOD,
                )),
            }
        }
    }
}

/// Tool-side type `tool` may feed method-side type `method`
fn types_compatible(tool: ParamType, method: ParamType) -> bool {
    tool == method
        || matches!(
            (tool, method),
            (ParamType::Integer, ParamType::Number) | (ParamType::Enum, ParamType::String)
        )
}

fn compare_parameter(
    tool: &ParameterDescriptor,
    method: &ParameterDescriptor,
    report: &mut CompatibilityReport,
) {
    let name = tool.name.as_str();

    if tool.declared_type == ParamType::Unknown || method.declared_type == ParamType::Unknown {
        report.warn(CompatibilityIssue::on(
            name,
            IssueCategory::UnknownType,
            format!(
                "cannot compare types: tool declares {}, method declares {}",
                tool.declared_type, method.declared_type
            ),
        ));
    } else if !types_compatible(tool.declared_type, method.declared_type) {
        report.error(CompatibilityIssue::on(
            name,
            IssueCategory::TypeMismatch,
            format!(
                "tool declares {}, method expects {}",
                tool.declared_type, method.declared_type
            ),
        ));
        return;
    } else if let (Some(t), Some(m)) = (tool.item_type, method.item_type) {
        if t != ParamType::Unknown && m != ParamType::Unknown && !types_compatible(t, m) {
            report.error(CompatibilityIssue::on(
                name,
                IssueCategory::TypeMismatch,
                format!("tool items are {}, method expects items of {}", t, m),
            ));
            return;
        }
    }

    if method.required && !tool.required && tool.default.is_none() {
        report.warn(CompatibilityIssue::on(
            name,
            IssueCategory::RequirednessMismatch,
            "required by method but optional without default on tool",
        ));
    }

    compare_constraints(name, &tool.constraints, &method.constraints, report);
}

/// Where a tool-side bound sits relative to the method-side one
enum Bound {
    Same,
    Narrower,
    Wider,
}

fn lower_bound(tool: f64, method: f64) -> Bound {
    if tool > method {
        Bound::Narrower
    } else if tool < method {
        Bound::Wider
    } else {
        Bound::Same
    }
}

fn upper_bound(tool: f64, method: f64) -> Bound {
    if tool < method {
        Bound::Narrower
    } else if tool > method {
        Bound::Wider
    } else {
        Bound::Same
    }
}

/// Equal bounds differ when only one side excludes the bound value
fn with_exclusivity(bound: Bound, tool_exclusive: bool, method_exclusive: bool) -> Bound {
    match (bound, tool_exclusive, method_exclusive) {
        (Bound::Same, true, false) => Bound::Narrower,
        (Bound::Same, false, true) => Bound::Wider,
        (bound, _, _) => bound,
    }
}

fn disjoint(tool: (Option<f64>, Option<f64>), method: (Option<f64>, Option<f64>)) -> bool {
    let below = matches!((tool.1, method.0), (Some(t_max), Some(m_min)) if t_max < m_min);
    let above = matches!((tool.0, method.1), (Some(t_min), Some(m_max)) if t_min > m_max);
    below || above
}

fn as_f64(v: Option<usize>) -> Option<f64> {
    v.map(|n| n as f64)
}

fn compare_bound(
    name: &str,
    label: &str,
    bound: Bound,
    tool: f64,
    method: f64,
    report: &mut CompatibilityReport,
) {
    match bound {
        Bound::Same => {}
        Bound::Narrower => report.warn(CompatibilityIssue::on(
            name,
            IssueCategory::ConstraintNarrower,
            format!("tool {} {} is narrower than method {}", label, tool, method),
        )),
        Bound::Wider => report.error(CompatibilityIssue::on(
            name,
            IssueCategory::ConstraintWider,
            format!("tool {} {} is wider than method {}", label, tool, method),
        )),
    }
}

fn compare_range(
    name: &str,
    labels: (&str, &str),
    tool: (Option<f64>, Option<f64>),
    method: (Option<f64>, Option<f64>),
    exclusive: ((bool, bool), (bool, bool)),
    report: &mut CompatibilityReport,
) {
    if disjoint(tool, method) {
        report.error(CompatibilityIssue::on(
            name,
            IssueCategory::ConstraintConflict,
            format!(
                "tool {}/{} range does not overlap the method range",
                labels.0, labels.1
            ),
        ));
        return;
    }
    let ((tool_min_ex, tool_max_ex), (method_min_ex, method_max_ex)) = exclusive;
    if let (Some(t), Some(m)) = (tool.0, method.0) {
        let bound = with_exclusivity(lower_bound(t, m), tool_min_ex, method_min_ex);
        compare_bound(name, labels.0, bound, t, m, report);
    }
    if let (Some(t), Some(m)) = (tool.1, method.1) {
        let bound = with_exclusivity(upper_bound(t, m), tool_max_ex, method_max_ex);
        compare_bound(name, labels.1, bound, t, m, report);
    }
}

fn compare_constraints(
    name: &str,
    tool: &Constraints,
    method: &Constraints,
    report: &mut CompatibilityReport,
) {
    compare_range(
        name,
        ("min", "max"),
        (tool.min, tool.max),
        (method.min, method.max),
        (
            (tool.exclusive_min, tool.exclusive_max),
            (method.exclusive_min, method.exclusive_max),
        ),
        report,
    );
    compare_range(
        name,
        ("min_length", "max_length"),
        (as_f64(tool.min_length), as_f64(tool.max_length)),
        (as_f64(method.min_length), as_f64(method.max_length)),
        ((false, false), (false, false)),
        report,
    );

    if let (Some(t), Some(m)) = (&tool.pattern, &method.pattern) {
        if t != m {
            report.error(CompatibilityIssue::on(
                name,
                IssueCategory::ConstraintConflict,
                format!("tool pattern '{}' differs from method pattern '{}'", t, m),
            ));
        }
    }

    if let (Some(t), Some(m)) = (&tool.allowed_values, &method.allowed_values) {
        compare_allowed(name, t, m, report);
    }
}

fn compare_allowed(name: &str, tool: &[Value], method: &[Value], report: &mut CompatibilityReport) {
    let rejected: Vec<&Value> = tool.iter().filter(|v| !method.contains(v)).collect();
    if rejected.is_empty() {
        if method.iter().any(|v| !tool.contains(v)) {
            report.warn(CompatibilityIssue::on(
                name,
                IssueCategory::ConstraintNarrower,
                "tool allows a subset of the method's values",
            ));
        }
    } else if rejected.len() == tool.len() {
        report.error(CompatibilityIssue::on(
            name,
            IssueCategory::ConstraintConflict,
            "tool and method allowed values do not overlap",
        ));
    } else {
        let listed: Vec<String> = rejected.iter().map(|v| v.to_string()).collect();
        report.error(CompatibilityIssue::on(
            name,
            IssueCategory::ConstraintWider,
            format!("tool allows values the method rejects: {}", listed.join(", ")),
        ));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tool::handler_fn;
    use op_introspection::{introspect_json_schema, FieldSpec, InputModel, ModelSpec, TypeExpr};
    use serde_json::json;

    struct CreateWidget;

    impl InputModel for CreateWidget {
        fn model_spec() -> ModelSpec {
            ModelSpec::new("CreateWidget")
                .field(FieldSpec::new("title", TypeExpr::named("str")))
                .field(FieldSpec::new("count", TypeExpr::named("float")).default_value(json!(1)))
                .field(FieldSpec::new("color", TypeExpr::parse("Optional[Literal['red', 'blue', 'green']]")))
        }
    }

    fn registries(tool: ToolDefinition) -> Registries {
        let mut r = Registries::new();
        r.register_method(MethodDefinition::from_model::<CreateWidget>(
            "widget.create",
            handler_fn(|_, input| Ok(input)),
        ))
        .unwrap();
        r.register_tool(tool).unwrap();
        r
    }

    fn validate(tool: ToolDefinition) -> CompatibilityReport {
        let r = registries(tool.clone());
        CompatibilityValidator::default().validate(&tool, &r.methods)
    }

    fn full_tool() -> ToolDefinition {
        ToolDefinition::new("create_widget_tool", "widget.create")
            .param(ParameterDescriptor::required("title", "string"))
            .param(ParameterDescriptor::optional("count", "int").default_value(json!(1)))
            .param(ParameterDescriptor::optional("color", "enum"))
    }

    #[test]
    fn test_compatible_tool_has_no_errors() {
        let report = validate(full_tool().param(ParameterDescriptor::optional("dry_run", "bool")));
        assert!(report.is_compatible(), "{:?}", report.errors);
        assert!(report.warnings.is_empty(), "{:?}", report.warnings);
    }

    #[test]
    fn test_missing_required_names_parameter() {
        let tool = ToolDefinition::new("create_widget_tool", "widget.create")
            .param(ParameterDescriptor::optional("count", "int"));
        let report = validate(tool);
        assert_eq!(
            report.errors,
            vec![CompatibilityIssue {
                parameter: Some("title".to_string()),
                category: IssueCategory::MissingRequired,
                reason: "missing required parameter".to_string(),
            }]
        );
    }

    #[test]
    fn test_unresolved_method_is_single_error() {
        let tool = ToolDefinition::new("ghost_tool", "widget.ghost")
            .param(ParameterDescriptor::required("title", "string"));
        let report = validate(tool);
        assert_eq!(report.errors.len(), 1);
        assert_eq!(report.errors[0].category, IssueCategory::UnresolvedMethod);
        assert!(report.warnings.is_empty());
    }

    #[test]
    fn test_type_mismatch_outside_alias_table() {
        let mut tool = full_tool();
        tool.parameters[0] = ParameterDescriptor::required("title", "int");
        let report = validate(tool);
        assert_eq!(report.errors.len(), 1);
        assert_eq!(report.errors[0].category, IssueCategory::TypeMismatch);
    }

    #[test]
    fn test_constraints_narrower_wider_conflict() {
        let method = ParameterDescriptor::required("n", "int")
            .constrained(Constraints::default().range(Some(0.0), Some(100.0)));
        let mut report = CompatibilityReport {
            tool_name: "t".into(),
            method_name: "m".into(),
            errors: vec![],
            warnings: vec![],
        };

        let narrower = ParameterDescriptor::required("n", "int")
            .constrained(Constraints::default().range(Some(10.0), Some(50.0)));
        compare_parameter(&narrower, &method, &mut report);
        assert!(report.errors.is_empty());
        assert_eq!(report.warnings.len(), 2);

        let wider = ParameterDescriptor::required("n", "int")
            .constrained(Constraints::default().range(Some(-5.0), None));
        compare_parameter(&wider, &method, &mut report);
        assert_eq!(report.errors.len(), 1);
        assert_eq!(report.errors[0].category, IssueCategory::ConstraintWider);

        let disjoint = ParameterDescriptor::required("n", "int")
            .constrained(Constraints::default().range(Some(200.0), Some(300.0)));
        compare_parameter(&disjoint, &method, &mut report);
        assert_eq!(report.errors[1].category, IssueCategory::ConstraintConflict);
    }

    #[test]
    fn test_exclusive_bound_against_inclusive() {
        let method = ParameterDescriptor::required("ratio", "float").constrained(
            Constraints::default()
                .range(Some(0.0), Some(1.0))
                .exclusive(true, false),
        );
        let mut report = CompatibilityReport {
            tool_name: "t".into(),
            method_name: "m".into(),
            errors: vec![],
            warnings: vec![],
        };

        let inclusive = ParameterDescriptor::required("ratio", "float")
            .constrained(Constraints::default().range(Some(0.0), Some(1.0)));
        compare_parameter(&inclusive, &method, &mut report);
        assert_eq!(report.errors.len(), 1);
        assert_eq!(report.errors[0].category, IssueCategory::ConstraintWider);

        let stricter = ParameterDescriptor::required("ratio", "float").constrained(
            Constraints::default()
                .range(Some(0.0), Some(1.0))
                .exclusive(true, true),
        );
        compare_parameter(&stricter, &method, &mut report);
        assert_eq!(report.errors.len(), 1);
        assert_eq!(report.warnings.len(), 1);
        assert_eq!(report.warnings[0].category, IssueCategory::ConstraintNarrower);
    }

    #[test]
    fn test_allowed_values() {
        let mut tool = full_tool();
        tool.parameters[2] = ParameterDescriptor::optional("color", "enum")
            .constrained(Constraints::default().one_of(vec![json!("red")]));
        let report = validate(tool.clone());
        assert!(report.is_compatible());
        assert_eq!(report.warnings[0].category, IssueCategory::ConstraintNarrower);

        tool.parameters[2] = ParameterDescriptor::optional("color", "enum")
            .constrained(Constraints::default().one_of(vec![json!("red"), json!("pink")]));
        let report = validate(tool);
        assert_eq!(report.errors[0].category, IssueCategory::ConstraintWider);
    }

    #[test]
    fn test_unused_extra_parameter_warns() {
        let report = validate(full_tool().param(ParameterDescriptor::optional("shade", "string")));
        assert!(report.is_compatible());
        assert_eq!(report.warnings.len(), 1);
        assert_eq!(report.warnings[0].reason, "unused by method");
        assert_eq!(report.warnings[0].parameter.as_deref(), Some("shade"));
    }

    #[test]
    fn test_empty_method_schema_is_distinct_warning() {
        let mut r = Registries::new();
        r.register_method(
            MethodDefinition::new("widget.list", handler_fn(|_, _| Ok(json!([]))))
                .with_input(introspect_json_schema(&json!({"additionalProperties": true}))),
        )
        .unwrap();
        let tool = ToolDefinition::new("list_widgets_tool", "widget.list")
            .param(ParameterDescriptor::optional("filter", "string"));
        r.register_tool(tool.clone()).unwrap();

        let report = CompatibilityValidator::default().validate(&tool, &r.methods);
        assert!(report.is_compatible());
        assert_eq!(report.warnings.len(), 1);
        assert_eq!(report.warnings[0].category, IssueCategory::EmptyMethodSchema);
    }

    #[test]
    fn test_validate_all_is_idempotent() {
        let mut r = registries(full_tool());
        r.register_tool(ToolDefinition::new("a_tool", "widget.create")).unwrap();

        let validator = CompatibilityValidator::default();
        let first = serde_json::to_string(&validator.validate_all(&r)).unwrap();
        let second = serde_json::to_string(&validator.validate_all(&r)).unwrap();
        assert_eq!(first, second);

        let summary = validator.validate_all(&r);
        assert_eq!(summary.reports[0].tool_name, "a_tool");
        assert_eq!(summary.error_count, 1);
        assert!(!summary.passes(false));
        assert!(summary.reports[0].clone().into_result().is_err());
    }
}
