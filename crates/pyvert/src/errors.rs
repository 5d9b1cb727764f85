use std::fmt::{self, Display};

use ruff_text_size::TextRange;
use strum::{Display as StrumDisplay, IntoStaticStr};

/// Result type alias for conversion-time operations (extraction, analysis,
/// template expansion, rewrite passes, pipeline assembly).
pub type ConvertResult<T> = Result<T, ConvertError>;

/// Result type alias for operations that can produce a runtime error.
pub type RunResult<T> = Result<T, RunError>;

/// A failure while converting an entity.
///
/// Every variant aborts the whole conversion; no partial artifacts are ever
/// returned. The `Visit` variant is the transformer framework's context
/// wrapper: it records which pass and which node failed while preserving the
/// original error untouched underneath (available via [`std::error::Error::source`]).
#[derive(Debug)]
pub enum ConvertError {
    /// Source recovery failed: the entity's source could not be turned into a
    /// standalone-parseable fragment. Carries every source text that was
    /// attempted, in order.
    Extraction { message: String, attempted: Vec<String> },
    /// An assignment or loop target has a shape the passes cannot rewrite
    /// (anything other than a plain name or a tuple/list of plain names).
    UnsupportedTarget { found: String, range: TextRange },
    /// A construct the passes refuse to rewrite (e.g. augmented assignment)
    /// or the lowering does not model.
    UnsupportedConstruct { construct: String, range: TextRange },
    /// A template did not have the shape the caller required.
    TemplateShape { expected: &'static str, found: String },
    /// The same original function was registered twice in a call-replacement
    /// registry.
    DuplicateReplacement { original: String },
    /// Two trees expected to be congruent for paired traversal differ in shape.
    StructuralMismatch { left: String, right: String },
    /// The source text failed to parse.
    Parse { message: String },
    /// Context wrapper added by the transformer framework. `source` is the
    /// original failure, preserved verbatim; a `Visit` is never re-wrapped.
    Visit {
        pass: &'static str,
        node: &'static str,
        range: TextRange,
        source: Box<ConvertError>,
    },
    /// A runtime failure surfaced while compiling or rebinding the converted
    /// entity.
    Run(RunError),
}

impl ConvertError {
    /// True if this error already carries visit context.
    pub fn is_attributed(&self) -> bool {
        matches!(self, Self::Visit { .. })
    }
}

impl Display for ConvertError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Extraction { message, attempted } => {
                write!(f, "failed to extract entity source: {message}")?;
                for (i, source) in attempted.iter().enumerate() {
                    write!(f, "\nattempt {}:\n{source}", i + 1)?;
                }
                Ok(())
            }
            Self::UnsupportedTarget { found, range } => {
                write!(
                    f,
                    "target must be a plain name or a tuple/list of names, got {found} at {}..{}",
                    u32::from(range.start()),
                    u32::from(range.end())
                )
            }
            Self::UnsupportedConstruct { construct, range } => {
                write!(
                    f,
                    "unsupported construct: {construct} at {}..{}",
                    u32::from(range.start()),
                    u32::from(range.end())
                )
            }
            Self::TemplateShape { expected, found } => {
                write!(f, "template expected {expected}, found {found}")
            }
            Self::DuplicateReplacement { original } => {
                write!(f, "{original} already has a registered replacement")
            }
            Self::StructuralMismatch { left, right } => {
                write!(f, "trees diverge structurally: {left} != {right}")
            }
            Self::Parse { message } => write!(f, "parse error: {message}"),
            Self::Visit {
                pass,
                node,
                range,
                source,
            } => {
                write!(
                    f,
                    "{source}\n  while visiting {node} at {}..{} in pass {pass}",
                    u32::from(range.start()),
                    u32::from(range.end())
                )
            }
            Self::Run(err) => write!(f, "{err}"),
        }
    }
}

impl std::error::Error for ConvertError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Visit { source, .. } => Some(source),
            Self::Run(err) => Some(err),
            _ => None,
        }
    }
}

impl From<RunError> for ConvertError {
    fn from(err: RunError) -> Self {
        Self::Run(err)
    }
}

/// Classification of a runtime error raised by the evaluator or by overload
/// hooks.
///
/// Uses strum derives so the kind renders like a Python exception type name
/// in messages (e.g. `UnboundStorage` -> "UnboundStorageError").
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, StrumDisplay, IntoStaticStr, serde::Serialize, serde::Deserialize)]
pub enum RunErrorKind {
    /// Virtualized storage was read before any assignment.
    #[strum(serialize = "UnboundStorageError")]
    UnboundStorage,
    /// A name did not resolve in any reachable environment frame.
    #[strum(serialize = "NameError")]
    Name,
    /// An operation was applied to values of the wrong type.
    #[strum(serialize = "TypeError")]
    Type,
    /// A value had the right type but an unacceptable value.
    #[strum(serialize = "ValueError")]
    Value,
    /// Attribute lookup failed.
    #[strum(serialize = "AttributeError")]
    Attribute,
    /// Sequence index out of range or missing mapping key.
    #[strum(serialize = "IndexError")]
    Index,
    /// A call supplied the wrong number or names of arguments.
    #[strum(serialize = "ArityError")]
    Arity,
    /// The evaluator's recursion limit was exceeded.
    #[strum(serialize = "RecursionError")]
    Recursion,
    /// An error deliberately raised by user or test code.
    #[strum(serialize = "UserError")]
    User,
}

/// A runtime error with its classification and a human-readable message.
///
/// Serializes to a `{kind, message}` pair for machine-readable diagnostics.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct RunError {
    pub kind: RunErrorKind,
    pub message: String,
}

impl RunError {
    pub fn new(kind: RunErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    /// The unbound-storage error always names the variable it concerns.
    pub fn unbound_storage(name: &str) -> Self {
        Self::new(
            RunErrorKind::UnboundStorage,
            format!("local variable '{name}' referenced before assignment"),
        )
    }

    pub fn name_error(name: &str) -> Self {
        Self::new(RunErrorKind::Name, format!("name '{name}' is not defined"))
    }

    pub fn type_error(message: impl Into<String>) -> Self {
        Self::new(RunErrorKind::Type, message)
    }

    pub fn attribute_error(type_name: &str, attr: &str) -> Self {
        Self::new(
            RunErrorKind::Attribute,
            format!("'{type_name}' object has no attribute '{attr}'"),
        )
    }
}

impl Display for RunError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.kind, self.message)
    }
}

impl std::error::Error for RunError {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unbound_storage_names_the_variable() {
        let err = RunError::unbound_storage("sum_");
        assert_eq!(err.kind, RunErrorKind::UnboundStorage);
        assert!(err.message.contains("sum_"));
        assert!(err.to_string().starts_with("UnboundStorageError"));
    }

    #[test]
    fn run_errors_round_trip_through_json() {
        let err = RunError::name_error("missing");
        let json = serde_json::to_string(&err).unwrap();
        assert!(json.contains("\"kind\":\"Name\""));
        assert!(json.contains("missing"));
        let back: RunError = serde_json::from_str(&json).unwrap();
        assert_eq!(back, err);
    }

    #[test]
    fn visit_wrapper_preserves_source() {
        let inner = ConvertError::Parse {
            message: "boom".to_owned(),
        };
        let wrapped = ConvertError::Visit {
            pass: "variables",
            node: "If",
            range: TextRange::default(),
            source: Box::new(inner),
        };
        assert!(wrapped.is_attributed());
        assert!(wrapped.to_string().contains("boom"));
        let source = std::error::Error::source(&wrapped).expect("source retained");
        assert!(source.to_string().contains("boom"));
    }
}
