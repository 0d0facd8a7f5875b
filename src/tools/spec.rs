//! Tool definitions and typed parameter schemas.

use serde_json::Value;

use crate::conversation::MediaKind;
use crate::error::ValidationError;

/// Semantic type of a tool parameter, with its validation rule.
#[derive(Clone, Debug)]
pub enum ParamKind {
    /// Free text, optionally constrained to a known format.
    Text(Option<TextFormat>),
    /// Numeric value.
    Number {
        /// Inclusive lower bound, if any.
        min: Option<f64>,
        /// Whether only whole numbers are accepted.
        integer: bool,
    },
    /// One of a fixed set of values.
    Enum(Vec<&'static str>),
    /// Reference to an input file (uploaded or produced by a prior stage).
    FileRef,
}

/// Recognized text formats for `ParamKind::Text`.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum TextFormat {
    /// `HH:MM:SS`, `HH:MM`, or plain seconds-of-day.
    TimeOfDay,
    /// `min_lon,min_lat,max_lon,max_lat`.
    BoundingBox,
}

/// Schema for one tool parameter.
#[derive(Clone, Debug)]
pub struct ParameterSpec {
    /// Parameter name, unique within its tool.
    pub name: &'static str,
    /// Natural-language description, used when asking the user for it.
    pub description: &'static str,
    /// Semantic type and validation rule.
    pub kind: ParamKind,
    /// Whether the tool cannot run without it.
    pub required: bool,
}

impl ParameterSpec {
    /// Build a required parameter.
    #[must_use]
    pub const fn required(name: &'static str, description: &'static str, kind: ParamKind) -> Self {
        Self {
            name,
            description,
            kind,
            required: true,
        }
    }

    /// Build an optional parameter.
    #[must_use]
    pub const fn optional(name: &'static str, description: &'static str, kind: ParamKind) -> Self {
        Self {
            name,
            description,
            kind,
            required: false,
        }
    }

    /// Validate a supplied value against this spec.
    ///
    /// # Errors
    /// Returns a `ValidationError` whose message is suitable for quoting
    /// back to the user in a clarifying question.
    pub fn validate(&self, value: &Value) -> Result<(), ValidationError> {
        match &self.kind {
            ParamKind::Text(format) => self.validate_text(value, *format),
            ParamKind::Number { min, integer } => self.validate_number(value, *min, *integer),
            ParamKind::Enum(variants) => self.validate_enum(value, variants),
            ParamKind::FileRef => match value.as_str() {
                Some(s) if !s.trim().is_empty() => Ok(()),
                _ => Err(self.fail("must be a file path")),
            },
        }
    }

    fn validate_text(
        &self,
        value: &Value,
        format: Option<TextFormat>,
    ) -> Result<(), ValidationError> {
        let Some(text) = value.as_str() else {
            return Err(self.fail("must be text"));
        };
        match format {
            None => Ok(()),
            Some(TextFormat::TimeOfDay) => {
                if time_of_day_pattern().is_match(text.trim()) {
                    Ok(())
                } else {
                    Err(self.fail("must be a time of day like 08:30:00 or seconds since midnight"))
                }
            }
            Some(TextFormat::BoundingBox) => {
                let parts: Vec<_> = text.split(',').map(str::trim).collect();
                if parts.len() == 4 && parts.iter().all(|p| p.parse::<f64>().is_ok()) {
                    Ok(())
                } else {
                    Err(self.fail("must be four comma-separated numbers: min_lon,min_lat,max_lon,max_lat"))
                }
            }
        }
    }

    fn validate_number(
        &self,
        value: &Value,
        min: Option<f64>,
        integer: bool,
    ) -> Result<(), ValidationError> {
        // Models often quote numbers; accept numeric strings too.
        let parsed = match value {
            Value::Number(n) => n.as_f64(),
            Value::String(s) => s.trim().parse::<f64>().ok(),
            _ => None,
        };
        let Some(n) = parsed else {
            return Err(self.fail("must be a number"));
        };
        if integer && n.fract() != 0.0 {
            return Err(self.fail("must be a whole number"));
        }
        if let Some(min) = min {
            if n < min {
                if integer && min >= 1.0 {
                    return Err(self.fail("must be a positive integer"));
                }
                return Err(ValidationError::new(
                    self.name,
                    format!("{} must be at least {min}", self.name),
                ));
            }
        }
        Ok(())
    }

    fn validate_enum(
        &self,
        value: &Value,
        variants: &[&'static str],
    ) -> Result<(), ValidationError> {
        match value.as_str() {
            Some(s) if variants.contains(&s) => Ok(()),
            _ => Err(ValidationError::new(
                self.name,
                format!("{} must be one of: {}", self.name, variants.join(", ")),
            )),
        }
    }

    fn fail(&self, constraint: &str) -> ValidationError {
        ValidationError::new(self.name, format!("{} {constraint}", self.name))
    }
}

fn time_of_day_pattern() -> &'static regex::Regex {
    static PATTERN: std::sync::OnceLock<regex::Regex> = std::sync::OnceLock::new();
    PATTERN.get_or_init(|| {
        // Unwrap is safe on a literal pattern.
        #[allow(clippy::unwrap_used)]
        regex::Regex::new(r"^(\d{1,2}:\d{2}(:\d{2})?|\d+)$").unwrap()
    })
}

/// A named analysis operation with a typed parameter schema.
#[derive(Clone, Debug)]
pub struct ToolDefinition {
    /// Unique tool name.
    pub name: &'static str,
    /// Natural-language description presented to the intent interpreter.
    pub description: &'static str,
    /// Parameter specs in declaration order; drives question ordering.
    pub params: Vec<ParameterSpec>,
    /// Tools whose output this tool consumes; executed first.
    pub dependencies: Vec<&'static str>,
    /// Media kind of the primary artifact this tool produces.
    pub output_kind: MediaKind,
}

impl ToolDefinition {
    /// Look up a parameter spec by name.
    #[must_use]
    pub fn param(&self, name: &str) -> Option<&ParameterSpec> {
        self.params.iter().find(|p| p.name == name)
    }
}
