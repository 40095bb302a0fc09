//! Field definitions and per-field validation.

use super::descriptor::FieldDescriptor;
use crate::clock::Clock;
use crate::error::{CoreError, CoreResult};
use crate::value::{parse_datetime, Value};

/// Primitive kind of a field.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FieldKind {
    /// 64-bit signed integer.
    Integer,
    /// 64-bit float.
    Float,
    /// UTF-8 string.
    String,
    /// Boolean.
    Boolean,
    /// UTC datetime.
    DateTime,
    /// String restricted to a fixed set of choices.
    Enum(Vec<String>),
    /// Arbitrary JSON document.
    Json,
}

impl FieldKind {
    /// Descriptor name of the kind.
    #[must_use]
    pub const fn name(&self) -> &'static str {
        match self {
            Self::Integer => "integer",
            Self::Float => "float",
            Self::String => "string",
            Self::Boolean => "boolean",
            Self::DateTime => "datetime",
            Self::Enum(_) => "enum",
            Self::Json => "json",
        }
    }

    /// Returns true for integer and float.
    #[must_use]
    pub const fn is_numeric(&self) -> bool {
        matches!(self, Self::Integer | Self::Float)
    }

    /// Whether two kinds can be linked by a foreign key.
    fn links_to(&self, other: &Self) -> bool {
        match (self, other) {
            (Self::Enum(_), Self::Enum(_) | Self::String) | (Self::String, Self::Enum(_)) => true,
            _ => self == other,
        }
    }
}

/// Generator for a missing field value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DefaultFactory {
    /// The injected clock's current time. Datetime fields only.
    Now,
    /// `{}`. JSON fields only.
    EmptyObject,
    /// `[]`. JSON fields only.
    EmptyArray,
}

impl DefaultFactory {
    /// Descriptor name of the factory.
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::Now => "now",
            Self::EmptyObject => "empty_object",
            Self::EmptyArray => "empty_array",
        }
    }

    fn parse(name: &str) -> Option<Self> {
        match name {
            "now" => Some(Self::Now),
            "empty_object" => Some(Self::EmptyObject),
            "empty_array" => Some(Self::EmptyArray),
            _ => None,
        }
    }

    /// Produces a fresh value.
    #[must_use]
    pub fn produce(self, clock: &dyn Clock) -> Value {
        match self {
            Self::Now => Value::DateTime(clock.now()),
            Self::EmptyObject => Value::Json(serde_json::Value::Object(serde_json::Map::new())),
            Self::EmptyArray => Value::Json(serde_json::Value::Array(Vec::new())),
        }
    }
}

/// What happens to referencing records when their target is deleted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum OnDelete {
    /// Refuse the delete.
    #[default]
    Restrict,
    /// Delete referencing records too.
    Cascade,
    /// Set the foreign key to null.
    SetNull,
}

impl OnDelete {
    /// Descriptor name of the policy.
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::Restrict => "restrict",
            Self::Cascade => "cascade",
            Self::SetNull => "set_null",
        }
    }

    fn parse(name: &str) -> Option<Self> {
        match name {
            "restrict" => Some(Self::Restrict),
            "cascade" => Some(Self::Cascade),
            "set_null" => Some(Self::SetNull),
            _ => None,
        }
    }
}

/// Definition of a single field.
///
/// Built with the kind constructors and chained modifiers:
///
/// ```rust
/// use jsondb_core::FieldDef;
///
/// let email = FieldDef::string("email").unique().not_null().max_length(255);
/// let author = FieldDef::integer("author_id").foreign_key("User.id");
/// ```
#[derive(Debug, Clone, PartialEq)]
pub struct FieldDef {
    /// Field name.
    pub name: String,
    /// Primitive kind.
    pub kind: FieldKind,
    /// Whether `Null` is accepted.
    pub nullable: bool,
    /// Primary key flag.
    pub primary_key: bool,
    /// Whether missing primary key values are assigned from the counter.
    pub auto_increment: bool,
    /// Unique constraint.
    pub unique: bool,
    /// Secondary index.
    pub index: bool,
    /// Static default.
    pub default: Option<Value>,
    /// Generated default, used when there is no static default.
    pub default_factory: Option<DefaultFactory>,
    /// Foreign key target as `Model.field`.
    pub foreign_key: Option<String>,
    /// Delete policy for the foreign key.
    pub on_delete: OnDelete,
    /// Inclusive numeric lower bound.
    pub min: Option<f64>,
    /// Inclusive numeric upper bound.
    pub max: Option<f64>,
    /// Minimum string length in characters.
    pub min_length: Option<usize>,
    /// Maximum string length in characters.
    pub max_length: Option<usize>,
}

impl FieldDef {
    /// Creates a nullable field of the given kind.
    #[must_use]
    pub fn new(name: impl Into<String>, kind: FieldKind) -> Self {
        Self {
            name: name.into(),
            kind,
            nullable: true,
            primary_key: false,
            auto_increment: false,
            unique: false,
            index: false,
            default: None,
            default_factory: None,
            foreign_key: None,
            on_delete: OnDelete::Restrict,
            min: None,
            max: None,
            min_length: None,
            max_length: None,
        }
    }

    /// Integer field.
    #[must_use]
    pub fn integer(name: impl Into<String>) -> Self {
        Self::new(name, FieldKind::Integer)
    }

    /// Float field.
    #[must_use]
    pub fn float(name: impl Into<String>) -> Self {
        Self::new(name, FieldKind::Float)
    }

    /// String field.
    #[must_use]
    pub fn string(name: impl Into<String>) -> Self {
        Self::new(name, FieldKind::String)
    }

    /// Boolean field.
    #[must_use]
    pub fn boolean(name: impl Into<String>) -> Self {
        Self::new(name, FieldKind::Boolean)
    }

    /// Datetime field.
    #[must_use]
    pub fn datetime(name: impl Into<String>) -> Self {
        Self::new(name, FieldKind::DateTime)
    }

    /// JSON field.
    #[must_use]
    pub fn json(name: impl Into<String>) -> Self {
        Self::new(name, FieldKind::Json)
    }

    /// Enum field with the given choices.
    #[must_use]
    pub fn enumeration<I, S>(name: impl Into<String>, choices: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::new(name, FieldKind::Enum(choices.into_iter().map(Into::into).collect()))
    }

    /// Marks the field as the auto-incrementing, non-null primary key.
    #[must_use]
    pub fn primary_key(mut self) -> Self {
        self.primary_key = true;
        self.auto_increment = true;
        self.nullable = false;
        self
    }

    /// Overrides primary key auto-increment.
    #[must_use]
    pub fn auto_increment(mut self, value: bool) -> Self {
        self.auto_increment = value;
        self
    }

    /// Rejects `Null`.
    #[must_use]
    pub fn not_null(mut self) -> Self {
        self.nullable = false;
        self
    }

    /// Adds a unique constraint.
    #[must_use]
    pub fn unique(mut self) -> Self {
        self.unique = true;
        self
    }

    /// Adds a secondary index.
    #[must_use]
    pub fn index(mut self) -> Self {
        self.index = true;
        self
    }

    /// Sets a static default.
    #[must_use]
    pub fn default(mut self, value: impl Into<Value>) -> Self {
        self.default = Some(value.into());
        self
    }

    /// Sets a default factory.
    #[must_use]
    pub fn default_factory(mut self, factory: DefaultFactory) -> Self {
        self.default_factory = Some(factory);
        self
    }

    /// Points the field at `Model.field`.
    #[must_use]
    pub fn foreign_key(mut self, target: impl Into<String>) -> Self {
        self.foreign_key = Some(target.into());
        self
    }

    /// Sets the delete policy of the foreign key.
    #[must_use]
    pub fn on_delete(mut self, policy: OnDelete) -> Self {
        self.on_delete = policy;
        self
    }

    /// Sets the inclusive numeric lower bound.
    #[must_use]
    pub fn min(mut self, bound: f64) -> Self {
        self.min = Some(bound);
        self
    }

    /// Sets the inclusive numeric upper bound.
    #[must_use]
    pub fn max(mut self, bound: f64) -> Self {
        self.max = Some(bound);
        self
    }

    /// Sets the minimum string length.
    #[must_use]
    pub fn min_length(mut self, len: usize) -> Self {
        self.min_length = Some(len);
        self
    }

    /// Sets the maximum string length.
    #[must_use]
    pub fn max_length(mut self, len: usize) -> Self {
        self.max_length = Some(len);
        self
    }

    /// Splits the foreign key target into `(model, field)`.
    #[must_use]
    pub fn foreign_key_target(&self) -> Option<(&str, &str)> {
        self.foreign_key.as_deref()?.split_once('.')
    }

    /// Whether the field is kept in a secondary index.
    #[must_use]
    pub const fn is_indexed(&self) -> bool {
        self.unique || self.index || self.foreign_key.is_some()
    }

    /// The value used when a candidate omits this field.
    #[must_use]
    pub fn missing_value(&self, clock: &dyn Clock) -> Value {
        if let Some(default) = &self.default {
            return default.clone();
        }
        self.default_factory
            .map_or(Value::Null, |factory| factory.produce(clock))
    }

    /// Checks a value against kind, nullability and bounds, returning the
    /// normalized value.
    pub fn validate_value(&self, model: &str, value: Value) -> CoreResult<Value> {
        let fail = |reason: String| CoreError::validation(model, &self.name, reason);

        if value.is_null() {
            return if self.nullable {
                Ok(Value::Null)
            } else {
                Err(fail("must not be null".to_string()))
            };
        }

        let value = match (&self.kind, value) {
            (FieldKind::Integer, v @ Value::Int(_))
            | (FieldKind::Boolean, v @ Value::Bool(_))
            | (FieldKind::String, v @ Value::String(_))
            | (FieldKind::DateTime, v @ Value::DateTime(_))
            | (FieldKind::Json, v @ Value::Json(_)) => v,
            (FieldKind::Float, Value::Float(f)) if f.is_finite() => Value::Float(f),
            (FieldKind::Float, Value::Int(i)) => Value::Float(i as f64),
            (FieldKind::DateTime, Value::String(s)) => parse_datetime(&s)
                .map(Value::DateTime)
                .map_err(|e| fail(format!("invalid RFC 3339 datetime {s:?}: {e}")))?,
            (FieldKind::Enum(choices), Value::String(s)) => {
                if !choices.iter().any(|c| *c == s) {
                    return Err(fail(format!("{s:?} is not one of {choices:?}")));
                }
                Value::String(s)
            }
            (FieldKind::Json, other) => Value::Json(other.to_json()),
            (kind, other) => {
                return Err(fail(format!(
                    "expected {}, got {}",
                    kind.name(),
                    other.type_name()
                )))
            }
        };

        if let Some(n) = value.as_f64() {
            if let Some(min) = self.min {
                if n < min {
                    return Err(fail(format!("must be >= {min}")));
                }
            }
            if let Some(max) = self.max {
                if n > max {
                    return Err(fail(format!("must be <= {max}")));
                }
            }
        }
        if let Value::String(s) = &value {
            let len = s.chars().count();
            if let Some(min) = self.min_length {
                if len < min {
                    return Err(fail(format!("length must be >= {min}")));
                }
            }
            if let Some(max) = self.max_length {
                if len > max {
                    return Err(fail(format!("length must be <= {max}")));
                }
            }
        }
        if self.primary_key && value.as_i64().is_some_and(|id| id < 0) {
            return Err(fail("primary key must be >= 0".to_string()));
        }

        Ok(value)
    }

    /// Converts to the persisted descriptor.
    #[must_use]
    pub fn to_descriptor(&self) -> FieldDescriptor {
        let (choices, kind) = match &self.kind {
            FieldKind::Enum(choices) => (Some(choices.clone()), "enum"),
            other => (None, other.name()),
        };
        FieldDescriptor {
            kind: kind.to_string(),
            nullable: (!self.primary_key && !self.nullable).then_some(false),
            primary_key: self.primary_key,
            auto_increment: self.primary_key.then_some(self.auto_increment),
            unique: self.unique,
            index: self.index,
            default: self.default.as_ref().map(Value::to_json),
            default_factory: self.default_factory.map(|f| f.name().to_string()),
            foreign_key: self.foreign_key.clone(),
            on_delete: (self.on_delete != OnDelete::Restrict)
                .then(|| self.on_delete.name().to_string()),
            choices,
            min: self.min,
            max: self.max,
            min_length: self.min_length,
            max_length: self.max_length,
        }
    }

    /// Rebuilds a definition from its persisted descriptor.
    pub fn from_descriptor(name: &str, desc: &FieldDescriptor) -> CoreResult<Self> {
        let bad = |what: &str| CoreError::invalid_format(format!("field {name}: {what}"));

        let kind = match desc.kind.as_str() {
            "integer" => FieldKind::Integer,
            "float" => FieldKind::Float,
            "string" => FieldKind::String,
            "boolean" => FieldKind::Boolean,
            "datetime" => FieldKind::DateTime,
            "json" => FieldKind::Json,
            "enum" => FieldKind::Enum(desc.choices.clone().unwrap_or_default()),
            other => return Err(bad(&format!("unknown type {other:?}"))),
        };
        let default_factory = desc
            .default_factory
            .as_deref()
            .map(|f| DefaultFactory::parse(f).ok_or_else(|| bad(&format!("unknown factory {f:?}"))))
            .transpose()?;
        let on_delete = desc
            .on_delete
            .as_deref()
            .map(|p| OnDelete::parse(p).ok_or_else(|| bad(&format!("unknown on_delete {p:?}"))))
            .transpose()?
            .unwrap_or_default();

        Ok(Self {
            name: name.to_string(),
            kind,
            nullable: !desc.primary_key && desc.nullable.unwrap_or(true),
            primary_key: desc.primary_key,
            auto_increment: desc.primary_key && desc.auto_increment.unwrap_or(true),
            unique: desc.unique,
            index: desc.index,
            default: desc.default.as_ref().map(Value::from_json),
            default_factory,
            foreign_key: desc.foreign_key.clone(),
            on_delete,
            min: desc.min,
            max: desc.max,
            min_length: desc.min_length,
            max_length: desc.max_length,
        })
    }

    /// Checks definition-local invariants and normalizes the static default.
    pub(crate) fn check(&mut self, model: &str) -> CoreResult<()> {
        let err = |msg: String| CoreError::schema(format!("{model}.{}: {msg}", self.name));

        if !super::is_valid_name(&self.name) {
            return Err(CoreError::schema(format!(
                "invalid field name {:?} in model {model}",
                self.name
            )));
        }
        if self.primary_key && self.kind != FieldKind::Integer {
            return Err(err("primary key must be an integer".into()));
        }
        if self.primary_key && self.nullable {
            return Err(err("primary key cannot be nullable".into()));
        }
        if let FieldKind::Enum(choices) = &self.kind {
            if choices.is_empty() {
                return Err(err("enum needs at least one choice".into()));
            }
        }
        if (self.min.is_some() || self.max.is_some()) && !self.kind.is_numeric() {
            return Err(err("min/max apply to numeric fields only".into()));
        }
        if (self.min_length.is_some() || self.max_length.is_some())
            && self.kind != FieldKind::String
        {
            return Err(err("length bounds apply to string fields only".into()));
        }
        match (self.default_factory, &self.kind) {
            (None, _)
            | (Some(DefaultFactory::Now), FieldKind::DateTime)
            | (Some(DefaultFactory::EmptyObject | DefaultFactory::EmptyArray), FieldKind::Json) => {}
            (Some(factory), kind) => {
                return Err(err(format!(
                    "factory {} does not produce a {} value",
                    factory.name(),
                    kind.name()
                )))
            }
        }
        if let Some(default) = self.default.take() {
            let normalized = self
                .validate_value(model, default)
                .map_err(|e| err(format!("invalid default: {e}")))?;
            self.default = Some(normalized);
        }
        if self.foreign_key.is_some() {
            if self.foreign_key_target().is_none() {
                return Err(err(format!(
                    "foreign key {:?} must be written as Model.field",
                    self.foreign_key.as_deref().unwrap_or_default()
                )));
            }
            if self.on_delete == OnDelete::SetNull && !self.nullable {
                return Err(err("set_null requires a nullable field".into()));
            }
        } else if self.on_delete != OnDelete::Restrict {
            return Err(err("on_delete requires a foreign key".into()));
        }
        Ok(())
    }

    /// Whether this field may reference `target`.
    pub(crate) fn can_reference(&self, target: &Self) -> bool {
        (target.primary_key || target.unique) && self.kind.links_to(&target.kind)
    }
}
