//! Typed field tree.
//!
//! A [`Field`] always carries its [`FieldType`], even when the value is null.
//! Composite fields (`LIST`, `MAP`, `LIST_MAP`) own their children, so cloning a
//! field is a deep copy.

use crate::error::RecordError;
use crate::path::PathElement;
use bigdecimal::{BigDecimal, ToPrimitive};
use chrono::{DateTime, FixedOffset, NaiveDate};
use indexmap::IndexMap;
use serde::{de, Deserialize, Deserializer, Serialize, Serializer};
use serde_json::{Map as JsonMap, Value as JsonValue};
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

// ============================================================================
// Field type
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum FieldType {
    Boolean,
    Integer,
    Long,
    Short,
    Byte,
    Float,
    Double,
    Decimal,
    Date,
    Datetime,
    ZonedDatetime,
    Time,
    String,
    ByteArray,
    List,
    Map,
    ListMap,
}

impl FieldType {
    pub const ALL: [FieldType; 17] = [
        FieldType::Boolean,
        FieldType::Integer,
        FieldType::Long,
        FieldType::Short,
        FieldType::Byte,
        FieldType::Float,
        FieldType::Double,
        FieldType::Decimal,
        FieldType::Date,
        FieldType::Datetime,
        FieldType::ZonedDatetime,
        FieldType::Time,
        FieldType::String,
        FieldType::ByteArray,
        FieldType::List,
        FieldType::Map,
        FieldType::ListMap,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            FieldType::Boolean => "BOOLEAN",
            FieldType::Integer => "INTEGER",
            FieldType::Long => "LONG",
            FieldType::Short => "SHORT",
            FieldType::Byte => "BYTE",
            FieldType::Float => "FLOAT",
            FieldType::Double => "DOUBLE",
            FieldType::Decimal => "DECIMAL",
            FieldType::Date => "DATE",
            FieldType::Datetime => "DATETIME",
            FieldType::ZonedDatetime => "ZONED_DATETIME",
            FieldType::Time => "TIME",
            FieldType::String => "STRING",
            FieldType::ByteArray => "BYTE_ARRAY",
            FieldType::List => "LIST",
            FieldType::Map => "MAP",
            FieldType::ListMap => "LIST_MAP",
        }
    }

    pub fn is_numeric(&self) -> bool {
        matches!(
            self,
            FieldType::Integer
                | FieldType::Long
                | FieldType::Short
                | FieldType::Byte
                | FieldType::Float
                | FieldType::Double
                | FieldType::Decimal
        )
    }

    pub fn is_composite(&self) -> bool {
        matches!(self, FieldType::List | FieldType::Map | FieldType::ListMap)
    }
}

impl fmt::Display for FieldType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for FieldType {
    type Err = RecordError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        FieldType::ALL
            .iter()
            .find(|t| t.as_str().eq_ignore_ascii_case(s))
            .copied()
            .ok_or_else(|| RecordError::InvalidJson(format!("unknown field type '{}'", s)))
    }
}

// ============================================================================
// Field value
// ============================================================================

/// Non-null payload of a field.
#[derive(Debug, Clone, PartialEq)]
pub enum FieldValue {
    Boolean(bool),
    Integer(i32),
    Long(i64),
    Short(i16),
    Byte(i8),
    Float(f32),
    Double(f64),
    Decimal(BigDecimal),
    Date(NaiveDate),
    /// Milliseconds since the Unix epoch.
    Datetime(i64),
    ZonedDatetime(DateTime<FixedOffset>),
    /// Milliseconds of the day.
    Time(i64),
    String(String),
    ByteArray(Vec<u8>),
    List(Vec<Field>),
    Map(HashMap<String, Field>),
    ListMap(IndexMap<String, Field>),
}

impl FieldValue {
    pub fn field_type(&self) -> FieldType {
        match self {
            FieldValue::Boolean(_) => FieldType::Boolean,
            FieldValue::Integer(_) => FieldType::Integer,
            FieldValue::Long(_) => FieldType::Long,
            FieldValue::Short(_) => FieldType::Short,
            FieldValue::Byte(_) => FieldType::Byte,
            FieldValue::Float(_) => FieldType::Float,
            FieldValue::Double(_) => FieldType::Double,
            FieldValue::Decimal(_) => FieldType::Decimal,
            FieldValue::Date(_) => FieldType::Date,
            FieldValue::Datetime(_) => FieldType::Datetime,
            FieldValue::ZonedDatetime(_) => FieldType::ZonedDatetime,
            FieldValue::Time(_) => FieldType::Time,
            FieldValue::String(_) => FieldType::String,
            FieldValue::ByteArray(_) => FieldType::ByteArray,
            FieldValue::List(_) => FieldType::List,
            FieldValue::Map(_) => FieldType::Map,
            FieldValue::ListMap(_) => FieldType::ListMap,
        }
    }
}

// ============================================================================
// Field
// ============================================================================

#[derive(Debug, Clone, PartialEq)]
pub struct Field {
    field_type: FieldType,
    value: Option<FieldValue>,
}

impl Field {
    pub fn from_value(value: FieldValue) -> Self {
        Self {
            field_type: value.field_type(),
            value: Some(value),
        }
    }

    /// A null field that keeps its type tag.
    pub fn null(field_type: FieldType) -> Self {
        Self {
            field_type,
            value: None,
        }
    }

    pub fn boolean(v: bool) -> Self {
        Self::from_value(FieldValue::Boolean(v))
    }

    pub fn integer(v: i32) -> Self {
        Self::from_value(FieldValue::Integer(v))
    }

    pub fn long(v: i64) -> Self {
        Self::from_value(FieldValue::Long(v))
    }

    pub fn short(v: i16) -> Self {
        Self::from_value(FieldValue::Short(v))
    }

    pub fn byte(v: i8) -> Self {
        Self::from_value(FieldValue::Byte(v))
    }

    pub fn float(v: f32) -> Self {
        Self::from_value(FieldValue::Float(v))
    }

    pub fn double(v: f64) -> Self {
        Self::from_value(FieldValue::Double(v))
    }

    pub fn decimal(v: BigDecimal) -> Self {
        Self::from_value(FieldValue::Decimal(v))
    }

    pub fn date(v: NaiveDate) -> Self {
        Self::from_value(FieldValue::Date(v))
    }

    pub fn datetime(epoch_millis: i64) -> Self {
        Self::from_value(FieldValue::Datetime(epoch_millis))
    }

    pub fn zoned_datetime(v: DateTime<FixedOffset>) -> Self {
        Self::from_value(FieldValue::ZonedDatetime(v))
    }

    pub fn time(millis_of_day: i64) -> Self {
        Self::from_value(FieldValue::Time(millis_of_day))
    }

    pub fn string(v: impl Into<String>) -> Self {
        Self::from_value(FieldValue::String(v.into()))
    }

    pub fn byte_array(v: Vec<u8>) -> Self {
        Self::from_value(FieldValue::ByteArray(v))
    }

    pub fn list(v: Vec<Field>) -> Self {
        Self::from_value(FieldValue::List(v))
    }

    pub fn map(v: HashMap<String, Field>) -> Self {
        Self::from_value(FieldValue::Map(v))
    }

    pub fn list_map(v: IndexMap<String, Field>) -> Self {
        Self::from_value(FieldValue::ListMap(v))
    }

    /// Empty composite of the given type, or a null scalar.
    pub(crate) fn empty_container(field_type: FieldType) -> Self {
        match field_type {
            FieldType::List => Field::list(Vec::new()),
            FieldType::Map => Field::map(HashMap::new()),
            FieldType::ListMap => Field::list_map(IndexMap::new()),
            other => Field::null(other),
        }
    }

    pub fn field_type(&self) -> FieldType {
        self.field_type
    }

    pub fn value(&self) -> Option<&FieldValue> {
        self.value.as_ref()
    }

    pub fn is_null(&self) -> bool {
        self.value.is_none()
    }

    fn non_null(&self) -> Result<&FieldValue, RecordError> {
        self.value.as_ref().ok_or(RecordError::NullValue {
            field_type: self.field_type,
        })
    }

    fn conversion_error(&self, to: FieldType) -> RecordError {
        let shown = match &self.value {
            Some(v) => describe(v),
            None => "null".to_string(),
        };
        RecordError::conversion(self.field_type, to, shown)
    }

    // ------------------------------------------------------------------------
    // Typed accessors
    // ------------------------------------------------------------------------

    pub fn as_bool(&self) -> Result<bool, RecordError> {
        match self.non_null()? {
            FieldValue::Boolean(b) => Ok(*b),
            FieldValue::String(s) => match s.trim().to_ascii_lowercase().as_str() {
                "true" => Ok(true),
                "false" => Ok(false),
                _ => Err(self.conversion_error(FieldType::Boolean)),
            },
            v if v.field_type().is_numeric() => Ok(self.as_f64()? != 0.0),
            _ => Err(self.conversion_error(FieldType::Boolean)),
        }
    }

    pub fn as_i64(&self) -> Result<i64, RecordError> {
        let to = FieldType::Long;
        match self.non_null()? {
            FieldValue::Boolean(b) => Ok(i64::from(*b)),
            FieldValue::Integer(v) => Ok(i64::from(*v)),
            FieldValue::Long(v) => Ok(*v),
            FieldValue::Short(v) => Ok(i64::from(*v)),
            FieldValue::Byte(v) => Ok(i64::from(*v)),
            FieldValue::Float(v) => float_to_i64(f64::from(*v)).ok_or_else(|| self.conversion_error(to)),
            FieldValue::Double(v) => float_to_i64(*v).ok_or_else(|| self.conversion_error(to)),
            FieldValue::Decimal(d) => d.to_i64().ok_or_else(|| self.conversion_error(to)),
            FieldValue::Datetime(ms) | FieldValue::Time(ms) => Ok(*ms),
            FieldValue::ZonedDatetime(dt) => Ok(dt.timestamp_millis()),
            FieldValue::Date(d) => d
                .and_hms_opt(0, 0, 0)
                .map(|dt| dt.and_utc().timestamp_millis())
                .ok_or_else(|| self.conversion_error(to)),
            FieldValue::String(s) => {
                let trimmed = s.trim();
                trimmed
                    .parse::<i64>()
                    .ok()
                    .or_else(|| BigDecimal::from_str(trimmed).ok().and_then(|d| d.to_i64()))
                    .ok_or_else(|| self.conversion_error(to))
            }
            _ => Err(self.conversion_error(to)),
        }
    }

    pub fn as_i32(&self) -> Result<i32, RecordError> {
        let wide = self.as_i64()?;
        i32::try_from(wide).map_err(|_| self.conversion_error(FieldType::Integer))
    }

    pub fn as_f64(&self) -> Result<f64, RecordError> {
        let to = FieldType::Double;
        match self.non_null()? {
            FieldValue::Boolean(b) => Ok(if *b { 1.0 } else { 0.0 }),
            FieldValue::Integer(v) => Ok(f64::from(*v)),
            FieldValue::Long(v) => Ok(*v as f64),
            FieldValue::Short(v) => Ok(f64::from(*v)),
            FieldValue::Byte(v) => Ok(f64::from(*v)),
            FieldValue::Float(v) => Ok(f64::from(*v)),
            FieldValue::Double(v) => Ok(*v),
            FieldValue::Decimal(d) => d.to_f64().ok_or_else(|| self.conversion_error(to)),
            FieldValue::Datetime(ms) | FieldValue::Time(ms) => Ok(*ms as f64),
            FieldValue::String(s) => s.trim().parse::<f64>().map_err(|_| self.conversion_error(to)),
            _ => Err(self.conversion_error(to)),
        }
    }

    pub fn as_decimal(&self) -> Result<BigDecimal, RecordError> {
        let to = FieldType::Decimal;
        match self.non_null()? {
            FieldValue::Decimal(d) => Ok(d.clone()),
            FieldValue::Float(v) => decimal_from_float(f64::from(*v)).ok_or_else(|| self.conversion_error(to)),
            FieldValue::Double(v) => decimal_from_float(*v).ok_or_else(|| self.conversion_error(to)),
            FieldValue::String(s) => BigDecimal::from_str(s.trim()).map_err(|_| self.conversion_error(to)),
            FieldValue::Boolean(_)
            | FieldValue::Integer(_)
            | FieldValue::Long(_)
            | FieldValue::Short(_)
            | FieldValue::Byte(_) => Ok(BigDecimal::from(self.as_i64()?)),
            _ => Err(self.conversion_error(to)),
        }
    }

    /// String rendering of a scalar; byte arrays and composites do not convert.
    pub fn as_string(&self) -> Result<String, RecordError> {
        let rendered = match self.non_null()? {
            FieldValue::Boolean(b) => b.to_string(),
            FieldValue::Integer(v) => v.to_string(),
            FieldValue::Long(v) => v.to_string(),
            FieldValue::Short(v) => v.to_string(),
            FieldValue::Byte(v) => v.to_string(),
            FieldValue::Float(v) => v.to_string(),
            FieldValue::Double(v) => v.to_string(),
            FieldValue::Decimal(d) => d.to_string(),
            FieldValue::Date(d) => d.format("%Y-%m-%d").to_string(),
            FieldValue::Datetime(ms) | FieldValue::Time(ms) => ms.to_string(),
            FieldValue::ZonedDatetime(dt) => dt.to_rfc3339(),
            FieldValue::String(s) => s.clone(),
            _ => return Err(self.conversion_error(FieldType::String)),
        };
        Ok(rendered)
    }

    pub fn as_date(&self) -> Result<NaiveDate, RecordError> {
        let to = FieldType::Date;
        match self.non_null()? {
            FieldValue::Date(d) => Ok(*d),
            FieldValue::ZonedDatetime(dt) => Ok(dt.date_naive()),
            FieldValue::Datetime(ms) | FieldValue::Long(ms) => DateTime::from_timestamp_millis(*ms)
                .map(|dt| dt.date_naive())
                .ok_or_else(|| self.conversion_error(to)),
            FieldValue::String(s) => {
                NaiveDate::parse_from_str(s.trim(), "%Y-%m-%d").map_err(|_| self.conversion_error(to))
            }
            _ => Err(self.conversion_error(to)),
        }
    }

    /// Milliseconds since the epoch.
    pub fn as_datetime_millis(&self) -> Result<i64, RecordError> {
        match self.non_null()? {
            FieldValue::String(s) => match DateTime::parse_from_rfc3339(s.trim()) {
                Ok(dt) => Ok(dt.timestamp_millis()),
                Err(_) => self.as_i64(),
            },
            FieldValue::Boolean(_) | FieldValue::ByteArray(_) => {
                Err(self.conversion_error(FieldType::Datetime))
            }
            _ => self.as_i64(),
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match &self.value {
            Some(FieldValue::String(s)) => Some(s.as_str()),
            _ => None,
        }
    }

    pub fn as_bytes(&self) -> Option<&[u8]> {
        match &self.value {
            Some(FieldValue::ByteArray(b)) => Some(b.as_slice()),
            _ => None,
        }
    }

    pub fn as_list(&self) -> Option<&Vec<Field>> {
        match &self.value {
            Some(FieldValue::List(items)) => Some(items),
            _ => None,
        }
    }

    pub fn as_list_mut(&mut self) -> Option<&mut Vec<Field>> {
        match &mut self.value {
            Some(FieldValue::List(items)) => Some(items),
            _ => None,
        }
    }

    pub fn as_map(&self) -> Option<&HashMap<String, Field>> {
        match &self.value {
            Some(FieldValue::Map(map)) => Some(map),
            _ => None,
        }
    }

    pub fn as_list_map(&self) -> Option<&IndexMap<String, Field>> {
        match &self.value {
            Some(FieldValue::ListMap(map)) => Some(map),
            _ => None,
        }
    }

    /// Child entries of a map or list-map, in iteration order.
    pub fn entries(&self) -> Vec<(&str, &Field)> {
        match &self.value {
            Some(FieldValue::Map(map)) => map.iter().map(|(k, v)| (k.as_str(), v)).collect(),
            Some(FieldValue::ListMap(map)) => map.iter().map(|(k, v)| (k.as_str(), v)).collect(),
            _ => Vec::new(),
        }
    }

    // ------------------------------------------------------------------------
    // Navigation
    // ------------------------------------------------------------------------

    /// One strict navigation step: name steps only descend into maps and
    /// list-maps, index steps only into lists and list-maps.
    pub fn child(&self, element: &PathElement) -> Option<&Field> {
        match (element, &self.value) {
            (PathElement::Map(name), Some(FieldValue::Map(map))) => map.get(name),
            (PathElement::Map(name), Some(FieldValue::ListMap(map))) => map.get(name),
            (PathElement::List(idx), Some(FieldValue::List(items))) => items.get(*idx),
            (PathElement::List(idx), Some(FieldValue::ListMap(map))) => {
                map.get_index(*idx).map(|(_, v)| v)
            }
            _ => None,
        }
    }

    pub fn child_mut(&mut self, element: &PathElement) -> Option<&mut Field> {
        match (element, &mut self.value) {
            (PathElement::Map(name), Some(FieldValue::Map(map))) => map.get_mut(name),
            (PathElement::Map(name), Some(FieldValue::ListMap(map))) => map.get_mut(name),
            (PathElement::List(idx), Some(FieldValue::List(items))) => items.get_mut(*idx),
            (PathElement::List(idx), Some(FieldValue::ListMap(map))) => {
                map.get_index_mut(*idx).map(|(_, v)| v)
            }
            _ => None,
        }
    }

    pub(crate) fn value_mut(&mut self) -> Option<&mut FieldValue> {
        self.value.as_mut()
    }

    /// Turns a null composite into an empty one so children can be inserted.
    pub(crate) fn ensure_container(&mut self) {
        if self.value.is_none() && self.field_type.is_composite() {
            *self = Field::empty_container(self.field_type);
        }
    }

    // ------------------------------------------------------------------------
    // JSON
    // ------------------------------------------------------------------------

    /// Typed JSON form: `{"type": "LONG", "value": 5}`.
    pub fn to_typed_json(&self) -> JsonValue {
        JsonValue::Object(self.typed_json_object())
    }

    fn typed_json_object(&self) -> JsonMap<String, JsonValue> {
        let value = match &self.value {
            None => JsonValue::Null,
            Some(v) => match v {
                FieldValue::Boolean(b) => JsonValue::from(*b),
                FieldValue::Integer(i) => JsonValue::from(*i),
                FieldValue::Long(i) => JsonValue::from(*i),
                FieldValue::Short(i) => JsonValue::from(*i),
                FieldValue::Byte(i) => JsonValue::from(*i),
                FieldValue::Float(f) => JsonValue::from(*f),
                FieldValue::Double(f) => JsonValue::from(*f),
                FieldValue::Decimal(d) => JsonValue::String(d.to_string()),
                FieldValue::Date(d) => JsonValue::String(d.format("%Y-%m-%d").to_string()),
                FieldValue::Datetime(ms) | FieldValue::Time(ms) => JsonValue::from(*ms),
                FieldValue::ZonedDatetime(dt) => JsonValue::String(dt.to_rfc3339()),
                FieldValue::String(s) => JsonValue::String(s.clone()),
                FieldValue::ByteArray(b) => JsonValue::from(b.clone()),
                FieldValue::List(items) => {
                    JsonValue::Array(items.iter().map(Field::to_typed_json).collect())
                }
                FieldValue::Map(map) => JsonValue::Object(
                    map.iter()
                        .map(|(k, v)| (k.clone(), v.to_typed_json()))
                        .collect(),
                ),
                FieldValue::ListMap(map) => JsonValue::Array(
                    map.iter()
                        .map(|(k, v)| {
                            let mut entry = JsonMap::new();
                            entry.insert("name".to_string(), JsonValue::String(k.clone()));
                            entry.extend(v.typed_json_object());
                            JsonValue::Object(entry)
                        })
                        .collect(),
                ),
            },
        };
        let mut obj = JsonMap::new();
        obj.insert(
            "type".to_string(),
            JsonValue::String(self.field_type.as_str().to_string()),
        );
        obj.insert("value".to_string(), value);
        obj
    }

    /// Parses the typed JSON form produced by [`Field::to_typed_json`].
    pub fn from_typed_json(json: &JsonValue) -> Result<Field, RecordError> {
        let obj = json.as_object().ok_or_else(|| {
            RecordError::InvalidJson(format!("expected an object with 'type' and 'value', got {}", json))
        })?;
        let field_type: FieldType = obj
            .get("type")
            .and_then(JsonValue::as_str)
            .ok_or_else(|| RecordError::InvalidJson("missing 'type'".to_string()))?
            .parse()?;
        let raw = obj.get("value").unwrap_or(&JsonValue::Null);
        if raw.is_null() {
            return Ok(Field::null(field_type));
        }
        let bad = || RecordError::InvalidJson(format!("invalid {} value: {}", field_type, raw));

        let value = match field_type {
            FieldType::Boolean => FieldValue::Boolean(raw.as_bool().ok_or_else(bad)?),
            FieldType::Integer => FieldValue::Integer(
                raw.as_i64()
                    .and_then(|v| i32::try_from(v).ok())
                    .ok_or_else(bad)?,
            ),
            FieldType::Long => FieldValue::Long(raw.as_i64().ok_or_else(bad)?),
            FieldType::Short => FieldValue::Short(
                raw.as_i64()
                    .and_then(|v| i16::try_from(v).ok())
                    .ok_or_else(bad)?,
            ),
            FieldType::Byte => FieldValue::Byte(
                raw.as_i64()
                    .and_then(|v| i8::try_from(v).ok())
                    .ok_or_else(bad)?,
            ),
            FieldType::Float => FieldValue::Float(raw.as_f64().ok_or_else(bad)? as f32),
            FieldType::Double => FieldValue::Double(raw.as_f64().ok_or_else(bad)?),
            FieldType::Decimal => {
                let text = match raw {
                    JsonValue::String(s) => s.clone(),
                    JsonValue::Number(n) => n.to_string(),
                    _ => return Err(bad()),
                };
                FieldValue::Decimal(BigDecimal::from_str(&text).map_err(|_| bad())?)
            }
            FieldType::Date => FieldValue::Date(
                NaiveDate::parse_from_str(raw.as_str().ok_or_else(bad)?, "%Y-%m-%d")
                    .map_err(|_| bad())?,
            ),
            FieldType::Datetime => FieldValue::Datetime(raw.as_i64().ok_or_else(bad)?),
            FieldType::ZonedDatetime => FieldValue::ZonedDatetime(
                DateTime::parse_from_rfc3339(raw.as_str().ok_or_else(bad)?).map_err(|_| bad())?,
            ),
            FieldType::Time => FieldValue::Time(raw.as_i64().ok_or_else(bad)?),
            FieldType::String => FieldValue::String(raw.as_str().ok_or_else(bad)?.to_string()),
            FieldType::ByteArray => FieldValue::ByteArray(
                raw.as_array()
                    .ok_or_else(bad)?
                    .iter()
                    .map(|b| b.as_u64().and_then(|b| u8::try_from(b).ok()))
                    .collect::<Option<Vec<u8>>>()
                    .ok_or_else(bad)?,
            ),
            FieldType::List => FieldValue::List(
                raw.as_array()
                    .ok_or_else(bad)?
                    .iter()
                    .map(Field::from_typed_json)
                    .collect::<Result<_, _>>()?,
            ),
            FieldType::Map => FieldValue::Map(
                raw.as_object()
                    .ok_or_else(bad)?
                    .iter()
                    .map(|(k, v)| Ok((k.clone(), Field::from_typed_json(v)?)))
                    .collect::<Result<_, RecordError>>()?,
            ),
            FieldType::ListMap => {
                let mut map = IndexMap::new();
                for entry in raw.as_array().ok_or_else(bad)? {
                    let name = entry
                        .get("name")
                        .and_then(JsonValue::as_str)
                        .ok_or_else(|| {
                            RecordError::InvalidJson("list-map entry without 'name'".to_string())
                        })?;
                    map.insert(name.to_string(), Field::from_typed_json(entry)?);
                }
                FieldValue::ListMap(map)
            }
        };
        Ok(Field::from_value(value))
    }

    /// Converts plain JSON into a field tree: objects become list-maps,
    /// arrays lists, integers longs and other numbers doubles.
    pub fn from_json(json: &JsonValue) -> Field {
        match json {
            JsonValue::Null => Field::null(FieldType::String),
            JsonValue::Bool(b) => Field::boolean(*b),
            JsonValue::Number(n) => {
                if let Some(i) = n.as_i64() {
                    Field::long(i)
                } else if n.is_u64() {
                    BigDecimal::from_str(&n.to_string())
                        .map(Field::decimal)
                        .unwrap_or_else(|_| Field::double(n.as_f64().unwrap_or_default()))
                } else {
                    Field::double(n.as_f64().unwrap_or_default())
                }
            }
            JsonValue::String(s) => Field::string(s.clone()),
            JsonValue::Array(items) => Field::list(items.iter().map(Field::from_json).collect()),
            JsonValue::Object(obj) => Field::list_map(
                obj.iter()
                    .map(|(k, v)| (k.clone(), Field::from_json(v)))
                    .collect(),
            ),
        }
    }

    /// Plain JSON rendering (type tags dropped).
    pub fn to_json(&self) -> JsonValue {
        let Some(value) = &self.value else {
            return JsonValue::Null;
        };
        match value {
            FieldValue::Boolean(b) => JsonValue::from(*b),
            FieldValue::Integer(i) => JsonValue::from(*i),
            FieldValue::Long(i) => JsonValue::from(*i),
            FieldValue::Short(i) => JsonValue::from(*i),
            FieldValue::Byte(i) => JsonValue::from(*i),
            FieldValue::Float(f) => JsonValue::from(*f),
            FieldValue::Double(f) => JsonValue::from(*f),
            FieldValue::Decimal(d) => d
                .to_string()
                .parse::<serde_json::Number>()
                .map(JsonValue::Number)
                .unwrap_or_else(|_| JsonValue::String(d.to_string())),
            FieldValue::Date(d) => JsonValue::String(d.format("%Y-%m-%d").to_string()),
            FieldValue::Datetime(ms) | FieldValue::Time(ms) => JsonValue::from(*ms),
            FieldValue::ZonedDatetime(dt) => JsonValue::String(dt.to_rfc3339()),
            FieldValue::String(s) => JsonValue::String(s.clone()),
            FieldValue::ByteArray(b) => JsonValue::from(b.clone()),
            FieldValue::List(items) => JsonValue::Array(items.iter().map(Field::to_json).collect()),
            FieldValue::Map(map) => JsonValue::Object(
                map.iter().map(|(k, v)| (k.clone(), v.to_json())).collect(),
            ),
            FieldValue::ListMap(map) => JsonValue::Object(
                map.iter().map(|(k, v)| (k.clone(), v.to_json())).collect(),
            ),
        }
    }
}

impl From<bool> for Field {
    fn from(v: bool) -> Self {
        Field::boolean(v)
    }
}

impl From<i32> for Field {
    fn from(v: i32) -> Self {
        Field::integer(v)
    }
}

impl From<i64> for Field {
    fn from(v: i64) -> Self {
        Field::long(v)
    }
}

impl From<f64> for Field {
    fn from(v: f64) -> Self {
        Field::double(v)
    }
}

impl From<&str> for Field {
    fn from(v: &str) -> Self {
        Field::string(v)
    }
}

impl From<String> for Field {
    fn from(v: String) -> Self {
        Field::string(v)
    }
}

impl Serialize for Field {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.to_typed_json().serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for Field {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let json = JsonValue::deserialize(deserializer)?;
        Field::from_typed_json(&json).map_err(de::Error::custom)
    }
}

fn float_to_i64(v: f64) -> Option<i64> {
    if v.is_finite() && v >= i64::MIN as f64 && v <= i64::MAX as f64 {
        Some(v.trunc() as i64)
    } else {
        None
    }
}

fn decimal_from_float(v: f64) -> Option<BigDecimal> {
    if v.is_finite() {
        BigDecimal::from_str(&v.to_string()).ok()
    } else {
        None
    }
}

fn describe(value: &FieldValue) -> String {
    match value {
        FieldValue::List(items) => format!("<list of {}>", items.len()),
        FieldValue::Map(map) => format!("<map of {}>", map.len()),
        FieldValue::ListMap(map) => format!("<list-map of {}>", map.len()),
        FieldValue::ByteArray(b) => format!("<{} bytes>", b.len()),
        other => Field::from_value(other.clone()).as_string().unwrap_or_default(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_null_keeps_type() {
        let f = Field::null(FieldType::Decimal);
        assert!(f.is_null());
        assert_eq!(f.field_type(), FieldType::Decimal);
        assert_eq!(
            f.as_decimal(),
            Err(RecordError::NullValue {
                field_type: FieldType::Decimal
            })
        );
    }

    #[test]
    fn test_numeric_conversions() {
        assert_eq!(Field::string(" 42 ").as_i64().unwrap(), 42);
        assert_eq!(Field::double(3.9).as_i32().unwrap(), 3);
        assert_eq!(Field::short(7).as_f64().unwrap(), 7.0);
        assert_eq!(
            Field::string("1.25").as_decimal().unwrap(),
            BigDecimal::from_str("1.25").unwrap()
        );
        assert!(Field::long(1).as_bool().unwrap());
        assert!(!Field::string("FALSE").as_bool().unwrap());
    }

    #[test]
    fn test_conversion_failure_is_typed() {
        let err = Field::string("abc").as_i64().unwrap_err();
        assert!(matches!(
            err,
            RecordError::Conversion {
                from: FieldType::String,
                to: FieldType::Long,
                ..
            }
        ));
        assert!(Field::long(i64::MAX).as_i32().is_err());
        assert!(Field::list(vec![]).as_string().is_err());
    }

    #[test]
    fn test_typed_json_preserves_list_map_order() {
        let mut map = IndexMap::new();
        map.insert("z".to_string(), Field::long(1));
        map.insert("a".to_string(), Field::null(FieldType::Date));
        map.insert(
            "d".to_string(),
            Field::decimal(BigDecimal::from_str("10.50").unwrap()),
        );
        let field = Field::list_map(map);

        let json = serde_json::to_string(&field).unwrap();
        let back: Field = serde_json::from_str(&json).unwrap();
        assert_eq!(back, field);
        let keys: Vec<_> = back.entries().into_iter().map(|(k, _)| k).collect();
        assert_eq!(keys, vec!["z", "a", "d"]);
    }

    #[test]
    fn test_typed_json_shape() {
        assert_eq!(
            Field::long(5).to_typed_json(),
            serde_json::json!({"type": "LONG", "value": 5})
        );
        assert_eq!(
            Field::null(FieldType::ZonedDatetime).to_typed_json(),
            serde_json::json!({"type": "ZONED_DATETIME", "value": null})
        );
    }

    #[test]
    fn test_from_plain_json() {
        let json = serde_json::json!({"a": 1, "b": [true, 2.5], "c": null});
        let field = Field::from_json(&json);
        assert_eq!(field.field_type(), FieldType::ListMap);
        let a = field.child(&PathElement::Map("a".into())).unwrap();
        assert_eq!(a.field_type(), FieldType::Long);
        let b = field.child(&PathElement::Map("b".into())).unwrap();
        assert_eq!(b.as_list().unwrap()[1], Field::double(2.5));
        assert_eq!(field.to_json(), json);
    }

    #[test]
    fn test_strict_navigation() {
        let list = Field::list(vec![Field::long(1)]);
        assert!(list.child(&PathElement::Map("0".into())).is_none());
        assert!(list.child(&PathElement::List(0)).is_some());

        let mut m = HashMap::new();
        m.insert("0".to_string(), Field::long(1));
        let map = Field::map(m);
        assert!(map.child(&PathElement::List(0)).is_none());

        let mut lm = IndexMap::new();
        lm.insert("k".to_string(), Field::long(9));
        let list_map = Field::list_map(lm);
        assert_eq!(list_map.child(&PathElement::List(0)), Some(&Field::long(9)));
        assert_eq!(
            list_map.child(&PathElement::Map("k".into())),
            Some(&Field::long(9))
        );
    }
}
