//! Checkpoint field types and their per-type configuration.
//!
//! The database keeps `field_type` and a JSON `config` column side by side;
//! [`FieldConfig`] is the checked union of the two.

use std::{fmt, str::FromStr};

use chrono::{DateTime, NaiveDate, NaiveDateTime, NaiveTime};
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use serde_json::Value;

use crate::status::ResponseStatus;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum FieldType {
    Checkbox,
    Number,
    Text,
    Textarea,
    Photo,
    File,
    Dropdown,
    Multiselect,
    Gps,
    Signature,
    Date,
    Time,
    Datetime,
    Rating,
}

impl FieldType {
    pub const ALL: [FieldType; 14] = [
        FieldType::Checkbox,
        FieldType::Number,
        FieldType::Text,
        FieldType::Textarea,
        FieldType::Photo,
        FieldType::File,
        FieldType::Dropdown,
        FieldType::Multiselect,
        FieldType::Gps,
        FieldType::Signature,
        FieldType::Date,
        FieldType::Time,
        FieldType::Datetime,
        FieldType::Rating,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            FieldType::Checkbox => "CHECKBOX",
            FieldType::Number => "NUMBER",
            FieldType::Text => "TEXT",
            FieldType::Textarea => "TEXTAREA",
            FieldType::Photo => "PHOTO",
            FieldType::File => "FILE",
            FieldType::Dropdown => "DROPDOWN",
            FieldType::Multiselect => "MULTISELECT",
            FieldType::Gps => "GPS",
            FieldType::Signature => "SIGNATURE",
            FieldType::Date => "DATE",
            FieldType::Time => "TIME",
            FieldType::Datetime => "DATETIME",
            FieldType::Rating => "RATING",
        }
    }
}

impl fmt::Display for FieldType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for FieldType {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let normalized = value.trim().to_ascii_uppercase();
        FieldType::ALL
            .into_iter()
            .find(|field_type| field_type.as_str() == normalized)
            .ok_or_else(|| {
                let allowed: Vec<&str> = FieldType::ALL.iter().map(|t| t.as_str()).collect();
                format!(
                    "invalid field type '{value}'. Allowed types: {}",
                    allowed.join(", ")
                )
            })
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct NumberConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub unit: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TextConfig {
    #[serde(default, alias = "maxLength", skip_serializing_if = "Option::is_none")]
    pub max_length: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub placeholder: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ChoiceConfig {
    #[serde(default)]
    pub options: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RatingConfig {
    #[serde(default = "default_rating_max")]
    pub max: u8,
}

impl Default for RatingConfig {
    fn default() -> Self {
        Self {
            max: default_rating_max(),
        }
    }
}

fn default_rating_max() -> u8 {
    5
}

#[derive(Debug, Clone, PartialEq)]
pub enum FieldConfig {
    Checkbox,
    Number(NumberConfig),
    Text(TextConfig),
    Textarea(TextConfig),
    Photo,
    File,
    Dropdown(ChoiceConfig),
    Multiselect(ChoiceConfig),
    Gps,
    Signature,
    Date,
    Time,
    Datetime,
    Rating(RatingConfig),
}

/// A recorded answer after it has been checked against its field.
#[derive(Debug, Clone, PartialEq)]
pub enum TypedValue {
    Bool(bool),
    Number(f64),
    Text(String),
    Choices(Vec<String>),
    Date(NaiveDateTime),
    PhotoUrl(String),
    FileUrl(String),
    Location { lat: f64, lng: f64 },
}

impl TypedValue {
    /// The pass/fail verdict implied by the value itself, if any.
    pub fn implied_status(&self) -> Option<ResponseStatus> {
        match self {
            TypedValue::Bool(true) => Some(ResponseStatus::Pass),
            TypedValue::Bool(false) => Some(ResponseStatus::Fail),
            _ => None,
        }
    }
}

impl FieldConfig {
    /// Builds the typed configuration for `field_type`. A missing or null
    /// config means the type's defaults.
    pub fn from_parts(field_type: FieldType, config: Option<&Value>) -> Result<Self, String> {
        let config = match config {
            None | Some(Value::Null) => None,
            Some(value) => Some(value),
        };

        let field = match field_type {
            FieldType::Checkbox => FieldConfig::Checkbox,
            FieldType::Number => {
                let number: NumberConfig = parse_config(config)?;
                if let (Some(min), Some(max)) = (number.min, number.max) {
                    if min > max {
                        return Err(format!("min ({min}) must not exceed max ({max})"));
                    }
                }
                FieldConfig::Number(number)
            }
            FieldType::Text => FieldConfig::Text(parse_config(config)?),
            FieldType::Textarea => FieldConfig::Textarea(parse_config(config)?),
            FieldType::Photo => FieldConfig::Photo,
            FieldType::File => FieldConfig::File,
            FieldType::Dropdown => FieldConfig::Dropdown(parse_choices(config)?),
            FieldType::Multiselect => FieldConfig::Multiselect(parse_choices(config)?),
            FieldType::Gps => FieldConfig::Gps,
            FieldType::Signature => FieldConfig::Signature,
            FieldType::Date => FieldConfig::Date,
            FieldType::Time => FieldConfig::Time,
            FieldType::Datetime => FieldConfig::Datetime,
            FieldType::Rating => {
                let rating: RatingConfig = parse_config(config)?;
                if rating.max == 0 {
                    return Err("rating max must be at least 1".to_string());
                }
                FieldConfig::Rating(rating)
            }
        };

        Ok(field)
    }

    /// Reads a stored checkpoint row back into its typed form.
    pub fn from_stored(field_type: &str, config: &Value) -> Result<Self, String> {
        let field_type: FieldType = field_type.parse()?;
        Self::from_parts(field_type, Some(config))
    }

    pub fn field_type(&self) -> FieldType {
        match self {
            FieldConfig::Checkbox => FieldType::Checkbox,
            FieldConfig::Number(_) => FieldType::Number,
            FieldConfig::Text(_) => FieldType::Text,
            FieldConfig::Textarea(_) => FieldType::Textarea,
            FieldConfig::Photo => FieldType::Photo,
            FieldConfig::File => FieldType::File,
            FieldConfig::Dropdown(_) => FieldType::Dropdown,
            FieldConfig::Multiselect(_) => FieldType::Multiselect,
            FieldConfig::Gps => FieldType::Gps,
            FieldConfig::Signature => FieldType::Signature,
            FieldConfig::Date => FieldType::Date,
            FieldConfig::Time => FieldType::Time,
            FieldConfig::Datetime => FieldType::Datetime,
            FieldConfig::Rating(_) => FieldType::Rating,
        }
    }

    /// The JSON stored in the `config` column.
    pub fn config_value(&self) -> Value {
        let value = match self {
            FieldConfig::Number(config) => serde_json::to_value(config),
            FieldConfig::Text(config) | FieldConfig::Textarea(config) => {
                serde_json::to_value(config)
            }
            FieldConfig::Dropdown(config) | FieldConfig::Multiselect(config) => {
                serde_json::to_value(config)
            }
            FieldConfig::Rating(config) => serde_json::to_value(config),
            _ => Ok(Value::Object(Default::default())),
        };
        value.unwrap_or_else(|_| Value::Object(Default::default()))
    }

    /// The selectable options, for the field types that have them.
    pub fn options(&self) -> Option<&[String]> {
        match self {
            FieldConfig::Dropdown(config) | FieldConfig::Multiselect(config) => {
                Some(&config.options)
            }
            _ => None,
        }
    }

    /// Validates `raw` as an answer to this field and types it.
    pub fn interpret(&self, raw: &str) -> Result<TypedValue, String> {
        let trimmed = raw.trim();
        if trimmed.is_empty() {
            return Err("value must not be empty".to_string());
        }

        match self {
            FieldConfig::Checkbox => parse_checkbox(trimmed).map(TypedValue::Bool),
            FieldConfig::Number(config) => {
                let number: f64 = trimmed
                    .parse()
                    .ok()
                    .filter(|n: &f64| n.is_finite())
                    .ok_or_else(|| format!("'{trimmed}' is not a number"))?;
                if let Some(min) = config.min {
                    if number < min {
                        return Err(format!("value must be at least {min}"));
                    }
                }
                if let Some(max) = config.max {
                    if number > max {
                        return Err(format!("value must be at most {max}"));
                    }
                }
                Ok(TypedValue::Number(number))
            }
            FieldConfig::Text(config) | FieldConfig::Textarea(config) => {
                if let Some(limit) = config.max_length {
                    if trimmed.chars().count() > limit {
                        return Err(format!("value must be at most {limit} characters"));
                    }
                }
                Ok(TypedValue::Text(trimmed.to_string()))
            }
            FieldConfig::Photo => parse_url(trimmed).map(TypedValue::PhotoUrl),
            FieldConfig::File => parse_url(trimmed).map(TypedValue::FileUrl),
            FieldConfig::Dropdown(config) => {
                if config.options.iter().any(|option| option == trimmed) {
                    Ok(TypedValue::Choices(vec![trimmed.to_string()]))
                } else {
                    Err(format!("'{trimmed}' is not one of the available options"))
                }
            }
            FieldConfig::Multiselect(config) => {
                let selected = parse_selection(trimmed)?;
                if selected.is_empty() {
                    return Err("select at least one option".to_string());
                }
                if let Some(unknown) = selected
                    .iter()
                    .find(|choice| !config.options.contains(choice))
                {
                    return Err(format!("'{unknown}' is not one of the available options"));
                }
                Ok(TypedValue::Choices(selected))
            }
            FieldConfig::Gps => parse_location(trimmed),
            FieldConfig::Signature => Ok(TypedValue::Text(trimmed.to_string())),
            FieldConfig::Date => NaiveDate::parse_from_str(trimmed, "%Y-%m-%d")
                .map(|date| TypedValue::Date(date.and_time(NaiveTime::MIN)))
                .map_err(|_| format!("'{trimmed}' is not a date (YYYY-MM-DD)")),
            FieldConfig::Time => NaiveTime::parse_from_str(trimmed, "%H:%M")
                .or_else(|_| NaiveTime::parse_from_str(trimmed, "%H:%M:%S"))
                .map(|time| TypedValue::Text(time.format("%H:%M:%S").to_string()))
                .map_err(|_| format!("'{trimmed}' is not a time (HH:MM)")),
            FieldConfig::Datetime => parse_datetime(trimmed).map(TypedValue::Date),
            FieldConfig::Rating(config) => {
                let rating: u8 = trimmed
                    .parse()
                    .map_err(|_| format!("'{trimmed}' is not a rating"))?;
                if rating == 0 || rating > config.max {
                    return Err(format!("rating must be between 1 and {}", config.max));
                }
                Ok(TypedValue::Number(f64::from(rating)))
            }
        }
    }
}

fn parse_config<T: DeserializeOwned + Default>(config: Option<&Value>) -> Result<T, String> {
    match config {
        None => Ok(T::default()),
        Some(value) => serde_json::from_value(value.clone()).map_err(|err| err.to_string()),
    }
}

fn parse_choices(config: Option<&Value>) -> Result<ChoiceConfig, String> {
    let mut choices: ChoiceConfig = parse_config(config)?;
    choices.options = choices
        .options
        .into_iter()
        .map(|option| option.trim().to_string())
        .filter(|option| !option.is_empty())
        .collect();
    if choices.options.is_empty() {
        return Err("options must contain at least one entry".to_string());
    }
    Ok(choices)
}

fn parse_checkbox(value: &str) -> Result<bool, String> {
    match value.to_ascii_lowercase().as_str() {
        "yes" | "true" | "pass" | "ok" | "1" => Ok(true),
        "no" | "false" | "fail" | "0" => Ok(false),
        _ => Err(format!("'{value}' is not a yes/no answer")),
    }
}

fn parse_url(value: &str) -> Result<String, String> {
    url::Url::parse(value)
        .map(|url| url.to_string())
        .map_err(|_| format!("'{value}' is not a valid URL"))
}

fn parse_selection(value: &str) -> Result<Vec<String>, String> {
    let items: Vec<String> = if value.starts_with('[') {
        serde_json::from_str(value).map_err(|err| format!("invalid selection: {err}"))?
    } else {
        value.split(',').map(str::to_string).collect()
    };

    let mut selected: Vec<String> = Vec::with_capacity(items.len());
    for item in items {
        let item = item.trim().to_string();
        if !item.is_empty() && !selected.contains(&item) {
            selected.push(item);
        }
    }
    Ok(selected)
}

fn parse_location(value: &str) -> Result<TypedValue, String> {
    let (lat, lng) = value
        .split_once(',')
        .ok_or_else(|| "location must be 'latitude,longitude'".to_string())?;
    let lat: f64 = lat
        .trim()
        .parse()
        .map_err(|_| "latitude is not a number".to_string())?;
    let lng: f64 = lng
        .trim()
        .parse()
        .map_err(|_| "longitude is not a number".to_string())?;
    if !(-90.0..=90.0).contains(&lat) || !(-180.0..=180.0).contains(&lng) {
        return Err("coordinates are out of range".to_string());
    }
    Ok(TypedValue::Location { lat, lng })
}

fn parse_datetime(value: &str) -> Result<NaiveDateTime, String> {
    if let Ok(parsed) = DateTime::parse_from_rfc3339(value) {
        return Ok(parsed.naive_utc());
    }
    ["%Y-%m-%dT%H:%M:%S", "%Y-%m-%dT%H:%M", "%Y-%m-%d %H:%M:%S", "%Y-%m-%d %H:%M"]
        .iter()
        .find_map(|format| NaiveDateTime::parse_from_str(value, format).ok())
        .ok_or_else(|| format!("'{value}' is not a date and time"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn parses_every_field_type_name() {
        for field_type in FieldType::ALL {
            assert_eq!(field_type.as_str().parse::<FieldType>(), Ok(field_type));
        }
        assert_eq!("textarea".parse::<FieldType>(), Ok(FieldType::Textarea));
        assert!("SLIDER".parse::<FieldType>().is_err());
    }

    #[test]
    fn missing_config_uses_defaults() {
        let rating = FieldConfig::from_parts(FieldType::Rating, None).unwrap();
        assert_eq!(rating, FieldConfig::Rating(RatingConfig { max: 5 }));
        let checkbox = FieldConfig::from_parts(FieldType::Checkbox, Some(&json!({}))).unwrap();
        assert_eq!(checkbox.config_value(), json!({}));
    }

    #[test]
    fn rejects_inverted_number_bounds() {
        let err = FieldConfig::from_parts(FieldType::Number, Some(&json!({"min": 10, "max": 1})))
            .unwrap_err();
        assert!(err.contains("must not exceed"));
    }

    #[test]
    fn dropdown_requires_options() {
        assert!(FieldConfig::from_parts(FieldType::Dropdown, None).is_err());
        assert!(
            FieldConfig::from_parts(FieldType::Dropdown, Some(&json!({"options": ["  "]})))
                .is_err()
        );
        let field = FieldConfig::from_parts(
            FieldType::Dropdown,
            Some(&json!({"options": ["OK", "Needs Attention"]})),
        )
        .unwrap();
        assert_eq!(
            field.options(),
            Some(&["OK".to_string(), "Needs Attention".to_string()][..])
        );
    }

    #[test]
    fn stored_config_round_trips() {
        let field = FieldConfig::from_parts(
            FieldType::Number,
            Some(&json!({"min": -20, "max": 50, "unit": "°C"})),
        )
        .unwrap();
        let restored = FieldConfig::from_stored("NUMBER", &field.config_value()).unwrap();
        assert_eq!(restored, field);
    }

    #[test]
    fn interprets_checkbox_answers() {
        let field = FieldConfig::Checkbox;
        assert_eq!(field.interpret("yes"), Ok(TypedValue::Bool(true)));
        assert_eq!(field.interpret("No"), Ok(TypedValue::Bool(false)));
        assert!(field.interpret("maybe").is_err());
        assert_eq!(
            field.interpret("no").unwrap().implied_status(),
            Some(ResponseStatus::Fail)
        );
    }

    #[test]
    fn enforces_number_bounds() {
        let field = FieldConfig::Number(NumberConfig {
            min: Some(-20.0),
            max: Some(50.0),
            unit: None,
        });
        assert_eq!(field.interpret("21.5"), Ok(TypedValue::Number(21.5)));
        assert!(field.interpret("51").is_err());
        assert!(field.interpret("-21").is_err());
        assert!(field.interpret("warm").is_err());
        assert!(field.interpret("NaN").is_err());
    }

    #[test]
    fn enforces_text_length() {
        let field = FieldConfig::Text(TextConfig {
            max_length: Some(3),
            placeholder: None,
        });
        assert!(field.interpret("abc").is_ok());
        assert!(field.interpret("abcd").is_err());
        assert!(field.interpret("   ").is_err());
    }

    #[test]
    fn restricts_choices_to_configured_options() {
        let options = ChoiceConfig {
            options: vec!["A".into(), "B".into(), "C".into()],
        };
        let dropdown = FieldConfig::Dropdown(options.clone());
        assert!(dropdown.interpret("B").is_ok());
        assert!(dropdown.interpret("D").is_err());

        let multi = FieldConfig::Multiselect(options);
        assert_eq!(
            multi.interpret(r#"["A","C","A"]"#),
            Ok(TypedValue::Choices(vec!["A".into(), "C".into()]))
        );
        assert_eq!(
            multi.interpret("B, C"),
            Ok(TypedValue::Choices(vec!["B".into(), "C".into()]))
        );
        assert!(multi.interpret("A,Z").is_err());
    }

    #[test]
    fn interprets_dates_times_and_locations() {
        let date = FieldConfig::Date.interpret("2025-03-01").unwrap();
        assert_eq!(
            date,
            TypedValue::Date(
                NaiveDate::from_ymd_opt(2025, 3, 1)
                    .unwrap()
                    .and_hms_opt(0, 0, 0)
                    .unwrap()
            )
        );
        assert_eq!(
            FieldConfig::Time.interpret("07:30"),
            Ok(TypedValue::Text("07:30:00".into()))
        );
        assert!(FieldConfig::Datetime.interpret("2025-03-01T08:15").is_ok());
        assert!(FieldConfig::Datetime.interpret("2025-03-01T08:15:00Z").is_ok());
        assert_eq!(
            FieldConfig::Gps.interpret("52.52, 13.405"),
            Ok(TypedValue::Location {
                lat: 52.52,
                lng: 13.405
            })
        );
        assert!(FieldConfig::Gps.interpret("91,0").is_err());
    }

    #[test]
    fn ratings_stay_within_scale() {
        let field = FieldConfig::Rating(RatingConfig { max: 5 });
        assert_eq!(field.interpret("4"), Ok(TypedValue::Number(4.0)));
        assert!(field.interpret("0").is_err());
        assert!(field.interpret("6").is_err());
    }

    #[test]
    fn photos_must_be_urls() {
        assert!(FieldConfig::Photo
            .interpret("https://res.cloudinary.com/demo/image/upload/sample.jpg")
            .is_ok());
        assert!(FieldConfig::Photo.interpret("sample.jpg").is_err());
    }
}
