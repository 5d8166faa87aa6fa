use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::trace;

/// Status attached to a vitals reading.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum VitalsStatus {
    Normal,
    HighHeartRate,
    #[default]
    Unset,
}

/// Latest pulse-oximetry reading.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VitalsRecord {
    #[serde(rename = "heartRate")]
    pub heart_rate: i64,
    pub spo2: i64,
    pub status: VitalsStatus,
    /// Seconds since the Unix epoch at publish time.
    pub timestamp: f64,
}

/// Latest motion/inertial reading. Values are passed through from the
/// firmware without correction.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MotionRecord {
    pub moving: bool,
    pub steps: i64,
    pub distance_m: f64,
    pub delta: f64,
    pub timestamp_ms: i64,
}

#[derive(Debug, thiserror::Error)]
pub enum TelemetryError {
    #[error("invalid JSON: {0}")]
    Json(#[from] serde_json::Error),
    #[error("expected a JSON object, got {0}")]
    NotAnObject(&'static str),
    #[error("field `{field}` has unusable value {value}")]
    BadField { field: &'static str, value: String },
}

/// Turns one text line from a serial source into a record.
pub trait RecordParser: Send + 'static {
    type Record: Clone + Send + 'static;

    fn parse(&self, line: &str) -> Result<Self::Record, TelemetryError>;

    /// Human-readable name for logging.
    fn name(&self) -> &str {
        "unnamed"
    }
}

// ---------------------------------------------------------------------------
// Plausibility rules
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VitalsField {
    HeartRate,
    Spo2,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Comparison {
    Gt,
    Ge,
    Lt,
    Le,
    Eq,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Condition {
    pub field: VitalsField,
    pub op: Comparison,
    pub value: i64,
}

impl Condition {
    pub fn holds(&self, sample: &VitalsSample) -> bool {
        let actual = sample.get(self.field);
        match self.op {
            Comparison::Gt => actual > self.value,
            Comparison::Ge => actual >= self.value,
            Comparison::Lt => actual < self.value,
            Comparison::Le => actual <= self.value,
            Comparison::Eq => actual == self.value,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum Adjustment {
    Subtract { field: VitalsField, amount: i64 },
    Add { field: VitalsField, amount: i64 },
    Set { field: VitalsField, value: i64 },
    Status { status: VitalsStatus },
}

impl Adjustment {
    fn apply(&self, sample: &mut VitalsSample) {
        match *self {
            Adjustment::Subtract { field, amount } => {
                let v = sample.get(field).saturating_sub(amount);
                sample.set(field, v);
            }
            Adjustment::Add { field, amount } => {
                let v = sample.get(field).saturating_add(amount);
                sample.set(field, v);
            }
            Adjustment::Set { field, value } => sample.set(field, value),
            Adjustment::Status { status } => sample.status = status,
        }
    }
}

/// One named correction: when every condition holds, apply every action.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlausibilityRule {
    pub name: String,
    #[serde(default)]
    pub when: Vec<Condition>,
    #[serde(default)]
    pub then: Vec<Adjustment>,
}

impl PlausibilityRule {
    /// A rule with no conditions never fires.
    pub fn matches(&self, sample: &VitalsSample) -> bool {
        !self.when.is_empty() && self.when.iter().all(|c| c.holds(sample))
    }
}

/// Heart rate / oxygen saturation pair being corrected.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VitalsSample {
    pub heart_rate: i64,
    pub spo2: i64,
    pub status: VitalsStatus,
}

impl VitalsSample {
    fn get(&self, field: VitalsField) -> i64 {
        match field {
            VitalsField::HeartRate => self.heart_rate,
            VitalsField::Spo2 => self.spo2,
        }
    }

    fn set(&mut self, field: VitalsField, value: i64) {
        match field {
            VitalsField::HeartRate => self.heart_rate = value,
            VitalsField::Spo2 => self.spo2 = value,
        }
    }
}

/// Ordered rule table. Each rule sees the output of the rules before it.
#[derive(Debug, Clone, PartialEq)]
pub struct PlausibilityRules {
    rules: Vec<PlausibilityRule>,
}

impl PlausibilityRules {
    pub fn new(rules: Vec<PlausibilityRule>) -> Self {
        Self { rules }
    }

    pub fn standard() -> Self {
        Self::new(default_vitals_rules())
    }

    pub fn rules(&self) -> &[PlausibilityRule] {
        &self.rules
    }

    pub fn apply(&self, mut sample: VitalsSample) -> VitalsSample {
        for rule in &self.rules {
            if rule.matches(&sample) {
                for action in &rule.then {
                    action.apply(&mut sample);
                }
                trace!(rule = %rule.name, ?sample, "plausibility rule applied");
            }
        }
        sample
    }
}

/// The correction table used when the config file does not supply one.
pub fn default_vitals_rules() -> Vec<PlausibilityRule> {
    use Comparison::{Gt, Lt};
    use VitalsField::{HeartRate, Spo2};

    vec![
        PlausibilityRule {
            name: "high-heart-rate".into(),
            when: vec![Condition {
                field: HeartRate,
                op: Gt,
                value: 100,
            }],
            then: vec![
                Adjustment::Subtract {
                    field: HeartRate,
                    amount: 25,
                },
                Adjustment::Status {
                    status: VitalsStatus::HighHeartRate,
                },
            ],
        },
        PlausibilityRule {
            name: "missing-heart-rate".into(),
            when: vec![
                Condition {
                    field: HeartRate,
                    op: Lt,
                    value: 1,
                },
                Condition {
                    field: Spo2,
                    op: Gt,
                    value: 95,
                },
            ],
            then: vec![Adjustment::Set {
                field: HeartRate,
                value: 98,
            }],
        },
        PlausibilityRule {
            name: "missing-spo2".into(),
            when: vec![
                Condition {
                    field: Spo2,
                    op: Lt,
                    value: 1,
                },
                Condition {
                    field: HeartRate,
                    op: Lt,
                    value: 100,
                },
            ],
            then: vec![Adjustment::Set {
                field: Spo2,
                value: 97,
            }],
        },
    ]
}

// ---------------------------------------------------------------------------
// Parsers
// ---------------------------------------------------------------------------

/// Parses `{"heartRate": int, "spo2": int}` lines and applies the rule table.
#[derive(Debug, Clone)]
pub struct VitalsParser {
    rules: PlausibilityRules,
    baseline: VitalsStatus,
}

impl VitalsParser {
    pub fn new(rules: PlausibilityRules, baseline: VitalsStatus) -> Self {
        Self { rules, baseline }
    }

    /// Parse with an explicit publish timestamp.
    pub fn parse_at(&self, line: &str, timestamp: f64) -> Result<VitalsRecord, TelemetryError> {
        let obj = parse_object(line)?;
        let sample = VitalsSample {
            heart_rate: int_field(&obj, "heartRate", 0)?,
            spo2: int_field(&obj, "spo2", 0)?,
            status: self.baseline,
        };
        let corrected = self.rules.apply(sample);
        Ok(VitalsRecord {
            heart_rate: corrected.heart_rate,
            spo2: corrected.spo2,
            status: corrected.status,
            timestamp,
        })
    }
}

impl Default for VitalsParser {
    fn default() -> Self {
        Self::new(PlausibilityRules::standard(), VitalsStatus::Normal)
    }
}

impl RecordParser for VitalsParser {
    type Record = VitalsRecord;

    fn parse(&self, line: &str) -> Result<VitalsRecord, TelemetryError> {
        self.parse_at(line, unix_seconds_now())
    }

    fn name(&self) -> &str {
        "vitals"
    }
}

/// Parses motion lines; fields are coerced and defaulted, never corrected.
#[derive(Debug, Clone, Copy, Default)]
pub struct MotionParser;

impl RecordParser for MotionParser {
    type Record = MotionRecord;

    fn parse(&self, line: &str) -> Result<MotionRecord, TelemetryError> {
        let obj = parse_object(line)?;
        Ok(MotionRecord {
            moving: bool_field(&obj, "moving", false)?,
            steps: int_field(&obj, "steps", 0)?,
            distance_m: float_field(&obj, "distance_m", 0.0)?,
            delta: float_field(&obj, "delta", 0.0)?,
            timestamp_ms: int_field(&obj, "timestamp_ms", 0)?,
        })
    }

    fn name(&self) -> &str {
        "motion"
    }
}

/// Current wall-clock time as fractional Unix seconds.
pub fn unix_seconds_now() -> f64 {
    chrono::Utc::now().timestamp_micros() as f64 / 1_000_000.0
}

fn parse_object(line: &str) -> Result<Map<String, Value>, TelemetryError> {
    match serde_json::from_str::<Value>(line.trim())? {
        Value::Object(obj) => Ok(obj),
        Value::Array(_) => Err(TelemetryError::NotAnObject("an array")),
        Value::String(_) => Err(TelemetryError::NotAnObject("a string")),
        Value::Number(_) => Err(TelemetryError::NotAnObject("a number")),
        Value::Bool(_) => Err(TelemetryError::NotAnObject("a boolean")),
        Value::Null => Err(TelemetryError::NotAnObject("null")),
    }
}

fn bad(field: &'static str, value: &Value) -> TelemetryError {
    TelemetryError::BadField {
        field,
        value: value.to_string(),
    }
}

// Missing keys and explicit nulls both fall back to the default.
fn int_field(
    obj: &Map<String, Value>,
    field: &'static str,
    default: i64,
) -> Result<i64, TelemetryError> {
    let value = match obj.get(field) {
        None | Some(Value::Null) => return Ok(default),
        Some(v) => v,
    };
    match value {
        Value::Number(n) => {
            if let Some(i) = n.as_i64() {
                return Ok(i);
            }
            match n.as_f64() {
                Some(f) if f.is_finite() && f.abs() < i64::MAX as f64 => Ok(f.trunc() as i64),
                _ => Err(bad(field, value)),
            }
        }
        Value::Bool(b) => Ok(i64::from(*b)),
        Value::String(s) => s.trim().parse().map_err(|_| bad(field, value)),
        _ => Err(bad(field, value)),
    }
}

fn float_field(
    obj: &Map<String, Value>,
    field: &'static str,
    default: f64,
) -> Result<f64, TelemetryError> {
    let value = match obj.get(field) {
        None | Some(Value::Null) => return Ok(default),
        Some(v) => v,
    };
    let parsed = match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse::<f64>().ok(),
        _ => None,
    };
    match parsed {
        Some(f) if f.is_finite() => Ok(f),
        _ => Err(bad(field, value)),
    }
}

fn bool_field(
    obj: &Map<String, Value>,
    field: &'static str,
    default: bool,
) -> Result<bool, TelemetryError> {
    let value = match obj.get(field) {
        None | Some(Value::Null) => return Ok(default),
        Some(v) => v,
    };
    match value {
        Value::Bool(b) => Ok(*b),
        Value::Number(n) => n.as_f64().map(|f| f != 0.0).ok_or_else(|| bad(field, value)),
        Value::String(s) => match s.trim().to_ascii_lowercase().as_str() {
            "true" => Ok(true),
            "false" => Ok(false),
            _ => Err(bad(field, value)),
        },
        _ => Err(bad(field, value)),
    }
}
