use chrono::{DateTime, NaiveDate, NaiveDateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum IssueStatus {
    #[default]
    Pending,
    InProgress,
    Resolved,
}

impl IssueStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::InProgress => "in-progress",
            Self::Resolved => "resolved",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "pending" => Some(Self::Pending),
            "in-progress" => Some(Self::InProgress),
            "resolved" => Some(Self::Resolved),
            _ => None,
        }
    }

    /// Human form used in notifications ("in progress").
    pub fn label(self) -> String {
        self.as_str().replace('-', " ")
    }

    /// Status an issue card advances to when its action button is pressed.
    pub fn next(self) -> Self {
        match self {
            Self::Pending => Self::InProgress,
            Self::InProgress => Self::Resolved,
            Self::Resolved => Self::Pending,
        }
    }

    pub fn action_label(self) -> &'static str {
        match self {
            Self::Pending => "Start Work",
            Self::InProgress => "Mark Resolved",
            Self::Resolved => "Reopen",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Priority {
    High,
    #[default]
    Medium,
    Low,
}

impl Priority {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::High => "high",
            Self::Medium => "medium",
            Self::Low => "low",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "high" => Some(Self::High),
            "medium" => Some(Self::Medium),
            "low" => Some(Self::Low),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Issue {
    pub id: String,
    pub title: String,
    pub priority: Priority,
    pub reporter: String,
    pub created_at: Option<DateTime<Utc>>,
    pub unit: String,
    pub description: String,
    pub category: String,
    pub status: IssueStatus,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResidentStatus {
    Active,
    Notice,
    Inactive,
    /// A status string this client does not know.
    Other,
    /// No status on the wire. Never counted as occupying a unit.
    #[default]
    Unknown,
}

impl ResidentStatus {
    pub fn parse(raw: &str) -> Self {
        match raw {
            "active" => Self::Active,
            "notice" => Self::Notice,
            "inactive" => Self::Inactive,
            _ => Self::Other,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Resident {
    pub id: String,
    pub full_name: String,
    pub email: String,
    pub phone: String,
    pub unit: Option<String>,
    pub lease_end: Option<String>,
    pub status: ResidentStatus,
    pub rent_paid: bool,
    pub role: String,
    pub created_at: Option<DateTime<Utc>>,
}

/// When a payment was made, as far as the backend said.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase", tag = "kind", content = "at")]
pub enum PaymentTime {
    /// No timestamp was sent.
    #[default]
    Missing,
    /// A timestamp was sent but could not be read.
    Invalid,
    At(DateTime<Utc>),
}

impl PaymentTime {
    pub fn at(self) -> Option<DateTime<Utc>> {
        match self {
            Self::At(at) => Some(at),
            Self::Missing | Self::Invalid => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Payment {
    pub id: String,
    /// Parsed strictly: a string that is not wholly a number (`"12abc"`,
    /// `"n/a"`) is recorded as zero, as are missing and non-finite amounts.
    pub amount: f64,
    pub created_at: PaymentTime,
    pub customer_name: Option<String>,
    pub customer_email: Option<String>,
    pub description: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Property {
    pub id: String,
    pub address: String,
    pub unit: Option<String>,
    pub property_type: Option<String>,
    pub bedrooms: Option<u32>,
    pub bathrooms: Option<f64>,
    pub rent: f64,
    pub status: Option<String>,
}

// Request payloads

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct NewUser {
    pub email: String,
    pub full_name: String,
    pub phone: String,
    pub role: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub unit: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub monthly_rent: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub security_deposit: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub lease_start: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub lease_end: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct NewProperty {
    pub address: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub unit: Option<String>,
    pub property_type: String,
    pub bedrooms: u32,
    pub bathrooms: f64,
    pub rent: f64,
    pub status: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct NewPayment {
    pub amount: f64,
    pub customer_name: String,
    pub customer_email: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub payment_method: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct NewIssue {
    pub title: String,
    pub description: String,
    pub category: String,
    pub priority: Priority,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub unit: Option<String>,
}

// Wire boundary. Backend payloads are loosely shaped, so every default is
// applied here and nowhere else.

/// First non-empty string among `keys`.
fn text<'a>(raw: &'a Value, keys: &[&str]) -> Option<&'a str> {
    keys.iter()
        .filter_map(|k| raw.get(k).and_then(Value::as_str))
        .find(|s| !s.is_empty())
}

fn text_or(raw: &Value, keys: &[&str], default: &str) -> String {
    text(raw, keys).unwrap_or(default).to_string()
}

fn owned_text(raw: &Value, keys: &[&str]) -> Option<String> {
    text(raw, keys).map(String::from)
}

/// Ids arrive as either strings or numbers.
fn id_of(raw: &Value) -> Option<String> {
    match raw.get("id")? {
        Value::String(s) if !s.is_empty() => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

fn number(value: &Value) -> Option<f64> {
    let parsed = match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse::<f64>().ok(),
        _ => None,
    };
    parsed.filter(|n| n.is_finite())
}

fn number_field(raw: &Value, key: &str) -> Option<f64> {
    raw.get(key).and_then(number)
}

/// Accepts RFC 3339, naive datetimes (taken as UTC), bare dates, and epoch
/// milliseconds.
pub fn parse_timestamp(value: &Value) -> Option<DateTime<Utc>> {
    match value {
        Value::String(s) => {
            let s = s.trim();
            if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
                return Some(dt.with_timezone(&Utc));
            }
            for fmt in ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f"] {
                if let Ok(naive) = NaiveDateTime::parse_from_str(s, fmt) {
                    return Some(Utc.from_utc_datetime(&naive));
                }
            }
            NaiveDate::parse_from_str(s, "%Y-%m-%d")
                .ok()
                .and_then(|d| d.and_hms_opt(0, 0, 0))
                .map(|naive| Utc.from_utc_datetime(&naive))
        }
        Value::Number(n) => n
            .as_i64()
            .and_then(|ms| Utc.timestamp_millis_opt(ms).single()),
        _ => None,
    }
}

/// First timestamp field that is present, skipping nulls and empty strings.
fn timestamp_value<'a>(raw: &'a Value, keys: &[&str]) -> Option<&'a Value> {
    keys.iter()
        .filter_map(|k| raw.get(k))
        .find(|v| !v.is_null() && v.as_str() != Some(""))
}

fn timestamp(raw: &Value, keys: &[&str]) -> Option<DateTime<Utc>> {
    let value = timestamp_value(raw, keys)?;
    let parsed = parse_timestamp(value);
    if parsed.is_none() {
        log::warn!("Ignoring unreadable timestamp: {value}");
    }
    parsed
}

fn payment_time(raw: &Value) -> PaymentTime {
    let Some(value) = timestamp_value(raw, &["created_at", "createdAt"]) else {
        return PaymentTime::Missing;
    };
    match parse_timestamp(value) {
        Some(at) => PaymentTime::At(at),
        None => {
            log::warn!("Unreadable payment timestamp: {value}");
            PaymentTime::Invalid
        }
    }
}

pub fn issue_from_wire(raw: &Value) -> Option<Issue> {
    let Some(id) = id_of(raw) else {
        log::warn!("Dropping issue without an id");
        return None;
    };
    Some(Issue {
        title: text_or(raw, &["title"], "Untitled Issue"),
        priority: text(raw, &["priority"])
            .and_then(Priority::parse)
            .unwrap_or_default(),
        reporter: text_or(raw, &["submitted_by", "submittedBy"], "Unknown"),
        created_at: timestamp(raw, &["created_at", "createdAt"]),
        unit: text_or(raw, &["unit"], "N/A"),
        description: text_or(raw, &["description"], "No description"),
        category: text_or(raw, &["category"], "other"),
        status: text(raw, &["status"])
            .and_then(IssueStatus::parse)
            .unwrap_or_default(),
        id,
    })
}

pub fn resident_from_wire(raw: &Value) -> Resident {
    Resident {
        id: id_of(raw).unwrap_or_default(),
        full_name: text_or(raw, &["fullName", "full_name"], "Unknown Resident"),
        email: text_or(raw, &["email"], ""),
        phone: text_or(raw, &["phone"], ""),
        unit: owned_text(raw, &["unit"]),
        lease_end: owned_text(raw, &["leaseEnd", "lease_end"]),
        status: text(raw, &["status"])
            .map(ResidentStatus::parse)
            .unwrap_or_default(),
        // Only an explicit `false` marks rent as unpaid.
        rent_paid: raw.get("rentPaid").and_then(Value::as_bool) != Some(false),
        role: text_or(raw, &["role"], "resident"),
        created_at: timestamp(raw, &["createdAt", "created_at"]),
    }
}

pub fn payment_from_wire(raw: &Value) -> Payment {
    Payment {
        id: id_of(raw).unwrap_or_default(),
        amount: number_field(raw, "amount").unwrap_or(0.0),
        created_at: payment_time(raw),
        customer_name: owned_text(raw, &["customerName", "customer_name"]),
        customer_email: owned_text(raw, &["customerEmail", "customer_email"]),
        description: owned_text(raw, &["description"]),
    }
}

pub fn property_from_wire(raw: &Value) -> Property {
    Property {
        id: id_of(raw).unwrap_or_default(),
        address: text_or(raw, &["address"], ""),
        unit: owned_text(raw, &["unit"]),
        property_type: owned_text(raw, &["propertyType", "property_type"]),
        bedrooms: number_field(raw, "bedrooms")
            .filter(|n| *n >= 0.0)
            .map(|n| n as u32),
        bathrooms: number_field(raw, "bathrooms"),
        rent: number_field(raw, "rent").unwrap_or(0.0),
        status: owned_text(raw, &["status"]),
    }
}

/// Map a wire collection, skipping entries that are not JSON objects.
pub fn collect_wire<T>(items: &[Value], parse: impl Fn(&Value) -> Option<T>) -> Vec<T> {
    items
        .iter()
        .filter(|item| {
            let ok = item.is_object();
            if !ok {
                log::warn!("Skipping non-object entry in collection: {item}");
            }
            ok
        })
        .filter_map(parse)
        .collect()
}
