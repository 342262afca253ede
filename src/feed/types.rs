use chrono::{DateTime, FixedOffset, NaiveDate};
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;

use super::error::FeedError;
use crate::download::paths::is_reserved_char;

/// Opaque pagination token issued by the feed.
///
/// Only ever compared for equality and echoed back on the next request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Cursor(Value);

impl Cursor {
    pub(crate) fn from_value(value: Value) -> Option<Self> {
        if value.is_null() {
            None
        } else {
            Some(Self(value))
        }
    }

    pub fn as_value(&self) -> &Value {
        &self.0
    }
}

impl std::fmt::Display for Cursor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.0 {
            Value::String(s) => f.write_str(s),
            other => write!(f, "{}", other),
        }
    }
}

fn default_true() -> bool {
    true
}

/// One generated image belonging to a record.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct ImageRef {
    #[serde(default)]
    pub url: String,
    #[serde(default)]
    pub seed: i64,
    #[serde(default = "default_true")]
    pub available: bool,
}

#[derive(Debug, Clone, Deserialize)]
struct Step {
    #[serde(default)]
    images: Vec<ImageRef>,
}

/// The two payload layouts the feed has served over time.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
enum RecordShape {
    /// Older API: images listed directly on the record.
    Flat { images: Vec<ImageRef> },
    /// Current API: images grouped under workflow steps.
    Stepped { steps: Vec<Step> },
}

impl RecordShape {
    fn into_images(self) -> Vec<ImageRef> {
        match self {
            RecordShape::Flat { images } => images,
            RecordShape::Stepped { steps } => steps.into_iter().flat_map(|s| s.images).collect(),
        }
    }
}

/// Record ids arrive as strings on the current API and as integers on the old one.
fn id_string<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum IdRepr {
        Str(String),
        Int(i64),
    }
    Ok(match IdRepr::deserialize(deserializer)? {
        IdRepr::Str(s) => s,
        IdRepr::Int(n) => n.to_string(),
    })
}

/// Ids name files on disk verbatim, so two different ids must never map
/// to the same name.
fn is_file_safe_id(id: &str) -> bool {
    !id.is_empty()
        && id != "."
        && id != ".."
        && !id.chars().any(|c| c.is_control() || is_reserved_char(c))
}

#[derive(Deserialize)]
struct RecordHeader {
    #[serde(deserialize_with = "id_string")]
    id: String,
    #[serde(rename = "createdAt")]
    created_at: DateTime<FixedOffset>,
    #[serde(flatten)]
    shape: RecordShape,
}

/// A single generation from the feed, with its images normalized.
///
/// `raw` holds the payload exactly as received; it is what gets persisted.
#[derive(Debug, Clone)]
pub struct GenerationRecord {
    id: String,
    created_at: DateTime<FixedOffset>,
    images: Vec<ImageRef>,
    raw: Value,
}

impl GenerationRecord {
    pub fn from_value(raw: Value) -> Result<Self, FeedError> {
        let header = RecordHeader::deserialize(&raw).map_err(|e| {
            FeedError::MalformedResponse(format!(
                "generation {}: {}",
                raw.get("id").map(|v| v.to_string()).unwrap_or_default(),
                e
            ))
        })?;
        if !is_file_safe_id(&header.id) {
            return Err(FeedError::MalformedResponse(format!(
                "generation id {:?} is not usable as a file name",
                header.id
            )));
        }
        Ok(Self {
            id: header.id,
            created_at: header.created_at,
            images: header.shape.into_images(),
            raw,
        })
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn created_at(&self) -> &DateTime<FixedOffset> {
        &self.created_at
    }

    /// Calendar date the record is filed under, as written by the remote.
    pub fn date(&self) -> NaiveDate {
        self.created_at.date_naive()
    }

    pub fn images(&self) -> &[ImageRef] {
        &self.images
    }

    pub fn raw(&self) -> &Value {
        &self.raw
    }
}

impl std::fmt::Display for GenerationRecord {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "<Generation: id={} date={}>", self.id, self.date())
    }
}

/// A decoded page of the feed.
#[derive(Debug, Clone)]
pub struct Page {
    pub items: Vec<GenerationRecord>,
    pub next_cursor: Option<Cursor>,
}

// ---------------------------------------------------------------------------
// Response envelope
// ---------------------------------------------------------------------------

#[derive(Deserialize)]
struct Envelope {
    result: Option<ResultBody>,
    error: Option<ErrorBody>,
}

#[derive(Deserialize)]
struct ResultBody {
    data: Option<DataBody>,
}

#[derive(Deserialize)]
struct DataBody {
    json: Option<PageBody>,
}

#[derive(Deserialize)]
struct PageBody {
    items: Option<Vec<Value>>,
    #[serde(rename = "nextCursor", default)]
    next_cursor: Value,
}

#[derive(Deserialize)]
struct ErrorBody {
    json: ErrorJson,
}

#[derive(Deserialize)]
struct ErrorJson {
    #[serde(default)]
    message: String,
    #[serde(default)]
    data: ErrorData,
}

#[derive(Deserialize, Default)]
struct ErrorData {
    #[serde(default)]
    code: String,
    #[serde(rename = "httpStatus", default)]
    http_status: u16,
    #[serde(default)]
    path: String,
}

const UNAUTHORIZED_CODE: &str = "UNAUTHORIZED";

fn classify_error(error: ErrorJson) -> FeedError {
    let ErrorJson { message, data } = error;
    if data.code == UNAUTHORIZED_CODE || data.http_status == 401 {
        FeedError::Unauthorized { message }
    } else if data.http_status >= 500 {
        FeedError::TransientServer {
            http_status: data.http_status,
            path: data.path,
            message,
        }
    } else {
        FeedError::Api {
            code: data.code,
            http_status: data.http_status,
            message,
        }
    }
}

/// The error the feed would have sent for a body we could not read as JSON.
pub(crate) fn server_error(path: &str) -> FeedError {
    FeedError::TransientServer {
        http_status: 500,
        path: path.to_string(),
        message: "Server Error. Please try again.".to_string(),
    }
}

/// Decode a feed response body into a page or a classified error.
pub fn parse_page(body: Value) -> Result<Page, FeedError> {
    let envelope: Envelope = serde_json::from_value(body)
        .map_err(|e| FeedError::MalformedResponse(format!("unexpected envelope: {}", e)))?;

    if let Some(error) = envelope.error {
        return Err(classify_error(error.json));
    }

    let page = envelope
        .result
        .and_then(|r| r.data)
        .and_then(|d| d.json)
        .ok_or_else(|| FeedError::MalformedResponse("missing result.data.json".to_string()))?;

    let items = page
        .items
        .ok_or_else(|| FeedError::MalformedResponse("missing items array".to_string()))?
        .into_iter()
        .map(GenerationRecord::from_value)
        .collect::<Result<Vec<_>, _>>()?;

    Ok(Page {
        items,
        next_cursor: Cursor::from_value(page.next_cursor),
    })
}
