use serde::{Deserialize, Deserializer};
use serde_json::Value;

/// The two keys every record must carry to be bucketed in the run statistics.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct RecordIdentity {
    #[serde(rename = "DATA_SOURCE", default, deserialize_with = "string_or_empty")]
    pub data_source: String,
    #[serde(rename = "RECORD_ID", default, deserialize_with = "string_or_empty")]
    pub record_id: String,
}

impl RecordIdentity {
    /// Whatever identity `line` carries, with missing or non-string keys left empty.
    /// Used to name lines that failed validation.
    pub fn lenient(line: &str) -> Self {
        match serde_json::from_str::<Value>(line) {
            Ok(value @ Value::Object(_)) => serde_json::from_value(value).unwrap_or_default(),
            _ => Self::default(),
        }
    }
}

fn string_or_empty<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    match Value::deserialize(deserializer)? {
        Value::String(s) => Ok(s),
        _ => Ok(String::new()),
    }
}

/// One line of input moving from a reader to a writer.
///
/// Records are built by the reader, handed over the record channel, and consumed
/// exactly once by the writer. Nothing mutates a record after construction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Record {
    body: String,
    sequence_number: u64,
    source_label: String,
    identity: RecordIdentity,
}

impl Record {
    pub fn new(
        body: impl Into<String>,
        sequence_number: u64,
        source_label: impl Into<String>,
        identity: RecordIdentity,
    ) -> Self {
        Self {
            body: body.into(),
            sequence_number,
            source_label: source_label.into(),
            identity,
        }
    }

    /// The raw, trimmed JSON line.
    pub fn body(&self) -> &str {
        &self.body
    }

    /// 1-based line number within the source the record was read from.
    pub fn sequence_number(&self) -> u64 {
        self.sequence_number
    }

    pub fn source_label(&self) -> &str {
        &self.source_label
    }

    /// Empty when validation was disabled for the run.
    pub fn identity(&self) -> &RecordIdentity {
        &self.identity
    }

    /// Unique message identifier used by queue producers, `<source>-<line>`.
    pub fn message_id(&self) -> String {
        format!("{}-{}", self.source_label, self.sequence_number)
    }
}
