use serde::{Deserialize, Serialize};

/// The only action the sheet fetch function accepts.
pub const FETCH_ACTION: &str = "fetch";

#[derive(Debug, thiserror::Error)]
pub enum SourceError {
    #[error("invalid action: {0}")]
    InvalidAction(String),
    #[error("sheet fetch failed: {0}")]
    Fetch(String),
    #[error("sheet response decode failed: {0}")]
    Decode(String),
}

/// One raw spreadsheet row. Keywords arrive as a single comma-joined cell.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SheetRow {
    pub question: String,
    pub answer: String,
    #[serde(default)]
    pub category: String,
    #[serde(default)]
    pub keywords: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct FetchResponse {
    pub faqs: Vec<SheetRow>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct FetchRequest {
    pub action: String,
}

/// Split a comma-joined keyword cell into trimmed, non-empty tags.
#[must_use]
pub fn parse_keywords(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|keyword| !keyword.is_empty())
        .map(ToString::to_string)
        .collect()
}

/// The remote FAQ source boundary the sync orchestrator depends on.
pub trait SheetSource {
    /// Fetch all source rows.
    ///
    /// # Errors
    /// Returns [`SourceError`] when the source is unreachable or its response
    /// cannot be decoded.
    fn fetch(&self) -> Result<Vec<SheetRow>, SourceError>;
}

/// Validate the requested action and return the sample rows. Backs both the
/// static source and the emulated fetch endpoint.
///
/// # Errors
/// Returns [`SourceError::InvalidAction`] for anything other than `fetch`.
pub fn rows_for_action(action: &str) -> Result<Vec<SheetRow>, SourceError> {
    if action != FETCH_ACTION {
        return Err(SourceError::InvalidAction(action.to_string()));
    }
    Ok(sample_rows())
}

/// Built-in sample rows, standing in for the real spreadsheet API.
#[must_use]
pub fn sample_rows() -> Vec<SheetRow> {
    vec![
        SheetRow {
            question: "勤怠管理システムの使い方を教えてください".to_string(),
            answer: "勤怠管理システムにログインし、出勤・退勤ボタンをクリックして打刻してください。休憩時間も同様に記録できます。".to_string(),
            category: "操作方法".to_string(),
            keywords: "勤怠,打刻,出勤,退勤".to_string(),
        },
        SheetRow {
            question: "有給休暇の申請方法は？".to_string(),
            answer: "人事システムから「休暇申請」を選択し、必要事項を入力して上司に申請してください。承認後に有給が消化されます。".to_string(),
            category: "契約".to_string(),
            keywords: "有給,休暇,申請,人事".to_string(),
        },
        SheetRow {
            question: "経費精算の締切はいつですか？".to_string(),
            answer: "毎月25日までに経費精算システムへ入力し、承認を完了させてください。遅れると翌月の精算となります。".to_string(),
            category: "料金".to_string(),
            keywords: "経費,精算,締切,申請".to_string(),
        },
    ]
}

/// Source returning the built-in sample rows.
#[derive(Debug, Clone, Copy, Default)]
pub struct StaticSheetSource;

impl SheetSource for StaticSheetSource {
    fn fetch(&self) -> Result<Vec<SheetRow>, SourceError> {
        rows_for_action(FETCH_ACTION)
    }
}

/// Source calling a remote fetch function over HTTP with `{"action": "fetch"}`.
#[derive(Debug, Clone)]
pub struct HttpSheetSource {
    endpoint: String,
}

impl HttpSheetSource {
    #[must_use]
    pub fn new(endpoint: impl Into<String>) -> Self {
        Self { endpoint: endpoint.into() }
    }
}

impl SheetSource for HttpSheetSource {
    fn fetch(&self) -> Result<Vec<SheetRow>, SourceError> {
        let response = ureq::post(&self.endpoint)
            .send_json(serde_json::json!({ "action": FETCH_ACTION }))
            .map_err(|err| SourceError::Fetch(err.to_string()))?;

        let body: FetchResponse =
            response.into_json().map_err(|err| SourceError::Decode(err.to_string()))?;
        Ok(body.faqs)
    }
}
