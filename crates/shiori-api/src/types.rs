use serde::{Deserialize, Serialize};

// ── Series ──────────────────────────────────────────────────────

/// `GET /series/{slug}/`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SeriesDetail {
    pub id: u64,
    #[serde(default)]
    pub title: String,
    pub slug: String,
    pub description: Option<String>,
    pub cover_url: Option<String>,
    pub status: Option<String>,
    /// Present on list responses and some detail responses.
    pub chapter_count: Option<u32>,
    /// Approved chapters, embedded by the detail endpoint.
    pub chapters: Option<Vec<ChapterSummary>>,
    pub updated_at: Option<String>,
}

impl SeriesDetail {
    /// Chapter count as reported by the series itself, if any.
    pub fn reported_chapter_count(&self) -> Option<u32> {
        self.chapter_count
            .or_else(|| self.chapters.as_ref().map(|c| c.len() as u32))
    }
}

// ── Chapters ────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChapterSummary {
    pub id: u64,
    pub title: Option<String>,
    /// Chapter numbers are decimals server-side ("10.5") and may arrive as strings.
    #[serde(deserialize_with = "de::f64_from_str_or_num")]
    pub number: f64,
    pub volume_number: Option<u32>,
    pub page_count: Option<u32>,
    pub published_at: Option<String>,
}

/// `GET /series/{slug}/chapters/` returns a bare array; paginated deployments wrap it.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
pub enum ChapterListResponse {
    Paged {
        results: Vec<ChapterSummary>,
        count: Option<u64>,
    },
    Plain(Vec<ChapterSummary>),
}

impl ChapterListResponse {
    pub fn into_chapters(self) -> Vec<ChapterSummary> {
        match self {
            Self::Paged { results, .. } => results,
            Self::Plain(chapters) => chapters,
        }
    }
}

/// Internal serde helpers
pub mod de {
    use serde::{Deserialize, Deserializer};

    /// Accept an f64 from either a number or a string like "10.50".
    pub fn f64_from_str_or_num<'de, D>(deserializer: D) -> Result<f64, D::Error>
    where
        D: Deserializer<'de>,
    {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum NumOrStr {
            Num(f64),
            Str(String),
        }

        match NumOrStr::deserialize(deserializer)? {
            NumOrStr::Num(n) => Ok(n),
            NumOrStr::Str(s) => s.trim().parse::<f64>().map_err(serde::de::Error::custom),
        }
    }
}
