//! Story metadata: the ordered part list and top-level fields.
//!
//! The content API describes a story as one JSON document listing its parts
//! in reading order; each part carries the URL of its text body. This module
//! fetches that document through any [`Fetcher`] and turns it into a
//! [`StoryInfo`] whose `parts` feed the assembler.

use crate::error::StoryError;
use crate::fetch::Fetcher;
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

/// Public API host.
pub const DEFAULT_API_BASE: &str = "https://www.wattpad.com";

/// Fields requested from the story endpoint.
const STORY_FIELDS: &str = "id,title,description,url,cover,isPaywalled,user(name,username,avatar),lastPublishedPart,parts(id,title,text_url),tags";

static RE_STORY_ID: Lazy<Regex> = Lazy::new(|| Regex::new(r"^(\d+)(?:-.*)?$").unwrap());

/// One sub-document of a story. Order in [`StoryInfo::parts`] is reading order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PartDescriptor {
    pub id: String,
    pub title: String,
    /// URL of the part's HTML body.
    pub source_ref: String,
}

impl PartDescriptor {
    pub fn new(id: impl Into<String>, title: impl Into<String>, source_ref: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            title: title.into(),
            source_ref: source_ref.into(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoryUser {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub avatar: Option<String>,
}

/// Top-level story metadata.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "ApiStory")]
pub struct StoryInfo {
    pub id: String,
    pub title: String,
    pub description: Option<String>,
    pub url: Option<String>,
    pub cover: Option<String>,
    pub is_paywalled: bool,
    pub user: Option<StoryUser>,
    pub tags: Vec<String>,
    pub parts: Vec<PartDescriptor>,
}

impl StoryInfo {
    /// Parse the story endpoint's JSON.
    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }

    /// Display name of the author, falling back to the username.
    pub fn author(&self) -> Option<&str> {
        self.user
            .as_ref()
            .and_then(|u| u.name.as_deref().or(u.username.as_deref()))
    }
}

// ── Wire format ──────────────────────────────────────────────────────────

/// Ids arrive as strings on the story and as numbers on parts.
#[derive(Deserialize)]
#[serde(untagged)]
enum ApiId {
    Str(String),
    Num(u64),
}

impl From<ApiId> for String {
    fn from(id: ApiId) -> Self {
        match id {
            ApiId::Str(s) => s,
            ApiId::Num(n) => n.to_string(),
        }
    }
}

#[derive(Deserialize)]
struct ApiTextUrl {
    text: String,
}

#[derive(Deserialize)]
struct ApiPart {
    id: ApiId,
    #[serde(default)]
    title: String,
    text_url: ApiTextUrl,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct ApiStory {
    id: ApiId,
    title: String,
    #[serde(default)]
    description: Option<String>,
    #[serde(default)]
    url: Option<String>,
    #[serde(default)]
    cover: Option<String>,
    #[serde(default)]
    is_paywalled: bool,
    #[serde(default)]
    user: Option<StoryUser>,
    #[serde(default)]
    tags: Vec<String>,
    #[serde(default)]
    parts: Vec<ApiPart>,
}

impl TryFrom<ApiStory> for StoryInfo {
    type Error = String;

    fn try_from(api: ApiStory) -> Result<Self, Self::Error> {
        if api.title.trim().is_empty() {
            return Err("story has no title".to_string());
        }
        Ok(Self {
            id: api.id.into(),
            title: api.title,
            description: api.description,
            url: api.url,
            cover: api.cover.filter(|c| !c.is_empty()),
            is_paywalled: api.is_paywalled,
            user: api.user,
            tags: api.tags,
            parts: api
                .parts
                .into_iter()
                .map(|p| PartDescriptor {
                    id: p.id.into(),
                    title: p.title,
                    source_ref: p.text_url.text,
                })
                .collect(),
        })
    }
}

// ── Client ───────────────────────────────────────────────────────────────

/// Looks up story metadata on the content API.
#[derive(Debug, Clone)]
pub struct StoryClient {
    api_base: String,
}

impl Default for StoryClient {
    fn default() -> Self {
        Self::new(DEFAULT_API_BASE)
    }
}

impl StoryClient {
    pub fn new(api_base: impl Into<String>) -> Self {
        Self {
            api_base: api_base.into().trim_end_matches('/').to_string(),
        }
    }

    /// Metadata URL for `story_id`.
    pub fn story_url(&self, story_id: &str) -> String {
        format!(
            "{}/api/v3/stories/{}?fields={}",
            self.api_base, story_id, STORY_FIELDS
        )
    }

    /// Fetch and parse the metadata for `story_id`.
    ///
    /// # Errors
    /// [`StoryError::StoryNotFound`] when the request fails or the body is not
    /// a story document.
    pub async fn fetch_story(&self, fetcher: &dyn Fetcher, story_id: &str) -> Result<StoryInfo, StoryError> {
        let url = self.story_url(story_id);
        debug!("Fetching story metadata: {}", url);

        let body = fetcher
            .fetch_text(&url)
            .await
            .map_err(|e| StoryError::StoryNotFound {
                story_id: story_id.to_string(),
                reason: e.to_string(),
            })?;

        let story = StoryInfo::from_json(&body).map_err(|e| StoryError::StoryNotFound {
            story_id: story_id.to_string(),
            reason: format!("unexpected metadata: {e}"),
        })?;

        info!("Story '{}' has {} parts", story.title, story.parts.len());
        Ok(story)
    }
}

/// Extract the numeric story id from user input.
///
/// Accepts `292169908`, `292169908-some-title`, or a story URL ending in
/// either form.
pub fn parse_story_id(input: &str) -> Result<String, StoryError> {
    let trimmed = input.trim();
    let candidate = if trimmed.contains("://") {
        trimmed
            .split(['?', '#'])
            .next()
            .unwrap_or(trimmed)
            .split('/')
            .rev()
            .find(|segment| !segment.is_empty())
            .unwrap_or("")
    } else {
        trimmed
    };

    RE_STORY_ID
        .captures(candidate)
        .map(|caps| caps[1].to_string())
        .ok_or_else(|| StoryError::InvalidStoryId {
            input: input.to_string(),
        })
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"{
        "id": "292169908",
        "title": "The Long Way Home",
        "description": "A story.",
        "url": "https://www.wattpad.com/story/292169908-the-long-way-home",
        "cover": "https://img.example/cover/292169908.jpg",
        "isPaywalled": false,
        "user": {"name": "Jo", "username": "jo_writes", "avatar": "https://img.example/a.jpg"},
        "lastPublishedPart": {"createDate": "2021-11-01T00:00:00Z"},
        "parts": [
            {"id": 1001, "title": "Prologue", "text_url": {"text": "https://api.example/text?id=1001", "refresh_token": "x"}},
            {"id": 1002, "title": "Chapter 1", "text_url": {"text": "https://api.example/text?id=1002"}}
        ],
        "tags": ["adventure", "travel"]
    }"#;

    #[test]
    fn parses_story_document() {
        let story = StoryInfo::from_json(SAMPLE).unwrap();
        assert_eq!(story.id, "292169908");
        assert_eq!(story.title, "The Long Way Home");
        assert_eq!(story.cover.as_deref(), Some("https://img.example/cover/292169908.jpg"));
        assert_eq!(story.author(), Some("Jo"));
        assert_eq!(
            story.parts,
            vec![
                PartDescriptor::new("1001", "Prologue", "https://api.example/text?id=1001"),
                PartDescriptor::new("1002", "Chapter 1", "https://api.example/text?id=1002"),
            ]
        );
        assert_eq!(story.tags, vec!["adventure", "travel"]);
    }

    #[test]
    fn missing_optional_fields_default() {
        let story = StoryInfo::from_json(r#"{"id": 5, "title": "Bare", "cover": ""}"#).unwrap();
        assert_eq!(story.id, "5");
        assert!(story.parts.is_empty());
        assert!(story.cover.is_none());
        assert!(!story.is_paywalled);
        assert_eq!(story.author(), None);
    }

    #[test]
    fn error_document_is_rejected() {
        assert!(StoryInfo::from_json(r#"{"error_type": "NotFound", "message": "x"}"#).is_err());
        assert!(StoryInfo::from_json(r#"{"id": "1", "title": "  "}"#).is_err());
    }

    #[test]
    fn story_url_includes_fields() {
        let client = StoryClient::new("https://api.example/");
        let url = client.story_url("42");
        assert!(url.starts_with("https://api.example/api/v3/stories/42?fields=id,title"));
        assert!(url.contains("parts(id,title,text_url)"));
    }

    #[test]
    fn story_id_forms() {
        assert_eq!(parse_story_id("292169908").unwrap(), "292169908");
        assert_eq!(parse_story_id(" 292169908-the-long-way-home ").unwrap(), "292169908");
        assert_eq!(
            parse_story_id("https://www.wattpad.com/story/292169908-the-long-way-home?utm=x").unwrap(),
            "292169908"
        );
        assert_eq!(parse_story_id("https://www.wattpad.com/story/77/").unwrap(), "77");
    }

    #[test]
    fn bad_story_ids() {
        for input in ["", "abc", "-12", "https://www.wattpad.com/story/"] {
            assert!(
                matches!(parse_story_id(input), Err(StoryError::InvalidStoryId { .. })),
                "{input:?} should be rejected"
            );
        }
    }
}
