//! History records

use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};

/// The video a question was asked about
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VideoInfo {
    pub id: String,
    pub title: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub caption: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub thumbnail: Option<String>,
}

impl VideoInfo {
    pub fn new(id: impl Into<String>, title: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            title: title.into(),
            caption: None,
            thumbnail: None,
        }
    }

    pub fn with_caption(mut self, caption: impl Into<String>) -> Self {
        self.caption = Some(caption.into());
        self
    }

    pub fn with_thumbnail(mut self, thumbnail: impl Into<String>) -> Self {
        self.thumbnail = Some(thumbnail.into());
        self
    }
}

/// One submitted question
///
/// `timestamp` (milliseconds since the Unix epoch) is the primary key and the
/// ordering key of the log. It is trusted as supplied by the caller.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HistoryItem {
    pub video_info: VideoInfo,
    pub question: String,
    pub timestamp: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub answer_url: Option<String>,
}

impl HistoryItem {
    pub fn new(video_info: VideoInfo, question: impl Into<String>, timestamp: i64) -> Self {
        Self {
            video_info,
            question: question.into(),
            timestamp,
            answer_url: None,
        }
    }

    /// Create an item stamped with the current wall-clock time
    pub fn now(video_info: VideoInfo, question: impl Into<String>) -> Self {
        Self::new(video_info, question, Utc::now().timestamp_millis())
    }

    pub fn is_answered(&self) -> bool {
        self.answer_url.is_some()
    }

    pub fn created_at(&self) -> Option<DateTime<Utc>> {
        Utc.timestamp_millis_opt(self.timestamp).single()
    }

    /// Merge a patch; fields absent from the patch are left alone
    pub fn apply(&mut self, patch: &HistoryPatch) {
        if let Some(question) = &patch.question {
            self.question = question.clone();
        }
        if let Some(answer_url) = &patch.answer_url {
            self.answer_url = Some(answer_url.clone());
        }
        if let Some(caption) = &patch.caption {
            self.video_info.caption = Some(caption.clone());
        }
        if let Some(thumbnail) = &patch.thumbnail {
            self.video_info.thumbnail = Some(thumbnail.clone());
        }
    }
}

/// Partial update merged into an existing item
///
/// The key (`timestamp`) and the video identity are not patchable.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct HistoryPatch {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub question: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub answer_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub caption: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub thumbnail: Option<String>,
}

impl HistoryPatch {
    /// The common case: attach a captured answer
    pub fn answer_url(url: impl Into<String>) -> Self {
        Self {
            answer_url: Some(url.into()),
            ..Default::default()
        }
    }

    pub fn is_empty(&self) -> bool {
        self.question.is_none()
            && self.answer_url.is_none()
            && self.caption.is_none()
            && self.thumbnail.is_none()
    }
}
