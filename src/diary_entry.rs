use chrono::{Local, NaiveDate};
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub const DATE_FORMAT: &str = "%Y-%m-%d";

/// How the day went, 1 being the best.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "u8", into = "u8")]
pub enum Mood {
    Great = 1,
    Good = 2,
    Neutral = 3,
    Low = 4,
    Awful = 5,
}

impl Mood {
    pub const ALL: [Mood; 5] = [Mood::Great, Mood::Good, Mood::Neutral, Mood::Low, Mood::Awful];

    pub const PROMPT: &'static str = "How are you feeling today?";

    pub fn emoji(self) -> &'static str {
        match self {
            Mood::Great => "😀",
            Mood::Good => "🙂",
            Mood::Neutral => "😐",
            Mood::Low => "🙁",
            Mood::Awful => "😞",
        }
    }

    pub fn code(self) -> u8 {
        self as u8
    }

    /// Moves one step along the scale, staying on the ends.
    pub fn step(current: Option<Mood>, forward: bool) -> Mood {
        let code = match (current, forward) {
            (None, _) => Mood::Neutral.code(),
            (Some(m), true) => (m.code() + 1).min(5),
            (Some(m), false) => m.code().saturating_sub(1).max(1),
        };
        Mood::try_from(code).unwrap_or(Mood::Neutral)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("mood must be between 1 and 5, got {0}")]
pub struct InvalidMood(pub u8);

impl TryFrom<u8> for Mood {
    type Error = InvalidMood;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            1 => Ok(Mood::Great),
            2 => Ok(Mood::Good),
            3 => Ok(Mood::Neutral),
            4 => Ok(Mood::Low),
            5 => Ok(Mood::Awful),
            other => Err(InvalidMood(other)),
        }
    }
}

impl From<Mood> for u8 {
    fn from(mood: Mood) -> Self {
        mood.code()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiaryEntry {
    pub title: String,
    pub content: String,
    pub mood: Option<Mood>,
    pub entry_date: NaiveDate,
}

impl DiaryEntry {
    pub fn empty(entry_date: NaiveDate) -> Self {
        DiaryEntry {
            title: String::new(),
            content: String::new(),
            mood: None,
            entry_date,
        }
    }
}

/// Field-level replacement for the entry being edited.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EntryPatch {
    pub title: Option<String>,
    pub content: Option<String>,
    pub mood: Option<Option<Mood>>,
}

impl EntryPatch {
    pub fn title(title: impl Into<String>) -> Self {
        EntryPatch {
            title: Some(title.into()),
            ..Default::default()
        }
    }

    pub fn content(content: impl Into<String>) -> Self {
        EntryPatch {
            content: Some(content.into()),
            ..Default::default()
        }
    }

    pub fn mood(mood: Option<Mood>) -> Self {
        EntryPatch {
            mood: Some(mood),
            ..Default::default()
        }
    }

    pub fn apply(self, entry: &mut DiaryEntry) {
        if let Some(title) = self.title {
            entry.title = title;
        }
        if let Some(content) = self.content {
            entry.content = content;
        }
        if let Some(mood) = self.mood {
            entry.mood = mood;
        }
    }
}

pub fn today() -> NaiveDate {
    Local::now().date_naive()
}

pub fn parse_entry_date(input: &str) -> Option<NaiveDate> {
    NaiveDate::parse_from_str(input.trim(), DATE_FORMAT).ok()
}
