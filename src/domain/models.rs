use chrono::{NaiveTime, Weekday};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::str::FromStr;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Day {
    Sunday,
    Monday,
    Tuesday,
    Wednesday,
    Thursday,
    Friday,
    Saturday,
}

impl Day {
    pub const ALL: [Day; 7] = [
        Day::Sunday,
        Day::Monday,
        Day::Tuesday,
        Day::Wednesday,
        Day::Thursday,
        Day::Friday,
        Day::Saturday,
    ];

    pub fn weekday(self) -> Weekday {
        match self {
            Day::Sunday => Weekday::Sun,
            Day::Monday => Weekday::Mon,
            Day::Tuesday => Weekday::Tue,
            Day::Wednesday => Weekday::Wed,
            Day::Thursday => Weekday::Thu,
            Day::Friday => Weekday::Fri,
            Day::Saturday => Weekday::Sat,
        }
    }

    pub fn from_weekday(weekday: Weekday) -> Self {
        match weekday {
            Weekday::Sun => Day::Sunday,
            Weekday::Mon => Day::Monday,
            Weekday::Tue => Day::Tuesday,
            Weekday::Wed => Day::Wednesday,
            Weekday::Thu => Day::Thursday,
            Weekday::Fri => Day::Friday,
            Weekday::Sat => Day::Saturday,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Day::Sunday => "Sunday",
            Day::Monday => "Monday",
            Day::Tuesday => "Tuesday",
            Day::Wednesday => "Wednesday",
            Day::Thursday => "Thursday",
            Day::Friday => "Friday",
            Day::Saturday => "Saturday",
        }
    }
}

impl fmt::Display for Day {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Accepts English names as well as the Spanish names used by exported
/// break lists (`Lunes`, `Miércoles`, ...), case-insensitively.
impl FromStr for Day {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let normalized = value.trim().to_lowercase();
        let day = match normalized.as_str() {
            "sunday" | "domingo" => Day::Sunday,
            "monday" | "lunes" => Day::Monday,
            "tuesday" | "martes" => Day::Tuesday,
            "wednesday" | "miércoles" | "miercoles" => Day::Wednesday,
            "thursday" | "jueves" => Day::Thursday,
            "friday" | "viernes" => Day::Friday,
            "saturday" | "sábado" | "sabado" => Day::Saturday,
            _ => return Err(format!("unknown day name '{value}'")),
        };
        Ok(day)
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(try_from = "u32", into = "u32")]
pub enum BreakDuration {
    Five,
    Ten,
    Fifteen,
}

impl BreakDuration {
    pub fn minutes(self) -> u32 {
        match self {
            BreakDuration::Five => 5,
            BreakDuration::Ten => 10,
            BreakDuration::Fifteen => 15,
        }
    }

    pub fn seconds(self) -> u32 {
        self.minutes() * 60
    }
}

impl TryFrom<u32> for BreakDuration {
    type Error = String;

    fn try_from(minutes: u32) -> Result<Self, Self::Error> {
        match minutes {
            5 => Ok(BreakDuration::Five),
            10 => Ok(BreakDuration::Ten),
            15 => Ok(BreakDuration::Fifteen),
            other => Err(format!("break duration must be 5, 10 or 15 minutes, got {other}")),
        }
    }
}

impl From<BreakDuration> for u32 {
    fn from(duration: BreakDuration) -> Self {
        duration.minutes()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Break {
    pub id: String,
    pub name: String,
    pub days: BTreeSet<Day>,
    /// Local time of day as `HH:MM`.
    pub time: String,
    pub duration: BreakDuration,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reminder: Option<String>,
    pub active: bool,
}

impl Break {
    pub fn validate(&self) -> Result<(), String> {
        validate_non_empty(&self.id, "break.id")?;
        validate_non_empty(&self.name, "break.name")?;
        validate_hhmm(&self.time, "break.time")?;
        Ok(())
    }

    pub fn time_of_day(&self) -> Option<NaiveTime> {
        parse_hhmm(&self.time)
    }

    pub fn notification_body(&self) -> String {
        match self
            .reminder
            .as_deref()
            .map(str::trim)
            .filter(|value| !value.is_empty())
        {
            Some(reminder) => reminder.to_string(),
            None => format!("Es momento de '{}'.", self.name),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Exercise {
    pub name: String,
    pub description: String,
    pub duration_seconds: u32,
    pub media_url: String,
}

impl Exercise {
    pub fn validate(&self) -> Result<(), String> {
        validate_non_empty(&self.name, "exercise.name")?;
        if self.duration_seconds == 0 {
            return Err(format!("exercise '{}' duration must be > 0", self.name));
        }
        let longest_break = BreakDuration::Fifteen.seconds();
        if self.duration_seconds > longest_break {
            return Err(format!(
                "exercise '{}' duration must be <= {longest_break} seconds",
                self.name
            ));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct Statistics {
    pub completed_breaks: u64,
    pub skipped_breaks: u64,
    pub total_active_seconds: u64,
    pub count_by_exercise: BTreeMap<String, u64>,
    pub media_by_exercise: BTreeMap<String, String>,
    pub seconds_by_exercise: BTreeMap<String, u64>,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct ExerciseSummary {
    pub name: String,
    pub count: u64,
    pub media_url: String,
    pub total_seconds: u64,
    pub percentage: f64,
}

impl Statistics {
    pub fn record_exercise(&mut self, exercise: &Exercise) {
        let seconds = u64::from(exercise.duration_seconds);
        *self
            .count_by_exercise
            .entry(exercise.name.clone())
            .or_insert(0) += 1;
        self.media_by_exercise
            .insert(exercise.name.clone(), exercise.media_url.clone());
        *self
            .seconds_by_exercise
            .entry(exercise.name.clone())
            .or_insert(0) += seconds;
        self.total_active_seconds += seconds;
    }

    pub fn record_completed_break(&mut self) {
        self.completed_breaks += 1;
    }

    pub fn record_skipped_break(&mut self) {
        self.skipped_breaks += 1;
    }

    /// Most frequent exercises first; `percentage` is relative to the leader.
    pub fn top_exercises(&self, limit: usize) -> Vec<ExerciseSummary> {
        let max_count = self.count_by_exercise.values().copied().max().unwrap_or(0);
        let mut summaries = self
            .count_by_exercise
            .iter()
            .map(|(name, count)| ExerciseSummary {
                name: name.clone(),
                count: *count,
                media_url: self.media_by_exercise.get(name).cloned().unwrap_or_default(),
                total_seconds: self.seconds_by_exercise.get(name).copied().unwrap_or(0),
                percentage: if max_count > 0 {
                    *count as f64 / max_count as f64 * 100.0
                } else {
                    0.0
                },
            })
            .collect::<Vec<_>>();
        summaries.sort_by(|left, right| right.count.cmp(&left.count));
        summaries.truncate(limit);
        summaries
    }
}

pub fn format_mm_ss(total_seconds: u64) -> String {
    format!("{:02}:{:02}", total_seconds / 60, total_seconds % 60)
}

fn validate_non_empty(value: &str, field_name: &str) -> Result<(), String> {
    if value.trim().is_empty() {
        return Err(format!("{field_name} must not be empty"));
    }
    Ok(())
}

fn validate_hhmm(value: &str, field_name: &str) -> Result<(), String> {
    let mut split = value.split(':');
    let Some(hour_str) = split.next() else {
        return Err(format!("{field_name} must be HH:MM"));
    };
    let Some(minute_str) = split.next() else {
        return Err(format!("{field_name} must be HH:MM"));
    };
    if split.next().is_some() {
        return Err(format!("{field_name} must be HH:MM"));
    }

    let hour = hour_str
        .parse::<u8>()
        .map_err(|_| format!("{field_name} must be HH:MM"))?;
    let minute = minute_str
        .parse::<u8>()
        .map_err(|_| format!("{field_name} must be HH:MM"))?;
    if hour > 23 || minute > 59 {
        return Err(format!("{field_name} must be HH:MM"));
    }
    Ok(())
}

pub(crate) fn parse_hhmm(value: &str) -> Option<NaiveTime> {
    NaiveTime::parse_from_str(value.trim(), "%H:%M").ok()
}
