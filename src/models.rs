use std::collections::BTreeMap;
use std::fmt;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Course delivery component, taken from the first letter of the `ltps` code.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ComponentType {
    Lecture,
    Tutorial,
    Practical,
    Skilling,
    Other,
}

impl ComponentType {
    pub fn from_ltps(code: &str) -> Self {
        match code.trim().chars().next().map(|c| c.to_ascii_uppercase()) {
            Some('L') => ComponentType::Lecture,
            Some('T') => ComponentType::Tutorial,
            Some('P') => ComponentType::Practical,
            Some('S') => ComponentType::Skilling,
            _ => ComponentType::Other,
        }
    }

    pub fn weight(self) -> i64 {
        match self {
            ComponentType::Lecture | ComponentType::Tutorial => 100,
            ComponentType::Practical => 50,
            ComponentType::Skilling => 25,
            ComponentType::Other => 1,
        }
    }

    pub fn letter(self) -> char {
        match self {
            ComponentType::Lecture => 'L',
            ComponentType::Tutorial => 'T',
            ComponentType::Practical => 'P',
            ComponentType::Skilling => 'S',
            ComponentType::Other => 'O',
        }
    }
}

impl fmt::Display for ComponentType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.letter())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AttendanceRecord {
    pub course_code: String,
    pub course_name: String,
    pub ltps: String,
    pub total_conducted: i64,
    pub total_attended: i64,
    #[serde(default)]
    pub tcbr: i64,
}

impl AttendanceRecord {
    pub fn component_type(&self) -> ComponentType {
        ComponentType::from_ltps(&self.ltps)
    }

    pub fn adjusted_attended(&self) -> i64 {
        self.total_attended.saturating_add(self.tcbr.max(0))
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct CourseAggregate {
    pub course_code: String,
    pub course_name: String,
    pub sections: Vec<AttendanceRecord>,
    pub overall_percentage: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Guidance {
    Sessions(u64),
    Unbounded,
}

impl fmt::Display for Guidance {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Guidance::Sessions(n) => write!(f, "{n}"),
            Guidance::Unbounded => write!(f, "∞"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TimetableEntry {
    pub day: String,
    pub slot: String,
    pub course_code: String,
    #[serde(default)]
    pub section: String,
    #[serde(default)]
    pub room: String,
}

pub type SubjectMappings = BTreeMap<String, String>;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SeatingEntry {
    pub course_code: String,
    pub exam_date: NaiveDate,
    pub session: String,
    pub room: String,
    pub seat: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExamSlot {
    pub session: String,
    pub start: String,
    pub end: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Handout {
    pub course_code: String,
    #[serde(default)]
    pub course_name: String,
    pub url: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Credentials {
    pub username: String,
    pub password: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Maddy {
    pub id: Uuid,
    pub name: String,
    pub username: String,
    pub password: String,
    #[serde(default)]
    pub timetable: Option<Vec<TimetableEntry>>,
}

impl Maddy {
    pub fn new(name: &str, username: &str, password: &str) -> Self {
        Maddy {
            id: Uuid::new_v4(),
            name: name.to_string(),
            username: username.to_string(),
            password: password.to_string(),
            timetable: None,
        }
    }

    pub fn credentials(&self) -> Credentials {
        Credentials {
            username: self.username.clone(),
            password: self.password.clone(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CaptchaSession {
    pub session_id: String,
}
