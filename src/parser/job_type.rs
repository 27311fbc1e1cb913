use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum JobType {
    Internship,
    Contract,
    #[serde(rename = "Part-Time")]
    PartTime,
    #[serde(rename = "Full-Time")]
    FullTime,
}

impl JobType {
    pub const ALL: [JobType; 4] = [
        JobType::Internship,
        JobType::Contract,
        JobType::PartTime,
        JobType::FullTime,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            JobType::Internship => "Internship",
            JobType::Contract => "Contract",
            JobType::PartTime => "Part-Time",
            JobType::FullTime => "Full-Time",
        }
    }
}

impl fmt::Display for JobType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for JobType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        JobType::ALL
            .into_iter()
            .find(|t| t.as_str().eq_ignore_ascii_case(s))
            .ok_or_else(|| format!("unknown job type: {s}"))
    }
}

/// Infer the job type from tag texts and the title. First tier that matches wins;
/// nothing matching means Full-Time.
pub fn classify<S: AsRef<str>>(tags: &[S], title: &str) -> JobType {
    let tags: Vec<String> = tags.iter().map(|t| t.as_ref().trim().to_lowercase()).collect();
    let tagged = |names: &[&str]| tags.iter().any(|t| names.contains(&t.as_str()));

    // "intern" as a substring also covers "internship" and plurals.
    if tagged(&["intern", "internship"]) || title.to_lowercase().contains("intern") {
        return JobType::Internship;
    }
    if tagged(&["contract", "contractor"]) {
        return JobType::Contract;
    }
    if tagged(&["part-time", "part time"]) {
        return JobType::PartTime;
    }
    if tagged(&["permanent"]) {
        return JobType::FullTime;
    }
    JobType::FullTime
}
