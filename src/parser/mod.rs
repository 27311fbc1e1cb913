pub mod cards;
pub mod dates;
pub mod job_type;

use chrono::NaiveDateTime;

use crate::db::JobListing;
use cards::RawCard;

/// Why a card could not become a listing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SkipReason {
    MissingField(&'static str),
    UnparseableDate(String),
}

impl std::fmt::Display for SkipReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SkipReason::MissingField(field) => write!(f, "missing {}", field),
            SkipReason::UnparseableDate(raw) => write!(f, "unparseable posting date {:?}", raw),
        }
    }
}

/// Card → listing: date normalization, job-type inference, required-field check.
pub fn build_listing(card: RawCard, now: NaiveDateTime) -> Result<JobListing, SkipReason> {
    let title = card.title.ok_or(SkipReason::MissingField("title"))?;
    let company = card.company.ok_or(SkipReason::MissingField("company"))?;
    let location = card.location.ok_or(SkipReason::MissingField("location"))?;
    let raw_date = card
        .posting_date_text
        .ok_or(SkipReason::MissingField("posting date"))?;

    let posting_date =
        dates::normalize(&raw_date, now).map_err(|e| SkipReason::UnparseableDate(e.raw))?;

    let job_type = job_type::classify(&card.tags, &title);

    Ok(JobListing {
        title,
        company,
        location,
        posting_date,
        job_type,
        tags: card.tags,
    })
}
