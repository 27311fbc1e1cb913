use std::sync::LazyLock;

use scraper::{ElementRef, Html, Selector};

use crate::utils::squash_whitespace;

static CARD: LazyLock<Selector> = LazyLock::new(|| Selector::parse("div.Job_job-card__YgDAV").unwrap());
static TITLE: LazyLock<Selector> = LazyLock::new(|| Selector::parse("p.Job_job-card__position__ic1rc").unwrap());
static COMPANY: LazyLock<Selector> = LazyLock::new(|| Selector::parse("p.Job_job-card__company__7T9qY").unwrap());
static LOCATION: LazyLock<Selector> = LazyLock::new(|| Selector::parse("a.Job_job-card__location__bq7jX").unwrap());
static POSTED: LazyLock<Selector> = LazyLock::new(|| Selector::parse("p.Job_job-card__posted-on__NCZaJ").unwrap());
// Tag links reuse the location link class, scoped to the tags container.
static TAG_LINKS: LazyLock<Selector> = LazyLock::new(|| {
    Selector::parse("div.Job_job-card__tags__zfriA a.Job_job-card__location__bq7jX").unwrap()
});

/// One job card as found in the markup. Every field is optional.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RawCard {
    pub title: Option<String>,
    pub company: Option<String>,
    pub location: Option<String>,
    pub posting_date_text: Option<String>,
    pub tags: Vec<String>,
}

/// Pull every job card out of a rendered page. No containers means no cards.
pub fn extract(html: &str) -> Vec<RawCard> {
    Html::parse_document(html)
        .select(&CARD)
        .map(extract_card)
        .collect()
}

fn extract_card(card: ElementRef<'_>) -> RawCard {
    let tag_links: Vec<ElementRef<'_>> = card.select(&TAG_LINKS).collect();
    // The location is the first location-class link outside the tags container.
    let location = card
        .select(&LOCATION)
        .find(|el| !tag_links.iter().any(|tag| tag.id() == el.id()))
        .and_then(text_of);

    RawCard {
        title: first_text(card, &TITLE),
        company: first_text(card, &COMPANY),
        location,
        posting_date_text: first_text(card, &POSTED),
        tags: tag_links.into_iter().filter_map(text_of).collect(),
    }
}

fn first_text(card: ElementRef<'_>, sel: &Selector) -> Option<String> {
    card.select(sel).next().and_then(text_of)
}

fn text_of(el: ElementRef<'_>) -> Option<String> {
    let text = squash_whitespace(&el.text().collect::<Vec<_>>().join(" "));
    (!text.is_empty()).then_some(text)
}
