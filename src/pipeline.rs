use std::io::{BufRead, Write};

use anyhow::{Context, Result};
use chrono::{Local, NaiveDateTime};
use indicatif::{ProgressBar, ProgressStyle};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::Settings;
use crate::db::{InsertOutcome, JobStore};
use crate::parser::cards::RawCard;
use crate::parser::{build_listing, SkipReason};
use crate::render::{self, PageRenderer};

const PROMPT: &str = "Enter a page number to scrape (or type 'exit' to quit): ";

/// What happened to one card.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CardOutcome {
    Inserted,
    Duplicate,
    Skipped(SkipReason),
    Failed,
}

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct PageStats {
    pub page: u32,
    pub cards: usize,
    pub inserted: usize,
    pub duplicates: usize,
    pub skipped: usize,
    pub failed: usize,
}

impl PageStats {
    fn record(&mut self, outcome: &CardOutcome) {
        self.cards += 1;
        match outcome {
            CardOutcome::Inserted => self.inserted += 1,
            CardOutcome::Duplicate => self.duplicates += 1,
            CardOutcome::Skipped(_) => self.skipped += 1,
            CardOutcome::Failed => self.failed += 1,
        }
    }
}

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct SessionStats {
    pub pages_ok: usize,
    pub pages_failed: usize,
    pub cards: usize,
    pub inserted: usize,
    pub duplicates: usize,
    pub skipped: usize,
    pub failed: usize,
}

impl SessionStats {
    fn add(&mut self, page: &PageStats) {
        self.pages_ok += 1;
        self.cards += page.cards;
        self.inserted += page.inserted;
        self.duplicates += page.duplicates;
        self.skipped += page.skipped;
        self.failed += page.failed;
    }

    pub fn print(&self) {
        println!(
            "Pages: {} ok, {} failed. Cards: {} ({} inserted, {} duplicates, {} skipped, {} failed).",
            self.pages_ok,
            self.pages_failed,
            self.cards,
            self.inserted,
            self.duplicates,
            self.skipped,
            self.failed,
        );
    }
}

// ── Operator input ──

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Page(u32),
    Exit,
    Invalid(String),
}

pub fn parse_command(line: &str) -> Command {
    let line = line.trim();
    if line.eq_ignore_ascii_case("exit") || line.eq_ignore_ascii_case("quit") {
        return Command::Exit;
    }
    if line.is_empty() || !line.chars().all(|c| c.is_ascii_digit()) {
        return Command::Invalid("Invalid input. Please enter a number or 'exit'.".to_string());
    }
    match line.parse::<u32>() {
        Ok(0) => Command::Invalid("Please enter a valid page number (1 or higher).".to_string()),
        Ok(n) => Command::Page(n),
        Err(_) => Command::Invalid(format!("Page number {} is out of range.", line)),
    }
}

// ── Session ──

/// Renderer and store acquired for one scrape session, released by `shutdown`.
pub struct Session {
    settings: Settings,
    renderer: Box<dyn PageRenderer>,
    store: JobStore,
    clock: fn() -> NaiveDateTime,
    stats: SessionStats,
    cancel: CancellationToken,
}

fn local_now() -> NaiveDateTime {
    Local::now().naive_local()
}

impl Session {
    pub fn new(settings: Settings, renderer: Box<dyn PageRenderer>, store: JobStore) -> Self {
        Self {
            settings,
            renderer,
            store,
            clock: local_now,
            stats: SessionStats::default(),
            cancel: CancellationToken::new(),
        }
    }

    /// Open the store, then acquire the renderer. If the renderer cannot be
    /// acquired the store is closed before the error is returned.
    pub async fn start(settings: Settings) -> Result<Self> {
        let store = JobStore::open(&settings.db_path)
            .with_context(|| format!("Failed to open store at {:?}", settings.db_path))?;
        store.init_schema()?;

        let renderer = match render::connect(&settings).await {
            Ok(r) => r,
            Err(e) => {
                if let Err(close_err) = store.close() {
                    warn!("Error closing store after failed start: {}", close_err);
                }
                return Err(e).context("Halting scraper: renderer unavailable");
            }
        };

        info!("Session started (store {:?}, renderer {:?})", settings.db_path, settings.renderer);
        Ok(Self::new(settings, renderer, store))
    }

    pub fn with_clock(mut self, clock: fn() -> NaiveDateTime) -> Self {
        self.clock = clock;
        self
    }

    pub fn stats(&self) -> &SessionStats {
        &self.stats
    }

    /// Cancelling this token stops the session before its next page or prompt.
    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Scrape one page. Render failures are logged and yield `None`;
    /// card failures never abort the page. An interrupt abandons the render.
    pub async fn scrape_page(&mut self, page: u32) -> Option<PageStats> {
        if self.cancel.is_cancelled() {
            return None;
        }
        let url = self.settings.page_url(page);
        info!("Scraping page {}: {}", page, url);

        let rendered = tokio::select! {
            biased;
            _ = self.cancel.cancelled() => None,
            result = render::render_when_ready(
                self.renderer.as_ref(),
                &url,
                self.settings.ready_timeout(),
                self.settings.poll_interval(),
            ) => Some(result),
        };

        let found = match rendered {
            Some(Ok(found)) => found,
            Some(Err(e)) => {
                warn!("Error scraping page {}: {}", page, e);
                self.stats.pages_failed += 1;
                return None;
            }
            None => {
                info!("Page {} abandoned: interrupted", page);
                return None;
            }
        };

        info!("Found {} job cards on page {}", found.len(), page);

        let now = (self.clock)();
        let mut stats = PageStats {
            page,
            ..Default::default()
        };
        for card in found {
            let outcome = self.process_card(page, card, now);
            stats.record(&outcome);
        }

        info!(
            "Page {} done: {} inserted, {} duplicates, {} skipped, {} failed",
            page, stats.inserted, stats.duplicates, stats.skipped, stats.failed
        );
        self.stats.add(&stats);
        Some(stats)
    }

    fn process_card(&self, page: u32, card: RawCard, now: NaiveDateTime) -> CardOutcome {
        let label = card.title.clone().unwrap_or_else(|| "<untitled>".to_string());

        let listing = match build_listing(card, now) {
            Ok(listing) => listing,
            Err(reason) => {
                warn!("Skipping card on page {} ('{}'): {}", page, label, reason);
                return CardOutcome::Skipped(reason);
            }
        };

        match self.store.insert(&listing) {
            Ok(InsertOutcome::Inserted) => {
                info!("Inserted: {} at {}", listing.title, listing.company);
                CardOutcome::Inserted
            }
            Ok(InsertOutcome::Duplicate) => {
                debug!("Duplicate, skipping: {} at {}", listing.title, listing.company);
                CardOutcome::Duplicate
            }
            Err(e) => {
                warn!("Error inserting '{}': {}", listing.title, e);
                CardOutcome::Failed
            }
        }
    }

    /// Scrape `first..=last` in order; failed pages are skipped.
    pub async fn run_range(&mut self, first: u32, last: u32) -> Result<()> {
        if first > last {
            return Ok(());
        }

        let pb = ProgressBar::new(u64::from(last - first) + 1);
        pb.set_style(
            ProgressStyle::default_bar()
                .template("[{elapsed_precise}] {bar:40} page {pos}/{len}")?
                .progress_chars("=> "),
        );

        for page in first..=last {
            if self.cancel.is_cancelled() {
                info!("Interrupted, skipping pages {}-{}", page, last);
                break;
            }
            self.scrape_page(page).await;
            pb.inc(1);
        }

        pb.finish_and_clear();
        Ok(())
    }

    /// Operator loop: page numbers are scraped on demand until `exit`,
    /// end of input or an interrupt. Anything else is rejected and the loop continues.
    pub async fn interactive(&mut self, mut input: mpsc::Receiver<String>) -> Result<()> {
        loop {
            if self.cancel.is_cancelled() {
                break;
            }
            print!("\n{}", PROMPT);
            std::io::stdout().flush()?;

            let line = tokio::select! {
                biased;
                _ = self.cancel.cancelled() => None,
                line = input.recv() => line,
            };
            let Some(line) = line else {
                break;
            };

            match parse_command(&line) {
                Command::Exit => break,
                Command::Page(page) => {
                    self.scrape_page(page).await;
                }
                Command::Invalid(message) => println!("{}", message),
            }
        }
        Ok(())
    }

    /// Release the renderer, then the store.
    pub async fn shutdown(mut self) -> Result<SessionStats> {
        self.renderer.close().await;
        drop(self.renderer);
        self.store.close().context("Failed to close store")?;
        info!("Scraping session complete");
        Ok(self.stats)
    }

    #[cfg(test)]
    pub fn store(&self) -> &JobStore {
        &self.store
    }
}

pub struct RunOptions {
    pub first_page: u32,
    pub last_page: u32,
    pub interactive: bool,
}

/// Full session: fixed range, then the operator loop. Handles are released on
/// every exit path once the session has started, Ctrl-C included.
pub async fn run(settings: Settings, opts: RunOptions) -> Result<SessionStats> {
    let mut session = Session::start(settings).await?;
    let interrupt = cancel_on_ctrl_c(session.cancel_token());
    let input = opts.interactive.then(operator_input);
    let result = drive(&mut session, &opts, input).await;
    interrupt.abort();
    let stats = session.shutdown().await?;
    result.map(|_| stats)
}

async fn drive(
    session: &mut Session,
    opts: &RunOptions,
    input: Option<mpsc::Receiver<String>>,
) -> Result<()> {
    info!("Scraping pages {}-{}", opts.first_page, opts.last_page);
    session.run_range(opts.first_page, opts.last_page).await?;
    if let Some(input) = input {
        session.interactive(input).await?;
    }
    Ok(())
}

/// Scrape a single page through the same deduped path.
pub async fn run_page(settings: Settings, page: u32) -> Result<SessionStats> {
    let mut session = Session::start(settings).await?;
    let interrupt = cancel_on_ctrl_c(session.cancel_token());
    session.scrape_page(page).await;
    interrupt.abort();
    session.shutdown().await
}

fn cancel_on_ctrl_c(token: CancellationToken) -> JoinHandle<()> {
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Interrupted by operator, finishing the session");
            token.cancel();
        }
    })
}

/// Operator lines, read on a plain thread: a blocked stdin read must never hold
/// up runtime shutdown. The channel closes at end of input.
fn operator_input() -> mpsc::Receiver<String> {
    let (tx, rx) = mpsc::channel(16);
    std::thread::spawn(move || {
        for line in std::io::stdin().lock().lines() {
            match line {
                Ok(line) => {
                    if tx.blocking_send(line).is_err() {
                        break;
                    }
                }
                Err(e) => {
                    warn!("Failed to read operator input: {}", e);
                    break;
                }
            }
        }
    });
    rx
}

#[cfg(test)]
mod tests {
    use chrono::NaiveDate;

    use super::*;
    use crate::render::testing::{EventLog, ScriptedRenderer};

    fn fixed_now() -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2024, 6, 1).unwrap().and_hms_opt(12, 0, 0).unwrap()
    }

    struct Card<'a> {
        title: &'a str,
        company: Option<&'a str>,
        posted: &'a str,
        tags: &'a [&'a str],
    }

    fn card(title: &str) -> Card<'_> {
        Card {
            title,
            company: Some("Acme Re"),
            posted: "Posted today",
            tags: &[],
        }
    }

    fn page_html(cards: &[Card]) -> String {
        let mut html = String::from("<html><body><main>");
        for c in cards {
            html.push_str("<div class=\"Job_job-card__YgDAV\">");
            html.push_str(&format!("<p class=\"Job_job-card__position__ic1rc\">{}</p>", c.title));
            if let Some(company) = c.company {
                html.push_str(&format!("<p class=\"Job_job-card__company__7T9qY\">{}</p>", company));
            }
            html.push_str("<a class=\"Job_job-card__location__bq7jX\">Remote</a>");
            html.push_str(&format!("<p class=\"Job_job-card__posted-on__NCZaJ\">{}</p>", c.posted));
            html.push_str("<div class=\"Job_job-card__tags__zfriA\">");
            for t in c.tags {
                html.push_str(&format!("<a class=\"Job_job-card__location__bq7jX\">{}</a>", t));
            }
            html.push_str("</div></div>");
        }
        html.push_str("</main></body></html>");
        html
    }

    fn session(renderer: &ScriptedRenderer) -> Session {
        Session::new(
            Settings::for_tests(),
            Box::new(renderer.clone()),
            JobStore::in_memory().unwrap(),
        )
        .with_clock(fixed_now)
    }

    fn logged_session(renderer: &ScriptedRenderer, log: &EventLog) -> Session {
        let store = JobStore::in_memory().unwrap().with_close_log(log.clone());
        Session::new(
            Settings::for_tests(),
            Box::new(renderer.clone().with_close_log(log.clone())),
            store,
        )
        .with_clock(fixed_now)
    }

    /// Operator input that ends after `lines`.
    fn operator(lines: &[&str]) -> mpsc::Receiver<String> {
        let (tx, rx) = mpsc::channel(lines.len().max(1));
        for line in lines {
            tx.try_send(line.to_string()).unwrap();
        }
        rx
    }

    fn url(page: u32) -> String {
        Settings::for_tests().page_url(page)
    }

    fn titles(session: &Session) -> Vec<String> {
        let mut stmt = session.store().conn().prepare("SELECT title FROM jobs ORDER BY title").unwrap();
        let titles = stmt
            .query_map([], |r| r.get(0))
            .unwrap()
            .collect::<std::result::Result<Vec<String>, _>>()
            .unwrap();
        titles
    }

    #[tokio::test]
    async fn incomplete_card_is_skipped_complete_card_persisted() {
        let mut no_company = card("Pricing Actuary");
        no_company.company = None;
        let html = page_html(&[no_company, card("Reserving Actuary")]);
        let r = ScriptedRenderer::new().with_page(&url(1), &html);
        let mut s = session(&r);

        let stats = s.scrape_page(1).await.unwrap();
        assert_eq!(stats.cards, 2);
        assert_eq!(stats.inserted, 1);
        assert_eq!(stats.skipped, 1);
        assert_eq!(titles(&s), vec!["Reserving Actuary"]);
    }

    #[tokio::test]
    async fn failed_page_does_not_stop_the_range() {
        let mut r = ScriptedRenderer::new();
        for page in 1..=5 {
            r = if page == 3 {
                r.with_failure(&url(page), "net::ERR_TIMED_OUT")
            } else {
                let title = format!("Actuary p{}", page);
                r.with_page(&url(page), &page_html(&[card(&title)]))
            };
        }
        let mut s = session(&r);

        s.run_range(1, 5).await.unwrap();
        assert_eq!(
            titles(&s),
            vec!["Actuary p1", "Actuary p2", "Actuary p4", "Actuary p5"]
        );
        assert_eq!(s.stats().pages_ok, 4);
        assert_eq!(s.stats().pages_failed, 1);
        assert_eq!(r.calls().len(), 5);
    }

    #[tokio::test]
    async fn rescraping_a_page_finds_duplicates() {
        let html = page_html(&[card("Life Actuary"), card("Health Actuary")]);
        let r = ScriptedRenderer::new().with_page(&url(1), &html);
        let mut s = session(&r);

        s.scrape_page(1).await.unwrap();
        let second = s.scrape_page(1).await.unwrap();
        assert_eq!(second.duplicates, 2);
        assert_eq!(second.inserted, 0);
        assert_eq!(titles(&s).len(), 2);
    }

    #[tokio::test]
    async fn unparseable_date_and_job_type_flow_through() {
        let mut bad_date = card("Pension Actuary");
        bad_date.posted = "a while back";
        let mut intern = card("Actuarial Intern");
        intern.tags = &["Contract"];
        let r = ScriptedRenderer::new().with_page(&url(1), &page_html(&[bad_date, intern]));
        let mut s = session(&r);

        let stats = s.scrape_page(1).await.unwrap();
        assert_eq!(stats.skipped, 1);
        assert_eq!(stats.inserted, 1);

        let (job_type, date): (String, String) = s
            .store()
            .conn()
            .query_row("SELECT job_type, posting_date FROM jobs", [], |r| Ok((r.get(0)?, r.get(1)?)))
            .unwrap();
        assert_eq!(job_type, "Internship");
        assert_eq!(date, "2024-06-01");
    }

    #[tokio::test]
    async fn store_failure_skips_card_and_continues() {
        let r = ScriptedRenderer::new()
            .with_page(&url(1), &page_html(&[card("bad"), card("good")]));
        let mut s = session(&r);
        s.store()
            .conn()
            .execute_batch(
                "CREATE TRIGGER reject_bad BEFORE INSERT ON jobs
                 WHEN NEW.title = 'bad' BEGIN SELECT RAISE(ABORT, 'rejected'); END;",
            )
            .unwrap();

        let stats = s.scrape_page(1).await.unwrap();
        assert_eq!(stats.failed, 1);
        assert_eq!(stats.inserted, 1);
        assert_eq!(titles(&s), vec!["good"]);
    }

    #[tokio::test]
    async fn empty_page_yields_no_cards() {
        let r = ScriptedRenderer::new();
        let mut s = session(&r);
        let stats = s.scrape_page(42).await.unwrap();
        assert_eq!(stats.cards, 0);
    }

    #[tokio::test]
    async fn interactive_loop_scrapes_until_exit() {
        let r = ScriptedRenderer::new()
            .with_page(&url(7), &page_html(&[card("Seven")]))
            .with_page(&url(9), &page_html(&[card("Nine")]));
        let mut s = session(&r);

        let input = operator(&["7", "abc", "0", "", "-2", "EXIT", "9"]);
        s.interactive(input).await.unwrap();

        assert_eq!(r.calls(), vec![url(7)]);
        assert_eq!(titles(&s), vec!["Seven"]);
    }

    #[tokio::test]
    async fn interactive_loop_ends_at_end_of_input() {
        let r = ScriptedRenderer::new();
        let mut s = session(&r);
        s.interactive(operator(&["2", "3"])).await.unwrap();
        assert_eq!(r.calls(), vec![url(2), url(3)]);
    }

    #[tokio::test]
    async fn drive_then_shutdown_releases_renderer_before_store() {
        let log = EventLog::default();
        let r = ScriptedRenderer::new().with_page(&url(1), &page_html(&[card("One")]));
        let mut s = logged_session(&r, &log);
        let opts = RunOptions {
            first_page: 1,
            last_page: 2,
            interactive: true,
        };

        drive(&mut s, &opts, Some(operator(&["exit"]))).await.unwrap();
        let stats = s.shutdown().await.unwrap();

        assert!(r.was_closed());
        assert_eq!(*log.lock().unwrap(), vec!["renderer closed", "store closed"]);
        assert_eq!(stats.inserted, 1);
        assert_eq!(stats.pages_ok, 2);
    }

    #[tokio::test]
    async fn interrupt_mid_range_stops_then_shuts_down() {
        let log = EventLog::default();
        let r = ScriptedRenderer::new()
            .with_page(&url(1), &page_html(&[card("One")]))
            .with_page(&url(2), &page_html(&[card("Two")]));
        let mut s = logged_session(&r, &log);
        r.cancel_on(&url(2), s.cancel_token());
        let opts = RunOptions {
            first_page: 1,
            last_page: 4,
            interactive: true,
        };

        drive(&mut s, &opts, Some(operator(&["4", "exit"]))).await.unwrap();

        // The page being rendered when the interrupt landed still completes;
        // nothing after it is rendered, including queued operator pages.
        assert_eq!(r.calls(), vec![url(1), url(2)]);
        assert_eq!(titles(&s), vec!["One", "Two"]);

        let stats = s.shutdown().await.unwrap();
        assert_eq!(stats.pages_ok, 2);
        assert_eq!(*log.lock().unwrap(), vec!["renderer closed", "store closed"]);
    }

    #[tokio::test]
    async fn interrupt_while_waiting_for_input_ends_loop() {
        let r = ScriptedRenderer::new();
        let mut s = session(&r);
        // Sender stays open: only the interrupt can end the wait.
        let (_tx, rx) = mpsc::channel::<String>(1);
        let token = s.cancel_token();
        tokio::spawn(async move {
            tokio::time::sleep(std::time::Duration::from_millis(20)).await;
            token.cancel();
        });

        s.interactive(rx).await.unwrap();
        s.shutdown().await.unwrap();

        assert!(r.calls().is_empty());
        assert!(r.was_closed());
    }

    #[tokio::test]
    async fn cancelled_session_renders_nothing() {
        let r = ScriptedRenderer::new().with_page(&url(1), &page_html(&[card("One")]));
        let mut s = session(&r);
        s.cancel_token().cancel();

        assert!(s.scrape_page(1).await.is_none());
        s.run_range(1, 3).await.unwrap();
        s.interactive(operator(&["5"])).await.unwrap();

        assert!(r.calls().is_empty());
        assert_eq!(s.stats().pages_failed, 0);
    }

    #[tokio::test]
    async fn start_fails_when_browser_is_unreachable() {
        let mut settings = Settings::for_tests();
        settings.renderer = crate::config::RendererKind::Browserless;
        settings.browserless_url = "http://127.0.0.1:9".to_string();

        let err = Session::start(settings).await.err().unwrap();
        assert!(format!("{:#}", err).contains("initialization failed"));
    }

    #[test]
    fn commands() {
        assert_eq!(parse_command(" 12 "), Command::Page(12));
        assert_eq!(parse_command("Exit"), Command::Exit);
        assert_eq!(parse_command("quit"), Command::Exit);
        assert!(matches!(parse_command("0"), Command::Invalid(_)));
        assert!(matches!(parse_command("two"), Command::Invalid(_)));
        assert!(matches!(parse_command("-1"), Command::Invalid(_)));
        assert!(matches!(parse_command(""), Command::Invalid(_)));
        assert!(matches!(parse_command("99999999999"), Command::Invalid(_)));
    }
}
