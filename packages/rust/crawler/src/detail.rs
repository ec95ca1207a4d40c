//! Detail-page enrichment: one fetch, one parse, one outcome.

use std::sync::LazyLock;

use chrono::NaiveDate;
use regex::Regex;
use scraper::{ElementRef, Html, Selector};
use tracing::{debug, instrument, warn};

use htc_shared::{
    Coordinates, Course, EnrichmentOutcome, EntityDetails, HtcError, Meal, Result,
    SelectorsConfig,
};

use crate::fetch::DocumentFetcher;

/// Weekday prefix preceding the hours on detail pages.
static WEEKDAY_PREFIX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"du lundi au (?:vendredi|jeudi) de ").expect("weekday prefix regex is valid")
});

// ---------------------------------------------------------------------------
// DetailExtractor
// ---------------------------------------------------------------------------

/// French month names, in calendar order.
const MONTHS: [&str; 12] = [
    "janvier",
    "février",
    "mars",
    "avril",
    "mai",
    "juin",
    "juillet",
    "août",
    "septembre",
    "octobre",
    "novembre",
    "décembre",
];

/// Compiled detail-page selectors, shared by every enrichment task of a run.
#[derive(Debug)]
pub struct DetailExtractor {
    block: Selector,
    latitude_attr: String,
    longitude_attr: String,
    hours: Selector,
    menus: MenuExtractor,
}

impl DetailExtractor {
    /// Compile the detail selectors from configuration.
    pub fn new(selectors: &SelectorsConfig) -> Result<Self> {
        Ok(Self {
            block: compile(&selectors.coordinates)?,
            latitude_attr: selectors.latitude_attr.clone(),
            longitude_attr: selectors.longitude_attr.clone(),
            hours: compile(&selectors.hours)?,
            menus: MenuExtractor::new(selectors)?,
        })
    }

    /// Extract the attribute payload of `url` from its HTML.
    ///
    /// Only the first attribute block is read. A missing block yields
    /// [`EnrichmentOutcome::Failed`]; a missing or malformed coordinate leaves
    /// that component at zero.
    pub fn extract(&self, url: &str, html: &str) -> EnrichmentOutcome {
        let doc = Html::parse_document(html);

        let Some(block) = doc.select(&self.block).next() else {
            debug!(url, "attribute block not found");
            return EnrichmentOutcome::failed(url, "attribute block not found");
        };

        let coordinates = Coordinates::new(
            parse_coordinate(block.value().attr(&self.latitude_attr)),
            parse_coordinate(block.value().attr(&self.longitude_attr)),
        );

        let opening_hours = doc
            .select(&self.hours)
            .next()
            .map(element_text)
            .and_then(|raw| parse_hours(&raw));

        let meals = self.menus.extract(url, &doc);

        EnrichmentOutcome::Enriched {
            url: url.to_string(),
            details: EntityDetails {
                coordinates,
                opening_hours,
                meals,
            },
        }
    }
}

// ---------------------------------------------------------------------------
// MenuExtractor
// ---------------------------------------------------------------------------

/// Reads the daily menus of a detail page.
///
/// Every menu block is read. A meal without a title is skipped, and so is a
/// course with neither a kind nor a dish.
#[derive(Debug)]
pub struct MenuExtractor {
    menu: Selector,
    date: Selector,
    meal: Selector,
    title: Selector,
    course: Selector,
    dish: Selector,
}

impl MenuExtractor {
    pub fn new(selectors: &SelectorsConfig) -> Result<Self> {
        Ok(Self {
            menu: compile(&selectors.menu)?,
            date: compile(&selectors.menu_date)?,
            meal: compile(&selectors.meal)?,
            title: compile(&selectors.meal_title)?,
            course: compile(&selectors.course)?,
            dish: compile(&selectors.dish)?,
        })
    }

    /// Every meal of every menu on the page, in document order.
    pub fn extract(&self, url: &str, doc: &Html) -> Vec<Meal> {
        let mut meals = Vec::new();

        for menu in doc.select(&self.menu) {
            let heading = menu.select(&self.date).next().map(element_text);
            let day = heading.as_deref().and_then(parse_menu_date);
            if day.is_none() {
                debug!(url, heading = ?heading, "menu date not recognized");
            }

            for meal in menu.select(&self.meal) {
                let Some(title) = meal
                    .select(&self.title)
                    .next()
                    .map(element_text)
                    .filter(|t| !t.is_empty())
                else {
                    continue;
                };

                let courses = meal
                    .select(&self.course)
                    .filter_map(|course| self.course(course))
                    .collect();

                meals.push(Meal {
                    restaurant_url: url.to_string(),
                    day,
                    title,
                    courses,
                });
            }
        }

        meals
    }

    fn course(&self, el: ElementRef<'_>) -> Option<Course> {
        // The kind is the group's own text, outside its nested dish list.
        let kind = el
            .children()
            .filter_map(|node| node.value().as_text())
            .map(|text| text.trim())
            .filter(|text| !text.is_empty())
            .collect::<Vec<_>>()
            .join(" ");

        let dishes: Vec<String> = el
            .select(&self.dish)
            .map(element_text)
            .filter(|d| !d.is_empty())
            .collect();

        if kind.is_empty() && dishes.is_empty() {
            return None;
        }
        Some(Course { kind, dishes })
    }
}

/// Compile a CSS selector, surfacing failures as [`HtcError::Parse`].
pub fn compile(selector: &str) -> Result<Selector> {
    Selector::parse(selector)
        .map_err(|e| HtcError::parse(format!("invalid selector '{selector}': {e}")))
}

/// Concatenated, whitespace-trimmed text content of an element.
pub fn element_text(el: ElementRef<'_>) -> String {
    el.text().collect::<String>().trim().to_string()
}

// ---------------------------------------------------------------------------
// Enrichment task
// ---------------------------------------------------------------------------

/// Fetch and parse one detail page.
///
/// Never fails: every error path is folded into a
/// [`EnrichmentOutcome::Failed`] carrying the original `url`.
#[instrument(skip(fetcher, extractor))]
pub async fn enrich(
    fetcher: &dyn DocumentFetcher,
    extractor: &DetailExtractor,
    url: &str,
) -> EnrichmentOutcome {
    match fetcher.fetch(url).await {
        Ok(body) => extractor.extract(url, &body),
        Err(e) => {
            warn!(error = %e, "detail fetch failed");
            EnrichmentOutcome::failed(url, e.to_string())
        }
    }
}

// ---------------------------------------------------------------------------
// Attribute parsing
// ---------------------------------------------------------------------------

/// Parse one coordinate attribute; absent, malformed or non-finite is zero.
fn parse_coordinate(raw: Option<&str>) -> f64 {
    raw.and_then(|v| v.trim().parse::<f64>().ok())
        .filter(|v| v.is_finite())
        .unwrap_or(0.0)
}

/// Normalize an opening-hours sentence into `"HH:MM - HH:MM"`.
///
/// `"Du lundi au vendredi de 11h30 à 14h."` becomes `"11:30 - 14:00"`.
/// Returns `None` unless exactly two valid times are found.
pub fn parse_hours(raw: &str) -> Option<String> {
    let lowered = raw.replace('\u{a0}', " ").to_lowercase();
    let tail = WEEKDAY_PREFIX.split(&lowered).last()?.replace('.', "");
    let tail = tail.trim();
    let tail = tail.strip_prefix("de ").unwrap_or(tail);

    let times = tail
        .split(" à ")
        .map(|part| normalize_time(part.trim()))
        .collect::<Option<Vec<_>>>()?;

    match times.as_slice() {
        [start, end] => Some(format!("{start} - {end}")),
        _ => None,
    }
}

/// Read the date out of a menu heading such as `"Menu du mardi 14 octobre 2025"`.
///
/// The day precedes the month name and the year follows it; `"1er"` is day 1.
pub fn parse_menu_date(raw: &str) -> Option<NaiveDate> {
    let lowered = raw.replace('\u{a0}', " ").to_lowercase();
    let words: Vec<&str> = lowered.split_whitespace().collect();

    let (index, month) = words.iter().enumerate().find_map(|(i, word)| {
        MONTHS
            .iter()
            .position(|m| m == word)
            .map(|m| (i, m as u32 + 1))
    })?;

    let day: &str = words.get(index.checked_sub(1)?)?;
    let day: u32 = day.strip_suffix("er").unwrap_or(day).parse().ok()?;
    let year: i32 = words.get(index + 1)?.parse().ok()?;

    NaiveDate::from_ymd_opt(year, month, day)
}

/// `"11h30"` → `"11:30"`, `"14h"` → `"14:00"`, `"9h5"` → `"09:05"`.
fn normalize_time(part: &str) -> Option<String> {
    let (hour, minute) = match part.split_once('h') {
        Some((h, m)) => (h.trim(), m.trim()),
        None => (part, ""),
    };
    let minute = if minute.is_empty() { "0" } else { minute };

    if hour.is_empty() || !hour.chars().all(|c| c.is_ascii_digit()) {
        return None;
    }
    if !minute.chars().all(|c| c.is_ascii_digit()) {
        return None;
    }

    let hour: u32 = hour.parse().ok()?;
    let minute: u32 = minute.parse().ok()?;
    if hour > 23 || minute > 59 {
        return None;
    }

    Some(format!("{hour:02}:{minute:02}"))
}
