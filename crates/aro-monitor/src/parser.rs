use std::collections::{HashMap, HashSet};
use std::sync::LazyLock;

use regex::Regex;
use scraper::{ElementRef, Html, Selector};
use sha2::{Digest, Sha256};

use crate::types::UnitListing;

#[derive(Debug, thiserror::Error)]
pub enum ParseError {
    #[error("No listing blocks found; the floorplans page layout may have changed")]
    UnrecognizedLayout,
    #[error("Missing required field: {0}")]
    MissingField(String),
}

/// Unit type used when a block carries no explicit type element.
pub const DEFAULT_UNIT_TYPE: &str = "ARO One-Bedroom";

/// Class tokens that mark an element as one advertised unit.
const BLOCK_CLASSES: &[&str] = &[
    "unit",
    "unit-card",
    "unit-listing",
    "floorplan",
    "floorplan-card",
    "floorplan-item",
    "listing",
    "apartment",
    "apartment-card",
];

const CONTAINER_SELECTOR: &str =
    "#floorplans, .floorplans, .units, .unit-list, .listings, [data-listings]";
const NAME_SELECTOR: &str = ".unit-name, .unit-number, .floorplan-name, .name, h2, h3, h4";
const TYPE_SELECTOR: &str = ".unit-type, .floorplan-type, .type, .beds";
const PRICE_SELECTOR: &str = ".price, .rent, .unit-price";
const STATUS_SELECTOR: &str = ".availability, .status, .unit-status, .available-date";

static RE_ARO: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\b(aro|affordable\s+rental)\b").expect("invalid regex: aro")
});
static RE_ONE_BEDROOM: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\b(1|one)[\s-]*(bed(room)?s?|br|bd)\b").expect("invalid regex: one bedroom")
});
static RE_PRICE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\$?\s*(\d{1,3}(?:,\d{3})+|\d+)(?:\.\d{1,2})?").expect("invalid regex: price")
});
static RE_DOLLAR_AMOUNT: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\$\s*(\d{1,3}(?:,\d{3})+|\d+)(?:\.\d{1,2})?").expect("invalid regex: dollar amount")
});
static RE_UNAVAILABLE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?i)\b(unavailable|not\s+available|no\s+availability|wait\s*list(ed)?|leased|sold\s+out|coming\s+soon)\b",
    )
    .expect("invalid regex: unavailable")
});
static RE_AVAILABLE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\b(available|now|immediate(ly)?)\b").expect("invalid regex: available")
});

/// Text nodes joined by a space so adjacent tags in minified markup stay
/// separate words.
fn elem_text(element: ElementRef) -> String {
    element.text().collect::<Vec<_>>().join(" ")
}

fn normalize_whitespace(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

fn first_text(block: ElementRef, selector: &Selector) -> Option<String> {
    block
        .select(selector)
        .map(|e| normalize_whitespace(&elem_text(e)))
        .find(|t| !t.is_empty())
}

fn attr(block: ElementRef, name: &str) -> Option<String> {
    block
        .value()
        .attr(name)
        .map(normalize_whitespace)
        .filter(|v| !v.is_empty())
}

/// Does this unit type (or block text) describe an ARO one-bedroom?
pub fn is_aro_one_bedroom(text: &str) -> bool {
    RE_ARO.is_match(text) && RE_ONE_BEDROOM.is_match(text)
}

/// Reads availability wording. Negative phrases win over positive ones.
pub fn parse_availability(text: &str) -> bool {
    !RE_UNAVAILABLE.is_match(text) && RE_AVAILABLE.is_match(text)
}

/// Whole dollars from a rent string such as `$1,532.50 / month`.
///
/// A dollar amount wins over any other number in the text. A bare number is
/// only accepted when the text has no `$` at all.
pub fn parse_price(text: &str) -> Option<u32> {
    let caps = if text.contains('$') {
        RE_DOLLAR_AMOUNT.captures(text)
    } else {
        RE_PRICE.captures(text)
    };
    caps.and_then(|caps| caps[1].replace(',', "").parse().ok())
}

pub fn fingerprint(text: &str) -> String {
    format!("{:x}", Sha256::digest(normalize_whitespace(text).as_bytes()))
}

/// Extracts the ARO one-bedroom units from the floorplans page.
///
/// Blocks for other unit types are dropped quietly. A block without a usable
/// name is skipped with a warning. When the same `unit_id` appears twice the
/// later block wins. Fails only when the page has neither listing blocks nor a
/// listings container.
pub fn parse_listings(html: &str) -> Result<Vec<UnitListing>, ParseError> {
    let document = Html::parse_document(html);
    let blocks = find_blocks(&document);

    if blocks.is_empty() {
        let container_selector = Selector::parse(CONTAINER_SELECTOR).unwrap();
        if document.select(&container_selector).next().is_some() {
            log::info!("Listings container present but empty; no units advertised");
            return Ok(Vec::new());
        }
        return Err(ParseError::UnrecognizedLayout);
    }

    let mut units: Vec<UnitListing> = Vec::new();
    let mut positions: HashMap<String, usize> = HashMap::new();
    let mut skipped = 0usize;

    for (index, block) in blocks.into_iter().enumerate() {
        let unit = match parse_block(block) {
            Ok(Some(unit)) => unit,
            Ok(None) => continue,
            Err(e) => {
                skipped += 1;
                log::warn!("Skipping listing block #{}: {}", index + 1, e);
                continue;
            }
        };

        match positions.get(&unit.unit_id) {
            Some(&pos) => {
                log::debug!("Duplicate unit '{}', keeping the later block", unit.unit_id);
                units[pos] = unit;
            }
            None => {
                positions.insert(unit.unit_id.clone(), units.len());
                units.push(unit);
            }
        }
    }

    log::info!(
        "Found {} ARO one-bedroom unit(s) ({} available, {} block(s) skipped)",
        units.len(),
        units.iter().filter(|u| u.available).count(),
        skipped
    );

    Ok(units)
}

/// One listing block plus the nearest enclosing block, if any. A floorplan
/// card that wraps several units is the `outer` of each of them.
#[derive(Clone, Copy)]
struct Block<'a> {
    element: ElementRef<'a>,
    outer: Option<ElementRef<'a>>,
}

fn is_true_flag(flag: &str) -> bool {
    matches!(
        flag.to_ascii_lowercase().as_str(),
        "true" | "yes" | "1" | "available"
    )
}

fn is_block_candidate(element: &ElementRef) -> bool {
    element.value().attr("data-unit-id").is_some()
        || element.value().classes().any(|class| {
            BLOCK_CLASSES
                .iter()
                .any(|block| class.eq_ignore_ascii_case(block))
        })
}

/// Innermost elements whose class list names a unit block, in page order.
fn find_blocks(document: &Html) -> Vec<Block<'_>> {
    let candidate_selector = Selector::parse("[class], [data-unit-id]").unwrap();

    let candidates: Vec<ElementRef> = document
        .select(&candidate_selector)
        .filter(is_block_candidate)
        .collect();

    let ids: HashSet<_> = candidates.iter().map(|c| c.id()).collect();
    let containers: HashSet<_> = candidates
        .iter()
        .flat_map(|c| c.ancestors().map(|a| a.id()))
        .filter(|id| ids.contains(id))
        .collect();

    candidates
        .into_iter()
        .filter(|c| !containers.contains(&c.id()))
        .map(|element| Block {
            element,
            outer: element
                .ancestors()
                .filter_map(ElementRef::wrap)
                .find(|a| ids.contains(&a.id())),
        })
        .collect()
}

/// `Ok(None)` means the block is a valid listing that is not an ARO one-bedroom.
///
/// Name comes from the block itself. Type, price and availability the block
/// does not state are taken from the enclosing block.
fn parse_block(block: Block) -> Result<Option<UnitListing>, ParseError> {
    let type_selector = Selector::parse(TYPE_SELECTOR).unwrap();
    let name_selector = Selector::parse(NAME_SELECTOR).unwrap();
    let price_selector = Selector::parse(PRICE_SELECTOR).unwrap();
    let status_selector = Selector::parse(STATUS_SELECTOR).unwrap();

    let Block { element, outer } = block;
    let block_text = normalize_whitespace(&elem_text(element));
    let outer_text = outer.map(|o| normalize_whitespace(&elem_text(o)));
    let mut inherited: Vec<String> = Vec::new();

    let own_type = attr(element, "data-unit-type").or_else(|| first_text(element, &type_selector));
    let unit_type = own_type.or_else(|| {
        let outer = outer?;
        let found = attr(outer, "data-unit-type").or_else(|| first_text(outer, &type_selector))?;
        inherited.push(found.clone());
        Some(found)
    });

    let matches = match (&unit_type, &outer_text) {
        (Some(unit_type), _) => is_aro_one_bedroom(unit_type),
        (None, Some(outer_text)) => {
            is_aro_one_bedroom(&block_text) || is_aro_one_bedroom(outer_text)
        }
        (None, None) => is_aro_one_bedroom(&block_text),
    };
    if !matches {
        return Ok(None);
    }

    let unit_id = attr(element, "data-unit-id")
        .or_else(|| attr(element, "data-unit"))
        .or_else(|| first_text(element, &name_selector))
        .ok_or_else(|| ParseError::MissingField(format!("unit name in '{}'", block_text)))?;

    let own_price = attr(element, "data-price").or_else(|| first_text(element, &price_selector));
    let price = match own_price {
        Some(text) => parse_price(&text),
        None => RE_DOLLAR_AMOUNT
            .captures(&block_text)
            .and_then(|caps| caps[1].replace(',', "").parse().ok())
            .or_else(|| {
                let outer = outer?;
                let text = attr(outer, "data-price").or_else(|| first_text(outer, &price_selector))?;
                inherited.push(text.clone());
                parse_price(&text)
            }),
    };

    let available = if let Some(flag) = attr(element, "data-available") {
        is_true_flag(&flag)
    } else if let Some(status) = first_text(element, &status_selector) {
        parse_availability(&status)
    } else if RE_AVAILABLE.is_match(&block_text) || RE_UNAVAILABLE.is_match(&block_text) {
        parse_availability(&block_text)
    } else if let Some(flag) = outer.and_then(|o| attr(o, "data-available")) {
        is_true_flag(&flag)
    } else if let Some(status) = outer.and_then(|o| first_text(o, &status_selector)) {
        parse_availability(&status)
    } else {
        false
    };

    let fingerprint_text = if inherited.is_empty() {
        block_text
    } else {
        format!("{} {}", inherited.join(" "), block_text)
    };

    Ok(Some(UnitListing {
        unit_id,
        unit_type: unit_type.unwrap_or_else(|| DEFAULT_UNIT_TYPE.to_string()),
        price,
        available,
        raw_fingerprint: fingerprint(&fingerprint_text),
    }))
}
