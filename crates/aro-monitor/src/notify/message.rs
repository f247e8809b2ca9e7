use chrono::{DateTime, Local};

use crate::types::UnitListing;

const SITE_NAME: &str = "Lincoln Commons";

/// One batched announcement covering every notifiable unit of a run.
#[derive(Debug, Clone)]
pub struct Alert {
    /// Sorted by `unit_id` for presentation.
    pub units: Vec<UnitListing>,
    pub listings_url: String,
    pub checked_at: DateTime<Local>,
}

impl Alert {
    pub fn new(units: Vec<UnitListing>, listings_url: &str) -> Self {
        Self::at(units, listings_url, Local::now())
    }

    pub fn at(mut units: Vec<UnitListing>, listings_url: &str, checked_at: DateTime<Local>) -> Self {
        units.sort_by(|a, b| a.unit_id.cmp(&b.unit_id));
        Self {
            units,
            listings_url: listings_url.to_string(),
            checked_at,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.units.is_empty()
    }

    pub fn subject(&self) -> String {
        format!(
            "ARO Units Available at {} - {}",
            SITE_NAME,
            self.checked_at.format("%Y-%m-%d %H:%M")
        )
    }

    pub fn email_body(&self) -> String {
        let lines: Vec<String> = self
            .units
            .iter()
            .map(|u| format!("• {} | {} | {}", u.unit_type, u.price_label(), u.unit_id))
            .collect();

        format!(
            "Good news! {} ARO one-bedroom unit(s) available at {}:\n\n\
             {}\n\n\
             Check the website: {}\n\n\
             Time checked: {}\n\n\
             This is an automated message from the {} ARO Monitor.\n",
            self.units.len(),
            SITE_NAME,
            lines.join("\n"),
            self.listings_url,
            self.checked_at.format("%Y-%m-%d %H:%M:%S"),
            SITE_NAME
        )
    }

    /// Short text for SMS, at most `max_len` characters.
    ///
    /// Keeps whole unit lines only; when they do not all fit, as many as fit
    /// are followed by `…(+N more)`. The URL is appended only if everything
    /// else fits.
    pub fn sms_body(&self, max_len: usize) -> String {
        let header = format!("{}: {} new ARO 1BR unit(s)", SITE_NAME, self.units.len());
        let lines: Vec<String> = self
            .units
            .iter()
            .map(|u| format!("{}, {}", u.unit_id, u.price_label()))
            .collect();

        let mut full = header.clone();
        for line in &lines {
            full.push('\n');
            full.push_str(line);
        }

        let with_url = format!("{}\n{}", full, self.listings_url);
        if char_len(&with_url) <= max_len {
            return with_url;
        }
        if char_len(&full) <= max_len {
            return full;
        }

        let mut body = header;
        for (i, line) in lines.iter().enumerate() {
            let remaining = lines.len() - i - 1;
            let tail = format!("\n…(+{} more)", lines.len() - i);
            let candidate_len = char_len(&body) + 1 + char_len(line);
            let needs_tail_after = remaining > 0;
            let next_tail_len = if needs_tail_after {
                char_len(&format!("\n…(+{} more)", remaining))
            } else {
                0
            };

            if candidate_len + next_tail_len > max_len {
                body.push_str(&tail);
                return truncate_chars(body, max_len);
            }
            body.push('\n');
            body.push_str(line);
        }

        truncate_chars(body, max_len)
    }
}

fn char_len(s: &str) -> usize {
    s.chars().count()
}

fn truncate_chars(s: String, max_len: usize) -> String {
    if char_len(&s) <= max_len {
        s
    } else {
        s.chars().take(max_len).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn unit(id: &str, price: Option<u32>) -> UnitListing {
        UnitListing {
            unit_id: id.to_string(),
            unit_type: "ARO 1 Bedroom".to_string(),
            price,
            available: true,
            raw_fingerprint: "f".to_string(),
        }
    }

    fn alert(units: Vec<UnitListing>) -> Alert {
        let at = Local.with_ymd_and_hms(2026, 10, 19, 14, 5, 0).unwrap();
        Alert::at(units, "https://example.com/floorplans", at)
    }

    #[test]
    fn test_subject_carries_timestamp() {
        let alert = alert(vec![unit("A-204", Some(1532))]);
        assert_eq!(
            alert.subject(),
            "ARO Units Available at Lincoln Commons - 2026-10-19 14:05"
        );
    }

    #[test]
    fn test_email_body_lists_every_unit_sorted() {
        let alert = alert(vec![unit("B-310", None), unit("A-204", Some(1532))]);
        let body = alert.email_body();

        let a = body.find("• ARO 1 Bedroom | $1,532 | A-204").expect("A-204 line");
        let b = body
            .find("• ARO 1 Bedroom | price unavailable | B-310")
            .expect("B-310 line");
        assert!(a < b);
        assert!(body.contains("2 ARO one-bedroom unit(s)"));
        assert!(body.contains("Check the website: https://example.com/floorplans"));
        assert!(body.contains("Time checked: 2026-10-19 14:05:00"));
    }

    #[test]
    fn test_sms_fits_everything_when_short() {
        let alert = alert(vec![unit("A-204", Some(1532))]);
        assert_eq!(
            alert.sms_body(320),
            "Lincoln Commons: 1 new ARO 1BR unit(s)\nA-204, $1,532\nhttps://example.com/floorplans"
        );
    }

    #[test]
    fn test_sms_drops_url_before_units() {
        let alert = alert(vec![unit("A-204", Some(1532))]);
        let body = alert.sms_body(60);
        assert_eq!(body, "Lincoln Commons: 1 new ARO 1BR unit(s)\nA-204, $1,532");
    }

    #[test]
    fn test_sms_truncates_to_whole_entries_with_ellipsis() {
        let units = (1..=6)
            .map(|i| unit(&format!("Unit {}0{}", i, i), Some(1500 + i)))
            .collect();
        let alert = alert(units);

        let body = alert.sms_body(90);

        assert!(body.chars().count() <= 90, "{body}");
        assert!(body.starts_with("Lincoln Commons: 6 new ARO 1BR unit(s)"));
        assert!(body.contains("Unit 101, $1,501"));
        let more = body.lines().last().unwrap();
        assert!(more.starts_with("…(+"), "{body}");
        for line in body.lines().skip(1) {
            assert!(line.starts_with("Unit ") || line.starts_with('…'), "{line}");
        }
    }
}
