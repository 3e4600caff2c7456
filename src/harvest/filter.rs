use crate::models::{FilterOutcome, FilterVerdict, ListingDocument};
use chrono::NaiveDateTime;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Rule {
    Date,
    Age,
    Minimums,
    Url,
}

/// Rules run in this order; the first rejection wins.
const RULES: [Rule; 4] = [Rule::Date, Rule::Age, Rule::Minimums, Rule::Url];

#[derive(Debug, Clone)]
pub struct FilterChain {
    pub hours_limit: i64,
    pub min_rooms: i64,
    pub min_area: f64,
}

impl FilterChain {
    pub fn new(hours_limit: i64, min_rooms: i64, min_area: f64) -> Self {
        Self {
            hours_limit,
            min_rooms,
            min_area,
        }
    }

    pub fn evaluate(&self, doc: &ListingDocument, now: NaiveDateTime) -> FilterOutcome {
        let verdict = RULES
            .iter()
            .find_map(|rule| self.apply(*rule, doc, now))
            .unwrap_or(FilterVerdict::Accepted);

        FilterOutcome {
            candidate_id: doc.id,
            verdict,
        }
    }

    fn apply(
        &self,
        rule: Rule,
        doc: &ListingDocument,
        now: NaiveDateTime,
    ) -> Option<FilterVerdict> {
        match rule {
            Rule::Date => doc
                .published_at()
                .is_none()
                .then_some(FilterVerdict::RejectedEmptyDate),
            Rule::Age => {
                let published = doc.published_at()?;
                ((now - published).num_hours() > self.hours_limit)
                    .then_some(FilterVerdict::RejectedTooOld)
            }
            // An unreadable area is NaN and compares false, so it passes.
            Rule::Minimums => (doc.rooms < self.min_rooms || doc.area < self.min_area)
                .then_some(FilterVerdict::RejectedMinimums),
            Rule::Url => doc
                .beautiful_url
                .trim()
                .is_empty()
                .then_some(FilterVerdict::RejectedNoUrl),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn now() -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2025, 6, 2)
            .unwrap()
            .and_hms_opt(12, 0, 0)
            .unwrap()
    }

    fn doc() -> ListingDocument {
        ListingDocument {
            id: 1,
            publishing_date: "2025-06-02 09:00:00".to_string(),
            rooms: 2,
            area: 45.0,
            beautiful_url: "realty-1.html".to_string(),
            ..Default::default()
        }
    }

    fn chain() -> FilterChain {
        FilterChain::new(24, 1, 25.0)
    }

    fn verdict(doc: &ListingDocument) -> FilterVerdict {
        chain().evaluate(doc, now()).verdict
    }

    #[test]
    fn test_accepts_fresh_complete_listing() {
        let outcome = chain().evaluate(&doc(), now());
        assert_eq!(outcome.candidate_id, 1);
        assert_eq!(outcome.verdict, FilterVerdict::Accepted);
    }

    #[test]
    fn test_empty_or_garbled_date() {
        let mut d = doc();
        d.publishing_date = "   ".to_string();
        assert_eq!(verdict(&d), FilterVerdict::RejectedEmptyDate);

        d.publishing_date = "yesterday".to_string();
        assert_eq!(verdict(&d), FilterVerdict::RejectedEmptyDate);
    }

    #[test]
    fn test_age_uses_whole_hours() {
        let mut d = doc();
        d.publishing_date = "2025-06-01 12:00:00".to_string();
        assert_eq!(verdict(&d), FilterVerdict::Accepted);

        // 24h59m is still 24 whole hours
        d.publishing_date = "2025-06-01 11:01:00".to_string();
        assert_eq!(verdict(&d), FilterVerdict::Accepted);

        d.publishing_date = "2025-06-01 11:00:00".to_string();
        assert_eq!(verdict(&d), FilterVerdict::RejectedTooOld);
    }

    #[test]
    fn test_minimums_and_missing_area() {
        let mut d = doc();
        d.rooms = 0;
        assert_eq!(verdict(&d), FilterVerdict::RejectedMinimums);

        let mut d = doc();
        d.area = 24.9;
        assert_eq!(verdict(&d), FilterVerdict::RejectedMinimums);

        let mut d = doc();
        d.area = f64::NAN;
        assert_eq!(verdict(&d), FilterVerdict::Accepted);

        let mut d = doc();
        d.area = 25.0;
        assert_eq!(verdict(&d), FilterVerdict::Accepted);
    }

    #[test]
    fn test_missing_url() {
        let mut d = doc();
        d.beautiful_url = " ".to_string();
        assert_eq!(verdict(&d), FilterVerdict::RejectedNoUrl);
    }

    #[test]
    fn test_first_failing_rule_wins() {
        let mut d = doc();
        d.publishing_date = "2025-05-01 09:00:00".to_string();
        d.rooms = 0;
        d.beautiful_url = String::new();
        assert_eq!(verdict(&d), FilterVerdict::RejectedTooOld);

        d.publishing_date = "2025-06-02 09:00:00".to_string();
        assert_eq!(verdict(&d), FilterVerdict::RejectedMinimums);
    }
}
