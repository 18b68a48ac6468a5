use chrono::{Datelike, NaiveDate};

/// Day-count encoding of one calendar date; `0` encodes null.
///
/// The count is days from the common era, so the numeric order is
/// chronological and null sorts before every real date.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct EncodedDate(pub i32);

impl EncodedDate {
    pub const NULL: EncodedDate = EncodedDate(0);

    pub fn from_date(date: NaiveDate) -> Self {
        EncodedDate(date.num_days_from_ce())
    }

    /// Parse `YYYY-MM-DD`.
    pub fn parse(value: &str) -> Option<Self> {
        NaiveDate::parse_from_str(value, "%Y-%m-%d")
            .ok()
            .map(Self::from_date)
    }

    pub fn is_null(self) -> bool {
        self.0 == 0
    }

    pub fn to_date(self) -> Option<NaiveDate> {
        if self.is_null() {
            return None;
        }
        NaiveDate::from_num_days_from_ce_opt(self.0)
    }

    pub fn format(self) -> Option<String> {
        self.to_date().map(|date| date.format("%Y-%m-%d").to_string())
    }
}

/// The rows of one DATE column in one partition.
#[derive(Debug, Default)]
pub struct DateColumnPartition {
    pub values: Vec<EncodedDate>,
}

impl DateColumnPartition {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn append(&mut self, value: Option<EncodedDate>) {
        self.values.push(value.unwrap_or(EncodedDate::NULL));
    }

    pub fn value(&self, row_id: u32) -> EncodedDate {
        self.values[row_id as usize]
    }

    pub fn len(&self) -> u32 {
        self.values.len() as u32
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_parse_and_format_round_trip() {
        let date = EncodedDate::parse("2020-01-01").unwrap();
        assert_eq!(date.format().as_deref(), Some("2020-01-01"));
        assert!(EncodedDate::parse("01.01.2020").is_none());
        assert!(EncodedDate::parse("2020-13-01").is_none());
    }

    #[test]
    fn test_encoding_orders_chronologically() {
        let early = EncodedDate::parse("2000-03-07").unwrap();
        let late = EncodedDate::parse("2020-01-01").unwrap();
        assert!(early < late);
        assert!(EncodedDate::NULL < early);
    }

    #[test]
    fn test_null_round_trip() {
        let mut column = DateColumnPartition::new();
        column.append(None);
        assert!(column.value(0).is_null());
        assert_eq!(column.value(0).format(), None);
    }
}
