use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::core::apdu::Field;
use crate::core::card::CardHandle;
use crate::core::error::CardError;
use crate::core::format::{
    format_cid_hyphenated, format_cid_spaced, format_thai_date, name_prefix, ThaiDate,
};
use crate::core::reader::CardChannel;

/// Decoded card fields keyed by [`Field::key`], plus derived display forms.
///
/// This is the dictionary handed to form-filling code.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CardProfile {
    fields: BTreeMap<String, String>,
}

impl CardProfile {
    /// Build a profile from decoded values and add the derived keys for
    /// whichever source fields are present.
    pub fn from_fields<I>(values: I) -> Self
    where
        I: IntoIterator<Item = (Field, String)>,
    {
        let mut fields = BTreeMap::new();
        for (field, value) in values {
            fields.insert(field.key().to_string(), value);
        }

        let mut profile = Self { fields };
        profile.add_derived();
        profile
    }

    fn add_derived(&mut self) {
        let mut derived = Vec::new();

        if let Some(cid) = self.get(Field::Cid) {
            derived.push(("cid_hyphenated", format_cid_hyphenated(cid)));
            derived.push(("cid_spaced", format_cid_spaced(cid)));
        }
        if let Some(name) = self.get(Field::ThaiFullName) {
            derived.push(("name_prefix", name_prefix(name)));
        }
        for (field, key) in [
            (Field::DateOfBirth, "date_of_birth_thai"),
            (Field::IssueDate, "issue_date_thai"),
            (Field::ExpiryDate, "expiry_date_thai"),
        ] {
            if let Some(date) = self.get(field) {
                derived.push((key, format_thai_date(date)));
            }
        }

        for (key, value) in derived {
            self.fields.insert(key.to_string(), value);
        }
    }

    /// Add the examination-date keys (`exam_date_thai`, `exam_day`,
    /// `exam_month`, `exam_year`) for forms filled in at the counter.
    pub fn with_exam_date(mut self, date: ThaiDate) -> Self {
        for (key, value) in [
            ("exam_date_thai", date.to_string()),
            ("exam_day", date.day.to_string()),
            ("exam_month", date.month_name().to_string()),
            ("exam_year", date.year.to_string()),
        ] {
            self.fields.insert(key.to_string(), value);
        }
        self
    }

    pub fn get(&self, field: Field) -> Option<&str> {
        self.value(field.key())
    }

    /// Look up any key, including derived ones such as `cid_hyphenated`.
    pub fn value(&self, key: &str) -> Option<&str> {
        self.fields.get(key).map(String::as_str)
    }

    pub fn fields(&self) -> &BTreeMap<String, String> {
        &self.fields
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }
}

/// Read the requested fields from a session whose applet is selected. The
/// profile is stamped with today's date as the examination date.
pub fn read_profile<C: CardChannel>(
    handle: &mut CardHandle<C>,
    fields: &[Field],
) -> Result<CardProfile, CardError> {
    let mut values = Vec::with_capacity(fields.len());
    for &field in fields {
        values.push((field, handle.read_text(field)?));
    }
    Ok(CardProfile::from_fields(values).with_exam_date(ThaiDate::today()))
}
