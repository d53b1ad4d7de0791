//! Serde converter for `chrono::DateTime` fields of stored documents.
//!
//! BSON (not human readable) gets a native `mongodb::bson::DateTime`, so
//! MongoDB sorts and compares timestamps as dates. JSON keeps RFC 3339
//! strings. Reading accepts either form.

use chrono::{DateTime, Utc};
use mongodb::bson::{self, Bson};
use serde::{de::Error as _, Deserialize, Deserializer, Serialize, Serializer};

pub fn serialize<S>(date: &DateTime<Utc>, serializer: S) -> Result<S::Ok, S::Error>
where
    S: Serializer,
{
    if serializer.is_human_readable() {
        date.serialize(serializer)
    } else {
        bson::DateTime::from_millis(date.timestamp_millis()).serialize(serializer)
    }
}

pub fn deserialize<'de, D>(deserializer: D) -> Result<DateTime<Utc>, D::Error>
where
    D: Deserializer<'de>,
{
    match Bson::deserialize(deserializer)? {
        Bson::DateTime(date) => DateTime::from_timestamp_millis(date.timestamp_millis())
            .ok_or_else(|| D::Error::custom("timestamp out of range")),
        Bson::String(text) => DateTime::parse_from_rfc3339(&text)
            .map(|date| date.with_timezone(&Utc))
            .map_err(D::Error::custom),
        other => Err(D::Error::custom(format!(
            "expected a date, found {:?}",
            other.element_type()
        ))),
    }
}

pub mod option {
    use super::*;

    struct Wrapped<'a>(&'a DateTime<Utc>);

    impl Serialize for Wrapped<'_> {
        fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
            super::serialize(self.0, serializer)
        }
    }

    struct Unwrapped(DateTime<Utc>);

    impl<'de> Deserialize<'de> for Unwrapped {
        fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
            super::deserialize(deserializer).map(Unwrapped)
        }
    }

    pub fn serialize<S>(date: &Option<DateTime<Utc>>, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        match date {
            Some(date) => serializer.serialize_some(&Wrapped(date)),
            None => serializer.serialize_none(),
        }
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Option<DateTime<Utc>>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let date = Option::<Unwrapped>::deserialize(deserializer)?;
        Ok(date.map(|Unwrapped(date)| date))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, PartialEq, Serialize, Deserialize)]
    struct Stamped {
        #[serde(with = "super")]
        at: DateTime<Utc>,
        #[serde(default, with = "super::option")]
        until: Option<DateTime<Utc>>,
    }

    fn stamped() -> Stamped {
        Stamped {
            at: DateTime::from_timestamp_millis(1_700_000_000_123).unwrap(),
            until: None,
        }
    }

    #[test]
    fn bson_documents_store_native_dates() {
        let value = stamped();
        let raw = bson::to_vec(&value).unwrap();
        let doc = bson::Document::from_reader(raw.as_slice()).unwrap();

        assert!(matches!(doc.get("at"), Some(Bson::DateTime(_))));
        assert_eq!(bson::from_slice::<Stamped>(&raw).unwrap(), value);
    }

    #[test]
    fn json_keeps_rfc3339_strings() {
        let value = Stamped {
            until: Some(DateTime::from_timestamp(1_700_000_100, 0).unwrap()),
            ..stamped()
        };
        let json = serde_json::to_value(&value).unwrap();

        assert_eq!(json["at"], "2023-11-14T22:13:20.123Z");
        assert_eq!(serde_json::from_value::<Stamped>(json).unwrap(), value);
    }

    #[test]
    fn reads_legacy_string_timestamps() {
        let doc = bson::doc! { "at": "2023-11-14T22:13:20.123Z", "until": Bson::Null };
        let value: Stamped = bson::from_document(doc).unwrap();
        assert_eq!(value, stamped());
    }
}
