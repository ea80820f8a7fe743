//! JSON values kept in TEXT columns.
//!
//! Label lists and key dates are small and always read with their record, so
//! they live as JSON text on the record row instead of in their own tables.

use diesel::deserialize::{FromSql, FromSqlRow};
use diesel::expression::AsExpression;
use diesel::pg::{Pg, PgValue};
use diesel::serialize::{IsNull, Output, ToSql};
use diesel::sql_types::Text;
use serde::{de::DeserializeOwned, Serialize};
use std::fmt::Debug;
use std::io::Write;

/// Column value stored as its JSON encoding
#[derive(Debug, Clone, PartialEq, AsExpression, FromSqlRow)]
#[diesel(sql_type = Text)]
pub struct JsonText<T>(pub T);

impl<T> JsonText<T> {
    pub fn into_inner(self) -> T {
        self.0
    }
}

impl<T: Serialize> JsonText<T> {
    fn encode(&self) -> serde_json::Result<String> {
        serde_json::to_string(&self.0)
    }
}

impl<T: DeserializeOwned> JsonText<T> {
    fn decode(raw: &str) -> serde_json::Result<Self> {
        serde_json::from_str(raw).map(JsonText)
    }
}

impl<T: DeserializeOwned> FromSql<Text, Pg> for JsonText<T> {
    fn from_sql(bytes: PgValue<'_>) -> diesel::deserialize::Result<Self> {
        let raw = <String as FromSql<Text, Pg>>::from_sql(bytes)?;
        Ok(Self::decode(&raw)?)
    }
}

impl<T: Serialize + Debug> ToSql<Text, Pg> for JsonText<T> {
    fn to_sql<'b>(&'b self, out: &mut Output<'b, '_, Pg>) -> diesel::serialize::Result {
        out.write_all(self.encode()?.as_bytes())?;
        Ok(IsNull::No)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::KeyDates;

    #[test]
    fn test_key_dates_column_text() {
        let dates = JsonText(KeyDates {
            interview_date: Some("2026-11-03".to_string()),
            interview_time: Some("2 PM".to_string()),
            deadline: None,
        });

        let raw = dates.encode().unwrap();
        assert_eq!(
            raw,
            r#"{"interview_date":"2026-11-03","interview_time":"2 PM","deadline":null}"#
        );
        assert_eq!(JsonText::<KeyDates>::decode(&raw).unwrap(), dates);
    }

    #[test]
    fn test_labels_column_text() {
        let labels = JsonText(vec!["INBOX".to_string(), "UNREAD".to_string()]);
        assert_eq!(labels.encode().unwrap(), r#"["INBOX","UNREAD"]"#);
    }

    #[test]
    fn test_malformed_column_text_is_an_error() {
        assert!(JsonText::<Vec<String>>::decode("INBOX,UNREAD").is_err());
        assert!(JsonText::<KeyDates>::decode(r#"{"deadline": 5}"#).is_err());
    }
}
