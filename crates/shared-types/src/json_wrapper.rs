//! Typed JSON stored in TEXT columns.
//!
//! Meeting metadata is free-form JSON kept as a string in Postgres. The
//! wrapper keeps the typed value in memory and (with the `diesel` feature)
//! converts at the database boundary.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::ops::{Deref, DerefMut};

/// A value serialized as JSON text when written to the database.
///
/// Serde sees through the wrapper, so API payloads carry the inner value
/// directly.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[cfg_attr(feature = "diesel", derive(diesel::AsExpression, diesel::FromSqlRow))]
#[cfg_attr(feature = "diesel", diesel(sql_type = diesel::sql_types::Text))]
#[serde(transparent)]
pub struct JsonWrapper<T>(pub T);

impl<T> JsonWrapper<T> {
    pub fn new(value: T) -> Self {
        JsonWrapper(value)
    }

    pub fn into_inner(self) -> T {
        self.0
    }
}

impl<T: Default> Default for JsonWrapper<T> {
    fn default() -> Self {
        JsonWrapper(T::default())
    }
}

impl<T> Deref for JsonWrapper<T> {
    type Target = T;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl<T> DerefMut for JsonWrapper<T> {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut self.0
    }
}

impl<T> From<T> for JsonWrapper<T> {
    fn from(value: T) -> Self {
        JsonWrapper(value)
    }
}

impl<T: fmt::Display> fmt::Display for JsonWrapper<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

#[cfg(feature = "diesel")]
mod sql {
    use super::JsonWrapper;
    use diesel::deserialize::FromSql;
    use diesel::pg::{Pg, PgValue};
    use diesel::serialize::{IsNull, Output, ToSql};
    use diesel::sql_types::Text;
    use serde::{de::DeserializeOwned, Serialize};
    use std::fmt;
    use std::io::Write;

    impl<T> FromSql<Text, Pg> for JsonWrapper<T>
    where
        T: DeserializeOwned,
    {
        fn from_sql(bytes: PgValue<'_>) -> diesel::deserialize::Result<Self> {
            let s = <String as FromSql<Text, Pg>>::from_sql(bytes)?;
            let value: T = serde_json::from_str(&s)
                .map_err(|e| Box::new(e) as Box<dyn std::error::Error + Send + Sync>)?;
            Ok(JsonWrapper(value))
        }
    }

    impl<T> ToSql<Text, Pg> for JsonWrapper<T>
    where
        T: Serialize + fmt::Debug,
    {
        fn to_sql<'b>(&'b self, out: &mut Output<'b, '_, Pg>) -> diesel::serialize::Result {
            let s = serde_json::to_string(&self.0)?;
            out.write_all(s.as_bytes())?;
            Ok(IsNull::No)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_metadata_serializes_transparently() {
        let wrapped = JsonWrapper::new(json!({"source": "referral", "priority": 2}));
        let text = serde_json::to_string(&wrapped).unwrap();
        assert_eq!(text, r#"{"priority":2,"source":"referral"}"#);
    }

    #[test]
    fn test_metadata_deref_reaches_inner_value() {
        let wrapped: JsonWrapper<serde_json::Value> =
            serde_json::from_str(r#"{"source":"web form"}"#).unwrap();
        assert_eq!(wrapped["source"], "web form");
        assert_eq!(wrapped.into_inner(), json!({"source": "web form"}));
    }

    #[test]
    fn test_default_is_inner_default() {
        let wrapped: JsonWrapper<Vec<String>> = JsonWrapper::default();
        assert!(wrapped.is_empty());
    }
}
