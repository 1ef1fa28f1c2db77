//! Source type identifiers and the typed values that travel between databases.
//!
//! Values are read under the type the source catalog reported for their
//! column, then bound to the destination according to the parameter type the
//! destination statement expects. This keeps numeric, string and temporal
//! semantics intact when the two sides name their types differently.

use bytes::{BufMut, BytesMut};
use chrono::{DateTime, NaiveDate, NaiveDateTime, NaiveTime, Utc};
use postgres::types::{IsNull, ToSql, Type, to_sql_checked};
use rust_decimal::Decimal;
use rust_decimal::prelude::ToPrimitive;
use std::error::Error;

#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum ColumnType {
    Boolean,
    SmallInt,
    Integer,
    BigInt,
    Real,
    Double,
    Numeric,
    /// Currency amount stored as an integer number of cents.
    Money,
    /// Fixed or varying length bit string.
    Bit,
    Char,
    Varchar,
    Text,
    Bytes,
    Date,
    Time,
    Timestamp,
    TimestampTz,
    Uuid,
    Json,
    /// A type this crate has no dedicated mapping for. Copied in the source's
    /// own wire format, so the destination column must have the same type.
    Other(String),
}

impl ColumnType {
    /// Maps a catalog type name (`information_schema.columns.data_type` or a
    /// common alias) to its identifier. Matching is case-insensitive.
    pub fn from_sql_name(name: &str) -> Self {
        let lowered = name.trim().to_ascii_lowercase();
        match lowered.as_str() {
            "boolean" | "bool" => ColumnType::Boolean,
            "smallint" | "int2" | "tinyint" => ColumnType::SmallInt,
            "integer" | "int" | "int4" | "mediumint" => ColumnType::Integer,
            "bigint" | "int8" => ColumnType::BigInt,
            "real" | "float4" | "float" => ColumnType::Real,
            "double precision" | "double" | "float8" => ColumnType::Double,
            "numeric" | "decimal" => ColumnType::Numeric,
            "money" | "smallmoney" => ColumnType::Money,
            "bit" | "bit varying" | "varbit" => ColumnType::Bit,
            "character" | "char" | "bpchar" | "nchar" => ColumnType::Char,
            "character varying" | "varchar" | "nvarchar" => ColumnType::Varchar,
            "text" | "ntext" | "longtext" | "mediumtext" | "string" => ColumnType::Text,
            "bytea" | "binary" | "varbinary" | "blob" | "bytes" => ColumnType::Bytes,
            "date" => ColumnType::Date,
            "time" | "time without time zone" => ColumnType::Time,
            "timestamp" | "timestamp without time zone" | "datetime" | "datetime2" => {
                ColumnType::Timestamp
            }
            "timestamp with time zone" | "timestamptz" | "datetimeoffset" => {
                ColumnType::TimestampTz
            }
            "uuid" | "uniqueidentifier" => ColumnType::Uuid,
            "json" | "jsonb" => ColumnType::Json,
            _ => ColumnType::Other(lowered),
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub enum Value {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Numeric(Decimal),
    Text(String),
    Bytes(Vec<u8>),
    Date(NaiveDate),
    Time(NaiveTime),
    Timestamp(NaiveDateTime),
    TimestampTz(DateTime<Utc>),
    Uuid(uuid::Uuid),
    Json(serde_json::Value),
    /// A cell kept in its source wire format, tagged with the source type name.
    Raw { type_name: String, bytes: Vec<u8> },
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Value::Int(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::Text(v.to_string())
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(v: Option<T>) -> Self {
        v.map_or(Value::Null, Into::into)
    }
}

type BoxError = Box<dyn Error + Sync + Send>;

fn is_text(ty: &Type) -> bool {
    *ty == Type::TEXT || *ty == Type::VARCHAR || *ty == Type::BPCHAR || *ty == Type::NAME
}

fn is_json(ty: &Type) -> bool {
    *ty == Type::JSON || *ty == Type::JSONB
}

fn bind_money(cents: i64, out: &mut BytesMut) -> Result<IsNull, BoxError> {
    out.put_i64(cents);
    Ok(IsNull::No)
}

fn bind_int(v: i64, ty: &Type, out: &mut BytesMut) -> Result<IsNull, BoxError> {
    if *ty == Type::MONEY {
        bind_money(v.checked_mul(100).ok_or("integer value out of range for money")?, out)
    } else if *ty == Type::INT2 {
        i16::try_from(v)?.to_sql(ty, out)
    } else if *ty == Type::INT4 {
        i32::try_from(v)?.to_sql(ty, out)
    } else if *ty == Type::FLOAT4 {
        (v as f32).to_sql(ty, out)
    } else if *ty == Type::FLOAT8 {
        (v as f64).to_sql(ty, out)
    } else if *ty == Type::NUMERIC {
        Decimal::from(v).to_sql(ty, out)
    } else if *ty == Type::BOOL {
        (v != 0).to_sql(ty, out)
    } else if is_text(ty) {
        v.to_string().to_sql(ty, out)
    } else {
        v.to_sql_checked(ty, out)
    }
}

fn bind_float(v: f64, ty: &Type, out: &mut BytesMut) -> Result<IsNull, BoxError> {
    if *ty == Type::FLOAT4 {
        (v as f32).to_sql(ty, out)
    } else if *ty == Type::NUMERIC {
        Decimal::from_f64_retain(v)
            .ok_or("float value cannot be represented as numeric")?
            .to_sql(ty, out)
    } else if is_text(ty) {
        v.to_string().to_sql(ty, out)
    } else {
        v.to_sql_checked(ty, out)
    }
}

fn bind_numeric(v: &Decimal, ty: &Type, out: &mut BytesMut) -> Result<IsNull, BoxError> {
    let out_of_range = || format!("numeric value {v} out of range for {ty}");
    if *ty == Type::MONEY {
        let cents = (v.round_dp(2) * Decimal::ONE_HUNDRED)
            .to_i64()
            .ok_or_else(out_of_range)?;
        bind_money(cents, out)
    } else if *ty == Type::FLOAT8 {
        v.to_f64().ok_or_else(out_of_range)?.to_sql(ty, out)
    } else if *ty == Type::FLOAT4 {
        v.to_f32().ok_or_else(out_of_range)?.to_sql(ty, out)
    } else if *ty == Type::INT8 || *ty == Type::INT4 || *ty == Type::INT2 {
        if !v.fract().is_zero() {
            return Err(out_of_range().into());
        }
        bind_int(v.to_i64().ok_or_else(out_of_range)?, ty, out)
    } else if is_text(ty) {
        v.to_string().to_sql(ty, out)
    } else {
        v.to_sql_checked(ty, out)
    }
}

impl ToSql for Value {
    fn to_sql(&self, ty: &Type, out: &mut BytesMut) -> Result<IsNull, BoxError> {
        match self {
            Value::Null => Ok(IsNull::Yes),
            Value::Bool(v) if is_text(ty) => v.to_string().to_sql(ty, out),
            Value::Bool(v) => v.to_sql_checked(ty, out),
            Value::Int(v) => bind_int(*v, ty, out),
            Value::Float(v) => bind_float(*v, ty, out),
            Value::Numeric(v) => bind_numeric(v, ty, out),
            Value::Text(v) if is_json(ty) => {
                serde_json::from_str::<serde_json::Value>(v)?.to_sql(ty, out)
            }
            Value::Text(v) => v.to_sql_checked(ty, out),
            Value::Bytes(v) => v.to_sql_checked(ty, out),
            Value::Date(v) if *ty == Type::TIMESTAMP => v.and_time(NaiveTime::MIN).to_sql(ty, out),
            Value::Date(v) if is_text(ty) => v.to_string().to_sql(ty, out),
            Value::Date(v) => v.to_sql_checked(ty, out),
            Value::Time(v) if is_text(ty) => v.to_string().to_sql(ty, out),
            Value::Time(v) => v.to_sql_checked(ty, out),
            Value::Timestamp(v) if *ty == Type::TIMESTAMPTZ => v.and_utc().to_sql(ty, out),
            Value::Timestamp(v) if *ty == Type::DATE => v.date().to_sql(ty, out),
            Value::Timestamp(v) if is_text(ty) => v.to_string().to_sql(ty, out),
            Value::Timestamp(v) => v.to_sql_checked(ty, out),
            Value::TimestampTz(v) if *ty == Type::TIMESTAMP => v.naive_utc().to_sql(ty, out),
            Value::TimestampTz(v) if is_text(ty) => v.to_rfc3339().to_sql(ty, out),
            Value::TimestampTz(v) => v.to_sql_checked(ty, out),
            Value::Uuid(v) if is_text(ty) => v.to_string().to_sql(ty, out),
            Value::Uuid(v) => v.to_sql_checked(ty, out),
            Value::Json(v) if is_text(ty) => v.to_string().to_sql(ty, out),
            Value::Json(v) => v.to_sql_checked(ty, out),
            Value::Raw { type_name, bytes } if ty.name() == type_name => {
                out.extend_from_slice(bytes);
                Ok(IsNull::No)
            }
            Value::Raw { type_name, .. } => {
                Err(format!("cannot bind {type_name} value to a {ty} parameter").into())
            }
        }
    }

    // Conversion is decided per value in `to_sql`; unsupported pairs fail there.
    fn accepts(_ty: &Type) -> bool {
        true
    }

    to_sql_checked!();
}
