// ==========================================
// 纺织生产流转引擎 - 行映射辅助
// ==========================================
// 枚举列统一以 snake_case 字符串存储, 读取时严格解析
// ==========================================

use rusqlite::types::Type;
use rusqlite::Row;
use std::fmt;

#[derive(Debug)]
struct UnknownEnumValue {
    column: &'static str,
    value: String,
}

impl fmt::Display for UnknownEnumValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} 列存在无法识别的取值: {}", self.column, self.value)
    }
}

impl std::error::Error for UnknownEnumValue {}

/// 读取必填枚举列
pub(crate) fn enum_col<T>(
    row: &Row<'_>,
    idx: usize,
    column: &'static str,
    parse: fn(&str) -> Option<T>,
) -> rusqlite::Result<T> {
    let raw: String = row.get(idx)?;
    parse(&raw).ok_or_else(|| {
        rusqlite::Error::FromSqlConversionFailure(
            idx,
            Type::Text,
            Box::new(UnknownEnumValue { column, value: raw }),
        )
    })
}

/// 读取可空枚举列
pub(crate) fn opt_enum_col<T>(
    row: &Row<'_>,
    idx: usize,
    column: &'static str,
    parse: fn(&str) -> Option<T>,
) -> rusqlite::Result<Option<T>> {
    let raw: Option<String> = row.get(idx)?;
    match raw {
        None => Ok(None),
        Some(raw) => parse(&raw).map(Some).ok_or_else(|| {
            rusqlite::Error::FromSqlConversionFailure(
                idx,
                Type::Text,
                Box::new(UnknownEnumValue { column, value: raw }),
            )
        }),
    }
}
