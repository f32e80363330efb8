//! Completed result sets and their typed accessors.
//!
//! Results are requested in binary format, so every accessor checks the
//! column's declared wire type before touching the payload. A mismatch is a
//! schema or caller bug and is reported as [`DecodeError`], never retried.
//!
//! Accessors come in two flavors:
//! - by index (`get_u32(row, column)`),
//! - by field name (`field_u32(caller, row, "name")`), which logs under the
//!   caller's name and tells a missing field apart from a wrong type.

use crate::error::{DecodeError, Result};
use crate::handler::ResultHandler;
use crate::protocol::backend::query::{CommandComplete, DataRow, RowDescription};
use crate::protocol::types::{FormatCode, Oid, oid};

/// One column of a result.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Column {
    name: String,
    type_oid: Oid,
    format: FormatCode,
}

impl Column {
    pub fn new(name: impl Into<String>, type_oid: Oid, format: FormatCode) -> Self {
        Self {
            name: name.into(),
            type_oid,
            format,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Declared wire type.
    pub fn type_oid(&self) -> Oid {
        self.type_oid
    }

    pub fn format(&self) -> FormatCode {
        self.format
    }
}

/// Rows and metadata of one executed statement.
#[derive(Debug, Clone, Default)]
pub struct ResultSet {
    columns: Vec<Column>,
    rows: Vec<Vec<Option<Vec<u8>>>>,
    command_tag: Option<String>,
    rows_affected: Option<u64>,
}

fn is_string_type(type_oid: Oid) -> bool {
    matches!(type_oid, oid::TEXT | oid::VARCHAR | oid::BPCHAR | oid::NAME)
}

/// Enum labels arrive as text; user-defined enum types have OIDs past the
/// built-in range.
fn is_enum_type(type_oid: Oid) -> bool {
    is_string_type(type_oid) || type_oid == oid::UNKNOWN || type_oid >= oid::FIRST_NORMAL_OBJECT_ID
}

impl ResultSet {
    /// Build a result set from decoded parts.
    pub fn new(columns: Vec<Column>, rows: Vec<Vec<Option<Vec<u8>>>>) -> Self {
        Self {
            columns,
            rows,
            command_tag: None,
            rows_affected: None,
        }
    }

    pub fn columns(&self) -> &[Column] {
        &self.columns
    }

    pub fn num_columns(&self) -> usize {
        self.columns.len()
    }

    pub fn num_rows(&self) -> usize {
        self.rows.len()
    }

    /// Tag of the CommandComplete message (`"INSERT 0 1"`, ...).
    pub fn command_tag(&self) -> Option<&str> {
        self.command_tag.as_deref()
    }

    /// Row count reported by the server for the command.
    pub fn rows_affected(&self) -> Option<u64> {
        self.rows_affected
    }

    /// Index of the column named `name`.
    ///
    /// Names are folded to lower case like unquoted SQL identifiers; a name
    /// in double quotes is matched exactly.
    pub fn column_index(&self, name: &str) -> Option<usize> {
        let folded;
        let wanted = match name.strip_prefix('"').and_then(|n| n.strip_suffix('"')) {
            Some(quoted) => quoted,
            None => {
                folded = name.to_ascii_lowercase();
                folded.as_str()
            }
        };
        self.columns.iter().position(|c| c.name == wanted)
    }

    fn value(&self, row: usize, column: usize) -> core::result::Result<&[u8], DecodeError> {
        self.rows
            .get(row)
            .and_then(|r| r.get(column))
            .ok_or(DecodeError::OutOfRange { row, column })?
            .as_deref()
            .ok_or(DecodeError::Null { row, column })
    }

    fn typed_value(
        &self,
        row: usize,
        column: usize,
        expected: &'static str,
        accepts: impl Fn(Oid) -> bool,
    ) -> core::result::Result<(Oid, &[u8]), DecodeError> {
        let col = self
            .columns
            .get(column)
            .ok_or(DecodeError::OutOfRange { row, column })?;
        if !accepts(col.type_oid) {
            return Err(DecodeError::WrongType {
                column,
                expected,
                oid: col.type_oid,
            });
        }
        Ok((col.type_oid, self.value(row, column)?))
    }

    fn utf8(bytes: &[u8]) -> core::result::Result<&str, DecodeError> {
        simdutf8::basic::from_utf8(bytes)
            .map_err(|_| DecodeError::Malformed("text value is not valid UTF-8".into()))
    }

    /// String value of a TEXT, VARCHAR, BPCHAR or NAME column.
    pub fn get_string(&self, row: usize, column: usize) -> core::result::Result<&str, DecodeError> {
        let (_, bytes) = self.typed_value(row, column, "string", is_string_type)?;
        Self::utf8(bytes)
    }

    /// Label of an enum column.
    pub fn get_enum(&self, row: usize, column: usize) -> core::result::Result<&str, DecodeError> {
        let (_, bytes) = self.typed_value(row, column, "enum", is_enum_type)?;
        Self::utf8(bytes)
    }

    /// 32-bit value of an INT4 column, or the low 32 bits of an INT8 column.
    pub fn get_u32(&self, row: usize, column: usize) -> core::result::Result<u32, DecodeError> {
        let (type_oid, bytes) = self.typed_value(row, column, "number", |t| {
            matches!(t, oid::INT4 | oid::INT8)
        })?;
        match type_oid {
            oid::INT4 => Ok(u32::from_be_bytes(exact(bytes)?)),
            _ => Ok(u64::from_be_bytes(exact(bytes)?) as u32),
        }
    }

    /// 64-bit value of an INT8 column, or a widened INT4 column.
    pub fn get_u64(&self, row: usize, column: usize) -> core::result::Result<u64, DecodeError> {
        let (type_oid, bytes) = self.typed_value(row, column, "number", |t| {
            matches!(t, oid::INT4 | oid::INT8)
        })?;
        match type_oid {
            oid::INT4 => Ok(u32::from_be_bytes(exact(bytes)?).into()),
            _ => Ok(u64::from_be_bytes(exact(bytes)?)),
        }
    }

    /// Value of a BOOL column.
    pub fn get_bool(&self, row: usize, column: usize) -> core::result::Result<bool, DecodeError> {
        let (_, bytes) = self.typed_value(row, column, "boolean", |t| t == oid::BOOL)?;
        let [b] = exact::<1>(bytes)?;
        Ok(b != 0)
    }

    fn field<'a, T>(
        &'a self,
        caller: &str,
        row: usize,
        field: &str,
        get: impl Fn(&'a Self, usize, usize) -> core::result::Result<T, DecodeError>,
    ) -> Result<T> {
        let Some(column) = self.column_index(field) else {
            tracing::error!(caller, "{} field missing, check the SQL", field);
            return Err(DecodeError::FieldMissing(field.to_string()).into());
        };

        get(self, row, column).map_err(|e| {
            match &e {
                DecodeError::WrongType { expected, .. } => {
                    tracing::error!(caller, "{} field is not {}", field, expected);
                }
                other => tracing::error!(caller, "{} field: {}", field, other),
            }
            e.into()
        })
    }

    /// [`get_string`](Self::get_string) by field name.
    pub fn field_string(&self, caller: &str, row: usize, field: &str) -> Result<&str> {
        self.field(caller, row, field, Self::get_string)
    }

    /// [`get_enum`](Self::get_enum) by field name.
    pub fn field_enum(&self, caller: &str, row: usize, field: &str) -> Result<&str> {
        self.field(caller, row, field, Self::get_enum)
    }

    /// [`get_u32`](Self::get_u32) by field name.
    pub fn field_u32(&self, caller: &str, row: usize, field: &str) -> Result<u32> {
        self.field(caller, row, field, Self::get_u32)
    }

    /// [`get_u64`](Self::get_u64) by field name.
    pub fn field_u64(&self, caller: &str, row: usize, field: &str) -> Result<u64> {
        self.field(caller, row, field, Self::get_u64)
    }

    /// [`get_bool`](Self::get_bool) by field name.
    pub fn field_bool(&self, caller: &str, row: usize, field: &str) -> Result<bool> {
        self.field(caller, row, field, Self::get_bool)
    }
}

/// Payload as a fixed-size array; binary integers have no other valid length.
fn exact<const N: usize>(bytes: &[u8]) -> core::result::Result<[u8; N], DecodeError> {
    bytes.try_into().map_err(|_| {
        DecodeError::Malformed(format!("expected {} bytes, got {}", N, bytes.len()))
    })
}

impl ResultHandler for ResultSet {
    fn result_start(&mut self, cols: RowDescription<'_>) -> Result<()> {
        self.columns = cols
            .fields()
            .iter()
            .map(|f| Column::new(f.name, f.type_oid(), f.format()))
            .collect();
        Ok(())
    }

    fn row(&mut self, _cols: &RowDescription<'_>, row: DataRow<'_>) -> Result<()> {
        let values = row
            .values()?
            .into_iter()
            .map(|v| v.map(<[u8]>::to_vec))
            .collect();
        self.rows.push(values);
        Ok(())
    }

    fn result_end(&mut self, complete: CommandComplete<'_>) -> Result<()> {
        self.command_tag = Some(complete.tag.to_string());
        self.rows_affected = complete.rows_affected();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;

    fn result() -> ResultSet {
        ResultSet::new(
            vec![
                Column::new("id", oid::INT4, FormatCode::Binary),
                Column::new("serial", oid::INT8, FormatCode::Binary),
                Column::new("name", oid::TEXT, FormatCode::Binary),
                Column::new("state", 16_500, FormatCode::Binary),
                Column::new("active", oid::BOOL, FormatCode::Binary),
            ],
            vec![
                vec![
                    Some(7u32.to_be_bytes().to_vec()),
                    Some(0x0000_0001_dead_beef_u64.to_be_bytes().to_vec()),
                    Some(b"edge-1".to_vec()),
                    Some(b"idle".to_vec()),
                    Some(vec![1]),
                ],
                vec![Some(u32::MAX.to_be_bytes().to_vec()), None, None, None, Some(vec![0])],
            ],
        )
    }

    #[test]
    fn test_integers() {
        let res = result();
        assert_eq!(res.get_u32(0, 0), Ok(7));
        assert_eq!(res.get_u64(0, 0), Ok(7));
        assert_eq!(res.get_u64(0, 1), Ok(0x0000_0001_dead_beef));
        assert_eq!(res.get_u32(0, 1), Ok(0xdead_beef));
        assert_eq!(res.get_u64(1, 0), Ok(u32::MAX as u64));
    }

    #[test]
    fn test_strings_and_enums() {
        let res = result();
        assert_eq!(res.get_string(0, 2), Ok("edge-1"));
        assert_eq!(res.get_enum(0, 2), Ok("edge-1"));
        assert_eq!(res.get_enum(0, 3), Ok("idle"));
        assert!(matches!(
            res.get_string(0, 3),
            Err(DecodeError::WrongType { column: 3, expected: "string", oid: 16_500 })
        ));
    }

    #[test]
    fn test_bool() {
        let res = result();
        assert_eq!(res.get_bool(0, 4), Ok(true));
        assert_eq!(res.get_bool(1, 4), Ok(false));
        assert!(matches!(res.get_bool(0, 0), Err(DecodeError::WrongType { .. })));
    }

    #[test]
    fn test_wrong_type() {
        let res = result();
        assert!(matches!(
            res.get_u32(0, 2),
            Err(DecodeError::WrongType { expected: "number", oid: oid::TEXT, .. })
        ));
        assert!(matches!(res.get_string(0, 0), Err(DecodeError::WrongType { .. })));
    }

    #[test]
    fn test_null_and_range() {
        let res = result();
        assert_eq!(res.get_u64(1, 1), Err(DecodeError::Null { row: 1, column: 1 }));
        assert_eq!(res.get_u32(2, 0), Err(DecodeError::OutOfRange { row: 2, column: 0 }));
        assert_eq!(res.get_u32(0, 9), Err(DecodeError::OutOfRange { row: 0, column: 9 }));
    }

    #[test]
    fn test_malformed_length() {
        let res = ResultSet::new(
            vec![Column::new("n", oid::INT4, FormatCode::Binary)],
            vec![vec![Some(vec![0, 1])]],
        );
        assert!(matches!(res.get_u32(0, 0), Err(DecodeError::Malformed(_))));
    }

    #[test]
    fn test_field_missing_vs_wrong_type() {
        let res = result();
        assert_eq!(res.column_index("name"), Some(2));
        assert_eq!(res.field_u32("load_nodes", 0, "id").unwrap(), 7);
        assert_eq!(res.field_string("load_nodes", 0, "name").unwrap(), "edge-1");

        match res.field_u32("load_nodes", 0, "missing") {
            Err(Error::Decode(DecodeError::FieldMissing(field))) => assert_eq!(field, "missing"),
            other => panic!("unexpected {:?}", other),
        }
        match res.field_bool("load_nodes", 0, "name") {
            Err(Error::Decode(DecodeError::WrongType { .. })) => {}
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_field_names_fold_case() {
        let mut res = result();
        res.columns.push(Column::new("Mixed", oid::INT4, FormatCode::Binary));
        assert_eq!(res.column_index("ID"), Some(0));
        assert_eq!(res.column_index("\"id\""), Some(0));
        assert_eq!(res.column_index("\"ID\""), None);
        assert_eq!(res.column_index("Mixed"), None);
        assert_eq!(res.column_index("\"Mixed\""), Some(5));
        assert_eq!(res.field_u32("load_nodes", 0, "Id").unwrap(), 7);
    }

    #[test]
    fn test_collects_from_handler() {
        let mut res = ResultSet::default();
        let mut desc = vec![0u8, 1];
        desc.extend_from_slice(b"id\0");
        desc.extend_from_slice(&[0, 0, 0, 0, 0, 0, 0, 0, 0, 23, 0, 4, 0xff, 0xff, 0xff, 0xff, 0, 1]);
        res.result_start(RowDescription::parse(&desc).unwrap()).unwrap();
        let cols = RowDescription::parse(&desc).unwrap();
        res.row(&cols, DataRow::parse(&[0, 1, 0, 0, 0, 4, 0, 0, 0, 9]).unwrap())
            .unwrap();
        res.result_end(CommandComplete { tag: "SELECT 1" }).unwrap();

        assert_eq!(res.num_rows(), 1);
        assert_eq!(res.num_columns(), 1);
        assert_eq!(res.columns()[0].format(), FormatCode::Binary);
        assert_eq!(res.get_u32(0, 0), Ok(9));
        assert_eq!(res.rows_affected(), Some(1));
        assert_eq!(res.command_tag(), Some("SELECT 1"));
    }
}
