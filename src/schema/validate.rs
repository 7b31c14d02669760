use rustc_hash::FxHashSet;

use super::{ColumnType, Schema, EFFECTIVE_FROM, EFFECTIVE_TO};
use crate::error::SchemaError;

pub fn validate(schema: &Schema) -> Result<(), SchemaError> {
    let mut seen_tables = FxHashSet::default();
    for table in &schema.tables {
        if !seen_tables.insert(table.name.clone()) {
            return Err(SchemaError::DuplicateTable {
                table: table.name.clone(),
            });
        }

        for column in &table.columns {
            if column.name == EFFECTIVE_FROM || column.name == EFFECTIVE_TO {
                return Err(SchemaError::ReservedColumn {
                    table: table.name.clone(),
                    column: column.name.clone(),
                });
            }
        }

        let id = table.columns.iter().find(|c| c.name == table.id_column);
        match id {
            None => {
                return Err(SchemaError::MissingId {
                    table: table.name.clone(),
                });
            }
            Some(id_col) => {
                if id_col.optional || matches!(id_col.ty, ColumnType::List(_)) {
                    return Err(SchemaError::InvalidId {
                        table: table.name.clone(),
                    });
                }
            }
        }

        for column in &table.columns {
            validate_type(&table.name, &column.name, &column.ty, schema)?;
        }
    }

    for e in &schema.enums {
        let mut seen_values = FxHashSet::default();
        for v in &e.values {
            if v.is_empty() {
                return Err(SchemaError::EmptyEnumValue {
                    name: e.name.clone(),
                });
            }
            if !seen_values.insert(v.clone()) {
                return Err(SchemaError::DuplicateEnumValue {
                    name: e.name.clone(),
                    value: v.clone(),
                });
            }
        }
    }

    Ok(())
}

fn validate_type(
    table: &str,
    column: &str,
    ty: &ColumnType,
    schema: &Schema,
) -> Result<(), SchemaError> {
    match ty {
        ColumnType::Reference(target) => {
            if schema.table(target).is_none() {
                return Err(SchemaError::DanglingReference {
                    table: table.to_string(),
                    column: column.to_string(),
                    target: target.clone(),
                });
            }
            Ok(())
        }
        ColumnType::Enum(name) => {
            if schema.enum_def(name).is_none() {
                return Err(SchemaError::DanglingReference {
                    table: table.to_string(),
                    column: column.to_string(),
                    target: name.clone(),
                });
            }
            Ok(())
        }
        ColumnType::List(inner) => validate_type(table, column, inner, schema),
        _ => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::{Column, Table};

    fn base_table() -> Table {
        Table {
            name: "Account".to_string(),
            id_column: "id".to_string(),
            columns: vec![Column::new("id", ColumnType::String)],
        }
    }

    #[test]
    fn rejects_reserved_column_name() {
        let mut table = base_table();
        table
            .columns
            .push(Column::new(EFFECTIVE_FROM, ColumnType::Int));
        let schema = Schema {
            tables: vec![table],
            enums: vec![],
        };
        assert!(matches!(
            schema.validate(),
            Err(SchemaError::ReservedColumn { .. })
        ));
    }

    #[test]
    fn rejects_optional_id() {
        let table = Table {
            name: "Account".to_string(),
            id_column: "id".to_string(),
            columns: vec![Column::new("id", ColumnType::String).optional()],
        };
        let schema = Schema {
            tables: vec![table],
            enums: vec![],
        };
        assert!(matches!(
            schema.validate(),
            Err(SchemaError::InvalidId { .. })
        ));
    }

    #[test]
    fn rejects_dangling_reference() {
        let mut table = base_table();
        table.columns.push(Column::new(
            "owner",
            ColumnType::Reference("Missing".to_string()),
        ));
        let schema = Schema {
            tables: vec![table],
            enums: vec![],
        };
        assert!(matches!(
            schema.validate(),
            Err(SchemaError::DanglingReference { .. })
        ));
    }

    #[test]
    fn rejects_duplicate_enum_values() {
        let schema = Schema {
            tables: vec![base_table()],
            enums: vec![super::super::EnumDef {
                name: "Status".to_string(),
                values: vec!["Active".to_string(), "Active".to_string()],
            }],
        };
        assert!(matches!(
            schema.validate(),
            Err(SchemaError::DuplicateEnumValue { .. })
        ));
    }

    #[test]
    fn rejects_empty_enum_value() {
        let schema = Schema {
            tables: vec![base_table()],
            enums: vec![super::super::EnumDef {
                name: "Status".to_string(),
                values: vec!["Active".to_string(), String::new()],
            }],
        };
        assert!(matches!(
            schema.validate(),
            Err(SchemaError::EmptyEnumValue { .. })
        ));
    }

    #[test]
    fn accepts_well_formed_schema() {
        let mut owner_table = base_table();
        owner_table.name = "Owner".to_string();
        let mut account_table = base_table();
        account_table.columns.push(Column::new(
            "owner",
            ColumnType::Reference("Owner".to_string()),
        ));
        let schema = Schema {
            tables: vec![owner_table, account_table],
            enums: vec![],
        };
        assert!(schema.validate().is_ok());
    }
}
