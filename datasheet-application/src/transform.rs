//! 请求值转换
//!
//! 将接口层的 JSON 单元格值按字段类型转换为 [`CellValue`]：
//! 选项以名称给出，缺失的选项先补全到字段定义中，再以补全命令前置提交。
//!
use crate::dto::FieldKey;
use crate::error::{AppError, AppResult};
use datasheet_domain::command::{CellUpdate, Command, RecordInput};
use datasheet_domain::ids::{DatasheetId, FieldId, OptionId, RecordId};
use datasheet_domain::snapshot::{CellValue, DatasheetSnapshot, Field, FieldKind, SelectOption};
use serde_json::Value;
use std::collections::BTreeMap;

/// 选项颜色循环数
const OPTION_COLOR_COUNT: usize = 50;

pub fn resolve_field<'a>(
    snapshot: &'a DatasheetSnapshot,
    key: FieldKey,
    raw: &str,
) -> AppResult<&'a Field> {
    let field = match key {
        FieldKey::Name => snapshot.meta.field_by_name(raw),
        FieldKey::Id => snapshot.field(&FieldId::from(raw)),
    };
    field.ok_or_else(|| {
        AppError::validation(
            "field_not_exists",
            format!("field {raw} not found in datasheet {}", snapshot.datasheet_id),
        )
    })
}

/// 计算需要补全选项的单/多选字段
///
/// 返回 字段 ID → 补全后的完整字段定义；无需补全的字段不出现在结果中。
pub fn enrich_select_fields<'a>(
    snapshot: &DatasheetSnapshot,
    key: FieldKey,
    rows: impl IntoIterator<Item = &'a BTreeMap<String, Value>>,
) -> AppResult<BTreeMap<FieldId, Field>> {
    let mut enriched: BTreeMap<FieldId, Field> = BTreeMap::new();

    for row in rows {
        for (raw, value) in row {
            let field = resolve_field(snapshot, key, raw)?;
            if field.kind.options().is_none() {
                continue;
            }
            for name in option_names(field, value)? {
                let current = enriched.entry(field.id.clone()).or_insert_with(|| field.clone());
                if let FieldKind::SingleSelect { options } | FieldKind::MultiSelect { options } =
                    &mut current.kind
                    && !options.iter().any(|o| o.name == name)
                {
                    let color = (options.len() % OPTION_COLOR_COUNT) as u8;
                    options.push(SelectOption {
                        id: OptionId::generate(),
                        name: name.to_string(),
                        color,
                    });
                }
            }
        }
    }

    enriched.retain(|id, field| snapshot.field(id) != Some(&*field));
    Ok(enriched)
}

/// 补全阶段命令：每个需补全的字段一条 `SetFieldAttr`
pub fn enrichment_commands(target: &DatasheetId, enriched: &BTreeMap<FieldId, Field>) -> Vec<Command> {
    enriched
        .values()
        .map(|field| Command::set_field_attr(target.clone(), field.clone()))
        .collect()
}

fn option_names<'v>(field: &Field, value: &'v Value) -> AppResult<Vec<&'v str>> {
    match value {
        Value::Null => Ok(Vec::new()),
        Value::String(name) => Ok(vec![name.as_str()]),
        Value::Array(items) => items
            .iter()
            .map(|item| item.as_str().ok_or_else(|| invalid(field, value)))
            .collect(),
        _ => Err(invalid(field, value)),
    }
}

fn invalid(field: &Field, value: &Value) -> AppError {
    AppError::validation(
        "cell_value_invalid",
        format!("{value} is not a valid {} value for field {}", field.kind.type_name(), field.name),
    )
}

/// 按字段类型转换单个值；`null` 或空数组表示清空
///
/// `enriched` 为补全后的字段定义，选项名优先在其中查找。
pub fn to_cell_value(field: &Field, enriched: Option<&Field>, value: &Value) -> AppResult<Option<CellValue>> {
    if value.is_null() {
        return Ok(None);
    }
    let cell = match &field.kind {
        FieldKind::Text => CellValue::Text(value.as_str().ok_or_else(|| invalid(field, value))?.to_string()),
        FieldKind::Number { .. } => CellValue::Number(value.as_f64().ok_or_else(|| invalid(field, value))?),
        FieldKind::Checkbox => CellValue::Bool(value.as_bool().ok_or_else(|| invalid(field, value))?),
        FieldKind::SingleSelect { .. } | FieldKind::MultiSelect { .. } => {
            let names = option_names(field, value)?;
            if names.is_empty() {
                return Ok(None);
            }
            let options = enriched.unwrap_or(field).kind.options().unwrap_or_default();
            let ids = names
                .into_iter()
                .map(|name| {
                    options
                        .iter()
                        .find(|o| o.name == name)
                        .map(|o| o.id.clone())
                        .ok_or_else(|| {
                            AppError::validation(
                                "option_not_exists",
                                format!("option {name} not found in field {}", field.name),
                            )
                        })
                })
                .collect::<AppResult<Vec<_>>>()?;
            CellValue::Options(ids)
        }
        FieldKind::Link { .. } => {
            let Value::Array(items) = value else {
                return Err(invalid(field, value));
            };
            if items.is_empty() {
                return Ok(None);
            }
            let ids = items
                .iter()
                .map(|item| item.as_str().map(RecordId::from).ok_or_else(|| invalid(field, value)))
                .collect::<AppResult<Vec<_>>>()?;
            CellValue::Links(ids)
        }
    };
    Ok(Some(cell))
}

/// 新增记录：空值不写入单元格
pub fn to_record_inputs<'a>(
    snapshot: &DatasheetSnapshot,
    key: FieldKey,
    rows: impl IntoIterator<Item = &'a BTreeMap<String, Value>>,
    enriched: &BTreeMap<FieldId, Field>,
) -> AppResult<Vec<RecordInput>> {
    rows.into_iter()
        .map(|row| {
            let mut cells = BTreeMap::new();
            for (raw, value) in row {
                let field = resolve_field(snapshot, key, raw)?;
                if let Some(cell) = to_cell_value(field, enriched.get(&field.id), value)? {
                    cells.insert(field.id.clone(), cell);
                }
            }
            Ok(RecordInput { cells })
        })
        .collect()
}

/// 更新记录：每个给出的键生成一条单元格更新（空值即清空）
pub fn to_cell_updates<'a>(
    snapshot: &DatasheetSnapshot,
    key: FieldKey,
    rows: impl IntoIterator<Item = (&'a RecordId, &'a BTreeMap<String, Value>)>,
    enriched: &BTreeMap<FieldId, Field>,
) -> AppResult<Vec<CellUpdate>> {
    let mut updates = Vec::new();
    for (record_id, row) in rows {
        for (raw, value) in row {
            let field = resolve_field(snapshot, key, raw)?;
            updates.push(CellUpdate {
                record_id: record_id.clone(),
                field_id: field.id.clone(),
                value: to_cell_value(field, enriched.get(&field.id), value)?,
            });
        }
    }
    Ok(updates)
}
