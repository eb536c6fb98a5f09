use super::context::CommandContext;
use super::{AddRecordsPayload, DeleteRecordsPayload, ExecutionData, SetRecordsPayload};
use crate::error::{DomainError, DomainResult};
use crate::ids::{DatasheetId, OptionId, RecordId};
use crate::operation::Operation;
use crate::snapshot::{CellValue, Field, FieldKind, Record, SelectOption};

pub(super) fn add_records(
    ctx: &mut CommandContext,
    target: &DatasheetId,
    payload: &AddRecordsPayload,
) -> DomainResult<ExecutionData> {
    if payload.records.is_empty() {
        return Ok(ExecutionData::Empty);
    }
    if let Some(view_id) = &payload.view_id
        && ctx.state().view(target, view_id).is_none()
    {
        return Err(DomainError::validation(
            "view_not_exists",
            format!("view {view_id} not found in datasheet {target}"),
        ));
    }

    let mut created = Vec::with_capacity(payload.records.len());
    for (offset, input) in payload.records.iter().enumerate() {
        let record = Record {
            id: RecordId::generate(),
            cells: input.cells.clone(),
        };
        let mut links = Vec::new();
        for (field_id, value) in &record.cells {
            let field = ctx.state().field(target, field_id).cloned().ok_or_else(|| {
                DomainError::validation(
                    "field_not_exists",
                    format!("field {field_id} not found in datasheet {target}"),
                )
            })?;
            validate_cell(ctx, &field, value)?;
            if field.kind.is_link() {
                links.push((field, value.links().to_vec()));
            }
        }

        let record_id = record.id.clone();
        ctx.emit(
            target,
            Operation::AddRecord {
                record,
                index: payload.index.map(|i| i + offset),
            },
        )?;
        for (field, ids) in links {
            ctx.sync_back_links(target, &field, &record_id, &[], &ids)?;
        }
        created.push(record_id);
    }

    Ok(ExecutionData::RecordIds(created))
}

pub(super) fn set_records(
    ctx: &mut CommandContext,
    target: &DatasheetId,
    payload: &SetRecordsPayload,
) -> DomainResult<ExecutionData> {
    let mut touched: Vec<RecordId> = Vec::new();

    for update in &payload.updates {
        let state = ctx.state();
        let record = state.record(target, &update.record_id).ok_or_else(|| {
            DomainError::validation(
                "record_not_exists",
                format!("record {} not found in datasheet {target}", update.record_id),
            )
        })?;
        let field = state
            .field(target, &update.field_id)
            .cloned()
            .ok_or_else(|| {
                DomainError::validation(
                    "field_not_exists",
                    format!("field {} not found in datasheet {target}", update.field_id),
                )
            })?;
        let old = record.cell(&update.field_id).cloned();
        if let Some(value) = &update.value {
            validate_cell(ctx, &field, value)?;
        }
        if old == update.value {
            continue;
        }

        ctx.emit(
            target,
            Operation::SetCell {
                record_id: update.record_id.clone(),
                field_id: update.field_id.clone(),
                old: old.clone(),
                new: update.value.clone(),
            },
        )?;
        if field.kind.is_link() {
            let before = old.as_ref().map(CellValue::links).unwrap_or_default();
            let after = update.value.as_ref().map(CellValue::links).unwrap_or_default();
            ctx.sync_back_links(target, &field, &update.record_id, before, after)?;
        }
        if !touched.contains(&update.record_id) {
            touched.push(update.record_id.clone());
        }
    }

    if touched.is_empty() {
        return Ok(ExecutionData::Empty);
    }
    Ok(ExecutionData::RecordIds(touched))
}

pub(super) fn delete_records(
    ctx: &mut CommandContext,
    target: &DatasheetId,
    payload: &DeleteRecordsPayload,
) -> DomainResult<ExecutionData> {
    let mut deleted = Vec::new();

    for record_id in &payload.record_ids {
        let Some(record) = ctx.state().record(target, record_id).cloned() else {
            continue;
        };
        let link_fields: Vec<(Field, Vec<RecordId>)> = record
            .cells
            .iter()
            .filter_map(|(field_id, value)| {
                let field = ctx.state().field(target, field_id)?;
                field
                    .kind
                    .is_link()
                    .then(|| (field.clone(), value.links().to_vec()))
            })
            .collect();

        ctx.emit(target, Operation::DeleteRecord { record })?;
        for (field, ids) in link_fields {
            ctx.sync_back_links(target, &field, record_id, &ids, &[])?;
        }
        deleted.push(record_id.clone());
    }

    if deleted.is_empty() {
        return Ok(ExecutionData::Empty);
    }
    Ok(ExecutionData::RecordIds(deleted))
}

/// 单元格取值与字段类型的匹配校验
fn validate_cell(ctx: &CommandContext, field: &Field, value: &CellValue) -> DomainResult<()> {
    let mismatch = || {
        DomainError::validation(
            "cell_value_invalid",
            format!(
                "field {} of type {} does not accept {} value",
                field.id,
                field.kind.type_name(),
                value.type_name()
            ),
        )
    };

    match (&field.kind, value) {
        (FieldKind::Text, CellValue::Text(_))
        | (FieldKind::Number { .. }, CellValue::Number(_))
        | (FieldKind::Checkbox, CellValue::Bool(_)) => Ok(()),
        (FieldKind::SingleSelect { options }, CellValue::Options(ids)) if ids.len() <= 1 => {
            check_options(field, options, ids)
        }
        (FieldKind::MultiSelect { options }, CellValue::Options(ids)) => {
            check_options(field, options, ids)
        }
        (
            FieldKind::Link {
                foreign_datasheet_id,
                ..
            },
            CellValue::Links(ids),
        ) => {
            let state = ctx.state();
            let Ok(foreign) = state.datasheet(foreign_datasheet_id) else {
                return Ok(());
            };
            match ids.iter().find(|id| !foreign.contains_row(id)) {
                Some(missing) => Err(DomainError::validation(
                    "record_not_exists",
                    format!("linked record {missing} not found in datasheet {foreign_datasheet_id}"),
                )),
                None => Ok(()),
            }
        }
        _ => Err(mismatch()),
    }
}

fn check_options(field: &Field, options: &[SelectOption], ids: &[OptionId]) -> DomainResult<()> {
    match ids.iter().find(|id| !options.iter().any(|o| &o.id == *id)) {
        Some(missing) => Err(DomainError::validation(
            "option_not_exists",
            format!("option {missing} not found in field {}", field.id),
        )),
        None => Ok(()),
    }
}
