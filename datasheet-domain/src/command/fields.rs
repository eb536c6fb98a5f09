use super::context::CommandContext;
use super::{AddFieldsPayload, DeleteFieldPayload, ExecutionData, SetFieldAttrPayload};
use crate::error::{DomainError, DomainResult};
use crate::ids::{DatasheetId, FieldId};
use crate::operation::Operation;
use crate::snapshot::{Field, FieldKind, Meta};

pub(super) fn add_fields(
    ctx: &mut CommandContext,
    target: &DatasheetId,
    payload: &AddFieldsPayload,
) -> DomainResult<ExecutionData> {
    let mut created = Vec::with_capacity(payload.fields.len());

    for input in &payload.fields {
        let name = input.name.trim();
        let state = ctx.state();
        let datasheet = state.datasheet(target)?;
        check_name(&datasheet.meta, name, None)?;

        let field_id = FieldId::generate();
        let mut kind = input.kind.clone();
        let mut brother = None;

        if let FieldKind::Link {
            foreign_datasheet_id,
            brother_field_id,
        } = &mut kind
            && *foreign_datasheet_id != *target
        {
            let foreign = state.datasheet(foreign_datasheet_id).map_err(|_| {
                DomainError::validation(
                    "foreign_datasheet_not_loaded",
                    format!("foreign datasheet {foreign_datasheet_id} is not loaded"),
                )
            })?;
            let brother_id = FieldId::generate();
            let base = if datasheet.name.is_empty() {
                target.to_string()
            } else {
                datasheet.name.clone()
            };
            brother = Some((
                foreign_datasheet_id.clone(),
                Field {
                    id: brother_id.clone(),
                    name: unique_name(&foreign.meta, &base),
                    kind: FieldKind::Link {
                        foreign_datasheet_id: target.clone(),
                        brother_field_id: Some(field_id.clone()),
                    },
                },
            ));
            *brother_field_id = Some(brother_id);
        }

        ctx.emit(
            target,
            Operation::AddField {
                field: Field {
                    id: field_id.clone(),
                    name: name.to_string(),
                    kind,
                },
                index: input.index,
            },
        )?;
        if let Some((foreign, field)) = brother {
            ctx.emit(&foreign, Operation::AddField { field, index: None })?;
        }
        created.push(field_id);
    }

    if created.is_empty() {
        return Ok(ExecutionData::Empty);
    }
    Ok(ExecutionData::FieldIds(created))
}

pub(super) fn delete_field(
    ctx: &mut CommandContext,
    target: &DatasheetId,
    payload: &DeleteFieldPayload,
) -> DomainResult<ExecutionData> {
    let mut deleted = Vec::new();

    for data in &payload.fields {
        let state = ctx.state();
        let datasheet = state.datasheet(target)?;
        let Some(field) = datasheet.field(&data.field_id).cloned() else {
            continue;
        };
        if datasheet.meta.field_map.len() <= 1 {
            return Err(DomainError::validation(
                "field_required",
                format!("datasheet {target} must keep at least one field"),
            ));
        }

        let brother = match field.link_target() {
            Some((foreign, Some(brother_id))) if foreign != target => state
                .field(foreign, brother_id)
                .cloned()
                .map(|b| (foreign.clone(), b)),
            _ => None,
        };

        ctx.emit(target, Operation::DeleteField { field })?;
        if let Some((foreign, brother)) = brother {
            let op = if data.delete_brother_field {
                Operation::DeleteField { field: brother }
            } else {
                let text = Field {
                    kind: FieldKind::Text,
                    ..brother.clone()
                };
                Operation::SetField {
                    old: brother,
                    new: text,
                }
            };
            ctx.emit(&foreign, op)?;
        }
        deleted.push(data.field_id.clone());
    }

    if deleted.is_empty() {
        return Ok(ExecutionData::Empty);
    }
    Ok(ExecutionData::FieldIds(deleted))
}

pub(super) fn set_field_attr(
    ctx: &mut CommandContext,
    target: &DatasheetId,
    payload: &SetFieldAttrPayload,
) -> DomainResult<ExecutionData> {
    if payload.field.id != payload.field_id {
        return Err(DomainError::validation(
            "command_payload_invalid",
            format!(
                "field id mismatch: {} != {}",
                payload.field_id, payload.field.id
            ),
        ));
    }

    let state = ctx.state();
    let datasheet = state.datasheet(target)?;
    let old = datasheet.field(&payload.field_id).cloned().ok_or_else(|| {
        DomainError::validation(
            "field_not_exists",
            format!("field {} not found in datasheet {target}", payload.field_id),
        )
    })?;

    let mut new = payload.field.clone();
    new.name = new.name.trim().to_string();
    check_name(&datasheet.meta, &new.name, Some(&new.id))?;
    if old.kind.is_link() != new.kind.is_link() {
        return Err(DomainError::validation(
            "field_type_unsupported",
            format!(
                "field {} cannot change type from {} to {}",
                old.id,
                old.kind.type_name(),
                new.kind.type_name()
            ),
        ));
    }
    if old == new {
        return Ok(ExecutionData::Empty);
    }

    let field_id = new.id.clone();
    ctx.emit(target, Operation::SetField { old, new })?;
    Ok(ExecutionData::FieldIds(vec![field_id]))
}

fn check_name(meta: &Meta, name: &str, own: Option<&FieldId>) -> DomainResult<()> {
    if name.is_empty() {
        return Err(DomainError::validation(
            "field_name_invalid",
            "field name must not be empty",
        ));
    }
    match meta.field_by_name(name) {
        Some(existing) if Some(&existing.id) != own => Err(DomainError::validation(
            "field_name_duplicate",
            format!("field name {name} already exists"),
        )),
        _ => Ok(()),
    }
}

/// 在元数据中生成不重复的字段名：`name`、`name 2`、`name 3`…
fn unique_name(meta: &Meta, base: &str) -> String {
    if meta.field_by_name(base).is_none() {
        return base.to_string();
    }
    (2..)
        .map(|n| format!("{base} {n}"))
        .find(|candidate| meta.field_by_name(candidate).is_none())
        .unwrap_or_else(|| base.to_string())
}
